use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::buffer::{LogBuffer, ProgressCursor};
use crate::collapse::{ProgressClassifier, merge_batch};
use crate::persistence::SessionStore;
use crate::snapshot::{LogSource, SnapshotError};
use crate::supervisor::{ConnectionState, ConnectionSupervisor};
use crate::transport::{LogConnection, LogTransport, NORMAL_CLOSURE, TransportEvent};
use crate::view::{LogView, ViewChange};

pub const CLEARED_PLACEHOLDER: &str = "Cleared logs.";
pub const EMPTY_PLACEHOLDER: &str = "No logs to display.";
pub const LEAVING_REASON: &str = "User is leaving the page";

const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    /// Catch-up fetch issued at startup; connects the stream afterwards.
    Initial,
    /// Catch-up after the stream went away; reconnects afterwards.
    Catchup,
    /// Manual recovery; replaces the buffer unconditionally.
    Refresh,
}

/// User-issued actions while following the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Refresh,
    Clear,
    Reconnect,
    Quit,
    /// The user typed a line into the terminal, taking up a row of output.
    Echo,
}

impl Command {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "r" | "refresh" => Some(Command::Refresh),
            "c" | "clear" => Some(Command::Clear),
            "reconnect" => Some(Command::Reconnect),
            "q" | "quit" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum Completion {
    Snapshot(SnapshotKind, Result<String, SnapshotError>),
    Clear(Result<Value, SnapshotError>),
}

#[derive(Debug, Clone)]
pub struct TailOptions {
    pub stream_url: Url,
    pub reconnect_delay: Duration,
    pub classifier: ProgressClassifier,
}

/// Owns every piece of tail state and reacts to one event at a time.
///
/// All mutation happens on the task that calls the `on_*` handlers (normally
/// [`TailSession::run`]); fetches and sockets run in spawned tasks and report
/// back through channels.
pub struct TailSession<T, V, S> {
    transport: T,
    source: Arc<dyn LogSource>,
    view: V,
    store: S,
    stream_url: Url,
    classifier: ProgressClassifier,
    buffer: LogBuffer,
    cursor: ProgressCursor,
    restored_cursor: Option<usize>,
    supervisor: ConnectionSupervisor,
    connection: Option<LogConnection>,
    reconnect_at: Option<Instant>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    catchup_in_flight: bool,
    refresh_in_flight: bool,
    clear_in_flight: bool,
    torn_down: bool,
}

impl<T, V, S> TailSession<T, V, S>
where
    T: LogTransport,
    V: LogView,
    S: SessionStore,
{
    pub fn new(
        transport: T,
        source: Arc<dyn LogSource>,
        view: V,
        store: S,
        options: TailOptions,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            source,
            view,
            store,
            stream_url: options.stream_url,
            classifier: options.classifier,
            buffer: LogBuffer::new(),
            cursor: ProgressCursor::unset(),
            restored_cursor: None,
            supervisor: ConnectionSupervisor::new(options.reconnect_delay),
            connection: None,
            reconnect_at: None,
            completions_tx,
            completions_rx,
            catchup_in_flight: false,
            refresh_in_flight: false,
            clear_in_flight: false,
            torn_down: false,
        }
    }

    pub fn buffer(&self) -> &LogBuffer {
        &self.buffer
    }

    pub fn cursor(&self) -> ProgressCursor {
        self.cursor
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Restore session state and kick off the catch-up fetch.
    ///
    /// The persisted cursor is held back until the snapshot has landed, so it
    /// is checked against the server's log rather than an empty buffer.
    pub fn start(&mut self) {
        match self.store.load() {
            Ok(saved) => {
                self.restored_cursor = saved.progress_cursor;
                if let Some(viewport) = saved.viewport() {
                    self.view.restore_viewport(viewport);
                }
            }
            Err(err) => {
                warn!(target: "beach_tide::session", error = %err, "could not load session state");
            }
        }
        self.catch_up(SnapshotKind::Initial);
    }

    /// Re-fetch the full log and replace the buffer with it.
    pub fn refresh(&mut self) {
        if self.torn_down || self.refresh_in_flight {
            return;
        }
        self.refresh_in_flight = true;
        self.spawn_snapshot(SnapshotKind::Refresh);
    }

    /// Ask the server to truncate its log.
    pub fn clear(&mut self) {
        if self.torn_down || self.clear_in_flight {
            return;
        }
        self.clear_in_flight = true;
        let source = self.source.clone();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = source.clear().await;
            let _ = completions.send(Completion::Clear(result));
        });
    }

    /// Catch up and connect now if the stream is down, without waiting for a
    /// retry timer.
    pub fn reconnect(&mut self) {
        if self.supervisor.state() == ConnectionState::Disconnected {
            self.catch_up(SnapshotKind::Catchup);
        }
    }

    /// Open the stream unless a connection is already live.
    pub fn ensure_connected(&mut self) -> bool {
        if self.torn_down || !self.supervisor.begin_connect() {
            return false;
        }
        info!(target: "beach_tide::session", url = %self.stream_url, "connecting to log stream");
        self.connection = Some(self.transport.open(&self.stream_url));
        true
    }

    pub fn handle_command(&mut self, command: Command) {
        debug!(target: "beach_tide::session", ?command, "command");
        match command {
            Command::Refresh => self.refresh(),
            Command::Clear => self.clear(),
            Command::Reconnect => self.reconnect(),
            Command::Quit => self.shutdown(),
            Command::Echo => self.view.note_input(),
        }
    }

    pub fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Snapshot(kind, result) => self.on_snapshot(kind, result),
            Completion::Clear(result) => self.on_clear(result),
        }
    }

    pub fn on_snapshot(&mut self, kind: SnapshotKind, result: Result<String, SnapshotError>) {
        match kind {
            SnapshotKind::Refresh => self.refresh_in_flight = false,
            SnapshotKind::Initial | SnapshotKind::Catchup => self.catchup_in_flight = false,
        }
        if self.torn_down {
            debug!(target: "beach_tide::session", ?kind, "dropping snapshot that landed after shutdown");
            return;
        }

        match (kind, result) {
            (SnapshotKind::Initial | SnapshotKind::Catchup, Ok(text)) => {
                let fresh = LogBuffer::from_text(&text);
                if fresh != self.buffer {
                    debug!(
                        target: "beach_tide::session",
                        ?kind,
                        lines = fresh.len(),
                        "replacing buffer from snapshot"
                    );
                    self.buffer = fresh;
                    self.present(ViewChange::Replaced, true);
                }
                self.reconcile_cursor();
            }
            (SnapshotKind::Initial | SnapshotKind::Catchup, Err(err)) => {
                warn!(target: "beach_tide::session", ?kind, error = %err, "catch-up snapshot failed");
                self.reconcile_cursor();
            }
            (SnapshotKind::Refresh, Ok(text)) => {
                let fresh = LogBuffer::from_text(&text);
                self.buffer = if fresh.is_empty() {
                    LogBuffer::placeholder(EMPTY_PLACEHOLDER)
                } else {
                    fresh
                };
                self.reconcile_cursor();
                self.present(ViewChange::Replaced, true);
            }
            (SnapshotKind::Refresh, Err(err)) => {
                warn!(target: "beach_tide::session", error = %err, "refresh failed");
            }
        }

        if kind != SnapshotKind::Refresh {
            self.ensure_connected();
        }
    }

    pub fn on_clear(&mut self, result: Result<Value, SnapshotError>) {
        self.clear_in_flight = false;
        if self.torn_down {
            return;
        }
        match result {
            Ok(response) => {
                debug!(target: "beach_tide::session", %response, "server log cleared");
                self.buffer = LogBuffer::placeholder(CLEARED_PLACEHOLDER);
                self.restored_cursor = None;
                self.cursor.clear();
                self.persist_cursor();
                self.present(ViewChange::Replaced, false);
            }
            Err(err) => {
                error!(target: "beach_tide::session", error = %err, "failed to clear server log");
            }
        }
    }

    pub fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                self.supervisor.on_open();
                info!(target: "beach_tide::session", "log stream established");
            }
            TransportEvent::Message(text) => self.on_message(&text),
            TransportEvent::Error(err) => {
                warn!(target: "beach_tide::session", error = %err, "log stream error");
            }
            TransportEvent::Closed { code, reason } => {
                self.connection = None;
                let was_open = self.supervisor.state() == ConnectionState::Open;
                match self.supervisor.on_close() {
                    Some(delay) => {
                        if self.reconnect_at.is_none() {
                            self.reconnect_at = Some(Instant::now() + delay);
                        }
                        info!(
                            target: "beach_tide::session",
                            ?code,
                            %reason,
                            delay_ms = delay.as_millis() as u64,
                            "log stream closed; reconnecting"
                        );
                    }
                    None if was_open => {
                        info!(target: "beach_tide::session", ?code, %reason, "log stream closed");
                    }
                    None => {
                        warn!(target: "beach_tide::session", ?code, %reason, "log stream could not be established");
                    }
                }
            }
        }
    }

    pub fn on_reconnect_due(&mut self) {
        self.reconnect_at = None;
        if self.supervisor.reconnect_due()
            && self.supervisor.state() == ConnectionState::Disconnected
        {
            self.catch_up(SnapshotKind::Catchup);
        }
    }

    /// Stop streaming for good: no reconnects, no further buffer writes.
    pub fn shutdown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.supervisor.begin_close();
        self.supervisor.shutdown();
        self.reconnect_at = None;
        if let Some(connection) = &self.connection {
            if let Err(err) = connection.close(NORMAL_CLOSURE, LEAVING_REASON) {
                debug!(target: "beach_tide::session", error = %err, "connection already gone at shutdown");
            }
        }
        let viewport = self.view.viewport();
        if let Err(err) = self.store.save_viewport(viewport) {
            warn!(target: "beach_tide::session", error = %err, "could not save viewport");
        }
        self.persist_cursor();
    }

    /// Drive the session until `shutdown` resolves or a quit command arrives.
    pub async fn run<F>(&mut self, mut commands: mpsc::UnboundedReceiver<Command>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.start();
        tokio::pin!(shutdown);
        let mut commands_open = true;

        while !self.torn_down {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(completion) = self.completions_rx.recv() => self.on_completion(completion),
                event = next_event(&mut self.connection) => self.on_transport_event(event),
                _ = wait_until(self.reconnect_at) => self.on_reconnect_due(),
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command),
                    None => commands_open = false,
                },
            }
        }

        self.shutdown();
        self.finish_close().await;
    }

    async fn finish_close(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        if timeout(CLOSE_GRACE, connection.closed()).await.is_err() {
            debug!(target: "beach_tide::session", "close handshake did not finish in time");
        }
        self.supervisor.on_close();
    }

    /// Fetch the server log, then connect once it lands. Lines written while
    /// the stream was down arrive through the snapshot.
    fn catch_up(&mut self, kind: SnapshotKind) {
        if self.torn_down || self.catchup_in_flight {
            return;
        }
        self.catchup_in_flight = true;
        self.spawn_snapshot(kind);
    }

    fn spawn_snapshot(&self, kind: SnapshotKind) {
        let source = self.source.clone();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = source.fetch_snapshot().await;
            let _ = completions.send(Completion::Snapshot(kind, result));
        });
    }

    fn on_message(&mut self, text: &str) {
        if self.torn_down {
            return;
        }
        let Some(outcome) = merge_batch(&mut self.buffer, &mut self.cursor, text, &self.classifier)
        else {
            trace!(target: "beach_tide::session", "ignoring empty batch");
            return;
        };
        if outcome.cursor_changed || outcome.replaced.is_some() {
            self.persist_cursor();
        }
        self.present(ViewChange::Merged(outcome), outcome.scroll);
    }

    /// Keep a cursor only while it still points at a progress line.
    fn reconcile_cursor(&mut self) {
        let candidate = self
            .restored_cursor
            .take()
            .or(self.cursor.index())
            .filter(|&index| {
                self.buffer
                    .get(index)
                    .is_some_and(|line| self.classifier.is_progress(line))
            });
        self.cursor = ProgressCursor::from(candidate);
        self.persist_cursor();
    }

    fn persist_cursor(&mut self) {
        if let Err(err) = self.store.save_cursor(self.cursor.index()) {
            warn!(target: "beach_tide::session", error = %err, "could not save progress cursor");
        }
    }

    fn present(&mut self, change: ViewChange, scroll: bool) {
        if let Err(err) = self.view.present(&self.buffer, change) {
            warn!(target: "beach_tide::session", error = %err, "failed to render log");
        }
        if scroll {
            if let Err(err) = self.view.scroll_to_bottom() {
                warn!(target: "beach_tide::session", error = %err, "failed to scroll log");
            }
        }
    }
}

async fn next_event(connection: &mut Option<LogConnection>) -> TransportEvent {
    match connection {
        Some(connection) => connection.next_event().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
