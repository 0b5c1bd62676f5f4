use async_trait::async_trait;
use beach_tide::collapse::ProgressClassifier;
use beach_tide::persistence::{MemorySessionStore, PersistedSession, ViewportState};
use beach_tide::session::{CLEARED_PLACEHOLDER, Command, TailOptions, TailSession};
use beach_tide::snapshot::{LogSource, SnapshotError};
use beach_tide::supervisor::ConnectionState;
use beach_tide::transport::{MockPeer, MockServer, MockTransport, NORMAL_CLOSURE};
use beach_tide::view::MemoryView;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use url::Url;

type MockSession = TailSession<MockTransport, MemoryView, MemorySessionStore>;

/// Scripted stand-in for the server's snapshot and clear endpoints.
struct FakeSource {
    log: Mutex<String>,
    available: bool,
    delay: Duration,
    fetches: AtomicUsize,
    clears: AtomicUsize,
}

impl FakeSource {
    fn serving(log: &str) -> Self {
        Self {
            log: Mutex::new(log.to_string()),
            available: true,
            delay: Duration::ZERO,
            fetches: AtomicUsize::new(0),
            clears: AtomicUsize::new(0),
        }
    }

    fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::serving("")
        }
    }

    fn slow(log: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::serving(log)
        }
    }

    fn set_log(&self, log: &str) {
        *self.log.lock().unwrap() = log.to_string();
    }

    fn failure(&self) -> SnapshotError {
        SnapshotError::Status {
            url: Url::parse("http://127.0.0.1:9080/stream/logs").unwrap(),
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[async_trait]
impl LogSource for FakeSource {
    async fn fetch_snapshot(&self) -> Result<String, SnapshotError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        if !self.available {
            return Err(self.failure());
        }
        Ok(self.log.lock().unwrap().clone())
    }

    async fn clear(&self) -> Result<Value, SnapshotError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(self.failure());
        }
        self.log.lock().unwrap().clear();
        Ok(json!({ "success": true, "message": "Logs cleared" }))
    }
}

struct Harness {
    server: MockServer,
    view: MemoryView,
    store: MemorySessionStore,
    commands: mpsc::UnboundedSender<Command>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<MockSession>,
}

impl Harness {
    fn start(source: Arc<FakeSource>, saved: PersistedSession) -> Self {
        let (transport, server) = MockTransport::new();
        let view = MemoryView::new();
        let store = MemorySessionStore::new(saved);
        let mut session = TailSession::new(
            transport,
            source,
            view.clone(),
            store.clone(),
            TailOptions {
                stream_url: Url::parse("ws://127.0.0.1:9080/ws/logs").unwrap(),
                reconnect_delay: Duration::from_millis(2000),
                classifier: ProgressClassifier::default(),
            },
        );
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            session
                .run(commands_rx, async move {
                    let _ = stop_rx.await;
                })
                .await;
            session
        });
        Self {
            server,
            view,
            store,
            commands,
            stop,
            task,
        }
    }

    async fn next_peer(&self) -> MockPeer {
        loop {
            if let Some(peer) = self.server.accept() {
                return peer;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    async fn stop(self) -> (MockSession, MemorySessionStore) {
        let _ = self.stop.send(());
        let session = self.task.await.expect("session task panicked");
        (session, self.store)
    }
}

async fn settle() {
    sleep(Duration::from_millis(50)).await;
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn catch_up_then_follow_collapses_progress() {
    let source = Arc::new(FakeSource::serving("queued gallery\n"));
    let harness = Harness::start(source, PersistedSession::default());

    let peer = harness.next_peer().await;
    assert_eq!(
        harness.server.urls()[0].as_str(),
        "ws://127.0.0.1:9080/ws/logs"
    );
    assert_eq!(harness.view.text(), "queued gallery\n");

    peer.open();
    peer.push("img_01.jpg 1.2MB/s\n");
    peer.push("img_01.jpg 2.4MB/s\n");
    peer.push("img_01.jpg 3.1MB/s\nimg_01.jpg 3.3MB/s\nimg_01.jpg saved\n");
    settle().await;

    assert_eq!(
        harness.view.text(),
        "queued gallery\nimg_01.jpg 3.1MB/s\nimg_01.jpg saved\n"
    );
    assert_eq!(harness.store.snapshot().progress_cursor, Some(1));

    let (session, store) = harness.stop().await;
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert!(session.is_torn_down());
    let saved = store.snapshot();
    assert_eq!(saved.scroll_offset, Some(3));
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn dropped_stream_reconnects_once_after_delay() {
    let source = Arc::new(FakeSource::serving(""));
    let harness = Harness::start(source.clone(), PersistedSession::default());

    let first = harness.next_peer().await;
    first.open();
    settle().await;
    first.close(1006);

    sleep(Duration::from_millis(1900)).await;
    assert_eq!(harness.server.attempts(), 1);

    let second = harness.next_peer().await;
    assert_eq!(harness.server.attempts(), 2);
    second.open();
    second.push("back\n");
    settle().await;
    assert_eq!(harness.view.text(), "back\n");

    sleep(Duration::from_secs(10)).await;
    assert_eq!(harness.server.attempts(), 2);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 2);

    let (session, _) = harness.stop().await;
    assert_eq!(session.reconnect_deadline(), None);
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn reconnect_catches_up_on_lines_logged_while_down() {
    let source = Arc::new(FakeSource::serving("a\n"));
    let harness = Harness::start(source.clone(), PersistedSession::default());

    let first = harness.next_peer().await;
    first.open();
    settle().await;
    first.close(1006);
    source.set_log("a\nwritten during gap\n");

    let second = harness.next_peer().await;
    second.open();
    second.push("after\n");
    settle().await;

    assert_eq!(harness.view.text(), "a\nwritten during gap\nafter\n");
    assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    harness.stop().await;
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn stream_that_never_opens_waits_for_manual_reconnect() {
    let source = Arc::new(FakeSource::unavailable());
    let harness = Harness::start(source.clone(), PersistedSession::default());

    let peer = harness.next_peer().await;
    assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    peer.fail("connection refused");

    sleep(Duration::from_secs(10)).await;
    assert_eq!(harness.server.attempts(), 1);

    harness.commands.send(Command::Reconnect).unwrap();
    let retry = harness.next_peer().await;
    retry.open();
    retry.push("hello\n");
    settle().await;
    assert_eq!(harness.view.text(), "hello\n");

    harness.stop().await;
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn refresh_and_clear_commands_replace_the_buffer() {
    let source = Arc::new(FakeSource::serving("one\n"));
    let harness = Harness::start(source.clone(), PersistedSession::default());
    let peer = harness.next_peer().await;
    peer.open();
    settle().await;

    source.set_log("one\ntwo\n");
    harness.commands.send(Command::Refresh).unwrap();
    settle().await;
    assert_eq!(harness.view.text(), "one\ntwo\n");

    harness.commands.send(Command::Clear).unwrap();
    settle().await;
    assert_eq!(harness.view.text(), format!("{CLEARED_PLACEHOLDER}\n"));
    assert_eq!(source.clears.load(Ordering::SeqCst), 1);

    harness.commands.send(Command::Refresh).unwrap();
    settle().await;
    assert_eq!(harness.view.text(), "No logs to display.\n");

    harness.stop().await;
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn quit_closes_the_stream_normally() {
    let source = Arc::new(FakeSource::serving("a\n"));
    let harness = Harness::start(source, PersistedSession::default());
    let mut peer = harness.next_peer().await;
    peer.open();
    settle().await;

    harness.commands.send(Command::Quit).unwrap();
    settle().await;
    assert_eq!(peer.acknowledge_close(), Some(NORMAL_CLOSURE));

    let session = harness.task.await.expect("session task panicked");
    assert!(session.is_torn_down());
    assert_eq!(harness.server.attempts(), 1);
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn saved_cursor_resumes_in_place_updates() {
    let source = Arc::new(FakeSource::serving("a\nvideo.mp4 7MB/s\nb\n"));
    let saved = PersistedSession {
        progress_cursor: Some(1),
        ..PersistedSession::default()
    };
    let harness = Harness::start(source, saved);
    let peer = harness.next_peer().await;
    peer.open();
    peer.push("video.mp4 8MB/s");
    settle().await;

    assert_eq!(harness.view.text(), "a\nvideo.mp4 8MB/s\nb\n");
    assert_eq!(harness.store.snapshot().progress_cursor, Some(1));
    harness.stop().await;
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn saved_viewport_is_restored_on_start() {
    let source = Arc::new(FakeSource::serving("a\nb\n"));
    let saved = PersistedSession {
        viewport_height: Some(40),
        scroll_offset: Some(12),
        ..PersistedSession::default()
    };
    let harness = Harness::start(source, saved);
    harness.next_peer().await;

    assert_eq!(
        harness.view.state().restored,
        Some(ViewportState {
            height: 40,
            scroll_offset: 12
        })
    );
    harness.stop().await;
}

#[test_timeout::tokio_timeout_test(30, paused)]
async fn shutdown_during_catch_up_never_connects() {
    let source = Arc::new(FakeSource::slow("late\n", Duration::from_secs(5)));
    let harness = Harness::start(source.clone(), PersistedSession::default());
    settle().await;
    let server = harness.server.clone();
    let view = harness.view.clone();

    let (session, _) = harness.stop().await;
    sleep(Duration::from_secs(10)).await;

    assert!(session.buffer().is_empty());
    assert_eq!(view.text(), "");
    assert_eq!(server.attempts(), 0);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
}
