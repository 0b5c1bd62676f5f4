use std::fmt;
use std::time::Duration;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        };
        f.write_str(label)
    }
}

/// Connection lifecycle bookkeeping for the log stream.
///
/// Reconnects use a constant delay and only follow a connection that actually
/// reached `Open`. An attempt that never opens is not retried, so a server
/// that is down at startup leaves the stream idle until something calls
/// `begin_connect` again.
#[derive(Debug, Clone)]
pub struct ConnectionSupervisor {
    state: ConnectionState,
    opened_this_attempt: bool,
    reconnect_delay: Duration,
    reconnect_pending: bool,
    shut_down: bool,
}

impl ConnectionSupervisor {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            opened_this_attempt: false,
            reconnect_delay,
            reconnect_pending: false,
            shut_down: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Claim the right to open a connection. Refused while one is live.
    pub fn begin_connect(&mut self) -> bool {
        if self.shut_down || self.state != ConnectionState::Disconnected {
            return false;
        }
        self.state = ConnectionState::Connecting;
        self.opened_this_attempt = false;
        true
    }

    pub fn on_open(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Open;
            self.opened_this_attempt = true;
        }
    }

    /// Returns the delay to wait before reconnecting, if a reconnect should be
    /// scheduled now.
    pub fn on_close(&mut self) -> Option<Duration> {
        let was_open = std::mem::take(&mut self.opened_this_attempt);
        self.state = ConnectionState::Disconnected;
        if !was_open || self.shut_down || self.reconnect_pending {
            return None;
        }
        self.reconnect_pending = true;
        Some(self.reconnect_delay)
    }

    /// Consume the pending reconnect once its timer fires.
    pub fn reconnect_due(&mut self) -> bool {
        if !std::mem::take(&mut self.reconnect_pending) {
            return false;
        }
        !self.shut_down
    }

    pub fn begin_close(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            self.state = ConnectionState::Closing;
        }
    }

    pub fn shutdown(&mut self) {
        self.shut_down = true;
        self.reconnect_pending = false;
    }
}

impl Default for ConnectionSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_after_open_schedules_one_reconnect() {
        let mut supervisor = ConnectionSupervisor::default();
        assert!(supervisor.begin_connect());
        supervisor.on_open();
        assert_eq!(supervisor.state(), ConnectionState::Open);

        assert_eq!(supervisor.on_close(), Some(DEFAULT_RECONNECT_DELAY));
        assert!(supervisor.reconnect_pending());
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn second_close_while_reconnect_pending_schedules_nothing() {
        let mut supervisor = ConnectionSupervisor::new(Duration::from_millis(50));
        supervisor.begin_connect();
        supervisor.on_open();
        assert!(supervisor.on_close().is_some());

        // A manual connect opens and drops again before the timer fires.
        assert!(supervisor.begin_connect());
        supervisor.on_open();
        assert_eq!(supervisor.on_close(), None);

        assert!(supervisor.reconnect_due());
        assert!(!supervisor.reconnect_due());
    }

    #[test]
    fn close_before_open_is_not_retried() {
        let mut supervisor = ConnectionSupervisor::default();
        assert!(supervisor.begin_connect());
        assert_eq!(supervisor.on_close(), None);
        assert!(!supervisor.reconnect_pending());
    }

    #[test]
    fn failed_retry_after_drop_is_not_retried_again() {
        let mut supervisor = ConnectionSupervisor::default();
        supervisor.begin_connect();
        supervisor.on_open();
        supervisor.on_close();
        assert!(supervisor.reconnect_due());

        assert!(supervisor.begin_connect());
        assert_eq!(supervisor.on_close(), None);
    }

    #[test]
    fn connect_is_refused_while_live() {
        let mut supervisor = ConnectionSupervisor::default();
        assert!(supervisor.begin_connect());
        assert!(!supervisor.begin_connect());
        supervisor.on_open();
        assert!(!supervisor.begin_connect());
        supervisor.begin_close();
        assert_eq!(supervisor.state(), ConnectionState::Closing);
        assert!(!supervisor.begin_connect());
    }

    #[test]
    fn shutdown_disables_reconnect() {
        let mut supervisor = ConnectionSupervisor::default();
        supervisor.begin_connect();
        supervisor.on_open();
        supervisor.shutdown();
        supervisor.begin_close();

        assert_eq!(supervisor.on_close(), None);
        assert!(!supervisor.reconnect_due());
        assert!(!supervisor.begin_connect());
    }

    #[test]
    fn pending_reconnect_is_dropped_on_shutdown() {
        let mut supervisor = ConnectionSupervisor::default();
        supervisor.begin_connect();
        supervisor.on_open();
        assert!(supervisor.on_close().is_some());
        supervisor.shutdown();
        assert!(!supervisor.reconnect_pending());
        assert!(!supervisor.reconnect_due());
    }
}
