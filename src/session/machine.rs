//! Connection lifecycle as an explicit dispatch table.
//!
//! [`ConnectionMachine::handle`] maps `(state, event)` to a new state and the
//! side effects the driver must carry out. It owns no sockets or timers, so
//! every transition rule can be exercised synchronously.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::ConnectionState;
use crate::ws::Endpoint;

/// Close code meaning "closed on purpose, do not reconnect"
pub const CLOSE_INTENTIONAL: u16 = 1000;
/// Close code the server uses when the access token expired
pub const CLOSE_AUTH_EXPIRED: u16 = 4001;

/// Capped exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before the retry that follows `attempts` failed ones
    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 2u32.checked_pow(attempts).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.cap).min(self.cap)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            cap: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect,
    Opened,
    Errored,
    Closed(Option<u16>),
    RetryElapsed,
    RefreshSucceeded { access_token: String, refresh_token: Option<String> },
    RefreshFailed(String),
    TokenUpdated(String),
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    OpenSocket(String),
    CloseSocket(u16),
    ScheduleRetry(Duration),
    CancelRetry,
    RequestRefresh(String),
    CancelRefresh,
    FlushQueue,
    StartHeartbeat,
    StopHeartbeat,
    StartPruning,
    StopPruning,
    ClearSharedState,
    ReportRefreshFailure(String),
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempts: u32,
    document_id: String,
    access_token: Option<String>,
    refresh_token: Option<String>,
    endpoint: Endpoint,
    policy: ReconnectPolicy,
    socket_live: bool,
    retry_pending: bool,
    refresh_pending: bool,
    pruning: bool,
}

impl ConnectionMachine {
    pub fn new(
        endpoint: Endpoint,
        policy: ReconnectPolicy,
        document_id: String,
        access_token: Option<String>,
        refresh_token: Option<String>,
    ) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempts: 0,
            document_id,
            access_token,
            refresh_token,
            endpoint,
            policy,
            socket_live: false,
            retry_pending: false,
            refresh_pending: false,
            pruning: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        debug!("{:?} in {:?}", event, self.state);
        match event {
            Event::Connect => self.on_connect(),
            Event::Opened => self.on_opened(),
            Event::Errored => self.on_errored(),
            Event::Closed(code) => self.on_closed(code),
            Event::RetryElapsed => self.on_retry_elapsed(),
            Event::RefreshSucceeded { access_token, refresh_token } => {
                self.on_refresh_succeeded(access_token, refresh_token)
            }
            Event::RefreshFailed(reason) => self.on_refresh_failed(reason),
            Event::TokenUpdated(token) => {
                self.access_token = Some(token).filter(|t| !t.is_empty());
                Vec::new()
            }
            Event::Stop => self.on_stop(),
        }
    }

    fn on_connect(&mut self) -> Vec<Action> {
        if self.socket_live || self.retry_pending || self.refresh_pending {
            debug!("Connect ignored, an attempt is already pending");
            return Vec::new();
        }
        if matches!(self.state, ConnectionState::GaveUp { .. }) {
            self.attempts = 0;
        }

        let mut actions = Vec::new();
        let Some(url) = self.target() else {
            return actions;
        };
        if !self.pruning {
            self.pruning = true;
            actions.push(Action::StartPruning);
        }
        actions.extend(self.open(url));
        actions
    }

    fn on_opened(&mut self) -> Vec<Action> {
        if !self.socket_live || self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        info!("Session open for document {}", self.document_id);
        self.state = ConnectionState::Open;
        self.attempts = 0;
        vec![Action::StartHeartbeat, Action::FlushQueue]
    }

    fn on_errored(&mut self) -> Vec<Action> {
        if !self.socket_live {
            return Vec::new();
        }
        if self.state.is_open() {
            self.state = ConnectionState::Closed { code: None };
            return vec![Action::StopHeartbeat];
        }
        Vec::new()
    }

    fn on_closed(&mut self, code: Option<u16>) -> Vec<Action> {
        if !self.socket_live {
            return Vec::new();
        }
        self.socket_live = false;
        let mut actions = vec![Action::StopHeartbeat];

        match code {
            Some(CLOSE_AUTH_EXPIRED) => {
                info!("Access token expired for document {}, renewing", self.document_id);
                self.state = ConnectionState::Closed { code };
                let credential = self
                    .refresh_token
                    .clone()
                    .or_else(|| self.access_token.clone())
                    .unwrap_or_default();
                self.refresh_pending = true;
                actions.push(Action::RequestRefresh(credential));
            }
            Some(CLOSE_INTENTIONAL) => {
                info!("Server closed document {} intentionally", self.document_id);
                self.state = ConnectionState::Idle;
            }
            _ if self.attempts < self.policy.max_attempts => {
                let delay = self.policy.delay(self.attempts);
                self.attempts += 1;
                self.retry_pending = true;
                self.state = ConnectionState::Closed { code };
                info!(
                    "Connection lost ({:?}), retry {} of {} in {:?}",
                    code, self.attempts, self.policy.max_attempts, delay
                );
                actions.push(Action::ScheduleRetry(delay));
            }
            _ => {
                warn!(
                    "Giving up on document {} after {} reconnect attempts",
                    self.document_id, self.attempts
                );
                self.state = ConnectionState::GaveUp { code };
            }
        }
        actions
    }

    fn on_retry_elapsed(&mut self) -> Vec<Action> {
        if !self.retry_pending {
            return Vec::new();
        }
        self.retry_pending = false;
        match self.target() {
            Some(url) => self.open(url),
            None => {
                self.state = ConnectionState::Idle;
                Vec::new()
            }
        }
    }

    fn on_refresh_succeeded(&mut self, access_token: String, refresh_token: Option<String>) -> Vec<Action> {
        if !self.refresh_pending {
            return Vec::new();
        }
        self.refresh_pending = false;
        if access_token.is_empty() {
            return self.on_refresh_failed_inner("empty access token".to_string());
        }
        self.access_token = Some(access_token);
        if refresh_token.is_some() {
            self.refresh_token = refresh_token;
        }
        self.attempts = 0;
        match self.target() {
            Some(url) => self.open(url),
            None => Vec::new(),
        }
    }

    fn on_refresh_failed(&mut self, reason: String) -> Vec<Action> {
        if !self.refresh_pending {
            return Vec::new();
        }
        self.refresh_pending = false;
        self.on_refresh_failed_inner(reason)
    }

    fn on_refresh_failed_inner(&mut self, reason: String) -> Vec<Action> {
        warn!("Token renewal for document {} failed: {}", self.document_id, reason);
        vec![Action::ReportRefreshFailure(reason)]
    }

    fn on_stop(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::CancelRetry, Action::CancelRefresh];
        if self.socket_live {
            actions.push(Action::CloseSocket(CLOSE_INTENTIONAL));
        }
        actions.extend([Action::StopHeartbeat, Action::StopPruning, Action::ClearSharedState]);

        self.state = ConnectionState::Idle;
        self.attempts = 0;
        self.socket_live = false;
        self.retry_pending = false;
        self.refresh_pending = false;
        self.pruning = false;
        actions
    }

    fn open(&mut self, url: String) -> Vec<Action> {
        self.state = ConnectionState::Connecting;
        self.socket_live = true;
        vec![Action::OpenSocket(url)]
    }

    /// Connection target, or `None` when the session cannot connect yet
    fn target(&self) -> Option<String> {
        let token = self.access_token.as_deref().filter(|t| !t.is_empty());
        let Some(token) = token else {
            warn!("No access token for document {}, staying idle", self.document_id);
            return None;
        };
        if self.document_id.is_empty() {
            warn!("No document id, staying idle");
            return None;
        }
        match self.endpoint.target(&self.document_id, token) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Cannot connect document {}: {}", self.document_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(token: Option<&str>) -> ConnectionMachine {
        ConnectionMachine::new(
            Endpoint::new("localhost:8000", false),
            ReconnectPolicy::default(),
            "proj-1".to_string(),
            token.map(str::to_string),
            None,
        )
    }

    fn open(m: &mut ConnectionMachine) {
        m.handle(Event::Connect);
        m.handle(Event::Opened);
    }

    #[test]
    fn connect_without_token_stays_idle() {
        let mut m = machine(None);
        assert!(m.handle(Event::Connect).is_empty());
        assert_eq!(m.state(), ConnectionState::Idle);

        let mut m = machine(Some(""));
        assert!(m.handle(Event::Connect).is_empty());
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn connect_without_document_stays_idle() {
        let mut m = ConnectionMachine::new(
            Endpoint::new("localhost:8000", false),
            ReconnectPolicy::default(),
            String::new(),
            Some("tok".into()),
            None,
        );
        assert!(m.handle(Event::Connect).is_empty());
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn connect_opens_target_and_starts_pruning() {
        let mut m = machine(Some("tok"));
        assert_eq!(
            m.handle(Event::Connect),
            vec![
                Action::StartPruning,
                Action::OpenSocket("ws://localhost:8000/ws/projects/proj-1?token=tok".into()),
            ]
        );
        assert_eq!(m.state(), ConnectionState::Connecting);
        // Second connect while one is pending does nothing
        assert!(m.handle(Event::Connect).is_empty());
    }

    #[test]
    fn open_resets_attempts_and_flushes() {
        let mut m = machine(Some("tok"));
        m.handle(Event::Connect);
        m.handle(Event::Closed(Some(1006)));
        m.handle(Event::RetryElapsed);
        assert_eq!(m.attempts(), 1);
        assert_eq!(m.handle(Event::Opened), vec![Action::StartHeartbeat, Action::FlushQueue]);
        assert_eq!(m.state(), ConnectionState::Open);
        assert_eq!(m.attempts(), 0);
    }

    #[test]
    fn intentional_close_never_schedules_retry() {
        let mut m = machine(Some("tok"));
        for _ in 0..10 {
            open(&mut m);
            let actions = m.handle(Event::Closed(Some(CLOSE_INTENTIONAL)));
            assert!(!actions.iter().any(|a| matches!(a, Action::ScheduleRetry(_))));
            assert_eq!(m.state(), ConnectionState::Idle);
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap_then_gives_up() {
        let policy = ReconnectPolicy {
            base: Duration::from_millis(1_000),
            cap: Duration::from_millis(5_000),
            max_attempts: 5,
        };
        let mut m = ConnectionMachine::new(Endpoint::new("localhost", false), policy, "proj-1".into(), Some("tok".into()), None);
        m.handle(Event::Connect);

        let mut delays = Vec::new();
        for _ in 0..policy.max_attempts {
            let actions = m.handle(Event::Closed(Some(1006)));
            let delay = actions.iter().find_map(|a| match a {
                Action::ScheduleRetry(d) => Some(*d),
                _ => None,
            });
            delays.push(delay.expect("retry scheduled"));
            assert!(matches!(m.state(), ConnectionState::Closed { .. }));
            m.handle(Event::RetryElapsed);
            assert_eq!(m.state(), ConnectionState::Connecting);
        }
        let expected: Vec<Duration> = [1_000, 2_000, 4_000, 5_000, 5_000].into_iter().map(Duration::from_millis).collect();
        assert_eq!(delays, expected);

        let actions = m.handle(Event::Closed(Some(1006)));
        assert_eq!(actions, vec![Action::StopHeartbeat]);
        assert_eq!(m.state(), ConnectionState::GaveUp { code: Some(1006) });
        assert!(m.handle(Event::RetryElapsed).is_empty());
    }

    #[test]
    fn manual_connect_after_giving_up_starts_over() {
        let policy = ReconnectPolicy { max_attempts: 1, ..ReconnectPolicy::default() };
        let mut m = ConnectionMachine::new(Endpoint::new("localhost", false), policy, "proj-1".into(), Some("tok".into()), None);
        m.handle(Event::Connect);
        m.handle(Event::Closed(None));
        m.handle(Event::RetryElapsed);
        m.handle(Event::Closed(None));
        assert!(matches!(m.state(), ConnectionState::GaveUp { .. }));

        let actions = m.handle(Event::Connect);
        assert!(matches!(actions.as_slice(), [Action::OpenSocket(_)]));
        assert_eq!(m.attempts(), 0);
    }

    #[test]
    fn auth_expiry_refreshes_then_reconnects_without_backoff() {
        let mut m = machine(Some("tok"));
        m.handle(Event::Connect);
        m.handle(Event::Closed(Some(1006)));
        m.handle(Event::RetryElapsed);
        m.handle(Event::Opened);
        m.handle(Event::Closed(Some(1011)));
        m.handle(Event::RetryElapsed);
        assert_eq!(m.attempts(), 1);

        let actions = m.handle(Event::Closed(Some(CLOSE_AUTH_EXPIRED)));
        assert_eq!(actions, vec![Action::StopHeartbeat, Action::RequestRefresh("tok".into())]);
        assert_eq!(m.state(), ConnectionState::Closed { code: Some(CLOSE_AUTH_EXPIRED) });
        assert!(m.handle(Event::Connect).is_empty(), "no connect while refresh is in flight");

        let actions = m.handle(Event::RefreshSucceeded { access_token: "fresh".into(), refresh_token: None });
        assert_eq!(actions, vec![Action::OpenSocket("ws://localhost:8000/ws/projects/proj-1?token=fresh".into())]);
        assert_eq!(m.attempts(), 0);
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn refresh_prefers_refresh_credential_and_stores_rotation() {
        let mut m = ConnectionMachine::new(
            Endpoint::new("localhost", false),
            ReconnectPolicy::default(),
            "proj-1".into(),
            Some("tok".into()),
            Some("refresh-1".into()),
        );
        open(&mut m);
        let actions = m.handle(Event::Closed(Some(CLOSE_AUTH_EXPIRED)));
        assert!(actions.contains(&Action::RequestRefresh("refresh-1".into())));

        m.handle(Event::RefreshSucceeded { access_token: "fresh".into(), refresh_token: Some("refresh-2".into()) });
        assert_eq!(m.access_token(), Some("fresh"));
        assert_eq!(m.refresh_token(), Some("refresh-2"));
    }

    #[test]
    fn failed_refresh_stays_closed() {
        let mut m = machine(Some("tok"));
        open(&mut m);
        m.handle(Event::Closed(Some(CLOSE_AUTH_EXPIRED)));
        let actions = m.handle(Event::RefreshFailed("401".into()));
        assert_eq!(actions, vec![Action::ReportRefreshFailure("401".into())]);
        assert_eq!(m.state(), ConnectionState::Closed { code: Some(CLOSE_AUTH_EXPIRED) });
        assert!(m.handle(Event::RetryElapsed).is_empty());
    }

    #[test]
    fn refresh_result_after_stop_is_ignored() {
        let mut m = machine(Some("tok"));
        open(&mut m);
        m.handle(Event::Closed(Some(CLOSE_AUTH_EXPIRED)));
        m.handle(Event::Stop);
        assert!(m.handle(Event::RefreshSucceeded { access_token: "late".into(), refresh_token: None }).is_empty());
        assert_eq!(m.state(), ConnectionState::Idle);
        assert_eq!(m.access_token(), Some("tok"));
    }

    #[test]
    fn error_marks_not_open_and_waits_for_close() {
        let mut m = machine(Some("tok"));
        open(&mut m);
        assert_eq!(m.handle(Event::Errored), vec![Action::StopHeartbeat]);
        assert!(!m.is_open());
        let actions = m.handle(Event::Closed(Some(1006)));
        assert!(actions.contains(&Action::ScheduleRetry(Duration::from_millis(1_000))));
    }

    #[test]
    fn stop_is_idempotent_from_any_state() {
        let mut m = machine(Some("tok"));
        open(&mut m);
        assert_eq!(
            m.handle(Event::Stop),
            vec![
                Action::CancelRetry,
                Action::CancelRefresh,
                Action::CloseSocket(CLOSE_INTENTIONAL),
                Action::StopHeartbeat,
                Action::StopPruning,
                Action::ClearSharedState,
            ]
        );
        assert_eq!(m.state(), ConnectionState::Idle);

        let again = m.handle(Event::Stop);
        assert!(!again.contains(&Action::CloseSocket(CLOSE_INTENTIONAL)));
        assert_eq!(m.state(), ConnectionState::Idle);
        // The socket's own close after stop changes nothing
        assert!(m.handle(Event::Closed(Some(CLOSE_INTENTIONAL))).is_empty());
    }

    #[test]
    fn stop_cancels_pending_retry() {
        let mut m = machine(Some("tok"));
        m.handle(Event::Connect);
        m.handle(Event::Closed(Some(1006)));
        m.handle(Event::Stop);
        assert!(m.handle(Event::RetryElapsed).is_empty());
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn updated_token_is_used_by_next_attempt() {
        let mut m = machine(None);
        m.handle(Event::TokenUpdated("late-token".into()));
        let actions = m.handle(Event::Connect);
        assert!(actions.contains(&Action::OpenSocket("ws://localhost:8000/ws/projects/proj-1?token=late-token".into())));
    }

    #[test]
    fn delay_saturates_instead_of_overflowing() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(4), Duration::from_secs(16));
        assert_eq!(policy.delay(5), Duration::from_secs(30));
        assert_eq!(policy.delay(64), Duration::from_secs(30));
    }
}
