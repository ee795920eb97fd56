use serde::Serialize;

use crate::{
    command::{Inbound, Outbound},
    config::LinkConfig,
    error::LinkError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl LinkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
        }
    }
}

/// Per-attempt session state. Rebuilt on every connect; nothing carries over.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    pub status: LinkStatus,
    pub session: u64,
    pub last_heartbeat_at: Option<u64>,
    pub last_activity_at: Option<u64>,
    pub switch_on: bool,
    pub status_text: String,
}

impl ConnectionState {
    fn disconnected(session: u64) -> Self {
        Self {
            status: LinkStatus::Disconnected,
            session,
            last_heartbeat_at: None,
            last_activity_at: None,
            switch_on: false,
            status_text: LinkStatus::Disconnected.as_str().to_string(),
        }
    }
}

/// I/O the host must perform on behalf of the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    Open { session: u64, addr: String },
    Close { session: u64 },
    Send { session: u64, frame: Outbound },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSnapshot {
    pub status: LinkStatus,
    #[serde(rename = "statusText")]
    pub status_text: String,
    #[serde(rename = "switchOn")]
    pub switch_on: bool,
    pub session: u64,
    #[serde(rename = "lastHeartbeatAt")]
    pub last_heartbeat_at: Option<u64>,
    #[serde(rename = "lastActivityAt")]
    pub last_activity_at: Option<u64>,
    #[serde(rename = "reconnectInMs")]
    pub reconnect_in_ms: Option<u64>,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
}

/// Connection lifecycle as an explicit state machine.
///
/// Timers are deadlines polled through [`ConnectionManager::tick`]; there is
/// at most one pending reconnect deadline, and scheduling a new one replaces
/// it. Events carry the session they belong to and are dropped when that
/// session has been superseded.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    config: LinkConfig,
    state: ConnectionState,
    connect_deadline: Option<u64>,
    next_heartbeat_at: Option<u64>,
    reconnect_at: Option<u64>,
    reconnects_scheduled: u64,
    last_error: Option<LinkError>,
}

impl ConnectionManager {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            state: ConnectionState::disconnected(0),
            connect_deadline: None,
            next_heartbeat_at: None,
            reconnect_at: None,
            reconnects_scheduled: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn status(&self) -> LinkStatus {
        self.state.status
    }

    pub fn is_connected(&self) -> bool {
        self.state.status == LinkStatus::Connected
    }

    pub fn switch_on(&self) -> bool {
        self.state.switch_on
    }

    pub fn session(&self) -> u64 {
        self.state.session
    }

    pub fn is_current(&self, session: u64) -> bool {
        self.state.session == session && self.state.status != LinkStatus::Disconnected
    }

    pub fn reconnect_at(&self) -> Option<u64> {
        self.reconnect_at
    }

    pub fn reconnects_scheduled(&self) -> u64 {
        self.reconnects_scheduled
    }

    pub fn last_error(&self) -> Option<&LinkError> {
        self.last_error.as_ref()
    }

    pub fn snapshot(&self, now_ms: u64) -> ConnectionSnapshot {
        ConnectionSnapshot {
            status: self.state.status,
            status_text: self.state.status_text.clone(),
            switch_on: self.state.switch_on,
            session: self.state.session,
            last_heartbeat_at: self.state.last_heartbeat_at,
            last_activity_at: self.state.last_activity_at,
            reconnect_in_ms: self
                .reconnect_at
                .map(|deadline| deadline.saturating_sub(now_ms)),
            last_error: self.last_error.as_ref().map(ToString::to_string),
        }
    }

    /// Starts a new session. Only valid from `Disconnected`; otherwise a no-op.
    pub fn connect(&mut self, now_ms: u64) -> Vec<LinkAction> {
        if self.state.status != LinkStatus::Disconnected {
            return Vec::new();
        }

        self.reconnect_at = None;
        let session = self.state.session.wrapping_add(1);
        self.state = ConnectionState::disconnected(session);
        self.state.status = LinkStatus::Connecting;
        self.state.status_text = LinkStatus::Connecting.as_str().to_string();
        self.connect_deadline = Some(now_ms.saturating_add(self.config.connect_timeout_ms));

        vec![LinkAction::Open {
            session,
            addr: self.config.peer_addr.clone(),
        }]
    }

    pub fn on_opened(&mut self, session: u64, now_ms: u64) -> Vec<LinkAction> {
        if session != self.state.session || self.state.status != LinkStatus::Connecting {
            return Vec::new();
        }

        self.connect_deadline = None;
        self.last_error = None;
        self.state.status = LinkStatus::Connected;
        self.state.last_activity_at = Some(now_ms);
        self.next_heartbeat_at = Some(now_ms.saturating_add(self.config.heartbeat_interval_ms));
        self.refresh_status_text();
        Vec::new()
    }

    pub fn on_open_failed(
        &mut self,
        session: u64,
        error: LinkError,
        now_ms: u64,
    ) -> Vec<LinkAction> {
        if session != self.state.session || self.state.status != LinkStatus::Connecting {
            return Vec::new();
        }
        self.fail(error, now_ms)
    }

    /// Channel error or orderly close.
    pub fn on_closed(&mut self, session: u64, error: LinkError, now_ms: u64) -> Vec<LinkAction> {
        if !self.is_current(session) {
            return Vec::new();
        }
        self.fail(error, now_ms)
    }

    pub fn on_frame(&mut self, session: u64, frame: &str, now_ms: u64) -> Vec<LinkAction> {
        if session != self.state.session || self.state.status != LinkStatus::Connected {
            return Vec::new();
        }

        self.state.last_activity_at = Some(now_ms);
        match Inbound::parse(frame) {
            Inbound::State(on) => {
                self.state.switch_on = on;
                self.refresh_status_text();
            }
            Inbound::Pong => self.refresh_status_text(),
            Inbound::Unknown => {}
        }
        Vec::new()
    }

    /// Fires whichever deadlines have passed.
    pub fn tick(&mut self, now_ms: u64) -> Vec<LinkAction> {
        match self.state.status {
            LinkStatus::Connecting => match self.connect_deadline {
                Some(deadline) if now_ms >= deadline => {
                    self.fail(LinkError::ConnectTimeout, now_ms)
                }
                _ => Vec::new(),
            },
            LinkStatus::Connected => {
                if let Some(timeout) = self.config.liveness_timeout_ms {
                    let idle = self
                        .state
                        .last_activity_at
                        .map(|last| now_ms.saturating_sub(last))
                        .unwrap_or(0);
                    if idle >= timeout {
                        return self.fail(LinkError::HeartbeatTimeout(timeout), now_ms);
                    }
                }

                match self.next_heartbeat_at {
                    Some(deadline) if now_ms >= deadline => {
                        self.state.last_heartbeat_at = Some(now_ms);
                        self.next_heartbeat_at =
                            Some(now_ms.saturating_add(self.config.heartbeat_interval_ms));
                        vec![LinkAction::Send {
                            session: self.state.session,
                            frame: Outbound::Ping,
                        }]
                    }
                    _ => Vec::new(),
                }
            }
            LinkStatus::Disconnected => match self.reconnect_at {
                Some(deadline) if now_ms >= deadline => {
                    self.reconnect_at = None;
                    self.connect(now_ms)
                }
                _ => Vec::new(),
            },
        }
    }

    /// Explicit teardown: cancels every timer and never schedules a reconnect.
    /// Safe from any state, including mid-connect.
    pub fn disconnect(&mut self) -> Vec<LinkAction> {
        self.connect_deadline = None;
        self.next_heartbeat_at = None;
        self.reconnect_at = None;

        if self.state.status == LinkStatus::Disconnected {
            return Vec::new();
        }

        let session = self.state.session;
        self.state = ConnectionState::disconnected(session);
        vec![LinkAction::Close { session }]
    }

    /// Sends a command frame on the live session.
    pub fn send(&self, frame: Outbound) -> Option<LinkAction> {
        self.is_connected().then(|| LinkAction::Send {
            session: self.state.session,
            frame,
        })
    }

    fn fail(&mut self, error: LinkError, now_ms: u64) -> Vec<LinkAction> {
        let session = self.state.session;
        self.connect_deadline = None;
        self.next_heartbeat_at = None;
        self.state = ConnectionState::disconnected(session);
        self.last_error = Some(error);
        self.schedule_reconnect(now_ms);
        vec![LinkAction::Close { session }]
    }

    fn schedule_reconnect(&mut self, now_ms: u64) {
        self.reconnect_at = Some(now_ms.saturating_add(self.config.reconnect_backoff_ms));
        self.reconnects_scheduled = self.reconnects_scheduled.saturating_add(1);
    }

    fn refresh_status_text(&mut self) {
        self.state.status_text = if self.state.switch_on {
            "Connected (ON)".to_string()
        } else {
            "Connected (OFF)".to_string()
        };
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(LinkConfig {
            peer_addr: "switch.local:81".to_string(),
            ..LinkConfig::default()
        })
    }

    fn connected(now_ms: u64) -> ConnectionManager {
        let mut link = manager();
        link.connect(now_ms);
        link.on_opened(link.session(), now_ms);
        link
    }

    #[test]
    fn connect_opens_a_new_session() {
        let mut link = manager();
        let actions = link.connect(0);

        assert_eq!(
            actions,
            vec![LinkAction::Open {
                session: 1,
                addr: "switch.local:81".to_string(),
            }]
        );
        assert_eq!(link.status(), LinkStatus::Connecting);
        assert_eq!(link.state().status_text, "Connecting");
    }

    #[test]
    fn connect_outside_disconnected_is_noop() {
        let mut link = manager();
        link.connect(0);
        assert!(link.connect(10).is_empty());
        assert_eq!(link.session(), 1);

        link.on_opened(1, 20);
        assert!(link.connect(30).is_empty());
        assert_eq!(link.status(), LinkStatus::Connected);
    }

    #[test]
    fn opened_session_becomes_connected() {
        let link = connected(100);
        assert!(link.is_connected());
        assert_eq!(link.state().status_text, "Connected (OFF)");
        assert_eq!(link.state().last_activity_at, Some(100));
        assert_eq!(link.reconnect_at(), None);
    }

    #[test]
    fn channel_error_schedules_exactly_one_reconnect() {
        let mut link = manager();
        link.connect(0);
        let actions = link.on_closed(1, LinkError::ChannelClosed("reset".to_string()), 200);

        assert_eq!(actions, vec![LinkAction::Close { session: 1 }]);
        assert_eq!(link.status(), LinkStatus::Disconnected);
        assert_eq!(link.reconnect_at(), Some(3_200));
        assert_eq!(link.reconnects_scheduled(), 1);

        // Duplicate error/close notifications for the same session are ignored.
        assert!(link
            .on_closed(1, LinkError::ChannelClosed("eof".to_string()), 250)
            .is_empty());
        assert!(link
            .on_open_failed(1, LinkError::Connect("refused".to_string()), 260)
            .is_empty());
        assert_eq!(link.reconnect_at(), Some(3_200));
        assert_eq!(link.reconnects_scheduled(), 1);
    }

    #[test]
    fn unexpected_close_while_connected_reconnects_after_backoff() {
        let mut link = connected(0);
        link.on_closed(1, LinkError::ChannelClosed("peer went away".to_string()), 5_000);

        assert_eq!(link.status(), LinkStatus::Disconnected);
        assert_eq!(link.state().status_text, "Disconnected");
        assert!(link.tick(7_999).is_empty());

        let actions = link.tick(8_000);
        assert_eq!(
            actions,
            vec![LinkAction::Open {
                session: 2,
                addr: "switch.local:81".to_string(),
            }]
        );
        assert_eq!(link.status(), LinkStatus::Connecting);
        assert_eq!(link.reconnect_at(), None);
    }

    #[test]
    fn connect_timeout_fails_the_attempt() {
        let mut link = manager();
        link.connect(0);

        assert!(link.tick(4_999).is_empty());
        let actions = link.tick(5_000);

        assert_eq!(actions, vec![LinkAction::Close { session: 1 }]);
        assert_eq!(link.last_error(), Some(&LinkError::ConnectTimeout));
        assert_eq!(link.reconnect_at(), Some(8_000));

        // The late success of the abandoned attempt must not revive it.
        assert!(link.on_opened(1, 5_100).is_empty());
        assert_eq!(link.status(), LinkStatus::Disconnected);
    }

    #[test]
    fn immediate_failure_schedules_reconnect() {
        let mut link = manager();
        link.connect(0);
        link.on_open_failed(1, LinkError::Connect("refused".to_string()), 10);

        assert_eq!(link.status(), LinkStatus::Disconnected);
        assert_eq!(link.reconnect_at(), Some(3_010));
    }

    #[test]
    fn manual_connect_replaces_pending_reconnect() {
        let mut link = manager();
        link.connect(0);
        link.on_open_failed(1, LinkError::Connect("refused".to_string()), 0);
        assert!(link.reconnect_at().is_some());

        link.connect(1_000);
        assert_eq!(link.reconnect_at(), None);
        assert_eq!(link.session(), 2);

        // The cancelled deadline never fires a second attempt.
        link.on_opened(2, 1_100);
        assert!(link.tick(3_000).is_empty());
        assert_eq!(link.session(), 2);
    }

    #[test]
    fn heartbeat_is_sent_on_its_period() {
        let mut link = connected(0);

        assert!(link.tick(9_999).is_empty());
        assert_eq!(
            link.tick(10_000),
            vec![LinkAction::Send {
                session: 1,
                frame: Outbound::Ping,
            }]
        );
        assert_eq!(link.state().last_heartbeat_at, Some(10_000));
        assert!(link.tick(15_000).is_empty());
        assert_eq!(link.tick(20_000).len(), 1);
    }

    #[test]
    fn missing_pong_is_not_fatal_by_default() {
        let mut link = connected(0);
        for now in (10_000..=120_000).step_by(10_000) {
            link.tick(now);
        }
        assert!(link.is_connected());
    }

    #[test]
    fn liveness_timeout_drops_silent_channel() {
        let mut link = ConnectionManager::new(LinkConfig {
            liveness_timeout_ms: Some(25_000),
            ..LinkConfig::default()
        });
        link.connect(0);
        link.on_opened(1, 0);

        link.tick(10_000);
        link.on_frame(1, "PONG", 10_500);
        link.tick(20_000);
        assert!(link.is_connected());

        let actions = link.tick(35_500);
        assert_eq!(actions, vec![LinkAction::Close { session: 1 }]);
        assert_eq!(link.last_error(), Some(&LinkError::HeartbeatTimeout(25_000)));
        assert_eq!(link.reconnect_at(), Some(38_500));
    }

    #[test]
    fn state_push_updates_switch_and_status_text() {
        let mut link = connected(0);
        assert!(!link.switch_on());

        link.on_frame(1, "STATE:ON", 50);
        assert!(link.switch_on());
        assert_eq!(link.state().status_text, "Connected (ON)");

        link.on_frame(1, "STATE:OFF\r\n", 60);
        assert!(!link.switch_on());
        assert_eq!(link.state().status_text, "Connected (OFF)");
    }

    #[test]
    fn unknown_frames_only_touch_activity() {
        let mut link = connected(0);
        link.on_frame(1, "STATE:ON", 10);

        let before = link.state().clone();
        link.on_frame(1, "FIRMWARE:2.1", 20);

        assert_eq!(link.state().switch_on, before.switch_on);
        assert_eq!(link.state().status_text, before.status_text);
        assert_eq!(link.state().last_activity_at, Some(20));
    }

    #[test]
    fn frames_from_superseded_session_are_ignored() {
        let mut link = connected(0);
        link.on_closed(1, LinkError::ChannelClosed("reset".to_string()), 100);
        link.tick(3_100);
        link.on_opened(2, 3_200);

        link.on_frame(1, "STATE:ON", 3_300);
        assert!(!link.switch_on());
        assert!(link
            .on_closed(1, LinkError::ChannelClosed("late".to_string()), 3_400)
            .is_empty());
        assert!(link.is_connected());
    }

    #[test]
    fn reconnect_starts_from_fresh_state() {
        let mut link = connected(0);
        link.on_frame(1, "STATE:ON", 10);
        link.on_closed(1, LinkError::ChannelClosed("reset".to_string()), 20);
        link.tick(3_020);

        assert_eq!(link.state().session, 2);
        assert!(!link.switch_on());
        assert_eq!(link.state().last_activity_at, None);
    }

    #[test]
    fn disconnect_is_idempotent_and_cancels_everything() {
        let mut link = manager();
        link.connect(0);

        assert_eq!(link.disconnect(), vec![LinkAction::Close { session: 1 }]);
        assert!(link.disconnect().is_empty());
        assert_eq!(link.status(), LinkStatus::Disconnected);
        assert_eq!(link.reconnect_at(), None);

        assert!(link.tick(60_000).is_empty());
        assert!(link.on_opened(1, 100).is_empty());
        assert_eq!(link.status(), LinkStatus::Disconnected);
    }

    #[test]
    fn disconnect_cancels_pending_reconnect() {
        let mut link = connected(0);
        link.on_closed(1, LinkError::ChannelClosed("reset".to_string()), 0);
        assert!(link.reconnect_at().is_some());

        assert!(link.disconnect().is_empty());
        assert_eq!(link.reconnect_at(), None);
        assert!(link.tick(10_000).is_empty());
    }

    #[test]
    fn snapshot_reports_reconnect_countdown() {
        let mut link = connected(0);
        link.on_closed(1, LinkError::ChannelClosed("reset".to_string()), 1_000);

        let snapshot = link.snapshot(2_000);
        assert_eq!(snapshot.status, LinkStatus::Disconnected);
        assert_eq!(snapshot.reconnect_in_ms, Some(2_000));
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("channel closed: reset")
        );
    }
}
