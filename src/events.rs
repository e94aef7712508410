use serde::Serialize;
use tokio::sync::broadcast;

use crate::session::{SessionResult, SessionSnapshot};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum SessionEvent {
    SessionStateChanged(SessionSnapshot),
    SessionHeartbeat(SessionSnapshot),
    #[serde(rename_all = "camelCase")]
    InterruptionStarted {
        session_id: String,
        duration_secs: u64,
        mandatory: bool,
    },
    #[serde(rename_all = "camelCase")]
    RewardTruncated {
        session_id: String,
        requested: u64,
        granted: u64,
    },
    SessionCompleted(SessionResult),
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::SessionStateChanged(_) => "session-state-changed",
            SessionEvent::SessionHeartbeat(_) => "session-heartbeat",
            SessionEvent::InterruptionStarted { .. } => "interruption-started",
            SessionEvent::RewardTruncated { .. } => "reward-truncated",
            SessionEvent::SessionCompleted(_) => "session-completed",
        }
    }
}

/// Fan-out of session notifications to whoever renders them.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        // No subscribers is fine; nobody is watching the session.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.emit(SessionEvent::RewardTruncated {
            session_id: "s".into(),
            requested: 3,
            granted: 1,
        });
    }

    #[test]
    fn events_serialize_with_their_channel_name() {
        let event = SessionEvent::InterruptionStarted {
            session_id: "s-1".into(),
            duration_secs: 15,
            mandatory: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
        assert_eq!(json["payload"]["durationSecs"], 15);
    }
}
