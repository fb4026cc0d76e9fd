//! Fire-and-forget audit trail for session and game activity.
//!
//! The registry reports what happened through an [`EventSink`] and never waits on it.
//! Sinks must return immediately; anything slow belongs behind a channel on the sink's side.

use log::info;
use serde_json::Value;

/// Receiver for `(event kind, structured details)` pairs.
pub trait EventSink: Send + Sync {
    fn record(&self, kind: &'static str, details: Value);
}

/// Writes every event as one structured log line under the `codenames::events` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn record(&self, kind: &'static str, details: Value) {
        info!(target: "codenames::events", "{} {}", kind, details);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn record(&self, _kind: &'static str, _details: Value) {}
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::default();
        sink.record("client_connected", json!({"session": 1}));
        sink.record("player_named", json!({"session": 1, "name": "Alice"}));

        assert_eq!(sink.kinds(), vec!["client_connected", "player_named"]);
        assert_eq!(sink.find("player_named").unwrap()["name"], "Alice");
        assert!(sink.find("room_created").is_none());
    }

    #[test]
    fn test_builtin_sinks_accept_events() {
        LogEventSink.record("lobby_chat", json!({"message": "hi"}));
        NullEventSink.record("lobby_chat", json!({"message": "hi"}));
    }
}
