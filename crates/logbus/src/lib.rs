//! Log Bus (§4.11): session-keyed pub/sub log fanout with bounded,
//! drop-oldest subscriber buffers. Grounded on the crawl runner's own
//! `tokio::sync::broadcast` shutdown channel — `broadcast` already
//! gives every subscriber an independent bounded queue and reports
//! "you missed N messages" via `RecvError::Lagged`, which is exactly
//! the drop-oldest-and-flag-overflow behavior this component needs.

use chrono::Utc;
pub use crawlhub_core::{LogEvent, LogLevel};
use tokio::sync::broadcast;

const DEFAULT_BUFFER: usize = 1024;

/// Global log fanout. One instance is shared for the process lifetime;
/// sessions come and go but the bus itself never needs recreating.
pub struct LogBus {
    sender: broadcast::Sender<LogEvent>,
}

impl LogBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn broadcast_session_log(&self, session_id: &str, message: impl Into<String>, level: LogLevel) {
        self.emit(Some(session_id.to_string()), message.into(), level);
    }

    pub fn broadcast_log(&self, message: impl Into<String>, level: LogLevel) {
        self.emit(None, message.into(), level);
    }

    fn emit(&self, session_id: Option<String>, message: String, level: LogLevel) {
        // No subscribers is not an error; the bus never blocks the caller.
        let _ = self.sender.send(LogEvent {
            ts: Utc::now(),
            session_id,
            level,
            message,
        });
    }

    /// Explicit registration (§4.11): subscribing to a session also
    /// delivers global (`session_id = None`) events.
    pub fn subscribe(&self, session_id: Option<String>) -> Subscription {
        Subscription {
            session_id,
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for LogBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Subscription {
    session_id: Option<String>,
    receiver: broadcast::Receiver<LogEvent>,
}

impl Subscription {
    /// Next event for this subscriber. An overflow is surfaced as a
    /// synthetic `Warning` event rather than silently resuming, per
    /// §4.11's "an overflow event is emitted" requirement.
    pub async fn next(&mut self) -> Option<LogEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    return Some(LogEvent {
                        ts: Utc::now(),
                        session_id: self.session_id.clone(),
                        level: LogLevel::Warning,
                        message: format!("overflow: dropped {missed} log events"),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn accepts(&self, event: &LogEvent) -> bool {
        match (&self.session_id, &event.session_id) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(want), Some(got)) => want == got,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_subscriber_sees_own_and_global_events() {
        let bus = LogBus::new();
        let mut sub = bus.subscribe(Some("sess-1".to_string()));

        bus.broadcast_session_log("sess-1", "hello", LogLevel::Info);
        bus.broadcast_session_log("sess-2", "ignored", LogLevel::Info);
        bus.broadcast_log("global ping", LogLevel::Debug);

        let first = sub.next().await.unwrap();
        assert_eq!(first.message, "hello");
        let second = sub.next().await.unwrap();
        assert_eq!(second.message, "global ping");
    }

    #[tokio::test]
    async fn overflow_emits_synthetic_warning() {
        let bus = LogBus::with_capacity(2);
        let mut sub = bus.subscribe(None);

        for i in 0..10 {
            bus.broadcast_log(format!("msg {i}"), LogLevel::Info);
        }

        let event = sub.next().await.unwrap();
        assert_eq!(event.level, LogLevel::Warning);
        assert!(event.message.starts_with("overflow"));
    }

    #[tokio::test]
    async fn bus_never_blocks_without_subscribers() {
        let bus = LogBus::new();
        bus.broadcast_log("nobody listening", LogLevel::Info);
    }
}
