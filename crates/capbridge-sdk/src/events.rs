//! Event sinks
//!
//! Bridges report notable actions (scheme registered, error emitted, cost
//! tracked) to an injected `EventSink`. The default sink writes them to
//! `tracing`; `MemoryEventSink` keeps them for inspection.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

/// A named event emitted by a bridge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeEvent {
    /// Unique event id
    pub id: String,
    /// Event name, e.g. `auth.scheme.registered`
    pub name: String,
    /// Emitting bridge id
    pub source: String,
    /// Emission time
    pub timestamp: DateTime<Utc>,
    /// Event payload
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl BridgeEvent {
    /// New event stamped now
    pub fn new(
        source: &str,
        name: impl Into<String>,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            source: source.to_string(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// Payload field
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}

/// Receiver for bridge events
pub trait EventSink: Send + Sync {
    /// Deliver one event
    fn emit(&self, event: BridgeEvent);
}

/// Writes events as `tracing` info records
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: BridgeEvent) {
        let data = serde_json::Value::Object(event.data);
        tracing::info!(
            target: "capbridge::events",
            event = %event.name,
            source = %event.source,
            id = %event.id,
            data = %data,
            "bridge event"
        );
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<BridgeEvent>>,
}

impl MemoryEventSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all events so far
    pub fn events(&self) -> Vec<BridgeEvent> {
        self.events.lock().clone()
    }

    /// Events with the given name
    pub fn named(&self, name: &str) -> Vec<BridgeEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }

    /// Number of events so far
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Check if no events arrived
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Drop all events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: BridgeEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> serde_json::Map<String, serde_json::Value> {
        let mut data = serde_json::Map::new();
        data.insert("endpoint".into(), json!("/api"));
        data
    }

    #[test]
    fn test_memory_sink_records_events() {
        let sink = MemoryEventSink::new();
        sink.emit(BridgeEvent::new("util_auth", "auth.scheme.registered", payload()));
        sink.emit(BridgeEvent::new("util_auth", "auth.event.login", serde_json::Map::new()));

        assert_eq!(sink.len(), 2);
        let registered = sink.named("auth.scheme.registered");
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].get("endpoint"), Some(&json!("/api")));
        assert_eq!(registered[0].source, "util_auth");

        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = BridgeEvent::new("s", "e", serde_json::Map::new());
        let b = BridgeEvent::new("s", "e", serde_json::Map::new());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        TracingEventSink.emit(BridgeEvent::new("s", "e", payload()));
    }
}
