//! `slog` records reaching `tracing`
//!
//! Installs a capturing layer as the thread's default subscriber and
//! checks level, target and rendered message of each record.

use std::collections::BTreeMap;
use std::sync::Arc;

use capbridge_sdk::{Bridge, CallContext, ScriptValue};
use capbridge_stdlib::logger::{LoggerConfig, LogFormat, SlogBridge, LOG_TARGET};
use parking_lot::Mutex;
use tracing_subscriber::layer::SubscriberExt as _;

#[derive(Debug, Clone)]
struct CapturedEvent {
    level: tracing::Level,
    target: String,
    fields: BTreeMap<String, String>,
}

#[derive(Clone, Default)]
struct CaptureLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

struct FieldVisitor<'a> {
    fields: &'a mut BTreeMap<String, String>,
}

impl tracing::field::Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.fields.insert(field.name().to_string(), format!("{value:?}"));
    }
}

impl<S> tracing_subscriber::Layer<S> for CaptureLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut fields = BTreeMap::new();
        event.record(&mut FieldVisitor { fields: &mut fields });
        self.events.lock().push(CapturedEvent {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            fields,
        });
    }
}

fn capture<T>(f: impl FnOnce() -> T) -> (T, Vec<CapturedEvent>) {
    let capture = CaptureLayer::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    let events = capture.events.lock().clone();
    (result, events)
}

fn slog_records(events: &[CapturedEvent]) -> Vec<&CapturedEvent> {
    events.iter().filter(|e| e.target == LOG_TARGET).collect()
}

#[test]
fn test_levels_map_to_tracing() {
    let bridge = SlogBridge::new();
    let ctx = CallContext::background();
    bridge.initialize(&ctx).unwrap();

    let (_, events) = capture(|| {
        bridge.execute_method(&ctx, "warn", &["disk low".into()]).unwrap();
        bridge.execute_method(&ctx, "error", &["disk full".into()]).unwrap();
        bridge.execute_method(&ctx, "debug", &["dropped".into()]).unwrap();
    });

    let records = slog_records(&events);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].level, tracing::Level::WARN);
    assert_eq!(records[0].fields["message"], "disk low");
    assert_eq!(records[1].level, tracing::Level::ERROR);
}

#[test]
fn test_text_attributes_are_rendered() {
    let bridge = SlogBridge::new();
    let ctx = CallContext::background();
    bridge.initialize(&ctx).unwrap();
    let attrs = ScriptValue::from_pairs([
        ("port", ScriptValue::number(8080.0)),
        ("host", ScriptValue::string("localhost")),
    ]);

    let (_, events) = capture(|| {
        bridge
            .execute_method(&ctx, "info", &["listening".into(), "🚀".into(), attrs])
            .unwrap();
    });

    let records = slog_records(&events);
    assert_eq!(records[0].level, tracing::Level::INFO);
    assert_eq!(records[0].fields["message"], "🚀 listening host=localhost port=8080.0");
}

#[test]
fn test_json_format_from_config() {
    let config = LoggerConfig {
        format: LogFormat::Json,
        ..LoggerConfig::default()
    };
    let bridge = SlogBridge::with_config(config);
    let ctx = CallContext::background();
    bridge.initialize(&ctx).unwrap();

    let (_, events) = capture(|| {
        bridge
            .execute_method(&ctx, "logBeforeToolCall", &["search".into(), ScriptValue::from_pairs([("q", ScriptValue::string("rust"))])])
            .unwrap();
    });

    let records = slog_records(&events);
    let line: serde_json::Value = serde_json::from_str(&records[0].fields["message"]).unwrap();
    assert_eq!(line["msg"], "Tool call starting");
    assert_eq!(line["tool"], "search");
    assert!(line.get("params").is_none());
}
