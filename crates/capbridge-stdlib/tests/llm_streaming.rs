//! Streaming, provider pools and cost accounting through `util_llm`
//!
//! Providers are scripted in-process fakes registered by the host; script
//! handlers are plain closures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use capbridge_sdk::{
    BridgeError, BridgeRegistry, BridgeResult, CallContext, ErrorKind, MemoryEventSink,
    ScriptValue,
};
use capbridge_stdlib::llm::{LlmBridge, LlmProvider};
use parking_lot::Mutex;

struct ScriptedProvider {
    name: String,
    chunks: Vec<String>,
    healthy: bool,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(name: &str, chunks: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            healthy: true,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            chunks: Vec::new(),
            healthy: false,
            calls: AtomicUsize::new(0),
        })
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn stream(&self, _ctx: &CallContext, _prompt: &str) -> BridgeResult<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.healthy {
            return Err(BridgeError::upstream("stream", format!("{} unavailable", self.name)));
        }
        Ok(self.chunks.clone())
    }
}

fn setup(providers: &[Arc<ScriptedProvider>]) -> (BridgeRegistry, Arc<MemoryEventSink>) {
    let events = Arc::new(MemoryEventSink::new());
    let bridge = Arc::new(LlmBridge::new().with_event_sink(events.clone()));
    for provider in providers {
        bridge.register_provider(provider.clone());
    }
    let mut registry = BridgeRegistry::new();
    registry.register(bridge);
    registry.initialize_all(&CallContext::background()).unwrap();
    (registry, events)
}

fn provider(registry: &BridgeRegistry, name: &str) -> ScriptValue {
    registry
        .call(&CallContext::background(), "util_llm", "getProvider", &[name.into()])
        .unwrap()
}

fn collecting_handler() -> (ScriptValue, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler = ScriptValue::function(move |args| {
        let content = args[0].get("content").and_then(|c| c.as_str().ok()).unwrap_or_default();
        sink.lock().push(content.to_string());
        Ok(ScriptValue::Nil)
    });
    (handler, seen)
}

#[test]
fn test_stream_delivers_chunks_in_order() {
    let (registry, events) = setup(&[ScriptedProvider::new("fake", &["Hel", "lo ", "world"])]);
    let (handler, seen) = collecting_handler();

    let result = registry
        .call(
            &CallContext::background(),
            "util_llm",
            "streamWithEvents",
            &[provider(&registry, "fake"), "hi".into(), handler],
        )
        .unwrap();

    assert_eq!(result.get("content"), Some(&ScriptValue::string("Hello world")));
    assert_eq!(result.get("tokenCount"), Some(&ScriptValue::number(3.0)));
    assert_eq!(*seen.lock(), vec!["Hel", "lo ", "world"]);
    assert_eq!(events.named("stream.chunk").len(), 3);
    assert_eq!(events.named("stream.complete").len(), 1);
}

#[test]
fn test_handler_failure_stops_stream() {
    let (registry, events) = setup(&[ScriptedProvider::new("fake", &["a", "b"])]);
    let handler = ScriptValue::function(|_| Err(BridgeError::from("boom")));

    let err = registry
        .call(
            &CallContext::background(),
            "util_llm",
            "streamWithEvents",
            &[provider(&registry, "fake"), "hi".into(), handler],
        )
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
    assert!(err.to_string().contains("event handler error"));
    assert!(events.named("stream.complete").is_empty());
}

#[test]
fn test_cancellation_between_chunks() {
    let (registry, _) = setup(&[ScriptedProvider::new("fake", &["a", "b", "c"])]);
    let ctx = CallContext::background();
    let cancel = ctx.cancel_handle();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handler = ScriptValue::function(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        cancel.cancel();
        Ok(ScriptValue::Nil)
    });

    let err = registry
        .call(
            &ctx,
            "util_llm",
            "streamWithEvents",
            &[provider(&registry, "fake"), "hi".into(), handler],
        )
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failover_pool_skips_broken_provider() {
    let broken = ScriptedProvider::failing("broken");
    let healthy = ScriptedProvider::new("healthy", &["ok"]);
    let (registry, _) = setup(&[broken.clone(), healthy.clone()]);
    let ctx = CallContext::background();

    let providers = ScriptValue::array(vec![provider(&registry, "broken"), provider(&registry, "healthy")]);
    let pool = registry
        .call(&ctx, "util_llm", "createProviderPool", &[providers, "failover".into()])
        .unwrap();
    let (handler, _) = collecting_handler();

    let result = registry
        .call(&ctx, "util_llm", "streamWithEvents", &[pool, "hi".into(), handler])
        .unwrap();

    assert_eq!(result.get("content"), Some(&ScriptValue::string("ok")));
    assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
    assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unknown_provider_and_bad_pool() {
    let (registry, _) = setup(&[ScriptedProvider::new("fake", &["x"])]);
    let ctx = CallContext::background();

    let err = registry
        .call(&ctx, "util_llm", "getProvider", &["missing".into()])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = registry
        .call(
            &ctx,
            "util_llm",
            "createProviderPool",
            &[ScriptValue::array(vec![]), "failover".into()],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let providers = ScriptValue::array(vec![provider(&registry, "fake")]);
    let err = registry
        .call(&ctx, "util_llm", "createProviderPool", &[providers, "random".into()])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_cost_report_replaces_retracked_request() {
    let (registry, events) = setup(&[]);
    let ctx = CallContext::background();
    let usage = |input: f64, output: f64| {
        ScriptValue::from_pairs([
            ("inputTokens", ScriptValue::number(input)),
            ("outputTokens", ScriptValue::number(output)),
        ])
    };

    let first = registry
        .call(&ctx, "util_llm", "trackRequestCost", &["r1".into(), "openai".into(), "gpt".into(), usage(1000.0, 1000.0)])
        .unwrap();
    let first_cost = first.get("totalCost").and_then(|v| v.as_number().ok()).unwrap();
    assert!((first_cost - 0.007).abs() < 1e-9);
    registry
        .call(&ctx, "util_llm", "trackRequestCost", &["r1".into(), "openai".into(), "gpt".into(), usage(2000.0, 0.0)])
        .unwrap();

    let report = registry.call(&ctx, "util_llm", "getCostReport", &[]).unwrap();
    let summary = report.get("summary").unwrap();
    assert_eq!(summary.get("totalRequests"), Some(&ScriptValue::number(1.0)));
    let total = report
        .get("totalCosts")
        .and_then(|t| t.get("openai"))
        .and_then(|v| v.as_number().ok())
        .unwrap();
    assert!((total - 0.006).abs() < 1e-9);
    assert_eq!(events.named("cost.tracked").len(), 2);
}

#[test]
fn test_track_cost_rejects_unrepresentable_counts() {
    let (registry, events) = setup(&[]);
    let ctx = CallContext::background();
    let track = |usage: ScriptValue| {
        registry.call(&ctx, "util_llm", "trackRequestCost", &["r1".into(), "openai".into(), "gpt".into(), usage])
    };

    for usage in [
        ScriptValue::from_pairs([
            ("inputTokens", ScriptValue::number(1e20)),
            ("outputTokens", ScriptValue::number(1e20)),
        ]),
        ScriptValue::from_pairs([("inputTokens", ScriptValue::number(10.5))]),
        ScriptValue::from_pairs([("outputTokens", ScriptValue::number(-1.0))]),
        ScriptValue::from_pairs([("totalTokens", ScriptValue::number(f64::INFINITY))]),
    ] {
        let err = track(usage).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
    assert!(events.named("cost.tracked").is_empty());

    let limit: f64 = 9_007_199_254_740_992.0;
    let out = track(ScriptValue::from_pairs([
        ("inputTokens", ScriptValue::number(limit)),
        ("outputTokens", ScriptValue::number(limit)),
        ("totalTokens", ScriptValue::number(5.0)),
    ]))
    .unwrap();
    let breakdown = out.get("breakdown").unwrap();
    assert_eq!(breakdown.get("inputTokens"), Some(&ScriptValue::number(limit)));
    assert_eq!(breakdown.get("outputTokens"), Some(&ScriptValue::number(limit)));

    // Both counts at the limit with no reported total.
    let out = track(ScriptValue::from_pairs([
        ("inputTokens", ScriptValue::number(limit)),
        ("outputTokens", ScriptValue::number(limit)),
    ]));
    assert!(out.is_ok());
}

#[test]
fn test_cost_report_totals_follow_filter() {
    let (registry, _events) = setup(&[]);
    let ctx = CallContext::background();
    let usage = ScriptValue::from_pairs([("inputTokens", ScriptValue::number(1000.0))]);
    for (id, provider) in [("r1", "openai"), ("r2", "anthropic")] {
        registry
            .call(&ctx, "util_llm", "trackRequestCost", &[id.into(), provider.into(), "m".into(), usage.clone()])
            .unwrap();
    }

    let filter = ScriptValue::from_pairs([("provider", "anthropic".into())]);
    let report = registry.call(&ctx, "util_llm", "getCostReport", &[filter]).unwrap();
    let totals = report.get("totalCosts").and_then(|t| t.as_object().ok()).unwrap();
    assert_eq!(totals.len(), 1);
    assert!(totals.contains_key("anthropic"));
}

#[test]
fn test_recovers_fenced_json() {
    let (registry, _) = setup(&[]);
    let response = "Here you go:\n```json\n{\"answer\": 42,}\n```";
    let parsed = registry
        .call(
            &CallContext::background(),
            "util_llm",
            "parseResponseWithRecovery",
            &[response.into(), "json".into()],
        )
        .unwrap();
    assert_eq!(parsed.get("answer"), Some(&ScriptValue::number(42.0)));
}
