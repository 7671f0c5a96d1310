//! Contract tests for a minimal bridge built on the SDK
//!
//! Exercises the lifecycle cell, argument reader, custom handles and the
//! registry from outside the crate, the way a bridge author would.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use capbridge_sdk::{
    Args, Bridge, BridgeError, BridgeMetadata, BridgeRegistry, BridgeResult, CallContext,
    ErrorKind, LifecycleCell, MethodInfo, Permission, PermissionKind, ScriptValue,
};
use parking_lot::Mutex;

#[derive(Default)]
struct CounterState {
    counters: HashMap<String, f64>,
}

/// A tally handle shared with scripts
struct Tally {
    hits: Mutex<u32>,
}

struct CounterBridge {
    state: LifecycleCell<CounterState>,
}

impl CounterBridge {
    fn new() -> Self {
        Self {
            state: LifecycleCell::new("counter"),
        }
    }

    fn increment(&self, args: &[ScriptValue]) -> BridgeResult<ScriptValue> {
        let args = Args::new("increment", args);
        let key = args.string(0, "key")?.to_string();
        let by = args.opt_number(1, "by")?.unwrap_or(1.0);
        let total = self.state.write(|s| {
            let entry = s.counters.entry(key).or_insert(0.0);
            *entry += by;
            *entry
        })?;
        Ok(ScriptValue::number(total))
    }

    fn get(&self, args: &[ScriptValue]) -> BridgeResult<ScriptValue> {
        let args = Args::new("get", args);
        let key = args.string(0, "key")?;
        let value = self.state.read(|s| s.counters.get(key).copied())?;
        Ok(value.map(ScriptValue::number).unwrap_or_default())
    }

    fn tally(&self, args: &[ScriptValue]) -> BridgeResult<ScriptValue> {
        let args = Args::new("tally", args);
        let tally = args.downcast::<Tally>(0, "tally", "Tally")?;
        let mut hits = tally.hits.lock();
        *hits += 1;
        Ok(ScriptValue::number(*hits))
    }
}

impl Bridge for CounterBridge {
    fn id(&self) -> &str {
        "counter"
    }

    fn metadata(&self) -> BridgeMetadata {
        BridgeMetadata::new("Counter", "Named counters")
    }

    fn initialize(&self, _ctx: &CallContext) -> BridgeResult<()> {
        self.state.initialize_with(|| Ok(CounterState::default()))?;
        Ok(())
    }

    fn cleanup(&self, _ctx: &CallContext) -> BridgeResult<()> {
        self.state.reset();
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.state.is_initialized()
    }

    fn methods(&self) -> Vec<MethodInfo> {
        vec![
            MethodInfo::new("increment", "Add to a counter")
                .param("key", "string", "Counter name")
                .optional("by", "number", "Amount")
                .returns("number"),
            MethodInfo::new("get", "Read a counter")
                .param("key", "string", "Counter name")
                .returns("number"),
            MethodInfo::new("tally", "Bump a tally handle")
                .param("tally", "Tally", "Handle")
                .returns("number"),
        ]
    }

    fn required_permissions(&self) -> Vec<Permission> {
        vec![Permission::new(
            PermissionKind::Memory,
            "counters",
            &["read", "write"],
            "Counter storage",
        )]
    }

    fn execute_method(
        &self,
        _ctx: &CallContext,
        name: &str,
        args: &[ScriptValue],
    ) -> BridgeResult<ScriptValue> {
        self.state.ensure_initialized()?;
        match name {
            "increment" => self.increment(args),
            "get" => self.get(args),
            "tally" => self.tally(args),
            _ => Err(BridgeError::MethodNotFound {
                bridge: self.id().to_string(),
                method: name.to_string(),
            }),
        }
    }
}

#[test]
fn test_uninitialized_bridge_rejects_every_method() {
    let bridge = CounterBridge::new();
    let ctx = CallContext::background();
    for name in ["increment", "get", "doesNotExist", ""] {
        let err = bridge.execute_method(&ctx, name, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInitialized, "method {name:?}");
    }
}

#[test]
fn test_unknown_method_after_initialize() {
    let bridge = CounterBridge::new();
    let ctx = CallContext::background();
    bridge.initialize(&ctx).unwrap();
    let err = bridge.execute_method(&ctx, "doesNotExist", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MethodNotFound);
}

#[test]
fn test_lifecycle_is_idempotent_and_repeatable() {
    let bridge = CounterBridge::new();
    let ctx = CallContext::background();
    bridge.initialize(&ctx).unwrap();
    bridge
        .execute_method(&ctx, "increment", &[ScriptValue::string("a")])
        .unwrap();

    // A second initialize must not replace live state.
    bridge.initialize(&ctx).unwrap();
    assert_eq!(
        bridge
            .execute_method(&ctx, "get", &[ScriptValue::string("a")])
            .unwrap(),
        ScriptValue::number(1.0)
    );

    bridge.cleanup(&ctx).unwrap();
    bridge.cleanup(&ctx).unwrap();
    assert!(!bridge.is_initialized());

    bridge.initialize(&ctx).unwrap();
    assert_eq!(
        bridge
            .execute_method(&ctx, "get", &[ScriptValue::string("a")])
            .unwrap(),
        ScriptValue::Nil
    );
}

#[test]
fn test_concurrent_calls_share_state() {
    let bridge = Arc::new(CounterBridge::new());
    let ctx = CallContext::background();
    bridge.initialize(&ctx).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                let ctx = CallContext::background();
                for _ in 0..100 {
                    bridge
                        .execute_method(&ctx, "increment", &[ScriptValue::string("hits")])
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(
        bridge
            .execute_method(&ctx, "get", &[ScriptValue::string("hits")])
            .unwrap(),
        ScriptValue::number(800.0)
    );
}

#[test]
fn test_handles_survive_across_calls() {
    let bridge = CounterBridge::new();
    let ctx = CallContext::background();
    bridge.initialize(&ctx).unwrap();

    let tally = ScriptValue::custom("Tally", Tally { hits: Mutex::new(0) });
    bridge.execute_method(&ctx, "tally", &[tally.clone()]).unwrap();
    let out = bridge.execute_method(&ctx, "tally", &[tally]).unwrap();
    assert_eq!(out, ScriptValue::number(2.0));

    let wrong = ScriptValue::custom("Tally", 5u8);
    let err = bridge.execute_method(&ctx, "tally", &[wrong]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_registry_end_to_end() {
    let mut registry = BridgeRegistry::new();
    registry.register(Arc::new(CounterBridge::new()));
    let ctx = CallContext::background();
    registry.initialize_all(&ctx).unwrap();

    let out = registry
        .call(
            &ctx,
            "counter",
            "increment",
            &[ScriptValue::string("x"), ScriptValue::number(5.0)],
        )
        .unwrap();
    assert_eq!(out, ScriptValue::number(5.0));

    let err = registry
        .call(&ctx, "counter", "increment", &[ScriptValue::number(5.0)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let doc = registry.describe("counter").unwrap();
    assert!(doc.contains("increment(key: string, by?: number): number"));
}
