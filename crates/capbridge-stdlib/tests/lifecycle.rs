//! Lifecycle and dispatch guarantees of every bundled bridge
//!
//! Drives the bridges through a `BridgeRegistry` the way a host would:
//! calls before initialization, unknown methods, repeated
//! initialize/cleanup.

use capbridge_sdk::{BridgeRegistry, CallContext, ErrorKind, ScriptValue};
use capbridge_stdlib::register_stdlib;

fn registry() -> BridgeRegistry {
    let mut registry = BridgeRegistry::new();
    register_stdlib(&mut registry);
    registry
}

#[test]
fn test_every_method_requires_initialization() {
    let registry = registry();
    let ctx = CallContext::background();

    for id in registry.ids() {
        let bridge = registry.get(&id).unwrap();
        let mut names: Vec<String> = bridge.methods().into_iter().map(|m| m.name).collect();
        names.push("doesNotExist".to_string());
        for name in names {
            let err = registry.call(&ctx, &id, &name, &[]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotInitialized, "{}.{}", id, name);

            let err = bridge.execute_method(&ctx, &name, &[]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotInitialized, "{}.{} direct", id, name);
        }
    }
}

#[test]
fn test_unknown_method_after_initialize() {
    let registry = registry();
    let ctx = CallContext::background();
    registry.initialize_all(&ctx).unwrap();

    for id in registry.ids() {
        let err = registry.call(&ctx, &id, "doesNotExist", &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MethodNotFound, "{}", id);

        let bridge = registry.get(&id).unwrap();
        let err = bridge.execute_method(&ctx, "doesNotExist", &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MethodNotFound, "{} direct", id);
    }
}

#[test]
fn test_unknown_bridge() {
    let registry = registry();
    let err = registry
        .call(&CallContext::background(), "util_nope", "x", &[])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BridgeNotFound);
}

#[test]
fn test_initialize_and_cleanup_are_idempotent() {
    let registry = registry();
    let ctx = CallContext::background();

    for id in registry.ids() {
        let bridge = registry.get(&id).unwrap();
        bridge.initialize(&ctx).unwrap();
        bridge.initialize(&ctx).unwrap();
        assert!(bridge.is_initialized(), "{}", id);

        bridge.cleanup(&ctx).unwrap();
        bridge.cleanup(&ctx).unwrap();
        assert!(!bridge.is_initialized(), "{}", id);
    }
}

#[test]
fn test_second_initialize_keeps_state() {
    let registry = registry();
    let ctx = CallContext::background();
    registry.initialize_all(&ctx).unwrap();

    let scheme = ScriptValue::from_pairs([("type", ScriptValue::string("bearer"))]);
    registry
        .call(&ctx, "util_auth", "registerAuthScheme", &["/api".into(), scheme])
        .unwrap();
    registry.get("util_auth").unwrap().initialize(&ctx).unwrap();

    let found = registry
        .call(&ctx, "util_auth", "getAuthSchemes", &["/api/x".into()])
        .unwrap();
    assert_eq!(found.as_array().unwrap().len(), 1);
}

#[test]
fn test_cleanup_drops_state() {
    let registry = registry();
    let ctx = CallContext::background();
    registry.initialize_all(&ctx).unwrap();
    registry
        .call(&ctx, "slog", "setLogLevel", &["debug".into()])
        .unwrap();

    registry.cleanup_all(&ctx).unwrap();
    registry.initialize_all(&ctx).unwrap();

    let level = registry.call(&ctx, "slog", "getLogLevel", &[]).unwrap();
    assert_eq!(level, ScriptValue::string("basic"));
}

#[test]
fn test_declared_arguments_are_validated() {
    let registry = registry();
    let ctx = CallContext::background();
    registry.initialize_all(&ctx).unwrap();

    let err = registry
        .call(&ctx, "util_errors", "createError", &[])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = registry
        .call(&ctx, "util_errors", "createError", &[ScriptValue::number(3.0)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_wrong_handle_is_rejected() {
    let registry = registry();
    let ctx = CallContext::background();
    registry.initialize_all(&ctx).unwrap();

    let aggregator = registry
        .call(&ctx, "util_errors", "createErrorAggregator", &[])
        .unwrap();
    let err = registry
        .call(&ctx, "util_errors", "errorToJSON", &[aggregator])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(err.to_string().contains("ErrorAggregator"));
}
