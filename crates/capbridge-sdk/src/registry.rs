//! Bridge registry and dispatcher
//!
//! Holds bridges by identifier and routes `bridge.method(args)` calls:
//! lookup, initialization check, descriptor validation, then execution.
//! `resolve` binds one method ahead of time so repeated calls skip the
//! lookups.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::context::CallContext;
use crate::error::{BridgeError, BridgeResult};
use crate::method::MethodInfo;
use crate::value::ScriptValue;

/// Registry of bridges indexed by id.
pub struct BridgeRegistry {
    bridges: HashMap<String, Arc<dyn Bridge>>,
    order: Vec<String>,
}

impl std::fmt::Debug for BridgeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeRegistry")
            .field("bridges", &self.order)
            .finish()
    }
}

impl BridgeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            bridges: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a bridge under its id, replacing any previous one
    pub fn register(&mut self, bridge: Arc<dyn Bridge>) {
        let id = bridge.id().to_string();
        if self.bridges.insert(id.clone(), bridge).is_none() {
            self.order.push(id);
        }
    }

    /// Get a bridge by id
    pub fn get(&self, id: &str) -> Option<Arc<dyn Bridge>> {
        self.bridges.get(id).cloned()
    }

    /// Check if a bridge is registered
    pub fn contains(&self, id: &str) -> bool {
        self.bridges.contains_key(id)
    }

    /// Registered ids in registration order
    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Get the number of registered bridges
    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    fn lookup(&self, id: &str) -> BridgeResult<&Arc<dyn Bridge>> {
        self.bridges.get(id).ok_or_else(|| BridgeError::BridgeNotFound {
            bridge: id.to_string(),
        })
    }

    /// Initialize every bridge in registration order
    pub fn initialize_all(&self, ctx: &CallContext) -> BridgeResult<()> {
        for id in &self.order {
            self.lookup(id)?.initialize(ctx)?;
        }
        Ok(())
    }

    /// Clean up every bridge in reverse registration order
    pub fn cleanup_all(&self, ctx: &CallContext) -> BridgeResult<()> {
        for id in self.order.iter().rev() {
            self.lookup(id)?.cleanup(ctx)?;
        }
        Ok(())
    }

    /// Call `method` on bridge `id`
    pub fn call(
        &self,
        ctx: &CallContext,
        id: &str,
        method: &str,
        args: &[ScriptValue],
    ) -> BridgeResult<ScriptValue> {
        let bridge = self.lookup(id)?;
        dispatch(bridge.as_ref(), None, ctx, method, args)
    }

    /// Bind `method` on bridge `id` for repeated calls.
    ///
    /// Fails if the bridge is unknown or does not declare the method.
    pub fn resolve(&self, id: &str, method: &str) -> BridgeResult<ResolvedMethod> {
        let bridge = Arc::clone(self.lookup(id)?);
        let info = bridge
            .method_info(method)
            .ok_or_else(|| BridgeError::MethodNotFound {
                bridge: id.to_string(),
                method: method.to_string(),
            })?;
        Ok(ResolvedMethod { bridge, info })
    }

    /// Documentation text for bridge `id`
    pub fn describe(&self, id: &str) -> BridgeResult<String> {
        Ok(describe_bridge(self.lookup(id)?.as_ref()))
    }
}

impl Default for BridgeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn dispatch(
    bridge: &dyn Bridge,
    info: Option<&MethodInfo>,
    ctx: &CallContext,
    method: &str,
    args: &[ScriptValue],
) -> BridgeResult<ScriptValue> {
    if !bridge.is_initialized() {
        return Err(BridgeError::NotInitialized {
            bridge: bridge.id().to_string(),
        });
    }
    match info {
        Some(info) => info.validate(args)?,
        None => bridge.validate_method(method, args)?,
    }
    tracing::trace!(bridge = bridge.id(), method, argc = args.len(), "dispatch");
    bridge.execute_method(ctx, method, args)
}

/// A method bound to its bridge and descriptor.
#[derive(Clone)]
pub struct ResolvedMethod {
    bridge: Arc<dyn Bridge>,
    info: MethodInfo,
}

impl std::fmt::Debug for ResolvedMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedMethod")
            .field("bridge", &self.bridge.id())
            .field("method", &self.info.name)
            .finish()
    }
}

impl ResolvedMethod {
    /// Descriptor of the bound method
    pub fn info(&self) -> &MethodInfo {
        &self.info
    }

    /// Invoke the bound method
    pub fn call(&self, ctx: &CallContext, args: &[ScriptValue]) -> BridgeResult<ScriptValue> {
        dispatch(self.bridge.as_ref(), Some(&self.info), ctx, &self.info.name, args)
    }
}

/// Render metadata, permissions, type mappings and method help for a bridge
pub fn describe_bridge(bridge: &dyn Bridge) -> String {
    let meta = bridge.metadata();
    let mut out = String::new();
    let _ = writeln!(out, "{} ({}) v{}", meta.name, bridge.id(), meta.version);
    let _ = writeln!(out, "{}", meta.description);
    let _ = writeln!(out, "Author: {}  License: {}", meta.author, meta.license);
    if !meta.dependencies.is_empty() {
        let _ = writeln!(out, "Depends on: {}", meta.dependencies.join(", "));
    }

    let permissions = bridge.required_permissions();
    if !permissions.is_empty() {
        out.push_str("\nPermissions:\n");
        for p in &permissions {
            let _ = writeln!(out, "  {}  {}", p, p.description);
        }
    }

    let mut mappings: Vec<_> = bridge.type_mappings().into_iter().collect();
    if !mappings.is_empty() {
        mappings.sort_by(|a, b| a.0.cmp(&b.0));
        out.push_str("\nTypes:\n");
        for (name, m) in &mappings {
            let _ = writeln!(out, "  {}: {} -> {}  {}", name, m.native_type, m.script_type, m.description);
        }
    }

    let mut methods = bridge.methods();
    methods.sort_by(|a, b| a.name.cmp(&b.name));
    out.push_str("\nMethods:\n");
    for m in &methods {
        for line in m.render_help().lines() {
            let _ = writeln!(out, "  {}", line);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeMetadata, LifecycleCell};
    use crate::permission::{Permission, PermissionKind};

    struct Echo {
        state: LifecycleCell<()>,
    }

    impl Echo {
        fn new() -> Self {
            Self {
                state: LifecycleCell::new("echo"),
            }
        }
    }

    impl Bridge for Echo {
        fn id(&self) -> &str {
            "echo"
        }

        fn metadata(&self) -> BridgeMetadata {
            BridgeMetadata::new("Echo", "Returns its argument")
        }

        fn initialize(&self, _ctx: &CallContext) -> BridgeResult<()> {
            self.state.initialize_with(|| Ok(())).map(|_| ())
        }

        fn cleanup(&self, _ctx: &CallContext) -> BridgeResult<()> {
            self.state.reset();
            Ok(())
        }

        fn is_initialized(&self) -> bool {
            self.state.is_initialized()
        }

        fn methods(&self) -> Vec<MethodInfo> {
            vec![MethodInfo::new("echo", "Echo a string")
                .param("text", "string", "Text")
                .returns("string")]
        }

        fn required_permissions(&self) -> Vec<Permission> {
            vec![Permission::new(PermissionKind::Memory, "echo", &["read"], "Nothing")]
        }

        fn execute_method(
            &self,
            _ctx: &CallContext,
            name: &str,
            args: &[ScriptValue],
        ) -> BridgeResult<ScriptValue> {
            self.state.ensure_initialized()?;
            match name {
                "echo" => Ok(args[0].clone()),
                _ => Err(BridgeError::MethodNotFound {
                    bridge: "echo".into(),
                    method: name.into(),
                }),
            }
        }
    }

    fn registry() -> BridgeRegistry {
        let mut registry = BridgeRegistry::new();
        registry.register(Arc::new(Echo::new()));
        registry
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = registry();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("echo"));
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.ids(), vec!["echo".to_string()]);
    }

    #[test]
    fn test_call_requires_initialization() {
        let registry = registry();
        let ctx = CallContext::background();
        let err = registry
            .call(&ctx, "echo", "echo", &[ScriptValue::string("hi")])
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotInitialized { .. }));
    }

    #[test]
    fn test_call_validates_before_dispatch() {
        let registry = registry();
        let ctx = CallContext::background();
        registry.initialize_all(&ctx).unwrap();

        // Echo indexes args[0] directly; validation must reject the empty call first.
        let err = registry.call(&ctx, "echo", "echo", &[]).unwrap_err();
        assert!(matches!(err, BridgeError::ArgumentCount { required: 1, got: 0, .. }));

        let out = registry
            .call(&ctx, "echo", "echo", &[ScriptValue::string("hi")])
            .unwrap();
        assert_eq!(out, ScriptValue::string("hi"));
    }

    #[test]
    fn test_unknown_bridge_and_method() {
        let registry = registry();
        let ctx = CallContext::background();
        registry.initialize_all(&ctx).unwrap();

        let err = registry.call(&ctx, "missing", "echo", &[]).unwrap_err();
        assert!(matches!(err, BridgeError::BridgeNotFound { .. }));

        let err = registry.call(&ctx, "echo", "doesNotExist", &[]).unwrap_err();
        assert!(matches!(err, BridgeError::MethodNotFound { .. }));

        assert!(registry.resolve("echo", "doesNotExist").is_err());
    }

    #[test]
    fn test_resolved_method() {
        let registry = registry();
        let ctx = CallContext::background();
        let echo = registry.resolve("echo", "echo").unwrap();
        assert!(echo.call(&ctx, &[ScriptValue::string("x")]).is_err());

        registry.initialize_all(&ctx).unwrap();
        assert_eq!(
            echo.call(&ctx, &[ScriptValue::string("x")]).unwrap(),
            ScriptValue::string("x")
        );

        registry.cleanup_all(&ctx).unwrap();
        assert!(echo.call(&ctx, &[ScriptValue::string("x")]).is_err());
    }

    #[test]
    fn test_describe() {
        let text = registry().describe("echo").unwrap();
        assert!(text.starts_with(&format!("Echo (echo) v{}", env!("CARGO_PKG_VERSION"))));
        assert!(text.contains("memory:echo [read]"));
        assert!(text.contains("echo(text: string): string"));
    }
}
