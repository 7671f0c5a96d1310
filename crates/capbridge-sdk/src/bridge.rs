//! Bridge trait - the unit of capability
//!
//! A bridge is a named, lifecycle-managed module that maps method names to
//! implementations over `ScriptValue` arguments. Lifecycle:
//!
//! ```text
//! Uninitialized --initialize--> Initialized --cleanup--> Uninitialized
//! ```
//!
//! Both transitions are idempotent and the cycle repeats. Callers serialize
//! lifecycle transitions against method execution.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::context::CallContext;
use crate::error::{BridgeError, BridgeResult};
use crate::method::MethodInfo;
use crate::permission::Permission;
use crate::value::ScriptValue;

// ============================================================================
// Descriptive metadata
// ============================================================================

/// Descriptive metadata returned by `Bridge::metadata`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeMetadata {
    /// Display name
    pub name: String,
    /// Semantic version
    pub version: String,
    /// Human description
    pub description: String,
    /// Other bridges or libraries this one relies on
    pub dependencies: Vec<String>,
    /// Author
    pub author: String,
    /// License identifier
    pub license: String,
}

impl BridgeMetadata {
    /// Metadata with the defaults shared by the bundled bridges
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: description.to_string(),
            dependencies: Vec::new(),
            author: "capbridge".to_string(),
            license: "MIT".to_string(),
        }
    }

    /// Override the version reported by `describe`
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    /// Add a dependency name
    pub fn depends_on(mut self, dependency: &str) -> Self {
        self.dependencies.push(dependency.to_string());
        self
    }
}

/// Logical type exposed by a bridge, for binding generators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMapping {
    /// Host-side type name
    pub native_type: String,
    /// Script-visible type name
    pub script_type: String,
    /// Human description
    pub description: String,
}

impl TypeMapping {
    /// Create a mapping
    pub fn new(native_type: &str, script_type: &str, description: &str) -> Self {
        Self {
            native_type: native_type.to_string(),
            script_type: script_type.to_string(),
            description: description.to_string(),
        }
    }
}

// ============================================================================
// Bridge
// ============================================================================

/// A capability module callable from scripts.
///
/// Implementations are internally thread-safe: concurrent `execute_method`
/// calls on one instance are allowed. State locks are held only around the
/// state access, never across a whole dispatch.
pub trait Bridge: Send + Sync {
    /// Stable, globally unique identifier
    fn id(&self) -> &str;

    /// Descriptive metadata
    fn metadata(&self) -> BridgeMetadata;

    /// Allocate live resources. Idempotent.
    fn initialize(&self, ctx: &CallContext) -> BridgeResult<()>;

    /// Release resources and return to uninitialized. Idempotent.
    fn cleanup(&self, ctx: &CallContext) -> BridgeResult<()>;

    /// Whether `initialize` has run since the last `cleanup`
    fn is_initialized(&self) -> bool;

    /// Method descriptor table
    fn methods(&self) -> Vec<MethodInfo>;

    /// Declared capability requirements
    fn required_permissions(&self) -> Vec<Permission>;

    /// Logical type name -> mapping
    fn type_mappings(&self) -> HashMap<String, TypeMapping> {
        HashMap::new()
    }

    /// Execute `name` with positional `args`.
    ///
    /// Fails with `NotInitialized` before anything else, then
    /// `MethodNotFound` for unknown names.
    fn execute_method(
        &self,
        ctx: &CallContext,
        name: &str,
        args: &[ScriptValue],
    ) -> BridgeResult<ScriptValue>;

    /// Descriptor for `name`, if the bridge declares it
    fn method_info(&self, name: &str) -> Option<MethodInfo> {
        self.methods().into_iter().find(|m| m.name == name)
    }

    /// Check `args` against the descriptor table
    fn validate_method(&self, name: &str, args: &[ScriptValue]) -> BridgeResult<()> {
        match self.method_info(name) {
            Some(info) => info.validate(args),
            None => Err(BridgeError::MethodNotFound {
                bridge: self.id().to_string(),
                method: name.to_string(),
            }),
        }
    }
}

// ============================================================================
// LifecycleCell
// ============================================================================

/// Private bridge state guarded by a reader/writer lock.
///
/// `None` means uninitialized. `read` and `write` hold the lock only for
/// the closure, so callers keep slow work outside of them.
pub struct LifecycleCell<S> {
    bridge: &'static str,
    state: RwLock<Option<S>>,
}

impl<S> LifecycleCell<S> {
    /// Uninitialized cell for bridge `bridge`
    pub fn new(bridge: &'static str) -> Self {
        Self {
            bridge,
            state: RwLock::new(None),
        }
    }

    /// Build the state with `init` unless already initialized.
    ///
    /// Returns `true` when the state was created by this call.
    pub fn initialize_with(&self, init: impl FnOnce() -> BridgeResult<S>) -> BridgeResult<bool> {
        let mut guard = self.state.write();
        if guard.is_some() {
            return Ok(false);
        }
        *guard = Some(init()?);
        tracing::debug!(bridge = self.bridge, "bridge initialized");
        Ok(true)
    }

    /// Drop the state. Returns `true` if there was state to drop.
    pub fn reset(&self) -> bool {
        let dropped = self.state.write().take().is_some();
        if dropped {
            tracing::debug!(bridge = self.bridge, "bridge cleaned up");
        }
        dropped
    }

    /// Whether state is present
    pub fn is_initialized(&self) -> bool {
        self.state.read().is_some()
    }

    /// Fail with `NotInitialized` unless state is present
    pub fn ensure_initialized(&self) -> BridgeResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(self.not_initialized())
        }
    }

    /// Run `f` with shared access to the state
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> BridgeResult<R> {
        let guard = self.state.read();
        match guard.as_ref() {
            Some(state) => Ok(f(state)),
            None => Err(self.not_initialized()),
        }
    }

    /// Run `f` with exclusive access to the state
    pub fn write<R>(&self, f: impl FnOnce(&mut S) -> R) -> BridgeResult<R> {
        let mut guard = self.state.write();
        match guard.as_mut() {
            Some(state) => Ok(f(state)),
            None => Err(self.not_initialized()),
        }
    }

    fn not_initialized(&self) -> BridgeError {
        BridgeError::NotInitialized {
            bridge: self.bridge.to_string(),
        }
    }
}
