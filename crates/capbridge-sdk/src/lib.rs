//! capbridge SDK - types and traits for writing capability bridges
//!
//! A bridge exposes host functionality to embedded script runtimes through
//! a uniform, introspectable surface. This crate provides the boundary
//! value type, opaque handles, method descriptors, permission
//! declarations, the `Bridge` trait and a registry that dispatches calls.
//!
//! # Example
//!
//! ```ignore
//! use capbridge_sdk::{BridgeRegistry, CallContext, ScriptValue};
//!
//! let mut registry = BridgeRegistry::new();
//! registry.register(Arc::new(MyBridge::new()));
//!
//! let ctx = CallContext::background();
//! registry.initialize_all(&ctx)?;
//! let out = registry.call(&ctx, "my_bridge", "greet", &[ScriptValue::string("world")])?;
//! ```

#![warn(missing_docs)]

pub mod args;
pub mod bridge;
pub mod context;
pub mod error;
pub mod events;
pub mod method;
pub mod permission;
pub mod registry;
pub mod value;

pub use args::Args;
pub use bridge::{Bridge, BridgeMetadata, LifecycleCell, TypeMapping};
pub use context::{CallContext, CancelHandle};
pub use error::{BridgeError, BridgeResult, ErrorKind};
pub use events::{BridgeEvent, EventSink, MemoryEventSink, TracingEventSink};
pub use method::{MethodInfo, ParameterInfo};
pub use permission::{Permission, PermissionKind};
pub use registry::{describe_bridge, BridgeRegistry, ResolvedMethod};
pub use value::{Handle, ScriptFunction, ScriptValue, ValueType};
