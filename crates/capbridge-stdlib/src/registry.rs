//! Installs the bundled bridges into a [`BridgeRegistry`]

use std::sync::Arc;

use capbridge_sdk::{BridgeRegistry, EventSink, TracingEventSink};
use serde::Deserialize;

use crate::auth::{AuthBridge, AuthConfig};
use crate::errors::ErrorsBridge;
use crate::llm::{LlmBridge, LlmConfig};
use crate::logger::{LoggerConfig, SlogBridge};

/// Configuration of the bundled bridges, keyed by bridge id
///
/// ```json
/// { "util_auth": { "default_cache_ttl_secs": 600 }, "slog": { "level": "debug" } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StdlibConfig {
    /// `util_auth` settings
    pub util_auth: AuthConfig,
    /// `util_llm` settings
    pub util_llm: LlmConfig,
    /// `slog` settings
    pub slog: LoggerConfig,
}

/// Register all bundled bridges with default configuration.
///
/// Bridges are registered uninitialized; call
/// [`BridgeRegistry::initialize_all`] before dispatching.
pub fn register_stdlib(registry: &mut BridgeRegistry) {
    register_stdlib_with_config(registry, &StdlibConfig::default());
}

/// Register all bundled bridges using `config`
pub fn register_stdlib_with_config(registry: &mut BridgeRegistry, config: &StdlibConfig) {
    register_with_sink(registry, config, Arc::new(TracingEventSink));
}

/// Register all bundled bridges, routing their events to `sink`
pub fn register_with_sink(
    registry: &mut BridgeRegistry,
    config: &StdlibConfig,
    sink: Arc<dyn EventSink>,
) {
    registry.register(Arc::new(
        AuthBridge::with_config(config.util_auth.clone()).with_event_sink(sink.clone()),
    ));
    registry.register(Arc::new(ErrorsBridge::with_event_sink(sink.clone())));
    registry.register(Arc::new(
        LlmBridge::with_config(config.util_llm.clone()).with_event_sink(sink),
    ));
    registry.register(Arc::new(SlogBridge::with_config(config.slog.clone())));
    tracing::debug!(bridges = registry.len(), "registered bundled bridges");
}
