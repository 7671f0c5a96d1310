//! LLM utilities bridge (`util_llm`)
//!
//! Provider pools, a model catalog, tolerant response parsing, streaming
//! with per-chunk callbacks, and request cost accounting.
//!
//! Providers are host objects implementing [`LlmProvider`]; the host
//! registers them with [`LlmBridge::register_provider`] and scripts reach
//! them through `"Provider"` handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use capbridge_sdk::{
    Args, Bridge, BridgeError, BridgeEvent, BridgeMetadata, BridgeResult, CallContext, EventSink,
    LifecycleCell, MethodInfo, Permission, PermissionKind, ScriptValue, TracingEventSink,
    TypeMapping,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::marshal::{event_data, object_to_native, NativeMap};

/// Bridge identifier
pub const BRIDGE_ID: &str = "util_llm";

/// Tag of single provider handles
pub const PROVIDER_TAG: &str = "Provider";
/// Tag of provider pool handles
pub const POOL_TAG: &str = "ProviderPool";

/// Recovery steps tried after a strict parse fails
pub const MAX_RECOVERY_ATTEMPTS: usize = 3;

/// Largest token count accepted by `trackRequestCost` (2^53)
const MAX_TOKEN_COUNT: f64 = 9_007_199_254_740_992.0;

// ============================================================================
// Providers
// ============================================================================

/// A text generation backend.
///
/// `stream` returns the response as an ordered list of chunks. Network
/// transport is the implementor's concern.
pub trait LlmProvider: Send + Sync {
    /// Provider name, e.g. `openai`
    fn name(&self) -> &str;

    /// Generate a response for `prompt` as ordered chunks
    fn stream(&self, ctx: &CallContext, prompt: &str) -> BridgeResult<Vec<String>>;
}

/// Payload of `Provider` and `ProviderPool` handles
#[derive(Clone)]
pub struct ProviderHandle(pub Arc<dyn LlmProvider>);

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ProviderHandle").field(&self.0.name()).finish()
    }
}

/// Provider selection strategy of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStrategy {
    /// Rotate through providers, one attempt per call
    RoundRobin,
    /// Try providers in order until one succeeds
    Failover,
    /// Try providers by lowest observed latency, untried first
    Fastest,
}

impl PoolStrategy {
    /// Parse a strategy name, case-insensitively
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "roundrobin" => Some(PoolStrategy::RoundRobin),
            "failover" => Some(PoolStrategy::Failover),
            "fastest" => Some(PoolStrategy::Fastest),
            _ => None,
        }
    }

    /// Strategy name
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStrategy::RoundRobin => "roundrobin",
            PoolStrategy::Failover => "failover",
            PoolStrategy::Fastest => "fastest",
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Latency {
    total: Duration,
    samples: u32,
}

impl Latency {
    fn average(&self) -> Option<Duration> {
        (self.samples > 0).then(|| self.total / self.samples)
    }
}

/// Several providers behind one selection strategy
pub struct ProviderPool {
    name: String,
    providers: Vec<Arc<dyn LlmProvider>>,
    strategy: PoolStrategy,
    cursor: AtomicUsize,
    latencies: Mutex<Vec<Latency>>,
}

impl ProviderPool {
    /// Pool over `providers`; fails when empty
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>, strategy: PoolStrategy) -> BridgeResult<Self> {
        if providers.is_empty() {
            return Err(BridgeError::upstream("createProviderPool", "pool needs at least one provider"));
        }
        let name = format!(
            "pool[{}]({})",
            strategy.as_str(),
            providers.iter().map(|p| p.name()).collect::<Vec<_>>().join(",")
        );
        let latencies = Mutex::new(vec![Latency::default(); providers.len()]);
        Ok(Self {
            name,
            providers,
            strategy,
            cursor: AtomicUsize::new(0),
            latencies,
        })
    }

    /// Selection strategy
    pub fn strategy(&self) -> PoolStrategy {
        self.strategy
    }

    /// Number of providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Always false; pools are never empty
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Average latency observed for provider `index`
    pub fn average_latency(&self, index: usize) -> Option<Duration> {
        self.latencies.lock().get(index).and_then(Latency::average)
    }

    fn attempt_order(&self) -> Vec<usize> {
        let n = self.providers.len();
        match self.strategy {
            PoolStrategy::RoundRobin => vec![self.cursor.fetch_add(1, Ordering::Relaxed) % n],
            PoolStrategy::Failover => (0..n).collect(),
            PoolStrategy::Fastest => {
                let latencies = self.latencies.lock();
                let mut order: Vec<usize> = (0..n).collect();
                // Untried providers (None) sort first; the sort is stable.
                order.sort_by_key(|&i| latencies[i].average());
                order
            }
        }
    }

    fn record(&self, index: usize, elapsed: Duration) {
        if let Some(l) = self.latencies.lock().get_mut(index) {
            l.total += elapsed;
            l.samples += 1;
        }
    }
}

impl LlmProvider for ProviderPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn stream(&self, ctx: &CallContext, prompt: &str) -> BridgeResult<Vec<String>> {
        let mut last_error = None;
        for index in self.attempt_order() {
            ctx.check("provider pool")?;
            let provider = &self.providers[index];
            let started = Instant::now();
            match provider.stream(ctx, prompt) {
                Ok(chunks) => {
                    self.record(index, started.elapsed());
                    return Ok(chunks);
                }
                Err(e) => {
                    tracing::debug!(provider = provider.name(), error = %e, "pool provider failed");
                    last_error = Some(e);
                }
            }
        }
        Err(match last_error {
            Some(e) => BridgeError::upstream("provider pool", e),
            None => BridgeError::upstream("provider pool", "no provider attempted"),
        })
    }
}

// ============================================================================
// Catalog and configuration
// ============================================================================

/// Per-1k-token prices
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// Input price per 1000 tokens
    pub input_per_1k: f64,
    /// Output price per 1000 tokens
    pub output_per_1k: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_per_1k: 0.003,
            output_per_1k: 0.004,
        }
    }
}

/// Capability flags of a provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderCapabilities {
    /// Streams responses
    pub streaming: bool,
    /// Supports tool/function calls
    pub function_calling: bool,
    /// Accepts images
    pub vision: bool,
    /// Produces embeddings
    pub embeddings: bool,
}

/// Operating limits of a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderConstraints {
    /// Maximum output tokens
    pub max_tokens: u64,
    /// Requests per minute
    pub rate_limit: u64,
    /// Context window in tokens
    pub context_window: u64,
}

impl Default for ProviderConstraints {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            rate_limit: 60,
            context_window: 8192,
        }
    }
}

/// Capabilities and constraints of a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Provider name
    pub provider: String,
    /// Capability flags
    #[serde(default)]
    pub capabilities: ProviderCapabilities,
    /// Limits
    #[serde(default)]
    pub constraints: ProviderConstraints,
}

impl ProviderMetadata {
    /// Metadata assumed for a provider nothing was registered for
    pub fn assumed(provider: &str, constraints: ProviderConstraints) -> Self {
        let major = matches!(provider, "openai" | "anthropic");
        Self {
            provider: provider.to_string(),
            capabilities: ProviderCapabilities {
                streaming: true,
                function_calling: major,
                vision: major,
                embeddings: provider == "openai",
            },
            constraints,
        }
    }
}

/// Model capability flags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelCapabilities {
    /// Streams responses
    pub streaming: bool,
    /// Supports tool/function calls
    pub function_calling: bool,
    /// Accepts images
    pub vision: bool,
    /// Has a JSON output mode
    pub json_mode: bool,
}

/// A catalog entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelInfo {
    /// Model id used in requests
    pub id: String,
    /// Display name
    pub name: String,
    /// Owning provider
    pub provider: String,
    /// Free-form description
    pub description: String,
    /// Input price per 1000 tokens
    pub input_cost: f64,
    /// Output price per 1000 tokens
    pub output_cost: f64,
    /// Maximum output tokens
    pub max_tokens: u64,
    /// Context window in tokens
    pub context_window: u64,
    /// Capability flags
    pub capabilities: ModelCapabilities,
}

/// `util_llm` configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Prices for models with no entry of their own
    pub default_pricing: Pricing,
    /// Prices by model id
    pub model_pricing: HashMap<String, Pricing>,
    /// Constraints reported for providers without metadata
    pub default_constraints: ProviderConstraints,
    /// Catalog entries installed at construction
    pub models: Vec<ModelInfo>,
    /// Provider metadata installed at construction
    pub providers: Vec<ProviderMetadata>,
}

#[derive(Default)]
struct Catalog {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    metadata: HashMap<String, ProviderMetadata>,
    models: Vec<ModelInfo>,
}

// ============================================================================
// Cost tracking
// ============================================================================

/// Token counts of one request
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    /// Prompt tokens
    pub input_tokens: u64,
    /// Completion tokens
    pub output_tokens: u64,
    /// Reported total; input + output when not reported
    pub total_tokens: u64,
}

/// Cost of one tracked request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestCost {
    /// Caller-chosen request id
    pub request_id: String,
    /// Provider name
    pub provider: String,
    /// Model id
    pub model: String,
    /// Token counts
    pub usage: Usage,
    /// Input cost
    pub input_cost: f64,
    /// Output cost
    pub output_cost: f64,
    /// Input + output cost
    pub total_cost: f64,
    /// When it was tracked
    pub timestamp: DateTime<Utc>,
}

impl RequestCost {
    /// Price `usage` with `pricing`
    pub fn compute(request_id: &str, provider: &str, model: &str, usage: Usage, pricing: Pricing) -> Self {
        let input_cost = usage.input_tokens as f64 / 1000.0 * pricing.input_per_1k;
        let output_cost = usage.output_tokens as f64 / 1000.0 * pricing.output_per_1k;
        Self {
            request_id: request_id.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            usage,
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
            timestamp: Utc::now(),
        }
    }
}

/// Filter for cost reports; `None` matches everything
#[derive(Debug, Clone, Default)]
pub struct CostFilter {
    /// Only this provider
    pub provider: Option<String>,
    /// Only this model
    pub model: Option<String>,
}

impl CostFilter {
    fn matches(&self, cost: &RequestCost) -> bool {
        self.provider.as_ref().map_or(true, |p| *p == cost.provider)
            && self.model.as_ref().map_or(true, |m| *m == cost.model)
    }
}

/// Tracked request costs and running totals per provider
#[derive(Debug, Default)]
pub struct CostTracker {
    costs: HashMap<String, RequestCost>,
    totals: HashMap<String, f64>,
}

impl CostTracker {
    /// Empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `cost`, replacing an earlier record with the same request id
    pub fn track(&mut self, cost: RequestCost) {
        if let Some(previous) = self.costs.remove(&cost.request_id) {
            if let Some(total) = self.totals.get_mut(&previous.provider) {
                *total -= previous.total_cost;
            }
        }
        *self.totals.entry(cost.provider.clone()).or_insert(0.0) += cost.total_cost;
        self.costs.insert(cost.request_id.clone(), cost);
    }

    /// Running total of `provider`
    pub fn total_for(&self, provider: &str) -> f64 {
        self.totals.get(provider).copied().unwrap_or(0.0)
    }

    /// Number of tracked requests
    pub fn len(&self) -> usize {
        self.costs.len()
    }

    /// Check if nothing was tracked
    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    /// Matching requests, oldest first
    pub fn requests(&self, filter: &CostFilter) -> Vec<&RequestCost> {
        let mut found: Vec<&RequestCost> = self.costs.values().filter(|c| filter.matches(c)).collect();
        found.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        found
    }

    /// Totals, requests and summary restricted to `filter`
    fn report(&self, filter: &CostFilter) -> Value {
        let requests = self.requests(filter);
        let mut per_provider: HashMap<&str, u64> = HashMap::new();
        let mut totals: HashMap<&str, f64> = HashMap::new();
        for cost in &requests {
            *per_provider.entry(cost.provider.as_str()).or_insert(0) += 1;
            *totals.entry(cost.provider.as_str()).or_insert(0.0) += cost.total_cost;
        }
        json!({
            "totalCosts": totals,
            "requests": requests.iter().map(|c| json!({
                "requestID": c.request_id,
                "provider": c.provider,
                "model": c.model,
                "totalCost": c.total_cost,
                "timestamp": c.timestamp.to_rfc3339(),
            })).collect::<Vec<_>>(),
            "summary": {
                "totalRequests": requests.len(),
                "providers": per_provider,
            },
        })
    }
}

// ============================================================================
// Response recovery
// ============================================================================

/// Expected shape of a model response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// JSON with recovery
    Json,
    /// Raw text
    Text,
    /// JSON if it looks like JSON, else text
    Auto,
}

impl ResponseFormat {
    /// Parse a format name; unknown names fall back to auto-detection
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "json" => ResponseFormat::Json,
            "text" => ResponseFormat::Text,
            "" | "auto" => ResponseFormat::Auto,
            other => {
                tracing::debug!(format = other, "unknown response format, auto-detecting");
                ResponseFormat::Auto
            }
        }
    }
}

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").expect("fence regex"))
}

fn trailing_comma_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",(\s*[}\]])").expect("trailing comma regex"))
}

fn extract_fenced(text: &str) -> Option<String> {
    fence_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn slice_outermost(text: &str) -> Option<String> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| text[start..=end].to_string())
}

fn strip_trailing_commas(text: &str) -> String {
    trailing_comma_regex().replace_all(text, "$1").into_owned()
}

fn looks_like_json(text: &str) -> bool {
    let t = text.trim_start();
    t.starts_with('{') || t.starts_with('[') || t.contains("```")
}

/// Parse JSON from model output, repairing common damage.
///
/// After a strict parse fails, up to [`MAX_RECOVERY_ATTEMPTS`] cumulative
/// repairs are tried: take the markdown fence body, slice the outermost
/// object or array, strip trailing commas.
pub fn recover_json(response: &str) -> Result<Value, String> {
    let mut candidate = response.trim().to_string();
    let mut last_error = match serde_json::from_str(&candidate) {
        Ok(v) => return Ok(v),
        Err(e) => e.to_string(),
    };

    let steps: [fn(&str) -> Option<String>; MAX_RECOVERY_ATTEMPTS] = [
        extract_fenced,
        slice_outermost,
        |s| Some(strip_trailing_commas(s)),
    ];
    for (attempt, step) in steps.iter().enumerate() {
        if let Some(next) = step(&candidate) {
            candidate = next;
        }
        match serde_json::from_str(&candidate) {
            Ok(v) => {
                tracing::debug!(attempt = attempt + 1, "recovered JSON response");
                return Ok(v);
            }
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(format!(
        "no valid JSON after {} recovery attempts: {}",
        MAX_RECOVERY_ATTEMPTS, last_error
    ))
}

/// Parse a response per `format` and check it against `schema`
pub fn parse_response(response: &str, format: ResponseFormat, schema: Option<&NativeMap>) -> Result<Value, String> {
    let value = match format {
        ResponseFormat::Text => Value::String(response.to_string()),
        ResponseFormat::Json => recover_json(response)?,
        ResponseFormat::Auto if looks_like_json(response) => recover_json(response)?,
        ResponseFormat::Auto => Value::String(response.to_string()),
    };
    if let Some(schema) = schema {
        check_schema(&value, schema)?;
    }
    Ok(value)
}

fn check_schema(value: &Value, schema: &NativeMap) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        let actual = match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        };
        let ok = actual == expected || (expected == "integer" && value.as_i64().is_some());
        if !ok {
            return Err(format!("expected {}, got {}", expected, actual));
        }
    }
    if let (Some(required), Value::Object(fields)) = (schema.get("required").and_then(Value::as_array), value) {
        let missing: Vec<&str> = required
            .iter()
            .filter_map(Value::as_str)
            .filter(|name| !fields.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing required field(s): {}", missing.join(", ")));
        }
    }
    Ok(())
}

// ============================================================================
// Bridge
// ============================================================================

#[derive(Default)]
struct LlmState {
    costs: CostTracker,
}

/// The `util_llm` bridge
pub struct LlmBridge {
    config: LlmConfig,
    catalog: RwLock<Catalog>,
    state: LifecycleCell<LlmState>,
    events: Arc<dyn EventSink>,
}

impl LlmBridge {
    /// Bridge with default configuration
    pub fn new() -> Self {
        Self::with_config(LlmConfig::default())
    }

    /// Bridge with `config`; its models and provider metadata seed the catalog
    pub fn with_config(config: LlmConfig) -> Self {
        let catalog = Catalog {
            providers: HashMap::new(),
            metadata: config
                .providers
                .iter()
                .map(|m| (m.provider.clone(), m.clone()))
                .collect(),
            models: config.models.clone(),
        };
        Self {
            config,
            catalog: RwLock::new(catalog),
            state: LifecycleCell::new(BRIDGE_ID),
            events: Arc::new(TracingEventSink),
        }
    }

    /// Replace the event sink
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Make `provider` available to `getProvider` under its name
    pub fn register_provider(&self, provider: Arc<dyn LlmProvider>) {
        let name = provider.name().to_string();
        tracing::debug!(provider = %name, "provider registered");
        self.catalog.write().providers.insert(name, provider);
    }

    /// Set the metadata reported by `getProviderCapabilities`
    pub fn register_provider_metadata(&self, metadata: ProviderMetadata) {
        self.catalog
            .write()
            .metadata
            .insert(metadata.provider.clone(), metadata);
    }

    /// Add a catalog entry, replacing one with the same provider and id
    pub fn register_model(&self, model: ModelInfo) {
        let mut catalog = self.catalog.write();
        catalog
            .models
            .retain(|m| !(m.provider == model.provider && m.id == model.id));
        catalog.models.push(model);
    }

    fn emit(&self, name: &str, data: NativeMap) {
        self.events.emit(BridgeEvent::new(BRIDGE_ID, name, data));
    }

    fn pricing_for(&self, model: &str) -> Pricing {
        if let Some(p) = self.config.model_pricing.get(model) {
            return *p;
        }
        self.catalog
            .read()
            .models
            .iter()
            .find(|m| m.id == model && (m.input_cost > 0.0 || m.output_cost > 0.0))
            .map(|m| Pricing {
                input_per_1k: m.input_cost,
                output_per_1k: m.output_cost,
            })
            .unwrap_or(self.config.default_pricing)
    }

    fn provider_arg(args: &Args<'_>, index: usize, name: &str) -> BridgeResult<Arc<dyn LlmProvider>> {
        let handle = args.handle(index, name)?;
        handle
            .downcast_ref::<ProviderHandle>()
            .map(|p| Arc::clone(&p.0))
            .map_err(|_| {
                args.invalid(
                    index,
                    name,
                    "Provider or ProviderPool",
                    format!("custom<{}> holding {}", handle.tag(), handle.payload_type()),
                )
            })
    }

    /// llm.getProvider(name): Provider
    fn get_provider(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let name = args.string(0, "name")?;
        let provider = self.catalog.read().providers.get(name).cloned();
        match provider {
            Some(p) => Ok(ScriptValue::custom(PROVIDER_TAG, ProviderHandle(p))),
            None => Err(args.invalid(0, "name", "registered provider", name)),
        }
    }

    /// llm.createProviderPool(providers, strategy): ProviderPool
    fn create_provider_pool(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let items = args.array(0, "providers")?;
        let strategy_name = args.string(1, "strategy")?;
        let strategy = PoolStrategy::parse(strategy_name)
            .ok_or_else(|| args.invalid(1, "strategy", "roundrobin, failover or fastest", strategy_name))?;
        if items.is_empty() {
            return Err(args.invalid(0, "providers", "non-empty array of Provider", "empty array"));
        }

        let mut providers = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let provider = item
                .as_handle()
                .and_then(|h| h.downcast_ref::<ProviderHandle>())
                .map_err(|_| {
                    args.invalid(0, "providers", "array of Provider", format!("element {} is {}", i, item.type_name()))
                })?;
            providers.push(Arc::clone(&provider.0));
        }
        let pool = ProviderPool::new(providers, strategy)?;
        Ok(ScriptValue::custom(POOL_TAG, ProviderHandle(Arc::new(pool))))
    }

    /// llm.createModelInventory(): {models, providers, count}
    fn create_model_inventory(&self) -> BridgeResult<ScriptValue> {
        let catalog = self.catalog.read();
        let mut providers: Vec<&str> = catalog.models.iter().map(|m| m.provider.as_str()).collect();
        providers.sort_unstable();
        providers.dedup();
        let inventory = json!({
            "models": catalog.models,
            "providers": providers,
            "count": catalog.models.len(),
        });
        Ok(ScriptValue::from_native(&inventory))
    }

    /// llm.createModelConfig(provider, model, options?): object
    fn create_model_config(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let provider = args.string(0, "provider")?;
        let model = args.string(1, "model")?;
        let mut pairs = vec![
            ("provider", ScriptValue::string(provider)),
            ("model", ScriptValue::string(model)),
        ];
        if let Some(options) = args.opt_object(2, "options")? {
            // Lowered to reject handles and functions in options.
            object_to_native(args, 2, "options", options)?;
            pairs.push(("options", ScriptValue::Object(options.clone())));
        }
        Ok(ScriptValue::from_pairs(pairs))
    }

    /// llm.getProviderCapabilities(provider): {provider, capabilities, constraints}
    fn get_provider_capabilities(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let provider = args.string(0, "provider")?;
        let metadata = self
            .catalog
            .read()
            .metadata
            .get(provider)
            .cloned()
            .unwrap_or_else(|| ProviderMetadata::assumed(provider, self.config.default_constraints.clone()));
        let native = serde_json::to_value(&metadata)?;
        Ok(ScriptValue::from_native(&native))
    }

    /// llm.discoverModels(provider): array
    fn discover_models(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let provider = args.string(0, "provider")?;
        let models: Vec<Value> = self
            .catalog
            .read()
            .models
            .iter()
            .filter(|m| m.provider == provider)
            .map(serde_json::to_value)
            .collect::<Result<_, _>>()?;
        Ok(ScriptValue::from_native(&Value::Array(models)))
    }

    /// llm.parseResponseWithRecovery(response, format?, schema?): any
    fn parse_response_with_recovery(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let response = args.string(0, "response")?;
        let format = ResponseFormat::parse(args.opt_string(1, "format")?.unwrap_or_default());
        let schema = match args.opt_object(2, "schema")? {
            Some(fields) => Some(object_to_native(args, 2, "schema", fields)?),
            None => None,
        };
        let value = parse_response(response, format, schema.as_ref())
            .map_err(|msg| BridgeError::upstream("parseResponseWithRecovery", msg))?;
        Ok(ScriptValue::from_native(&value))
    }

    /// llm.streamWithEvents(provider, prompt, handler): {content, tokenCount}
    fn stream_with_events(&self, ctx: &CallContext, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let provider = Self::provider_arg(args, 0, "provider")?;
        let prompt = args.string(1, "prompt")?;
        let handler = args.function(2, "handler")?;

        let chunks = provider.stream(ctx, prompt)?;
        let mut content = String::new();
        for (index, chunk) in chunks.iter().enumerate() {
            ctx.check("streamWithEvents")?;
            self.emit(
                "stream.chunk",
                event_data([("content", json!(chunk)), ("index", json!(index))]),
            );
            let event = ScriptValue::from_pairs([
                ("type", ScriptValue::string("chunk")),
                ("content", ScriptValue::string(chunk.as_str())),
                ("index", ScriptValue::number(index as f64)),
            ]);
            handler
                .call(&[event])
                .map_err(|e| BridgeError::upstream("streamWithEvents", format!("event handler error: {}", e)))?;
            content.push_str(chunk);
        }

        self.emit(
            "stream.complete",
            event_data([
                ("provider", json!(provider.name())),
                ("totalTokens", json!(chunks.len())),
                ("content", json!(content)),
            ]),
        );
        Ok(ScriptValue::from_pairs([
            ("content", ScriptValue::string(content)),
            ("tokenCount", ScriptValue::number(chunks.len() as f64)),
        ]))
    }

    /// llm.trackRequestCost(requestID, provider, model, usage): {requestID, totalCost, breakdown}
    fn track_request_cost(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let request_id = args.string(0, "requestID")?;
        let provider = args.string(1, "provider")?;
        let model = args.string(2, "model")?;
        let fields = args.object(3, "usage")?;

        // Counts must stay exact as script numbers.
        let count = |key: &str| -> BridgeResult<Option<u64>> {
            match crate::field_number(fields, key) {
                None => Ok(None),
                Some(n) if (0.0..=MAX_TOKEN_COUNT).contains(&n) && n.fract() == 0.0 => Ok(Some(n as u64)),
                Some(n) => Err(args.invalid(
                    3,
                    "usage",
                    &format!("{} as an integer in 0..=2^53", key),
                    n.to_string(),
                )),
            }
        };
        let input_tokens = count("inputTokens")?.unwrap_or(0);
        let output_tokens = count("outputTokens")?.unwrap_or(0);
        let total_tokens = match count("totalTokens")? {
            Some(total) => total,
            None => input_tokens.saturating_add(output_tokens),
        };
        let usage = Usage {
            input_tokens,
            output_tokens,
            total_tokens,
        };

        let cost = RequestCost::compute(request_id, provider, model, usage, self.pricing_for(model));
        let result = ScriptValue::from_pairs([
            ("requestID", ScriptValue::string(request_id)),
            ("totalCost", ScriptValue::number(cost.total_cost)),
            (
                "breakdown",
                ScriptValue::from_pairs([
                    ("inputCost", ScriptValue::number(cost.input_cost)),
                    ("outputCost", ScriptValue::number(cost.output_cost)),
                    ("inputTokens", ScriptValue::number(usage.input_tokens as f64)),
                    ("outputTokens", ScriptValue::number(usage.output_tokens as f64)),
                ]),
            ),
        ]);
        let total_cost = cost.total_cost;
        self.state.write(|s| s.costs.track(cost))?;

        self.emit(
            "cost.tracked",
            event_data([
                ("requestID", json!(request_id)),
                ("provider", json!(provider)),
                ("model", json!(model)),
                ("cost", json!(total_cost)),
            ]),
        );
        Ok(result)
    }

    /// llm.getCostReport(filter?): {totalCosts, requests, summary}
    fn get_cost_report(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let filter = match args.opt_object(0, "filter")? {
            Some(fields) => CostFilter {
                provider: crate::field_str(fields, "provider").map(str::to_string),
                model: crate::field_str(fields, "model").map(str::to_string),
            },
            None => CostFilter::default(),
        };
        let report = self.state.read(|s| s.costs.report(&filter))?;
        Ok(ScriptValue::from_native(&report))
    }

    /// llm.createProviderOptions(providerType, config): object
    fn create_provider_options(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let provider_type = args.string(0, "providerType")?;
        let config = args.object(1, "config")?;

        let mut options = vec![("type", ScriptValue::string(provider_type))];
        let mut copy_str = |key: &'static str| {
            if let Some(v) = crate::field_str(config, key) {
                options.push((key, ScriptValue::string(v)));
            }
        };
        copy_str("baseURL");
        copy_str("apiKey");
        match provider_type {
            "openai" => {
                copy_str("organization");
                copy_str("apiVersion");
            }
            "anthropic" => copy_str("anthropicVersion"),
            "gemini" => {
                copy_str("location");
                copy_str("projectID");
            }
            _ => {}
        }
        if let Some(timeout) = crate::field_number(config, "timeout") {
            options.push(("timeout", ScriptValue::number(timeout.trunc())));
        }
        Ok(ScriptValue::from_pairs(options))
    }
}

impl Default for LlmBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge for LlmBridge {
    fn id(&self) -> &str {
        BRIDGE_ID
    }

    fn metadata(&self) -> BridgeMetadata {
        BridgeMetadata::new(
            "LLM Utilities",
            "Provider pools, model discovery, response recovery, streaming and cost tracking",
        )
    }

    fn initialize(&self, _ctx: &CallContext) -> BridgeResult<()> {
        self.state.initialize_with(|| Ok(LlmState::default()))?;
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
            MethodInfo::new("getProvider", "Handle for a registered provider")
                .param("name", "string", "Provider name")
                .returns(PROVIDER_TAG),
            MethodInfo::new("createProviderPool", "Combine providers behind a strategy")
                .param("providers", "array", "Provider handles")
                .param("strategy", "string", "roundrobin, failover or fastest")
                .returns(POOL_TAG)
                .example("createProviderPool([a, b], \"failover\")"),
            MethodInfo::new("createModelInventory", "Snapshot of the model catalog").returns("object"),
            MethodInfo::new("createModelConfig", "Model selection record")
                .param("provider", "string", "Provider name")
                .param("model", "string", "Model id")
                .optional("options", "object", "Model options")
                .returns("object"),
            MethodInfo::new("getProviderCapabilities", "Capabilities and constraints of a provider")
                .param("provider", "string", "Provider name")
                .returns("object"),
            MethodInfo::new("discoverModels", "Catalog entries of a provider")
                .param("provider", "string", "Provider name")
                .returns("array"),
            MethodInfo::new("parseResponseWithRecovery", "Parse model output, repairing common damage")
                .param("response", "string", "Raw response")
                .optional("format", "string", "json, text or auto")
                .optional("schema", "object", "{type?, required?}")
                .returns("any"),
            MethodInfo::new("streamWithEvents", "Stream a response, calling handler per chunk")
                .param("provider", PROVIDER_TAG, "Provider or pool")
                .param("prompt", "string", "Prompt")
                .param("handler", "function", "Called with {type, content, index}")
                .returns("object"),
            MethodInfo::new("trackRequestCost", "Price and record a request")
                .param("requestID", "string", "Request id")
                .param("provider", "string", "Provider name")
                .param("model", "string", "Model id")
                .param("usage", "object", "{inputTokens, outputTokens, totalTokens?}")
                .returns("object"),
            MethodInfo::new("getCostReport", "Tracked costs")
                .optional("filter", "object", "{provider?, model?}")
                .returns("object"),
            MethodInfo::new("createProviderOptions", "Provider-specific option set")
                .param("providerType", "string", "openai, anthropic, gemini, ...")
                .param("config", "object", "Option values")
                .returns("object"),
        ]
    }

    fn required_permissions(&self) -> Vec<Permission> {
        vec![
            Permission::new(PermissionKind::Network, "llm", &["request"], "Provider API calls"),
            Permission::new(
                PermissionKind::Filesystem,
                "cache",
                &["read", "write"],
                "Model catalog cache",
            ),
            Permission::new(PermissionKind::Memory, "metadata", &["read"], "Provider metadata"),
        ]
    }

    fn type_mappings(&self) -> HashMap<String, TypeMapping> {
        let mut m = HashMap::new();
        m.insert(
            "Provider".to_string(),
            TypeMapping::new("ProviderHandle", PROVIDER_TAG, "LLM provider"),
        );
        m.insert(
            "ProviderPool".to_string(),
            TypeMapping::new("ProviderPool", POOL_TAG, "Providers behind a strategy"),
        );
        m.insert(
            "ModelInfo".to_string(),
            TypeMapping::new("ModelInfo", "object", "Model catalog entry"),
        );
        m.insert(
            "ProviderMetadata".to_string(),
            TypeMapping::new("ProviderMetadata", "object", "Provider capabilities"),
        );
        m
    }

    fn execute_method(
        &self,
        ctx: &CallContext,
        name: &str,
        args: &[ScriptValue],
    ) -> BridgeResult<ScriptValue> {
        self.state.ensure_initialized()?;
        let args = Args::new(name, args);

        match name {
            "getProvider" => self.get_provider(&args),
            "createProviderPool" => self.create_provider_pool(&args),
            "createModelInventory" => self.create_model_inventory(),
            "createModelConfig" => self.create_model_config(&args),
            "getProviderCapabilities" => self.get_provider_capabilities(&args),
            "discoverModels" => self.discover_models(&args),
            "parseResponseWithRecovery" => self.parse_response_with_recovery(&args),
            "streamWithEvents" => self.stream_with_events(ctx, &args),
            "trackRequestCost" => self.track_request_cost(&args),
            "getCostReport" => self.get_cost_report(&args),
            "createProviderOptions" => self.create_provider_options(&args),
            _ => Err(BridgeError::MethodNotFound {
                bridge: BRIDGE_ID.to_string(),
                method: name.to_string(),
            }),
        }
    }
}
