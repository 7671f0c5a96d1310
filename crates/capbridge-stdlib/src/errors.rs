//! Error utilities bridge (`util_errors`)
//!
//! Gives scripts structured errors they can create, wrap, enrich,
//! categorize and serialize, plus backoff descriptors and aggregators.
//!
//! Handles returned to scripts:
//!
//! | Tag | Payload |
//! |---|---|
//! | `error` | [`ScriptError`] |
//! | `RecoveryStrategy` | [`BackoffStrategy`] |
//! | `ErrorAggregator` | [`ErrorAggregator`] |
//! | `ErrorBuilder` | [`ErrorBuilder`] |

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use capbridge_sdk::{
    Args, Bridge, BridgeError, BridgeEvent, BridgeMetadata, BridgeResult, CallContext, EventSink,
    LifecycleCell, MethodInfo, Permission, PermissionKind, ScriptValue, TracingEventSink,
    TypeMapping,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::marshal::{event_data, native_to_object, object_to_native, NativeMap};

/// Bridge identifier
pub const BRIDGE_ID: &str = "util_errors";

/// Tag of error handles
pub const ERROR_TAG: &str = "error";
/// Tag of backoff strategy handles
pub const STRATEGY_TAG: &str = "RecoveryStrategy";
/// Tag of aggregator handles
pub const AGGREGATOR_TAG: &str = "ErrorAggregator";
/// Tag of builder handles
pub const BUILDER_TAG: &str = "ErrorBuilder";

/// Fallback category name
pub const UNKNOWN_CATEGORY: &str = "unknown";

const DEFAULT_AGGREGATE_MESSAGE: &str = "Multiple errors occurred";

// ============================================================================
// ScriptError
// ============================================================================

/// Structured error created by scripts.
///
/// Serializes to JSON with `message`, `code` (null when absent), `context`
/// and an optional nested `cause`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptError {
    /// Human-readable message
    pub message: String,
    /// Machine-readable code
    #[serde(default)]
    pub code: Option<String>,
    /// Arbitrary key/value context
    #[serde(default)]
    pub context: NativeMap,
    /// Wrapped error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ScriptError>>,
}

impl ScriptError {
    /// Error with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            context: NativeMap::new(),
            cause: None,
        }
    }

    /// Error with a code and message
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::new(message);
        err.code = Some(code.into());
        err
    }

    /// Wrap `cause` under a new message
    pub fn wrap(cause: ScriptError, message: impl Into<String>) -> Self {
        let mut err = Self::new(message);
        err.cause = Some(Box::new(cause));
        err
    }

    /// Copy with extra context entries; existing keys are overwritten
    pub fn with_context(mut self, context: NativeMap) -> Self {
        self.context.extend(context);
        self
    }

    /// Own code, else the nearest code in the cause chain
    pub fn effective_code(&self) -> Option<&str> {
        match (&self.code, &self.cause) {
            (Some(code), _) => Some(code),
            (None, Some(cause)) => cause.effective_code(),
            (None, None) => None,
        }
    }

    /// Context merged over the cause chain; outer entries win
    pub fn full_context(&self) -> NativeMap {
        let mut merged = match &self.cause {
            Some(cause) => cause.full_context(),
            None => NativeMap::new(),
        };
        merged.extend(self.context.clone());
        merged
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

// ============================================================================
// Categorization
// ============================================================================

/// Error category and its recovery flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorCategory {
    /// Category name
    pub name: String,
    /// Human description
    pub description: String,
    /// Worth retrying
    pub retryable: bool,
    /// Should abort the current operation
    pub fatal: bool,
}

impl ErrorCategory {
    fn new(name: &str, description: &str, retryable: bool, fatal: bool) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            retryable,
            fatal,
        }
    }
}

/// The six built-in categories
pub fn default_categories() -> HashMap<String, ErrorCategory> {
    [
        ErrorCategory::new("network", "Network-related errors", true, false),
        ErrorCategory::new("validation", "Validation errors", false, false),
        ErrorCategory::new("authentication", "Authentication errors", false, false),
        ErrorCategory::new("authorization", "Authorization errors", false, false),
        ErrorCategory::new("ratelimit", "Rate limiting errors", true, false),
        ErrorCategory::new("system", "System errors", false, true),
    ]
    .into_iter()
    .map(|c| (c.name.clone(), c))
    .collect()
}

const CODE_TABLE: &[(&str, &str)] = &[
    ("NETWORK_ERROR", "network"),
    ("CONNECTION_FAILED", "network"),
    ("TIMEOUT", "network"),
    ("VALIDATION_ERROR", "validation"),
    ("INVALID_INPUT", "validation"),
    ("UNAUTHORIZED", "authentication"),
    ("AUTH_FAILED", "authentication"),
    ("FORBIDDEN", "authorization"),
    ("ACCESS_DENIED", "authorization"),
    ("RATE_LIMITED", "ratelimit"),
    ("TOO_MANY_REQUESTS", "ratelimit"),
    ("INTERNAL_ERROR", "system"),
    ("SYSTEM_ERROR", "system"),
];

// Priority order: the first category with a matching keyword wins.
const KEYWORDS: &[(&str, &[&str])] = &[
    ("network", &["network", "connection", "timeout"]),
    ("validation", &["invalid", "validation", "required"]),
    ("authentication", &["unauthorized", "authentication"]),
    ("authorization", &["forbidden", "permission", "access denied"]),
    ("ratelimit", &["rate limit", "too many requests"]),
    ("system", &["internal", "system", "panic"]),
];

/// Classify an error into a category name.
///
/// The code table is checked first (exact match on the effective code);
/// otherwise the full message chain is searched case-insensitively for
/// keywords in priority order. No match yields `"unknown"`.
pub fn categorize(err: &ScriptError) -> &'static str {
    if let Some(code) = err.effective_code() {
        if let Some((_, category)) = CODE_TABLE.iter().find(|(c, _)| *c == code) {
            return *category;
        }
    }
    categorize_message(&err.to_string())
}

/// Keyword-only classification of a message
pub fn categorize_message(message: &str) -> &'static str {
    let lowered = message.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lowered.contains(w)))
        .map(|(category, _)| *category)
        .unwrap_or(UNKNOWN_CATEGORY)
}

// ============================================================================
// Backoff strategies
// ============================================================================

/// Retry schedule descriptor.
///
/// Pure data: it computes delays but never sleeps or retries. The caller
/// owns the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `min(base * 2^attempt, max)`
    Exponential {
        /// First delay in milliseconds
        base_delay_ms: u64,
        /// Upper bound in milliseconds
        max_delay_ms: u64,
        /// Number of retries allowed
        max_retries: u32,
    },
    /// `delay * (attempt + 1)`
    Linear {
        /// Delay step in milliseconds
        delay_ms: u64,
        /// Number of retries allowed
        max_retries: u32,
    },
}

impl BackoffStrategy {
    /// Strategy name
    pub fn name(&self) -> &'static str {
        match self {
            BackoffStrategy::Exponential { .. } => "exponential_backoff",
            BackoffStrategy::Linear { .. } => "linear_backoff",
        }
    }

    /// Number of retries allowed
    pub fn max_retries(&self) -> u32 {
        match self {
            BackoffStrategy::Exponential { max_retries, .. }
            | BackoffStrategy::Linear { max_retries, .. } => *max_retries,
        }
    }

    /// Delay before retry number `attempt` (zero-based), or `None` once
    /// retries are exhausted
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries() {
            return None;
        }
        let ms = match *self {
            BackoffStrategy::Exponential {
                base_delay_ms,
                max_delay_ms,
                ..
            } => {
                let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                base_delay_ms.saturating_mul(factor).min(max_delay_ms)
            }
            BackoffStrategy::Linear { delay_ms, .. } => {
                delay_ms.saturating_mul(u64::from(attempt) + 1)
            }
        };
        Some(Duration::from_millis(ms))
    }

    fn describe(&self) -> ScriptValue {
        let (base, max) = match *self {
            BackoffStrategy::Exponential {
                base_delay_ms,
                max_delay_ms,
                ..
            } => (base_delay_ms, max_delay_ms),
            BackoffStrategy::Linear {
                delay_ms,
                max_retries,
            } => (delay_ms, delay_ms.saturating_mul(u64::from(max_retries))),
        };
        ScriptValue::from_pairs([
            ("name", ScriptValue::string(self.name())),
            ("baseDelay", ScriptValue::number(base as f64)),
            ("maxDelay", ScriptValue::number(max as f64)),
            ("maxRetries", ScriptValue::number(self.max_retries())),
        ])
    }
}

// ============================================================================
// Aggregator and builder
// ============================================================================

/// Collects errors across calls. Shared by reference through its handle.
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    errors: Mutex<Vec<ScriptError>>,
}

impl ErrorAggregator {
    /// Empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error
    pub fn add(&self, err: ScriptError) {
        self.errors.lock().push(err);
    }

    /// Number of collected errors
    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    /// Check if nothing was collected
    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }

    /// Combine the collected errors, if any
    pub fn to_error(&self, message: &str) -> Option<ScriptError> {
        aggregate(&self.errors.lock(), message)
    }
}

/// Combine errors into one whose context lists the member messages
pub fn aggregate(errors: &[ScriptError], message: &str) -> Option<ScriptError> {
    if errors.is_empty() {
        return None;
    }
    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    let combined = ScriptError::new(messages.join("; "));
    let mut context = NativeMap::new();
    context.insert("errors".to_string(), json!(messages));
    context.insert("count".to_string(), json!(errors.len()));
    Some(ScriptError::wrap(combined, message).with_context(context))
}

/// Immutable error builder; every step yields a new builder
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorBuilder {
    message: String,
    code: Option<String>,
    context: NativeMap,
}

impl ErrorBuilder {
    /// Build the error
    pub fn build(&self) -> ScriptError {
        ScriptError {
            message: self.message.clone(),
            code: self.code.clone(),
            context: self.context.clone(),
            cause: None,
        }
    }
}

// ============================================================================
// Bridge
// ============================================================================

struct ErrorsState {
    categories: HashMap<String, ErrorCategory>,
}

/// The `util_errors` bridge
pub struct ErrorsBridge {
    state: LifecycleCell<ErrorsState>,
    events: Arc<dyn EventSink>,
}

impl ErrorsBridge {
    /// Bridge emitting events to `tracing`
    pub fn new() -> Self {
        Self::with_event_sink(Arc::new(TracingEventSink))
    }

    /// Bridge emitting events to `sink`
    pub fn with_event_sink(sink: Arc<dyn EventSink>) -> Self {
        Self {
            state: LifecycleCell::new(BRIDGE_ID),
            events: sink,
        }
    }

    fn emit(&self, name: &str, data: NativeMap) {
        self.events.emit(BridgeEvent::new(BRIDGE_ID, name, data));
    }

    fn category(&self, name: &str) -> BridgeResult<Option<ErrorCategory>> {
        self.state.read(|s| s.categories.get(name).cloned())
    }

    // ------------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------------

    /// errors.createError(message, context?): error
    fn create_error(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let message = args.string(0, "message")?;
        let context = opt_context(args, 1)?;
        Ok(error_value(ScriptError::new(message).with_context(context)))
    }

    /// errors.wrapError(error, message, context?): error
    fn wrap_error(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let cause = args.downcast::<ScriptError>(0, "error", ERROR_TAG)?;
        let message = args.string(1, "message")?;
        let context = opt_context(args, 2)?;
        let wrapped = ScriptError::wrap((*cause).clone(), message).with_context(context);
        Ok(error_value(wrapped))
    }

    /// errors.createErrorWithCode(code, message, context?): error
    fn create_error_with_code(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let code = args.string(0, "code")?;
        let message = args.string(1, "message")?;
        let context = opt_context(args, 2)?;
        Ok(error_value(
            ScriptError::with_code(code, message).with_context(context),
        ))
    }

    // ------------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------------

    /// errors.errorToJSON(error): string
    fn error_to_json(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let err = args.downcast::<ScriptError>(0, "error", ERROR_TAG)?;
        let json = serde_json::to_string(err.as_ref())
            .map_err(|e| BridgeError::upstream("errorToJSON", e))?;
        Ok(ScriptValue::string(json))
    }

    /// errors.errorFromJSON(json): error
    fn error_from_json(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let json = args.string(0, "json")?;
        let err: ScriptError =
            serde_json::from_str(json).map_err(|e| BridgeError::upstream("errorFromJSON", e))?;
        Ok(error_value(err))
    }

    // ------------------------------------------------------------------------
    // Recovery strategies
    // ------------------------------------------------------------------------

    /// errors.createExponentialBackoffStrategy(baseDelayMs, maxDelayMs, maxRetries): RecoveryStrategy
    fn create_exponential_backoff(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let base_delay_ms = args.integer(0, "baseDelay")?;
        let max_delay_ms = args.integer(1, "maxDelay")?;
        let max_retries = retries(args, 2)?;
        if max_delay_ms < base_delay_ms {
            return Err(args.invalid(
                1,
                "maxDelay",
                &format!(">= baseDelay ({})", base_delay_ms),
                max_delay_ms.to_string(),
            ));
        }
        Ok(ScriptValue::custom(
            STRATEGY_TAG,
            BackoffStrategy::Exponential {
                base_delay_ms,
                max_delay_ms,
                max_retries,
            },
        ))
    }

    /// errors.createLinearBackoffStrategy(delayMs, maxRetries): RecoveryStrategy
    fn create_linear_backoff(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let delay_ms = args.integer(0, "delay")?;
        let max_retries = retries(args, 1)?;
        Ok(ScriptValue::custom(
            STRATEGY_TAG,
            BackoffStrategy::Linear {
                delay_ms,
                max_retries,
            },
        ))
    }

    /// errors.describeStrategy(strategy): object
    fn describe_strategy(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let strategy = args.downcast::<BackoffStrategy>(0, "strategy", STRATEGY_TAG)?;
        Ok(strategy.describe())
    }

    /// errors.getRetryDelay(strategy, attempt): number | nil
    fn get_retry_delay(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let strategy = args.downcast::<BackoffStrategy>(0, "strategy", STRATEGY_TAG)?;
        let attempt = u32::try_from(args.integer(1, "attempt")?).unwrap_or(u32::MAX);
        Ok(strategy
            .delay_for_attempt(attempt)
            .map(|d| ScriptValue::number(d.as_millis() as f64))
            .unwrap_or_default())
    }

    // ------------------------------------------------------------------------
    // Categories
    // ------------------------------------------------------------------------

    /// errors.categorizeError(error): string
    fn categorize_error(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let err = args.downcast::<ScriptError>(0, "error", ERROR_TAG)?;
        Ok(ScriptValue::string(categorize(&err)))
    }

    /// errors.registerErrorCategory(name, {description, retryable, fatal}): nil
    fn register_error_category(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let name = args.string(0, "name")?;
        if name.is_empty() {
            return Err(args.invalid(0, "name", "non-empty string", "empty string"));
        }
        let config = args.object(1, "config")?;
        let category = ErrorCategory {
            name: name.to_string(),
            description: crate::field_str(config, "description").unwrap_or_default().to_string(),
            retryable: crate::field_bool(config, "retryable").unwrap_or(false),
            fatal: crate::field_bool(config, "fatal").unwrap_or(false),
        };
        self.state.write(|s| {
            s.categories.insert(category.name.clone(), category);
        })?;
        Ok(ScriptValue::Nil)
    }

    /// errors.getErrorCategories(): object
    fn get_error_categories(&self) -> BridgeResult<ScriptValue> {
        let categories = self.state.read(|s| s.categories.clone())?;
        Ok(ScriptValue::Object(
            categories
                .into_iter()
                .map(|(name, c)| (name, category_value(&c)))
                .collect(),
        ))
    }

    /// errors.isRetryableError(error): bool
    fn is_retryable_error(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let err = args.downcast::<ScriptError>(0, "error", ERROR_TAG)?;
        let category = self.category(categorize(&err))?;
        Ok(ScriptValue::bool(category.map_or(false, |c| c.retryable)))
    }

    /// errors.isFatalError(error): bool
    fn is_fatal_error(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let err = args.downcast::<ScriptError>(0, "error", ERROR_TAG)?;
        let category = self.category(categorize(&err))?;
        Ok(ScriptValue::bool(category.map_or(false, |c| c.fatal)))
    }

    // ------------------------------------------------------------------------
    // Aggregation
    // ------------------------------------------------------------------------

    /// errors.createErrorAggregator(): ErrorAggregator
    fn create_error_aggregator(&self) -> BridgeResult<ScriptValue> {
        Ok(ScriptValue::custom(AGGREGATOR_TAG, ErrorAggregator::new()))
    }

    /// errors.addError(aggregator, error): nil
    fn add_error(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let aggregator = args.downcast::<ErrorAggregator>(0, "aggregator", AGGREGATOR_TAG)?;
        let err = args.downcast::<ScriptError>(1, "error", ERROR_TAG)?;
        aggregator.add((*err).clone());
        Ok(ScriptValue::Nil)
    }

    /// errors.aggregatorToError(aggregator, message?): error | nil
    fn aggregator_to_error(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let aggregator = args.downcast::<ErrorAggregator>(0, "aggregator", AGGREGATOR_TAG)?;
        let message = args.opt_string(1, "message")?.unwrap_or(DEFAULT_AGGREGATE_MESSAGE);
        Ok(aggregator.to_error(message).map(error_value).unwrap_or_default())
    }

    /// errors.aggregateErrors(errors, message?): error | nil
    fn aggregate_errors(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let items = args.array(0, "errors")?;
        let mut errors = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let err = item
                .as_handle()
                .and_then(|h| h.downcast_ref::<ScriptError>())
                .map_err(|_| {
                    args.invalid(0, "errors", "array of error", format!("element {} is {}", i, item.type_name()))
                })?;
            errors.push(err.clone());
        }
        let message = args.opt_string(1, "message")?.unwrap_or(DEFAULT_AGGREGATE_MESSAGE);
        Ok(aggregate(&errors, message).map(error_value).unwrap_or_default())
    }

    // ------------------------------------------------------------------------
    // Context and events
    // ------------------------------------------------------------------------

    /// errors.emitErrorEvent(error, context?): nil
    fn emit_error_event(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let err = args.downcast::<ScriptError>(0, "error", ERROR_TAG)?;
        let mut data = match args.opt_object(1, "context")? {
            Some(fields) => crate::marshal::object_to_native_lossy(fields),
            None => NativeMap::new(),
        };
        data.extend(event_data([
            ("error", json!(err.to_string())),
            ("code", json!(err.effective_code())),
            ("category", json!(categorize(&err))),
            ("metadata", serde_json::Value::Object(err.full_context())),
        ]));
        self.emit("error.occurred", data);
        Ok(ScriptValue::Nil)
    }

    /// errors.enrichError(error, context): error
    fn enrich_error(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let err = args.downcast::<ScriptError>(0, "error", ERROR_TAG)?;
        let fields = args.object(1, "context")?;
        let context = object_to_native(args, 1, "context", fields)?;
        Ok(error_value((*err).clone().with_context(context)))
    }

    /// errors.getErrorContext(error): object
    fn get_error_context(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let err = args.downcast::<ScriptError>(0, "error", ERROR_TAG)?;
        Ok(native_to_object(&err.full_context()))
    }

    /// errors.getErrorInfo(error): {message, code, category, retryable, fatal}
    fn get_error_info(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let err = args.downcast::<ScriptError>(0, "error", ERROR_TAG)?;
        let category_name = categorize(&err);
        let category = self.category(category_name)?;
        Ok(ScriptValue::from_pairs([
            ("message", ScriptValue::string(err.to_string())),
            ("code", err.effective_code().map(ScriptValue::string).unwrap_or_default()),
            ("category", ScriptValue::string(category_name)),
            ("retryable", ScriptValue::bool(category.as_ref().map_or(false, |c| c.retryable))),
            ("fatal", ScriptValue::bool(category.as_ref().map_or(false, |c| c.fatal))),
        ]))
    }

    // ------------------------------------------------------------------------
    // Builder
    // ------------------------------------------------------------------------

    /// errors.createErrorBuilder(): ErrorBuilder
    fn create_error_builder(&self) -> BridgeResult<ScriptValue> {
        Ok(ScriptValue::custom(BUILDER_TAG, ErrorBuilder::default()))
    }

    /// errors.builderWithMessage(builder, message): ErrorBuilder
    fn builder_with_message(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let builder = args.downcast::<ErrorBuilder>(0, "builder", BUILDER_TAG)?;
        let message = args.string(1, "message")?;
        let mut next = (*builder).clone();
        next.message = message.to_string();
        Ok(ScriptValue::custom(BUILDER_TAG, next))
    }

    /// errors.builderWithCode(builder, code): ErrorBuilder
    fn builder_with_code(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let builder = args.downcast::<ErrorBuilder>(0, "builder", BUILDER_TAG)?;
        let code = args.string(1, "code")?;
        let mut next = (*builder).clone();
        next.code = Some(code.to_string());
        Ok(ScriptValue::custom(BUILDER_TAG, next))
    }

    /// errors.builderWithContext(builder, key, value): ErrorBuilder
    fn builder_with_context(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let builder = args.downcast::<ErrorBuilder>(0, "builder", BUILDER_TAG)?;
        let key = args.string(1, "key")?;
        let value = args
            .any(2, "value")?
            .to_native()
            .map_err(|e| args.invalid(2, "value", "plain data", e.to_string()))?;
        let mut next = (*builder).clone();
        next.context.insert(key.to_string(), value);
        Ok(ScriptValue::custom(BUILDER_TAG, next))
    }

    /// errors.buildError(builder): error
    fn build_error(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let builder = args.downcast::<ErrorBuilder>(0, "builder", BUILDER_TAG)?;
        Ok(error_value(builder.build()))
    }
}

impl Default for ErrorsBridge {
    fn default() -> Self {
        Self::new()
    }
}

fn error_value(err: ScriptError) -> ScriptValue {
    ScriptValue::custom(ERROR_TAG, err)
}

fn category_value(c: &ErrorCategory) -> ScriptValue {
    ScriptValue::from_pairs([
        ("name", ScriptValue::string(&c.name)),
        ("description", ScriptValue::string(&c.description)),
        ("retryable", ScriptValue::bool(c.retryable)),
        ("fatal", ScriptValue::bool(c.fatal)),
    ])
}

fn opt_context(args: &Args<'_>, index: usize) -> BridgeResult<NativeMap> {
    match args.opt_object(index, "context")? {
        Some(fields) => object_to_native(args, index, "context", fields),
        None => Ok(NativeMap::new()),
    }
}

fn retries(args: &Args<'_>, index: usize) -> BridgeResult<u32> {
    let n = args.integer(index, "maxRetries")?;
    u32::try_from(n).map_err(|_| args.invalid(index, "maxRetries", "retry count", n.to_string()))
}

impl Bridge for ErrorsBridge {
    fn id(&self) -> &str {
        BRIDGE_ID
    }

    fn metadata(&self) -> BridgeMetadata {
        BridgeMetadata::new(
            "Error Utilities",
            "Structured errors, categorization, recovery strategies and aggregation",
        )
    }

    fn initialize(&self, _ctx: &CallContext) -> BridgeResult<()> {
        self.state.initialize_with(|| {
            Ok(ErrorsState {
                categories: default_categories(),
            })
        })?;
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
            MethodInfo::new("createError", "Create a new error")
                .param("message", "string", "Error message")
                .optional("context", "object", "Context map")
                .returns(ERROR_TAG)
                .example("createError(\"file not found\", {path: \"/tmp/x\"})"),
            MethodInfo::new("wrapError", "Wrap an error with an outer message")
                .param("error", ERROR_TAG, "Error to wrap")
                .param("message", "string", "Outer message")
                .optional("context", "object", "Context map")
                .returns(ERROR_TAG),
            MethodInfo::new("createErrorWithCode", "Create an error with a machine-readable code")
                .param("code", "string", "Error code")
                .param("message", "string", "Error message")
                .optional("context", "object", "Context map")
                .returns(ERROR_TAG),
            MethodInfo::new("errorToJSON", "Serialize an error to JSON")
                .param("error", ERROR_TAG, "Error")
                .returns("string"),
            MethodInfo::new("errorFromJSON", "Rebuild an error from JSON")
                .param("json", "string", "Serialized error")
                .returns(ERROR_TAG),
            MethodInfo::new("createExponentialBackoffStrategy", "Exponential backoff descriptor")
                .param("baseDelay", "number", "First delay in ms")
                .param("maxDelay", "number", "Maximum delay in ms")
                .param("maxRetries", "number", "Retries allowed")
                .returns(STRATEGY_TAG),
            MethodInfo::new("createLinearBackoffStrategy", "Linear backoff descriptor")
                .param("delay", "number", "Delay step in ms")
                .param("maxRetries", "number", "Retries allowed")
                .returns(STRATEGY_TAG),
            MethodInfo::new("describeStrategy", "Describe a recovery strategy")
                .param("strategy", STRATEGY_TAG, "Strategy")
                .returns("object"),
            MethodInfo::new("getRetryDelay", "Delay before a retry attempt, nil when exhausted")
                .param("strategy", STRATEGY_TAG, "Strategy")
                .param("attempt", "number", "Zero-based attempt")
                .returns("number"),
            MethodInfo::new("categorizeError", "Classify an error")
                .param("error", ERROR_TAG, "Error")
                .returns("string"),
            MethodInfo::new("registerErrorCategory", "Register or replace a category")
                .param("name", "string", "Category name")
                .param("config", "object", "{description, retryable, fatal}"),
            MethodInfo::new("getErrorCategories", "List categories").returns("object"),
            MethodInfo::new("createErrorAggregator", "Create an error aggregator")
                .returns(AGGREGATOR_TAG),
            MethodInfo::new("addError", "Add an error to an aggregator")
                .param("aggregator", AGGREGATOR_TAG, "Aggregator")
                .param("error", ERROR_TAG, "Error"),
            MethodInfo::new("aggregatorToError", "Combine an aggregator's errors")
                .param("aggregator", AGGREGATOR_TAG, "Aggregator")
                .optional_with_default(
                    "message",
                    "string",
                    ScriptValue::string(DEFAULT_AGGREGATE_MESSAGE),
                    "Outer message",
                )
                .returns(ERROR_TAG),
            MethodInfo::new("aggregateErrors", "Combine several errors into one")
                .param("errors", "array", "Errors")
                .optional_with_default(
                    "message",
                    "string",
                    ScriptValue::string(DEFAULT_AGGREGATE_MESSAGE),
                    "Outer message",
                )
                .returns(ERROR_TAG),
            MethodInfo::new("emitErrorEvent", "Emit an error.occurred event")
                .param("error", ERROR_TAG, "Error")
                .optional("context", "object", "Extra event data"),
            MethodInfo::new("isRetryableError", "Whether the error's category is retryable")
                .param("error", ERROR_TAG, "Error")
                .returns("bool"),
            MethodInfo::new("isFatalError", "Whether the error's category is fatal")
                .param("error", ERROR_TAG, "Error")
                .returns("bool"),
            MethodInfo::new("enrichError", "Copy an error with extra context")
                .param("error", ERROR_TAG, "Error")
                .param("context", "object", "Context map")
                .returns(ERROR_TAG),
            MethodInfo::new("getErrorContext", "Context of an error and its causes")
                .param("error", ERROR_TAG, "Error")
                .returns("object"),
            MethodInfo::new("getErrorInfo", "Message, code and category flags")
                .param("error", ERROR_TAG, "Error")
                .returns("object"),
            MethodInfo::new("createErrorBuilder", "Create an empty error builder")
                .returns(BUILDER_TAG),
            MethodInfo::new("builderWithMessage", "Builder with a message")
                .param("builder", BUILDER_TAG, "Builder")
                .param("message", "string", "Message")
                .returns(BUILDER_TAG),
            MethodInfo::new("builderWithCode", "Builder with a code")
                .param("builder", BUILDER_TAG, "Builder")
                .param("code", "string", "Code")
                .returns(BUILDER_TAG),
            MethodInfo::new("builderWithContext", "Builder with a context entry")
                .param("builder", BUILDER_TAG, "Builder")
                .param("key", "string", "Context key")
                .param("value", "any", "Context value")
                .returns(BUILDER_TAG),
            MethodInfo::new("buildError", "Build the error")
                .param("builder", BUILDER_TAG, "Builder")
                .returns(ERROR_TAG),
        ]
    }

    fn required_permissions(&self) -> Vec<Permission> {
        vec![
            Permission::new(
                PermissionKind::Memory,
                "errors",
                &["read", "write"],
                "Error category registry",
            ),
            Permission::new(
                PermissionKind::Storage,
                "errors",
                &["emit", "subscribe"],
                "Error event emission",
            ),
        ]
    }

    fn type_mappings(&self) -> HashMap<String, TypeMapping> {
        let mut m = HashMap::new();
        m.insert(
            "error".to_string(),
            TypeMapping::new("ScriptError", ERROR_TAG, "Structured error"),
        );
        m.insert(
            "RecoveryStrategy".to_string(),
            TypeMapping::new("BackoffStrategy", STRATEGY_TAG, "Backoff descriptor"),
        );
        m.insert(
            "ErrorAggregator".to_string(),
            TypeMapping::new("ErrorAggregator", AGGREGATOR_TAG, "Error collector"),
        );
        m.insert(
            "ErrorBuilder".to_string(),
            TypeMapping::new("ErrorBuilder", BUILDER_TAG, "Immutable error builder"),
        );
        m
    }

    fn execute_method(
        &self,
        _ctx: &CallContext,
        name: &str,
        args: &[ScriptValue],
    ) -> BridgeResult<ScriptValue> {
        self.state.ensure_initialized()?;
        let args = Args::new(name, args);

        match name {
            "createError" => self.create_error(&args),
            "wrapError" => self.wrap_error(&args),
            "createErrorWithCode" => self.create_error_with_code(&args),
            "errorToJSON" => self.error_to_json(&args),
            "errorFromJSON" => self.error_from_json(&args),
            "createExponentialBackoffStrategy" => self.create_exponential_backoff(&args),
            "createLinearBackoffStrategy" => self.create_linear_backoff(&args),
            "describeStrategy" => self.describe_strategy(&args),
            "getRetryDelay" => self.get_retry_delay(&args),
            "categorizeError" => self.categorize_error(&args),
            "registerErrorCategory" => self.register_error_category(&args),
            "getErrorCategories" => self.get_error_categories(),
            "isRetryableError" => self.is_retryable_error(&args),
            "isFatalError" => self.is_fatal_error(&args),
            "createErrorAggregator" => self.create_error_aggregator(),
            "addError" => self.add_error(&args),
            "aggregatorToError" => self.aggregator_to_error(&args),
            "aggregateErrors" => self.aggregate_errors(&args),
            "emitErrorEvent" => self.emit_error_event(&args),
            "enrichError" => self.enrich_error(&args),
            "getErrorContext" => self.get_error_context(&args),
            "getErrorInfo" => self.get_error_info(&args),
            "createErrorBuilder" => self.create_error_builder(),
            "builderWithMessage" => self.builder_with_message(&args),
            "builderWithCode" => self.builder_with_code(&args),
            "builderWithContext" => self.builder_with_context(&args),
            "buildError" => self.build_error(&args),
            _ => Err(BridgeError::MethodNotFound {
                bridge: BRIDGE_ID.to_string(),
                method: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_by_keyword() {
        assert_eq!(categorize(&ScriptError::new("connection timeout")), "network");
        assert_eq!(categorize(&ScriptError::new("rate limit exceeded")), "ratelimit");
        assert_eq!(categorize(&ScriptError::new("nonsense xyz")), "unknown");
        assert_eq!(categorize(&ScriptError::new("Access Denied for user")), "authorization");
        assert_eq!(categorize(&ScriptError::new("INTERNAL failure")), "system");
    }

    #[test]
    fn test_code_wins_over_message() {
        let err = ScriptError::with_code("UNAUTHORIZED", "connection timeout");
        assert_eq!(categorize(&err), "authentication");

        let err = ScriptError::with_code("SOMETHING_ELSE", "too many requests");
        assert_eq!(categorize(&err), "ratelimit");
    }

    #[test]
    fn test_keyword_priority_order() {
        // Both "invalid" (validation) and "timeout" (network) match; network comes first.
        assert_eq!(categorize_message("invalid timeout value"), "network");
    }

    #[test]
    fn test_wrapped_error_inherits_code_and_keywords() {
        let inner = ScriptError::with_code("RATE_LIMITED", "slow down");
        let outer = ScriptError::wrap(inner, "request failed");
        assert_eq!(outer.effective_code(), Some("RATE_LIMITED"));
        assert_eq!(categorize(&outer), "ratelimit");

        let outer = ScriptError::wrap(ScriptError::new("network unreachable"), "fetch failed");
        assert_eq!(outer.to_string(), "fetch failed: network unreachable");
        assert_eq!(categorize(&outer), "network");
    }

    #[test]
    fn test_json_shape() {
        let mut ctx = NativeMap::new();
        ctx.insert("path".into(), json!("/tmp"));
        let err = ScriptError::with_code("E1", "boom").with_context(ctx);
        let value: serde_json::Value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["message"], json!("boom"));
        assert_eq!(value["code"], json!("E1"));
        assert_eq!(value["context"]["path"], json!("/tmp"));

        let plain = serde_json::to_value(ScriptError::new("x")).unwrap();
        assert!(plain.get("code").is_some());
        assert!(plain.get("context").is_some());
    }

    #[test]
    fn test_json_round_trip_with_cause() {
        let err = ScriptError::wrap(ScriptError::with_code("TIMEOUT", "slow"), "outer");
        let json = serde_json::to_string(&err).unwrap();
        let back: ScriptError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_minimal_json_is_accepted() {
        let err: ScriptError = serde_json::from_str(r#"{"message":"m"}"#).unwrap();
        assert_eq!(err, ScriptError::new("m"));
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let s = BackoffStrategy::Exponential {
            base_delay_ms: 100,
            max_delay_ms: 1000,
            max_retries: 5,
        };
        let delays: Vec<_> = (0..6).map(|a| s.delay_for_attempt(a)).collect();
        assert_eq!(delays[0], Some(Duration::from_millis(100)));
        assert_eq!(delays[1], Some(Duration::from_millis(200)));
        assert_eq!(delays[3], Some(Duration::from_millis(800)));
        assert_eq!(delays[4], Some(Duration::from_millis(1000)));
        assert_eq!(delays[5], None);
    }

    #[test]
    fn test_exponential_backoff_saturates() {
        let s = BackoffStrategy::Exponential {
            base_delay_ms: u64::MAX / 2,
            max_delay_ms: u64::MAX,
            max_retries: 200,
        };
        assert_eq!(s.delay_for_attempt(100), Some(Duration::from_millis(u64::MAX)));
    }

    #[test]
    fn test_linear_backoff_delays() {
        let s = BackoffStrategy::Linear {
            delay_ms: 50,
            max_retries: 3,
        };
        assert_eq!(s.delay_for_attempt(0), Some(Duration::from_millis(50)));
        assert_eq!(s.delay_for_attempt(2), Some(Duration::from_millis(150)));
        assert_eq!(s.delay_for_attempt(3), None);
        assert_eq!(s.name(), "linear_backoff");
    }

    #[test]
    fn test_aggregate() {
        assert!(aggregate(&[], "m").is_none());
        let agg = aggregate(
            &[ScriptError::new("a failed"), ScriptError::new("b failed")],
            "batch failed",
        )
        .unwrap();
        assert_eq!(agg.message, "batch failed");
        assert_eq!(agg.context["count"], json!(2));
        assert_eq!(agg.context["errors"], json!(["a failed", "b failed"]));
        assert_eq!(agg.to_string(), "batch failed: a failed; b failed");
    }

    #[test]
    fn test_full_context_outer_wins() {
        let mut inner_ctx = NativeMap::new();
        inner_ctx.insert("a".into(), json!(1));
        inner_ctx.insert("b".into(), json!(1));
        let mut outer_ctx = NativeMap::new();
        outer_ctx.insert("b".into(), json!(2));

        let err = ScriptError::wrap(ScriptError::new("in").with_context(inner_ctx), "out")
            .with_context(outer_ctx);
        let ctx = err.full_context();
        assert_eq!(ctx["a"], json!(1));
        assert_eq!(ctx["b"], json!(2));
    }

    #[test]
    fn test_default_categories() {
        let cats = default_categories();
        assert_eq!(cats.len(), 6);
        assert!(cats["network"].retryable);
        assert!(cats["ratelimit"].retryable);
        assert!(cats["system"].fatal);
        assert!(!cats["validation"].retryable);
    }
}
