//! Structured logging bridge (`slog`)
//!
//! Gives scripts leveled logging with attributes, LLM and tool-call hook
//! logging whose verbosity follows a hook level, and attribute-scoped
//! logger handles. Records go to a [`LogSink`]; the default sink forwards
//! them to `tracing` under the `capbridge::slog` target.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use capbridge_sdk::{
    Args, Bridge, BridgeError, BridgeMetadata, BridgeResult, CallContext, LifecycleCell,
    MethodInfo, Permission, PermissionKind, ScriptValue, TypeMapping,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::marshal::{object_to_native_lossy, NativeMap};

/// Bridge identifier
pub const BRIDGE_ID: &str = "slog";

/// Tag of scoped logger handles
pub const LOGGER_TAG: &str = "logger";

/// `tracing` target of script log records
pub const LOG_TARGET: &str = "capbridge::slog";

// ============================================================================
// Levels and formats
// ============================================================================

/// Record severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug
    Debug,
    /// Info
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

impl LogLevel {
    /// Parse `debug`, `info`, `warn` or `error`
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// Level name
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendering of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `message key=value ...`
    Text,
    /// One JSON object per record
    Json,
}

impl LogFormat {
    /// Parse `text` or `json`
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "text" => Some(LogFormat::Text),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Verbosity of the generate and tool-call hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookLevel {
    /// Counts and names
    Basic,
    /// Adds roles and sizes
    Detailed,
    /// Adds full content and parameters
    Debug,
}

impl HookLevel {
    /// Parse `basic`, `detailed` or `debug`
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "basic" => Some(HookLevel::Basic),
            "detailed" => Some(HookLevel::Detailed),
            "debug" => Some(HookLevel::Debug),
            _ => None,
        }
    }

    /// Level name
    pub fn as_str(&self) -> &'static str {
        match self {
            HookLevel::Basic => "basic",
            HookLevel::Detailed => "detailed",
            HookLevel::Debug => "debug",
        }
    }
}

/// `slog` configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Record rendering
    pub format: LogFormat,
    /// Minimum level written
    pub level: LogLevel,
    /// Hook verbosity
    pub hook_level: HookLevel,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: LogLevel::Info,
            hook_level: HookLevel::Basic,
        }
    }
}

// ============================================================================
// Records and sinks
// ============================================================================

/// One script log record
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Severity
    pub level: LogLevel,
    /// Message, emoji prefix included
    pub message: String,
    /// Structured attributes
    pub attributes: NativeMap,
    /// Rendering chosen when the record was written
    pub format: LogFormat,
}

impl LogRecord {
    /// Render per the record's format. Text attributes are sorted by key.
    pub fn render(&self) -> String {
        match self.format {
            LogFormat::Text => {
                let mut keys: Vec<&String> = self.attributes.keys().collect();
                keys.sort();
                let mut line = self.message.clone();
                for key in keys {
                    let value = match &self.attributes[key.as_str()] {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    line.push_str(&format!(" {}={}", key, value));
                }
                line
            }
            LogFormat::Json => {
                let mut object = self.attributes.clone();
                object.insert("level".into(), json!(self.level.as_str()));
                object.insert("msg".into(), json!(self.message));
                Value::Object(object).to_string()
            }
        }
    }
}

/// Destination of script log records
pub trait LogSink: Send + Sync {
    /// Write one record
    fn write(&self, record: &LogRecord);
}

/// Forwards records to `tracing` at the matching level
#[derive(Debug, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn write(&self, record: &LogRecord) {
        let line = record.render();
        match record.level {
            LogLevel::Debug => tracing::debug!(target: LOG_TARGET, "{}", line),
            LogLevel::Info => tracing::info!(target: LOG_TARGET, "{}", line),
            LogLevel::Warn => tracing::warn!(target: LOG_TARGET, "{}", line),
            LogLevel::Error => tracing::error!(target: LOG_TARGET, "{}", line),
        }
    }
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the written records
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Number of written records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Check if nothing was written
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl LogSink for MemoryLogSink {
    fn write(&self, record: &LogRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Payload of `logger` handles: attributes merged into every record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopedLogger {
    /// Attributes of the scope
    pub attributes: NativeMap,
}

// ============================================================================
// Bridge
// ============================================================================

struct SlogState {
    config: LoggerConfig,
}

/// The `slog` bridge
pub struct SlogBridge {
    config: LoggerConfig,
    state: LifecycleCell<SlogState>,
    sink: Arc<dyn LogSink>,
}

impl SlogBridge {
    /// Bridge with default configuration writing to `tracing`
    pub fn new() -> Self {
        Self::with_config(LoggerConfig::default())
    }

    /// Bridge with `config` writing to `tracing`
    pub fn with_config(config: LoggerConfig) -> Self {
        Self {
            config,
            state: LifecycleCell::new(BRIDGE_ID),
            sink: Arc::new(TracingLogSink),
        }
    }

    /// Replace the sink
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    fn current(&self) -> BridgeResult<LoggerConfig> {
        self.state.read(|s| s.config.clone())
    }

    fn write(&self, level: LogLevel, message: String, attributes: NativeMap) -> BridgeResult<()> {
        let config = self.current()?;
        if level < config.level {
            return Ok(());
        }
        self.sink.write(&LogRecord {
            level,
            message,
            attributes,
            format: config.format,
        });
        Ok(())
    }

    /// slog.<level>(message, emoji?, attributes?): nil
    fn log_at(&self, level: LogLevel, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let message = args.string(0, "message")?;
        let message = match args.opt_string(1, "emoji")? {
            Some(emoji) if !emoji.is_empty() => format!("{} {}", emoji, message),
            _ => message.to_string(),
        };
        let attributes = match args.opt_object(2, "attributes")? {
            Some(fields) => object_to_native_lossy(fields),
            None => NativeMap::new(),
        };
        self.write(level, message, attributes)?;
        Ok(ScriptValue::Nil)
    }

    /// slog.logBeforeGenerate(messages): nil
    fn log_before_generate(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let items = args.array(0, "messages")?;
        let mut messages = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let fields = item
                .as_object()
                .map_err(|_| args.invalid(0, "messages", "array of {role, content}", format!("element {} is {}", i, item.type_name())))?;
            let role = crate::field_str(fields, "role")
                .ok_or_else(|| args.invalid(0, "messages", "message role string", format!("element {} has no role", i)))?;
            let content = crate::field_str(fields, "content")
                .ok_or_else(|| args.invalid(0, "messages", "message content string", format!("element {} has no content", i)))?;
            messages.push((role, content));
        }

        let hook = self.current()?.hook_level;
        let mut attrs = NativeMap::new();
        attrs.insert("messageCount".into(), json!(messages.len()));
        if hook >= HookLevel::Detailed {
            let roles: Vec<&str> = messages.iter().map(|(r, _)| *r).collect();
            let chars: usize = messages.iter().map(|(_, c)| c.chars().count()).sum();
            attrs.insert("roles".into(), json!(roles));
            attrs.insert("totalChars".into(), json!(chars));
        }
        if hook >= HookLevel::Debug {
            let full: Vec<Value> = messages
                .iter()
                .map(|(r, c)| json!({"role": r, "content": c}))
                .collect();
            attrs.insert("messages".into(), Value::Array(full));
        }
        self.write(LogLevel::Info, "LLM generate starting".into(), attrs)?;
        Ok(ScriptValue::Nil)
    }

    /// slog.logAfterGenerate(response, error?): nil
    fn log_after_generate(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let response = args.object(0, "response")?;
        let content = crate::field_str(response, "content").unwrap_or_default();
        let error = args.opt_string(1, "error")?.filter(|e| !e.is_empty());

        let hook = self.current()?.hook_level;
        let mut attrs = NativeMap::new();
        if hook >= HookLevel::Detailed {
            attrs.insert("contentLength".into(), json!(content.chars().count()));
        }
        if hook >= HookLevel::Debug {
            attrs.insert("content".into(), json!(content));
        }
        match error {
            Some(e) => {
                attrs.insert("error".into(), json!(e));
                self.write(LogLevel::Error, "LLM generate failed".into(), attrs)?;
            }
            None => self.write(LogLevel::Info, "LLM generate complete".into(), attrs)?,
        }
        Ok(ScriptValue::Nil)
    }

    /// slog.logBeforeToolCall(tool, params): nil
    fn log_before_tool_call(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let tool = args.string(0, "tool")?;
        let params = args.object(1, "params")?;

        let hook = self.current()?.hook_level;
        let mut attrs = NativeMap::new();
        attrs.insert("tool".into(), json!(tool));
        if hook >= HookLevel::Detailed {
            let mut keys: Vec<&String> = params.keys().collect();
            keys.sort();
            attrs.insert("paramCount".into(), json!(params.len()));
            attrs.insert("paramKeys".into(), json!(keys));
        }
        if hook >= HookLevel::Debug {
            attrs.insert("params".into(), Value::Object(object_to_native_lossy(params)));
        }
        self.write(LogLevel::Info, "Tool call starting".into(), attrs)?;
        Ok(ScriptValue::Nil)
    }

    /// slog.logAfterToolCall(tool, result?, error?): nil
    fn log_after_tool_call(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let tool = args.string(0, "tool")?;
        let result = args.opt_any(1).filter(|v| !v.is_nil());
        let error = args.opt_string(2, "error")?.filter(|e| !e.is_empty());

        let hook = self.current()?.hook_level;
        let mut attrs = NativeMap::new();
        attrs.insert("tool".into(), json!(tool));
        if hook >= HookLevel::Detailed {
            attrs.insert("hasResult".into(), json!(result.is_some()));
        }
        if hook >= HookLevel::Debug {
            if let Some(result) = result {
                attrs.insert("result".into(), result.to_native_lossy());
            }
        }
        match error {
            Some(e) => {
                attrs.insert("error".into(), json!(e));
                self.write(LogLevel::Error, "Tool call failed".into(), attrs)?;
            }
            None => self.write(LogLevel::Info, "Tool call complete".into(), attrs)?,
        }
        Ok(ScriptValue::Nil)
    }

    /// slog.setLogLevel(level): nil
    fn set_log_level(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let name = args.string(0, "level")?;
        let level = HookLevel::parse(name)
            .ok_or_else(|| args.invalid(0, "level", "basic, detailed or debug", name))?;
        self.state.write(|s| s.config.hook_level = level)?;
        Ok(ScriptValue::Nil)
    }

    /// slog.getLogLevel(): string
    fn get_log_level(&self) -> BridgeResult<ScriptValue> {
        let level = self.current()?.hook_level;
        Ok(ScriptValue::string(level.as_str()))
    }

    /// slog.configureLogger({format?, level?}): nil
    fn configure_logger(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let config = args.object(0, "config")?;
        let format = match config_text(args, config, "format")? {
            Some(name) => Some(
                LogFormat::parse(name)
                    .ok_or_else(|| args.invalid(0, "config", "format json or text", name))?,
            ),
            None => None,
        };
        let level = match config_text(args, config, "level")? {
            Some(name) => Some(
                LogLevel::parse(name)
                    .ok_or_else(|| args.invalid(0, "config", "level debug, info, warn or error", name))?,
            ),
            None => None,
        };

        self.state.write(|s| {
            if let Some(format) = format {
                s.config.format = format;
            }
            if let Some(level) = level {
                s.config.level = level;
            }
        })?;
        Ok(ScriptValue::Nil)
    }

    /// slog.withAttributes(attributes): {logger, attributes}
    fn with_attributes(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let attributes = args.object(0, "attributes")?;
        let scoped = ScopedLogger {
            attributes: object_to_native_lossy(attributes),
        };
        Ok(ScriptValue::from_pairs([
            ("logger", ScriptValue::custom(LOGGER_TAG, scoped)),
            ("attributes", ScriptValue::Object(attributes.clone())),
        ]))
    }

    /// slog.logWith(logger, level, message, attributes?): nil
    fn log_with(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let scoped = args.downcast::<ScopedLogger>(0, "logger", LOGGER_TAG)?;
        let level_name = args.string(1, "level")?;
        let level = LogLevel::parse(level_name)
            .ok_or_else(|| args.invalid(1, "level", "debug, info, warn or error", level_name))?;
        let message = args.string(2, "message")?;

        let mut attributes = scoped.attributes.clone();
        if let Some(extra) = args.opt_object(3, "attributes")? {
            attributes.extend(object_to_native_lossy(extra));
        }
        self.write(level, message.to_string(), attributes)?;
        Ok(ScriptValue::Nil)
    }
}

fn config_text<'a>(
    args: &Args<'_>,
    config: &'a HashMap<String, ScriptValue>,
    key: &str,
) -> BridgeResult<Option<&'a str>> {
    match config.get(key) {
        None | Some(ScriptValue::Nil) => Ok(None),
        Some(ScriptValue::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(args.invalid(0, "config", &format!("string {}", key), other.type_name())),
    }
}

impl Default for SlogBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge for SlogBridge {
    fn id(&self) -> &str {
        BRIDGE_ID
    }

    fn metadata(&self) -> BridgeMetadata {
        BridgeMetadata::new(
            "Structured Logging",
            "Leveled, attributed logging and LLM/tool-call hook logging",
        )
    }

    fn initialize(&self, _ctx: &CallContext) -> BridgeResult<()> {
        self.state.initialize_with(|| {
            Ok(SlogState {
                config: self.config.clone(),
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
        let leveled = |name: &str, description: &str| {
            MethodInfo::new(name, description)
                .param("message", "string", "Message")
                .optional("emoji", "string", "Prefix emoji")
                .optional("attributes", "object", "Structured attributes")
        };
        vec![
            leveled("info", "Log at info level").example("info(\"ready\", \"🚀\", {port: 8080})"),
            leveled("warn", "Log at warn level"),
            leveled("error", "Log at error level"),
            leveled("debug", "Log at debug level"),
            MethodInfo::new("logBeforeGenerate", "Log an LLM request")
                .param("messages", "array", "[{role, content}]"),
            MethodInfo::new("logAfterGenerate", "Log an LLM response")
                .param("response", "object", "{content}")
                .optional("error", "string", "Failure message"),
            MethodInfo::new("logBeforeToolCall", "Log a tool invocation")
                .param("tool", "string", "Tool name")
                .param("params", "object", "Tool parameters"),
            MethodInfo::new("logAfterToolCall", "Log a tool result")
                .param("tool", "string", "Tool name")
                .optional("result", "any", "Tool result")
                .optional("error", "string", "Failure message"),
            MethodInfo::new("setLogLevel", "Set the hook verbosity")
                .param("level", "string", "basic, detailed or debug"),
            MethodInfo::new("getLogLevel", "Current hook verbosity").returns("string"),
            MethodInfo::new("configureLogger", "Set record format and minimum level")
                .param("config", "object", "{format?: json|text, level?: debug|info|warn|error}"),
            MethodInfo::new("withAttributes", "Logger handle carrying attributes")
                .param("attributes", "object", "Attributes")
                .returns("object"),
            MethodInfo::new("logWith", "Log through a logger handle")
                .param("logger", LOGGER_TAG, "Handle from withAttributes")
                .param("level", "string", "debug, info, warn or error")
                .param("message", "string", "Message")
                .optional("attributes", "object", "Extra attributes"),
        ]
    }

    fn required_permissions(&self) -> Vec<Permission> {
        vec![
            Permission::new(PermissionKind::Storage, "slog.logging", &["write"], "Write log records"),
            Permission::new(PermissionKind::Memory, "slog.context", &["read"], "Logger attributes"),
        ]
    }

    fn type_mappings(&self) -> HashMap<String, TypeMapping> {
        let mut m = HashMap::new();
        m.insert(
            "logger".to_string(),
            TypeMapping::new("ScopedLogger", LOGGER_TAG, "Attribute-scoped logger"),
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
            "info" => self.log_at(LogLevel::Info, &args),
            "warn" => self.log_at(LogLevel::Warn, &args),
            "error" => self.log_at(LogLevel::Error, &args),
            "debug" => self.log_at(LogLevel::Debug, &args),
            "logBeforeGenerate" => self.log_before_generate(&args),
            "logAfterGenerate" => self.log_after_generate(&args),
            "logBeforeToolCall" => self.log_before_tool_call(&args),
            "logAfterToolCall" => self.log_after_tool_call(&args),
            "setLogLevel" => self.set_log_level(&args),
            "getLogLevel" => self.get_log_level(),
            "configureLogger" => self.configure_logger(&args),
            "withAttributes" => self.with_attributes(&args),
            "logWith" => self.log_with(&args),
            _ => Err(BridgeError::MethodNotFound {
                bridge: BRIDGE_ID.to_string(),
                method: name.to_string(),
            }),
        }
    }
}
