//! Authentication utilities bridge (`util_auth`)
//!
//! Auth configs, request decoration, JWT claim parsing, an endpoint
//! scheme table with prefix matching, and a TTL credential cache.
//!
//! Auth configs are plain objects of the form `{type, data}` where `type`
//! is one of `bearer`, `oauth2`, `basic`, `api_key`, `custom`.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use capbridge_sdk::{
    Args, Bridge, BridgeError, BridgeEvent, BridgeMetadata, BridgeResult, CallContext, EventSink,
    LifecycleCell, MethodInfo, Permission, PermissionKind, ScriptValue, TracingEventSink,
    TypeMapping,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::marshal::{event_data, native_to_object, object_to_native, NativeMap};

/// Bridge identifier
pub const BRIDGE_ID: &str = "util_auth";

const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

// ============================================================================
// Configuration
// ============================================================================

/// How `selectAuthScheme` picks among several matching endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemeSelection {
    /// Longest registered endpoint
    #[default]
    Longest,
    /// Shortest registered endpoint
    Shortest,
    /// Earliest registration
    First,
}

impl SchemeSelection {
    /// Parse a policy name
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "longest" => Some(SchemeSelection::Longest),
            "shortest" => Some(SchemeSelection::Shortest),
            "first" => Some(SchemeSelection::First),
            _ => None,
        }
    }

    /// Policy name
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemeSelection::Longest => "longest",
            SchemeSelection::Shortest => "shortest",
            SchemeSelection::First => "first",
        }
    }
}

/// `util_auth` configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// TTL used by `cacheCredentials` when none is given
    pub default_cache_ttl_secs: u64,
    /// Lead time used by `autoRefreshToken` when none is given
    pub default_refresh_before_secs: u64,
    /// Policy used by `selectAuthScheme` when none is given
    pub scheme_selection: SchemeSelection,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            default_cache_ttl_secs: 3600,
            default_refresh_before_secs: 300,
            scheme_selection: SchemeSelection::Longest,
        }
    }
}

// ============================================================================
// Scheme table
// ============================================================================

/// An auth scheme registered for an endpoint prefix
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredScheme {
    /// Endpoint prefix
    pub endpoint: String,
    /// Scheme type, e.g. `bearer`
    pub scheme_type: String,
    /// Free-form description
    pub description: String,
    /// Registration order
    pub sequence: u64,
}

impl RegisteredScheme {
    fn to_value(&self) -> ScriptValue {
        ScriptValue::from_pairs([
            ("endpoint", ScriptValue::string(&self.endpoint)),
            ("type", ScriptValue::string(&self.scheme_type)),
            ("description", ScriptValue::string(&self.description)),
        ])
    }
}

/// Endpoint to scheme table.
///
/// An endpoint and a registered prefix match when either is a prefix of
/// the other.
#[derive(Debug, Default)]
pub struct SchemeTable {
    schemes: HashMap<String, RegisteredScheme>,
    next_sequence: u64,
}

impl SchemeTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the scheme of `endpoint`.
    ///
    /// A replacement counts as a new registration for the `first` policy.
    pub fn register(&mut self, endpoint: &str, scheme_type: &str, description: &str) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.schemes.insert(
            endpoint.to_string(),
            RegisteredScheme {
                endpoint: endpoint.to_string(),
                scheme_type: scheme_type.to_string(),
                description: description.to_string(),
                sequence,
            },
        );
    }

    /// Number of registered endpoints
    pub fn len(&self) -> usize {
        self.schemes.len()
    }

    /// Check if no endpoints are registered
    pub fn is_empty(&self) -> bool {
        self.schemes.is_empty()
    }

    /// All matches for `endpoint`, ordered by registered endpoint
    pub fn matching(&self, endpoint: &str) -> Vec<&RegisteredScheme> {
        let mut found: Vec<&RegisteredScheme> = self
            .schemes
            .values()
            .filter(|s| endpoint.starts_with(&s.endpoint) || s.endpoint.starts_with(endpoint))
            .collect();
        found.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        found
    }

    /// Single best match for `endpoint`; ties go to the earliest registration
    pub fn select(&self, endpoint: &str, policy: SchemeSelection) -> Option<&RegisteredScheme> {
        let found = self.matching(endpoint).into_iter();
        match policy {
            SchemeSelection::Longest => {
                found.max_by_key(|s| (s.endpoint.len(), Reverse(s.sequence)))
            }
            SchemeSelection::Shortest => found.min_by_key(|s| (s.endpoint.len(), s.sequence)),
            SchemeSelection::First => found.min_by_key(|s| s.sequence),
        }
    }
}

// ============================================================================
// Credential cache
// ============================================================================

// Longest TTL or refresh lead accepted, about 100 years.
const MAX_SPAN_SECS: u64 = 100 * 365 * 24 * 3600;

fn seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_SPAN_SECS) as i64)
}

/// A cached auth config and its timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Cached auth config
    pub auth_config: NativeMap,
    /// Insertion time
    pub created_at: DateTime<Utc>,
    /// Last successful read
    pub last_used: DateTime<Utc>,
    /// `created_at + ttl`
    pub expires_at: DateTime<Utc>,
    /// Time to live in seconds
    pub ttl_secs: u64,
}

impl CacheEntry {
    /// Whether the entry is past its expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Keyed credential cache with lazy expiry.
///
/// All operations take `now` so expiry can be tested without waiting.
#[derive(Debug, Default)]
pub struct CredentialCache {
    entries: HashMap<String, CacheEntry>,
}

impl CredentialCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `auth_config` under `key`, replacing any previous entry
    pub fn insert(&mut self, key: &str, auth_config: NativeMap, ttl_secs: u64, now: DateTime<Utc>) {
        let expires_at = now + seconds(ttl_secs);
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                auth_config,
                created_at: now,
                last_used: now,
                expires_at,
                ttl_secs,
            },
        );
    }

    /// Live config under `key`. An expired entry is removed and `None`
    /// returned; a hit refreshes `last_used`.
    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<NativeMap> {
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            self.entries.remove(key);
            tracing::debug!(key, "cached credentials expired");
            return None;
        }
        let entry = self.entries.get_mut(key)?;
        entry.last_used = now;
        Some(entry.auth_config.clone())
    }

    /// Entry under `key` regardless of expiry
    pub fn entry(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Remove every expired entry, returning how many were removed
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before - self.entries.len()
    }

    /// Number of entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// JWT
// ============================================================================

/// Registered claims of a JWT payload
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct JwtClaims {
    /// Expiry, seconds since the epoch; 0 when absent
    pub exp: i64,
    /// Issued at, seconds since the epoch; 0 when absent
    pub iat: i64,
    /// Subject
    pub sub: String,
    /// Audience, a string or an array of strings
    pub aud: Value,
    /// Issuer
    pub iss: String,
}

impl JwtClaims {
    /// Whether `exp` is set and in the past
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.exp > 0 && self.exp < now.timestamp()
    }

    fn to_value(&self) -> ScriptValue {
        ScriptValue::from_pairs([
            ("exp", ScriptValue::number(self.exp as f64)),
            ("iat", ScriptValue::number(self.iat as f64)),
            ("sub", ScriptValue::string(&self.sub)),
            (
                "aud",
                match &self.aud {
                    Value::Null => ScriptValue::string(""),
                    other => ScriptValue::from_native(other),
                },
            ),
            ("iss", ScriptValue::string(&self.iss)),
        ])
    }
}

/// Decode the payload segment of a compact JWT without verifying it
pub fn decode_jwt_payload(token: &str) -> BridgeResult<NativeMap> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => {
            return Err(BridgeError::upstream(
                "parseJWTClaims",
                "token must have three dot-separated segments",
            ))
        }
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| BridgeError::upstream("parseJWTClaims", format!("invalid payload encoding: {}", e)))?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(BridgeError::upstream("parseJWTClaims", "payload is not a JSON object")),
        Err(e) => Err(BridgeError::upstream("parseJWTClaims", format!("invalid payload JSON: {}", e))),
    }
}

/// Parse the registered claims of a compact JWT
pub fn parse_jwt_claims(token: &str) -> BridgeResult<JwtClaims> {
    let payload = decode_jwt_payload(token)?;
    serde_json::from_value(Value::Object(payload))
        .map_err(|e| BridgeError::upstream("parseJWTClaims", format!("invalid claims: {}", e)))
}

// ============================================================================
// Request decoration
// ============================================================================

fn data_str<'a>(data: &'a NativeMap, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| data.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn header_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn append_query(url: &str, name: &str, value: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().append_pair(name, value);
            parsed.to_string()
        }
        Err(_) => {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!("{}{}{}={}", url, sep, name, value)
        }
    }
}

/// Apply `auth` (`{type, data}`) to `request`, returning a new request.
///
/// The request's `headers` object is created when absent.
pub fn apply_auth(request: &NativeMap, auth: &NativeMap) -> Result<NativeMap, String> {
    let auth_type = auth
        .get("type")
        .and_then(Value::as_str)
        .ok_or("auth config has no type")?;
    let empty = NativeMap::new();
    let data = auth.get("data").and_then(Value::as_object).unwrap_or(&empty);

    let mut out = request.clone();
    let mut headers = match out.remove("headers") {
        Some(Value::Object(h)) => h,
        _ => NativeMap::new(),
    };

    match auth_type {
        "bearer" | "oauth2" => {
            let token = data_str(data, &["access_token", "token"])
                .ok_or_else(|| format!("{} auth requires a token", auth_type))?;
            headers.insert("Authorization".into(), json!(format!("Bearer {}", token)));
        }
        "basic" => {
            let username = data_str(data, &["username"]).ok_or("basic auth requires a username")?;
            let password = data
                .get("password")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let encoded = STANDARD.encode(format!("{}:{}", username, password));
            headers.insert("Authorization".into(), json!(format!("Basic {}", encoded)));
        }
        "api_key" => {
            let key = data_str(data, &["api_key", "key"]).ok_or("api_key auth requires a key")?;
            match data_str(data, &["query"]) {
                Some(param) => {
                    let url = out
                        .get("url")
                        .and_then(Value::as_str)
                        .ok_or("api_key query auth requires request.url")?;
                    let url = append_query(url, param, key);
                    out.insert("url".into(), json!(url));
                }
                None => {
                    let header = data_str(data, &["header"]).unwrap_or(DEFAULT_API_KEY_HEADER);
                    headers.insert(header.to_string(), json!(key));
                }
            }
        }
        "custom" => {
            if let Some(custom) = data.get("headers").and_then(Value::as_object) {
                for (name, value) in custom {
                    headers.insert(name.clone(), json!(header_value(value)));
                }
            }
        }
        other => return Err(format!("unsupported auth type '{}'", other)),
    }

    out.insert("headers".into(), Value::Object(headers));
    Ok(out)
}

/// Guess an auth config from a state object holding credentials
pub fn detect_auth_scheme(state: &NativeMap) -> Option<NativeMap> {
    let pick = |keys: &[&str]| -> NativeMap {
        keys.iter()
            .filter_map(|k| state.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect()
    };
    let (auth_type, data) = if data_str(state, &["access_token"]).is_some() {
        ("oauth2", pick(&["access_token", "refresh_token", "token_type"]))
    } else if data_str(state, &["token", "bearer_token"]).is_some() {
        let token = data_str(state, &["token", "bearer_token"]).unwrap_or_default();
        ("bearer", event_data([("token", json!(token))]))
    } else if data_str(state, &["api_key"]).is_some() {
        ("api_key", pick(&["api_key", "header", "query"]))
    } else if data_str(state, &["username"]).is_some() && state.contains_key("password") {
        ("basic", pick(&["username", "password"]))
    } else {
        return None;
    };
    Some(event_data([("type", json!(auth_type)), ("data", Value::Object(data))]))
}

// ============================================================================
// Bridge
// ============================================================================

#[derive(Default)]
struct AuthState {
    schemes: SchemeTable,
    cache: CredentialCache,
}

/// The `util_auth` bridge
pub struct AuthBridge {
    config: AuthConfig,
    state: LifecycleCell<AuthState>,
    events: Arc<dyn EventSink>,
}

impl AuthBridge {
    /// Bridge with default configuration
    pub fn new() -> Self {
        Self::with_config(AuthConfig::default())
    }

    /// Bridge with `config`
    pub fn with_config(config: AuthConfig) -> Self {
        Self {
            config,
            state: LifecycleCell::new(BRIDGE_ID),
            events: Arc::new(TracingEventSink),
        }
    }

    /// Replace the event sink
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    fn emit(&self, name: &str, data: NativeMap) {
        self.events.emit(BridgeEvent::new(BRIDGE_ID, name, data));
    }

    /// auth.createAuthConfig(type, credentials): {type, data}
    fn create_auth_config(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let auth_type = args.string(0, "type")?;
        let credentials = args.object(1, "credentials")?;
        Ok(ScriptValue::from_pairs([
            ("type", ScriptValue::string(auth_type)),
            ("data", ScriptValue::Object(credentials.clone())),
        ]))
    }

    /// auth.applyAuth(request, authConfig): request
    fn apply_auth(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let request = object_to_native(args, 0, "request", args.object(0, "request")?)?;
        let auth = object_to_native(args, 1, "authConfig", args.object(1, "authConfig")?)?;
        let applied =
            apply_auth(&request, &auth).map_err(|msg| args.invalid(1, "authConfig", "supported auth config", msg))?;
        Ok(native_to_object(&applied))
    }

    /// auth.detectAuthSchemeFromState(state): authConfig | nil
    fn detect_auth_scheme_from_state(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let state = object_to_native(args, 0, "state", args.object(0, "state")?)?;
        Ok(detect_auth_scheme(&state)
            .map(|m| native_to_object(&m))
            .unwrap_or_default())
    }

    /// auth.discoverOAuth2Endpoints(issuer): object
    fn discover_oauth2_endpoints(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let issuer = args.string(0, "issuer")?.trim_end_matches('/');
        if issuer.is_empty() {
            return Err(args.invalid(0, "issuer", "issuer URL", "empty string"));
        }
        let well_known = format!("{}/.well-known/openid-configuration", issuer);
        self.emit(
            "auth.discovery.attempt",
            event_data([("issuer", json!(issuer)), ("url", json!(well_known))]),
        );

        let strings = |items: &[&str]| ScriptValue::array(items.iter().map(|s| ScriptValue::string(*s)).collect());
        Ok(ScriptValue::from_pairs([
            ("issuer", ScriptValue::string(issuer)),
            ("authorization_endpoint", ScriptValue::string(format!("{}/authorize", issuer))),
            ("token_endpoint", ScriptValue::string(format!("{}/token", issuer))),
            ("userinfo_endpoint", ScriptValue::string(format!("{}/userinfo", issuer))),
            ("jwks_uri", ScriptValue::string(format!("{}/jwks", issuer))),
            ("response_types_supported", strings(&["code", "token", "id_token"])),
            (
                "grant_types_supported",
                strings(&["authorization_code", "client_credentials", "refresh_token"]),
            ),
        ]))
    }

    /// auth.validateOAuth2Token(token, schema?): {valid, claims, expired, errors?}
    fn validate_oauth2_token(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let token = args.string(0, "token")?;
        let payload = decode_jwt_payload(token)?;
        let claims = parse_jwt_claims(token)?;
        let expired = claims.is_expired(Utc::now());

        let mut errors = Vec::new();
        if let Some(schema) = args.opt_object(1, "schema")? {
            if let Some(ScriptValue::Array(required)) = schema.get("required") {
                for name in required.iter().filter_map(|v| v.as_str().ok()) {
                    let present = match payload.get(name) {
                        None | Some(Value::Null) => false,
                        Some(Value::String(s)) => !s.is_empty(),
                        Some(_) => true,
                    };
                    if !present {
                        errors.push(ScriptValue::string(format!("missing required claim '{}'", name)));
                    }
                }
            }
        }

        let mut result = vec![
            ("valid", ScriptValue::bool(!expired && errors.is_empty())),
            ("claims", claims.to_value()),
            ("expired", ScriptValue::bool(expired)),
        ];
        if !errors.is_empty() {
            result.push(("errors", ScriptValue::array(errors)));
        }
        Ok(ScriptValue::from_pairs(result))
    }

    /// auth.parseJWTClaims(token): {exp, iat, sub, aud, iss}
    fn parse_jwt_claims(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let token = args.string(0, "token")?;
        Ok(parse_jwt_claims(token)?.to_value())
    }

    /// auth.autoRefreshToken(authConfig, refreshBefore?): object
    fn auto_refresh_token(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let auth_config = args.object(0, "authConfig")?;
        let refresh_before = args
            .opt_integer(1, "refreshBefore")?
            .unwrap_or(self.config.default_refresh_before_secs);
        let next = Utc::now() + seconds(refresh_before);
        Ok(ScriptValue::from_pairs([
            ("enabled", ScriptValue::bool(true)),
            ("refreshBefore", ScriptValue::number(refresh_before as f64)),
            ("authConfig", ScriptValue::Object(auth_config.clone())),
            ("nextRefresh", ScriptValue::string(next.to_rfc3339())),
        ]))
    }

    /// auth.registerAuthScheme(endpoint, {type, description}): true
    fn register_auth_scheme(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let endpoint = args.string(0, "endpoint")?;
        let scheme = args.object(1, "scheme")?;
        let scheme_type = crate::field_str(scheme, "type").unwrap_or_default();
        let description = crate::field_str(scheme, "description").unwrap_or_default();

        self.state
            .write(|s| s.schemes.register(endpoint, scheme_type, description))?;

        self.emit(
            "auth.scheme.registered",
            event_data([
                ("endpoint", json!(endpoint)),
                ("scheme", json!(scheme_type)),
                ("timestamp", json!(Utc::now().to_rfc3339())),
            ]),
        );
        Ok(ScriptValue::bool(true))
    }

    /// auth.getAuthSchemes(endpoint): array
    fn get_auth_schemes(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let endpoint = args.string(0, "endpoint")?;
        let found: Vec<ScriptValue> = self.state.read(|s| {
            s.schemes
                .matching(endpoint)
                .into_iter()
                .map(RegisteredScheme::to_value)
                .collect()
        })?;
        Ok(ScriptValue::Array(found))
    }

    /// auth.selectAuthScheme(endpoint, policy?): scheme | nil
    fn select_auth_scheme(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let endpoint = args.string(0, "endpoint")?;
        let policy = match args.opt_string(1, "policy")? {
            Some(name) => SchemeSelection::parse(name)
                .ok_or_else(|| args.invalid(1, "policy", "longest, shortest or first", name))?,
            None => self.config.scheme_selection,
        };
        let selected = self
            .state
            .read(|s| s.schemes.select(endpoint, policy).map(RegisteredScheme::to_value))?;
        Ok(selected.unwrap_or_default())
    }

    /// auth.serializeCredentials(authConfig): string
    fn serialize_credentials(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let auth = object_to_native(args, 0, "authConfig", args.object(0, "authConfig")?)?;
        let serialized = serde_json::to_string(&auth)
            .map_err(|e| BridgeError::upstream("serializeCredentials", e))?;

        // Only the auth type is reported; the payload may hold secrets.
        let auth_type = auth.get("type").cloned().unwrap_or(Value::Null);
        self.emit(
            "auth.credentials.serialized",
            event_data([("type", auth_type), ("size", json!(serialized.len()))]),
        );
        Ok(ScriptValue::string(serialized))
    }

    /// auth.deserializeCredentials(json): object
    fn deserialize_credentials(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let json = args.string(0, "json")?;
        match serde_json::from_str::<Value>(json) {
            Ok(Value::Object(map)) => Ok(native_to_object(&map)),
            Ok(other) => Err(BridgeError::upstream(
                "deserializeCredentials",
                format!("expected a JSON object, got {}", json_kind(&other)),
            )),
            Err(e) => Err(BridgeError::upstream("deserializeCredentials", e)),
        }
    }

    /// auth.cacheCredentials(key, authConfig, ttl?): true
    fn cache_credentials(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let key = args.string(0, "key")?;
        let auth = object_to_native(args, 1, "authConfig", args.object(1, "authConfig")?)?;
        let ttl = args
            .opt_integer(2, "ttl")?
            .unwrap_or(self.config.default_cache_ttl_secs);
        let now = Utc::now();
        self.state.write(|s| s.cache.insert(key, auth, ttl, now))?;
        Ok(ScriptValue::bool(true))
    }

    /// auth.getCachedCredentials(key): authConfig | nil
    fn get_cached_credentials(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let key = args.string(0, "key")?;
        let now = Utc::now();
        let hit = self.state.write(|s| s.cache.get(key, now))?;
        Ok(hit.map(|m| native_to_object(&m)).unwrap_or_default())
    }

    /// auth.purgeExpiredCredentials(): number
    fn purge_expired_credentials(&self) -> BridgeResult<ScriptValue> {
        let now = Utc::now();
        let removed = self.state.write(|s| s.cache.purge_expired(now))?;
        Ok(ScriptValue::number(removed as f64))
    }

    /// auth.logAuthEvent(eventType, metadata): nil
    fn log_auth_event(&self, args: &Args<'_>) -> BridgeResult<ScriptValue> {
        let event_type = args.string(0, "eventType")?;
        let metadata = args.object(1, "metadata")?;
        let mut data = crate::marshal::object_to_native_lossy(metadata);
        data.insert("eventType".into(), json!(event_type));
        data.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
        self.emit(&format!("auth.event.{}", event_type), data);
        Ok(ScriptValue::Nil)
    }
}

impl Default for AuthBridge {
    fn default() -> Self {
        Self::new()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Bridge for AuthBridge {
    fn id(&self) -> &str {
        BRIDGE_ID
    }

    fn metadata(&self) -> BridgeMetadata {
        BridgeMetadata::new(
            "Authentication Utilities",
            "Auth configs, JWT parsing, endpoint auth schemes and credential caching",
        )
    }

    fn initialize(&self, _ctx: &CallContext) -> BridgeResult<()> {
        self.state.initialize_with(|| Ok(AuthState::default()))?;
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
            MethodInfo::new("createAuthConfig", "Create an auth config")
                .param("type", "string", "bearer, oauth2, basic, api_key or custom")
                .param("credentials", "object", "Type-specific credentials")
                .returns("object")
                .example("createAuthConfig(\"bearer\", {token: \"abc\"})"),
            MethodInfo::new("applyAuth", "Return a copy of a request with auth applied")
                .param("request", "object", "{url?, headers?}")
                .param("authConfig", "object", "Auth config")
                .returns("object"),
            MethodInfo::new("detectAuthSchemeFromState", "Guess an auth config from stored credentials")
                .param("state", "object", "Credential fields")
                .returns("object"),
            MethodInfo::new("discoverOAuth2Endpoints", "Describe the OAuth2 endpoints of an issuer")
                .param("issuer", "string", "Issuer URL")
                .returns("object"),
            MethodInfo::new("validateOAuth2Token", "Check a JWT's expiry and required claims")
                .param("token", "string", "Compact JWT")
                .optional("schema", "object", "{required: [claim...]}")
                .returns("object"),
            MethodInfo::new("parseJWTClaims", "Decode JWT claims without verification")
                .param("token", "string", "Compact JWT")
                .returns("object"),
            MethodInfo::new("autoRefreshToken", "Describe a token refresh schedule")
                .param("authConfig", "object", "Auth config")
                .optional_with_default(
                    "refreshBefore",
                    "number",
                    ScriptValue::number(self.config.default_refresh_before_secs as f64),
                    "Seconds before expiry",
                )
                .returns("object"),
            MethodInfo::new("registerAuthScheme", "Register the auth scheme of an endpoint prefix")
                .param("endpoint", "string", "Endpoint prefix")
                .param("scheme", "object", "{type, description}")
                .returns("bool"),
            MethodInfo::new("getAuthSchemes", "Schemes whose endpoint prefix-matches")
                .param("endpoint", "string", "Endpoint")
                .returns("array"),
            MethodInfo::new("selectAuthScheme", "Best matching scheme for an endpoint")
                .param("endpoint", "string", "Endpoint")
                .optional_with_default(
                    "policy",
                    "string",
                    ScriptValue::string(self.config.scheme_selection.as_str()),
                    "longest, shortest or first",
                )
                .returns("object"),
            MethodInfo::new("serializeCredentials", "Serialize an auth config to JSON")
                .param("authConfig", "object", "Auth config")
                .returns("string"),
            MethodInfo::new("deserializeCredentials", "Parse a serialized auth config")
                .param("json", "string", "Serialized auth config")
                .returns("object"),
            MethodInfo::new("cacheCredentials", "Cache an auth config with a TTL")
                .param("key", "string", "Cache key")
                .param("authConfig", "object", "Auth config")
                .optional_with_default(
                    "ttl",
                    "number",
                    ScriptValue::number(self.config.default_cache_ttl_secs as f64),
                    "Seconds to live",
                )
                .returns("bool"),
            MethodInfo::new("getCachedCredentials", "Read a live cached auth config")
                .param("key", "string", "Cache key")
                .returns("object"),
            MethodInfo::new("purgeExpiredCredentials", "Drop expired cache entries")
                .returns("number"),
            MethodInfo::new("logAuthEvent", "Emit an auth.event.<type> event")
                .param("eventType", "string", "Event type")
                .param("metadata", "object", "Event data"),
        ]
    }

    fn required_permissions(&self) -> Vec<Permission> {
        vec![
            Permission::new(
                PermissionKind::Process,
                "environment",
                &["read"],
                "Read credentials from the environment",
            ),
            Permission::new(
                PermissionKind::Network,
                "oauth2",
                &["token"],
                "OAuth2 discovery and token endpoints",
            ),
            Permission::new(
                PermissionKind::Memory,
                "credentials",
                &["read", "mask"],
                "Credential cache",
            ),
        ]
    }

    fn type_mappings(&self) -> HashMap<String, TypeMapping> {
        let mut m = HashMap::new();
        m.insert(
            "AuthConfig".to_string(),
            TypeMapping::new("{type, data}", "object", "Authentication configuration"),
        );
        m.insert(
            "AuthScheme".to_string(),
            TypeMapping::new("RegisteredScheme", "object", "Endpoint auth scheme"),
        );
        m.insert(
            "OAuth2Config".to_string(),
            TypeMapping::new("OAuth2 discovery document", "object", "OAuth2 endpoints"),
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
            "createAuthConfig" => self.create_auth_config(&args),
            "applyAuth" => self.apply_auth(&args),
            "detectAuthSchemeFromState" => self.detect_auth_scheme_from_state(&args),
            "discoverOAuth2Endpoints" => self.discover_oauth2_endpoints(&args),
            "validateOAuth2Token" => self.validate_oauth2_token(&args),
            "parseJWTClaims" => self.parse_jwt_claims(&args),
            "autoRefreshToken" => self.auto_refresh_token(&args),
            "registerAuthScheme" => self.register_auth_scheme(&args),
            "getAuthSchemes" => self.get_auth_schemes(&args),
            "selectAuthScheme" => self.select_auth_scheme(&args),
            "serializeCredentials" => self.serialize_credentials(&args),
            "deserializeCredentials" => self.deserialize_credentials(&args),
            "cacheCredentials" => self.cache_credentials(&args),
            "getCachedCredentials" => self.get_cached_credentials(&args),
            "purgeExpiredCredentials" => self.purge_expired_credentials(),
            "logAuthEvent" => self.log_auth_event(&args),
            _ => Err(BridgeError::MethodNotFound {
                bridge: BRIDGE_ID.to_string(),
                method: name.to_string(),
            }),
        }
    }
}
