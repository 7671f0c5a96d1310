//! Bundled capbridge bridges
//!
//! Four bridges ship with the library:
//!
//! | Id            | Bridge                  | Purpose                                   |
//! |---------------|-------------------------|-------------------------------------------|
//! | `util_auth`   | [`auth::AuthBridge`]    | Auth schemes, credential cache, JWT       |
//! | `util_errors` | [`errors::ErrorsBridge`]| Structured errors, retry strategies       |
//! | `util_llm`    | [`llm::LlmBridge`]      | Provider pools, response parsing, costs   |
//! | `slog`        | [`logger::SlogBridge`]  | Leveled and hook logging                  |
//!
//! Use [`register_stdlib`] to install all of them into a registry.

#![warn(missing_docs)]

pub mod auth;
pub mod errors;
pub mod llm;
pub mod logger;
pub mod marshal;
pub mod registry;

pub(crate) use capbridge_sdk::args::{field_bool, field_number, field_str};

pub use auth::{AuthBridge, AuthConfig};
pub use errors::{ErrorsBridge, ScriptError};
pub use llm::{LlmBridge, LlmConfig, LlmProvider};
pub use logger::{LoggerConfig, SlogBridge};
pub use registry::{register_stdlib, register_stdlib_with_config, StdlibConfig};
