//! capbridge CLI
//!
//! Lists the bundled bridges, prints their generated documentation and
//! calls methods with JSON arguments.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use capbridge_sdk::BridgeRegistry;
use capbridge_stdlib::{register_stdlib_with_config, StdlibConfig};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "capbridge")]
#[command(about = "Inspect and call capbridge bridges", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON configuration keyed by bridge id
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Color output: auto, always, never
    #[arg(long, global = true)]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered bridges
    List,

    /// Show metadata, permissions, type mappings and methods of a bridge
    Describe {
        /// Bridge id, e.g. util_auth
        bridge: String,
    },

    /// Call a bridge method
    Call {
        /// Bridge id
        bridge: String,
        /// Method name
        method: String,
        /// Arguments as JSON; bare words are passed as strings
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Show version and bridge count
    Info,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CAPBRIDGE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<StdlibConfig> {
    let Some(path) = path else {
        return Ok(StdlibConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn build_registry(config: &StdlibConfig) -> BridgeRegistry {
    let mut registry = BridgeRegistry::new();
    register_stdlib_with_config(&mut registry, config);
    registry
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(cli.config.as_deref())?;
    let registry = build_registry(&config);
    let mut out = output::StyledOutput::new(output::resolve_color_choice(cli.color.as_deref()));

    match cli.command {
        Commands::List => commands::list::execute(&registry, &mut out),
        Commands::Describe { bridge } => commands::describe::execute(&registry, &bridge, &mut out),
        Commands::Call {
            bridge,
            method,
            args,
        } => commands::call::execute(&registry, &bridge, &method, &args, &mut out),
        Commands::Info => commands::info::execute(&registry, &mut out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_default() {
        assert_eq!(load_config(None).unwrap(), StdlibConfig::default());
    }

    #[test]
    fn test_unreadable_config_is_reported() {
        let err = load_config(Some(Path::new("/nonexistent/capbridge.json"))).unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }

    #[test]
    fn test_cli_parses_call() {
        let cli = Cli::try_parse_from(["capbridge", "call", "util_errors", "createError", "boom", "{\"a\":1}"]).unwrap();
        match cli.command {
            Commands::Call { bridge, method, args } => {
                assert_eq!(bridge, "util_errors");
                assert_eq!(method, "createError");
                assert_eq!(args, vec!["boom", "{\"a\":1}"]);
            }
            _ => panic!("expected call"),
        }
    }
}
