//! `capbridge info`: version and registry summary.

use capbridge_sdk::BridgeRegistry;

use crate::output::StyledOutput;

pub fn execute(registry: &BridgeRegistry, out: &mut StyledOutput) -> anyhow::Result<()> {
    out.info(&format!("capbridge v{}", env!("CARGO_PKG_VERSION")));
    out.newline();
    out.newline();

    let mut ids = registry.ids();
    ids.sort();
    let methods: usize = ids
        .iter()
        .filter_map(|id| registry.get(id))
        .map(|b| b.methods().len())
        .sum();

    out.field("Platform:", 10, &format!("{} ({})", std::env::consts::OS, std::env::consts::ARCH));
    out.field("Bridges:", 10, &format!("{} ({})", ids.len(), ids.join(", ")));
    out.field("Methods:", 10, &methods.to_string());
    out.newline();
    out.plain("Environment:");
    out.newline();
    let log = std::env::var("CAPBRIDGE_LOG").unwrap_or_else(|_| "(not set)".to_string());
    out.field("  CAPBRIDGE_LOG", 16, &log);
    out.flush();
    Ok(())
}
