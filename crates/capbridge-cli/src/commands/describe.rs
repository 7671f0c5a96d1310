//! `capbridge describe`: generated documentation of one bridge.

use anyhow::Context as _;
use capbridge_sdk::BridgeRegistry;

use crate::output::StyledOutput;

pub fn execute(registry: &BridgeRegistry, bridge: &str, out: &mut StyledOutput) -> anyhow::Result<()> {
    let text = registry
        .describe(bridge)
        .with_context(|| format!("describing {}", bridge))?;
    out.plain(&text);
    if !text.ends_with('\n') {
        out.newline();
    }
    out.flush();
    Ok(())
}
