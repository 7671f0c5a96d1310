//! `capbridge list`: registered bridges and their descriptions.

use capbridge_sdk::BridgeRegistry;

use crate::output::StyledOutput;

pub fn execute(registry: &BridgeRegistry, out: &mut StyledOutput) -> anyhow::Result<()> {
    let mut ids = registry.ids();
    ids.sort();
    let width = ids.iter().map(String::len).max().unwrap_or(0) + 2;

    for id in ids {
        let Some(bridge) = registry.get(&id) else {
            continue;
        };
        let meta = bridge.metadata();
        out.success(&format!("{:<width$}", id, width = width));
        out.plain(&meta.description);
        out.newline();
    }
    out.flush();
    Ok(())
}
