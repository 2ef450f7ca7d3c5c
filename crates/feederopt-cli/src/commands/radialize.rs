use std::path::Path;

use anyhow::Result;
use feederopt_cli::common::{load_network, load_settings, write_json, OutputDest};
use feederopt_core::io::SettingsDocument;
use feederopt_core::{BridgePolicy, NetworkConfiguration};
use tracing::info;

pub fn handle(
    network_path: &Path,
    settings_path: Option<&Path>,
    seed: Option<u64>,
    out: &str,
) -> Result<()> {
    let network = load_network(network_path)?;
    let before = load_settings(&network, settings_path)?;
    let mut config = NetworkConfiguration::new(network.clone(), before.clone());
    let mut policy = seed.map_or(BridgePolicy::First, BridgePolicy::seeded);
    config.make_radial_flow_possible(&mut policy)?;

    let changed = before.differences(config.settings());
    info!(
        changed = changed.len(),
        open = config.settings().open_switches().count(),
        "configuration is radial"
    );
    for line in changed {
        let state = if config.settings().is_open(line) {
            "opened"
        } else {
            "closed"
        };
        info!(line = %network.line(line).name, "{state}");
    }
    write_json(
        &SettingsDocument::from_settings(&network, config.settings()),
        &OutputDest::parse(out),
    )
}
