use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use feederopt_cli::common::{load_network, load_periods, load_settings};
use feederopt_core::{Diagnostics, Network, NetworkConfiguration};
use tracing::{info, warn};

pub fn handle(
    network_path: &Path,
    demands_path: Option<&Path>,
    settings_path: Option<&Path>,
) -> Result<()> {
    info!("Validating network {}", network_path.display());
    let network = load_network(network_path)?;
    let mut diag = Diagnostics::new();
    network.validate_into(&mut diag);

    if let Some(path) = demands_path {
        diag.merge(check_demands(&network, path)?);
    }
    if let Some(path) = settings_path {
        diag.merge(check_settings(&network, path)?);
    }

    print!("{diag}");
    if diag.has_errors() {
        if diag.issues_by_category("configuration").next().is_some() {
            bail!(
                "validation failed: {}; repair the switch settings with `feederopt radialize`",
                diag.summary()
            );
        }
        bail!("validation failed: {}", diag.summary());
    }
    if diag.has_warnings() {
        warn!(warnings = diag.warning_count(), "network is usable but has warnings");
    } else if !diag.has_issues() {
        info!("network is clean");
    }
    Ok(())
}

fn check_demands(network: &Network, path: &Path) -> Result<Diagnostics> {
    let mut diag = Diagnostics::new();
    let periods = load_periods(network, path)?;
    for data in &periods {
        if data.demands.total().re <= 0.0 {
            diag.add_warning_with_entity(
                "demands",
                "Period has no active power demand",
                &format!("period '{}'", data.period.id),
            );
        }
    }
    info!(periods = periods.len(), "demands are consistent with the network");
    Ok(diag)
}

fn check_settings(network: &Arc<Network>, path: &Path) -> Result<Diagnostics> {
    let mut diag = Diagnostics::new();
    let settings = load_settings(network, Some(path))?;
    let config = NetworkConfiguration::new(network.clone(), settings);
    if !config.is_radial() {
        diag.add_error("configuration", "Switch settings leave a cycle closed");
    }
    for bus in config.disconnected_buses() {
        diag.add_error_with_entity(
            "configuration",
            "Bus is not supplied under the switch settings",
            &format!("bus '{}'", network.bus(*bus).name),
        );
    }
    Ok(diag)
}
