use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use feederopt_algo::power_flow::FlowReport;
use feederopt_algo::{AggregateFlowProvider, FlowProvider, IteratedDistFlow};
use feederopt_core::{BridgePolicy, NetworkAggregation, NetworkConfiguration};
use feederopt_cli::common::{load_network, load_periods, load_settings, write_json, OutputDest};
use rayon::prelude::*;
use serde::Serialize;
use tabwriter::TabWriter;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct PeriodFlow {
    period: String,
    flow: FlowReport,
}

#[derive(Debug, Serialize)]
struct PfOutput {
    /// Line name -> open
    switches: BTreeMap<String, bool>,
    periods: Vec<PeriodFlow>,
}

pub fn handle(
    network_path: &Path,
    demands_path: &Path,
    settings_path: Option<&Path>,
    aggregate: bool,
    out: &str,
) -> Result<()> {
    let start = Instant::now();
    let network = load_network(network_path)?;
    let periods = load_periods(&network, demands_path)?;
    let mut config = NetworkConfiguration::new(
        network.clone(),
        load_settings(&network, settings_path)?,
    );
    match settings_path {
        None => {
            config.make_radial_flow_possible(&mut BridgePolicy::First)?;
            info!(
                open_switches = config.settings().open_switches().count(),
                "radialized the all-closed configuration"
            );
        }
        Some(path) if !(config.is_radial() && config.is_connected()) => {
            bail!(
                "settings in {} are not radial and connected; repair them with `feederopt radialize`",
                path.display()
            );
        }
        Some(_) => {}
    }

    let solver: Arc<dyn FlowProvider> = if aggregate {
        let aggregation = NetworkAggregation::aggregate(&network)?;
        info!("aggregation: {}", aggregation.stats());
        Arc::new(AggregateFlowProvider::new(
            Arc::new(aggregation),
            Arc::new(IteratedDistFlow::new()),
        ))
    } else {
        Arc::new(IteratedDistFlow::new())
    };

    let flows: Vec<PeriodFlow> = periods
        .par_iter()
        .map(|data| PeriodFlow {
            period: data.period.id.clone(),
            flow: solver.compute_flow(&config, &data.demands).report(&network),
        })
        .collect();
    for period in &flows {
        if period.flow.status != feederopt_algo::FlowStatus::Exact {
            warn!(
                period = %period.period,
                status = %period.flow.status,
                "{}",
                period.flow.detail
            );
        }
    }
    info!(
        periods = flows.len(),
        solver = solver.name(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "power flow finished"
    );

    let dest = OutputDest::parse(out);
    // keep stdout clean for piping when the report goes there
    if dest.is_stdout() {
        print_summary(io::stderr(), &flows)?;
    } else {
        print_summary(io::stdout(), &flows)?;
    }
    write_json(
        &PfOutput {
            switches: config.settings().to_named(&network),
            periods: flows,
        },
        &dest,
    )
}

fn print_summary<W: Write>(writer: W, flows: &[PeriodFlow]) -> Result<()> {
    let mut writer = TabWriter::new(writer);
    writeln!(
        writer,
        "PERIOD\tSTATUS\tITERATIONS\tLINE LOSS (W)\tTRANSFORMER LOSS (W)"
    )?;
    for period in flows {
        writeln!(
            writer,
            "{}\t{}\t{}\t{:.3}\t{:.3}",
            period.period,
            period.flow.status,
            period.flow.iterations,
            period.flow.total_line_loss,
            period.flow.total_transformer_loss
        )?;
    }
    writer.flush()?;
    Ok(())
}
