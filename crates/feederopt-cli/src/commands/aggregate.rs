use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use feederopt_cli::common::{load_network, write_json, OutputDest};
use feederopt_core::NetworkAggregation;
use tabwriter::TabWriter;

pub fn handle(network_path: &Path, json: bool) -> Result<()> {
    let network = load_network(network_path)?;
    let aggregation = NetworkAggregation::aggregate(&network)?;
    let stats = aggregation.stats();
    if json {
        return write_json(&stats, &OutputDest::Stdout);
    }

    println!("Aggregation of {}:", network_path.display());
    let mut writer = TabWriter::new(io::stdout());
    writeln!(writer, "\tORIGINAL\tAGGREGATE")?;
    writeln!(
        writer,
        "Buses\t{}\t{}",
        stats.original_buses, stats.aggregate_buses
    )?;
    writeln!(
        writer,
        "Lines\t{}\t{}",
        stats.original_lines, stats.aggregate_lines
    )?;
    writer.flush()?;
    println!("  Serial merges     : {}", stats.serial_merges);
    println!("  Parallel merges   : {}", stats.parallel_merges);
    println!("  Dangling lines    : {}", stats.dangling_lines);
    println!("  Unconnected buses : {}", stats.unconnected_buses);
    Ok(())
}
