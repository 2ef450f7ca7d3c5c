use std::path::Path;

use anyhow::Result;
use feederopt_cli::common::{load_network, load_settings, OutputDest};
use feederopt_cli::GraphCommands;
use feederopt_core::graph_utils;

pub fn handle(command: &GraphCommands) -> Result<()> {
    match command {
        GraphCommands::Stats { network } => {
            let grid = load_network(network)?;
            let stats = graph_utils::graph_stats(&grid)?;
            println!("Graph statistics for {}:", network.display());
            println!("  Buses         : {}", stats.node_count);
            println!("  Lines         : {}", stats.edge_count);
            println!("  Switches      : {}", stats.switch_count);
            println!("  Meshes        : {}", stats.meshes);
            println!(
                "  Degree [min/avg/max]: {}/{:.2}/{}",
                stats.min_degree, stats.avg_degree, stats.max_degree
            );
            Ok(())
        }
        GraphCommands::Islands {
            network,
            settings,
            emit,
        } => {
            let grid = load_network(network)?;
            let settings = load_settings(&grid, settings.as_deref())?;
            let analysis = graph_utils::find_islands(&grid, &settings)?;
            for summary in &analysis.islands {
                println!(
                    "Island {}: {} bus(es), {} provider(s)",
                    summary.island_id, summary.node_count, summary.provider_count
                );
            }
            if *emit {
                println!("\nBus → Island assignments:");
                for assignment in &analysis.assignments {
                    println!(
                        "  idx {:>3}: {:<20} -> island {}",
                        assignment.bus.value(),
                        assignment.label,
                        assignment.island_id
                    );
                }
            }
            Ok(())
        }
        GraphCommands::Dot {
            network,
            settings,
            out,
        } => {
            let grid = load_network(network)?;
            let settings = match settings {
                Some(path) => Some(load_settings(&grid, Some(path.as_path()))?),
                None => None,
            };
            let dot = graph_utils::export_dot(&grid, settings.as_ref());
            let dest = OutputDest::parse(out);
            dest.write_text(&dot)?;
            if let OutputDest::File(path) = &dest {
                println!("Graph exported to {}", path.display());
            }
            Ok(())
        }
    }
}
