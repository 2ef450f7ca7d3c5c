use clap::Parser;
use feederopt_cli::cli::{Cli, Commands};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

mod commands;

use crate::commands::optimize::OptimizeArgs;
use crate::commands::util::configure_threads;
use crate::commands::{aggregate, graph, optimize, pf, radialize, validate};

fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Pf {
            network,
            demands,
            settings,
            aggregate,
            out,
        } => {
            info!("Running power flow on {}", network.display());
            pf::handle(network, demands, settings.as_deref(), *aggregate, out)
        }
        Commands::Optimize {
            network,
            demands,
            settings,
            params,
            algorithm,
            objective,
            switching_weight,
            structural_only,
            aggregate,
            out,
        } => {
            info!("Optimizing switch settings of {}", network.display());
            optimize::handle(OptimizeArgs {
                network,
                demands,
                settings: settings.as_deref(),
                params: params.as_deref(),
                algorithm: *algorithm,
                objective: *objective,
                switching_weight: *switching_weight,
                structural_only: *structural_only,
                aggregate: *aggregate,
                out,
            })
        }
        Commands::Aggregate { network, json } => aggregate::handle(network, *json),
        Commands::Radialize {
            network,
            settings,
            seed,
            out,
        } => radialize::handle(network, settings.as_deref(), *seed, out),
        Commands::Graph { command } => graph::handle(command),
        Commands::Validate {
            network,
            demands,
            settings,
        } => validate::handle(network, demands.as_deref(), settings.as_deref()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {err}");
    }

    configure_threads(&cli.threads);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
