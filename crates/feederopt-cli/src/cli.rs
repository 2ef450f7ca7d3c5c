use clap::{CommandFactory, Parser, Subcommand, ValueEnum, ValueHint};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "feederopt", author, version, about, long_about = None)]
pub struct Cli {
    /// Set the logging level
    #[arg(long, default_value = "info", global = true)]
    pub log_level: tracing::Level,

    /// Worker threads for parallel search ("auto" = number of CPUs)
    #[arg(long, default_value = "auto", global = true)]
    pub threads: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the power flow of a configuration in every demand period
    Pf {
        /// Network document (JSON)
        #[arg(long, value_hint = ValueHint::FilePath)]
        network: PathBuf,
        /// Demand periods (JSON)
        #[arg(long, value_hint = ValueHint::FilePath)]
        demands: PathBuf,
        /// Switch settings (JSON); all switches closed and radialized if omitted
        #[arg(long, value_hint = ValueHint::FilePath)]
        settings: Option<PathBuf>,
        /// Solve on the aggregated network and map results back
        #[arg(long)]
        aggregate: bool,
        /// Output file for the flow report, or "-" for stdout
        #[arg(short, long, default_value = "-")]
        out: String,
    },
    /// Search for switch settings that minimize an objective
    Optimize {
        /// Network document (JSON)
        #[arg(long, value_hint = ValueHint::FilePath)]
        network: PathBuf,
        /// Demand periods (JSON)
        #[arg(long, value_hint = ValueHint::FilePath)]
        demands: PathBuf,
        /// Starting switch settings (JSON), repaired to radial if needed
        #[arg(long, value_hint = ValueHint::FilePath)]
        settings: Option<PathBuf>,
        /// Optimizer parameters (TOML)
        #[arg(long, value_hint = ValueHint::FilePath)]
        params: Option<PathBuf>,
        /// Override the algorithm named in the parameters
        #[arg(long, value_enum)]
        algorithm: Option<AlgorithmArg>,
        /// Quantity to minimize
        #[arg(long, value_enum, default_value_t = ObjectiveKind::Loss)]
        objective: ObjectiveKind,
        /// Weight of switching cost against energy loss for `combined`
        #[arg(long, default_value_t = 1.0)]
        switching_weight: f64,
        /// Only enforce radiality and transformer modes
        #[arg(long)]
        structural_only: bool,
        /// Optimize on the aggregated network
        #[arg(long)]
        aggregate: bool,
        /// Output file for the result, or "-" for stdout
        #[arg(short, long, default_value = "-")]
        out: String,
    },
    /// Print how far the network aggregates
    Aggregate {
        /// Network document (JSON)
        #[arg(long, value_hint = ValueHint::FilePath)]
        network: PathBuf,
        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Open and close switches until the configuration is radial and connected
    Radialize {
        /// Network document (JSON)
        #[arg(long, value_hint = ValueHint::FilePath)]
        network: PathBuf,
        /// Switch settings (JSON) to repair; all closed if omitted
        #[arg(long, value_hint = ValueHint::FilePath)]
        settings: Option<PathBuf>,
        /// Pick bridge lines at random with this seed instead of the first
        /// candidate on each cycle
        #[arg(long)]
        seed: Option<u64>,
        /// Output file for the settings, or "-" for stdout
        #[arg(short, long, default_value = "-")]
        out: String,
    },
    /// Graph utilities
    Graph {
        #[command(subcommand)]
        command: GraphCommands,
    },
    /// Check a network (and optionally demands and settings) for problems
    Validate {
        /// Network document (JSON)
        #[arg(long, value_hint = ValueHint::FilePath)]
        network: PathBuf,
        /// Demand periods (JSON)
        #[arg(long, value_hint = ValueHint::FilePath)]
        demands: Option<PathBuf>,
        /// Switch settings (JSON)
        #[arg(long, value_hint = ValueHint::FilePath)]
        settings: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum GraphCommands {
    /// Graph stats summary
    Stats {
        #[arg(long, value_hint = ValueHint::FilePath)]
        network: PathBuf,
    },
    /// Find islands under a switch configuration
    Islands {
        #[arg(long, value_hint = ValueHint::FilePath)]
        network: PathBuf,
        /// Switch settings (JSON); all closed if omitted
        #[arg(long, value_hint = ValueHint::FilePath)]
        settings: Option<PathBuf>,
        /// Emit the island of every bus
        #[arg(long)]
        emit: bool,
    },
    /// Export the network as Graphviz DOT
    Dot {
        #[arg(long, value_hint = ValueHint::FilePath)]
        network: PathBuf,
        /// Draw open switches dashed
        #[arg(long, value_hint = ValueHint::FilePath)]
        settings: Option<PathBuf>,
        /// Output file, or "-" for stdout
        #[arg(short, long, default_value = "-")]
        out: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlgorithmArg {
    /// One neighbourhood at a time
    Descent,
    /// Rounds of neighbourhoods scanned in parallel
    ParallelNhDescent,
}

impl From<AlgorithmArg> for feederopt_algo::Algorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::Descent => feederopt_algo::Algorithm::Descent,
            AlgorithmArg::ParallelNhDescent => feederopt_algo::Algorithm::ParallelNhDescent,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ObjectiveKind {
    /// Energy loss over all periods (Wh)
    #[default]
    Loss,
    /// Cost of switch operations, starting from the given settings
    SwitchingCost,
    /// Energy loss plus weighted switching cost
    Combined,
}

pub fn build_cli_command() -> clap::Command {
    Cli::command()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        build_cli_command().debug_assert();
    }

    #[test]
    fn test_parse_optimize_with_overrides() {
        let cli = Cli::try_parse_from([
            "feederopt",
            "--threads",
            "2",
            "optimize",
            "--network",
            "n.json",
            "--demands",
            "d.json",
            "--algorithm",
            "parallel-nh-descent",
            "--objective",
            "combined",
        ])
        .unwrap();
        assert_eq!(cli.threads, "2");
        match cli.command {
            Commands::Optimize {
                algorithm,
                objective,
                out,
                ..
            } => {
                assert_eq!(algorithm, Some(AlgorithmArg::ParallelNhDescent));
                assert_eq!(objective, ObjectiveKind::Combined);
                assert_eq!(out, "-");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
