pub mod cli;
pub mod common;

pub use cli::{build_cli_command, AlgorithmArg, Cli, Commands, GraphCommands, ObjectiveKind};
