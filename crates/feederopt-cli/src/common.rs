//! Loading of input documents and writing of results, shared by every
//! command.

use anyhow::{Context, Result};
use feederopt_core::io::{self, DemandsDocument, NetworkDocument, SettingsDocument};
use feederopt_core::{Network, PeriodData, SwitchSettings};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Output destination for results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDest {
    /// Write to a file path
    File(PathBuf),
    /// Write to stdout (specified as "-")
    Stdout,
}

impl OutputDest {
    /// Parse from a string argument. "-" means stdout, anything else is a file path.
    pub fn parse(s: &str) -> Self {
        if s == "-" {
            Self::Stdout
        } else {
            Self::File(PathBuf::from(s))
        }
    }

    pub fn is_stdout(&self) -> bool {
        matches!(self, Self::Stdout)
    }

    /// Write `text` followed by a newline.
    pub fn write_text(&self, text: &str) -> Result<()> {
        match self {
            Self::Stdout => {
                let mut stdout = std::io::stdout().lock();
                writeln!(stdout, "{text}")?;
            }
            Self::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                fs::write(path, format!("{text}\n"))
                    .with_context(|| format!("writing {}", path.display()))?;
            }
        }
        Ok(())
    }
}

/// Write `data` as pretty-printed JSON.
pub fn write_json<T: Serialize>(data: &T, dest: &OutputDest) -> Result<()> {
    let text = serde_json::to_string_pretty(data).context("serializing result to JSON")?;
    dest.write_text(&text)
}

pub fn load_network(path: &Path) -> Result<Arc<Network>> {
    let doc: NetworkDocument =
        io::load(path).with_context(|| format!("loading network {}", path.display()))?;
    let network = doc
        .build()
        .with_context(|| format!("building network from {}", path.display()))?;
    Ok(Arc::new(network))
}

pub fn load_periods(network: &Network, path: &Path) -> Result<Vec<PeriodData>> {
    let doc: DemandsDocument =
        io::load(path).with_context(|| format!("loading demands {}", path.display()))?;
    doc.to_period_data(network)
        .with_context(|| format!("reading demands from {}", path.display()))
}

/// Settings from `path`, or every switch closed.
pub fn load_settings(network: &Network, path: Option<&Path>) -> Result<SwitchSettings> {
    match path {
        Some(path) => {
            let doc: SettingsDocument =
                io::load(path).with_context(|| format!("loading settings {}", path.display()))?;
            doc.to_settings(network)
                .with_context(|| format!("reading settings from {}", path.display()))
        }
        None => Ok(SwitchSettings::all_closed(network)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_dest_parse() {
        assert!(OutputDest::parse("-").is_stdout());
        assert_eq!(
            OutputDest::parse("out/settings.json"),
            OutputDest::File(PathBuf::from("out/settings.json"))
        );
    }

    #[test]
    fn test_load_network_reports_path() {
        let err = load_network(Path::new("does/not/exist.json")).unwrap_err();
        assert!(format!("{err:#}").contains("does/not/exist.json"));
    }
}
