//! Open/closed state of the switchable lines of a network.

use crate::{FeederError, FeederResult, LineId, Network};
use std::collections::BTreeMap;

/// Open/closed assignment over the switchable lines of one network.
///
/// Only switchable lines have an entry; every other line is implicitly
/// closed. Two settings compare equal when their mappings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SwitchSettings {
    open: BTreeMap<LineId, bool>,
}

impl SwitchSettings {
    /// Every switchable line of `network` closed.
    pub fn all_closed(network: &Network) -> Self {
        Self {
            open: network.switchable_lines().map(|l| (l.id, false)).collect(),
        }
    }

    /// True if `line` is a switch in the open state.
    pub fn is_open(&self, line: LineId) -> bool {
        self.open.get(&line).copied().unwrap_or(false)
    }

    pub fn is_closed(&self, line: LineId) -> bool {
        !self.is_open(line)
    }

    pub fn is_switch(&self, line: LineId) -> bool {
        self.open.contains_key(&line)
    }

    /// Set the state of a switch.
    ///
    /// # Panics
    ///
    /// If `line` is not switchable in the network these settings belong to.
    pub fn set_switch(&mut self, line: LineId, open: bool) {
        match self.open.get_mut(&line) {
            Some(state) => *state = open,
            None => panic!("line {} is not switchable", line.value()),
        }
    }

    pub fn switch_count(&self) -> usize {
        self.open.len()
    }

    /// All switches with their state, in line order.
    pub fn switches(&self) -> impl Iterator<Item = (LineId, bool)> + '_ {
        self.open.iter().map(|(line, open)| (*line, *open))
    }

    pub fn open_switches(&self) -> impl Iterator<Item = LineId> + '_ {
        self.switches().filter(|(_, open)| *open).map(|(line, _)| line)
    }

    pub fn closed_switches(&self) -> impl Iterator<Item = LineId> + '_ {
        self.switches().filter(|(_, open)| !*open).map(|(line, _)| line)
    }

    /// Switches whose state differs between `self` and `other`.
    pub fn differences(&self, other: &SwitchSettings) -> Vec<LineId> {
        self.switches()
            .filter(|(line, open)| other.is_open(*line) != *open)
            .map(|(line, _)| line)
            .collect()
    }

    /// Build settings from an external `line name -> open` map.
    ///
    /// Every switchable line must have an entry and no other line may have
    /// one. All offending names are reported together.
    pub fn from_named(network: &Network, named: &BTreeMap<String, bool>) -> FeederResult<Self> {
        let mut settings = Self::all_closed(network);
        let mut unknown = Vec::new();
        let mut not_switchable = Vec::new();

        for (name, open) in named {
            match network.line_by_name(name) {
                None => unknown.push(name.clone()),
                Some(id) if !network.line(id).switchable => not_switchable.push(name.clone()),
                Some(id) => settings.set_switch(id, *open),
            }
        }

        let missing: Vec<String> = network
            .switchable_lines()
            .filter(|l| !named.contains_key(&l.name))
            .map(|l| l.name.clone())
            .collect();

        let mut problems = Vec::new();
        if !unknown.is_empty() {
            problems.push(format!("unknown lines: {}", unknown.join(", ")));
        }
        if !not_switchable.is_empty() {
            problems.push(format!(
                "entries for non-switchable lines: {}",
                not_switchable.join(", ")
            ));
        }
        if !missing.is_empty() {
            problems.push(format!(
                "missing entries for switchable lines: {}",
                missing.join(", ")
            ));
        }
        if !problems.is_empty() {
            return Err(FeederError::InvalidConfiguration(problems.join("; ")));
        }
        Ok(settings)
    }

    /// External `line name -> open` representation.
    pub fn to_named(&self, network: &Network) -> BTreeMap<String, bool> {
        self.switches()
            .map(|(line, open)| (network.line(line).name.clone(), open))
            .collect()
    }
}
