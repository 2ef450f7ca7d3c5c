//! Radiality conflicts and their repair.
//!
//! A configuration is radial when the closed lines form a forest with one
//! provider per tree. This module finds the loops (and provider-to-provider
//! paths) that violate that, picks bridge lines to open, reconnects parts cut
//! off by open switches and repairs transformer hops that no mode supports.
//!
//! When several switchable lines could break a loop the choice is made by a
//! [`BridgePolicy`]: the first candidate along the loop, or a uniform draw
//! from a seeded generator so that different seeds give reproducibly
//! different starting points.

use crate::configuration::{DirectedLink, Link, MissingMode, NetworkConfiguration};
use crate::graph_utils::link_names;
use crate::{BusId, FeederError, FeederResult, LineId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use tracing::debug;

/// How a line is chosen when several candidates qualify.
#[derive(Debug, Clone, Default)]
pub enum BridgePolicy {
    /// Always take the first candidate in traversal order
    #[default]
    First,
    /// Draw uniformly from a seeded generator
    Seeded(StdRng),
}

impl BridgePolicy {
    pub fn seeded(seed: u64) -> Self {
        BridgePolicy::Seeded(StdRng::seed_from_u64(seed))
    }

    /// Pick one element of a non-empty slice.
    pub fn choose<T: Copy>(&mut self, candidates: &[T]) -> Option<T> {
        if candidates.is_empty() {
            return None;
        }
        match self {
            BridgePolicy::First => Some(candidates[0]),
            BridgePolicy::Seeded(rng) => Some(candidates[rng.gen_range(0..candidates.len())]),
        }
    }
}

/// A loop of closed links together with the lines that may break it.
#[derive(Debug, Clone, PartialEq)]
pub struct RadialityConflict {
    /// Ordered directed links; starts and ends at the same bus, or at two providers
    pub cycle: Vec<DirectedLink>,
    /// Closed switchable lines on the cycle, in cycle order
    pub candidates: Vec<LineId>,
    /// Preferred line to open
    pub bridge: LineId,
}

impl NetworkConfiguration {
    /// One loop or provider-to-provider path of closed links, if any.
    ///
    /// Fails with [`FeederError::UnbreakableCycle`] when the loop contains no
    /// switchable line, since then no configuration of this network is radial.
    pub fn find_radiality_conflict(&self) -> FeederResult<Option<RadialityConflict>> {
        let topology = self.topology();
        let Some(extra) = topology.extra_links().first().copied() else {
            return Ok(None);
        };
        let cycle = topology
            .cycle_closing(extra)
            .unwrap_or_else(|| vec![extra]);
        self.conflict_from_cycle(cycle).map(Some)
    }

    fn conflict_from_cycle(&self, cycle: Vec<DirectedLink>) -> FeederResult<RadialityConflict> {
        let network = self.network();
        let candidates: Vec<LineId> = cycle
            .iter()
            .filter_map(DirectedLink::line)
            .filter(|line| network.line(*line).switchable && self.is_closed(*line))
            .collect();
        match candidates.first() {
            Some(bridge) => Ok(RadialityConflict {
                bridge: *bridge,
                cycle,
                candidates,
            }),
            None => Err(FeederError::UnbreakableCycle {
                lines: link_names(network, cycle.iter().map(|step| step.link)),
            }),
        }
    }

    /// Open bridge lines until radial, then reconnect isolated parts.
    ///
    /// Fails when a loop has no switchable line or when some bus cannot be
    /// connected to any provider.
    pub fn make_radial(&mut self, policy: &mut BridgePolicy) -> FeederResult<()> {
        self.break_cycles(policy)?;
        self.reconnect(policy, None, false)?;
        // reconnection through transformer stars can close a loop again
        if !self.is_radial() {
            self.break_cycles(policy)?;
            self.reconnect(policy, None, false)?;
        }
        Ok(())
    }

    fn break_cycles(&mut self, policy: &mut BridgePolicy) -> FeederResult<()> {
        let limit = self.network().line_count() + 1;
        for _ in 0..limit {
            let Some(conflict) = self.find_radiality_conflict()? else {
                return Ok(());
            };
            let bridge = policy
                .choose(&conflict.candidates)
                .unwrap_or(conflict.bridge);
            debug!(
                line = %self.network().line(bridge).name,
                cycle_len = conflict.cycle.len(),
                "opening bridge line"
            );
            self.set_switch(bridge, true);
        }
        Err(FeederError::InvalidConfiguration(
            "opening bridge lines did not remove all loops".to_string(),
        ))
    }

    /// Close open switches joining disconnected buses to provider trees.
    ///
    /// `excluded` is never closed. With `mode_aware`, among the joining
    /// switches the one leaving the fewest transformer hops without a mode
    /// is preferred.
    fn reconnect(
        &mut self,
        policy: &mut BridgePolicy,
        excluded: Option<LineId>,
        mode_aware: bool,
    ) -> FeederResult<()> {
        let limit = self.network().bus_count() + 1;
        for _ in 0..limit {
            if self.is_connected() {
                return Ok(());
            }
            let joining = self.joining_switches(excluded);
            let choice = if mode_aware && joining.len() > 1 {
                let scored: Vec<(usize, LineId)> = joining
                    .iter()
                    .map(|line| {
                        let mut trial = self.clone();
                        trial.set_switch(*line, false);
                        (trial.topology().missing_modes().len(), *line)
                    })
                    .collect();
                let best = scored.iter().map(|(score, _)| *score).min().unwrap_or(0);
                let ties: Vec<LineId> = scored
                    .into_iter()
                    .filter(|(score, _)| *score == best)
                    .map(|(_, line)| line)
                    .collect();
                policy.choose(&ties)
            } else {
                policy.choose(&joining)
            };
            let Some(line) = choice else {
                let bus = self.disconnected_buses()[0];
                return Err(FeederError::UnreachableBus(
                    self.network().bus(bus).name.clone(),
                ));
            };
            debug!(line = %self.network().line(line).name, "closing switch to reconnect");
            self.set_switch(line, false);
        }
        Err(FeederError::InvalidConfiguration(
            "reconnecting isolated buses did not terminate".to_string(),
        ))
    }

    /// Open switches with exactly one end reached by a provider.
    fn joining_switches(&self, excluded: Option<LineId>) -> Vec<LineId> {
        let topology = self.topology();
        let network = self.network();
        self.settings()
            .open_switches()
            .filter(|line| Some(*line) != excluded)
            .filter(|line| {
                let l = network.line(*line);
                topology.is_reached(l.from) != topology.is_reached(l.to)
            })
            .collect()
    }

    /// True if swapping `open` and `close` introduces no transformer hop
    /// without a mode.
    pub fn swapping_switches_uses_valid_transformer_modes(
        &self,
        open: LineId,
        close: LineId,
    ) -> bool {
        let before: HashSet<MissingMode> =
            self.topology().missing_modes().iter().copied().collect();
        let after = self.with_swap(open, close);
        after
            .topology()
            .missing_modes()
            .iter()
            .all(|m| before.contains(m))
    }

    /// Make radial, then repair transformer hops that no mode supports.
    ///
    /// For every offending hop, switches upstream of the input terminal and
    /// in the subtree below the output terminal are tried one at a time: the
    /// switch is opened, the cut-off part is reconnected elsewhere, and the
    /// trial is kept if it stays radial and connected with fewer offending
    /// hops. Fails with [`FeederError::MissingTransformerMode`] when no trial
    /// helps.
    pub fn make_radial_flow_possible(&mut self, policy: &mut BridgePolicy) -> FeederResult<()> {
        self.make_radial(policy)?;
        loop {
            let Some(missing) = self.topology().missing_modes().first().copied() else {
                return Ok(());
            };
            let current = self.topology().missing_modes().len();
            let mut repaired = None;
            for candidate in self.mode_repair_candidates(missing) {
                let mut trial = self.clone();
                trial.set_switch(candidate, true);
                if trial.reconnect(policy, Some(candidate), true).is_err() {
                    continue;
                }
                if trial.is_radial()
                    && trial.is_connected()
                    && trial.topology().missing_modes().len() < current
                {
                    debug!(
                        line = %self.network().line(candidate).name,
                        "opened switch to repair transformer mode"
                    );
                    repaired = Some(trial);
                    break;
                }
            }
            match repaired {
                Some(trial) => *self = trial,
                None => {
                    let network = self.network();
                    return Err(FeederError::MissingTransformerMode {
                        transformer: network.transformer(missing.transformer).name.clone(),
                        terminal: network.bus(missing.output).name.clone(),
                    });
                }
            }
        }
    }

    fn mode_repair_candidates(&self, missing: MissingMode) -> Vec<LineId> {
        let topology = self.topology();
        let network = self.network();
        let mut candidates: Vec<LineId> = topology
            .path_from_root(missing.input)
            .iter()
            .filter_map(DirectedLink::line)
            .collect();
        for bus in topology.subtree(missing.output) {
            candidates.extend(topology.downstream_links(bus).iter().filter_map(DirectedLink::line));
        }
        candidates.retain(|line| network.line(*line).switchable);
        candidates
    }

    /// The loop (or provider-to-provider path) that closing `switch` would
    /// create, starting and ending at the same bus or at two providers.
    ///
    /// Returns `None` if `switch` is already closed or closing it only
    /// attaches an isolated part.
    pub fn find_cycle_with(&self, switch: LineId) -> Option<Vec<DirectedLink>> {
        if self.is_closed(switch) {
            return None;
        }
        let line = self.network().line(switch);
        self.topology().cycle_closing(DirectedLink {
            link: Link::Line(switch),
            from: line.from,
            to: line.to,
        })
    }

    /// Buses in the tree below `bus`, including `bus`.
    pub fn buses_below(&self, bus: BusId) -> Vec<BusId> {
        self.topology().subtree(bus)
    }
}
