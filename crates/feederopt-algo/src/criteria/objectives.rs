use super::Objective;
use crate::moves::{Move, SwapSwitchStatusMove};
use crate::solution::Solution;
use feederopt_core::{LineId, Network, SwitchSettings};
use std::collections::BTreeMap;

/// Energy lost in lines and transformers over all periods (Wh).
///
/// A failed flow has no loss to report, so a solution with a failed period
/// scores `f64::INFINITY`, and so does any move into or out of one.
#[derive(Debug, Clone, Default)]
pub struct TotalLossObjective;

impl TotalLossObjective {
    pub fn new() -> Self {
        Self
    }
}

impl Objective for TotalLossObjective {
    fn name(&self) -> &str {
        "total-loss"
    }

    fn value(&self, solution: &Solution) -> f64 {
        let context = solution.context();
        (0..solution.period_count())
            .map(|p| {
                let flow = solution.flow(p);
                if flow.is_failed() {
                    return f64::INFINITY;
                }
                let hours = context.periods[p].period.duration_hours();
                flow.total_loss(&context.network) * hours
            })
            .sum()
    }

    fn delta_value(&self, solution: &Solution, mv: &SwapSwitchStatusMove) -> f64 {
        let context = solution.context();
        let delta = mv.cached_power_flow_delta(solution);
        if delta.old().is_failed() || delta.new_flow().is_failed() {
            return f64::INFINITY;
        }
        let hours = context.periods[mv.period()].period.duration_hours();
        delta.loss_change(&context.network) * hours
    }
}

/// Cost of switch operations between consecutive periods.
///
/// With a reference configuration, changes in the first period relative to
/// the reference are charged too. The reference is stored by line name, so
/// the same objective applies to an aggregated network.
#[derive(Debug, Clone, Default)]
pub struct SwitchingCostObjective {
    reference: Option<BTreeMap<String, bool>>,
}

impl SwitchingCostObjective {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reference(mut self, network: &Network, settings: &SwitchSettings) -> Self {
        self.reference = Some(settings.to_named(network));
        self
    }

    /// State of `line` before `period`, if anything precedes it.
    fn state_before(&self, solution: &Solution, period: usize, line: LineId) -> Option<bool> {
        if period > 0 {
            Some(solution.settings(period - 1).is_open(line))
        } else {
            let name = &solution.network().line(line).name;
            self.reference.as_ref()?.get(name).copied()
        }
    }

    /// Number of operations of `line` adjacent to `period` if it is in `state`.
    fn operations(&self, solution: &Solution, period: usize, line: LineId, state: bool) -> u32 {
        let before = self.state_before(solution, period, line);
        let after = (period + 1 < solution.period_count())
            .then(|| solution.settings(period + 1).is_open(line));
        u32::from(before.is_some_and(|s| s != state)) + u32::from(after.is_some_and(|s| s != state))
    }
}

impl Objective for SwitchingCostObjective {
    fn name(&self) -> &str {
        "switching-cost"
    }

    fn value(&self, solution: &Solution) -> f64 {
        let network = solution.network();
        let mut total = 0.0;
        for period in 0..solution.period_count() {
            let settings = solution.settings(period);
            for line in network.switchable_lines() {
                let state = settings.is_open(line.id);
                if self
                    .state_before(solution, period, line.id)
                    .is_some_and(|s| s != state)
                {
                    total += line.switching_cost;
                }
            }
        }
        total
    }

    fn delta_value(&self, solution: &Solution, mv: &SwapSwitchStatusMove) -> f64 {
        let network = solution.network();
        let period = mv.period();
        [(mv.open(), true), (mv.close(), false)]
            .into_iter()
            .map(|(line, after)| {
                let before = solution.settings(period).is_open(line);
                let change = f64::from(self.operations(solution, period, line, after))
                    - f64::from(self.operations(solution, period, line, before));
                change * network.line(line).switching_cost
            })
            .sum()
    }
}

/// Weighted sum of objectives.
#[derive(Default)]
pub struct WeightedObjective {
    terms: Vec<(f64, Box<dyn Objective>)>,
}

impl WeightedObjective {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_term(mut self, weight: f64, objective: impl Objective + 'static) -> Self {
        self.terms.push((weight, Box::new(objective)));
        self
    }

    pub fn terms(&self) -> impl Iterator<Item = (f64, &dyn Objective)> + '_ {
        self.terms.iter().map(|(w, o)| (*w, o.as_ref()))
    }
}

impl Objective for WeightedObjective {
    fn name(&self) -> &str {
        "weighted"
    }

    fn value(&self, solution: &Solution) -> f64 {
        self.terms
            .iter()
            .map(|(w, o)| w * o.value(solution))
            .sum()
    }

    fn delta_value(&self, solution: &Solution, mv: &SwapSwitchStatusMove) -> f64 {
        self.terms
            .iter()
            .map(|(w, o)| w * o.delta_value(solution, mv))
            .sum()
    }
}
