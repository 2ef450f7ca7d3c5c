//! Neighbourhoods of swap moves and the order they are visited in.

use crate::criteria::{Constraint, ConstraintSet, Objective};
use crate::moves::{Move, SwapSwitchStatusMove};
use crate::solution::Solution;
use feederopt_core::{DirectedLink, LineId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Swap moves that close `switch_to_close` in `period` and open another
/// switch on the cycle this creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Neighbourhood {
    pub period: usize,
    pub switch_to_close: LineId,
}

impl Neighbourhood {
    pub fn new(period: usize, switch_to_close: LineId) -> Self {
        Self {
            period,
            switch_to_close,
        }
    }

    /// Moves of this neighbourhood whose target is radial and connected.
    ///
    /// Empty if the switch is closed in `solution`.
    pub fn moves(&self, solution: &Solution) -> Vec<SwapSwitchStatusMove> {
        let config = solution.configuration(self.period);
        let close = self.switch_to_close;
        let Some(cycle) = config.find_cycle_with(close) else {
            return Vec::new();
        };
        let network = config.network();
        cycle
            .iter()
            .filter_map(DirectedLink::line)
            .filter(|&open| {
                open != close && network.line(open).switchable && config.is_closed(open)
            })
            .filter(|&open| config.swapping_switches_uses_valid_transformer_modes(open, close))
            .map(|open| SwapSwitchStatusMove::new(solution, self.period, open, close))
            .filter(|mv| {
                let target = mv.target_configuration(solution);
                target.is_radial() && target.is_connected()
            })
            .collect()
    }
}

/// A scored move.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub mv: SwapSwitchStatusMove,
    pub delta: f64,
}

/// The legal move of `neighbourhood` with the lowest delta value.
///
/// `forbidden` lists (period, open, close) swaps to skip, used to keep the
/// search from undoing its latest moves.
pub fn best_move(
    solution: &Solution,
    neighbourhood: &Neighbourhood,
    objective: &dyn Objective,
    constraints: &ConstraintSet,
    forbidden: &[(usize, LineId, LineId)],
) -> Option<Candidate> {
    neighbourhood
        .moves(solution)
        .into_iter()
        .filter(|mv| !forbidden.contains(&(mv.period(), mv.open(), mv.close())))
        .filter(|mv| constraints.legal_move(solution, mv))
        .filter_map(|mv| {
            let delta = objective.delta_value(solution, &mv);
            delta.is_finite().then_some(Candidate { mv, delta })
        })
        .min_by(|a, b| a.delta.total_cmp(&b.delta))
}

/// Cycles through every (period, switchable line) pair.
///
/// The order is fixed; only the starting point is drawn from the seed. The
/// selector is exhausted once a full pass has gone by without a reported
/// success.
#[derive(Debug, Clone)]
pub struct NeighbourhoodSelector {
    neighbourhoods: Vec<Neighbourhood>,
    cursor: usize,
    without_success: usize,
}

impl NeighbourhoodSelector {
    pub fn new(solution: &Solution, seed: u64) -> Self {
        let switches: Vec<LineId> = solution
            .network()
            .switchable_lines()
            .map(|line| line.id)
            .collect();
        let neighbourhoods: Vec<Neighbourhood> = (0..solution.period_count())
            .flat_map(|period| {
                switches
                    .iter()
                    .map(move |&switch| Neighbourhood::new(period, switch))
            })
            .collect();
        let cursor = if neighbourhoods.is_empty() {
            0
        } else {
            StdRng::seed_from_u64(seed).gen_range(0..neighbourhoods.len())
        };
        Self {
            neighbourhoods,
            cursor,
            without_success: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.neighbourhoods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbourhoods.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.without_success >= self.neighbourhoods.len()
    }

    pub fn next(&mut self) -> Option<Neighbourhood> {
        if self.is_exhausted() {
            return None;
        }
        let nh = self.neighbourhoods[self.cursor];
        self.cursor = (self.cursor + 1) % self.neighbourhoods.len();
        Some(nh)
    }

    /// Up to `k` consecutive neighbourhoods, never more than one full pass.
    pub fn next_batch(&mut self, k: usize) -> Vec<Neighbourhood> {
        let k = k.min(self.neighbourhoods.len());
        let mut batch = Vec::with_capacity(k);
        while batch.len() < k {
            match self.next() {
                Some(nh) => batch.push(nh),
                None => break,
            }
        }
        batch
    }

    /// Record the outcome of a neighbourhood handed out by [`Self::next`].
    pub fn report(&mut self, success: bool) {
        if success {
            self.without_success = 0;
        } else {
            self.without_success += 1;
        }
    }
}
