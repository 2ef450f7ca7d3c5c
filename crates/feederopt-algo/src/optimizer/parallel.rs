//! Descent over several neighbourhoods at once.

use super::dependence::MoveDependenceRule;
use super::neighbourhood::{best_move, Candidate, NeighbourhoodSelector};
use super::{OptimizerParameters, OptimizerResult, SearchState, StopReason};
use crate::criteria::{Constraint, ConstraintSet, Objective};
use crate::moves::{Move, SwapSwitchStatusMove};
use crate::solution::Solution;
use feederopt_core::LineId;
use rayon::prelude::*;
use tracing::{debug, info};

/// Round-based descent that scans `k` neighbourhoods in parallel.
///
/// Each round takes the next `k = max(min_parallel_neighbourhoods, threads)`
/// neighbourhoods from the selector and scans them on the rayon pool against
/// the same solution. Since `k` grows with the pool, pin it through
/// `min_parallel_neighbourhoods` to get the same result on every host. The coordinator then walks the winners in
/// neighbourhood order: the first is applied as scanned, later ones go
/// through the [`MoveDependenceRule`] and are re-scored against the state the
/// earlier commits left behind. The outcome only depends on the order of the
/// neighbourhoods, never on thread scheduling.
#[derive(Debug, Clone, Default)]
pub struct ParallelNhDescent {
    params: OptimizerParameters,
    rule: MoveDependenceRule,
}

impl ParallelNhDescent {
    pub fn new(params: OptimizerParameters) -> Self {
        Self {
            params,
            rule: MoveDependenceRule::new(),
        }
    }

    pub fn params(&self) -> &OptimizerParameters {
        &self.params
    }

    /// Neighbourhoods scanned per round.
    pub fn round_size(&self) -> usize {
        self.params
            .min_parallel_neighbourhoods
            .max(rayon::current_num_threads())
            .max(1)
    }

    pub fn run(
        &self,
        start: Solution,
        objective: &dyn Objective,
        constraints: &ConstraintSet,
    ) -> OptimizerResult {
        let mut solution = start;
        let mut selector = NeighbourhoodSelector::new(&solution, self.params.seed);
        let mut state = SearchState::new(&solution, objective, &self.params);
        let k = self.round_size();
        let mut forbidden: Vec<(usize, LineId, LineId)> = Vec::new();
        let mut round = 0usize;

        let stop = loop {
            if let Some(reason) = state.exhausted_budget() {
                break reason;
            }
            let batch = selector.next_batch(k);
            if batch.is_empty() {
                break StopReason::LocalOptimum;
            }
            round += 1;
            state.iterations += batch.len();

            let scans: Vec<Option<Candidate>> = {
                let solution = &solution;
                let forbidden = forbidden.as_slice();
                batch
                    .par_iter()
                    .map(|nh| best_move(solution, nh, objective, constraints, forbidden))
                    .collect()
            };

            let mut committed: Vec<SwapSwitchStatusMove> = Vec::new();
            for scan in scans {
                let accepted = scan
                    .filter(|c| c.delta <= self.params.acceptable_setback)
                    .and_then(|c| self.revalidate(&solution, &committed, c, objective, constraints));
                let Some(candidate) = accepted else {
                    selector.report(false);
                    continue;
                };
                let mv = candidate.mv;
                mv.apply(&mut solution, true);
                let improved = state.accept(&solution, mv.period(), candidate.delta);
                selector.report(improved);
                committed.push(mv);
            }

            forbidden = committed
                .iter()
                .map(|mv| (mv.period(), mv.close(), mv.open()))
                .collect();
            info!(
                round,
                scanned = batch.len(),
                committed = committed.len(),
                value = state.current_value(),
                "round finished"
            );
        };
        state.finish(stop)
    }

    /// `candidate` as it stands after `committed`, if it is still acceptable.
    fn revalidate(
        &self,
        solution: &Solution,
        committed: &[SwapSwitchStatusMove],
        candidate: Candidate,
        objective: &dyn Objective,
        constraints: &ConstraintSet,
    ) -> Option<Candidate> {
        if committed.is_empty() {
            return Some(candidate);
        }
        let Some(mv) = self.rule.update(solution, committed, &candidate.mv) else {
            debug!(period = candidate.mv.period(), "dropping dependent move");
            return None;
        };
        if !constraints.legal_move(solution, &mv) {
            debug!(period = mv.period(), "dropping move made illegal by this round");
            return None;
        }
        let delta = objective.delta_value(solution, &mv);
        (delta.is_finite() && delta <= self.params.acceptable_setback)
            .then_some(Candidate { mv, delta })
    }
}
