//! Single-threaded descent.

use super::neighbourhood::{best_move, NeighbourhoodSelector};
use super::{OptimizerParameters, OptimizerResult, SearchState, StopReason};
use crate::criteria::{ConstraintSet, Objective};
use crate::moves::Move;
use crate::solution::Solution;
use feederopt_core::LineId;
use tracing::debug;

/// Scan one neighbourhood at a time and apply its best move when the
/// objective gets worse by at most the acceptable setback.
///
/// Only a move that reaches a new best value counts as a success for the
/// selector. Worsening moves and the moves recovering from them do not, so
/// a positive setback cannot keep the search going forever. The search
/// never undoes its last move directly.
#[derive(Debug, Clone, Default)]
pub struct Descent {
    params: OptimizerParameters,
}

impl Descent {
    pub fn new(params: OptimizerParameters) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &OptimizerParameters {
        &self.params
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
        let mut last: Option<(usize, LineId, LineId)> = None;

        let stop = loop {
            if let Some(reason) = state.exhausted_budget() {
                break reason;
            }
            let Some(nh) = selector.next() else {
                break StopReason::LocalOptimum;
            };
            state.iterations += 1;

            let forbidden: Vec<_> = last.iter().map(|&(p, open, close)| (p, close, open)).collect();
            match best_move(&solution, &nh, objective, constraints, &forbidden) {
                Some(candidate) if candidate.delta <= self.params.acceptable_setback => {
                    let mv = candidate.mv;
                    let network = solution.network();
                    debug!(
                        period = mv.period(),
                        open = %network.line(mv.open()).name,
                        close = %network.line(mv.close()).name,
                        delta = candidate.delta,
                        "applying move"
                    );
                    mv.apply(&mut solution, true);
                    let improved = state.accept(&solution, mv.period(), candidate.delta);
                    last = Some((mv.period(), mv.open(), mv.close()));
                    selector.report(improved);
                }
                _ => selector.report(false),
            }
        };
        state.finish(stop)
    }
}
