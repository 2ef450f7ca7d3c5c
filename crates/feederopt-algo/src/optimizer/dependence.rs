//! Independence of moves scanned against the same solution.
//!
//! The parallel optimizer scores several neighbourhoods against one solution
//! and then commits the winners one after the other. A winner's legality and
//! delta value were computed before the other commits, so each one is checked
//! against what has been committed so far in the round:
//!
//! ```text
//!   shares a switch (same period, same line)   -> dependent
//!   different period from every committed move -> independent
//!   same period                                -> independent iff the current
//!                                                 configuration with the swap
//!                                                 is radial and connected
//! ```
//!
//! Radiality of two disjoint swaps cannot be decided switch by switch: two
//! swaps around overlapping cycles can each keep the tree intact on their own
//! and still cut a subtree off together. The same-period case therefore runs
//! the structural check on the configuration with the committed moves applied.
//! Whenever the rule cannot tell, the moves are treated as dependent.

use crate::moves::{Move, SwapSwitchStatusMove};
use crate::solution::Solution;
use tracing::trace;

/// Decides whether scanned moves stay valid across committed ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveDependenceRule;

impl MoveDependenceRule {
    pub fn new() -> Self {
        Self
    }

    /// True if `candidate` can be committed after `committed`.
    ///
    /// `solution` is the state with every move in `committed` applied.
    pub fn is_independent(
        &self,
        solution: &Solution,
        committed: &[SwapSwitchStatusMove],
        candidate: &SwapSwitchStatusMove,
    ) -> bool {
        let period = candidate.period();
        let switches = candidate.toggled_switches();
        let shares_switch = committed.iter().any(|m| {
            m.period() == period && m.toggled_switches().iter().any(|s| switches.contains(s))
        });
        if shares_switch {
            trace!(period, "candidate shares a switch with a committed move");
            return false;
        }
        if committed.iter().all(|m| m.period() != period) {
            return true;
        }

        let current = solution.configuration(period);
        if !current.is_closed(candidate.open()) || !current.is_open(candidate.close()) {
            return false;
        }
        let combined = current.with_swap(candidate.open(), candidate.close());
        combined.is_radial() && combined.is_connected()
    }

    /// `candidate` rebound to `solution`, ready to be re-scored.
    ///
    /// Returns `None` if the candidate is not independent of `committed`. When
    /// no committed move shares the candidate's period, the cached target and
    /// flow delta are still exact and carry over; otherwise they are dropped
    /// and recomputed on demand.
    pub fn update(
        &self,
        solution: &Solution,
        committed: &[SwapSwitchStatusMove],
        candidate: &SwapSwitchStatusMove,
    ) -> Option<SwapSwitchStatusMove> {
        if !self.is_independent(solution, committed, candidate) {
            return None;
        }
        let untouched = committed.iter().all(|m| m.period() != candidate.period());
        Some(candidate.rebind(solution, untouched))
    }
}
