//! # Local-search switch optimization
//!
//! Both optimizers walk the space of radial configurations with swap moves:
//! close an open switch, open a switch on the cycle this creates. A
//! neighbourhood is the set of such swaps for one (period, switch to close)
//! pair; a [`NeighbourhoodSelector`] visits all of them in a fixed cyclic
//! order and ends the search after a full pass without improvement.
//!
//! ```text
//!   Descent                         ParallelNhDescent
//!   ───────                         ─────────────────
//!   next neighbourhood              next k neighbourhoods
//!        │                               │  rayon fan-out, one scan each
//!   best legal move                 best legal move per neighbourhood
//!        │                               │  fan-in in neighbourhood order
//!   delta <= setback? apply         MoveDependenceRule against the moves
//!        │                          committed this round, re-score, apply
//!        └── repeat ◄───────────────────┘
//! ```
//!
//! The solution is only read during scans and only written by the
//! coordinating thread between them. Budgets (iterations, wall clock) are
//! checked between steps, so a scan in flight always completes and the
//! returned solution is always radial.
//!
//! ## Aggregated search
//!
//! [`optimize_aggregated`] runs the same search on the aggregate network,
//! where series and parallel runs of plain lines have been merged, and maps
//! the resulting switch settings back onto the original network.
//!
//! ## References
//!
//! - Merlin, A., Back, H. (1975). "Search for a minimal-loss operating
//!   spanning tree configuration in an urban power distribution system."
//!   *Proc. 5th Power System Computation Conference*.
//! - Civanlar, S., Grainger, J. J., Yin, H., Lee, S. S. H. (1988).
//!   "Distribution feeder reconfiguration for loss reduction."
//!   *IEEE Trans. Power Delivery*, 3(3), 1217-1223.

pub mod dependence;
pub mod descent;
pub mod neighbourhood;
pub mod parallel;

pub use dependence::MoveDependenceRule;
pub use descent::Descent;
pub use neighbourhood::{best_move, Candidate, Neighbourhood, NeighbourhoodSelector};
pub use parallel::ParallelNhDescent;

use crate::criteria::{ConstraintSet, Objective};
use crate::solution::{ProblemContext, Solution};
use feederopt_core::{FeederError, NetworkAggregation, PeriodData, SwitchSettings};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use web_time::Instant;

/// A value must undercut the best one by more than this to count as an
/// improvement.
pub const IMPROVEMENT_EPS: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("invalid optimizer parameters: {0}")]
    InvalidParameters(String),

    #[error("start solution is not radial and connected in period {period}")]
    NotRadial { period: usize },

    #[error(transparent)]
    Feeder(#[from] FeederError),
}

/// Search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    #[default]
    Descent,
    ParallelNhDescent,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Descent => write!(f, "descent"),
            Algorithm::ParallelNhDescent => write!(f, "parallel-nh-descent"),
        }
    }
}

/// Optimizer options, usually read from a TOML file.
///
/// ```toml
/// algorithm = "parallel-nh-descent"
/// acceptable_setback = 0.0
/// min_parallel_neighbourhoods = 8
/// max_iterations = 5000
/// time_budget_secs = 30.0
/// seed = 42
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerParameters {
    pub algorithm: Algorithm,
    /// Largest objective increase a single accepted move may cause
    pub acceptable_setback: f64,
    /// Lower bound on neighbourhoods scanned per parallel round.
    ///
    /// A round scans `max(min_parallel_neighbourhoods, rayon threads)`
    /// neighbourhoods, so parallel results only stay the same across hosts
    /// when this is at least the size of the largest pool used.
    pub min_parallel_neighbourhoods: usize,
    /// Neighbourhood scans before the search stops
    pub max_iterations: usize,
    /// Wall-clock budget in seconds
    pub time_budget_secs: Option<f64>,
    /// Seeds the selector's starting neighbourhood
    pub seed: u64,
}

impl Default for OptimizerParameters {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Descent,
            acceptable_setback: 0.0,
            min_parallel_neighbourhoods: 4,
            max_iterations: 10_000,
            time_budget_secs: None,
            seed: 0,
        }
    }
}

impl OptimizerParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_acceptable_setback(mut self, setback: f64) -> Self {
        self.acceptable_setback = setback;
        self
    }

    pub fn with_min_parallel_neighbourhoods(mut self, count: usize) -> Self {
        self.min_parallel_neighbourhoods = count;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_time_budget_secs(mut self, secs: f64) -> Self {
        self.time_budget_secs = Some(secs);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<(), OptimizerError> {
        if !self.acceptable_setback.is_finite() || self.acceptable_setback < 0.0 {
            return Err(OptimizerError::InvalidParameters(format!(
                "acceptable_setback must be a non-negative number, got {}",
                self.acceptable_setback
            )));
        }
        if self.min_parallel_neighbourhoods == 0 {
            return Err(OptimizerError::InvalidParameters(
                "min_parallel_neighbourhoods must be at least 1".into(),
            ));
        }
        if let Some(secs) = self.time_budget_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(OptimizerError::InvalidParameters(format!(
                    "time_budget_secs must be positive, got {secs}"
                )));
            }
        }
        Ok(())
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, OptimizerError> {
        let params: Self = toml::from_str(contents)
            .map_err(|e| OptimizerError::InvalidParameters(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, OptimizerError> {
        let contents = std::fs::read_to_string(path).map_err(FeederError::from)?;
        Self::from_toml_str(&contents)
    }
}

/// Why the search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A full pass over the neighbourhoods found no improvement
    LocalOptimum,
    IterationLimit,
    TimeBudget,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::LocalOptimum => write!(f, "local optimum"),
            StopReason::IterationLimit => write!(f, "iteration limit"),
            StopReason::TimeBudget => write!(f, "time budget"),
        }
    }
}

#[derive(Debug)]
pub struct OptimizerResult {
    /// Best solution found
    pub solution: Solution,
    /// Objective value of `solution`
    pub value: f64,
    /// Neighbourhood scans performed
    pub iterations: usize,
    pub accepted_moves: usize,
    pub elapsed: Duration,
    pub stop_reason: StopReason,
}

/// Bookkeeping shared by both optimizers.
pub(crate) struct SearchState<'a> {
    objective: &'a dyn Objective,
    params: &'a OptimizerParameters,
    started: Instant,
    pub(crate) iterations: usize,
    accepted_moves: usize,
    current_value: f64,
    best: Solution,
    best_value: f64,
}

impl<'a> SearchState<'a> {
    pub(crate) fn new(
        start: &Solution,
        objective: &'a dyn Objective,
        params: &'a OptimizerParameters,
    ) -> Self {
        let value = objective.value(start);
        Self {
            objective,
            params,
            started: Instant::now(),
            iterations: 0,
            accepted_moves: 0,
            current_value: value,
            best: start.clone(),
            best_value: value,
        }
    }

    pub(crate) fn current_value(&self) -> f64 {
        self.current_value
    }

    /// The budget that ran out, if any.
    pub(crate) fn exhausted_budget(&self) -> Option<StopReason> {
        if self.iterations >= self.params.max_iterations {
            return Some(StopReason::IterationLimit);
        }
        match self.params.time_budget_secs {
            Some(secs) if self.started.elapsed().as_secs_f64() >= secs => {
                Some(StopReason::TimeBudget)
            }
            _ => None,
        }
    }

    /// Record a move applied to `solution` in `period`.
    ///
    /// Returns true if the move reached a new best value.
    pub(crate) fn accept(&mut self, solution: &Solution, period: usize, delta: f64) -> bool {
        self.accepted_moves += 1;
        self.current_value += delta;
        let flow = solution.flow(period);
        if !flow.is_exact() {
            warn!(
                period,
                status = %flow.status,
                detail = %flow.status_detail,
                "accepted configuration has a non-exact flow"
            );
        }
        if self.current_value < self.best_value - IMPROVEMENT_EPS {
            self.best = solution.clone();
            self.best_value = self.current_value;
            true
        } else {
            false
        }
    }

    pub(crate) fn finish(self, stop_reason: StopReason) -> OptimizerResult {
        let value = self.objective.value(&self.best);
        let elapsed = self.started.elapsed();
        info!(
            objective = self.objective.name(),
            value,
            iterations = self.iterations,
            accepted_moves = self.accepted_moves,
            elapsed_ms = elapsed.as_millis() as u64,
            stop = %stop_reason,
            "search finished"
        );
        OptimizerResult {
            solution: self.best,
            value,
            iterations: self.iterations,
            accepted_moves: self.accepted_moves,
            elapsed,
            stop_reason,
        }
    }
}

/// Improve `start` with the algorithm named in `params`.
///
/// `start` must be radial and connected in every period.
pub fn optimize(
    start: Solution,
    objective: &dyn Objective,
    constraints: &ConstraintSet,
    params: &OptimizerParameters,
) -> Result<OptimizerResult, OptimizerError> {
    params.validate()?;
    if let Some(period) = (0..start.period_count()).find(|&p| {
        let config = start.configuration(p);
        !(config.is_radial() && config.is_connected())
    }) {
        return Err(OptimizerError::NotRadial { period });
    }
    let violated = constraints.violated(&start);
    if !violated.is_empty() {
        warn!(constraints = ?violated, "start solution violates constraints");
    }
    info!(
        algorithm = %params.algorithm,
        periods = start.period_count(),
        switches = start.network().switchable_lines().count(),
        "starting search"
    );
    let result = match params.algorithm {
        Algorithm::Descent => Descent::new(params.clone()).run(start, objective, constraints),
        Algorithm::ParallelNhDescent => {
            ParallelNhDescent::new(params.clone()).run(start, objective, constraints)
        }
    };
    Ok(result)
}

/// Optimize on the aggregate of the context's network.
///
/// `start` is used in every period and supplies the state of switches the
/// aggregation drops. The result's solution lives on the original network
/// and its value is evaluated there.
pub fn optimize_aggregated(
    context: &Arc<ProblemContext>,
    start: &SwitchSettings,
    objective: &dyn Objective,
    constraints: &ConstraintSet,
    params: &OptimizerParameters,
) -> Result<OptimizerResult, OptimizerError> {
    let aggregation = NetworkAggregation::aggregate(&context.network)?;
    let aggregate_network = aggregation.aggregate_network().clone();
    debug!(
        buses = aggregate_network.bus_count(),
        lines = aggregate_network.line_count(),
        original_buses = context.network.bus_count(),
        original_lines = context.network.line_count(),
        "aggregated network"
    );
    let periods = context
        .periods
        .iter()
        .map(|data| PeriodData {
            period: data.period.clone(),
            demands: data.demands.remap(|bus| aggregation.aggregate_bus(bus)),
        })
        .collect();
    let aggregate_context = Arc::new(ProblemContext::new(
        aggregate_network,
        periods,
        context.flow_provider.clone(),
    )?);
    let aggregate_start = Solution::from_settings(
        aggregate_context,
        &aggregation.map_settings_to_aggregate(start),
    )?;

    let OptimizerResult {
        solution: aggregate_solution,
        iterations,
        accepted_moves,
        elapsed,
        stop_reason,
        ..
    } = optimize(aggregate_start, objective, constraints, params)?;

    let settings = aggregate_solution
        .all_settings()
        .iter()
        .map(|s| aggregation.map_settings_to_original(s, start))
        .collect();
    let solution = Solution::new(context.clone(), settings)?;
    let value = objective.value(&solution);
    Ok(OptimizerResult {
        solution,
        value,
        iterations,
        accepted_moves,
        elapsed,
        stop_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_from_toml() {
        let params = OptimizerParameters::from_toml_str(
            r#"
            algorithm = "parallel-nh-descent"
            min_parallel_neighbourhoods = 8
            time_budget_secs = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(params.algorithm, Algorithm::ParallelNhDescent);
        assert_eq!(params.min_parallel_neighbourhoods, 8);
        assert_eq!(params.time_budget_secs, Some(2.5));
        assert_eq!(params.max_iterations, OptimizerParameters::default().max_iterations);
    }

    #[test]
    fn test_parameters_reject_unknown_and_invalid() {
        assert!(matches!(
            OptimizerParameters::from_toml_str("tabu_tenure = 3"),
            Err(OptimizerError::InvalidParameters(_))
        ));
        assert!(matches!(
            OptimizerParameters::from_toml_str("acceptable_setback = -1.0"),
            Err(OptimizerError::InvalidParameters(_))
        ));
        assert!(OptimizerParameters::new()
            .with_min_parallel_neighbourhoods(0)
            .validate()
            .is_err());
        assert!(OptimizerParameters::new()
            .with_time_budget_secs(0.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(Algorithm::ParallelNhDescent.to_string(), "parallel-nh-descent");
        assert_eq!(
            serde_json::to_string(&StopReason::LocalOptimum).unwrap(),
            "\"local_optimum\""
        );
    }
}
