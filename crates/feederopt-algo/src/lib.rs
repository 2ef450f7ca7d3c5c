//! # feederopt-algo: Switch Optimization for Distribution Grids
//!
//! Searches the switch settings of a distribution network for a radial
//! configuration, one per demand period, that minimizes an objective such as
//! energy loss or switching cost under operational constraints.
//!
//! ## Power Flow
//!
//! [`power_flow::IteratedDistFlow`] solves radial configurations with a
//! backward/forward sweep. Results carry a typed status instead of failing:
//!
//! | Status | Meaning |
//! |--------|---------|
//! | [`FlowStatus::Exact`] | Converged within tolerance |
//! | [`FlowStatus::Approximate`] | Stopped early (iteration limit or a limit policy) |
//! | [`FlowStatus::Failed`] | Diverged or unsolvable; no usable voltages |
//!
//! [`power_flow::AggregateFlowProvider`] solves on the aggregated network and
//! maps voltages and currents back onto every original line.
//!
//! ## Solutions, Moves and Criteria
//!
//! - [`Solution`]: one configuration per period with lazily computed flows
//! - [`SwapSwitchStatusMove`]: open one switch and close another in a period,
//!   caching its target configuration and flow delta
//! - [`criteria`]: objectives and constraints, each with an incremental
//!   form evaluated on moves
//!
//! ## Optimizers
//!
//! | Algorithm | Description |
//! |-----------|-------------|
//! | [`Descent`] | One neighbourhood at a time, optional acceptable setback |
//! | [`ParallelNhDescent`] | Rounds of neighbourhoods scanned on the rayon pool |
//!
//! ## Example
//!
//! ```ignore
//! use feederopt_algo::*;
//! use std::sync::Arc;
//!
//! let context = Arc::new(ProblemContext::new(
//!     network,
//!     periods,
//!     Arc::new(IteratedDistFlow::new()),
//! )?);
//! let start = Solution::radial_start(context, None, &mut BridgePolicy::seeded(7))?;
//!
//! let params = OptimizerParameters::new().with_algorithm(Algorithm::ParallelNhDescent);
//! let result = optimize(start, &TotalLossObjective::new(), &ConstraintSet::standard(), &params)?;
//! println!("loss: {:.1} Wh after {} moves", result.value, result.accepted_moves);
//! ```

pub mod criteria;
pub mod moves;
pub mod optimizer;
pub mod power_flow;
pub mod solution;

pub use criteria::{
    Constraint, ConstraintSet, ConsumerVoltageConstraint, FlowConvergenceConstraint,
    LineCapacityConstraint, Objective, ProviderCapacityConstraint, RadialityConstraint,
    SwitchingCostObjective, TotalLossObjective, TransformerModeConstraint, WeightedObjective,
};
pub use moves::{Move, SwapSwitchStatusMove};
pub use optimizer::{
    optimize, optimize_aggregated, Algorithm, Descent, MoveDependenceRule, Neighbourhood,
    NeighbourhoodSelector, OptimizerError, OptimizerParameters, OptimizerResult,
    ParallelNhDescent, StopReason,
};
pub use power_flow::{
    AggregateFlowProvider, DistFlowSettings, FlowError, FlowProvider, FlowResult, FlowStatus,
    IteratedDistFlow, PowerFlowDelta,
};
pub use solution::{ProblemContext, Solution, SolutionId};
