//! Objectives and constraints over solutions.
//!
//! Both come in an absolute and an incremental form. For every move `m`
//! generated for solution `s`:
//!
//! ```text
//! objective.delta_value(s, m)   == objective.value(s after m) - objective.value(s)
//! constraint.legal_move(s, m)   == constraint.is_satisfied(s after m)
//! ```
//!
//! The incremental form only evaluates the move's period, on the move's
//! cached target configuration and flow delta. Constraint verdicts for the
//! other periods are remembered on the solution until those periods change.

pub mod constraints;
pub mod objectives;

pub use constraints::{
    ConsumerVoltageConstraint, ConstraintSet, FlowConvergenceConstraint, LineCapacityConstraint,
    ProviderCapacityConstraint, RadialityConstraint, TransformerModeConstraint,
};
pub use objectives::{SwitchingCostObjective, TotalLossObjective, WeightedObjective};

use crate::moves::SwapSwitchStatusMove;
use crate::solution::Solution;

/// A quantity to minimize.
pub trait Objective: Send + Sync {
    fn name(&self) -> &str;

    fn value(&self, solution: &Solution) -> f64;

    /// Change of [`Objective::value`] caused by applying `mv`.
    fn delta_value(&self, solution: &Solution, mv: &SwapSwitchStatusMove) -> f64;
}

/// A condition every accepted solution must satisfy.
pub trait Constraint: Send + Sync {
    fn name(&self) -> &str;

    fn is_satisfied(&self, solution: &Solution) -> bool;

    /// True if the solution satisfies the constraint after applying `mv`.
    fn legal_move(&self, solution: &Solution, mv: &SwapSwitchStatusMove) -> bool;
}
