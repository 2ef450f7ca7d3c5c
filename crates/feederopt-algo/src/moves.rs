//! Moves: atomic edits of a solution's switch settings.
//!
//! The canonical move opens one switch and closes another in a single period.
//! Chosen around the cycle that closing the switch would create, the swap
//! keeps the configuration radial. A move is bound to the solution it was
//! generated for and caches what evaluating it costs: the target
//! configuration and the change of power flow.

use crate::power_flow::PowerFlowDelta;
use crate::solution::{Solution, SolutionId};
use feederopt_core::{LineId, NetworkConfiguration};
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// An edit of a solution's switch settings.
pub trait Move {
    fn solution_id(&self) -> SolutionId;

    fn period(&self) -> usize;

    /// Switches whose state the move changes.
    fn toggled_switches(&self) -> Vec<LineId>;

    /// Apply the move.
    ///
    /// Without `propagate` only the switch settings change and the period's
    /// flow is dropped, to be recomputed on demand. With `propagate` the flow
    /// is brought up to date as well.
    ///
    /// # Panics
    ///
    /// If `solution` is not the solution the move was generated for, or if
    /// the switches are no longer in the state the move expects.
    fn apply(&self, solution: &mut Solution, propagate: bool);

    /// The move undoing this one.
    fn reverse(&self) -> Self
    where
        Self: Sized;
}

/// Open `open` and close `close` in one period.
#[derive(Debug, Clone)]
pub struct SwapSwitchStatusMove {
    solution_id: SolutionId,
    period: usize,
    open: LineId,
    close: LineId,
    target: OnceCell<NetworkConfiguration>,
    flow_delta: OnceCell<Arc<PowerFlowDelta>>,
}

impl SwapSwitchStatusMove {
    pub fn new(solution: &Solution, period: usize, open: LineId, close: LineId) -> Self {
        debug_assert!(period < solution.period_count());
        Self {
            solution_id: solution.id(),
            period,
            open,
            close,
            target: OnceCell::new(),
            flow_delta: OnceCell::new(),
        }
    }

    pub fn open(&self) -> LineId {
        self.open
    }

    pub fn close(&self) -> LineId {
        self.close
    }

    /// The same swap bound to `solution`.
    ///
    /// With `keep_caches` the cached target and flow delta carry over, which
    /// is only sound while the move's period is unchanged.
    pub(crate) fn rebind(&self, solution: &Solution, keep_caches: bool) -> Self {
        let mut mv = Self::new(solution, self.period, self.open, self.close);
        if keep_caches {
            mv.target = self.target.clone();
            mv.flow_delta = self.flow_delta.clone();
        }
        mv
    }

    fn check_owner(&self, solution: &Solution) {
        assert_eq!(
            solution.id(),
            self.solution_id,
            "move used with a solution it was not generated for"
        );
    }

    /// The configuration of the move's period after the swap.
    pub fn target_configuration(&self, solution: &Solution) -> &NetworkConfiguration {
        self.check_owner(solution);
        self.target.get_or_init(|| {
            solution
                .configuration(self.period)
                .with_swap(self.open, self.close)
        })
    }

    /// Flow change caused by the move, computed once.
    ///
    /// The new flow is solved starting from the solution's current flow, and
    /// only the provider trees the swap touches are compared.
    ///
    /// # Panics
    ///
    /// If the target configuration is not radial.
    pub fn cached_power_flow_delta(&self, solution: &Solution) -> Arc<PowerFlowDelta> {
        self.check_owner(solution);
        self.flow_delta
            .get_or_init(|| {
                let context = solution.context();
                let old = solution.flow(self.period);
                let new = context.flow_provider.compute_flow_from(
                    self.target_configuration(solution),
                    &context.periods[self.period].demands,
                    &old,
                );
                Arc::new(PowerFlowDelta::for_swap(
                    solution.configuration(self.period),
                    old,
                    Arc::new(new),
                    self.open,
                    self.close,
                ))
            })
            .clone()
    }
}

impl Move for SwapSwitchStatusMove {
    fn solution_id(&self) -> SolutionId {
        self.solution_id
    }

    fn period(&self) -> usize {
        self.period
    }

    fn toggled_switches(&self) -> Vec<LineId> {
        vec![self.open, self.close]
    }

    fn apply(&self, solution: &mut Solution, propagate: bool) {
        self.check_owner(solution);
        let current = solution.configuration(self.period);
        assert!(
            current.is_closed(self.open) && current.is_open(self.close),
            "stale move: switch '{}' must be closed and '{}' open in period {}",
            current.network().line(self.open).name,
            current.network().line(self.close).name,
            self.period
        );

        // the cached delta is only valid against the flow it was computed from
        let new_flow = self.flow_delta.get().and_then(|delta| {
            solution
                .cached_flow(self.period)
                .filter(|flow| Arc::ptr_eq(flow, delta.old()))
                .map(|_| delta.new_flow().clone())
        });
        let mut expected = current.settings().clone();
        expected.set_switch(self.open, true);
        expected.set_switch(self.close, false);
        let target = match self.target.get() {
            Some(target) if target.settings() == &expected => target.clone(),
            _ => NetworkConfiguration::new(current.network().clone(), expected),
        };
        solution.replace_configuration(self.period, target);

        match new_flow {
            Some(flow) if propagate => solution.install_flow(self.period, flow),
            _ if propagate => {
                solution.flow(self.period);
            }
            _ => {}
        }
    }

    fn reverse(&self) -> Self {
        Self {
            solution_id: self.solution_id,
            period: self.period,
            open: self.close,
            close: self.open,
            target: OnceCell::new(),
            flow_delta: OnceCell::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power_flow::IteratedDistFlow;
    use crate::solution::ProblemContext;
    use chrono::{TimeZone, Utc};
    use feederopt_core::{
        BridgePolicy, LineSpec, NetworkBuilder, Period, PeriodData, PowerDemands,
    };
    use num_complex::Complex64;

    fn solution() -> Solution {
        let mut b = NetworkBuilder::new();
        let g = Complex64::new(1e6, 1e6);
        let z = Complex64::new(0.5, 0.1);
        b.add_provider("p", 230.0, g, -g).unwrap();
        let c1 = b.add_consumer("c1", 200.0, 250.0).unwrap();
        let c2 = b.add_consumer("c2", 200.0, 250.0).unwrap();
        b.add_line(LineSpec::new("l1", "p", "c1", z)).unwrap();
        b.add_line(LineSpec::new("l2", "c1", "c2", z).switchable(1.0))
            .unwrap();
        b.add_line(LineSpec::new("l3", "p", "c2", z * 2.0).switchable(1.0))
            .unwrap();
        let network = Arc::new(b.build());
        let mut demands = PowerDemands::new();
        demands.set(&network, c1, Complex64::new(500.0, 50.0)).unwrap();
        demands.set(&network, c2, Complex64::new(300.0, 20.0)).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let period = Period::new("h0", 0, start, start + chrono::Duration::hours(1)).unwrap();
        let context = ProblemContext::new(
            network,
            vec![PeriodData { period, demands }],
            Arc::new(IteratedDistFlow::new()),
        )
        .unwrap();
        Solution::radial_start(Arc::new(context), None, &mut BridgePolicy::First).unwrap()
    }

    fn swap_for(solution: &Solution) -> SwapSwitchStatusMove {
        let network = solution.network();
        let l2 = network.line_by_name("l2").unwrap();
        let l3 = network.line_by_name("l3").unwrap();
        let config = solution.configuration(0);
        if config.is_open(l2) {
            SwapSwitchStatusMove::new(solution, 0, l3, l2)
        } else {
            SwapSwitchStatusMove::new(solution, 0, l2, l3)
        }
    }

    #[test]
    fn test_propagating_apply_installs_cached_flow() {
        let mut solution = solution();
        let mv = swap_for(&solution);
        let delta = mv.cached_power_flow_delta(&solution);
        assert!(mv.target_configuration(&solution).is_radial());

        mv.apply(&mut solution, true);
        assert!(Arc::ptr_eq(solution.cached_flow(0).unwrap(), delta.new_flow()));
        assert!(solution.configuration(0).is_open(mv.open()));
        assert!(solution.configuration(0).is_closed(mv.close()));
    }

    #[test]
    fn test_deferred_apply_drops_flow() {
        let mut solution = solution();
        solution.flow(0);
        let mv = swap_for(&solution);
        mv.apply(&mut solution, false);
        assert!(solution.cached_flow(0).is_none());
    }

    #[test]
    fn test_stale_delta_is_not_installed() {
        let mut solution = solution();
        let mv = swap_for(&solution);
        let delta = mv.cached_power_flow_delta(&solution);
        // replace the flow the delta was computed against
        let settings = solution.settings(0).clone();
        let config = NetworkConfiguration::new(solution.network().clone(), settings);
        solution.replace_configuration(0, config);
        solution.flow(0);

        mv.apply(&mut solution, true);
        let installed = solution.cached_flow(0).unwrap();
        assert!(!Arc::ptr_eq(installed, delta.new_flow()));
    }

    #[test]
    fn test_reverse_restores_settings_and_flow() {
        let mut solution = solution();
        let before = solution.settings(0).clone();
        let flow_before = solution.flow(0);
        let mv = swap_for(&solution);
        mv.cached_power_flow_delta(&solution);
        mv.apply(&mut solution, true);

        let back = mv.reverse();
        assert_eq!(back.toggled_switches(), vec![mv.close(), mv.open()]);
        back.cached_power_flow_delta(&solution);
        back.apply(&mut solution, true);
        assert_eq!(solution.settings(0), &before);
        let flow_after = solution.flow(0);
        for bus in solution.network().bus_ids() {
            assert!((flow_after.voltage(bus) - flow_before.voltage(bus)).norm() < 1e-6);
        }
    }

    #[test]
    #[should_panic(expected = "not generated for")]
    fn test_foreign_solution_panics() {
        let solution = solution();
        let other = solution.clone();
        let mv = swap_for(&solution);
        mv.target_configuration(&other);
    }

    #[test]
    #[should_panic(expected = "stale move")]
    fn test_applying_a_move_twice_panics() {
        let mut solution = solution();
        let mv = swap_for(&solution);
        mv.apply(&mut solution, false);
        mv.apply(&mut solution, false);
    }
}
