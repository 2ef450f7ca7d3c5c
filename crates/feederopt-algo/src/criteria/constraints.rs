use super::Constraint;
use crate::moves::{Move, SwapSwitchStatusMove};
use crate::power_flow::FlowResult;
use crate::solution::Solution;
use feederopt_core::NetworkConfiguration;
use std::sync::Arc;

type FlowFn<'a> = &'a dyn Fn() -> Arc<FlowResult>;

/// True if `check` holds in every period of `solution`.
///
/// Verdicts are remembered on the solution under `name` until the period
/// changes.
fn all_periods(
    solution: &Solution,
    name: &str,
    check: impl Fn(&NetworkConfiguration, FlowFn<'_>) -> bool,
) -> bool {
    (0..solution.period_count()).all(|p| {
        solution.period_check(p, name, || {
            check(solution.configuration(p), &|| solution.flow(p))
        })
    })
}

/// True if `check` holds in every period of `solution` after `mv`.
///
/// Only the move's period is evaluated, on its cached target and flow; the
/// other periods are unchanged and answer from the solution's verdicts.
fn after_move(
    solution: &Solution,
    mv: &SwapSwitchStatusMove,
    name: &str,
    check: impl Fn(&NetworkConfiguration, FlowFn<'_>) -> bool,
) -> bool {
    let moved = mv.period();
    let target_ok = check(mv.target_configuration(solution), &|| {
        mv.cached_power_flow_delta(solution).new_flow().clone()
    });
    target_ok
        && (0..solution.period_count())
            .filter(|p| *p != moved)
            .all(|p| {
                solution.period_check(p, name, || {
                    check(solution.configuration(p), &|| solution.flow(p))
                })
            })
}

/// Flow-based checks only make sense on radial configurations.
fn with_flow(
    configuration: &NetworkConfiguration,
    flow: FlowFn<'_>,
    check: impl FnOnce(&FlowResult) -> bool,
) -> bool {
    configuration.is_radial() && check(&flow())
}

macro_rules! period_constraint {
    ($ty:ty, $name:literal, $check:ident) => {
        impl Constraint for $ty {
            fn name(&self) -> &str {
                $name
            }

            fn is_satisfied(&self, solution: &Solution) -> bool {
                all_periods(solution, $name, |config, flow| self.$check(config, flow))
            }

            fn legal_move(&self, solution: &Solution, mv: &SwapSwitchStatusMove) -> bool {
                after_move(solution, mv, $name, |config, flow| self.$check(config, flow))
            }
        }
    };
}

/// Every period is a forest rooted at providers that reaches every bus.
#[derive(Debug, Clone, Copy, Default)]
pub struct RadialityConstraint;

impl RadialityConstraint {
    fn check(&self, config: &NetworkConfiguration, _flow: FlowFn<'_>) -> bool {
        config.is_radial() && config.is_connected()
    }
}

period_constraint!(RadialityConstraint, "radiality", check);

/// Every transformer on a flow path has a mode for the flow direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformerModeConstraint;

impl TransformerModeConstraint {
    fn check(&self, config: &NetworkConfiguration, _flow: FlowFn<'_>) -> bool {
        config.topology().missing_modes().is_empty()
    }
}

period_constraint!(TransformerModeConstraint, "transformer-mode", check);

/// No period has a diverged flow.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowConvergenceConstraint;

impl FlowConvergenceConstraint {
    fn check(&self, config: &NetworkConfiguration, flow: FlowFn<'_>) -> bool {
        with_flow(config, flow, |f| !f.is_failed())
    }
}

period_constraint!(FlowConvergenceConstraint, "flow-convergence", check);

/// Line currents stay within `i_max`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineCapacityConstraint;

impl LineCapacityConstraint {
    fn check(&self, config: &NetworkConfiguration, flow: FlowFn<'_>) -> bool {
        let network = config.network();
        with_flow(config, flow, |f| {
            network
                .lines()
                .all(|line| f.line_current(line.id).norm() <= line.i_max)
        })
    }
}

period_constraint!(LineCapacityConstraint, "line-capacity", check);

/// Fed consumers stay within their voltage band.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumerVoltageConstraint;

impl ConsumerVoltageConstraint {
    fn check(&self, config: &NetworkConfiguration, flow: FlowFn<'_>) -> bool {
        let network = config.network();
        let topology = config.topology();
        with_flow(config, flow, |f| {
            network.consumers().all(|bus| {
                let Some(limits) = bus.consumer_limits() else {
                    return true;
                };
                if !topology.is_reached(bus.id) {
                    return true;
                }
                let v = f.voltage(bus.id).norm();
                limits.v_min <= v && v <= limits.v_max
            })
        })
    }
}

period_constraint!(ConsumerVoltageConstraint, "consumer-voltage", check);

/// Provider injections stay within their generation bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderCapacityConstraint;

impl ProviderCapacityConstraint {
    fn check(&self, config: &NetworkConfiguration, flow: FlowFn<'_>) -> bool {
        let network = config.network();
        with_flow(config, flow, |f| {
            network.providers().all(|bus| {
                let Some(data) = bus.provider() else {
                    return true;
                };
                let s = f.provider_injection(network, bus.id);
                data.generation_min.re <= s.re
                    && s.re <= data.generation_max.re
                    && data.generation_min.im <= s.im
                    && s.im <= data.generation_max.im
            })
        })
    }
}

period_constraint!(ProviderCapacityConstraint, "provider-capacity", check);

/// Conjunction of constraints, checked in insertion order.
#[derive(Default)]
pub struct ConstraintSet {
    constraints: Vec<Box<dyn Constraint>>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Radiality and transformer modes.
    pub fn structural() -> Self {
        Self::new()
            .with(RadialityConstraint)
            .with(TransformerModeConstraint)
    }

    /// Structural constraints plus every flow-based one.
    pub fn standard() -> Self {
        Self::structural()
            .with(FlowConvergenceConstraint)
            .with(LineCapacityConstraint)
            .with(ConsumerVoltageConstraint)
            .with(ProviderCapacityConstraint)
    }

    pub fn with(mut self, constraint: impl Constraint + 'static) -> Self {
        self.push(constraint);
        self
    }

    pub fn push(&mut self, constraint: impl Constraint + 'static) {
        self.constraints.push(Box::new(constraint));
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.constraints.iter().map(|c| c.name()).collect()
    }

    /// Names of the constraints `solution` violates.
    pub fn violated(&self, solution: &Solution) -> Vec<&str> {
        self.constraints
            .iter()
            .filter(|c| !c.is_satisfied(solution))
            .map(|c| c.name())
            .collect()
    }
}

impl Constraint for ConstraintSet {
    fn name(&self) -> &str {
        "all"
    }

    fn is_satisfied(&self, solution: &Solution) -> bool {
        self.constraints.iter().all(|c| c.is_satisfied(solution))
    }

    fn legal_move(&self, solution: &Solution, mv: &SwapSwitchStatusMove) -> bool {
        self.constraints.iter().all(|c| c.legal_move(solution, mv))
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn solution(i_max: f64) -> Solution {
        solution_over(1, i_max)
    }

    /// `a` is fed either directly over a weak line or through `c`.
    fn solution_over(periods: usize, i_max: f64) -> Solution {
        let mut b = NetworkBuilder::new();
        let g = Complex64::new(1e6, 1e6);
        b.add_provider("p", 400.0, g, -g).unwrap();
        let a = b.add_consumer("a", 380.0, 420.0).unwrap();
        let c = b.add_consumer("c", 380.0, 420.0).unwrap();
        b.add_line(LineSpec::new("pc", "p", "c", Complex64::new(0.1, 0.0)))
            .unwrap();
        b.add_line(
            LineSpec::new("pa", "p", "a", Complex64::new(5.0, 0.0))
                .switchable(1.0)
                .with_i_max(i_max),
        )
        .unwrap();
        b.add_line(LineSpec::new("ca", "c", "a", Complex64::new(0.1, 0.0)).switchable(1.0))
            .unwrap();
        let network = Arc::new(b.build());
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let periods = (0..periods)
            .map(|i| {
                let mut demands = PowerDemands::new();
                demands.set(&network, a, Complex64::new(4000.0, 0.0)).unwrap();
                demands.set(&network, c, Complex64::new(1000.0, 0.0)).unwrap();
                let from = start + chrono::Duration::hours(i as i64);
                let period =
                    Period::new(format!("h{i}"), i, from, from + chrono::Duration::hours(1))
                        .unwrap();
                PeriodData { period, demands }
            })
            .collect();
        let context =
            ProblemContext::new(network.clone(), periods, Arc::new(IteratedDistFlow::new()))
                .unwrap();
        // feed `a` directly
        let mut settings = feederopt_core::SwitchSettings::all_closed(&network);
        settings.set_switch(network.line_by_name("ca").unwrap(), true);
        Solution::radial_start(Arc::new(context), Some(&settings), &mut BridgePolicy::First)
            .unwrap()
    }

    #[test]
    fn test_capacity_and_voltage_follow_the_move() {
        let solution = solution(5.0);
        let network = solution.network().clone();
        let pa = network.line_by_name("pa").unwrap();
        let ca = network.line_by_name("ca").unwrap();
        assert!(solution.configuration(0).is_closed(pa));

        // 4 kW over 5 ohm: about 10 A and a 50 V drop
        assert!(!LineCapacityConstraint.is_satisfied(&solution));
        assert!(!ConsumerVoltageConstraint.is_satisfied(&solution));
        assert!(RadialityConstraint.is_satisfied(&solution));

        let mv = SwapSwitchStatusMove::new(&solution, 0, pa, ca);
        assert!(LineCapacityConstraint.legal_move(&solution, &mv));
        assert!(ConsumerVoltageConstraint.legal_move(&solution, &mv));
        assert!(ConstraintSet::standard().legal_move(&solution, &mv));

        let mut after = solution.clone();
        SwapSwitchStatusMove::new(&after, 0, pa, ca).apply(&mut after, false);
        assert!(ConstraintSet::standard().is_satisfied(&after));
        assert!(ConstraintSet::standard().violated(&solution).contains(&"line-capacity"));
    }

    #[test]
    fn test_structural_constraints() {
        let solution = solution(100.0);
        let network = solution.network().clone();
        let ca = network.line_by_name("ca").unwrap();
        let pa = network.line_by_name("pa").unwrap();
        let mv = SwapSwitchStatusMove::new(&solution, 0, pa, ca);
        assert!(RadialityConstraint.legal_move(&solution, &mv));
        assert!(TransformerModeConstraint.legal_move(&solution, &mv));
        assert_eq!(ConstraintSet::structural().names(), ["radiality", "transformer-mode"]);

        let mut meshed = solution.clone();
        meshed.set_switch(0, ca, false);
        assert!(!RadialityConstraint.is_satisfied(&meshed));
        // no flow is computed for a meshed period
        assert!(!FlowConvergenceConstraint.is_satisfied(&meshed));
        assert!(meshed.cached_flow(0).is_none());
    }

    /// Always satisfied; counts how often a period is evaluated.
    #[derive(Default)]
    struct CountingConstraint(AtomicUsize);

    impl CountingConstraint {
        fn check(&self, _config: &NetworkConfiguration, _flow: FlowFn<'_>) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn evaluations(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    period_constraint!(CountingConstraint, "counting", check);

    #[test]
    fn test_legal_move_only_evaluates_the_moved_period() {
        let solution = solution_over(3, 100.0);
        let network = solution.network().clone();
        let pa = network.line_by_name("pa").unwrap();
        let ca = network.line_by_name("ca").unwrap();
        let counting = CountingConstraint::default();

        assert!(counting.is_satisfied(&solution));
        assert_eq!(counting.evaluations(), 3);
        for period in 0..3 {
            let mv = SwapSwitchStatusMove::new(&solution, period, pa, ca);
            assert!(counting.legal_move(&solution, &mv));
        }
        // one target per move; the untouched periods were already known
        assert_eq!(counting.evaluations(), 3 + 3);

        let mut after = solution.clone();
        SwapSwitchStatusMove::new(&after, 1, pa, ca).apply(&mut after, false);
        assert!(counting.is_satisfied(&after));
        assert_eq!(counting.evaluations(), 3 + 3 + 1);
        // verdicts still match a full evaluation
        let first = SwapSwitchStatusMove::new(&solution, 0, pa, ca);
        assert_eq!(
            ConstraintSet::standard().legal_move(&solution, &first),
            ConstraintSet::standard().is_satisfied(&{
                let mut copy = solution.clone();
                SwapSwitchStatusMove::new(&copy, 0, pa, ca).apply(&mut copy, false);
                copy
            })
        );
    }
}
