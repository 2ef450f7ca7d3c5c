//! # Iterated DistFlow (backward/forward sweep)
//!
//! Radial distribution feeders are trees rooted at providers, which makes the
//! classic backward/forward sweep a natural fit: no admittance matrix and no
//! linear solve, just two passes over the tree per iteration.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  ONE ITERATION                                                        │
//! │  ─────────────                                                        │
//! │                                                                       │
//! │  Backward sweep (leaves → providers):                                 │
//! │      I_bus  = conj(S_demand / V_bus) + Σ I_child                      │
//! │      line hop:         I_line = I_bus                                 │
//! │      transformer hop:  S_out = V_out · conj(I_bus)                    │
//! │                        P_in  = P_out / power_factor                   │
//! │                        I_in  = conj(S_in / V_in)                      │
//! │                                                                       │
//! │  Forward sweep (providers → leaves):                                  │
//! │      line hop:         V_child = V_parent − Z · I_line                │
//! │      FixedRatio:       V_out   = V_in / ratio                         │
//! │      Automatic:        V_out   = |V_nominal| ∠ arg(V_in)              │
//! │                                                                       │
//! │  Stop when max_bus |ΔV| / |V| < tolerance                             │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The sweep starts from a flat profile: every bus at its provider's voltage,
//! carried through transformer ratios. [`FlowProvider::compute_flow_from`]
//! starts from a previous result instead, which is how moves get the flow of
//! a neighbouring configuration in a few iterations.
//!
//! ## Divergence guard
//!
//! When a line's series loss `R·|I|²` exceeds the apparent power it carries,
//! the demand cannot be served through that line and the iteration is
//! diverging. The solver stops with [`FlowStatus::Failed`] instead of
//! iterating to `max_iterations`.
//!
//! ## References
//!
//! - Baran, M. E., & Wu, F. F. (1989). "Network reconfiguration in
//!   distribution systems for loss reduction and load balancing."
//!   *IEEE Transactions on Power Delivery*, 4(2), 1401-1407.
//! - Shirmohammadi, D., et al. (1988). "A compensation-based power flow
//!   method for weakly meshed distribution and transmission networks."
//!   *IEEE Transactions on Power Systems*, 3(2), 753-762.

use super::{FlowError, FlowProvider, FlowResult, FlowStatus, TransformerFlow};
use feederopt_core::{
    BusId, Link, LineId, Network, NetworkConfiguration, PowerDemands, ResolvedMode, Topology,
    TransformerId,
};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Iteration limits and early-stop policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DistFlowSettings {
    /// Largest relative voltage change accepted as converged
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Stop as soon as a line current exceeds its limit
    pub stop_on_imax_violation: bool,
    /// Stop as soon as a consumer voltage drops below its limit
    pub stop_on_vmin_violation: bool,
}

impl Default for DistFlowSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl DistFlowSettings {
    pub fn new() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 100,
            stop_on_imax_violation: false,
            stop_on_vmin_violation: false,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_stop_on_imax_violation(mut self, enable: bool) -> Self {
        self.stop_on_imax_violation = enable;
        self
    }

    pub fn with_stop_on_vmin_violation(mut self, enable: bool) -> Self {
        self.stop_on_vmin_violation = enable;
        self
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        if !(self.tolerance > 0.0) {
            return Err(FlowError::InvalidSettings(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(FlowError::InvalidSettings(
                "max_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Backward/forward sweep power flow.
#[derive(Debug, Clone, Default)]
pub struct IteratedDistFlow {
    settings: DistFlowSettings,
}

#[derive(Debug, Clone, Copy)]
enum HopKind {
    Line {
        line: LineId,
        impedance: Complex64,
        /// Parent is the line's `from` bus
        forward: bool,
    },
    Transformer {
        transformer: TransformerId,
        mode: ResolvedMode,
        nominal: f64,
    },
}

/// The link feeding a bus from its parent.
#[derive(Debug, Clone, Copy)]
struct TreeHop {
    parent: BusId,
    kind: HopKind,
}

impl TreeHop {
    /// Child voltage given the parent voltage and the hop current.
    fn propagate(&self, parent_voltage: Complex64, current: Complex64) -> Complex64 {
        match self.kind {
            HopKind::Line { impedance, .. } => parent_voltage - impedance * current,
            HopKind::Transformer { mode, nominal, .. } => {
                mode.output_voltage(parent_voltage, nominal)
            }
        }
    }
}

fn current_for(power: Complex64, voltage: Complex64) -> Complex64 {
    if power == Complex64::default() {
        Complex64::default()
    } else {
        (power / voltage).conj()
    }
}

fn is_finite(z: Complex64) -> bool {
    z.re.is_finite() && z.im.is_finite()
}

impl IteratedDistFlow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(mut self, settings: DistFlowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &DistFlowSettings {
        &self.settings
    }

    fn tree_hops(
        network: &Network,
        topology: &Topology,
        order: &[BusId],
    ) -> Result<Vec<Option<TreeHop>>, String> {
        let mut hops = vec![None; network.bus_count()];
        for &bus in order {
            let Some(link) = topology.upstream_link(bus) else {
                continue;
            };
            let kind = match link.link {
                Link::Line(line) => {
                    let l = network.line(line);
                    HopKind::Line {
                        line,
                        impedance: l.impedance,
                        forward: l.from == link.from,
                    }
                }
                Link::Transformer(id) => {
                    let t = network.transformer(id);
                    let resolved = match (t.terminal_index(link.from), t.terminal_index(link.to)) {
                        (Some(input), Some(output)) => t
                            .mode_between(input, output)
                            .map(|mode| (mode, t.terminals[output].nominal_voltage)),
                        _ => None,
                    };
                    let Some((mode, nominal)) = resolved else {
                        return Err(format!(
                            "transformer '{}' has no mode from terminal '{}' to '{}'",
                            t.name,
                            network.bus(link.from).name,
                            network.bus(link.to).name
                        ));
                    };
                    HopKind::Transformer {
                        transformer: id,
                        mode,
                        nominal,
                    }
                }
            };
            hops[bus.value()] = Some(TreeHop {
                parent: link.from,
                kind,
            });
        }
        Ok(hops)
    }

    fn solve(
        &self,
        configuration: &NetworkConfiguration,
        demands: &PowerDemands,
        previous: Option<&FlowResult>,
    ) -> FlowResult {
        let network = configuration.network();
        let topology = configuration.topology();
        assert!(
            topology.is_radial(),
            "IteratedDistFlow requires a radial configuration, found {} extra closed links",
            topology.extra_links().len()
        );

        let n = network.bus_count();
        let order: Vec<BusId> = topology
            .order()
            .iter()
            .copied()
            .filter(|bus| topology.provider_of(*bus).is_some())
            .collect();
        let hops = match Self::tree_hops(network, topology, &order) {
            Ok(hops) => hops,
            Err(reason) => {
                return FlowResult::failed(network, format!("failed after 0 iterations: {reason}"), 0)
            }
        };

        // Flat start, carried through transformer ratios
        let mut v = vec![Complex64::default(); n];
        for &bus in &order {
            v[bus.value()] = match (&hops[bus.value()], network.bus(bus).provider()) {
                (Some(hop), _) => hop.propagate(v[hop.parent.value()], Complex64::default()),
                (None, Some(data)) => Complex64::new(data.voltage, 0.0),
                (None, None) => Complex64::default(),
            };
        }
        if let Some(previous) = previous.filter(|p| p.bus_count() == n && !p.is_failed()) {
            for &bus in &order {
                let warm = previous.voltage(bus);
                if hops[bus.value()].is_some() && warm.norm() > 0.0 && is_finite(warm) {
                    v[bus.value()] = warm;
                }
            }
        }

        let mut drawn = vec![Complex64::default(); n];
        let mut currents = vec![Complex64::default(); network.line_count()];
        let mut transformer_flows = Vec::new();
        let mut max_change = f64::INFINITY;

        for iteration in 1..=self.settings.max_iterations {
            transformer_flows.clear();
            for &bus in order.iter().rev() {
                let idx = bus.value();
                let mut i = current_for(demands.get(bus), v[idx]);
                for child in topology.downstream_links(bus) {
                    i += drawn[child.to.value()];
                }
                drawn[idx] = match hops[idx] {
                    Some(TreeHop {
                        parent,
                        kind: HopKind::Transformer {
                            transformer, mode, ..
                        },
                    }) => {
                        let power_out = v[idx] * i.conj();
                        let pf = mode.mode.power_factor;
                        let p_in = if power_out.re >= 0.0 {
                            power_out.re / pf
                        } else {
                            power_out.re * pf
                        };
                        let power_in = Complex64::new(p_in, power_out.im);
                        transformer_flows.push(TransformerFlow {
                            transformer,
                            input: parent,
                            output: bus,
                            power_in,
                            power_out,
                        });
                        current_for(power_in, v[parent.value()])
                    }
                    _ => i,
                };
            }

            currents.fill(Complex64::default());
            for &bus in &order {
                let Some(hop) = hops[bus.value()] else {
                    continue;
                };
                let i = drawn[bus.value()];
                if !is_finite(i) {
                    return FlowResult::failed(
                        network,
                        format!(
                            "diverged after {iteration} iterations: non-finite current into bus '{}'",
                            network.bus(bus).name
                        ),
                        iteration,
                    );
                }
                if let HopKind::Line {
                    line,
                    impedance,
                    forward,
                } = hop.kind
                {
                    let carried = (v[hop.parent.value()] * i.conj()).norm();
                    let loss = impedance.re * i.norm_sqr();
                    if loss > carried {
                        return FlowResult::failed(
                            network,
                            format!(
                                "diverged after {iteration} iterations: loss of {loss:.3} W on line '{}' exceeds the {carried:.3} VA it carries",
                                network.line(line).name
                            ),
                            iteration,
                        );
                    }
                    currents[line.value()] = if forward { i } else { -i };
                }
            }

            max_change = 0.0;
            for &bus in &order {
                let Some(hop) = hops[bus.value()] else {
                    continue;
                };
                let old = v[bus.value()];
                let new = hop.propagate(v[hop.parent.value()], drawn[bus.value()]);
                if !is_finite(new) {
                    return FlowResult::failed(
                        network,
                        format!(
                            "diverged after {iteration} iterations: non-finite voltage at bus '{}'",
                            network.bus(bus).name
                        ),
                        iteration,
                    );
                }
                let scale = if old.norm() > 0.0 {
                    old.norm()
                } else {
                    new.norm().max(1.0)
                };
                max_change = max_change.max((new - old).norm() / scale);
                v[bus.value()] = new;
            }

            if max_change < self.settings.tolerance {
                debug!(iterations = iteration, "dist flow converged");
                return FlowResult::new(
                    FlowStatus::Exact,
                    format!("converged in {iteration} iterations"),
                    iteration,
                    v,
                    currents,
                    transformer_flows,
                );
            }

            if self.settings.stop_on_imax_violation {
                if let Some(line) = network
                    .lines()
                    .find(|l| currents[l.id.value()].norm() > l.i_max)
                {
                    return FlowResult::new(
                        FlowStatus::Approximate,
                        format!(
                            "stopped after {iteration} iterations: current limit of line '{}' exceeded",
                            line.name
                        ),
                        iteration,
                        v,
                        currents,
                        transformer_flows,
                    );
                }
            }

            if self.settings.stop_on_vmin_violation {
                if let Some(bus) = order.iter().map(|b| network.bus(*b)).find(|bus| {
                    bus.consumer_limits()
                        .is_some_and(|limits| v[bus.id.value()].norm() < limits.v_min)
                }) {
                    return FlowResult::new(
                        FlowStatus::Approximate,
                        format!(
                            "stopped after {iteration} iterations: voltage at bus '{}' below its minimum",
                            bus.name
                        ),
                        iteration,
                        v,
                        currents,
                        transformer_flows,
                    );
                }
            }
        }

        let iterations = self.settings.max_iterations;
        debug!(iterations, max_change, "dist flow hit iteration limit");
        FlowResult::new(
            FlowStatus::Approximate,
            format!(
                "stopped after {iterations} iterations without converging (max relative change {max_change:.3e})"
            ),
            iterations,
            v,
            currents,
            transformer_flows,
        )
    }
}

impl FlowProvider for IteratedDistFlow {
    fn name(&self) -> &str {
        "iterated-dist-flow"
    }

    fn compute_flow(
        &self,
        configuration: &NetworkConfiguration,
        demands: &PowerDemands,
    ) -> FlowResult {
        self.solve(configuration, demands, None)
    }

    fn compute_flow_from(
        &self,
        configuration: &NetworkConfiguration,
        demands: &PowerDemands,
        previous: &FlowResult,
    ) -> FlowResult {
        self.solve(configuration, demands, Some(previous))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feederopt_core::{LineSpec, NetworkBuilder, TransformerMode, TransformerOperation};
    use std::sync::Arc;

    fn gen() -> Complex64 {
        Complex64::new(1e7, 1e7)
    }

    fn feeder(resistance: f64) -> (NetworkConfiguration, PowerDemands) {
        let mut b = NetworkBuilder::new();
        b.add_provider("p", 230.0, gen(), -gen()).unwrap();
        let c = b.add_consumer("c", 200.0, 250.0).unwrap();
        b.add_line(LineSpec::new("l", "p", "c", Complex64::new(resistance, 0.0)))
            .unwrap();
        let network = Arc::new(b.build());
        let mut demands = PowerDemands::new();
        demands.set(&network, c, Complex64::new(100.0, 0.0)).unwrap();
        (NetworkConfiguration::all_closed(network), demands)
    }

    #[test]
    fn test_single_line_converges() {
        let (config, demands) = feeder(1.0);
        let network = config.network().clone();
        let flow = IteratedDistFlow::new().compute_flow(&config, &demands);
        assert_eq!(flow.status, FlowStatus::Exact);

        let p = network.bus_by_name("p").unwrap();
        let c = network.bus_by_name("c").unwrap();
        let l = network.line_by_name("l").unwrap();
        let i = flow.current(&network, p, l);
        let drop = flow.voltage(p) - flow.voltage(c);
        assert!((drop.norm() - i.norm()).abs() < 1e-9);
        let delivered = flow.voltage(c) * i.conj();
        assert!((delivered - Complex64::new(100.0, 0.0)).norm() < 1e-6);
        assert!((flow.total_loss(&network) - i.norm_sqr()).abs() < 1e-9);
    }

    #[test]
    fn test_divergence_is_reported_as_failed() {
        let (config, demands) = feeder(1000.0);
        let flow = IteratedDistFlow::new().compute_flow(&config, &demands);
        assert_eq!(flow.status, FlowStatus::Failed);
        assert!(flow.status_detail.contains("after 1 iterations"));
        assert!(flow.status_detail.contains("line 'l'"));
    }

    #[test]
    fn test_iteration_limit_is_approximate() {
        let (config, demands) = feeder(5.0);
        let solver = IteratedDistFlow::new()
            .with_settings(DistFlowSettings::new().with_max_iterations(2));
        let flow = solver.compute_flow(&config, &demands);
        assert_eq!(flow.status, FlowStatus::Approximate);
        assert_eq!(flow.iterations, 2);
        assert!(flow.status_detail.contains("2 iterations"));
    }

    #[test]
    fn test_vmin_stop_policy() {
        let (config, demands) = feeder(100.0);
        let solver = IteratedDistFlow::new().with_settings(
            DistFlowSettings::new()
                .with_tolerance(1e-14)
                .with_stop_on_vmin_violation(true),
        );
        let flow = solver.compute_flow(&config, &demands);
        assert_eq!(flow.status, FlowStatus::Approximate);
        assert!(flow.status_detail.contains("bus 'c'"));
    }

    #[test]
    fn test_imax_stop_policy() {
        let mut b = NetworkBuilder::new();
        b.add_provider("p", 230.0, gen(), -gen()).unwrap();
        let c = b.add_consumer("c", 200.0, 250.0).unwrap();
        // about 0.44 A flows
        b.add_line(LineSpec::new("l", "p", "c", Complex64::new(1.0, 0.0)).with_i_max(0.1))
            .unwrap();
        let network = Arc::new(b.build());
        let mut demands = PowerDemands::new();
        demands.set(&network, c, Complex64::new(100.0, 0.0)).unwrap();
        let config = NetworkConfiguration::all_closed(network);

        let settings = DistFlowSettings::new().with_tolerance(1e-14);
        let free = IteratedDistFlow::new()
            .with_settings(settings)
            .compute_flow(&config, &demands);
        assert!(free.iterations > 1);

        let flow = IteratedDistFlow::new()
            .with_settings(settings.with_stop_on_imax_violation(true))
            .compute_flow(&config, &demands);
        assert_eq!(flow.status, FlowStatus::Approximate);
        assert_eq!(flow.iterations, 1);
        assert!(flow.status_detail.contains("after 1 iterations"));
        assert!(flow.status_detail.contains("line 'l'"));
    }

    #[test]
    fn test_zero_impedance_passes_voltage_through() {
        let mut b = NetworkBuilder::new();
        b.add_provider("p", 400.0, gen(), -gen()).unwrap();
        let c = b.add_consumer("c", 300.0, 500.0).unwrap();
        b.add_line(LineSpec::new("l", "p", "c", Complex64::default()))
            .unwrap();
        let network = Arc::new(b.build());
        let mut demands = PowerDemands::new();
        demands.set(&network, c, Complex64::new(400.0, 0.0)).unwrap();
        let config = NetworkConfiguration::all_closed(network.clone());

        let flow = IteratedDistFlow::new().compute_flow(&config, &demands);
        assert_eq!(flow.status, FlowStatus::Exact);
        assert_eq!(flow.voltage(c), Complex64::new(400.0, 0.0));
        let l = network.line_by_name("l").unwrap();
        assert!((flow.line_current(l) - Complex64::new(1.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_transformer_ratio_and_loss() {
        let mut b = NetworkBuilder::new();
        b.add_provider("grid", 22_000.0, gen(), -gen()).unwrap();
        let load = b.add_consumer("load", 200.0, 250.0).unwrap();
        b.add_transformer(
            "t1",
            &[("t1_hv", 22_000.0), ("t1_lv", 230.0)],
            vec![TransformerMode {
                input: 0,
                output: 1,
                operation: TransformerOperation::FixedRatio(100.0),
                power_factor: 0.98,
                bidirectional: false,
            }],
        )
        .unwrap();
        b.add_line(LineSpec::new("hv", "grid", "t1_hv", Complex64::new(0.5, 0.1)))
            .unwrap();
        b.add_line(LineSpec::new("lv", "t1_lv", "load", Complex64::new(0.05, 0.01)))
            .unwrap();
        let network = Arc::new(b.build());
        let mut demands = PowerDemands::new();
        demands.set(&network, load, Complex64::new(10_000.0, 2_000.0)).unwrap();
        let config = NetworkConfiguration::all_closed(network.clone());

        let flow = IteratedDistFlow::new().compute_flow(&config, &demands);
        assert_eq!(flow.status, FlowStatus::Exact);
        let hv = network.bus_by_name("t1_hv").unwrap();
        let lv = network.bus_by_name("t1_lv").unwrap();
        let ratio = flow.voltage(hv) / flow.voltage(lv);
        assert!((ratio - Complex64::new(100.0, 0.0)).norm() < 1e-9);

        let hop = flow.transformer_flows()[0];
        assert_eq!(hop.input, hv);
        assert_eq!(hop.output, lv);
        assert!((hop.power_in.re * 0.98 - hop.power_out.re).abs() < 1e-6);
        assert!(flow.total_transformer_loss() > 0.0);

        let grid = network.bus_by_name("grid").unwrap();
        let injected = flow.provider_injection(&network, grid).re;
        let balance = 10_000.0 + flow.total_loss(&network);
        assert!((injected - balance).abs() < 1e-4);
    }

    #[test]
    fn test_warm_start_reuses_previous_flow() {
        let (config, demands) = feeder(2.0);
        let solver = IteratedDistFlow::new();
        let cold = solver.compute_flow(&config, &demands);
        let warm = solver.compute_flow_from(&config, &demands, &cold);
        assert_eq!(warm.status, FlowStatus::Exact);
        assert!(warm.iterations <= cold.iterations);
        let c = config.network().bus_by_name("c").unwrap();
        assert!((warm.voltage(c) - cold.voltage(c)).norm() < 1e-6);
    }

    #[test]
    fn test_open_switch_leaves_bus_unfed() {
        let mut b = NetworkBuilder::new();
        b.add_provider("p", 230.0, gen(), -gen()).unwrap();
        let c = b.add_consumer("c", 200.0, 250.0).unwrap();
        let s = b
            .add_line(LineSpec::new("s", "p", "c", Complex64::new(1.0, 0.0)).switchable(1.0))
            .unwrap();
        let network = Arc::new(b.build());
        let mut config = NetworkConfiguration::all_closed(network.clone());
        config.set_switch(s, true);
        let mut demands = PowerDemands::new();
        demands.set(&network, c, Complex64::new(100.0, 0.0)).unwrap();

        let flow = IteratedDistFlow::new().compute_flow(&config, &demands);
        assert_eq!(flow.status, FlowStatus::Exact);
        assert_eq!(flow.voltage(c), Complex64::default());
        assert_eq!(flow.line_current(s), Complex64::default());
    }

    #[test]
    #[should_panic(expected = "radial configuration")]
    fn test_meshed_input_panics() {
        let mut b = NetworkBuilder::new();
        b.add_provider("p", 230.0, gen(), -gen()).unwrap();
        b.add_consumer("c", 200.0, 250.0).unwrap();
        b.add_line(LineSpec::new("a", "p", "c", Complex64::new(1.0, 0.0)))
            .unwrap();
        b.add_line(LineSpec::new("b", "p", "c", Complex64::new(1.0, 0.0)))
            .unwrap();
        let config = NetworkConfiguration::all_closed(Arc::new(b.build()));
        IteratedDistFlow::new().compute_flow(&config, &PowerDemands::new());
    }

    #[test]
    fn test_settings_validation_and_toml_defaults() {
        assert!(DistFlowSettings::new().validate().is_ok());
        assert!(DistFlowSettings::new().with_tolerance(0.0).validate().is_err());
        assert!(DistFlowSettings::new().with_max_iterations(0).validate().is_err());

        let parsed: DistFlowSettings = toml::from_str("max_iterations = 7").unwrap();
        assert_eq!(parsed.max_iterations, 7);
        assert_eq!(parsed.tolerance, DistFlowSettings::new().tolerance);
        assert!(toml::from_str::<DistFlowSettings>("bogus = 1").is_err());
    }
}
