//! Differences between two flows of the same network.

use super::FlowResult;
use feederopt_core::{BusId, LineId, Network, NetworkConfiguration};
use num_complex::Complex64;
use std::sync::Arc;

/// Relative change below which a value counts as unchanged.
const CHANGE_TOLERANCE: f64 = 1e-9;

fn changed(old: Complex64, new: Complex64) -> bool {
    let scale = old.norm().max(new.norm()).max(1.0);
    (new - old).norm() > CHANGE_TOLERANCE * scale
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusChange {
    pub bus: BusId,
    pub old_voltage: Complex64,
    pub new_voltage: Complex64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineChange {
    pub line: LineId,
    /// Current in the direction of the line
    pub old_current: Complex64,
    pub new_current: Complex64,
    /// Power entering at the `from` end
    pub old_power: Complex64,
    pub new_power: Complex64,
}

/// The buses and lines whose flow differs between two results.
///
/// Both results are kept, so consumers can read any value of either side;
/// the change lists only name what moved.
#[derive(Debug, Clone)]
pub struct PowerFlowDelta {
    old: Arc<FlowResult>,
    new: Arc<FlowResult>,
    buses: Vec<BusChange>,
    lines: Vec<LineChange>,
}

impl PowerFlowDelta {
    /// Compare every bus and line of `network`.
    pub fn between(network: &Network, old: Arc<FlowResult>, new: Arc<FlowResult>) -> Self {
        Self::compare(network, old, new, |_| true)
    }

    /// The delta of swapping `open` and `close` in `before`.
    ///
    /// Only the provider trees holding an end of either switch are compared.
    /// The swap moves buses between those trees and leaves every other tree
    /// as it was.
    pub fn for_swap(
        before: &NetworkConfiguration,
        old: Arc<FlowResult>,
        new: Arc<FlowResult>,
        open: LineId,
        close: LineId,
    ) -> Self {
        let network = before.network();
        let topology = before.topology();
        let feeders: Vec<Option<BusId>> = [open, close]
            .into_iter()
            .flat_map(|id| {
                let line = network.line(id);
                [line.from, line.to]
            })
            .map(|bus| topology.provider_of(bus))
            .collect();
        Self::compare(network, old, new, |bus| {
            feeders.contains(&topology.provider_of(bus))
        })
    }

    fn compare(
        network: &Network,
        old: Arc<FlowResult>,
        new: Arc<FlowResult>,
        affected: impl Fn(BusId) -> bool,
    ) -> Self {
        assert_eq!(
            (old.bus_count(), old.line_count()),
            (new.bus_count(), new.line_count()),
            "flows of different networks"
        );
        let buses = network
            .bus_ids()
            .filter(|&bus| affected(bus))
            .filter_map(|bus| {
                let (a, b) = (old.voltage(bus), new.voltage(bus));
                changed(a, b).then_some(BusChange {
                    bus,
                    old_voltage: a,
                    new_voltage: b,
                })
            })
            .collect();
        let lines = network
            .lines()
            .filter(|line| affected(line.from) || affected(line.to))
            .filter_map(|line| {
                let (a, b) = (old.line_current(line.id), new.line_current(line.id));
                changed(a, b).then(|| LineChange {
                    line: line.id,
                    old_current: a,
                    new_current: b,
                    old_power: old.power_flow(network, line.from, line.id),
                    new_power: new.power_flow(network, line.from, line.id),
                })
            })
            .collect();
        Self {
            old,
            new,
            buses,
            lines,
        }
    }

    pub fn old(&self) -> &Arc<FlowResult> {
        &self.old
    }

    pub fn new_flow(&self) -> &Arc<FlowResult> {
        &self.new
    }

    pub fn changed_buses(&self) -> &[BusChange] {
        &self.buses
    }

    pub fn changed_lines(&self) -> &[LineChange] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty() && self.lines.is_empty()
    }

    /// Change of total active loss (W), new minus old.
    ///
    /// Only changed lines are visited.
    pub fn loss_change(&self, network: &Network) -> f64 {
        let lines: f64 = self
            .lines
            .iter()
            .map(|c| {
                let after = self.new.line_loss(network, c.line).re;
                let before = self.old.line_loss(network, c.line).re;
                after - before
            })
            .sum();
        lines + self.new.total_transformer_loss() - self.old.total_transformer_loss()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power_flow::{FlowProvider, IteratedDistFlow};
    use feederopt_core::{LineSpec, NetworkBuilder, PowerDemands};

    #[test]
    fn test_delta_names_changed_parts_only() {
        let mut b = NetworkBuilder::new();
        let g = Complex64::new(1e6, 1e6);
        b.add_provider("p", 230.0, g, -g).unwrap();
        let a = b.add_consumer("a", 200.0, 250.0).unwrap();
        let c = b.add_consumer("c", 200.0, 250.0).unwrap();
        b.add_line(LineSpec::new("pa", "p", "a", Complex64::new(0.2, 0.0)))
            .unwrap();
        b.add_line(LineSpec::new("pc", "p", "c", Complex64::new(0.5, 0.0)))
            .unwrap();
        b.add_line(LineSpec::new("sa", "p", "a", Complex64::new(0.1, 0.0)).switchable(1.0))
            .unwrap();
        let network = Arc::new(b.build());
        let sa = network.line_by_name("sa").unwrap();
        let pa = network.line_by_name("pa").unwrap();

        let mut demands = PowerDemands::new();
        demands.set(&network, a, Complex64::new(500.0, 0.0)).unwrap();
        demands.set(&network, c, Complex64::new(300.0, 0.0)).unwrap();

        let solver = IteratedDistFlow::new();
        let mut before = NetworkConfiguration::all_closed(network.clone());
        before.set_switch(sa, true);
        let old = Arc::new(solver.compute_flow(&before, &demands));

        demands.set(&network, a, Complex64::new(800.0, 0.0)).unwrap();
        let new = Arc::new(solver.compute_flow(&before, &demands));
        let delta = PowerFlowDelta::between(&network, old.clone(), new.clone());

        assert!(delta.changed_lines().iter().any(|c| c.line == pa));
        assert!(delta.changed_lines().iter().all(|c| c.line != sa));
        assert!(delta.changed_buses().iter().any(|c| c.bus == a));
        let expected = new.total_loss(&network) - old.total_loss(&network);
        assert!((delta.loss_change(&network) - expected).abs() < 1e-9);

        let same = PowerFlowDelta::between(&network, old.clone(), old);
        assert!(same.is_empty());
    }

    #[test]
    fn test_swap_delta_skips_untouched_feeders() {
        let mut b = NetworkBuilder::new();
        let g = Complex64::new(1e6, 1e6);
        let r = |ohm: f64| Complex64::new(ohm, 0.0);
        for name in ["p1", "p2", "p3"] {
            b.add_provider(name, 230.0, g, -g).unwrap();
        }
        let buses: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|name| b.add_consumer(name, 200.0, 250.0).unwrap())
            .collect();
        let pa = b
            .add_line(LineSpec::new("pa", "p1", "a", r(0.4)).switchable(1.0))
            .unwrap();
        let ab = b
            .add_line(LineSpec::new("ab", "a", "b", r(0.3)).switchable(1.0))
            .unwrap();
        b.add_line(LineSpec::new("pb", "p2", "b", r(0.2))).unwrap();
        let pc = b.add_line(LineSpec::new("pc", "p3", "c", r(0.5))).unwrap();
        let network = Arc::new(b.build());

        let mut demands = PowerDemands::new();
        for bus in buses {
            demands.set(&network, bus, Complex64::new(400.0, 50.0)).unwrap();
        }
        let mut before = NetworkConfiguration::all_closed(network.clone());
        before.set_switch(ab, true);
        let after = before.with_swap(pa, ab);

        let solver = IteratedDistFlow::new();
        let old = Arc::new(solver.compute_flow(&before, &demands));
        let new = Arc::new(solver.compute_flow_from(&after, &demands, &old));
        let delta = PowerFlowDelta::for_swap(&before, old.clone(), new.clone(), pa, ab);

        let lines: Vec<LineId> = delta.changed_lines().iter().map(|c| c.line).collect();
        assert!(lines.contains(&pa));
        assert!(lines.contains(&ab));
        assert!(!lines.contains(&pc));
        let c = network.bus_by_name("c").unwrap();
        assert!(delta.changed_buses().iter().all(|change| change.bus != c));

        let expected = new.total_loss(&network) - old.total_loss(&network);
        assert!((delta.loss_change(&network) - expected).abs() < 1e-6);
    }
}
