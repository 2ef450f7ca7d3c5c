//! Flows on aggregated networks and their distribution back onto the
//! original lines.
//!
//! A flow solved on the aggregate network already fixes the voltage of every
//! surviving bus and the current of every aggregate line. The original values
//! follow from the [`DirectedMergedLine`] tree of each aggregate line:
//!
//! - **Serial** parts carry the same current; internal bus voltages are
//!   walked along the chain, `V_{k+1} = V_k - Z_k · I`.
//! - **Parallel** parts share the voltage drop; member `k` carries
//!   `I · Z_eq / Z_k`. When some members have zero impedance they carry the
//!   whole current in equal shares and the others carry none.
//! - **Dangling** lines carry no current; the dropped bus sits at the voltage
//!   of the bus it hangs from.
//! - **Unconnected** buses and lines are zero.

use super::{FlowProvider, FlowResult, TransformerFlow};
use feederopt_core::{
    BusId, DirectedMergedLine, MergedPart, Network, NetworkAggregation, NetworkConfiguration,
    PowerDemands,
};
use num_complex::Complex64;
use std::sync::Arc;

struct Distribution<'a> {
    network: &'a Network,
    voltages: Vec<Complex64>,
    currents: Vec<Complex64>,
}

impl Distribution<'_> {
    /// Spread current `i` (flowing `part.from` -> `part.to`) over `part`,
    /// starting at voltage `v_from`. Returns the voltage at `part.to`.
    fn walk(&mut self, part: &DirectedMergedLine, v_from: Complex64, i: Complex64) -> Complex64 {
        match &part.part {
            MergedPart::Single { line } => {
                let along = if self.network.line(*line).from == part.from {
                    i
                } else {
                    -i
                };
                self.currents[line.value()] = along;
                v_from - part.impedance * i
            }
            MergedPart::Serial {
                parts,
                internal_buses,
            } => {
                let mut v = v_from;
                for (k, sub) in parts.iter().enumerate() {
                    v = self.walk(sub, v, i);
                    if let Some(bus) = internal_buses.get(k) {
                        self.voltages[bus.value()] = v;
                    }
                }
                v
            }
            MergedPart::Parallel { parts } => {
                let zero = Complex64::default();
                let ideal = parts.iter().filter(|p| p.impedance == zero).count();
                for sub in parts {
                    let share = if ideal > 0 {
                        if sub.impedance == zero {
                            i / ideal as f64
                        } else {
                            zero
                        }
                    } else {
                        i * part.impedance / sub.impedance
                    };
                    self.walk(sub, v_from, share);
                }
                v_from - part.impedance * i
            }
        }
    }
}

/// Distribute a flow solved on `aggregation`'s aggregate network onto the
/// original network.
///
/// `configuration` is the original-network configuration the aggregate flow
/// stands for; it is only used to check that it belongs to the original
/// network.
pub fn disaggregate_flow(
    aggregation: &NetworkAggregation,
    aggregate_flow: &FlowResult,
    configuration: &NetworkConfiguration,
) -> FlowResult {
    let original = aggregation.original_network();
    let aggregate = aggregation.aggregate_network();
    assert!(
        Arc::ptr_eq(configuration.network(), original),
        "configuration does not belong to the aggregated network"
    );
    if aggregate_flow.is_failed() {
        return FlowResult::failed(
            original,
            aggregate_flow.status_detail.clone(),
            aggregate_flow.iterations,
        );
    }

    let mut dist = Distribution {
        network: original,
        voltages: vec![Complex64::default(); original.bus_count()],
        currents: vec![Complex64::default(); original.line_count()],
    };
    for bus in aggregate.bus_ids() {
        dist.voltages[aggregation.original_bus(bus).value()] = aggregate_flow.voltage(bus);
    }
    for line in aggregate.lines() {
        let merged = aggregation.merged_line(line.id);
        let v_from = aggregate_flow.voltage(line.from);
        dist.walk(merged, v_from, aggregate_flow.line_current(line.id));
    }
    for dangling in aggregation.dangling_lines().iter().rev() {
        let v = dist.voltages[dangling.kept.value()];
        dist.voltages[dangling.dropped.value()] = v;
        for bus in dangling.line.internal_buses() {
            dist.voltages[bus.value()] = v;
        }
    }

    let transformer_flows = aggregate_flow
        .transformer_flows()
        .iter()
        .filter_map(|flow| {
            let name = &aggregate.transformer(flow.transformer).name;
            Some(TransformerFlow {
                transformer: original.transformer_by_name(name)?,
                input: aggregation.original_bus(flow.input),
                output: aggregation.original_bus(flow.output),
                power_in: flow.power_in,
                power_out: flow.power_out,
            })
        })
        .collect();

    FlowResult::new(
        aggregate_flow.status,
        aggregate_flow.status_detail.clone(),
        aggregate_flow.iterations,
        dist.voltages,
        dist.currents,
        transformer_flows,
    )
}

/// Solves original-network configurations on the aggregate network.
pub struct AggregateFlowProvider {
    aggregation: Arc<NetworkAggregation>,
    inner: Arc<dyn FlowProvider>,
    name: String,
}

impl AggregateFlowProvider {
    pub fn new(aggregation: Arc<NetworkAggregation>, inner: Arc<dyn FlowProvider>) -> Self {
        let name = format!("aggregated-{}", inner.name());
        Self {
            aggregation,
            inner,
            name,
        }
    }

    pub fn aggregation(&self) -> &Arc<NetworkAggregation> {
        &self.aggregation
    }

    fn aggregate_inputs(
        &self,
        configuration: &NetworkConfiguration,
        demands: &PowerDemands,
    ) -> (NetworkConfiguration, PowerDemands) {
        let settings = self
            .aggregation
            .map_settings_to_aggregate(configuration.settings());
        let config =
            NetworkConfiguration::new(self.aggregation.aggregate_network().clone(), settings);
        let demands = demands.remap(|bus: BusId| self.aggregation.aggregate_bus(bus));
        (config, demands)
    }

    /// An aggregate-network result holding the voltages of `previous`, used
    /// only to warm start the inner provider.
    fn aggregate_warm_start(&self, previous: &FlowResult) -> FlowResult {
        let aggregate = self.aggregation.aggregate_network();
        let voltages = aggregate
            .bus_ids()
            .map(|bus| previous.voltage(self.aggregation.original_bus(bus)))
            .collect();
        FlowResult::new(
            previous.status,
            previous.status_detail.clone(),
            previous.iterations,
            voltages,
            vec![Complex64::default(); aggregate.line_count()],
            Vec::new(),
        )
    }
}

impl FlowProvider for AggregateFlowProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute_flow(
        &self,
        configuration: &NetworkConfiguration,
        demands: &PowerDemands,
    ) -> FlowResult {
        let (config, demands) = self.aggregate_inputs(configuration, demands);
        let flow = self.inner.compute_flow(&config, &demands);
        disaggregate_flow(&self.aggregation, &flow, configuration)
    }

    fn compute_flow_from(
        &self,
        configuration: &NetworkConfiguration,
        demands: &PowerDemands,
        previous: &FlowResult,
    ) -> FlowResult {
        let (config, demands) = self.aggregate_inputs(configuration, demands);
        let flow = if previous.bus_count() == self.aggregation.original_network().bus_count() {
            let warm = self.aggregate_warm_start(previous);
            self.inner.compute_flow_from(&config, &demands, &warm)
        } else {
            self.inner.compute_flow(&config, &demands)
        };
        disaggregate_flow(&self.aggregation, &flow, configuration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power_flow::{FlowStatus, IteratedDistFlow};
    use feederopt_core::{LineSpec, NetworkBuilder};

    fn z(re: f64) -> Complex64 {
        Complex64::new(re, 0.0)
    }

    #[test]
    fn test_parallel_split_follows_impedance() {
        let mut b = NetworkBuilder::new();
        let g = Complex64::new(1e6, 1e6);
        b.add_provider("p", 230.0, g, -g).unwrap();
        let c = b.add_consumer("c", 200.0, 250.0).unwrap();
        b.add_line(LineSpec::new("a", "p", "c", z(1.0))).unwrap();
        b.add_line(LineSpec::new("b", "p", "c", z(3.0))).unwrap();
        let network = Arc::new(b.build());
        let aggregation = NetworkAggregation::aggregate(&network).unwrap();
        assert_eq!(aggregation.aggregate_network().line_count(), 1);

        let agg_net = aggregation.aggregate_network().clone();
        let agg_c = aggregation.aggregate_bus(c).unwrap();
        let mut demands = PowerDemands::new();
        demands.set(&agg_net, agg_c, z(200.0)).unwrap();
        let agg_config = NetworkConfiguration::all_closed(agg_net.clone());
        let agg_flow = IteratedDistFlow::new().compute_flow(&agg_config, &demands);

        // the original is meshed, but distribution only needs its handles
        let original = NetworkConfiguration::all_closed(network.clone());
        let flow = disaggregate_flow(&aggregation, &agg_flow, &original);
        let p = network.bus_by_name("p").unwrap();
        let a = network.line_by_name("a").unwrap();
        let bl = network.line_by_name("b").unwrap();
        let agg_p = aggregation.aggregate_bus(p).unwrap();
        let agg_line = agg_net.line_ids().next().unwrap();
        let total = agg_flow.current(&agg_net, agg_p, agg_line);
        let (ia, ib) = (flow.current(&network, p, a), flow.current(&network, p, bl));
        assert!((ia - total * 0.75).norm() < 1e-12);
        assert!((ib - total * 0.25).norm() < 1e-12);
        assert!((flow.voltage(c) - agg_flow.voltage(agg_c)).norm() < 1e-12);
        // both branches see the same drop
        assert!((flow.voltage(p) - flow.voltage(c) - ia * z(1.0)).norm() < 1e-9);
        assert!((flow.voltage(p) - flow.voltage(c) - ib * z(3.0)).norm() < 1e-9);
    }

    #[test]
    fn test_zero_impedance_member_takes_all_current() {
        let mut b = NetworkBuilder::new();
        let g = Complex64::new(1e6, 1e6);
        b.add_provider("p", 230.0, g, -g).unwrap();
        let c = b.add_consumer("c", 200.0, 250.0).unwrap();
        b.add_line(LineSpec::new("a", "p", "c", z(0.0))).unwrap();
        b.add_line(LineSpec::new("b", "p", "c", z(2.0))).unwrap();
        let network = Arc::new(b.build());
        let aggregation = NetworkAggregation::aggregate(&network).unwrap();
        let agg_net = aggregation.aggregate_network().clone();
        assert_eq!(agg_net.lines().next().unwrap().impedance, z(0.0));

        let mut demands = PowerDemands::new();
        demands
            .set(&agg_net, aggregation.aggregate_bus(c).unwrap(), z(230.0))
            .unwrap();
        let agg_flow = IteratedDistFlow::new()
            .compute_flow(&NetworkConfiguration::all_closed(agg_net.clone()), &demands);
        let flow = disaggregate_flow(
            &aggregation,
            &agg_flow,
            &NetworkConfiguration::all_closed(network.clone()),
        );
        let a = network.line_by_name("a").unwrap();
        let bl = network.line_by_name("b").unwrap();
        assert!((flow.line_current(a).norm() - 1.0).abs() < 1e-12);
        assert_eq!(flow.line_current(bl), Complex64::default());
    }

    #[test]
    fn test_warm_start_passes_through_aggregation() {
        let mut b = NetworkBuilder::new();
        let g = Complex64::new(1e6, 1e6);
        b.add_provider("p", 230.0, g, -g).unwrap();
        b.add_transition("m").unwrap();
        let c = b.add_consumer("c", 200.0, 250.0).unwrap();
        b.add_line(LineSpec::new("a", "p", "m", z(0.5))).unwrap();
        b.add_line(LineSpec::new("b", "m", "c", z(1.5))).unwrap();
        let network = Arc::new(b.build());
        let aggregation = Arc::new(NetworkAggregation::aggregate(&network).unwrap());
        assert_eq!(aggregation.aggregate_network().line_count(), 1);

        let provider = AggregateFlowProvider::new(aggregation, Arc::new(IteratedDistFlow::new()));
        let mut demands = PowerDemands::new();
        demands.set(&network, c, z(300.0)).unwrap();
        let config = NetworkConfiguration::all_closed(network.clone());

        let cold = provider.compute_flow(&config, &demands);
        let warm = provider.compute_flow_from(&config, &demands, &cold);
        assert_eq!(warm.status, FlowStatus::Exact);
        assert!(warm.iterations < cold.iterations);
        assert!((warm.voltage(c) - cold.voltage(c)).norm() < 1e-6);
        let m = network.bus_by_name("m").unwrap();
        assert!((warm.voltage(m) - cold.voltage(m)).norm() < 1e-6);
    }
}
