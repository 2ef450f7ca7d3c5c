//! Solving on the aggregate network and distributing the result back must
//! agree with solving the original network directly.

mod common;

use feederopt_algo::{
    optimize, optimize_aggregated, AggregateFlowProvider, ConstraintSet, FlowProvider, FlowResult,
    IteratedDistFlow, Objective, OptimizerParameters, Solution, SwitchingCostObjective,
    TotalLossObjective, WeightedObjective,
};
use feederopt_core::{BridgePolicy, Network, NetworkAggregation, NetworkConfiguration};
use std::sync::Arc;

fn assert_flows_match(network: &Network, direct: &FlowResult, aggregated: &FlowResult) {
    for bus in network.bus_ids() {
        let (v, w) = (direct.voltage(bus), aggregated.voltage(bus));
        assert!(
            (v - w).norm() <= 1e-6 * v.norm().max(1.0),
            "bus '{}': {v} != {w}",
            network.bus(bus).name
        );
    }
    for line in network.lines() {
        let (i, j) = (direct.line_current(line.id), aggregated.line_current(line.id));
        assert!(
            (i - j).norm() <= 1e-6 * i.norm().max(1.0),
            "line '{}': {i} != {j}",
            line.name
        );
    }
    for provider in network.providers() {
        let s = direct.provider_injection(network, provider.id);
        let t = aggregated.provider_injection(network, provider.id);
        assert!((s - t).norm() <= 1e-6 * s.norm().max(1.0));
    }
}

#[test]
fn test_aggregate_flow_matches_direct_flow() {
    let network = common::mv_lv_feeder();
    let aggregation = Arc::new(NetworkAggregation::aggregate(&network).unwrap());
    let stats = aggregation.stats();
    assert!(stats.serial_merges >= 3);
    assert!(stats.dangling_lines >= 1);
    assert!(stats.aggregate_lines < stats.original_lines);

    let demands = common::mv_lv_demands(&network, 1).remove(0);
    let direct = IteratedDistFlow::new();
    let via_aggregate = AggregateFlowProvider::new(aggregation, Arc::new(IteratedDistFlow::new()));

    // every radial start the seeded policy produces
    for seed in 0..6 {
        let mut config = NetworkConfiguration::all_closed(network.clone());
        config
            .make_radial_flow_possible(&mut BridgePolicy::seeded(seed))
            .unwrap();
        let a = direct.compute_flow(&config, &demands);
        let b = via_aggregate.compute_flow(&config, &demands);
        assert!(a.is_exact() && b.is_exact());
        assert_flows_match(&network, &a, &b);
        let (la, lb) = (a.total_loss(&network), b.total_loss(&network));
        assert!((la - lb).abs() <= 1e-6 * la);
    }
}

#[test]
fn test_objectives_are_preserved_across_aggregation() {
    let network = common::mv_lv_feeder();
    let demands = common::mv_lv_demands(&network, 2);
    let aggregation = Arc::new(NetworkAggregation::aggregate(&network).unwrap());
    let direct = common::context(network.clone(), demands.clone());
    let aggregated = common::context_with(
        network.clone(),
        demands,
        Arc::new(AggregateFlowProvider::new(
            aggregation,
            Arc::new(IteratedDistFlow::new()),
        )),
    );

    let start = Solution::radial_start(direct, None, &mut BridgePolicy::First).unwrap();
    let same = Solution::new(aggregated, start.all_settings()).unwrap();
    let objective = WeightedObjective::new()
        .with_term(1.0, TotalLossObjective::new())
        .with_term(1.0, SwitchingCostObjective::new());
    let (a, b) = (objective.value(&start), objective.value(&same));
    assert!((a - b).abs() <= 1e-6 * a.abs().max(1.0));
}

#[test]
fn test_optimize_aggregated_returns_original_settings() -> anyhow::Result<()> {
    let network = common::mv_lv_feeder();
    let demands = common::mv_lv_demands(&network, 2);
    let ctx = common::context(network.clone(), demands);
    let start = Solution::radial_start(ctx.clone(), None, &mut BridgePolicy::First)?;
    let start_settings = start.settings(0).clone();
    let objective = TotalLossObjective::new();
    let constraints = ConstraintSet::standard();
    let params = OptimizerParameters::new().with_seed(3);

    let result = optimize_aggregated(&ctx, &start_settings, &objective, &constraints, &params)?;
    assert!(Arc::ptr_eq(result.solution.network(), &network));
    assert!(result.solution.is_radial());
    assert!((result.value - objective.value(&result.solution)).abs() <= 1e-9 * result.value);

    let direct = optimize(start.clone(), &objective, &constraints, &params)?;
    let start_value = objective.value(&start);
    assert!(result.value <= start_value * (1.0 + 1e-6));
    assert!(direct.value <= start_value * (1.0 + 1e-6));
    Ok(())
}
