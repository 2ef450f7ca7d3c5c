use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use feederopt_algo::{
    optimize, optimize_aggregated, ConstraintSet, IteratedDistFlow, Objective, OptimizerParameters,
    OptimizerResult, ProblemContext, Solution, StopReason, SwitchingCostObjective,
    TotalLossObjective, WeightedObjective,
};
use feederopt_cli::common::{load_network, load_periods, load_settings, write_json, OutputDest};
use feederopt_cli::{AlgorithmArg, ObjectiveKind};
use feederopt_core::{BridgePolicy, Network, SwitchSettings};
use serde::Serialize;
use tracing::info;

pub struct OptimizeArgs<'a> {
    pub network: &'a Path,
    pub demands: &'a Path,
    pub settings: Option<&'a Path>,
    pub params: Option<&'a Path>,
    pub algorithm: Option<AlgorithmArg>,
    pub objective: ObjectiveKind,
    pub switching_weight: f64,
    pub structural_only: bool,
    pub aggregate: bool,
    pub out: &'a str,
}

#[derive(Debug, Serialize)]
struct PeriodSettings {
    period: String,
    /// Line name -> open
    switches: BTreeMap<String, bool>,
}

#[derive(Debug, Serialize)]
struct OptimizeOutput {
    objective: String,
    start_value: f64,
    value: f64,
    iterations: usize,
    accepted_moves: usize,
    elapsed_secs: f64,
    stop_reason: StopReason,
    violated_constraints: Vec<String>,
    periods: Vec<PeriodSettings>,
}

fn build_objective(
    kind: ObjectiveKind,
    switching_weight: f64,
    network: &Network,
    reference: &SwitchSettings,
) -> Box<dyn Objective> {
    let switching = || SwitchingCostObjective::new().with_reference(network, reference);
    match kind {
        ObjectiveKind::Loss => Box::new(TotalLossObjective::new()),
        ObjectiveKind::SwitchingCost => Box::new(switching()),
        ObjectiveKind::Combined => Box::new(
            WeightedObjective::new()
                .with_term(1.0, TotalLossObjective::new())
                .with_term(switching_weight, switching()),
        ),
    }
}

pub fn handle(args: OptimizeArgs<'_>) -> Result<()> {
    let mut params = match args.params {
        Some(path) => OptimizerParameters::load(path)
            .with_context(|| format!("loading optimizer parameters {}", path.display()))?,
        None => OptimizerParameters::default(),
    };
    if let Some(algorithm) = args.algorithm {
        params = params.with_algorithm(algorithm.into());
    }

    let network = load_network(args.network)?;
    let periods = load_periods(&network, args.demands)?;
    let reference = load_settings(&network, args.settings)?;
    let context = Arc::new(ProblemContext::new(
        network.clone(),
        periods,
        Arc::new(IteratedDistFlow::new()),
    )?);

    let mut policy = BridgePolicy::seeded(params.seed);
    let start = Solution::radial_start(context.clone(), Some(&reference), &mut policy)?;
    let changed = reference.differences(start.settings(0)).len();
    if changed > 0 {
        info!(changed, "repaired starting settings to a radial configuration");
    }

    let objective = build_objective(args.objective, args.switching_weight, &network, &reference);
    let constraints = if args.structural_only {
        ConstraintSet::structural()
    } else {
        ConstraintSet::standard()
    };
    let start_value = objective.value(&start);

    let result: OptimizerResult = if args.aggregate {
        let start_settings = start.settings(0).clone();
        optimize_aggregated(
            &context,
            &start_settings,
            objective.as_ref(),
            &constraints,
            &params,
        )?
    } else {
        optimize(start, objective.as_ref(), &constraints, &params)?
    };

    info!(
        objective = objective.name(),
        start_value,
        value = result.value,
        moves = result.accepted_moves,
        stop = %result.stop_reason,
        "optimization finished"
    );

    let periods = context
        .periods
        .iter()
        .zip(result.solution.to_named_settings())
        .map(|(data, switches)| PeriodSettings {
            period: data.period.id.clone(),
            switches,
        })
        .collect();
    let output = OptimizeOutput {
        objective: objective.name().to_string(),
        start_value,
        value: result.value,
        iterations: result.iterations,
        accepted_moves: result.accepted_moves,
        elapsed_secs: result.elapsed.as_secs_f64(),
        stop_reason: result.stop_reason,
        violated_constraints: constraints
            .violated(&result.solution)
            .into_iter()
            .map(String::from)
            .collect(),
        periods,
    };
    write_json(&output, &OutputDest::parse(args.out))
}
