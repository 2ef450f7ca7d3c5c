//! Fixture networks shared by the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use feederopt_algo::{FlowProvider, IteratedDistFlow, ProblemContext, Solution};
use feederopt_core::{
    BridgePolicy, LineSpec, Network, NetworkBuilder, Period, PeriodData, PowerDemands,
    TransformerMode, TransformerOperation,
};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

pub fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn generation() -> Complex64 {
    c(1e7, 1e7)
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// One-hour periods `h0`, `h1`, ... with the given demands.
pub fn hourly(demands: Vec<PowerDemands>) -> Vec<PeriodData> {
    demands
        .into_iter()
        .enumerate()
        .map(|(i, demands)| {
            let start = epoch() + chrono::Duration::hours(i as i64);
            PeriodData {
                period: Period::new(format!("h{i}"), i, start, start + chrono::Duration::hours(1))
                    .unwrap(),
                demands,
            }
        })
        .collect()
}

pub fn context_with(
    network: Arc<Network>,
    demands: Vec<PowerDemands>,
    provider: Arc<dyn FlowProvider>,
) -> Arc<ProblemContext> {
    Arc::new(ProblemContext::new(network, hourly(demands), provider).unwrap())
}

pub fn context(network: Arc<Network>, demands: Vec<PowerDemands>) -> Arc<ProblemContext> {
    context_with(network, demands, Arc::new(IteratedDistFlow::new()))
}

/// Provider `p0` feeding a random tree of consumers `c0..`, plus switchable
/// ties between random buses. Every loop contains a switch.
pub fn random_network(seed: u64, buses: usize, ties: usize) -> Arc<Network> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut b = NetworkBuilder::new();
    b.add_provider("p0", 400.0, generation(), -generation())
        .unwrap();
    let mut names = vec!["p0".to_string()];
    for i in 0..buses {
        let name = format!("c{i}");
        b.add_consumer(&name, 380.0, 420.0).unwrap();
        let parent = names[rng.gen_range(0..names.len())].clone();
        let z = c(rng.gen_range(0.01..0.2), rng.gen_range(0.0..0.05));
        let mut spec = LineSpec::new(format!("t{i}"), parent, name.clone(), z);
        if rng.gen_bool(0.4) {
            spec = spec.switchable(rng.gen_range(1.0..5.0));
        }
        b.add_line(spec).unwrap();
        names.push(name);
    }
    for k in 0..ties {
        let a = rng.gen_range(0..names.len());
        let mut other = rng.gen_range(0..names.len());
        if a == other {
            other = (other + 1) % names.len();
        }
        let z = c(rng.gen_range(0.01..0.2), rng.gen_range(0.0..0.05));
        let spec = LineSpec::new(format!("tie{k}"), names[a].clone(), names[other].clone(), z);
        b.add_line(spec.switchable(rng.gen_range(1.0..5.0))).unwrap();
    }
    Arc::new(b.build())
}

/// Small random demands on every consumer, one set per period.
pub fn random_demands(network: &Network, seed: u64, periods: usize) -> Vec<PowerDemands> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..periods)
        .map(|_| {
            let mut demands = PowerDemands::new();
            for bus in network.consumers() {
                let s = c(rng.gen_range(100.0..500.0), rng.gen_range(0.0..100.0));
                demands.set(network, bus.id, s).unwrap();
            }
            demands
        })
        .collect()
}

/// A random radial start for `random_network`.
pub fn random_solution(seed: u64, buses: usize, ties: usize, periods: usize) -> Solution {
    let network = random_network(seed, buses, ties);
    let demands = random_demands(&network, seed.wrapping_add(1), periods);
    let ctx = context(network, demands);
    Solution::radial_start(ctx, None, &mut BridgePolicy::seeded(seed)).unwrap()
}

/// A medium-voltage feeder with two supply paths, a transformer to a
/// low-voltage ring, serial chains of plain lines and a dangling stub.
///
/// ```text
///   p ─f1─ m1 ─f2─ m2 ─f3─ x ─f4─ t_hv ═t═ t_lv ─s1─ y
///   │                      │ ╲                 ╲        ╎ tie1
///   g1 (sw)           tie2 (sw) d1─dd─d2─de     s2─ n ─s3─ z
///   │                      │
///   w ─────────────────────┘
/// ```
pub fn mv_lv_feeder() -> Arc<Network> {
    let mut b = NetworkBuilder::new();
    b.add_provider("p", 11_000.0, generation(), -generation())
        .unwrap();
    for name in ["m1", "m2", "n", "dd", "de"] {
        b.add_transition(name).unwrap();
    }
    b.add_consumer("x", 10_000.0, 12_000.0).unwrap();
    b.add_consumer("w", 10_000.0, 12_000.0).unwrap();
    for name in ["y", "z"] {
        b.add_consumer(name, 360.0, 440.0).unwrap();
    }
    b.add_transformer(
        "t",
        &[("t_hv", 11_000.0), ("t_lv", 400.0)],
        vec![TransformerMode {
            input: 0,
            output: 1,
            operation: TransformerOperation::FixedRatio(27.5),
            power_factor: 0.99,
            bidirectional: false,
        }],
    )
    .unwrap();

    let mv = c(0.4, 0.2);
    let lv = c(0.05, 0.01);
    for (name, from, to, z) in [
        ("f1", "p", "m1", mv),
        ("f2", "m1", "m2", mv),
        ("f3", "m2", "x", mv * 2.0),
        ("f4", "x", "t_hv", mv * 0.5),
        ("s1", "t_lv", "y", lv),
        ("s2", "t_lv", "n", lv),
        ("s3", "n", "z", lv * 3.0),
        ("d1", "x", "dd", mv),
        ("d2", "dd", "de", mv),
    ] {
        b.add_line(LineSpec::new(name, from, to, z)).unwrap();
    }
    b.add_line(LineSpec::new("g1", "p", "w", mv * 3.0).switchable(10.0))
        .unwrap();
    b.add_line(LineSpec::new("tie2", "w", "x", mv).switchable(10.0))
        .unwrap();
    b.add_line(LineSpec::new("tie1", "y", "z", lv).switchable(2.0))
        .unwrap();
    Arc::new(b.build())
}

/// Demands for [`mv_lv_feeder`]; `scale` grows the load per period.
pub fn mv_lv_demands(network: &Network, periods: usize) -> Vec<PowerDemands> {
    (0..periods)
        .map(|i| {
            let scale = 1.0 + 0.5 * i as f64;
            let mut demands = PowerDemands::new();
            for (bus, s) in [
                ("x", c(40_000.0, 8_000.0)),
                ("w", c(25_000.0, 5_000.0)),
                ("y", c(6_000.0, 1_000.0)),
                ("z", c(9_000.0, 2_000.0)),
            ] {
                let id = network.bus_by_name(bus).unwrap();
                demands.set(network, id, s * scale).unwrap();
            }
            demands
        })
        .collect()
}
