//! Radiality invariants on randomly generated meshed networks.
//!
//! Networks are generated from a seed: every provider owns a random tree of
//! consumers, and extra switchable ties are laid between random buses. Every
//! loop therefore contains at least one switch and `make_radial` must
//! succeed.

use feederopt_core::{BridgePolicy, LineSpec, Network, NetworkBuilder, NetworkConfiguration};
use num_complex::Complex64;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn random_network(seed: u64, buses: usize, providers: usize, ties: usize) -> Arc<Network> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut b = NetworkBuilder::new();
    let g = Complex64::new(1e7, 1e7);
    let mut names = Vec::new();
    for p in 0..providers {
        let name = format!("p{p}");
        b.add_provider(&name, 400.0, g, -g).unwrap();
        names.push(name);
    }
    for i in 0..buses {
        let name = format!("c{i}");
        b.add_consumer(&name, 300.0, 500.0).unwrap();
        // attach below any earlier bus, so each provider grows its own tree
        let parent = names[rng.gen_range(0..names.len())].clone();
        let z = Complex64::new(rng.gen_range(0.01..0.5), rng.gen_range(0.0..0.2));
        let mut spec = LineSpec::new(format!("t{i}"), parent, name.clone(), z);
        if rng.gen_bool(0.3) {
            spec = spec.switchable(1.0);
        }
        b.add_line(spec).unwrap();
        names.push(name);
    }
    for k in 0..ties {
        let a = rng.gen_range(0..names.len());
        let mut c = rng.gen_range(0..names.len());
        if a == c {
            c = (c + 1) % names.len();
        }
        let z = Complex64::new(rng.gen_range(0.01..0.5), 0.0);
        let spec = LineSpec::new(format!("tie{k}"), names[a].clone(), names[c].clone(), z);
        b.add_line(spec.switchable(2.0)).unwrap();
    }
    Arc::new(b.build())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_make_radial_yields_consistent_forest(
        seed in any::<u64>(),
        buses in 2usize..25,
        providers in 1usize..3,
        ties in 0usize..8,
        policy_seed in any::<u64>(),
    ) {
        let network = random_network(seed, buses, providers, ties);
        let mut config = NetworkConfiguration::all_closed(network.clone());
        config.make_radial(&mut BridgePolicy::seeded(policy_seed)).unwrap();

        prop_assert!(config.is_radial());
        prop_assert!(config.is_connected());
        prop_assert!(!config.has_cycles());

        let topology = config.topology();
        for bus in network.bus_ids() {
            prop_assert!(topology.provider_of(bus).is_some());
            for link in topology.downstream_links(bus) {
                prop_assert_eq!(topology.upstream_bus(link.to), Some(bus));
            }
        }
        let total: usize = topology.tree_sizes().values().sum();
        prop_assert_eq!(total, network.bus_count());
        prop_assert_eq!(topology.order().len(), network.bus_count());
    }

    #[test]
    fn test_cycle_with_open_switch_is_closed_path(
        seed in any::<u64>(),
        buses in 3usize..20,
        ties in 1usize..6,
    ) {
        let network = random_network(seed, buses, 2, ties);
        let mut config = NetworkConfiguration::all_closed(network.clone());
        config.make_radial(&mut BridgePolicy::First).unwrap();

        let open: Vec<_> = config.settings().open_switches().collect();
        for switch in open {
            let Some(cycle) = config.find_cycle_with(switch) else {
                continue;
            };
            prop_assert!(cycle.iter().any(|d| d.line() == Some(switch)));
            for pair in cycle.windows(2) {
                prop_assert_eq!(pair[0].to, pair[1].from);
            }
            let start = cycle[0].from;
            let end = cycle[cycle.len() - 1].to;
            prop_assert!(
                start == end
                    || (network.bus(start).is_provider() && network.bus(end).is_provider())
            );
            // closing the switch breaks radiality; opening any other switch
            // on the cycle restores it
            let mut closed = config.clone();
            closed.set_switch(switch, false);
            prop_assert!(!closed.is_radial());
            for other in cycle.iter().filter_map(|d| d.line()) {
                if other != switch && network.line(other).switchable {
                    prop_assert!(config.with_swap(other, switch).is_radial());
                }
            }
        }
    }
}
