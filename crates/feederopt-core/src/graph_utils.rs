use crate::configuration::{adjacent_links, Link, Topology};
use crate::{BusId, BusKind, Network, SwitchSettings};
use anyhow::{anyhow, Result};
use petgraph::visit::EdgeRef;
use std::collections::{HashSet, VecDeque};

/// Summary statistics produced by `graph stats`.
#[derive(Debug)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub min_degree: usize,
    pub avg_degree: f64,
    pub max_degree: usize,
    /// Lines that may be opened or closed
    pub switch_count: usize,
    /// Independent loops with all switches closed (edges - nodes + components)
    pub meshes: usize,
}

/// Island summary used in `graph islands`.
#[derive(Debug)]
pub struct IslandSummary {
    pub island_id: usize,
    pub node_count: usize,
    pub provider_count: usize,
}

/// Bus-to-island assignment for reporting.
#[derive(Debug)]
pub struct NodeAssignment {
    pub bus: BusId,
    pub label: String,
    pub island_id: usize,
}

#[derive(Debug)]
pub struct IslandAnalysis {
    pub islands: Vec<IslandSummary>,
    pub assignments: Vec<NodeAssignment>,
}

/// Buses connected to some provider when every switch is closed.
pub fn reachable_from_providers(network: &Network) -> HashSet<BusId> {
    let topology = Topology::build(network, &SwitchSettings::all_closed(network));
    network
        .bus_ids()
        .filter(|bus| topology.is_reached(*bus))
        .collect()
}

pub fn graph_stats(network: &Network) -> Result<GraphStats> {
    let node_count = network.bus_count();
    let edge_count = network.line_count();
    let degrees: Vec<usize> = network
        .bus_ids()
        .map(|bus| network.incident_lines(bus).len())
        .collect();
    let min_degree = *degrees.iter().min().unwrap_or(&0);
    let max_degree = *degrees.iter().max().unwrap_or(&0);
    let avg_degree = if node_count == 0 {
        0.0
    } else {
        degrees.iter().sum::<usize>() as f64 / node_count as f64
    };
    let all_closed = SwitchSettings::all_closed(network);
    let components = find_islands(network, &all_closed)?.islands.len();
    let hops: usize = network
        .transformers()
        .map(|t| t.terminals.len().saturating_sub(1))
        .sum();
    Ok(GraphStats {
        node_count,
        edge_count,
        min_degree,
        avg_degree,
        max_degree,
        switch_count: all_closed.switch_count(),
        meshes: (edge_count + hops + components).saturating_sub(node_count),
    })
}

/// Connected components over closed lines and transformer hops.
pub fn find_islands(network: &Network, settings: &SwitchSettings) -> Result<IslandAnalysis> {
    if settings.switch_count() != network.switchable_lines().count() {
        return Err(anyhow!("switch settings do not belong to this network"));
    }
    let mut visited = vec![false; network.bus_count()];
    let mut islands = Vec::new();
    let mut assignments = Vec::new();
    for start in network.bus_ids() {
        if visited[start.value()] {
            continue;
        }
        let island_id = islands.len();
        visited[start.value()] = true;
        let mut queue = VecDeque::from([start]);
        let mut members = Vec::new();
        while let Some(bus) = queue.pop_front() {
            members.push(bus);
            for step in adjacent_links(network, settings, bus, None) {
                if !visited[step.to.value()] {
                    visited[step.to.value()] = true;
                    queue.push_back(step.to);
                }
            }
        }
        islands.push(IslandSummary {
            island_id,
            node_count: members.len(),
            provider_count: members
                .iter()
                .filter(|b| network.bus(**b).is_provider())
                .count(),
        });
        for bus in members {
            assignments.push(NodeAssignment {
                bus,
                label: network.bus(bus).name.clone(),
                island_id,
            });
        }
    }
    assignments.sort_by_key(|a| a.bus);
    Ok(IslandAnalysis {
        islands,
        assignments,
    })
}

/// Export the network to Graphviz DOT.
///
/// Providers are drawn as boxes and transformer terminals as diamonds. With
/// `settings`, open switches are dashed; switches are always drawn bold.
pub fn export_dot(network: &Network, settings: Option<&SwitchSettings>) -> String {
    let mut buffer = String::new();
    buffer.push_str("graph feeder_network {\n");
    for bus in network.buses() {
        let shape = match bus.kind {
            BusKind::Provider(_) => "box",
            BusKind::Consumer(_) => "ellipse",
            BusKind::Connection => "point",
            BusKind::TransformerTerminal { .. } => "diamond",
        };
        buffer.push_str(&format!(
            "  n{} [label=\"{}\", shape={}];\n",
            bus.id.value(),
            sanitize_label(&bus.name),
            shape
        ));
    }
    for edge in network.graph.edge_references() {
        let line = edge.weight();
        let mut attrs = vec![format!("label=\"{}\"", sanitize_label(&line.name))];
        if line.switchable {
            attrs.push("penwidth=2".to_string());
        }
        if settings.is_some_and(|s| s.is_open(line.id)) {
            attrs.push("style=dashed".to_string());
        }
        buffer.push_str(&format!(
            "  n{} -- n{} [{}];\n",
            edge.source().index(),
            edge.target().index(),
            attrs.join(", ")
        ));
    }
    for transformer in network.transformers() {
        let hv = transformer.terminals[0].bus;
        for terminal in &transformer.terminals[1..] {
            buffer.push_str(&format!(
                "  n{} -- n{} [label=\"{}\", style=dotted];\n",
                hv.value(),
                terminal.bus.value(),
                sanitize_label(&transformer.name)
            ));
        }
    }
    buffer.push('}');
    buffer
}

fn sanitize_label(label: &str) -> String {
    label.replace('"', "\\\"")
}

/// Names of the links in a path, for log and error messages.
pub fn link_names(network: &Network, links: impl IntoIterator<Item = Link>) -> Vec<String> {
    links
        .into_iter()
        .map(|link| match link {
            Link::Line(line) => network.line(line).name.clone(),
            Link::Transformer(id) => network.transformer(id).name.clone(),
        })
        .collect()
}
