//! Switch configuration of a network and the topology it induces.
//!
//! A [`NetworkConfiguration`] pairs a shared [`Network`] with one
//! [`SwitchSettings`]. Everything that depends on the switch states (which
//! provider feeds a bus, through which link, which closed links close a loop)
//! is derived on demand into a [`Topology`] and cached until the next
//! mutation.
//!
//! ## Traversal
//!
//! The topology is built by a breadth-first search started from all
//! providers at once, over closed lines and transformer hops:
//!
//! ```text
//!   P1 ──l1── b2 ──l2── b3 ┄┄s1┄┄ b4 ──l3── P2
//!                        │
//!                       [T] hv ─hop─ lv ──l4── b5
//! ```
//!
//! A transformer behaves as a star: the terminal through which the search
//! first enters a transformer fans out to the other terminals, and the hop
//! used is checked against the transformer's modes. A closed link reaching an
//! already visited bus is an *extra link*: it closes either a loop or a path
//! between two providers, and either way the configuration is not radial.
//!
//! Buses the provider search never reaches are traversed afterwards, one
//! component at a time, so that loops of closed lines inside isolated parts
//! are detected as well.

use crate::{BusId, LineId, Network, SwitchSettings, TransformerId};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

/// A traversable connection between two buses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Link {
    Line(LineId),
    /// Hop between two terminals of the same transformer
    Transformer(TransformerId),
}

impl Link {
    pub fn line(&self) -> Option<LineId> {
        match self {
            Link::Line(line) => Some(*line),
            Link::Transformer(_) => None,
        }
    }
}

/// A link traversed in a given direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DirectedLink {
    pub link: Link,
    pub from: BusId,
    pub to: BusId,
}

impl DirectedLink {
    pub fn reversed(self) -> Self {
        Self {
            link: self.link,
            from: self.to,
            to: self.from,
        }
    }

    pub fn line(&self) -> Option<LineId> {
        self.link.line()
    }
}

/// A tree hop through a transformer for which no mode exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MissingMode {
    pub transformer: TransformerId,
    /// Terminal bus where flow enters
    pub input: BusId,
    /// Terminal bus where flow leaves
    pub output: BusId,
}

/// Relations derived from a switch configuration.
///
/// All tables are indexed by [`BusId`].
#[derive(Debug, Clone)]
pub struct Topology {
    upstream: Vec<Option<DirectedLink>>,
    provider: Vec<Option<BusId>>,
    root: Vec<BusId>,
    depth: Vec<usize>,
    downstream: Vec<Vec<DirectedLink>>,
    order: Vec<BusId>,
    extra_links: Vec<DirectedLink>,
    missing_modes: Vec<MissingMode>,
    disconnected: Vec<BusId>,
}

impl Topology {
    pub(crate) fn build(network: &Network, settings: &SwitchSettings) -> Self {
        let n = network.bus_count();
        let mut topology = Topology {
            upstream: vec![None; n],
            provider: vec![None; n],
            root: (0..n).map(BusId::new).collect(),
            depth: vec![0; n],
            downstream: vec![Vec::new(); n],
            order: Vec::with_capacity(n),
            extra_links: Vec::new(),
            missing_modes: Vec::new(),
            disconnected: Vec::new(),
        };
        let mut visited = vec![false; n];
        let mut seen_extra = HashSet::new();

        let mut queue = VecDeque::new();
        for provider in network.providers() {
            visited[provider.id.value()] = true;
            topology.provider[provider.id.value()] = Some(provider.id);
            queue.push_back(provider.id);
        }
        topology.traverse(network, settings, queue, &mut visited, &mut seen_extra, true);

        topology.disconnected = network
            .bus_ids()
            .filter(|b| !visited[b.value()])
            .collect();
        for start in topology.disconnected.clone() {
            if visited[start.value()] {
                continue;
            }
            visited[start.value()] = true;
            let queue = VecDeque::from([start]);
            topology.traverse(network, settings, queue, &mut visited, &mut seen_extra, false);
        }
        topology
    }

    fn traverse(
        &mut self,
        network: &Network,
        settings: &SwitchSettings,
        mut queue: VecDeque<BusId>,
        visited: &mut [bool],
        seen_extra: &mut HashSet<(Link, BusId, BusId)>,
        from_providers: bool,
    ) {
        while let Some(bus) = queue.pop_front() {
            if from_providers {
                self.order.push(bus);
            }
            let entered = self.upstream[bus.value()].map(|d| d.link);
            for step in adjacent_links(network, settings, bus, entered) {
                let to = step.to.value();
                if !visited[to] {
                    visited[to] = true;
                    self.upstream[to] = Some(step);
                    self.provider[to] = self.provider[bus.value()];
                    self.root[to] = self.root[bus.value()];
                    self.depth[to] = self.depth[bus.value()] + 1;
                    self.downstream[bus.value()].push(step);
                    if let Link::Transformer(id) = step.link {
                        let transformer = network.transformer(id);
                        let valid = match (
                            transformer.terminal_index(step.from),
                            transformer.terminal_index(step.to),
                        ) {
                            (Some(input), Some(output)) => transformer.allows(input, output),
                            _ => false,
                        };
                        if !valid {
                            self.missing_modes.push(MissingMode {
                                transformer: id,
                                input: step.from,
                                output: step.to,
                            });
                        }
                    }
                    queue.push_back(step.to);
                } else {
                    let key = (step.link, bus.min(step.to), bus.max(step.to));
                    if seen_extra.insert(key) {
                        self.extra_links.push(step);
                    }
                }
            }
        }
    }

    /// Link from the upstream bus into `bus`.
    pub fn upstream_link(&self, bus: BusId) -> Option<DirectedLink> {
        self.upstream[bus.value()]
    }

    pub fn upstream_bus(&self, bus: BusId) -> Option<BusId> {
        self.upstream[bus.value()].map(|d| d.from)
    }

    /// Provider at the root of the tree containing `bus`.
    pub fn provider_of(&self, bus: BusId) -> Option<BusId> {
        self.provider[bus.value()]
    }

    pub fn downstream_links(&self, bus: BusId) -> &[DirectedLink] {
        &self.downstream[bus.value()]
    }

    pub fn depth(&self, bus: BusId) -> usize {
        self.depth[bus.value()]
    }

    /// Provider-reached buses in breadth-first order (parents first).
    pub fn order(&self) -> &[BusId] {
        &self.order
    }

    /// Closed links that close a loop or join two provider trees.
    pub fn extra_links(&self) -> &[DirectedLink] {
        &self.extra_links
    }

    pub fn missing_modes(&self) -> &[MissingMode] {
        &self.missing_modes
    }

    /// Buses no provider reaches through closed links.
    pub fn disconnected(&self) -> &[BusId] {
        &self.disconnected
    }

    pub fn is_reached(&self, bus: BusId) -> bool {
        self.provider[bus.value()].is_some()
    }

    pub fn is_radial(&self) -> bool {
        self.extra_links.is_empty()
    }

    pub fn is_connected(&self) -> bool {
        self.disconnected.is_empty()
    }

    /// True if some closed loop exists, ignoring paths between providers.
    pub fn has_cycles(&self) -> bool {
        self.extra_links
            .iter()
            .any(|l| self.root[l.from.value()] == self.root[l.to.value()])
    }

    pub fn allows_radial_flow(&self) -> bool {
        self.is_radial() && self.missing_modes.is_empty()
    }

    /// Links from the tree root down to `bus`.
    pub fn path_from_root(&self, bus: BusId) -> Vec<DirectedLink> {
        let mut path = Vec::with_capacity(self.depth(bus));
        let mut current = bus;
        while let Some(link) = self.upstream[current.value()] {
            path.push(link);
            current = link.from;
        }
        path.reverse();
        path
    }

    /// `bus` and every bus below it.
    pub fn subtree(&self, bus: BusId) -> Vec<BusId> {
        let mut buses = vec![bus];
        let mut i = 0;
        while i < buses.len() {
            buses.extend(self.downstream[buses[i].value()].iter().map(|d| d.to));
            i += 1;
        }
        buses
    }

    /// Number of buses in the tree of each provider.
    pub fn tree_sizes(&self) -> BTreeMap<BusId, usize> {
        let mut sizes = BTreeMap::new();
        for provider in self.provider.iter().flatten() {
            *sizes.entry(*provider).or_insert(0) += 1;
        }
        sizes
    }

    /// The loop (or provider-to-provider path) that `link` closes.
    ///
    /// Starts at the common ancestor of both ends, or at the provider of
    /// `link.from` when the ends hang below different providers. Returns
    /// `None` when closing `link` creates neither.
    pub fn cycle_closing(&self, link: DirectedLink) -> Option<Vec<DirectedLink>> {
        let (a, b) = (link.from, link.to);
        if self.root[a.value()] != self.root[b.value()] {
            if !self.is_reached(a) || !self.is_reached(b) {
                return None;
            }
            let mut cycle = self.path_from_root(a);
            cycle.push(link);
            cycle.extend(
                self.path_from_root(b)
                    .into_iter()
                    .rev()
                    .map(DirectedLink::reversed),
            );
            return Some(cycle);
        }

        let (mut x, mut y) = (a, b);
        let mut down = Vec::new();
        let mut up = Vec::new();
        while self.depth(x) > self.depth(y) {
            let step = self.upstream[x.value()]?;
            down.push(step);
            x = step.from;
        }
        while self.depth(y) > self.depth(x) {
            let step = self.upstream[y.value()]?;
            up.push(step.reversed());
            y = step.from;
        }
        while x != y {
            let sx = self.upstream[x.value()]?;
            down.push(sx);
            x = sx.from;
            let sy = self.upstream[y.value()]?;
            up.push(sy.reversed());
            y = sy.from;
        }
        down.reverse();
        down.push(link);
        down.extend(up);
        Some(down)
    }
}

/// Closed lines and transformer hops leaving `bus`.
///
/// Transformer hops are only offered from the terminal the traversal entered
/// the transformer through, so a transformer with three windings stays a star.
pub(crate) fn adjacent_links(
    network: &Network,
    settings: &SwitchSettings,
    bus: BusId,
    entered: Option<Link>,
) -> Vec<DirectedLink> {
    let mut links = Vec::new();
    for line in network.incident_lines(bus) {
        if settings.is_open(line) || entered == Some(Link::Line(line)) {
            continue;
        }
        links.push(DirectedLink {
            link: Link::Line(line),
            from: bus,
            to: network.line(line).other_end(bus),
        });
    }
    if let Some((id, _)) = network.bus(bus).transformer_terminal() {
        if entered != Some(Link::Transformer(id)) {
            for terminal in &network.transformer(id).terminals {
                if terminal.bus != bus {
                    links.push(DirectedLink {
                        link: Link::Transformer(id),
                        from: bus,
                        to: terminal.bus,
                    });
                }
            }
        }
    }
    links
}

/// A network together with one switch configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfiguration {
    network: Arc<Network>,
    settings: SwitchSettings,
    topology: OnceCell<Topology>,
}

impl PartialEq for NetworkConfiguration {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.network, &other.network) && self.settings == other.settings
    }
}

impl NetworkConfiguration {
    pub fn new(network: Arc<Network>, settings: SwitchSettings) -> Self {
        debug_assert_eq!(
            settings.switch_count(),
            network.switchable_lines().count(),
            "switch settings belong to another network"
        );
        Self {
            network,
            settings,
            topology: OnceCell::new(),
        }
    }

    pub fn all_closed(network: Arc<Network>) -> Self {
        let settings = SwitchSettings::all_closed(&network);
        Self::new(network, settings)
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn settings(&self) -> &SwitchSettings {
        &self.settings
    }

    pub fn into_settings(self) -> SwitchSettings {
        self.settings
    }

    pub fn is_open(&self, line: LineId) -> bool {
        self.settings.is_open(line)
    }

    pub fn is_closed(&self, line: LineId) -> bool {
        self.settings.is_closed(line)
    }

    /// Change one switch and drop the derived topology.
    pub fn set_switch(&mut self, line: LineId, open: bool) {
        if self.settings.is_open(line) == open && self.settings.is_switch(line) {
            return;
        }
        self.settings.set_switch(line, open);
        self.topology = OnceCell::new();
    }

    /// Copy of this configuration with `open` opened and `close` closed.
    pub fn with_swap(&self, open: LineId, close: LineId) -> Self {
        let mut settings = self.settings.clone();
        settings.set_switch(open, true);
        settings.set_switch(close, false);
        Self::new(self.network.clone(), settings)
    }

    pub fn topology(&self) -> &Topology {
        self.topology
            .get_or_init(|| Topology::build(&self.network, &self.settings))
    }

    pub fn is_radial(&self) -> bool {
        self.topology().is_radial()
    }

    pub fn is_connected(&self) -> bool {
        self.topology().is_connected()
    }

    pub fn has_cycles(&self) -> bool {
        self.topology().has_cycles()
    }

    pub fn allows_radial_flow(&self) -> bool {
        self.topology().allows_radial_flow()
    }

    pub fn disconnected_buses(&self) -> &[BusId] {
        self.topology().disconnected()
    }
}
