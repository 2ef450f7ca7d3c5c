//! Network aggregation: serial/parallel reduction with an inverse mapping.
//!
//! Aggregation builds a smaller, electrically equivalent [`Network`] in which
//! chains and bundles of plain (non-switchable, non-breaker) lines are
//! replaced by single lines. Switches and breakers are never merged or
//! removed, so every switch of the original network appears unchanged in the
//! aggregate and switch settings map one-to-one by name.
//!
//! ## Steps
//!
//! 1. Drop buses that no provider reaches even with every switch closed,
//!    together with their lines and transformers.
//! 2. Merge a connection bus with exactly two plain lines into one serial
//!    line (impedances add, names join with `+`).
//! 3. Merge plain lines sharing both end buses into one parallel line
//!    (admittances add, names join with `|`). A bundle with a zero-impedance
//!    member has zero combined impedance.
//! 4. Remove connection buses hanging off a single plain line.
//!
//! Steps 2-4 repeat until nothing changes. Every aggregate line keeps a
//! [`DirectedMergedLine`] tree describing which original lines it stands for
//! and in which direction, so that flows computed on the aggregate can be
//! distributed back onto the original lines.
//!
//! ```text
//!   P ──a── m ──b── n ══c══ C        P ──"a+b+c|d"── C
//!                     ══d══
//! ```

use crate::graph_utils::reachable_from_providers;
use crate::{
    BusId, BusKind, FeederError, FeederResult, LineId, LineSpec, Network, NetworkBuilder,
    SwitchSettings,
};
use num_complex::Complex64;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Structure of the original lines behind one aggregate line.
#[derive(Debug, Clone, PartialEq)]
pub enum MergedPart {
    Single {
        line: LineId,
    },
    /// Parts in traversal order; `internal_buses[i]` lies between
    /// `parts[i]` and `parts[i + 1]`
    Serial {
        parts: Vec<DirectedMergedLine>,
        internal_buses: Vec<BusId>,
    },
    /// Parts sharing both end buses, all oriented like the parent
    Parallel {
        parts: Vec<DirectedMergedLine>,
    },
}

/// A merged part traversed from `from` to `to` (original bus ids).
#[derive(Debug, Clone, PartialEq)]
pub struct DirectedMergedLine {
    pub part: MergedPart,
    pub from: BusId,
    pub to: BusId,
    /// Combined series impedance (ohm)
    pub impedance: Complex64,
}

impl DirectedMergedLine {
    fn single(network: &Network, line: LineId) -> Self {
        let l = network.line(line);
        Self {
            part: MergedPart::Single { line },
            from: l.from,
            to: l.to,
            impedance: l.impedance,
        }
    }

    /// The same part traversed in the opposite direction.
    pub fn reversed(&self) -> Self {
        let part = match &self.part {
            MergedPart::Single { line } => MergedPart::Single { line: *line },
            MergedPart::Serial {
                parts,
                internal_buses,
            } => MergedPart::Serial {
                parts: parts.iter().rev().map(Self::reversed).collect(),
                internal_buses: internal_buses.iter().rev().copied().collect(),
            },
            MergedPart::Parallel { parts } => MergedPart::Parallel {
                parts: parts.iter().map(Self::reversed).collect(),
            },
        };
        Self {
            part,
            from: self.to,
            to: self.from,
            impedance: self.impedance,
        }
    }

    /// Copy oriented from `from` to `to`.
    fn oriented(&self, from: BusId, to: BusId) -> Self {
        if self.from == from && self.to == to {
            self.clone()
        } else {
            debug_assert!(self.from == to && self.to == from);
            self.reversed()
        }
    }

    /// True if a single original line is traversed along its own orientation.
    pub fn is_forward(&self, network: &Network) -> bool {
        match self.part {
            MergedPart::Single { line } => network.line(line).from == self.from,
            _ => true,
        }
    }

    /// Every original line represented, in traversal order.
    pub fn original_lines(&self) -> Vec<LineId> {
        let mut lines = Vec::new();
        self.collect_lines(&mut lines);
        lines
    }

    fn collect_lines(&self, out: &mut Vec<LineId>) {
        match &self.part {
            MergedPart::Single { line } => out.push(*line),
            MergedPart::Serial { parts, .. } | MergedPart::Parallel { parts } => {
                for part in parts {
                    part.collect_lines(out);
                }
            }
        }
    }

    /// Original buses strictly inside serial chains.
    pub fn internal_buses(&self) -> Vec<BusId> {
        let mut buses = Vec::new();
        self.collect_internal(&mut buses);
        buses
    }

    fn collect_internal(&self, out: &mut Vec<BusId>) {
        match &self.part {
            MergedPart::Single { .. } => {}
            MergedPart::Serial {
                parts,
                internal_buses,
            } => {
                out.extend(internal_buses.iter().copied());
                for part in parts {
                    part.collect_internal(out);
                }
            }
            MergedPart::Parallel { parts } => {
                for part in parts {
                    part.collect_internal(out);
                }
            }
        }
    }
}

/// A plain line removed because its far end leads nowhere.
#[derive(Debug, Clone, PartialEq)]
pub struct DanglingLine {
    /// Oriented from `kept` to `dropped`
    pub line: DirectedMergedLine,
    pub kept: BusId,
    pub dropped: BusId,
}

/// Size comparison between an original network and its aggregate.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AggregationStats {
    pub original_buses: usize,
    pub original_lines: usize,
    pub aggregate_buses: usize,
    pub aggregate_lines: usize,
    pub serial_merges: usize,
    pub parallel_merges: usize,
    pub dangling_lines: usize,
    pub unconnected_buses: usize,
}

impl std::fmt::Display for AggregationStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {} buses, {} -> {} lines ({} serial, {} parallel merges; {} dangling lines, {} unconnected buses dropped)",
            self.original_buses,
            self.aggregate_buses,
            self.original_lines,
            self.aggregate_lines,
            self.serial_merges,
            self.parallel_merges,
            self.dangling_lines,
            self.unconnected_buses
        )
    }
}

/// Immutable mapping between a network and its aggregate.
#[derive(Debug, Clone)]
pub struct NetworkAggregation {
    original: Arc<Network>,
    aggregate: Arc<Network>,
    merged: Vec<DirectedMergedLine>,
    bus_to_aggregate: Vec<Option<BusId>>,
    bus_to_original: Vec<BusId>,
    line_to_aggregate: Vec<Option<LineId>>,
    unconnected_buses: Vec<BusId>,
    unconnected_lines: Vec<LineId>,
    dangling: Vec<DanglingLine>,
    stats: AggregationStats,
}

struct WorkLine {
    part: DirectedMergedLine,
    name: String,
    i_max: f64,
    v_max: f64,
    switchable: bool,
    switching_cost: f64,
    is_breaker: bool,
    alive: bool,
}

impl WorkLine {
    fn is_plain(&self) -> bool {
        !self.switchable && !self.is_breaker
    }

    fn other_end(&self, bus: BusId) -> BusId {
        if self.part.from == bus {
            self.part.to
        } else {
            self.part.from
        }
    }
}

struct Workspace<'a> {
    network: &'a Network,
    lines: Vec<WorkLine>,
    incident: Vec<Vec<usize>>,
    bus_alive: Vec<bool>,
    dangling: Vec<DanglingLine>,
    serial_merges: usize,
    parallel_merges: usize,
}

impl<'a> Workspace<'a> {
    fn push(&mut self, line: WorkLine) {
        let index = self.lines.len();
        self.incident[line.part.from.value()].push(index);
        self.incident[line.part.to.value()].push(index);
        self.lines.push(line);
    }

    fn kill(&mut self, index: usize) {
        self.lines[index].alive = false;
        let (from, to) = (self.lines[index].part.from, self.lines[index].part.to);
        self.incident[from.value()].retain(|i| *i != index);
        self.incident[to.value()].retain(|i| *i != index);
    }

    fn is_mergeable_bus(&self, bus: BusId) -> bool {
        self.bus_alive[bus.value()] && self.network.bus(bus).is_connection()
    }

    fn merge_serial(&mut self) -> bool {
        let network = self.network;
        let mut changed = false;
        for bus in network.bus_ids() {
            if !self.is_mergeable_bus(bus) || self.incident[bus.value()].len() != 2 {
                continue;
            }
            let (i, j) = (self.incident[bus.value()][0], self.incident[bus.value()][1]);
            let (first, second) = if i < j { (i, j) } else { (j, i) };
            if !self.lines[first].is_plain() || !self.lines[second].is_plain() {
                continue;
            }
            let a = self.lines[first].other_end(bus);
            let c = self.lines[second].other_end(bus);
            if a == c {
                continue;
            }

            let mut parts = Vec::new();
            let mut internal_buses = Vec::new();
            append_serial(
                &mut parts,
                &mut internal_buses,
                self.lines[first].part.oriented(a, bus),
            );
            internal_buses.push(bus);
            append_serial(
                &mut parts,
                &mut internal_buses,
                self.lines[second].part.oriented(bus, c),
            );
            let (l1, l2) = (&self.lines[first], &self.lines[second]);
            let merged = WorkLine {
                part: DirectedMergedLine {
                    impedance: l1.part.impedance + l2.part.impedance,
                    part: MergedPart::Serial {
                        parts,
                        internal_buses,
                    },
                    from: a,
                    to: c,
                },
                name: format!("{}+{}", l1.name, l2.name),
                i_max: l1.i_max.min(l2.i_max),
                v_max: l1.v_max.min(l2.v_max),
                switchable: false,
                switching_cost: 0.0,
                is_breaker: false,
                alive: true,
            };
            self.kill(first);
            self.kill(second);
            self.bus_alive[bus.value()] = false;
            self.push(merged);
            self.serial_merges += 1;
            changed = true;
        }
        changed
    }

    fn merge_parallel(&mut self) -> bool {
        let mut groups: BTreeMap<(BusId, BusId), Vec<usize>> = BTreeMap::new();
        for (index, line) in self.lines.iter().enumerate() {
            if line.alive && line.is_plain() {
                let (a, b) = (line.part.from, line.part.to);
                groups.entry((a.min(b), a.max(b))).or_default().push(index);
            }
        }
        let mut changed = false;
        for members in groups.into_values().filter(|m| m.len() > 1) {
            let (from, to) = (self.lines[members[0]].part.from, self.lines[members[0]].part.to);
            let mut parts = Vec::new();
            for index in &members {
                let oriented = self.lines[*index].part.oriented(from, to);
                match oriented.part {
                    MergedPart::Parallel { parts: inner } => parts.extend(inner),
                    _ => parts.push(oriented),
                }
            }
            let impedance = parallel_impedance(parts.iter().map(|p| p.impedance));
            let names: Vec<&str> = members.iter().map(|i| self.lines[*i].name.as_str()).collect();
            let merged = WorkLine {
                part: DirectedMergedLine {
                    part: MergedPart::Parallel { parts },
                    from,
                    to,
                    impedance,
                },
                name: names.join("|"),
                i_max: members.iter().map(|i| self.lines[*i].i_max).sum(),
                v_max: members
                    .iter()
                    .map(|i| self.lines[*i].v_max)
                    .fold(f64::INFINITY, f64::min),
                switchable: false,
                switching_cost: 0.0,
                is_breaker: false,
                alive: true,
            };
            for index in members {
                self.kill(index);
            }
            self.push(merged);
            self.parallel_merges += 1;
            changed = true;
        }
        changed
    }

    fn remove_dangling(&mut self) -> bool {
        let network = self.network;
        let mut changed = false;
        for bus in network.bus_ids() {
            if !self.is_mergeable_bus(bus) || self.incident[bus.value()].len() != 1 {
                continue;
            }
            let index = self.incident[bus.value()][0];
            if !self.lines[index].is_plain() {
                continue;
            }
            let kept = self.lines[index].other_end(bus);
            self.dangling.push(DanglingLine {
                line: self.lines[index].part.oriented(kept, bus),
                kept,
                dropped: bus,
            });
            self.kill(index);
            self.bus_alive[bus.value()] = false;
            changed = true;
        }
        changed
    }
}

fn append_serial(
    parts: &mut Vec<DirectedMergedLine>,
    internal_buses: &mut Vec<BusId>,
    next: DirectedMergedLine,
) {
    match next.part {
        MergedPart::Serial {
            parts: inner,
            internal_buses: inner_buses,
        } => {
            parts.extend(inner);
            internal_buses.extend(inner_buses);
        }
        _ => parts.push(next),
    }
}

/// Parallel combination; exactly zero when any member has zero impedance.
pub fn parallel_impedance(impedances: impl IntoIterator<Item = Complex64>) -> Complex64 {
    let mut admittance = Complex64::new(0.0, 0.0);
    for z in impedances {
        if z == Complex64::new(0.0, 0.0) {
            return Complex64::new(0.0, 0.0);
        }
        admittance += z.inv();
    }
    if admittance == Complex64::new(0.0, 0.0) {
        Complex64::new(0.0, 0.0)
    } else {
        admittance.inv()
    }
}

impl NetworkAggregation {
    /// Aggregate `original`.
    pub fn aggregate(original: &Arc<Network>) -> FeederResult<Self> {
        let network: &Network = original;
        let reachable = reachable_from_providers(network);
        let unconnected_buses: Vec<BusId> = network
            .bus_ids()
            .filter(|b| !reachable.contains(b))
            .collect();

        let mut work = Workspace {
            network,
            lines: Vec::with_capacity(network.line_count()),
            incident: vec![Vec::new(); network.bus_count()],
            bus_alive: network.bus_ids().map(|b| reachable.contains(&b)).collect(),
            dangling: Vec::new(),
            serial_merges: 0,
            parallel_merges: 0,
        };
        let mut unconnected_lines = Vec::new();
        for line in network.lines() {
            if !reachable.contains(&line.from) {
                unconnected_lines.push(line.id);
                continue;
            }
            work.push(WorkLine {
                part: DirectedMergedLine::single(network, line.id),
                name: line.name.clone(),
                i_max: line.i_max,
                v_max: line.v_max,
                switchable: line.switchable,
                switching_cost: line.switching_cost,
                is_breaker: line.is_breaker,
                alive: true,
            });
        }

        loop {
            let changed = work.merge_serial() | work.merge_parallel() | work.remove_dangling();
            if !changed {
                break;
            }
        }

        let mut builder = NetworkBuilder::new();
        for bus in network.buses() {
            if !work.bus_alive[bus.id.value()] {
                continue;
            }
            match &bus.kind {
                BusKind::Connection => {
                    builder.add_transition(&bus.name)?;
                }
                BusKind::Consumer(limits) => {
                    builder.add_consumer(&bus.name, limits.v_min, limits.v_max)?;
                }
                BusKind::Provider(data) => {
                    builder.add_provider(
                        &bus.name,
                        data.voltage,
                        data.generation_max,
                        data.generation_min,
                    )?;
                }
                BusKind::TransformerTerminal { .. } => continue,
            }
        }
        for transformer in network.transformers() {
            if !work.bus_alive[transformer.terminals[0].bus.value()] {
                continue;
            }
            let terminals: Vec<(&str, f64)> = transformer
                .terminals
                .iter()
                .map(|t| (network.bus(t.bus).name.as_str(), t.nominal_voltage))
                .collect();
            builder.add_transformer(&transformer.name, &terminals, transformer.modes.clone())?;
        }
        for bus in network.buses() {
            if let (true, Some(location)) = (work.bus_alive[bus.id.value()], bus.location) {
                builder.set_location(&bus.name, location)?;
            }
        }

        let mut merged = Vec::new();
        for line in work.lines.iter().filter(|l| l.alive) {
            let mut spec = LineSpec::new(
                line.name.clone(),
                network.bus(line.part.from).name.clone(),
                network.bus(line.part.to).name.clone(),
                line.part.impedance,
            )
            .with_i_max(line.i_max)
            .with_v_max(line.v_max);
            if line.switchable {
                spec = spec.switchable(line.switching_cost);
            }
            if line.is_breaker {
                spec = spec.breaker();
            }
            builder.add_line(spec)?;
            merged.push(line.part.clone());
        }
        let aggregate = builder.build();

        let mut bus_to_aggregate = vec![None; network.bus_count()];
        let mut bus_to_original = Vec::with_capacity(aggregate.bus_count());
        for bus in aggregate.buses() {
            let original_id = network.bus_by_name(&bus.name).ok_or_else(|| {
                FeederError::Other(format!("aggregate bus '{}' has no origin", bus.name))
            })?;
            bus_to_aggregate[original_id.value()] = Some(bus.id);
            bus_to_original.push(original_id);
        }
        let mut line_to_aggregate = vec![None; network.line_count()];
        for (index, part) in merged.iter().enumerate() {
            for line in part.original_lines() {
                line_to_aggregate[line.value()] = Some(LineId::new(index));
            }
        }

        let stats = AggregationStats {
            original_buses: network.bus_count(),
            original_lines: network.line_count(),
            aggregate_buses: aggregate.bus_count(),
            aggregate_lines: aggregate.line_count(),
            serial_merges: work.serial_merges,
            parallel_merges: work.parallel_merges,
            dangling_lines: work.dangling.len(),
            unconnected_buses: unconnected_buses.len(),
        };
        debug!(%stats, "aggregated network");

        Ok(Self {
            original: original.clone(),
            aggregate: Arc::new(aggregate),
            merged,
            bus_to_aggregate,
            bus_to_original,
            line_to_aggregate,
            unconnected_buses,
            unconnected_lines,
            dangling: work.dangling,
            stats,
        })
    }

    pub fn original_network(&self) -> &Arc<Network> {
        &self.original
    }

    pub fn aggregate_network(&self) -> &Arc<Network> {
        &self.aggregate
    }

    /// Structure behind an aggregate line, oriented like that line.
    pub fn merged_line(&self, aggregate_line: LineId) -> &DirectedMergedLine {
        &self.merged[aggregate_line.value()]
    }

    pub fn original_lines(&self, aggregate_line: LineId) -> Vec<LineId> {
        self.merged_line(aggregate_line).original_lines()
    }

    /// Aggregate line representing an original line, if it survived.
    pub fn aggregate_line(&self, original_line: LineId) -> Option<LineId> {
        self.line_to_aggregate[original_line.value()]
    }

    pub fn aggregate_bus(&self, original_bus: BusId) -> Option<BusId> {
        self.bus_to_aggregate[original_bus.value()]
    }

    pub fn original_bus(&self, aggregate_bus: BusId) -> BusId {
        self.bus_to_original[aggregate_bus.value()]
    }

    /// Buses no provider reaches even with every switch closed.
    pub fn unconnected_buses(&self) -> &[BusId] {
        &self.unconnected_buses
    }

    pub fn unconnected_lines(&self) -> &[LineId] {
        &self.unconnected_lines
    }

    /// Removed dangling lines, in removal order.
    pub fn dangling_lines(&self) -> &[DanglingLine] {
        &self.dangling
    }

    pub fn stats(&self) -> &AggregationStats {
        &self.stats
    }

    /// Switch settings of the aggregate network.
    pub fn map_settings_to_aggregate(&self, original: &SwitchSettings) -> SwitchSettings {
        let mut settings = SwitchSettings::all_closed(&self.aggregate);
        for line in self.aggregate.switchable_lines() {
            if let MergedPart::Single { line: source } = self.merged[line.id.value()].part {
                settings.set_switch(line.id, original.is_open(source));
            }
        }
        settings
    }

    /// Switch settings of the original network.
    ///
    /// Switches dropped with unconnected parts keep their state in `fallback`.
    pub fn map_settings_to_original(
        &self,
        aggregate: &SwitchSettings,
        fallback: &SwitchSettings,
    ) -> SwitchSettings {
        let mut settings = fallback.clone();
        for line in self.aggregate.switchable_lines() {
            if let MergedPart::Single { line: target } = self.merged[line.id.value()].part {
                settings.set_switch(target, aggregate.is_open(line.id));
            }
        }
        settings
    }
}
