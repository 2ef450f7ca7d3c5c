//! # feederopt-core: Distribution Network Modeling Core
//!
//! Provides the data structures behind switch-configuration optimization of
//! radial distribution grids: the immutable network graph, switch settings,
//! the configuration/radiality engine and the aggregation transform.
//!
//! ## Design Philosophy
//!
//! A network is an **undirected multigraph** held in a petgraph arena:
//! - **Nodes**: Buses (connections, consumers, providers, transformer terminals)
//! - **Edges**: Lines, possibly switchable or breakers
//!
//! Transformers are multi-terminal devices stored beside the graph. Each
//! winding owns a `TransformerTerminal` bus, and flow passes between terminals
//! of the same transformer according to its modes.
//!
//! The graph is never mutated after [`NetworkBuilder::build`], so petgraph's
//! node and edge indices are stable handles. They are exposed through the
//! [`BusId`], [`LineId`] and [`TransformerId`] newtypes. Everything derived
//! from a switch configuration (upstream links, provider of each bus, cycles)
//! lives in handle-indexed tables owned by a [`NetworkConfiguration`], never as
//! pointers between nodes.
//!
//! ## Quick Start
//!
//! ```rust
//! use feederopt_core::*;
//! use num_complex::Complex64;
//!
//! let mut builder = NetworkBuilder::new();
//! builder.add_provider("source", 22_000.0, Complex64::new(1e6, 1e6), Complex64::new(0.0, -1e6))?;
//! builder.add_consumer("load", 20_000.0, 24_000.0)?;
//! builder.add_line(LineSpec::new("feeder", "source", "load", Complex64::new(1.0, 0.5)))?;
//! let network = builder.build();
//!
//! assert_eq!(network.bus_count(), 2);
//! assert_eq!(network.line_count(), 1);
//! # Ok::<(), FeederError>(())
//! ```
//!
//! ## Modules
//!
//! - [`builder`] - Network construction API with structural validation
//! - [`switch_settings`] - Open/closed state of switchable lines
//! - [`configuration`] - Derived topology and radiality queries
//! - [`radiality`] - Conflict detection and repair (`make_radial` and friends)
//! - [`aggregation`] - Serial/parallel reduction and its inverse mapping
//! - [`io`] - JSON documents for networks, demands and configurations
//! - [`diagnostics`] - Non-fatal validation reporting
//! - [`graph_utils`] - Islands and Graphviz export

use num_complex::Complex64;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::prelude::*;
use petgraph::Undirected;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod aggregation;
pub mod builder;
pub mod configuration;
pub mod demand;
pub mod diagnostics;
pub mod error;
pub mod graph_utils;
pub mod io;
pub mod radiality;
pub mod switch_settings;

pub use aggregation::{
    AggregationStats, DanglingLine, DirectedMergedLine, MergedPart, NetworkAggregation,
};
pub use builder::{LineSpec, NetworkBuilder};
pub use configuration::{DirectedLink, Link, MissingMode, NetworkConfiguration, Topology};
pub use demand::{Period, PeriodData, PowerDemands};
pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{FeederError, FeederResult};
pub use radiality::{BridgePolicy, RadialityConflict};
pub use switch_settings::SwitchSettings;

// Newtype wrappers for IDs for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformerId(usize);

impl BusId {
    #[inline]
    pub fn new(value: usize) -> Self {
        BusId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
    #[inline]
    pub(crate) fn node(&self) -> NodeIndex {
        NodeIndex::new(self.0)
    }
}

impl LineId {
    #[inline]
    pub fn new(value: usize) -> Self {
        LineId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
    #[inline]
    pub(crate) fn edge(&self) -> EdgeIndex {
        EdgeIndex::new(self.0)
    }
}

impl TransformerId {
    #[inline]
    pub fn new(value: usize) -> Self {
        TransformerId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

/// Geographic location of a bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

/// Voltage bounds of a consumer bus (volts).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsumerLimits {
    pub v_min: f64,
    pub v_max: f64,
}

/// Generator data of a provider bus.
///
/// Generation bounds are complex: the real part bounds active power (W), the
/// imaginary part bounds reactive power (VAr).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProviderData {
    /// Generator voltage magnitude (V)
    pub voltage: f64,
    pub generation_max: Complex64,
    pub generation_min: Complex64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusKind {
    /// Junction with neither demand nor generation
    Connection,
    Consumer(ConsumerLimits),
    Provider(ProviderData),
    /// One winding of a transformer
    TransformerTerminal {
        transformer: TransformerId,
        terminal: usize,
    },
}

#[derive(Debug, Clone)]
pub struct Bus {
    pub id: BusId,
    pub name: String,
    pub kind: BusKind,
    pub location: Option<Coordinate>,
}

impl Bus {
    pub fn is_provider(&self) -> bool {
        matches!(self.kind, BusKind::Provider(_))
    }

    pub fn is_consumer(&self) -> bool {
        matches!(self.kind, BusKind::Consumer(_))
    }

    pub fn is_connection(&self) -> bool {
        matches!(self.kind, BusKind::Connection)
    }

    pub fn provider(&self) -> Option<&ProviderData> {
        match &self.kind {
            BusKind::Provider(data) => Some(data),
            _ => None,
        }
    }

    pub fn consumer_limits(&self) -> Option<&ConsumerLimits> {
        match &self.kind {
            BusKind::Consumer(limits) => Some(limits),
            _ => None,
        }
    }

    /// Transformer and winding position, for terminal buses.
    pub fn transformer_terminal(&self) -> Option<(TransformerId, usize)> {
        match self.kind {
            BusKind::TransformerTerminal {
                transformer,
                terminal,
            } => Some((transformer, terminal)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Line {
    pub id: LineId,
    pub name: String,
    pub from: BusId,
    pub to: BusId,
    /// Series impedance (ohm)
    pub impedance: Complex64,
    /// Maximum current (A)
    pub i_max: f64,
    /// Maximum voltage (V)
    pub v_max: f64,
    pub switchable: bool,
    /// Cost of changing the switch state once
    pub switching_cost: f64,
    pub is_breaker: bool,
}

impl Line {
    /// The end of the line opposite to `bus`.
    pub fn other_end(&self, bus: BusId) -> BusId {
        if self.from == bus {
            self.to
        } else {
            self.from
        }
    }

    /// True if the line may be merged with others by aggregation.
    pub fn is_plain(&self) -> bool {
        !self.switchable && !self.is_breaker
    }
}

/// How a transformer mode sets its output voltage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "ratio")]
pub enum TransformerOperation {
    /// Output voltage is input voltage divided by the ratio
    FixedRatio(f64),
    /// Output voltage is regulated to the output terminal's nominal voltage
    Automatic,
}

/// A directed operating mode between two windings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformerMode {
    /// Upstream terminal position
    pub input: usize,
    /// Downstream terminal position
    pub output: usize,
    pub operation: TransformerOperation,
    /// Ratio of output to input active power, in (0, 1]
    pub power_factor: f64,
    /// Mode may also be used from output to input
    pub bidirectional: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformerTerminal {
    pub bus: BusId,
    /// Nominal voltage of the winding (V)
    pub nominal_voltage: f64,
}

#[derive(Debug, Clone)]
pub struct Transformer {
    pub id: TransformerId,
    pub name: String,
    pub terminals: Vec<TransformerTerminal>,
    pub modes: Vec<TransformerMode>,
}

/// A mode resolved for a concrete flow direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedMode {
    pub mode: TransformerMode,
    /// The mode is used from its output to its input
    pub reversed: bool,
}

impl ResolvedMode {
    /// Output-side voltage for a given input-side voltage.
    pub fn output_voltage(&self, input: Complex64, output_nominal: f64) -> Complex64 {
        match self.mode.operation {
            TransformerOperation::FixedRatio(ratio) => {
                if self.reversed {
                    input * ratio
                } else {
                    input / ratio
                }
            }
            TransformerOperation::Automatic => {
                let angle = if input.norm() > 0.0 { input.arg() } else { 0.0 };
                Complex64::from_polar(output_nominal, angle)
            }
        }
    }
}

impl Transformer {
    /// Winding position of `bus`, if it is one of this transformer's terminals.
    pub fn terminal_index(&self, bus: BusId) -> Option<usize> {
        self.terminals.iter().position(|t| t.bus == bus)
    }

    /// The mode used for flow entering at terminal `input` and leaving at `output`.
    pub fn mode_between(&self, input: usize, output: usize) -> Option<ResolvedMode> {
        if let Some(mode) = self
            .modes
            .iter()
            .find(|m| m.input == input && m.output == output)
        {
            return Some(ResolvedMode {
                mode: *mode,
                reversed: false,
            });
        }
        self.modes
            .iter()
            .find(|m| m.bidirectional && m.input == output && m.output == input)
            .map(|mode| ResolvedMode {
                mode: *mode,
                reversed: true,
            })
    }

    pub fn allows(&self, input: usize, output: usize) -> bool {
        self.mode_between(input, output).is_some()
    }
}

/// The distribution network graph.
#[derive(Debug, Default, Clone)]
pub struct Network {
    pub(crate) graph: Graph<Bus, Line, Undirected>,
    pub(crate) transformers: Vec<Transformer>,
    pub(crate) bus_names: HashMap<String, BusId>,
    pub(crate) line_names: HashMap<String, LineId>,
    pub(crate) transformer_names: HashMap<String, TransformerId>,
}

impl Network {
    pub fn bus_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn line_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn bus(&self, id: BusId) -> &Bus {
        &self.graph[id.node()]
    }

    pub fn line(&self, id: LineId) -> &Line {
        &self.graph[id.edge()]
    }

    pub fn transformer(&self, id: TransformerId) -> &Transformer {
        &self.transformers[id.0]
    }

    pub fn buses(&self) -> impl Iterator<Item = &Bus> + '_ {
        self.graph.node_weights()
    }

    pub fn lines(&self) -> impl Iterator<Item = &Line> + '_ {
        self.graph.edge_weights()
    }

    pub fn transformers(&self) -> impl Iterator<Item = &Transformer> + '_ {
        self.transformers.iter()
    }

    pub fn bus_ids(&self) -> impl Iterator<Item = BusId> + '_ {
        self.graph.node_indices().map(|n| BusId(n.index()))
    }

    pub fn line_ids(&self) -> impl Iterator<Item = LineId> + '_ {
        self.graph.edge_indices().map(|e| LineId(e.index()))
    }

    pub fn bus_by_name(&self, name: &str) -> Option<BusId> {
        self.bus_names.get(name).copied()
    }

    pub fn line_by_name(&self, name: &str) -> Option<LineId> {
        self.line_names.get(name).copied()
    }

    pub fn transformer_by_name(&self, name: &str) -> Option<TransformerId> {
        self.transformer_names.get(name).copied()
    }

    /// Lines attached to `bus`, in insertion order.
    pub fn incident_lines(&self, bus: BusId) -> Vec<LineId> {
        let mut lines: Vec<LineId> = self
            .graph
            .edges(bus.node())
            .map(|e| LineId(e.id().index()))
            .collect();
        // petgraph yields incident edges newest first
        lines.sort();
        lines.dedup();
        lines
    }

    pub fn providers(&self) -> impl Iterator<Item = &Bus> + '_ {
        self.buses().filter(|b| b.is_provider())
    }

    pub fn consumers(&self) -> impl Iterator<Item = &Bus> + '_ {
        self.buses().filter(|b| b.is_consumer())
    }

    pub fn switchable_lines(&self) -> impl Iterator<Item = &Line> + '_ {
        self.lines().filter(|l| l.switchable)
    }

    /// Compute basic statistics about the network
    pub fn stats(&self) -> NetworkStats {
        let mut stats = NetworkStats::default();
        for bus in self.buses() {
            stats.num_buses += 1;
            match bus.kind {
                BusKind::Provider(_) => stats.num_providers += 1,
                BusKind::Consumer(_) => stats.num_consumers += 1,
                _ => {}
            }
        }
        for line in self.lines() {
            stats.num_lines += 1;
            if line.switchable {
                stats.num_switches += 1;
            }
            if line.is_breaker {
                stats.num_breakers += 1;
            }
        }
        stats.num_transformers = self.transformers.len();
        stats
    }

    /// Validate network data for issues that are legal but suspicious.
    ///
    /// Structural errors are rejected at construction; this only reports
    /// warnings into `diag`.
    pub fn validate_into(&self, diag: &mut Diagnostics) {
        let stats = self.stats();

        if stats.num_buses == 0 {
            diag.add_error("structure", "Network has no buses");
            return;
        }
        if stats.num_providers == 0 {
            diag.add_error("structure", "Network has no providers");
        }
        if stats.num_consumers == 0 {
            diag.add_warning("structure", "Network has no consumers");
        }

        for line in self.switchable_lines() {
            if line.switching_cost == 0.0 {
                diag.add_validation_warning(
                    &format!("line '{}'", line.name),
                    "Switchable line has zero switching cost",
                );
            }
        }

        for line in self.lines() {
            if !line.i_max.is_finite() {
                diag.add_warning_with_entity(
                    "limits",
                    "Line has no current limit",
                    &format!("line '{}'", line.name),
                );
            }
        }

        let reachable = graph_utils::reachable_from_providers(self);
        for bus in self.buses() {
            if bus.is_consumer() && !reachable.contains(&bus.id) {
                diag.add_validation_warning(
                    &format!("bus '{}'", bus.name),
                    "Consumer cannot be reached from any provider, even with all switches closed",
                );
            }
        }
    }
}

/// Statistics about a network's size
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkStats {
    pub num_buses: usize,
    pub num_providers: usize,
    pub num_consumers: usize,
    pub num_lines: usize,
    pub num_switches: usize,
    pub num_breakers: usize,
    pub num_transformers: usize,
}

impl std::fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} buses ({} providers, {} consumers), {} lines ({} switches, {} breakers), {} transformers",
            self.num_buses,
            self.num_providers,
            self.num_consumers,
            self.num_lines,
            self.num_switches,
            self.num_breakers,
            self.num_transformers
        )
    }
}
