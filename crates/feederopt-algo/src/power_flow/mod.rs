//! # Power flow on radial configurations
//!
//! A [`FlowProvider`] turns a radial [`NetworkConfiguration`] and the demands
//! of one period into a [`FlowResult`]: complex bus voltages, line currents
//! and the power passing through transformers.
//!
//! Two providers are available:
//!
//! - [`IteratedDistFlow`]: backward/forward sweep on the tree of each provider
//! - [`AggregateFlowProvider`]: solves on an aggregated network and maps the
//!   result back onto the original lines
//!
//! ## Sign conventions
//!
//! ```text
//!   from ───── I ────▶ to        I is stored in the direction of the line
//!   S(from, line) = V_from · conj(I)
//!   S(to, line)   = -V_to · conj(I)
//!   loss(line)    = S(from, line) + S(to, line) = Z · |I|²
//! ```
//!
//! Power and current at a (bus, line) pair are counted as leaving the bus.
//!
//! ## Terminal status
//!
//! Non-convergence is not an error. Every result carries a [`FlowStatus`] and
//! a human-readable detail; for `Approximate` and `Failed` results the detail
//! names the iteration count. A `Failed` result holds no usable flow: all
//! voltages and currents are zero.

pub mod aggregate;
pub mod delta;
pub mod dist_flow;

pub use aggregate::{disaggregate_flow, AggregateFlowProvider};
pub use delta::{BusChange, LineChange, PowerFlowDelta};
pub use dist_flow::{DistFlowSettings, IteratedDistFlow};

use feederopt_core::{
    BusId, FeederError, LineId, Network, NetworkConfiguration, PowerDemands, TransformerId,
};
use num_complex::Complex64;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while setting up a flow computation.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Invalid power flow setting: {0}")]
    InvalidSettings(String),

    #[error("Flow result does not match network: {0}")]
    NetworkMismatch(String),

    #[error(transparent)]
    Feeder(#[from] FeederError),
}

/// How a flow computation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    /// Converged within tolerance
    Exact,
    /// Stopped early by policy; the flow is the last iterate
    Approximate,
    /// Diverged; no usable flow
    Failed,
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowStatus::Exact => write!(f, "exact"),
            FlowStatus::Approximate => write!(f, "approximate"),
            FlowStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Power passing one transformer hop, from an input to an output terminal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformerFlow {
    pub transformer: TransformerId,
    pub input: BusId,
    pub output: BusId,
    /// Power entering at the input terminal
    pub power_in: Complex64,
    /// Power leaving at the output terminal
    pub power_out: Complex64,
}

impl TransformerFlow {
    /// Active power lost in the transformer (W).
    pub fn loss(&self) -> f64 {
        self.power_in.re - self.power_out.re
    }
}

/// Voltages and currents of one configuration under one set of demands.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowResult {
    pub status: FlowStatus,
    pub status_detail: String,
    pub iterations: usize,
    voltages: Vec<Complex64>,
    currents: Vec<Complex64>,
    transformer_flows: Vec<TransformerFlow>,
}

impl FlowResult {
    pub(crate) fn new(
        status: FlowStatus,
        status_detail: String,
        iterations: usize,
        voltages: Vec<Complex64>,
        currents: Vec<Complex64>,
        transformer_flows: Vec<TransformerFlow>,
    ) -> Self {
        Self {
            status,
            status_detail,
            iterations,
            voltages,
            currents,
            transformer_flows,
        }
    }

    /// A zero-filled result carrying only a diagnostic.
    pub fn failed(network: &Network, detail: impl Into<String>, iterations: usize) -> Self {
        Self::new(
            FlowStatus::Failed,
            detail.into(),
            iterations,
            vec![Complex64::default(); network.bus_count()],
            vec![Complex64::default(); network.line_count()],
            Vec::new(),
        )
    }

    pub fn is_exact(&self) -> bool {
        self.status == FlowStatus::Exact
    }

    pub fn is_failed(&self) -> bool {
        self.status == FlowStatus::Failed
    }

    pub fn bus_count(&self) -> usize {
        self.voltages.len()
    }

    pub fn line_count(&self) -> usize {
        self.currents.len()
    }

    /// Complex voltage at `bus` (V); zero for buses no provider feeds.
    pub fn voltage(&self, bus: BusId) -> Complex64 {
        self.voltages[bus.value()]
    }

    /// Current through `line` in the direction of the line (A).
    pub fn line_current(&self, line: LineId) -> Complex64 {
        self.currents[line.value()]
    }

    /// Current leaving `bus` into `line` (A).
    pub fn current(&self, network: &Network, bus: BusId, line: LineId) -> Complex64 {
        let i = self.currents[line.value()];
        if network.line(line).from == bus {
            i
        } else {
            -i
        }
    }

    /// Power leaving `bus` into `line` (W + j VAr).
    pub fn power_flow(&self, network: &Network, bus: BusId, line: LineId) -> Complex64 {
        self.voltage(bus) * self.current(network, bus, line).conj()
    }

    /// Series loss of `line` (W + j VAr).
    pub fn line_loss(&self, network: &Network, line: LineId) -> Complex64 {
        let l = network.line(line);
        self.power_flow(network, l.from, line) + self.power_flow(network, l.to, line)
    }

    pub fn transformer_flows(&self) -> &[TransformerFlow] {
        &self.transformer_flows
    }

    /// Power a provider feeds into the network.
    pub fn provider_injection(&self, network: &Network, bus: BusId) -> Complex64 {
        network
            .incident_lines(bus)
            .into_iter()
            .map(|line| self.power_flow(network, bus, line))
            .sum()
    }

    /// Active line losses (W).
    pub fn total_line_loss(&self, network: &Network) -> f64 {
        network
            .line_ids()
            .map(|line| self.line_loss(network, line).re)
            .sum()
    }

    /// Active transformer losses (W).
    pub fn total_transformer_loss(&self) -> f64 {
        self.transformer_flows.iter().map(TransformerFlow::loss).sum()
    }

    /// Active line and transformer losses (W).
    pub fn total_loss(&self, network: &Network) -> f64 {
        self.total_line_loss(network) + self.total_transformer_loss()
    }

    pub fn report(&self, network: &Network) -> FlowReport {
        FlowReport::new(network, self)
    }
}

/// Computes flows for radial configurations.
///
/// # Panics
///
/// Implementations panic when handed a configuration that is not radial.
pub trait FlowProvider: Send + Sync {
    fn name(&self) -> &str;

    fn compute_flow(
        &self,
        configuration: &NetworkConfiguration,
        demands: &PowerDemands,
    ) -> FlowResult;

    /// Compute a flow starting from a result for a nearby configuration.
    ///
    /// Used by moves to obtain the flow after a switch swap. The default
    /// ignores `previous`.
    fn compute_flow_from(
        &self,
        configuration: &NetworkConfiguration,
        demands: &PowerDemands,
        previous: &FlowResult,
    ) -> FlowResult {
        let _ = previous;
        self.compute_flow(configuration, demands)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BusReport {
    pub name: String,
    pub voltage: [f64; 2],
    pub magnitude: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineReport {
    pub name: String,
    pub current: [f64; 2],
    pub magnitude: f64,
    /// Power entering at the `from` end
    pub power: [f64; 2],
    pub loss: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderReport {
    pub name: String,
    pub injection: [f64; 2],
}

/// Serializable view of a [`FlowResult`], keyed by names.
#[derive(Debug, Clone, Serialize)]
pub struct FlowReport {
    pub status: FlowStatus,
    pub detail: String,
    pub iterations: usize,
    pub total_line_loss: f64,
    pub total_transformer_loss: f64,
    pub buses: Vec<BusReport>,
    pub lines: Vec<LineReport>,
    pub providers: Vec<ProviderReport>,
}

fn pair(z: Complex64) -> [f64; 2] {
    [z.re, z.im]
}

impl FlowReport {
    pub fn new(network: &Network, flow: &FlowResult) -> Self {
        let buses = network
            .buses()
            .map(|bus| {
                let v = flow.voltage(bus.id);
                BusReport {
                    name: bus.name.clone(),
                    voltage: pair(v),
                    magnitude: v.norm(),
                }
            })
            .collect();
        let lines = network
            .lines()
            .map(|line| {
                let i = flow.line_current(line.id);
                LineReport {
                    name: line.name.clone(),
                    current: pair(i),
                    magnitude: i.norm(),
                    power: pair(flow.power_flow(network, line.from, line.id)),
                    loss: flow.line_loss(network, line.id).re,
                }
            })
            .collect();
        let providers = network
            .providers()
            .map(|bus| ProviderReport {
                name: bus.name.clone(),
                injection: pair(flow.provider_injection(network, bus.id)),
            })
            .collect();
        Self {
            status: flow.status,
            detail: flow.status_detail.clone(),
            iterations: flow.iterations,
            total_line_loss: flow.total_line_loss(network),
            total_transformer_loss: flow.total_transformer_loss(),
            buses,
            lines,
            providers,
        }
    }
}
