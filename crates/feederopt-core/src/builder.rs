//! Network construction.
//!
//! [`NetworkBuilder`] is the only way to create a [`Network`]. Every add
//! operation validates its input immediately and fails with an error naming
//! the offending element, so a network that builds is structurally sound:
//! names are unique per element kind, references resolve, bounds are ordered
//! and transformer modes point at existing windings.

use crate::{
    Bus, BusId, BusKind, ConsumerLimits, Coordinate, FeederError, FeederResult, Line, LineId,
    Network, ProviderData, Transformer, TransformerId, TransformerMode, TransformerOperation,
    TransformerTerminal,
};
use num_complex::Complex64;

/// Parameters for [`NetworkBuilder::add_line`].
#[derive(Debug, Clone)]
pub struct LineSpec {
    pub name: String,
    pub from: String,
    pub to: String,
    pub impedance: Complex64,
    pub i_max: f64,
    pub v_max: f64,
    pub switchable: bool,
    pub switching_cost: f64,
    pub is_breaker: bool,
}

impl LineSpec {
    /// A plain, non-switchable line with no current or voltage limit.
    pub fn new(
        name: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        impedance: Complex64,
    ) -> Self {
        Self {
            name: name.into(),
            from: from.into(),
            to: to.into(),
            impedance,
            i_max: f64::INFINITY,
            v_max: f64::INFINITY,
            switchable: false,
            switching_cost: 0.0,
            is_breaker: false,
        }
    }

    /// Mark the line switchable with the given cost per state change.
    pub fn switchable(mut self, switching_cost: f64) -> Self {
        self.switchable = true;
        self.switching_cost = switching_cost;
        self
    }

    pub fn breaker(mut self) -> Self {
        self.is_breaker = true;
        self
    }

    pub fn with_i_max(mut self, i_max: f64) -> Self {
        self.i_max = i_max;
        self
    }

    pub fn with_v_max(mut self, v_max: f64) -> Self {
        self.v_max = v_max;
        self
    }
}

/// Incrementally builds a [`Network`].
#[derive(Debug, Default)]
pub struct NetworkBuilder {
    network: Network,
}

impl NetworkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection bus with neither demand nor generation.
    pub fn add_transition(&mut self, name: &str) -> FeederResult<BusId> {
        self.add_bus(name, BusKind::Connection)
    }

    /// Add a provider (generator) bus.
    pub fn add_provider(
        &mut self,
        name: &str,
        voltage: f64,
        generation_max: Complex64,
        generation_min: Complex64,
    ) -> FeederResult<BusId> {
        let entity = format!("provider '{name}'");
        if !(voltage > 0.0) || !voltage.is_finite() {
            return Err(FeederError::invalid(
                entity,
                format!("generator voltage must be positive, got {voltage}"),
            ));
        }
        if generation_min.re > generation_max.re || generation_min.im > generation_max.im {
            return Err(FeederError::invalid(
                entity,
                format!(
                    "generation lower limit {generation_min} exceeds upper limit {generation_max}"
                ),
            ));
        }
        self.add_bus(
            name,
            BusKind::Provider(ProviderData {
                voltage,
                generation_max,
                generation_min,
            }),
        )
    }

    /// Add a consumer bus with voltage bounds.
    pub fn add_consumer(&mut self, name: &str, v_min: f64, v_max: f64) -> FeederResult<BusId> {
        if v_min > v_max || v_min.is_nan() || v_max.is_nan() {
            return Err(FeederError::invalid(
                format!("consumer '{name}'"),
                format!("v_min {v_min} exceeds v_max {v_max}"),
            ));
        }
        self.add_bus(name, BusKind::Consumer(ConsumerLimits { v_min, v_max }))
    }

    /// Attach a geographic location to an existing bus.
    pub fn set_location(&mut self, bus: &str, location: Coordinate) -> FeederResult<()> {
        let id = self.resolve_bus(bus)?;
        self.network.graph[id.node()].location = Some(location);
        Ok(())
    }

    /// Add a line between two existing buses.
    pub fn add_line(&mut self, spec: LineSpec) -> FeederResult<LineId> {
        if self.network.line_names.contains_key(&spec.name) {
            return Err(FeederError::DuplicateName {
                kind: "line",
                name: spec.name,
            });
        }
        let entity = format!("line '{}'", spec.name);
        let from = self.resolve_bus(&spec.from)?;
        let to = self.resolve_bus(&spec.to)?;
        if from == to {
            return Err(FeederError::invalid(
                entity,
                format!("both ends connect to bus '{}'", spec.from),
            ));
        }
        if !spec.impedance.re.is_finite() || !spec.impedance.im.is_finite() {
            return Err(FeederError::invalid(entity, "impedance must be finite"));
        }
        if spec.impedance.re < 0.0 {
            return Err(FeederError::invalid(entity, "resistance must not be negative"));
        }
        if spec.i_max < 0.0 || spec.i_max.is_nan() {
            return Err(FeederError::invalid(entity, "i_max must not be negative"));
        }
        if spec.v_max < 0.0 || spec.v_max.is_nan() {
            return Err(FeederError::invalid(entity, "v_max must not be negative"));
        }
        if spec.switching_cost < 0.0 || spec.switching_cost.is_nan() {
            return Err(FeederError::invalid(
                entity,
                "switching cost must not be negative",
            ));
        }
        if !spec.switchable && spec.switching_cost != 0.0 {
            return Err(FeederError::invalid(
                entity,
                "switching cost given for a non-switchable line",
            ));
        }

        let id = LineId::new(self.network.graph.edge_count());
        let edge = self.network.graph.add_edge(
            from.node(),
            to.node(),
            Line {
                id,
                name: spec.name.clone(),
                from,
                to,
                impedance: spec.impedance,
                i_max: spec.i_max,
                v_max: spec.v_max,
                switchable: spec.switchable,
                switching_cost: spec.switching_cost,
                is_breaker: spec.is_breaker,
            },
        );
        debug_assert_eq!(edge.index(), id.value());
        self.network.line_names.insert(spec.name, id);
        Ok(id)
    }

    /// Add a transformer with one new terminal bus per winding.
    ///
    /// `terminals` lists `(terminal bus name, nominal voltage)` per winding;
    /// modes address windings by their position in this list.
    pub fn add_transformer(
        &mut self,
        name: &str,
        terminals: &[(&str, f64)],
        modes: Vec<TransformerMode>,
    ) -> FeederResult<TransformerId> {
        if self.network.transformer_names.contains_key(name) {
            return Err(FeederError::DuplicateName {
                kind: "transformer",
                name: name.to_string(),
            });
        }
        let entity = format!("transformer '{name}'");
        if terminals.len() < 2 || terminals.len() > 3 {
            return Err(FeederError::invalid(
                entity,
                format!("expected 2 or 3 windings, got {}", terminals.len()),
            ));
        }
        for (terminal, voltage) in terminals {
            if !(*voltage > 0.0) {
                return Err(FeederError::invalid(
                    entity,
                    format!("winding '{terminal}' has non-positive nominal voltage {voltage}"),
                ));
            }
            if self.network.bus_names.contains_key(*terminal) {
                return Err(FeederError::DuplicateName {
                    kind: "bus",
                    name: terminal.to_string(),
                });
            }
        }
        for mode in &modes {
            if mode.input >= terminals.len() || mode.output >= terminals.len() {
                return Err(FeederError::invalid(
                    entity,
                    format!(
                        "mode {} -> {} refers to a missing winding",
                        mode.input, mode.output
                    ),
                ));
            }
            if mode.input == mode.output {
                return Err(FeederError::invalid(
                    entity,
                    format!("mode input and output are both winding {}", mode.input),
                ));
            }
            if !(mode.power_factor > 0.0 && mode.power_factor <= 1.0) {
                return Err(FeederError::invalid(
                    entity,
                    format!("power factor {} is outside (0, 1]", mode.power_factor),
                ));
            }
            if let TransformerOperation::FixedRatio(ratio) = mode.operation {
                if !(ratio > 0.0) || !ratio.is_finite() {
                    return Err(FeederError::invalid(
                        entity,
                        format!("fixed ratio must be positive, got {ratio}"),
                    ));
                }
            }
        }

        let id = TransformerId::new(self.network.transformers.len());
        let mut windings = Vec::with_capacity(terminals.len());
        for (position, (terminal, voltage)) in terminals.iter().enumerate() {
            let bus = self.add_bus(
                terminal,
                BusKind::TransformerTerminal {
                    transformer: id,
                    terminal: position,
                },
            )?;
            windings.push(TransformerTerminal {
                bus,
                nominal_voltage: *voltage,
            });
        }
        self.network.transformers.push(Transformer {
            id,
            name: name.to_string(),
            terminals: windings,
            modes,
        });
        self.network.transformer_names.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn build(self) -> Network {
        self.network
    }

    fn add_bus(&mut self, name: &str, kind: BusKind) -> FeederResult<BusId> {
        if self.network.bus_names.contains_key(name) {
            return Err(FeederError::DuplicateName {
                kind: "bus",
                name: name.to_string(),
            });
        }
        let id = BusId::new(self.network.graph.node_count());
        let node = self.network.graph.add_node(Bus {
            id,
            name: name.to_string(),
            kind,
            location: None,
        });
        debug_assert_eq!(node.index(), id.value());
        self.network.bus_names.insert(name.to_string(), id);
        Ok(id)
    }

    fn resolve_bus(&self, name: &str) -> FeederResult<BusId> {
        self.network
            .bus_names
            .get(name)
            .copied()
            .ok_or_else(|| FeederError::UnknownBus(name.to_string()))
    }
}
