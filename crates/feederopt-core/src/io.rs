//! JSON documents describing a network, its demands and a switch
//! configuration.
//!
//! Complex quantities are written as `[re, im]` pairs. Every reference is by
//! name, and every error names the element it was found on.
//!
//! ```json
//! {
//!   "buses": [
//!     { "name": "src", "kind": "provider", "voltage": 230.0,
//!       "generation_max": [1e6, 1e6], "generation_min": [0.0, -1e6] },
//!     { "name": "load", "kind": "consumer", "v_min": 207.0, "v_max": 253.0 }
//!   ],
//!   "lines": [
//!     { "name": "l1", "from": "src", "to": "load", "impedance": [0.1, 0.05] }
//!   ]
//! }
//! ```

use crate::{
    BusKind, Coordinate, FeederError, FeederResult, LineSpec, Network, NetworkBuilder, Period,
    PeriodData, PowerDemands, SwitchSettings, TransformerMode,
};
use chrono::{DateTime, Utc};
use num_complex::Complex64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Read and parse a JSON document.
pub fn load<T: DeserializeOwned>(path: &Path) -> FeederResult<T> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| FeederError::Parse(format!("{}: {}", path.display(), e)))
}

fn complex(pair: [f64; 2]) -> Complex64 {
    Complex64::new(pair[0], pair[1])
}

fn pair(value: Complex64) -> [f64; 2] {
    [value.re, value.im]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusKindDocument {
    Connection,
    Consumer,
    Provider,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusDocument {
    pub name: String,
    pub kind: BusKindDocument,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_max: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_min: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Coordinate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineDocument {
    pub name: String,
    pub from: String,
    pub to: String,
    pub impedance: [f64; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v_max: Option<f64>,
    #[serde(default)]
    pub switchable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switching_cost: Option<f64>,
    #[serde(default)]
    pub breaker: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerminalDocument {
    pub bus: String,
    pub nominal_voltage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformerDocument {
    pub name: String,
    pub terminals: Vec<TerminalDocument>,
    pub modes: Vec<TransformerMode>,
}

/// A network description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkDocument {
    pub buses: Vec<BusDocument>,
    #[serde(default)]
    pub lines: Vec<LineDocument>,
    #[serde(default)]
    pub transformers: Vec<TransformerDocument>,
}

fn required<T>(value: Option<T>, entity: &str, attribute: &str) -> FeederResult<T> {
    value.ok_or_else(|| {
        FeederError::invalid(entity, format!("missing required attribute '{attribute}'"))
    })
}

impl NetworkDocument {
    /// Build the network, failing on the first structural error.
    pub fn build(&self) -> FeederResult<Network> {
        let mut builder = NetworkBuilder::new();
        for bus in &self.buses {
            let entity = format!("bus '{}'", bus.name);
            match bus.kind {
                BusKindDocument::Connection => {
                    builder.add_transition(&bus.name)?;
                }
                BusKindDocument::Consumer => {
                    builder.add_consumer(
                        &bus.name,
                        required(bus.v_min, &entity, "v_min")?,
                        required(bus.v_max, &entity, "v_max")?,
                    )?;
                }
                BusKindDocument::Provider => {
                    builder.add_provider(
                        &bus.name,
                        required(bus.voltage, &entity, "voltage")?,
                        complex(required(bus.generation_max, &entity, "generation_max")?),
                        complex(required(bus.generation_min, &entity, "generation_min")?),
                    )?;
                }
            }
        }
        for transformer in &self.transformers {
            let terminals: Vec<(&str, f64)> = transformer
                .terminals
                .iter()
                .map(|t| (t.bus.as_str(), t.nominal_voltage))
                .collect();
            builder.add_transformer(&transformer.name, &terminals, transformer.modes.clone())?;
        }
        for bus in &self.buses {
            if let Some(location) = bus.location {
                builder.set_location(&bus.name, location)?;
            }
        }
        for line in &self.lines {
            let mut spec = LineSpec::new(
                line.name.clone(),
                line.from.clone(),
                line.to.clone(),
                complex(line.impedance),
            )
            .with_i_max(line.i_max.unwrap_or(f64::INFINITY))
            .with_v_max(line.v_max.unwrap_or(f64::INFINITY));
            if line.switchable {
                spec = spec.switchable(line.switching_cost.unwrap_or(0.0));
            } else if let Some(cost) = line.switching_cost {
                spec.switching_cost = cost;
            }
            if line.breaker {
                spec = spec.breaker();
            }
            builder.add_line(spec)?;
        }
        Ok(builder.build())
    }

    /// Describe an existing network.
    pub fn from_network(network: &Network) -> Self {
        let mut buses = Vec::new();
        for bus in network.buses() {
            let mut doc = BusDocument {
                name: bus.name.clone(),
                kind: BusKindDocument::Connection,
                voltage: None,
                generation_max: None,
                generation_min: None,
                v_min: None,
                v_max: None,
                location: bus.location,
            };
            match &bus.kind {
                BusKind::Connection => {}
                BusKind::Consumer(limits) => {
                    doc.kind = BusKindDocument::Consumer;
                    doc.v_min = Some(limits.v_min);
                    doc.v_max = Some(limits.v_max);
                }
                BusKind::Provider(data) => {
                    doc.kind = BusKindDocument::Provider;
                    doc.voltage = Some(data.voltage);
                    doc.generation_max = Some(pair(data.generation_max));
                    doc.generation_min = Some(pair(data.generation_min));
                }
                // terminals are written with their transformer
                BusKind::TransformerTerminal { .. } => continue,
            }
            buses.push(doc);
        }
        let lines = network
            .lines()
            .map(|line| LineDocument {
                name: line.name.clone(),
                from: network.bus(line.from).name.clone(),
                to: network.bus(line.to).name.clone(),
                impedance: pair(line.impedance),
                i_max: line.i_max.is_finite().then_some(line.i_max),
                v_max: line.v_max.is_finite().then_some(line.v_max),
                switchable: line.switchable,
                switching_cost: line.switchable.then_some(line.switching_cost),
                breaker: line.is_breaker,
            })
            .collect();
        let transformers = network
            .transformers()
            .map(|t| TransformerDocument {
                name: t.name.clone(),
                terminals: t
                    .terminals
                    .iter()
                    .map(|terminal| TerminalDocument {
                        bus: network.bus(terminal.bus).name.clone(),
                        nominal_voltage: terminal.nominal_voltage,
                    })
                    .collect(),
                modes: t.modes.clone(),
            })
            .collect();
        Self {
            buses,
            lines,
            transformers,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeriodDocument {
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Consumer bus name -> [P, Q]
    pub demands: BTreeMap<String, [f64; 2]>,
}

/// Demand periods, in planning order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemandsDocument {
    pub periods: Vec<PeriodDocument>,
}

impl DemandsDocument {
    pub fn to_period_data(&self, network: &Network) -> FeederResult<Vec<PeriodData>> {
        if self.periods.is_empty() {
            return Err(FeederError::Config(
                "demands document has no periods".to_string(),
            ));
        }
        let mut periods = Vec::with_capacity(self.periods.len());
        for (index, doc) in self.periods.iter().enumerate() {
            let period = Period::new(doc.id.clone(), index, doc.start, doc.end)?;
            let mut demands = PowerDemands::new();
            for (name, value) in &doc.demands {
                let bus = network
                    .bus_by_name(name)
                    .ok_or_else(|| FeederError::UnknownBus(name.clone()))?;
                demands.set(network, bus, complex(*value))?;
            }
            periods.push(PeriodData { period, demands });
        }
        Ok(periods)
    }
}

/// Switch configuration as `line name -> open`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsDocument {
    pub switches: BTreeMap<String, bool>,
}

impl SettingsDocument {
    pub fn from_settings(network: &Network, settings: &SwitchSettings) -> Self {
        Self {
            switches: settings.to_named(network),
        }
    }

    pub fn to_settings(&self, network: &Network) -> FeederResult<SwitchSettings> {
        SwitchSettings::from_named(network, &self.switches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETWORK: &str = r#"{
        "buses": [
            { "name": "src", "kind": "provider", "voltage": 22000.0,
              "generation_max": [1e6, 1e6], "generation_min": [0.0, -1e6] },
            { "name": "load", "kind": "consumer", "v_min": 207.0, "v_max": 253.0 },
            { "name": "j", "kind": "connection", "location": { "x": 1.0, "y": 2.0 } }
        ],
        "lines": [
            { "name": "feed", "from": "src", "to": "t.hv", "impedance": [0.5, 0.1] },
            { "name": "svc", "from": "t.lv", "to": "j", "impedance": [0.1, 0.0],
              "switchable": true, "switching_cost": 3.0 },
            { "name": "drop", "from": "j", "to": "load", "impedance": [0.1, 0.0], "i_max": 80.0 }
        ],
        "transformers": [
            { "name": "t",
              "terminals": [ { "bus": "t.hv", "nominal_voltage": 22000.0 },
                             { "bus": "t.lv", "nominal_voltage": 230.0 } ],
              "modes": [ { "input": 0, "output": 1,
                           "operation": { "type": "fixed_ratio", "ratio": 95.65 },
                           "power_factor": 0.98, "bidirectional": false } ] }
        ]
    }"#;

    #[test]
    fn test_network_document_builds() {
        let doc: NetworkDocument = serde_json::from_str(NETWORK).unwrap();
        let network = doc.build().unwrap();
        let stats = network.stats();
        assert_eq!(stats.num_buses, 5);
        assert_eq!(stats.num_transformers, 1);
        assert_eq!(stats.num_switches, 1);
        let j = network.bus_by_name("j").unwrap();
        assert_eq!(network.bus(j).location, Some(Coordinate { x: 1.0, y: 2.0 }));

        let again = NetworkDocument::from_network(&network).build().unwrap();
        assert_eq!(again.stats().num_lines, 3);
    }

    #[test]
    fn test_missing_attribute_names_bus() {
        let json = r#"{ "buses": [ { "name": "c", "kind": "consumer", "v_min": 1.0 } ] }"#;
        let doc: NetworkDocument = serde_json::from_str(json).unwrap();
        let err = doc.build().unwrap_err().to_string();
        assert!(err.contains("bus 'c'"));
        assert!(err.contains("v_max"));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let json = r#"{ "buses": [], "wires": [] }"#;
        assert!(serde_json::from_str::<NetworkDocument>(json).is_err());
    }

    #[test]
    fn test_demands_and_settings_documents() {
        let network = serde_json::from_str::<NetworkDocument>(NETWORK)
            .unwrap()
            .build()
            .unwrap();
        let demands: DemandsDocument = serde_json::from_str(
            r#"{ "periods": [ { "id": "p0", "start": "2024-01-01T00:00:00Z",
                 "end": "2024-01-01T01:00:00Z", "demands": { "load": [1000.0, 200.0] } } ] }"#,
        )
        .unwrap();
        let periods = demands.to_period_data(&network).unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].demands.total(), Complex64::new(1000.0, 200.0));

        let settings: SettingsDocument =
            serde_json::from_str(r#"{ "switches": { "svc": true } }"#).unwrap();
        let switch_settings = settings.to_settings(&network).unwrap();
        assert_eq!(switch_settings.open_switches().count(), 1);
        assert_eq!(
            SettingsDocument::from_settings(&network, &switch_settings),
            settings
        );
    }

    #[test]
    fn test_demand_on_unknown_bus() {
        let network = serde_json::from_str::<NetworkDocument>(NETWORK)
            .unwrap()
            .build()
            .unwrap();
        let demands: DemandsDocument = serde_json::from_str(
            r#"{ "periods": [ { "id": "p0", "start": "2024-01-01T00:00:00Z",
                 "end": "2024-01-01T01:00:00Z", "demands": { "ghost": [1.0, 0.0] } } ] }"#,
        )
        .unwrap();
        let err = demands.to_period_data(&network).unwrap_err();
        assert!(matches!(err, FeederError::UnknownBus(ref n) if n == "ghost"));
    }
}
