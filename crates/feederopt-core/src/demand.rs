//! Demand periods.

use crate::{BusId, FeederError, FeederResult, Network};
use chrono::{DateTime, Utc};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A time interval with constant demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub id: String,
    /// Position in the planning horizon
    pub index: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    pub fn new(
        id: impl Into<String>,
        index: usize,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> FeederResult<Self> {
        let id = id.into();
        if end <= start {
            return Err(FeederError::invalid(
                format!("period '{id}'"),
                format!("end {end} is not after start {start}"),
            ));
        }
        Ok(Self {
            id,
            index,
            start,
            end,
        })
    }

    pub fn duration_hours(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 3_600_000.0
    }
}

/// Complex power demand per consumer bus (W + j VAr).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PowerDemands {
    demands: BTreeMap<BusId, Complex64>,
}

impl PowerDemands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the demand of a consumer bus.
    pub fn set(&mut self, network: &Network, bus: BusId, demand: Complex64) -> FeederResult<()> {
        let target = network.bus(bus);
        if !target.is_consumer() {
            return Err(FeederError::invalid(
                format!("bus '{}'", target.name),
                "demand given for a bus that is not a consumer",
            ));
        }
        if !demand.re.is_finite() || !demand.im.is_finite() {
            return Err(FeederError::invalid(
                format!("bus '{}'", target.name),
                "demand must be finite",
            ));
        }
        self.demands.insert(bus, demand);
        Ok(())
    }

    /// Demand at `bus`; zero for buses without an entry.
    pub fn get(&self, bus: BusId) -> Complex64 {
        self.demands.get(&bus).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BusId, Complex64)> + '_ {
        self.demands.iter().map(|(bus, s)| (*bus, *s))
    }

    pub fn total(&self) -> Complex64 {
        self.demands.values().sum()
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            demands: self
                .demands
                .iter()
                .map(|(bus, s)| (*bus, s * factor))
                .collect(),
        }
    }

    /// Re-key demands onto another network through a bus mapping.
    ///
    /// Demands on buses the mapping drops are left out.
    pub fn remap(&self, map: impl Fn(BusId) -> Option<BusId>) -> Self {
        let mut demands = BTreeMap::new();
        for (bus, s) in self.iter() {
            if let Some(target) = map(bus) {
                *demands.entry(target).or_insert_with(Complex64::default) += s;
            }
        }
        Self { demands }
    }
}

/// A period together with its demands.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodData {
    pub period: Period,
    pub demands: PowerDemands,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LineSpec, NetworkBuilder};
    use chrono::TimeZone;

    #[test]
    fn test_period_duration() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 6, 30, 0).unwrap();
        let period = Period::new("night", 0, start, end).unwrap();
        assert!((period.duration_hours() - 6.5).abs() < 1e-12);
        assert!(Period::new("bad", 1, end, start).is_err());
    }

    #[test]
    fn test_demands_only_on_consumers() {
        let mut b = NetworkBuilder::new();
        let g = Complex64::new(1e6, 1e6);
        let p = b.add_provider("p", 230.0, g, -g).unwrap();
        let c = b.add_consumer("c", 200.0, 250.0).unwrap();
        b.add_line(LineSpec::new("l", "p", "c", Complex64::new(1.0, 0.0)))
            .unwrap();
        let network = b.build();

        let mut demands = PowerDemands::new();
        demands.set(&network, c, Complex64::new(100.0, 10.0)).unwrap();
        assert!(demands.set(&network, p, Complex64::new(1.0, 0.0)).is_err());
        assert_eq!(demands.get(c), Complex64::new(100.0, 10.0));
        assert_eq!(demands.get(p), Complex64::new(0.0, 0.0));
        assert_eq!(demands.scaled(2.0).total(), Complex64::new(200.0, 20.0));
    }
}
