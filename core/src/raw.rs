//! Raw GNSS observations of one epoch
//!
//! A [`GNSSRawData`] collects, for one receiver clock channel and one epoch, every raw
//! measurement reported per satellite, keyed by [`MeasurementItem`]. It also carries the
//! ranging solver that knows the satellites the receiver tracked at that epoch.
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};

use gnss_rs::prelude::SV;
use hifitime::Epoch;
use serde::{Deserialize, Serialize};

use crate::constants::L1_WAVELENGTH_M;
use crate::solver::RangingSolver;

/// Kind of raw measurement reported for a satellite
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MeasurementItem {
    /// L1 pseudorange, m
    L1Pseudorange,
    /// L1 Doppler, Hz
    L1Doppler,
    /// L1 carrier phase, cycles
    L1CarrierPhase,
    /// L1 range rate, m/s
    L1RangeRate,
}
impl Display for MeasurementItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementItem::L1Pseudorange => write!(f, "L1_PSEUDORANGE"),
            MeasurementItem::L1Doppler => write!(f, "L1_DOPPLER"),
            MeasurementItem::L1CarrierPhase => write!(f, "L1_CARRIER_PHASE"),
            MeasurementItem::L1RangeRate => write!(f, "L1_RANGE_RATE"),
        }
    }
}

/// Measurements of one satellite
pub type SatelliteMeasurement = BTreeMap<MeasurementItem, f64>;

/// One epoch of raw observations for one clock channel
#[derive(Clone)]
pub struct GNSSRawData<'a> {
    /// Solver for the satellites of this epoch; without one the epoch cannot be used
    pub solver: Option<&'a dyn RangingSolver>,
    /// Receiver clock channel that produced the observations
    pub clock_index: usize,
    /// Epoch of the observations, GPS time
    pub epoch: Epoch,
    /// Measurements per satellite
    pub measurement: BTreeMap<SV, SatelliteMeasurement>,
}
impl Debug for GNSSRawData<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GNSSRawData")
            .field("solver", &self.solver.is_some())
            .field("clock_index", &self.clock_index)
            .field("epoch", &self.epoch)
            .field("measurement", &self.measurement)
            .finish()
    }
}
impl<'a> GNSSRawData<'a> {
    pub fn new(clock_index: usize, epoch: Epoch) -> GNSSRawData<'a> {
        GNSSRawData {
            solver: None,
            clock_index,
            epoch,
            measurement: BTreeMap::new(),
        }
    }
    pub fn with_solver(mut self, solver: &'a dyn RangingSolver) -> GNSSRawData<'a> {
        self.solver = Some(solver);
        self
    }
    /// Record a measurement, returning the value it replaces
    pub fn insert(&mut self, sv: SV, item: MeasurementItem, value: f64) -> Option<f64> {
        self.measurement.entry(sv).or_default().insert(item, value)
    }
    pub fn get(&self, sv: &SV, item: MeasurementItem) -> Option<f64> {
        self.measurement.get(sv)?.get(&item).copied()
    }
    /// Number of satellites with at least one measurement entry
    pub fn satellites(&self) -> usize {
        self.measurement.len()
    }
    pub fn is_empty(&self) -> bool {
        self.measurement.is_empty()
    }
    /// Range rate of `sv`, m/s
    ///
    /// The reported range rate when present, otherwise the L1 Doppler converted with
    /// `-doppler * λ_L1`.
    pub fn range_rate(&self, sv: &SV) -> Option<f64> {
        let items = self.measurement.get(sv)?;
        items
            .get(&MeasurementItem::L1RangeRate)
            .copied()
            .or_else(|| {
                items
                    .get(&MeasurementItem::L1Doppler)
                    .map(|doppler| -doppler * L1_WAVELENGTH_M)
            })
    }
    /// Every satellite reporting `item`, with its value multiplied by `scaling`
    pub fn measurement_of(&self, item: MeasurementItem, scaling: f64) -> Vec<(SV, f64)> {
        self.measurement
            .iter()
            .filter_map(|(sv, items)| items.get(&item).map(|value| (*sv, value * scaling)))
            .collect()
    }
    /// `(operand - argument) * scaling` for every satellite reporting both items
    pub fn difference(
        &self,
        operand: MeasurementItem,
        argument: MeasurementItem,
        scaling: f64,
    ) -> Vec<(SV, f64)> {
        self.measurement
            .iter()
            .filter_map(|(sv, items)| {
                let a = items.get(&operand)?;
                let b = items.get(&argument)?;
                Some((*sv, (a - b) * scaling))
            })
            .collect()
    }
}
