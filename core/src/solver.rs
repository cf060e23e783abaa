//! Ranging solver interface
//!
//! The tightly-coupled corrector never computes satellite positions itself. For each satellite
//! it hands the clock-corrected pseudorange, the signal reception time and the receiver
//! kinematics to a [`RangingSolver`], which answers with the geometry needed to linearize the
//! observation: the negative line of sight, the range residual, the relative range rate and a
//! weight. Ephemeris evaluation, atmospheric corrections and elevation masking live behind this
//! trait.
//!
//! [`StaticConstellation`] is a solver over satellites with known ECEF position and velocity,
//! used for synthetic scenarios and tests.
use std::collections::BTreeMap;

use gnss_rs::prelude::SV;
use hifitime::Epoch;
use nalgebra::Vector3;

/// Receiver position handed to the solver, both in ECEF and geodetic form
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReceiverPosition {
    /// ECEF coordinates, m
    pub xyz: Vector3<f64>,
    /// Geodetic latitude, rad
    pub latitude: f64,
    /// Geodetic longitude, rad
    pub longitude: f64,
    /// Height above the ellipsoid, m
    pub height: f64,
}

/// Per-satellite geometry returned by a [`RangingSolver`]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RelativeProperty {
    /// Inverse standard deviation of the range, 1/m; zero or less excludes the satellite
    pub weight: f64,
    /// Corrected range minus geometric range, m
    pub range_residual: f64,
    /// Negative of the geometric range rate, `los_neg · (v_sat - v_rcv)`, m/s
    pub rate_relative_neg: f64,
    /// Unit vector from the satellite towards the receiver in ECEF
    pub los_neg: Vector3<f64>,
}
impl RelativeProperty {
    /// A property that excludes the satellite
    pub fn invalid() -> RelativeProperty {
        RelativeProperty::default()
    }
    pub fn is_valid(&self) -> bool {
        self.weight > 0.0
    }
}

/// Source of per-satellite line-of-sight geometry
pub trait RangingSolver {
    /// Geometry of `sv` as seen by the receiver
    ///
    /// # Arguments
    /// * `sv` - the satellite
    /// * `range` - pseudorange with the receiver clock error removed, m
    /// * `time_arrival` - signal reception time in GPS time
    /// * `position` - receiver position
    /// * `velocity` - receiver velocity in ECEF, m/s
    fn relative_property(
        &self,
        sv: SV,
        range: f64,
        time_arrival: Epoch,
        position: &ReceiverPosition,
        velocity: &Vector3<f64>,
    ) -> RelativeProperty;
}

/// ECEF kinematics of a satellite
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SatelliteState {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
}

/// Solver over satellites whose ECEF position and velocity are known and constant
///
/// Satellites below the elevation mask or not in the constellation get a zero weight; every
/// other satellite gets a unit weight.
#[derive(Clone, Debug, Default)]
pub struct StaticConstellation {
    satellites: BTreeMap<SV, SatelliteState>,
    /// Elevation mask, rad
    pub elevation_mask: f64,
}
impl StaticConstellation {
    pub fn new(elevation_mask: f64) -> StaticConstellation {
        StaticConstellation {
            satellites: BTreeMap::new(),
            elevation_mask,
        }
    }
    pub fn insert(&mut self, sv: SV, satellite: SatelliteState) -> Option<SatelliteState> {
        self.satellites.insert(sv, satellite)
    }
    pub fn get(&self, sv: &SV) -> Option<&SatelliteState> {
        self.satellites.get(sv)
    }
    pub fn satellites(&self) -> impl Iterator<Item = (&SV, &SatelliteState)> {
        self.satellites.iter()
    }
    pub fn len(&self) -> usize {
        self.satellites.len()
    }
    pub fn is_empty(&self) -> bool {
        self.satellites.is_empty()
    }
    /// Elevation of `satellite` above the local horizon of `position`, rad
    pub fn elevation(position: &ReceiverPosition, satellite: &SatelliteState) -> f64 {
        let los = satellite.position - position.xyz;
        let up = Vector3::new(
            position.latitude.cos() * position.longitude.cos(),
            position.latitude.cos() * position.longitude.sin(),
            position.latitude.sin(),
        );
        (los.dot(&up) / los.norm()).clamp(-1.0, 1.0).asin()
    }
}
impl RangingSolver for StaticConstellation {
    fn relative_property(
        &self,
        sv: SV,
        range: f64,
        _time_arrival: Epoch,
        position: &ReceiverPosition,
        velocity: &Vector3<f64>,
    ) -> RelativeProperty {
        let Some(satellite) = self.satellites.get(&sv) else {
            return RelativeProperty::invalid();
        };
        if Self::elevation(position, satellite) < self.elevation_mask {
            return RelativeProperty::invalid();
        }
        let rcv_to_sat = satellite.position - position.xyz;
        let geometric_range = rcv_to_sat.norm();
        let los_neg = -rcv_to_sat / geometric_range;
        RelativeProperty {
            weight: 1.0,
            range_residual: range - geometric_range,
            rate_relative_neg: los_neg.dot(&(satellite.velocity - velocity)),
            los_neg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::earth;
    use assert_approx_eq::assert_approx_eq;
    use gnss_rs::prelude::Constellation;

    fn receiver() -> ReceiverPosition {
        let (latitude, longitude, height) = (0.0, 0.0, 0.0);
        ReceiverPosition {
            xyz: earth::geodetic_to_ecef(&latitude, &longitude, &height),
            latitude,
            longitude,
            height,
        }
    }

    #[test]
    fn zenith_satellite_geometry() {
        let g01 = SV::new(Constellation::GPS, 1);
        let mut constellation = StaticConstellation::new(10.0_f64.to_radians());
        let rcv = receiver();
        constellation.insert(
            g01,
            SatelliteState {
                position: rcv.xyz + Vector3::new(20_000e3, 0.0, 0.0),
                velocity: Vector3::new(-1.0, 0.0, 0.0),
            },
        );
        let t = Epoch::from_gpst_seconds(1.0e9);
        let prop = constellation.relative_property(g01, 20_000e3 + 5.0, t, &rcv, &Vector3::zeros());
        assert!(prop.is_valid());
        assert_approx_eq!(prop.range_residual, 5.0, 1e-6);
        assert_approx_eq!(prop.los_neg[0], -1.0, 1e-12);
        // Approaching satellite: the range shrinks, so the negative range rate is positive
        assert_approx_eq!(prop.rate_relative_neg, 1.0, 1e-12);
        assert_approx_eq!(
            StaticConstellation::elevation(&rcv, constellation.get(&g01).unwrap()),
            std::f64::consts::FRAC_PI_2,
            1e-9
        );
    }
    #[test]
    fn masked_and_unknown_satellites_are_invalid() {
        let g02 = SV::new(Constellation::GPS, 2);
        let g03 = SV::new(Constellation::GPS, 3);
        let mut constellation = StaticConstellation::new(10.0_f64.to_radians());
        let rcv = receiver();
        // On the horizon, due north
        constellation.insert(
            g02,
            SatelliteState {
                position: rcv.xyz + Vector3::new(0.0, 0.0, 20_000e3),
                velocity: Vector3::zeros(),
            },
        );
        let t = Epoch::from_gpst_seconds(1.0e9);
        let prop = constellation.relative_property(g02, 20_000e3, t, &rcv, &Vector3::zeros());
        assert!(!prop.is_valid());
        let prop = constellation.relative_property(g03, 20_000e3, t, &rcv, &Vector3::zeros());
        assert_eq!(prop, RelativeProperty::invalid());
        assert_eq!(constellation.len(), 1);
    }
}
