//! Synthetic tightly-coupled scenarios and CSV output.
//!
//! This module provides:
//! - A serializable [`ScenarioConfig`] describing a static receiver, a frozen constellation and
//!   the receiver clock (bias, drift and an optional whole-millisecond jump)
//! - [`Scenario`], which builds the constellation, generates one [`GNSSRawData`] per GNSS epoch
//!   and runs the tightly-coupled filter in closed loop
//! - [`NavigationResult`] for storing the per-epoch solution and writing it to CSV
//! - [`write_raw_data_csv`], a printer of raw observations with one range and one range rate
//!   column per GPS PRN
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use gnss_rs::prelude::{Constellation, SV};
use hifitime::Epoch;
use log::{debug, info};
use nalgebra::{DMatrix, DVector, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::clock::ClockModelConfig;
use crate::constants::{L1_WAVELENGTH_M, MILLISECOND_M};
use crate::earth;
use crate::ins::{InertialState, stationary_imu};
use crate::kalman::{ErrorStateKalmanFilter, INSErrorModel};
use crate::raw::{GNSSRawData, MeasurementItem};
use crate::solver::{SatelliteState, StaticConstellation};
use crate::tightly::{TightlyCoupledConfig, TightlyCoupledINS, TightlyModel, TightlyState};
use crate::{Error, IMUData};

/// Number of GPS PRNs printed by [`write_raw_data_csv`]
pub const GPS_PRN_MAX: u8 = 32;

/// Default initial error covariance of the single-clock filter
pub const DEFAULT_INITIAL_COVARIANCE: [f64; 12] = [
    0.25, 0.25, 0.25, // velocity (m/s)^2
    1e-12, 1e-12, 1e-12, // position quaternion error, about 13 m
    100.0, // height m^2
    2.5e-5, 2.5e-5, 2.5e-5, // attitude quaternion error, about 0.6 deg
    1e6,   // clock error m^2
    100.0, // clock error rate (m/s)^2
];

/// Default process noise of the single-clock filter
pub const DEFAULT_PROCESS_NOISE: [f64; 9] = [
    1e-2, 1e-2, 1e-2, // accelerometer
    1e-8, 1e-8, 1e-8, // gyroscope
    1e-4, // gravity
    10.0, // clock error
    1.0,  // clock error rate
];

/// Position of a simulated satellite relative to the receiver
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SatelliteGeometry {
    pub prn: u8,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
}

/// Whole-millisecond step of the receiver clock
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClockJump {
    /// Scenario time of the jump, s
    pub at_s: f64,
    /// Size of the jump, ms
    pub milliseconds: f64,
}

fn default_seed() -> u64 {
    42
}
fn default_satellites() -> Vec<SatelliteGeometry> {
    [
        (1, 0.0, 75.0),
        (3, 45.0, 35.0),
        (7, 110.0, 50.0),
        (11, 170.0, 25.0),
        (14, 220.0, 60.0),
        (19, 280.0, 30.0),
        (22, 330.0, 45.0),
        (28, 200.0, 5.0),
    ]
    .into_iter()
    .map(|(prn, azimuth_deg, elevation_deg)| SatelliteGeometry {
        prn,
        azimuth_deg,
        elevation_deg,
    })
    .collect()
}

/// Configuration of a static tightly-coupled scenario
///
/// Every field has a default, so a JSON file only needs to name what it changes:
///
/// ```
/// use tightly::sim::ScenarioConfig;
/// let config: ScenarioConfig =
///     serde_json::from_str(r#"{ "duration_s": 20.0, "clock_jump": { "at_s": 10.0, "milliseconds": 1.0 } }"#)
///         .unwrap();
/// assert_eq!(config.duration_s, 20.0);
/// assert_eq!(config.seed, 42);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Receiver latitude, degrees
    pub latitude_deg: f64,
    /// Receiver longitude, degrees
    pub longitude_deg: f64,
    /// Receiver height above the ellipsoid, m
    pub height_m: f64,
    /// GPS time of the first epoch, s
    pub gpst_start_s: f64,
    pub duration_s: f64,
    /// IMU sampling interval, s
    pub imu_dt_s: f64,
    /// Interval between GNSS epochs, s
    pub gnss_interval_s: f64,
    pub satellites: Vec<SatelliteGeometry>,
    pub elevation_mask_deg: f64,
    /// Distance of the satellites from the Earth center, m
    pub orbit_radius_m: f64,
    /// Satellite speed across the line of sight, m/s
    pub satellite_speed_m_s: f64,
    /// Pseudorange noise standard deviation, m
    pub range_noise_m: f64,
    /// Range rate noise standard deviation, m/s
    pub rate_noise_m_s: f64,
    /// Accelerometer noise standard deviation, m/s^2
    pub accel_noise: f64,
    /// Gyroscope noise standard deviation, rad/s
    pub gyro_noise: f64,
    /// Receiver clock error at the first epoch, m
    pub clock_bias_m: f64,
    /// Receiver clock drift, m/s
    pub clock_drift_m_s: f64,
    pub clock_jump: Option<ClockJump>,
    /// Report L1 Doppler instead of range rate
    pub use_doppler: bool,
    /// Height error of the initial filter state, m
    pub initial_height_error_m: f64,
    pub tightly: TightlyCoupledConfig,
    pub clock_model: ClockModelConfig,
    #[serde(default = "default_seed")]
    pub seed: u64,
}
impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            latitude_deg: 39.95,
            longitude_deg: -75.16,
            height_m: 50.0,
            gpst_start_s: 1.4e9,
            duration_s: 60.0,
            imu_dt_s: 0.02,
            gnss_interval_s: 1.0,
            satellites: default_satellites(),
            elevation_mask_deg: 10.0,
            orbit_radius_m: 26_560e3,
            satellite_speed_m_s: 800.0,
            range_noise_m: 1.0,
            rate_noise_m_s: 0.02,
            accel_noise: 1e-3,
            gyro_noise: 1e-6,
            clock_bias_m: 100.0,
            clock_drift_m_s: 0.5,
            clock_jump: None,
            use_doppler: false,
            initial_height_error_m: 5.0,
            tightly: TightlyCoupledConfig::default(),
            clock_model: ClockModelConfig::default(),
            seed: default_seed(),
        }
    }
}
impl ScenarioConfig {
    /// Read a configuration from a JSON file
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<ScenarioConfig, Error> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
    fn imu_steps(&self) -> usize {
        (self.duration_s / self.imu_dt_s).round().max(0.0) as usize
    }
    fn steps_per_epoch(&self) -> usize {
        ((self.gnss_interval_s / self.imu_dt_s).round() as usize).max(1)
    }
}

/// Filter solution at one GNSS epoch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavigationRecord {
    pub gpst_seconds: f64,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub height_m: f64,
    pub vel_n_mps: f64,
    pub vel_e_mps: f64,
    pub vel_d_mps: f64,
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
    pub clock_error_m: f64,
    pub clock_error_rate_mps: f64,
    /// Simulated receiver clock error, m
    pub clock_error_truth_m: f64,
    /// Distance between the estimated and the true position, m
    pub position_error_m: f64,
    /// Outcome of the correction at this epoch
    pub outcome: String,
}

/// Per-epoch solution of a closed-loop run
#[derive(Clone, Debug, Default)]
pub struct NavigationResult {
    pub name: String,
    pub records: Vec<NavigationRecord>,
}
impl NavigationResult {
    pub fn new(name: &str) -> Self {
        NavigationResult {
            name: name.to_string(),
            records: Vec::new(),
        }
    }
    pub fn last(&self) -> Option<&NavigationRecord> {
        self.records.last()
    }
    /// Writes the navigation result to a CSV file, one row per GNSS epoch.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
    /// Reads a navigation result previously written by [`NavigationResult::to_csv`].
    pub fn from_csv<P: AsRef<Path>>(path: P, name: &str) -> Result<Self, Error> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut result = NavigationResult::new(name);
        for record in reader.deserialize() {
            result.records.push(record?);
        }
        Ok(result)
    }
}

/// Write raw observations as CSV
///
/// The header is `gpst_seconds,clock_index` followed by `L1_range(i),L1_rate(i)` for every GPS
/// PRN `i` in `1..=32`. The rate column holds the reported range rate, or the rate derived from
/// the L1 Doppler when only that is available. Missing values are empty cells.
pub fn write_raw_data_csv<W: Write>(writer: W, raw: &[GNSSRawData]) -> Result<(), Error> {
    let mut writer = csv::Writer::from_writer(writer);
    let mut header = vec!["gpst_seconds".to_string(), "clock_index".to_string()];
    for prn in 1..=GPS_PRN_MAX {
        header.push(format!("L1_range({prn})"));
        header.push(format!("L1_rate({prn})"));
    }
    writer.write_record(&header)?;
    for epoch in raw {
        let mut row = vec![
            format!("{:.3}", epoch.epoch.to_gpst_seconds()),
            epoch.clock_index.to_string(),
        ];
        for prn in 1..=GPS_PRN_MAX {
            let sv = SV::new(Constellation::GPS, prn);
            row.push(
                epoch
                    .get(&sv, MeasurementItem::L1Pseudorange)
                    .map(|range| format!("{range:.3}"))
                    .unwrap_or_default(),
            );
            row.push(
                epoch
                    .range_rate(&sv)
                    .map(|rate| format!("{rate:.4}"))
                    .unwrap_or_default(),
            );
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Sample of a zero-mean normal distribution; a negative or non-finite deviation yields zero.
fn noise(sigma: f64, rng: &mut StdRng) -> f64 {
    Normal::new(0.0, sigma.max(0.0))
        .map(|n| n.sample(rng))
        .unwrap_or(0.0)
}

/// A static receiver observing a frozen constellation
pub struct Scenario {
    config: ScenarioConfig,
    truth: InertialState,
    constellation: StaticConstellation,
}
impl Scenario {
    pub fn new(config: ScenarioConfig) -> Scenario {
        let truth = InertialState::new(
            config.latitude_deg.to_radians(),
            config.longitude_deg.to_radians(),
            config.height_m,
            Vector3::zeros(),
            0.0,
            0.0,
            0.0,
        );
        let constellation = Self::build_constellation(&config, &truth);
        Scenario {
            config,
            truth,
            constellation,
        }
    }
    /// Place every configured satellite on the orbit sphere along its azimuth and elevation
    fn build_constellation(config: &ScenarioConfig, truth: &InertialState) -> StaticConstellation {
        let mut constellation = StaticConstellation::new(config.elevation_mask_deg.to_radians());
        let r = truth.position_ecef();
        let c_n2e = earth::ned_to_ecef(&truth.latitude(), &truth.longitude());
        for geometry in &config.satellites {
            let (azimuth, elevation) = (
                geometry.azimuth_deg.to_radians(),
                geometry.elevation_deg.to_radians(),
            );
            let los_ned = Vector3::new(
                elevation.cos() * azimuth.cos(),
                elevation.cos() * azimuth.sin(),
                -elevation.sin(),
            );
            let los = c_n2e * los_ned;
            // |r + s los| = orbit radius
            let b = r.dot(&los);
            let s = -b + (b * b - r.norm_squared() + config.orbit_radius_m.powi(2)).max(0.0).sqrt();
            let position = r + los * s;
            let across = los.cross(&Vector3::z());
            let across = if across.norm() > 1e-9 {
                across.normalize()
            } else {
                Vector3::x()
            };
            constellation.insert(
                SV::new(Constellation::GPS, geometry.prn),
                SatelliteState {
                    position,
                    velocity: across * config.satellite_speed_m_s,
                },
            );
        }
        constellation
    }
    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }
    pub fn truth(&self) -> &InertialState {
        &self.truth
    }
    pub fn constellation(&self) -> &StaticConstellation {
        &self.constellation
    }
    /// Simulated receiver clock error at scenario time `t`, m
    pub fn truth_clock_error(&self, t: f64) -> f64 {
        let jump = match self.config.clock_jump {
            Some(jump) if t >= jump.at_s => jump.milliseconds * MILLISECOND_M,
            _ => 0.0,
        };
        self.config.clock_bias_m + self.config.clock_drift_m_s * t + jump
    }
    /// Scenario times of the GNSS epochs, s
    pub fn epoch_times(&self) -> Vec<f64> {
        let per_epoch = self.config.steps_per_epoch();
        (0..=self.config.imu_steps())
            .step_by(per_epoch)
            .map(|step| step as f64 * self.config.imu_dt_s)
            .collect()
    }
    fn gpst(&self, t: f64) -> Epoch {
        Epoch::from_gpst_seconds(self.config.gpst_start_s + t)
    }
    /// Raw observations of every GNSS epoch, seeded from the configuration
    pub fn raw_data(&self) -> Vec<GNSSRawData<'_>> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let r = self.truth.position_ecef();
        self.epoch_times()
            .into_iter()
            .map(|t| {
                let mut raw = GNSSRawData::new(0, self.gpst(t)).with_solver(&self.constellation);
                let clock_error = self.truth_clock_error(t);
                for (sv, satellite) in self.constellation.satellites() {
                    let rcv_to_sat = satellite.position - r;
                    let geometric_range = rcv_to_sat.norm();
                    let los_neg = -rcv_to_sat / geometric_range;
                    let range =
                        geometric_range + clock_error + noise(self.config.range_noise_m, &mut rng);
                    let rate = -los_neg.dot(&satellite.velocity)
                        + self.config.clock_drift_m_s
                        + noise(self.config.rate_noise_m_s, &mut rng);
                    raw.insert(*sv, MeasurementItem::L1Pseudorange, range);
                    if self.config.use_doppler {
                        raw.insert(*sv, MeasurementItem::L1Doppler, -rate / L1_WAVELENGTH_M);
                    } else {
                        raw.insert(*sv, MeasurementItem::L1RangeRate, rate);
                    }
                }
                raw
            })
            .collect()
    }
    /// Single-clock filter started at the true position with a height error and no clock
    /// knowledge, using [`DEFAULT_INITIAL_COVARIANCE`] and [`DEFAULT_PROCESS_NOISE`]
    pub fn initialize_filter(&self) -> Result<TightlyCoupledINS<1>, Error> {
        let mut base = self.truth;
        base.height += self.config.initial_height_error_m;
        let model = TightlyModel::<1>::new(INSErrorModel, &self.config.clock_model);
        let filter = ErrorStateKalmanFilter::new(
            model,
            TightlyState::<1>::new(base),
            DMatrix::from_diagonal(&DVector::from_row_slice(&DEFAULT_INITIAL_COVARIANCE)),
            DMatrix::from_diagonal(&DVector::from_row_slice(&DEFAULT_PROCESS_NOISE)),
        )?;
        Ok(TightlyCoupledINS::new(filter, self.config.tightly))
    }
    fn record(&self, ins: &TightlyCoupledINS<1>, t: f64, outcome: String) -> NavigationRecord {
        let state = ins.state();
        let (roll, pitch, yaw) = state.base.attitude();
        NavigationRecord {
            gpst_seconds: self.config.gpst_start_s + t,
            lat_deg: state.base.latitude().to_degrees(),
            lon_deg: state.base.longitude().to_degrees(),
            height_m: state.base.height,
            vel_n_mps: state.base.velocity[0],
            vel_e_mps: state.base.velocity[1],
            vel_d_mps: state.base.velocity[2],
            roll_deg: roll.to_degrees(),
            pitch_deg: pitch.to_degrees(),
            yaw_deg: yaw.to_degrees(),
            clock_error_m: state.clock_error(0).unwrap_or(f64::NAN),
            clock_error_rate_mps: state.clock_error_rate(0).unwrap_or(f64::NAN),
            clock_error_truth_m: self.truth_clock_error(t),
            position_error_m: (state.base.position_ecef() - self.truth.position_ecef()).norm(),
            outcome,
        }
    }
    /// Run the filter over the raw observations
    ///
    /// The filter is predicted with noisy stationary IMU samples at the configured rate and
    /// corrected whenever a GNSS epoch falls on an IMU step. `raw` is consumed in order, one
    /// entry per GNSS epoch, as produced by [`Scenario::raw_data`].
    pub fn run_closed_loop(&self, raw: &[GNSSRawData]) -> Result<NavigationResult, Error> {
        let mut ins = self.initialize_filter()?;
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(1));
        let mut result = NavigationResult::new("tightly coupled");
        let clean = stationary_imu(&self.truth);
        let per_epoch = self.config.steps_per_epoch();
        let steps = self.config.imu_steps();
        let mut observations = raw.iter();
        info!(
            "simulating {:.1} s with {} satellites, {} GNSS epochs",
            self.config.duration_s,
            self.constellation.len(),
            raw.len()
        );
        for step in 0..=steps {
            let t = step as f64 * self.config.imu_dt_s;
            if step % per_epoch == 0
                && let Some(gps) = observations.next()
            {
                let outcome = ins.correct(gps)?;
                debug!("{} - {} ({})", gps.epoch, outcome, ins.state());
                result.records.push(self.record(&ins, t, outcome.to_string()));
            }
            if step < steps {
                let imu = IMUData {
                    accel: clean.accel.map(|a| a + noise(self.config.accel_noise, &mut rng)),
                    gyro: clean.gyro.map(|w| w + noise(self.config.gyro_noise, &mut rng)),
                };
                ins.predict(&imu, self.config.imu_dt_s);
            }
        }
        Ok(result)
    }
}
