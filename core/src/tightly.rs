//! Tightly-coupled INS/GNSS correction
//!
//! [`TightlyCoupledINS`] owns an error-state Kalman filter over the clock-augmented inertial
//! state and turns one epoch of raw GNSS observations ([`GNSSRawData`]) into a measurement
//! update. For every satellite with a pseudorange it contributes a range row and, when a range
//! rate (or an L1 Doppler) is available, a range-rate row:
//!
//! $$
//! z_\rho = \rho - b - \lVert r^{sat} - \hat{r} \rVert, \quad
//! H_\rho = \left[\, 0_{1\times3},\ -l^T \frac{\partial r^e}{\partial (u_{e2n}, h)},\ 0_{1\times3},\ \ldots,\ -1_{b_k},\ \ldots \right]
//! $$
//!
//! $$
//! z_{\dot\rho} = \dot\rho - \dot{b} + l \cdot (v^{sat} - \hat{v}^e), \quad
//! H_{\dot\rho} = \left[\, -l^T C_n^e,\ -2 (\hat{v}^e \times l)^T,\ 0,\ 0_{1\times3},\ \ldots,\ -1_{\dot{b}_k},\ \ldots \right]
//! $$
//!
//! where $l$ is the unit vector from the satellite to the receiver. The range noise is
//! $(1 / \max(w, w_{min}))^2$ for the solver weight $w$; the rate noise is a fixed fraction of it.
//!
//! # Clock jumps
//!
//! Receivers that steer their clock in whole milliseconds make every pseudorange of a channel
//! jump by about $c \cdot 1\,ms \approx 300\,km$ at once. Before updating, the mean range
//! residual of the channel is converted to milliseconds; when it reaches the jump threshold the
//! nearest whole-millisecond shift is tried. If the shifted residuals fall back inside the
//! threshold the shift is committed to the clock error state and the update proceeds with the
//! shifted bundle, otherwise the epoch is skipped.
use std::fmt::{self, Display};

use gnss_rs::prelude::SV;
use hifitime::{Duration, Epoch};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::clock::{ClockAugmentedState, ClockErrorModel};
use crate::constants::{MILLISECOND_M, SPEED_OF_LIGHT_M_S};
use crate::kalman::{CorrectInfo, ErrorStateKalmanFilter, ErrorStateModel, INSErrorModel};
use crate::linearize;
use crate::raw::{GNSSRawData, MeasurementItem};
use crate::solver::{RangingSolver, ReceiverPosition};
use crate::{Error, IMUData};
use crate::ins::InertialState;

/// Clock-augmented inertial state with `K` receiver clocks
pub type TightlyState<const K: usize> = ClockAugmentedState<InertialState, K>;
/// Clock-augmented inertial error model with `K` receiver clocks
pub type TightlyModel<const K: usize> = ClockErrorModel<INSErrorModel, K>;

/// Tuning of the tightly-coupled corrector
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TightlyCoupledConfig {
    /// Mean range residual, in milliseconds of light travel, treated as a clock jump
    pub clock_jump_threshold_ms: f64,
    /// Floor applied to solver weights before computing the range noise
    pub minimum_weight: f64,
    /// Ratio of range-rate variance to range variance
    pub rate_variance_scale: f64,
}
impl Default for TightlyCoupledConfig {
    fn default() -> Self {
        TightlyCoupledConfig {
            clock_jump_threshold_ms: 0.9,
            minimum_weight: 0.1,
            rate_variance_scale: 1e-3,
        }
    }
}

/// Receiver kinematics at signal reception, recomputed for every correction
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReceiverState {
    /// Reception time: the epoch minus the clock error expressed as time
    pub t: Epoch,
    /// Clock channel of the observations
    pub clock_index: usize,
    /// Clock error used for this correction (state value plus any hypothesized shift), m
    pub clock_error: f64,
    pub position: ReceiverPosition,
    /// ECEF velocity, m/s
    pub velocity: Vector3<f64>,
}

/// What a call to [`TightlyCoupledINS::correct`] did with an epoch
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CorrectionOutcome {
    /// No usable observation; the filter is unchanged
    NoObservation,
    /// Regular measurement update
    Nominal,
    /// A clock jump of `delta_ms` was absorbed by adding `shift` meters to the clock error
    /// before the update
    JumpFixed { delta_ms: f64, shift: f64 },
    /// Residuals of `delta_ms` could not be explained by a whole-millisecond jump; the filter
    /// is unchanged
    JumpUnresolved { delta_ms: f64 },
}
impl CorrectionOutcome {
    /// True when a measurement update was applied
    pub fn updated(&self) -> bool {
        matches!(
            self,
            CorrectionOutcome::Nominal | CorrectionOutcome::JumpFixed { .. }
        )
    }
}
impl Display for CorrectionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrectionOutcome::NoObservation => write!(f, "no_observation"),
            CorrectionOutcome::Nominal => write!(f, "nominal"),
            CorrectionOutcome::JumpFixed { .. } => write!(f, "jump_fixed"),
            CorrectionOutcome::JumpUnresolved { .. } => write!(f, "jump_unresolved"),
        }
    }
}

/// Row storage for one innovation bundle, sized for the worst case of two rows per satellite
struct InnovationRows {
    h: DMatrix<f64>,
    z: Vec<f64>,
    r_diag: Vec<f64>,
}
impl InnovationRows {
    fn with_capacity(rows: usize, p_size: usize) -> InnovationRows {
        InnovationRows {
            h: DMatrix::zeros(rows, p_size),
            z: Vec::with_capacity(rows),
            r_diag: Vec::with_capacity(rows),
        }
    }
    fn used(&self) -> usize {
        self.z.len()
    }
    fn into_correct_info(self) -> CorrectInfo {
        let rows = self.used();
        if rows == 0 {
            return CorrectInfo::no_info(self.h.ncols());
        }
        CorrectInfo {
            h: self.h.rows(0, rows).into_owned(),
            z: DVector::from_vec(self.z),
            r: DMatrix::from_diagonal(&DVector::from_vec(self.r_diag)),
        }
    }
}

/// Tightly-coupled INS/GNSS filter with `K` receiver clock channels
pub struct TightlyCoupledINS<const K: usize> {
    filter: ErrorStateKalmanFilter<TightlyModel<K>>,
    config: TightlyCoupledConfig,
}
impl<const K: usize> Display for TightlyCoupledINS<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TightlyCoupledINS {{ {} }}", self.filter.state())
    }
}
impl<const K: usize> TightlyCoupledINS<K> {
    pub fn new(
        filter: ErrorStateKalmanFilter<TightlyModel<K>>,
        config: TightlyCoupledConfig,
    ) -> TightlyCoupledINS<K> {
        TightlyCoupledINS { filter, config }
    }
    pub fn filter(&self) -> &ErrorStateKalmanFilter<TightlyModel<K>> {
        &self.filter
    }
    pub fn filter_mut(&mut self) -> &mut ErrorStateKalmanFilter<TightlyModel<K>> {
        &mut self.filter
    }
    pub fn state(&self) -> &TightlyState<K> {
        self.filter.state()
    }
    pub fn config(&self) -> &TightlyCoupledConfig {
        &self.config
    }
    /// Time update by one IMU sample
    pub fn predict(&mut self, imu: &IMUData, dt: f64) {
        self.filter.predict(imu, dt);
    }
    /// Receiver kinematics at signal reception for channel `clock_index`
    ///
    /// # Arguments
    /// * `t` - observation epoch
    /// * `clock_index` - clock channel
    /// * `clock_error_shift` - hypothesized addition to the clock error, m
    pub fn receiver_state(
        &self,
        t: Epoch,
        clock_index: usize,
        clock_error_shift: f64,
    ) -> Result<ReceiverState, Error> {
        let state = self.filter.state();
        let clock_error = state.clock_error(clock_index)? + clock_error_shift;
        let base = &state.base;
        Ok(ReceiverState {
            t: t - Duration::from_seconds(clock_error / SPEED_OF_LIGHT_M_S),
            clock_index,
            clock_error,
            position: ReceiverPosition {
                xyz: base.position_ecef(),
                latitude: base.latitude(),
                longitude: base.longitude(),
                height: base.height,
            },
            velocity: base.velocity_ecef(),
        })
    }
    /// Append the rows contributed by one satellite
    ///
    /// # Returns
    /// The number of rows added: 0 when the solver excludes the satellite, 1 for a range
    /// row alone and 2 when a rate is available.
    fn assign_rows(
        &self,
        solver: &dyn RangingSolver,
        sv: SV,
        x: &ReceiverState,
        range: f64,
        rate: Option<f64>,
        rows: &mut InnovationRows,
    ) -> usize {
        let prop = solver.relative_property(
            sv,
            range - x.clock_error,
            x.t,
            &x.position,
            &x.velocity,
        );
        if prop.weight <= 0.0 {
            debug!("{} - {} excluded by the ranging solver", x.t, sv);
            return 0;
        }
        let model = self.filter.model();
        let base = &self.filter.state().base;

        // Range row
        let row = rows.used();
        let h_uh = linearize::position_jacobian(base);
        for j in 0..4 {
            for i in 0..3 {
                rows.h[(row, linearize::POSITION + j)] -= prop.los_neg[i] * h_uh[(i, j)];
            }
        }
        rows.h[(row, model.clock_error_column(x.clock_index))] = -1.0;
        let weight = prop.weight.max(self.config.minimum_weight);
        let r_range = (1.0 / weight).powi(2);
        rows.z.push(prop.range_residual);
        rows.r_diag.push(r_range);

        let Some(rate) = rate else {
            return 1;
        };

        // Range rate row
        let row = rows.used();
        let c_n2e = base.c_n2e();
        for j in 0..3 {
            for i in 0..3 {
                rows.h[(row, linearize::VELOCITY + j)] -= prop.los_neg[i] * c_n2e[(i, j)];
            }
        }
        let (l, v) = (&prop.los_neg, &x.velocity);
        rows.h[(row, linearize::POSITION)] -= (l[1] * -v[2] + l[2] * v[1]) * 2.0;
        rows.h[(row, linearize::POSITION + 1)] -= (l[0] * v[2] + l[2] * -v[0]) * 2.0;
        rows.h[(row, linearize::POSITION + 2)] -= (l[0] * -v[1] + l[1] * v[0]) * 2.0;
        rows.h[(row, model.clock_error_rate_column(x.clock_index))] = -1.0;
        let clock_error_rate = self
            .filter
            .state()
            .clock_error_rate(x.clock_index)
            .unwrap_or_default();
        rows.z.push(rate - clock_error_rate + prop.rate_relative_neg);
        rows.r_diag.push(r_range * self.config.rate_variance_scale);
        2
    }
    /// Innovation bundle of one epoch of raw observations
    ///
    /// # Arguments
    /// * `gps` - the raw observations
    /// * `clock_error_shift` - hypothesized addition to the clock error, m; zero outside of
    ///   clock jump repair
    ///
    /// # Returns
    /// An empty bundle when the clock channel is out of range, no solver is attached or no
    /// satellite contributes a row.
    pub fn correct_info(&self, gps: &GNSSRawData, clock_error_shift: f64) -> CorrectInfo {
        let p_size = self.filter.model().p_size();
        if gps.clock_index >= K {
            debug!(
                "{} - clock channel {} out of range ({} channels)",
                gps.epoch, gps.clock_index, K
            );
            return CorrectInfo::no_info(p_size);
        }
        let Some(solver) = gps.solver else {
            debug!("{} - no ranging solver attached", gps.epoch);
            return CorrectInfo::no_info(p_size);
        };
        let x = match self.receiver_state(gps.epoch, gps.clock_index, clock_error_shift) {
            Ok(x) => x,
            Err(e) => {
                debug!("{} - {}", gps.epoch, e);
                return CorrectInfo::no_info(p_size);
            }
        };
        let mut rows = InnovationRows::with_capacity(gps.measurement.len() * 2, p_size);
        for (sv, items) in &gps.measurement {
            let Some(range) = items.get(&MeasurementItem::L1Pseudorange) else {
                continue;
            };
            self.assign_rows(solver, *sv, &x, *range, gps.range_rate(sv), &mut rows);
        }
        rows.into_correct_info()
    }
    /// Mean residual, in milliseconds of light travel, over the range rows of `clock_index`
    ///
    /// Range rows carry -1 in the clock error column; rate rows carry it in the rate column.
    /// Returns 0 when the bundle has no range row for the channel.
    pub fn range_residual_mean_ms(&self, clock_index: usize, info: &CorrectInfo) -> f64 {
        let column = self.filter.model().clock_error_column(clock_index);
        if column >= info.h.ncols() {
            return 0.0;
        }
        let (sum, count) = (0..info.rows())
            .filter(|&i| info.h[(i, column)] <= -0.5)
            .fold((0.0, 0usize), |(sum, count), i| (sum + info.z[i], count + 1));
        if count == 0 {
            return 0.0;
        }
        sum / count as f64 / SPEED_OF_LIGHT_M_S / 1E-3
    }
    /// Measurement update with one epoch of raw observations, repairing clock jumps
    ///
    /// # Errors
    /// Only when the Kalman update itself fails, see
    /// [`ErrorStateKalmanFilter::correct_primitive`].
    pub fn correct(&mut self, gps: &GNSSRawData) -> Result<CorrectionOutcome, Error> {
        let mut info = self.correct_info(gps, 0.0);
        if info.is_empty() {
            return Ok(CorrectionOutcome::NoObservation);
        }
        let mut outcome = CorrectionOutcome::Nominal;
        let threshold = self.config.clock_jump_threshold_ms;
        let delta_ms = self.range_residual_mean_ms(gps.clock_index, &info);
        if delta_ms.abs() >= threshold {
            let shift = MILLISECOND_M * (delta_ms + 0.5).floor();
            let shifted = self.correct_info(gps, shift);
            let delta_ms_fixed = self.range_residual_mean_ms(gps.clock_index, &shifted);
            if shifted.is_empty() || delta_ms_fixed.abs() >= threshold {
                warn!(
                    "{} - receiver clock jump {:.3} ms detected, but skipped ({:.3} ms after shift)",
                    gps.epoch, delta_ms, delta_ms_fixed
                );
                return Ok(CorrectionOutcome::JumpUnresolved { delta_ms });
            }
            info!(
                "{} - receiver clock jump {:.3} ms detected, fixed by {:.0} ms",
                gps.epoch,
                delta_ms,
                shift / MILLISECOND_M
            );
            *self.filter.state_mut().clock_error_mut(gps.clock_index)? += shift;
            info = shifted;
            outcome = CorrectionOutcome::JumpFixed { delta_ms, shift };
        }
        self.filter.correct_primitive(&info)?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockModelConfig;
    use crate::solver::RelativeProperty;
    use assert_approx_eq::assert_approx_eq;
    use gnss_rs::prelude::Constellation;

    /// Solver reporting a fixed geometry, with the residual relative to a constant range
    struct FixedGeometry {
        expected_range: f64,
        weight: f64,
    }
    impl RangingSolver for FixedGeometry {
        fn relative_property(
            &self,
            _sv: SV,
            range: f64,
            _t: Epoch,
            _position: &ReceiverPosition,
            _velocity: &Vector3<f64>,
        ) -> RelativeProperty {
            RelativeProperty {
                weight: self.weight,
                range_residual: range - self.expected_range,
                rate_relative_neg: 0.0,
                los_neg: Vector3::new(0.0, 0.0, -1.0),
            }
        }
    }

    fn ins<const K: usize>() -> TightlyCoupledINS<K> {
        let base = InertialState::new(0.6, 0.2, 50.0, Vector3::zeros(), 0.0, 0.0, 0.0);
        let model = TightlyModel::<K>::new(INSErrorModel, &ClockModelConfig::default());
        let p = DMatrix::identity(model.p_size(), model.p_size());
        let q = DMatrix::identity(model.q_size(), model.q_size()) * 1e-6;
        let filter = ErrorStateKalmanFilter::new(model, TightlyState::<K>::new(base), p, q).unwrap();
        TightlyCoupledINS::new(filter, TightlyCoupledConfig::default())
    }

    #[test]
    fn receiver_state_shifts_reception_time() {
        let mut tc = ins::<1>();
        *tc.filter_mut().state_mut().clock_error_mut(0).unwrap() = SPEED_OF_LIGHT_M_S * 1e-3;
        let t = Epoch::from_gpst_seconds(1000.0);
        let x = tc.receiver_state(t, 0, SPEED_OF_LIGHT_M_S * 1e-3).unwrap();
        assert_approx_eq!((t - x.t).to_seconds(), 2e-3, 1e-12);
        assert_approx_eq!(x.clock_error, 2.0 * SPEED_OF_LIGHT_M_S * 1e-3, 1e-6);
        assert!(tc.receiver_state(t, 1, 0.0).is_err());
    }
    #[test]
    fn weight_is_floored() {
        let tc = ins::<1>();
        let solver = FixedGeometry {
            expected_range: 2.0e7,
            weight: 0.01,
        };
        let mut gps = GNSSRawData::new(0, Epoch::from_gpst_seconds(1000.0)).with_solver(&solver);
        gps.insert(SV::new(Constellation::GPS, 3), MeasurementItem::L1Pseudorange, 2.0e7);
        gps.insert(SV::new(Constellation::GPS, 3), MeasurementItem::L1RangeRate, 0.0);
        let info = tc.correct_info(&gps, 0.0);
        assert_eq!(info.rows(), 2);
        assert_approx_eq!(info.r[(0, 0)], 100.0, 1e-9);
        assert_approx_eq!(info.r[(1, 1)], 0.1, 1e-12);
        assert_eq!(info.r[(0, 1)], 0.0);
    }
    #[test]
    fn mean_residual_ignores_rate_rows() {
        let tc = ins::<1>();
        let mut h = DMatrix::zeros(3, 12);
        h[(0, 10)] = -1.0;
        h[(1, 11)] = -1.0;
        h[(2, 10)] = -1.0;
        let z = DVector::from_vec(vec![MILLISECOND_M, 1.0e9, 3.0 * MILLISECOND_M]);
        let info = CorrectInfo::new(h, z, DMatrix::identity(3, 3)).unwrap();
        assert_approx_eq!(tc.range_residual_mean_ms(0, &info), 2.0, 1e-9);
        assert_eq!(tc.range_residual_mean_ms(0, &CorrectInfo::no_info(12)), 0.0);
        assert_eq!(tc.range_residual_mean_ms(3, &info), 0.0);
    }
    #[test]
    fn outcome_reports_update() {
        assert!(CorrectionOutcome::Nominal.updated());
        assert!(CorrectionOutcome::JumpFixed { delta_ms: 1.0, shift: MILLISECOND_M }.updated());
        assert!(!CorrectionOutcome::NoObservation.updated());
        assert!(!CorrectionOutcome::JumpUnresolved { delta_ms: 1.5 }.updated());
        assert_eq!(CorrectionOutcome::NoObservation.to_string(), "no_observation");
    }
}
