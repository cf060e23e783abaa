//! Error-state Kalman filtering
//!
//! The filter keeps a full nonlinear navigation state and a covariance over the *error* of that
//! state. An [`ErrorStateModel`] supplies, for the current state and IMU sample, the
//! continuous-time error dynamics $A$ and noise input $B$, and knows how to fold an estimated
//! error back into the state. [`INSErrorModel`] is the model for the plain [`InertialState`];
//! [`crate::clock::ClockErrorModel`] wraps any model with receiver clock states.
//!
//! # Predict Step
//!
//! $$
//! \Phi = I + A \Delta t, \quad \Gamma = B \Delta t, \quad P^- = \Phi P \Phi^T + \Gamma Q \Gamma^T
//! $$
//!
//! followed by propagation of the nonlinear state.
//!
//! # Update Step
//!
//! Given an innovation bundle $(H, z, R)$ ([`CorrectInfo`]):
//!
//! $$
//! S = H P H^T + R, \quad K = P H^T S^{-1}, \quad \hat{\delta x} = K z
//! $$
//!
//! $$
//! P^+ = (I - K H) P (I - K H)^T + K R K^T
//! $$
//!
//! after which the model removes $\hat{\delta x}$ from the state.
use std::fmt::{self, Debug, Display};

use nalgebra::{DMatrix, DVector};

use crate::ins::InertialState;
use crate::linalg::{robust_spd_solve, symmetrize};
use crate::linearize;
use crate::{Error, IMUData, StateVector};

/// Linearized error-state model of a navigation state.
pub trait ErrorStateModel {
    /// The navigation state this model linearizes.
    type State: StateVector;
    /// Dimension of the error state (rows and columns of $P$ and $A$).
    fn p_size(&self) -> usize;
    /// Number of process noise inputs (columns of $B$, size of $Q$).
    fn q_size(&self) -> usize;
    /// Continuous-time dynamics $A$ (`p_size` × `p_size`) and noise input $B$
    /// (`p_size` × `q_size`) at the given state.
    fn get_ab(&self, state: &Self::State, imu: &IMUData) -> (DMatrix<f64>, DMatrix<f64>);
    /// Remove an estimated error (estimate minus truth, length `p_size`) from the state.
    fn correct_state(&self, state: &mut Self::State, delta_x: &DVector<f64>);
}

/// Error-state model of the quaternion inertial state, see [`crate::linearize`].
#[derive(Clone, Copy, Debug, Default)]
pub struct INSErrorModel;

impl ErrorStateModel for INSErrorModel {
    type State = InertialState;
    fn p_size(&self) -> usize {
        linearize::P_SIZE
    }
    fn q_size(&self) -> usize {
        linearize::Q_SIZE
    }
    fn get_ab(&self, state: &InertialState, imu: &IMUData) -> (DMatrix<f64>, DMatrix<f64>) {
        (
            linearize::error_dynamics(state, imu),
            linearize::noise_input(state),
        )
    }
    fn correct_state(&self, state: &mut InertialState, delta_x: &DVector<f64>) {
        linearize::apply_error_correction(state, delta_x);
    }
}

/// Innovation bundle handed to the measurement update
///
/// `h` has one row per observation and one column per error state; `z` is the residual
/// (measured minus predicted) and `r` the measurement noise covariance. A bundle with zero rows
/// means there is nothing to correct.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrectInfo {
    pub h: DMatrix<f64>,
    pub z: DVector<f64>,
    pub r: DMatrix<f64>,
}
impl CorrectInfo {
    /// Build a bundle, checking that the row counts of `h`, `z` and `r` agree
    pub fn new(h: DMatrix<f64>, z: DVector<f64>, r: DMatrix<f64>) -> Result<CorrectInfo, Error> {
        if z.len() != h.nrows() {
            return Err(Error::DimensionMismatch {
                what: "innovation length",
                expected: h.nrows(),
                actual: z.len(),
            });
        }
        if r.nrows() != h.nrows() || r.ncols() != h.nrows() {
            return Err(Error::DimensionMismatch {
                what: "measurement covariance",
                expected: h.nrows(),
                actual: r.nrows().max(r.ncols()),
            });
        }
        Ok(CorrectInfo { h, z, r })
    }
    /// An empty bundle for an error state of `p_size` columns
    pub fn no_info(p_size: usize) -> CorrectInfo {
        CorrectInfo {
            h: DMatrix::zeros(0, p_size),
            z: DVector::zeros(0),
            r: DMatrix::zeros(0, 0),
        }
    }
    pub fn rows(&self) -> usize {
        self.z.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }
}

/// Error-state Kalman filter over a navigation state
pub struct ErrorStateKalmanFilter<M: ErrorStateModel> {
    model: M,
    state: M::State,
    /// Error-state covariance $P$
    covariance: DMatrix<f64>,
    /// Process noise power spectral density $Q$
    process_noise: DMatrix<f64>,
}
impl<M> Debug for ErrorStateKalmanFilter<M>
where
    M: ErrorStateModel,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorStateKalmanFilter")
            .field("p_size", &self.model.p_size())
            .field("q_size", &self.model.q_size())
            .field("covariance", &self.covariance)
            .field("process_noise", &self.process_noise)
            .finish()
    }
}
impl<M> Display for ErrorStateKalmanFilter<M>
where
    M: ErrorStateModel,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sigma: Vec<String> = self
            .covariance
            .diagonal()
            .iter()
            .map(|p| format!("{:.3e}", p.max(0.0).sqrt()))
            .collect();
        write!(f, "ErrorStateKalmanFilter {{ sigma: [{}] }}", sigma.join(", "))
    }
}
impl<M: ErrorStateModel> ErrorStateKalmanFilter<M> {
    /// Create a new filter
    ///
    /// # Arguments
    /// * `model` - the error-state model
    /// * `state` - the initial navigation state
    /// * `covariance` - initial error covariance, `p_size` × `p_size`
    /// * `process_noise` - process noise, `q_size` × `q_size`
    ///
    /// # Errors
    /// [`Error::DimensionMismatch`] when a matrix does not match the model dimensions.
    pub fn new(
        model: M,
        state: M::State,
        covariance: DMatrix<f64>,
        process_noise: DMatrix<f64>,
    ) -> Result<ErrorStateKalmanFilter<M>, Error> {
        let p_size = model.p_size();
        let q_size = model.q_size();
        if covariance.nrows() != p_size || covariance.ncols() != p_size {
            return Err(Error::DimensionMismatch {
                what: "error covariance",
                expected: p_size,
                actual: covariance.nrows().max(covariance.ncols()),
            });
        }
        if process_noise.nrows() != q_size || process_noise.ncols() != q_size {
            return Err(Error::DimensionMismatch {
                what: "process noise",
                expected: q_size,
                actual: process_noise.nrows().max(process_noise.ncols()),
            });
        }
        Ok(ErrorStateKalmanFilter {
            model,
            state,
            covariance,
            process_noise,
        })
    }
    pub fn model(&self) -> &M {
        &self.model
    }
    pub fn state(&self) -> &M::State {
        &self.state
    }
    pub fn state_mut(&mut self) -> &mut M::State {
        &mut self.state
    }
    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }
    pub fn process_noise(&self) -> &DMatrix<f64> {
        &self.process_noise
    }
    /// Time update: propagate the covariance and then the state by one IMU sample
    pub fn predict(&mut self, imu: &IMUData, dt: f64) {
        let (a, b) = self.model.get_ab(&self.state, imu);
        let p_size = self.model.p_size();
        let phi = DMatrix::<f64>::identity(p_size, p_size) + a * dt;
        let gamma = b * dt;
        let propagated = &phi * &self.covariance * phi.transpose()
            + &gamma * &self.process_noise * gamma.transpose();
        self.covariance = symmetrize(&propagated);
        self.state.propagate(imu, dt);
    }
    /// Measurement update with a prepared innovation bundle
    ///
    /// An empty bundle leaves the filter untouched.
    ///
    /// # Returns
    /// The estimated error that was removed from the state.
    ///
    /// # Errors
    /// [`Error::DimensionMismatch`] when the bundle does not have `p_size` columns and
    /// [`Error::SingularInnovation`] when $S$ cannot be inverted.
    pub fn correct_primitive(&mut self, info: &CorrectInfo) -> Result<DVector<f64>, Error> {
        let p_size = self.model.p_size();
        if info.h.ncols() != p_size {
            return Err(Error::DimensionMismatch {
                what: "observation matrix columns",
                expected: p_size,
                actual: info.h.ncols(),
            });
        }
        if info.is_empty() {
            return Ok(DVector::zeros(p_size));
        }
        let h = &info.h;
        let ph_t = &self.covariance * h.transpose();
        let s = h * &ph_t + &info.r;
        // K = P Hᵀ S⁻¹ = (S⁻¹ H P)ᵀ since P and S are symmetric
        let k = robust_spd_solve(&s, &ph_t.transpose())?.transpose();
        let delta_x = &k * &info.z;
        let i_kh = DMatrix::<f64>::identity(p_size, p_size) - &k * h;
        let joseph = &i_kh * &self.covariance * i_kh.transpose() + &k * &info.r * k.transpose();
        self.covariance = symmetrize(&joseph);
        self.model.correct_state(&mut self.state, &delta_x);
        Ok(delta_x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ins::stationary_imu;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::Vector3;

    fn filter() -> ErrorStateKalmanFilter<INSErrorModel> {
        let state = InertialState::new(0.6, -1.2, 100.0, Vector3::zeros(), 0.0, 0.0, 0.0);
        ErrorStateKalmanFilter::new(
            INSErrorModel,
            state,
            DMatrix::identity(linearize::P_SIZE, linearize::P_SIZE),
            DMatrix::identity(linearize::Q_SIZE, linearize::Q_SIZE) * 1e-4,
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_wrong_dimensions() {
        let result = ErrorStateKalmanFilter::new(
            INSErrorModel,
            InertialState::default(),
            DMatrix::identity(9, 9),
            DMatrix::identity(linearize::Q_SIZE, linearize::Q_SIZE),
        );
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch { expected: 10, actual: 9, .. })
        ));
        let result = ErrorStateKalmanFilter::new(
            INSErrorModel,
            InertialState::default(),
            DMatrix::identity(linearize::P_SIZE, linearize::P_SIZE),
            DMatrix::identity(3, 3),
        );
        assert!(result.is_err());
    }
    #[test]
    fn test_correct_info_shapes() {
        let info = CorrectInfo::no_info(12);
        assert!(info.is_empty());
        assert_eq!(info.h.ncols(), 12);
        let bad = CorrectInfo::new(DMatrix::zeros(2, 12), DVector::zeros(3), DMatrix::zeros(2, 2));
        assert!(bad.is_err());
        let good = CorrectInfo::new(DMatrix::zeros(2, 12), DVector::zeros(2), DMatrix::identity(2, 2));
        assert_eq!(good.unwrap().rows(), 2);
    }
    #[test]
    fn test_predict_grows_covariance() {
        let mut ekf = filter();
        let imu = stationary_imu(ekf.state());
        let before = ekf.covariance().trace();
        ekf.predict(&imu, 0.1);
        assert!(ekf.covariance().trace() > before);
        let p = ekf.covariance();
        assert_approx_eq!(p[(0, 6)], p[(6, 0)], 1e-15);
    }
    #[test]
    fn test_empty_update_is_noop() {
        let mut ekf = filter();
        let before = ekf.covariance().clone();
        let state = *ekf.state();
        let delta = ekf.correct_primitive(&CorrectInfo::no_info(linearize::P_SIZE)).unwrap();
        assert_eq!(delta.len(), linearize::P_SIZE);
        assert_eq!(ekf.covariance(), &before);
        assert_eq!(ekf.state(), &state);
    }
    #[test]
    fn test_update_rejects_wrong_columns() {
        let mut ekf = filter();
        let info = CorrectInfo::no_info(12);
        assert!(ekf.correct_primitive(&info).is_err());
    }
    #[test]
    fn test_height_update() {
        // Observe the height error directly: z = estimate - measured
        let mut ekf = filter();
        let mut h = DMatrix::zeros(1, linearize::P_SIZE);
        h[(0, linearize::HEIGHT)] = 1.0;
        let info = CorrectInfo::new(h, DVector::from_vec(vec![2.0]), DMatrix::identity(1, 1)).unwrap();
        let delta = ekf.correct_primitive(&info).unwrap();
        // Equal prior and measurement variance split the difference
        assert_approx_eq!(delta[linearize::HEIGHT], 1.0, 1e-12);
        assert_approx_eq!(ekf.state().height, 99.0, 1e-9);
        assert_approx_eq!(ekf.covariance()[(linearize::HEIGHT, linearize::HEIGHT)], 0.5, 1e-12);
        assert_approx_eq!(ekf.covariance()[(0, 0)], 1.0, 1e-12);
    }
}
