//! Error-state linearization of the quaternion inertial state
//!
//! This module provides the analytic Jacobians of the [`InertialState`] mechanization used by
//! the error-state Kalman filter, the Jacobian of the ECEF position with respect to the
//! position error, and the application of an estimated error back onto the state.
//!
//! # Error State Ordering
//!
//! ```text
//! δx = [δv_n, δv_e, δv_d, u_e2n(3), δh, u_n2b(3)]
//! ```
//! where:
//! - `δv`: velocity error in the NED frame, m/s
//! - `u_e2n`: vector part of the position quaternion error, $\hat{q}_{e2n} = (1, u_{e2n}) \otimes q_{e2n}$
//! - `δh`: height error, m
//! - `u_n2b`: vector part of the attitude quaternion error, $\hat{q}_{n2b} = (1, u_{n2b}) \otimes q_{n2b}$
//!
//! A quaternion error vector $u$ is half the small rotation angle. Every error is defined as
//! estimate minus truth, so corrections are subtracted.
//!
//! # Noise Input Ordering
//!
//! ```text
//! w = [accelerometer(3), gyroscope(3), gravity(1)]
//! ```
//!
//! # References
//!
//! - Groves 2nd ed., Section 14.2.4 (error-state dynamics in the local navigation frame)
//! - Sola, J. "Quaternion kinematics for the error-state Kalman filter" (2017), Section 7
use nalgebra::{DMatrix, DVector, Matrix3, Matrix3x4, Quaternion, UnitQuaternion};

use crate::IMUData;
use crate::earth::{self, vector_to_skew_symmetric};
use crate::ins::InertialState;

/// Size of the inertial error state
pub const P_SIZE: usize = 10;
/// Number of inertial noise inputs
pub const Q_SIZE: usize = 7;
/// First column of the velocity error
pub const VELOCITY: usize = 0;
/// First column of the position quaternion error
pub const POSITION: usize = 3;
/// Column of the height error
pub const HEIGHT: usize = 6;
/// First column of the attitude quaternion error
pub const ATTITUDE: usize = 7;

fn copy_block(target: &mut DMatrix<f64>, row: usize, column: usize, block: &Matrix3<f64>) {
    for i in 0..3 {
        for j in 0..3 {
            target[(row + i, column + j)] += block[(i, j)];
        }
    }
}
/// Continuous-time error-state dynamics matrix $A$ such that $\dot{\delta x} = A \delta x + B w$
///
/// With $W = \partial \omega_{en}^n / \partial v^n$ (see [`earth::transport_rate_jacobian`]):
///
/// $$
/// \dot{\delta v} = -2 [f^n \times] u_{n2b} - [(2\omega_{ie}^n + \omega_{en}^n) \times] \delta v + [v^n \times] W \delta v
/// $$
///
/// $$
/// \dot{u}_{e2n} = \tfrac{1}{2} C_n^e W \delta v, \quad
/// \dot{\delta h} = -\delta v_d, \quad
/// \dot{u}_{n2b} = -[\omega_{in}^n \times] u_{n2b} - \tfrac{1}{2} W \delta v
/// $$
///
/// The gravity gradient and the dependence of the Earth rate on position are omitted; the
/// height channel is held by the measurement updates.
///
/// # Arguments
/// * `state` - the current inertial state estimate
/// * `imu` - the IMU sample driving the propagation
///
/// # Returns
/// The 10×10 dynamics matrix
pub fn error_dynamics(state: &InertialState, imu: &IMUData) -> DMatrix<f64> {
    let mut a = DMatrix::<f64>::zeros(P_SIZE, P_SIZE);
    let latitude = state.latitude();
    let w = earth::transport_rate_jacobian(&latitude, &state.height);
    let omega_ie = earth::earth_rate_ned(&latitude);
    let omega_en = w * state.velocity;
    let f_n = state.specific_force_ned(&imu.accel);

    // Velocity error
    let a_vv = -vector_to_skew_symmetric(&(2.0 * omega_ie + omega_en))
        + vector_to_skew_symmetric(&state.velocity) * w;
    copy_block(&mut a, VELOCITY, VELOCITY, &a_vv);
    copy_block(&mut a, VELOCITY, ATTITUDE, &(-2.0 * vector_to_skew_symmetric(&f_n)));

    // Position quaternion error
    copy_block(&mut a, POSITION, VELOCITY, &(0.5 * state.c_n2e() * w));

    // Height error
    a[(HEIGHT, VELOCITY + 2)] = -1.0;

    // Attitude quaternion error
    copy_block(
        &mut a,
        ATTITUDE,
        ATTITUDE,
        &(-vector_to_skew_symmetric(&(omega_ie + omega_en))),
    );
    copy_block(&mut a, ATTITUDE, VELOCITY, &(-0.5 * w));
    a
}
/// Noise input matrix $B$ mapping accelerometer, gyroscope and gravity noise onto the error state
///
/// # Returns
/// The 10×7 input matrix
pub fn noise_input(state: &InertialState) -> DMatrix<f64> {
    let mut b = DMatrix::<f64>::zeros(P_SIZE, Q_SIZE);
    let c_bn = state.q_n2b.to_rotation_matrix().into_inner();
    copy_block(&mut b, VELOCITY, 0, &c_bn);
    copy_block(&mut b, ATTITUDE, 3, &(0.5 * c_bn));
    b[(VELOCITY + 2, 6)] = 1.0;
    b
}
/// Jacobian of the ECEF position with respect to $(u_{e2n}, \delta h)$
///
/// Differentiates
/// $r^e = \left(-(N + h) q_\gamma,\ (N + h) q_\beta,\ -(N(1 - e^2) + h) q_\alpha\right)$
/// under the perturbation $(1, u) \otimes q_{e2n}$, including the change of the transverse
/// radius $N$ with latitude.
///
/// # Returns
/// A 3×4 matrix whose columns are $\partial r^e / \partial u_1$, $\partial u_2$,
/// $\partial u_3$ and $\partial h$
pub fn position_jacobian(state: &InertialState) -> Matrix3x4<f64> {
    let (q_alpha, q_beta, q_gamma) = state.position_terms();
    let e2 = earth::ECCENTRICITY_SQUARED;
    let n = earth::EQUATORIAL_RADIUS / (1.0 - e2 * q_alpha * q_alpha).sqrt();
    let sf = n * e2 * q_alpha * -2.0 / (1.0 - e2 * q_alpha * q_alpha);
    let n_h = (n + state.height) * 2.0;
    let sf2 = sf * -(1.0 - e2);
    let n_h2 = (n * (1.0 - e2) + state.height) * 2.0;
    Matrix3x4::new(
        -q_gamma * q_beta * sf,
        -q_gamma * q_gamma * sf - n_h * q_alpha,
        -n_h * q_beta,
        -q_gamma,
        q_beta * q_beta * sf + n_h * q_alpha,
        q_beta * q_gamma * sf,
        -n_h * q_gamma,
        q_beta,
        q_alpha * q_beta * sf2 + n_h2 * q_beta,
        q_alpha * q_gamma * sf2 + n_h2 * q_gamma,
        0.0,
        -q_alpha,
    )
}
fn remove_rotation_error(q: &UnitQuaternion<f64>, u: [f64; 3]) -> UnitQuaternion<f64> {
    let delta = Quaternion::new(1.0, -u[0], -u[1], -u[2]);
    UnitQuaternion::from_quaternion(delta * q.into_inner())
}
/// Remove an estimated error from the inertial state
///
/// # Arguments
/// * `state` - the state to correct in place
/// * `delta_x` - estimated error, estimate minus truth, in the layout of this module; only the
///   first [`P_SIZE`] entries are read
pub fn apply_error_correction(state: &mut InertialState, delta_x: &DVector<f64>) {
    for i in 0..3 {
        state.velocity[i] -= delta_x[VELOCITY + i];
    }
    state.q_e2n = remove_rotation_error(
        &state.q_e2n,
        [delta_x[POSITION], delta_x[POSITION + 1], delta_x[POSITION + 2]],
    );
    state.height -= delta_x[HEIGHT];
    state.q_n2b = remove_rotation_error(
        &state.q_n2b,
        [delta_x[ATTITUDE], delta_x[ATTITUDE + 1], delta_x[ATTITUDE + 2]],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ins::stationary_imu;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::Vector3;

    fn perturbed(state: &InertialState, u: [f64; 3], dh: f64) -> InertialState {
        let mut out = *state;
        out.q_e2n =
            UnitQuaternion::from_quaternion(Quaternion::new(1.0, u[0], u[1], u[2]) * state.q_e2n.into_inner());
        out.height += dh;
        out
    }

    #[test]
    fn test_position_jacobian_matches_finite_difference() {
        let state = InertialState::new(0.71, -1.32, 350.0, Vector3::zeros(), 0.0, 0.0, 0.0);
        let h = position_jacobian(&state);
        let r0 = state.position_ecef();
        for j in 0..4 {
            let (u, dh, step) = match j {
                3 => ([0.0; 3], 1.0, 1.0),
                _ => {
                    let mut u = [0.0; 3];
                    u[j] = 1e-6;
                    (u, 0.0, 1e-6)
                }
            };
            let r1 = perturbed(&state, u, dh).position_ecef();
            let column_scale = (0..3).map(|i| h[(i, j)].abs()).fold(1.0, f64::max);
            for i in 0..3 {
                let numeric = (r1[i] - r0[i]) / step;
                assert!(
                    (numeric - h[(i, j)]).abs() < 1e-5 * column_scale,
                    "column {j} row {i}: numeric {numeric} analytic {}",
                    h[(i, j)]
                );
            }
        }
    }
    #[test]
    fn test_error_dynamics_stationary() {
        let state = InertialState::new(0.5, 0.1, 0.0, Vector3::zeros(), 0.0, 0.0, 0.0);
        let imu = stationary_imu(&state);
        let a = error_dynamics(&state, &imu);
        assert_eq!(a.nrows(), P_SIZE);
        assert_eq!(a.ncols(), P_SIZE);
        assert_eq!(a[(HEIGHT, 2)], -1.0);
        // Level platform: a tilt about north couples gravity into the east velocity error
        let g = earth::gravity(&0.5, &0.0);
        assert_approx_eq!(a[(VELOCITY + 1, ATTITUDE)], 2.0 * g, 1e-9);
        assert_approx_eq!(a[(VELOCITY, ATTITUDE + 1)], -2.0 * g, 1e-9);
        // At rest the position error is fed only through the velocity error
        for j in 0..P_SIZE {
            assert_eq!(a[(HEIGHT, j)] != 0.0, j == 2);
        }
    }
    #[test]
    fn test_error_dynamics_predicts_velocity_growth() {
        // A small attitude error should drive the velocity error as the linear model says
        let state = InertialState::new(0.5, 0.1, 0.0, Vector3::zeros(), 0.0, 0.0, 0.0);
        let imu = stationary_imu(&state);
        let a = error_dynamics(&state, &imu);
        let u = 1e-5;
        let mut tilted = state;
        tilted.q_n2b =
            UnitQuaternion::from_quaternion(Quaternion::new(1.0, u, 0.0, 0.0) * state.q_n2b.into_inner());
        let mut truth = state;
        let dt = 0.01;
        tilted.mechanize(&imu, dt);
        truth.mechanize(&imu, dt);
        let dv = (tilted.velocity - truth.velocity) / dt;
        assert_approx_eq!(dv[1], a[(VELOCITY + 1, ATTITUDE)] * u, 1e-6);
    }
    #[test]
    fn test_noise_input_layout() {
        let state = InertialState::new(0.5, 0.1, 0.0, Vector3::zeros(), 0.0, 0.0, 0.0);
        let b = noise_input(&state);
        assert_eq!(b.nrows(), P_SIZE);
        assert_eq!(b.ncols(), Q_SIZE);
        for i in 0..3 {
            assert_approx_eq!(b[(VELOCITY + i, i)], 1.0, 1e-12);
            assert_approx_eq!(b[(ATTITUDE + i, 3 + i)], 0.5, 1e-12);
        }
        assert_eq!(b[(2, 6)], 1.0);
        assert_eq!(b[(HEIGHT, 6)], 0.0);
    }
    #[test]
    fn test_apply_error_correction_removes_perturbation() {
        let truth = InertialState::new(0.3, 0.9, 100.0, Vector3::new(1.0, 2.0, 0.5), 0.1, 0.0, 0.4);
        let u = [2e-7, -1e-7, 3e-7];
        let mut estimate = perturbed(&truth, u, 4.0);
        estimate.velocity += Vector3::new(0.2, -0.1, 0.3);
        estimate.q_n2b =
            UnitQuaternion::from_quaternion(Quaternion::new(1.0, 0.001, 0.0, -0.002) * truth.q_n2b.into_inner());
        let delta = DVector::from_vec(vec![
            0.2, -0.1, 0.3, u[0], u[1], u[2], 4.0, 0.001, 0.0, -0.002,
        ]);
        apply_error_correction(&mut estimate, &delta);
        assert!((estimate.velocity - truth.velocity).norm() < 1e-12);
        assert_approx_eq!(estimate.height, truth.height, 1e-9);
        assert!((estimate.position_ecef() - truth.position_ecef()).norm() < 1e-3);
        assert!(estimate.q_n2b.angle_to(&truth.q_n2b) < 1e-5);
    }
}
