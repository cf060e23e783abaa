//! Tightly-coupled INS/GNSS measurement fusion
//!
//! This crate provides the measurement side of a tightly-coupled inertial/satellite navigation
//! filter. An inertial strapdown state is augmented with one or more receiver clock channels
//! (clock error and clock error rate, both in meters and meters per second), the error-state
//! process model is extended with first-order Gauss-Markov clock blocks, and raw GNSS
//! pseudorange and range-rate observations are linearized against the augmented state to form
//! the innovation $(z, H, R)$ consumed by the Kalman measurement update. Millisecond receiver
//! clock jumps, a common artifact of receivers that steer their clock in whole milliseconds,
//! are detected from the mean range residual and repaired before the update.
//!
//! The crate is primarily built off of:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): vectors, quaternions and dynamic matrices.
//! - [`nav-types`](https://crates.io/crates/nav-types): geodetic to ECEF conversion.
//! - [`hifitime`](https://crates.io/crates/hifitime) and [`gnss-rs`](https://crates.io/crates/gnss-rs):
//!   GPS time epochs and satellite identifiers.
//!
//! The primary reference text is _Principles of GNSS, Inertial, and Multisensor Integrated
//! Navigation Systems, 2nd Edition_ by Paul D. Groves.
//!
//! ## Crate overview
//!
//! - [earth]: WGS84 constants, radii of curvature, gravity, Earth and transport rates.
//! - [ins]: quaternion based inertial state and its strapdown mechanization.
//! - [linearize]: error-state dynamics, noise input and position Jacobian of the inertial state.
//! - [linalg]: symmetric positive definite solves for the Kalman update.
//! - [kalman]: error-state model trait and the Kalman time/measurement update.
//! - [clock]: receiver clock augmentation of a state and of an error-state model.
//! - [raw]: one epoch of raw GNSS observations.
//! - [solver]: ranging solver interface and a static constellation implementation.
//! - [tightly]: the tightly-coupled corrector and its clock-jump repair.
//! - [sim]: synthetic closed-loop scenarios and CSV output.
//!
//! ## State layout
//!
//! The base inertial state has twelve values:
//!
//! $$
//! x = [v_n, v_e, v_d, q^{e2n}_w, q^{e2n}_i, q^{e2n}_j, q^{e2n}_k, h, q^{n2b}_w, q^{n2b}_i, q^{n2b}_j, q^{n2b}_k]
//! $$
//!
//! and a clock-augmented state with $K$ channels appends
//! $[b_0, \dot{b}_0, \ldots, b_{K-1}, \dot{b}_{K-1}]$. The matching error state has ten base
//! columns (velocity, vector part of the position quaternion error, height, vector part of the
//! attitude quaternion error) followed by $2K$ clock columns.
pub mod clock;
pub mod constants;
pub mod earth;
pub mod error;
pub mod ins;
pub mod kalman;
pub mod linalg;
pub mod linearize;
pub mod raw;
pub mod sim;
pub mod solver;
pub mod tightly;

use std::fmt::Display;

use nalgebra::Vector3;

pub use error::Error;

/// Basic structure for holding raw IMU data in the form of sensed acceleration and angular rate vectors.
///
/// The vectors are in the body frame of the vehicle and perceived by the IMU (i.e. not
/// compensating for gravity). Angular rates are with respect to inertial space.
#[derive(Clone, Copy, Debug, Default)]
pub struct IMUData {
    /// Specific force in m/s^2, body frame x, y, z axis
    pub accel: Vector3<f64>,
    /// Angular rate in rad/s, body frame x, y, z axis
    pub gyro: Vector3<f64>,
}
impl Display for IMUData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "IMUData {{ accel: [{:.4}, {:.4}, {:.4}], gyro: [{:.6}, {:.6}, {:.6}] }}",
            self.accel[0], self.accel[1], self.accel[2], self.gyro[0], self.gyro[1], self.gyro[2]
        )
    }
}
/// Indexed access to a navigation state vector and its propagation by one IMU sample.
///
/// Both the plain inertial state and the clock-augmented state expose this interface, the
/// latter delegating every index below its clock block to the state it wraps.
pub trait StateVector {
    /// Number of scalar values in the state.
    fn size(&self) -> usize;
    /// Value at `index`, or [`Error::InvalidIndex`] past the end of the state.
    fn get(&self, index: usize) -> Result<f64, Error>;
    /// Overwrite the value at `index`.
    fn set(&mut self, index: usize, value: f64) -> Result<(), Error>;
    /// Propagate the state forward by `dt` seconds using one IMU sample.
    fn propagate(&mut self, imu: &IMUData, dt: f64);
}
