//! Quaternion based inertial navigation state
//!
//! The inertial state keeps its position as the rotation between the Earth-centered
//! Earth-fixed (ECEF) frame and the local North-East-Down navigation frame, $q_{e2n}$,
//! together with the height above the WGS84 ellipsoid. Latitude and longitude are recovered
//! from the quaternion on demand. This representation has no singularity at the poles and
//! makes the position error a small rotation, which is what the tightly-coupled observation
//! Jacobian in [`crate::linearize::position_jacobian`] differentiates against.
//!
//! For latitude $\phi$ and longitude $\lambda$:
//!
//! $$
//! q_{e2n} = R_z(\lambda) \otimes R_y(-\phi - \pi / 2)
//! $$
//!
//! whose rotation matrix is $C_n^e$. Writing $q_{e2n} = (q_0, q_1, q_2, q_3)$:
//!
//! $$
//! q_\alpha = 2(q_0^2 + q_3^2) - 1 = -\sin\phi, \quad
//! q_\beta = 2(q_0 q_1 - q_2 q_3) = \cos\phi \sin\lambda, \quad
//! q_\gamma = 2(q_0 q_2 + q_1 q_3) = -\cos\phi \cos\lambda
//! $$
//!
//! Attitude is $q_{n2b}$, whose rotation matrix is $C_b^n$.
//!
//! # Mechanization
//! A first-order local-level mechanization (Groves chapter 5.4):
//!
//! $$
//! \dot{v}^n = C_b^n f^b + g^n - (2\omega_{ie}^n + \omega_{en}^n) \times v^n
//! $$
//!
//! $$
//! q_{n2b} \leftarrow \exp(-\omega_{in}^n \Delta t) \otimes q_{n2b} \otimes \exp(\omega_{ib}^b \Delta t), \quad
//! q_{e2n} \leftarrow q_{e2n} \otimes \exp(\omega_{en}^n \Delta t), \quad
//! h \leftarrow h - v_d \Delta t
//! $$
use std::f64::consts::FRAC_PI_2;
use std::fmt::Display;

use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};

use crate::earth;
use crate::{Error, IMUData, StateVector};

/// Number of scalar values in an [`InertialState`]
pub const STATE_VALUES: usize = 12;

/// Inertial navigation state: velocity, position quaternion, height and attitude quaternion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InertialState {
    /// Earth-relative velocity in the navigation frame (north, east, down), m/s
    pub velocity: Vector3<f64>,
    /// Rotation from the ECEF frame to the navigation frame
    pub q_e2n: UnitQuaternion<f64>,
    /// Height above the WGS84 ellipsoid, m
    pub height: f64,
    /// Rotation from the navigation frame to the body frame
    pub q_n2b: UnitQuaternion<f64>,
}
impl Default for InertialState {
    fn default() -> Self {
        InertialState::new(0.0, 0.0, 0.0, Vector3::zeros(), 0.0, 0.0, 0.0)
    }
}
impl Display for InertialState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (roll, pitch, yaw) = self.q_n2b.euler_angles();
        write!(
            f,
            "InertialState {{ lat: {:.6} deg, lon: {:.6} deg, h: {:.2} m, v: [{:.3}, {:.3}, {:.3}] m/s, rpy: [{:.3}, {:.3}, {:.3}] deg }}",
            self.latitude().to_degrees(),
            self.longitude().to_degrees(),
            self.height,
            self.velocity[0],
            self.velocity[1],
            self.velocity[2],
            roll.to_degrees(),
            pitch.to_degrees(),
            yaw.to_degrees()
        )
    }
}
/// Position quaternion $q_{e2n}$ for a geodetic latitude and longitude in radians.
pub fn q_e2n_from_geodetic(latitude: f64, longitude: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::z_axis(), longitude)
        * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -latitude - FRAC_PI_2)
}
impl InertialState {
    /// Create a new inertial state
    ///
    /// # Arguments
    /// * `latitude`, `longitude` - WGS84 geodetic position in radians
    /// * `height` - height above the ellipsoid in meters
    /// * `velocity` - NED velocity in m/s
    /// * `roll`, `pitch`, `yaw` - attitude of the body with respect to NED in radians
    ///
    /// # Example
    /// ```rust
    /// use nalgebra::Vector3;
    /// use tightly::ins::InertialState;
    /// let state = InertialState::new(0.7, -1.3, 120.0, Vector3::zeros(), 0.0, 0.0, 0.5);
    /// assert!((state.latitude() - 0.7).abs() < 1e-12);
    /// ```
    pub fn new(
        latitude: f64,
        longitude: f64,
        height: f64,
        velocity: Vector3<f64>,
        roll: f64,
        pitch: f64,
        yaw: f64,
    ) -> InertialState {
        InertialState {
            velocity,
            q_e2n: q_e2n_from_geodetic(latitude, longitude),
            height,
            q_n2b: UnitQuaternion::from_euler_angles(roll, pitch, yaw),
        }
    }
    /// $(q_\alpha, q_\beta, q_\gamma)$ of the position quaternion, i.e. $-\sin\phi$,
    /// $\cos\phi\sin\lambda$ and $-\cos\phi\cos\lambda$.
    pub fn position_terms(&self) -> (f64, f64, f64) {
        let q = self.q_e2n.quaternion();
        let (q0, q1, q2, q3) = (q.w, q.i, q.j, q.k);
        let q_alpha = (q0 * q0 + q3 * q3) * 2.0 - 1.0;
        let q_beta = (q0 * q1 - q2 * q3) * 2.0;
        let q_gamma = (q0 * q2 + q1 * q3) * 2.0;
        (q_alpha, q_beta, q_gamma)
    }
    /// Geodetic latitude in radians
    pub fn latitude(&self) -> f64 {
        let (q_alpha, _, _) = self.position_terms();
        (-q_alpha).clamp(-1.0, 1.0).asin()
    }
    /// Geodetic longitude in radians
    pub fn longitude(&self) -> f64 {
        let (_, q_beta, q_gamma) = self.position_terms();
        q_beta.atan2(-q_gamma)
    }
    /// Rotation from the navigation frame to ECEF, $C_n^e$
    pub fn c_n2e(&self) -> Matrix3<f64> {
        self.q_e2n.to_rotation_matrix().into_inner()
    }
    /// Position in ECEF coordinates, m
    pub fn position_ecef(&self) -> Vector3<f64> {
        let (q_alpha, q_beta, q_gamma) = self.position_terms();
        let n = earth::EQUATORIAL_RADIUS
            / (1.0 - earth::ECCENTRICITY_SQUARED * q_alpha * q_alpha).sqrt();
        Vector3::new(
            -(n + self.height) * q_gamma,
            (n + self.height) * q_beta,
            -(n * (1.0 - earth::ECCENTRICITY_SQUARED) + self.height) * q_alpha,
        )
    }
    /// Earth-relative velocity resolved in ECEF, m/s
    pub fn velocity_ecef(&self) -> Vector3<f64> {
        self.q_e2n * self.velocity
    }
    /// Roll, pitch and yaw of the body with respect to NED in radians
    pub fn attitude(&self) -> (f64, f64, f64) {
        self.q_n2b.euler_angles()
    }
    /// Specific force resolved in the navigation frame for a body-frame measurement
    pub fn specific_force_ned(&self, accel: &Vector3<f64>) -> Vector3<f64> {
        self.q_n2b * accel
    }
    /// Advance the state by one IMU sample
    ///
    /// # Arguments
    /// * `imu` - specific force and inertial angular rate in the body frame
    /// * `dt` - time step in seconds
    pub fn mechanize(&mut self, imu: &IMUData, dt: f64) {
        let latitude = self.latitude();
        let omega_ie = earth::earth_rate_ned(&latitude);
        let omega_en = earth::transport_rate_ned(&latitude, &self.height, &self.velocity);
        let g_n = Vector3::new(0.0, 0.0, earth::gravity(&latitude, &self.height));
        // Velocity uses the attitude at the start of the interval
        let f_n = self.specific_force_ned(&imu.accel);
        let v_dot = f_n + g_n - (2.0 * omega_ie + omega_en).cross(&self.velocity);
        self.q_n2b = UnitQuaternion::from_scaled_axis(-(omega_ie + omega_en) * dt)
            * self.q_n2b
            * UnitQuaternion::from_scaled_axis(imu.gyro * dt);
        self.q_e2n *= UnitQuaternion::from_scaled_axis(omega_en * dt);
        self.height -= self.velocity[2] * dt;
        self.velocity += v_dot * dt;
    }
}
fn quaternion_component(q: &UnitQuaternion<f64>, index: usize) -> f64 {
    match index {
        0 => q.w,
        1 => q.i,
        2 => q.j,
        _ => q.k,
    }
}
fn with_quaternion_component(q: &UnitQuaternion<f64>, index: usize, value: f64) -> UnitQuaternion<f64> {
    let mut raw: Quaternion<f64> = q.into_inner();
    match index {
        0 => raw.w = value,
        1 => raw.i = value,
        2 => raw.j = value,
        _ => raw.k = value,
    }
    UnitQuaternion::from_quaternion(raw)
}
impl StateVector for InertialState {
    fn size(&self) -> usize {
        STATE_VALUES
    }
    fn get(&self, index: usize) -> Result<f64, Error> {
        match index {
            0..3 => Ok(self.velocity[index]),
            3..7 => Ok(quaternion_component(&self.q_e2n, index - 3)),
            7 => Ok(self.height),
            8..12 => Ok(quaternion_component(&self.q_n2b, index - 8)),
            _ => Err(Error::InvalidIndex {
                index,
                size: STATE_VALUES,
            }),
        }
    }
    /// Quaternion components are renormalized after the write.
    fn set(&mut self, index: usize, value: f64) -> Result<(), Error> {
        match index {
            0..3 => self.velocity[index] = value,
            3..7 => self.q_e2n = with_quaternion_component(&self.q_e2n, index - 3, value),
            7 => self.height = value,
            8..12 => self.q_n2b = with_quaternion_component(&self.q_n2b, index - 8, value),
            _ => {
                return Err(Error::InvalidIndex {
                    index,
                    size: STATE_VALUES,
                });
            }
        }
        Ok(())
    }
    fn propagate(&mut self, imu: &IMUData, dt: f64) {
        self.mechanize(imu, dt);
    }
}

/// IMU sample sensed by a level, stationary platform at the given state
///
/// The accelerometer senses the reaction to gravity and the gyroscope senses the Earth
/// rotation, both resolved in the body frame.
pub fn stationary_imu(state: &InertialState) -> IMUData {
    let latitude = state.latitude();
    let g_n = Vector3::new(0.0, 0.0, earth::gravity(&latitude, &state.height));
    let omega_ie = earth::earth_rate_ned(&latitude);
    IMUData {
        accel: state.q_n2b.inverse() * (-g_n),
        gyro: state.q_n2b.inverse() * omega_ie,
    }
}
