//! Earth-related constants and functions
//!
//! This module contains the WGS84 ellipsoid constants and the handful of geophysical
//! quantities the quaternion mechanization and its linearization need: the principal radii
//! of curvature, Somigliana normal gravity, the Earth rotation rate and the transport rate
//! expressed in the local-level frame, and the rotation between the local-level frame and
//! the Earth-centered Earth-fixed (ECEF) frame.
//!
//! # Coordinate Systems
//! The local-level (navigation) frame is North-East-Down (NED). All angles in this module
//! are in radians; heights are in meters above the WGS84 ellipsoid. For geodetic to
//! Cartesian conversion the [`nav-types`](https://crates.io/crates/nav-types) crate is used.
//! The navigation state itself carries its position as the rotation between the ECEF frame
//! and the navigation frame (see [`crate::ins`]), so the functions here are mostly used to
//! evaluate the local geophysical quantities at the current estimate.
use ::nalgebra::{Matrix3, Vector3};
use ::nav_types::{ECEF, WGS84};

// Earth constants (WGS84)
/// Earth's rotation rate rad/s ($\omega_{ie}$)
pub const RATE: f64 = 7.2921159e-5;
/// Earth's rotation rate rad/s ($\omega_{ie}$) in a vector form
pub const RATE_VECTOR: Vector3<f64> = Vector3::new(0.0, 0.0, RATE);
/// Earth's equitorial radius in meters
pub const EQUATORIAL_RADIUS: f64 = 6378137.0; // meters
/// Earth's polar radius in meters
pub const POLAR_RADIUS: f64 = 6356752.31425; // meters
/// Earth's eccentricity ($e$)
pub const ECCENTRICITY: f64 = 0.0818191908425; // unit-less
/// Earth's eccentricity squared ($e^2$)
pub const ECCENTRICITY_SQUARED: f64 = ECCENTRICITY * ECCENTRICITY;
/// Earth's gravitational acceleration at the equator ($g_e$) in $m/s^2$
pub const GE: f64 = 9.7803253359; // m/s^2, equatorial radius
/// Earth's gravitational acceleration at the poles ($g_p$) in $m/s^2$
pub const GP: f64 = 9.8321849378; // $m/s^2$, polar radius
/// Somigliana's constant ($K$)
pub const K: f64 = (POLAR_RADIUS * GP - EQUATORIAL_RADIUS * GE) / (EQUATORIAL_RADIUS * GE);

/// Convert a three-element vector to a skew-symmetric matrix
///
/// $$
/// x = \begin{bmatrix} a \\\\ b \\\\ c \end{bmatrix} \rightarrow X = \begin{bmatrix} 0 & -c & b \\\\ c & 0 & -a \\\\ -b & a & 0 \end{bmatrix}
/// $$
///
/// # Example
/// ```rust
/// use nalgebra::{Vector3, Matrix3};
/// use tightly::earth;
/// let v: Vector3<f64> = Vector3::new(1.0, 2.0, 3.0);
/// let skew: Matrix3<f64> = earth::vector_to_skew_symmetric(&v);
/// assert_eq!(skew * Vector3::x(), v.cross(&Vector3::x()));
/// ```
pub fn vector_to_skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    let mut skew: Matrix3<f64> = Matrix3::zeros();
    skew[(0, 1)] = -v[2];
    skew[(0, 2)] = v[1];
    skew[(1, 0)] = v[2];
    skew[(1, 2)] = -v[0];
    skew[(2, 0)] = -v[1];
    skew[(2, 1)] = v[0];
    skew
}
/// Calculate the principal radii of curvature of the WGS84 ellipsoid
///
/// # Parameters
/// - `latitude` - The WGS84 latitude in radians
///
/// # Returns
/// A tuple `(r_m, r_t)` in meters where `r_m` is the radius of curvature in the meridian
/// ($R_N$ in Groves) and `r_t` is the transverse radius of curvature in the prime vertical
/// ($R_E$ in Groves, often written _N_).
///
/// # Example
/// ```rust
/// use tightly::earth;
/// let (r_m, r_t) = earth::principal_radii(&45.0_f64.to_radians());
/// assert!(r_m < r_t);
/// ```
pub fn principal_radii(latitude: &f64) -> (f64, f64) {
    let sin_lat: f64 = latitude.sin();
    let denominator: f64 = 1.0 - ECCENTRICITY_SQUARED * sin_lat * sin_lat;
    let r_m: f64 = EQUATORIAL_RADIUS * (1.0 - ECCENTRICITY_SQUARED) / denominator.powf(1.5);
    let r_t: f64 = EQUATORIAL_RADIUS / denominator.sqrt();
    (r_m, r_t)
}
/// Calculate the WGS84 gravity scalar
///
/// Normal gravity from the [Somigliana
/// equation](https://en.wikipedia.org/wiki/Theoretical_gravity#Somigliana_equation) with a
/// free-air correction. The value is positive; in the NED frame it acts along +Down.
///
/// # Parameters
/// - `latitude` - The WGS84 latitude in radians
/// - `altitude` - The WGS84 altitude in meters
///
/// # Returns
/// The gravitational force scalar in m/s^2
pub fn gravity(latitude: &f64, altitude: &f64) -> f64 {
    let sin_lat: f64 = latitude.sin();
    let g0: f64 = (GE * (1.0 + K * sin_lat * sin_lat))
        / (1.0 - ECCENTRICITY_SQUARED * sin_lat * sin_lat).sqrt();
    g0 - 3.08e-6 * altitude
}
/// Earth rotation rate expressed in the NED frame, $\omega_{ie}^n$
///
/// # Parameters
/// - `latitude` - The WGS84 latitude in radians
pub fn earth_rate_ned(latitude: &f64) -> Vector3<f64> {
    Vector3::new(RATE * latitude.cos(), 0.0, -RATE * latitude.sin())
}
/// Transport rate of the NED frame with respect to ECEF, $\omega_{en}^n$
///
/// # Parameters
/// - `latitude` - The WGS84 latitude in radians
/// - `altitude` - The WGS84 altitude in meters
/// - `velocity` - Earth-relative velocity (north, east, down) in m/s
///
/// # Returns
/// The transport rate vector in rad/s in the NED frame
pub fn transport_rate_ned(latitude: &f64, altitude: &f64, velocity: &Vector3<f64>) -> Vector3<f64> {
    transport_rate_jacobian(latitude, altitude) * velocity
}
/// Partial derivative of the transport rate with respect to the NED velocity
///
/// The transport rate is linear in velocity, so this matrix also maps velocity to
/// $\omega_{en}^n$ directly.
///
/// $$
/// \frac{\partial \omega_{en}^n}{\partial v^n} = \begin{bmatrix} 0 & \frac{1}{R_E + h} & 0 \\\\ -\frac{1}{R_N + h} & 0 & 0 \\\\ 0 & -\frac{\tan\phi}{R_E + h} & 0 \end{bmatrix}
/// $$
pub fn transport_rate_jacobian(latitude: &f64, altitude: &f64) -> Matrix3<f64> {
    let (r_m, r_t) = principal_radii(latitude);
    let mut w: Matrix3<f64> = Matrix3::zeros();
    w[(0, 1)] = 1.0 / (r_t + altitude);
    w[(1, 0)] = -1.0 / (r_m + altitude);
    w[(2, 1)] = -latitude.tan() / (r_t + altitude);
    w
}
/// Rotation from the NED frame to the ECEF frame, $C_n^e$
///
/// # Parameters
/// - `latitude` - The WGS84 latitude in radians
/// - `longitude` - The WGS84 longitude in radians
pub fn ned_to_ecef(latitude: &f64, longitude: &f64) -> Matrix3<f64> {
    let (sin_lat, cos_lat) = latitude.sin_cos();
    let (sin_lon, cos_lon) = longitude.sin_cos();
    Matrix3::new(
        -sin_lat * cos_lon,
        -sin_lon,
        -cos_lat * cos_lon,
        -sin_lat * sin_lon,
        cos_lon,
        -cos_lat * sin_lon,
        cos_lat,
        0.0,
        -sin_lat,
    )
}
/// Convert a WGS84 geodetic position to ECEF coordinates
///
/// # Parameters
/// - `latitude` - The WGS84 latitude in radians
/// - `longitude` - The WGS84 longitude in radians
/// - `altitude` - The WGS84 altitude in meters
///
/// # Example
/// ```rust
/// use tightly::earth;
/// let xyz = earth::geodetic_to_ecef(&0.0, &0.0, &0.0);
/// assert!((xyz[0] - earth::EQUATORIAL_RADIUS).abs() < 1e-3);
/// ```
pub fn geodetic_to_ecef(latitude: &f64, longitude: &f64, altitude: &f64) -> Vector3<f64> {
    let wgs84: WGS84<f64> =
        WGS84::from_degrees_and_meters(latitude.to_degrees(), longitude.to_degrees(), *altitude);
    let ecef: ECEF<f64> = ECEF::from(wgs84);
    Vector3::new(ecef.x(), ecef.y(), ecef.z())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn skew_symmetric_matches_cross_product() {
        let a = Vector3::new(0.3, -1.2, 2.0);
        let b = Vector3::new(-4.0, 0.5, 1.5);
        let skew = vector_to_skew_symmetric(&a);
        let expected = a.cross(&b);
        let actual = skew * b;
        for i in 0..3 {
            assert_approx_eq!(actual[i], expected[i], 1e-12);
        }
    }
    #[test]
    fn radii_at_equator_and_pole() {
        let (r_m, r_t) = principal_radii(&0.0);
        assert_approx_eq!(r_t, EQUATORIAL_RADIUS, 1e-6);
        assert_approx_eq!(r_m, EQUATORIAL_RADIUS * (1.0 - ECCENTRICITY_SQUARED), 1e-6);
        let (r_m, r_t) = principal_radii(&std::f64::consts::FRAC_PI_2);
        assert_approx_eq!(r_m, r_t, 1e-6);
    }
    #[test]
    fn gravity_increases_towards_pole() {
        assert_approx_eq!(gravity(&0.0, &0.0), GE, 1e-9);
        assert!(gravity(&1.2, &0.0) > gravity(&0.2, &0.0));
        assert!(gravity(&0.7, &1000.0) < gravity(&0.7, &0.0));
    }
    #[test]
    fn earth_rate_has_no_east_component() {
        let omega = earth_rate_ned(&0.6);
        assert_approx_eq!(omega.norm(), RATE, 1e-15);
        assert_eq!(omega[1], 0.0);
        assert!(omega[2] < 0.0);
    }
    #[test]
    fn transport_rate_for_northward_motion() {
        let latitude = 0.5;
        let velocity = Vector3::new(10.0, 0.0, 0.0);
        let omega = transport_rate_ned(&latitude, &100.0, &velocity);
        let (r_m, _) = principal_radii(&latitude);
        assert_approx_eq!(omega[1], -10.0 / (r_m + 100.0), 1e-15);
        assert_eq!(omega[0], 0.0);
        assert_eq!(omega[2], 0.0);
    }
    #[test]
    fn ned_to_ecef_is_orthonormal_and_down_points_inward() {
        let (latitude, longitude) = (0.61, -1.4);
        let c = ned_to_ecef(&latitude, &longitude);
        let identity = c * c.transpose();
        for i in 0..3 {
            for j in 0..3 {
                assert_approx_eq!(identity[(i, j)], if i == j { 1.0 } else { 0.0 }, 1e-12);
            }
        }
        let xyz = geodetic_to_ecef(&latitude, &longitude, &0.0);
        let down = c.column(2).into_owned();
        assert!(down.dot(&xyz) < 0.0);
    }
    #[test]
    fn geodetic_to_ecef_matches_closed_form() {
        let (latitude, longitude, height) = (0.7, 0.3, 250.0);
        let (_, r_t) = principal_radii(&latitude);
        let xyz = geodetic_to_ecef(&latitude, &longitude, &height);
        assert_approx_eq!(xyz[0], (r_t + height) * latitude.cos() * longitude.cos(), 1e-4);
        assert_approx_eq!(xyz[1], (r_t + height) * latitude.cos() * longitude.sin(), 1e-4);
        assert_approx_eq!(
            xyz[2],
            (r_t * (1.0 - ECCENTRICITY_SQUARED) + height) * latitude.sin(),
            1e-4
        );
    }
}
