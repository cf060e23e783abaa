//! Physical and signal constants shared by the GNSS side of the filter.

/// Speed of light in vacuum, m/s
pub const SPEED_OF_LIGHT_M_S: f64 = 2.99792458E8;

/// GPS L1 carrier frequency, Hz
pub const L1_FREQUENCY_HZ: f64 = 1575.42E6;

/// GPS L1 carrier wavelength, m
pub const L1_WAVELENGTH_M: f64 = SPEED_OF_LIGHT_M_S / L1_FREQUENCY_HZ;

/// Range travelled by light in one millisecond, m
pub const MILLISECOND_M: f64 = SPEED_OF_LIGHT_M_S * 1E-3;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn l1_wavelength() {
        assert_approx_eq!(L1_WAVELENGTH_M, 0.190293672798, 1e-9);
    }
    #[test]
    fn one_millisecond_of_range() {
        assert_approx_eq!(MILLISECOND_M, 299792.458, 1e-6);
    }
}
