//! Angle helpers shared by the kinematics and estimation modules

use std::f64::consts::PI;

/// Default tolerance for [`almost_equal`]
pub const DEFAULT_EPSILON: f64 = 1e-12;

/// Map `rad` onto its representative in (-pi, pi].
///
/// Values already in range are returned untouched, so `PI` stays `PI`.
/// Out-of-range values are reduced in one modulo step instead of
/// repeated subtraction, then `-PI` is folded onto `PI`.
pub fn normalize_angle(rad: f64) -> f64 {
    if !rad.is_finite() || (rad > -PI && rad <= PI) {
        return rad;
    }

    let mut a = (rad + PI).rem_euclid(2.0 * PI) - PI;
    if a <= -PI {
        a += 2.0 * PI;
    }
    a
}

/// Approximate equality with an absolute tolerance
pub fn almost_equal(d1: f64, d2: f64, epsilon: f64) -> bool {
    (d1 - d2).abs() < epsilon
}

pub fn deg2rad(deg: f64) -> f64 {
    deg * PI / 180.0
}

pub fn rad2deg(rad: f64) -> f64 {
    rad * 180.0 / PI
}
