// Geometry module: angles and rigid 2D transforms

pub mod angle;
pub mod transform;

pub use angle::{almost_equal, deg2rad, normalize_angle, rad2deg, DEFAULT_EPSILON};
pub use transform::{integrate_twist, Transform2D, TWIST_EPSILON};
