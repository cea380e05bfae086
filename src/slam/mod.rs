// SLAM algorithms module

pub mod ekf_slam;

pub use ekf_slam::{EkfSlam, EkfSlamConfig, Observation};
