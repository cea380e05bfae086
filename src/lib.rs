//! turtle_slam - landmark SLAM for a differential drive robot
//!
//! Wheel odometry, circle landmark fitting from range points and an EKF
//! that jointly estimates the robot pose and a fixed-capacity landmark map.

// Core modules
pub mod common;
pub mod geometry;

// Algorithm modules
pub mod detection;
pub mod kinematics;
pub mod slam;

// Re-export common types for convenience
pub use common::{Circle, Measurement, Point2D, RobotState, Twist2D, Vector2D};
pub use common::{LandmarkFitter, StateEstimator, WheelOdometry};
pub use common::{RoboticsError, RoboticsResult};
