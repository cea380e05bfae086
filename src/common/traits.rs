//! Common traits defining the seams between the estimation components

use nalgebra::DMatrix;

use crate::common::error::RoboticsResult;
use crate::common::types::*;

/// Dead reckoning from absolute wheel angles
pub trait WheelOdometry {
    /// Consume new absolute wheel angles [rad]; return the body twist for the interval
    fn update(&mut self, phi_left: f64, phi_right: f64) -> Twist2D;

    /// Current integrated pose
    fn pose(&self) -> RobotState;
}

/// Turns a pre-clustered set of range points into a landmark estimate
pub trait LandmarkFitter {
    fn fit(&self, points: &[Point2D]) -> RoboticsResult<Circle>;
}

/// Trait for state estimation algorithms (EKF, UKF, Particle Filter, etc.)
pub trait StateEstimator {
    /// State type used by this estimator
    type State;
    /// Measurement type used by this estimator
    type Measurement: ?Sized;
    /// Control input type
    type Control;

    /// Prediction step
    fn predict(&mut self, control: &Self::Control) -> RoboticsResult<()>;

    /// Update step with measurement
    fn update(&mut self, measurement: &Self::Measurement) -> RoboticsResult<()>;

    /// Get current state estimate
    fn get_state(&self) -> Self::State;

    /// Get current covariance estimate (if applicable)
    fn get_covariance(&self) -> Option<&DMatrix<f64>> {
        None
    }
}
