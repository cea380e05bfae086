//! Error types for turtle_slam

use thiserror::Error;

/// Main error type for the estimation core
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RoboticsError {
    /// Robot geometry or filter parameters are unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Point cluster cannot define a circle
    #[error("Degenerate fit: {0}")]
    DegenerateFit(String),
    /// Text input is not a point/vector/twist
    #[error("Parse error: {0}")]
    ParseError(String),
    /// Landmark slot outside the fixed table
    #[error("Landmark index {index} out of range for capacity {capacity}")]
    OutOfRange { index: usize, capacity: usize },
    /// Numerical computation failed (matrix inversion, etc.)
    #[error("Numerical error: {0}")]
    NumericalError(String),
    /// A diff-drive base cannot follow a twist with lateral velocity
    #[error("Nonholonomic constraint violated: lateral velocity {0}")]
    Nonholonomic(f64),
}

/// Result type alias for robotics operations
pub type RoboticsResult<T> = Result<T, RoboticsError>;
