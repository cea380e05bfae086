//! Common types, traits, and error definitions for turtle_slam
//!
//! This module provides the foundational building blocks used by the
//! kinematics, landmark detection and SLAM modules.

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
