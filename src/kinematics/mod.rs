// Kinematics module

pub mod diff_drive;

pub use diff_drive::{wheel_angle_from_ticks, DiffDrive, DiffDriveConfig};
