//! Differential drive forward/inverse kinematics
//!
//! Wheel angles come in as absolute joint positions [rad]; the increments
//! since the previous sample are mapped to a body twist and integrated with
//! the exact SE(2) exponential, so no discretization drift accumulates on
//! arcs.
//!
//! Frame convention: x forward, y left, theta counter-clockwise positive.

use log::trace;

use crate::common::{
    RobotState, RoboticsError, RoboticsResult, Twist2D, WheelOdometry, WheelState,
    WheelVelocities,
};
use crate::geometry::{integrate_twist, normalize_angle, Transform2D};

/// Robot geometry
#[derive(Debug, Clone, PartialEq)]
pub struct DiffDriveConfig {
    /// Wheel radius [m]
    pub wheel_radius: f64,
    /// Distance between the wheel contact points [m]
    pub track_width: f64,
}

impl Default for DiffDriveConfig {
    fn default() -> Self {
        // TurtleBot3 Burger
        Self {
            wheel_radius: 0.033,
            track_width: 0.16,
        }
    }
}

impl DiffDriveConfig {
    pub fn validate(&self) -> RoboticsResult<()> {
        if !(self.wheel_radius.is_finite() && self.wheel_radius > 0.0) {
            return Err(RoboticsError::InvalidConfiguration(format!(
                "wheel_radius must be positive, got {}",
                self.wheel_radius
            )));
        }
        if !(self.track_width.is_finite() && self.track_width > 0.0) {
            return Err(RoboticsError::InvalidConfiguration(format!(
                "track_width must be positive, got {}",
                self.track_width
            )));
        }
        Ok(())
    }
}

/// Differential drive robot: pose plus last wheel angles
#[derive(Debug, Clone)]
pub struct DiffDrive {
    config: DiffDriveConfig,
    state: RobotState,
    wheels: WheelState,
}

impl DiffDrive {
    /// Create a robot at the origin with both wheels at zero
    pub fn new(config: DiffDriveConfig) -> RoboticsResult<Self> {
        config.validate()?;
        Ok(DiffDrive {
            config,
            state: RobotState::origin(),
            wheels: WheelState::default(),
        })
    }

    /// Create with default configuration
    pub fn with_defaults() -> RoboticsResult<Self> {
        Self::new(DiffDriveConfig::default())
    }

    pub fn config(&self) -> &DiffDriveConfig {
        &self.config
    }

    /// Body twist produced by the given wheel increments [rad]
    pub fn twist_from_wheel_deltas(&self, d_left: f64, d_right: f64) -> Twist2D {
        let r = self.config.wheel_radius;
        let d = self.config.track_width;
        Twist2D::new(r * (d_right - d_left) / d, r * (d_right + d_left) / 2.0, 0.0)
    }

    /// Forward kinematics.
    ///
    /// Computes the wheel increments against the stored angles, integrates the
    /// resulting twist into the pose and stores the new angles.
    pub fn compute_fk(&mut self, phi_left_new: f64, phi_right_new: f64) -> Twist2D {
        let d_left = phi_left_new - self.wheels.left;
        let d_right = phi_right_new - self.wheels.right;
        let twist = self.twist_from_wheel_deltas(d_left, d_right);

        let t_wb = Transform2D::from(self.state);
        let t_wb_new = t_wb * integrate_twist(twist);
        self.state = RobotState::new(
            t_wb_new.translation().x,
            t_wb_new.translation().y,
            normalize_angle(t_wb_new.rotation()),
        );
        self.wheels = WheelState::new(phi_left_new, phi_right_new);

        trace!(
            "fk: dphi=({:.6}, {:.6}) twist={} pose=({:.6}, {:.6}, {:.6})",
            d_left,
            d_right,
            twist,
            self.state.x,
            self.state.y,
            self.state.theta
        );

        twist
    }

    /// Inverse kinematics: wheel rates that realize `twist`.
    ///
    /// Fails when the twist asks for lateral velocity, which the wheels
    /// cannot produce.
    pub fn compute_ik(&self, twist: Twist2D) -> RoboticsResult<WheelVelocities> {
        if twist.y != 0.0 {
            return Err(RoboticsError::Nonholonomic(twist.y));
        }
        let r = self.config.wheel_radius;
        let half_track = self.config.track_width / 2.0;
        Ok(WheelVelocities {
            left: (twist.x - half_track * twist.omega) / r,
            right: (twist.x + half_track * twist.omega) / r,
        })
    }

    /// Re-seed the wheel angles without moving the robot
    pub fn update_wheel(&mut self, left: f64, right: f64) {
        self.wheels = WheelState::new(left, right);
    }

    /// Teleport the robot; the wheel angles are kept
    pub fn update_config(&mut self, x: f64, y: f64, theta: f64) {
        self.state = RobotState::new(x, y, theta);
    }

    /// Teleport the robot and re-seed the wheel angles
    pub fn update_config_with_wheels(
        &mut self,
        x: f64,
        y: f64,
        theta: f64,
        left: f64,
        right: f64,
    ) {
        self.update_config(x, y, theta);
        self.update_wheel(left, right);
    }

    pub fn state(&self) -> RobotState {
        self.state
    }

    pub fn wheels(&self) -> WheelState {
        self.wheels
    }

    pub fn config_x(&self) -> f64 {
        self.state.x
    }

    pub fn config_y(&self) -> f64 {
        self.state.y
    }

    pub fn config_theta(&self) -> f64 {
        self.state.theta
    }

    pub fn left_wheel(&self) -> f64 {
        self.wheels.left
    }

    pub fn right_wheel(&self) -> f64 {
        self.wheels.right
    }
}

impl WheelOdometry for DiffDrive {
    fn update(&mut self, phi_left: f64, phi_right: f64) -> Twist2D {
        self.compute_fk(phi_left, phi_right)
    }

    fn pose(&self) -> RobotState {
        self.state
    }
}

/// Convert an integer encoder count to a wheel angle [rad]
pub fn wheel_angle_from_ticks(ticks: i32, ticks_per_rad: f64) -> f64 {
    f64::from(ticks) / ticks_per_rad
}
