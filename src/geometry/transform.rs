//! Rigid 2D transforms (SE(2)) and twist integration

use std::fmt;
use std::ops::{Mul, MulAssign};
use std::str::FromStr;

use crate::common::{Point2D, RobotState, RoboticsError, Twist2D, Vector2D};
use crate::geometry::angle::{deg2rad, normalize_angle, rad2deg};

/// Below this angular displacement [rad] a twist is integrated as a straight line.
///
/// The arc branch uses `sin(w)/w` and `(1 - cos(w))/w = 2 sin^2(w/2)/w`, both of
/// which stay well conditioned down to ~1e-300, so the cutoff only has to keep
/// `w` away from an exact division by zero. At 1e-12 the straight-line branch
/// differs from the arc by less than `|v| * 1e-12` in the lateral direction.
pub const TWIST_EPSILON: f64 = 1e-12;

/// Rigid body transform: rotate by `rotation`, then translate by `translation`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform2D {
    translation: Vector2D,
    rotation: f64,
}

impl Transform2D {
    pub fn identity() -> Self {
        Self {
            translation: Vector2D::zero(),
            rotation: 0.0,
        }
    }

    pub fn new(translation: Vector2D, rotation: f64) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn from_translation(translation: Vector2D) -> Self {
        Self::new(translation, 0.0)
    }

    pub fn from_rotation(rotation: f64) -> Self {
        Self::new(Vector2D::zero(), rotation)
    }

    pub fn translation(&self) -> Vector2D {
        self.translation
    }

    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    /// Map a point; affected by both rotation and translation
    pub fn apply_point(&self, p: Point2D) -> Point2D {
        let (s, c) = self.rotation.sin_cos();
        Point2D::new(
            c * p.x - s * p.y + self.translation.x,
            s * p.x + c * p.y + self.translation.y,
        )
    }

    /// Map a vector; translation is ignored
    pub fn apply_vector(&self, v: Vector2D) -> Vector2D {
        let (s, c) = self.rotation.sin_cos();
        Vector2D::new(c * v.x - s * v.y, s * v.x + c * v.y)
    }

    /// Change the frame a twist is expressed in (adjoint map)
    pub fn apply_twist(&self, t: Twist2D) -> Twist2D {
        let (s, c) = self.rotation.sin_cos();
        Twist2D::new(
            t.omega,
            self.translation.y * t.omega + c * t.x - s * t.y,
            -self.translation.x * t.omega + s * t.x + c * t.y,
        )
    }

    pub fn inv(&self) -> Transform2D {
        let (s, c) = self.rotation.sin_cos();
        let t = self.translation;
        Transform2D::new(
            Vector2D::new(-t.x * c - t.y * s, t.x * s - t.y * c),
            -self.rotation,
        )
    }
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<RobotState> for Transform2D {
    fn from(pose: RobotState) -> Self {
        Transform2D::new(Vector2D::new(pose.x, pose.y), pose.theta)
    }
}

impl Mul for Transform2D {
    type Output = Transform2D;

    fn mul(self, rhs: Transform2D) -> Transform2D {
        let translation = self.apply_vector(rhs.translation) + self.translation;
        Transform2D::new(translation, normalize_angle(self.rotation + rhs.rotation))
    }
}

impl MulAssign for Transform2D {
    fn mul_assign(&mut self, rhs: Transform2D) {
        *self = *self * rhs;
    }
}

impl fmt::Display for Transform2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deg: {} x: {} y: {}",
            rad2deg(self.rotation),
            self.translation.x,
            self.translation.y
        )
    }
}

impl FromStr for Transform2D {
    type Err = RoboticsError;

    /// Accepts `"deg: 90 x: 3 y: 5"` or the bare `"90 3 5"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let numbers = s
            .split_whitespace()
            .filter(|tok| !matches!(*tok, "deg:" | "x:" | "y:"))
            .map(|tok| {
                tok.parse::<f64>()
                    .map_err(|e| RoboticsError::ParseError(format!("{:?}: {}", tok, e)))
            })
            .collect::<Result<Vec<f64>, _>>()?;

        match numbers.as_slice() {
            [deg, x, y] => Ok(Transform2D::new(Vector2D::new(*x, *y), deg2rad(*deg))),
            _ => Err(RoboticsError::ParseError(format!(
                "expected 3 numbers in transform {:?}, found {}",
                s,
                numbers.len()
            ))),
        }
    }
}

/// Displacement produced by following a constant body twist for one unit of time.
///
/// Exact SE(2) exponential: an arc of constant curvature when the rotation is
/// non-negligible, a straight line otherwise (see [`TWIST_EPSILON`]).
pub fn integrate_twist(twist: Twist2D) -> Transform2D {
    let w = twist.omega;

    if w.abs() < TWIST_EPSILON {
        return Transform2D::new(Vector2D::new(twist.x, twist.y), w);
    }

    let sin_term = w.sin() / w;
    let half = (0.5 * w).sin();
    let cos_term = 2.0 * half * half / w;

    Transform2D::new(
        Vector2D::new(
            twist.x * sin_term - twist.y * cos_term,
            twist.x * cos_term + twist.y * sin_term,
        ),
        w,
    )
}
