//! Common types used throughout turtle_slam

use std::fmt;
use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use nalgebra::{Vector2, Vector3};

use crate::common::error::{RoboticsError, RoboticsResult};

/// Landmark position meaning "no fix yet"
pub const UNOBSERVED_POSITION: f64 = 1e4;

/// Published landmark identity meaning "unassigned"
pub const UNASSIGNED_UID: isize = -1;

/// Split `"x y ..."` or `"[x y ...]"` into exactly `N` numbers.
fn parse_components<const N: usize>(s: &str) -> RoboticsResult<[f64; N]> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix('[').unwrap_or(trimmed);
    let inner = inner.strip_suffix(']').unwrap_or(inner);

    let tokens: Vec<&str> = inner.split_whitespace().collect();
    if tokens.len() != N {
        return Err(RoboticsError::ParseError(format!(
            "expected {} components in {:?}, found {}",
            N,
            s,
            tokens.len()
        )));
    }

    let mut out = [0.0; N];
    for (slot, token) in out.iter_mut().zip(tokens) {
        *slot = token
            .parse::<f64>()
            .map_err(|e| RoboticsError::ParseError(format!("{:?}: {}", token, e)))?;
    }
    Ok(out)
}

/// 2D point representation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn origin() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn distance(&self, other: &Point2D) -> f64 {
        (*self - *other).magnitude()
    }

    pub fn to_vector(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
}

impl From<(f64, f64)> for Point2D {
    fn from(tuple: (f64, f64)) -> Self {
        Self { x: tuple.0, y: tuple.1 }
    }
}

impl From<Vector2<f64>> for Point2D {
    fn from(v: Vector2<f64>) -> Self {
        Self { x: v[0], y: v[1] }
    }
}

impl fmt::Display for Point2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.x, self.y)
    }
}

impl FromStr for Point2D {
    type Err = RoboticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [x, y] = parse_components::<2>(s)?;
        Ok(Self { x, y })
    }
}

/// 2D displacement
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2D {
    pub x: f64,
    pub y: f64,
}

impl Vector2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn magnitude(&self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn dot(&self, other: &Vector2D) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Unit vector in the same direction; `None` for the zero vector.
    pub fn normalize(&self) -> Option<Vector2D> {
        let mag = self.magnitude();
        if mag == 0.0 {
            None
        } else {
            Some(Vector2D::new(self.x / mag, self.y / mag))
        }
    }

    /// Signed angle from `self` to `other` in (-pi, pi]
    pub fn angle_to(&self, other: &Vector2D) -> f64 {
        let cross = self.x * other.y - self.y * other.x;
        cross.atan2(self.dot(other))
    }

    pub fn to_vector(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
}

impl From<Vector2<f64>> for Vector2D {
    fn from(v: Vector2<f64>) -> Self {
        Self { x: v[0], y: v[1] }
    }
}

impl fmt::Display for Vector2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.x, self.y)
    }
}

impl FromStr for Vector2D {
    type Err = RoboticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [x, y] = parse_components::<2>(s)?;
        Ok(Self { x, y })
    }
}

impl Sub for Point2D {
    type Output = Vector2D;

    fn sub(self, tail: Point2D) -> Vector2D {
        Vector2D::new(self.x - tail.x, self.y - tail.y)
    }
}

impl Add<Vector2D> for Point2D {
    type Output = Point2D;

    fn add(self, disp: Vector2D) -> Point2D {
        Point2D::new(self.x + disp.x, self.y + disp.y)
    }
}

impl AddAssign<Vector2D> for Point2D {
    fn add_assign(&mut self, disp: Vector2D) {
        self.x += disp.x;
        self.y += disp.y;
    }
}

impl Add for Vector2D {
    type Output = Vector2D;

    fn add(self, rhs: Vector2D) -> Vector2D {
        Vector2D::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vector2D {
    fn add_assign(&mut self, rhs: Vector2D) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vector2D {
    type Output = Vector2D;

    fn sub(self, rhs: Vector2D) -> Vector2D {
        Vector2D::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Vector2D {
    fn sub_assign(&mut self, rhs: Vector2D) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Mul<f64> for Vector2D {
    type Output = Vector2D;

    fn mul(self, scale: f64) -> Vector2D {
        Vector2D::new(self.x * scale, self.y * scale)
    }
}

impl Mul<Vector2D> for f64 {
    type Output = Vector2D;

    fn mul(self, v: Vector2D) -> Vector2D {
        v * self
    }
}

impl MulAssign<f64> for Vector2D {
    fn mul_assign(&mut self, scale: f64) {
        self.x *= scale;
        self.y *= scale;
    }
}

impl Neg for Vector2D {
    type Output = Vector2D;

    fn neg(self) -> Vector2D {
        Vector2D::new(-self.x, -self.y)
    }
}

/// Body velocity over one control interval: angular rate and linear components
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Twist2D {
    pub omega: f64,
    pub x: f64,
    pub y: f64,
}

impl Twist2D {
    pub fn new(omega: f64, x: f64, y: f64) -> Self {
        Self { omega, x, y }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.omega, self.x, self.y)
    }
}

impl fmt::Display for Twist2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {} {}]", self.omega, self.x, self.y)
    }
}

impl FromStr for Twist2D {
    type Err = RoboticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [omega, x, y] = parse_components::<3>(s)?;
        Ok(Self { omega, x, y })
    }
}

/// Robot pose in the world (or odometry) frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RobotState {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl RobotState {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }

    pub fn origin() -> Self {
        Self::default()
    }

    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }
}

/// Last known absolute wheel angles [rad]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WheelState {
    pub left: f64,
    pub right: f64,
}

impl WheelState {
    pub fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }
}

/// Wheel angular velocities [rad/s] (or angle increments per unit interval)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WheelVelocities {
    pub left: f64,
    pub right: f64,
}

/// Landmark record: position plus identity slot
///
/// Identity and array position coincide, so the uid is the slot index
/// itself; `None` is the unassigned state (`-1` on the wire).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub x: f64,
    pub y: f64,
    pub uid: Option<usize>,
}

impl Measurement {
    /// Assigned record for landmark `slot`
    pub fn new(x: f64, y: f64, slot: usize) -> Self {
        Self {
            x,
            y,
            uid: Some(slot),
        }
    }

    /// The "no fix yet" record every landmark slot starts from
    pub fn unobserved() -> Self {
        Self {
            x: UNOBSERVED_POSITION,
            y: UNOBSERVED_POSITION,
            uid: None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.uid.is_some()
    }

    pub fn slot(&self) -> Option<usize> {
        self.uid
    }

    /// Signed identity for publishing: the slot, or `-1` when unassigned
    pub fn wire_uid(&self) -> isize {
        self.uid
            .and_then(|slot| isize::try_from(slot).ok())
            .unwrap_or(UNASSIGNED_UID)
    }

    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }
}

impl Default for Measurement {
    fn default() -> Self {
        Self::unobserved()
    }
}

/// Circle estimate: center and radius
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: Point2D,
    pub radius: f64,
}

impl Circle {
    pub fn new(center: Point2D, radius: f64) -> Self {
        Self { center, radius }
    }
}
