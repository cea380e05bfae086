// EKF SLAM (Extended Kalman Filter SLAM) with a fixed-capacity landmark table
//
// Reference:
// - Probabilistic Robotics (Thrun, Burgard, Fox), ch. 10
//
// State vector: [theta, x, y, lm0_x, lm0_y, ..., lm(N-1)_x, lm(N-1)_y]
// Slot i of the table always holds landmark i. A slot is either unobserved
// (position 1e4, no uid) or assigned (uid == i).

use log::{debug, trace};
use nalgebra::{DMatrix, DVector, Matrix2, Matrix3, Vector2};
use ordered_float::NotNan;

use crate::common::{
    Measurement, RobotState, RoboticsError, RoboticsResult, StateEstimator, Twist2D, Vector2D,
    UNOBSERVED_POSITION,
};
use crate::geometry::{
    almost_equal, integrate_twist, normalize_angle, Transform2D, DEFAULT_EPSILON,
};

// State dimension
pub const STATE_SIZE: usize = 3; // robot state [theta, x, y]
pub const LM_SIZE: usize = 2; // landmark state [x, y]

/// Prior variance of a landmark nobody has seen yet
pub const INITIAL_LANDMARK_VARIANCE: f64 = 1e10;

/// Configuration for EKF SLAM
#[derive(Debug, Clone)]
pub struct EkfSlamConfig {
    /// Landmark capacity N, fixed for the filter lifetime
    pub max_landmarks: usize,
    /// Process noise on [theta, x, y]
    pub q: Matrix3<f64>,
    /// Observation noise on [range, bearing]
    pub r: Matrix2<f64>,
    /// Mahalanobis gate used by data association
    pub association_threshold: f64,
}

impl Default for EkfSlamConfig {
    fn default() -> Self {
        Self {
            max_landmarks: 20,
            q: Matrix3::from_diagonal_element(1e-3),
            r: Matrix2::new(0.01, 0.0, 0.0, 0.01),
            association_threshold: 4.0,
        }
    }
}

impl EkfSlamConfig {
    pub fn validate(&self) -> RoboticsResult<()> {
        if (0..3).any(|i| !(self.q[(i, i)] >= 0.0)) {
            return Err(RoboticsError::InvalidConfiguration(
                "process noise q must have a non-negative diagonal".to_string(),
            ));
        }
        if (0..2).any(|i| !(self.r[(i, i)] > 0.0)) {
            return Err(RoboticsError::InvalidConfiguration(
                "observation noise r must have a positive diagonal".to_string(),
            ));
        }
        if !(self.association_threshold > 0.0) {
            return Err(RoboticsError::InvalidConfiguration(format!(
                "association_threshold must be positive, got {}",
                self.association_threshold
            )));
        }
        Ok(())
    }
}

/// Range-bearing sighting of the landmark in `slot`, bearing relative to the heading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub range: f64,
    pub bearing: f64,
    pub slot: usize,
}

impl Observation {
    pub fn new(range: f64, bearing: f64, slot: usize) -> Self {
        Self {
            range,
            bearing,
            slot,
        }
    }

    /// From a landmark position expressed in the robot body frame
    pub fn from_body_point(x: f64, y: f64, slot: usize) -> Self {
        Self::new(x.hypot(y), y.atan2(x), slot)
    }
}

/// EKF SLAM state container
#[derive(Debug, Clone)]
pub struct EkfSlam {
    config: EkfSlamConfig,
    state: RobotState,
    landmarks: Vec<Measurement>,
    covariance: DMatrix<f64>,
}

impl EkfSlam {
    /// Filter with capacity `max_landmarks` and default noise
    pub fn new(max_landmarks: usize) -> Self {
        let config = EkfSlamConfig {
            max_landmarks,
            ..EkfSlamConfig::default()
        };
        Self::build(config)
    }

    pub fn with_config(config: EkfSlamConfig) -> RoboticsResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EkfSlamConfig) -> Self {
        let n = config.max_landmarks;
        let dim = STATE_SIZE + LM_SIZE * n;

        // pose known exactly, landmarks completely unknown
        let mut covariance = DMatrix::zeros(dim, dim);
        for i in STATE_SIZE..dim {
            covariance[(i, i)] = INITIAL_LANDMARK_VARIANCE;
        }

        EkfSlam {
            config,
            state: RobotState::origin(),
            landmarks: vec![Measurement::unobserved(); n],
            covariance,
        }
    }

    pub fn config(&self) -> &EkfSlamConfig {
        &self.config
    }

    pub fn max_landmarks(&self) -> usize {
        self.landmarks.len()
    }

    /// Length of the state vector, 3 + 2N
    pub fn state_dim(&self) -> usize {
        STATE_SIZE + LM_SIZE * self.landmarks.len()
    }

    fn check_slot(&self, index: usize) -> RoboticsResult<()> {
        if index >= self.landmarks.len() {
            return Err(RoboticsError::OutOfRange {
                index,
                capacity: self.landmarks.len(),
            });
        }
        Ok(())
    }

    /// [theta, x, y, lm0_x, lm0_y, ...] in slot order
    pub fn get_state_vec(&self) -> DVector<f64> {
        let mut mu = DVector::zeros(self.state_dim());
        mu[0] = self.state.theta;
        mu[1] = self.state.x;
        mu[2] = self.state.y;
        for (i, lm) in self.landmarks.iter().enumerate() {
            mu[STATE_SIZE + LM_SIZE * i] = lm.x;
            mu[STATE_SIZE + LM_SIZE * i + 1] = lm.y;
        }
        mu
    }

    pub fn get_all_landmarks(&self) -> &[Measurement] {
        &self.landmarks
    }

    /// Landmark with identity `uid`, or the unobserved record
    pub fn get_landmark_pos(&self, uid: usize) -> Measurement {
        match self.landmarks.get(uid) {
            Some(lm) if lm.slot() == Some(uid) => *lm,
            _ => Measurement::unobserved(),
        }
    }

    pub fn get_robot_state(&self) -> RobotState {
        self.state
    }

    pub fn get_covariance_mat(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// Predicted [range, bearing] for a landmark at displacement `d` from the robot
    pub fn get_h_vec(&self, d: Vector2D) -> Vector2<f64> {
        Vector2::new(d.x.hypot(d.y), d.y.atan2(d.x))
    }

    /// Observation Jacobian for landmark `index` at world-frame displacement `d`.
    ///
    /// Undefined when the landmark coincides with the robot.
    pub fn get_h_mat(&self, d: Vector2D, index: usize) -> RoboticsResult<DMatrix<f64>> {
        self.check_slot(index)?;

        let (dx, dy) = (d.x, d.y);
        let q = dx * dx + dy * dy;
        if !(q.is_finite() && q > f64::EPSILON) {
            return Err(RoboticsError::NumericalError(format!(
                "landmark {} at degenerate displacement ({}, {})",
                index, dx, dy
            )));
        }
        let sq = q.sqrt();

        let mut h = DMatrix::zeros(2, self.state_dim());

        // w.r.t. robot [theta, x, y]
        h[(0, 1)] = -dx / sq;
        h[(0, 2)] = -dy / sq;
        h[(1, 0)] = -1.0;
        h[(1, 1)] = dy / q;
        h[(1, 2)] = -dx / q;

        // w.r.t. landmark [x, y]
        let col = STATE_SIZE + LM_SIZE * index;
        h[(0, col)] = dx / sq;
        h[(0, col + 1)] = dy / sq;
        h[(1, col)] = -dy / q;
        h[(1, col + 1)] = dx / q;

        Ok(h)
    }

    /// Motion Jacobian for a world-frame robot displacement `(dx, dy)`
    pub fn get_a_mat(&self, dx: f64, dy: f64) -> DMatrix<f64> {
        let mut a = DMatrix::identity(self.state_dim(), self.state_dim());
        a[(1, 0)] = -dy;
        a[(2, 0)] = dx;
        a
    }

    /// Shape, finiteness and a non-negative diagonal
    fn check_covariance(&self, sigma: &DMatrix<f64>) -> RoboticsResult<()> {
        let dim = self.state_dim();
        if sigma.shape() != (dim, dim) {
            return Err(RoboticsError::InvalidConfiguration(format!(
                "covariance must be {}x{}, got {:?}",
                dim,
                dim,
                sigma.shape()
            )));
        }
        if sigma.iter().any(|v| !v.is_finite()) {
            return Err(RoboticsError::NumericalError(
                "covariance has non-finite entries".to_string(),
            ));
        }
        if let Some(i) = (0..dim).find(|&i| sigma[(i, i)] < 0.0) {
            return Err(RoboticsError::NumericalError(format!(
                "covariance diagonal {} is negative ({})",
                i,
                sigma[(i, i)]
            )));
        }
        Ok(())
    }

    pub fn update_covariance(&mut self, sigma_new: DMatrix<f64>) -> RoboticsResult<()> {
        self.check_covariance(&sigma_new)?;
        self.covariance = sigma_new;
        Ok(())
    }

    pub fn update_state(&mut self, x: f64, y: f64, theta: f64) {
        self.state = RobotState::new(x, y, theta);
    }

    /// Copy every non-sentinel landmark entry of `mu` into its slot and assign its uid
    pub fn update_landmark_pos(&mut self, mu: &DVector<f64>) -> RoboticsResult<()> {
        if mu.len() != self.state_dim() {
            return Err(RoboticsError::InvalidConfiguration(format!(
                "state vector must have length {}, got {}",
                self.state_dim(),
                mu.len()
            )));
        }

        for (i, lm) in self.landmarks.iter_mut().enumerate() {
            let x = mu[STATE_SIZE + LM_SIZE * i];
            let y = mu[STATE_SIZE + LM_SIZE * i + 1];
            if !almost_equal(x, UNOBSERVED_POSITION, DEFAULT_EPSILON)
                && !almost_equal(y, UNOBSERVED_POSITION, DEFAULT_EPSILON)
            {
                *lm = Measurement::new(x, y, i);
            }
        }
        Ok(())
    }

    /// EKF prediction from the body twist of the last interval.
    ///
    /// A non-finite twist is rejected and leaves the filter untouched.
    pub fn predict(&mut self, twist: Twist2D) -> RoboticsResult<()> {
        if !(twist.omega.is_finite() && twist.x.is_finite() && twist.y.is_finite()) {
            return Err(RoboticsError::NumericalError(format!(
                "non-finite twist {}",
                twist
            )));
        }

        let pose = self.state;
        let moved = Transform2D::from(pose) * integrate_twist(twist);
        let dx = moved.translation().x - pose.x;
        let dy = moved.translation().y - pose.y;

        let a = self.get_a_mat(dx, dy);
        let mut sigma = &a * &self.covariance * a.transpose();
        for i in 0..STATE_SIZE {
            for j in 0..STATE_SIZE {
                sigma[(i, j)] += self.config.q[(i, j)];
            }
        }

        self.update_covariance(sigma)?;
        self.update_state(
            moved.translation().x,
            moved.translation().y,
            normalize_angle(moved.rotation()),
        );

        trace!(
            "predict: twist={} pose=({:.6}, {:.6}, {:.6})",
            twist,
            self.state.x,
            self.state.y,
            self.state.theta
        );
        Ok(())
    }

    /// Predicted observation, innovation covariance and Jacobian for landmark `slot` at `mu`
    fn innovation_terms(
        &self,
        mu: &DVector<f64>,
        slot: usize,
    ) -> RoboticsResult<(Vector2<f64>, Matrix2<f64>, DMatrix<f64>)> {
        let theta = mu[0];
        let world = Vector2D::new(
            mu[STATE_SIZE + LM_SIZE * slot] - mu[1],
            mu[STATE_SIZE + LM_SIZE * slot + 1] - mu[2],
        );
        let body = Transform2D::from_rotation(-theta).apply_vector(world);

        let z_hat = self.get_h_vec(body);
        let h = self.get_h_mat(world, slot)?;
        let s = &h * &self.covariance * h.transpose();
        let s = Matrix2::new(s[(0, 0)], s[(0, 1)], s[(1, 0)], s[(1, 1)]) + self.config.r;
        if s.iter().any(|v| !v.is_finite()) {
            return Err(RoboticsError::NumericalError(format!(
                "innovation covariance for landmark {} is not finite",
                slot
            )));
        }

        Ok((z_hat, s, h))
    }

    /// Fold one observation into the filter.
    ///
    /// Nothing is written back unless the whole update is finite, so a
    /// rejected observation leaves the filter as it was.
    pub fn correct_one(&mut self, z: &Observation) -> RoboticsResult<()> {
        self.check_slot(z.slot)?;
        if !(z.range.is_finite() && z.bearing.is_finite()) {
            return Err(RoboticsError::NumericalError(format!(
                "non-finite observation of landmark {}: range {} bearing {}",
                z.slot, z.range, z.bearing
            )));
        }

        let mut mu = self.get_state_vec();
        let col = STATE_SIZE + LM_SIZE * z.slot;

        if !self.landmarks[z.slot].is_assigned() {
            // first sighting: place the landmark where the observation says it is
            let heading = mu[0] + z.bearing;
            mu[col] = mu[1] + z.range * heading.cos();
            mu[col + 1] = mu[2] + z.range * heading.sin();
            debug!(
                "initializing landmark {} at ({:.4}, {:.4})",
                z.slot,
                mu[col],
                mu[col + 1]
            );
        }

        let (z_hat, s, h) = self.innovation_terms(&mu, z.slot)?;
        let y = DVector::from_vec(vec![
            z.range - z_hat[0],
            normalize_angle(z.bearing - z_hat[1]),
        ]);

        let s_inv = s.try_inverse().ok_or_else(|| {
            RoboticsError::NumericalError(format!(
                "innovation covariance for landmark {} is singular",
                z.slot
            ))
        })?;
        let s_inv = DMatrix::from_fn(2, 2, |i, j| s_inv[(i, j)]);

        // Kalman gain
        let k = &self.covariance * h.transpose() * s_inv;

        mu += &k * y;
        mu[0] = normalize_angle(mu[0]);

        let n = self.state_dim();
        let i_kh = DMatrix::identity(n, n) - &k * &h;
        let sigma = &i_kh * &self.covariance;
        let sigma = (&sigma + sigma.transpose()) * 0.5;

        if mu.iter().any(|v| !v.is_finite()) {
            return Err(RoboticsError::NumericalError(format!(
                "update from landmark {} produced a non-finite state",
                z.slot
            )));
        }
        self.check_covariance(&sigma)?;

        self.update_state(mu[1], mu[2], mu[0]);
        self.update_landmark_pos(&mu)?;
        self.update_covariance(sigma)?;

        trace!(
            "correct: slot={} innovation=({:.6}, {:.6})",
            z.slot,
            z.range - z_hat[0],
            normalize_angle(z.bearing - z_hat[1])
        );
        Ok(())
    }

    /// Fold every observation in order, stopping at the first rejected one
    pub fn correct(&mut self, observations: &[Observation]) -> RoboticsResult<()> {
        for z in observations {
            self.correct_one(z)?;
        }
        Ok(())
    }

    /// Nearest assigned landmark by Mahalanobis distance, if inside the gate
    pub fn associate(&self, range: f64, bearing: f64) -> Option<usize> {
        let mu = self.get_state_vec();
        let gate = self.config.association_threshold * self.config.association_threshold;

        let best = self
            .landmarks
            .iter()
            .enumerate()
            .filter(|(_, lm)| lm.is_assigned())
            .filter_map(|(slot, _)| {
                let (z_hat, s, _) = self.innovation_terms(&mu, slot).ok()?;
                let y = Vector2::new(range - z_hat[0], normalize_angle(bearing - z_hat[1]));
                let s_inv = s.try_inverse()?;
                let dist = (y.transpose() * s_inv * y)[(0, 0)];
                NotNan::new(dist).ok().map(|d| (d, slot))
            })
            .min();

        match best {
            Some((dist, slot)) if dist.into_inner() < gate => {
                debug!(
                    "associated observation with landmark {} (d2={:.3})",
                    slot,
                    dist.into_inner()
                );
                Some(slot)
            }
            _ => None,
        }
    }

    /// First unassigned slot, for registering a landmark association could not match
    pub fn next_free_slot(&self) -> Option<usize> {
        self.landmarks.iter().position(|lm| !lm.is_assigned())
    }
}

impl StateEstimator for EkfSlam {
    type State = RobotState;
    type Measurement = [Observation];
    type Control = Twist2D;

    fn predict(&mut self, control: &Self::Control) -> RoboticsResult<()> {
        EkfSlam::predict(self, *control)
    }

    fn update(&mut self, measurement: &Self::Measurement) -> RoboticsResult<()> {
        self.correct(measurement)
    }

    fn get_state(&self) -> Self::State {
        self.state
    }

    fn get_covariance(&self) -> Option<&DMatrix<f64>> {
        Some(&self.covariance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn diag_non_negative(ekf: &EkfSlam) -> bool {
        ekf.get_covariance_mat().diagonal().iter().all(|&v| v >= 0.0)
    }

    #[test]
    fn test_initial_covariance_and_state() {
        let ekf = EkfSlam::new(3);
        let sigma = ekf.get_covariance_mat();
        assert_eq!(sigma.shape(), (9, 9));
        for i in 0..3 {
            assert_eq!(sigma[(i, i)], 0.0);
        }
        for i in 3..9 {
            assert_eq!(sigma[(i, i)], 1e10);
        }
        assert_eq!(sigma[(0, 5)], 0.0);
        assert_eq!(sigma[(4, 3)], 0.0);

        let mu = ekf.get_state_vec();
        assert_eq!(mu.len(), 9);
        assert_eq!(&mu.as_slice()[..3], &[0.0, 0.0, 0.0]);
        assert!(mu.as_slice()[3..].iter().all(|&v| v == 1e4));
        assert!(ekf.get_all_landmarks().iter().all(|lm| lm.uid.is_none()));
    }

    #[test]
    fn test_update_landmark_pos_with_sentinels_keeps_uids() {
        let mut ekf = EkfSlam::new(4);
        let mu = ekf.get_state_vec();
        ekf.update_landmark_pos(&mu).unwrap();
        assert!(ekf.get_all_landmarks().iter().all(|lm| lm.uid.is_none()));
    }

    #[test]
    fn test_update_landmark_pos_assigns_slot_uid() {
        let mut ekf = EkfSlam::new(3);
        let mut mu = ekf.get_state_vec();
        mu[STATE_SIZE + 2] = 1.5;
        mu[STATE_SIZE + 3] = -2.0;
        ekf.update_landmark_pos(&mu).unwrap();

        let lms = ekf.get_all_landmarks();
        assert_eq!(lms[0].uid, None);
        assert_eq!(lms[1], Measurement::new(1.5, -2.0, 1));
        assert_eq!(lms[2].uid, None);
        assert_eq!(ekf.get_landmark_pos(1), Measurement::new(1.5, -2.0, 1));
        assert_eq!(ekf.get_landmark_pos(0), Measurement::unobserved());
        assert_eq!(ekf.get_landmark_pos(99), Measurement::unobserved());

        // slot ordering is stable
        let again = ekf.get_state_vec();
        assert_eq!(again[STATE_SIZE + 2], 1.5);
        assert_eq!(again[STATE_SIZE + 3], -2.0);

        assert!(ekf.update_landmark_pos(&DVector::zeros(4)).is_err());
    }

    #[test]
    fn test_h_vec() {
        let ekf = EkfSlam::new(1);
        let h = ekf.get_h_vec(Vector2D::new(3.0, 4.0));
        assert_abs_diff_eq!(h[0], 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(h[1], (4.0f64).atan2(3.0), epsilon = 1e-12);
    }

    #[test]
    fn test_h_mat_layout() {
        let ekf = EkfSlam::new(3);
        let (dx, dy) = (3.0, 4.0);
        let h = ekf.get_h_mat(Vector2D::new(dx, dy), 1).unwrap();
        assert_eq!(h.shape(), (2, 9));

        let expected_robot = [[0.0, -0.6, -0.8], [-1.0, 4.0 / 25.0, -3.0 / 25.0]];
        let expected_lm = [[0.6, 0.8], [-4.0 / 25.0, 3.0 / 25.0]];
        for r in 0..2 {
            for c in 0..3 {
                assert_abs_diff_eq!(h[(r, c)], expected_robot[r][c], epsilon = 1e-12);
            }
            assert_eq!(h[(r, 3)], 0.0);
            assert_eq!(h[(r, 4)], 0.0);
            assert_abs_diff_eq!(h[(r, 5)], expected_lm[r][0], epsilon = 1e-12);
            assert_abs_diff_eq!(h[(r, 6)], expected_lm[r][1], epsilon = 1e-12);
            assert_eq!(h[(r, 7)], 0.0);
            assert_eq!(h[(r, 8)], 0.0);
        }
    }

    #[test]
    fn test_h_mat_matches_numeric_jacobian() {
        let mut ekf = EkfSlam::new(2);
        ekf.update_state(0.4, -0.3, 0.7);
        let mut mu = ekf.get_state_vec();
        mu[5] = 2.0;
        mu[6] = 1.5;

        let observe = |mu: &DVector<f64>| {
            let dx = mu[5] - mu[1];
            let dy = mu[6] - mu[2];
            Vector2::new(dx.hypot(dy), normalize_angle(dy.atan2(dx) - mu[0]))
        };

        let h = ekf
            .get_h_mat(Vector2D::new(mu[5] - mu[1], mu[6] - mu[2]), 1)
            .unwrap();
        let eps = 1e-6;
        for c in 0..mu.len() {
            let mut plus = mu.clone();
            let mut minus = mu.clone();
            plus[c] += eps;
            minus[c] -= eps;
            let d = (observe(&plus) - observe(&minus)) / (2.0 * eps);
            assert_abs_diff_eq!(h[(0, c)], d[0], epsilon = 1e-6);
            assert_abs_diff_eq!(h[(1, c)], d[1], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_h_mat_out_of_range() {
        let ekf = EkfSlam::new(2);
        assert_eq!(
            ekf.get_h_mat(Vector2D::new(1.0, 0.0), 2).unwrap_err(),
            RoboticsError::OutOfRange { index: 2, capacity: 2 }
        );
    }

    #[test]
    fn test_a_mat() {
        let ekf = EkfSlam::new(2);
        let a = ekf.get_a_mat(0.5, -0.25);
        assert_eq!(a.shape(), (7, 7));
        let mut expected = DMatrix::<f64>::identity(7, 7);
        expected[(1, 0)] = 0.25;
        expected[(2, 0)] = 0.5;
        assert_eq!(a, expected);
    }

    #[test]
    fn test_setters_replace_wholesale() {
        let mut ekf = EkfSlam::new(1);
        ekf.update_state(1.0, 2.0, 0.5);
        assert_eq!(ekf.get_robot_state(), RobotState::new(1.0, 2.0, 0.5));

        let sigma = DMatrix::from_diagonal_element(5, 5, 2.0);
        ekf.update_covariance(sigma.clone()).unwrap();
        assert_eq!(ekf.get_covariance_mat(), &sigma);
        assert!(ekf.update_covariance(DMatrix::zeros(3, 3)).is_err());
    }

    #[test]
    fn test_predict_moves_pose_and_grows_robot_covariance() {
        let mut ekf = EkfSlam::new(2);
        ekf.predict(Twist2D::new(0.0, 1.0, 0.0)).unwrap();
        let pose = ekf.get_robot_state();
        assert_abs_diff_eq!(pose.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pose.y, 0.0, epsilon = 1e-12);

        let sigma = ekf.get_covariance_mat();
        for i in 0..3 {
            assert_abs_diff_eq!(sigma[(i, i)], 1e-3, epsilon = 1e-15);
        }
        // landmarks untouched by robot motion
        for i in 3..7 {
            assert_eq!(sigma[(i, i)], 1e10);
            assert_eq!(sigma[(0, i)], 0.0);
        }

        ekf.predict(Twist2D::new(PI / 2.0, 0.0, 0.0)).unwrap();
        assert_abs_diff_eq!(ekf.get_robot_state().theta, PI / 2.0, epsilon = 1e-12);
        assert!(diag_non_negative(&ekf));
    }

    #[test]
    fn test_first_sighting_initializes_landmark() {
        let mut ekf = EkfSlam::new(3);
        ekf.update_state(1.0, 1.0, PI / 2.0);
        ekf.correct(&[Observation::new(2.0, -PI / 2.0, 2)]).unwrap();

        let lm = ekf.get_landmark_pos(2);
        assert_eq!(lm.uid, Some(2));
        assert_abs_diff_eq!(lm.x, 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(lm.y, 1.0, epsilon = 1e-6);
        assert_eq!(ekf.get_all_landmarks()[0].uid, None);
        assert_eq!(ekf.get_all_landmarks()[1].uid, None);

        let sigma = ekf.get_covariance_mat();
        assert!(sigma[(7, 7)] < 1.0);
        assert!(sigma[(8, 8)] < 1.0);
        assert_eq!(sigma[(3, 3)], 1e10);
        assert!(diag_non_negative(&ekf));
    }

    #[test]
    fn test_correct_out_of_range() {
        let mut ekf = EkfSlam::new(2);
        let err = ekf.correct(&[Observation::new(1.0, 0.0, 5)]).unwrap_err();
        assert_eq!(err, RoboticsError::OutOfRange { index: 5, capacity: 2 });
    }

    fn snapshot(ekf: &EkfSlam) -> (RobotState, Vec<Measurement>, DMatrix<f64>) {
        (
            ekf.get_robot_state(),
            ekf.get_all_landmarks().to_vec(),
            ekf.get_covariance_mat().clone(),
        )
    }

    #[test]
    fn test_h_mat_rejects_zero_displacement() {
        let ekf = EkfSlam::new(2);
        assert!(matches!(
            ekf.get_h_mat(Vector2D::zero(), 0),
            Err(RoboticsError::NumericalError(_))
        ));
    }

    #[test]
    fn test_landmark_on_robot_is_rejected_without_side_effects() {
        let mut ekf = EkfSlam::new(2);
        let before = snapshot(&ekf);

        let result = ekf.correct_one(&Observation::new(0.0, 0.0, 0));
        assert!(matches!(result, Err(RoboticsError::NumericalError(_))));
        assert_eq!(snapshot(&ekf), before);
        assert_eq!(ekf.get_landmark_pos(0), Measurement::unobserved());
    }

    #[test]
    fn test_known_landmark_under_robot_is_rejected() {
        let mut ekf = EkfSlam::new(1);
        ekf.correct_one(&Observation::new(1.0, 0.0, 0)).unwrap();
        ekf.update_state(1.0, 0.0, 0.0);
        let before = snapshot(&ekf);

        let result = ekf.correct_one(&Observation::new(0.5, 0.0, 0));
        assert!(matches!(result, Err(RoboticsError::NumericalError(_))));
        assert_eq!(snapshot(&ekf), before);
    }

    #[test]
    fn test_non_finite_observation_is_rejected() {
        let mut ekf = EkfSlam::new(2);
        ekf.correct_one(&Observation::new(2.0, 0.0, 1)).unwrap();
        let before = snapshot(&ekf);

        for z in [
            Observation::new(f64::NAN, 0.0, 0),
            Observation::new(1.0, f64::INFINITY, 0),
            Observation::new(f64::NAN, 0.0, 1),
        ] {
            let result = ekf.correct_one(&z);
            assert!(matches!(result, Err(RoboticsError::NumericalError(_))));
            assert_eq!(snapshot(&ekf), before);
        }
    }

    #[test]
    fn test_non_finite_twist_is_rejected() {
        let mut ekf = EkfSlam::new(1);
        ekf.predict(Twist2D::new(0.1, 0.5, 0.0)).unwrap();
        let before = snapshot(&ekf);

        for twist in [
            Twist2D::new(f64::NAN, 1.0, 0.0),
            Twist2D::new(0.0, f64::INFINITY, 0.0),
            Twist2D::new(0.0, 1.0, f64::NEG_INFINITY),
        ] {
            let result = ekf.predict(twist);
            assert!(matches!(result, Err(RoboticsError::NumericalError(_))));
            assert_eq!(snapshot(&ekf), before);
        }
    }

    #[test]
    fn test_update_covariance_rejects_bad_diagonal() {
        let mut ekf = EkfSlam::new(1);
        let before = ekf.get_covariance_mat().clone();

        let mut negative = DMatrix::<f64>::identity(5, 5);
        negative[(0, 0)] = -1.0;
        assert!(matches!(
            ekf.update_covariance(negative),
            Err(RoboticsError::NumericalError(_))
        ));

        let mut not_finite = DMatrix::<f64>::identity(5, 5);
        not_finite[(3, 3)] = f64::NAN;
        assert!(matches!(
            ekf.update_covariance(not_finite),
            Err(RoboticsError::NumericalError(_))
        ));

        assert_eq!(ekf.get_covariance_mat(), &before);
    }

    #[test]
    fn test_correct_pulls_pose_toward_landmark_evidence() {
        let mut ekf = EkfSlam::new(1);
        // map the landmark at (2, 0) from a well-known pose
        ekf.correct(&[Observation::new(2.0, 0.0, 0)]).unwrap();

        // odometry claims 1 m forward, but the landmark says 0.8 m
        ekf.predict(Twist2D::new(0.0, 1.0, 0.0)).unwrap();
        let before = ekf.get_robot_state().x;
        ekf.correct(&[Observation::new(1.2, 0.0, 0)]).unwrap();
        let after = ekf.get_robot_state().x;

        assert_abs_diff_eq!(before, 1.0, epsilon = 1e-12);
        assert!(after < before);
        assert!(after > 0.75);
        assert!(diag_non_negative(&ekf));
    }

    #[test]
    fn test_closed_loop_converges() {
        let truth = [(2.0, 1.0), (-1.0, 2.5), (0.5, -2.0)];
        let mut ekf = EkfSlam::new(truth.len());
        let twist = Twist2D::new(0.1, 0.1, 0.0);
        let mut true_pose = Transform2D::identity();

        for _ in 0..60 {
            true_pose *= integrate_twist(twist);
            ekf.predict(twist).unwrap();

            let inv = true_pose.inv();
            let obs: Vec<Observation> = truth
                .iter()
                .enumerate()
                .map(|(slot, &(x, y))| {
                    let p = inv.apply_point(crate::common::Point2D::new(x, y));
                    Observation::from_body_point(p.x, p.y, slot)
                })
                .collect();
            ekf.correct(&obs).unwrap();
            assert!(diag_non_negative(&ekf));
        }

        let pose = ekf.get_robot_state();
        assert_abs_diff_eq!(pose.x, true_pose.translation().x, epsilon = 1e-3);
        assert_abs_diff_eq!(pose.y, true_pose.translation().y, epsilon = 1e-3);
        for (slot, &(x, y)) in truth.iter().enumerate() {
            let lm = ekf.get_landmark_pos(slot);
            assert_eq!(lm.uid, Some(slot));
            assert_abs_diff_eq!(lm.x, x, epsilon = 1e-3);
            assert_abs_diff_eq!(lm.y, y, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_association() {
        let mut ekf = EkfSlam::new(3);
        ekf.correct(&[
            Observation::new(2.0, 0.0, 0),
            Observation::new(3.0, PI / 2.0, 1),
        ])
        .unwrap();

        assert_eq!(ekf.associate(2.05, 0.01), Some(0));
        assert_eq!(ekf.associate(2.95, PI / 2.0 - 0.01), Some(1));
        assert_eq!(ekf.associate(10.0, PI), None);
        assert_eq!(ekf.next_free_slot(), Some(2));
    }

    #[test]
    fn test_config_validation() {
        let bad = EkfSlamConfig {
            r: Matrix2::zeros(),
            ..EkfSlamConfig::default()
        };
        assert!(matches!(
            EkfSlam::with_config(bad),
            Err(RoboticsError::InvalidConfiguration(_))
        ));
        let ok = EkfSlam::with_config(EkfSlamConfig::default()).unwrap();
        assert_eq!(ok.max_landmarks(), 20);
        assert_eq!(ok.state_dim(), 43);
    }

    #[test]
    fn test_state_estimator_trait() {
        let mut ekf = EkfSlam::new(1);
        let est: &mut dyn StateEstimator<
            State = RobotState,
            Measurement = [Observation],
            Control = Twist2D,
        > = &mut ekf;
        est.predict(&Twist2D::new(0.0, 0.5, 0.0)).unwrap();
        est.update(&[Observation::new(1.0, 0.0, 0)]).unwrap();
        assert!(est.get_covariance().is_some());
        assert!(est.get_state().x > 0.0);
    }
}
