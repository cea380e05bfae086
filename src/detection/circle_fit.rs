//! Algebraic circle fitting ("Hyper" fit, Al-Sharadqah & Chernov 2009)
//!
//! Fits a circle to an arc of range points without iteration: the circle
//! equation `A(x² + y²) + Bx + Cy + D = 0` is solved as the generalized
//! eigenproblem `M a = η H a`, where `M` is the moment matrix of the
//! centered data and `H` the Hyper normalization constraint.
//!
//! Reference:
//! - A. Al-Sharadqah, N. Chernov, "Error analysis for circle fitting algorithms" (2009)

use log::{debug, trace};
use nalgebra::{DMatrix, Matrix4, SymmetricEigen, Vector4};
use ordered_float::NotNan;

use crate::common::{Circle, LandmarkFitter, Point2D, RoboticsError, RoboticsResult};

/// Minimum cluster size
pub const MIN_POINTS: usize = 3;

/// Relative size below which an eigenvalue of `M` (or the `A` coefficient)
/// is treated as zero
pub const SINGULAR_TOLERANCE: f64 = 1e-12;

/// Working point set for one candidate landmark cluster
#[derive(Debug, Clone, Default)]
pub struct CircleFitter {
    data_points: Vec<Point2D>,
    num_data: usize,
}

impl CircleFitter {
    pub fn new(points: &[Point2D]) -> Self {
        let mut fitter = Self::default();
        fitter.update_data(points);
        fitter
    }

    /// Replace the working set
    pub fn update_data(&mut self, points: &[Point2D]) {
        self.data_points.clear();
        self.data_points.extend_from_slice(points);
        self.num_data = self.data_points.len();
    }

    pub fn get_data_points(&self) -> &[Point2D] {
        &self.data_points
    }

    pub fn len(&self) -> usize {
        self.num_data
    }

    pub fn is_empty(&self) -> bool {
        self.num_data == 0
    }

    /// NaN for an empty set
    pub fn compute_x_mean(&self) -> f64 {
        self.data_points.iter().map(|p| p.x).sum::<f64>() / self.num_data as f64
    }

    /// NaN for an empty set
    pub fn compute_y_mean(&self) -> f64 {
        self.data_points.iter().map(|p| p.y).sum::<f64>() / self.num_data as f64
    }

    /// Mean of `x² + y²` over the current (normally centered) points
    pub fn compute_z_mean(&self) -> f64 {
        self.data_points
            .iter()
            .map(|p| p.x * p.x + p.y * p.y)
            .sum::<f64>()
            / self.num_data as f64
    }

    /// Subtract `(x_mean, y_mean)` from every point. Not idempotent.
    pub fn shift_coordinate(&mut self, x_mean: f64, y_mean: f64) {
        for p in &mut self.data_points {
            p.x -= x_mean;
            p.y -= y_mean;
        }
    }

    /// `n x 4` data matrix with rows `[x² + y², x, y, 1]`
    pub fn construct_z_mat(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.num_data, 4, |i, j| {
            let p = self.data_points[i];
            match j {
                0 => p.x * p.x + p.y * p.y,
                1 => p.x,
                2 => p.y,
                _ => 1.0,
            }
        })
    }

    /// Moment matrix `M = Zᵀ Z / n`
    pub fn compute_m_mat(&self, z_mat: &DMatrix<f64>) -> Matrix4<f64> {
        let m = z_mat.transpose() * z_mat / self.num_data as f64;
        Matrix4::from_fn(|i, j| m[(i, j)])
    }

    /// Hyper constraint matrix for the given mean of `z`
    #[rustfmt::skip]
    pub fn compute_h_mat(z_mean: f64) -> Matrix4<f64> {
        Matrix4::new(
            8.0 * z_mean, 0.0, 0.0, 2.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
            2.0, 0.0, 0.0, 0.0,
        )
    }

    /// Fit a circle to the current working set.
    ///
    /// Works on a centered copy, so the stored points are left as they are.
    pub fn fit(&self) -> RoboticsResult<Circle> {
        if self.num_data < MIN_POINTS {
            return Err(RoboticsError::DegenerateFit(format!(
                "need at least {} points, got {}",
                MIN_POINTS, self.num_data
            )));
        }

        let x_mean = self.compute_x_mean();
        let y_mean = self.compute_y_mean();

        let mut centered = self.clone();
        centered.shift_coordinate(x_mean, y_mean);

        let z_mean = centered.compute_z_mean();
        if !(z_mean > 0.0) {
            return Err(RoboticsError::DegenerateFit(
                "all points coincide".to_string(),
            ));
        }

        let z_mat = centered.construct_z_mat();
        let m = centered.compute_m_mat(&z_mat);
        let h = Self::compute_h_mat(z_mean);

        let coeffs = solve_hyper(&m, &h)?;
        let circle = recover_circle(&coeffs, x_mean, y_mean)?;

        trace!("circle fit coefficients: {:?}", coeffs.as_slice());
        debug!(
            "fitted circle center={} radius={:.6} from {} points",
            circle.center, circle.radius, self.num_data
        );
        Ok(circle)
    }
}

/// Stateless fitter for callers that only need the result
#[derive(Debug, Clone, Copy, Default)]
pub struct HyperCircleFit;

impl LandmarkFitter for HyperCircleFit {
    fn fit(&self, points: &[Point2D]) -> RoboticsResult<Circle> {
        fit_circle(points)
    }
}

/// Fit a circle to a pre-clustered arc of points
pub fn fit_circle(points: &[Point2D]) -> RoboticsResult<Circle> {
    CircleFitter::new(points).fit()
}

/// Solve `M a = η H a` for the smallest positive `η`.
///
/// With `Y = M^{1/2}` and `b = Y a` the problem becomes the symmetric
/// `Y H⁻¹ Y b = η b`. When `M` is singular the data lie exactly on a
/// circle (or line) and its null vector is the answer.
fn solve_hyper(m: &Matrix4<f64>, h: &Matrix4<f64>) -> RoboticsResult<Vector4<f64>> {
    let eig = SymmetricEigen::new(*m);
    let mut order: Vec<usize> = (0..4).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));

    let largest = eig.eigenvalues[order[3]];
    if !(largest > 0.0) {
        return Err(RoboticsError::DegenerateFit(
            "moment matrix is zero".to_string(),
        ));
    }
    let tol = SINGULAR_TOLERANCE * largest;

    let smallest = eig.eigenvalues[order[0]];
    if smallest < tol {
        if eig.eigenvalues[order[1]] < tol {
            return Err(RoboticsError::DegenerateFit(
                "moment matrix is rank deficient by more than one".to_string(),
            ));
        }
        // exact fit
        return Ok(eig.eigenvectors.column(order[0]).into_owned());
    }

    let sqrt_diag = Matrix4::from_diagonal(&eig.eigenvalues.map(f64::sqrt));
    let inv_sqrt_diag = Matrix4::from_diagonal(&eig.eigenvalues.map(|v| 1.0 / v.sqrt()));
    let y = eig.eigenvectors * sqrt_diag * eig.eigenvectors.transpose();
    let y_inv = eig.eigenvectors * inv_sqrt_diag * eig.eigenvectors.transpose();

    let h_inv = h.try_inverse().ok_or_else(|| {
        RoboticsError::NumericalError("constraint matrix is singular".to_string())
    })?;

    let q = y * h_inv * y;
    let q = (q + q.transpose()) * 0.5;
    let q_eig = SymmetricEigen::new(q);

    let (_, best) = (0..4)
        .filter_map(|i| {
            NotNan::new(q_eig.eigenvalues[i])
                .ok()
                .filter(|eta| eta.into_inner() > 0.0)
                .map(|eta| (eta, i))
        })
        .min()
        .ok_or_else(|| {
            RoboticsError::DegenerateFit("no positive generalized eigenvalue".to_string())
        })?;

    Ok(y_inv * q_eig.eigenvectors.column(best))
}

/// Center and radius from `[A, B, C, D]` in centered coordinates
fn recover_circle(coeffs: &Vector4<f64>, x_mean: f64, y_mean: f64) -> RoboticsResult<Circle> {
    let (a, b, c, d) = (coeffs[0], coeffs[1], coeffs[2], coeffs[3]);

    if a.abs() <= SINGULAR_TOLERANCE * coeffs.norm() {
        return Err(RoboticsError::DegenerateFit(
            "points are collinear".to_string(),
        ));
    }

    let radius_sq = (b * b + c * c - 4.0 * a * d) / (4.0 * a * a);
    if !(radius_sq.is_finite() && radius_sq > 0.0) {
        return Err(RoboticsError::DegenerateFit(format!(
            "non-positive squared radius {}",
            radius_sq
        )));
    }

    Ok(Circle::new(
        Point2D::new(-b / (2.0 * a) + x_mean, -c / (2.0 * a) + y_mean),
        radius_sq.sqrt(),
    ))
}
