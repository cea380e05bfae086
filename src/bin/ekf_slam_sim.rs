// EKF SLAM simulation: a differential drive robot circles among cylindrical
// obstacles, fits each visible cylinder from noisy range points and feeds the
// fitted centers to the filter as range-bearing observations.
//
// usage: ekf_slam_sim [--steps N] [--seed S] [--plot out.svg]

use std::env;
use std::process;

use gnuplot::{AxesCommon, Caption, Color, Figure, PointSize, PointSymbol};
use itertools::{iproduct, Itertools};
use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use turtle_slam::common::{Point2D, RobotState, RoboticsError, RoboticsResult, Twist2D};
use turtle_slam::detection::HyperCircleFit;
use turtle_slam::geometry::{normalize_angle, Transform2D};
use turtle_slam::kinematics::{DiffDrive, DiffDriveConfig};
use turtle_slam::slam::{EkfSlam, EkfSlamConfig, Observation};
use turtle_slam::LandmarkFitter;

const DT: f64 = 0.1; // time tick [s]
const SENSOR_RANGE: f64 = 3.5; // [m]
const OBSTACLE_RADIUS: f64 = 0.1; // [m]
const POINTS_PER_CLUSTER: usize = 12;
const RANGE_NOISE: f64 = 0.002; // per scan point [m]
const ENCODER_NOISE: f64 = 0.002; // per wheel sample [rad]

struct Options {
    steps: usize,
    seed: u64,
    plot: Option<String>,
}

fn parse_args() -> RoboticsResult<Options> {
    let mut opts = Options {
        steps: 630,
        seed: 42,
        plot: None,
    };
    let mut args = env::args().skip(1);
    while let Some(flag) = args.next() {
        let mut value = || {
            args.next()
                .ok_or_else(|| RoboticsError::ParseError(format!("missing value for {}", flag)))
        };
        match flag.as_str() {
            "--steps" => {
                opts.steps = value()?
                    .parse()
                    .map_err(|e| RoboticsError::ParseError(format!("--steps: {}", e)))?
            }
            "--seed" => {
                opts.seed = value()?
                    .parse()
                    .map_err(|e| RoboticsError::ParseError(format!("--seed: {}", e)))?
            }
            "--plot" => opts.plot = Some(value()?),
            other => {
                return Err(RoboticsError::ParseError(format!(
                    "unknown argument {:?}",
                    other
                )))
            }
        }
    }
    Ok(opts)
}

fn normal(std_dev: f64) -> RoboticsResult<Normal<f64>> {
    Normal::new(0.0, std_dev)
        .map_err(|e| RoboticsError::InvalidConfiguration(format!("noise model: {}", e)))
}

/// Scan points on the face of a cylinder visible from the robot, in the body frame
fn scan_cluster(
    center_body: Point2D,
    noise: &Normal<f64>,
    rng: &mut StdRng,
) -> Vec<Point2D> {
    // the visible face is centered on the direction back toward the sensor
    let facing = (-center_body.y).atan2(-center_body.x);
    (0..POINTS_PER_CLUSTER)
        .map(|i| {
            let t = i as f64 / (POINTS_PER_CLUSTER - 1) as f64;
            let phi = facing + (t - 0.5) * std::f64::consts::FRAC_PI_2 * 1.5;
            let r = OBSTACLE_RADIUS + noise.sample(rng);
            Point2D::new(center_body.x + r * phi.cos(), center_body.y + r * phi.sin())
        })
        .collect_vec()
}

fn plot(
    path: &str,
    truth: &[(f64, f64)],
    odom: &[(f64, f64)],
    est: &[(f64, f64)],
    obstacles: &[Point2D],
    ekf: &EkfSlam,
) {
    let (true_x, true_y): (Vec<f64>, Vec<f64>) = truth.iter().copied().unzip();
    let (odom_x, odom_y): (Vec<f64>, Vec<f64>) = odom.iter().copied().unzip();
    let (est_x, est_y): (Vec<f64>, Vec<f64>) = est.iter().copied().unzip();
    let (lm_x, lm_y): (Vec<f64>, Vec<f64>) = obstacles.iter().map(|p| (p.x, p.y)).unzip();
    let (est_lm_x, est_lm_y): (Vec<f64>, Vec<f64>) = ekf
        .get_all_landmarks()
        .iter()
        .filter(|lm| lm.is_assigned())
        .map(|lm| (lm.x, lm.y))
        .unzip();

    let mut fig = Figure::new();
    fig.axes2d()
        .set_title("EKF SLAM", &[])
        .set_x_label("x [m]", &[])
        .set_y_label("y [m]", &[])
        .set_aspect_ratio(gnuplot::Fix(1.0))
        .points(&lm_x, &lm_y, &[Caption("True Landmarks"), Color("black"), PointSymbol('*'), PointSize(2.0)])
        .points(&est_lm_x, &est_lm_y, &[Caption("Est. Landmarks"), Color("cyan"), PointSymbol('O'), PointSize(1.5)])
        .lines(&true_x, &true_y, &[Caption("True"), Color("blue")])
        .lines(&odom_x, &odom_y, &[Caption("Odometry"), Color("orange")])
        .lines(&est_x, &est_y, &[Caption("EKF SLAM"), Color("green")]);

    match fig.save_to_svg(path, 640, 480) {
        Ok(()) => info!("plot written to {}", path),
        Err(e) => error!("failed to write plot {}: {:?}", path, e),
    }
}

fn run(opts: Options) -> RoboticsResult<()> {
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let encoder_noise = normal(ENCODER_NOISE)?;
    let range_noise = normal(RANGE_NOISE)?;

    let obstacles = iproduct!(-1..=1, -1..=2)
        .filter(|&(i, j)| (i, j) != (0, 0) && (i, j) != (0, 1))
        .map(|(i, j)| Point2D::new(2.0 * i as f64, 1.5 * j as f64 - 0.5))
        .collect_vec();

    let config = EkfSlamConfig {
        max_landmarks: obstacles.len(),
        ..EkfSlamConfig::default()
    };
    let mut ekf = EkfSlam::with_config(config)?;

    let mut truth = DiffDrive::new(DiffDriveConfig::default())?;
    let mut odometry = DiffDrive::new(DiffDriveConfig::default())?;
    let fitter = HyperCircleFit;

    // unit circle, counter-clockwise
    let command = Twist2D::new(0.1, 0.1, 0.0);
    let rates = truth.compute_ik(command)?;

    let mut h_true = vec![(0.0, 0.0)];
    let mut h_odom = vec![(0.0, 0.0)];
    let mut h_est = vec![(0.0, 0.0)];

    let (mut left, mut right) = (0.0, 0.0);
    for step in 0..opts.steps {
        left += rates.left * DT;
        right += rates.right * DT;
        truth.compute_fk(left, right);

        let twist = odometry.compute_fk(
            left + encoder_noise.sample(&mut rng),
            right + encoder_noise.sample(&mut rng),
        );
        ekf.predict(twist)?;

        let world_to_body = Transform2D::from(truth.state()).inv();
        let mut observed = 0;
        for (k, obstacle) in obstacles.iter().enumerate() {
            let center_body = world_to_body.apply_point(*obstacle);
            let dist = center_body.distance(&Point2D::origin());
            if dist > SENSOR_RANGE {
                continue;
            }

            let cluster = scan_cluster(center_body, &range_noise, &mut rng);
            let circle = match fitter.fit(&cluster) {
                Ok(c) => c,
                Err(e) => {
                    debug!("step {}: cluster for obstacle {} rejected: {}", step, k, e);
                    continue;
                }
            };

            let z = Observation::from_body_point(circle.center.x, circle.center.y, 0);
            let slot = match ekf.associate(z.range, z.bearing) {
                Some(slot) => slot,
                None => match ekf.next_free_slot() {
                    Some(slot) => slot,
                    None => {
                        debug!("step {}: landmark table full", step);
                        continue;
                    }
                },
            };
            // fold in one at a time so a new landmark claims its slot before the next lookup
            ekf.correct(&[Observation { slot, ..z }])?;
            observed += 1;
        }

        let (t, o, e) = (truth.state(), odometry.state(), ekf.get_robot_state());
        h_true.push((t.x, t.y));
        h_odom.push((o.x, o.y));
        h_est.push((e.x, e.y));

        if step % 50 == 0 {
            info!(
                "step {:4}: observed {} landmarks, pose error odom {:.4} ekf {:.4}",
                step,
                observed,
                pose_error(&t, &o),
                pose_error(&t, &e)
            );
        }
    }

    let t = truth.state();
    info!(
        "final pose error: odometry {:.4} m, ekf {:.4} m (heading {:.4} rad)",
        pose_error(&t, &odometry.state()),
        pose_error(&t, &ekf.get_robot_state()),
        normalize_angle(ekf.get_robot_state().theta - t.theta).abs()
    );
    for lm in ekf.get_all_landmarks().iter().filter(|lm| lm.is_assigned()) {
        let nearest = obstacles
            .iter()
            .map(|p| p.distance(&lm.position()))
            .fold(f64::INFINITY, f64::min);
        info!(
            "landmark {} at ({:.3}, {:.3}), {:.4} m from nearest obstacle",
            lm.wire_uid(), lm.x, lm.y, nearest
        );
    }

    if let Some(path) = opts.plot.as_deref() {
        plot(path, &h_true, &h_odom, &h_est, &obstacles, &ekf);
    }
    Ok(())
}

fn pose_error(truth: &RobotState, est: &RobotState) -> f64 {
    (truth.x - est.x).hypot(truth.y - est.y)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let result = parse_args().and_then(run);
    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}
