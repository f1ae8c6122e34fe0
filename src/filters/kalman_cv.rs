//! Constant-velocity Kalman filter over a local tangent plane.
//!
//! State is `[x, y, vx, vy]` (meters east/north of the origin, m/s). Process noise is
//! white acceleration, anisotropic (forward vs lateral), rotated into x/y by the current
//! heading and scaled by hull length and recent top speed. Only position is measured.
//!
//! Heading is kept beside the state vector rather than in it. Every rotation of heading
//! goes through [`KalmanCv::apply_heading_delta`], which turns the velocity sub-vector
//! and its covariance by the same angle.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::angles::{normalize_angle_rad, shortest_delta_rad};
use crate::config::KalmanTuning;
use crate::geodesy::{to_geo, to_local};
use crate::types::{
    cv_transition, gps_position_jacobian, velocity_rotation, GeoPoint, GpsFix, GpsPosNoise,
    GpsPosVec, KalmanGainGpsPos, LocalPoint, PlanarCov, StateMat4, StateVec4, Velocity,
};
use crate::velocity::{heading_from_velocity, velocity_from_course};

const MS_TO_KNOTS: f64 = 1.943844;

/// Fused estimate returned by every predict/update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KalmanOutput {
    pub timestamp: f64,
    pub position: GeoPoint,
    /// Clamped accuracy of the last applied fix (meters).
    pub accuracy_m: f64,
    pub velocity: Velocity,
    pub speed: f64,
    pub heading_rad: f64,
}

/// Symmetric 2×2 position covariance (m²).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionCovariance {
    pub xx: f64,
    pub xy: f64,
    pub yy: f64,
}

impl PositionCovariance {
    fn from_block(p: &StateMat4) -> Option<Self> {
        let cov = Self {
            xx: p[(0, 0)],
            xy: (p[(0, 1)] + p[(1, 0)]) / 2.0,
            yy: p[(1, 1)],
        };
        (cov.xx.is_finite() && cov.xy.is_finite() && cov.yy.is_finite()).then_some(cov)
    }

    pub fn trace(&self) -> f64 {
        self.xx + self.yy
    }
}

/// What the GPS update did to the heading.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HeadingCorrection {
    None,
    /// Heading replaced by the velocity-derived heading.
    Snapped { heading_rad: f64 },
    /// Partial pull towards the velocity-derived heading.
    Blended { delta_rad: f64 },
}

#[derive(Clone, Debug)]
pub struct UpdateOutcome {
    pub output: KalmanOutput,
    /// False when the innovation covariance was singular and only the prediction was kept.
    pub measurement_applied: bool,
    pub heading: HeadingCorrection,
}

/// Forward/lateral process noise, already rotated into x/y.
struct NoiseModel {
    pos: PlanarCov,
    vel: PlanarCov,
}

pub struct KalmanCv {
    tuning: KalmanTuning,
    hull_length_m: f64,
    origin: GeoPoint,
    last_timestamp: f64,
    heading_rad: f64,
    has_heading: bool,
    imu_heading_active: bool,
    accuracy: f64,
    x: StateVec4,
    p: StateMat4,
    speed_history: VecDeque<(f64, f64)>,
}

impl KalmanCv {
    /// Anchor a new filter at `fix`. Returns `None` when the fix has no usable position.
    pub fn new(fix: &GpsFix, tuning: KalmanTuning, hull_length_m: f64) -> Option<Self> {
        if !fix.has_valid_position() {
            return None;
        }

        let accuracy = clamp_accuracy(fix.accuracy, &tuning);
        let (vx, vy) = match fix.reported_course() {
            Some((speed, course)) => {
                let v = velocity_from_course(speed, course);
                (v.vx, v.vy)
            }
            None => (0.0, 0.0),
        };
        let initial_heading = heading_from_velocity(vx, vy);

        let pos_var = accuracy * accuracy;
        let vel_var = tuning.initial_velocity_variance;
        let p = StateMat4::from_diagonal(&StateVec4::new(pos_var, pos_var, vel_var, vel_var));

        log::debug!(
            "Kalman init at ({:.6}, {:.6}), accuracy {:.1} m, v=({:.2}, {:.2})",
            fix.latitude,
            fix.longitude,
            accuracy,
            vx,
            vy
        );

        Some(Self {
            tuning,
            hull_length_m,
            origin: fix.point(),
            last_timestamp: if fix.timestamp.is_finite() { fix.timestamp } else { 0.0 },
            heading_rad: initial_heading.unwrap_or(0.0),
            has_heading: initial_heading.is_some(),
            imu_heading_active: false,
            accuracy,
            x: StateVec4::new(0.0, 0.0, vx, vy),
            p,
            speed_history: VecDeque::new(),
        })
    }

    // ===== Accessors =====

    pub fn origin(&self) -> GeoPoint {
        self.origin
    }

    pub fn last_timestamp(&self) -> f64 {
        self.last_timestamp
    }

    pub fn heading_rad(&self) -> f64 {
        self.heading_rad
    }

    pub fn state(&self) -> &StateVec4 {
        &self.x
    }

    pub fn covariance(&self) -> &StateMat4 {
        &self.p
    }

    pub fn local_position(&self) -> LocalPoint {
        LocalPoint::new(self.x[0], self.x[1])
    }

    pub fn velocity(&self) -> Velocity {
        Velocity::new(self.x[2], self.x[3])
    }

    pub fn speed(&self) -> f64 {
        self.x[2].hypot(self.x[3])
    }

    pub fn set_imu_heading_active(&mut self, active: bool) {
        self.imu_heading_active = active;
    }

    pub fn set_hull_length(&mut self, hull_length_m: f64) {
        self.hull_length_m = hull_length_m;
    }

    pub fn output(&self) -> KalmanOutput {
        let position = to_geo(self.local_position(), self.origin);
        KalmanOutput {
            timestamp: self.last_timestamp,
            position,
            accuracy_m: self.accuracy,
            velocity: self.velocity(),
            speed: self.speed(),
            heading_rad: self.heading_rad,
        }
    }

    // ===== Predict / update =====

    /// Advance the state to `target_timestamp`. Earlier or equal timestamps are a no-op.
    pub fn predict(&mut self, target_timestamp: f64) -> KalmanOutput {
        let timestamp = self.not_before_now(target_timestamp);
        let dt = self.clamp_dt(timestamp - self.last_timestamp);
        if dt <= 0.0 {
            return self.output();
        }

        let noise = self.noise_model();
        let (x, p) = propagate(&self.x, &self.p, dt, &noise);
        self.x = x;
        self.p = p;
        self.last_timestamp = timestamp;
        self.output()
    }

    /// Predict to the fix time, then correct with the fix position.
    ///
    /// Returns `None` when the fix has no usable position; the state is left untouched.
    pub fn update(&mut self, fix: &GpsFix) -> Option<UpdateOutcome> {
        if !fix.has_valid_position() {
            return None;
        }

        let timestamp = self.not_before_now(fix.timestamp);
        let dt = self.clamp_dt(timestamp - self.last_timestamp);
        self.last_timestamp = timestamp;
        let (x_pred, p_pred) = if dt > 0.0 {
            let noise = self.noise_model();
            propagate(&self.x, &self.p, dt, &noise)
        } else {
            (self.x, self.p)
        };

        let z = to_local(fix.point(), self.origin);
        let accuracy = clamp_accuracy(fix.accuracy, &self.tuning);
        self.accuracy = accuracy;
        let r = accuracy * accuracy;

        let h = gps_position_jacobian();
        let s: GpsPosNoise = p_pred.fixed_view::<2, 2>(0, 0).into_owned() + GpsPosNoise::identity() * r;

        let measurement_applied = match invert_2x2(&s) {
            Some(s_inv) => {
                let k: KalmanGainGpsPos = p_pred * h.transpose() * s_inv;
                let innovation = GpsPosVec::new(z.x, z.y) - h * x_pred;
                self.x = x_pred + k * innovation;
                self.p = p_pred - k * (h * p_pred);
                true
            }
            None => {
                log::debug!("Singular innovation covariance at t={timestamp:.3}, keeping prediction");
                self.x = x_pred;
                self.p = p_pred;
                false
            }
        };

        let history_speed = fix
            .reported_course()
            .map(|(speed, _)| speed)
            .unwrap_or_else(|| self.speed());
        self.record_speed(timestamp, history_speed);

        let heading = self.correct_heading_from_velocity();

        Some(UpdateOutcome {
            output: self.output(),
            measurement_applied,
            heading,
        })
    }

    /// Rotate heading, velocity and velocity covariance together by `delta_rad`.
    pub fn apply_heading_delta(&mut self, delta_rad: f64) {
        if !delta_rad.is_finite() || delta_rad == 0.0 {
            return;
        }
        if !self.heading_rad.is_finite() {
            self.heading_rad = heading_from_velocity(self.x[2], self.x[3]).unwrap_or(0.0);
        }
        self.heading_rad = normalize_angle_rad(self.heading_rad + delta_rad);
        self.has_heading = true;

        let t = velocity_rotation(delta_rad);
        self.x = t * self.x;
        self.p = t * self.p * t.transpose();
    }

    /// Integrate a yaw rate over `dt_secs` straight into heading.
    pub fn apply_imu_yaw_rate(&mut self, yaw_rate_rad: f64, dt_secs: f64) {
        if !yaw_rate_rad.is_finite() || !dt_secs.is_finite() || dt_secs <= 0.0 {
            return;
        }
        self.apply_heading_delta(yaw_rate_rad * dt_secs);
    }

    fn correct_heading_from_velocity(&mut self) -> HeadingCorrection {
        let speed = self.speed();
        if !speed.is_finite() || speed < self.tuning.gps_heading_min_speed {
            return HeadingCorrection::None;
        }
        let Some(gps_heading) = heading_from_velocity(self.x[2], self.x[3]) else {
            return HeadingCorrection::None;
        };

        if !self.imu_heading_active || !self.has_heading || !self.heading_rad.is_finite() {
            self.heading_rad = gps_heading;
            self.has_heading = true;
            log::debug!("Heading snapped to GPS {:.1}°", gps_heading.to_degrees());
            return HeadingCorrection::Snapped { heading_rad: gps_heading };
        }

        let gps_blend = (1.0 - self.tuning.heading_imu_weight).clamp(0.0, 1.0);
        if gps_blend <= 0.0 {
            return HeadingCorrection::None;
        }
        let delta_rad = shortest_delta_rad(gps_heading, self.heading_rad) * gps_blend;
        self.apply_heading_delta(delta_rad);
        log::debug!("Heading blended towards GPS by {:.2}°", delta_rad.to_degrees());
        HeadingCorrection::Blended { delta_rad }
    }

    // ===== Diagnostics =====

    /// Position block of P, symmetrized.
    pub fn position_covariance(&self) -> Option<PositionCovariance> {
        PositionCovariance::from_block(&self.p)
    }

    /// Position block of the process noise for one step of `dt_secs` (1 s when not positive).
    pub fn process_position_covariance(&self, dt_secs: f64) -> PositionCovariance {
        let dt = if dt_secs.is_finite() && dt_secs > 0.0 { dt_secs } else { 1.0 };
        let q_base = self.base_acceleration_variance();
        let pos = directional_covariance(
            q_base,
            q_base * self.tuning.lateral_variance_ratio,
            self.covariance_heading(),
        );
        let dt4 = dt * dt * dt * dt;
        PositionCovariance {
            xx: pos[(0, 0)] * dt4 / 4.0,
            xy: pos[(0, 1)] * dt4 / 4.0,
            yy: pos[(1, 1)] * dt4 / 4.0,
        }
    }

    /// Position covariance projected `seconds` ahead without touching the filter.
    pub fn predicted_position_covariance(&self, seconds: f64) -> Option<PositionCovariance> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return self.position_covariance();
        }
        let step = if self.tuning.covariance_predict_step_secs > 0.0 {
            self.tuning.covariance_predict_step_secs
        } else {
            seconds
        };

        let noise = self.noise_model();
        let mut p = self.p;
        let mut remaining = seconds;
        while remaining > 0.0 {
            let dt = step.min(remaining);
            remaining -= dt;
            let f = cv_transition(dt);
            p = f * p * f.transpose() + process_noise(dt, &noise);
        }
        PositionCovariance::from_block(&p)
    }

    // ===== Process noise =====

    /// Acceleration variance shrunk with the square of hull length beyond the baseline.
    fn base_acceleration_variance(&self) -> f64 {
        let base_length = self.tuning.base_hull_length_m;
        let hull = if self.hull_length_m.is_finite() { self.hull_length_m } else { 0.0 };
        let ratio = base_length / base_length.max(hull);
        self.tuning.base_acceleration_variance * ratio * ratio
    }

    fn recent_max_speed(&self) -> Option<f64> {
        let max = self
            .speed_history
            .iter()
            .map(|&(_, speed)| speed)
            .filter(|speed| speed.is_finite())
            .fold(0.0_f64, f64::max);
        (max > 0.0).then_some(max)
    }

    fn speed_scale(&self) -> f64 {
        let source = self.recent_max_speed().unwrap_or_else(|| self.speed());
        let knots = if source.is_finite() { source * MS_TO_KNOTS } else { 0.0 };
        knots.max(self.tuning.speed_scale_min_knots) / self.tuning.speed_scale_anchor_knots
    }

    /// Velocity heading when moving, stored heading otherwise.
    fn covariance_heading(&self) -> f64 {
        heading_from_velocity(self.x[2], self.x[3]).unwrap_or(if self.heading_rad.is_finite() {
            self.heading_rad
        } else {
            0.0
        })
    }

    fn noise_model(&self) -> NoiseModel {
        let q_base = self.base_acceleration_variance();
        let lateral_ratio = self.tuning.lateral_variance_ratio;
        let q_vel_forward = q_base * self.speed_scale();
        let heading = self.covariance_heading();
        NoiseModel {
            pos: directional_covariance(q_base, q_base * lateral_ratio, heading),
            vel: directional_covariance(q_vel_forward, q_vel_forward * lateral_ratio, heading),
        }
    }

    fn record_speed(&mut self, timestamp: f64, speed: f64) {
        if speed.is_finite() {
            self.speed_history.push_back((timestamp, speed));
        }
        let cutoff = timestamp - self.tuning.speed_history_window_secs;
        while self
            .speed_history
            .front()
            .is_some_and(|&(ts, _)| ts < cutoff)
        {
            self.speed_history.pop_front();
        }
    }

    // ===== Timing =====

    fn not_before_now(&self, timestamp: f64) -> f64 {
        if timestamp.is_finite() {
            timestamp.max(self.last_timestamp)
        } else {
            self.last_timestamp
        }
    }

    fn clamp_dt(&self, dt_raw: f64) -> f64 {
        if !dt_raw.is_finite() || dt_raw <= 0.0 {
            return 0.0;
        }
        dt_raw.min(self.tuning.max_dt_secs)
    }
}

fn clamp_accuracy(accuracy: f64, tuning: &KalmanTuning) -> f64 {
    let accuracy = if accuracy.is_finite() && accuracy > 0.0 {
        accuracy
    } else {
        tuning.accuracy_default_m
    };
    // Never panics, even with inverted bounds.
    accuracy.max(tuning.accuracy_min_m).min(tuning.accuracy_max_m)
}

/// Rotate a (forward, lateral) diagonal variance into the east/north frame.
fn directional_covariance(forward: f64, lateral: f64, heading_rad: f64) -> PlanarCov {
    let heading = if heading_rad.is_finite() { heading_rad } else { 0.0 };
    let (sin, cos) = heading.sin_cos();
    let (fx, fy) = (sin, cos);
    let (lx, ly) = (cos, -sin);
    let xx = forward * fx * fx + lateral * lx * lx;
    let xy = forward * fx * fy + lateral * lx * ly;
    let yy = forward * fy * fy + lateral * ly * ly;
    PlanarCov::new(xx, xy, xy, yy)
}

/// Discrete white-acceleration Q for the CV model.
fn process_noise(dt: f64, noise: &NoiseModel) -> StateMat4 {
    let dt2 = dt * dt;
    let dt3 = dt2 * dt;
    let dt4 = dt2 * dt2;

    let mut q = StateMat4::zeros();
    q.fixed_view_mut::<2, 2>(0, 0).copy_from(&(noise.pos * (dt4 / 4.0)));
    q.fixed_view_mut::<2, 2>(0, 2).copy_from(&(noise.vel * (dt3 / 2.0)));
    q.fixed_view_mut::<2, 2>(2, 0).copy_from(&(noise.vel * (dt3 / 2.0)));
    q.fixed_view_mut::<2, 2>(2, 2).copy_from(&(noise.vel * dt2));
    q
}

fn propagate(x: &StateVec4, p: &StateMat4, dt: f64, noise: &NoiseModel) -> (StateVec4, StateMat4) {
    let f = cv_transition(dt);
    let x_pred = f * x;
    let p_pred = f * p * f.transpose() + process_noise(dt, noise);
    (x_pred, p_pred)
}

/// Closed-form 2×2 inverse; `None` when the determinant is zero or not finite.
fn invert_2x2(s: &GpsPosNoise) -> Option<GpsPosNoise> {
    let det = s[(0, 0)] * s[(1, 1)] - s[(0, 1)] * s[(1, 0)];
    if !det.is_finite() || det == 0.0 {
        return None;
    }
    Some(GpsPosNoise::new(
        s[(1, 1)] / det,
        -s[(0, 1)] / det,
        -s[(1, 0)] / det,
        s[(0, 0)] / det,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_2;

    fn origin() -> GeoPoint {
        GeoPoint::new(47.6, -122.3)
    }

    fn fix_at(x: f64, y: f64, timestamp: f64, accuracy: f64) -> GpsFix {
        let p = to_geo(LocalPoint::new(x, y), origin());
        GpsFix {
            timestamp,
            latitude: p.lat,
            longitude: p.lon,
            accuracy,
            speed: None,
            course_deg: None,
        }
    }

    fn moving_north() -> KalmanCv {
        let mut fix = fix_at(0.0, 0.0, 0.0, 10.0);
        fix.speed = Some(5.0);
        fix.course_deg = Some(0.0);
        KalmanCv::new(&fix, KalmanTuning::default(), 0.0).unwrap()
    }

    fn assert_symmetric(p: &StateMat4) {
        for r in 0..4 {
            for c in 0..4 {
                assert_abs_diff_eq!(p[(r, c)], p[(c, r)], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_initialization_from_reported_course() {
        let kf = moving_north();
        assert_abs_diff_eq!(kf.state()[3], 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(kf.heading_rad(), 0.0, epsilon = 1e-12);
        assert_eq!(kf.covariance()[(0, 0)], 100.0);
        assert_eq!(kf.covariance()[(2, 2)], 25.0);
        assert_eq!(kf.covariance()[(0, 2)], 0.0);
    }

    #[test]
    fn test_initialization_rejects_nan_fix() {
        let mut fix = fix_at(0.0, 0.0, 0.0, 10.0);
        fix.latitude = f64::NAN;
        assert!(KalmanCv::new(&fix, KalmanTuning::default(), 0.0).is_none());
    }

    #[test]
    fn test_accuracy_clamped() {
        let tuning = KalmanTuning::default();
        assert_eq!(clamp_accuracy(0.5, &tuning), 3.0);
        assert_eq!(clamp_accuracy(500.0, &tuning), 50.0);
        assert_eq!(clamp_accuracy(0.0, &tuning), 10.0);
        assert_eq!(clamp_accuracy(f64::NAN, &tuning), 10.0);
    }

    #[test]
    fn test_inverted_accuracy_bounds_do_not_panic() {
        let tuning = KalmanTuning { accuracy_min_m: 60.0, ..KalmanTuning::default() };
        assert_eq!(clamp_accuracy(10.0, &tuning), 50.0);
        let fix = fix_at(0.0, 0.0, 0.0, 10.0);
        let mut kf = KalmanCv::new(&fix, tuning, 0.0).unwrap();
        assert!(kf.update(&fix_at(0.0, 5.0, 1.0, 10.0)).unwrap().measurement_applied);
    }

    #[test]
    fn test_predict_moves_along_velocity() {
        let mut kf = moving_north();
        kf.predict(2.0);
        assert_abs_diff_eq!(kf.local_position().y, 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(kf.local_position().x, 0.0, epsilon = 1e-9);
        assert!(kf.covariance()[(1, 1)] > 100.0);
    }

    #[test]
    fn test_predict_same_timestamp_is_noop() {
        let mut kf = moving_north();
        let first = kf.predict(1.5);
        let x = *kf.state();
        let p = *kf.covariance();
        let second = kf.predict(1.5);
        assert_eq!(first, second);
        assert_eq!(*kf.state(), x);
        assert_eq!(*kf.covariance(), p);

        // Going backwards is also a no-op.
        kf.predict(0.5);
        assert_eq!(*kf.state(), x);
        assert_eq!(kf.last_timestamp(), 1.5);
    }

    #[test]
    fn test_predict_dt_clamped() {
        let mut kf = moving_north();
        kf.predict(100.0);
        // Only max_dt_secs (5 s) of motion is integrated.
        assert_abs_diff_eq!(kf.local_position().y, 25.0, epsilon = 1e-9);
        assert_eq!(kf.last_timestamp(), 100.0);
    }

    #[test]
    fn test_heavier_hull_gets_less_process_noise() {
        let light = moving_north();
        let mut heavy = moving_north();
        heavy.set_hull_length(12.0);
        let q_light = light.process_position_covariance(1.0);
        let q_heavy = heavy.process_position_covariance(1.0);
        assert_abs_diff_eq!(q_heavy.trace() * 16.0, q_light.trace(), epsilon = 1e-12);
    }

    #[test]
    fn test_process_noise_anisotropic_along_heading() {
        let kf = moving_north();
        let q = kf.process_position_covariance(2.0);
        // Heading north: forward variance on y, lateral on x.
        assert_abs_diff_eq!(q.yy, 0.8 * 16.0 / 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q.xx, 0.8 * 0.25 * 16.0 / 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q.xy, 0.0, epsilon = 1e-12);

        // Non-positive dt falls back to one second.
        let q1 = kf.process_position_covariance(-3.0);
        assert_abs_diff_eq!(q1.yy, 0.8 / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_speed_scale_uses_recent_max_speed() {
        let mut kf = moving_north();
        let mut fix = fix_at(0.0, 5.0, 1.0, 10.0);
        fix.speed = Some(8.0);
        fix.course_deg = Some(0.0);
        kf.update(&fix);
        assert_abs_diff_eq!(kf.speed_scale(), 8.0 * MS_TO_KNOTS / 3.0, epsilon = 1e-9);

        // Old samples fall out of the window.
        let mut later = fix_at(0.0, 60.0, 12.0, 10.0);
        later.speed = Some(4.0);
        later.course_deg = Some(0.0);
        kf.update(&later);
        assert_abs_diff_eq!(kf.speed_scale(), 4.0 * MS_TO_KNOTS / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_update_pulls_towards_measurement() {
        let mut kf = moving_north();
        let outcome = kf.update(&fix_at(20.0, 5.0, 1.0, 5.0)).unwrap();
        assert!(outcome.measurement_applied);
        let pos = kf.local_position();
        assert!(pos.x > 0.0 && pos.x < 20.0);
        assert!(kf.covariance()[(0, 0)] < 100.0);
    }

    #[test]
    fn test_update_rejects_nan_fix() {
        let mut kf = moving_north();
        let x = *kf.state();
        let mut fix = fix_at(0.0, 5.0, 1.0, 10.0);
        fix.longitude = f64::NAN;
        assert!(kf.update(&fix).is_none());
        assert_eq!(*kf.state(), x);
        assert_eq!(kf.last_timestamp(), 0.0);
    }

    #[test]
    fn test_out_of_order_fix_skips_prediction() {
        let mut kf = moving_north();
        kf.update(&fix_at(0.0, 50.0, 10.0, 10.0));
        let before = *kf.state();
        let outcome = kf.update(&fix_at(0.0, before[1], 5.0, 10.0)).unwrap();
        assert_eq!(kf.last_timestamp(), 10.0);
        assert_eq!(outcome.output.timestamp, 10.0);
        assert!(outcome.measurement_applied);
        // Measurement sits on the prior: nothing moves.
        assert_abs_diff_eq!(kf.state()[1], before[1], epsilon = 1e-6);
    }

    #[test]
    fn test_singular_update_keeps_prediction() {
        let mut kf = moving_north();
        let r = 3.0 * 3.0;
        kf.p[(0, 0)] = -r;
        kf.p[(1, 1)] = -r;
        let x = *kf.state();
        let p = *kf.covariance();
        let outcome = kf.update(&fix_at(30.0, -30.0, 0.0, 3.0)).unwrap();
        assert!(!outcome.measurement_applied);
        assert_eq!(*kf.state(), x);
        assert_eq!(*kf.covariance(), p);
    }

    #[test]
    fn test_covariance_stays_symmetric() {
        let mut kf = moving_north();
        for step in 1..=40 {
            let t = step as f64;
            let wobble = (t * 0.7).sin() * 3.0;
            kf.predict(t - 0.5);
            kf.apply_heading_delta(0.02 * (t * 0.3).cos());
            kf.update(&fix_at(wobble + t * 0.5, 5.0 * t, t, 8.0));
            assert_symmetric(kf.covariance());
        }
    }

    #[test]
    fn test_heading_delta_keeps_velocity_in_lockstep() {
        let mut kf = moving_north();
        for &delta in &[0.3, -1.2, 2.5, FRAC_PI_2, -3.0] {
            kf.apply_heading_delta(delta);
            let v = kf.velocity();
            let velocity_heading = v.vx.atan2(v.vy);
            assert_abs_diff_eq!(
                shortest_delta_rad(velocity_heading, kf.heading_rad()),
                0.0,
                epsilon = 1e-9
            );
            assert_abs_diff_eq!(kf.speed(), 5.0, epsilon = 1e-9);
        }
        assert_symmetric(kf.covariance());
    }

    #[test]
    fn test_heading_delta_rotates_covariance() {
        let mut kf = moving_north();
        kf.p[(2, 2)] = 4.0;
        kf.p[(3, 3)] = 1.0;
        kf.apply_heading_delta(FRAC_PI_2);
        assert_abs_diff_eq!(kf.covariance()[(2, 2)], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(kf.covariance()[(3, 3)], 4.0, epsilon = 1e-9);
        // Position block untouched.
        assert_eq!(kf.covariance()[(0, 0)], 100.0);
    }

    #[test]
    fn test_imu_yaw_rate_integrates() {
        let mut kf = moving_north();
        kf.apply_imu_yaw_rate(0.5, 0.2);
        assert_abs_diff_eq!(kf.heading_rad(), 0.1, epsilon = 1e-12);
        kf.apply_imu_yaw_rate(0.5, -1.0);
        kf.apply_imu_yaw_rate(f64::NAN, 1.0);
        assert_abs_diff_eq!(kf.heading_rad(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_gps_heading_snaps_without_imu() {
        let mut kf = moving_north();
        kf.heading_rad = 0.3;
        let outcome = kf.update(&fix_at(0.0, 5.0, 1.0, 10.0)).unwrap();
        assert!(matches!(outcome.heading, HeadingCorrection::Snapped { .. }));
        assert_abs_diff_eq!(kf.heading_rad(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_gps_heading_blends_with_imu() {
        let mut kf = moving_north();
        kf.set_imu_heading_active(true);
        kf.heading_rad = 0.3;
        // Fix exactly on the predicted track: velocity stays due north.
        let outcome = kf.update(&fix_at(0.0, 5.0, 1.0, 10.0)).unwrap();
        match outcome.heading {
            HeadingCorrection::Blended { delta_rad } => {
                assert_abs_diff_eq!(delta_rad, -0.3 * 0.2, epsilon = 1e-9)
            }
            other => panic!("expected blend, got {other:?}"),
        }
        assert_abs_diff_eq!(kf.heading_rad(), 0.24, epsilon = 1e-9);
        assert_abs_diff_eq!(kf.speed(), 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_slow_boat_keeps_heading() {
        let mut fix = fix_at(0.0, 0.0, 0.0, 10.0);
        fix.speed = Some(0.1);
        fix.course_deg = Some(90.0);
        let mut kf = KalmanCv::new(&fix, KalmanTuning::default(), 0.0).unwrap();
        let outcome = kf.update(&fix_at(0.1, 0.0, 1.0, 10.0)).unwrap();
        assert_eq!(outcome.heading, HeadingCorrection::None);
        assert_abs_diff_eq!(kf.heading_rad(), FRAC_PI_2, epsilon = 1e-9);
    }

    #[test]
    fn test_predicted_position_covariance_does_not_mutate() {
        let kf = moving_north();
        let now = kf.position_covariance().unwrap();
        let ahead = kf.predicted_position_covariance(3.0).unwrap();
        assert!(ahead.trace() > now.trace());
        assert_eq!(kf.position_covariance().unwrap(), now);
        assert_eq!(kf.predicted_position_covariance(0.0).unwrap(), now);
    }

    #[test]
    fn test_straight_line_converges() {
        let mut fix = fix_at(0.0, 0.0, 0.0, 10.0);
        let mut kf = KalmanCv::new(&fix, KalmanTuning::default(), 0.0).unwrap();
        kf.update(&fix);
        for second in 1..=60 {
            fix = fix_at(0.0, 5.0 * second as f64, second as f64, 10.0);
            kf.update(&fix);
        }
        assert_abs_diff_eq!(kf.speed(), 5.0, epsilon = 0.5);
        assert_abs_diff_eq!(kf.heading_rad(), 0.0, epsilon = 5f64.to_radians());
    }
}
