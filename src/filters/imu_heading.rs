//! Inertial heading propagation.
//!
//! A low-passed gravity vector gives the true vertical in the device frame. The mapped
//! angular rate projected onto it is the yaw rate regardless of how the phone is tilted.
//! Yaw rate × dt accumulates into a pending delta that the caller drains on each
//! Kalman predict tick.

use nalgebra::Vector3;

use crate::calibration::AxisMapping;
use crate::config::ImuTuning;
use crate::types::{ImuSample, RotationRate};

/// Low-pass alpha for the gravity estimate: heavier hulls move slower, so filter harder.
pub fn gravity_alpha(hull_length_m: f64, tuning: &ImuTuning) -> f64 {
    let base_length = tuning.gravity_base_length_m;
    let hull = if hull_length_m.is_finite() { hull_length_m } else { 0.0 };
    let alpha = tuning.gravity_base_alpha * (base_length / base_length.max(hull)).sqrt();
    alpha.max(tuning.gravity_alpha_min).min(tuning.gravity_alpha_max)
}

/// Yaw rate (rad/s, positive clockwise seen from above) about the estimated vertical.
///
/// `None` when the gravity estimate is degenerate or the inputs are not finite.
pub fn yaw_rate_from(
    rotation: &RotationRate,
    mapping: &AxisMapping,
    gravity: &Vector3<f64>,
) -> Option<f64> {
    if !rotation.is_finite() {
        return None;
    }
    let norm = gravity.norm();
    if !norm.is_finite() || norm <= 0.0 {
        return None;
    }
    let device = mapping.device_rate(rotation);
    let yaw = -device.dot(&(gravity / norm));
    yaw.is_finite().then_some(yaw)
}

pub struct GravityFilter {
    alpha: f64,
    last_output: Vector3<f64>,
    initialized: bool,
}

impl GravityFilter {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            last_output: Vector3::zeros(),
            initialized: false,
        }
    }

    pub fn for_hull(hull_length_m: f64, tuning: &ImuTuning) -> Self {
        Self::new(gravity_alpha(hull_length_m, tuning))
    }

    pub fn estimate(&self) -> Option<Vector3<f64>> {
        self.initialized.then_some(self.last_output)
    }

    /// Feed one sample. Prefers gravity recovered as (total − linear) when the linear
    /// reading is present and above `noise_floor`; otherwise uses the total reading.
    pub fn update(&mut self, sample: &ImuSample, noise_floor: f64) -> Option<Vector3<f64>> {
        let Some(total) = sample
            .acceleration_including_gravity
            .filter(|a| a.is_finite())
            .map(|a| a.to_vector())
        else {
            return self.estimate();
        };
        let input = match sample.linear_acceleration.filter(|l| l.is_finite()) {
            Some(linear) if linear.to_vector().norm() > noise_floor => total - linear.to_vector(),
            _ => total,
        };

        if !self.initialized {
            self.last_output = input;
            self.initialized = true;
        } else {
            self.last_output = self.last_output * (1.0 - self.alpha) + input * self.alpha;
        }
        Some(self.last_output)
    }

    pub fn reset(&mut self) {
        self.last_output = Vector3::zeros();
        self.initialized = false;
    }
}

/// Runtime IMU state between predict ticks.
pub struct ImuHeadingTracker {
    tuning: ImuTuning,
    gravity: GravityFilter,
    last_rotation: Option<RotationRate>,
    last_yaw_rate: Option<f64>,
    last_timestamp: Option<f64>,
    pending_heading_delta: f64,
}

impl ImuHeadingTracker {
    pub fn new(tuning: ImuTuning, hull_length_m: f64) -> Self {
        let gravity = GravityFilter::for_hull(hull_length_m, &tuning);
        Self {
            tuning,
            gravity,
            last_rotation: None,
            last_yaw_rate: None,
            last_timestamp: None,
            pending_heading_delta: 0.0,
        }
    }

    pub fn set_hull_length(&mut self, hull_length_m: f64) {
        self.gravity.alpha = gravity_alpha(hull_length_m, &self.tuning);
    }

    pub fn gravity(&self) -> Option<Vector3<f64>> {
        self.gravity.estimate()
    }

    pub fn last_rotation(&self) -> Option<RotationRate> {
        self.last_rotation
    }

    pub fn last_yaw_rate(&self) -> Option<f64> {
        self.last_yaw_rate
    }

    pub fn pending_heading_delta(&self) -> f64 {
        self.pending_heading_delta
    }

    /// Update gravity, compute yaw rate and integrate it into the pending delta.
    ///
    /// Returns the yaw rate when the sample produced one. The first sample after a
    /// reset only seeds the clock.
    pub fn process_sample(&mut self, sample: &ImuSample, mapping: &AxisMapping) -> Option<f64> {
        let gravity = self.gravity.update(sample, self.tuning.linear_accel_noise_floor);
        let rotation = sample.rotation_rate.filter(|r| r.is_finite())?;
        if !sample.timestamp.is_finite() {
            return None;
        }
        let yaw_rate = yaw_rate_from(&rotation, mapping, &gravity?)?;

        if let Some(last) = self.last_timestamp {
            let dt = sample.timestamp - last;
            if dt > 0.0 {
                let dt = dt.max(self.tuning.dt_min_secs).min(self.tuning.dt_max_secs);
                self.pending_heading_delta += yaw_rate * dt;
            }
        }

        self.last_timestamp = Some(
            self.last_timestamp
                .map_or(sample.timestamp, |last| last.max(sample.timestamp)),
        );
        self.last_rotation = Some(rotation);
        self.last_yaw_rate = Some(yaw_rate);
        Some(yaw_rate)
    }

    /// Drain the accumulated heading delta (radians).
    pub fn take_pending_heading_delta(&mut self) -> f64 {
        std::mem::take(&mut self.pending_heading_delta)
    }

    pub fn reset(&mut self) {
        self.gravity.reset();
        self.last_rotation = None;
        self.last_yaw_rate = None;
        self.last_timestamp = None;
        self.pending_heading_delta = 0.0;
    }
}
