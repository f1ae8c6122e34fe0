use serde::{Deserialize, Serialize};

use crate::calibration::AxisMapping;
use crate::error::{TrackerError, TrackerResult};

// ─── Kalman filter tuning ────────────────────────────────────────────────────

/// Process/measurement noise constants for the constant-velocity filter.
///
/// `base_acceleration_variance` is in (m/s²)². It is reduced with the square of the
/// hull length above `base_hull_length_m` and scaled with recent speed between
/// `speed_scale_min_knots` and the anchor speed where the static tuning applies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanTuning {
    // ── Process noise ──
    pub base_acceleration_variance: f64,
    pub base_hull_length_m: f64,
    pub speed_scale_min_knots: f64,
    pub speed_scale_anchor_knots: f64,
    pub lateral_variance_ratio: f64,
    pub speed_history_window_secs: f64,

    // ── Measurement noise ──
    pub accuracy_default_m: f64,
    pub accuracy_min_m: f64,
    pub accuracy_max_m: f64,

    // ── Timing ──
    pub max_dt_secs: f64,
    pub covariance_predict_step_secs: f64,

    // ── Init ──
    pub initial_velocity_variance: f64,

    // ── Heading ──
    pub gps_heading_min_speed: f64,
    pub heading_imu_weight: f64,
}

impl Default for KalmanTuning {
    fn default() -> Self {
        Self {
            base_acceleration_variance: 0.8,
            base_hull_length_m: 3.0,
            speed_scale_min_knots: 1.0,
            speed_scale_anchor_knots: 3.0,
            lateral_variance_ratio: 0.25,
            speed_history_window_secs: 10.0,
            accuracy_default_m: 10.0,
            accuracy_min_m: 3.0,
            accuracy_max_m: 50.0,
            max_dt_secs: 5.0,
            covariance_predict_step_secs: 0.5,
            initial_velocity_variance: 25.0,
            gps_heading_min_speed: 0.5,
            heading_imu_weight: 0.8,
        }
    }
}

// ─── IMU runtime tuning ──────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuTuning {
    /// Gravity low-pass alpha at the baseline hull length.
    pub gravity_base_alpha: f64,
    pub gravity_base_length_m: f64,
    pub gravity_alpha_min: f64,
    pub gravity_alpha_max: f64,
    /// Linear acceleration below this magnitude (m/s²) is treated as noise.
    pub linear_accel_noise_floor: f64,
    pub dt_min_secs: f64,
    pub dt_max_secs: f64,
}

impl Default for ImuTuning {
    fn default() -> Self {
        Self {
            gravity_base_alpha: 0.1,
            gravity_base_length_m: 3.0,
            gravity_alpha_min: 0.02,
            gravity_alpha_max: 0.2,
            linear_accel_noise_floor: 0.2,
            dt_min_secs: 0.005,
            dt_max_secs: 0.25,
        }
    }
}

// ─── Axis calibration tuning ─────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationTuning {
    pub duration_secs: f64,
    /// Raw angular-rate magnitude (deg/s) below which a sample shows too little motion.
    pub min_rotation_dps: f64,
    pub min_samples: usize,
    /// Minimum mean yaw rate (rad/s) of the winning candidate.
    pub min_mean_yaw_rate: f64,
    pub min_positive_fraction: f64,
}

impl Default for CalibrationTuning {
    fn default() -> Self {
        Self {
            duration_secs: 8.0,
            min_rotation_dps: 5.0,
            min_samples: 30,
            min_mean_yaw_rate: 0.15,
            min_positive_fraction: 0.7,
        }
    }
}

// ─── Performance estimator ───────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub baseline_tau_secs: f64,
    pub twa_upwind_deg: f64,
    pub twa_downwind_deg: f64,
    pub fast_smoothing: bool,
    pub clamp_output: bool,
    pub max_gain_percent: f64,
    pub min_baseline_speed: f64,
    pub min_fast_tau_secs: f64,
    pub history_pad_secs: f64,
}

pub const BASELINE_TAU_RANGE: (f64, f64) = (15.0, 75.0);
pub const TWA_UPWIND_RANGE: (f64, f64) = (35.0, 50.0);
pub const TWA_DOWNWIND_RANGE: (f64, f64) = (110.0, 175.0);

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            baseline_tau_secs: 45.0,
            twa_upwind_deg: 45.0,
            twa_downwind_deg: 150.0,
            fast_smoothing: true,
            clamp_output: true,
            max_gain_percent: 50.0,
            min_baseline_speed: 0.2,
            min_fast_tau_secs: 0.05,
            history_pad_secs: 5.0,
        }
    }
}

impl PerformanceConfig {
    /// Clamp the user-facing values into their supported ranges.
    pub fn sanitize(&mut self) {
        self.baseline_tau_secs = self
            .baseline_tau_secs
            .clamp(BASELINE_TAU_RANGE.0, BASELINE_TAU_RANGE.1);
        self.twa_upwind_deg = self.twa_upwind_deg.clamp(TWA_UPWIND_RANGE.0, TWA_UPWIND_RANGE.1);
        self.twa_downwind_deg = self
            .twa_downwind_deg
            .clamp(TWA_DOWNWIND_RANGE.0, TWA_DOWNWIND_RANGE.1);
        // Used as a symmetric ±bound; NaN collapses to 0.
        self.max_gain_percent = self.max_gain_percent.max(0.0);
    }
}

// ─── Top level ───────────────────────────────────────────────────────────────

/// Where the performance estimator takes speed/heading from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadingSource {
    #[default]
    Kalman,
    Gps,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Hull length in meters; 0 means unknown (baseline tuning applies).
    pub hull_length_m: f64,
    pub imu_enabled: bool,
    pub axis_mapping: Option<AxisMapping>,
    pub performance_heading_source: HeadingSource,
    pub kalman: KalmanTuning,
    pub imu: ImuTuning,
    pub calibration: CalibrationTuning,
    pub performance: PerformanceConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            hull_length_m: 0.0,
            imu_enabled: false,
            axis_mapping: None,
            performance_heading_source: HeadingSource::Kalman,
            kalman: KalmanTuning::default(),
            imu: ImuTuning::default(),
            calibration: CalibrationTuning::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> TrackerResult<Self> {
        let mut config: TrackerConfig = serde_json::from_str(json)?;
        config.sanitize()?;
        Ok(config)
    }

    /// Reject non-finite values and clamp bounded ones.
    pub fn sanitize(&mut self) -> TrackerResult<()> {
        let k = &self.kalman;
        let checks = [
            ("hull_length_m", self.hull_length_m),
            ("kalman.base_acceleration_variance", k.base_acceleration_variance),
            ("kalman.base_hull_length_m", k.base_hull_length_m),
            ("kalman.lateral_variance_ratio", k.lateral_variance_ratio),
            ("kalman.heading_imu_weight", k.heading_imu_weight),
            ("kalman.speed_scale_anchor_knots", k.speed_scale_anchor_knots),
            ("kalman.accuracy_min_m", k.accuracy_min_m),
            ("kalman.accuracy_max_m", k.accuracy_max_m),
            ("kalman.max_dt_secs", k.max_dt_secs),
            ("imu.gravity_base_alpha", self.imu.gravity_base_alpha),
            ("imu.gravity_alpha_min", self.imu.gravity_alpha_min),
            ("imu.gravity_alpha_max", self.imu.gravity_alpha_max),
            ("imu.dt_min_secs", self.imu.dt_min_secs),
            ("imu.dt_max_secs", self.imu.dt_max_secs),
            ("performance.max_gain_percent", self.performance.max_gain_percent),
            ("performance.baseline_tau_secs", self.performance.baseline_tau_secs),
            ("performance.twa_upwind_deg", self.performance.twa_upwind_deg),
            ("performance.twa_downwind_deg", self.performance.twa_downwind_deg),
        ];
        if let Some((name, _)) = checks.iter().find(|(_, v)| !v.is_finite()) {
            return Err(TrackerError::InvalidConfig(format!("{name} must be finite")));
        }
        if self.kalman.base_hull_length_m <= 0.0 {
            return Err(TrackerError::InvalidConfig(
                "kalman.base_hull_length_m must be positive".to_string(),
            ));
        }
        if self.kalman.speed_scale_anchor_knots <= 0.0 {
            return Err(TrackerError::InvalidConfig(
                "kalman.speed_scale_anchor_knots must be positive".to_string(),
            ));
        }
        let ranges = [
            ("kalman.accuracy_min_m", "kalman.accuracy_max_m", k.accuracy_min_m, k.accuracy_max_m),
            ("imu.gravity_alpha_min", "imu.gravity_alpha_max", self.imu.gravity_alpha_min, self.imu.gravity_alpha_max),
            ("imu.dt_min_secs", "imu.dt_max_secs", self.imu.dt_min_secs, self.imu.dt_max_secs),
        ];
        if let Some((lo, hi, _, _)) = ranges.iter().find(|(_, _, min, max)| min > max) {
            return Err(TrackerError::InvalidConfig(format!("{lo} must not exceed {hi}")));
        }
        if self.performance.max_gain_percent < 0.0 {
            return Err(TrackerError::InvalidConfig(
                "performance.max_gain_percent must not be negative".to_string(),
            ));
        }

        if self.axis_mapping.is_some_and(|m| !m.is_valid()) {
            log::warn!("Ignoring invalid axis mapping {:?}", self.axis_mapping);
            self.axis_mapping = None;
        }

        self.hull_length_m = self.hull_length_m.max(0.0);
        self.kalman.heading_imu_weight = self.kalman.heading_imu_weight.clamp(0.0, 1.0);
        self.performance.sanitize();
        Ok(())
    }
}
