//! Axis calibration for the inertial sensor.
//!
//! The device reports angular rate on three labelled axes whose relation to the
//! physical body frame is unknown. While the device is turned steadily about the true
//! vertical, every signed permutation of the raw axes (6 × 8 = 48 candidates) is scored
//! by the mean yaw rate it produces; the winner must be clearly and consistently positive.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::config::{CalibrationTuning, ImuTuning};
use crate::error::CalibrationError;
use crate::filters::imu_heading::{yaw_rate_from, GravityFilter};
use crate::types::{ImuSample, RotationRate};

/// Raw rotation-rate channel as labelled by the sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawAxis {
    Alpha,
    Beta,
    Gamma,
}

impl RawAxis {
    pub const ALL: [RawAxis; 3] = [RawAxis::Alpha, RawAxis::Beta, RawAxis::Gamma];

    pub fn read(self, rate: &RotationRate) -> f64 {
        match self {
            RawAxis::Alpha => rate.alpha,
            RawAxis::Beta => rate.beta,
            RawAxis::Gamma => rate.gamma,
        }
    }
}

/// Device-frame component `i` is `signs[i] * raw[axes[i]]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisMapping {
    pub axes: [RawAxis; 3],
    pub signs: [i8; 3],
}

impl Default for AxisMapping {
    fn default() -> Self {
        Self::identity()
    }
}

impl AxisMapping {
    pub const fn identity() -> Self {
        Self {
            axes: RawAxis::ALL,
            signs: [1, 1, 1],
        }
    }

    /// Validated constructor: axes must be distinct and signs ±1.
    pub fn new(axes: [RawAxis; 3], signs: [i8; 3]) -> Option<Self> {
        let mapping = Self { axes, signs };
        mapping.is_valid().then_some(mapping)
    }

    pub fn is_valid(&self) -> bool {
        let [a, b, c] = self.axes;
        a != b && b != c && a != c && self.signs.iter().all(|s| *s == 1 || *s == -1)
    }

    /// Mapped angular rate in rad/s.
    pub fn device_rate(&self, rate: &RotationRate) -> Vector3<f64> {
        Vector3::from_fn(|i, _| {
            (f64::from(self.signs[i]) * self.axes[i].read(rate)).to_radians()
        })
    }

    /// All 48 signed permutations, in a fixed order.
    pub fn candidates() -> Vec<AxisMapping> {
        const PERMUTATIONS: [[usize; 3]; 6] =
            [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        let mut out = Vec::with_capacity(48);
        for perm in PERMUTATIONS {
            let axes = perm.map(|i| RawAxis::ALL[i]);
            for bits in 0..8u8 {
                let signs = [0, 1, 2].map(|i| if bits & (1 << i) == 0 { 1 } else { -1 });
                out.push(AxisMapping { axes, signs });
            }
        }
        out
    }
}

/// One rotating sample with the gravity estimate current at that time.
#[derive(Clone, Copy, Debug)]
pub struct CalibrationSample {
    pub rotation: RotationRate,
    pub gravity: Vector3<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisCalibration {
    pub mapping: AxisMapping,
    /// Sample-clock time the calibration completed (seconds).
    pub calibrated_at: f64,
    pub mean_yaw_rate: f64,
    pub positive_fraction: f64,
    pub sample_count: usize,
}

struct CandidateScore {
    mapping: AxisMapping,
    mean: f64,
    positive: usize,
}

/// Pick the axis mapping that best explains a steady turn about the vertical.
pub fn calibrate(
    samples: &[CalibrationSample],
    tuning: &CalibrationTuning,
    calibrated_at: f64,
) -> Result<AxisCalibration, CalibrationError> {
    let moving: Vec<&CalibrationSample> = samples
        .iter()
        .filter(|s| s.rotation.is_finite() && s.rotation.magnitude() >= tuning.min_rotation_dps)
        .filter(|s| s.gravity.iter().all(|v| v.is_finite()) && s.gravity.norm() > 0.0)
        .collect();

    if moving.len() < tuning.min_samples {
        let err = CalibrationError::InsufficientSamples {
            found: moving.len(),
            required: tuning.min_samples,
        };
        log::warn!("IMU calibration failed: {err}");
        return Err(err);
    }

    let mut best: Option<CandidateScore> = None;
    for mapping in AxisMapping::candidates() {
        let mut sum = 0.0;
        let mut count = 0usize;
        let mut positive = 0usize;
        for sample in &moving {
            if let Some(yaw) = yaw_rate_from(&sample.rotation, &mapping, &sample.gravity) {
                sum += yaw;
                count += 1;
                if yaw > 0.0 {
                    positive += 1;
                }
            }
        }
        if count == 0 {
            continue;
        }
        let mean = sum / count as f64;
        if best.as_ref().map_or(true, |b| mean > b.mean) {
            best = Some(CandidateScore { mapping, mean, positive });
        }
    }

    let result = match best {
        Some(b) if b.mean > 0.0 => {
            let fraction = b.positive as f64 / moving.len() as f64;
            if b.mean < tuning.min_mean_yaw_rate {
                Err(CalibrationError::YawRateTooLow {
                    mean: b.mean,
                    required: tuning.min_mean_yaw_rate,
                })
            } else if fraction < tuning.min_positive_fraction {
                Err(CalibrationError::InconsistentRotation {
                    fraction,
                    required: tuning.min_positive_fraction,
                })
            } else {
                Ok(AxisCalibration {
                    mapping: b.mapping,
                    calibrated_at,
                    mean_yaw_rate: b.mean,
                    positive_fraction: fraction,
                    sample_count: moving.len(),
                })
            }
        }
        _ => Err(CalibrationError::NoPositiveCandidate),
    };

    match &result {
        Ok(cal) => log::info!(
            "IMU calibrated: axes {:?} signs {:?}, mean yaw {:.3} rad/s over {} samples",
            cal.mapping.axes,
            cal.mapping.signs,
            cal.mean_yaw_rate,
            cal.sample_count
        ),
        Err(err) => log::warn!("IMU calibration failed: {err}"),
    }
    result
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CollectorStatus {
    Collecting { elapsed_secs: f64 },
    Complete,
}

/// Gathers samples for a fixed window, tracking gravity on the way.
pub struct CalibrationCollector {
    tuning: CalibrationTuning,
    gravity: GravityFilter,
    noise_floor: f64,
    started_at: Option<f64>,
    last_timestamp: f64,
    samples: Vec<CalibrationSample>,
}

impl CalibrationCollector {
    pub fn new(tuning: CalibrationTuning, imu: &ImuTuning, hull_length_m: f64) -> Self {
        Self {
            tuning,
            gravity: GravityFilter::for_hull(hull_length_m, imu),
            noise_floor: imu.linear_accel_noise_floor,
            started_at: None,
            last_timestamp: 0.0,
            samples: Vec::new(),
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn push(&mut self, sample: &ImuSample) -> CollectorStatus {
        if !sample.timestamp.is_finite() {
            return self.status();
        }
        if self.started_at.is_none() {
            self.started_at = Some(sample.timestamp);
            self.last_timestamp = sample.timestamp;
        }
        self.last_timestamp = self.last_timestamp.max(sample.timestamp);

        let gravity = self.gravity.update(sample, self.noise_floor);
        if let (Some(rotation), Some(gravity)) = (sample.rotation_rate, gravity) {
            self.samples.push(CalibrationSample { rotation, gravity });
        }
        self.status()
    }

    pub fn status(&self) -> CollectorStatus {
        let elapsed_secs = self
            .started_at
            .map_or(0.0, |start| self.last_timestamp - start);
        if elapsed_secs >= self.tuning.duration_secs {
            CollectorStatus::Complete
        } else {
            CollectorStatus::Collecting { elapsed_secs }
        }
    }

    /// Run the candidate search over everything collected so far.
    pub fn finish(self) -> Result<AxisCalibration, CalibrationError> {
        calibrate(&self.samples, &self.tuning, self.last_timestamp)
    }
}
