// sensor_fusion.rs: pure computation layer. No I/O, no clocks.
//
// The caller feeds GPS fixes and IMU samples as they arrive and calls `tick` at its
// prediction rate (typically 5 Hz). Each call returns the events it produced.

use serde::Serialize;

use crate::calibration::{AxisCalibration, AxisMapping, CalibrationCollector};
use crate::config::{HeadingSource, PerformanceConfig, TrackerConfig};
use crate::filters::imu_heading::ImuHeadingTracker;
use crate::filters::kalman_cv::{HeadingCorrection, KalmanCv, KalmanOutput, PositionCovariance};
use crate::performance::{PerformanceEstimator, PerformanceUpdate};
use crate::types::{GpsFix, ImuSample, Vec3};
use crate::velocity::{estimate_velocity, heading_from_velocity};

// ─── Events ───

#[derive(Clone, Debug, PartialEq)]
pub enum FusionEvent {
    FilterInitialized { lat: f64, lon: f64, accuracy_m: f64 },
    FixRejected { latitude: f64, longitude: f64 },
    HeadingSnapped { heading_deg: f64 },
    HeadingBlended { delta_deg: f64 },
    /// Innovation covariance was singular; the prediction was kept.
    MeasurementSkipped { timestamp: f64 },
    ImuHeadingApplied { delta_rad: f64 },
    PerformanceUpdated(PerformanceUpdate),
}

// ─── Fusion output snapshot ───

#[derive(Clone, Debug, Serialize)]
pub struct FusionSnapshot {
    pub kalman: Option<KalmanOutput>,
    pub position_covariance: Option<PositionCovariance>,
    pub imu_enabled: bool,
    pub imu_yaw_rate: Option<f64>,
    pub pending_heading_delta: f64,
    pub gravity: Option<Vec3>,
    pub performance: Option<PerformanceUpdate>,
}

pub struct SensorFusion {
    config: TrackerConfig,
    mapping: AxisMapping,
    kalman: Option<KalmanCv>,
    imu: ImuHeadingTracker,
    performance: PerformanceEstimator,
    last_raw_fix: Option<GpsFix>,
    last_performance: Option<PerformanceUpdate>,
}

impl SensorFusion {
    pub fn new(config: TrackerConfig) -> Self {
        let mapping = config
            .axis_mapping
            .filter(AxisMapping::is_valid)
            .unwrap_or_default();
        Self {
            mapping,
            kalman: None,
            imu: ImuHeadingTracker::new(config.imu.clone(), config.hull_length_m),
            performance: PerformanceEstimator::new(config.performance.clone()),
            last_raw_fix: None,
            last_performance: None,
            config,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn kalman(&self) -> Option<&KalmanCv> {
        self.kalman.as_ref()
    }

    pub fn performance(&self) -> &PerformanceEstimator {
        &self.performance
    }

    pub fn axis_mapping(&self) -> AxisMapping {
        self.mapping
    }

    // ── Settings ─────────────────────────────────────────────────────────

    /// Switch inertial heading on or off. Either way the IMU runtime state starts over.
    pub fn set_imu_enabled(&mut self, enabled: bool) {
        self.config.imu_enabled = enabled;
        self.imu.reset();
        if let Some(kalman) = self.kalman.as_mut() {
            kalman.set_imu_heading_active(enabled);
        }
    }

    /// Install a new axis mapping; `None` or an invalid mapping falls back to identity.
    pub fn set_axis_mapping(&mut self, mapping: Option<AxisMapping>) {
        self.config.axis_mapping = mapping.filter(AxisMapping::is_valid);
        self.mapping = self.config.axis_mapping.unwrap_or_default();
        self.imu.reset();
    }

    pub fn apply_calibration(&mut self, calibration: &AxisCalibration) {
        self.set_axis_mapping(Some(calibration.mapping));
    }

    pub fn set_hull_length(&mut self, hull_length_m: f64) {
        let hull = if hull_length_m.is_finite() { hull_length_m.max(0.0) } else { 0.0 };
        self.config.hull_length_m = hull;
        self.imu.set_hull_length(hull);
        if let Some(kalman) = self.kalman.as_mut() {
            kalman.set_hull_length(hull);
        }
    }

    pub fn set_performance_config(&mut self, config: PerformanceConfig) {
        self.performance.set_config(config);
        self.config.performance = self.performance.config().clone();
    }

    pub fn set_performance_heading_source(&mut self, source: HeadingSource) {
        if self.config.performance_heading_source != source {
            self.config.performance_heading_source = source;
            self.performance.reset();
            self.last_performance = None;
        }
    }

    /// Collector for an axis calibration run, tuned like the live IMU path.
    pub fn calibration_collector(&self) -> CalibrationCollector {
        CalibrationCollector::new(
            self.config.calibration.clone(),
            &self.config.imu,
            self.config.hull_length_m,
        )
    }

    /// Drop the filter and every derived estimate. The next fix re-anchors the origin.
    pub fn reset_tracking(&mut self) {
        log::info!("Tracking reset");
        self.kalman = None;
        self.imu.reset();
        self.performance.reset();
        self.last_raw_fix = None;
        self.last_performance = None;
    }

    // ── Sensor feeds ─────────────────────────────────────────────────────

    pub fn feed_gps(&mut self, fix: &GpsFix) -> Vec<FusionEvent> {
        let mut events = Vec::new();

        if !fix.has_valid_position() {
            log::warn!("Rejected GPS fix ({}, {})", fix.latitude, fix.longitude);
            events.push(FusionEvent::FixRejected { latitude: fix.latitude, longitude: fix.longitude });
            return events;
        }

        if self.kalman.is_none() {
            let Some(mut kalman) =
                KalmanCv::new(fix, self.config.kalman.clone(), self.config.hull_length_m)
            else {
                return events;
            };
            kalman.set_imu_heading_active(self.config.imu_enabled);
            let origin = kalman.origin();
            events.push(FusionEvent::FilterInitialized {
                lat: origin.lat,
                lon: origin.lon,
                accuracy_m: kalman.output().accuracy_m,
            });
            self.kalman = Some(kalman);
        }

        let outcome = match self.kalman.as_mut() {
            Some(kalman) => kalman.update(fix),
            None => None,
        };
        if let Some(outcome) = &outcome {
            if !outcome.measurement_applied {
                events.push(FusionEvent::MeasurementSkipped { timestamp: outcome.output.timestamp });
            }
            match outcome.heading {
                HeadingCorrection::Snapped { heading_rad } => {
                    events.push(FusionEvent::HeadingSnapped { heading_deg: heading_rad.to_degrees() });
                }
                HeadingCorrection::Blended { delta_rad } => {
                    events.push(FusionEvent::HeadingBlended { delta_deg: delta_rad.to_degrees() });
                }
                HeadingCorrection::None => {}
            }
        }

        let performance = match self.config.performance_heading_source {
            HeadingSource::Kalman => outcome
                .and_then(|o| self.performance.update(o.output.timestamp, o.output.speed, o.output.heading_rad)),
            HeadingSource::Gps => {
                let velocity = estimate_velocity(fix, self.last_raw_fix.as_ref());
                heading_from_velocity(velocity.vx, velocity.vy)
                    .and_then(|heading| self.performance.update(fix.timestamp, velocity.speed, heading))
            }
        };
        self.push_performance(performance, &mut events);

        self.last_raw_fix = Some(fix.clone());
        events
    }

    /// Feed one inertial sample. Returns the yaw rate (rad/s) when one was derived.
    pub fn feed_imu(&mut self, sample: &ImuSample) -> Option<f64> {
        if !self.config.imu_enabled {
            return None;
        }
        self.imu.process_sample(sample, &self.mapping)
    }

    /// Prediction tick: drain the IMU heading delta into the filter, then predict.
    pub fn tick(&mut self, timestamp: f64) -> Vec<FusionEvent> {
        let mut events = Vec::new();

        let delta_rad = self.imu.take_pending_heading_delta();
        let Some(kalman) = self.kalman.as_mut() else {
            return events;
        };

        if self.config.imu_enabled && delta_rad.is_finite() && delta_rad != 0.0 {
            kalman.apply_heading_delta(delta_rad);
            events.push(FusionEvent::ImuHeadingApplied { delta_rad });
        }

        let output = kalman.predict(timestamp);
        if self.config.performance_heading_source == HeadingSource::Kalman {
            let performance = self.performance.update(output.timestamp, output.speed, output.heading_rad);
            self.push_performance(performance, &mut events);
        }
        events
    }

    fn push_performance(&mut self, update: Option<PerformanceUpdate>, events: &mut Vec<FusionEvent>) {
        if let Some(update) = update {
            self.last_performance = Some(update.clone());
            events.push(FusionEvent::PerformanceUpdated(update));
        }
    }

    // ── Snapshot ─────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> FusionSnapshot {
        FusionSnapshot {
            kalman: self.kalman.as_ref().map(KalmanCv::output),
            position_covariance: self.kalman.as_ref().and_then(KalmanCv::position_covariance),
            imu_enabled: self.config.imu_enabled,
            imu_yaw_rate: self.imu.last_yaw_rate(),
            pending_heading_delta: self.imu.pending_heading_delta(),
            gravity: self.imu.gravity().map(|g| Vec3::new(g.x, g.y, g.z)),
            performance: self.last_performance.clone(),
        }
    }
}
