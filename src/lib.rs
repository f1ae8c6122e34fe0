// Sail Tracker core
// GPS/IMU fusion, heading estimation and VMG performance scoring for small boats

pub mod angles;
pub mod calibration;
pub mod config;
pub mod error;
pub mod filters;
pub mod geodesy;
pub mod performance;
pub mod sensor_fusion;
pub mod smoothing;
pub mod types;
pub mod velocity;

pub use calibration::{calibrate, AxisCalibration, AxisMapping, CalibrationCollector, RawAxis};
pub use config::{HeadingSource, TrackerConfig};
pub use error::{CalibrationError, TrackerError, TrackerResult};
pub use filters::kalman_cv::{KalmanCv, KalmanOutput};
pub use performance::{PerformanceEstimator, PerformanceUpdate, SailingCase};
pub use sensor_fusion::{FusionEvent, FusionSnapshot, SensorFusion};
pub use types::{GeoPoint, GpsFix, ImuSample, LocalPoint, RotationRate, Vec3, Velocity};
