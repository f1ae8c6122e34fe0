use thiserror::Error;

/// Reasons an axis calibration run can be rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Not enough rotating samples: {found} collected, {required} required")]
    InsufficientSamples { found: usize, required: usize },

    #[error("No axis mapping produced a positive yaw rate")]
    NoPositiveCandidate,

    #[error("Yaw rate too low: mean {mean:.3} rad/s, need at least {required:.3} rad/s")]
    YawRateTooLow { mean: f64, required: f64 },

    #[error("Rotation not consistent: {:.0}% of samples positive, need {:.0}%", fraction * 100.0, required * 100.0)]
    InconsistentRotation { fraction: f64, required: f64 },
}

/// Sail tracker error types
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Calibration failed: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Config parse error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

pub type TrackerResult<T> = Result<T, TrackerError>;
