//! Linear algebra type system for the sail tracker
//!
//! Provides compile-time dimension checking and clean type aliases
//! for the constant-velocity Kalman filter.

use nalgebra::{SMatrix, SVector};

// ===== State Dimensions =====
pub const STATE_DIM: usize = 4; // [x, y, vx, vy]

// ===== Measurement Dimensions =====
pub const MEASURE_DIM_GPS_POS: usize = 2; // (x, y)

// ===== 4-State Filter Types =====
pub type StateVec4 = SVector<f64, STATE_DIM>;
pub type StateMat4 = SMatrix<f64, STATE_DIM, STATE_DIM>;

// Measurement types
pub type GpsPosVec = SVector<f64, MEASURE_DIM_GPS_POS>;
pub type GpsPosNoise = SMatrix<f64, MEASURE_DIM_GPS_POS, MEASURE_DIM_GPS_POS>;

// Planar (east/north) covariance blocks
pub type PlanarCov = SMatrix<f64, 2, 2>;

// Kalman gain types
pub type KalmanGainGpsPos = SMatrix<f64, STATE_DIM, MEASURE_DIM_GPS_POS>; // 4×2

// Jacobian types
pub type JacobianGpsPos = SMatrix<f64, MEASURE_DIM_GPS_POS, STATE_DIM>; // 2×4

/// Measurement matrix selecting the position block of the state.
pub fn gps_position_jacobian() -> JacobianGpsPos {
    JacobianGpsPos::new(
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0,
    )
}

/// CV transition: position += velocity * dt, velocity unchanged.
pub fn cv_transition(dt: f64) -> StateMat4 {
    StateMat4::new(
        1.0, 0.0, dt, 0.0, //
        0.0, 1.0, 0.0, dt, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Block rotation leaving position untouched and turning velocity by `angle_rad`
/// (clockwise, matching heading measured from north).
pub fn velocity_rotation(angle_rad: f64) -> StateMat4 {
    let (sin, cos) = angle_rad.sin_cos();
    StateMat4::new(
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, cos, sin, //
        0.0, 0.0, -sin, cos,
    )
}
