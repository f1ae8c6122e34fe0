pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// Geographic coordinate in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

/// Meters in the local tangent plane (x = east, y = north).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalPoint {
    pub x: f64,
    pub y: f64,
}

impl LocalPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Planar velocity in m/s (vx = east, vy = north).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub vx: f64,
    pub vy: f64,
}

impl Velocity {
    pub fn new(vx: f64, vy: f64) -> Self {
        Self { vx, vy }
    }

    pub fn speed(&self) -> f64 {
        self.vx.hypot(self.vy)
    }
}

/// One position fix as delivered by the GPS receiver.
///
/// `timestamp` is in seconds. `course_deg` is course over ground, clockwise from north.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GpsFix {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub course_deg: Option<f64>,
}

impl GpsFix {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    pub fn has_valid_position(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    /// Reported speed and course, when both are present and finite.
    pub fn reported_course(&self) -> Option<(f64, f64)> {
        match (self.speed, self.course_deg) {
            (Some(speed), Some(course)) if speed.is_finite() && course.is_finite() => {
                Some((speed, course))
            }
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn to_vector(self) -> nalgebra::Vector3<f64> {
        nalgebra::Vector3::new(self.x, self.y, self.z)
    }
}

/// Raw angular rate in deg/s, labelled the way the motion sensor reports it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RotationRate {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl RotationRate {
    pub fn new(alpha: f64, beta: f64, gamma: f64) -> Self {
        Self { alpha, beta, gamma }
    }

    pub fn is_finite(&self) -> bool {
        self.alpha.is_finite() && self.beta.is_finite() && self.gamma.is_finite()
    }

    pub fn magnitude(&self) -> f64 {
        (self.alpha * self.alpha + self.beta * self.beta + self.gamma * self.gamma).sqrt()
    }
}

/// One inertial sample. Any of the readings may be missing on a given tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImuSample {
    pub timestamp: f64,
    #[serde(default)]
    pub rotation_rate: Option<RotationRate>,
    #[serde(default)]
    pub acceleration_including_gravity: Option<Vec3>,
    #[serde(default)]
    pub linear_acceleration: Option<Vec3>,
}
