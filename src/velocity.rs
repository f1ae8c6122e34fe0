/// Velocity from GPS, either from reported course/speed or by differencing two fixes.
/// No smoothing here; that is the Kalman filter's job.
use crate::geodesy::to_local;
use crate::types::{GeoPoint, GpsFix};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VelocityEstimate {
    pub vx: f64,
    pub vy: f64,
    pub speed: f64,
}

/// Decompose speed and course (degrees clockwise from north) into east/north components.
pub fn velocity_from_course(speed: f64, course_deg: f64) -> VelocityEstimate {
    if !speed.is_finite() || !course_deg.is_finite() {
        return VelocityEstimate::default();
    }
    let heading = course_deg.to_radians();
    VelocityEstimate {
        vx: speed * heading.sin(),
        vy: speed * heading.cos(),
        speed,
    }
}

/// Finite difference of two fixes, projected around their midpoint to limit distortion.
pub fn velocity_from_fixes(current: &GpsFix, previous: &GpsFix) -> VelocityEstimate {
    let dt = current.timestamp - previous.timestamp;
    if !dt.is_finite() || dt <= 0.0 {
        return VelocityEstimate::default();
    }

    let origin = GeoPoint {
        lat: (current.latitude + previous.latitude) / 2.0,
        lon: (current.longitude + previous.longitude) / 2.0,
    };
    let cur = to_local(current.point(), origin);
    let prev = to_local(previous.point(), origin);
    let dx = cur.x - prev.x;
    let dy = cur.y - prev.y;
    VelocityEstimate {
        vx: dx / dt,
        vy: dy / dt,
        speed: dx.hypot(dy) / dt,
    }
}

/// Reported course when the fix carries one, otherwise the two-fix difference.
pub fn estimate_velocity(current: &GpsFix, previous: Option<&GpsFix>) -> VelocityEstimate {
    if let Some((speed, course)) = current.reported_course() {
        return velocity_from_course(speed, course);
    }
    match previous {
        Some(prev) => velocity_from_fixes(current, prev),
        None => VelocityEstimate::default(),
    }
}

/// Heading clockwise from north, `None` when effectively stationary.
pub fn heading_from_velocity(vx: f64, vy: f64) -> Option<f64> {
    if !vx.is_finite() || !vy.is_finite() {
        return None;
    }
    if vx.hypot(vy) < 1e-6 {
        return None;
    }
    Some(vx.atan2(vy))
}
