use std::f64::consts::{PI, TAU};

/// Wrap an angle into (-π, π]. Non-finite input maps to 0.
pub fn normalize_angle_rad(angle: f64) -> f64 {
    if !angle.is_finite() {
        return 0.0;
    }
    let mut wrapped = angle % TAU;
    if wrapped <= -PI {
        wrapped += TAU;
    }
    if wrapped > PI {
        wrapped -= TAU;
    }
    wrapped
}

/// Shortest signed rotation taking `from` onto `to`, in (-π, π].
pub fn shortest_delta_rad(to: f64, from: f64) -> f64 {
    normalize_angle_rad(to - from)
}

/// Heading in degrees on [0, 360).
pub fn heading_rad_to_degrees(heading_rad: f64) -> f64 {
    let wrapped = heading_rad.to_degrees() % 360.0;
    if wrapped < 0.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}
