//! Local tangent-plane projection around a fixed origin.
//!
//! Equirectangular approximation: longitude deltas are scaled by the cosine of the
//! origin latitude. Good for course-scale distances (a few tens of kilometers), not
//! for general geodesy. NaN input propagates to NaN output; callers treat that as
//! "no fix".

use crate::types::{GeoPoint, GpsFix, LocalPoint, Velocity};

pub const EARTH_RADIUS: f64 = 6_371_000.0; // meters

/// Project a geographic point into meters east/north of `origin`.
pub fn to_local(point: GeoPoint, origin: GeoPoint) -> LocalPoint {
    let d_lat = (point.lat - origin.lat).to_radians();
    let d_lon = (point.lon - origin.lon).to_radians();
    let x = d_lon * origin.lat.to_radians().cos() * EARTH_RADIUS;
    let y = d_lat * EARTH_RADIUS;
    LocalPoint { x, y }
}

/// Inverse of [`to_local`].
pub fn to_geo(point: LocalPoint, origin: GeoPoint) -> GeoPoint {
    let d_lat = point.y / EARTH_RADIUS;
    let d_lon = point.x / (EARTH_RADIUS * origin.lat.to_radians().cos());
    GeoPoint {
        lat: origin.lat + d_lat.to_degrees(),
        lon: origin.lon + d_lon.to_degrees(),
    }
}

/// Closest point to `point` on the segment `start`..`end`.
///
/// Projection happens in a local frame centred on the segment midpoint. A
/// zero-length segment yields `start`.
pub fn closest_point_on_segment(point: GeoPoint, start: GeoPoint, end: GeoPoint) -> GeoPoint {
    let origin = GeoPoint {
        lat: (start.lat + end.lat) / 2.0,
        lon: (start.lon + end.lon) / 2.0,
    };
    let a = to_local(start, origin);
    let b = to_local(end, origin);
    let p = to_local(point, origin);

    let abx = b.x - a.x;
    let aby = b.y - a.y;
    let ab_len_sq = abx * abx + aby * aby;
    if !ab_len_sq.is_finite() || ab_len_sq <= 0.0 {
        return start;
    }

    let t = ((p.x - a.x) * abx + (p.y - a.y) * aby) / ab_len_sq;
    let t = t.clamp(0.0, 1.0);
    to_geo(LocalPoint::new(a.x + abx * t, a.y + aby * t), origin)
}

/// Shift a fix forward along the direction of travel, e.g. from the device to the bow.
pub fn apply_forward_offset(fix: &GpsFix, velocity: Velocity, offset_m: f64) -> GpsFix {
    if !offset_m.is_finite() || offset_m <= 0.0 {
        return fix.clone();
    }
    let speed = velocity.speed();
    if !speed.is_finite() || speed <= 0.0 {
        return fix.clone();
    }
    let shifted = to_geo(
        LocalPoint::new(velocity.vx / speed * offset_m, velocity.vy / speed * offset_m),
        fix.point(),
    );
    GpsFix {
        latitude: shifted.lat,
        longitude: shifted.lon,
        ..fix.clone()
    }
}
