use crate::angles::{normalize_angle_rad, shortest_delta_rad};

/// First-order low-pass weight for a step of `dt` against time constant `tau`.
/// Non-positive `tau` passes the input straight through.
pub fn exp_alpha(dt: f64, tau: f64) -> f64 {
    if tau.is_nan() || tau <= 0.0 {
        return 1.0;
    }
    dt / (tau + dt)
}

/// Exponential smoother for a linear quantity (speed, percentages)
pub struct ExpSmoother {
    tau: f64,
    value: Option<f64>,
}

impl ExpSmoother {
    pub fn new(tau: f64) -> Self {
        ExpSmoother { tau, value: None }
    }

    pub fn set_tau(&mut self, tau: f64) {
        self.tau = tau;
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Force the smoothed value, e.g. on cold start.
    pub fn seed(&mut self, value: f64) {
        self.value = Some(value);
    }

    /// Blend `sample` in over `dt` seconds. The first sample seeds the filter;
    /// non-finite samples leave the value untouched.
    pub fn apply(&mut self, sample: f64, dt: f64) -> Option<f64> {
        if !sample.is_finite() {
            return self.value;
        }
        let next = match self.value {
            Some(prev) => prev + exp_alpha(dt, self.tau) * (sample - prev),
            None => sample,
        };
        self.value = Some(next);
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// Exponential smoother for an angle in radians.
///
/// Steps along the shortest signed arc so 359° → 1° moves by 2°, not 358°.
pub struct CircularExpSmoother {
    tau: f64,
    value: Option<f64>,
}

impl CircularExpSmoother {
    pub fn new(tau: f64) -> Self {
        CircularExpSmoother { tau, value: None }
    }

    pub fn set_tau(&mut self, tau: f64) {
        self.tau = tau;
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn seed(&mut self, angle_rad: f64) {
        self.value = Some(normalize_angle_rad(angle_rad));
    }

    pub fn apply(&mut self, angle_rad: f64, dt: f64) -> Option<f64> {
        if !angle_rad.is_finite() {
            return self.value;
        }
        let next = match self.value {
            Some(prev) => {
                normalize_angle_rad(prev + exp_alpha(dt, self.tau) * shortest_delta_rad(angle_rad, prev))
            }
            None => normalize_angle_rad(angle_rad),
        };
        self.value = Some(next);
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_first_sample_seeds() {
        let mut smoother = ExpSmoother::new(10.0);
        assert_eq!(smoother.apply(5.0, 1.0), Some(5.0));
    }

    #[test]
    fn test_alpha_matches_dt_over_tau_plus_dt() {
        let mut smoother = ExpSmoother::new(9.0);
        smoother.apply(0.0, 1.0);
        let result = smoother.apply(10.0, 1.0).unwrap();
        assert_abs_diff_eq!(result, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_nan_sample_ignored() {
        let mut smoother = ExpSmoother::new(9.0);
        smoother.apply(3.0, 1.0);
        assert_eq!(smoother.apply(f64::NAN, 1.0), Some(3.0));
    }

    #[test]
    fn test_zero_tau_passes_through() {
        let mut smoother = ExpSmoother::new(0.0);
        smoother.apply(3.0, 1.0);
        assert_eq!(smoother.apply(7.0, 0.5), Some(7.0));
    }

    #[test]
    fn test_circular_wraps_through_north() {
        let mut smoother = CircularExpSmoother::new(1.0);
        smoother.seed(350f64.to_radians());
        // alpha = 0.5, shortest path is +20°.
        let result = smoother.apply(10f64.to_radians(), 1.0).unwrap();
        assert_abs_diff_eq!(result, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reset_clears() {
        let mut smoother = CircularExpSmoother::new(1.0);
        smoother.apply(1.0, 1.0);
        smoother.reset();
        assert!(smoother.value().is_none());
    }
}
