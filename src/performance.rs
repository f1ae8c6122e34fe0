//! Velocity-made-good improvement against a trailing baseline.
//!
//! One slow baseline (speed + heading) is shared by all sailing cases. Each case projects
//! the current speed onto its own target angle, offset by how far the heading has
//! drifted from the baseline heading, and reports the percentage gain over the baseline
//! VMG. Optional fast smoothing and a ±max clamp are applied per case.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::angles::shortest_delta_rad;
use crate::config::PerformanceConfig;
use crate::smoothing::{exp_alpha, CircularExpSmoother, ExpSmoother};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SailingCase {
    UpwindLeft,
    UpwindRight,
    Reach,
    DownwindLeft,
    DownwindRight,
}

impl SailingCase {
    pub const ALL: [SailingCase; 5] = [
        SailingCase::UpwindLeft,
        SailingCase::UpwindRight,
        SailingCase::Reach,
        SailingCase::DownwindLeft,
        SailingCase::DownwindRight,
    ];

    fn index(self) -> usize {
        match self {
            SailingCase::UpwindLeft => 0,
            SailingCase::UpwindRight => 1,
            SailingCase::Reach => 2,
            SailingCase::DownwindLeft => 3,
            SailingCase::DownwindRight => 4,
        }
    }

    /// Target true-wind angle in radians (left positive, right negative).
    pub fn target_angle_rad(self, config: &PerformanceConfig) -> f64 {
        match self {
            SailingCase::UpwindLeft => config.twa_upwind_deg.to_radians(),
            SailingCase::UpwindRight => -config.twa_upwind_deg.to_radians(),
            SailingCase::Reach => 0.0,
            SailingCase::DownwindLeft => config.twa_downwind_deg.to_radians(),
            SailingCase::DownwindRight => -config.twa_downwind_deg.to_radians(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub timestamp: f64,
    pub value: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case: SailingCase,
    /// Displayed improvement (%); `None` when undefined for this sample.
    pub improvement_percent: Option<f64>,
    /// Unsmoothed, unclamped improvement (%).
    pub raw_percent: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceUpdate {
    pub timestamp: f64,
    pub baseline_speed: f64,
    pub baseline_heading_rad: f64,
    pub cases: [CaseResult; 5],
}

impl PerformanceUpdate {
    pub fn case(&self, case: SailingCase) -> &CaseResult {
        &self.cases[case.index()]
    }
}

#[derive(Default)]
struct CaseState {
    history: VecDeque<PerformanceSample>,
    fast: Option<f64>,
    last_raw: Option<f64>,
}

impl CaseState {
    fn record(&mut self, sample: PerformanceSample, cutoff: f64) {
        self.history.push_back(sample);
        while self.history.front().is_some_and(|s| s.timestamp < cutoff) {
            self.history.pop_front();
        }
    }
}

pub struct PerformanceEstimator {
    config: PerformanceConfig,
    baseline_speed: ExpSmoother,
    baseline_heading: CircularExpSmoother,
    last_timestamp: Option<f64>,
    cases: [CaseState; 5],
}

impl PerformanceEstimator {
    pub fn new(mut config: PerformanceConfig) -> Self {
        config.sanitize();
        let tau = config.baseline_tau_secs;
        Self {
            config,
            baseline_speed: ExpSmoother::new(tau),
            baseline_heading: CircularExpSmoother::new(tau),
            last_timestamp: None,
            cases: Default::default(),
        }
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    /// Swap configuration. A change of target angle or time constant invalidates the
    /// baselines, so the estimator returns to cold start.
    pub fn set_config(&mut self, mut config: PerformanceConfig) {
        config.sanitize();
        let needs_reset = config.baseline_tau_secs != self.config.baseline_tau_secs
            || config.twa_upwind_deg != self.config.twa_upwind_deg
            || config.twa_downwind_deg != self.config.twa_downwind_deg;
        self.baseline_speed.set_tau(config.baseline_tau_secs);
        self.baseline_heading.set_tau(config.baseline_tau_secs);
        self.config = config;
        if needs_reset {
            self.reset();
        }
    }

    /// Back to cold start: baselines, fast filters and all histories cleared.
    pub fn reset(&mut self) {
        self.baseline_speed.reset();
        self.baseline_heading.reset();
        self.last_timestamp = None;
        self.cases = Default::default();
    }

    pub fn history(&self, case: SailingCase) -> &VecDeque<PerformanceSample> {
        &self.cases[case.index()].history
    }

    pub fn last_raw(&self, case: SailingCase) -> Option<f64> {
        self.cases[case.index()].last_raw
    }

    pub fn baseline(&self) -> Option<(f64, f64)> {
        self.baseline_speed.value().zip(self.baseline_heading.value())
    }

    /// Feed one speed/heading sample.
    ///
    /// Returns `None` for non-finite input or a timestamp not after the previous one.
    pub fn update(&mut self, timestamp: f64, speed: f64, heading_rad: f64) -> Option<PerformanceUpdate> {
        if !timestamp.is_finite() || !speed.is_finite() || !heading_rad.is_finite() {
            return None;
        }

        let Some(last) = self.last_timestamp else {
            return Some(self.cold_start(timestamp, speed, heading_rad));
        };
        let dt = timestamp - last;
        if dt <= 0.0 {
            return None;
        }
        self.last_timestamp = Some(timestamp);

        let base_speed = self.baseline_speed.apply(speed, dt)?;
        let base_heading = self.baseline_heading.apply(heading_rad, dt)?;
        let heading_delta = shortest_delta_rad(heading_rad, base_heading);

        let fast_tau = self
            .config
            .min_fast_tau_secs
            .max(self.config.baseline_tau_secs * 0.1);
        let fast_alpha = exp_alpha(dt, fast_tau);
        let cutoff = self.history_cutoff(timestamp);

        let config = &self.config;
        let states = &mut self.cases;
        let cases = SailingCase::ALL.map(|case| {
            let target = case.target_angle_rad(config);
            let state = &mut states[case.index()];
            let Some(raw) = raw_improvement(config, speed, base_speed, target, heading_delta) else {
                return CaseResult { case, improvement_percent: None, raw_percent: None };
            };
            state.last_raw = Some(raw);

            let mut value = if config.fast_smoothing {
                let fast = state.fast.map_or(raw, |prev| prev + fast_alpha * (raw - prev));
                state.fast = Some(fast);
                fast
            } else {
                raw
            };
            if config.clamp_output {
                value = value.clamp(-config.max_gain_percent, config.max_gain_percent);
            }

            state.record(PerformanceSample { timestamp, value }, cutoff);
            CaseResult { case, improvement_percent: Some(value), raw_percent: Some(raw) }
        });

        Some(PerformanceUpdate {
            timestamp,
            baseline_speed: base_speed,
            baseline_heading_rad: base_heading,
            cases,
        })
    }

    fn cold_start(&mut self, timestamp: f64, speed: f64, heading_rad: f64) -> PerformanceUpdate {
        self.baseline_speed.seed(speed);
        self.baseline_heading.seed(heading_rad);
        self.last_timestamp = Some(timestamp);
        let cutoff = self.history_cutoff(timestamp);

        let cases = SailingCase::ALL.map(|case| {
            let state = &mut self.cases[case.index()];
            state.fast = Some(0.0);
            state.last_raw = Some(0.0);
            state.record(PerformanceSample { timestamp, value: 0.0 }, cutoff);
            CaseResult { case, improvement_percent: Some(0.0), raw_percent: Some(0.0) }
        });

        PerformanceUpdate {
            timestamp,
            baseline_speed: speed,
            baseline_heading_rad: self.baseline_heading.value().unwrap_or(heading_rad),
            cases,
        }
    }

    fn history_cutoff(&self, timestamp: f64) -> f64 {
        timestamp - (2.0 * self.config.baseline_tau_secs + self.config.history_pad_secs)
    }
}

/// Percentage gain of the instantaneous VMG over the baseline VMG for one target angle.
fn raw_improvement(
    config: &PerformanceConfig,
    speed: f64,
    base_speed: f64,
    target: f64,
    heading_delta: f64,
) -> Option<f64> {
    let cos_target = target.cos();
    if base_speed.abs() < config.min_baseline_speed || cos_target.abs() < 1e-6 {
        return None;
    }
    let instant_vmg = speed * (target + heading_delta).cos();
    let baseline_vmg = base_speed * cos_target;
    let pct = (instant_vmg / baseline_vmg - 1.0) * 100.0;
    pct.is_finite().then_some(pct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn raw_config() -> PerformanceConfig {
        PerformanceConfig {
            fast_smoothing: false,
            clamp_output: false,
            ..Default::default()
        }
    }

    fn value(update: &PerformanceUpdate, case: SailingCase) -> f64 {
        update.case(case).improvement_percent.unwrap()
    }

    #[test]
    fn test_negative_gain_bound_is_sanitized() {
        let config = PerformanceConfig { max_gain_percent: -10.0, ..Default::default() };
        let mut est = PerformanceEstimator::new(config);
        assert_eq!(est.config().max_gain_percent, 0.0);
        est.update(0.0, 4.0, 0.0);
        let update = est.update(1.0, 5.0, 0.0).unwrap();
        assert_eq!(value(&update, SailingCase::Reach), 0.0);

        est.set_config(PerformanceConfig { max_gain_percent: f64::NAN, ..Default::default() });
        assert_eq!(est.config().max_gain_percent, 0.0);
        assert!(est.update(2.0, 5.0, 0.0).is_some());
    }

    #[test]
    fn test_cold_start_emits_zero() {
        let mut est = PerformanceEstimator::new(PerformanceConfig::default());
        let update = est.update(10.0, 4.0, 1.0).unwrap();
        for case in SailingCase::ALL {
            assert_eq!(update.case(case).improvement_percent, Some(0.0));
            assert_eq!(est.history(case).len(), 1);
        }
        assert_eq!(est.baseline(), Some((4.0, 1.0)));
    }

    #[test]
    fn test_non_increasing_timestamp_ignored() {
        let mut est = PerformanceEstimator::new(PerformanceConfig::default());
        est.update(10.0, 4.0, 1.0);
        assert!(est.update(10.0, 5.0, 1.0).is_none());
        assert!(est.update(9.0, 5.0, 1.0).is_none());
        assert_eq!(est.baseline(), Some((4.0, 1.0)));
    }

    #[test]
    fn test_faster_on_same_heading_improves_every_case() {
        let mut est = PerformanceEstimator::new(raw_config());
        est.update(0.0, 4.0, 0.0);
        let update = est.update(1.0, 5.0, 0.0).unwrap();
        // Baseline moved 1/46 of the way towards 5.
        let base = 4.0 + (1.0 / 46.0);
        assert_abs_diff_eq!(update.baseline_speed, base, epsilon = 1e-12);
        for case in SailingCase::ALL {
            assert_abs_diff_eq!(value(&update, case), (5.0 / base - 1.0) * 100.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_heading_up_helps_upwind_left_and_hurts_right() {
        let mut est = PerformanceEstimator::new(raw_config());
        est.update(0.0, 5.0, 0.0);
        // Turn 10° towards negative heading delta at unchanged speed.
        let update = est.update(1.0, 5.0, (-10f64).to_radians()).unwrap();
        let left = value(&update, SailingCase::UpwindLeft);
        let right = value(&update, SailingCase::UpwindRight);
        assert!(left > 0.0, "left {left}");
        assert!(right < 0.0, "right {right}");
        assert!(value(&update, SailingCase::Reach) < 0.0);
    }

    #[test]
    fn test_clamp_bounds_output() {
        let mut est = PerformanceEstimator::new(PerformanceConfig {
            fast_smoothing: false,
            ..Default::default()
        });
        est.update(0.0, 1.0, 0.0);
        let update = est.update(1.0, 30.0, 0.0).unwrap();
        for case in SailingCase::ALL {
            assert!(value(&update, case).abs() <= 50.0);
            assert!(update.case(case).raw_percent.unwrap() > 50.0);
        }
        let update = est.update(2.0, 0.0, 3.0).unwrap();
        for case in SailingCase::ALL {
            if let Some(v) = update.case(case).improvement_percent {
                assert!(v.abs() <= 50.0);
            }
        }
    }

    #[test]
    fn test_unclamped_exceeds_fifty() {
        let mut est = PerformanceEstimator::new(raw_config());
        est.update(0.0, 1.0, 0.0);
        let update = est.update(1.0, 30.0, 0.0).unwrap();
        assert!(value(&update, SailingCase::Reach) > 50.0);
    }

    #[test]
    fn test_fast_smoothing_lags_raw() {
        let mut est = PerformanceEstimator::new(PerformanceConfig {
            clamp_output: false,
            ..Default::default()
        });
        est.update(0.0, 4.0, 0.0);
        let update = est.update(1.0, 5.0, 0.0).unwrap();
        let raw = update.case(SailingCase::Reach).raw_percent.unwrap();
        // fast tau = 4.5 s: alpha = 1/5.5, seeded at 0.
        assert_abs_diff_eq!(value(&update, SailingCase::Reach), raw / 5.5, epsilon = 1e-9);
        assert_eq!(est.last_raw(SailingCase::Reach), Some(raw));
    }

    #[test]
    fn test_slow_baseline_is_undefined() {
        let mut est = PerformanceEstimator::new(raw_config());
        est.update(0.0, 0.1, 0.0);
        let update = est.update(1.0, 3.0, 0.0).unwrap();
        for case in SailingCase::ALL {
            assert_eq!(update.case(case).improvement_percent, None);
            assert_eq!(est.history(case).len(), 1);
        }
    }

    #[test]
    fn test_history_pruned_to_window() {
        let mut est = PerformanceEstimator::new(PerformanceConfig::default());
        for t in 0..200 {
            est.update(t as f64, 5.0, 0.0);
        }
        // Window is 2 * 45 + 5 = 95 s.
        let history = est.history(SailingCase::Reach);
        assert_eq!(history.front().unwrap().timestamp, 199.0 - 95.0);
        assert_eq!(history.len(), 96);
    }

    #[test]
    fn test_reset_returns_to_cold_start() {
        let mut est = PerformanceEstimator::new(PerformanceConfig::default());
        est.update(0.0, 4.0, 0.0);
        est.update(1.0, 6.0, 0.5);
        est.reset();
        assert!(est.history(SailingCase::UpwindLeft).is_empty());
        let update = est.update(2.0, 9.0, 2.0).unwrap();
        assert_eq!(value(&update, SailingCase::DownwindRight), 0.0);
        assert_eq!(est.baseline(), Some((9.0, 2.0)));
    }

    #[test]
    fn test_changing_target_angle_resets() {
        let mut est = PerformanceEstimator::new(PerformanceConfig::default());
        est.update(0.0, 4.0, 0.0);
        est.set_config(PerformanceConfig {
            twa_upwind_deg: 40.0,
            ..Default::default()
        });
        assert!(est.baseline().is_none());

        // Toggles alone keep the baselines.
        est.update(1.0, 4.0, 0.0);
        est.set_config(PerformanceConfig {
            twa_upwind_deg: 40.0,
            clamp_output: false,
            ..Default::default()
        });
        assert!(est.baseline().is_some());
    }

    #[test]
    fn test_config_values_sanitized() {
        let est = PerformanceEstimator::new(PerformanceConfig {
            baseline_tau_secs: 1.0,
            twa_downwind_deg: 179.0,
            ..Default::default()
        });
        assert_eq!(est.config().baseline_tau_secs, 15.0);
        assert_eq!(est.config().twa_downwind_deg, 175.0);
    }
}
