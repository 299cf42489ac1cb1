//! Performance interpolation strategies.
//!
//! Speed strategies convert the performer's observed inter-onset interval
//! into a scale factor applied to scheduled body-event offsets; velocity
//! strategies convert the current hit velocity into the dynamics of the
//! scheduled body. Both are chosen at engine construction and mutated only
//! from the capture thread.
//!
//! The adaptive tempo model follows the inter-onset-interval
//! feedback-prediction approach: a windowed history of observed tempo ratios
//! blended with an optional rehearsal template, multiplied by a momentum
//! term from the two most recent observations.

use log::warn;

// ─── Speed ──────────────────────────────────────────────────────────────────

pub trait SpeedInterpolator: Send {
    /// Install the score's tick IOI list (sentinel first element included).
    fn load_score(&mut self, score_iois: Vec<u64>);

    /// Map an observed IOI (ticks) to a playback scale factor.
    fn interpolate(&mut self, observed_ioi: u64) -> f64;

    /// True once every score interval has been consumed.
    fn is_end(&self) -> bool;

    /// Human-readable strategy description for session artifacts.
    fn describe(&self) -> String;
}

/// No tempo adaptation: every segment plays back at score speed.
#[derive(Debug, Default)]
pub struct FixedSpeed;

impl SpeedInterpolator for FixedSpeed {
    fn load_score(&mut self, _score_iois: Vec<u64>) {}

    fn interpolate(&mut self, _observed_ioi: u64) -> f64 {
        1.0
    }

    fn is_end(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "fixed speed (scale 1.0)".into()
    }
}

/// Tempo follower predicting the next beat ratio from recent observations.
#[derive(Debug)]
pub struct AdaptiveSpeed {
    /// Historical-average weight.
    wh: f64,
    /// Momentum (responsiveness) exponent.
    wp: f64,
    /// Template weight.
    wt: f64,
    window: usize,
    score_iois: Vec<u64>,
    template: Option<Vec<f64>>,
    observed: Vec<f64>,
    predicted: Vec<f64>,
    cursor: usize,
}

impl Default for AdaptiveSpeed {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveSpeed {
    pub fn new() -> Self {
        Self {
            wh: 1.0,
            wp: 0.25,
            wt: 0.5,
            window: 5,
            score_iois: Vec::new(),
            template: None,
            observed: Vec::new(),
            predicted: Vec::new(),
            // The first score entry is the sentinel for the first onset;
            // the first observation is measured against the second entry.
            cursor: 1,
        }
    }

    pub fn with_weights(mut self, wh: f64, wp: f64, wt: f64) -> Self {
        self.wh = wh;
        self.wp = wp;
        self.wt = wt;
        self
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    /// Seed predictions from a reference performance (bpm-ratio history).
    pub fn with_template(mut self, template: Vec<f64>) -> Self {
        self.template = Some(template);
        self
    }

    /// Observed bpm ratios so far (most recent last).
    pub fn observed_history(&self) -> &[f64] {
        &self.observed
    }

    fn window_average(&self) -> f64 {
        let n = self.observed.len().min(self.window);
        if n == 0 {
            return 1.0;
        }
        self.observed[self.observed.len() - n..].iter().sum::<f64>() / n as f64
    }

    fn momentum(&self) -> f64 {
        let prev_1 = self.observed.last().copied().unwrap_or(1.0);
        let prev_2 = if self.observed.len() >= 2 {
            self.observed[self.observed.len() - 2]
        } else {
            1.0
        };
        (prev_1 / prev_2).powf(self.wp)
    }
}

impl SpeedInterpolator for AdaptiveSpeed {
    fn load_score(&mut self, score_iois: Vec<u64>) {
        self.score_iois = score_iois;
        self.observed.clear();
        self.predicted.clear();
        self.cursor = 1;
    }

    fn interpolate(&mut self, observed_ioi: u64) -> f64 {
        if self.score_iois.is_empty() {
            warn!("score IOI list is empty; cannot interpolate tempo");
            return 1.0;
        }
        if self.cursor >= self.score_iois.len() {
            warn!("tempo cursor overran the score IOI list");
            return 1.0;
        }

        let observed = observed_ioi.max(1) as f64;
        let curr_bpm = match &self.template {
            // Seed the very first observation from the template when present.
            Some(t) if self.observed.is_empty() && !t.is_empty() => t[0],
            _ => self.score_iois[self.cursor] as f64 / observed,
        };

        if self.cursor + 1 == self.score_iois.len() {
            // Final score interval: nothing left to predict into. Echo the
            // observation itself instead of computing a new prediction.
            self.observed.push(curr_bpm);
            self.cursor += 1;
            return curr_bpm;
        }

        let avg_bpm = self.window_average();
        let template_bpm = self
            .template
            .as_ref()
            .and_then(|t| t.get(self.cursor + 1))
            .copied()
            .unwrap_or(1.0);
        let predicted =
            (self.wt * template_bpm + self.wh * avg_bpm) / (self.wt + self.wh) * self.momentum();

        self.observed.push(curr_bpm);
        self.predicted.push(predicted);
        self.cursor += 1;
        // Higher predicted tempo ⇒ smaller scale on subsequent offsets.
        1.0 / predicted
    }

    fn is_end(&self) -> bool {
        self.cursor >= self.score_iois.len()
    }

    fn describe(&self) -> String {
        format!(
            "adaptive IOI prediction (wh={}, wp={}, wt={}, window={}, template={})",
            self.wh,
            self.wp,
            self.wt,
            self.window,
            self.template.is_some()
        )
    }
}

// ─── Velocity ───────────────────────────────────────────────────────────────

pub trait VelocityInterpolator: Send {
    /// Map the performer's current hit velocity to the body velocity.
    fn interpolate(&mut self, curr_vel: u8) -> u8;

    /// Human-readable strategy description for session artifacts.
    fn describe(&self) -> String;
}

/// Body dynamics track the performer's hit velocity exactly.
#[derive(Debug, Default)]
pub struct PassthroughVelocity;

impl VelocityInterpolator for PassthroughVelocity {
    fn interpolate(&mut self, curr_vel: u8) -> u8 {
        curr_vel
    }

    fn describe(&self) -> String {
        "passthrough velocity".into()
    }
}

/// Decaying moving average: smooths spikes and dips while the ceiling
/// `decay * curr_vel` keeps predictions from outgrowing the performer's
/// current hit.
#[derive(Debug)]
pub struct DecayingAverageVelocity {
    alpha: f64,
    decay: f64,
    past: Option<f64>,
}

impl Default for DecayingAverageVelocity {
    fn default() -> Self {
        Self::new(0.5, 0.8)
    }
}

impl DecayingAverageVelocity {
    pub fn new(alpha: f64, decay: f64) -> Self {
        Self {
            alpha,
            decay,
            past: None,
        }
    }
}

impl VelocityInterpolator for DecayingAverageVelocity {
    fn interpolate(&mut self, curr_vel: u8) -> u8 {
        let curr = curr_vel as f64;
        match self.past {
            None => {
                let seeded = curr * self.decay;
                self.past = Some(seeded);
                seeded as u8
            }
            Some(past) => {
                let ceiling = self.decay * curr;
                let blended = self.alpha * self.decay * past
                    + (1.0 - self.alpha) * ceiling.min(past);
                let out = blended.min(ceiling) as u8;
                self.past = Some(out as f64);
                out
            }
        }
    }

    fn describe(&self) -> String {
        format!(
            "decaying moving average (alpha={}, decay={})",
            self.alpha, self.decay
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCORE: [u64; 6] = [1, 20, 10, 10, 20, 20];
    const OBSERVED: [u64; 5] = [25, 15, 15, 18, 18];

    fn run_adaptive(score: &[u64], observed: &[u64]) -> (Vec<f64>, bool) {
        let mut interp = AdaptiveSpeed::new();
        interp.load_score(score.to_vec());
        let ratios: Vec<f64> = observed.iter().map(|&o| interp.interpolate(o)).collect();
        (ratios, interp.is_end())
    }

    #[test]
    fn test_fixed_speed_is_always_neutral() {
        let mut fixed = FixedSpeed;
        fixed.load_score(vec![1, 10, 10]);
        for ioi in [1u64, 5, 500] {
            assert_eq!(fixed.interpolate(ioi), 1.0);
        }
        assert!(fixed.is_end());
    }

    #[test]
    fn test_adaptive_deterministic_and_terminates() {
        let (first, end_first) = run_adaptive(&SCORE, &OBSERVED);
        let (second, end_second) = run_adaptive(&SCORE, &OBSERVED);
        assert_eq!(first, second);
        assert!(end_first && end_second);
        assert_eq!(first.len(), OBSERVED.len());
        assert!(first.iter().all(|r| r.is_finite() && *r > 0.0));
    }

    #[test]
    fn test_adaptive_first_prediction_is_neutral() {
        // With no history and no template, the first prediction blends
        // neutral averages: (wt·1 + wh·1)/(wt+wh) · 1 = 1.
        let (ratios, _) = run_adaptive(&SCORE, &OBSERVED);
        assert!((ratios[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_adaptive_second_prediction_matches_model() {
        // After observing 20/25 = 0.8: avg = 0.8, momentum = 0.8^0.25,
        // predicted = (0.5·1 + 1·0.8)/1.5 · 0.8^0.25; returned 1/predicted.
        let (ratios, _) = run_adaptive(&SCORE, &OBSERVED);
        let predicted = (0.5 + 0.8) / 1.5 * 0.8f64.powf(0.25);
        assert!((ratios[1] - 1.0 / predicted).abs() < 1e-12);
    }

    #[test]
    fn test_adaptive_final_call_echoes_observation() {
        // Last call compares score IOI 20 against observed 18 and returns
        // that ratio verbatim.
        let (ratios, end) = run_adaptive(&SCORE, &OBSERVED);
        assert!((ratios[4] - 20.0 / 18.0).abs() < 1e-12);
        assert!(end);
    }

    #[test]
    fn test_adaptive_empty_score_fails_soft() {
        let mut interp = AdaptiveSpeed::new();
        assert_eq!(interp.interpolate(10), 1.0);
        assert!(interp.is_end());
    }

    #[test]
    fn test_adaptive_cursor_overrun_fails_soft() {
        let mut interp = AdaptiveSpeed::new();
        interp.load_score(vec![1, 10]);
        let _ = interp.interpolate(10);
        assert!(interp.is_end());
        assert_eq!(interp.interpolate(10), 1.0);
    }

    #[test]
    fn test_adaptive_template_seeds_first_observation() {
        let mut interp = AdaptiveSpeed::new().with_template(vec![1.25, 1.25, 1.25]);
        interp.load_score(SCORE.to_vec());
        let _ = interp.interpolate(25);
        assert_eq!(interp.observed_history(), &[1.25]);
    }

    #[test]
    fn test_adaptive_zero_ioi_does_not_divide_by_zero() {
        let mut interp = AdaptiveSpeed::new();
        interp.load_score(SCORE.to_vec());
        let ratio = interp.interpolate(0);
        assert!(ratio.is_finite() && ratio > 0.0);
    }

    #[test]
    fn test_velocity_first_call_seeds_decayed() {
        let mut v = DecayingAverageVelocity::new(0.5, 0.8);
        assert_eq!(v.interpolate(100), 80);
    }

    #[test]
    fn test_velocity_never_exceeds_ceiling() {
        let mut v = DecayingAverageVelocity::default();
        let inputs = [0u8, 127, 1, 90, 90, 90, 127, 30, 127, 64, 5, 120];
        for &curr in &inputs {
            let out = v.interpolate(curr);
            assert!(
                out as f64 <= 0.8 * curr as f64 + 1e-9,
                "velocity {} exceeded ceiling for input {}",
                out,
                curr
            );
        }
    }

    #[test]
    fn test_velocity_smooths_toward_past() {
        let mut v = DecayingAverageVelocity::new(0.5, 0.8);
        let first = v.interpolate(100); // 80
        let second = v.interpolate(100);
        // ceiling 80, past 80 → 0.5·0.8·80 + 0.5·80 = 72
        assert_eq!(first, 80);
        assert_eq!(second, 72);
        // A quiet hit caps the output at its own ceiling
        let third = v.interpolate(20);
        assert_eq!(third, 16);
    }

    #[test]
    fn test_passthrough_velocity() {
        let mut v = PassthroughVelocity;
        assert_eq!(v.interpolate(64), 64);
        assert_eq!(v.interpolate(0), 0);
    }

    #[test]
    fn test_describe_strings_are_distinct() {
        assert_ne!(FixedSpeed.describe(), AdaptiveSpeed::new().describe());
        assert_ne!(
            PassthroughVelocity.describe(),
            DecayingAverageVelocity::default().describe()
        );
    }
}
