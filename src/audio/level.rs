use std::collections::VecDeque;

use super::frame::Frame;

/// RMS loudness with a fixed gain, plus the gate that decides whether a cycle
/// is worth a spectral analysis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelMeter {
    gain: f32,
    threshold: f32,
}

impl LevelMeter {
    pub fn new(gain: f32, threshold: f32) -> Self {
        Self { gain, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Gained RMS of the frame. Empty, silent or non-finite frames give 0.0.
    pub fn compute_level(&self, frame: &Frame) -> f32 {
        let samples = frame.samples();
        if samples.is_empty() {
            return 0.0;
        }
        let mean_square = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
        let level = mean_square.sqrt() * self.gain;
        if level.is_finite() && level > 0.0 {
            level
        } else {
            0.0
        }
    }

    pub fn passes_gate(&self, level: f32) -> bool {
        level >= self.threshold && level > 0.0
    }
}

/// Fixed-capacity window of recent levels, oldest evicted first.
#[derive(Clone, Debug)]
pub struct LevelHistory {
    levels: VecDeque<f32>,
    capacity: usize,
}

impl LevelHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            levels: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, level: f32) {
        if self.levels.len() == self.capacity {
            self.levels.pop_front();
        }
        self.levels.push_back(level);
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.levels.len() == self.capacity
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &f32> {
        self.levels.iter()
    }

    pub fn mean(&self) -> f32 {
        if self.levels.is_empty() {
            return 0.0;
        }
        self.levels.iter().sum::<f32>() / self.levels.len() as f32
    }

    /// Standard deviation divided by the mean; 0.0 when the mean is zero.
    pub fn variation(&self) -> f32 {
        let mean = self.mean();
        if mean <= f32::EPSILON {
            return 0.0;
        }
        let var = self.levels.iter().map(|l| (l - mean).powi(2)).sum::<f32>()
            / self.levels.len() as f32;
        var.sqrt() / mean
    }

    /// Local maxima rising above `ratio` times the mean.
    pub fn count_peaks(&self, ratio: f32) -> usize {
        let floor = self.mean() * ratio;
        let levels: Vec<f32> = self.levels.iter().copied().collect();
        levels
            .windows(3)
            .filter(|w| w[1] > w[0] && w[1] >= w[2] && w[1] > floor)
            .count()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PatternSettings {
    pub history_len: usize,
    pub min_variation: f32,
    pub min_peaks: usize,
    pub peak_ratio: f32,
    pub cooldown_secs: f64,
}

impl Default for PatternSettings {
    fn default() -> Self {
        Self {
            history_len: 20,
            min_variation: 0.3,
            min_peaks: 3,
            peak_ratio: 1.2,
            cooldown_secs: 10.0,
        }
    }
}

/// Pitch-free fallback: flags a melody-like loudness contour (several
/// distinct swells over a varied envelope) in the level history.
#[derive(Clone, Debug)]
pub struct PatternDetector {
    settings: PatternSettings,
    history: LevelHistory,
    last_fired: Option<f64>,
}

impl PatternDetector {
    pub fn new(settings: PatternSettings) -> Self {
        let history = LevelHistory::new(settings.history_len);
        Self {
            settings,
            history,
            last_fired: None,
        }
    }

    pub fn history(&self) -> &LevelHistory {
        &self.history
    }

    pub fn record(&mut self, level: f32) {
        self.history.push(level);
    }

    /// Evaluate the current window. A hit clears the history and starts the cooldown.
    pub fn evaluate(&mut self, now: f64) -> bool {
        if !self.history.is_full() {
            return false;
        }
        if let Some(last) = self.last_fired {
            if now - last < self.settings.cooldown_secs {
                return false;
            }
        }

        let variation = self.history.variation();
        let peaks = self.history.count_peaks(self.settings.peak_ratio);
        if variation < self.settings.min_variation || peaks < self.settings.min_peaks {
            return false;
        }

        log::debug!("level pattern: variation={:.2} peaks={}", variation, peaks);
        self.last_fired = Some(now);
        self.history.clear();
        true
    }
}
