//! Level metering
//!
//! A buffer is partitioned into bars; each bar blends RMS and peak,
//! amplified and clamped to `[0, 1]`, then exponentially smoothed against
//! the previous frame so UI meters move without flicker. Readers get
//! snapshots; the engine updates in place under a brief lock.

pub const N_LEVEL_BARS: usize = 40;

const RMS_WEIGHT: f32 = 0.7;
const PEAK_WEIGHT: f32 = 0.3;
const SMOOTHING_PREV: f32 = 0.15;
const SMOOTHING_NEW: f32 = 0.85;

#[derive(Debug, Clone)]
pub struct LevelMeter {
    bars: Vec<f32>,
    gain: f32,
}

impl LevelMeter {
    pub fn new(bar_count: usize, gain: f32) -> Self {
        Self {
            bars: vec![0.0; bar_count],
            gain,
        }
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    /// Fold one buffer of samples into the bars.
    pub fn update(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let bar_count = self.bars.len();
        let chunk = samples.len().div_ceil(bar_count).max(1);
        for (bar_index, bar) in self.bars.iter_mut().enumerate() {
            let start = bar_index * chunk;
            if start >= samples.len() {
                *bar = SMOOTHING_PREV * *bar;
                continue;
            }
            let segment = &samples[start..(start + chunk).min(samples.len())];

            let mut sum_squares = 0.0f32;
            let mut peak = 0.0f32;
            for &s in segment {
                sum_squares += s * s;
                peak = peak.max(s.abs());
            }
            let rms = (sum_squares / segment.len() as f32).sqrt();

            let level = ((RMS_WEIGHT * rms + PEAK_WEIGHT * peak) * self.gain).clamp(0.0, 1.0);
            *bar = SMOOTHING_PREV * *bar + SMOOTHING_NEW * level;
        }
    }

    pub fn reset(&mut self) {
        self.bars.fill(0.0);
    }

    /// Copy of the current bar levels.
    pub fn snapshot(&self) -> Vec<f32> {
        self.bars.clone()
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(N_LEVEL_BARS, 6.0)
    }
}
