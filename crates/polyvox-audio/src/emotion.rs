//! Emotion heuristics from audio-level statistics
//!
//! A sliding window of per-buffer mean amplitudes, classified periodically
//! into a coarse label. The label is a courtesy signal for callers (UI
//! mood hints); it never gates the pipeline.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emotion {
    Neutral,
    Excitement,
    Boredom,
    Curiosity,
    Confusion,
}

impl Emotion {
    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Excitement => "excitement",
            Emotion::Boredom => "boredom",
            Emotion::Curiosity => "curiosity",
            Emotion::Confusion => "confusion",
        }
    }
}

/// Classification thresholds over normalized mean amplitude (0..1 scale,
/// where conversational speech typically sits in 0.03..0.2).
///
/// Ranges worth staying inside when tuning:
/// - `mean_high`: 0.10..0.30 — above this the speaker is loud
/// - `mean_low`: 0.01..0.05 — below this the speaker is near-silent
/// - `std_high`: 0.02..0.10 — above this the level is swinging
/// - `std_low`: 0.005..0.02 — below this the level is flat
/// - `std_surge`: 0.05..0.15 — bursts typical of rising intonation
#[derive(Debug, Clone)]
pub struct EmotionThresholds {
    pub mean_high: f32,
    pub mean_low: f32,
    pub std_high: f32,
    pub std_low: f32,
    pub std_surge: f32,
}

impl Default for EmotionThresholds {
    fn default() -> Self {
        Self {
            mean_high: 0.15,
            mean_low: 0.03,
            std_high: 0.04,
            std_low: 0.01,
            std_surge: 0.08,
        }
    }
}

pub struct EmotionDetector {
    thresholds: EmotionThresholds,
    window: VecDeque<(Instant, f32)>,
    window_duration: Duration,
    classify_interval: Duration,
    last_classified: Instant,
    current: Emotion,
}

impl EmotionDetector {
    pub fn new(thresholds: EmotionThresholds) -> Self {
        Self {
            thresholds,
            window: VecDeque::new(),
            window_duration: Duration::from_secs(4),
            classify_interval: Duration::from_secs(2),
            last_classified: Instant::now(),
            current: Emotion::Neutral,
        }
    }

    pub fn current(&self) -> Emotion {
        self.current
    }

    /// Record one buffer's mean amplitude and reclassify when the
    /// interval has elapsed. Returns the new label when it changed.
    pub fn push(&mut self, mean_amplitude: f32) -> Option<Emotion> {
        let now = Instant::now();
        self.window.push_back((now, mean_amplitude));
        while let Some(&(t, _)) = self.window.front() {
            if now.duration_since(t) > self.window_duration {
                self.window.pop_front();
            } else {
                break;
            }
        }

        if now.duration_since(self.last_classified) < self.classify_interval {
            return None;
        }
        self.last_classified = now;

        let next = self.classify();
        if next != self.current {
            self.current = next;
            Some(next)
        } else {
            None
        }
    }

    /// Classify the current window. Pure given the window contents.
    pub fn classify(&self) -> Emotion {
        if self.window.len() < 2 {
            return Emotion::Neutral;
        }
        let n = self.window.len() as f32;
        let mean: f32 = self.window.iter().map(|(_, a)| a).sum::<f32>() / n;
        let variance: f32 = self
            .window
            .iter()
            .map(|(_, a)| (a - mean) * (a - mean))
            .sum::<f32>()
            / n;
        let std = variance.sqrt();

        let t = &self.thresholds;
        if mean > t.mean_high && std > t.std_high {
            Emotion::Excitement
        } else if mean < t.mean_low && std < t.std_low {
            Emotion::Boredom
        } else if std > t.std_surge && mean >= t.mean_low && mean <= t.mean_high {
            Emotion::Curiosity
        } else if std > t.std_high && mean < t.mean_low {
            Emotion::Confusion
        } else {
            Emotion::Neutral
        }
    }

    #[cfg(test)]
    fn fill_window(&mut self, amplitudes: &[f32]) {
        let now = Instant::now();
        self.window.clear();
        for &a in amplitudes {
            self.window.push_back((now, a));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> EmotionDetector {
        EmotionDetector::new(EmotionThresholds::default())
    }

    #[test]
    fn test_empty_window_is_neutral() {
        assert_eq!(detector().classify(), Emotion::Neutral);
    }

    #[test]
    fn test_loud_and_swinging_is_excitement() {
        let mut d = detector();
        d.fill_window(&[0.1, 0.3, 0.12, 0.32, 0.1, 0.34]);
        assert_eq!(d.classify(), Emotion::Excitement);
    }

    #[test]
    fn test_quiet_and_flat_is_boredom() {
        let mut d = detector();
        d.fill_window(&[0.01, 0.012, 0.011, 0.01, 0.013]);
        assert_eq!(d.classify(), Emotion::Boredom);
    }

    #[test]
    fn test_moderate_mean_with_surge_is_curiosity() {
        let mut d = detector();
        d.fill_window(&[0.02, 0.2, 0.03, 0.22, 0.04, 0.2]);
        let mean = (0.02 + 0.2 + 0.03 + 0.22 + 0.04 + 0.2) / 6.0;
        assert!(mean > 0.03 && mean < 0.15, "fixture drifted: {mean}");
        assert_eq!(d.classify(), Emotion::Curiosity);
    }

    #[test]
    fn test_low_mean_with_swings_is_confusion() {
        let mut d = detector();
        d.fill_window(&[0.0, 0.1, 0.0, 0.1, 0.0, 0.0, 0.0, 0.0]);
        let mean = 0.2 / 8.0;
        assert!(mean < 0.03, "fixture drifted: {mean}");
        assert_eq!(d.classify(), Emotion::Confusion);
    }

    #[test]
    fn test_ordinary_speech_is_neutral() {
        let mut d = detector();
        d.fill_window(&[0.05, 0.06, 0.055, 0.06, 0.05]);
        assert_eq!(d.classify(), Emotion::Neutral);
    }

    #[test]
    fn test_push_respects_interval() {
        let mut d = detector();
        // First pushes land inside the classify interval: no label yet.
        assert!(d.push(0.3).is_none());
        assert!(d.push(0.1).is_none());
        assert_eq!(d.current(), Emotion::Neutral);
    }
}
