//! Capture pipeline
//!
//! Runs once per captured buffer: validate, resample to the wire rate,
//! PCM16-encode, verify non-silent, meter. Drops are counted, never
//! fatal; a sustained silent mic only costs counter updates.

use crate::{
    WIRE_SAMPLE_RATE,
    buffer::AudioBuffer,
    convert::{encode_pcm16_le, is_all_zero, is_live_capture, resample_linear},
    emotion::{Emotion, EmotionDetector, EmotionThresholds},
    meter::LevelMeter,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// How often dropped-buffer warnings make it into the log.
const DROP_LOG_INTERVAL: u64 = 100;

#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub captured: AtomicU64,
    pub sent: AtomicU64,
    pub dropped_silent: AtomicU64,
    pub dropped_zero_output: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub captured: u64,
    pub sent: u64,
    pub dropped_silent: u64,
    pub dropped_zero_output: u64,
}

impl PipelineCounters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            captured: self.captured.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            dropped_silent: self.dropped_silent.load(Ordering::Relaxed),
            dropped_zero_output: self.dropped_zero_output.load(Ordering::Relaxed),
        }
    }
}

pub struct CapturePipeline {
    counters: PipelineCounters,
    meter: Mutex<LevelMeter>,
    emotion: Mutex<EmotionDetector>,
}

impl CapturePipeline {
    pub fn new(meter: LevelMeter, thresholds: EmotionThresholds) -> Self {
        Self {
            counters: PipelineCounters::default(),
            meter: Mutex::new(meter),
            emotion: Mutex::new(EmotionDetector::new(thresholds)),
        }
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    /// Input level bars, smoothed, for UI readers.
    pub fn input_levels(&self) -> Vec<f32> {
        self.meter.lock().snapshot()
    }

    pub fn current_emotion(&self) -> Emotion {
        self.emotion.lock().current()
    }

    /// Run one captured buffer through the pipeline.
    ///
    /// Returns the PCM16 wire frame, or `None` when the buffer was dropped
    /// (silent capture or all-zero encode).
    pub fn process(&self, buffer: AudioBuffer) -> Option<Vec<u8>> {
        self.counters.captured.fetch_add(1, Ordering::Relaxed);
        let in_rate = buffer.sample_rate();
        let mono = buffer.into_mono();

        if !is_live_capture(&mono) {
            let drops = self.counters.dropped_silent.fetch_add(1, Ordering::Relaxed) + 1;
            if drops % DROP_LOG_INTERVAL == 0 {
                warn!(drops, "still dropping silent capture buffers");
            }
            return None;
        }

        {
            let mut meter = self.meter.lock();
            meter.update(&mono);
        }
        let mean_amplitude = mono.iter().map(|s| s.abs()).sum::<f32>() / mono.len() as f32;
        if let Some(emotion) = self.emotion.lock().push(mean_amplitude) {
            debug!(emotion = emotion.as_str(), "emotion label changed");
        }

        let resampled = resample_linear(&mono, in_rate, WIRE_SAMPLE_RATE);
        let bytes = encode_pcm16_le(&resampled);
        if is_all_zero(&bytes) {
            self.counters
                .dropped_zero_output
                .fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        Some(bytes)
    }
}

impl Default for CapturePipeline {
    fn default() -> Self {
        Self::new(LevelMeter::default(), EmotionThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speech_buffer(frames: usize, rate: u32) -> AudioBuffer {
        let samples: Vec<f32> = (0..frames)
            .map(|i| 0.2 * (i as f32 * 0.05).sin())
            .collect();
        AudioBuffer::mono(samples, rate)
    }

    #[test]
    fn test_live_buffer_produces_wire_frame() {
        let pipeline = CapturePipeline::default();
        let frame = pipeline.process(speech_buffer(4800, 48_000)).unwrap();
        // 4800 frames at 48k resample to 2400 at 24k, two bytes each.
        assert_eq!(frame.len(), 2400 * 2);

        let counters = pipeline.counters();
        assert_eq!(counters.captured, 1);
        assert_eq!(counters.sent, 1);
        assert_eq!(counters.dropped_silent, 0);
    }

    #[test]
    fn test_silent_buffer_dropped_and_counted() {
        let pipeline = CapturePipeline::default();
        let frame = pipeline.process(AudioBuffer::mono(vec![0.0; 4800], 48_000));
        assert!(frame.is_none());

        let counters = pipeline.counters();
        assert_eq!(counters.captured, 1);
        assert_eq!(counters.sent, 0);
        assert_eq!(counters.dropped_silent, 1);
    }

    #[test]
    fn test_sustained_silence_only_updates_counters() {
        let pipeline = CapturePipeline::default();
        for _ in 0..250 {
            assert!(pipeline.process(AudioBuffer::mono(vec![0.0; 480], 48_000)).is_none());
        }
        assert_eq!(pipeline.counters().dropped_silent, 250);
        assert!(pipeline.input_levels().iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_stereo_capture_downmixes() {
        let pipeline = CapturePipeline::default();
        let interleaved: Vec<f32> = (0..9600).map(|i| if i % 2 == 0 { 0.3 } else { 0.1 }).collect();
        let buffer = AudioBuffer::from_interleaved(&interleaved, 2, 48_000);
        let frame = pipeline.process(buffer).unwrap();
        assert_eq!(frame.len(), 2400 * 2);
    }

    #[test]
    fn test_levels_move_after_live_audio() {
        let pipeline = CapturePipeline::default();
        pipeline.process(speech_buffer(4800, 48_000));
        assert!(pipeline.input_levels().iter().any(|&b| b > 0.0));
    }
}
