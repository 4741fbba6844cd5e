//! Polyvox Audio Engine
//!
//! Capture → resample → PCM16 → session, and the reverse playback path:
//!
//! - [`buffer`]: planar float32 audio buffers
//! - [`convert`]: validation, linear resampling, PCM16 encode/decode
//! - [`meter`]: bar-partitioned level metering with smoothing
//! - [`pipeline`]: the per-buffer capture pipeline with drop accounting
//! - [`playback`]: decoded playback queue with lazy start
//! - [`emotion`]: audio-level statistics mapped to a discrete label
//! - [`engine`]: cpal device streams wired to the pipeline
//!
//! The real-time device callbacks only move samples across a lock-free
//! ring; everything with allocation or locking happens on the engine's
//! worker thread.

pub mod buffer;
pub mod convert;
pub mod emotion;
pub mod engine;
pub mod meter;
pub mod pipeline;
pub mod playback;

pub use buffer::AudioBuffer;
pub use emotion::{Emotion, EmotionDetector, EmotionThresholds};
pub use engine::{AudioEngine, AudioEngineConfig, AudioError, FrameSink};
pub use meter::{LevelMeter, N_LEVEL_BARS};
pub use pipeline::{CapturePipeline, CountersSnapshot, PipelineCounters};
pub use playback::{PlaybackError, PlaybackQueue};

/// Sample rate of audio on the session wire.
pub const WIRE_SAMPLE_RATE: u32 = 24_000;
