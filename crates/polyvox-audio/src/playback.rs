//! Playback queue
//!
//! Incoming base64 PCM16 frames are decoded to float and queued for the
//! output device. Empty and zero-frame buffers are rejected at the
//! boundary; the player starts lazily on the first valid buffer. A
//! completion count is kept and logged periodically for diagnostics.

use crate::{
    convert::{decode_pcm16_le, is_all_zero},
    meter::LevelMeter,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

const COMPLETION_LOG_INTERVAL: u64 = 50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("empty playback buffer")]
    Empty,
    #[error("playback buffer decoded to zero frames")]
    ZeroFrames,
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),
}

#[derive(Default)]
struct QueueInner {
    buffers: VecDeque<Vec<f32>>,
    /// Read offset into the front buffer
    cursor: usize,
}

pub struct PlaybackQueue {
    inner: Mutex<QueueInner>,
    meter: Mutex<LevelMeter>,
    started: AtomicBool,
    enqueued: AtomicU64,
    completed: AtomicU64,
}

impl PlaybackQueue {
    pub fn new(meter: LevelMeter) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            meter: Mutex::new(meter),
            started: AtomicBool::new(false),
            enqueued: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        }
    }

    /// Decode and enqueue one base64 PCM16 frame.
    ///
    /// Returns the number of frames queued. The first valid buffer flips
    /// the started flag so the engine can start the player.
    pub fn push_base64(&self, payload: &str) -> Result<usize, PlaybackError> {
        if payload.is_empty() {
            return Err(PlaybackError::Empty);
        }
        let bytes = BASE64
            .decode(payload)
            .map_err(|e| PlaybackError::InvalidBase64(e.to_string()))?;
        if bytes.is_empty() {
            return Err(PlaybackError::Empty);
        }
        if is_all_zero(&bytes) {
            return Err(PlaybackError::ZeroFrames);
        }

        let samples = decode_pcm16_le(&bytes);
        if samples.is_empty() {
            return Err(PlaybackError::ZeroFrames);
        }
        let frames = samples.len();

        self.meter.lock().update(&samples);
        self.inner.lock().buffers.push_back(samples);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.started.store(true, Ordering::Release);
        Ok(frames)
    }

    /// Whether the player should be running (first valid buffer seen).
    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Buffers waiting to be rendered.
    pub fn pending_buffers(&self) -> usize {
        self.inner.lock().buffers.len()
    }

    pub fn enqueued_total(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn completed_total(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Output level bars for UI readers.
    pub fn output_levels(&self) -> Vec<f32> {
        self.meter.lock().snapshot()
    }

    /// Fill an output slice from the queue, zero-filling any shortfall.
    ///
    /// Called from the render path; takes only the brief queue lock and
    /// allocates nothing.
    pub fn pop_into(&self, out: &mut [f32]) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut written = 0;
        while written < out.len() {
            let Some(front) = inner.buffers.front() else {
                break;
            };
            let available = &front[inner.cursor..];
            let take = available.len().min(out.len() - written);
            out[written..written + take].copy_from_slice(&available[..take]);
            let front_len = front.len();
            written += take;
            inner.cursor += take;

            if inner.cursor >= front_len {
                inner.buffers.pop_front();
                inner.cursor = 0;
                let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
                if done % COMPLETION_LOG_INTERVAL == 0 {
                    debug!(completed = done, "playback buffers rendered");
                }
            }
        }
        out[written..].fill(0.0);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.buffers.clear();
        inner.cursor = 0;
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new(LevelMeter::default())
    }
}
