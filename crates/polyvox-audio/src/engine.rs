//! Audio engine
//!
//! Owns the cpal capture and render streams and wires them to the capture
//! pipeline and playback queue. Device callbacks run at real-time
//! priority: the capture tap only pushes samples into a lock-free ring,
//! the render tap only drains the playback queue. Everything else —
//! deinterleaving, resampling, encoding, metering — happens on the
//! engine's worker thread.
//!
//! cpal streams are not `Send`, so both streams live on the worker thread
//! for their whole lifetime.

use crate::{
    buffer::AudioBuffer,
    emotion::{Emotion, EmotionThresholds},
    meter::LevelMeter,
    pipeline::{CapturePipeline, CountersSnapshot},
    playback::{PlaybackError, PlaybackQueue},
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{
    HeapRb,
    traits::{Consumer, Producer, Split},
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Receives each encoded PCM16 frame ready for transmission.
pub type FrameSink = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no default input device")]
    NoInputDevice,
    #[error("no default output device")]
    NoOutputDevice,
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("audio stream error: {0}")]
    Stream(String),
    #[error("engine is already running")]
    AlreadyRunning,
    #[error("engine is not running")]
    NotRunning,
    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

#[derive(Debug, Clone)]
pub struct AudioEngineConfig {
    /// Frames (at the device rate) gathered before a pipeline pass
    pub capture_chunk_frames: usize,
    /// Capacity of the capture handoff ring, in samples
    pub ring_capacity: usize,
    pub emotion_thresholds: EmotionThresholds,
}

impl Default for AudioEngineConfig {
    fn default() -> Self {
        Self {
            // ~100ms at 48kHz
            capture_chunk_frames: 4800,
            ring_capacity: 48_000 * 4,
            emotion_thresholds: EmotionThresholds::default(),
        }
    }
}

pub struct AudioEngine {
    config: AudioEngineConfig,
    running: Arc<AtomicBool>,
    pipeline: Arc<CapturePipeline>,
    playback: Arc<PlaybackQueue>,
    sink: FrameSink,
    /// Samples lost because the handoff ring was full
    ring_overruns: Arc<AtomicU64>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl AudioEngine {
    pub fn new(config: AudioEngineConfig, sink: FrameSink) -> Self {
        let pipeline = Arc::new(CapturePipeline::new(
            LevelMeter::default(),
            config.emotion_thresholds.clone(),
        ));
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            pipeline,
            playback: Arc::new(PlaybackQueue::default()),
            sink,
            ring_overruns: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
        }
    }

    /// Start capture and playback.
    ///
    /// Blocks until the input device is confirmed open (or failed); the
    /// streams then keep running on the worker thread until [`Self::stop`].
    pub fn start(&self) -> Result<(), AudioError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AudioError::AlreadyRunning);
        }

        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let pipeline = Arc::clone(&self.pipeline);
        let playback = Arc::clone(&self.playback);
        let sink = Arc::clone(&self.sink);
        let ring_overruns = Arc::clone(&self.ring_overruns);

        // The worker signals open success/failure back to start().
        let (open_tx, open_rx) = mpsc::channel::<Result<(), AudioError>>();

        let handle = std::thread::Builder::new()
            .name("polyvox-audio".to_string())
            .spawn(move || {
                run_device_loop(config, running, pipeline, playback, sink, ring_overruns, open_tx);
            })
            .map_err(|e| AudioError::Stream(format!("worker spawn failed: {e}")))?;
        *self.worker.lock().unwrap() = Some(handle);

        match open_rx.recv() {
            Ok(Ok(())) => {
                info!("audio engine started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                Err(AudioError::Stream("audio worker died during startup".to_string()))
            }
        }
    }

    pub fn stop(&self) -> Result<(), AudioError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(AudioError::NotRunning);
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        info!("audio engine stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue one base64 PCM16 frame for playback.
    pub fn push_playback(&self, payload: &str) -> Result<usize, PlaybackError> {
        self.playback.push_base64(payload)
    }

    pub fn playback_buffer_count(&self) -> usize {
        self.playback.pending_buffers()
    }

    pub fn input_levels(&self) -> Vec<f32> {
        self.pipeline.input_levels()
    }

    pub fn output_levels(&self) -> Vec<f32> {
        self.playback.output_levels()
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.pipeline.counters()
    }

    pub fn current_emotion(&self) -> Emotion {
        self.pipeline.current_emotion()
    }

    pub fn ring_overruns(&self) -> u64 {
        self.ring_overruns.load(Ordering::Relaxed)
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

/// Everything cpal: open devices, run the drain loop, release on exit.
/// Runs entirely on the worker thread because streams are not `Send`.
#[allow(clippy::too_many_arguments)]
fn run_device_loop(
    config: AudioEngineConfig,
    running: Arc<AtomicBool>,
    pipeline: Arc<CapturePipeline>,
    playback: Arc<PlaybackQueue>,
    sink: FrameSink,
    ring_overruns: Arc<AtomicU64>,
    open_tx: mpsc::Sender<Result<(), AudioError>>,
) {
    let host = cpal::default_host();

    let input_device = match host.default_input_device() {
        Some(d) => d,
        None => {
            let _ = open_tx.send(Err(AudioError::NoInputDevice));
            running.store(false, Ordering::SeqCst);
            return;
        }
    };
    let input_config = match input_device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = open_tx.send(Err(AudioError::Stream(e.to_string())));
            running.store(false, Ordering::SeqCst);
            return;
        }
    };
    if input_config.sample_format() != cpal::SampleFormat::F32 {
        let _ = open_tx.send(Err(AudioError::UnsupportedFormat(format!(
            "{:?}",
            input_config.sample_format()
        ))));
        running.store(false, Ordering::SeqCst);
        return;
    }
    let in_rate = input_config.sample_rate().0;
    let in_channels = input_config.channels() as usize;

    let ring = HeapRb::<f32>::new(config.ring_capacity);
    let (mut producer, mut consumer) = ring.split();

    // Capture tap: push into the ring and count overruns. No allocation,
    // no locks, nothing else.
    let overruns = Arc::clone(&ring_overruns);
    let input_stream = input_device.build_input_stream(
        &input_config.config(),
        move |data: &[f32], _| {
            let pushed = producer.push_slice(data);
            if pushed < data.len() {
                overruns.fetch_add((data.len() - pushed) as u64, Ordering::Relaxed);
            }
        },
        |e| error!("input stream error: {e}"),
        None,
    );
    let input_stream = match input_stream {
        Ok(s) => s,
        Err(e) => {
            let _ = open_tx.send(Err(AudioError::Stream(e.to_string())));
            running.store(false, Ordering::SeqCst);
            return;
        }
    };
    if let Err(e) = input_stream.play() {
        let _ = open_tx.send(Err(AudioError::Stream(e.to_string())));
        running.store(false, Ordering::SeqCst);
        return;
    }

    // Render side. The stream is built now but only played once the first
    // valid playback buffer arrives.
    let output_stream = build_output_stream(&host, &playback);
    if output_stream.is_none() {
        warn!("no usable output device, playback disabled");
    }

    let _ = open_tx.send(Ok(()));
    debug!(rate = in_rate, channels = in_channels, "capture open");

    let chunk_samples = config.capture_chunk_frames * in_channels;
    let mut chunk = vec![0.0f32; chunk_samples];
    let mut filled = 0usize;
    let mut output_started = false;

    while running.load(Ordering::SeqCst) {
        filled += consumer.pop_slice(&mut chunk[filled..]);
        if filled == chunk_samples {
            let buffer = AudioBuffer::from_interleaved(&chunk, in_channels, in_rate);
            if let Some(frame) = pipeline.process(buffer) {
                sink(frame);
            }
            filled = 0;
        }

        if !output_started
            && playback.has_started()
            && let Some(stream) = &output_stream
        {
            if let Err(e) = stream.play() {
                error!("output stream failed to start: {e}");
            } else {
                debug!("playback started");
            }
            output_started = true;
        }

        std::thread::sleep(Duration::from_millis(5));
    }

    // Streams drop here, releasing both devices on this thread.
    drop(input_stream);
    drop(output_stream);
}

fn build_output_stream(host: &cpal::Host, playback: &Arc<PlaybackQueue>) -> Option<cpal::Stream> {
    let device = host.default_output_device()?;
    let config = device.default_output_config().ok()?;
    if config.sample_format() != cpal::SampleFormat::F32 {
        warn!("output device is not f32, playback disabled");
        return None;
    }
    let channels = config.channels() as usize;

    let queue = Arc::clone(playback);
    let mut mono = Vec::new();
    let stream = device
        .build_output_stream(
            &config.config(),
            move |data: &mut [f32], _| {
                let frames = data.len() / channels;
                mono.resize(frames, 0.0);
                queue.pop_into(&mut mono);
                for (frame, &sample) in data.chunks_exact_mut(channels).zip(&mono) {
                    frame.fill(sample);
                }
            },
            |e| error!("output stream error: {e}"),
            None,
        )
        .ok()?;
    // Not played yet: lazy start on the first valid buffer.
    stream.pause().ok();
    Some(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AudioEngineConfig::default();
        assert_eq!(config.capture_chunk_frames, 4800);
        assert!(config.ring_capacity >= config.capture_chunk_frames * 2);
    }

    #[test]
    fn test_stop_before_start_errors() {
        let engine = AudioEngine::new(AudioEngineConfig::default(), Arc::new(|_| {}));
        assert!(matches!(engine.stop(), Err(AudioError::NotRunning)));
        assert!(!engine.is_running());
    }

    #[test]
    fn test_playback_path_without_devices() {
        use crate::convert::encode_pcm16_le;
        use base64::Engine as _;

        let engine = AudioEngine::new(AudioEngineConfig::default(), Arc::new(|_| {}));
        let payload =
            base64::engine::general_purpose::STANDARD.encode(encode_pcm16_le(&[0.3; 240]));
        engine.push_playback(&payload).unwrap();
        assert_eq!(engine.playback_buffer_count(), 1);
        assert!(engine.output_levels().iter().any(|&b| b > 0.0));
    }
}
