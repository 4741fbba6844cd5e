//! Planar float32 audio buffers
//!
//! Buffers are never retained across pipeline stages: each stage converts
//! and releases. Channels are stored planar (one Vec per channel) because
//! that is what the capture tap hands over and what downmixing wants.

#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// One sample vector per channel, all the same length
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        debug_assert!(!channels.is_empty());
        debug_assert!(channels.windows(2).all(|w| w[0].len() == w[1].len()));
        Self {
            channels,
            sample_rate,
        }
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    /// Deinterleave a device buffer into planar channels.
    pub fn from_interleaved(samples: &[f32], channel_count: usize, sample_rate: u32) -> Self {
        debug_assert!(channel_count > 0);
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        Self::new(channels, sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frame_count(&self) -> usize {
        self.channels[0].len()
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Downmix to mono by averaging channels. A mono buffer is returned
    /// as-is without copying.
    pub fn into_mono(self) -> Vec<f32> {
        let mut channels = self.channels;
        if channels.len() == 1 {
            return channels.pop().unwrap();
        }
        let frames = channels[0].len();
        let scale = 1.0 / channels.len() as f32;
        let mut mono = Vec::with_capacity(frames);
        for i in 0..frames {
            let sum: f32 = channels.iter().map(|c| c[i]).sum();
            mono.push(sum * scale);
        }
        mono
    }
}
