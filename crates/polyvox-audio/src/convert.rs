//! Validation, resampling and PCM16 conversion
//!
//! The hot path of the capture pipeline. Per-sample work is O(n) linear
//! interpolation, cheap enough to run inline on the capture side.

/// Samples inspected when deciding whether a capture buffer is live.
const VALIDATE_WINDOW: usize = 100;

/// A live buffer needs at least one sample above this.
const VALIDITY_THRESHOLD: f32 = 0.001;

/// And a peak above this (anything lower reads as a dead or muted mic).
const PEAK_THRESHOLD: f32 = 0.01;

/// Whether a captured buffer carries signal worth sending.
///
/// Scans up to the first [`VALIDATE_WINDOW`] samples: at least one must
/// clear the validity threshold and the windowed peak must clear the peak
/// threshold. Silent and disconnected-mic buffers fail both.
pub fn is_live_capture(samples: &[f32]) -> bool {
    if samples.is_empty() {
        return false;
    }
    let window = &samples[..samples.len().min(VALIDATE_WINDOW)];
    let mut any_valid = false;
    let mut peak = 0.0f32;
    for &s in window {
        let magnitude = s.abs();
        if magnitude > VALIDITY_THRESHOLD {
            any_valid = true;
        }
        peak = peak.max(magnitude);
    }
    any_valid && peak > PEAK_THRESHOLD
}

/// Linear-interpolation resample from `in_rate` to `out_rate`, clamped to
/// `[-1, 1]`.
///
/// Output length is exactly `ceil(in_frames * out_rate / in_rate)`. For
/// each output index the fractional source position interpolates the two
/// adjacent input samples; the last input sample extends to the edge.
pub fn resample_linear(input: &[f32], in_rate: u32, out_rate: u32) -> Vec<f32> {
    if input.is_empty() || in_rate == 0 {
        return Vec::new();
    }
    if in_rate == out_rate {
        return input.iter().map(|s| s.clamp(-1.0, 1.0)).collect();
    }

    let ratio = out_rate as f64 / in_rate as f64;
    let out_len = (input.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src = i as f64 / ratio;
        let i0 = src as usize;
        let frac = (src - i0 as f64) as f32;
        let s0 = input[i0.min(input.len() - 1)];
        let s1 = input[(i0 + 1).min(input.len() - 1)];
        output.push((s0 + (s1 - s0) * frac).clamp(-1.0, 1.0));
    }
    output
}

/// Encode float samples as 16-bit little-endian signed PCM.
pub fn encode_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let value = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode 16-bit little-endian signed PCM into float samples.
///
/// A trailing odd byte is ignored.
pub fn decode_pcm16_le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Whether an encoded frame is entirely zero bytes.
pub fn is_all_zero(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_is_not_live() {
        assert!(!is_live_capture(&[]));
        assert!(!is_live_capture(&[0.0; 4800]));
        assert!(!is_live_capture(&[0.0005; 4800]));
    }

    #[test]
    fn test_quiet_but_under_peak_is_not_live() {
        // Clears the validity threshold but not the peak threshold.
        assert!(!is_live_capture(&[0.005; 4800]));
    }

    #[test]
    fn test_speech_level_is_live() {
        let mut samples = vec![0.0f32; 4800];
        samples[10] = 0.2;
        assert!(is_live_capture(&samples));
    }

    #[test]
    fn test_signal_past_window_is_ignored() {
        // Validation only scans the leading window.
        let mut samples = vec![0.0f32; 4800];
        samples[500] = 0.5;
        assert!(!is_live_capture(&samples));
    }

    #[test]
    fn test_resample_length_law() {
        for (in_len, in_rate, out_rate) in
            [(4800, 48_000u32, 24_000u32), (441, 44_100, 24_000), (160, 16_000, 24_000), (7, 48_000, 24_000)]
        {
            let input = vec![0.1f32; in_len];
            let output = resample_linear(&input, in_rate, out_rate);
            let expected = (in_len as f64 * out_rate as f64 / in_rate as f64).ceil() as usize;
            assert_eq!(output.len(), expected, "{in_len}@{in_rate}->{out_rate}");
        }
    }

    #[test]
    fn test_resample_interpolates() {
        // Doubling 24k -> 48k over a ramp puts midpoints between samples.
        let input = [0.0f32, 1.0, 0.0];
        let output = resample_linear(&input, 24_000, 48_000);
        assert_eq!(output.len(), 6);
        assert!((output[0] - 0.0).abs() < 1e-6);
        assert!((output[1] - 0.5).abs() < 1e-6);
        assert!((output[2] - 1.0).abs() < 1e-6);
        assert!((output[3] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_resample_clamps() {
        let input = [2.0f32, -2.0];
        let output = resample_linear(&input, 48_000, 24_000);
        assert!(output.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_pcm16_encode_known_values() {
        let bytes = encode_pcm16_le(&[0.0, 1.0, -1.0]);
        assert_eq!(&bytes[0..2], &[0, 0]);
        assert_eq!(&bytes[2..4], &32767i16.to_le_bytes());
        assert_eq!(&bytes[4..6], &(-32767i16).to_le_bytes());
    }

    #[test]
    fn test_pcm16_byte_length_law() {
        // Wire bytes are exactly ceil(in_frames * 24000 / in_rate) * 2.
        let input = vec![0.25f32; 4800];
        let resampled = resample_linear(&input, 48_000, 24_000);
        let bytes = encode_pcm16_le(&resampled);
        assert_eq!(bytes.len(), 2400 * 2);
    }

    #[test]
    fn test_pcm16_decode_inverts_encode_closely() {
        let samples = [0.0f32, 0.5, -0.5, 0.999];
        let decoded = decode_pcm16_le(&encode_pcm16_le(&samples));
        for (a, b) in samples.iter().zip(&decoded) {
            assert!((a - b).abs() < 1.0 / 32000.0, "{a} vs {b}");
        }
    }

    #[test]
    fn test_all_zero_detection() {
        assert!(is_all_zero(&[0, 0, 0, 0]));
        assert!(!is_all_zero(&[0, 1, 0, 0]));
        assert!(is_all_zero(&encode_pcm16_le(&[0.0; 10])));
    }
}
