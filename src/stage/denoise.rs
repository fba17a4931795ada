use std::path::Path;

use nnnoiseless::DenoiseState;

use crate::audio;
use crate::error::{KtError, KtResult};

/// RNNoise operates at a fixed 48 kHz sample rate.
pub const MODEL_SAMPLE_RATE: u32 = 48_000;

/// Suppress noise in the current artifact: resample up to the model's native
/// rate, denoise frame by frame, resample back, write a new artifact.
pub fn run(input: &Path, output: &Path) -> KtResult<()> {
    let (samples, rate) = audio::read_wav_mono(input)?;
    if samples.is_empty() {
        return Err(KtError::Audio("empty audio buffer".to_owned()));
    }

    let upsampled = audio::resample(&samples, rate, MODEL_SAMPLE_RATE)?;
    let denoised = denoise_48k(&upsampled);
    let restored = audio::resample(&denoised, MODEL_SAMPLE_RATE, rate)?;
    audio::write_wav_mono(output, &restored, rate)
}

/// Run RNNoise over 10 ms frames (480 samples at 48 kHz). The model expects
/// 16-bit PCM stored as floats, so samples are scaled up on the way in and
/// back down on the way out. The final partial frame is zero-padded and the
/// padding trimmed from the output.
fn denoise_48k(samples: &[f32]) -> Vec<f32> {
    const FRAME_SIZE: usize = DenoiseState::FRAME_SIZE;
    const PCM_SCALE: f32 = 32_767.0;

    let mut state = DenoiseState::new();
    let mut in_frame = [0.0f32; FRAME_SIZE];
    let mut out_frame = [0.0f32; FRAME_SIZE];
    let mut output = Vec::with_capacity(samples.len());

    for chunk in samples.chunks(FRAME_SIZE) {
        in_frame.fill(0.0);
        for (slot, &sample) in in_frame.iter_mut().zip(chunk) {
            *slot = sample * PCM_SCALE;
        }
        state.process_frame(&mut out_frame, &in_frame);
        output.extend(out_frame[..chunk.len()].iter().map(|v| v / PCM_SCALE));
    }

    output
}
