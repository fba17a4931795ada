use std::path::Path;

use crate::audio;
use crate::error::KtResult;
use crate::model::VadSettings;

/// Analysis frame length for speech detection.
const FRAME_MS: u32 = 30;

/// A retained speech span in sample indices, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechSpan {
    pub start: usize,
    pub end: usize,
}

/// Detect speech spans in the current artifact and concatenate them into a
/// new one, dropping silence.
///
/// Returns `false` without writing anything when no speech is detected: the
/// filter never produces an empty artifact, the caller keeps the original.
pub fn run(input: &Path, output: &Path, settings: &VadSettings) -> KtResult<bool> {
    let (samples, rate) = audio::read_wav_mono(input)?;
    let spans = detect_speech_spans(&samples, rate, settings);
    if spans.is_empty() {
        return Ok(false);
    }

    let retained = concat_spans(&samples, &spans);
    audio::write_wav_mono(output, &retained, rate)?;
    Ok(true)
}

/// Frame-level speech probability from windowed RMS energy.
///
/// A logistic curve centered at -35 dBFS maps level to probability, so the
/// 0.5 threshold sits at the usual boundary between room noise and speech.
pub fn speech_probability(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let mean_square: f64 = frame
        .iter()
        .map(|&sample| f64::from(sample) * f64::from(sample))
        .sum::<f64>()
        / frame.len() as f64;
    let rms = mean_square.sqrt().max(1e-6);
    let db = 20.0 * rms.log10();
    let x = (db + 35.0) / 4.0;
    (1.0 / (1.0 + (-x).exp())) as f32
}

pub fn detect_speech_spans(
    samples: &[f32],
    sample_rate: u32,
    settings: &VadSettings,
) -> Vec<SpeechSpan> {
    let frame_len = (sample_rate * FRAME_MS / 1000) as usize;
    if frame_len == 0 || samples.is_empty() {
        return Vec::new();
    }

    let ms_to_samples = |ms: u32| (sample_rate as u64 * u64::from(ms) / 1000) as usize;
    let min_silence = ms_to_samples(settings.min_silence_ms);
    let min_speech = ms_to_samples(settings.min_speech_ms);
    let pad = ms_to_samples(settings.pad_ms);

    // Raw spans from consecutive speech frames.
    let mut spans: Vec<SpeechSpan> = Vec::new();
    let mut open: Option<usize> = None;
    for (index, frame) in samples.chunks(frame_len).enumerate() {
        let is_speech = speech_probability(frame) >= settings.threshold;
        let frame_start = index * frame_len;
        match (is_speech, open) {
            (true, None) => open = Some(frame_start),
            (false, Some(start)) => {
                spans.push(SpeechSpan {
                    start,
                    end: frame_start,
                });
                open = None;
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        spans.push(SpeechSpan {
            start,
            end: samples.len(),
        });
    }

    // Silence gaps shorter than the minimum do not split spans.
    let mut merged: Vec<SpeechSpan> = Vec::new();
    for span in spans {
        match merged.last_mut() {
            Some(prev) if span.start.saturating_sub(prev.end) < min_silence => {
                prev.end = span.end;
            }
            _ => merged.push(span),
        }
    }

    // Drop spans too short to be speech, then pad and re-merge overlaps.
    merged.retain(|span| span.end - span.start >= min_speech.max(1));

    let mut padded: Vec<SpeechSpan> = Vec::new();
    for span in merged {
        let start = span.start.saturating_sub(pad);
        let end = (span.end + pad).min(samples.len());
        match padded.last_mut() {
            Some(prev) if start <= prev.end => prev.end = end,
            _ => padded.push(SpeechSpan { start, end }),
        }
    }
    padded
}

pub fn concat_spans(samples: &[f32], spans: &[SpeechSpan]) -> Vec<f32> {
    let total: usize = spans.iter().map(|span| span.end - span.start).sum();
    let mut out = Vec::with_capacity(total);
    for span in spans {
        out.extend_from_slice(&samples[span.start..span.end]);
    }
    out
}
