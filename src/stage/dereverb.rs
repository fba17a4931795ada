use std::path::Path;

use realfft::RealFftPlanner;
use realfft::num_complex::Complex;

use crate::audio;
use crate::error::{KtError, KtResult};

/// STFT analysis window length.
pub const FFT_SIZE: usize = 512;
/// STFT hop between consecutive frames.
pub const HOP_SIZE: usize = 128;
/// Number of prediction filter taps per frequency bin.
pub const FILTER_TAPS: usize = 10;
/// Frames of delay before the prediction context starts.
pub const PREDICTION_DELAY: usize = 3;
/// Alternating filter/PSD re-estimation rounds.
pub const ITERATIONS: usize = 3;

/// Output peak magnitude after normalization.
const PEAK_TARGET: f32 = 0.9;
const EPS: f64 = 1e-10;

/// Spectral dereverberation of the current artifact: STFT, iterative
/// weighted-prediction-error filtering per frequency bin, inverse STFT,
/// peak normalization.
pub fn run(input: &Path, output: &Path) -> KtResult<()> {
    let (samples, rate) = audio::read_wav_mono(input)?;
    if samples.is_empty() {
        return Err(KtError::Audio("empty audio buffer".to_owned()));
    }

    let processed = dereverberate(&samples)?;
    audio::write_wav_mono(output, &processed, rate)
}

pub fn dereverberate(samples: &[f32]) -> KtResult<Vec<f32>> {
    let mut frames = stft(samples)?;
    wpe(&mut frames);
    let mut out = istft(&frames, samples.len())?;
    peak_normalize(&mut out, PEAK_TARGET);
    Ok(out)
}

fn hann_window(len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / len as f64).cos())
        .collect()
}

fn stft(samples: &[f32]) -> KtResult<Vec<Vec<Complex<f64>>>> {
    let window = hann_window(FFT_SIZE);
    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(FFT_SIZE);

    let frame_count = if samples.len() <= FFT_SIZE {
        1
    } else {
        1 + (samples.len() - FFT_SIZE).div_ceil(HOP_SIZE)
    };

    let mut frames = Vec::with_capacity(frame_count);
    let mut buffer = r2c.make_input_vec();
    for t in 0..frame_count {
        let offset = t * HOP_SIZE;
        for (i, slot) in buffer.iter_mut().enumerate() {
            let sample = samples.get(offset + i).copied().unwrap_or(0.0);
            *slot = f64::from(sample) * window[i];
        }
        let mut spectrum = r2c.make_output_vec();
        r2c.process(&mut buffer, &mut spectrum)
            .map_err(|error| KtError::Audio(error.to_string()))?;
        frames.push(spectrum);
    }
    Ok(frames)
}

fn istft(frames: &[Vec<Complex<f64>>], output_len: usize) -> KtResult<Vec<f32>> {
    let window = hann_window(FFT_SIZE);
    let mut planner = RealFftPlanner::<f64>::new();
    let c2r = planner.plan_fft_inverse(FFT_SIZE);

    let total = (frames.len().saturating_sub(1)) * HOP_SIZE + FFT_SIZE;
    let mut accumulated = vec![0.0f64; total];
    let mut weight = vec![0.0f64; total];
    let mut time = c2r.make_output_vec();

    for (t, spectrum) in frames.iter().enumerate() {
        let mut spec = spectrum.clone();
        // Real-input inverse requires purely real DC and Nyquist bins.
        spec[0].im = 0.0;
        if let Some(last) = spec.last_mut() {
            last.im = 0.0;
        }
        c2r.process(&mut spec, &mut time)
            .map_err(|error| KtError::Audio(error.to_string()))?;

        let offset = t * HOP_SIZE;
        for i in 0..FFT_SIZE {
            let sample = time[i] / FFT_SIZE as f64;
            accumulated[offset + i] += sample * window[i];
            weight[offset + i] += window[i] * window[i];
        }
    }

    Ok((0..output_len)
        .map(|i| (accumulated[i] / weight[i].max(EPS)) as f32)
        .collect())
}

/// Weighted-prediction-error dereverberation, full-statistics mode.
///
/// For each frequency bin, a complex linear predictor over `FILTER_TAPS`
/// delayed observations (delay `PREDICTION_DELAY`) estimates the late
/// reverberant tail; subtracting the prediction leaves the direct signal.
/// The per-frame variance weights are re-estimated from the running result
/// over all frames on every iteration.
fn wpe(frames: &mut [Vec<Complex<f64>>]) {
    let frame_count = frames.len();
    let history = PREDICTION_DELAY + FILTER_TAPS - 1;
    if frame_count <= history + 1 {
        return;
    }
    let bins = frames[0].len();
    let observed: Vec<Vec<Complex<f64>>> = frames.to_vec();

    for _ in 0..ITERATIONS {
        for k in 0..bins {
            let variance: Vec<f64> = (0..frame_count)
                .map(|t| frames[t][k].norm_sqr().max(EPS))
                .collect();

            // Weighted normal equations over all frames with full context.
            let mut gram = vec![Complex::new(0.0, 0.0); FILTER_TAPS * FILTER_TAPS];
            let mut cross = vec![Complex::new(0.0, 0.0); FILTER_TAPS];
            for t in history..frame_count {
                let inv_var = 1.0 / variance[t];
                for i in 0..FILTER_TAPS {
                    let tap_i = observed[t - PREDICTION_DELAY - i][k];
                    cross[i] += tap_i.conj() * observed[t][k] * inv_var;
                    for j in 0..FILTER_TAPS {
                        let tap_j = observed[t - PREDICTION_DELAY - j][k];
                        gram[i * FILTER_TAPS + j] += tap_i.conj() * tap_j * inv_var;
                    }
                }
            }

            let trace: f64 = (0..FILTER_TAPS)
                .map(|i| gram[i * FILTER_TAPS + i].re)
                .sum();
            let ridge = trace / FILTER_TAPS as f64 * 1e-6 + EPS;
            for i in 0..FILTER_TAPS {
                gram[i * FILTER_TAPS + i] += Complex::new(ridge, 0.0);
            }

            let Some(filter) = solve_linear(gram, cross, FILTER_TAPS) else {
                continue;
            };

            for t in history..frame_count {
                let mut prediction = Complex::new(0.0, 0.0);
                for (i, tap) in filter.iter().enumerate() {
                    prediction += *tap * observed[t - PREDICTION_DELAY - i][k];
                }
                frames[t][k] = observed[t][k] - prediction;
            }
        }
    }
}

/// Gaussian elimination with partial pivoting on an `n x n` complex system.
fn solve_linear(
    mut a: Vec<Complex<f64>>,
    mut b: Vec<Complex<f64>>,
    n: usize,
) -> Option<Vec<Complex<f64>>> {
    for col in 0..n {
        let mut pivot = col;
        let mut best = a[col * n + col].norm_sqr();
        for row in (col + 1)..n {
            let candidate = a[row * n + col].norm_sqr();
            if candidate > best {
                best = candidate;
                pivot = row;
            }
        }
        if best < 1e-300 {
            return None;
        }
        if pivot != col {
            for j in 0..n {
                a.swap(col * n + j, pivot * n + j);
            }
            b.swap(col, pivot);
        }

        let inv = Complex::new(1.0, 0.0) / a[col * n + col];
        for row in (col + 1)..n {
            let factor = a[row * n + col] * inv;
            for j in col..n {
                let head = a[col * n + j];
                a[row * n + j] -= factor * head;
            }
            let head = b[col];
            b[row] -= factor * head;
        }
    }

    let mut x = vec![Complex::new(0.0, 0.0); n];
    for col in (0..n).rev() {
        let mut sum = b[col];
        for j in (col + 1)..n {
            sum -= a[col * n + j] * x[j];
        }
        x[col] = sum / a[col * n + col];
    }
    Some(x)
}

/// Scale so the maximum absolute sample equals `target`. Silence (an
/// all-but-zero buffer) is left untouched rather than amplified.
fn peak_normalize(samples: &mut [f32], target: f32) {
    let peak = samples.iter().fold(0.0f32, |acc, &v| acc.max(v.abs()));
    if peak < 1e-6 {
        return;
    }
    let gain = target / peak;
    for sample in samples {
        *sample *= gain;
    }
}
