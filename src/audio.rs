use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hound::{SampleFormat, WavSpec};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::{KtError, KtResult};
use crate::process::{duration_from_env, run_command_with_timeout};
use crate::registry::ArtifactRegistry;

/// Canonical sample rate every artifact is normalized to.
pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;

/// Write an in-memory payload to a registry-owned scratch file so the
/// normalizer has a path to hand to ffmpeg.
pub fn materialize_bytes(
    data: &[u8],
    hint_extension: Option<&str>,
    registry: &mut ArtifactRegistry,
) -> KtResult<PathBuf> {
    if data.is_empty() {
        return Err(KtError::InvalidInput(
            "audio payload is empty".to_owned(),
        ));
    }
    let ext = hint_extension
        .map(|value| value.trim_start_matches('.'))
        .filter(|value| !value.is_empty())
        .unwrap_or("bin");
    let target = registry.issue("input", ext);
    fs::write(&target, data)?;
    Ok(target)
}

/// Decode arbitrary-codec audio into canonical mono 16 kHz PCM at a fresh
/// registry-issued path. Fatal on failure.
///
/// Input that is already canonical (mono 16 kHz 16-bit PCM WAV) is copied
/// without invoking ffmpeg; everything else goes through
/// `ffmpeg -ar 16000 -ac 1 -c:a pcm_s16le` bounded by a 30 s timeout.
pub fn normalize_to_wav(input: &Path, registry: &mut ArtifactRegistry) -> KtResult<PathBuf> {
    let output = registry.issue("normalized", "wav");

    if is_canonical_wav(input) {
        tracing::debug!(input = %input.display(), "input already canonical, copying");
        fs::copy(input, &output)?;
        return Ok(output);
    }

    let args = vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-i".to_owned(),
        input.display().to_string(),
        "-ar".to_owned(),
        CANONICAL_SAMPLE_RATE.to_string(),
        "-ac".to_owned(),
        "1".to_owned(),
        "-c:a".to_owned(),
        "pcm_s16le".to_owned(),
        output.display().to_string(),
    ];
    run_command_with_timeout("ffmpeg", &args, None, Some(ffmpeg_timeout()))?;
    Ok(output)
}

fn is_canonical_wav(path: &Path) -> bool {
    let Ok(reader) = hound::WavReader::open(path) else {
        return false;
    };
    let spec = reader.spec();
    spec.channels == 1
        && spec.sample_rate == CANONICAL_SAMPLE_RATE
        && spec.sample_format == SampleFormat::Int
        && spec.bits_per_sample == 16
}

/// Best-effort clip duration in seconds: WAV header math for canonical
/// artifacts, ffprobe for anything else.
pub fn probe_duration_seconds(input: &Path) -> Option<f64> {
    if let Ok(reader) = hound::WavReader::open(input) {
        let spec = reader.spec();
        if spec.sample_rate > 0 && spec.channels > 0 {
            let frames = f64::from(reader.duration());
            return Some(frames / f64::from(spec.sample_rate));
        }
    }

    let args = vec![
        "-v".to_owned(),
        "error".to_owned(),
        "-show_entries".to_owned(),
        "format=duration".to_owned(),
        "-of".to_owned(),
        "default=nokey=1:noprint_wrappers=1".to_owned(),
        input.display().to_string(),
    ];
    let output = run_command_with_timeout("ffprobe", &args, None, Some(ffprobe_timeout())).ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let secs = stdout.trim().parse::<f64>().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(secs)
}

/// Read a WAV file as mono f32 samples in [-1, 1], downmixing by channel
/// average when needed.
pub fn read_wav_mono(path: &Path) -> KtResult<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::open(path).map_err(|error| KtError::Audio(error.to_string()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => {
            let scale = f32::from(i16::MAX);
            reader
                .samples::<i16>()
                .map(|sample| sample.map(|v| f32::from(v) / scale))
                .collect::<Result<_, _>>()
                .map_err(|error| KtError::Audio(error.to_string()))?
        }
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|error| KtError::Audio(error.to_string()))?,
    };

    if spec.channels <= 1 {
        return Ok((interleaved, spec.sample_rate));
    }

    let channels = usize::from(spec.channels);
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

/// Write mono f32 samples as 16-bit PCM WAV, clamping to [-1, 1].
pub fn write_wav_mono(path: &Path, samples: &[f32], sample_rate: u32) -> KtResult<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).map_err(|error| KtError::Audio(error.to_string()))?;
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * f32::from(i16::MAX)).round() as i16;
        writer
            .write_sample(value)
            .map_err(|error| KtError::Audio(error.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|error| KtError::Audio(error.to_string()))?;
    Ok(())
}

/// Sinc resampling of a mono buffer in one shot.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> KtResult<Vec<f32>> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    if from_rate == to_rate {
        return Ok(input.to_vec());
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, input.len(), 1)
        .map_err(|error| KtError::Audio(error.to_string()))?;

    let waves_in = vec![input.to_vec()];
    let waves_out = resampler
        .process(&waves_in, None)
        .map_err(|error| KtError::Audio(error.to_string()))?;

    Ok(waves_out.into_iter().next().unwrap_or_default())
}

fn ffmpeg_timeout() -> Duration {
    duration_from_env("KIKITORI_FFMPEG_TIMEOUT_MS", Duration::from_secs(30))
}

fn ffprobe_timeout() -> Duration {
    duration_from_env("KIKITORI_FFPROBE_TIMEOUT_MS", Duration::from_secs(10))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ArtifactRegistry;

    fn write_test_wav(path: &Path, samples: &[f32], rate: u32, channels: u16) {
        let spec = WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
        for &sample in samples {
            writer
                .write_sample((sample * f32::from(i16::MAX)) as i16)
                .expect("write sample");
        }
        writer.finalize().expect("finalize");
    }

    #[test]
    fn materialize_bytes_writes_registered_scratch_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut registry = ArtifactRegistry::new(dir.path()).expect("registry");

        let path = materialize_bytes(b"payload", Some("webm"), &mut registry).expect("path");
        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "webm");

        registry.purge();
        assert!(!path.exists());
    }

    #[test]
    fn materialize_bytes_rejects_empty_payload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut registry = ArtifactRegistry::new(dir.path()).expect("registry");
        let err = materialize_bytes(b"", None, &mut registry).expect_err("should fail");
        assert!(matches!(err, KtError::InvalidInput(_)));
    }

    #[test]
    fn canonical_wav_skips_ffmpeg() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut registry = ArtifactRegistry::new(dir.path()).expect("registry");

        let input = dir.path().join("canonical.wav");
        write_test_wav(&input, &vec![0.1; 16_000], CANONICAL_SAMPLE_RATE, 1);

        let normalized = normalize_to_wav(&input, &mut registry).expect("normalize");
        assert!(normalized.exists());
        assert!(is_canonical_wav(&normalized));
        // The input itself was not adopted by the registry.
        registry.purge();
        assert!(input.exists());
        assert!(!normalized.exists());
    }

    #[test]
    fn non_canonical_header_is_detected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stereo = dir.path().join("stereo.wav");
        write_test_wav(&stereo, &vec![0.1; 1000], 44_100, 2);
        assert!(!is_canonical_wav(&stereo));

        let garbage = dir.path().join("garbage.webm");
        std::fs::write(&garbage, b"not audio at all").expect("write");
        assert!(!is_canonical_wav(&garbage));
    }

    #[test]
    fn wav_round_trip_preserves_length_and_rate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("roundtrip.wav");
        let samples: Vec<f32> = (0..1600)
            .map(|i| (i as f32 / 50.0).sin() * 0.5)
            .collect();
        write_wav_mono(&path, &samples, CANONICAL_SAMPLE_RATE).expect("write");

        let (back, rate) = read_wav_mono(&path).expect("read");
        assert_eq!(rate, CANONICAL_SAMPLE_RATE);
        assert_eq!(back.len(), samples.len());
        for (a, b) in back.iter().zip(&samples) {
            assert!((a - b).abs() < 0.001, "sample drift: {a} vs {b}");
        }
    }

    #[test]
    fn read_wav_mono_downmixes_stereo() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stereo.wav");
        // L = 0.5, R = -0.5 -> mono average 0.0
        let interleaved: Vec<f32> = (0..200)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        write_test_wav(&path, &interleaved, 16_000, 2);

        let (mono, _) = read_wav_mono(&path).expect("read");
        assert_eq!(mono.len(), 100);
        for sample in mono {
            assert!(sample.abs() < 0.001, "expected near-zero mix, got {sample}");
        }
    }

    #[test]
    fn write_wav_mono_clamps_out_of_range() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clamp.wav");
        write_wav_mono(&path, &[2.0, -2.0, 0.0], 16_000).expect("write");
        let (back, _) = read_wav_mono(&path).expect("read");
        assert!(back[0] > 0.99 && back[1] < -0.99);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let input = vec![0.25_f32; 480];
        let output = resample(&input, 16_000, 16_000).expect("resample");
        assert_eq!(output, input);
    }

    #[test]
    fn resample_empty_is_empty() {
        assert!(resample(&[], 16_000, 48_000).expect("resample").is_empty());
    }

    #[test]
    fn resample_changes_length_by_ratio() {
        let input: Vec<f32> = (0..16_000)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect();
        let up = resample(&input, 16_000, 48_000).expect("upsample");
        // One-shot sinc resampling trims a small transient; allow slack.
        let expected = input.len() * 3;
        assert!(
            up.len() > expected - 2000 && up.len() <= expected + 16,
            "unexpected upsampled length {} (expected about {expected})",
            up.len()
        );
    }

    #[test]
    fn probe_duration_reads_wav_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("two_seconds.wav");
        write_wav_mono(&path, &vec![0.0; 32_000], CANONICAL_SAMPLE_RATE).expect("write");
        let duration = probe_duration_seconds(&path).expect("duration");
        assert!((duration - 2.0).abs() < 0.01, "got {duration}");
    }

    #[test]
    fn probe_duration_nonexistent_file_is_none_or_ffprobe_err() {
        assert!(probe_duration_seconds(Path::new("/nonexistent/file.weird")).is_none());
    }
}
