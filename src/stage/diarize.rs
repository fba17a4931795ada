use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

use crate::error::{KtError, KtResult};
use crate::model::SpeakerSegment;
use crate::process::{command_exists, duration_from_env, run_command_with_timeout};

const DEFAULT_PYTHON_BIN: &str = "python3";

/// Optional speaker-diarization capability.
///
/// Resolved once at process start from the environment; when the script,
/// credential, or interpreter is missing the capability is simply absent and
/// the orchestrator behaves as if the feature were disabled. The diarizer is
/// always invoked on the original normalized artifact, before any
/// enhancement stage has touched the audio.
pub struct Diarizer {
    python: String,
    script: PathBuf,
    token: String,
    timeout: Duration,
}

impl Diarizer {
    /// Attempt to resolve the capability from the environment:
    /// `KIKITORI_DIARIZE_SCRIPT` (must exist), `KIKITORI_HF_TOKEN` or
    /// `HF_TOKEN` (non-empty), and a python interpreter on PATH.
    #[must_use]
    pub fn resolve() -> Option<Self> {
        let script = std::env::var("KIKITORI_DIARIZE_SCRIPT")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)?;
        if !script.exists() {
            tracing::warn!(script = %script.display(), "diarization script not found, capability disabled");
            return None;
        }

        let token = std::env::var("KIKITORI_HF_TOKEN")
            .or_else(|_| std::env::var("HF_TOKEN"))
            .ok()
            .filter(|value| !value.trim().is_empty())?;

        let python = std::env::var("KIKITORI_PYTHON_BIN")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PYTHON_BIN.to_owned());
        if !command_exists(&python) {
            tracing::warn!(python = %python, "python interpreter not found, diarization disabled");
            return None;
        }

        Some(Self {
            python,
            script,
            token,
            timeout: duration_from_env("KIKITORI_DIARIZE_TIMEOUT_MS", Duration::from_secs(120)),
        })
    }

    /// Run the branch, absorbing internal failures into an empty segment
    /// list. Diarization is never allowed to fail a request.
    #[must_use]
    pub fn run_branch(&self, wav: &Path, scratch_wav: &Path, out_json: &Path) -> Vec<SpeakerSegment> {
        match self.run(wav, scratch_wav, out_json) {
            Ok(segments) => segments,
            Err(error) => {
                tracing::warn!(error = %error, "diarization degraded to empty segment list");
                Vec::new()
            }
        }
    }

    fn run(&self, wav: &Path, scratch_wav: &Path, out_json: &Path) -> KtResult<Vec<SpeakerSegment>> {
        fs::copy(wav, scratch_wav)?;

        let args = vec![
            self.script.display().to_string(),
            "-a".to_owned(),
            scratch_wav.display().to_string(),
            "-o".to_owned(),
            out_json.display().to_string(),
            "--hf-token".to_owned(),
            self.token.clone(),
        ];
        run_command_with_timeout(&self.python, &args, None, Some(self.timeout))?;

        if !out_json.exists() {
            return Err(KtError::MissingArtifact(out_json.to_path_buf()));
        }
        let raw: Value = serde_json::from_str(&fs::read_to_string(out_json)?)?;
        Ok(parse_segments(&raw))
    }
}

/// Parse diarizer output into ordered speaker segments.
///
/// Accepts either a bare array or `{"segments": [...]}`. Rows missing a
/// field or violating `start <= end` are dropped; timestamps are rounded to
/// two decimal places and the list sorted ascending by start.
pub(crate) fn parse_segments(raw: &Value) -> Vec<SpeakerSegment> {
    let rows = raw
        .as_array()
        .or_else(|| raw.get("segments").and_then(Value::as_array));
    let Some(rows) = rows else {
        return Vec::new();
    };

    let mut segments: Vec<SpeakerSegment> = rows
        .iter()
        .filter_map(|row| {
            let speaker = row.get("speaker").and_then(Value::as_str)?.to_owned();
            let start = round2(row.get("start").and_then(Value::as_f64)?);
            let end = round2(row.get("end").and_then(Value::as_f64)?);
            (start <= end && start.is_finite() && end.is_finite())
                .then_some(SpeakerSegment { speaker, start, end })
        })
        .collect();

    segments.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));
    segments
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
