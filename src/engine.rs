use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

use crate::error::{KtError, KtResult};
use crate::model::{EngineOptions, EngineOutput, Task, TranscriptChunk};
use crate::process::{command_exists, duration_from_env, run_command_with_timeout};

const DEFAULT_WHISPER_BIN: &str = "whisper-cli";

/// Opaque transcription capability. One orchestrator serves any engine that
/// can turn a canonical WAV artifact into text plus timing metadata.
pub trait TranscriptionEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool {
        true
    }

    /// Transcribe the artifact at `wav`. Any files the engine writes must go
    /// under `output_prefix` (the orchestrator registers `<prefix>.json` for
    /// cleanup).
    fn transcribe(
        &self,
        wav: &Path,
        output_prefix: &Path,
        options: &EngineOptions,
    ) -> KtResult<EngineOutput>;
}

/// whisper.cpp CLI adapter. The binary, model path, and call timeout come
/// from the environment so deployments can swap model variants without a
/// rebuild.
pub struct WhisperCliEngine {
    binary: String,
    model: Option<String>,
    timeout: Duration,
}

impl WhisperCliEngine {
    #[must_use]
    pub fn from_env() -> Self {
        let binary = std::env::var("KIKITORI_WHISPER_BIN")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_WHISPER_BIN.to_owned());
        let model = std::env::var("KIKITORI_WHISPER_MODEL")
            .ok()
            .filter(|value| !value.trim().is_empty());
        Self {
            binary,
            model,
            timeout: duration_from_env("KIKITORI_WHISPER_TIMEOUT_MS", Duration::from_secs(300)),
        }
    }
}

impl TranscriptionEngine for WhisperCliEngine {
    fn name(&self) -> &'static str {
        "whisper_cli"
    }

    fn is_available(&self) -> bool {
        command_exists(&self.binary)
    }

    fn transcribe(
        &self,
        wav: &Path,
        output_prefix: &Path,
        options: &EngineOptions,
    ) -> KtResult<EngineOutput> {
        let args = build_args(wav, output_prefix, options, self.model.as_deref());
        run_command_with_timeout(&self.binary, &args, None, Some(self.timeout))?;

        let json_path = PathBuf::from(format!("{}.json", output_prefix.display()));
        if !json_path.exists() {
            return Err(KtError::MissingArtifact(json_path));
        }

        let raw: Value = serde_json::from_str(&fs::read_to_string(&json_path)?)?;
        Ok(parse_output(&raw))
    }
}

pub(crate) fn build_args(
    wav: &Path,
    output_prefix: &Path,
    options: &EngineOptions,
    model: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        "-f".to_owned(),
        wav.display().to_string(),
        "-of".to_owned(),
        output_prefix.display().to_string(),
        // JSON output is always requested since transcribe() parses it.
        "-oj".to_owned(),
        "-l".to_owned(),
        options.language.clone(),
        "-bs".to_owned(),
        options.beam_size.to_string(),
    ];

    if let Some(model) = model {
        args.push("-m".to_owned());
        args.push(model.to_owned());
    }

    if options.task == Task::Translate {
        args.push("--translate".to_owned());
    }

    if options.deterministic {
        args.push("--temperature".to_owned());
        args.push("0".to_owned());
    }

    // Engine-internal silence splitting, tuned for short pre-chunked clips.
    if let Some(split) = &options.vad_split {
        args.push("--vad".to_owned());
        args.push("--vad-threshold".to_owned());
        args.push(split.threshold.to_string());
        args.push("--vad-min-speech-duration-ms".to_owned());
        args.push(split.min_speech_ms.to_string());
        args.push("--vad-min-silence-duration-ms".to_owned());
        args.push(split.min_silence_ms.to_string());
        args.push("--vad-speech-pad-ms".to_owned());
        args.push(split.pad_ms.to_string());
    }

    args
}

/// Parse the whisper.cpp JSON artifact into the adapter's output shape.
pub(crate) fn parse_output(raw: &Value) -> EngineOutput {
    let chunks = extract_chunks(raw);

    let text = raw
        .get("text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_owned);

    let language = raw
        .pointer("/result/language")
        .or_else(|| raw.get("language"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    let language_probability = raw
        .get("language_probability")
        .or_else(|| raw.pointer("/result/language_probability"))
        .and_then(Value::as_f64);

    let duration = raw.get("duration").and_then(Value::as_f64);

    EngineOutput {
        text,
        chunks,
        language,
        language_probability,
        duration,
    }
}

fn extract_chunks(raw: &Value) -> Vec<TranscriptChunk> {
    let nodes = raw
        .get("transcription")
        .or_else(|| raw.get("segments"))
        .or_else(|| raw.get("chunks"))
        .and_then(Value::as_array);
    let Some(nodes) = nodes else {
        return Vec::new();
    };

    nodes
        .iter()
        .filter_map(|node| {
            let text = node
                .get("text")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|text| !text.is_empty())?
                .to_owned();
            let start = chunk_bound(node, "/offsets/from", "start", 0);
            let end = chunk_bound(node, "/offsets/to", "end", 1);
            Some(TranscriptChunk { text, start, end })
        })
        .collect()
}

/// whisper.cpp reports offsets in milliseconds; other engines report
/// start/end seconds or `timestamp` pairs.
fn chunk_bound(node: &Value, offsets_pointer: &str, key: &str, timestamp_index: usize) -> f64 {
    if let Some(millis) = node.pointer(offsets_pointer).and_then(Value::as_f64) {
        return millis / 1000.0;
    }
    node.get(key)
        .or_else(|| node.pointer(&format!("/timestamp/{timestamp_index}")))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::{build_args, parse_output};
    use crate::model::{EngineOptions, PipelineConfig, Task};

    fn options() -> EngineOptions {
        EngineOptions::from_config(&PipelineConfig::default())
    }

    #[test]
    fn args_include_fixed_decoding_config() {
        let args = build_args(
            &PathBuf::from("norm.wav"),
            &PathBuf::from("/tmp/out"),
            &options(),
            None,
        );
        assert!(args.contains(&"-oj".to_owned()));
        assert!(args.contains(&"norm.wav".to_owned()));

        let beam_idx = args.iter().position(|a| a == "-bs").expect("-bs flag");
        assert_eq!(args[beam_idx + 1], "5");

        let temp_idx = args
            .iter()
            .position(|a| a == "--temperature")
            .expect("deterministic decoding");
        assert_eq!(args[temp_idx + 1], "0");

        let lang_idx = args.iter().position(|a| a == "-l").expect("-l flag");
        assert_eq!(args[lang_idx + 1], "ja");

        assert!(!args.contains(&"--translate".to_owned()));
        assert!(!args.contains(&"-m".to_owned()));
    }

    #[test]
    fn args_include_model_and_translate_when_set() {
        let mut opts = options();
        opts.task = Task::Translate;
        let args = build_args(
            &PathBuf::from("norm.wav"),
            &PathBuf::from("/tmp/out"),
            &opts,
            Some("models/ggml-large-v3.bin"),
        );
        assert!(args.contains(&"--translate".to_owned()));
        let model_idx = args.iter().position(|a| a == "-m").expect("-m flag");
        assert_eq!(args[model_idx + 1], "models/ggml-large-v3.bin");
    }

    #[test]
    fn args_carry_short_clip_split_params() {
        let args = build_args(
            &PathBuf::from("norm.wav"),
            &PathBuf::from("/tmp/out"),
            &options(),
            None,
        );
        assert!(args.contains(&"--vad".to_owned()));
        let silence_idx = args
            .iter()
            .position(|a| a == "--vad-min-silence-duration-ms")
            .expect("split silence flag");
        assert_eq!(args[silence_idx + 1], "100");
        let pad_idx = args
            .iter()
            .position(|a| a == "--vad-speech-pad-ms")
            .expect("split pad flag");
        assert_eq!(args[pad_idx + 1], "30");
    }

    #[test]
    fn args_omit_split_params_when_disabled() {
        let mut opts = options();
        opts.vad_split = None;
        let args = build_args(
            &PathBuf::from("norm.wav"),
            &PathBuf::from("/tmp/out"),
            &opts,
            None,
        );
        assert!(!args.contains(&"--vad".to_owned()));
    }

    #[test]
    fn parse_whisper_cpp_offsets_to_seconds() {
        let raw = json!({
            "result": {"language": "ja"},
            "transcription": [
                {"offsets": {"from": 0, "to": 1200}, "text": " こんにちは"},
                {"offsets": {"from": 1200, "to": 2900}, "text": " 世界"}
            ]
        });
        let output = parse_output(&raw);
        assert_eq!(output.language.as_deref(), Some("ja"));
        assert_eq!(output.chunks.len(), 2);
        assert_eq!(output.chunks[0].text, "こんにちは");
        assert!((output.chunks[0].end - 1.2).abs() < 1e-9);
        assert!((output.chunks[1].start - 1.2).abs() < 1e-9);
        assert!(output.text.is_none());
    }

    #[test]
    fn parse_flat_segment_shape() {
        let raw = json!({
            "text": "hello world",
            "language": "en",
            "language_probability": 0.87,
            "duration": 3.5,
            "segments": [
                {"start": 0.0, "end": 1.5, "text": "hello"},
                {"start": 1.5, "end": 3.5, "text": "world"}
            ]
        });
        let output = parse_output(&raw);
        assert_eq!(output.text.as_deref(), Some("hello world"));
        assert_eq!(output.language.as_deref(), Some("en"));
        assert_eq!(output.language_probability, Some(0.87));
        assert_eq!(output.duration, Some(3.5));
        assert_eq!(output.chunks.len(), 2);
        assert!((output.chunks[1].start - 1.5).abs() < 1e-9);
    }

    #[test]
    fn parse_empty_or_alien_json_yields_empty_output() {
        let output = parse_output(&json!({}));
        assert!(output.text.is_none());
        assert!(output.chunks.is_empty());
        assert!(output.language.is_none());

        let output = parse_output(&json!({"transcription": [{"text": "   "}]}));
        assert!(output.chunks.is_empty(), "whitespace-only chunks dropped");
    }
}
