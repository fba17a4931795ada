use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// What the transcription engine should do with the recognized speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    #[default]
    Transcribe,
    Translate,
}

impl Task {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transcribe => "transcribe",
            Self::Translate => "translate",
        }
    }
}

fn default_language() -> String {
    "ja".to_owned()
}

/// Per-request configuration. Immutable for the duration of a request.
///
/// Unknown fields in the wire payload are ignored; missing toggles default
/// to off so a bare `{}` behaves like plain transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub task: Task,
    #[serde(default)]
    pub enable_denoise: bool,
    #[serde(default)]
    pub enable_dereverberation: bool,
    #[serde(default)]
    pub enable_vad: bool,
    #[serde(default)]
    pub enable_diarization: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            task: Task::Transcribe,
            enable_denoise: false,
            enable_dereverberation: false,
            enable_vad: false,
            enable_diarization: false,
        }
    }
}

/// Identifies one togglable step of the enhancement pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Denoise,
    Dereverb,
    Vad,
    Diarize,
}

impl Stage {
    /// The stage label used in outcomes and logging.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Denoise => "denoise",
            Self::Dereverb => "dereverb",
            Self::Vad => "vad",
            Self::Diarize => "diarize",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-stage record accumulated in stage order. `applied` is true only when
/// the stage executed and replaced the current artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub applied: bool,
    pub error: Option<String>,
}

impl StageOutcome {
    #[must_use]
    pub fn applied(stage: Stage) -> Self {
        Self {
            stage,
            applied: true,
            error: None,
        }
    }

    #[must_use]
    pub fn skipped(stage: Stage) -> Self {
        Self {
            stage,
            applied: false,
            error: None,
        }
    }

    #[must_use]
    pub fn degraded(stage: Stage, error: String) -> Self {
        Self {
            stage,
            applied: false,
            error: Some(error),
        }
    }
}

/// One speaker turn, `start <= end`, seconds from clip start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerSegment {
    pub speaker: String,
    pub start: f64,
    pub end: f64,
}

/// One timed transcript chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptChunk {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// The request's final output, serialized with the wire field names the
/// ingress layer expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub language: String,
    pub language_probability: f64,
    pub duration: f64,
    pub denoise_applied: bool,
    pub dereverb_applied: bool,
    pub vad_applied: bool,
    pub chunks: Vec<TranscriptChunk>,
    pub diarization: Vec<SpeakerSegment>,
}

/// Raw audio handed to the orchestrator by the ingress layer.
#[derive(Debug, Clone)]
pub enum AudioInput {
    /// Caller-owned file on disk. Never deleted by the pipeline.
    Path(PathBuf),
    /// In-memory payload (e.g. decoded from a base64 job field). Materialized
    /// to a registry-owned scratch file before normalization.
    Bytes {
        data: Vec<u8>,
        hint_extension: Option<String>,
    },
}

/// Speech-span detection parameters shared by the VAD stage and the engine
/// adapter's internal silence splitting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VadSettings {
    /// Speech-probability threshold a frame must reach to count as speech.
    pub threshold: f32,
    /// Spans shorter than this are discarded.
    pub min_speech_ms: u32,
    /// Silence gaps shorter than this do not split a span.
    pub min_silence_ms: u32,
    /// Padding added around each retained span.
    pub pad_ms: u32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_speech_ms: 250,
            min_silence_ms: 300,
            pad_ms: 60,
        }
    }
}

impl VadSettings {
    /// Preset for short, pre-chunked clips: keep everything that looks even
    /// briefly like speech and pad lightly.
    #[must_use]
    pub const fn short_clip() -> Self {
        Self {
            threshold: 0.5,
            min_speech_ms: 0,
            min_silence_ms: 100,
            pad_ms: 30,
        }
    }
}

/// Fixed decoding configuration the orchestrator supplies to the engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub language: String,
    pub task: Task,
    pub beam_size: u32,
    pub deterministic: bool,
    /// Engine-internal silence splitting, distinct from the VAD stage.
    pub vad_split: Option<VadSettings>,
}

impl EngineOptions {
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            language: config.language.clone(),
            task: config.task,
            beam_size: 5,
            deterministic: true,
            vad_split: Some(VadSettings::short_clip()),
        }
    }
}

/// What the transcription engine adapter returns. Optional fields are filled
/// in by the result assembler.
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    pub text: Option<String>,
    pub chunks: Vec<TranscriptChunk>,
    pub language: Option<String>,
    pub language_probability: Option<f64>,
    pub duration: Option<f64>,
}
