use std::path::PathBuf;

use clap::Parser;

use crate::model::{PipelineConfig, Task};

/// Transcribe Japanese speech from an audio file, with optional
/// enhancement stages.
#[derive(Debug, Parser)]
#[command(name = "kikitori", version, about)]
pub struct Cli {
    /// Input audio file (any container/codec ffmpeg can decode).
    pub input: PathBuf,

    /// Target language code.
    #[arg(long, default_value = "ja")]
    pub language: String,

    /// Transcribe in the source language or translate to English.
    #[arg(long, value_enum, default_value = "transcribe")]
    pub task: Task,

    /// Run model-based noise suppression before transcription.
    #[arg(long)]
    pub denoise: bool,

    /// Run spectral dereverberation before transcription.
    #[arg(long)]
    pub dereverb: bool,

    /// Drop non-speech spans before transcription.
    #[arg(long)]
    pub vad: bool,

    /// Attach speaker-turn segments (requires the diarization capability).
    #[arg(long)]
    pub diarize: bool,

    /// Print the full result as JSON instead of the plain transcript.
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    #[must_use]
    pub fn to_config(&self) -> PipelineConfig {
        PipelineConfig {
            language: self.language.clone(),
            task: self.task,
            enable_denoise: self.denoise,
            enable_dereverberation: self.dereverb,
            enable_vad: self.vad,
            enable_diarization: self.diarize,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;
    use crate::model::Task;

    #[test]
    fn minimal_invocation_defaults() {
        let cli = Cli::parse_from(["kikitori", "clip.webm"]);
        let config = cli.to_config();
        assert_eq!(config.language, "ja");
        assert_eq!(config.task, Task::Transcribe);
        assert!(!config.enable_denoise);
        assert!(!config.enable_dereverberation);
        assert!(!config.enable_vad);
        assert!(!config.enable_diarization);
        assert!(!cli.json);
    }

    #[test]
    fn stage_flags_map_to_config() {
        let cli = Cli::parse_from([
            "kikitori", "clip.wav", "--denoise", "--vad", "--diarize", "--json",
        ]);
        let config = cli.to_config();
        assert!(config.enable_denoise);
        assert!(!config.enable_dereverberation);
        assert!(config.enable_vad);
        assert!(config.enable_diarization);
        assert!(cli.json);
    }

    #[test]
    fn task_translate_parses() {
        let cli = Cli::parse_from(["kikitori", "clip.wav", "--task", "translate"]);
        assert_eq!(cli.to_config().task, Task::Translate);
    }

    #[test]
    fn cli_help_does_not_panic() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
