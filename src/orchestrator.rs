use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crate::assemble;
use crate::audio;
use crate::engine::TranscriptionEngine;
use crate::error::{KtError, KtResult};
use crate::model::{
    AudioInput, EngineOptions, EngineOutput, PipelineConfig, SpeakerSegment, Stage, StageOutcome,
    TranscriptionResult, VadSettings,
};
use crate::registry::ArtifactRegistry;
use crate::stage::diarize::Diarizer;
use crate::stage::{denoise, dereverb, vad};

/// Process-wide inference context: the transcription engine, the optional
/// diarization capability, and pipeline tuning. Built once at startup and
/// shared by reference across concurrent requests; per-request state lives
/// in the artifact registry.
pub struct InferenceContext {
    engine: Arc<dyn TranscriptionEngine>,
    diarizer: Option<Diarizer>,
    vad_settings: VadSettings,
    work_root: PathBuf,
}

impl InferenceContext {
    /// Build a context with capabilities resolved from the environment.
    #[must_use]
    pub fn new(engine: Arc<dyn TranscriptionEngine>) -> Self {
        Self {
            engine,
            diarizer: Diarizer::resolve(),
            vad_settings: VadSettings::default(),
            work_root: std::env::temp_dir().join("kikitori"),
        }
    }

    #[must_use]
    pub fn with_diarizer(mut self, diarizer: Option<Diarizer>) -> Self {
        self.diarizer = diarizer;
        self
    }

    #[must_use]
    pub fn with_vad_settings(mut self, settings: VadSettings) -> Self {
        self.vad_settings = settings;
        self
    }

    #[must_use]
    pub fn with_work_root(mut self, work_root: PathBuf) -> Self {
        self.work_root = work_root;
        self
    }

    /// Run one transcription request.
    ///
    /// Only normalization and engine failures cross this boundary; every
    /// enhancement stage degrades to pass-through. All intermediate
    /// artifacts are purged before returning, on every path.
    pub fn run(
        &self,
        input: AudioInput,
        config: &PipelineConfig,
    ) -> KtResult<TranscriptionResult> {
        let mut registry = ArtifactRegistry::new(&self.work_root)?;
        let result = self.run_inner(&mut registry, input, config);
        registry.purge();
        if let Err(error) = &result {
            tracing::error!(code = error.error_code(), error = %error, "request failed");
        }
        result
    }

    fn run_inner(
        &self,
        registry: &mut ArtifactRegistry,
        input: AudioInput,
        config: &PipelineConfig,
    ) -> KtResult<TranscriptionResult> {
        let input_path = match input {
            AudioInput::Path(path) => {
                if !path.is_file() {
                    return Err(KtError::InvalidInput(format!(
                        "input file does not exist: {}",
                        path.display()
                    )));
                }
                registry.protect(&path);
                path
            }
            AudioInput::Bytes {
                data,
                hint_extension,
            } => audio::materialize_bytes(&data, hint_extension.as_deref(), registry)?,
        };

        tracing::info!(
            request = registry.prefix(),
            language = %config.language,
            "starting transcription request"
        );

        let normalized = audio::normalize_to_wav(&input_path, registry)?;
        let probed_duration = audio::probe_duration_seconds(&normalized);

        // The diarization branch consumes the original normalized artifact,
        // not the enhanced chain output, so it can run concurrently with the
        // chain. Its paths are issued up front; the spawned thread never
        // touches the registry.
        let diarize_branch = config
            .enable_diarization
            .then(|| {
                self.diarizer.as_ref().map(|diarizer| {
                    (
                        diarizer,
                        registry.issue("diarize-input", "wav"),
                        registry.issue("diarize-segments", "json"),
                    )
                })
            })
            .flatten();
        if config.enable_diarization && diarize_branch.is_none() {
            tracing::debug!("diarization requested but capability absent");
        }

        let mut outcomes: Vec<StageOutcome> = Vec::new();
        let (chain_result, diarization) = thread::scope(|scope| {
            let diarize_handle = diarize_branch.map(|(diarizer, scratch, out_json)| {
                let wav = normalized.clone();
                scope.spawn(move || diarizer.run_branch(&wav, &scratch, &out_json))
            });

            let chain_result =
                self.run_enhancement_chain(registry, &normalized, config, &mut outcomes);

            let diarization: Vec<SpeakerSegment> = diarize_handle
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        tracing::warn!("diarization thread panicked, returning empty list");
                        Vec::new()
                    })
                })
                .unwrap_or_default();

            (chain_result, diarization)
        });
        let engine_output = chain_result?;

        let result = assemble::assemble(
            engine_output,
            &outcomes,
            diarization,
            config,
            probed_duration,
        );
        tracing::info!(
            request = registry.prefix(),
            duration = result.duration,
            "request complete"
        );
        Ok(result)
    }

    fn run_enhancement_chain(
        &self,
        registry: &mut ArtifactRegistry,
        normalized: &Path,
        config: &PipelineConfig,
        outcomes: &mut Vec<StageOutcome>,
    ) -> KtResult<EngineOutput> {
        let mut current = normalized.to_path_buf();

        if config.enable_denoise {
            let target = registry.issue("denoised", "wav");
            apply_stage(Stage::Denoise, outcomes, &mut current, target, |input, output| {
                denoise::run(input, output).map(|()| true)
            });
        }

        if config.enable_dereverberation {
            let target = registry.issue("dereverbed", "wav");
            apply_stage(Stage::Dereverb, outcomes, &mut current, target, |input, output| {
                dereverb::run(input, output).map(|()| true)
            });
        }

        if config.enable_vad {
            let target = registry.issue("speech-only", "wav");
            let settings = self.vad_settings;
            apply_stage(Stage::Vad, outcomes, &mut current, target, |input, output| {
                vad::run(input, output, &settings)
            });
        }

        let output_prefix = registry.issue("engine", "out");
        registry.adopt(PathBuf::from(format!("{}.json", output_prefix.display())));

        let options = EngineOptions::from_config(config);
        self.engine
            .transcribe(&current, &output_prefix, &options)
            .map_err(|error| match error {
                error @ KtError::Transcription(_) => error,
                other => KtError::Transcription(other.to_string()),
            })
    }
}

/// Run one enhancement stage against the current artifact.
///
/// `Ok(true)` replaces the current artifact, `Ok(false)` keeps it (the stage
/// chose not to apply, e.g. no speech detected), and `Err` degrades: the
/// error is logged, recorded on the outcome, and the prior artifact is kept.
fn apply_stage<F>(
    stage: Stage,
    outcomes: &mut Vec<StageOutcome>,
    current: &mut PathBuf,
    target: PathBuf,
    run: F,
) where
    F: FnOnce(&Path, &Path) -> KtResult<bool>,
{
    match run(current, &target) {
        Ok(true) => {
            tracing::debug!(stage = %stage, artifact = %target.display(), "stage applied");
            outcomes.push(StageOutcome::applied(stage));
            *current = target;
        }
        Ok(false) => {
            tracing::debug!(stage = %stage, "stage made no change");
            outcomes.push(StageOutcome::skipped(stage));
        }
        Err(error) => {
            tracing::warn!(
                stage = %stage,
                error = %error,
                "stage failed, continuing with prior artifact"
            );
            outcomes.push(StageOutcome::degraded(stage, error.to_string()));
        }
    }
}
