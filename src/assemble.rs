//! Result assembly: a pure merge of engine output, stage outcomes, and
//! diarization into the response shape. No side effects, no failure modes.

use crate::model::{
    EngineOutput, PipelineConfig, SpeakerSegment, Stage, StageOutcome, TranscriptChunk,
    TranscriptionResult,
};

pub fn assemble(
    engine: EngineOutput,
    outcomes: &[StageOutcome],
    diarization: Vec<SpeakerSegment>,
    config: &PipelineConfig,
    probed_duration: Option<f64>,
) -> TranscriptionResult {
    let text = engine
        .text
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| join_chunk_texts(&engine.chunks));

    let language = engine
        .language
        .filter(|language| !language.trim().is_empty())
        .unwrap_or_else(|| config.language.clone());

    let language_probability = engine
        .language_probability
        .unwrap_or(if language.is_empty() { 0.0 } else { 1.0 });

    let duration = engine.duration.or(probed_duration).unwrap_or(0.0);

    TranscriptionResult {
        text,
        language,
        language_probability,
        duration,
        denoise_applied: stage_applied(outcomes, Stage::Denoise),
        dereverb_applied: stage_applied(outcomes, Stage::Dereverb),
        vad_applied: stage_applied(outcomes, Stage::Vad),
        chunks: engine.chunks,
        diarization,
    }
}

fn stage_applied(outcomes: &[StageOutcome], stage: Stage) -> bool {
    outcomes
        .iter()
        .any(|outcome| outcome.stage == stage && outcome.applied)
}

/// Join chunk texts in temporal order with single spaces, skipping
/// whitespace-only chunks.
pub(crate) fn join_chunk_texts(chunks: &[TranscriptChunk]) -> String {
    chunks
        .iter()
        .map(|chunk| chunk.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
