use std::sync::Arc;

use clap::Parser;
use kikitori::cli::Cli;
use kikitori::engine::{TranscriptionEngine, WhisperCliEngine};
use kikitori::{AudioInput, InferenceContext, KtError, KtResult};

fn main() {
    kikitori::logging::init();

    if let Err(error) = run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn run() -> KtResult<()> {
    let cli = Cli::parse();

    let engine = Arc::new(WhisperCliEngine::from_env());
    if !engine.is_available() {
        return Err(KtError::Unavailable(
            "transcription engine binary not found on PATH (set KIKITORI_WHISPER_BIN)".to_owned(),
        ));
    }

    let config = cli.to_config();
    let context = InferenceContext::new(engine);
    let result = context.run(AudioInput::Path(cli.input.clone()), &config)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.text);
    }
    Ok(())
}
