//! Recognition engine interface.

use std::{collections::BTreeSet, sync::Arc};

use crate::{language::LanguageSet, page_source::PageImage, prelude::*};

pub mod echo;
pub mod tesseract;

/// Recognized text plus the engine's confidence in it.
#[derive(Clone, Debug)]
pub struct Recognition {
    /// The recognized text, with surrounding whitespace trimmed.
    pub text: String,

    /// Mean engine confidence, normalized to `0.0..=1.0`.
    pub confidence: f32,
}

/// A recognition failure scoped to a single page.
///
/// These are recorded as failed page outcomes. They never abort the job.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct RecognitionError(#[from] anyhow::Error);

impl RecognitionError {
    /// The full failure chain, for recording on the page outcome.
    pub fn reason(&self) -> String {
        format!("{:#}", self.0)
    }
}

/// Interface to a recognition engine.
#[async_trait]
pub trait RecognitionEngine: Send + Sync + 'static {
    /// Short name for logs and progress output.
    fn name(&self) -> &'static str;

    /// The language models this engine has installed.
    async fn installed_languages(&self) -> Result<BTreeSet<String>>;

    /// Recognize the text on one page.
    ///
    /// Dropping the returned future must cancel the work, including any
    /// subprocess. The worker pool relies on this when a deadline expires.
    async fn recognize(
        &self,
        page: &PageImage,
        languages: &LanguageSet,
    ) -> Result<Recognition, RecognitionError>;
}

/// The recognition engines we can run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum EngineChoice {
    /// The `tesseract` CLI tool.
    Tesseract,

    /// A deterministic engine for tests and dry runs.
    Echo,
}

/// Get the recognition engine for the specified choice.
pub fn engine_for_choice(choice: EngineChoice) -> Arc<dyn RecognitionEngine> {
    match choice {
        EngineChoice::Tesseract => Arc::new(tesseract::TesseractEngine),
        EngineChoice::Echo => Arc::new(echo::EchoEngine),
    }
}
