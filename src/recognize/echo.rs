//! Echo engine for testing.
//!
//! This engine reports each page's index and dimensions instead of reading
//! any pixels, so pipeline behavior can be tested without an OCR toolchain
//! installed.

use std::collections::BTreeSet;

use crate::{language::LanguageSet, page_source::PageImage, prelude::*};

use super::{Recognition, RecognitionEngine, RecognitionError};

/// The models the echo engine pretends to have installed.
const ECHO_LANGUAGES: &[&str] = &["deu", "eng", "fra", "spa"];

/// Echo engine for testing.
#[derive(Debug)]
pub struct EchoEngine;

#[async_trait]
impl RecognitionEngine for EchoEngine {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn installed_languages(&self) -> Result<BTreeSet<String>> {
        Ok(ECHO_LANGUAGES
            .iter()
            .map(|language| (*language).to_owned())
            .collect())
    }

    async fn recognize(
        &self,
        page: &PageImage,
        languages: &LanguageSet,
    ) -> Result<Recognition, RecognitionError> {
        Ok(Recognition {
            text: format!(
                "[echo page {} {}x{} {}]",
                page.index,
                page.image.width(),
                page.image.height(),
                languages,
            ),
            confidence: 1.0,
        })
    }
}
