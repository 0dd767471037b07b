//! Post-recognition language detection.
//!
//! This runs over the recognized text after the fact and is advisory
//! metadata only. It never chooses which models recognition runs with;
//! that is the resolver's job, and it refuses to guess.

use std::sync::LazyLock;

use lingua::{LanguageDetector, LanguageDetectorBuilder};

/// How much recognized text we feed the detector. Enough for a confident
/// call, and keeps detection cheap on huge documents.
const DETECT_SAMPLE_CHARS: usize = 1000;

static DETECTOR: LazyLock<LanguageDetector> =
    LazyLock::new(|| LanguageDetectorBuilder::from_all_languages().build());

/// Detect the dominant language of recognized text.
///
/// Returns a lowercase language name (`"english"`, `"french"`), or `None`
/// when the text is empty or too ambiguous to call.
pub fn detect_language(text: &str) -> Option<String> {
    let sample = text
        .chars()
        .take(DETECT_SAMPLE_CHARS)
        .collect::<String>();
    let sample = sample.trim();
    if sample.is_empty() {
        return None;
    }
    DETECTOR
        .detect_language_of(sample)
        .map(|language| format!("{language:?}").to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_english() {
        let text = "The quick brown fox jumps over the lazy dog. \
                    This page was produced by an optical scanner.";
        assert_eq!(detect_language(text).as_deref(), Some("english"));
    }

    #[test]
    fn detects_french() {
        let text = "Le chat est assis sur le tapis et regarde par la fenêtre \
                    pendant que la pluie tombe doucement.";
        assert_eq!(detect_language(text).as_deref(), Some("french"));
    }

    #[test]
    fn empty_text_is_undetectable() {
        assert_eq!(detect_language(""), None);
        assert_eq!(detect_language("   \n\t  "), None);
    }
}
