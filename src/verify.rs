//! Multi-pass verification.
//!
//! Runs recognition several times per page, each pass against a
//! differently preprocessed copy of the image, then merges the pass texts
//! into a consensus. Disagreement between passes drives the confidence
//! score down, which catches pages where a single pass silently produced
//! garbage.

use std::sync::Arc;

use image::{DynamicImage, GrayImage, imageops};
use imageproc::filter::median_filter;
use similar::TextDiff;

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    language::LanguageSet,
    page_source::PageImage,
    prelude::*,
    recognize::{Recognition, RecognitionEngine, RecognitionError},
};

/// PIL's classic sharpen kernel, normalized.
const SHARPEN_KERNEL: [f32; 9] = [
    -2.0 / 16.0,
    -2.0 / 16.0,
    -2.0 / 16.0,
    -2.0 / 16.0,
    32.0 / 16.0,
    -2.0 / 16.0,
    -2.0 / 16.0,
    -2.0 / 16.0,
    -2.0 / 16.0,
];

/// How many recognition passes to run per page.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    schemars::JsonSchema,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// One pass, no verification.
    #[default]
    Off,
    /// Two passes.
    Low,
    /// Three passes.
    Medium,
    /// Four passes.
    High,
    /// Five passes.
    Ultra,
}

impl VerifyLevel {
    /// The number of recognition passes for this level.
    pub fn passes(self) -> usize {
        match self {
            VerifyLevel::Off => 1,
            VerifyLevel::Low => 2,
            VerifyLevel::Medium => 3,
            VerifyLevel::High => 4,
            VerifyLevel::Ultra => 5,
        }
    }
}

/// An engine that runs another engine several times per page and merges
/// the results.
pub struct MultiPassEngine {
    engine: Arc<dyn RecognitionEngine>,
    level: VerifyLevel,
}

impl MultiPassEngine {
    /// Wrap an engine at the given level.
    ///
    /// `Off` returns the engine unwrapped, so the single-pass path pays
    /// nothing.
    pub fn wrap(
        engine: Arc<dyn RecognitionEngine>,
        level: VerifyLevel,
    ) -> Arc<dyn RecognitionEngine> {
        if level == VerifyLevel::Off {
            engine
        } else {
            Arc::new(Self { engine, level })
        }
    }
}

#[async_trait]
impl RecognitionEngine for MultiPassEngine {
    fn name(&self) -> &'static str {
        self.engine.name()
    }

    async fn installed_languages(&self) -> Result<std::collections::BTreeSet<String>> {
        self.engine.installed_languages().await
    }

    #[instrument(level = "debug", skip_all, fields(page = page.index, passes = self.level.passes()))]
    async fn recognize(
        &self,
        page: &PageImage,
        languages: &LanguageSet,
    ) -> Result<Recognition, RecognitionError> {
        let passes = self.level.passes();
        let mut recognitions = Vec::with_capacity(passes);
        for pass in 0..passes {
            // Preprocessing is pixel work. Keep it off the async executor.
            let base = page.image.clone();
            let variant =
                spawn_blocking_propagating_panics(move || preprocess(pass, &base))
                    .await;
            let variant_page = PageImage {
                index: page.index,
                image: variant,
            };
            recognitions.push(self.engine.recognize(&variant_page, languages).await?);
        }
        Ok(combine(recognitions))
    }
}

/// Produce the image variant for one pass.
///
/// Passes cycle through: original, binarized, denoised, sharpened, and
/// original again. Each variant gives the engine a different look at hard
/// pages, so the passes disagree where the image is genuinely ambiguous.
fn preprocess(pass: usize, image: &DynamicImage) -> DynamicImage {
    match pass {
        1 => DynamicImage::ImageLuma8(binarize(&image.to_luma8())),
        2 => DynamicImage::ImageLuma8(median_filter(&image.to_luma8(), 1, 1)),
        3 => DynamicImage::ImageRgb8(imageops::filter3x3(
            &image.to_rgb8(),
            &SHARPEN_KERNEL,
        )),
        _ => image.clone(),
    }
}

/// Threshold a grayscale image to pure black and white.
fn binarize(gray: &GrayImage) -> GrayImage {
    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        pixel.0[0] = if pixel.0[0] > 128 { 255 } else { 0 };
    }
    out
}

/// Merge the pass results into one recognition.
fn combine(recognitions: Vec<Recognition>) -> Recognition {
    if recognitions.len() == 1 {
        return recognitions
            .into_iter()
            .next()
            .expect("length was checked above");
    }
    let texts = recognitions
        .iter()
        .map(|recognition| recognition.text.as_str())
        .collect::<Vec<_>>();
    Recognition {
        text: consensus_text(&texts),
        confidence: agreement(&texts),
    }
}

/// Character-level majority vote across the pass texts.
///
/// For each position, the most common character wins; ties go to the
/// earliest pass that produced one. Shorter texts simply stop voting, so
/// the consensus is as long as the longest pass.
fn consensus_text(texts: &[&str]) -> String {
    let pass_chars = texts
        .iter()
        .map(|text| text.chars().collect::<Vec<_>>())
        .collect::<Vec<_>>();
    let longest = pass_chars.iter().map(Vec::len).max().unwrap_or(0);

    let mut out = String::with_capacity(longest);
    let mut counts: Vec<(char, usize)> = Vec::new();
    for position in 0..longest {
        counts.clear();
        for chars in &pass_chars {
            if let Some(&ch) = chars.get(position) {
                match counts.iter_mut().find(|(seen, _)| *seen == ch) {
                    Some((_, count)) => *count += 1,
                    None => counts.push((ch, 1)),
                }
            }
        }
        let mut best = counts[0];
        for &candidate in &counts[1..] {
            if candidate.1 > best.1 {
                best = candidate;
            }
        }
        out.push(best.0);
    }
    out
}

/// Mean pairwise similarity ratio between the pass texts.
fn agreement(texts: &[&str]) -> f32 {
    let mut sum = 0.0f32;
    let mut pairs = 0usize;
    for (index, left) in texts.iter().enumerate() {
        for right in &texts[index + 1..] {
            sum += TextDiff::from_chars(*left, *right).ratio();
            pairs += 1;
        }
    }
    if pairs == 0 { 0.0 } else { sum / pairs as f32 }
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;

    #[test]
    fn passes_per_level() {
        assert_eq!(VerifyLevel::Off.passes(), 1);
        assert_eq!(VerifyLevel::Low.passes(), 2);
        assert_eq!(VerifyLevel::Ultra.passes(), 5);
    }

    #[test]
    fn binarize_maps_every_pixel_to_black_or_white() {
        let mut gray = GrayImage::new(2, 2);
        gray.put_pixel(0, 0, Luma([10]));
        gray.put_pixel(1, 0, Luma([200]));
        gray.put_pixel(0, 1, Luma([128]));
        gray.put_pixel(1, 1, Luma([129]));
        let out = binarize(&gray);
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(1, 0).0[0], 255);
        assert_eq!(out.get_pixel(0, 1).0[0], 0);
        assert_eq!(out.get_pixel(1, 1).0[0], 255);
    }

    #[test]
    fn preprocess_keeps_dimensions() {
        let image = DynamicImage::ImageLuma8(GrayImage::new(6, 4));
        for pass in 0..5 {
            let variant = preprocess(pass, &image);
            assert_eq!((variant.width(), variant.height()), (6, 4));
        }
    }

    #[test]
    fn consensus_takes_the_majority_character() {
        assert_eq!(consensus_text(&["hello", "hellp", "hello"]), "hello");
    }

    #[test]
    fn consensus_ties_go_to_the_earliest_pass() {
        assert_eq!(consensus_text(&["ab", "ac"]), "ab");
    }

    #[test]
    fn consensus_extends_to_the_longest_pass() {
        assert_eq!(consensus_text(&["hi", "high"]), "high");
    }

    #[test]
    fn identical_passes_agree_completely() {
        assert_eq!(agreement(&["same text", "same text", "same text"]), 1.0);
    }

    #[test]
    fn disagreement_lowers_the_score() {
        let score = agreement(&["hello world", "hxllo world"]);
        assert!(score > 0.5 && score < 1.0, "score was {score}");
    }

    #[test]
    fn combine_keeps_a_single_pass_unchanged() {
        let combined = combine(vec![Recognition {
            text: "once".to_owned(),
            confidence: 0.75,
        }]);
        assert_eq!(combined.text, "once");
        assert_eq!(combined.confidence, 0.75);
    }
}
