//! Recognition engine wrapping the `tesseract` CLI tool.

use std::{collections::BTreeSet, io::Cursor};

use image::ImageFormat;
use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure,
    language::LanguageSet,
    page_source::PageImage,
    prelude::*,
};

use super::{Recognition, RecognitionEngine, RecognitionError};

/// Recognition engine wrapping the `tesseract` CLI tool.
///
/// One subprocess per page. The subprocess is started with `kill_on_drop`,
/// so abandoning a recognition future on deadline expiry also kills the
/// underlying `tesseract` run.
#[non_exhaustive]
pub struct TesseractEngine;

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn installed_languages(&self) -> Result<BTreeSet<String>> {
        let mut cmd = Command::new("tesseract");
        let output = cmd
            .arg("--list-langs")
            .output()
            .await
            .context("cannot run tesseract (is it installed?)")?;
        check_for_command_failure("tesseract", &output, None)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_language_list(&stdout))
    }

    #[instrument(level = "debug", skip_all, fields(page = page.index, languages = %languages))]
    async fn recognize(
        &self,
        page: &PageImage,
        languages: &LanguageSet,
    ) -> Result<Recognition, RecognitionError> {
        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")
            .context("cannot create tesseract work directory")?;
        let input_path = tmpdir.path().join("input.png");
        let mut png_bytes = Vec::new();
        page.image
            .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
            .context("cannot encode page for tesseract")?;
        std::fs::write(&input_path, &png_bytes)
            .context("cannot write tesseract input file")?;

        // Run tesseract on the input file. Asking for both `txt` and `tsv`
        // output gets us the recognized text and per-word confidences in
        // one pass.
        let output_base = tmpdir.path().join("output");
        let output = Command::new("tesseract")
            .arg(&input_path)
            .arg(&output_base)
            .arg("-l")
            .arg(languages.codes().join("+"))
            .arg("txt")
            .arg("tsv")
            .kill_on_drop(true)
            .output()
            .await
            .context("cannot run tesseract")?;
        check_for_command_failure("tesseract", &output, None)?;

        // Read the output files.
        let text = tokio::fs::read_to_string(output_base.with_extension("txt"))
            .await
            .context("cannot read tesseract text output")?;
        let tsv = tokio::fs::read_to_string(output_base.with_extension("tsv"))
            .await
            .context("cannot read tesseract tsv output")?;

        Ok(Recognition {
            text: text.trim().to_owned(),
            confidence: mean_word_confidence(&tsv),
        })
    }
}

/// Parse the output of `tesseract --list-langs`.
///
/// The first line is a banner; the rest are model names. `osd` is the
/// orientation detector, not a language, so we drop it.
fn parse_language_list(stdout: &str) -> BTreeSet<String> {
    stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != "osd")
        .map(ToOwned::to_owned)
        .collect()
}

/// Mean word confidence from tesseract's TSV output, scaled to `0.0..=1.0`.
///
/// Word rows have level 5. Structural rows carry a confidence of -1 and
/// are skipped. A page with no recognized words has confidence 0.
fn mean_word_confidence(tsv: &str) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for line in tsv.lines().skip(1) {
        let fields = line.split('\t').collect::<Vec<_>>();
        if fields.len() < 12 || fields[0] != "5" {
            continue;
        }
        let Ok(conf) = fields[10].parse::<f64>() else {
            continue;
        };
        if conf < 0.0 {
            continue;
        }
        sum += conf / 100.0;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}
