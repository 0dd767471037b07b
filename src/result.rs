//! Assembled OCR results.

use schemars::JsonSchema;

use crate::prelude::*;

/// What happened to one page.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageOutcome {
    /// Recognition produced text for this page.
    Recognized {
        /// The recognized text, with surrounding whitespace trimmed.
        text: String,

        /// Engine confidence for this page, normalized to `0.0..=1.0`.
        confidence: f32,
    },

    /// Recognition failed for this page only. The rest of the document is
    /// unaffected.
    Failed {
        /// What went wrong.
        reason: String,
    },

    /// The page's deadline expired before recognition finished.
    TimedOut,
}

impl PageOutcome {
    /// Was this page recognized successfully?
    pub fn is_recognized(&self) -> bool {
        matches!(self, PageOutcome::Recognized { .. })
    }

    /// Why this page produced no text, if it didn't.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            PageOutcome::Recognized { .. } => None,
            PageOutcome::Failed { reason } => Some(reason.clone()),
            PageOutcome::TimedOut => Some("timed out".to_owned()),
        }
    }
}

/// One page of an assembled result.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PageRecord {
    /// 0-based position of the page in the document.
    pub page_index: usize,

    /// What happened to this page.
    #[serde(flatten)]
    pub outcome: PageOutcome,
}

/// The overall status of an OCR job that produced a result.
#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Every page was recognized. A document with zero pages is complete.
    Complete,

    /// Some pages were recognized, some were not.
    PartialFailure,

    /// The document had pages, and none of them were recognized.
    Failed,
}

/// The assembled result of one OCR job.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct DocumentResult {
    /// Unique ID assigned to this job.
    pub job_id: String,

    /// The overall job status.
    pub status: JobStatus,

    /// The language models recognition ran with, in request order.
    pub languages: Vec<String>,

    /// True when the caller asked for automatic language detection and we
    /// substituted the configured fallback instead.
    pub language_fallback_applied: bool,

    /// Advisory only: the dominant language detected in the recognized
    /// text, as a lowercase name. Never influences recognition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_language: Option<String>,

    /// The number of pages in the document.
    pub page_count: usize,

    /// Per-page outcomes, in page order.
    pub pages: Vec<PageRecord>,

    /// Mean confidence over recognized pages, or 0 when no page was
    /// recognized.
    pub aggregate_confidence: f32,

    /// The text of the recognized pages, each introduced by a `[Page N]`
    /// marker. Pages that failed, timed out, or came back blank are
    /// omitted.
    pub combined_text: String,

    /// Characters in the combined text, markers included.
    pub character_count: usize,

    /// Wall-clock time the job took, in milliseconds.
    pub elapsed_ms: u64,
}

/// Derive the job status from assembled pages.
pub fn derive_status(pages: &[PageRecord]) -> JobStatus {
    let recognized = pages
        .iter()
        .filter(|record| record.outcome.is_recognized())
        .count();
    if recognized == pages.len() {
        JobStatus::Complete
    } else if recognized > 0 {
        JobStatus::PartialFailure
    } else {
        JobStatus::Failed
    }
}

/// Mean confidence over the recognized pages, or 0 when there are none.
pub fn aggregate_confidence(pages: &[PageRecord]) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for record in pages {
        if let PageOutcome::Recognized { confidence, .. } = &record.outcome {
            sum += f64::from(*confidence);
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}

/// Join the recognized pages into one text with `[Page N]` markers.
///
/// The markers are 1-based, matching what PDF viewers show. A page whose
/// recognized text is blank gets no marker, so a blank scan never leaves
/// an empty `[Page N]` dangling.
pub fn combined_text(pages: &[PageRecord]) -> String {
    let mut out = String::new();
    for record in pages {
        if let PageOutcome::Recognized { text, .. } = &record.outcome {
            if text.trim().is_empty() {
                continue;
            }
            out.push_str(&format!("[Page {}]\n{}\n\n", record.page_index + 1, text));
        }
    }
    out.trim_end().to_owned()
}
