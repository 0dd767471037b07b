//! Batch recognition of document manifests.
//!
//! A manifest is a JSONL or CSV file with one record per document. Each
//! record runs through the pipeline as its own job, and the results come
//! back out in manifest order, one record per document, as JSONL or as
//! flat CSV rows.

use std::sync::{Arc, Mutex};

use futures::StreamExt as _;
use schemars::JsonSchema;
use tokio::sync::mpsc;

use crate::{
    async_utils::{
        BoxedStream,
        io::{read_jsonl_or_csv, write_csv_output, write_output},
    },
    cmd::StreamOpts,
    job::{JobEvent, JobRequest, OcrPipeline},
    language::LanguageRequest,
    prelude::*,
    result::{DocumentResult, JobStatus},
    ui::{ProgressConfig, Ui},
};

/// An input record describing one document to recognize.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct BatchInput {
    /// The ID of the record.
    pub id: Value,

    /// The path to the document.
    pub path: PathBuf,

    /// Languages to recognize, as a comma-separated list of codes, or
    /// `auto`. Falls back to the run-wide setting when absent.
    #[serde(default)]
    pub languages: Option<String>,

    /// The document's MIME type. Guessed from the path, then from the
    /// bytes, when absent.
    #[serde(default)]
    pub media_type: Option<String>,
}

impl BatchInput {
    /// Convert from a JSON value to a manifest record.
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value::<Self>(value).context("failed to parse manifest record")
    }

    /// Read a manifest from a [`Path`] or from standard input.
    pub async fn read_stream(
        ui: Ui,
        path: Option<&Path>,
    ) -> Result<BoxedStream<Result<Self>>> {
        Ok(read_jsonl_or_csv(ui, path)
            .await?
            .map(|value| Self::from_json(value?))
            .boxed())
    }
}

/// Output status of one manifest record.
#[derive(Clone, Copy, Debug, JsonSchema, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every page of the document was recognized.
    Ok,

    /// The document produced text, but at least one page did not make it.
    Incomplete,

    /// The document produced nothing usable.
    Failed,
}

impl From<JobStatus> for BatchStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Complete => BatchStatus::Ok,
            JobStatus::PartialFailure => BatchStatus::Incomplete,
            JobStatus::Failed => BatchStatus::Failed,
        }
    }
}

/// An output record for one document.
#[derive(Clone, Debug, JsonSchema, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchOutput {
    /// The ID of the record.
    pub id: Value,

    /// What happened to this document?
    pub status: BatchStatus,

    /// Any errors that occurred during processing. Incomplete documents
    /// list their bad pages here.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    /// The recognition result, if the job ran at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DocumentResult>,
}

impl BatchOutput {
    /// Build an output record from a finished job.
    pub fn from_result(id: Value, result: DocumentResult) -> Self {
        let errors = result
            .pages
            .iter()
            .filter_map(|record| {
                record
                    .outcome
                    .failure_reason()
                    .map(|reason| format!("page {}: {}", record.page_index + 1, reason))
            })
            .collect();
        Self {
            id,
            status: BatchStatus::from(result.status),
            errors,
            result: Some(result),
        }
    }

    /// Create a new failed output record.
    pub fn new_failed(id: Value, errors: Vec<String>) -> Self {
        Self {
            id,
            status: BatchStatus::Failed,
            errors,
            result: None,
        }
    }

    /// Convert from the output type to a JSON value.
    pub fn to_json(&self) -> Result<Value> {
        serde_json::to_value(self.clone()).context("failed to serialize output record")
    }

    /// Write a stream of outputs to a [`Path`] or to standard output.
    ///
    /// Output is JSONL, unless the path ends in `.csv`, in which case each
    /// document flattens to one CSV row.
    pub async fn write_stream(
        ui: &Ui,
        path: Option<&Path>,
        stream: BoxedStream<Result<Self>>,
        stream_opts: &StreamOpts,
    ) -> Result<()> {
        let (stream, counters) = BatchCounters::wrap_stream(stream);
        match path {
            Some(path) if path.extension().is_some_and(|ext| ext == "csv") => {
                let output = stream.map(|value| Ok(FlatOutput::from(value?))).boxed();
                write_csv_output(path, output).await?;
            }
            _ => {
                let output = stream
                    .map(|value| {
                        let value = value?;
                        value.to_json()
                    })
                    .boxed();
                write_output(path, output).await?;
            }
        }
        counters.finish(ui, stream_opts)
    }
}

/// An output record flattened to one CSV row.
///
/// CSV cannot nest, so the per-page breakdown is dropped in favor of the
/// combined text.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FlatOutput {
    /// The ID of the record.
    pub id: String,

    /// What happened to this document?
    pub status: BatchStatus,

    /// The number of pages in the document.
    pub page_count: usize,

    /// Mean confidence over recognized pages.
    pub confidence: f32,

    /// Characters of recognized text.
    pub character_count: usize,

    /// Advisory detected language of the recognized text.
    pub detected_language: Option<String>,

    /// Wall-clock job time, in milliseconds.
    pub elapsed_ms: u64,

    /// The combined text of the recognized pages.
    pub text: String,

    /// Any errors, joined with `; `.
    pub errors: String,
}

impl From<BatchOutput> for FlatOutput {
    fn from(output: BatchOutput) -> Self {
        let id = match &output.id {
            Value::String(id) => id.clone(),
            other => other.to_string(),
        };
        let errors = output.errors.join("; ");
        match output.result {
            Some(result) => Self {
                id,
                status: output.status,
                page_count: result.page_count,
                confidence: result.aggregate_confidence,
                character_count: result.character_count,
                detected_language: result.detected_language,
                elapsed_ms: result.elapsed_ms,
                text: result.combined_text,
                errors,
            },
            None => Self {
                id,
                status: output.status,
                page_count: 0,
                confidence: 0.0,
                character_count: 0,
                detected_language: None,
                elapsed_ms: 0,
                text: String::new(),
                errors,
            },
        }
    }
}

/// Run one manifest record through the pipeline.
///
/// Never errors: anything that goes wrong with this document becomes a
/// failed output record, so the rest of the batch keeps going.
#[instrument(level = "debug", skip_all, fields(id = %input.id))]
pub async fn process_document(
    pipeline: &OcrPipeline,
    ui: &Ui,
    input: BatchInput,
    default_languages: &LanguageRequest,
) -> BatchOutput {
    let BatchInput {
        id,
        path,
        languages,
        media_type,
    } = input;

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return BatchOutput::new_failed(
                id,
                vec![format!("failed to read {}: {}", path.display(), err)],
            );
        }
    };

    // Manifests usually name files with a useful extension, which saves
    // sniffing the bytes.
    let media_type = media_type
        .or_else(|| mime_guess::from_path(&path).first_raw().map(str::to_owned));
    let languages = match languages.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => LanguageRequest::parse(raw),
        _ => default_languages.clone(),
    };

    let (events, receiver) = mpsc::unbounded_channel();
    let request = JobRequest {
        media_type,
        languages,
        events: Some(events),
        ..JobRequest::default()
    };
    // The job holds the event sender, so the progress future drains to
    // completion as soon as the job returns.
    let (outcome, _) = tokio::join!(
        pipeline.run_job(bytes, request),
        page_progress(ui, receiver)
    );
    match outcome {
        Ok(result) => BatchOutput::from_result(id, result),
        Err(err) => BatchOutput::new_failed(id, vec![format!("{err:#}")]),
    }
}

/// Drive a per-document page bar from job progress events.
///
/// Single-page documents skip the bar; there is nothing to count up.
async fn page_progress(ui: &Ui, mut events: mpsc::UnboundedReceiver<JobEvent>) {
    let mut bar = None;
    while let Some(event) = events.recv().await {
        match event {
            JobEvent::PagesBuilt { total_pages } if total_pages > 1 => {
                bar = Some(ui.new_progress_bar(
                    &ProgressConfig {
                        emoji: "🔍",
                        msg: "Recognizing pages",
                        done_msg: "Recognized pages",
                    },
                    total_pages as u64,
                ));
            }
            JobEvent::PageDone { .. } => {
                if let Some(bar) = &bar {
                    bar.inc(1);
                }
            }
            JobEvent::Finished { .. } => {
                if let Some(bar) = bar.take() {
                    bar.finish_and_clear();
                }
            }
            _ => {}
        }
    }
}

/// Counters accumulated over a batch run.
#[derive(Clone, Debug, Default)]
pub struct BatchCounters {
    /// How many records did we process?
    pub total_record_count: usize,

    /// How many records failed outright?
    pub failure_count: usize,

    /// How many records finished with at least one bad page?
    pub incomplete_count: usize,

    /// How many pages did we see across all documents?
    pub page_count: usize,
}

impl BatchCounters {
    /// Wrap a stream with counters.
    pub fn wrap_stream(
        stream: BoxedStream<Result<BatchOutput>>,
    ) -> (BoxedStream<Result<BatchOutput>>, Arc<Mutex<BatchCounters>>) {
        let counters = Arc::new(Mutex::new(Self::default()));
        let counters_clone = counters.clone();
        let stream = stream
            .map(move |value| {
                let value = value?;
                counters_clone.update(&value);
                Ok(value)
            })
            .boxed();
        (stream, counters)
    }
}

/// We actually want to put methods on `Mutex<BatchCounters>`, because
/// that's the type we work with. To do that, we need an extension trait
/// with the methods we want.
pub trait BatchCounterExt {
    /// Update counters for an output record.
    fn update(&self, output: &BatchOutput);

    /// Display counter values to the user.
    fn finish(self: Arc<Self>, ui: &Ui, stream_opts: &StreamOpts) -> Result<()>;
}

impl BatchCounterExt for Mutex<BatchCounters> {
    fn update(&self, output: &BatchOutput) {
        // Hold a sync lock, but just for an instant to update counters.
        let mut counters = self.lock().expect("lock poisoned");
        counters.total_record_count += 1;
        match output.status {
            BatchStatus::Ok => {}
            BatchStatus::Incomplete => counters.incomplete_count += 1,
            BatchStatus::Failed => counters.failure_count += 1,
        }
        if let Some(result) = &output.result {
            counters.page_count += result.page_count;
        }
    }

    fn finish(self: Arc<Self>, ui: &Ui, stream_opts: &StreamOpts) -> Result<()> {
        let counters = self.lock().expect("lock poisoned").to_owned();
        if counters.page_count > 0 {
            ui.display_message("📄", &format!("{} pages processed", counters.page_count));
        }
        if counters.incomplete_count > 0 {
            ui.display_message(
                "⚠️",
                &format!(
                    "{} documents finished with failed pages",
                    counters.incomplete_count
                ),
            );
        }
        let failure_rate =
            counters.failure_count as f32 / counters.total_record_count as f32;
        if failure_rate > stream_opts.allowed_failure_rate {
            Err(anyhow!(
                "{}/{} ({:.2}%) of documents failed, but only {:.2}% were allowed",
                counters.failure_count,
                counters.total_record_count,
                failure_rate * 100.0,
                stream_opts.allowed_failure_rate * 100.0
            ))
        } else {
            if counters.failure_count > 0 {
                ui.display_message(
                    "❌",
                    &format!(
                        "{} documents could not be processed",
                        counters.failure_count
                    ),
                );
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, GrayImage, ImageFormat};

    use crate::{
        config::ServiceConfig, rasterize::PopplerRasterizer, recognize::echo::EchoEngine,
        result::{PageOutcome, PageRecord},
    };

    use super::*;

    fn result_with_pages(pages: Vec<PageRecord>) -> DocumentResult {
        let status = crate::result::derive_status(&pages);
        DocumentResult {
            job_id: "test-job".to_owned(),
            status,
            languages: vec!["eng".to_owned()],
            language_fallback_applied: false,
            detected_language: None,
            page_count: pages.len(),
            pages,
            aggregate_confidence: 0.5,
            combined_text: String::new(),
            character_count: 0,
            elapsed_ms: 1,
        }
    }

    #[test]
    fn incomplete_documents_list_their_bad_pages() {
        let result = result_with_pages(vec![
            PageRecord {
                page_index: 0,
                outcome: PageOutcome::Recognized {
                    text: "fine".to_owned(),
                    confidence: 0.9,
                },
            },
            PageRecord {
                page_index: 1,
                outcome: PageOutcome::Failed {
                    reason: "engine crashed".to_owned(),
                },
            },
            PageRecord {
                page_index: 2,
                outcome: PageOutcome::TimedOut,
            },
        ]);
        let output = BatchOutput::from_result(Value::from(7), result);
        assert_eq!(output.status, BatchStatus::Incomplete);
        assert_eq!(output.errors.len(), 2);
        assert!(output.errors[0].contains("page 2"));
        assert!(output.errors[0].contains("engine crashed"));
        assert!(output.errors[1].contains("page 3"));
    }

    #[test]
    fn failed_records_serialize_without_a_result() {
        let output = BatchOutput::new_failed(
            Value::from("doc-1"),
            vec!["could not read file".to_owned()],
        );
        let json = output.to_json().unwrap();
        assert_eq!(json["id"], "doc-1");
        assert_eq!(json["status"], "failed");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn clean_records_serialize_without_errors() {
        let result = result_with_pages(vec![PageRecord {
            page_index: 0,
            outcome: PageOutcome::Recognized {
                text: "fine".to_owned(),
                confidence: 0.9,
            },
        }]);
        let json = BatchOutput::from_result(Value::from(1), result)
            .to_json()
            .unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json.get("errors").is_none());
        assert_eq!(json["result"]["page_count"], 1);
    }

    #[test]
    fn flat_output_keeps_the_combined_text() {
        let mut result = result_with_pages(vec![PageRecord {
            page_index: 0,
            outcome: PageOutcome::Recognized {
                text: "hello".to_owned(),
                confidence: 0.9,
            },
        }]);
        result.combined_text = "[Page 1]\nhello".to_owned();
        result.character_count = result.combined_text.chars().count();

        let flat = FlatOutput::from(BatchOutput::from_result(Value::from("doc-9"), result));
        assert_eq!(flat.id, "doc-9");
        assert_eq!(flat.status, BatchStatus::Ok);
        assert_eq!(flat.text, "[Page 1]\nhello");
        assert_eq!(flat.character_count, 14);
        assert_eq!(flat.errors, "");
    }

    #[test]
    fn flat_output_for_a_failed_record_is_mostly_empty() {
        let output = BatchOutput::new_failed(
            Value::from(3),
            vec!["first error".to_owned(), "second error".to_owned()],
        );
        let flat = FlatOutput::from(output);
        assert_eq!(flat.id, "3");
        assert_eq!(flat.status, BatchStatus::Failed);
        assert_eq!(flat.page_count, 0);
        assert_eq!(flat.text, "");
        assert_eq!(flat.errors, "first error; second error");
    }

    #[tokio::test]
    async fn counters_gate_on_the_failure_rate() {
        let outputs = vec![
            Ok(BatchOutput::from_result(
                Value::from(1),
                result_with_pages(vec![PageRecord {
                    page_index: 0,
                    outcome: PageOutcome::Recognized {
                        text: "fine".to_owned(),
                        confidence: 0.9,
                    },
                }]),
            )),
            Ok(BatchOutput::new_failed(Value::from(2), vec!["boom".to_owned()])),
        ];
        let stream = futures::stream::iter(outputs).boxed();
        let (stream, counters) = BatchCounters::wrap_stream(stream);
        stream.for_each(|_| async {}).await;

        {
            let counters = counters.lock().unwrap();
            assert_eq!(counters.total_record_count, 2);
            assert_eq!(counters.failure_count, 1);
            assert_eq!(counters.page_count, 1);
        }

        let ui = Ui::init_for_tests();
        let strict = StreamOpts {
            take_first: None,
            job_count: 1,
            allowed_failure_rate: 0.01,
        };
        assert!(counters.clone().finish(&ui, &strict).is_err());

        let lenient = StreamOpts {
            allowed_failure_rate: 0.8,
            ..strict
        };
        assert!(counters.finish(&ui, &lenient).is_ok());
    }

    #[tokio::test]
    async fn a_missing_file_fails_its_record_only() {
        let pipeline = OcrPipeline::new(
            Arc::new(EchoEngine),
            Arc::new(PopplerRasterizer),
            ServiceConfig::default(),
        )
        .await
        .unwrap();

        let input = BatchInput {
            id: Value::from(1),
            path: PathBuf::from("/definitely/not/here.pdf"),
            languages: None,
            media_type: None,
        };
        let ui = Ui::init_for_tests();
        let output =
            process_document(&pipeline, &ui, input, &LanguageRequest::Default).await;
        assert_eq!(output.status, BatchStatus::Failed);
        assert!(output.errors[0].contains("/definitely/not/here.pdf"));
        assert!(output.result.is_none());
    }

    #[tokio::test]
    async fn a_png_record_recognizes_through_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        let image = DynamicImage::ImageLuma8(GrayImage::new(6, 6));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        std::fs::write(&path, &bytes).unwrap();

        let pipeline = OcrPipeline::new(
            Arc::new(EchoEngine),
            Arc::new(PopplerRasterizer),
            ServiceConfig::default(),
        )
        .await
        .unwrap();

        let input = BatchInput {
            id: Value::from("png-doc"),
            path,
            languages: Some("deu".to_owned()),
            media_type: None,
        };
        let ui = Ui::init_for_tests();
        let output =
            process_document(&pipeline, &ui, input, &LanguageRequest::Default).await;
        assert_eq!(output.status, BatchStatus::Ok);
        let result = output.result.unwrap();
        assert_eq!(result.page_count, 1);
        assert_eq!(result.languages, ["deu"]);
    }
}
