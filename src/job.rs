//! The OCR job controller.
//!
//! One [`OcrPipeline`] owns the recognition pool, the rasterizer, and the
//! result store; one call to [`OcrPipeline::run_job`] owns a single
//! request end to end. Concurrent jobs share the pool, so the worker
//! bound holds process-wide no matter how many documents are in flight.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use futures::StreamExt as _;
use tokio::{
    sync::mpsc,
    time::{Instant, timeout_at},
};

use crate::{
    assemble::Assembler,
    config::ServiceConfig,
    detect::detect_language,
    document::Document,
    error::JobError,
    language::{LanguageRequest, resolve},
    pool::RecognitionPool,
    prelude::*,
    rasterize::Rasterizer,
    recognize::RecognitionEngine,
    result::{
        DocumentResult, JobStatus, PageOutcome, aggregate_confidence, combined_text,
        derive_status,
    },
    store::JobStore,
    verify::MultiPassEngine,
};

/// Progress notifications for one job.
///
/// Delivery is best-effort: a dropped receiver never blocks or fails the
/// job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobEvent {
    /// The job was accepted and assigned an ID.
    Started { job_id: String },

    /// The document's page count is known.
    PagesBuilt { total_pages: usize },

    /// One page finished, one way or another.
    PageDone { index: usize, recognized: bool },

    /// Every page is accounted for.
    Finished { status: JobStatus },
}

/// One OCR request.
pub struct JobRequest {
    /// Declared MIME type, if the caller knows it. Sniffed from the bytes
    /// otherwise.
    pub media_type: Option<String>,

    /// The languages to recognize with.
    pub languages: LanguageRequest,

    /// Overrides the configured job deadline, if set.
    pub deadline: Option<Duration>,

    /// Where to send progress events, if anywhere.
    pub events: Option<mpsc::UnboundedSender<JobEvent>>,
}

impl Default for JobRequest {
    fn default() -> Self {
        Self {
            media_type: None,
            languages: LanguageRequest::Default,
            deadline: None,
            events: None,
        }
    }
}

/// The OCR pipeline: recognition pool, rasterizer, and result store.
pub struct OcrPipeline {
    config: ServiceConfig,
    rasterizer: Arc<dyn Rasterizer>,
    pool: RecognitionPool,
    store: JobStore,
    installed: BTreeSet<String>,
}

impl OcrPipeline {
    /// Build a pipeline around an engine and a rasterizer.
    ///
    /// The engine's installed language set is captured once, here, unless
    /// the config supplies one. Jobs resolve against this snapshot, so a
    /// language pack installed later needs a new pipeline to be picked up.
    pub async fn new(
        engine: Arc<dyn RecognitionEngine>,
        rasterizer: Arc<dyn Rasterizer>,
        config: ServiceConfig,
    ) -> Result<Self> {
        let installed = match &config.installed_languages {
            Some(codes) => codes.iter().cloned().collect(),
            None => engine.installed_languages().await.with_context(|| {
                format!("failed to list languages for {}", engine.name())
            })?,
        };
        debug!(engine = engine.name(), languages = installed.len(), "pipeline ready");

        let engine = MultiPassEngine::wrap(engine, config.verify);
        let pool = RecognitionPool::new(engine, config.worker_count);
        let store = JobStore::new(config.store_capacity);
        Ok(Self {
            config,
            rasterizer,
            pool,
            store,
            installed,
        })
    }

    /// Recently finished results.
    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Run one OCR job to its result.
    ///
    /// Fail-fast errors (bad language, bad format, unreadable document)
    /// return before any page work starts. Per-page problems become page
    /// outcomes, and deadline exhaustion assembles whatever has finished,
    /// even when it fires before the first page exists.
    #[instrument(level = "debug", skip_all)]
    pub async fn run_job(
        &self,
        bytes: Vec<u8>,
        request: JobRequest,
    ) -> Result<DocumentResult, JobError> {
        let started = std::time::Instant::now();
        // One clock for the whole job, anchored on receipt. Pagination
        // spends from the same budget the pages do.
        let job_deadline =
            Instant::now() + request.deadline.unwrap_or_else(|| self.config.job_deadline());
        let per_page = self.config.per_page_timeout();
        let job_id = uuid::Uuid::new_v4().to_string();
        debug!(job_id, size = bytes.len(), "received OCR job");

        if bytes.len() > self.config.max_document_bytes {
            return Err(JobError::DocumentTooLarge {
                size: bytes.len(),
                limit: self.config.max_document_bytes,
            });
        }
        let document = Document::from_mime_or_bytes(bytes, request.media_type.as_deref())?;
        send_event(
            &request.events,
            JobEvent::Started {
                job_id: job_id.clone(),
            },
        );

        let resolved = resolve(
            &request.languages,
            &self.installed,
            &self.config.fallback_language,
        )?;
        if resolved.fallback_applied {
            debug!(
                job_id,
                fallback = %resolved.set,
                "automatic language detection requested; using the fallback"
            );
        }

        let pagination =
            crate::page_source::build(document, &*self.rasterizer, self.config.dpi);
        let sequence = match timeout_at(job_deadline, pagination).await {
            Ok(sequence) => sequence?,
            Err(_) => {
                // The budget ran out before a single page existed. The
                // job still resolves to a result rather than an error.
                debug!(job_id, "job deadline expired during pagination");
                send_event(
                    &request.events,
                    JobEvent::Finished {
                        status: JobStatus::Failed,
                    },
                );
                return Ok(self.finish_job(DocumentResult {
                    job_id,
                    status: JobStatus::Failed,
                    languages: resolved.set.codes().to_vec(),
                    language_fallback_applied: resolved.fallback_applied,
                    detected_language: None,
                    page_count: 0,
                    pages: vec![],
                    aggregate_confidence: 0.0,
                    combined_text: String::new(),
                    character_count: 0,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }));
            }
        };
        let total_pages = sequence.total_pages;
        debug!(job_id, total_pages, "document paginated");
        send_event(&request.events, JobEvent::PagesBuilt { total_pages });

        let mut assembler = Assembler::new(total_pages);
        {
            let pool = &self.pool;
            let languages = &resolved.set;
            let mut units = sequence
                .pages
                .map(|item| async move {
                    match item {
                        Ok(page) => {
                            let unit_deadline = job_deadline.min(Instant::now() + per_page);
                            pool.submit(page, languages, unit_deadline).await
                        }
                        // The page never decoded, so there is nothing to
                        // recognize. Record the failure against its slot.
                        Err(err) => (
                            err.index,
                            PageOutcome::Failed {
                                reason: format!("{err:#}"),
                            },
                        ),
                    }
                })
                .buffer_unordered(self.pool.capacity())
                .boxed();

            loop {
                let (index, outcome) = match timeout_at(job_deadline, units.next()).await
                {
                    Ok(Some(completed)) => completed,
                    Ok(None) => break,
                    Err(_) => {
                        debug!(job_id, "job deadline expired; assembling what we have");
                        break;
                    }
                };
                let recognized = outcome.is_recognized();
                if assembler.record(index, outcome) {
                    send_event(&request.events, JobEvent::PageDone { index, recognized });
                }
            }

            // Dropping the unit stream cancels anything still running.
        }

        let pages = assembler.finish();
        let status = derive_status(&pages);
        let confidence = aggregate_confidence(&pages);
        let combined = combined_text(&pages);
        let character_count = combined.chars().count();
        let detected = detect_language(&combined);
        send_event(&request.events, JobEvent::Finished { status });

        let result = DocumentResult {
            job_id,
            status,
            languages: resolved.set.codes().to_vec(),
            language_fallback_applied: resolved.fallback_applied,
            detected_language: detected,
            page_count: total_pages,
            pages,
            aggregate_confidence: confidence,
            combined_text: combined,
            character_count,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        Ok(self.finish_job(result))
    }

    /// Log a finished job and keep it in the recent-results store.
    fn finish_job(&self, result: DocumentResult) -> DocumentResult {
        info!(
            job_id = %result.job_id,
            status = ?result.status,
            pages = result.page_count,
            confidence = result.aggregate_confidence,
            elapsed_ms = result.elapsed_ms,
            "OCR job finished"
        );
        self.store.insert(result.clone());
        result
    }
}

/// Send a progress event if anyone is listening.
fn send_event(events: &Option<mpsc::UnboundedSender<JobEvent>>, event: JobEvent) {
    if let Some(events) = events {
        // The receiver may already be gone. Progress is best-effort.
        let _ = events.send(event);
    }
}
