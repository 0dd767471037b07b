//! The recognition worker pool.
//!
//! At most `capacity` units run recognition at once, process-wide for the
//! pool instance. Everything else about a unit is self-contained: a unit
//! that fails or times out produces an outcome for its page and touches
//! nothing else.

use std::sync::Arc;

use tokio::{
    sync::Semaphore,
    time::{Instant, timeout_at},
};

use crate::{
    language::LanguageSet,
    page_source::PageImage,
    prelude::*,
    recognize::RecognitionEngine,
    result::PageOutcome,
};

/// A bounded pool of recognition workers.
pub struct RecognitionPool {
    engine: Arc<dyn RecognitionEngine>,
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl RecognitionPool {
    /// Create a pool running at most `capacity` units at once.
    pub fn new(engine: Arc<dyn RecognitionEngine>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            engine,
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// The maximum number of units this pool runs at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run one recognition unit to its outcome.
    ///
    /// Never errors: failures and deadline expiry become page outcomes.
    /// The deadline covers the wait for a worker slot as well as the
    /// recognition itself; on expiry the unit is abandoned, which also
    /// cancels any subprocess the engine started.
    #[instrument(level = "debug", skip_all, fields(page = page.index))]
    pub async fn submit(
        &self,
        page: PageImage,
        languages: &LanguageSet,
        deadline: Instant,
    ) -> (usize, PageOutcome) {
        let index = page.index;
        let outcome = match timeout_at(deadline, self.run_unit(page, languages)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(page = index, "page deadline expired");
                PageOutcome::TimedOut
            }
        };
        (index, outcome)
    }

    async fn run_unit(&self, page: PageImage, languages: &LanguageSet) -> PageOutcome {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return PageOutcome::Failed {
                    reason: "worker pool is shut down".to_owned(),
                };
            }
        };
        match self.engine.recognize(&page, languages).await {
            Ok(recognition) => PageOutcome::Recognized {
                text: recognition.text,
                confidence: recognition.confidence,
            },
            Err(err) => {
                warn!(page = page.index, "page recognition failed: {}", err.reason());
                PageOutcome::Failed {
                    reason: err.reason(),
                }
            }
        }
    }
}
