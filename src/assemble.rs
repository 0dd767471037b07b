//! Reassembling per-page outcomes into an ordered result.
//!
//! Units complete in whatever order the pool finishes them. The assembler
//! puts them back into page order and fills in anything the deadline cut
//! off.

use std::collections::{BTreeMap, btree_map::Entry};

use crate::{
    prelude::*,
    result::{PageOutcome, PageRecord},
};

/// Collects page outcomes for one job.
pub struct Assembler {
    total_pages: usize,
    outcomes: BTreeMap<usize, PageOutcome>,
}

impl Assembler {
    /// Start assembling a document with the given page count.
    pub fn new(total_pages: usize) -> Self {
        Self {
            total_pages,
            outcomes: BTreeMap::new(),
        }
    }

    /// Record the outcome for one page index.
    ///
    /// The first outcome recorded for an index wins; later ones are
    /// dropped. Returns whether the outcome was newly recorded.
    pub fn record(&mut self, index: usize, outcome: PageOutcome) -> bool {
        if index >= self.total_pages {
            warn!(
                index,
                total_pages = self.total_pages,
                "dropping outcome for out-of-range page index"
            );
            return false;
        }
        match self.outcomes.entry(index) {
            Entry::Vacant(entry) => {
                entry.insert(outcome);
                true
            }
            Entry::Occupied(_) => {
                debug!(index, "ignoring duplicate outcome for page index");
                false
            }
        }
    }

    /// Has every page reported an outcome?
    pub fn is_complete(&self) -> bool {
        self.outcomes.len() == self.total_pages
    }

    /// Produce the final page records, in page order.
    ///
    /// Pages that never reported, because the job deadline expired first,
    /// are recorded as timed out.
    pub fn finish(self) -> Vec<PageRecord> {
        let mut outcomes = self.outcomes;
        (0..self.total_pages)
            .map(|index| PageRecord {
                page_index: index,
                outcome: outcomes.remove(&index).unwrap_or(PageOutcome::TimedOut),
            })
            .collect()
    }
}
