//! Service configuration.
//!
//! Every field has a sensible default, so a config file only needs to
//! name the settings it changes. CLI flags override the file.

use std::time::Duration;

use crate::{async_utils::io::read_json_or_toml, prelude::*, verify::VerifyLevel};

/// Raster resolution for PDF pages, in DPI.
const DEFAULT_DPI: u32 = 150;

/// Documents larger than this are rejected on intake.
const DEFAULT_MAX_DOCUMENT_BYTES: usize = 10 * 1024 * 1024;

/// How long one page may spend in the pool, including queueing.
const DEFAULT_PER_PAGE_TIMEOUT_SECS: u64 = 120;

/// How long a whole job may run.
const DEFAULT_JOB_DEADLINE_SECS: u64 = 600;

/// How many finished results the in-memory store keeps.
const DEFAULT_STORE_CAPACITY: usize = 10;

/// Tunable settings for the OCR pipeline.
#[derive(Clone, Debug, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case", deny_unknown_fields, default)]
pub struct ServiceConfig {
    /// Maximum recognition units in flight at once.
    pub worker_count: usize,

    /// Raster resolution for PDF pages, in DPI.
    pub dpi: u32,

    /// The language used when a request does not pick one.
    pub fallback_language: String,

    /// Budget for one page, in seconds. Waiting for a worker slot counts.
    pub per_page_timeout_secs: u64,

    /// Budget for a whole job, in seconds. Rasterization counts.
    pub job_deadline_secs: u64,

    /// Reject documents larger than this many bytes.
    pub max_document_bytes: usize,

    /// Multi-pass verification level.
    pub verify: VerifyLevel,

    /// How many finished results the in-memory store keeps before
    /// evicting the oldest.
    pub store_capacity: usize,

    /// Treat these language models as installed instead of asking the
    /// engine. Useful when the engine cannot be queried at startup.
    pub installed_languages: Option<Vec<String>>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            dpi: DEFAULT_DPI,
            fallback_language: "eng".to_owned(),
            per_page_timeout_secs: DEFAULT_PER_PAGE_TIMEOUT_SECS,
            job_deadline_secs: DEFAULT_JOB_DEADLINE_SECS,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            verify: VerifyLevel::default(),
            store_capacity: DEFAULT_STORE_CAPACITY,
            installed_languages: None,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML or JSON file, chosen by extension.
    pub async fn load(path: &Path) -> Result<Self> {
        read_json_or_toml(path)
            .await
            .with_context(|| format!("failed to load config from {}", path.display()))
    }

    /// The per-page budget as a [`Duration`].
    pub fn per_page_timeout(&self) -> Duration {
        Duration::from_secs(self.per_page_timeout_secs)
    }

    /// The whole-job budget as a [`Duration`].
    pub fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.job_deadline_secs)
    }
}
