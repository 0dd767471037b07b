//! Job-level failures.
//!
//! Everything here kills the whole job before (or while) pages are being
//! produced. Failures scoped to a single page are represented as
//! [`crate::result::PageOutcome`] values instead and never surface as
//! errors.

use crate::rasterize::RasterizeError;

/// A failure that aborts an entire OCR job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// A requested language is not installed in the recognition engine.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The document's media type is not one we can paginate.
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// The document exceeds the configured size limit.
    #[error("document is {size} bytes, limit is {limit}")]
    DocumentTooLarge { size: usize, limit: usize },

    /// The document could not be opened or rasterized at all.
    #[error("could not rasterize document")]
    Rasterization(#[from] RasterizeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_input() {
        let err = JobError::UnsupportedLanguage("xx".to_owned());
        assert!(err.to_string().contains("xx"));

        let err = JobError::UnsupportedFormat("text/html".to_owned());
        assert!(err.to_string().contains("text/html"));

        let err = JobError::DocumentTooLarge { size: 20, limit: 10 };
        assert!(err.to_string().contains("20"));
        assert!(err.to_string().contains("10"));
    }
}
