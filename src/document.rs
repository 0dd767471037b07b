//! Input documents and their media types.

use crate::{error::JobError, prelude::*};

/// Media types we know how to turn into pages.
///
/// Everything else is rejected up front with
/// [`JobError::UnsupportedFormat`], before any page work is dispatched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaType {
    Pdf,
    Png,
    Jpeg,
    WebP,
    Gif,
    Tiff,
}

impl MediaType {
    /// Look up a media type from a MIME string.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/pdf" => Some(MediaType::Pdf),
            "image/png" => Some(MediaType::Png),
            "image/jpeg" => Some(MediaType::Jpeg),
            "image/webp" => Some(MediaType::WebP),
            "image/gif" => Some(MediaType::Gif),
            "image/tiff" => Some(MediaType::Tiff),
            _ => None,
        }
    }

    /// The canonical MIME string for this media type.
    pub fn mime(self) -> &'static str {
        match self {
            MediaType::Pdf => "application/pdf",
            MediaType::Png => "image/png",
            MediaType::Jpeg => "image/jpeg",
            MediaType::WebP => "image/webp",
            MediaType::Gif => "image/gif",
            MediaType::Tiff => "image/tiff",
        }
    }

    /// Is this a single-image type we pass through without rasterizing?
    ///
    /// TIFF is excluded because it may carry multiple pages.
    pub fn is_single_image(self) -> bool {
        matches!(
            self,
            MediaType::Png | MediaType::Jpeg | MediaType::WebP | MediaType::Gif
        )
    }
}

/// A raw input document.
///
/// Immutable once constructed. Owned by exactly one OCR job and dropped
/// when that job finishes.
#[derive(Debug)]
pub struct Document {
    bytes: Vec<u8>,
    media_type: MediaType,
}

impl Document {
    /// Create a document with a known media type.
    pub fn new(bytes: Vec<u8>, media_type: MediaType) -> Self {
        Self { bytes, media_type }
    }

    /// Create a document from a declared MIME string, or sniff the type
    /// from the bytes when the caller did not declare one.
    pub fn from_mime_or_bytes(
        bytes: Vec<u8>,
        declared_mime: Option<&str>,
    ) -> Result<Self, JobError> {
        let mime = match declared_mime {
            Some(mime) => mime.to_owned(),
            None => infer::get(&bytes)
                .map(|kind| kind.mime_type().to_owned())
                .unwrap_or_else(|| "application/octet-stream".to_owned()),
        };
        let media_type = MediaType::from_mime(&mime)
            .ok_or_else(|| JobError::UnsupportedFormat(mime))?;
        Ok(Self::new(bytes, media_type))
    }

    /// The raw document bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The document's media type.
    pub fn media_type(&self) -> MediaType {
        self.media_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Smallest valid PNG header (magic bytes are enough for sniffing).
    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn declared_mime_wins_over_sniffing() {
        let doc =
            Document::from_mime_or_bytes(b"%PDF-1.4".to_vec(), Some("application/pdf"))
                .unwrap();
        assert_eq!(doc.media_type(), MediaType::Pdf);
    }

    #[test]
    fn sniffs_png_magic() {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(&[0; 16]);
        let doc = Document::from_mime_or_bytes(bytes, None).unwrap();
        assert_eq!(doc.media_type(), MediaType::Png);
    }

    #[test]
    fn rejects_unknown_mime() {
        let err = Document::from_mime_or_bytes(vec![1, 2, 3], Some("text/html"))
            .unwrap_err();
        match err {
            JobError::UnsupportedFormat(mime) => assert_eq!(mime, "text/html"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_unrecognizable_bytes() {
        let err = Document::from_mime_or_bytes(vec![0, 1, 2, 3], None).unwrap_err();
        assert!(matches!(err, JobError::UnsupportedFormat(_)));
    }
}
