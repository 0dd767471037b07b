//! Turning PDF bytes into per-page images, via Poppler's CLI tools.

use std::{
    collections::BTreeMap,
    sync::{Arc, LazyLock},
};

use futures::{StreamExt as _, stream};
use image::DynamicImage;
use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::{
        BoxedStream, check_for_command_failure, spawn_blocking_propagating_panics,
    },
    prelude::*,
};

/// A default error regex for checking command output.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Poppler reconstructs damaged xref tables on the fly and reports it at
/// error level. The document still renders, so we treat it as a warning.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// A failure to open or rasterize a whole document.
///
/// These abort the job before any page work is dispatched. They never
/// describe a single bad page.
#[derive(Debug, thiserror::Error)]
pub enum RasterizeError {
    /// The document is encrypted and we do not take passwords.
    #[error("document is encrypted")]
    Encrypted,

    /// The document could not be parsed or rendered.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// The pages of a rasterized document.
///
/// `total_pages` is known up front; the stream yields exactly that many
/// items. Pages decode lazily, so only the pages currently being worked on
/// are in memory.
pub struct RasterizedPages {
    pub total_pages: usize,
    pub pages: BoxedStream<Result<DynamicImage>>,
}

impl RasterizedPages {
    /// A document with no pages at all. Not an error.
    pub fn empty() -> Self {
        Self {
            total_pages: 0,
            pages: stream::empty().boxed(),
        }
    }
}

/// A page renderer for PDF documents.
///
/// Kept behind a trait so pipeline tests can feed in synthetic pages
/// without Poppler installed.
#[async_trait]
pub trait Rasterizer: Send + Sync + 'static {
    /// Rasterize a PDF into one image per page at the given DPI.
    async fn rasterize(
        &self,
        bytes: &[u8],
        dpi: u32,
    ) -> Result<RasterizedPages, RasterizeError>;
}

/// Rasterizes PDFs using Poppler's `pdftocairo` CLI tool.
pub struct PopplerRasterizer;

#[async_trait]
impl Rasterizer for PopplerRasterizer {
    #[instrument(level = "debug", skip_all, fields(size = bytes.len(), dpi))]
    async fn rasterize(
        &self,
        bytes: &[u8],
        dpi: u32,
    ) -> Result<RasterizedPages, RasterizeError> {
        // Poppler's tools want a file, so give the document one in a
        // directory we control.
        let tmpdir = tempfile::TempDir::with_prefix("rasterize")
            .context("failed to create temporary directory")?;
        let pdf_path = tmpdir.path().join("document.pdf");
        tokio::fs::write(&pdf_path, bytes)
            .await
            .with_context(|| format!("failed to write {:?}", pdf_path.display()))?;

        // Refuse encrypted documents before spending any render time.
        let properties = pdf_properties(&pdf_path).await?;
        if let Some(encrypted) = properties.get("Encrypted")
            && encrypted.starts_with("yes")
        {
            return Err(RasterizeError::Encrypted);
        }
        let declared_pages = parse_page_count(&properties)?;
        if declared_pages == 0 {
            return Ok(RasterizedPages::empty());
        }

        // Render every page as PNG. pdftocairo numbers the output files
        // with zero-padded page numbers, so a lexical sort restores page
        // order.
        let out_path = tmpdir.path().join("page");
        let mut cmd = Command::new("pdftocairo");
        cmd.arg("-png").arg("-r").arg(dpi.to_string());
        let output = cmd
            .arg(&pdf_path)
            .arg(&out_path)
            .output()
            .await
            .context("failed to run pdftocairo")?;
        check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

        // The input copy is no longer needed. Recover the disk space now,
        // which also leaves only page images in the directory.
        tokio::fs::remove_file(&pdf_path)
            .await
            .with_context(|| format!("failed to delete {:?}", pdf_path.display()))?;

        let mut paths = tmpdir
            .path()
            .read_dir()
            .with_context(|| {
                format!("failed to read temporary directory {:?}", tmpdir.path().display())
            })?
            .map(|entry| {
                let entry = entry.with_context(|| {
                    format!(
                        "failed to read entry in temporary directory {:?}",
                        tmpdir.path().display()
                    )
                })?;
                Ok(entry.path())
            })
            .collect::<Result<Vec<_>>>()?;
        paths.sort();

        if paths.len() != declared_pages {
            warn!(
                declared_pages,
                rendered_pages = paths.len(),
                "pdftocairo rendered a different number of pages than pdfinfo declared"
            );
        }

        Ok(RasterizedPages {
            total_pages: paths.len(),
            pages: page_stream(tmpdir, paths),
        })
    }
}

/// Stream the rendered page files as decoded images, in order.
///
/// The temporary directory stays alive until the stream is dropped. Each
/// page file is deleted as soon as it has been read, to recover disk
/// early on large documents.
fn page_stream(
    tmpdir: tempfile::TempDir,
    paths: Vec<PathBuf>,
) -> BoxedStream<Result<DynamicImage>> {
    let tmpdir = Arc::new(tmpdir);
    stream::iter(paths)
        .then(move |path| {
            let tmpdir = Arc::clone(&tmpdir);
            async move {
                let _tmpdir = tmpdir;
                load_page(&path).await
            }
        })
        .boxed()
}

/// Read, delete, and decode one rendered page file.
async fn load_page(path: &Path) -> Result<DynamicImage> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read page file {:?}", path.display()))?;
    tokio::fs::remove_file(path)
        .await
        .with_context(|| format!("failed to delete page file {:?}", path.display()))?;

    // PNG decoding is CPU work. Keep it off the async executor.
    let display = path.display().to_string();
    spawn_blocking_propagating_panics(move || {
        image::load_from_memory(&bytes)
            .with_context(|| format!("failed to decode page file {display:?}"))
    })
    .await
}

/// Run `pdfinfo` and parse its `key: value` output.
async fn pdf_properties(path: &Path) -> Result<BTreeMap<String, String>> {
    let mut cmd = Command::new("pdfinfo");
    let output = cmd
        .arg(path)
        .output()
        .await
        .context("failed to run pdfinfo")?;
    check_for_command_failure("pdfinfo", &output, Some(&is_error_line))?;

    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    let mut properties = BTreeMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        properties.insert(key.to_string(), value.to_string());
    }
    Ok(properties)
}

/// Extract the page count from parsed `pdfinfo` properties.
fn parse_page_count(properties: &BTreeMap<String, String>) -> Result<usize> {
    let page_count = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    page_count
        .parse::<usize>()
        .with_context(|| format!("failed to parse page count {page_count:?}"))
}
