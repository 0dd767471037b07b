//! Building the ordered page sequence for a document.
//!
//! Images become a single page at native resolution. Multipage TIFFs get
//! one page per IFD, decoded up front. PDFs go through the rasterizer and
//! stream lazily, one decoded page in memory per in-flight unit.

use std::io::Cursor;

use futures::{StreamExt as _, stream};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use tiff::{
    ColorType,
    decoder::{Decoder, DecodingResult},
};

use crate::{
    async_utils::{BoxedStream, spawn_blocking_propagating_panics},
    document::{Document, MediaType},
    error::JobError,
    prelude::*,
    rasterize::Rasterizer,
};

/// A single page image, ready for recognition.
///
/// `index` is 0-based and assigned here, in document order. It follows the
/// page through the worker pool so the assembled result can be re-ordered
/// no matter how recognition completes.
#[derive(Debug)]
pub struct PageImage {
    pub index: usize,
    pub image: DynamicImage,
}

/// A page that could not be decoded.
///
/// Scoped to one page: the index is preserved so the failure can be
/// recorded against the right slot while the rest of the document
/// continues.
#[derive(Debug, thiserror::Error)]
#[error("failed to load page {index}")]
pub struct PageLoadError {
    pub index: usize,
    #[source]
    pub source: anyhow::Error,
}

/// The pages of one document.
///
/// `total_pages` is known before any page is consumed, so the assembler
/// can tell a finished document from an abandoned one. The stream yields
/// exactly `total_pages` items, in index order.
pub struct PageSequence {
    pub total_pages: usize,
    pub pages: BoxedStream<Result<PageImage, PageLoadError>>,
}

impl PageSequence {
    fn from_images(images: Vec<DynamicImage>) -> Self {
        Self {
            total_pages: images.len(),
            pages: stream::iter(
                images
                    .into_iter()
                    .enumerate()
                    .map(|(index, image)| Ok(PageImage { index, image })),
            )
            .boxed(),
        }
    }
}

/// Turn a document into its page sequence.
///
/// Failures here abort the job: if we cannot open the document at all,
/// there is nothing sensible to dispatch.
///
/// TODO: animated GIFs currently contribute their first frame only; split
/// the remaining frames into pages.
#[instrument(level = "debug", skip_all, fields(media_type = ?document.media_type()))]
pub async fn build(
    document: Document,
    rasterizer: &dyn Rasterizer,
    dpi: u32,
) -> Result<PageSequence, JobError> {
    let media_type = document.media_type();
    if media_type.is_single_image() {
        let bytes = document.bytes().to_vec();
        let image = spawn_blocking_propagating_panics(move || {
            image::load_from_memory(&bytes)
                .with_context(|| format!("failed to decode {} document", media_type.mime()))
        })
        .await
        .map_err(crate::rasterize::RasterizeError::Failed)?;
        Ok(PageSequence::from_images(vec![image]))
    } else if media_type == MediaType::Tiff {
        let bytes = document.bytes().to_vec();
        let images =
            spawn_blocking_propagating_panics(move || decode_tiff_pages(bytes))
                .await
                .map_err(crate::rasterize::RasterizeError::Failed)?;
        Ok(PageSequence::from_images(images))
    } else {
        let rasterized = rasterizer.rasterize(document.bytes(), dpi).await?;
        let pages = rasterized
            .pages
            .enumerate()
            .map(|(index, result)| match result {
                Ok(image) => Ok(PageImage { index, image }),
                Err(source) => Err(PageLoadError { index, source }),
            })
            .boxed();
        Ok(PageSequence {
            total_pages: rasterized.total_pages,
            pages,
        })
    }
}

/// Decode every IFD of a TIFF file, in file order.
fn decode_tiff_pages(bytes: Vec<u8>) -> Result<Vec<DynamicImage>> {
    let mut decoder =
        Decoder::new(Cursor::new(bytes)).context("failed to open TIFF document")?;
    let mut pages = Vec::new();
    loop {
        let page = pages.len();
        let (width, height) = decoder
            .dimensions()
            .with_context(|| format!("failed to read dimensions of TIFF page {page}"))?;
        let color_type = decoder
            .colortype()
            .with_context(|| format!("failed to read color type of TIFF page {page}"))?;
        let data = decoder
            .read_image()
            .with_context(|| format!("failed to decode TIFF page {page}"))?;
        pages.push(to_dynamic_image(data, color_type, width, height).with_context(
            || format!("failed to convert TIFF page {page} to an image"),
        )?);

        if !decoder.more_images() {
            break;
        }
        decoder
            .next_image()
            .with_context(|| format!("failed to advance past TIFF page {page}"))?;
    }
    Ok(pages)
}

/// Convert raw TIFF samples into a [`DynamicImage`].
///
/// 16-bit samples are scaled down to 8 bits, which is plenty for
/// recognition.
fn to_dynamic_image(
    data: DecodingResult,
    color_type: ColorType,
    width: u32,
    height: u32,
) -> Result<DynamicImage> {
    let data = match data {
        DecodingResult::U8(data) => data,
        DecodingResult::U16(data) => data.iter().map(|&v| (v >> 8) as u8).collect(),
        _ => return Err(anyhow!("unsupported TIFF sample format")),
    };
    let image = match color_type {
        ColorType::Gray(_) => {
            GrayImage::from_raw(width, height, data).map(DynamicImage::ImageLuma8)
        }
        ColorType::RGB(_) => {
            RgbImage::from_raw(width, height, data).map(DynamicImage::ImageRgb8)
        }
        ColorType::RGBA(_) => {
            RgbaImage::from_raw(width, height, data).map(DynamicImage::ImageRgba8)
        }
        other => return Err(anyhow!("unsupported TIFF color type {other:?}")),
    };
    image.ok_or_else(|| anyhow!("TIFF page data did not match its dimensions"))
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt as _;
    use image::ImageFormat;
    use tiff::encoder::{TiffEncoder, colortype};

    use super::*;
    use crate::rasterize::{RasterizeError, RasterizedPages};

    /// Encode a small solid-gray PNG.
    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageLuma8(GrayImage::new(width, height));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    /// Encode a TIFF with one grayscale IFD per requested page.
    fn tiff_bytes(page_count: usize) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        let mut encoder = TiffEncoder::new(&mut bytes).unwrap();
        for _ in 0..page_count {
            encoder
                .write_image::<colortype::Gray8>(4, 4, &[128u8; 16])
                .unwrap();
        }
        bytes.into_inner()
    }

    /// A rasterizer that never expects to be called.
    struct PanicRasterizer;

    #[async_trait]
    impl Rasterizer for PanicRasterizer {
        async fn rasterize(
            &self,
            _bytes: &[u8],
            _dpi: u32,
        ) -> Result<RasterizedPages, RasterizeError> {
            panic!("image documents must not reach the rasterizer");
        }
    }

    /// A rasterizer that returns a fixed set of blank pages.
    struct FixedRasterizer {
        page_count: usize,
    }

    #[async_trait]
    impl Rasterizer for FixedRasterizer {
        async fn rasterize(
            &self,
            _bytes: &[u8],
            _dpi: u32,
        ) -> Result<RasterizedPages, RasterizeError> {
            let images = (0..self.page_count)
                .map(|_| Ok(DynamicImage::ImageLuma8(GrayImage::new(4, 4))))
                .collect::<Vec<_>>();
            Ok(RasterizedPages {
                total_pages: self.page_count,
                pages: stream::iter(images).boxed(),
            })
        }
    }

    #[tokio::test]
    async fn single_image_is_one_page() -> Result<()> {
        let document = Document::new(png_bytes(6, 4), MediaType::Png);
        let sequence = build(document, &PanicRasterizer, 150).await?;
        assert_eq!(sequence.total_pages, 1);
        let pages: Vec<PageImage> = sequence.pages.try_collect().await?;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].index, 0);
        assert_eq!(pages[0].image.width(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn multipage_tiff_yields_one_page_per_ifd() -> Result<()> {
        let document = Document::new(tiff_bytes(3), MediaType::Tiff);
        let sequence = build(document, &PanicRasterizer, 150).await?;
        assert_eq!(sequence.total_pages, 3);
        let pages: Vec<PageImage> = sequence.pages.try_collect().await?;
        let indexes = pages.iter().map(|page| page.index).collect::<Vec<_>>();
        assert_eq!(indexes, [0, 1, 2]);
        Ok(())
    }

    #[tokio::test]
    async fn pdf_pages_are_indexed_in_order() -> Result<()> {
        let document = Document::new(b"%PDF-1.4".to_vec(), MediaType::Pdf);
        let sequence = build(document, &FixedRasterizer { page_count: 2 }, 150).await?;
        assert_eq!(sequence.total_pages, 2);
        let pages: Vec<PageImage> = sequence.pages.try_collect().await?;
        assert_eq!(pages[0].index, 0);
        assert_eq!(pages[1].index, 1);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_image_bytes_abort_the_job() {
        let document = Document::new(vec![1, 2, 3, 4], MediaType::Png);
        let err = build(document, &PanicRasterizer, 150)
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, JobError::Rasterization(_)));
    }
}
