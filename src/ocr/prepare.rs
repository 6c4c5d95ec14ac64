//! Document preprocessing pipeline.
//!
//! Normalizes a document before it reaches an OCR engine: PDF pages are
//! rasterized at the target DPI via pdftoppm, images are decoded with the
//! `image` crate, then grayscale / adaptive-threshold / denoise passes run
//! per the options. Deterministic given the same input bytes and options;
//! no network access.
//!
//! Each engine attempt prepares its own input from its own options, so a
//! preprocessing failure is fatal only to that attempt.

use std::path::{Path, PathBuf};
use std::process::Command;

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

/// Errors from document preparation.
#[derive(Debug, Clone, Error)]
pub enum PreprocessError {
    #[error("cannot decode document: {0}")]
    Decode(String),

    #[error("unsupported document type: {0}")]
    UnsupportedType(String),

    #[error("rasterization failed: {0}")]
    Rasterize(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PreprocessError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Preprocessing options for one engine attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessOptions {
    pub grayscale: bool,
    pub adaptive_threshold: bool,
    pub denoise: bool,
    /// Rasterization DPI for PDF pages.
    pub target_dpi: u32,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            grayscale: true,
            adaptive_threshold: false,
            denoise: true,
            target_dpi: 300,
        }
    }
}

/// A document normalized for OCR: one PNG per page in a scratch directory
/// that lives as long as this value.
#[derive(Debug)]
pub struct PreparedDocument {
    /// SHA-256 of the source bytes, hex-encoded.
    pub content_hash: String,
    /// Detected MIME type of the source bytes.
    pub mime_type: String,
    /// Page image paths, in page order.
    pub pages: Vec<PathBuf>,
    /// Scratch directory owning the page images.
    _scratch: TempDir,
}

impl PreparedDocument {
    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }
}

/// Compute the SHA-256 content hash of document bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Prepare a document for OCR.
///
/// Fails with `PreprocessError` if the bytes cannot be decoded as a PDF
/// or a supported image format.
pub fn prepare(
    bytes: &[u8],
    options: &PreprocessOptions,
) -> Result<PreparedDocument, PreprocessError> {
    let scratch = TempDir::new()?;
    let hash = content_hash(bytes);

    let mime = infer::get(bytes)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let pages = match mime.as_str() {
        "application/pdf" => rasterize_pdf(bytes, options, scratch.path())?,
        m if m.starts_with("image/") => {
            let image = image::load_from_memory(bytes)
                .map_err(|e| PreprocessError::Decode(e.to_string()))?;
            let page_path = scratch.path().join("page-1.png");
            write_processed(image, options, &page_path)?;
            vec![page_path]
        }
        other => return Err(PreprocessError::UnsupportedType(other.to_string())),
    };

    debug!(
        pages = pages.len(),
        mime = %mime,
        "document prepared for OCR"
    );

    Ok(PreparedDocument {
        content_hash: hash,
        mime_type: mime,
        pages,
        _scratch: scratch,
    })
}

/// Rasterize every PDF page to PNG at the target DPI, then run the image
/// passes on each page.
fn rasterize_pdf(
    bytes: &[u8],
    options: &PreprocessOptions,
    scratch: &Path,
) -> Result<Vec<PathBuf>, PreprocessError> {
    let pdf_path = scratch.join("source.pdf");
    std::fs::write(&pdf_path, bytes)?;

    let raster_prefix = scratch.join("raster");
    let dpi = options.target_dpi.max(72).to_string();

    let status = Command::new("pdftoppm")
        .args(["-png", "-r", &dpi])
        .arg(&pdf_path)
        .arg(&raster_prefix)
        .status();

    match status {
        Ok(s) if s.success() => {}
        Ok(_) => {
            return Err(PreprocessError::Decode(
                "pdftoppm could not decode the PDF".to_string(),
            ))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PreprocessError::Rasterize(
                "pdftoppm not found (install poppler-utils)".to_string(),
            ))
        }
        Err(e) => return Err(e.into()),
    }

    // pdftoppm names pages raster-1.png, raster-01.png, ... depending on
    // page count; collect and sort to recover page order.
    let mut raster_pages: Vec<PathBuf> = std::fs::read_dir(scratch)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension().is_some_and(|e| e == "png")
                && p.file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|s| s.starts_with("raster-"))
        })
        .collect();
    raster_pages.sort();

    if raster_pages.is_empty() {
        return Err(PreprocessError::Decode("PDF produced no pages".to_string()));
    }

    let mut pages = Vec::with_capacity(raster_pages.len());
    for (index, raster) in raster_pages.iter().enumerate() {
        let image = image::open(raster).map_err(|e| PreprocessError::Decode(e.to_string()))?;
        let page_path = scratch.join(format!("page-{}.png", index + 1));
        write_processed(image, options, &page_path)?;
        pages.push(page_path);
    }
    Ok(pages)
}

/// Apply the configured image passes and write the page as PNG.
fn write_processed(
    image: DynamicImage,
    options: &PreprocessOptions,
    out: &Path,
) -> Result<(), PreprocessError> {
    let processed = apply_passes(image, options);
    processed
        .save(out)
        .map_err(|e| PreprocessError::Io(e.to_string()))
}

fn apply_passes(image: DynamicImage, options: &PreprocessOptions) -> DynamicImage {
    if !options.grayscale && !options.adaptive_threshold && !options.denoise {
        return image;
    }

    // Threshold and denoise operate on the luma plane, so any enabled pass
    // implies grayscale conversion.
    let mut gray: GrayImage = image.to_luma8();

    if options.denoise {
        gray = imageproc::filter::median_filter(&gray, 1, 1);
    }

    if options.adaptive_threshold {
        gray = imageproc::contrast::adaptive_threshold(&gray, 12);
    }

    DynamicImage::ImageLuma8(gray)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn sample_png() -> Vec<u8> {
        let mut img = RgbImage::new(64, 64);
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            *pixel = if x % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([20, 20, 20])
            };
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .unwrap();
        bytes
    }

    #[test]
    fn test_prepare_image_produces_one_page() {
        let prepared = prepare(&sample_png(), &PreprocessOptions::default()).unwrap();
        assert_eq!(prepared.page_count(), 1);
        assert_eq!(prepared.mime_type, "image/png");
        assert!(prepared.pages[0].exists());
    }

    #[test]
    fn test_prepare_rejects_garbage() {
        let err = prepare(b"not a document", &PreprocessOptions::default()).unwrap_err();
        assert!(matches!(err, PreprocessError::UnsupportedType(_)));
    }

    #[test]
    fn test_prepare_is_deterministic() {
        let bytes = sample_png();
        let options = PreprocessOptions::default();
        let a = prepare(&bytes, &options).unwrap();
        let b = prepare(&bytes, &options).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(
            std::fs::read(&a.pages[0]).unwrap(),
            std::fs::read(&b.pages[0]).unwrap()
        );
    }

    #[test]
    fn test_grayscale_pass_flattens_channels() {
        let bytes = sample_png();
        let options = PreprocessOptions {
            grayscale: true,
            adaptive_threshold: true,
            denoise: true,
            target_dpi: 300,
        };
        let prepared = prepare(&bytes, &options).unwrap();
        let page = image::open(&prepared.pages[0]).unwrap();
        assert_eq!(page.color().channel_count(), 1);
    }
}
