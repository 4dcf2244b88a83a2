//! ABOUTME: Image preprocessing ahead of OCR: grayscale, denoise, threshold, deskew, DPI uplift
//! ABOUTME: PDFs pass through untouched; the original file is never modified

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::adaptive_threshold;
use imageproc::edges::canny;
use imageproc::filter::median_filter;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::hough::{detect_lines, LineDetectionOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use ocrflow_config::PreprocessOptions;
use ocrflow_core::{OcrFlowError, Result};

/// Input images carry no DPI metadata we can rely on; scanned sources
/// commonly default to 72 when unset, so uplift assumes that baseline.
const ASSUMED_SOURCE_DPI: u32 = 72;
/// Upper bound on either output dimension after DPI uplift.
const MAX_UPSCALED_DIMENSION: u32 = 10_000;
/// Block radius for adaptive thresholding.
const THRESHOLD_BLOCK_RADIUS: u32 = 7;
/// Lines within this many degrees of horizontal vote on the skew angle.
const MAX_SKEW_DEGREES: f32 = 15.0;

/// Handle to a (possibly) preprocessed document. Owned artifacts are
/// deleted on drop, which covers every exit path including cancellation.
#[derive(Debug)]
pub struct PreprocessedDocument {
    path: PathBuf,
    owned: bool,
}

impl PreprocessedDocument {
    fn passthrough(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            owned: false,
        }
    }

    /// A handle over the original document with no artifact to clean up.
    /// Used by drivers when preprocessing is disabled.
    #[must_use]
    pub(crate) fn passthrough_for(path: &Path) -> Self {
        Self::passthrough(path)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether preprocessing produced a new artifact.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owned
    }
}

impl Drop for PreprocessedDocument {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "failed to remove preprocessed artifact");
                }
            }
        }
    }
}

/// Preprocess a document for OCR. PDFs and unreadable inputs pass
/// through unchanged; a failed pipeline falls back to the original so a
/// preprocessing bug never costs an OCR attempt.
pub async fn preprocess(
    document_path: &Path,
    options: &PreprocessOptions,
) -> Result<PreprocessedDocument> {
    if is_pdf(document_path) {
        debug!(path = %document_path.display(), "pdf input, preprocessing skipped");
        return Ok(PreprocessedDocument::passthrough(document_path));
    }

    let path = document_path.to_path_buf();
    let options = options.clone();
    let outcome = tokio::task::spawn_blocking(move || run_pipeline(&path, &options))
        .await
        .map_err(|e| OcrFlowError::Preprocess {
            message: "preprocessing task panicked".to_string(),
            source: Some(Box::new(e)),
        })?;

    match outcome {
        Ok(output_path) => Ok(PreprocessedDocument {
            path: output_path,
            owned: true,
        }),
        Err(e) => {
            warn!(path = %document_path.display(), error = %e, "preprocessing failed, using original");
            Ok(PreprocessedDocument::passthrough(document_path))
        }
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Fixed pipeline ordering:
/// grayscale → denoise → adaptive-threshold → skew-correct → DPI uplift.
fn run_pipeline(path: &Path, options: &PreprocessOptions) -> Result<PathBuf> {
    let source = image::open(path).map_err(|e| OcrFlowError::Preprocess {
        message: format!("cannot decode image {}", path.display()),
        source: Some(Box::new(e)),
    })?;

    let processed = if options.grayscale {
        let mut gray = source.to_luma8();

        if options.denoise {
            gray = median_filter(&gray, 1, 1);
        }
        if options.adaptive_threshold {
            gray = adaptive_threshold(&gray, THRESHOLD_BLOCK_RADIUS);
        }
        if options.skew_correction {
            if let Some(angle) = estimate_skew_degrees(&gray) {
                debug!(angle, "correcting skew");
                gray = rotate_about_center(
                    &gray,
                    angle.to_radians(),
                    Interpolation::Bilinear,
                    Luma([255u8]),
                );
            }
        }

        DynamicImage::ImageLuma8(gray)
    } else {
        // Threshold and deskew are grayscale operations; in color mode
        // only denoise applies.
        let mut color = source.to_rgb8();
        if options.denoise {
            color = median_filter(&color, 1, 1);
        }
        DynamicImage::ImageRgb8(color)
    };

    let processed = if options.dpi_optimization {
        uplift_dpi(processed, options.min_dpi)
    } else {
        processed
    };

    let output_path =
        std::env::temp_dir().join(format!("ocrflow-preprocessed-{}.png", Uuid::new_v4()));
    processed
        .save(&output_path)
        .map_err(|e| OcrFlowError::Preprocess {
            message: format!("cannot write preprocessed image {}", output_path.display()),
            source: Some(Box::new(e)),
        })?;
    debug!(
        input = %path.display(),
        output = %output_path.display(),
        "preprocessing complete"
    );
    Ok(output_path)
}

/// Estimate the dominant skew of text rows via Hough line detection on a
/// Canny edge map. Returns the correction angle in degrees, or `None`
/// when the page is effectively straight.
fn estimate_skew_degrees(gray: &GrayImage) -> Option<f32> {
    let edges = canny(gray, 50.0, 100.0);
    let lines = detect_lines(
        &edges,
        LineDetectionOptions {
            vote_threshold: 120,
            suppression_radius: 8,
        },
    );

    // A horizontal text row has a vertical normal, i.e. a polar angle
    // near 90 degrees.
    let deviations: Vec<f32> = lines
        .iter()
        .map(|line| line.angle_in_degrees as f32 - 90.0)
        .filter(|deviation| deviation.abs() <= MAX_SKEW_DEGREES)
        .collect();
    if deviations.is_empty() {
        return None;
    }

    let mean = deviations.iter().sum::<f32>() / deviations.len() as f32;
    if mean.abs() < 0.5 {
        None
    } else {
        Some(-mean)
    }
}

/// Upscale when the assumed source DPI is below the target, using
/// bilinear resampling, bounded so pathological inputs cannot explode.
fn uplift_dpi(image: DynamicImage, min_dpi: u32) -> DynamicImage {
    if min_dpi <= ASSUMED_SOURCE_DPI {
        return image;
    }
    let scale = f64::from(min_dpi) / f64::from(ASSUMED_SOURCE_DPI);
    let width = (f64::from(image.width()) * scale) as u32;
    let height = (f64::from(image.height()) * scale) as u32;
    if width.max(height) > MAX_UPSCALED_DIMENSION {
        debug!(width, height, "dpi uplift skipped, output would exceed bounds");
        return image;
    }
    image.resize_exact(width, height, FilterType::Triangle)
}
