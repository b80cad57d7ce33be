//! Blur and size filtering of a raw class tree.
//!
//! The focus measure is the variance of the Laplacian response of the
//! grayscale image. Low variance means few edges, which for traffic-sign
//! crops almost always means motion blur or a defocused capture.

use std::fs;
use std::path::Path;

use gtsrb_core::{CleaningConfig, Error, Result, Stage};
use image::{ImageBuffer, Luma, RgbImage};
use imageproc::filter::filter3x3;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::loader::is_image_file;
use crate::progress::progress_bar;

type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// 4-neighbour Laplacian
pub const LAPLACIAN_KERNEL: [f32; 9] = [0.0, 1.0, 0.0, 1.0, -4.0, 1.0, 0.0, 1.0, 0.0];

/// Luma on the 0..255 scale (ITU-R BT.601 weights)
pub fn grayscale(image: &RgbImage) -> GrayF32 {
    let (w, h) = image.dimensions();
    let buf: Vec<f32> = image
        .pixels()
        .map(|p| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
        .collect();
    GrayF32::from_raw(w, h, buf).unwrap_or_else(|| GrayF32::new(w, h))
}

/// Variance of the Laplacian over the whole image
pub fn blur_score(image: &RgbImage) -> f64 {
    let gray = grayscale(image);
    let response: Vec<f32> = filter3x3(&gray, &LAPLACIAN_KERNEL).into_raw();
    if response.is_empty() {
        return 0.0;
    }
    let n = response.len() as f64;
    let mean = response.iter().map(|&v| v as f64).sum::<f64>() / n;
    response
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n
}

/// Decision for one image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    /// Blurry but retained because `remove_blurry` is off
    KeepBlurry,
    RejectBlurry,
    RejectTooSmall,
}

impl Verdict {
    pub fn is_kept(self) -> bool {
        matches!(self, Verdict::Keep | Verdict::KeepBlurry)
    }
}

/// Per-image quality check
pub struct QualityFilter {
    config: CleaningConfig,
}

impl QualityFilter {
    pub fn new(config: CleaningConfig) -> Self {
        Self { config }
    }

    /// Size is checked before blur, so tiny images are never scored.
    pub fn assess(&self, image: &RgbImage) -> Verdict {
        let (w, h) = image.dimensions();
        if w < self.config.min_width || h < self.config.min_height {
            return Verdict::RejectTooSmall;
        }
        if blur_score(image) < self.config.blur_threshold {
            if self.config.remove_blurry {
                Verdict::RejectBlurry
            } else {
                Verdict::KeepBlurry
            }
        } else {
            Verdict::Keep
        }
    }
}

/// Counts produced by [`clean_tree`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub scanned: usize,
    pub kept: usize,
    /// Blurry images, whether or not they were removed
    pub blurry: usize,
    pub too_small: usize,
    /// Files that could not be decoded or copied
    pub errors: usize,
}

/// Copies every image of `source/{class}/` that passes the filter into
/// `target/{class}/`.
pub fn clean_tree(source: &Path, target: &Path, config: &CleaningConfig) -> Result<CleanReport> {
    if !source.is_dir() {
        return Err(Error::not_found(Stage::Clean, source));
    }

    let filter = QualityFilter::new(config.clone());
    let mut report = CleanReport::default();

    let class_dirs: Vec<_> = WalkDir::new(source)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .collect();

    let pb = progress_bar(class_dirs.len() as u64, "classes");
    for class_dir in class_dirs {
        pb.inc(1);
        let out_dir = target.join(class_dir.file_name());
        fs::create_dir_all(&out_dir).map_err(|e| Error::fs(Stage::Clean, &out_dir, e))?;

        let files = WalkDir::new(class_dir.path())
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file() && is_image_file(entry.path()));

        let before = report.kept;
        for file in files {
            report.scanned += 1;
            let image = match image::open(file.path()) {
                Ok(image) => image.to_rgb8(),
                Err(e) => {
                    warn!("Could not read {}: {}", file.path().display(), e);
                    report.errors += 1;
                    continue;
                }
            };

            let verdict = filter.assess(&image);
            match verdict {
                Verdict::RejectTooSmall => report.too_small += 1,
                Verdict::RejectBlurry | Verdict::KeepBlurry => report.blurry += 1,
                Verdict::Keep => {}
            }
            if !verdict.is_kept() {
                continue;
            }

            if let Err(e) = fs::copy(file.path(), out_dir.join(file.file_name())) {
                warn!("Could not copy {}: {}", file.path().display(), e);
                report.errors += 1;
                continue;
            }
            report.kept += 1;
        }
        debug!(
            "Class {}: kept {}",
            class_dir.file_name().to_string_lossy(),
            report.kept - before
        );
    }
    pb.finish_and_clear();

    info!(
        "Cleaned {}: scanned {}, kept {}, blurry {}, too small {}, errors {}",
        source.display(),
        report.scanned,
        report.kept,
        report.blurry,
        report.too_small,
        report.errors
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    fn checkerboard(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    fn flat(size: u32) -> RgbImage {
        RgbImage::from_pixel(size, size, Rgb([120, 60, 30]))
    }

    #[test]
    fn test_blur_score_separates_sharp_and_flat() {
        assert!(blur_score(&checkerboard(16)) > 1000.0);
        assert!(blur_score(&flat(16)) < 1e-6);
    }

    #[test]
    fn test_assess_policies() {
        let strict = QualityFilter::new(CleaningConfig::default());
        assert_eq!(strict.assess(&checkerboard(16)), Verdict::Keep);
        assert_eq!(strict.assess(&flat(16)), Verdict::RejectBlurry);
        assert_eq!(strict.assess(&checkerboard(5)), Verdict::RejectTooSmall);

        let lenient = QualityFilter::new(CleaningConfig {
            remove_blurry: false,
            ..CleaningConfig::default()
        });
        assert_eq!(lenient.assess(&flat(16)), Verdict::KeepBlurry);
    }

    fn build_tree(root: &Path) {
        let class_dir = root.join("0");
        fs::create_dir_all(&class_dir).unwrap();
        checkerboard(16).save(class_dir.join("sharp.png")).unwrap();
        flat(16).save(class_dir.join("flat.png")).unwrap();
        checkerboard(5).save(class_dir.join("tiny.png")).unwrap();
        fs::write(class_dir.join("broken.png"), b"garbage").unwrap();
    }

    #[test]
    fn test_clean_tree_removes_blurry() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("raw");
        let target = temp_dir.path().join("cleaned");
        build_tree(&source);

        let report = clean_tree(&source, &target, &CleaningConfig::default()).unwrap();
        assert_eq!(
            report,
            CleanReport {
                scanned: 4,
                kept: 1,
                blurry: 1,
                too_small: 1,
                errors: 1,
            }
        );
        assert!(target.join("0").join("sharp.png").exists());
        assert!(!target.join("0").join("flat.png").exists());
    }

    #[test]
    fn test_clean_tree_keeps_blurry_when_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("raw");
        let target = temp_dir.path().join("cleaned");
        build_tree(&source);

        let config = CleaningConfig {
            remove_blurry: false,
            ..CleaningConfig::default()
        };
        let report = clean_tree(&source, &target, &config).unwrap();
        assert_eq!(report.kept, 2);
        assert_eq!(report.blurry, 1);
        assert!(target.join("0").join("flat.png").exists());
    }

    #[test]
    fn test_clean_tree_unwritable_target() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("raw");
        build_tree(&source);
        let target = temp_dir.path().join("cleaned");
        fs::write(&target, b"not a directory").unwrap();

        let err = clean_tree(&source, &target, &CleaningConfig::default()).unwrap_err();
        assert!(matches!(err, Error::FileSystem { stage: Stage::Clean, .. }));
        assert!(err.to_string().contains("cleaned"));
    }

    #[test]
    fn test_clean_tree_missing_source() {
        let temp_dir = TempDir::new().unwrap();
        let err = clean_tree(
            &temp_dir.path().join("missing"),
            &temp_dir.path().join("out"),
            &CleaningConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::SourceNotFound { stage: Stage::Clean, .. }));
    }
}
