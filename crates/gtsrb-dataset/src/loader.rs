//! Image ingest: class-partitioned directory trees and the test-set manifest.
//!
//! Both entry points decode every image, resize it to the configured
//! resolution and stack the results into one `(N, H, W, 3)` `u8` array with
//! integer labels. Unreadable files are logged and counted, never fatal.

use std::path::{Path, PathBuf};

use gtsrb_core::{Error, ImageDimensions, LabelSet, LabeledDataset, Pixel, Result, Stage};
use image::imageops::FilterType;
use image::{ImageReader, RgbImage};
use ndarray::{Array1, Array4, ArrayView3};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::progress::progress_bar;

/// File extensions recognised as images
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "ppm", "jpg", "jpeg", "bmp"];

/// Outcome counts of one ingest call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Images decoded and stacked
    pub loaded: usize,
    /// Files or manifest rows that were skipped
    pub skipped: usize,
}

/// Returns true if the path has one of [`IMAGE_EXTENSIONS`]
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Decodes images to RGB at a fixed resolution
pub struct ImageLoader {
    dims: ImageDimensions,
}

impl ImageLoader {
    pub fn new(dims: ImageDimensions) -> Self {
        Self { dims }
    }

    /// Decodes an image, converts it to RGB and resizes it.
    ///
    /// The format is sniffed from the content, so a mislabelled extension
    /// still decodes.
    pub fn load_image(&self, path: &Path) -> Result<RgbImage> {
        let decoded = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        let rgb = decoded.to_rgb8();
        if rgb.width() == self.dims.width && rgb.height() == self.dims.height {
            return Ok(rgb);
        }
        Ok(image::imageops::resize(
            &rgb,
            self.dims.width,
            self.dims.height,
            FilterType::Triangle,
        ))
    }

    /// Image files directly inside `dir`, sorted by file name
    pub fn scan_directory(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(Error::not_found(Stage::Ingest, dir));
        }

        let mut images = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::fs(Stage::Ingest, dir, e.into()))?;
            if entry.file_type().is_file() && is_image_file(entry.path()) {
                images.push(entry.into_path());
            }
        }
        Ok(images)
    }
}

/// Directory of a class inside a tree; accepts `7` and the zero-padded `00007`.
pub fn class_directory(root: &Path, class_id: usize) -> Option<PathBuf> {
    [class_id.to_string(), format!("{:05}", class_id)]
        .into_iter()
        .map(|name| root.join(name))
        .find(|candidate| candidate.is_dir())
}

/// Growing pixel buffer shared by both ingest paths
struct Accumulator {
    dims: ImageDimensions,
    pixels: Vec<u8>,
    labels: Vec<i64>,
    report: IngestReport,
}

impl Accumulator {
    fn new(dims: ImageDimensions) -> Self {
        Self {
            dims,
            pixels: Vec::new(),
            labels: Vec::new(),
            report: IngestReport::default(),
        }
    }

    fn push(&mut self, image: RgbImage, label: i64) {
        self.pixels.extend_from_slice(image.as_raw());
        self.labels.push(label);
        self.report.loaded += 1;
    }

    fn skip(&mut self) {
        self.report.skipped += 1;
    }

    fn finish(self, source: &Path) -> Result<(LabeledDataset<u8>, IngestReport)> {
        if self.labels.is_empty() {
            return Err(Error::EmptySource {
                stage: Stage::Ingest,
                path: source.to_path_buf(),
            });
        }
        let shape = (
            self.labels.len(),
            self.dims.height as usize,
            self.dims.width as usize,
            3,
        );
        let images = Array4::from_shape_vec(shape, self.pixels)
            .map_err(|e| Error::InvalidArgument(format!("pixel buffer has wrong size: {e}")))?;
        let dataset = LabeledDataset::new(images, LabelSet::Integer(Array1::from(self.labels)))?;
        Ok((dataset, self.report))
    }
}

/// Loads a tree laid out as `root/{class_id}/{image}` for class ids `0..num_classes`.
///
/// Missing class directories are skipped. Fails with [`Error::SourceNotFound`]
/// if `root` does not exist and [`Error::EmptySource`] if nothing decodes.
pub fn load_class_tree(
    root: &Path,
    dims: ImageDimensions,
    num_classes: usize,
) -> Result<(LabeledDataset<u8>, IngestReport)> {
    if !root.is_dir() {
        return Err(Error::not_found(Stage::Ingest, root));
    }

    let loader = ImageLoader::new(dims);
    let mut acc = Accumulator::new(dims);
    let pb = progress_bar(num_classes as u64, "classes");

    for class_id in 0..num_classes {
        pb.inc(1);
        let Some(class_dir) = class_directory(root, class_id) else {
            debug!("No directory for class {} under {}", class_id, root.display());
            continue;
        };

        let files = loader.scan_directory(&class_dir)?;
        let before = acc.report.loaded;
        for path in files {
            match loader.load_image(&path) {
                Ok(image) => acc.push(image, class_id as i64),
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    acc.skip();
                }
            }
        }
        debug!("Class {}: {} images", class_id, acc.report.loaded - before);
    }
    pb.finish_and_clear();

    let (dataset, report) = acc.finish(root)?;
    info!(
        "Loaded {} images from {} ({} skipped)",
        report.loaded,
        root.display(),
        report.skipped
    );
    Ok((dataset, report))
}

/// Loads images listed in a semicolon-delimited manifest with a header row.
///
/// The first column is the file name relative to `image_dir`, the last column
/// is the class id. Rows with a missing file, an unparseable class id or an
/// undecodable image are skipped and counted.
pub fn load_manifest(
    image_dir: &Path,
    manifest_path: &Path,
    dims: ImageDimensions,
) -> Result<(LabeledDataset<u8>, IngestReport)> {
    if !image_dir.is_dir() {
        return Err(Error::not_found(Stage::Ingest, image_dir));
    }
    if !manifest_path.is_file() {
        return Err(Error::not_found(Stage::Ingest, manifest_path));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(manifest_path)?;

    let loader = ImageLoader::new(dims);
    let mut acc = Accumulator::new(dims);

    for (row, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping manifest row {}: {}", row + 1, e);
                acc.skip();
                continue;
            }
        };

        if record.len() < 2 {
            warn!("Skipping manifest row {}: expected at least 2 columns", row + 1);
            acc.skip();
            continue;
        }
        let file_name = &record[0];
        let class_field = &record[record.len() - 1];

        let label = match class_field.parse::<i64>() {
            Ok(label) => label,
            Err(_) => {
                warn!("Skipping manifest row {}: bad class id {:?}", row + 1, class_field);
                acc.skip();
                continue;
            }
        };

        let path = image_dir.join(file_name);
        if !path.is_file() {
            warn!("Skipping manifest row {}: {} not found", row + 1, path.display());
            acc.skip();
            continue;
        }

        match loader.load_image(&path) {
            Ok(image) => acc.push(image, label),
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                acc.skip();
            }
        }
    }

    let (dataset, report) = acc.finish(manifest_path)?;
    info!(
        "Loaded {} images listed in {} ({} skipped)",
        report.loaded,
        manifest_path.display(),
        report.skipped
    );
    Ok((dataset, report))
}

/// Converts one `(H, W, 3)` array back into an 8-bit RGB image.
///
/// Float pixels are taken to be in `[0, 1]` and rescaled to `0..=255`.
pub fn to_rgb_image<P: Pixel>(image: ArrayView3<'_, P>) -> Result<RgbImage> {
    let (height, width, channels) = image.dim();
    if channels != 3 {
        return Err(Error::InvalidArgument(format!(
            "expected 3 channels, got {}",
            channels
        )));
    }
    let scale = 255.0 / P::MAX;
    let raw: Vec<u8> = image
        .iter()
        .map(|&v| (v.to_f32() * scale).round().clamp(0.0, 255.0) as u8)
        .collect();
    RgbImage::from_raw(width as u32, height as u32, raw)
        .ok_or_else(|| Error::Image("pixel buffer does not match image size".to_string()))
}
