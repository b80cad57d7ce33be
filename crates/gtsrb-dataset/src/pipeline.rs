//! Stage orchestration: clean, build, augment and inspect.
//!
//! Each function takes the run's [`PipelineConfig`] by reference and hands
//! datasets from stage to stage by value, so every intermediate array is
//! released as soon as the next stage has consumed it.

use std::fs;
use std::path::{Path, PathBuf};

use gtsrb_core::{DataSplit, Error, LabeledDataset, PipelineConfig, Pixel, Result, Stage};
use rand::Rng;
use serde::Serialize;
use tracing::info;

use crate::bundle::{bundle_keys, read_any_bundle, read_bundle, write_bundle, AnyBundle, Compression};
use crate::loader::{load_class_tree, load_manifest, to_rgb_image, IngestReport};
use crate::oversample::{AugmentReport, OversamplingAugmenter};
use crate::preprocess::normalize_with_report;
use crate::quality::{clean_tree, CleanReport};
use crate::statistics::DatasetStats;

/// Runs the quality filter from the raw tree into the cleaned tree
pub fn run_clean(config: &PipelineConfig) -> Result<CleanReport> {
    clean_tree(
        &config.paths.raw_train_dir,
        &config.paths.cleaned_train_dir,
        &config.cleaning,
    )
}

/// Sample counts of one build
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub train_source: PathBuf,
    pub train_ingest: IngestReport,
    pub test_ingest: IngestReport,
    pub train: usize,
    pub validation: usize,
    pub test: usize,
    /// Samples dropped by normalization across all splits
    pub dropped: usize,
}

/// Ingests, splits and normalizes the training and test data, writing the
/// `train`, `val` and `test` bundles.
///
/// All three splits are loaded and normalized before the first bundle is
/// written, so a failing input leaves no bundles behind.
pub fn run_build(config: &PipelineConfig) -> Result<BuildReport> {
    config.validate()?;
    let train_source = config.paths.resolve_train_source()?;
    for required in [&config.paths.test_dir, &config.paths.test_manifest] {
        if !required.exists() {
            return Err(Error::not_found(Stage::Ingest, required.as_path()));
        }
    }

    let (source, train_ingest) = load_class_tree(&train_source, config.image_size, config.num_classes)?;
    let (train, validation) =
        crate::split::stratified_split(source, config.split.validation_fraction, config.seed)?;
    let (test, test_ingest) = load_manifest(
        &config.paths.test_dir,
        &config.paths.test_manifest,
        config.image_size,
    )?;

    let (train, train_report) = normalize_with_report(train, config.num_classes)?;
    let (validation, val_report) = normalize_with_report(validation, config.num_classes)?;
    let (test, test_report) = normalize_with_report(test, config.num_classes)?;

    let compression = Compression::from(config.persistence.compress_processed);
    for (split, dataset) in [
        (DataSplit::Train, &train),
        (DataSplit::Validation, &validation),
        (DataSplit::Test, &test),
    ] {
        let path = config.paths.bundle_path(split);
        write_bundle(dataset, &path, compression)?;
        info!("{} bundle: {} samples -> {}", split, dataset.len(), path.display());
    }

    Ok(BuildReport {
        train_source,
        train_ingest,
        test_ingest,
        train: train_report.kept,
        validation: val_report.kept,
        test: test_report.kept,
        dropped: train_report.dropped + val_report.dropped + test_report.dropped,
    })
}

/// Oversamples the train bundle into the augmented bundle
pub fn run_augment<R: Rng + ?Sized>(config: &PipelineConfig, rng: &mut R) -> Result<AugmentReport> {
    config.validate()?;
    let train: LabeledDataset<f32> = read_bundle(&config.paths.bundle_path(DataSplit::Train))?;
    OversamplingAugmenter::from_config(config).oversample_to_bundle(
        train,
        &config.paths.augmented_bundle,
        Compression::from(config.persistence.compress_augmented),
        rng,
    )
}

/// What [`inspect`] found in a bundle
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub path: PathBuf,
    pub keys: Vec<String>,
    pub stats: DatasetStats,
    /// PNG previews written, if any
    pub exported: Vec<PathBuf>,
}

fn export_samples<P: Pixel>(dataset: &LabeledDataset<P>, dir: &Path, count: usize) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(|e| Error::fs(Stage::Persist, dir, e))?;
    let labels = dataset.labels().to_integer();
    let mut written = Vec::new();
    for i in 0..count.min(dataset.len()) {
        let path = dir.join(format!("sample_{:03}_class_{}.png", i, labels[i]));
        to_rgb_image(dataset.image(i))?.save(&path)?;
        written.push(path);
    }
    Ok(written)
}

/// Loads a bundle and summarizes it, optionally writing the first
/// `preview.1` samples as PNG files into `preview.0`.
pub fn inspect(path: &Path, preview: Option<(&Path, usize)>) -> Result<InspectReport> {
    let keys = bundle_keys(path)?;
    let bundle = read_any_bundle(path)?;

    let (stats, exported) = match &bundle {
        AnyBundle::U8(dataset) => (
            DatasetStats::from_dataset(dataset),
            match preview {
                Some((dir, count)) => export_samples(dataset, dir, count)?,
                None => Vec::new(),
            },
        ),
        AnyBundle::F32(dataset) => (
            DatasetStats::from_dataset(dataset),
            match preview {
                Some((dir, count)) => export_samples(dataset, dir, count)?,
                None => Vec::new(),
            },
        ),
    };

    Ok(InspectReport {
        path: path.to_path_buf(),
        keys,
        stats,
        exported,
    })
}
