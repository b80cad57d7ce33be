//! Configuration structures for the GTSRB data pipeline.
//!
//! A [`PipelineConfig`] is built once at startup (defaults, then an optional
//! TOML file, then CLI overrides) and passed by reference into every stage.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{DataSplit, ImageDimensions, Stage};

/// Main configuration for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of traffic-sign classes
    pub num_classes: usize,
    /// Random seed for splitting and augmentation
    pub seed: u64,
    /// Target image size after ingest
    pub image_size: ImageDimensions,
    /// Input and output locations
    pub paths: PathsConfig,
    /// Blur/size filtering
    pub cleaning: CleaningConfig,
    /// Train/validation split
    pub split: SplitConfig,
    /// Minority oversampling
    pub oversampling: OversamplingConfig,
    /// Per-sample augmentation ranges
    pub augmentation: AugmentationConfig,
    /// Bundle compression
    pub persistence: PersistenceConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_classes: 43,
            seed: 42,
            image_size: ImageDimensions::gtsrb(),
            paths: PathsConfig::default(),
            cleaning: CleaningConfig::default(),
            split: SplitConfig::default(),
            oversampling: OversamplingConfig::default(),
            augmentation: AugmentationConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads a configuration from TOML; missing fields keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let config: Self = crate::cli::load_toml_config(path)?;
        config.validate()?;
        debug!("Loaded pipeline config from {}", path.display());
        Ok(config)
    }

    /// Checks value ranges that every stage relies on
    pub fn validate(&self) -> Result<()> {
        if self.image_size.width == 0 || self.image_size.height == 0 {
            return Err(Error::Config(format!(
                "image size must be non-zero, got {}x{}",
                self.image_size.width, self.image_size.height
            )));
        }
        if self.image_size.channels != 3 {
            return Err(Error::Config(format!(
                "only 3-channel RGB images are supported, got {} channels",
                self.image_size.channels
            )));
        }
        if self.num_classes == 0 {
            return Err(Error::Config("num_classes must be at least 1".to_string()));
        }
        self.split.validate()?;
        self.augmentation.validate()?;
        Ok(())
    }
}

/// File-system locations used by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Raw class-partitioned training tree
    pub raw_train_dir: PathBuf,
    /// Output of the cleaning stage
    pub cleaned_train_dir: PathBuf,
    /// Ordered candidates for the training source; the first existing one wins
    pub train_sources: Vec<PathBuf>,
    /// Flat directory of test images
    pub test_dir: PathBuf,
    /// Semicolon-delimited test manifest
    pub test_manifest: PathBuf,
    /// Directory receiving train/val/test bundles
    pub processed_dir: PathBuf,
    /// Output bundle of the oversampling stage
    pub augmented_bundle: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let raw = PathBuf::from("data/raw/GTSRB");
        let cleaned_train_dir = PathBuf::from("data/cleaned/GTSRB/Train");
        let raw_train_dir = raw.join("Train");
        Self {
            train_sources: vec![cleaned_train_dir.clone(), raw_train_dir.clone()],
            raw_train_dir,
            cleaned_train_dir,
            test_dir: raw.join("Test"),
            test_manifest: raw.join("Test").join("GT-final_test.csv"),
            processed_dir: PathBuf::from("data/processed"),
            augmented_bundle: PathBuf::from("data/augmented/train_augmented.npz"),
        }
    }
}

impl PathsConfig {
    /// Bundle path for one of the processed splits
    pub fn bundle_path(&self, split: DataSplit) -> PathBuf {
        let name = match split {
            DataSplit::Train => "train.npz",
            DataSplit::Validation => "val.npz",
            DataSplit::Test => "test.npz",
        };
        self.processed_dir.join(name)
    }

    /// Resolves the training source from [`PathsConfig::train_sources`]
    pub fn resolve_train_source(&self) -> Result<PathBuf> {
        resolve_source(&self.train_sources, Stage::Ingest)
    }
}

/// Returns the first candidate that exists.
///
/// Fails with [`Error::SourceNotFound`] naming every candidate when none does.
pub fn resolve_source(candidates: &[PathBuf], stage: Stage) -> Result<PathBuf> {
    for candidate in candidates {
        if candidate.exists() {
            debug!("Resolved {} source to {}", stage, candidate.display());
            return Ok(candidate.clone());
        }
    }
    let tried = candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Err(Error::SourceNotFound {
        stage,
        path: PathBuf::from(format!("[{}]", tried)),
    })
}

/// Quality filtering applied to the raw training tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CleaningConfig {
    /// Laplacian variance below which an image counts as blurry
    pub blur_threshold: f64,
    /// Drop blurry images instead of only counting them
    pub remove_blurry: bool,
    /// Minimum accepted width in pixels
    pub min_width: u32,
    /// Minimum accepted height in pixels
    pub min_height: u32,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            blur_threshold: 100.0,
            remove_blurry: true,
            min_width: 10,
            min_height: 10,
        }
    }
}

/// Train/validation split
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SplitConfig {
    /// Fraction of the training source held out for validation
    pub validation_fraction: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            validation_fraction: 0.2,
        }
    }
}

impl SplitConfig {
    /// Validates that the fraction lies strictly between 0 and 1
    pub fn validate(&self) -> Result<()> {
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(Error::Config(format!(
                "validation_fraction must be in (0, 1), got {}",
                self.validation_fraction
            )));
        }
        Ok(())
    }
}

/// Minority-class oversampling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OversamplingConfig {
    /// Classes with fewer samples than this are oversampled
    pub minority_threshold: usize,
    /// Augmented copies added per minority sample
    pub augmentations_per_minority: usize,
    /// Collect samples individually instead of reserving the output array up front
    pub low_memory: bool,
}

impl Default for OversamplingConfig {
    fn default() -> Self {
        Self {
            minority_threshold: 800,
            augmentations_per_minority: 3,
            low_memory: false,
        }
    }
}

/// Zoom factor sampling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ZoomRange {
    /// Factor drawn from `[1 - z, 1 + z]`
    Symmetric(f32),
    /// Factor drawn from `[min, max)`
    Range(f32, f32),
}

impl ZoomRange {
    /// Sampling bounds, or `None` when the range is degenerate
    pub fn bounds(&self) -> Option<(f32, f32)> {
        match *self {
            ZoomRange::Symmetric(z) if z > 0.0 => Some((1.0 - z, 1.0 + z)),
            ZoomRange::Symmetric(_) => None,
            ZoomRange::Range(min, max) if min < max => Some((min, max)),
            ZoomRange::Range(_, _) => None,
        }
    }
}

/// Data augmentation configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Random rotation range in degrees (+/-)
    pub rotation_degrees: f32,
    /// Horizontal shift as a fraction of the width (+/-)
    pub width_shift: f32,
    /// Vertical shift as a fraction of the height (+/-)
    pub height_shift: f32,
    /// Zoom factor range
    pub zoom: ZoomRange,
    /// Brightness multiplier range `[min, max)`
    pub brightness_range: (f32, f32),
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        AugmentationPresets::gentle()
    }
}

impl AugmentationConfig {
    /// Rejects ranges that cannot describe a valid image transform
    pub fn validate(&self) -> Result<()> {
        let values = [
            self.rotation_degrees,
            self.width_shift,
            self.height_shift,
            self.brightness_range.0,
            self.brightness_range.1,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::Config("augmentation ranges must be finite".to_string()));
        }
        if let Some((min, _)) = self.zoom.bounds() {
            if min <= 0.0 {
                return Err(Error::Config(format!(
                    "zoom range must stay above 0, got lower bound {}",
                    min
                )));
            }
        }
        Ok(())
    }
}

/// Augmentation presets
pub struct AugmentationPresets;

impl AugmentationPresets {
    /// Small perturbations that keep signs readable (training default)
    pub fn gentle() -> AugmentationConfig {
        AugmentationConfig {
            rotation_degrees: 5.0,
            width_shift: 0.05,
            height_shift: 0.05,
            zoom: ZoomRange::Symmetric(0.05),
            brightness_range: (0.95, 1.05),
        }
    }

    /// Stronger perturbations for very small classes
    pub fn strong() -> AugmentationConfig {
        AugmentationConfig {
            rotation_degrees: 15.0,
            width_shift: 0.1,
            height_shift: 0.1,
            zoom: ZoomRange::Symmetric(0.15),
            brightness_range: (0.8, 1.2),
        }
    }

    /// No augmentation (identity transform)
    pub fn none() -> AugmentationConfig {
        AugmentationConfig {
            rotation_degrees: 0.0,
            width_shift: 0.0,
            height_shift: 0.0,
            zoom: ZoomRange::Symmetric(0.0),
            brightness_range: (1.0, 1.0),
        }
    }

    /// Looks up a preset by name
    pub fn by_name(name: &str) -> Option<AugmentationConfig> {
        match name.to_lowercase().as_str() {
            "gentle" => Some(Self::gentle()),
            "strong" => Some(Self::strong()),
            "none" => Some(Self::none()),
            _ => None,
        }
    }
}

/// Bundle compression settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Deflate the train/val/test bundles
    pub compress_processed: bool,
    /// Deflate the oversampled training bundle
    pub compress_augmented: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            compress_processed: false,
            compress_augmented: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_pipeline_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.seed, 42);
        assert_eq!(config.num_classes, 43);
        assert_eq!(config.image_size, ImageDimensions::gtsrb());
        assert_eq!(config.oversampling.minority_threshold, 800);
        assert_eq!(config.oversampling.augmentations_per_minority, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_split_validation() {
        assert!(SplitConfig::default().validate().is_ok());
        assert!(SplitConfig { validation_fraction: 0.0 }.validate().is_err());
        assert!(SplitConfig { validation_fraction: 1.0 }.validate().is_err());
    }

    #[test]
    fn test_zoom_bounds() {
        assert_eq!(ZoomRange::Symmetric(0.1).bounds(), Some((0.9, 1.1)));
        assert_eq!(ZoomRange::Symmetric(0.0).bounds(), None);
        assert_eq!(ZoomRange::Range(0.8, 1.2).bounds(), Some((0.8, 1.2)));
        assert_eq!(ZoomRange::Range(1.2, 1.2).bounds(), None);
    }

    #[test]
    fn test_presets() {
        assert_eq!(AugmentationPresets::gentle().rotation_degrees, 5.0);
        assert_eq!(AugmentationPresets::strong().rotation_degrees, 15.0);
        assert_eq!(AugmentationPresets::none().rotation_degrees, 0.0);
        assert!(AugmentationPresets::by_name("Strong").is_some());
        assert!(AugmentationPresets::by_name("wild").is_none());
    }

    #[test]
    fn test_bundle_paths() {
        let paths = PathsConfig::default();
        assert_eq!(
            paths.bundle_path(DataSplit::Validation),
            PathBuf::from("data/processed/val.npz")
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(
            &path,
            r#"
num_classes = 2
seed = 7

[oversampling]
minority_threshold = 10

[augmentation]
zoom = [0.9, 1.1]
"#,
        )
        .unwrap();

        let config = PipelineConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.num_classes, 2);
        assert_eq!(config.seed, 7);
        assert_eq!(config.oversampling.minority_threshold, 10);
        assert_eq!(config.oversampling.augmentations_per_minority, 3);
        assert_eq!(config.augmentation.zoom, ZoomRange::Range(0.9, 1.1));
        assert_eq!(config.image_size, ImageDimensions::gtsrb());
    }

    #[test]
    fn test_toml_rejects_bad_fraction() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "[split]\nvalidation_fraction = 1.5\n").unwrap();
        assert!(matches!(
            PipelineConfig::from_toml_file(&path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_resolve_source_picks_first_existing() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("cleaned");
        let present = dir.path().join("raw");
        std::fs::create_dir(&present).unwrap();

        let resolved = resolve_source(&[missing.clone(), present.clone()], Stage::Ingest).unwrap();
        assert_eq!(resolved, present);

        let err = resolve_source(&[missing], Stage::Ingest).unwrap_err();
        assert!(matches!(err, Error::SourceNotFound { stage: Stage::Ingest, .. }));
    }
}
