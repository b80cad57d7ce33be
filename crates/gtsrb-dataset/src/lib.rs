//! GTSRB dataset pipeline stages.
//!
//! Ingest, quality filtering, stratified splitting, normalization,
//! augmentation, minority oversampling and `.npz` persistence, plus the
//! orchestration functions that chain them.

pub mod augmentation;
pub mod bundle;
pub mod loader;
pub mod oversample;
pub mod pipeline;
pub mod preprocess;
pub mod quality;
pub mod split;
pub mod statistics;

mod progress;

pub use augmentation::{augment, warp_affine, AugmentationOps};
pub use bundle::{bundle_keys, read_any_bundle, read_bundle, write_bundle, AnyBundle, Compression};
pub use loader::{load_class_tree, load_manifest, ImageLoader, IngestReport};
pub use oversample::{AllocationStrategy, AugmentReport, OversamplingAugmenter, PlanEntry};
pub use pipeline::{inspect, run_augment, run_build, run_clean, BuildReport, InspectReport};
pub use preprocess::{normalize, normalize_with_report, NormalizeReport};
pub use quality::{blur_score, clean_tree, CleanReport, QualityFilter};
pub use split::{split_indices, stratified_split, SplitIndices};
pub use statistics::DatasetStats;
