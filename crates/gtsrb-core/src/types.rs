//! Core type definitions for the GTSRB data pipeline.

use std::collections::BTreeMap;
use std::fmt::Debug;

use ndarray::{s, Array1, Array2, Array4, ArrayView1, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pipeline stage, attached to every fatal error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Decoding images from a class tree or manifest
    Ingest,
    /// Blur/size filtering of the raw tree
    Clean,
    /// Stratified train/validation split
    Split,
    /// Pixel scaling and one-hot encoding
    Normalize,
    /// Minority oversampling with augmentation
    Augment,
    /// Reading or writing bundles
    Persist,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Ingest => write!(f, "ingest"),
            Stage::Clean => write!(f, "clean"),
            Stage::Split => write!(f, "split"),
            Stage::Normalize => write!(f, "normalize"),
            Stage::Augment => write!(f, "augment"),
            Stage::Persist => write!(f, "persist"),
        }
    }
}

/// Data split type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataSplit {
    /// Training data
    Train,
    /// Validation data
    Validation,
    /// Test data
    Test,
}

impl std::fmt::Display for DataSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSplit::Train => write!(f, "train"),
            DataSplit::Validation => write!(f, "validation"),
            DataSplit::Test => write!(f, "test"),
        }
    }
}

/// Image dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageDimensions {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Number of channels (always 3 for RGB)
    pub channels: u32,
}

impl ImageDimensions {
    /// Creates new image dimensions
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// RGB image of the given size
    pub fn rgb(width: u32, height: u32) -> Self {
        Self::new(width, height, 3)
    }

    /// Standard GTSRB training resolution (32x32x3)
    pub fn gtsrb() -> Self {
        Self::rgb(32, 32)
    }

    /// Number of scalar values in one image
    pub fn values_per_image(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }
}

impl Default for ImageDimensions {
    fn default() -> Self {
        Self::gtsrb()
    }
}

/// Element type of an image array.
///
/// Implemented for `u8` (0..=255) and `f32` (0.0..=1.0). Transforms work in
/// `f32` and convert back through [`Pixel::from_f32`].
pub trait Pixel: Copy + Default + PartialOrd + Debug + Send + Sync + 'static {
    /// Upper bound of the valid value range
    const MAX: f32;
    /// Whether the type is an integer type
    const IS_INTEGER: bool;
    /// Short dtype name used in logs and reports
    const DTYPE: &'static str;

    fn to_f32(self) -> f32;

    /// Converts back, rounding and saturating for integer types.
    fn from_f32(value: f32) -> Self;
}

impl Pixel for u8 {
    const MAX: f32 = 255.0;
    const IS_INTEGER: bool = true;
    const DTYPE: &'static str = "uint8";

    fn to_f32(self) -> f32 {
        self as f32
    }

    fn from_f32(value: f32) -> Self {
        value.round().clamp(0.0, 255.0) as u8
    }
}

impl Pixel for f32 {
    const MAX: f32 = 1.0;
    const IS_INTEGER: bool = false;
    const DTYPE: &'static str = "float32";

    fn to_f32(self) -> f32 {
        self
    }

    fn from_f32(value: f32) -> Self {
        value
    }
}

/// Which representation a [`LabelSet`] holds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LabelKind {
    Integer,
    OneHot,
}

impl std::fmt::Display for LabelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelKind::Integer => write!(f, "integer"),
            LabelKind::OneHot => write!(f, "one-hot"),
        }
    }
}

/// Class labels, either as integer ids or as one-hot rows.
///
/// Conversions between the two happen only through the explicit methods
/// below.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelSet {
    /// One class id per sample
    Integer(Array1<i64>),
    /// One row of width `num_classes` per sample
    OneHot(Array2<f32>),
}

impl LabelSet {
    pub fn len(&self) -> usize {
        match self {
            LabelSet::Integer(labels) => labels.len(),
            LabelSet::OneHot(labels) => labels.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> LabelKind {
        match self {
            LabelSet::Integer(_) => LabelKind::Integer,
            LabelSet::OneHot(_) => LabelKind::OneHot,
        }
    }

    /// Width of the one-hot rows, if one-hot
    pub fn one_hot_width(&self) -> Option<usize> {
        match self {
            LabelSet::Integer(_) => None,
            LabelSet::OneHot(labels) => Some(labels.ncols()),
        }
    }

    /// Integer class ids; one-hot rows are decoded by arg-max.
    pub fn to_integer(&self) -> Array1<i64> {
        match self {
            LabelSet::Integer(labels) => labels.clone(),
            LabelSet::OneHot(labels) => argmax_rows(labels),
        }
    }

    /// Converts to one-hot rows of width `num_classes`.
    ///
    /// Fails if any integer id is outside `[0, num_classes)` or if existing
    /// one-hot rows have a different width.
    pub fn into_one_hot(self, num_classes: usize) -> Result<LabelSet> {
        match self {
            LabelSet::Integer(labels) => Ok(LabelSet::OneHot(one_hot(labels.view(), num_classes)?)),
            LabelSet::OneHot(labels) => {
                if labels.ncols() != num_classes {
                    return Err(Error::InvalidArgument(format!(
                        "one-hot labels have width {}, expected {}",
                        labels.ncols(),
                        num_classes
                    )));
                }
                Ok(LabelSet::OneHot(labels))
            }
        }
    }

    /// Labels at the given sample indices, in that order
    pub fn select(&self, indices: &[usize]) -> LabelSet {
        match self {
            LabelSet::Integer(labels) => LabelSet::Integer(labels.select(Axis(0), indices)),
            LabelSet::OneHot(labels) => LabelSet::OneHot(labels.select(Axis(0), indices)),
        }
    }
}

/// One-hot encodes integer class ids.
pub fn one_hot(labels: ArrayView1<i64>, num_classes: usize) -> Result<Array2<f32>> {
    let mut encoded = Array2::<f32>::zeros((labels.len(), num_classes));
    for (row, &label) in labels.iter().enumerate() {
        if label < 0 || label as usize >= num_classes {
            return Err(Error::InvalidArgument(format!(
                "label {} at row {} is outside [0, {})",
                label, row, num_classes
            )));
        }
        encoded[[row, label as usize]] = 1.0;
    }
    Ok(encoded)
}

/// Index of the largest value in each row; ties resolve to the first index.
pub fn argmax_rows(rows: &Array2<f32>) -> Array1<i64> {
    rows.outer_iter()
        .map(|row| {
            let mut best = 0usize;
            for (idx, &value) in row.iter().enumerate() {
                if value > row[best] {
                    best = idx;
                }
            }
            best as i64
        })
        .collect()
}

/// Parallel image and label arrays.
///
/// `images` has shape `(N, H, W, 3)`. The constructor guarantees that the
/// number of labels equals `N`; every component returns a new dataset rather
/// than mutating its input.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledDataset<P: Pixel> {
    images: Array4<P>,
    labels: LabelSet,
}

impl<P: Pixel> LabeledDataset<P> {
    /// Creates a dataset, validating the length invariant and channel count.
    pub fn new(images: Array4<P>, labels: LabelSet) -> Result<Self> {
        if images.len_of(Axis(0)) != labels.len() {
            return Err(Error::LengthMismatch {
                images: images.len_of(Axis(0)),
                labels: labels.len(),
            });
        }
        if images.len_of(Axis(3)) != 3 {
            return Err(Error::InvalidArgument(format!(
                "expected 3 channels, got image array of shape {:?}",
                images.shape()
            )));
        }
        Ok(Self { images, labels })
    }

    /// Dataset with zero samples of the given image size
    pub fn empty(dims: ImageDimensions) -> Self {
        Self {
            images: Array4::from_elem((0, dims.height as usize, dims.width as usize, 3), P::default()),
            labels: LabelSet::Integer(Array1::zeros(0)),
        }
    }

    pub fn len(&self) -> usize {
        self.images.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn images(&self) -> &Array4<P> {
        &self.images
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// `(height, width)` shared by every image
    pub fn image_size(&self) -> (usize, usize) {
        (self.images.len_of(Axis(1)), self.images.len_of(Axis(2)))
    }

    /// Single `(H, W, 3)` image view
    pub fn image(&self, index: usize) -> ArrayView3<'_, P> {
        self.images.slice(s![index, .., .., ..])
    }

    pub fn into_parts(self) -> (Array4<P>, LabelSet) {
        (self.images, self.labels)
    }

    /// New dataset holding the samples at `indices`, in that order
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            images: self.images.select(Axis(0), indices),
            labels: self.labels.select(indices),
        }
    }

    /// Per-class sample counts (one-hot rows decoded by arg-max)
    pub fn class_counts(&self) -> ClassCountTable {
        ClassCountTable::from_labels(self.labels.to_integer().view())
    }
}

/// Number of samples per class id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCountTable {
    counts: BTreeMap<i64, usize>,
}

impl ClassCountTable {
    pub fn from_labels(labels: ArrayView1<i64>) -> Self {
        let mut counts = BTreeMap::new();
        for &label in labels.iter() {
            *counts.entry(label).or_insert(0) += 1;
        }
        Self { counts }
    }

    /// Count for a class, zero if absent
    pub fn count(&self, class: i64) -> usize {
        self.counts.get(&class).copied().unwrap_or(0)
    }

    /// Total number of samples
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Number of distinct classes present
    pub fn num_classes(&self) -> usize {
        self.counts.len()
    }

    /// Classes in ascending id order with their counts
    pub fn iter(&self) -> impl Iterator<Item = (i64, usize)> + '_ {
        self.counts.iter().map(|(&class, &count)| (class, count))
    }

    /// Classes whose count is strictly below `threshold`
    pub fn minority_classes(&self, threshold: usize) -> Vec<i64> {
        self.iter()
            .filter(|&(_, count)| count < threshold)
            .map(|(class, _)| class)
            .collect()
    }

    pub fn min_count(&self) -> usize {
        self.counts.values().copied().min().unwrap_or(0)
    }

    pub fn max_count(&self) -> usize {
        self.counts.values().copied().max().unwrap_or(0)
    }

    /// Largest over smallest class size
    pub fn imbalance_ratio(&self) -> f64 {
        let min = self.min_count();
        if min == 0 {
            return f64::INFINITY;
        }
        self.max_count() as f64 / min as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Ingest.to_string(), "ingest");
        assert_eq!(Stage::Augment.to_string(), "augment");
        assert_eq!(Stage::Persist.to_string(), "persist");
    }

    #[test]
    fn test_data_split_display() {
        assert_eq!(DataSplit::Train.to_string(), "train");
        assert_eq!(DataSplit::Validation.to_string(), "validation");
        assert_eq!(DataSplit::Test.to_string(), "test");
    }

    #[test]
    fn test_image_dimensions() {
        let dims = ImageDimensions::gtsrb();
        assert_eq!(dims.width, 32);
        assert_eq!(dims.height, 32);
        assert_eq!(dims.channels, 3);
        assert_eq!(dims.values_per_image(), 32 * 32 * 3);
    }

    #[test]
    fn test_pixel_from_f32_saturates_integers() {
        assert_eq!(u8::from_f32(300.0), 255);
        assert_eq!(u8::from_f32(-4.0), 0);
        assert_eq!(u8::from_f32(127.6), 128);
        assert_eq!(f32::from_f32(0.25), 0.25);
    }

    #[test]
    fn test_one_hot_rows() {
        let encoded = one_hot(array![0i64, 2, 1].view(), 3).unwrap();
        assert_eq!(encoded, array![[1.0f32, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]]);
    }

    #[test]
    fn test_one_hot_rejects_out_of_range() {
        assert!(one_hot(array![0i64, 3].view(), 3).is_err());
        assert!(one_hot(array![-1i64].view(), 3).is_err());
    }

    #[test]
    fn test_label_set_conversions() {
        let labels = LabelSet::Integer(array![1i64, 0, 1]);
        let encoded = labels.clone().into_one_hot(2).unwrap();
        assert_eq!(encoded.kind(), LabelKind::OneHot);
        assert_eq!(encoded.one_hot_width(), Some(2));
        assert_eq!(encoded.to_integer(), array![1i64, 0, 1]);
        assert!(encoded.into_one_hot(3).is_err());
    }

    #[test]
    fn test_dataset_rejects_length_mismatch() {
        let images = Array4::<u8>::zeros((3, 4, 4, 3));
        let labels = LabelSet::Integer(array![0i64, 1]);
        let err = LabeledDataset::new(images, labels).unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { images: 3, labels: 2 }));
    }

    #[test]
    fn test_dataset_select_keeps_pairs_together() {
        let mut images = Array4::<u8>::zeros((3, 2, 2, 3));
        for i in 0..3 {
            images.slice_mut(s![i, .., .., ..]).fill(i as u8 * 10);
        }
        let dataset = LabeledDataset::new(images, LabelSet::Integer(array![5i64, 6, 7])).unwrap();
        let picked = dataset.select(&[2, 0]);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked.image(0)[[0, 0, 0]], 20);
        assert_eq!(picked.labels().to_integer(), array![7i64, 5]);
    }

    #[test]
    fn test_class_count_table() {
        let table = ClassCountTable::from_labels(array![0i64, 0, 0, 1, 2, 2].view());
        assert_eq!(table.count(0), 3);
        assert_eq!(table.count(9), 0);
        assert_eq!(table.total(), 6);
        assert_eq!(table.num_classes(), 3);
        assert_eq!(table.minority_classes(3), vec![1, 2]);
        assert_eq!(table.imbalance_ratio(), 3.0);
    }
}
