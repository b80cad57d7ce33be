//! Pixel scaling and label encoding.
//!
//! Turns a raw dataset into the form consumed by training: `f32` pixels in
//! `[0, 1]` and one-hot labels of width `num_classes`. Samples whose label
//! is outside the class range are dropped as a pair.

use gtsrb_core::{one_hot, Error, LabelSet, LabeledDataset, Pixel, Result, Stage};
use ndarray::{Array1, Array2, Axis};
use serde::Serialize;
use tracing::{info, warn};

/// Counts produced by [`normalize_with_report`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
    pub input: usize,
    pub kept: usize,
    /// Samples dropped for an invalid label
    pub dropped: usize,
    /// Whether pixel values were divided by 255
    pub rescaled: bool,
}

/// Decodes one-hot rows, marking rows that are not exactly one-hot as invalid
fn decode_one_hot(rows: &Array2<f32>, num_classes: usize) -> Vec<Option<i64>> {
    if rows.ncols() != num_classes {
        warn!(
            "One-hot labels have width {}, expected {}; all rows are invalid",
            rows.ncols(),
            num_classes
        );
        return vec![None; rows.nrows()];
    }
    rows.outer_iter()
        .map(|row| {
            let mut hot = None;
            for (idx, &value) in row.iter().enumerate() {
                if value == 1.0 {
                    if hot.is_some() {
                        return None;
                    }
                    hot = Some(idx as i64);
                } else if value != 0.0 {
                    return None;
                }
            }
            hot
        })
        .collect()
}

/// Valid class id per sample, `None` for samples that must be dropped
fn valid_labels(labels: &LabelSet, num_classes: usize) -> Vec<Option<i64>> {
    match labels {
        LabelSet::Integer(ids) => ids
            .iter()
            .map(|&id| (id >= 0 && (id as usize) < num_classes).then_some(id))
            .collect(),
        LabelSet::OneHot(rows) => decode_one_hot(rows, num_classes),
    }
}

/// Scales pixels to `[0, 1]` and one-hot encodes labels.
pub fn normalize<P: Pixel>(dataset: LabeledDataset<P>, num_classes: usize) -> Result<LabeledDataset<f32>> {
    normalize_with_report(dataset, num_classes).map(|(dataset, _)| dataset)
}

/// [`normalize`] returning the drop counts as well.
///
/// Integer pixel types are always divided by 255. Float pixels are divided
/// by 255 only when their maximum exceeds 1, so already-normalized input
/// passes through unchanged.
pub fn normalize_with_report<P: Pixel>(
    dataset: LabeledDataset<P>,
    num_classes: usize,
) -> Result<(LabeledDataset<f32>, NormalizeReport)> {
    if num_classes == 0 {
        return Err(Error::InvalidArgument("num_classes must be at least 1".to_string()));
    }

    let input = dataset.len();
    let (images, labels) = dataset.into_parts();
    let decoded = valid_labels(&labels, num_classes);
    drop(labels);

    let keep: Vec<usize> = decoded
        .iter()
        .enumerate()
        .filter_map(|(idx, label)| label.map(|_| idx))
        .collect();
    let kept_labels: Array1<i64> = decoded.into_iter().flatten().collect();

    let dropped = input - keep.len();
    if dropped > 0 {
        warn!(
            "[{}] dropped {} of {} samples with labels outside [0, {})",
            Stage::Normalize,
            dropped,
            input,
            num_classes
        );
    }

    let images = if dropped == 0 {
        images
    } else {
        images.select(Axis(0), &keep)
    };

    let max = images
        .iter()
        .map(|v| v.to_f32())
        .fold(f32::NEG_INFINITY, f32::max);
    let rescaled = P::IS_INTEGER || max > 1.0;
    let scale = if rescaled { 1.0 / 255.0 } else { 1.0 };
    let pixels = images.mapv(|v| v.to_f32() * scale);
    drop(images);

    let encoded = one_hot(kept_labels.view(), num_classes)?;
    let normalized = LabeledDataset::new(pixels, LabelSet::OneHot(encoded))?;

    let report = NormalizeReport {
        input,
        kept: normalized.len(),
        dropped,
        rescaled,
    };
    info!(
        "Normalized {} samples ({} {}, {} dropped)",
        report.kept,
        P::DTYPE,
        if rescaled { "rescaled by 1/255" } else { "already in [0, 1]" },
        report.dropped
    );
    Ok((normalized, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array4};

    fn raw_dataset(labels: Array1<i64>, value: u8) -> LabeledDataset<u8> {
        let images = Array4::from_elem((labels.len(), 4, 4, 3), value);
        LabeledDataset::new(images, LabelSet::Integer(labels)).unwrap()
    }

    #[test]
    fn test_u8_always_rescaled() {
        let (normalized, report) = normalize_with_report(raw_dataset(array![0, 1], 1), 2).unwrap();
        assert!(report.rescaled);
        assert!((normalized.images()[[0, 0, 0, 0]] - 1.0 / 255.0).abs() < 1e-7);
    }

    #[test]
    fn test_one_hot_rows_and_pixel_range() {
        let normalized = normalize(raw_dataset(array![2, 0, 1, 2], 255), 3).unwrap();
        let LabelSet::OneHot(rows) = normalized.labels() else {
            panic!("expected one-hot labels");
        };
        assert_eq!(rows.shape(), &[4, 3]);
        for row in rows.outer_iter() {
            assert_eq!(row.sum(), 1.0);
            assert_eq!(row.iter().cloned().fold(0.0f32, f32::max), 1.0);
        }
        assert!(normalized.images().iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_eq!(normalized.labels().to_integer(), array![2, 0, 1, 2]);
    }

    #[test]
    fn test_out_of_range_labels_dropped_as_pairs() {
        let mut images = Array4::<u8>::zeros((4, 2, 2, 3));
        for (i, v) in [10u8, 20, 30, 40].iter().enumerate() {
            images.index_axis_mut(Axis(0), i).fill(*v);
        }
        let dataset = LabeledDataset::new(images, LabelSet::Integer(array![0, 43, -1, 5])).unwrap();

        let (normalized, report) = normalize_with_report(dataset, 43).unwrap();
        assert_eq!(report.dropped, 2);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized.labels().to_integer(), array![0, 5]);
        assert!((normalized.images()[[1, 0, 0, 0]] - 40.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_idempotent() {
        let once = normalize(raw_dataset(array![0, 1, 1], 200), 2).unwrap();
        let twice = normalize(once.clone(), 2).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_float_above_one_rescaled() {
        let images = Array4::<f32>::from_elem((1, 2, 2, 3), 127.5);
        let dataset = LabeledDataset::new(images, LabelSet::Integer(array![0])).unwrap();
        let normalized = normalize(dataset, 1).unwrap();
        assert!((normalized.images()[[0, 1, 1, 2]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_one_hot_rows_dropped() {
        let images = Array4::<f32>::zeros((3, 2, 2, 3));
        let labels = LabelSet::OneHot(array![[0.0, 1.0], [0.5, 0.5], [1.0, 0.0]]);
        let dataset = LabeledDataset::new(images, labels).unwrap();
        let (normalized, report) = normalize_with_report(dataset, 2).unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(normalized.labels().to_integer(), array![1, 0]);
    }

    #[test]
    fn test_wrong_one_hot_width_drops_everything() {
        let images = Array4::<f32>::zeros((2, 2, 2, 3));
        let labels = LabelSet::OneHot(array![[0.0, 1.0], [1.0, 0.0]]);
        let dataset = LabeledDataset::new(images, labels).unwrap();
        let normalized = normalize(dataset, 3).unwrap();
        assert!(normalized.is_empty());
    }
}
