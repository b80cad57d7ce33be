//! Dataset statistics for reports and bundle inspection.

use std::fmt;

use gtsrb_core::{ClassCountTable, LabelKind, LabeledDataset, Pixel};
use serde::Serialize;

/// Summary of one dataset
#[derive(Debug, Clone, Serialize)]
pub struct DatasetStats {
    pub total_samples: usize,
    /// `(height, width)` of every image
    pub image_size: (usize, usize),
    pub dtype: &'static str,
    pub label_kind: LabelKind,
    /// One-hot width, if labels are one-hot
    pub label_width: Option<usize>,
    pub class_counts: ClassCountTable,
    pub pixel_min: f32,
    pub pixel_max: f32,
    pub pixel_mean: f64,
}

impl DatasetStats {
    pub fn from_dataset<P: Pixel>(dataset: &LabeledDataset<P>) -> Self {
        let mut pixel_min = f32::INFINITY;
        let mut pixel_max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        for &value in dataset.images().iter() {
            let v = value.to_f32();
            pixel_min = pixel_min.min(v);
            pixel_max = pixel_max.max(v);
            sum += v as f64;
        }
        let count = dataset.images().len();
        let (pixel_min, pixel_max, pixel_mean) = if count == 0 {
            (0.0, 0.0, 0.0)
        } else {
            (pixel_min, pixel_max, sum / count as f64)
        };

        Self {
            total_samples: dataset.len(),
            image_size: dataset.image_size(),
            dtype: P::DTYPE,
            label_kind: dataset.labels().kind(),
            label_width: dataset.labels().one_hot_width(),
            class_counts: dataset.class_counts(),
            pixel_min,
            pixel_max,
            pixel_mean,
        }
    }

    /// Largest over smallest class size
    pub fn imbalance_ratio(&self) -> f64 {
        self.class_counts.imbalance_ratio()
    }
}

impl fmt::Display for DatasetStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dataset Statistics:")?;
        writeln!(f, "  Total samples:  {}", self.total_samples)?;
        writeln!(
            f,
            "  Image size:     {}x{}x3 ({})",
            self.image_size.0, self.image_size.1, self.dtype
        )?;
        match self.label_width {
            Some(width) => writeln!(f, "  Labels:         {} (width {})", self.label_kind, width)?,
            None => writeln!(f, "  Labels:         {}", self.label_kind)?,
        }
        writeln!(
            f,
            "  Pixel range:    [{:.4}, {:.4}], mean {:.4}",
            self.pixel_min, self.pixel_max, self.pixel_mean
        )?;
        writeln!(
            f,
            "  Classes:        {} (min {}, max {}, imbalance {:.2})",
            self.class_counts.num_classes(),
            self.class_counts.min_count(),
            self.class_counts.max_count(),
            self.imbalance_ratio()
        )?;
        writeln!(f)?;
        writeln!(f, "  Samples per class:")?;

        let max = self.class_counts.max_count().max(1);
        for (class, count) in self.class_counts.iter() {
            let bar_len = count * 40 / max;
            writeln!(f, "    {:3}. {:6} {}", class, count, "█".repeat(bar_len))?;
        }
        Ok(())
    }
}
