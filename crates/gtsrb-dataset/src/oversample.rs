//! Offline oversampling of minority classes with augmented copies.
//!
//! A class is a minority class when its count in the source set is below
//! `minority_threshold`. Every source sample appears once in the output;
//! every sample of a minority class additionally appears
//! `augmentations_per_minority` times as an augmented copy. The combined
//! index plan is shuffled once and replayed into a single output array.
//!
//! The output array is reserved up front. When that reservation fails the
//! replay collects per-sample arrays instead and stacks them at the end,
//! which trades peak memory for not needing one huge block early.

use std::mem::size_of;
use std::path::Path;

use gtsrb_core::{
    one_hot, AugmentationConfig, ClassCountTable, Error, LabelSet, LabeledDataset,
    OversamplingConfig, Pixel, PipelineConfig, Result, Stage,
};
use ndarray::{Array1, Array3, Array4, ArrayView1, ArrayView3};
use ndarray_npy::WritableElement;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::augmentation::AugmentationOps;
use crate::bundle::{write_bundle, Compression};
use crate::progress::progress_bar;

/// One slot of the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanEntry {
    pub original_index: usize,
    /// Augmented copy rather than the original itself
    pub is_copy: bool,
}

/// Builds the unshuffled plan: all originals first, then the copies.
///
/// Minority membership is decided once from `counts`, which must describe
/// `labels`. Fails with [`Error::ResourceExhausted`] when the plan itself
/// cannot be sized or allocated.
pub fn build_plan(
    labels: ArrayView1<'_, i64>,
    counts: &ClassCountTable,
    minority_threshold: usize,
    augmentations_per_minority: usize,
) -> Result<Vec<PlanEntry>> {
    let minority: Vec<bool> = labels
        .iter()
        .map(|&label| counts.count(label) < minority_threshold)
        .collect();
    let minority_samples = minority.iter().filter(|&&m| m).count();
    let plan_len = minority_samples
        .checked_mul(augmentations_per_minority)
        .and_then(|copies| copies.checked_add(labels.len()))
        .ok_or_else(|| plan_too_large(usize::MAX, augmentations_per_minority))?;

    let mut plan = Vec::new();
    plan.try_reserve_exact(plan_len).map_err(|_| {
        plan_too_large(
            plan_len.saturating_mul(size_of::<PlanEntry>()),
            augmentations_per_minority,
        )
    })?;
    plan.extend((0..labels.len()).map(|original_index| PlanEntry {
        original_index,
        is_copy: false,
    }));
    for (original_index, &is_minority) in minority.iter().enumerate() {
        if !is_minority {
            continue;
        }
        for _ in 0..augmentations_per_minority {
            plan.push(PlanEntry {
                original_index,
                is_copy: true,
            });
        }
    }
    Ok(plan)
}

fn plan_too_large(requested_bytes: usize, augmentations_per_minority: usize) -> Error {
    Error::ResourceExhausted {
        stage: Stage::Augment,
        requested_bytes,
        guidance: format!(
            "the oversampling plan does not fit in memory; lower augmentations_per_minority \
             (currently {}) or minority_threshold",
            augmentations_per_minority
        ),
    }
}

/// How the output array is allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationStrategy {
    /// Reserve the full array, falling back to per-sample arrays on failure
    #[default]
    Eager,
    /// Always collect per-sample arrays
    Growable,
}

enum OutputBuffer<P> {
    Fixed(Vec<P>),
    Growable(Vec<Array3<P>>),
}

impl<P: Pixel> OutputBuffer<P> {
    fn allocate(strategy: AllocationStrategy, values: usize) -> Self {
        if strategy == AllocationStrategy::Eager {
            let mut data = Vec::new();
            match data.try_reserve_exact(values) {
                Ok(()) => return OutputBuffer::Fixed(data),
                Err(e) => warn!(
                    "[{}] could not reserve {} bytes up front ({}); collecting samples individually",
                    Stage::Augment,
                    values.saturating_mul(size_of::<P>()),
                    e
                ),
            }
        }
        OutputBuffer::Growable(Vec::new())
    }

    fn is_fallback(&self) -> bool {
        matches!(self, OutputBuffer::Growable(_))
    }

    fn push_view(&mut self, image: ArrayView3<'_, P>) {
        match self {
            OutputBuffer::Fixed(data) => data.extend(image.iter().copied()),
            OutputBuffer::Growable(list) => list.push(image.to_owned()),
        }
    }

    fn push_owned(&mut self, image: Array3<P>) {
        match self {
            OutputBuffer::Fixed(data) => data.extend(image.iter().copied()),
            OutputBuffer::Growable(list) => list.push(image),
        }
    }

    fn into_array(self, shape: (usize, usize, usize, usize), guidance: &str) -> Result<Array4<P>> {
        let data = match self {
            OutputBuffer::Fixed(data) => data,
            OutputBuffer::Growable(list) => {
                let values = shape.0 * shape.1 * shape.2 * shape.3;
                let mut data = Vec::new();
                data.try_reserve_exact(values)
                    .map_err(|_| Error::ResourceExhausted {
                        stage: Stage::Augment,
                        requested_bytes: values.saturating_mul(size_of::<P>()),
                        guidance: guidance.to_string(),
                    })?;
                for image in list {
                    data.extend(image.iter().copied());
                }
                data
            }
        };
        Array4::from_shape_vec(shape, data)
            .map_err(|e| Error::InvalidArgument(format!("output buffer has wrong size: {e}")))
    }
}

/// Counts produced by one oversampling run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AugmentReport {
    pub original: usize,
    pub minority_classes: Vec<i64>,
    pub added: usize,
    pub final_count: usize,
    /// Whether the per-sample fallback buffer was used
    pub fallback_used: bool,
}

/// Minority-class oversampler
pub struct OversamplingAugmenter {
    settings: OversamplingConfig,
    ops: AugmentationOps,
    num_classes: usize,
    allocation: AllocationStrategy,
}

impl OversamplingAugmenter {
    pub fn new(settings: OversamplingConfig, params: AugmentationConfig, num_classes: usize) -> Self {
        Self {
            settings,
            ops: AugmentationOps::new(params),
            num_classes,
            allocation: AllocationStrategy::default(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let allocation = if config.oversampling.low_memory {
            AllocationStrategy::Growable
        } else {
            AllocationStrategy::Eager
        };
        Self::new(config.oversampling, config.augmentation, config.num_classes).with_allocation(allocation)
    }

    pub fn with_allocation(mut self, allocation: AllocationStrategy) -> Self {
        self.allocation = allocation;
        self
    }

    fn guidance(&self) -> String {
        format!(
            "lower augmentations_per_minority (currently {}) or minority_threshold (currently {}), \
             or run with more memory available",
            self.settings.augmentations_per_minority, self.settings.minority_threshold
        )
    }

    /// Returns the oversampled dataset with one-hot labels of width `num_classes`.
    ///
    /// Input labels may be integer or one-hot; one-hot rows are decoded by
    /// arg-max. The source dataset is consumed and released before labels are
    /// re-encoded.
    pub fn oversample<P, R>(&self, dataset: LabeledDataset<P>, rng: &mut R) -> Result<(LabeledDataset<P>, AugmentReport)>
    where
        P: Pixel,
        R: Rng + ?Sized,
    {
        let original = dataset.len();
        let (height, width) = dataset.image_size();
        let source_labels = dataset.labels().to_integer();
        let counts = ClassCountTable::from_labels(source_labels.view());
        let minority_classes = counts.minority_classes(self.settings.minority_threshold);

        info!(
            "[{}] {} samples, {} minority classes below {} (adding {} copies each)",
            Stage::Augment,
            original,
            minority_classes.len(),
            self.settings.minority_threshold,
            self.settings.augmentations_per_minority
        );
        for &class in &minority_classes {
            debug!(
                "Class {}: {} -> {}",
                class,
                counts.count(class),
                counts
                    .count(class)
                    .saturating_mul(self.settings.augmentations_per_minority.saturating_add(1))
            );
        }

        let (images, labels, fallback_used) = {
            let mut plan = build_plan(
                source_labels.view(),
                &counts,
                self.settings.minority_threshold,
                self.settings.augmentations_per_minority,
            )?;
            plan.shuffle(rng);

            let shape = (plan.len(), height, width, 3);
            let values = shape
                .0
                .checked_mul(height * width * 3)
                .ok_or_else(|| Error::ResourceExhausted {
                    stage: Stage::Augment,
                    requested_bytes: usize::MAX,
                    guidance: self.guidance(),
                })?;

            let mut buffer = OutputBuffer::<P>::allocate(self.allocation, values);
            let fallback_used = buffer.is_fallback();
            let mut labels = Vec::with_capacity(plan.len());

            let pb = progress_bar(plan.len() as u64, "samples");
            for entry in &plan {
                let image = dataset.image(entry.original_index);
                if entry.is_copy {
                    buffer.push_owned(self.ops.augment(image, rng));
                } else {
                    buffer.push_view(image);
                }
                labels.push(source_labels[entry.original_index]);
                pb.inc(1);
            }
            pb.finish_and_clear();

            drop(plan);
            drop(source_labels);
            drop(dataset);
            (buffer.into_array(shape, &self.guidance())?, labels, fallback_used)
        };

        let labels = Array1::from(labels);
        let encoded = one_hot(labels.view(), self.num_classes)?;
        drop(labels);
        let output = LabeledDataset::new(images, LabelSet::OneHot(encoded))?;

        let report = AugmentReport {
            original,
            minority_classes,
            added: output.len() - original,
            final_count: output.len(),
            fallback_used,
        };
        info!(
            "[{}] {} -> {} samples ({} added{})",
            Stage::Augment,
            report.original,
            report.final_count,
            report.added,
            if fallback_used { ", fallback buffer" } else { "" }
        );
        Ok((output, report))
    }

    /// Oversamples and writes the result as a bundle at `output`
    pub fn oversample_to_bundle<P, R>(
        &self,
        dataset: LabeledDataset<P>,
        output: &Path,
        compression: Compression,
        rng: &mut R,
    ) -> Result<AugmentReport>
    where
        P: Pixel + WritableElement,
        R: Rng + ?Sized,
    {
        let (augmented, report) = self.oversample(dataset, rng)?;
        write_bundle(&augmented, output, compression)?;
        Ok(report)
    }
}
