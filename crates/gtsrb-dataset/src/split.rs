//! Label-stratified train/validation split.
//!
//! The held-out part gets `round(fraction * N)` samples. That total is shared
//! out across classes by largest remainder of each class's exact share, with
//! every class keeping at least one sample on each side. Classes are visited
//! in ascending id order and shuffled with a seeded ChaCha8 generator, so the
//! same input and seed always produce the same index sets.

use std::collections::BTreeMap;

use gtsrb_core::{Error, LabeledDataset, Pixel, Result, Stage};
use ndarray::ArrayView1;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

/// Sample indices of the two parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub held_out: Vec<usize>,
}

/// Groups sample indices by class id, ascending
fn by_class(labels: ArrayView1<'_, i64>) -> BTreeMap<i64, Vec<usize>> {
    let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (idx, &label) in labels.iter().enumerate() {
        groups.entry(label).or_default().push(idx);
    }
    groups
}

/// Number of held-out samples per class, in the map's order
fn allocate(groups: &BTreeMap<i64, Vec<usize>>, fraction: f64) -> Vec<usize> {
    let sizes: Vec<usize> = groups.values().map(Vec::len).collect();
    let total: usize = sizes.iter().sum();
    let target = (fraction * total as f64).round() as usize;

    let mut alloc = Vec::with_capacity(groups.len());
    let mut remainders = Vec::with_capacity(groups.len());
    for (pos, &n) in sizes.iter().enumerate() {
        let exact = fraction * n as f64;
        let base = (exact.floor() as usize).clamp(1, n - 1);
        alloc.push(base);
        remainders.push((pos, exact - exact.floor()));
    }

    // Stable sort keeps ascending class order among equal remainders
    remainders.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut assigned: usize = alloc.iter().sum();
    while assigned < target {
        let mut progressed = false;
        for &(pos, _) in &remainders {
            if assigned == target {
                break;
            }
            if alloc[pos] + 1 < sizes[pos] {
                alloc[pos] += 1;
                assigned += 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    while assigned > target {
        let mut progressed = false;
        for &(pos, _) in remainders.iter().rev() {
            if assigned == target {
                break;
            }
            if alloc[pos] > 1 {
                alloc[pos] -= 1;
                assigned -= 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    alloc
}

/// Computes the stratified index split without touching any pixel data.
pub fn split_indices(labels: ArrayView1<'_, i64>, fraction: f64, seed: u64) -> Result<SplitIndices> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(Error::InvalidArgument(format!(
            "split fraction must be in (0, 1), got {}",
            fraction
        )));
    }

    let groups = by_class(labels);
    for (&class, members) in &groups {
        if members.len() < 2 {
            return Err(Error::InsufficientSamples {
                stage: Stage::Split,
                class,
                count: members.len(),
            });
        }
    }

    let alloc = allocate(&groups, fraction);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut held_out = Vec::new();

    for ((class, members), n_held) in groups.into_iter().zip(alloc) {
        let mut members = members;
        members.shuffle(&mut rng);
        debug!(
            "Class {}: {} train, {} held out",
            class,
            members.len() - n_held,
            n_held
        );
        held_out.extend_from_slice(&members[..n_held]);
        train.extend_from_slice(&members[n_held..]);
    }

    train.shuffle(&mut rng);
    held_out.shuffle(&mut rng);
    Ok(SplitIndices { train, held_out })
}

/// Splits a dataset into `(train, held_out)`.
///
/// Fails with [`Error::InsufficientSamples`] if any class has fewer than two
/// samples and [`Error::InvalidArgument`] if `fraction` is not in `(0, 1)`.
pub fn stratified_split<P: Pixel>(
    dataset: LabeledDataset<P>,
    fraction: f64,
    seed: u64,
) -> Result<(LabeledDataset<P>, LabeledDataset<P>)> {
    let labels = dataset.labels().to_integer();
    let indices = split_indices(labels.view(), fraction, seed)?;

    let train = dataset.select(&indices.train);
    let held_out = dataset.select(&indices.held_out);
    info!(
        "Split {} samples into {} train / {} held out (fraction {}, seed {})",
        dataset.len(),
        train.len(),
        held_out.len(),
        fraction,
        seed
    );
    Ok((train, held_out))
}
