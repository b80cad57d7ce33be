//! End-to-end scenarios across ingest, normalization, oversampling and bundles.

use std::fs::{self, File};
use std::path::Path;

use gtsrb_core::{
    AugmentationPresets, Error, ImageDimensions, LabelSet, LabeledDataset, OversamplingConfig,
};
use gtsrb_dataset::{
    load_class_tree, load_manifest, normalize, read_bundle, stratified_split, write_bundle,
    Compression, OversamplingAugmenter,
};
use image::{Rgb, RgbImage};
use ndarray::{array, Array4};
use ndarray_npy::NpzWriter;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

fn black_image(path: &Path) {
    RgbImage::from_pixel(10, 10, Rgb([0, 0, 0])).save(path).unwrap();
}

fn black_tree(root: &Path, classes: usize, per_class: usize) {
    for class in 0..classes {
        let dir = root.join(class.to_string());
        fs::create_dir_all(&dir).unwrap();
        for i in 0..per_class {
            black_image(&dir.join(format!("{i}.png")));
        }
    }
}

#[test]
fn small_imbalanced_tree_oversamples_to_forty_rows() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("Train");
    black_tree(&root, 2, 5);

    let (raw, report) = load_class_tree(&root, ImageDimensions::rgb(10, 10), 2).unwrap();
    assert_eq!(report.loaded, 10);
    let normalized = normalize(raw, 2).unwrap();

    let settings = OversamplingConfig {
        minority_threshold: 10,
        augmentations_per_minority: 3,
        low_memory: false,
    };
    let augmenter = OversamplingAugmenter::new(settings, AugmentationPresets::gentle(), 2);
    let output = dir.path().join("augmented").join("train_augmented.npz");
    let report = augmenter
        .oversample_to_bundle(
            normalized,
            &output,
            Compression::Deflate,
            &mut ChaCha8Rng::seed_from_u64(42),
        )
        .unwrap();
    assert_eq!(report.final_count, 40);

    let loaded: LabeledDataset<f32> = read_bundle(&output).unwrap();
    assert_eq!(loaded.images().shape(), &[40, 10, 10, 3]);
    let LabelSet::OneHot(rows) = loaded.labels() else {
        panic!("augmented bundle must hold one-hot labels");
    };
    assert_eq!(rows.shape(), &[40, 2]);
    assert!(rows.outer_iter().all(|row| row.sum() == 1.0));

    let counts = loaded.class_counts();
    assert_eq!(counts.count(0), 20);
    assert_eq!(counts.count(1), 20);
    // Black stays black under replicate-border warps and brightness scaling.
    assert!(loaded.images().iter().all(|&v| v == 0.0));
}

#[test]
fn manifest_row_with_missing_file_is_skipped() {
    let dir = TempDir::new().unwrap();
    black_image(&dir.path().join("00000.png"));
    black_image(&dir.path().join("00002.png"));
    let manifest = dir.path().join("GT-final_test.csv");
    fs::write(
        &manifest,
        "Filename;Width;Height;Roi.X1;Roi.Y1;Roi.X2;Roi.Y2;ClassId\n\
         00000.png;10;10;1;1;9;9;3\n\
         00001.png;10;10;1;1;9;9;4\n\
         00002.png;10;10;1;1;9;9;5\n",
    )
    .unwrap();

    let (dataset, report) = load_manifest(dir.path(), &manifest, ImageDimensions::gtsrb()).unwrap();
    assert_eq!(report.loaded, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(dataset.labels().to_integer(), array![3, 5]);
    assert_eq!(dataset.images().shape(), &[2, 32, 32, 3]);
}

#[test]
fn bundle_with_foreign_keys_is_malformed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("train.npz");
    {
        let mut npz = NpzWriter::new_compressed(File::create(&path).unwrap());
        npz.add_array("image_data", &Array4::<f32>::zeros((2, 4, 4, 3))).unwrap();
        npz.add_array("label_data", &array![[1.0f32, 0.0], [0.0, 1.0]]).unwrap();
        npz.finish().unwrap();
    }

    let err = read_bundle::<f32>(&path).unwrap_err();
    assert!(matches!(err, Error::MalformedBundle { .. }));
}

#[test]
fn split_normalize_persist_round_trip() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("Train");
    black_tree(&root, 3, 6);

    let (raw, _) = load_class_tree(&root, ImageDimensions::rgb(10, 10), 3).unwrap();
    let (train, val) = stratified_split(raw, 0.2, 42).unwrap();
    assert_eq!(train.len() + val.len(), 18);
    for class in 0..3 {
        assert!(val.class_counts().count(class) >= 1);
        assert!(train.class_counts().count(class) >= 1);
    }

    let val = normalize(val, 3).unwrap();
    let path = dir.path().join("processed").join("val.npz");
    write_bundle(&val, &path, Compression::Stored).unwrap();
    let loaded: LabeledDataset<f32> = read_bundle(&path).unwrap();
    assert_eq!(loaded, val);
}
