//! `.npz` bundles holding an `images` and a `labels` array.
//!
//! Bundles are NumPy-compatible: `np.load(path)["images"]` works on every
//! file written here. Writes go to a temporary file next to the target and
//! are renamed into place only once the archive is complete, so a failed
//! run never leaves a truncated bundle behind.

use std::fmt::Display;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use gtsrb_core::{Error, LabelSet, LabeledDataset, Pixel, Result, Stage};
use ndarray::{Array1, Array2, Array4};
use ndarray_npy::{NpzReader, NpzWriter, ReadableElement, WritableElement};
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub const IMAGES_KEY: &str = "images";
pub const LABELS_KEY: &str = "labels";

/// Whether array entries are deflated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Stored,
    Deflate,
}

impl From<bool> for Compression {
    fn from(compress: bool) -> Self {
        if compress {
            Compression::Deflate
        } else {
            Compression::Stored
        }
    }
}

fn malformed(path: &Path, what: &str, err: impl Display) -> Error {
    Error::malformed(path, format!("{what}: {err}"))
}

/// Writes `dataset` to `path`, replacing any existing file atomically.
pub fn write_bundle<P>(dataset: &LabeledDataset<P>, path: &Path, compression: Compression) -> Result<()>
where
    P: Pixel + WritableElement,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| Error::fs(Stage::Persist, &dir, e))?;

    let tmp = NamedTempFile::new_in(&dir).map_err(|e| Error::fs(Stage::Persist, &dir, e))?;
    {
        let mut npz = match compression {
            Compression::Deflate => NpzWriter::new_compressed(tmp.as_file()),
            Compression::Stored => NpzWriter::new(tmp.as_file()),
        };
        let write_err = |e: ndarray_npy::WriteNpzError| {
            Error::Serialization(format!("failed to write {}: {e}", path.display()))
        };
        npz.add_array(IMAGES_KEY, dataset.images()).map_err(write_err)?;
        let labels_written = match dataset.labels() {
            LabelSet::Integer(labels) => npz.add_array(LABELS_KEY, labels),
            LabelSet::OneHot(labels) => npz.add_array(LABELS_KEY, labels),
        };
        labels_written.map_err(write_err)?;
        npz.finish().map_err(write_err)?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::fs(Stage::Persist, path, e))?;
    tmp.persist(path)
        .map_err(|e| Error::fs(Stage::Persist, path, e.error))?;

    info!(
        "[{}] wrote {} samples ({}, {} labels) to {}",
        Stage::Persist,
        dataset.len(),
        P::DTYPE,
        dataset.labels().kind(),
        path.display()
    );
    Ok(())
}

fn open_archive(path: &Path) -> Result<NpzReader<BufReader<File>>> {
    if !path.is_file() {
        return Err(Error::not_found(Stage::Persist, path));
    }
    let file = File::open(path).map_err(|e| Error::fs(Stage::Persist, path, e))?;
    NpzReader::new(BufReader::new(file)).map_err(|e| malformed(path, "not a valid npz archive", e))
}

/// Archive entry for a key, accepting both `key` and `key.npy`
fn entry_name(names: &[String], key: &str) -> Option<String> {
    let with_ext = format!("{key}.npy");
    names
        .iter()
        .find(|name| name.as_str() == key || name.as_str() == with_ext)
        .cloned()
}

/// Array names stored in a bundle, without the `.npy` suffix
pub fn bundle_keys(path: &Path) -> Result<Vec<String>> {
    let mut npz = open_archive(path)?;
    let names = npz
        .names()
        .map_err(|e| malformed(path, "unreadable archive index", e))?;
    Ok(names
        .into_iter()
        .map(|name| name.strip_suffix(".npy").map(str::to_string).unwrap_or(name))
        .collect())
}

fn read_labels(npz: &mut NpzReader<BufReader<File>>, name: &str, path: &Path) -> Result<LabelSet> {
    let one_hot: std::result::Result<Array2<f32>, _> = npz.by_name(name);
    if let Ok(rows) = one_hot {
        return Ok(LabelSet::OneHot(rows));
    }
    let ids: std::result::Result<Array1<i64>, _> = npz.by_name(name);
    if let Ok(ids) = ids {
        return Ok(LabelSet::Integer(ids));
    }
    let ids: std::result::Result<Array1<i32>, _> = npz.by_name(name);
    match ids {
        Ok(ids) => Ok(LabelSet::Integer(ids.mapv(i64::from))),
        Err(e) => Err(malformed(
            path,
            "labels must be (N, C) float32 or (N,) int64/int32",
            e,
        )),
    }
}

/// Reads a bundle with pixel type `P`.
///
/// Both keys are located before any data is read. Fails with
/// [`Error::SourceNotFound`] for a missing file and
/// [`Error::MalformedBundle`] for anything that is not a well-formed bundle
/// of the requested pixel type.
pub fn read_bundle<P>(path: &Path) -> Result<LabeledDataset<P>>
where
    P: Pixel + ReadableElement,
{
    let mut npz = open_archive(path)?;
    let names = npz
        .names()
        .map_err(|e| malformed(path, "unreadable archive index", e))?;

    let images_name = entry_name(&names, IMAGES_KEY);
    let labels_name = entry_name(&names, LABELS_KEY);
    let (Some(images_name), Some(labels_name)) = (images_name, labels_name) else {
        return Err(Error::malformed(
            path,
            format!("expected keys '{IMAGES_KEY}' and '{LABELS_KEY}', found {names:?}"),
        ));
    };

    let images: Array4<P> = npz
        .by_name(&images_name)
        .map_err(|e| malformed(path, &format!("images must be (N, H, W, 3) {}", P::DTYPE), e))?;
    let labels = read_labels(&mut npz, &labels_name, path)?;

    let dataset = LabeledDataset::new(images, labels).map_err(|e| malformed(path, "inconsistent arrays", e))?;
    debug!(
        "[{}] read {} samples from {}",
        Stage::Persist,
        dataset.len(),
        path.display()
    );
    Ok(dataset)
}

/// A bundle whose pixel type is only known after reading it
#[derive(Debug, Clone)]
pub enum AnyBundle {
    U8(LabeledDataset<u8>),
    F32(LabeledDataset<f32>),
}

/// Reads a bundle of either pixel type, trying `f32` first
pub fn read_any_bundle(path: &Path) -> Result<AnyBundle> {
    match read_bundle::<f32>(path) {
        Ok(dataset) => Ok(AnyBundle::F32(dataset)),
        Err(Error::MalformedBundle { .. }) => read_bundle::<u8>(path).map(AnyBundle::U8),
        Err(e) => Err(e),
    }
}
