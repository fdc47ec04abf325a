//! Embedding gallery and its on-disk store.
//!
//! The gallery lives in memory as an ordered list of [`IdentityRecord`]s.
//! On disk it is a single JSON document holding two parallel arrays,
//! `names` and `encodings`, keyed by shared index. Writes go to a sibling
//! temporary file that is fsynced and renamed over the store.

use crate::types::{Embedding, IdentityRecord};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery store {path} is corrupt: {reason}")]
    StorageCorrupt { path: PathBuf, reason: String },
    #[error("cannot store {name:?} (record {index}): {reason}")]
    InvalidEmbedding {
        index: usize,
        name: String,
        reason: String,
    },
    #[error("gallery store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Ordered set of enrolled identities. Insertion order = enrollment order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    records: Vec<IdentityRecord>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record at the end. Does not persist.
    pub fn append(&mut self, record: IdentityRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IdentityRecord> {
        self.records.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.name.as_str())
    }

    /// Embedding dimension shared by every record, `None` while empty.
    pub fn dim(&self) -> Option<usize> {
        self.records.first().map(|r| r.embedding.dim())
    }
}

/// Every embedding must be non-empty, finite, and as long as the first one.
fn check_embeddings<'a>(
    embeddings: impl IntoIterator<Item = &'a Embedding>,
) -> Result<(), (usize, String)> {
    let mut dim = None;
    for (i, embedding) in embeddings.into_iter().enumerate() {
        if embedding.dim() == 0 {
            return Err((i, "empty embedding".to_string()));
        }
        if !embedding.is_finite() {
            return Err((i, "embedding has NaN or infinite components".to_string()));
        }
        match dim {
            None => dim = Some(embedding.dim()),
            Some(d) if d != embedding.dim() => {
                return Err((i, format!("embedding has {} dimensions, expected {d}", embedding.dim())));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

impl FromIterator<IdentityRecord> for Gallery {
    fn from_iter<I: IntoIterator<Item = IdentityRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Gallery {
    type Item = &'a IdentityRecord;
    type IntoIter = std::slice::Iter<'a, IdentityRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Serialized form: parallel arrays, as read and written on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredGallery {
    names: Vec<String>,
    encodings: Vec<Embedding>,
}

impl From<&Gallery> for StoredGallery {
    fn from(gallery: &Gallery) -> Self {
        let (names, encodings) = gallery
            .iter()
            .map(|r| (r.name.clone(), r.embedding.clone()))
            .unzip();
        Self { names, encodings }
    }
}

impl StoredGallery {
    fn into_gallery(self) -> Result<Gallery, String> {
        if self.names.len() != self.encodings.len() {
            return Err(format!(
                "{} names but {} encodings",
                self.names.len(),
                self.encodings.len()
            ));
        }
        check_embeddings(&self.encodings)
            .map_err(|(i, reason)| format!("encoding {i}: {reason}"))?;
        Ok(self
            .names
            .into_iter()
            .zip(self.encodings)
            .map(|(name, embedding)| IdentityRecord { name, embedding })
            .collect())
    }
}

/// File-backed persistence for a [`Gallery`].
#[derive(Debug, Clone)]
pub struct GalleryStore {
    path: PathBuf,
}

impl GalleryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the store. A missing file yields an empty gallery.
    pub fn load(&self) -> Result<Gallery, GalleryError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no gallery store; starting empty");
                return Ok(Gallery::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let stored: StoredGallery = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| self.corrupt(e.to_string()))?;
        let gallery = stored.into_gallery().map_err(|reason| self.corrupt(reason))?;

        tracing::info!(
            path = %self.path.display(),
            identities = gallery.len(),
            "gallery loaded"
        );
        Ok(gallery)
    }

    /// Overwrite the store with `gallery` via write-to-temp then rename.
    ///
    /// Refuses galleries that [`load`](Self::load) would reject, leaving the
    /// existing store untouched.
    pub fn save(&self, gallery: &Gallery) -> Result<(), GalleryError> {
        check_embeddings(gallery.iter().map(|r| &r.embedding)).map_err(|(index, reason)| {
            GalleryError::InvalidEmbedding {
                index,
                name: gallery.records()[index].name.clone(),
                reason,
            }
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let tmp_path = self.tmp_path();
        {
            let file = File::create(&tmp_path).map_err(|e| self.io_error(e))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &StoredGallery::from(gallery))
                .map_err(|e| self.io_error(e.into()))?;
            let file = writer
                .into_inner()
                .map_err(|e| self.io_error(e.into_error()))?;
            file.sync_all().map_err(|e| self.io_error(e))?;
        }

        fs::rename(&tmp_path, &self.path).map_err(|e| self.io_error(e))?;

        tracing::debug!(
            path = %self.path.display(),
            identities = gallery.len(),
            "gallery saved"
        );
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn corrupt(&self, reason: String) -> GalleryError {
        GalleryError::StorageCorrupt {
            path: self.path.clone(),
            reason,
        }
    }

    fn io_error(&self, source: std::io::Error) -> GalleryError {
        GalleryError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, values: &[f32]) -> IdentityRecord {
        IdentityRecord::new(name, Embedding::new(values.to_vec()))
    }

    fn store_in(dir: &tempfile::TempDir) -> GalleryStore {
        GalleryStore::new(dir.path().join("face_data.json"))
    }

    #[test]
    fn test_load_missing_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = store_in(&dir).load().unwrap();
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_round_trip_twice_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let original: Gallery = [
            record("Alice", &[0.1, -0.2, 0.30000001]),
            record("Bob", &[1.0e-7, 3.4028235e38, -0.0]),
            record("Alice", &[0.1, -0.2, 0.30000001]),
        ]
        .into_iter()
        .collect();

        store.save(&original).unwrap();
        let first = store.load().unwrap();
        store.save(&first).unwrap();
        let second = store.load().unwrap();

        assert_eq!(first, original);
        assert_eq!(second, original);
    }

    #[test]
    fn test_round_trip_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&Gallery::new()).unwrap();
        assert!(store.path().exists());
        let loaded = store.load().unwrap();
        store.save(&loaded).unwrap();
        assert_eq!(store.load().unwrap(), Gallery::new());
    }

    #[test]
    fn test_on_disk_format_is_parallel_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let gallery: Gallery = [record("Alice", &[1.0, 2.0]), record("Bob", &[3.0, 4.0])]
            .into_iter()
            .collect();
        store.save(&gallery).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["names"], serde_json::json!(["Alice", "Bob"]));
        assert_eq!(raw["encodings"], serde_json::json!([[1.0, 2.0], [3.0, 4.0]]));
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&[record("Alice", &[1.0])].into_iter().collect()).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("face_data.json")]);
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path().join("nested/deeper/face_data.json"));
        store.save(&Gallery::new()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_garbage_store_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), b"\x80\x04\x95 not json").unwrap();
        assert!(matches!(store.load(), Err(GalleryError::StorageCorrupt { .. })));
    }

    #[test]
    fn test_truncated_store_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), br#"{"names":["Alice"],"encodings":[[1.0,"#).unwrap();
        assert!(matches!(store.load(), Err(GalleryError::StorageCorrupt { .. })));
    }

    #[test]
    fn test_mismatched_arrays_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), br#"{"names":["Alice","Bob"],"encodings":[[1.0]]}"#).unwrap();
        match store.load() {
            Err(GalleryError::StorageCorrupt { reason, .. }) => {
                assert!(reason.contains("2 names but 1 encodings"), "{reason}");
            }
            other => panic!("expected StorageCorrupt, got {other:?}"),
        }
    }

    #[test]
    fn test_mixed_embedding_lengths_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(
            store.path(),
            br#"{"names":["Alice","Ghost"],"encodings":[[0.1,0.2],[]]}"#,
        )
        .unwrap();
        assert!(matches!(store.load(), Err(GalleryError::StorageCorrupt { .. })));

        fs::write(
            store.path(),
            br#"{"names":["Alice","Bob"],"encodings":[[0.1,0.2],[0.1,0.2,0.3]]}"#,
        )
        .unwrap();
        match store.load() {
            Err(GalleryError::StorageCorrupt { reason, .. }) => {
                assert!(reason.contains("encoding 1"), "{reason}");
            }
            other => panic!("expected StorageCorrupt, got {other:?}"),
        }
    }

    #[test]
    fn test_save_refuses_non_finite_and_keeps_previous_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let good: Gallery = [record("A", &[0.5])].into_iter().collect();
        store.save(&good).unwrap();

        let bad: Gallery = [record("A", &[0.5]), record("B", &[f32::NAN])]
            .into_iter()
            .collect();
        match store.save(&bad) {
            Err(GalleryError::InvalidEmbedding { index, name, .. }) => {
                assert_eq!((index, name.as_str()), (1, "B"));
            }
            other => panic!("expected InvalidEmbedding, got {other:?}"),
        }
        assert_eq!(store.load().unwrap(), good);
    }

    #[test]
    fn test_save_refuses_mixed_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let bad: Gallery = [record("A", &[0.5, 0.5]), record("B", &[0.5])]
            .into_iter()
            .collect();
        assert!(matches!(store.save(&bad), Err(GalleryError::InvalidEmbedding { index: 1, .. })));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_gallery_dim() {
        assert_eq!(Gallery::new().dim(), None);
        let g: Gallery = [record("A", &[0.1, 0.2, 0.3])].into_iter().collect();
        assert_eq!(g.dim(), Some(3));
    }

    #[test]
    fn test_append_preserves_order() {
        let mut gallery = Gallery::new();
        gallery.append(record("Carol", &[0.0]));
        gallery.append(record("Alice", &[1.0]));
        assert_eq!(gallery.names().collect::<Vec<_>>(), vec!["Carol", "Alice"]);
    }
}
