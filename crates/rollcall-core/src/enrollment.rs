//! Operator-confirmed enrollment of unknown faces.
//!
//! Runs synchronously inside the frame loop: while the operator is typing a
//! name, no frames are captured or rendered.

use crate::gallery::{Gallery, GalleryError, GalleryStore};
use crate::types::{Embedding, IdentityRecord};
use chrono::{DateTime, Local};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SNAPSHOT_EXTENSION: &str = "jpg";

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("label prompt failed: {0}")]
    Prompt(#[source] std::io::Error),
    #[error("gallery store: {0}")]
    Storage(#[from] GalleryError),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("cannot create archive directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Blocking source of operator-supplied labels.
pub trait LabelPrompt {
    /// Ask for a name for the face currently on screen. May block indefinitely.
    fn ask(&mut self) -> std::io::Result<String>;
}

impl<P: LabelPrompt + ?Sized> LabelPrompt for &mut P {
    fn ask(&mut self) -> std::io::Result<String> {
        (**self).ask()
    }
}

/// Write-only directory of full-frame snapshots, one per enrollment.
#[derive(Debug, Clone)]
pub struct SnapshotArchive {
    dir: PathBuf,
}

impl SnapshotArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a snapshot for `label` taken at `at` is written to.
    pub fn snapshot_path(&self, label: &str, at: DateTime<Local>) -> PathBuf {
        let stem: String = label
            .chars()
            .map(|c| if std::path::is_separator(c) { '_' } else { c })
            .collect();
        self.dir.join(format!(
            "{stem}_{}.{SNAPSHOT_EXTENSION}",
            at.format("%Y%m%d_%H%M%S")
        ))
    }

    pub fn write(
        &self,
        frame: &RgbImage,
        label: &str,
        at: DateTime<Local>,
    ) -> Result<PathBuf, ArchiveError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| ArchiveError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.snapshot_path(label, at);
        frame.save(&path).map_err(|source| ArchiveError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Outcome of one enrollment attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Enrollment {
    Enrolled {
        name: String,
        /// `None` when the snapshot could not be written.
        snapshot: Option<PathBuf>,
    },
    /// Empty or whitespace-only label: nothing appended, nothing persisted.
    Skipped,
    /// Embedding unusable for the gallery (non-finite, or wrong dimension);
    /// the operator is not asked.
    Rejected,
}

/// Prompts for a label, appends to the gallery, archives the frame and persists.
pub struct EnrollmentFlow<P> {
    prompt: P,
    archive: SnapshotArchive,
    store: GalleryStore,
}

impl<P: LabelPrompt> EnrollmentFlow<P> {
    pub fn new(prompt: P, archive: SnapshotArchive, store: GalleryStore) -> Self {
        Self {
            prompt,
            archive,
            store,
        }
    }

    pub fn store(&self) -> &GalleryStore {
        &self.store
    }

    /// Enroll the face behind `embedding`, seen in the full-resolution `frame`.
    ///
    /// Side effects happen in order: in-memory append, snapshot, store save.
    /// A snapshot failure is logged and does not stop the save.
    pub fn enroll(
        &mut self,
        gallery: &mut Gallery,
        frame: &RgbImage,
        embedding: Embedding,
    ) -> Result<Enrollment, EnrollError> {
        if embedding.dim() == 0 || !embedding.is_finite() {
            tracing::warn!(dim = embedding.dim(), "unusable embedding; not enrolling");
            return Ok(Enrollment::Rejected);
        }
        if let Some(dim) = gallery.dim().filter(|&d| d != embedding.dim()) {
            tracing::warn!(
                expected = dim,
                got = embedding.dim(),
                "embedding dimension differs from gallery; not enrolling"
            );
            return Ok(Enrollment::Rejected);
        }

        let answer = self.prompt.ask().map_err(EnrollError::Prompt)?;
        let name = answer.trim();
        if name.is_empty() {
            tracing::debug!("empty label; face left unenrolled");
            return Ok(Enrollment::Skipped);
        }

        gallery.append(IdentityRecord::new(name, embedding));

        let snapshot = match self.archive.write(frame, name, Local::now()) {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::warn!(error = %err, name, "snapshot write failed; enrolling anyway");
                None
            }
        };

        self.store.save(gallery)?;

        tracing::info!(
            name,
            identities = gallery.len(),
            snapshot = ?snapshot,
            "registered new face"
        );

        Ok(Enrollment::Enrolled {
            name: name.to_string(),
            snapshot,
        })
    }
}
