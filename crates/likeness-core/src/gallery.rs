//! Immutable reference gallery of known identities.
//!
//! Built once at startup, then shared read-only across requests. Identities
//! are kept in lexicographic order so that matching ties resolve the same way
//! on every filesystem.

use crate::source::{EmbeddingSource, SourceError};
use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Reference image extensions accepted by the loader (compared case-insensitively).
const REFERENCE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("embedding has {actual} dimensions, gallery uses {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("empty embedding")]
    EmptyEmbedding,
}

/// Mapping from identity to its reference embeddings. Never mutated after build.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    identities: BTreeMap<String, Vec<Embedding>>,
    dimension: Option<usize>,
}

/// Counts reported by the health endpoint and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GallerySummary {
    pub people_loaded: Vec<String>,
    pub total_encodings: usize,
}

impl Gallery {
    pub fn builder() -> GalleryBuilder {
        GalleryBuilder::default()
    }

    /// Every identity with its ordered reference embeddings, in name order.
    pub fn all_identities(&self) -> impl Iterator<Item = (&str, &[Embedding])> {
        self.identities
            .iter()
            .map(|(name, refs)| (name.as_str(), refs.as_slice()))
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn total_embeddings(&self) -> usize {
        self.identities.values().map(Vec::len).sum()
    }

    /// Dimensionality shared by every reference embedding, if any are loaded.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn summary(&self) -> GallerySummary {
        GallerySummary {
            people_loaded: self.identities.keys().cloned().collect(),
            total_encodings: self.total_embeddings(),
        }
    }
}

/// Accumulates reference embeddings; identities without embeddings never reach the gallery.
#[derive(Debug, Default)]
pub struct GalleryBuilder {
    identities: BTreeMap<String, Vec<Embedding>>,
    dimension: Option<usize>,
}

impl GalleryBuilder {
    /// Add one reference embedding for `identity`.
    ///
    /// The first embedding fixes the gallery dimension; later ones must match it.
    pub fn add(&mut self, identity: &str, embedding: Embedding) -> Result<(), GalleryError> {
        let actual = embedding.dimension();
        if actual == 0 {
            return Err(GalleryError::EmptyEmbedding);
        }
        match self.dimension {
            Some(expected) if expected != actual => {
                return Err(GalleryError::DimensionMismatch { expected, actual });
            }
            Some(_) => {}
            None => self.dimension = Some(actual),
        }
        self.identities
            .entry(identity.to_string())
            .or_default()
            .push(embedding);
        Ok(())
    }

    pub fn build(self) -> Gallery {
        let identities = self
            .identities
            .into_iter()
            .filter(|(_, refs)| !refs.is_empty())
            .collect::<BTreeMap<_, _>>();
        let dimension = if identities.is_empty() {
            None
        } else {
            self.dimension
        };
        Gallery {
            identities,
            dimension,
        }
    }
}

/// Build the gallery from `root/<identity>/<image>`.
///
/// Never fails: a missing root yields an empty gallery, and unreadable images,
/// faceless images and identities with no usable embedding are logged and
/// skipped. When a reference image holds several faces only the first
/// (most confident) one is kept.
pub fn load_gallery<S: EmbeddingSource>(root: &Path, source: &mut S) -> Gallery {
    tracing::info!(root = %root.display(), "loading reference faces");

    let mut builder = Gallery::builder();

    let person_dirs = match sorted_entries(root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(root = %root.display(), error = %e, "reference faces directory not readable; gallery is empty");
            return builder.build();
        }
    };

    for person_dir in person_dirs.into_iter().filter(|p| p.is_dir()) {
        let Some(person) = person_dir.file_name().and_then(|n| n.to_str()) else {
            tracing::warn!(path = %person_dir.display(), "skipping non UTF-8 identity directory");
            continue;
        };

        let images = match sorted_entries(&person_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(person, error = %e, "cannot list reference images");
                continue;
            }
        };

        let mut loaded = 0usize;
        for path in images.into_iter().filter(|p| is_reference_image(p)) {
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match reference_embedding(&path, source) {
                Ok(Some(embedding)) => match builder.add(person, embedding) {
                    Ok(()) => {
                        loaded += 1;
                        tracing::info!(person, file = %file, "loaded reference face");
                    }
                    Err(e) => tracing::error!(person, file = %file, error = %e, "rejected reference embedding"),
                },
                Ok(None) => tracing::warn!(person, file = %file, "no face found in reference image"),
                Err(e) => tracing::error!(person, file = %file, error = %e, "error loading reference image"),
            }
        }

        if loaded > 0 {
            tracing::info!(person, encodings = loaded, "identity loaded");
        } else {
            tracing::warn!(person, "no valid face encodings for identity; dropped");
        }
    }

    let gallery = builder.build();
    tracing::info!(
        people = gallery.len(),
        encodings = gallery.total_embeddings(),
        "reference gallery ready"
    );
    gallery
}

/// Embed the first detected face of one reference image, or `None` if it has no face.
fn reference_embedding<S: EmbeddingSource>(
    path: &Path,
    source: &mut S,
) -> Result<Option<Embedding>, SourceError> {
    let image = image::open(path)?.to_rgb8();
    let faces = source.detect(&image)?;
    match faces.first() {
        Some(face) => Ok(Some(source.embed(&image, face)?)),
        None => Ok(None),
    }
}

fn sorted_entries(dir: &Path) -> std::io::Result<Vec<std::path::PathBuf>> {
    let mut paths = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    paths.sort();
    Ok(paths)
}

fn is_reference_image(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                REFERENCE_EXTENSIONS
                    .iter()
                    .any(|allowed| ext.eq_ignore_ascii_case(allowed))
            })
}
