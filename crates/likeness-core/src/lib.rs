//! likeness-core: Known-person matching for face embeddings.
//!
//! Holds the immutable reference gallery, the nearest-identity matcher and the
//! decision engine that turns per-face distances into one deduplicated match
//! set per image. Embeddings come from an [`EmbeddingSource`]; the bundled
//! [`OnnxEmbeddingSource`] runs SCRFD detection and ArcFace recognition on CPU.

pub mod alignment;
pub mod decision;
pub mod detector;
pub mod gallery;
pub mod matcher;
pub mod recognizer;
pub mod source;
pub mod types;

pub use decision::{DecisionEngine, MatchPolicy};
pub use gallery::{load_gallery, Gallery, GallerySummary};
pub use matcher::{EuclideanMatcher, MatchResult, Matcher};
pub use source::{decode_image, EmbeddingSource, OnnxEmbeddingSource, SourceError};
pub use types::{Embedding, FaceRegion, ImageReport, PersonMatch, SkipReason};
