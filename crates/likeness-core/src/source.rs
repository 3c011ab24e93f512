//! Embedding source: turns a decoded image into per-face embeddings.
//!
//! Detection and embedding are separate steps so callers can bound the
//! number of faces before paying for embedding extraction.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Embedding, FaceRegion};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// SCRFD detection model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Produces fixed-dimension, metric-compatible face embeddings.
///
/// An image without faces yields an empty list, never an error.
pub trait EmbeddingSource {
    /// Locate faces, most confident first.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, SourceError>;

    /// Extract the embedding for one detected face.
    fn embed(&mut self, image: &RgbImage, face: &FaceRegion) -> Result<Embedding, SourceError>;

    /// Embed already detected faces. Faces whose embedding fails are logged
    /// and left out, so one bad crop never fails the whole image.
    fn embed_faces(
        &mut self,
        image: &RgbImage,
        faces: Vec<FaceRegion>,
    ) -> Vec<(FaceRegion, Embedding)> {
        let mut out = Vec::with_capacity(faces.len());
        for face in faces {
            match self.embed(image, &face) {
                Ok(embedding) => out.push((face, embedding)),
                Err(e) => tracing::warn!(error = %e, "embedding extraction failed for one face"),
            }
        }
        out
    }

    /// Detect every face and embed each one; only a detection failure fails
    /// the whole image.
    fn detect_and_embed(
        &mut self,
        image: &RgbImage,
    ) -> Result<Vec<(FaceRegion, Embedding)>, SourceError> {
        let faces = self.detect(image)?;
        Ok(self.embed_faces(image, faces))
    }
}

/// Decode image bytes of any supported format into RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, SourceError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// SCRFD + ArcFace embedding source backed by ONNX Runtime.
pub struct OnnxEmbeddingSource {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEmbeddingSource {
    /// Load both models from `model_dir`. Fails if either file is missing.
    pub fn load(model_dir: &Path, intra_threads: usize) -> Result<Self, SourceError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE), intra_threads)?;
        let recognizer =
            FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE), intra_threads)?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl EmbeddingSource for OnnxEmbeddingSource {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, SourceError> {
        Ok(self.detector.detect(image)?)
    }

    fn embed(&mut self, image: &RgbImage, face: &FaceRegion) -> Result<Embedding, SourceError> {
        Ok(self.recognizer.extract(image, face)?)
    }
}

/// Test source: every non-black pixel of the first row is one face, and its
/// embedding is the pixel's RGB scaled to [0, 1].
#[cfg(test)]
pub(crate) struct PixelSource;

#[cfg(test)]
impl EmbeddingSource for PixelSource {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, SourceError> {
        Ok((0..image.width())
            .filter(|&x| image.get_pixel(x, 0).0 != [0, 0, 0])
            .map(|x| FaceRegion {
                x: x as f32,
                y: 0.0,
                width: 1.0,
                height: 1.0,
                confidence: 1.0,
                landmarks: None,
            })
            .collect())
    }

    fn embed(&mut self, image: &RgbImage, face: &FaceRegion) -> Result<Embedding, SourceError> {
        let px = image.get_pixel(face.x as u32, 0).0;
        Ok(Embedding::new(px.iter().map(|&c| c as f32 / 255.0).collect()))
    }
}
