use serde::{Deserialize, Serialize};

/// Region of a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score for this region.
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Wrap raw values with no model tag.
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance in embedding space. Lower = more similar.
    ///
    /// Callers must only compare embeddings of equal dimension; extra
    /// trailing components of the longer vector are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

/// One recognized person in an image's final match set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonMatch {
    pub person: String,
    /// Linear rescaling of distance into (0, 1], rounded to 3 decimals.
    /// Not a calibrated probability.
    pub confidence: f32,
}

/// Why an image was not matched at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TooManyFaces,
}

/// Per-image recognition result, serialized as the service response body.
///
/// `skipped` and `reason` are omitted unless the face-count guard fired.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageReport {
    pub matches: Vec<PersonMatch>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
}

impl ImageReport {
    pub fn matched(matches: Vec<PersonMatch>) -> Self {
        Self {
            matches,
            skipped: false,
            reason: None,
        }
    }

    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            matches: Vec::new(),
            skipped: true,
            reason: Some(reason),
        }
    }
}
