//! Decision engine: turns per-face matches into one image's final match set.
//!
//! Per request: detect faces, refuse crowds above the face cap, embed, match
//! each face against the gallery, keep matches under the distance threshold,
//! then keep one entry per person (the most confident one).

use crate::gallery::Gallery;
use crate::matcher::{EuclideanMatcher, MatchResult, Matcher};
use crate::source::{EmbeddingSource, SourceError};
use crate::types::{Embedding, ImageReport, PersonMatch, SkipReason};
use image::RgbImage;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;
pub const DEFAULT_MAX_FACES: usize = 50;

/// Acceptance threshold and face-count cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    /// Distance cutoff; a match is accepted only strictly below it.
    pub confidence_threshold: f32,
    /// Images with more detected faces than this are skipped unmatched.
    pub max_faces: usize,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_faces: DEFAULT_MAX_FACES,
        }
    }
}

/// A match that passed the threshold, before per-person deduplication.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptedMatch<'g> {
    pub person: &'g str,
    pub distance: f32,
    pub confidence: f32,
}

/// Linear rescaling of distance: 1.0 at distance 0, approaching 0 at the threshold.
///
/// Monotonically decreasing in distance. This is not a probability.
pub fn confidence(distance: f32, threshold: f32) -> f32 {
    1.0 - distance / threshold
}

/// Round to 3 decimal places for the response body.
pub fn round_confidence(confidence: f32) -> f32 {
    (confidence * 1000.0).round() / 1000.0
}

/// Keep one match per person: the strictly most confident, first seen on ties.
/// Output follows first-appearance order of each person.
pub fn deduplicate<'g>(matches: impl IntoIterator<Item = AcceptedMatch<'g>>) -> Vec<AcceptedMatch<'g>> {
    let mut unique: Vec<AcceptedMatch<'g>> = Vec::new();
    for m in matches {
        match unique.iter_mut().find(|u| u.person == m.person) {
            Some(existing) if m.confidence > existing.confidence => *existing = m,
            Some(_) => {}
            None => unique.push(m),
        }
    }
    unique
}

pub struct DecisionEngine<M = EuclideanMatcher> {
    policy: MatchPolicy,
    matcher: M,
}

impl DecisionEngine<EuclideanMatcher> {
    pub fn new(policy: MatchPolicy) -> Self {
        Self::with_matcher(policy, EuclideanMatcher)
    }
}

impl<M: Matcher> DecisionEngine<M> {
    pub fn with_matcher(policy: MatchPolicy, matcher: M) -> Self {
        Self { policy, matcher }
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    /// Accept a raw match only if it names an identity strictly under the threshold.
    pub fn accept<'g>(&self, result: MatchResult<'g>) -> Option<AcceptedMatch<'g>> {
        let threshold = self.policy.confidence_threshold;
        match result.identity {
            Some(person) if result.distance < threshold => Some(AcceptedMatch {
                person,
                distance: result.distance,
                confidence: confidence(result.distance, threshold),
            }),
            _ => None,
        }
    }

    /// Final match set for already-extracted probe embeddings of one image.
    ///
    /// Performs no distance computation at all when the face cap is exceeded.
    pub fn decide(&self, probes: &[Embedding], gallery: &Gallery) -> ImageReport {
        if probes.len() > self.policy.max_faces {
            tracing::warn!(
                faces = probes.len(),
                max = self.policy.max_faces,
                "skipping image with too many faces"
            );
            return ImageReport::skipped(SkipReason::TooManyFaces);
        }

        let accepted = probes.iter().filter_map(|probe| {
            if let Some(expected) = gallery.dimension() {
                if probe.dimension() != expected {
                    tracing::warn!(
                        expected,
                        actual = probe.dimension(),
                        "probe embedding dimension mismatch; face ignored"
                    );
                    return None;
                }
            }
            let result = self.matcher.best_match(probe, gallery);
            let accepted = self.accept(result);
            match &accepted {
                Some(m) => tracing::info!(
                    person = m.person,
                    distance = m.distance,
                    confidence = m.confidence,
                    "match found"
                ),
                None => tracing::debug!(distance = result.distance, "face not recognized"),
            }
            accepted
        });

        let matches = deduplicate(accepted)
            .into_iter()
            .map(|m| PersonMatch {
                person: m.person.to_string(),
                confidence: round_confidence(m.confidence),
            })
            .collect();

        ImageReport::matched(matches)
    }

    /// Full per-image pipeline: detect, guard, embed, decide.
    ///
    /// Only a detection failure fails the image; a face whose embedding
    /// fails is logged and left out.
    pub fn recognize<S: EmbeddingSource>(
        &self,
        source: &mut S,
        image: &RgbImage,
        gallery: &Gallery,
    ) -> Result<ImageReport, SourceError> {
        let faces = source.detect(image)?;

        if faces.is_empty() {
            tracing::info!("no faces detected in image");
            return Ok(ImageReport::default());
        }
        tracing::info!(faces = faces.len(), "detected faces in image");

        if faces.len() > self.policy.max_faces {
            tracing::warn!(
                faces = faces.len(),
                max = self.policy.max_faces,
                "skipping image with too many faces"
            );
            return Ok(ImageReport::skipped(SkipReason::TooManyFaces));
        }

        // Faces are embedded only once the count guard has passed.
        let probes: Vec<Embedding> = source
            .embed_faces(image, faces)
            .into_iter()
            .map(|(_, embedding)| embedding)
            .collect();

        Ok(self.decide(&probes, gallery))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PixelSource;
    use crate::types::FaceRegion;
    use image::Rgb;
    use std::cell::Cell;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    /// alice at the origin, bob with two references far away.
    fn alice_bob() -> Gallery {
        let mut b = Gallery::builder();
        b.add("alice", emb(&[0.0, 0.0])).unwrap();
        b.add("bob", emb(&[5.0, 0.0])).unwrap();
        b.add("bob", emb(&[0.0, 5.0])).unwrap();
        b.build()
    }

    /// Counts every identity comparison it performs.
    struct CountingMatcher<'a> {
        calls: &'a Cell<usize>,
    }

    impl Matcher for CountingMatcher<'_> {
        fn best_match<'g>(&self, probe: &Embedding, gallery: &'g Gallery) -> MatchResult<'g> {
            self.calls.set(self.calls.get() + gallery.total_embeddings());
            EuclideanMatcher.best_match(probe, gallery)
        }
    }

    #[test]
    fn test_confidence_endpoints() {
        assert_eq!(confidence(0.0, 0.6), 1.0);
        assert!((confidence(0.3, 0.6) - 0.5).abs() < 1e-6);
        assert!(confidence(0.5999, 0.6) > 0.0);
    }

    #[test]
    fn test_confidence_monotonic_and_bounded() {
        let threshold = 0.6;
        let mut prev = f32::INFINITY;
        for i in 0..600 {
            let d = i as f32 * 0.001;
            let c = confidence(d, threshold);
            assert!(c > 0.0 && c <= 1.0, "confidence {c} at distance {d}");
            assert!(c < prev);
            prev = c;
        }
    }

    #[test]
    fn test_round_confidence() {
        assert_eq!(round_confidence(0.12345), 0.123);
        assert_eq!(round_confidence(0.9996), 1.0);
        assert_eq!(round_confidence(0.5), 0.5);
    }

    #[test]
    fn test_accept_is_strict_at_threshold() {
        let engine = DecisionEngine::new(MatchPolicy::default());
        let at = MatchResult {
            identity: Some("alice"),
            distance: 0.6,
        };
        assert_eq!(engine.accept(at), None);

        let under = MatchResult {
            identity: Some("alice"),
            distance: 0.59,
        };
        assert_eq!(engine.accept(under).map(|m| m.person), Some("alice"));
    }

    #[test]
    fn test_accept_rejects_empty_gallery_result() {
        let engine = DecisionEngine::new(MatchPolicy::default());
        assert_eq!(engine.accept(MatchResult::none()), None);
    }

    #[test]
    fn test_deduplicate_keeps_most_confident() {
        let m = |person, confidence| AcceptedMatch {
            person,
            distance: 0.0,
            confidence,
        };
        let out = deduplicate(vec![
            m("alice", 0.25),
            m("bob", 0.4),
            m("alice", 0.5),
            m("alice", 0.5),
            m("bob", 0.1),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].person, out[0].confidence), ("alice", 0.5));
        assert_eq!((out[1].person, out[1].confidence), ("bob", 0.4));
    }

    #[test]
    fn test_deduplicate_tie_keeps_first() {
        let out = deduplicate(vec![
            AcceptedMatch { person: "alice", distance: 0.1, confidence: 0.5 },
            AcceptedMatch { person: "alice", distance: 0.2, confidence: 0.5 },
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].distance, 0.1);
    }

    #[test]
    fn test_exact_reference_yields_full_confidence() {
        let engine = DecisionEngine::new(MatchPolicy::default());
        let report = engine.decide(&[emb(&[0.0, 0.0])], &alice_bob());
        assert_eq!(
            report,
            ImageReport::matched(vec![PersonMatch {
                person: "alice".into(),
                confidence: 1.0,
            }])
        );
    }

    #[test]
    fn test_two_faces_same_person_collapse() {
        let engine = DecisionEngine::new(MatchPolicy::default());
        let report = engine.decide(&[emb(&[0.45, 0.0]), emb(&[0.0, 0.3])], &alice_bob());
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].person, "alice");
        assert!((report.matches[0].confidence - 0.5).abs() < 1e-6);
        assert!(!report.skipped);
    }

    #[test]
    fn test_distinct_people_both_reported() {
        let engine = DecisionEngine::new(MatchPolicy::default());
        let report = engine.decide(&[emb(&[0.0, 0.0]), emb(&[0.0, 4.7])], &alice_bob());
        let people: Vec<&str> = report.matches.iter().map(|m| m.person.as_str()).collect();
        assert_eq!(people, ["alice", "bob"]);
        assert!((report.matches[1].confidence - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_distance_at_threshold_rejected() {
        let engine = DecisionEngine::new(MatchPolicy::default());
        let report = engine.decide(&[emb(&[0.6, 0.0])], &alice_bob());
        assert!(report.matches.is_empty());
    }

    #[test]
    fn test_barely_accepted_match_rounds_to_zero_confidence() {
        // 1 - 0.5998 / 0.6 is about 0.00033, which rounds to 0.0 at three decimals.
        let engine = DecisionEngine::new(MatchPolicy::default());
        let report = engine.decide(&[emb(&[0.5998, 0.0])], &alice_bob());
        assert_eq!(
            report,
            ImageReport::matched(vec![PersonMatch {
                person: "alice".into(),
                confidence: 0.0,
            }])
        );
    }

    #[test]
    fn test_empty_gallery_never_matches() {
        let engine = DecisionEngine::new(MatchPolicy::default());
        let report = engine.decide(&[emb(&[0.0, 0.0])], &Gallery::default());
        assert_eq!(report, ImageReport::default());
    }

    #[test]
    fn test_dimension_mismatch_probe_ignored() {
        let engine = DecisionEngine::new(MatchPolicy::default());
        let report = engine.decide(&[emb(&[0.0, 0.0, 0.0]), emb(&[0.0, 0.1])], &alice_bob());
        assert_eq!(report.matches.len(), 1);
    }

    #[test]
    fn test_guard_skips_without_distance_computations() {
        let calls = Cell::new(0);
        let policy = MatchPolicy {
            max_faces: 2,
            ..MatchPolicy::default()
        };
        let engine = DecisionEngine::with_matcher(policy, CountingMatcher { calls: &calls });
        let probes = vec![emb(&[0.0, 0.0]); 3];

        let report = engine.decide(&probes, &alice_bob());
        assert_eq!(report, ImageReport::skipped(SkipReason::TooManyFaces));
        assert_eq!(calls.get(), 0);

        // At the cap, matching still runs.
        let report = engine.decide(&probes[..2], &alice_bob());
        assert_eq!(report.matches.len(), 1);
        assert_eq!(calls.get(), 6);
    }

    fn row_image(pixels: &[[u8; 3]]) -> RgbImage {
        let mut img = RgbImage::new(pixels.len() as u32, 1);
        for (x, px) in pixels.iter().enumerate() {
            img.put_pixel(x as u32, 0, Rgb(*px));
        }
        img
    }

    fn rgb_gallery() -> Gallery {
        let mut b = Gallery::builder();
        b.add("red", emb(&[1.0, 0.0, 0.0])).unwrap();
        b.add("blue", emb(&[0.0, 0.0, 1.0])).unwrap();
        b.build()
    }

    #[test]
    fn test_recognize_no_faces() {
        let engine = DecisionEngine::new(MatchPolicy::default());
        let img = row_image(&[[0, 0, 0], [0, 0, 0]]);
        let report = engine.recognize(&mut PixelSource, &img, &rgb_gallery()).unwrap();
        assert_eq!(report, ImageReport::default());
        assert!(!report.skipped);
    }

    #[test]
    fn test_recognize_matches_and_dedups() {
        let engine = DecisionEngine::new(MatchPolicy::default());
        let img = row_image(&[[255, 0, 0], [0, 0, 0], [230, 0, 0], [0, 0, 255]]);
        let report = engine.recognize(&mut PixelSource, &img, &rgb_gallery()).unwrap();

        let people: Vec<&str> = report.matches.iter().map(|m| m.person.as_str()).collect();
        assert_eq!(people, ["red", "blue"]);
        assert_eq!(report.matches[0].confidence, 1.0);
        assert_eq!(report.matches[1].confidence, 1.0);
    }

    #[test]
    fn test_recognize_guard_skips_before_embedding() {
        struct NoEmbed;
        impl EmbeddingSource for NoEmbed {
            fn detect(&mut self, _: &RgbImage) -> Result<Vec<FaceRegion>, SourceError> {
                Ok(vec![
                    FaceRegion {
                        x: 0.0,
                        y: 0.0,
                        width: 1.0,
                        height: 1.0,
                        confidence: 0.9,
                        landmarks: None,
                    };
                    4
                ])
            }
            fn embed(&mut self, _: &RgbImage, _: &FaceRegion) -> Result<Embedding, SourceError> {
                panic!("embedding must not run for skipped images");
            }
        }

        let engine = DecisionEngine::new(MatchPolicy {
            max_faces: 3,
            ..MatchPolicy::default()
        });
        let report = engine
            .recognize(&mut NoEmbed, &RgbImage::new(1, 1), &rgb_gallery())
            .unwrap();
        assert_eq!(report, ImageReport::skipped(SkipReason::TooManyFaces));
    }

    #[test]
    fn test_recognize_embed_failure_drops_face_only() {
        struct FlakySource;
        impl EmbeddingSource for FlakySource {
            fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, SourceError> {
                PixelSource.detect(image)
            }
            fn embed(&mut self, image: &RgbImage, face: &FaceRegion) -> Result<Embedding, SourceError> {
                if face.x == 0.0 {
                    return Err(SourceError::Recognizer(
                        crate::recognizer::RecognizerError::NoLandmarks,
                    ));
                }
                PixelSource.embed(image, face)
            }
        }

        let engine = DecisionEngine::new(MatchPolicy::default());
        let img = row_image(&[[255, 0, 0], [0, 0, 255]]);
        let report = engine.recognize(&mut FlakySource, &img, &rgb_gallery()).unwrap();
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].person, "blue");
    }

    #[test]
    fn test_recognize_detection_failure_propagates() {
        struct Broken;
        impl EmbeddingSource for Broken {
            fn detect(&mut self, _: &RgbImage) -> Result<Vec<FaceRegion>, SourceError> {
                Err(SourceError::Detector(crate::detector::DetectorError::InferenceFailed(
                    "boom".into(),
                )))
            }
            fn embed(&mut self, _: &RgbImage, _: &FaceRegion) -> Result<Embedding, SourceError> {
                unreachable!()
            }
        }

        let engine = DecisionEngine::new(MatchPolicy::default());
        assert!(engine
            .recognize(&mut Broken, &RgbImage::new(1, 1), &rgb_gallery())
            .is_err());
    }
}
