use crate::gallery::Gallery;
use crate::types::Embedding;

/// Closest identity for one probe face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult<'g> {
    /// `None` only when the gallery is empty.
    pub identity: Option<&'g str>,
    /// Distance to the identity's closest reference sample; infinite when `identity` is `None`.
    pub distance: f32,
}

impl MatchResult<'_> {
    pub fn none() -> Self {
        MatchResult {
            identity: None,
            distance: f32::INFINITY,
        }
    }
}

/// Strategy for finding the best gallery identity for a probe embedding.
pub trait Matcher {
    fn best_match<'g>(&self, probe: &Embedding, gallery: &'g Gallery) -> MatchResult<'g>;
}

/// Linear-scan Euclidean matcher.
///
/// An identity scores its closest reference sample; the identity with the
/// smallest such distance wins. On exactly equal distances the identity that
/// comes first in gallery order (by name) wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match<'g>(&self, probe: &Embedding, gallery: &'g Gallery) -> MatchResult<'g> {
        let mut best = MatchResult::none();

        for (identity, references) in gallery.all_identities() {
            let min_distance = references
                .iter()
                .map(|r| probe.euclidean_distance(r))
                .fold(f32::INFINITY, f32::min);

            if min_distance < best.distance {
                best = MatchResult {
                    identity: Some(identity),
                    distance: min_distance,
                };
            }
        }

        best
    }
}
