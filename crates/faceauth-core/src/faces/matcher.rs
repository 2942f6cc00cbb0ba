use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::faces::gallery::{Gallery, GallerySnapshot};

/// Distances closer than this are treated as equal.
pub const TIE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MatchScore {
    pub name: String,
    pub distance: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(MatchScore),
    NoMatch { best: Option<MatchScore> },
}

impl MatchOutcome {
    pub fn matched(&self) -> Option<&MatchScore> {
        match self {
            MatchOutcome::Matched(score) => Some(score),
            MatchOutcome::NoMatch { .. } => None,
        }
    }
}

pub struct MatchEngine {
    gallery: Arc<Gallery>,
    threshold: f64,
}

impl MatchEngine {
    pub fn new(gallery: Arc<Gallery>, threshold: f64) -> Self {
        Self {
            gallery,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn authenticate(&self, probe: &[f64]) -> AppResult<MatchOutcome> {
        let snapshot = self.gallery.snapshot();
        match_against(&snapshot, probe, self.threshold)
    }
}

/// Nearest-neighbour search over one snapshot.
pub fn match_against(
    snapshot: &GallerySnapshot,
    probe: &[f64],
    threshold: f64,
) -> AppResult<MatchOutcome> {
    if snapshot.is_empty() {
        debug!("gallery empty; no match");
        return Ok(MatchOutcome::NoMatch { best: None });
    }
    if let Some(expected) = snapshot.dimension() {
        if expected != probe.len() {
            return Err(AppError::DimensionMismatch {
                expected,
                found: probe.len(),
            });
        }
    }

    let mut best: Option<(f64, &str)> = None;
    for entry in snapshot.entries() {
        let distance = euclidean_distance(probe, &entry.vector);
        let closer = match best {
            None => true,
            Some((best_distance, best_name)) => {
                if (distance - best_distance).abs() <= TIE_TOLERANCE {
                    entry.name.as_str().cmp(best_name) == Ordering::Less
                } else {
                    distance < best_distance
                }
            }
        };
        if closer {
            best = Some((distance, entry.name.as_str()));
        }
    }

    let Some((distance, name)) = best else {
        return Ok(MatchOutcome::NoMatch { best: None });
    };
    let score = MatchScore {
        name: name.to_string(),
        distance,
        confidence: confidence_from_distance(distance),
    };
    debug!(
        name = %score.name,
        distance = score.distance,
        confidence = score.confidence,
        threshold,
        "best gallery candidate"
    );

    if score.confidence >= threshold {
        Ok(MatchOutcome::Matched(score))
    } else {
        Ok(MatchOutcome::NoMatch { best: Some(score) })
    }
}

pub fn confidence_from_distance(distance: f64) -> f64 {
    if !(0.0..=1.0).contains(&distance) {
        warn!(
            distance,
            "distance outside the normalized [0, 1] range; confidence clamped"
        );
    }
    (1.0 - distance).clamp(0.0, 1.0)
}

pub fn euclidean_distance(lhs: &[f64], rhs: &[f64]) -> f64 {
    lhs.iter()
        .zip(rhs.iter())
        .map(|(l, r)| (l - r) * (l - r))
        .sum::<f64>()
        .sqrt()
}
