//! Deterministic 0–100 walkability score.
//!
//! Each category contributes `weight * (1 - e^(-density / SATURATION))`, where
//! density sums a distance decay over the category's places (full credit
//! within [`FULL_CREDIT_M`], linear falloff to zero at [`ZERO_CREDIT_M`]).
//! Contributions are normalised against the default category catalogue and
//! scaled to 90 points; the remaining 10 reward category diversity. Adding a
//! place or a category never lowers the score.

use crate::models::job::{AmenityMap, Coordinates};

const FULL_CREDIT_M: f64 = 400.0;
const ZERO_CREDIT_M: f64 = 1600.0;
const SATURATION: f64 = 3.0;
const DENSITY_POINTS: f64 = 90.0;
const DIVERSITY_POINTS: f64 = 10.0;
const DIVERSITY_TARGET: usize = 6;
const UNKNOWN_CATEGORY_WEIGHT: f64 = 0.5;

const CATEGORY_WEIGHTS: [(&str, f64); 6] = [
    ("supermarket", 3.0),
    ("restaurant", 2.0),
    ("school", 2.0),
    ("park", 2.0),
    ("cafe", 1.5),
    ("hospital", 1.0),
];

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ScoreError {
    #[error("invalid origin coordinate ({0}, {1})")]
    InvalidOrigin(f64, f64),

    #[error("invalid distance {distance} for a place in category {category}")]
    InvalidDistance { category: String, distance: f64 },
}

fn category_weight(category: &str) -> f64 {
    CATEGORY_WEIGHTS
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, w)| *w)
        .unwrap_or(UNKNOWN_CATEGORY_WEIGHT)
}

fn distance_decay(distance_m: f64) -> f64 {
    if distance_m <= FULL_CREDIT_M {
        1.0
    } else {
        (1.0 - (distance_m - FULL_CREDIT_M) / (ZERO_CREDIT_M - FULL_CREDIT_M)).max(0.0)
    }
}

/// Score an origin by the amenities around it, rounded to one decimal.
pub fn walk_score(origin: Coordinates, amenities: &AmenityMap) -> Result<f64, ScoreError> {
    if !origin.is_valid() {
        return Err(ScoreError::InvalidOrigin(origin.latitude, origin.longitude));
    }

    let catalogue_weight: f64 = CATEGORY_WEIGHTS.iter().map(|(_, w)| w).sum();
    let mut weighted = 0.0;
    let mut represented = 0usize;

    for (category, places) in amenities {
        let mut density = 0.0;
        for place in places {
            if !place.distance_m.is_finite() || place.distance_m < 0.0 {
                return Err(ScoreError::InvalidDistance {
                    category: category.clone(),
                    distance: place.distance_m,
                });
            }
            density += distance_decay(place.distance_m);
        }
        if density > 0.0 {
            represented += 1;
        }
        weighted += category_weight(category) * (1.0 - (-density / SATURATION).exp());
    }

    let density_points = DENSITY_POINTS * (weighted / catalogue_weight).min(1.0);
    let diversity_points =
        DIVERSITY_POINTS * (represented.min(DIVERSITY_TARGET) as f64 / DIVERSITY_TARGET as f64);
    let score = (density_points + diversity_points).clamp(0.0, 100.0);

    Ok((score * 10.0).round() / 10.0)
}
