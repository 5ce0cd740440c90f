//! Nearby points of interest around a geocoded address.
//!
//! [`AmenityLocator`] combines a [`Geocoder`] with an [`AmenitySource`]: it
//! resolves the origin coordinate, queries each requested category within the
//! search radius and annotates every place with its great-circle distance from
//! the origin. Places come back grouped by category, nearest first.
//!
//! Geocoding and search failures come back as typed errors so the caller
//! decides which of them end a run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::models::job::{AmenityMap, Coordinates, PointOfInterest};
use crate::services::geocoder::{GeocodeError, Geocoder};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Places kept per category after sorting by distance.
pub const MAX_PLACES_PER_CATEGORY: usize = 25;

/// A place returned by an amenity provider, before distance annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub category: String,
    pub name: Option<String>,
    pub coordinates: Coordinates,
}

#[async_trait]
pub trait AmenitySource: Send + Sync {
    /// Places matching any of `categories` within `radius_m` of `origin`.
    async fn search(
        &self,
        origin: Coordinates,
        radius_m: u32,
        categories: &[String],
    ) -> Result<Vec<Place>, AmenityError>;

    /// Number of building footprints within `radius_m` of `origin`.
    async fn count_buildings(&self, origin: Coordinates, radius_m: u32) -> Result<u32, AmenityError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AmenityError {
    #[error("Amenity search request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Amenity provider returned an unexpected payload: {0}")]
    Payload(String),
}

pub struct AmenityLocator {
    geocoder: Arc<dyn Geocoder>,
    source: Arc<dyn AmenitySource>,
}

impl AmenityLocator {
    pub fn new(geocoder: Arc<dyn Geocoder>, source: Arc<dyn AmenitySource>) -> Self {
        Self { geocoder, source }
    }

    pub async fn geocode(&self, address: &str) -> Result<Coordinates, GeocodeError> {
        self.geocoder.geocode(address).await
    }

    /// Search every requested category and group the results.
    ///
    /// Each requested category appears in the map, possibly with no places.
    pub async fn nearby(
        &self,
        origin: Coordinates,
        radius_m: u32,
        categories: &[String],
    ) -> Result<AmenityMap, AmenityError> {
        let places = self.source.search(origin, radius_m, categories).await?;
        Ok(group_places(origin, radius_m, categories, places))
    }

    pub async fn count_buildings(&self, origin: Coordinates, radius_m: u32) -> Result<u32, AmenityError> {
        self.source.count_buildings(origin, radius_m).await
    }
}

fn group_places(
    origin: Coordinates,
    radius_m: u32,
    categories: &[String],
    places: Vec<Place>,
) -> AmenityMap {
    let mut grouped: AmenityMap = categories
        .iter()
        .map(|c| (c.clone(), Vec::new()))
        .collect();

    for place in places {
        let Some(bucket) = grouped.get_mut(&place.category) else {
            continue;
        };
        let distance = distance_m(origin, place.coordinates);
        if !distance.is_finite() || distance > radius_m as f64 {
            continue;
        }
        bucket.push(PointOfInterest {
            name: place
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("Unnamed {}", place.category.replace('_', " "))),
            distance_m: (distance * 10.0).round() / 10.0,
            coordinates: Some(place.coordinates),
        });
    }

    for bucket in grouped.values_mut() {
        bucket.sort_by(|a, b| {
            a.distance_m
                .total_cmp(&b.distance_m)
                .then_with(|| a.name.cmp(&b.name))
        });
        bucket.truncate(MAX_PLACES_PER_CATEGORY);
    }

    grouped
}

/// Great-circle (haversine) distance in metres.
pub fn distance_m(a: Coordinates, b: Coordinates) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// OSM tag (key, value) a category tag is searched under.
fn osm_tag(category: &str) -> (&'static str, &str) {
    match category {
        "park" | "playground" | "garden" | "sports_centre" | "fitness_centre" => ("leisure", category),
        "supermarket" | "convenience" | "bakery" | "mall" => ("shop", category),
        "bus_stop" => ("highway", category),
        "station" => ("railway", category),
        _ => ("amenity", category),
    }
}

/// Client for an Overpass API interpreter endpoint.
pub struct OverpassClient {
    http: Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Deserialize)]
struct OverpassElement {
    lat: Option<f64>,
    lon: Option<f64>,
    center: Option<OverpassCenter>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Deserialize)]
struct OverpassCenter {
    lat: f64,
    lon: f64,
}

impl OverpassClient {
    pub fn new(http: Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    async fn run(&self, query: String) -> Result<OverpassResponse, AmenityError> {
        let response = self
            .http
            .post(&self.endpoint)
            .form(&[("data", query)])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

fn amenity_query(origin: Coordinates, radius_m: u32, categories: &[String]) -> String {
    let around = format!("(around:{},{},{})", radius_m, origin.latitude, origin.longitude);
    let mut body = String::new();
    for category in categories {
        let (key, value) = osm_tag(category);
        body.push_str(&format!("  nwr[\"{}\"=\"{}\"]{};\n", key, value, around));
    }
    format!("[out:json][timeout:25];\n(\n{});\nout center;", body)
}

#[async_trait]
impl AmenitySource for OverpassClient {
    async fn search(
        &self,
        origin: Coordinates,
        radius_m: u32,
        categories: &[String],
    ) -> Result<Vec<Place>, AmenityError> {
        if categories.is_empty() {
            return Ok(Vec::new());
        }

        let response = self.run(amenity_query(origin, radius_m, categories)).await?;

        let mut places = Vec::new();
        for element in response.elements {
            let coordinates = match (element.lat, element.lon, &element.center) {
                (Some(lat), Some(lon), _) => Coordinates::new(lat, lon),
                (_, _, Some(center)) => Coordinates::new(center.lat, center.lon),
                _ => continue,
            };
            let matched = categories.iter().find(|c| {
                let (key, value) = osm_tag(c);
                element.tags.get(key).map(String::as_str) == Some(value)
            });
            if let Some(category) = matched {
                places.push(Place {
                    category: category.clone(),
                    name: element.tags.get("name").cloned(),
                    coordinates,
                });
            }
        }

        tracing::debug!(radius_m, places = places.len(), "Overpass amenity search complete");
        Ok(places)
    }

    async fn count_buildings(&self, origin: Coordinates, radius_m: u32) -> Result<u32, AmenityError> {
        let query = format!(
            "[out:json][timeout:25];\nway[\"building\"](around:{},{},{});\nout count;",
            radius_m, origin.latitude, origin.longitude
        );
        let response = self.run(query).await?;
        let count = response
            .elements
            .first()
            .and_then(|e| e.tags.get("ways").or_else(|| e.tags.get("total")))
            .ok_or_else(|| AmenityError::Payload("missing count element".to_string()))?;
        count
            .parse::<u32>()
            .map_err(|_| AmenityError::Payload(format!("invalid building count: {}", count)))
    }
}
