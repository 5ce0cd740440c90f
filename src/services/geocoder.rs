use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::models::job::Coordinates;

/// Address → coordinate resolution.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Coordinates, GeocodeError>;
}

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("address not found: {0}")]
    NotFound(String),

    #[error("Geocoding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Geocoder returned an invalid coordinate: {0}")]
    InvalidCoordinate(String),
}

/// Client for the Nominatim search API.
pub struct NominatimClient {
    http: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

impl NominatimClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Geocoder for NominatimClient {
    async fn geocode(&self, address: &str) -> Result<Coordinates, GeocodeError> {
        let url = format!("{}/search", self.base_url);

        let places: Vec<NominatimPlace> = self
            .http
            .get(&url)
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let place = places
            .into_iter()
            .next()
            .ok_or_else(|| GeocodeError::NotFound(address.to_string()))?;

        let parse = |raw: &str| {
            raw.parse::<f64>()
                .map_err(|_| GeocodeError::InvalidCoordinate(raw.to_string()))
        };
        let coordinates = Coordinates::new(parse(&place.lat)?, parse(&place.lon)?);

        if !coordinates.is_valid() {
            return Err(GeocodeError::InvalidCoordinate(format!(
                "{}, {}",
                place.lat, place.lon
            )));
        }

        tracing::debug!(
            address,
            latitude = coordinates.latitude,
            longitude = coordinates.longitude,
            "Geocoded address"
        );

        Ok(coordinates)
    }
}
