use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::models::job::{AmenityMap, Coordinates};

/// What a rendered map shows.
pub struct MapInput<'a> {
    pub job_id: Uuid,
    pub address: &'a str,
    pub origin: Coordinates,
    pub radius_m: u32,
    pub amenities: &'a AmenityMap,
}

#[async_trait]
pub trait MapRenderer: Send + Sync {
    /// Render the map and return a reference relative to the artifacts root.
    async fn render(&self, input: &MapInput<'_>) -> Result<String, MapError>;
}

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Failed to write map: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode map data: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Popup text is shown by Leaflet as HTML, so names arrive pre-escaped.
#[derive(Serialize)]
struct Marker {
    category: String,
    name: String,
    lat: f64,
    lon: f64,
    distance_m: f64,
}

/// Writes a self-contained Leaflet HTML page under `maps/`.
pub struct LeafletMapRenderer {
    artifacts_dir: PathBuf,
}

impl LeafletMapRenderer {
    pub const MAPS_DIR: &'static str = "maps";

    pub fn new(artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
        }
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

pub fn render_html(input: &MapInput<'_>) -> Result<String, MapError> {
    let markers: Vec<Marker> = input
        .amenities
        .iter()
        .flat_map(|(category, places)| {
            places.iter().filter_map(move |p| {
                p.coordinates.map(|c| Marker {
                    category: escape_html(category),
                    name: escape_html(&p.name),
                    lat: c.latitude,
                    lon: c.longitude,
                    distance_m: p.distance_m,
                })
            })
        })
        .collect();

    // `</` must not appear inside the inline script.
    let markers_json = serde_json::to_string(&markers)?.replace("</", "<\\/");
    let address_json = serde_json::to_string(&escape_html(input.address))?.replace("</", "<\\/");

    Ok(format!(
        r##"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Neighborhood: {title}</title>
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css">
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<style>html, body, #map {{ height: 100%; margin: 0; }}</style>
</head>
<body>
<div id="map"></div>
<script>
const origin = [{lat}, {lon}];
const map = L.map("map").setView(origin, 15);
L.tileLayer("https://tile.openstreetmap.org/{{z}}/{{x}}/{{y}}.png", {{
  maxZoom: 19,
  attribution: "&copy; OpenStreetMap contributors"
}}).addTo(map);
L.marker(origin).addTo(map).bindPopup({address});
L.circle(origin, {{ radius: {radius}, color: "#228b22", fillOpacity: 0.05 }}).addTo(map);
for (const m of {markers}) {{
  L.circleMarker([m.lat, m.lon], {{ radius: 6 }})
    .addTo(map)
    .bindPopup(`${{m.name}} (${{m.category}}, ${{Math.round(m.distance_m)}} m)`);
}}
</script>
</body>
</html>
"##,
        title = escape_html(input.address),
        lat = input.origin.latitude,
        lon = input.origin.longitude,
        address = address_json,
        radius = input.radius_m,
        markers = markers_json,
    ))
}

#[async_trait]
impl MapRenderer for LeafletMapRenderer {
    async fn render(&self, input: &MapInput<'_>) -> Result<String, MapError> {
        let html = render_html(input)?;

        let dir = self.artifacts_dir.join(Self::MAPS_DIR);
        tokio::fs::create_dir_all(&dir).await?;

        let filename = format!("neighborhood_{}.html", input.job_id.simple());
        tokio::fs::write(dir.join(&filename), html).await?;

        Ok(format!("{}/{}", Self::MAPS_DIR, filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::PointOfInterest;

    fn amenities() -> AmenityMap {
        let mut map = AmenityMap::new();
        map.insert(
            "cafe".into(),
            vec![PointOfInterest {
                name: "Third Wave </script>".into(),
                distance_m: 120.0,
                coordinates: Some(Coordinates::new(12.936, 77.625)),
            }],
        );
        map.insert(
            "park".into(),
            vec![PointOfInterest {
                name: "No location".into(),
                distance_m: 50.0,
                coordinates: None,
            }],
        );
        map
    }

    #[test]
    fn test_html_contains_markers_and_escapes_script_end() {
        let amenities = amenities();
        let input = MapInput {
            job_id: Uuid::new_v4(),
            address: "Koramangala <Bengaluru>",
            origin: Coordinates::new(12.9352, 77.6245),
            radius_m: 1000,
            amenities: &amenities,
        };
        let html = render_html(&input).unwrap();
        assert!(html.contains("Third Wave &lt;/script&gt;"));
        assert!(!html.contains("</script>\","));
        assert!(!html.contains("No location"));
        assert!(html.contains("Neighborhood: Koramangala &lt;Bengaluru&gt;"));
        assert!(html.contains("radius: 1000"));
    }

    #[test]
    fn test_popup_content_is_escaped() {
        let mut amenities = AmenityMap::new();
        amenities.insert(
            "cafe".into(),
            vec![PointOfInterest {
                name: "<img src=x onerror=alert(1)>".into(),
                distance_m: 80.0,
                coordinates: Some(Coordinates::new(12.936, 77.625)),
            }],
        );
        let input = MapInput {
            job_id: Uuid::new_v4(),
            address: "<svg onload=alert(2)>",
            origin: Coordinates::new(12.9352, 77.6245),
            radius_m: 500,
            amenities: &amenities,
        };
        let html = render_html(&input).unwrap();

        assert!(html.contains("&lt;img src=x onerror=alert(1)&gt;"));
        assert!(html.contains(r#"bindPopup("&lt;svg onload=alert(2)&gt;")"#));
        assert!(!html.contains("<img"));
        assert!(!html.contains("<svg"));
    }

    #[tokio::test]
    async fn test_render_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = LeafletMapRenderer::new(dir.path());
        let amenities = amenities();
        let job_id = Uuid::new_v4();
        let input = MapInput {
            job_id,
            address: "Koramangala",
            origin: Coordinates::new(12.9352, 77.6245),
            radius_m: 500,
            amenities: &amenities,
        };
        let reference = renderer.render(&input).await.unwrap();
        assert_eq!(reference, format!("maps/neighborhood_{}.html", job_id.simple()));
        assert!(dir.path().join(&reference).exists());
    }
}
