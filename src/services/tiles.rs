use std::f64::consts::PI;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::{imageops, ImageFormat, RgbImage};
use reqwest::Client;
use tempfile::NamedTempFile;

use crate::models::job::Coordinates;

const TILE_SIZE: u32 = 256;
const MIN_ZOOM: u32 = 12;
const MAX_ZOOM: u32 = 18;
/// Longest side of a stitched area, in pixels.
const MAX_SPAN_PX: f64 = 768.0;
const EQUATOR_M_PER_PX: f64 = 156_543.033_92;

/// Raster imagery of the area around a coordinate.
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Write a PNG covering `radius_m` around `center` to `dest`.
    async fn fetch_area(&self, center: Coordinates, radius_m: u32, dest: &Path) -> Result<(), TileError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TileError {
    #[error("Tile request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tile image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Coordinate outside the tile grid: {0}, {1}")]
    OutOfRange(f64, f64),

    #[error("Tile I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Temporary raster file, deleted when dropped.
pub struct ScratchTile {
    file: Option<NamedTempFile>,
    path: PathBuf,
}

impl ScratchTile {
    pub fn create_in(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file = tempfile::Builder::new()
            .prefix("tile_")
            .suffix(".png")
            .tempfile_in(dir)?;
        let path = file.path().to_path_buf();
        Ok(Self {
            file: Some(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchTile {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.close() {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove scratch tile");
            }
        }
    }
}

/// Position on the global pixel grid at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq)]
struct GridPoint {
    x: f64,
    y: f64,
}

fn meters_per_pixel(latitude: f64, zoom: u32) -> f64 {
    EQUATOR_M_PER_PX * latitude.to_radians().cos() / f64::from(1u32 << zoom)
}

/// Deepest zoom at which the whole area still fits in [`MAX_SPAN_PX`].
fn pick_zoom(latitude: f64, radius_m: u32) -> u32 {
    (MIN_ZOOM..=MAX_ZOOM)
        .rev()
        .find(|z| 2.0 * f64::from(radius_m) / meters_per_pixel(latitude, *z) <= MAX_SPAN_PX)
        .unwrap_or(MIN_ZOOM)
}

fn project(c: Coordinates, zoom: u32) -> Option<GridPoint> {
    if !c.is_valid() || c.latitude.abs() > 85.0511 {
        return None;
    }
    let world = f64::from(TILE_SIZE) * f64::from(1u32 << zoom);
    let lat = c.latitude.to_radians();
    Some(GridPoint {
        x: (c.longitude + 180.0) / 360.0 * world,
        y: (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * world,
    })
}

/// Client for a slippy-map tile server (`{base}/{z}/{x}/{y}.png`).
pub struct OsmTileClient {
    http: Client,
    base_url: String,
}

impl OsmTileClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn tile(&self, zoom: u32, x: u32, y: u32) -> Result<RgbImage, TileError> {
        let url = format!("{}/{}/{}/{}.png", self.base_url, zoom, x, y);
        let bytes = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(image::load_from_memory(&bytes)?.to_rgb8())
    }
}

#[async_trait]
impl TileSource for OsmTileClient {
    async fn fetch_area(&self, center: Coordinates, radius_m: u32, dest: &Path) -> Result<(), TileError> {
        let zoom = pick_zoom(center.latitude, radius_m);
        let mid = project(center, zoom)
            .ok_or(TileError::OutOfRange(center.latitude, center.longitude))?;
        let radius_px = f64::from(radius_m) / meters_per_pixel(center.latitude, zoom);

        let last_tile = (1u32 << zoom) - 1;
        let to_tile = |px: f64| ((px / f64::from(TILE_SIZE)).floor().max(0.0) as u32).min(last_tile);
        let (tx0, tx1) = (to_tile(mid.x - radius_px), to_tile(mid.x + radius_px));
        let (ty0, ty1) = (to_tile(mid.y - radius_px), to_tile(mid.y + radius_px));

        let mut canvas = RgbImage::new((tx1 - tx0 + 1) * TILE_SIZE, (ty1 - ty0 + 1) * TILE_SIZE);
        for ty in ty0..=ty1 {
            for tx in tx0..=tx1 {
                let tile = self.tile(zoom, tx, ty).await?;
                imageops::replace(
                    &mut canvas,
                    &tile,
                    i64::from((tx - tx0) * TILE_SIZE),
                    i64::from((ty - ty0) * TILE_SIZE),
                );
            }
        }

        let origin_x = f64::from(tx0 * TILE_SIZE);
        let origin_y = f64::from(ty0 * TILE_SIZE);
        let left = (mid.x - radius_px - origin_x).max(0.0) as u32;
        let top = (mid.y - radius_px - origin_y).max(0.0) as u32;
        let side = (2.0 * radius_px).round().max(1.0) as u32;
        let width = side.min(canvas.width() - left.min(canvas.width()));
        let height = side.min(canvas.height() - top.min(canvas.height()));

        let area = imageops::crop_imm(&canvas, left, top, width.max(1), height.max(1)).to_image();
        area.save_with_format(dest, ImageFormat::Png)?;

        tracing::debug!(
            zoom,
            tiles = (tx1 - tx0 + 1) * (ty1 - ty0 + 1),
            width = area.width(),
            height = area.height(),
            "Stitched map area"
        );
        Ok(())
    }
}
