//! Land-cover classification of rendered map rasters.
//!
//! Every pixel is tested against per-category inclusive color ranges in both
//! RGB and 8-bit HSV; a pixel belongs to a category when any range of that
//! category matches in either space. Each category mask is smoothed with one
//! closing and one opening (5×5 square kernel) before counting. Categories may
//! overlap, so the breakdown does not have to sum to the combined coverage.
//!
//! The color bounds are calibrated against standard OpenStreetMap tile
//! styling and should be re-tuned for other imagery.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};

use crate::services::raster::{self, Mask};

/// Half-width of the 5×5 smoothing kernel.
const KERNEL_RADIUS: u32 = 2;
const OVERLAY_COLOR: [u8; 3] = [34, 139, 34];
const OVERLAY_ALPHA: f32 = 0.5;
const OUTLINE_THICKNESS: u32 = 2;
const LABEL_SCALE: u32 = 2;

/// Inclusive per-channel bounds.
#[derive(Debug, Clone, Copy)]
pub struct ColorRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl ColorRange {
    const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, pixel: [u8; 3]) -> bool {
        (0..3).all(|c| self.lower[c] <= pixel[c] && pixel[c] <= self.upper[c])
    }
}

#[derive(Debug)]
pub struct LandCover {
    pub name: &'static str,
    pub rgb: &'static [ColorRange],
    pub hsv: &'static [ColorRange],
}

impl LandCover {
    fn matches(&self, rgb: [u8; 3], hsv: [u8; 3]) -> bool {
        self.rgb.iter().any(|r| r.contains(rgb)) || self.hsv.iter().any(|r| r.contains(hsv))
    }
}

pub const LAND_COVERS: [LandCover; 4] = [
    LandCover {
        name: "parks_grass",
        rgb: &[
            ColorRange::new([180, 230, 180], [230, 255, 230]),
            ColorRange::new([190, 240, 190], [210, 255, 210]),
            ColorRange::new([195, 225, 155], [215, 245, 175]),
        ],
        hsv: &[
            ColorRange::new([30, 15, 150], [90, 100, 255]),
            ColorRange::new([35, 20, 180], [75, 80, 255]),
        ],
    },
    LandCover {
        name: "forests_woods",
        rgb: &[
            ColorRange::new([120, 180, 100], [180, 220, 180]),
            ColorRange::new([130, 190, 150], [180, 215, 170]),
            ColorRange::new([100, 170, 90], [160, 210, 140]),
        ],
        hsv: &[
            ColorRange::new([30, 25, 120], [90, 150, 230]),
            ColorRange::new([35, 30, 100], [80, 130, 220]),
        ],
    },
    LandCover {
        name: "recreation",
        rgb: &[
            ColorRange::new([165, 200, 150], [185, 220, 170]),
            ColorRange::new([150, 190, 140], [180, 215, 165]),
        ],
        hsv: &[ColorRange::new([32, 20, 150], [75, 90, 230])],
    },
    LandCover {
        name: "natural_areas",
        rgb: &[
            ColorRange::new([210, 235, 200], [230, 250, 225]),
            ColorRange::new([200, 230, 190], [225, 245, 220]),
        ],
        hsv: &[ColorRange::new([30, 10, 180], [85, 60, 255])],
    },
];

/// Smoothed per-category masks and their union.
#[derive(Debug, Clone)]
pub struct Coverage {
    pub categories: Vec<(&'static str, Mask)>,
    pub combined: Mask,
}

impl Coverage {
    pub fn total_pixels(&self) -> u64 {
        self.combined.width() as u64 * self.combined.height() as u64
    }

    pub fn green_pixels(&self) -> u64 {
        self.combined.count()
    }

    pub fn percentage(&self) -> f64 {
        percent(self.green_pixels(), self.total_pixels())
    }

    pub fn breakdown(&self) -> BTreeMap<String, f64> {
        let total = self.total_pixels();
        self.categories
            .iter()
            .map(|(name, mask)| (name.to_string(), percent(mask.count(), total)))
            .collect()
    }
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreenSpaceReport {
    pub percentage: f64,
    pub pixel_count: u64,
    pub total_pixel_count: u64,
    pub breakdown: BTreeMap<String, f64>,
    pub visualization_ref: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Failed to decode raster: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Raster has no pixels")]
    EmptyImage,

    #[error("Failed to write visualization: {0}")]
    Io(#[from] std::io::Error),
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = part as f64 / total as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

/// Build the smoothed category masks for an image.
pub fn measure(image: &RgbImage) -> Coverage {
    let (width, height) = image.dimensions();
    let hsv: Vec<[u8; 3]> = image.pixels().map(|p| raster::rgb_to_hsv(p.0)).collect();

    let categories: Vec<(&'static str, Mask)> = LAND_COVERS
        .iter()
        .map(|cover| {
            let raw = Mask::from_fn(width, height, |x, y| {
                let i = y as usize * width as usize + x as usize;
                cover.matches(image.get_pixel(x, y).0, hsv[i])
            });
            (cover.name, raw.close(KERNEL_RADIUS).open(KERNEL_RADIUS))
        })
        .collect();

    let combined = categories
        .iter()
        .fold(Mask::new(width, height), |acc, (_, mask)| acc.union(mask));

    Coverage {
        categories,
        combined,
    }
}

/// Overlay the combined mask, outline the green regions and burn in the
/// coverage label. Returned at half the source resolution.
pub fn render_overlay(image: &RgbImage, coverage: &Coverage) -> RgbImage {
    let mut blended = image.clone();
    raster::blend_mask(&mut blended, &coverage.combined, OVERLAY_COLOR, OVERLAY_ALPHA);
    raster::paint_mask(
        &mut blended,
        &coverage.combined.outline(OUTLINE_THICKNESS),
        OVERLAY_COLOR,
    );

    let label = format!("Green Space: {:.2}%", coverage.percentage());
    let (text_w, text_h) = raster::text_size(&label, LABEL_SCALE);
    raster::fill_rect(&mut blended, 10, 10, 30 + text_w, 30 + text_h, [0, 0, 0]);
    raster::draw_text(&mut blended, 20, 20, &label, LABEL_SCALE, [255, 255, 255]);

    let (w, h) = blended.dimensions();
    imageops::resize(
        &blended,
        (w / 2).max(1),
        (h / 2).max(1),
        imageops::FilterType::Triangle,
    )
}

/// Classifies rasters and writes visualizations under `output_dir`.
pub struct GreenSpaceClassifier {
    artifacts_dir: PathBuf,
}

impl GreenSpaceClassifier {
    pub const RESULTS_DIR: &'static str = "results";

    pub fn new(artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
        }
    }

    pub fn classify_file(&self, path: &Path, job_id: &str) -> Result<GreenSpaceReport, ClassifierError> {
        let image = image::open(path)?.to_rgb8();
        self.classify(&image, job_id)
    }

    /// Classify a decoded raster. A failed visualization write is logged and
    /// leaves `visualization_ref` empty; the coverage figures are still returned.
    pub fn classify(&self, image: &RgbImage, job_id: &str) -> Result<GreenSpaceReport, ClassifierError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ClassifierError::EmptyImage);
        }

        let coverage = measure(image);

        let visualization_ref = match self.write_visualization(image, &coverage, job_id) {
            Ok(reference) => Some(reference),
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Failed to write green-space visualization");
                None
            }
        };

        Ok(GreenSpaceReport {
            percentage: coverage.percentage(),
            pixel_count: coverage.green_pixels(),
            total_pixel_count: coverage.total_pixels(),
            breakdown: coverage.breakdown(),
            visualization_ref,
        })
    }

    fn write_visualization(
        &self,
        image: &RgbImage,
        coverage: &Coverage,
        job_id: &str,
    ) -> Result<String, ClassifierError> {
        let dir = self.artifacts_dir.join(Self::RESULTS_DIR);
        std::fs::create_dir_all(&dir)?;

        let filename = format!("green_space_{}.png", job_id);
        render_overlay(image, coverage).save(dir.join(&filename))?;

        Ok(format!("{}/{}", Self::RESULTS_DIR, filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const GRASS: [u8; 3] = [200, 245, 200];
    const FOREST: [u8; 3] = [140, 200, 120];

    fn solid(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(color))
    }

    #[test]
    fn test_black_image_has_no_green() {
        let coverage = measure(&solid(64, 48, [0, 0, 0]));
        assert_eq!(coverage.percentage(), 0.0);
        assert!(coverage.breakdown().values().all(|v| *v == 0.0));
    }

    #[test]
    fn test_grass_image_is_fully_green() {
        let coverage = measure(&solid(64, 48, GRASS));
        assert_eq!(coverage.percentage(), 100.0);
        assert_eq!(coverage.breakdown()["parks_grass"], 100.0);
    }

    #[test]
    fn test_forest_color_only_matches_forest() {
        let hsv = raster::rgb_to_hsv(FOREST);
        let matched: Vec<&str> = LAND_COVERS
            .iter()
            .filter(|c| c.matches(FOREST, hsv))
            .map(|c| c.name)
            .collect();
        assert_eq!(matched, vec!["forests_woods"]);
    }

    #[test]
    fn test_half_forest_image() {
        let image = RgbImage::from_fn(80, 40, |x, _| {
            if x < 40 {
                Rgb(FOREST)
            } else {
                Rgb([0, 0, 0])
            }
        });
        let coverage = measure(&image);
        assert_eq!(coverage.percentage(), 50.0);
        let breakdown = coverage.breakdown();
        assert_eq!(breakdown["forests_woods"], 50.0);
        assert_eq!(breakdown["parks_grass"], 0.0);
    }

    #[test]
    fn test_speckle_is_smoothed_away() {
        let mut image = solid(40, 40, [0, 0, 0]);
        image.put_pixel(20, 20, Rgb(GRASS));
        image.put_pixel(5, 30, Rgb(FOREST));
        assert_eq!(measure(&image).percentage(), 0.0);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let image = RgbImage::from_fn(50, 30, |x, y| {
            if (x / 7 + y / 5) % 2 == 0 {
                Rgb(GRASS)
            } else {
                Rgb([250, 250, 250])
            }
        });
        let a = measure(&image);
        let b = measure(&image);
        assert_eq!(a.percentage(), b.percentage());
        assert_eq!(a.breakdown(), b.breakdown());
    }

    #[test]
    fn test_classify_writes_half_size_visualization() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = GreenSpaceClassifier::new(dir.path());
        let report = classifier.classify(&solid(120, 80, GRASS), "abc").unwrap();

        assert_eq!(report.percentage, 100.0);
        assert_eq!(report.pixel_count, 9600);
        assert_eq!(report.total_pixel_count, 9600);
        assert_eq!(report.visualization_ref.as_deref(), Some("results/green_space_abc.png"));

        let written = image::open(dir.path().join("results/green_space_abc.png")).unwrap();
        assert_eq!((written.width(), written.height()), (60, 40));
    }

    #[test]
    fn test_classify_rejects_empty_image() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = GreenSpaceClassifier::new(dir.path());
        assert!(matches!(
            classifier.classify(&RgbImage::new(0, 0), "x"),
            Err(ClassifierError::EmptyImage)
        ));
    }

    #[test]
    fn test_classify_file_reports_undecodable_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.png");
        std::fs::write(&path, b"not a png").unwrap();
        let classifier = GreenSpaceClassifier::new(dir.path());
        assert!(matches!(
            classifier.classify_file(&path, "x"),
            Err(ClassifierError::Decode(_))
        ));
    }
}
