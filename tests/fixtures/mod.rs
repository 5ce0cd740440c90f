//! Raster fixtures for classifier and pipeline tests
#![allow(dead_code)]

use image::{Rgb, RgbImage};

/// Inside the `forests_woods` ranges and no other category.
pub const FOREST: [u8; 3] = [140, 200, 120];
/// Inside the `parks_grass` RGB range.
pub const GRASS: [u8; 3] = [200, 245, 200];
pub const BLACK: [u8; 3] = [0, 0, 0];

pub fn solid(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(color))
}

/// Left half forest, right half black.
pub fn half_forest(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgb(FOREST)
        } else {
            Rgb(BLACK)
        }
    })
}

/// Fixed origin used by the stub geocoder.
pub const ORIGIN: (f64, f64) = (12.9352, 77.6245);
