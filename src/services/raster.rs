//! Pixel-level helpers for the green-space classifier: 8-bit HSV conversion,
//! binary masks with square-kernel morphology, and a tiny bitmap font used to
//! burn labels into visualizations.

use image::{Rgb, RgbImage};

/// Convert one RGB pixel to 8-bit HSV (H in 0..=179, S and V in 0..=255).
pub fn rgb_to_hsv(pixel: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = pixel.map(f32::from);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };
    let mut h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    [
        ((h / 2.0).round() as u8).min(179),
        s.round() as u8,
        max as u8,
    ]
}

/// Row-major boolean raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl Mask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> Self {
        let mut mask = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                mask.set(x, y, f(x, y));
            }
        }
        mask
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.bits[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        let i = self.index(x, y);
        self.bits[i] = value;
    }

    pub fn count(&self) -> u64 {
        self.bits.iter().filter(|b| **b).count() as u64
    }

    pub fn union(&self, other: &Mask) -> Mask {
        debug_assert_eq!((self.width, self.height), (other.width, other.height));
        Mask {
            width: self.width,
            height: self.height,
            bits: self.bits.iter().zip(&other.bits).map(|(a, b)| *a || *b).collect(),
        }
    }

    pub fn difference(&self, other: &Mask) -> Mask {
        Mask {
            width: self.width,
            height: self.height,
            bits: self.bits.iter().zip(&other.bits).map(|(a, b)| *a && !*b).collect(),
        }
    }

    /// Square-kernel dilation. Pixels outside the image count as unset.
    pub fn dilate(&self, radius: u32) -> Mask {
        self.sweep(radius, false)
    }

    /// Square-kernel erosion. Pixels outside the image count as set, so the
    /// image border itself does not erode a region.
    pub fn erode(&self, radius: u32) -> Mask {
        self.sweep(radius, true)
    }

    /// Dilation followed by erosion: fills holes smaller than the kernel.
    pub fn close(&self, radius: u32) -> Mask {
        self.dilate(radius).erode(radius)
    }

    /// Erosion followed by dilation: removes specks smaller than the kernel.
    pub fn open(&self, radius: u32) -> Mask {
        self.erode(radius).dilate(radius)
    }

    /// Pixels of the mask within `thickness` of its edge.
    pub fn outline(&self, thickness: u32) -> Mask {
        self.difference(&self.erode(thickness))
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    // The square kernel is separable: one horizontal pass, one vertical pass.
    fn sweep(&self, radius: u32, erode: bool) -> Mask {
        if radius == 0 || self.bits.is_empty() {
            return self.clone();
        }
        let w = self.width as usize;
        let h = self.height as usize;
        let r = radius as usize;

        let mut horizontal = vec![false; w * h];
        let mut line = vec![false; w.max(h)];
        for y in 0..h {
            line[..w].copy_from_slice(&self.bits[y * w..(y + 1) * w]);
            let out = window_pass(&line[..w], r, erode);
            horizontal[y * w..(y + 1) * w].copy_from_slice(&out);
        }

        let mut bits = vec![false; w * h];
        for x in 0..w {
            for y in 0..h {
                line[y] = horizontal[y * w + x];
            }
            let out = window_pass(&line[..h], r, erode);
            for y in 0..h {
                bits[y * w + x] = out[y];
            }
        }

        Mask {
            width: self.width,
            height: self.height,
            bits,
        }
    }
}

fn window_pass(line: &[bool], r: usize, erode: bool) -> Vec<bool> {
    let n = line.len();
    let mut prefix = vec![0usize; n + 1];
    for (i, v) in line.iter().enumerate() {
        prefix[i + 1] = prefix[i] + usize::from(*v);
    }
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(r);
            let hi = (i + r + 1).min(n);
            let set = prefix[hi] - prefix[lo];
            if erode {
                set == hi - lo
            } else {
                set > 0
            }
        })
        .collect()
}

/// Blend `color` into every masked pixel at the given opacity.
pub fn blend_mask(image: &mut RgbImage, mask: &Mask, color: [u8; 3], alpha: f32) {
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        if mask.get(x, y) {
            for c in 0..3 {
                let base = f32::from(pixel[c]);
                pixel[c] = (base * (1.0 - alpha) + f32::from(color[c]) * alpha).round() as u8;
            }
        }
    }
}

pub fn paint_mask(image: &mut RgbImage, mask: &Mask, color: [u8; 3]) {
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        if mask.get(x, y) {
            *pixel = Rgb(color);
        }
    }
}

pub fn fill_rect(image: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: [u8; 3]) {
    for y in y0..y1.min(image.height()) {
        for x in x0..x1.min(image.width()) {
            image.put_pixel(x, y, Rgb(color));
        }
    }
}

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;

fn glyph(c: char) -> [u8; 7] {
    match c.to_ascii_uppercase() {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        _ => [0; 7],
    }
}

/// Size in pixels of `text` rendered at `scale`.
pub fn text_size(text: &str, scale: u32) -> (u32, u32) {
    let chars = text.chars().count() as u32;
    let width = if chars == 0 {
        0
    } else {
        (chars * (GLYPH_WIDTH + 1) - 1) * scale
    };
    (width, GLYPH_HEIGHT * scale)
}

/// Draw `text` with its top-left corner at (x, y). Clipped to the image.
pub fn draw_text(image: &mut RgbImage, x: u32, y: u32, text: &str, scale: u32, color: [u8; 3]) {
    let (w, h) = image.dimensions();
    for (i, c) in text.chars().enumerate() {
        let origin_x = x + i as u32 * (GLYPH_WIDTH + 1) * scale;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = origin_x + col * scale + dx;
                        let py = y + row as u32 * scale + dy;
                        if px < w && py < h {
                            image.put_pixel(px, py, Rgb(color));
                        }
                    }
                }
            }
        }
    }
}
