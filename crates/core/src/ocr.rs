//! Reading numeric overlays out of a region.
//!
//! Digit recognition itself is a collaborator behind [`TextReader`]; this
//! module only prepares the crop (hue isolation, Otsu binarisation) and
//! validates what comes back.

use image::{GrayImage, Luma, RgbaImage};
use imageproc::contrast::otsu_level;

use crate::error::{Error, Result};
use crate::logger;
use crate::region::Region;

/// Turns a binarised crop into text. `None` when nothing was recognised.
pub trait TextReader: Send + Sync {
    fn read(&self, image: &GrayImage) -> Option<String>;
}

impl<F> TextReader for F
where
    F: Fn(&GrayImage) -> Option<String> + Send + Sync,
{
    fn read(&self, image: &GrayImage) -> Option<String> {
        self(image)
    }
}

/// Reader for hosts without a recogniser wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoText;

impl TextReader for NoText {
    fn read(&self, _image: &GrayImage) -> Option<String> {
        None
    }
}

/// Hue range in degrees plus saturation/value floors in `[0, 1]`.
/// `hue_min > hue_max` wraps through 0° (reds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HueBand {
    pub hue_min: f32,
    pub hue_max: f32,
    pub min_saturation: f32,
    pub min_value: f32,
}

impl Default for HueBand {
    /// Yellow overlay text.
    fn default() -> Self {
        Self { hue_min: 45.0, hue_max: 70.0, min_saturation: 0.45, min_value: 0.45 }
    }
}

impl HueBand {
    pub fn contains(&self, rgb: [u8; 3]) -> bool {
        let (h, s, v) = rgb_to_hsv(rgb);
        let hue_ok = if self.hue_min <= self.hue_max {
            h >= self.hue_min && h <= self.hue_max
        } else {
            h >= self.hue_min || h <= self.hue_max
        };
        hue_ok && s >= self.min_saturation && v >= self.min_value
    }
}

/// Hue in degrees `[0, 360)`, saturation and value in `[0, 1]`.
pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> (f32, f32, f32) {
    let (r, g, b) = (r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let sat = if max == 0.0 { 0.0 } else { delta / max };
    (hue, sat, max)
}

/// Grey image keeping the brightness of in-band pixels, black elsewhere.
pub fn isolate_band(image: &RgbaImage, band: &HueBand) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b, _] = image.get_pixel(x, y).0;
        if band.contains([r, g, b]) {
            Luma([r.max(g).max(b)])
        } else {
            Luma([0])
        }
    })
}

/// Global Otsu threshold: 255 above the level, 0 at or below it.
pub fn binarize(gray: &GrayImage) -> GrayImage {
    let level = otsu_level(gray);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([if gray.get_pixel(x, y)[0] > level { 255 } else { 0 }])
    })
}

/// Digits with at most one `.`; `,` separators are dropped first.
pub fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text.trim().chars().filter(|&c| c != ',').collect();
    if cleaned.is_empty() || cleaned == "." {
        return None;
    }
    let dots = cleaned.chars().filter(|&c| c == '.').count();
    if dots > 1 || !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    cleaned.parse().ok()
}

impl Region {
    /// Crop this region out of `image`, keep the `band` colours, binarise and
    /// read a number. The error carries the binarised crop for inspection.
    pub fn extract_number(&self, image: &RgbaImage, band: &HueBand, reader: &dyn TextReader) -> Result<f64> {
        let crop = self.crop_in(image);
        let binary = binarize(&isolate_band(&crop, band));
        if crop.width() == 0 || crop.height() == 0 {
            return Err(Error::Ocr { reason: "region lies outside the image".into(), image: binary });
        }
        let Some(text) = reader.read(&binary) else {
            return Err(Error::Ocr { reason: "no characters recognised".into(), image: binary });
        };
        match parse_number(&text) {
            Some(n) => {
                logger::debug_p("ocr", &format!("read {:?} -> {}", text, n));
                Ok(n)
            }
            None => Err(Error::Ocr { reason: format!("{:?} is not a number", text), image: binary }),
        }
    }
}
