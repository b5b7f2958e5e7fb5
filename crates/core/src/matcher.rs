//! Masked, multi-scale template matching.
//!
//! The score is normalised cross-correlation over the RGB channels, counting
//! only template pixels whose alpha is at least [`MASK_ALPHA`]:
//! `sum(T*I) / sqrt(sum(T^2) * sum(I^2))`. An exact paste scores 1.0 and a
//! window with no energy at all scores 0.
//!
//! Templates large enough to survive shrinking are first matched against a
//! 2x or 4x reduced parent. The best few coarse peaks are then refined at
//! full resolution in a small neighbourhood, so the full-size correlation
//! only runs over a few hundred placements.

use std::borrow::Cow;
use std::ops::Range;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::logger;
use crate::region::Region;

/// Template pixels at or above this alpha take part in scoring.
pub const MASK_ALPHA: u8 = 128;

/// Reduction factors tried for the coarse pass, largest first.
const COARSE_FACTORS: [u32; 2] = [4, 2];
/// Shortest template side allowed after reduction.
const MIN_COARSE_SIDE: u32 = 8;
/// Coarse peaks carried into the full-resolution pass.
const COARSE_PEAKS: usize = 8;

/// Template scales to try, `min..=max` in increments of `step`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl Default for ScaleRange {
    fn default() -> Self {
        Self::single(1.0)
    }
}

impl ScaleRange {
    pub fn single(scale: f64) -> Self {
        Self { min: scale, max: scale, step: 0.1 }
    }

    pub fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    pub fn values(&self) -> Vec<f64> {
        if self.step <= 0.0 || self.max <= self.min {
            return vec![self.min];
        }
        let n = ((self.max - self.min) / self.step + 1e-9).floor() as usize;
        (0..=n).map(|i| self.min + i as f64 * self.step).collect()
    }
}

/// Parent image flattened to normalised RGB with an energy integral.
struct Haystack {
    width: usize,
    height: usize,
    rgb: Vec<f32>,
    /// (width + 1) x (height + 1) summed-area table of r^2 + g^2 + b^2.
    energy: Vec<f64>,
}

impl Haystack {
    fn new(image: &RgbaImage) -> Self {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let mut rgb = Vec::with_capacity(width * height * 3);
        for px in image.pixels() {
            rgb.extend(px.0[..3].iter().map(|&c| c as f32 / 255.0));
        }
        let stride = width + 1;
        let mut energy = vec![0.0f64; stride * (height + 1)];
        for y in 0..height {
            let mut row = 0.0f64;
            for x in 0..width {
                let i = (y * width + x) * 3;
                row += rgb[i..i + 3].iter().map(|&v| (v * v) as f64).sum::<f64>();
                energy[(y + 1) * stride + x + 1] = energy[y * stride + x + 1] + row;
            }
        }
        Self { width, height, rgb, energy }
    }

    fn window_energy(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        let s = self.width + 1;
        self.energy[(y + h) * s + x + w] - self.energy[y * s + x + w] - self.energy[(y + h) * s + x]
            + self.energy[y * s + x]
    }
}

/// A horizontal stretch of opaque template pixels.
struct Run {
    dy: usize,
    dx: usize,
    rgb: Vec<f32>,
}

struct Needle {
    width: usize,
    height: usize,
    runs: Vec<Run>,
    energy: f64,
    opaque: bool,
}

impl Needle {
    fn new(template: &RgbaImage) -> Self {
        let (width, height) = (template.width() as usize, template.height() as usize);
        let mut runs = Vec::new();
        let mut energy = 0.0f64;
        let mut opaque = true;
        for y in 0..height {
            let mut current: Option<Run> = None;
            for x in 0..width {
                let px = template.get_pixel(x as u32, y as u32);
                if px[3] >= MASK_ALPHA {
                    let run = current.get_or_insert_with(|| Run { dy: y, dx: x, rgb: Vec::new() });
                    for &c in &px.0[..3] {
                        let v = c as f32 / 255.0;
                        energy += (v * v) as f64;
                        run.rgb.push(v);
                    }
                } else {
                    opaque = false;
                    runs.extend(current.take());
                }
            }
            runs.extend(current.take());
        }
        Self { width, height, runs, energy, opaque }
    }

    fn score_at(&self, hay: &Haystack, x: usize, y: usize) -> f32 {
        let mut dot = 0.0f32;
        let mut masked_energy = 0.0f32;
        for run in &self.runs {
            let start = ((y + run.dy) * hay.width + x + run.dx) * 3;
            let window = &hay.rgb[start..start + run.rgb.len()];
            for (t, i) in run.rgb.iter().zip(window) {
                dot += t * i;
            }
            if !self.opaque {
                masked_energy += window.iter().map(|i| i * i).sum::<f32>();
            }
        }
        let window_energy = if self.opaque {
            hay.window_energy(x, y, self.width, self.height)
        } else {
            masked_energy as f64
        };
        let denom = (self.energy * window_energy).sqrt();
        if denom <= 1e-9 {
            0.0
        } else {
            (dot as f64 / denom).min(1.0) as f32
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Placement {
    score: f32,
    x: usize,
    y: usize,
}

impl Placement {
    /// Higher score wins; ties go to the first placement in row-major order.
    fn better(self, other: Placement) -> Placement {
        match other.score.total_cmp(&self.score) {
            std::cmp::Ordering::Greater => other,
            std::cmp::Ordering::Equal if (other.y, other.x) < (self.y, self.x) => other,
            _ => self,
        }
    }
}

/// Whether `needle` fits at least once inside `hay`.
fn fits(hay: &Haystack, needle: &Needle) -> bool {
    !needle.runs.is_empty() && needle.width <= hay.width && needle.height <= hay.height
}

/// Best placement with its top-left corner in `xs` x `ys`.
fn best_in(hay: &Haystack, needle: &Needle, xs: Range<usize>, ys: Range<usize>) -> Option<Placement> {
    ys.into_par_iter()
        .flat_map_iter(|y| xs.clone().map(move |x| Placement { score: needle.score_at(hay, x, y), x, y }))
        .reduce_with(Placement::better)
}

/// Up to [`COARSE_PEAKS`] best placements, no two of them adjacent.
fn peaks(hay: &Haystack, needle: &Needle) -> Vec<Placement> {
    if !fits(hay, needle) {
        return Vec::new();
    }
    let cols = hay.width - needle.width + 1;
    let rows = hay.height - needle.height + 1;
    let mut all: Vec<Placement> = (0..rows)
        .into_par_iter()
        .flat_map_iter(|y| (0..cols).map(move |x| Placement { score: needle.score_at(hay, x, y), x, y }))
        .collect();
    all.par_sort_unstable_by(|a, b| b.score.total_cmp(&a.score).then((a.y, a.x).cmp(&(b.y, b.x))));

    let mut picked: Vec<Placement> = Vec::with_capacity(COARSE_PEAKS);
    for p in all {
        if picked.len() == COARSE_PEAKS {
            break;
        }
        if picked.iter().all(|q| p.x.abs_diff(q.x) > 1 || p.y.abs_diff(q.y) > 1) {
            picked.push(p);
        }
    }
    picked
}

/// The parent at full size and at each coarse reduction.
struct Pyramid {
    full: Haystack,
    coarse: Vec<(u32, Haystack)>,
}

impl Pyramid {
    fn new(parent: &RgbaImage) -> Self {
        let (w, h) = parent.dimensions();
        let coarse = COARSE_FACTORS
            .iter()
            .filter(|&&f| w / f > 0 && h / f > 0)
            .map(|&f| (f, Haystack::new(&imageops::resize(parent, w / f, h / f, FilterType::Triangle))))
            .collect();
        Self { full: Haystack::new(parent), coarse }
    }

    /// Best placement of `template`: coarse peaks refined at full size when
    /// the template is big enough, an exhaustive scan otherwise.
    fn best_placement(&self, template: &RgbaImage) -> Option<Placement> {
        let needle = Needle::new(template);
        if !fits(&self.full, &needle) {
            return None;
        }
        let cols = self.full.width - needle.width + 1;
        let rows = self.full.height - needle.height + 1;

        let (tw, th) = template.dimensions();
        let level = self.coarse.iter().find(|(f, _)| tw.min(th) / f >= MIN_COARSE_SIDE);
        let candidates: Vec<(usize, usize, usize)> = match level {
            Some((f, small_hay)) => {
                let small = Needle::new(&imageops::resize(template, tw / f, th / f, FilterType::Triangle));
                let f = *f as usize;
                peaks(small_hay, &small).into_iter().map(|p| (p.x * f, p.y * f, f + 1)).collect()
            }
            None => Vec::new(),
        };
        if candidates.is_empty() {
            return best_in(&self.full, &needle, 0..cols, 0..rows);
        }

        candidates
            .par_iter()
            .filter_map(|&(x, y, r)| {
                let xs = x.saturating_sub(r)..(x + r + 1).min(cols);
                let ys = y.saturating_sub(r)..(y + r + 1).min(rows);
                best_in(&self.full, &needle, xs, ys)
            })
            .reduce_with(Placement::better)
            .or_else(|| best_in(&self.full, &needle, 0..cols, 0..rows))
    }
}

fn scaled<'a>(template: &'a RgbaImage, scale: f64) -> Option<Cow<'a, RgbaImage>> {
    let w = (template.width() as f64 * scale).round() as u32;
    let h = (template.height() as f64 * scale).round() as u32;
    if w == 0 || h == 0 {
        return None;
    }
    if (w, h) == template.dimensions() {
        return Some(Cow::Borrowed(template));
    }
    Some(Cow::Owned(imageops::resize(template, w, h, FilterType::Triangle)))
}

fn describe(template: &RgbaImage) -> String {
    format!("template {}x{}", template.width(), template.height())
}

/// Best match of `template` in `parent` over every scale in `scales`.
///
/// Fails with `NoMatchFound` only when the template fits the parent at none
/// of the scales; a poor but present match is returned with its low score.
pub fn find_subimage(parent: &RgbaImage, template: &RgbaImage, scales: ScaleRange) -> Result<Region> {
    let pyramid = Pyramid::new(parent);
    let mut best: Option<Region> = None;

    for scale in scales.values() {
        let Some(sized) = scaled(template, scale) else { continue };
        let Some(hit) = pyramid.best_placement(&sized) else { continue };
        let score = hit.score as f64;
        if best.as_ref().map_or(true, |b| score > b.confidence) {
            let (x, y) = (hit.x as i32, hit.y as i32);
            best = Some(
                Region::rect(x, y, x + sized.width() as i32, y + sized.height() as i32)
                    .with_confidence(score)
                    .with_scale(scale),
            );
        }
    }

    match best {
        Some(region) => {
            logger::debug_p(
                "match",
                &format!("{} -> {:?} conf {:.3} scale {:.2}", describe(template), region.bounding_box(), region.confidence, region.scale),
            );
            Ok(region)
        }
        None => Err(Error::NoMatchFound(describe(template))),
    }
}

/// Repeatedly take the best match and black it out until the score drops
/// below `threshold` or `limit` hits were collected. Hits come back in
/// discovery order.
pub fn find_all_subimages(
    parent: &RgbaImage,
    template: &RgbaImage,
    scales: ScaleRange,
    threshold: f64,
    limit: usize,
) -> Result<Vec<Region>> {
    let mut work = parent.clone();
    let mut hits = Vec::new();
    while hits.len() < limit {
        let hit = find_subimage(&work, template, scales)?;
        if hit.confidence < threshold {
            break;
        }
        paint_black(&mut work, &hit);
        hits.push(hit);
    }
    Ok(hits)
}

fn paint_black(image: &mut RgbaImage, region: &Region) {
    let bb = region.bounding_box();
    for y in bb.y0.max(0)..bb.y1.min(image.height() as i32) {
        for x in bb.x0.max(0)..bb.x1.min(image.width() as i32) {
            let alpha = image.get_pixel(x as u32, y as u32)[3];
            image.put_pixel(x as u32, y as u32, Rgba([0, 0, 0, alpha]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::BoundingBox;
    use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
    use imageproc::rect::Rect;
    use std::time::{Duration, Instant};

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn canvas(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 255]))
    }

    fn solid(w: u32, h: u32, color: Rgba<u8>) -> RgbaImage {
        RgbaImage::from_pixel(w, h, color)
    }

    /// A two-tone template so that correlation has structure to lock onto.
    fn badge() -> RgbaImage {
        let mut t = solid(24, 16, Rgba([240, 200, 40, 255]));
        draw_filled_rect_mut(&mut t, Rect::at(4, 4).of_size(8, 8), Rgba([30, 60, 220, 255]));
        t
    }

    #[test]
    fn scale_range_enumerates_inclusively() {
        assert_eq!(ScaleRange::default().values(), vec![1.0]);
        let v = ScaleRange::new(0.5, 1.0, 0.25).values();
        assert_eq!(v.len(), 3);
        assert!((v[2] - 1.0).abs() < 1e-9);
        assert_eq!(ScaleRange::new(1.0, 2.0, 0.0).values(), vec![1.0]);
    }

    #[test]
    fn finds_exact_paste() {
        let mut parent = canvas(320, 240);
        imageops::overlay(&mut parent, &badge(), 97, 41);
        let hit = find_subimage(&parent, &badge(), ScaleRange::default()).unwrap();
        assert_eq!(hit.bounding_box(), BoundingBox { x0: 97, y0: 41, x1: 121, y1: 57 });
        assert!(hit.confidence > 0.99, "{}", hit.confidence);
        assert_eq!(hit.scale, 1.0);
    }

    #[test]
    fn finds_scaled_paste() {
        let big = imageops::resize(&badge(), 36, 24, FilterType::Triangle);
        let mut parent = canvas(300, 200);
        imageops::overlay(&mut parent, &big, 150, 60);
        let hit = find_subimage(&parent, &badge(), ScaleRange::new(1.0, 2.0, 0.25)).unwrap();
        assert!((hit.scale - 1.5).abs() < 1e-9, "scale {}", hit.scale);
        let bb = hit.bounding_box();
        assert!((bb.x0 - 150).abs() <= 1 && (bb.y0 - 60).abs() <= 1, "{:?}", bb);
        assert!(hit.confidence > 0.95);
    }

    #[test]
    fn transparent_pixels_are_ignored() {
        // red disc on a transparent square, pasted onto a blue background
        let mut template = RgbaImage::new(30, 30);
        draw_filled_circle_mut(&mut template, (15, 15), 12, RED);
        let mut parent = solid(200, 150, Rgba([0, 0, 200, 255]));
        imageops::overlay(&mut parent, &template, 120, 70);

        let hit = find_subimage(&parent, &template, ScaleRange::default()).unwrap();
        assert_eq!(hit.bounding_box().x0, 120);
        assert_eq!(hit.bounding_box().y0, 70);
        assert!(hit.confidence > 0.99);
    }

    #[test]
    fn oversized_template_is_no_match() {
        let parent = canvas(20, 20);
        let err = find_subimage(&parent, &solid(30, 10, RED), ScaleRange::default()).unwrap_err();
        assert!(matches!(err, Error::NoMatchFound(_)));
        // fits at the small scale only
        assert!(find_subimage(&parent, &solid(30, 10, RED), ScaleRange::new(0.5, 1.0, 0.5)).is_ok());
    }

    #[test]
    fn absent_template_scores_low_but_is_returned() {
        let parent = canvas(60, 60);
        let hit = find_subimage(&parent, &badge(), ScaleRange::default()).unwrap();
        assert!(hit.confidence < 0.1);
    }

    #[test]
    fn find_all_collects_every_copy() {
        let mut parent = canvas(240, 160);
        for (x, y) in [(10, 10), (120, 30), (60, 110)] {
            imageops::overlay(&mut parent, &badge(), x, y);
        }
        let hits = find_all_subimages(&parent, &badge(), ScaleRange::default(), 0.95, 10).unwrap();
        assert_eq!(hits.len(), 3);
        let mut corners: Vec<(i32, i32)> = hits.iter().map(|h| (h.bounding_box().x0, h.bounding_box().y0)).collect();
        corners.sort();
        assert_eq!(corners, vec![(10, 10), (60, 110), (120, 30)]);
    }

    #[test]
    fn find_all_respects_limit() {
        let mut parent = canvas(240, 160);
        for (x, y) in [(10, 10), (120, 30), (60, 110)] {
            imageops::overlay(&mut parent, &badge(), x, y);
        }
        let hits = find_all_subimages(&parent, &badge(), ScaleRange::default(), 0.95, 2).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn large_parent_is_searched_quickly() {
        let mut parent = RgbaImage::from_fn(1280, 720, |x, y| {
            let (x, y) = (x as f32, y as f32);
            Rgba([
                (128.0 + 90.0 * (x / 7.0).sin() * (y / 11.0).cos()) as u8,
                (128.0 + 90.0 * ((x + 2.0 * y) / 13.0).sin()) as u8,
                (128.0 + 90.0 * ((3.0 * x - y) / 17.0).cos()) as u8,
                255,
            ])
        });
        let mut template = RgbaImage::from_fn(64, 64, |x, y| Rgba([(x * 4) as u8, 250 - (y * 3) as u8, 40, 255]));
        draw_filled_rect_mut(&mut template, Rect::at(10, 20).of_size(30, 14), Rgba([20, 20, 230, 255]));
        imageops::overlay(&mut parent, &template, 701, 333);

        let started = Instant::now();
        let hit = find_subimage(&parent, &template, ScaleRange::default()).unwrap();
        let took = started.elapsed();
        assert_eq!(hit.bounding_box(), BoundingBox { x0: 701, y0: 333, x1: 765, y1: 397 });
        assert!(hit.confidence > 0.99, "{}", hit.confidence);
        assert!(took < Duration::from_secs(2), "{:?}", took);
    }
}
