//! Colour-blob and outline detection.
//!
//! Pixels within a per-channel tolerance of the target colour form a mask.
//! The mask is dilated by one pixel before 4-connected labelling, so the
//! diagonal steps of a thin rotated outline stay one blob; geometry is then
//! taken from the undilated pixels. A blob is reported as the minimum-area
//! rectangle around its pixels with the corners moved inward: by the
//! measured stroke width for an outline, so they land on its inner corners,
//! and by 1px for a solid blob.
//!
//! Confidence is `pixel_count / rectangle_perimeter`. It is a density
//! heuristic with no upper bound, and callers threshold it empirically.

use image::{GrayImage, Luma, RgbaImage};
use imageproc::distance_transform::Norm;
use imageproc::geometry::min_area_rect;
use imageproc::morphology::dilate;
use imageproc::point::Point as IpPoint;
use imageproc::region_labelling::{connected_components, Connectivity};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::logger;
use crate::region::Region;
use crate::types::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorQuery {
    pub rgb: [u8; 3],
    pub tolerance: u8,
}

impl ColorQuery {
    pub fn new(rgb: [u8; 3], tolerance: u8) -> Self {
        Self { rgb, tolerance }
    }

    fn describe(&self) -> String {
        format!("colour {:?} +/-{}", self.rgb, self.tolerance)
    }
}

/// 255 where every channel is within `tolerance` of `rgb`.
pub fn color_mask(image: &RgbaImage, rgb: [u8; 3], tolerance: u8) -> GrayImage {
    let tol = tolerance as i16;
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let px = image.get_pixel(x, y);
        let hit = px.0[..3].iter().zip(rgb).all(|(&c, t)| (c as i16 - t as i16).abs() <= tol);
        Luma([if hit { 255 } else { 0 }])
    })
}

/// Mask pixels of every blob, indexed by label - 1. Pixels within one step
/// of each other, diagonals included, share a blob.
fn blobs(mask: &GrayImage) -> Vec<Vec<Point>> {
    let joined = dilate(mask, Norm::LInf, 1);
    let labels = connected_components(&joined, Connectivity::Four, Luma([0u8]));
    let mut out: Vec<Vec<Point>> = Vec::new();
    for (x, y, px) in mask.enumerate_pixels() {
        if px[0] == 0 {
            continue;
        }
        let label = labels.get_pixel(x, y)[0] as usize;
        if label == 0 {
            continue;
        }
        if out.len() < label {
            out.resize_with(label, Vec::new);
        }
        out[label - 1].push(Point::new(x as i32, y as i32));
    }
    out
}

/// Largest blob of the requested colour.
pub fn find_color_box(image: &RgbaImage, rgb: [u8; 3], tolerance: u8) -> Result<Region> {
    let query = ColorQuery::new(rgb, tolerance);
    let mask = color_mask(image, rgb, tolerance);
    let largest = blobs(&mask).into_iter().max_by_key(|b| b.len()).filter(|b| !b.is_empty());
    let Some(pixels) = largest else {
        return Err(Error::NoMatchFound(query.describe()));
    };
    let region = box_from_blob(&pixels);
    logger::debug_p(
        "match",
        &format!("{} -> {} px, {:?} conf {:.2}", query.describe(), pixels.len(), region.bounding_box(), region.confidence),
    );
    Ok(region)
}

/// Every blob with at least `min_pixels` pixels, best confidence first.
pub fn find_color_boxes(image: &RgbaImage, rgb: [u8; 3], tolerance: u8, min_pixels: usize) -> Vec<Region> {
    let mask = color_mask(image, rgb, tolerance);
    let mut found: Vec<Region> = blobs(&mask)
        .par_iter()
        .filter(|b| !b.is_empty() && b.len() >= min_pixels)
        .map(|b| box_from_blob(b))
        .collect();
    found.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    found
}

/// Run several colour lookups in parallel. Results are in query order.
pub fn find_color_boxes_concurrently(image: &RgbaImage, queries: &[ColorQuery]) -> Vec<Result<Region>> {
    queries.par_iter().map(|q| find_color_box(image, q.rgb, q.tolerance)).collect()
}

/// First and last pixel of each row; enough for the convex hull. `pixels`
/// must be in row-major order.
fn row_extremes(pixels: &[Point]) -> Vec<IpPoint<i32>> {
    let mut out = Vec::new();
    for row in pixels.chunk_by(|a, b| a.y == b.y) {
        let (first, last) = (row[0], row[row.len() - 1]);
        out.push(IpPoint::new(first.x, first.y));
        if last.x != first.x {
            out.push(IpPoint::new(last.x, last.y));
        }
    }
    out
}

/// Stroke width of a hollow rectangle `w` x `h` px covering `count` pixels,
/// from `count = 2t(w + h) - 4t^2`. `None` when the blob is too full to be
/// an outline.
fn stroke_width(w: f64, h: f64, count: f64) -> Option<f64> {
    let disc = (w + h).powi(2) - 4.0 * count;
    if disc < 0.0 {
        return None;
    }
    let t = ((w + h) - disc.sqrt()) / 4.0;
    (t * 4.0 <= w.min(h)).then_some(t)
}

/// Axis-aligned box around `pixels`.
fn bounding_rect(pixels: &[Point]) -> Region {
    let x0 = pixels.iter().map(|p| p.x).min().unwrap_or(0);
    let y0 = pixels.iter().map(|p| p.y).min().unwrap_or(0);
    let x1 = pixels.iter().map(|p| p.x).max().unwrap_or(0) + 1;
    let y1 = pixels.iter().map(|p| p.y).max().unwrap_or(0) + 1;
    let perimeter = 2.0 * ((x1 - x0) + (y1 - y0)) as f64;
    Region::rect(x0, y0, x1, y1).with_confidence(pixels.len() as f64 / perimeter.max(1.0))
}

fn box_from_blob(pixels: &[Point]) -> Region {
    let corners = min_area_rect(&row_extremes(pixels)).map(|p| (p.x as f64, p.y as f64));
    let side = |a: (f64, f64), b: (f64, f64)| (b.0 - a.0).hypot(b.1 - a.1);
    let (w, h) = (side(corners[0], corners[1]), side(corners[0], corners[3]));

    // a line or a dot
    if w.min(h) < 2.0 {
        return bounding_rect(pixels);
    }

    let count = pixels.len() as f64;
    let inset = stroke_width(w + 1.0, h + 1.0, count).unwrap_or(1.0);
    let moved = (0..4).map(|i| {
        let (p, next, prev) = (corners[i], corners[(i + 1) % 4], corners[(i + 3) % 4]);
        let (ln, lp) = (side(p, next), side(p, prev));
        let x = p.0 + inset * ((next.0 - p.0) / ln + (prev.0 - p.0) / lp);
        let y = p.1 + inset * ((next.1 - p.1) / ln + (prev.1 - p.1) / lp);
        Point::new(x.round() as i32, y.round() as i32)
    });
    let unmoved = corners.map(|(x, y)| Point::new(x as i32, y as i32));
    match Region::polygon(moved).or_else(|| Region::polygon(unmoved)) {
        Some(region) => region.with_confidence(count / (2.0 * (w + h))),
        None => bounding_rect(pixels),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{BoundingBox, Shape};
    use image::Rgba;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);

    fn canvas() -> RgbaImage {
        RgbaImage::from_pixel(400, 300, Rgba([20, 20, 20, 255]))
    }

    fn near(a: i32, b: i32, tol: i32) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn filled_square_gives_its_box() {
        let mut img = canvas();
        draw_filled_rect_mut(&mut img, Rect::at(200, 200).of_size(50, 50), GREEN);
        let hit = find_color_box(&img, [0, 255, 0], 10).unwrap();
        let bb = hit.bounding_box();
        assert!(near(bb.x0, 200, 2) && near(bb.y0, 200, 2) && near(bb.x1, 250, 2) && near(bb.y1, 250, 2), "{:?}", bb);
        assert!(matches!(hit.shape, Shape::Polygon(_)));
        // 2500 px over a 196 px perimeter
        assert!((hit.confidence - 2500.0 / 196.0).abs() < 0.5, "{}", hit.confidence);
    }

    #[test]
    fn tolerance_is_per_channel() {
        let mut img = canvas();
        draw_filled_rect_mut(&mut img, Rect::at(10, 10).of_size(20, 20), Rgba([8, 245, 3, 255]));
        assert!(find_color_box(&img, [0, 255, 0], 10).is_ok());
        assert!(matches!(find_color_box(&img, [0, 255, 0], 7), Err(Error::NoMatchFound(_))));
    }

    #[test]
    fn largest_blob_wins() {
        let mut img = canvas();
        draw_filled_rect_mut(&mut img, Rect::at(10, 10).of_size(10, 10), GREEN);
        draw_filled_rect_mut(&mut img, Rect::at(100, 100).of_size(40, 30), GREEN);
        let bb = find_color_box(&img, [0, 255, 0], 0).unwrap().bounding_box();
        assert!(near(bb.x0, 100, 2) && near(bb.y1, 130, 2), "{:?}", bb);
    }

    #[test]
    fn diagonal_steps_stay_one_blob() {
        let mut img = canvas();
        for i in 0..40 {
            img.put_pixel(50 + i, 60 + i / 2, GREEN);
        }
        img.put_pixel(200, 200, GREEN);
        assert_eq!(find_color_boxes(&img, [0, 255, 0], 0, 1).len(), 2);
    }

    #[test]
    fn thin_line_falls_back_to_a_rect() {
        let mut img = canvas();
        draw_filled_rect_mut(&mut img, Rect::at(30, 40).of_size(60, 1), GREEN);
        let hit = find_color_box(&img, [0, 255, 0], 0).unwrap();
        assert_eq!(hit.bounding_box(), BoundingBox { x0: 30, y0: 40, x1: 90, y1: 41 });
        assert!(hit.contains(50, 40));
    }

    /// Worst distance from a true inner corner of a `thickness` px outline
    /// rotated by `degrees` to the nearest reported vertex.
    fn inner_corner_error(degrees: f64, thickness: f64) -> f64 {
        let (cx, cy, hw, hh) = (200.0f64, 150.0f64, 70.0f64, 40.0f64);
        let (sin, cos) = degrees.to_radians().sin_cos();
        let mut img = canvas();
        for y in 0..img.height() {
            for x in 0..img.width() {
                let (dx, dy) = (x as f64 - cx, y as f64 - cy);
                let u = dx * cos + dy * sin;
                let v = -dx * sin + dy * cos;
                let outer = u.abs() <= hw && v.abs() <= hh;
                let inner = u.abs() <= hw - thickness && v.abs() <= hh - thickness;
                if outer && !inner {
                    img.put_pixel(x, y, GREEN);
                }
            }
        }
        let hit = find_color_box(&img, [0, 255, 0], 0).unwrap();
        let Shape::Polygon(poly) = &hit.shape else { panic!("expected polygon, got {:?}", hit.shape) };
        assert_eq!(poly.vertices().len(), 4);

        let (iw, ih) = (hw - thickness, hh - thickness);
        [(-iw, -ih), (iw, -ih), (iw, ih), (-iw, ih)]
            .iter()
            .map(|&(u, v)| (cx + u * cos - v * sin, cy + u * sin + v * cos))
            .map(|(tx, ty)| {
                poly.vertices().iter().map(|p| (p.x as f64 - tx).hypot(p.y as f64 - ty)).fold(f64::MAX, f64::min)
            })
            .fold(0.0, f64::max)
    }

    #[test]
    fn rotated_outline_corners_land_on_the_inner_corners() {
        for thickness in [1.0, 3.0] {
            for degrees in [0.0, 25.0, 60.0] {
                let err = inner_corner_error(degrees, thickness);
                assert!(err <= 2.0, "{}px at {} degrees: off by {:.2}", thickness, degrees, err);
            }
        }
    }

    #[test]
    fn stroke_width_is_recovered_from_pixel_count() {
        // 181 x 111 outline, 2px wide
        let count = 181.0 * 111.0 - 177.0 * 107.0;
        let t = stroke_width(181.0, 111.0, count).unwrap();
        assert!((t - 2.0).abs() < 1e-9, "{}", t);
        assert_eq!(stroke_width(50.0, 50.0, 2500.0), None);
    }

    #[test]
    fn concurrent_lookups_keep_query_order() {
        let mut img = canvas();
        draw_filled_rect_mut(&mut img, Rect::at(10, 10).of_size(20, 20), GREEN);
        draw_filled_rect_mut(&mut img, Rect::at(300, 200).of_size(30, 30), Rgba([255, 0, 255, 255]));
        let queries = [
            ColorQuery::new([255, 0, 255], 5),
            ColorQuery::new([0, 0, 255], 5),
            ColorQuery::new([0, 255, 0], 5),
        ];
        let results = find_color_boxes_concurrently(&img, &queries);
        assert_eq!(results.len(), 3);
        assert!(near(results[0].as_ref().unwrap().bounding_box().x0, 300, 2));
        assert!(matches!(results[1], Err(Error::NoMatchFound(_))));
        assert!(near(results[2].as_ref().unwrap().bounding_box().x0, 10, 2));
    }
}
