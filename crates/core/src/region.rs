//! Rectangular, elliptical and polygonal screen regions.
//!
//! A [`Region`] is what the matchers hand back: a [`Shape`] together with the
//! confidence of the match and the template scale it was found at. Regions are
//! plain values, created from one screenshot and dropped after one interaction.

use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::drawing::draw_line_segment_mut;
use imageproc::geometry::approximate_polygon_dp;
use imageproc::point::Point as IpPoint;
use imageproc::region_labelling::{connected_components, Connectivity};
use rand::Rng;

use crate::error::{Error, Result};
use crate::types::Point;

/// Rejection sampling gives up after this many misses.
const MAX_SAMPLE_ATTEMPTS: usize = 10_000;
/// Raster overlaps are simplified down to at most this many vertices.
const MAX_OVERLAP_VERTICES: usize = 8;

/// Half-open pixel box `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundingBox {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl BoundingBox {
    pub fn width(&self) -> i32 {
        (self.x1 - self.x0).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.y1 - self.y0).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

/// A straight piece of an outline, endpoints inclusive.
pub type Segment = (Point, Point);

/// Geometry every shape answers.
pub trait Area {
    fn bounding_box(&self) -> BoundingBox;
    fn contains(&self, x: i32, y: i32) -> bool;
    /// Closed outline, pushed outward by `padding` pixels.
    fn outline(&self, padding: i32) -> Vec<Segment>;
}

/// Axis-aligned rectangle. `end` may equal `start`, in which case nothing is inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub start_x: i32,
    pub start_y: i32,
    pub end_x: i32,
    pub end_y: i32,
}

impl Rect {
    /// Normalises reversed corners so `end >= start` always holds.
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self {
            start_x: x0.min(x1),
            start_y: y0.min(y1),
            end_x: x0.max(x1),
            end_y: y0.max(y1),
        }
    }

    pub fn from_size(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self::new(x, y, x + w as i32, y + h as i32)
    }

    pub fn area(&self) -> i64 {
        (self.end_x - self.start_x) as i64 * (self.end_y - self.start_y) as i64
    }

    fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.start_x.max(other.start_x);
        let y0 = self.start_y.max(other.start_y);
        let x1 = self.end_x.min(other.end_x);
        let y1 = self.end_y.min(other.end_y);
        (x1 > x0 && y1 > y0).then(|| Rect::new(x0, y0, x1, y1))
    }

    fn corners(&self, padding: i32) -> [Point; 4] {
        let (x0, y0) = (self.start_x - padding, self.start_y - padding);
        let (x1, y1) = (self.end_x - 1 + padding, self.end_y - 1 + padding);
        [Point::new(x0, y0), Point::new(x1, y0), Point::new(x1, y1), Point::new(x0, y1)]
    }
}

impl Area for Rect {
    fn bounding_box(&self) -> BoundingBox {
        BoundingBox { x0: self.start_x, y0: self.start_y, x1: self.end_x, y1: self.end_y }
    }

    fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.start_x && x < self.end_x && y >= self.start_y && y < self.end_y
    }

    fn outline(&self, padding: i32) -> Vec<Segment> {
        if self.area() == 0 {
            return Vec::new();
        }
        close_ring(&self.corners(padding))
    }
}

/// Ellipse inscribed in an axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ellipse(pub Rect);

impl Ellipse {
    fn center_and_radii(&self) -> (f64, f64, f64, f64) {
        let r = &self.0;
        let cx = (r.start_x + r.end_x) as f64 / 2.0;
        let cy = (r.start_y + r.end_y) as f64 / 2.0;
        let rx = (r.end_x - r.start_x) as f64 / 2.0;
        let ry = (r.end_y - r.start_y) as f64 / 2.0;
        (cx, cy, rx, ry)
    }
}

impl Area for Ellipse {
    fn bounding_box(&self) -> BoundingBox {
        self.0.bounding_box()
    }

    fn contains(&self, x: i32, y: i32) -> bool {
        let (cx, cy, rx, ry) = self.center_and_radii();
        if rx <= 0.0 || ry <= 0.0 {
            return false;
        }
        // pixel centres
        let nx = (x as f64 + 0.5 - cx) / rx;
        let ny = (y as f64 + 0.5 - cy) / ry;
        nx * nx + ny * ny <= 1.0
    }

    fn outline(&self, padding: i32) -> Vec<Segment> {
        let (cx, cy, rx, ry) = self.center_and_radii();
        if rx <= 0.0 || ry <= 0.0 {
            return Vec::new();
        }
        let (rx, ry) = (rx + padding as f64, ry + padding as f64);
        let n = ((rx + ry) * 0.5).clamp(12.0, 72.0) as usize;
        let ring: Vec<Point> = (0..n)
            .map(|i| {
                let a = i as f64 / n as f64 * std::f64::consts::TAU;
                Point::new((cx + rx * a.cos()).round() as i32, (cy + ry * a.sin()).round() as i32)
            })
            .collect();
        close_ring(&ring)
    }
}

/// Implicitly closed polygon with at least three distinct vertices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polygon {
    vertices: Vec<Point>,
}

impl Polygon {
    /// Drops consecutive duplicates and a closing copy of the first vertex.
    /// `None` if fewer than three distinct vertices remain.
    pub fn new(points: impl IntoIterator<Item = Point>) -> Option<Self> {
        let mut vertices: Vec<Point> = Vec::new();
        for p in points {
            if vertices.last() != Some(&p) {
                vertices.push(p);
            }
        }
        while vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        let mut distinct = vertices.clone();
        distinct.sort_by_key(|p| (p.x, p.y));
        distinct.dedup();
        (distinct.len() >= 3).then_some(Self { vertices })
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    fn centroid(&self) -> (f64, f64) {
        let n = self.vertices.len() as f64;
        let sx: f64 = self.vertices.iter().map(|p| p.x as f64).sum();
        let sy: f64 = self.vertices.iter().map(|p| p.y as f64).sum();
        (sx / n, sy / n)
    }

    fn map(&self, f: impl Fn(Point) -> Point) -> Option<Polygon> {
        Polygon::new(self.vertices.iter().map(|&p| f(p)))
    }
}

impl Area for Polygon {
    fn bounding_box(&self) -> BoundingBox {
        let mut bb = BoundingBox { x0: i32::MAX, y0: i32::MAX, x1: i32::MIN, y1: i32::MIN };
        for p in &self.vertices {
            bb.x0 = bb.x0.min(p.x);
            bb.y0 = bb.y0.min(p.y);
            bb.x1 = bb.x1.max(p.x + 1);
            bb.y1 = bb.y1.max(p.y + 1);
        }
        bb
    }

    fn contains(&self, x: i32, y: i32) -> bool {
        // even-odd ray cast towards +x
        let (px, py) = (x as f64, y as f64);
        let n = self.vertices.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = (self.vertices[i].x as f64, self.vertices[i].y as f64);
            let (xj, yj) = (self.vertices[j].x as f64, self.vertices[j].y as f64);
            if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    fn outline(&self, padding: i32) -> Vec<Segment> {
        if padding == 0 {
            return close_ring(&self.vertices);
        }
        let (cx, cy) = self.centroid();
        let pushed: Vec<Point> = self
            .vertices
            .iter()
            .map(|p| {
                let (dx, dy) = (p.x as f64 - cx, p.y as f64 - cy);
                let len = dx.hypot(dy).max(f64::EPSILON);
                let k = padding as f64 / len;
                Point::new((p.x as f64 + dx * k).round() as i32, (p.y as f64 + dy * k).round() as i32)
            })
            .collect();
        close_ring(&pushed)
    }
}

fn close_ring(points: &[Point]) -> Vec<Segment> {
    (0..points.len()).map(|i| (points[i], points[(i + 1) % points.len()])).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Rect(Rect),
    Ellipse(Ellipse),
    Polygon(Polygon),
}

impl Area for Shape {
    fn bounding_box(&self) -> BoundingBox {
        match self {
            Shape::Rect(r) => r.bounding_box(),
            Shape::Ellipse(e) => e.bounding_box(),
            Shape::Polygon(p) => p.bounding_box(),
        }
    }

    fn contains(&self, x: i32, y: i32) -> bool {
        match self {
            Shape::Rect(r) => r.contains(x, y),
            Shape::Ellipse(e) => e.contains(x, y),
            Shape::Polygon(p) => p.contains(x, y),
        }
    }

    fn outline(&self, padding: i32) -> Vec<Segment> {
        match self {
            Shape::Rect(r) => r.outline(padding),
            Shape::Ellipse(e) => e.outline(padding),
            Shape::Polygon(p) => p.outline(padding),
        }
    }
}

/// A located screen area plus how sure the matcher was about it.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub shape: Shape,
    /// Match quality; 1.0 is a perfect template hit. Colour boxes use a density
    /// heuristic that is not bounded above.
    pub confidence: f64,
    /// Template size ratio at match time.
    pub scale: f64,
}

/// What a matcher returns: the region, its confidence and its scale.
pub type MatchCandidate = Region;

impl Region {
    pub fn new(shape: Shape) -> Self {
        Self { shape, confidence: 1.0, scale: 1.0 }
    }

    pub fn rect(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self::new(Shape::Rect(Rect::new(x0, y0, x1, y1)))
    }

    pub fn ellipse(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self::new(Shape::Ellipse(Ellipse(Rect::new(x0, y0, x1, y1))))
    }

    pub fn polygon(points: impl IntoIterator<Item = Point>) -> Option<Self> {
        Polygon::new(points).map(|p| Self::new(Shape::Polygon(p)))
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.shape.bounding_box()
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.shape.contains(x, y)
    }

    pub fn outline(&self, padding: i32) -> Vec<Segment> {
        self.shape.outline(padding)
    }

    /// Bounding-box midpoint. May fall outside a concave polygon.
    pub fn get_center(&self) -> Point {
        let bb = self.bounding_box();
        Point::new((bb.x0 + bb.x1) / 2, (bb.y0 + bb.y1) / 2)
    }

    /// Uniformly sampled interior point. `None` only for degenerate shapes.
    pub fn get_point_within<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Point> {
        let bb = self.bounding_box();
        if bb.is_empty() {
            return None;
        }
        (0..MAX_SAMPLE_ATTEMPTS)
            .map(|_| Point::new(rng.gen_range(bb.x0..bb.x1), rng.gen_range(bb.y0..bb.y1)))
            .find(|p| self.contains(p.x, p.y))
    }

    /// Sub-image under the bounding box, clipped to the image.
    pub fn crop_in(&self, image: &RgbaImage) -> RgbaImage {
        let bb = self.bounding_box();
        let x0 = bb.x0.clamp(0, image.width() as i32) as u32;
        let y0 = bb.y0.clamp(0, image.height() as i32) as u32;
        let x1 = bb.x1.clamp(0, image.width() as i32) as u32;
        let y1 = bb.y1.clamp(0, image.height() as i32) as u32;
        image::imageops::crop_imm(image, x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0)).to_image()
    }

    /// Translated copy.
    pub fn transform(&self, dx: i32, dy: i32) -> Region {
        let shape = match &self.shape {
            Shape::Rect(r) => Shape::Rect(shift_rect(r, dx, dy)),
            Shape::Ellipse(e) => Shape::Ellipse(Ellipse(shift_rect(&e.0, dx, dy))),
            Shape::Polygon(p) => Shape::Polygon(Polygon {
                vertices: p.vertices.iter().map(|v| v.offset(dx, dy)).collect(),
            }),
        };
        Region { shape, ..*self }
    }

    /// Scale about the bounding-box centre; `factor < 1` shrinks.
    /// A polygon that would collapse keeps its current vertices.
    pub fn grow(&self, factor: f64) -> Region {
        let factor = factor.max(0.0);
        let bb = self.bounding_box();
        let cx = (bb.x0 + bb.x1) as f64 / 2.0;
        let cy = (bb.y0 + bb.y1) as f64 / 2.0;
        let scale_rect = |r: &Rect| {
            let hw = (r.end_x - r.start_x) as f64 * factor / 2.0;
            let hh = (r.end_y - r.start_y) as f64 * factor / 2.0;
            Rect::new(
                (cx - hw).round() as i32,
                (cy - hh).round() as i32,
                (cx + hw).round() as i32,
                (cy + hh).round() as i32,
            )
        };
        let shape = match &self.shape {
            Shape::Rect(r) => Shape::Rect(scale_rect(r)),
            Shape::Ellipse(e) => Shape::Ellipse(Ellipse(scale_rect(&e.0))),
            Shape::Polygon(p) => {
                let scaled = p.map(|v| {
                    Point::new(
                        (cx + (v.x as f64 - cx) * factor).round() as i32,
                        (cy + (v.y as f64 - cy) * factor).round() as i32,
                    )
                });
                Shape::Polygon(scaled.unwrap_or_else(|| p.clone()))
            }
        };
        Region { shape, ..*self }
    }

    /// Area shared with `other`, or `None` when they do not touch.
    ///
    /// Two rectangles give a clipped rectangle. Every other pairing is
    /// rasterised, and the largest overlapping blob comes back as a polygon.
    /// The confidence is the overlap area as a fraction of `self`'s area.
    pub fn find_overlap(&self, other: &Region) -> Option<Region> {
        if let (Shape::Rect(a), Shape::Rect(b)) = (&self.shape, &other.shape) {
            let clipped = a.intersect(b)?;
            let confidence = clipped.area() as f64 / a.area().max(1) as f64;
            return Some(Region { shape: Shape::Rect(clipped), confidence, scale: self.scale });
        }
        raster_overlap(self, other)
    }

    /// `Err(LowConfidence)` unless the confidence reaches `threshold`.
    pub fn ensure_confidence(self, target: &str, threshold: f64) -> Result<Region> {
        if self.confidence >= threshold {
            Ok(self)
        } else {
            Err(Error::LowConfidence {
                target: target.to_string(),
                confidence: self.confidence,
                threshold,
            })
        }
    }

    /// Draw the outline for diagnostics.
    pub fn debug_draw(&self, canvas: &mut RgbaImage, color: Rgba<u8>) {
        for (a, b) in self.outline(0) {
            draw_line_segment_mut(canvas, (a.x as f32, a.y as f32), (b.x as f32, b.y as f32), color);
        }
    }
}

fn shift_rect(r: &Rect, dx: i32, dy: i32) -> Rect {
    Rect {
        start_x: r.start_x + dx,
        start_y: r.start_y + dy,
        end_x: r.end_x + dx,
        end_y: r.end_y + dy,
    }
}

fn rasterize(region: &Region, window: &BoundingBox) -> GrayImage {
    GrayImage::from_fn(window.width() as u32, window.height() as u32, |x, y| {
        let inside = region.contains(window.x0 + x as i32, window.y0 + y as i32);
        Luma([if inside { 255 } else { 0 }])
    })
}

fn raster_overlap(a: &Region, b: &Region) -> Option<Region> {
    let window = a.bounding_box().union(&b.bounding_box());
    if window.is_empty() {
        return None;
    }
    let mask_a = rasterize(a, &window);
    let mask_b = rasterize(b, &window);
    let mut both = GrayImage::new(mask_a.width(), mask_a.height());
    let mut self_area = 0u64;
    for (x, y, px) in mask_a.enumerate_pixels() {
        if px[0] > 0 {
            self_area += 1;
            if mask_b.get_pixel(x, y)[0] > 0 {
                both.put_pixel(x, y, Luma([255]));
            }
        }
    }

    let labels = connected_components(&both, Connectivity::Eight, Luma([0u8]));
    let mut counts: Vec<u64> = Vec::new();
    for px in labels.pixels() {
        let label = px[0] as usize;
        if label == 0 {
            continue;
        }
        if counts.len() <= label {
            counts.resize(label + 1, 0);
        }
        counts[label] += 1;
    }
    let (largest, &area) = counts.iter().enumerate().max_by_key(|(_, n)| **n)?;
    if area == 0 {
        return None;
    }
    let blob = GrayImage::from_fn(both.width(), both.height(), |x, y| {
        Luma([if labels.get_pixel(x, y)[0] as usize == largest { 255 } else { 0 }])
    });

    let contour = find_contours::<i32>(&blob)
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer))
        .max_by_key(|c| c.points.len())?;
    let simplified = simplify_ring(&contour.points)?;
    let polygon = Polygon::new(simplified.iter().map(|p| Point::new(window.x0 + p.x, window.y0 + p.y)))?;

    Some(Region {
        shape: Shape::Polygon(polygon),
        confidence: area as f64 / self_area.max(1) as f64,
        scale: a.scale,
    })
}

/// Douglas-Peucker with a growing tolerance until the ring is small enough.
fn simplify_ring(points: &[IpPoint<i32>]) -> Option<Vec<IpPoint<i32>>> {
    if points.len() < 3 {
        return None;
    }
    let mut epsilon = 1.0;
    for _ in 0..24 {
        let ring = approximate_polygon_dp(points, epsilon, true);
        if ring.len() <= MAX_OVERLAP_VERTICES {
            return (ring.len() >= 3).then_some(ring);
        }
        epsilon *= 1.5;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn square(x: i32, y: i32, size: i32) -> Region {
        Region::rect(x, y, x + size, y + size)
    }

    #[test]
    fn rect_containment_is_half_open() {
        let r = Region::rect(10, 20, 30, 40);
        assert!(r.contains(10, 20));
        assert!(r.contains(29, 39));
        assert!(!r.contains(30, 25));
        assert!(!r.contains(15, 40));
        assert!(!r.contains(9, 25));
    }

    #[test]
    fn degenerate_rect_contains_nothing() {
        let r = Region::rect(5, 5, 5, 50);
        assert!(!r.contains(5, 5));
        assert!(r.get_point_within(&mut StdRng::seed_from_u64(1)).is_none());
        assert!(r.outline(0).is_empty());
    }

    #[test]
    fn reversed_corners_are_normalised() {
        let r = Rect::new(30, 40, 10, 20);
        assert_eq!((r.start_x, r.start_y, r.end_x, r.end_y), (10, 20, 30, 40));
    }

    #[test]
    fn samples_always_land_inside() {
        let mut rng = StdRng::seed_from_u64(7);
        let shapes = [
            Region::rect(0, 0, 3, 2),
            Region::ellipse(100, 100, 160, 130),
            Region::polygon([Point::new(0, 0), Point::new(40, 10), Point::new(10, 40)]).unwrap(),
            Region::polygon([
                Point::new(50, 0),
                Point::new(100, 50),
                Point::new(50, 100),
                Point::new(0, 50),
            ])
            .unwrap(),
        ];
        for shape in &shapes {
            for _ in 0..1000 {
                let p = shape.get_point_within(&mut rng).unwrap();
                assert!(shape.contains(p.x, p.y), "{:?} outside {:?}", p, shape.shape);
            }
        }
    }

    #[test]
    fn ellipse_excludes_corners() {
        let e = Region::ellipse(0, 0, 20, 10);
        assert!(e.contains(10, 5));
        assert!(!e.contains(0, 0));
        assert!(!e.contains(19, 9));
    }

    #[test]
    fn polygon_rejects_collinear_and_strips_closing_vertex() {
        assert!(Polygon::new([Point::new(0, 0), Point::new(1, 1), Point::new(0, 0)]).is_none());
        let p = Polygon::new([
            Point::new(0, 0),
            Point::new(4, 0),
            Point::new(4, 4),
            Point::new(0, 0),
        ])
        .unwrap();
        assert_eq!(p.vertices().len(), 3);
        assert_eq!(p.outline(0).len(), 3);
    }

    #[test]
    fn transform_round_trips() {
        let regions = [
            square(3, 4, 10),
            Region::ellipse(-5, 2, 8, 9),
            Region::polygon([Point::new(0, 0), Point::new(9, 1), Point::new(4, 7)]).unwrap(),
        ];
        for r in &regions {
            for (dx, dy) in [(0, 0), (17, -3), (-250, 1000)] {
                assert_eq!(&r.transform(dx, dy).transform(-dx, -dy), r);
            }
        }
    }

    #[test]
    fn rect_overlap_is_symmetric() {
        let a = square(0, 0, 20);
        let b = Region::rect(10, 5, 40, 12);
        let ab = a.find_overlap(&b).unwrap();
        let ba = b.find_overlap(&a).unwrap();
        assert_eq!(ab.bounding_box(), ba.bounding_box());
        assert_eq!(ab.bounding_box(), BoundingBox { x0: 10, y0: 5, x1: 20, y1: 12 });
        assert!((ab.confidence - 70.0 / 400.0).abs() < 1e-9);
        assert!((ba.confidence - 70.0 / 210.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_regions_do_not_overlap() {
        assert!(square(0, 0, 10).find_overlap(&square(10, 0, 10)).is_none());
        let tri = Region::polygon([Point::new(100, 100), Point::new(120, 100), Point::new(110, 120)]).unwrap();
        assert!(square(0, 0, 10).find_overlap(&tri).is_none());
    }

    #[test]
    fn polygon_overlap_is_a_small_polygon() {
        let diamond = Region::polygon([
            Point::new(50, 0),
            Point::new(100, 50),
            Point::new(50, 100),
            Point::new(0, 50),
        ])
        .unwrap();
        let block = square(50, 50, 80);
        let hit = diamond.find_overlap(&block).unwrap();
        let Shape::Polygon(poly) = &hit.shape else { panic!("expected polygon") };
        assert!(poly.vertices().len() <= MAX_OVERLAP_VERTICES);
        let bb = hit.bounding_box();
        assert!((bb.x0 - 50).abs() <= 2 && (bb.y0 - 50).abs() <= 2, "{:?}", bb);
        assert!((bb.x1 - 100).abs() <= 2 && (bb.y1 - 100).abs() <= 2, "{:?}", bb);
        assert!(hit.confidence > 0.15 && hit.confidence < 0.35, "{}", hit.confidence);
    }

    #[test]
    fn grow_and_shrink_keep_the_centre() {
        let r = Region::rect(10, 10, 30, 30);
        assert_eq!(r.grow(2.0).bounding_box(), BoundingBox { x0: 0, y0: 0, x1: 40, y1: 40 });
        assert_eq!(r.grow(0.5).bounding_box(), BoundingBox { x0: 15, y0: 15, x1: 25, y1: 25 });
        assert_eq!(r.grow(0.5).get_center(), r.get_center());
    }

    #[test]
    fn crop_clips_to_image() {
        let img = RgbaImage::new(50, 40);
        assert_eq!(Region::rect(40, 30, 70, 90).crop_in(&img).dimensions(), (10, 10));
        assert_eq!(Region::rect(-10, -10, 5, 5).crop_in(&img).dimensions(), (5, 5));
    }

    #[test]
    fn low_confidence_is_an_error() {
        let r = square(0, 0, 5).with_confidence(0.4);
        assert!(matches!(r.clone().ensure_confidence("tree", 0.8), Err(Error::LowConfidence { .. })));
        assert!(r.ensure_confidence("tree", 0.3).is_ok());
    }

    #[test]
    fn debug_draw_marks_the_outline() {
        let mut canvas = RgbaImage::new(20, 20);
        square(2, 2, 10).debug_draw(&mut canvas, Rgba([255, 0, 0, 255]));
        assert_eq!(canvas.get_pixel(2, 2).0, [255, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(11, 6).0, [255, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(6, 6).0, [0, 0, 0, 0]);
    }
}
