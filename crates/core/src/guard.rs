//! Locate, hover, verify, click.
//!
//! One [`Interactor::interact`] call runs the bounded state machine
//! `LOCATE -> VERIFY -> CLICK | RETRY`, inside the control handle's rest
//! checkpoints. Matching happens in window coordinates; regions are moved to
//! screen coordinates before a point is sampled.

use std::time::Duration;

use image::RgbaImage;

use crate::colorbox::find_color_box;
use crate::error::{Error, Result};
use crate::logger;
use crate::matcher::{find_subimage, ScaleRange};
use crate::motion::Mouse;
use crate::ocr::TextReader;
use crate::platform::WindowHandle;
use crate::region::{Area, Rect, Region};
use crate::types::{CaptureRect, MouseButton, Point};

/// How to find a target in a window screenshot.
#[derive(Debug, Clone)]
pub enum Locator {
    /// Largest blob of `rgb`. Attempt `k` widens the tolerance by `k * tolerance_step`.
    Color { rgb: [u8; 3], tolerance: u8, tolerance_step: u8 },
    Template { image: RgbaImage, scales: ScaleRange, min_confidence: f64 },
    /// A region already known in window coordinates.
    Fixed(Region),
}

#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub locator: Locator,
}

impl Target {
    pub fn color(name: &str, rgb: [u8; 3], tolerance: u8) -> Self {
        Self { name: name.to_string(), locator: Locator::Color { rgb, tolerance, tolerance_step: 0 } }
    }

    pub fn template(name: &str, image: RgbaImage, scales: ScaleRange, min_confidence: f64) -> Self {
        Self { name: name.to_string(), locator: Locator::Template { image, scales, min_confidence } }
    }

    pub fn fixed(name: &str, region: Region) -> Self {
        Self { name: name.to_string(), locator: Locator::Fixed(region) }
    }
}

#[derive(Debug, Clone)]
pub struct InteractOptions {
    /// LOCATE attempts per cycle.
    pub retry_match: u32,
    /// LOCATE+VERIFY cycles before giving up.
    pub retry_hover: u32,
    pub button: MouseButton,
    /// Case-insensitive substrings; empty skips verification.
    pub keywords: Vec<String>,
    /// Pause between arriving and reading the hover text.
    pub hover_settle: Duration,
}

impl Default for InteractOptions {
    fn default() -> Self {
        Self {
            retry_match: 3,
            retry_hover: 3,
            button: MouseButton::Left,
            keywords: Vec::new(),
            hover_settle: Duration::from_millis(120),
        }
    }
}

/// True when `seen` contains any keyword, ignoring case.
pub fn keywords_match(seen: Option<&str>, keywords: &[String]) -> bool {
    let Some(seen) = seen else { return false };
    let seen = seen.to_lowercase();
    keywords.iter().any(|k| seen.contains(&k.to_lowercase()))
}

fn locate_in(frame: &RgbaImage, name: &str, locator: &Locator, attempt: u32) -> Result<Region> {
    match locator {
        Locator::Color { rgb, tolerance, tolerance_step } => {
            let widened = (*tolerance as u32 + attempt * *tolerance_step as u32).min(u8::MAX as u32) as u8;
            find_color_box(frame, *rgb, widened)
        }
        Locator::Template { image, scales, min_confidence } => {
            find_subimage(frame, image, *scales)?.ensure_confidence(name, *min_confidence)
        }
        Locator::Fixed(region) => Ok(region.clone()),
    }
}

/// Binds the shared mouse to one window and a hover-text reader.
pub struct Interactor<'a> {
    mouse: &'a mut Mouse,
    window: &'a mut dyn WindowHandle,
    reader: &'a dyn TextReader,
    hover_area: Rect,
}

impl<'a> Interactor<'a> {
    pub fn new(
        mouse: &'a mut Mouse,
        window: &'a mut dyn WindowHandle,
        reader: &'a dyn TextReader,
        hover_area: Rect,
    ) -> Self {
        logger::register_prefix("guard", logger::COLOR_MAGENTA);
        Self { mouse, window, reader, hover_area }
    }

    fn origin(&self) -> Result<Point> {
        self.window
            .region()
            .map(|r| r.origin())
            .ok_or_else(|| Error::Capture(format!("window {} is gone", self.window.id())))
    }

    fn capture(&mut self, rect: Option<CaptureRect>) -> Result<RgbaImage> {
        self.window
            .capture(rect)
            .map(|c| c.to_rgba())
            .ok_or_else(|| Error::Capture(format!("window {} returned no pixels", self.window.id())))
    }

    /// LOCATE: up to `retry_match` fresh screenshots. Returns the region in
    /// window coordinates.
    pub fn locate(&mut self, target: &Target, retry_match: u32) -> Result<Region> {
        let attempts = retry_match.max(1);
        let mut last = None;
        for k in 0..attempts {
            self.mouse.control().check()?;
            let frame = self.capture(None)?;
            match locate_in(&frame, &target.name, &target.locator, k) {
                Ok(region) => return Ok(region),
                Err(e) if e.is_locate_miss() => {
                    logger::debug_p("guard", &format!("{}: locate {}/{}: {}", target.name, k + 1, attempts, e));
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| Error::NoMatchFound(target.name.clone())))
    }

    /// Text currently shown in the hover area.
    pub fn hover_text(&mut self) -> Result<Option<String>> {
        let bb = self.hover_area.bounding_box();
        let rect = CaptureRect { l: bb.x0, t: bb.y0, w: bb.width(), h: bb.height() };
        let shot = self.capture(Some(rect))?;
        let gray = image::imageops::grayscale(&shot);
        Ok(self.reader.read(&gray))
    }

    /// Run one guarded interaction and return the clicked screen point.
    pub fn interact(&mut self, target: &Target, options: &InteractOptions) -> Result<Point> {
        let control = self.mouse.control().clone();
        control.guarded(|| self.attempt(target, options))
    }

    fn attempt(&mut self, target: &Target, options: &InteractOptions) -> Result<Point> {
        let cycles = options.retry_hover.max(1);
        let mut seen = None;
        for cycle in 0..cycles {
            let region = self.locate(target, options.retry_match)?;
            let origin = self.origin()?;
            let on_screen = region.transform(origin.x, origin.y);
            let point = self.mouse.sample_point(&on_screen).unwrap_or_else(|| on_screen.get_center());

            if options.keywords.is_empty() {
                self.mouse.move_and_click(point, options.button)?;
                logger::info_p("guard", &format!("{}: clicked {:?}", target.name, point));
                return Ok(point);
            }

            self.mouse.move_to(point, None)?;
            self.mouse.control().sleep(options.hover_settle)?;
            seen = self.hover_text()?;
            if keywords_match(seen.as_deref(), &options.keywords) {
                self.mouse.click(options.button)?;
                logger::info_p("guard", &format!("{}: verified {:?}, clicked {:?}", target.name, seen, point));
                return Ok(point);
            }
            logger::warn_p(
                "guard",
                &format!("{}: hover {}/{} read {:?}, want {:?}", target.name, cycle + 1, cycles, seen, options.keywords),
            );
        }
        Err(Error::VerificationMismatch {
            target: target.name.clone(),
            expected: options.keywords.clone(),
            seen,
            attempts: cycles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::{GrayImage, Rgba};
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect as IpRect;

    use crate::control::ControlHandle;
    use crate::platform::stub::{InputEvent, StubInput, StubWindow};
    use crate::settings::MotionSettings;
    use crate::types::WindowRect;

    const WIN: WindowRect = WindowRect { l: 100, t: 50, w: 400, h: 300 };

    fn frame_with(rgb: [u8; 3]) -> RgbaImage {
        let mut img = RgbaImage::from_pixel(400, 300, Rgba([15, 15, 15, 255]));
        draw_filled_rect_mut(&mut img, IpRect::at(200, 150).of_size(30, 20), Rgba([rgb[0], rgb[1], rgb[2], 255]));
        img
    }

    fn mouse() -> (Mouse, crate::platform::stub::InputLog) {
        let input = StubInput::at(Point::new(310, 205));
        let log = input.log();
        let control = ControlHandle::with_timing(Duration::from_millis(20), Duration::from_secs(30));
        (Mouse::with_seed(Box::new(input), control, MotionSettings::default(), 17), log)
    }

    fn quick(keywords: &[&str]) -> InteractOptions {
        InteractOptions {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            hover_settle: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[test]
    fn keyword_match_ignores_case() {
        let kw = vec!["Tree".to_string(), "oak".to_string()];
        assert!(keywords_match(Some("Chop down TREE"), &kw));
        assert!(keywords_match(Some("Oak log"), &kw));
        assert!(!keywords_match(Some("Walk here"), &kw));
        assert!(!keywords_match(None, &kw));
    }

    #[test]
    fn verified_click_lands_inside_the_translated_region() {
        let (mut mouse, log) = mouse();
        let mut win = StubWindow::with_frame(1, WIN, frame_with([0, 200, 0]));
        let reader = |_: &GrayImage| Some("Chop down Tree".to_string());
        let mut it = Interactor::new(&mut mouse, &mut win, &reader, Rect::new(0, 0, 300, 24));

        let point = it.interact(&Target::color("tree", [0, 200, 0], 5), &quick(&["tree"])).unwrap();
        assert!(point.x >= 300 && point.x < 330 && point.y >= 200 && point.y < 220, "{:?}", point);
        assert_eq!(mouse.position(), point);

        let events = log.lock().unwrap().clone();
        assert!(events.contains(&InputEvent::Button(MouseButton::Left, true)));
        assert_eq!(events.last(), Some(&InputEvent::Block(false)));
    }

    #[test]
    fn persistent_mismatch_runs_exactly_retry_hover_cycles() {
        let (mut mouse, log) = mouse();
        let mut win = StubWindow::with_frame(1, WIN, frame_with([0, 200, 0]));
        let captures = win.captures();
        let reads = AtomicUsize::new(0);
        let reader = |_: &GrayImage| {
            reads.fetch_add(1, Ordering::SeqCst);
            Some("Walk here".to_string())
        };
        let mut it = Interactor::new(&mut mouse, &mut win, &reader, Rect::new(0, 0, 300, 24));

        let err = it.interact(&Target::color("tree", [0, 200, 0], 5), &quick(&["tree"])).unwrap_err();
        match err {
            Error::VerificationMismatch { attempts, seen, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(seen.as_deref(), Some("Walk here"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(reads.load(Ordering::SeqCst), 3);
        assert_eq!(captures.load(Ordering::SeqCst), 6);
        assert!(!log.lock().unwrap().iter().any(|e| matches!(e, InputEvent::Button(..))));
    }

    #[test]
    fn missing_target_fails_after_retry_match_captures() {
        let (mut mouse, _) = mouse();
        let mut win = StubWindow::with_frame(1, WIN, frame_with([0, 200, 0]));
        let captures = win.captures();
        let reader = |_: &GrayImage| None;
        let mut it = Interactor::new(&mut mouse, &mut win, &reader, Rect::new(0, 0, 300, 24));

        let res = it.interact(&Target::color("rock", [200, 0, 200], 10), &quick(&["rock"]));
        assert!(matches!(res, Err(Error::NoMatchFound(_))));
        assert_eq!(captures.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn tolerance_widens_between_locate_attempts() {
        let (mut mouse, _) = mouse();
        let mut win = StubWindow::with_frame(1, WIN, frame_with([0, 185, 0]));
        let captures = win.captures();
        let reader = |_: &GrayImage| None;
        let mut it = Interactor::new(&mut mouse, &mut win, &reader, Rect::new(0, 0, 300, 24));

        let target = Target {
            name: "tree".into(),
            locator: Locator::Color { rgb: [0, 200, 0], tolerance: 5, tolerance_step: 10 },
        };
        it.interact(&target, &quick(&[])).unwrap();
        assert_eq!(captures.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn low_template_confidence_is_reported() {
        let (mut mouse, _) = mouse();
        let mut win = StubWindow::with_frame(1, WIN, frame_with([0, 200, 0]));
        let reader = |_: &GrayImage| None;
        let mut it = Interactor::new(&mut mouse, &mut win, &reader, Rect::new(0, 0, 300, 24));

        let mut badge = RgbaImage::from_pixel(12, 12, Rgba([250, 0, 0, 255]));
        badge.put_pixel(6, 6, Rgba([0, 0, 250, 255]));
        let target = Target::template("badge", badge, ScaleRange::default(), 0.99);
        let res = it.interact(&target, &InteractOptions { retry_match: 2, ..quick(&[]) });
        assert!(matches!(res, Err(Error::LowConfidence { .. })));
    }

    #[test]
    fn terminated_before_start_touches_nothing() {
        let (mut mouse, log) = mouse();
        mouse.control().request_terminate();
        let mut win = StubWindow::with_frame(1, WIN, frame_with([0, 200, 0]));
        let captures = win.captures();
        let reader = |_: &GrayImage| None;
        let mut it = Interactor::new(&mut mouse, &mut win, &reader, Rect::new(0, 0, 300, 24));

        let res = it.interact(&Target::fixed("spot", Region::rect(0, 0, 10, 10)), &quick(&[]));
        assert!(matches!(res, Err(Error::Terminated)));
        assert_eq!(captures.load(Ordering::SeqCst), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn hover_text_reads_the_configured_strip() {
        let (mut mouse, _) = mouse();
        let mut win = StubWindow::with_frame(1, WIN, frame_with([0, 200, 0]));
        let reader = |img: &GrayImage| Some(format!("{}x{}", img.width(), img.height()));
        let mut it = Interactor::new(&mut mouse, &mut win, &reader, Rect::new(0, 0, 300, 24));
        assert_eq!(it.hover_text().unwrap().as_deref(), Some("300x24"));
    }
}
