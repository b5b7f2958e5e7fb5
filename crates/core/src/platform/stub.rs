use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::RgbaImage;

use crate::types::*;
use crate::logger;
use super::{title_matches, InputDevice, Platform, WindowHandle};

const SCREEN_W: i32 = 1920;
const SCREEN_H: i32 = 1080;

/// Virtual desktop used off macOS/Windows and under `--stub`.
pub struct StubPlatform;

impl Platform for StubPlatform {
    fn get_instances(&self, pattern: &str) -> Vec<(WindowId, String)> {
        logger::info_p("stub", &format!("get_instances(\"{}\")", pattern));
        let known = [(10001, "Old School RuneScape"), (10002, "RuneLite - Stub")];
        let found: Vec<(WindowId, String)> = known
            .iter()
            .filter(|(_, title)| title_matches(pattern, title))
            .map(|&(id, title)| (id, title.to_string()))
            .collect();
        if found.is_empty() {
            vec![(30001, format!("Window<{}>", pattern))]
        } else {
            found
        }
    }

    fn create_window(&self, pattern: &str, window_id: WindowId) -> Box<dyn WindowHandle> {
        logger::info_p("stub", &format!("create_window(\"{}\", {})", pattern, window_id));
        Box::new(StubWindow::new(window_id, WindowRect::new(0, 0, SCREEN_W, SCREEN_H)))
    }

    fn create_input(&self) -> Box<dyn InputDevice> {
        Box::new(StubInput::new())
    }
}

/// Window that serves a fixed frame and counts captures.
pub struct StubWindow {
    window_id: WindowId,
    title: String,
    rect: WindowRect,
    frame: Option<RgbaImage>,
    captures: Arc<AtomicUsize>,
}

impl StubWindow {
    pub fn new(window_id: WindowId, rect: WindowRect) -> Self {
        Self {
            window_id,
            title: format!("Stub-{}", window_id),
            rect,
            frame: None,
            captures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Window at `rect` whose every capture shows `frame`.
    pub fn with_frame(window_id: WindowId, rect: WindowRect, frame: RgbaImage) -> Self {
        Self { frame: Some(frame), ..Self::new(window_id, rect) }
    }

    /// Shared capture counter, readable after the window is moved away.
    pub fn captures(&self) -> Arc<AtomicUsize> {
        self.captures.clone()
    }
}

impl WindowHandle for StubWindow {
    fn id(&self) -> WindowId { self.window_id }
    fn title(&self) -> &str { &self.title }
    fn region(&self) -> Option<WindowRect> { Some(self.rect) }

    fn update(&mut self) {
        logger::debug_p("stub", &format!("win({}).update()", self.window_id));
    }

    fn activate(&mut self) {
        logger::debug_p("stub", &format!("win({}).activate()", self.window_id));
    }

    fn capture(&mut self, rect: Option<CaptureRect>) -> Option<Capture> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let frame = self.frame.as_ref()?;
        let Some(r) = rect else {
            return Some(Capture::from_rgba(frame));
        };
        let x0 = r.l.clamp(0, frame.width() as i32) as u32;
        let y0 = r.t.clamp(0, frame.height() as i32) as u32;
        let x1 = (r.l + r.w).clamp(0, frame.width() as i32) as u32;
        let y1 = (r.t + r.h).clamp(0, frame.height() as i32) as u32;
        let crop = image::imageops::crop_imm(frame, x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0));
        Some(Capture::from_rgba(&crop.to_image()))
    }
}

/// Everything a [`StubInput`] was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Move(Point),
    Button(MouseButton, bool),
    Scroll(i32),
    Tap(String),
    Type(String),
    Block(bool),
}

pub type InputLog = Arc<Mutex<Vec<InputEvent>>>;

/// Recording input device on a virtual 1920x1080 screen.
pub struct StubInput {
    pos: Point,
    screen: (i32, i32),
    log: InputLog,
}

impl Default for StubInput {
    fn default() -> Self {
        Self::new()
    }
}

impl StubInput {
    pub fn new() -> Self {
        Self::at(Point::new(SCREEN_W / 2, SCREEN_H / 2))
    }

    pub fn at(pos: Point) -> Self {
        Self { pos, screen: (SCREEN_W, SCREEN_H), log: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Shared event log, readable after the device is moved into a `Mouse`.
    pub fn log(&self) -> InputLog {
        self.log.clone()
    }

    fn record(&self, event: InputEvent) {
        if let Ok(mut log) = self.log.lock() {
            log.push(event);
        }
    }
}

impl InputDevice for StubInput {
    fn cursor(&self) -> Point {
        self.pos
    }

    fn move_cursor(&mut self, to: Point) {
        self.pos = Point::new(to.x.clamp(0, self.screen.0 - 1), to.y.clamp(0, self.screen.1 - 1));
        self.record(InputEvent::Move(self.pos));
    }

    fn button(&mut self, button: MouseButton, down: bool) {
        self.record(InputEvent::Button(button, down));
    }

    fn scroll(&mut self, clicks: i32) {
        self.record(InputEvent::Scroll(clicks));
    }

    fn tap(&mut self, key: &str) {
        logger::debug_p("stub", &format!("tap(\"{}\")", key));
        self.record(InputEvent::Tap(key.to_string()));
    }

    fn type_text(&mut self, text: &str) {
        logger::debug_p("stub", &format!("type_text(\"{}\")", text));
        self.record(InputEvent::Type(text.to_string()));
    }

    fn block_input(&mut self, block: bool) {
        self.record(InputEvent::Block(block));
    }

    fn screen_size(&self) -> (i32, i32) {
        self.screen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn instances_follow_the_title_pattern() {
        let found = StubPlatform.get_instances("runescape");
        assert_eq!(found, vec![(10001, "Old School RuneScape".to_string())]);
        assert_eq!(StubPlatform.get_instances("nothing")[0].0, 30001);
    }

    #[test]
    fn partial_capture_is_window_relative() {
        let mut frame = RgbaImage::from_pixel(100, 50, Rgba([0, 0, 0, 255]));
        frame.put_pixel(12, 7, Rgba([255, 0, 0, 255]));
        let mut win = StubWindow::with_frame(1, WindowRect::new(300, 200, 100, 50), frame);
        let counter = win.captures();
        let cap = win.capture(Some(CaptureRect { l: 10, t: 5, w: 20, h: 200 })).unwrap().to_rgba();
        assert_eq!(cap.dimensions(), (20, 45));
        assert_eq!(cap.get_pixel(2, 2).0, [255, 0, 0, 255]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn input_moves_are_clamped_and_recorded() {
        let mut input = StubInput::new();
        let log = input.log();
        input.move_cursor(Point::new(-5, 5000));
        input.button(MouseButton::Left, true);
        assert_eq!(input.cursor(), Point::new(0, SCREEN_H - 1));
        assert_eq!(
            *log.lock().unwrap(),
            vec![InputEvent::Move(Point::new(0, SCREEN_H - 1)), InputEvent::Button(MouseButton::Left, true)]
        );
    }
}
