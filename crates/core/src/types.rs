use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Window identifier (CGWindowID on macOS, HWND on Windows)
pub type WindowId = u64;

/// Integer screen or image coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    pub fn distance(self, other: Point) -> f64 {
        let dx = (other.x - self.x) as f64;
        let dy = (other.y - self.y) as f64;
        dx.hypot(dy)
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self::new(x, y)
    }
}

/// Screen-coordinate bounding box of a window
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowRect {
    pub l: i32,
    pub t: i32,
    pub w: i32,
    pub h: i32,
}

impl WindowRect {
    pub fn new(l: i32, t: i32, w: i32, h: i32) -> Self {
        Self { l, t, w, h }
    }

    pub fn origin(&self) -> Point {
        Point::new(self.l, self.t)
    }

    /// Screen point at the given fraction of the window's width and height.
    pub fn at_ratio(&self, x_ratio: f64, y_ratio: f64) -> Point {
        Point::new(
            self.l + (x_ratio * self.w as f64).round() as i32,
            self.t + (y_ratio * self.h as f64).round() as i32,
        )
    }
}

/// Sub-region for partial capture (relative to window origin)
#[derive(Debug, Clone, Copy)]
pub struct CaptureRect {
    pub l: i32,
    pub t: i32,
    pub w: i32,
    pub h: i32,
}

/// Raw screenshot pixel data (BGRA)
#[derive(Debug, Clone)]
pub struct Capture {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
}

impl Capture {
    /// Repack an RGBA image as a tightly packed BGRA capture.
    pub fn from_rgba(image: &RgbaImage) -> Self {
        let mut data = Vec::with_capacity(image.as_raw().len());
        for px in image.pixels() {
            let [r, g, b, a] = px.0;
            data.extend_from_slice(&[b, g, r, a]);
        }
        Self {
            data,
            width: image.width(),
            height: image.height(),
            bytes_per_row: image.width() * 4,
        }
    }

    /// Convert to an RGBA image, dropping any row padding.
    pub fn to_rgba(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let idx = (y * self.bytes_per_row + x * 4) as usize;
            match self.data.get(idx..idx + 4) {
                Some(&[b, g, r, a]) => image::Rgba([r, g, b, a]),
                _ => image::Rgba([0, 0, 0, 255]),
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "middle" => Some(Self::Middle),
            _ => None,
        }
    }
}

/// One discovered bot script and its runtime state
pub struct BotEntry {
    pub name: String,
    pub window_pattern: String,
    pub description: String,
    pub enabled: bool,
    pub instances: Vec<Instance>,
    pub error: Option<String>,
    pub script_path: std::path::PathBuf,
}

/// One bot instance bound to a specific window
pub struct Instance {
    pub id: String,
    pub window_id: WindowId,
    pub window_title: String,
    pub status: String,
    pub error: Option<String>,
}

impl Instance {
    pub fn new(bot_name: &str, window_id: WindowId, window_title: String) -> Self {
        Self {
            id: format!("{}-{}", bot_name, window_id),
            window_id,
            window_title,
            status: String::new(),
            error: None,
        }
    }
}

/// Command from TUI to orchestrator
pub enum Command {
    Toggle(usize),
    StartStop,
    Restart(usize),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Running,
    Stopping,
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_swaps_channels_both_ways() {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, image::Rgba([10, 20, 30, 255]));
        img.put_pixel(1, 0, image::Rgba([200, 100, 50, 128]));
        let cap = Capture::from_rgba(&img);
        assert_eq!(&cap.data[..4], &[30, 20, 10, 255]);
        assert_eq!(cap.to_rgba(), img);
    }

    #[test]
    fn capture_ignores_row_padding() {
        let cap = Capture {
            data: vec![1, 2, 3, 4, 9, 9, 9, 9],
            width: 1,
            height: 1,
            bytes_per_row: 8,
        };
        assert_eq!(cap.to_rgba().get_pixel(0, 0).0, [3, 2, 1, 4]);
    }

    #[test]
    fn window_ratio_is_relative_to_origin() {
        let win = WindowRect::new(100, 50, 200, 100);
        assert_eq!(win.at_ratio(0.5, 0.5), Point::new(200, 100));
    }
}
