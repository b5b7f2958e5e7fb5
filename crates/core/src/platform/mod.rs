pub mod stub;
pub mod hotkey;

#[cfg(target_os = "macos")]
pub mod darwin;
#[cfg(target_os = "windows")]
pub mod win32;

use regex::RegexBuilder;

use crate::types::*;
use crate::logger;

/// Handle to a specific OS window: geometry and screenshots.
pub trait WindowHandle: Send {
    fn id(&self) -> WindowId;
    fn title(&self) -> &str;
    /// Screen-space bounds, `None` once the window is gone.
    fn region(&self) -> Option<WindowRect>;
    fn update(&mut self);
    fn activate(&mut self);
    /// Screenshot of the whole window, or of `rect` relative to its origin.
    fn capture(&mut self, rect: Option<CaptureRect>) -> Option<Capture>;
}

/// Low-level pointer and keyboard injection in screen coordinates.
pub trait InputDevice: Send {
    fn cursor(&self) -> Point;
    fn move_cursor(&mut self, to: Point);
    fn button(&mut self, button: MouseButton, down: bool);
    /// Positive scrolls up.
    fn scroll(&mut self, clicks: i32);
    fn tap(&mut self, key: &str);
    fn type_text(&mut self, text: &str);
    /// Suppress physical user input while a gesture plays. Best effort.
    fn block_input(&mut self, block: bool);
    fn screen_size(&self) -> (i32, i32);
}

/// Platform-level operations (window enumeration, factories).
pub trait Platform: Send {
    fn get_instances(&self, pattern: &str) -> Vec<(WindowId, String)>;
    fn create_window(&self, pattern: &str, window_id: WindowId) -> Box<dyn WindowHandle>;
    fn create_input(&self) -> Box<dyn InputDevice>;
}

/// Case-insensitive regex match of a window title. An invalid pattern
/// falls back to a plain substring test.
pub fn title_matches(pattern: &str, title: &str) -> bool {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) => re.is_match(title),
        Err(_) => title.to_lowercase().contains(&pattern.to_lowercase()),
    }
}

/// Create the platform appropriate for the current OS.
pub fn create_platform(force_stub: bool) -> Box<dyn Platform> {
    if force_stub {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        return Box::new(stub::StubPlatform);
    }
    #[cfg(target_os = "macos")]
    {
        logger::register_prefix("darwin", logger::COLOR_GRAY);
        return Box::new(darwin::DarwinPlatform::new());
    }
    #[cfg(target_os = "windows")]
    {
        logger::register_prefix("windows", logger::COLOR_GRAY);
        return Box::new(win32::Win32Platform::new());
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        return Box::new(stub::StubPlatform);
    }
}
