use std::process::Command as ProcessCommand;

use core_foundation::array::CFArray;
use core_foundation::base::TCFType;
use core_foundation::dictionary::CFDictionary;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use core_graphics::display::CGDisplay;
use core_graphics::event::*;
use core_graphics::event_source::*;
use core_graphics::geometry::*;
use core_graphics::window::*;

use crate::logger;
use crate::types::*;
use super::{title_matches, InputDevice, Platform, WindowHandle};

// AppleScript key codes for special keys
fn applescript_key_code(key: &str) -> Option<u16> {
    match key {
        "enter" | "return" => Some(36),
        "escape" | "esc" => Some(53),
        "delete" | "backspace" => Some(51),
        "tab" => Some(48),
        "space" => Some(49),
        "up" => Some(126),
        "down" => Some(125),
        "left" => Some(123),
        "right" => Some(124),
        _ => None,
    }
}

fn osascript(script: &str) {
    ProcessCommand::new("osascript")
        .arg("-e")
        .arg(script)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .ok();
}

/// `System Events` clause for a key combo such as `cmd+a` or `Enter`.
fn keystroke_clause(key: &str) -> Option<String> {
    let parts: Vec<&str> = key.split('+').collect();
    let main_key = *parts.last().unwrap_or(&key);
    let mut modifiers = Vec::new();

    for part in &parts[..parts.len().saturating_sub(1)] {
        match part.to_lowercase().as_str() {
            "cmd" | "command" => modifiers.push("command down"),
            "shift" => modifiers.push("shift down"),
            "ctrl" | "control" => modifiers.push("control down"),
            "alt" | "option" => modifiers.push("option down"),
            _ => {}
        }
    }

    let mut chars = main_key.chars();
    let main_key_lower = match (chars.next(), chars.next()) {
        (Some(ch), None) => {
            if ch.is_ascii_uppercase() && !modifiers.contains(&"shift down") {
                modifiers.push("shift down");
            }
            ch.to_lowercase().to_string()
        }
        _ => main_key.to_lowercase(),
    };

    let key_part = if let Some(code) = applescript_key_code(&main_key_lower) {
        format!("key code {}", code)
    } else if main_key_lower.chars().count() == 1 {
        format!("keystroke \"{}\"", main_key_lower.replace('"', "\\\""))
    } else {
        return None;
    };

    if modifiers.is_empty() {
        Some(key_part)
    } else {
        Some(format!("{} using {{{}}}", key_part, modifiers.join(", ")))
    }
}

pub struct DarwinPlatform;

impl DarwinPlatform {
    pub fn new() -> Self {
        DarwinPlatform
    }
}

impl Platform for DarwinPlatform {
    fn get_instances(&self, pattern: &str) -> Vec<(WindowId, String)> {
        let mut windows = Vec::new();

        unsafe {
            let option = kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements;
            let window_list_ref = CGWindowListCopyWindowInfo(option, kCGNullWindowID);
            if window_list_ref.is_null() {
                logger::warn_p("darwin", "failed to get window list");
                return windows;
            }

            let list: CFArray = CFArray::wrap_under_create_rule(window_list_ref as _);
            let values = list.get_all_values();

            for dict_ptr in &values {
                let dict: CFDictionary<CFString, *const std::ffi::c_void> =
                    CFDictionary::wrap_under_get_rule(*dict_ptr as _);

                let name = get_cf_string(&dict, "kCGWindowName").unwrap_or_default();
                let owner = get_cf_string(&dict, "kCGWindowOwnerName").unwrap_or_default();
                let layer = get_cf_number(&dict, "kCGWindowLayer");
                let Some(wid) = get_cf_number(&dict, "kCGWindowNumber") else { continue };

                let title = if !name.is_empty() { &name } else { &owner };
                let is_match = !title.is_empty()
                    && (title_matches(pattern, title)
                        || (!owner.is_empty() && title_matches(pattern, &owner)));

                if is_match && layer == Some(0) {
                    logger::info_p("darwin", &format!("found window: \"{}\" (id: {})", title, wid));
                    windows.push((wid as WindowId, title.to_string()));
                }
            }
        }

        windows
    }

    fn create_window(&self, _pattern: &str, window_id: WindowId) -> Box<dyn WindowHandle> {
        let mut win = DarwinWindow {
            window_id: window_id as CGWindowID,
            title: String::new(),
            pid: None,
            rect: None,
        };
        win.do_update();
        Box::new(win)
    }

    fn create_input(&self) -> Box<dyn InputDevice> {
        Box::new(DarwinInput)
    }
}

struct DarwinWindow {
    window_id: CGWindowID,
    title: String,
    pid: Option<i32>,
    rect: Option<WindowRect>,
}

impl DarwinWindow {
    fn do_update(&mut self) {
        unsafe {
            let option = kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements;
            let window_list_ref = CGWindowListCopyWindowInfo(option, kCGNullWindowID);
            if window_list_ref.is_null() {
                self.rect = None;
                return;
            }

            let list: CFArray = CFArray::wrap_under_create_rule(window_list_ref as _);
            let values = list.get_all_values();

            for dict_ptr in &values {
                let dict: CFDictionary<CFString, *const std::ffi::c_void> =
                    CFDictionary::wrap_under_get_rule(*dict_ptr as _);

                if get_cf_number(&dict, "kCGWindowNumber") != Some(self.window_id as i64) {
                    continue;
                }

                let name = get_cf_string(&dict, "kCGWindowName").unwrap_or_default();
                let owner = get_cf_string(&dict, "kCGWindowOwnerName").unwrap_or_default();
                self.title = if !name.is_empty() { name } else { owner };
                self.pid = get_cf_number(&dict, "kCGWindowOwnerPID").map(|v| v as i32);

                if let Some(bounds) = get_cf_dict(&dict, "kCGWindowBounds") {
                    self.rect = Some(WindowRect::new(
                        get_cf_number(&bounds, "X").unwrap_or(0) as i32,
                        get_cf_number(&bounds, "Y").unwrap_or(0) as i32,
                        get_cf_number(&bounds, "Width").unwrap_or(0) as i32,
                        get_cf_number(&bounds, "Height").unwrap_or(0) as i32,
                    ));
                }
                return;
            }

            self.rect = None;
        }
    }
}

impl WindowHandle for DarwinWindow {
    fn id(&self) -> WindowId {
        self.window_id as WindowId
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn region(&self) -> Option<WindowRect> {
        self.rect
    }

    fn update(&mut self) {
        self.do_update();
    }

    fn activate(&mut self) {
        if self.pid.is_none() {
            self.do_update();
        }
        if let Some(pid) = self.pid {
            osascript(&format!(
                "tell application \"System Events\" to set frontmost of first process whose unix id is {} to true",
                pid
            ));
        }
    }

    fn capture(&mut self, rect: Option<CaptureRect>) -> Option<Capture> {
        self.do_update();
        let win = self.rect?;

        // a null rect asks for the window's own bounds
        let cg_rect = match rect {
            Some(r) => CGRect::new(
                &CGPoint::new((win.l + r.l) as f64, (win.t + r.t) as f64),
                &CGSize::new(r.w as f64, r.h as f64),
            ),
            None => CGRect::new(&CGPoint::new(0.0, 0.0), &CGSize::new(0.0, 0.0)),
        };

        let image_option = kCGWindowImageBoundsIgnoreFraming | kCGWindowImageNominalResolution;
        let image = create_image(cg_rect, kCGWindowListOptionIncludingWindow, self.window_id, image_option)?;

        let cf_data = image.data();
        Some(Capture {
            data: cf_data.bytes().to_vec(),
            width: image.width() as u32,
            height: image.height() as u32,
            bytes_per_row: image.bytes_per_row() as u32,
        })
    }
}

/// Global pointer via `CGEvent`; keys go through System Events to the
/// frontmost process.
struct DarwinInput;

impl DarwinInput {
    fn source() -> Option<CGEventSource> {
        CGEventSource::new(CGEventSourceStateID::HIDSystemState).ok()
    }

    fn post_mouse(&self, kind: CGEventType, at: Point, button: CGMouseButton) {
        let Some(source) = Self::source() else { return };
        let point = CGPoint::new(at.x as f64, at.y as f64);
        if let Ok(event) = CGEvent::new_mouse_event(source, kind, point, button) {
            event.post(CGEventTapLocation::HID);
        }
    }
}

impl InputDevice for DarwinInput {
    fn cursor(&self) -> Point {
        Self::source()
            .and_then(|s| CGEvent::new(s).ok())
            .map(|e| {
                let p = e.location();
                Point::new(p.x.round() as i32, p.y.round() as i32)
            })
            .unwrap_or_default()
    }

    fn move_cursor(&mut self, to: Point) {
        self.post_mouse(CGEventType::MouseMoved, to, CGMouseButton::Left);
    }

    fn button(&mut self, button: MouseButton, down: bool) {
        let at = self.cursor();
        let (kind, cg_button) = match (button, down) {
            (MouseButton::Left, true) => (CGEventType::LeftMouseDown, CGMouseButton::Left),
            (MouseButton::Left, false) => (CGEventType::LeftMouseUp, CGMouseButton::Left),
            (MouseButton::Right, true) => (CGEventType::RightMouseDown, CGMouseButton::Right),
            (MouseButton::Right, false) => (CGEventType::RightMouseUp, CGMouseButton::Right),
            (MouseButton::Middle, true) => (CGEventType::OtherMouseDown, CGMouseButton::Center),
            (MouseButton::Middle, false) => (CGEventType::OtherMouseUp, CGMouseButton::Center),
        };
        self.post_mouse(kind, at, cg_button);
    }

    fn scroll(&mut self, clicks: i32) {
        let Some(source) = Self::source() else { return };
        if let Ok(event) = CGEvent::new_scroll_event(source, ScrollEventUnit::LINE, 1, clicks, 0, 0) {
            event.post(CGEventTapLocation::HID);
        }
    }

    fn tap(&mut self, key: &str) {
        match keystroke_clause(key) {
            Some(clause) => {
                osascript(&format!("tell application \"System Events\" to {}", clause));
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
            None => logger::warn_p("darwin", &format!("unknown key: {}", key)),
        }
    }

    fn type_text(&mut self, text: &str) {
        for ch in text.chars() {
            self.tap(&ch.to_string());
        }
    }

    fn block_input(&mut self, block: bool) {
        // no user-space equivalent of BlockInput on macOS
        logger::debug_p("darwin", &format!("block_input({}) ignored", block));
    }

    fn screen_size(&self) -> (i32, i32) {
        let bounds = CGDisplay::main().bounds();
        (bounds.size.width as i32, bounds.size.height as i32)
    }
}

// --- CF Dictionary helpers ---

unsafe fn get_cf_string(
    dict: &CFDictionary<CFString, *const std::ffi::c_void>,
    key: &str,
) -> Option<String> {
    let cf_key = CFString::new(key);
    let value = dict.find(&cf_key)?;
    let cf_str: CFString = CFString::wrap_under_get_rule(*value as _);
    Some(cf_str.to_string())
}

unsafe fn get_cf_number(
    dict: &CFDictionary<CFString, *const std::ffi::c_void>,
    key: &str,
) -> Option<i64> {
    let cf_key = CFString::new(key);
    let value = dict.find(&cf_key)?;
    let cf_num: CFNumber = CFNumber::wrap_under_get_rule(*value as _);
    cf_num.to_i64()
}

unsafe fn get_cf_dict(
    dict: &CFDictionary<CFString, *const std::ffi::c_void>,
    key: &str,
) -> Option<CFDictionary<CFString, *const std::ffi::c_void>> {
    let cf_key = CFString::new(key);
    let value = dict.find(&cf_key)?;
    Some(CFDictionary::wrap_under_get_rule(*value as _))
}
