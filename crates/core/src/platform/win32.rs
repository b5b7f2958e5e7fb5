use std::mem;

use windows::Win32::Foundation::{BOOL, HWND, LPARAM, POINT, RECT, TRUE};
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC, GetDIBits,
    ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, SRCCOPY,
};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    BlockInput, SendInput, VkKeyScanW, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT,
    KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP, KEYEVENTF_UNICODE, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP,
    MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP, MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP,
    MOUSEEVENTF_WHEEL, MOUSEINPUT, MOUSE_EVENT_FLAGS, VIRTUAL_KEY, VK_BACK, VK_CONTROL, VK_DOWN,
    VK_ESCAPE, VK_LEFT, VK_MENU, VK_RETURN, VK_RIGHT, VK_SHIFT, VK_SPACE, VK_TAB, VK_UP,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetCursorPos, GetSystemMetrics, GetWindowRect, GetWindowTextW, IsWindow,
    IsWindowVisible, SetCursorPos, SetForegroundWindow, SM_CXSCREEN, SM_CYSCREEN,
};

use crate::logger;
use crate::types::*;
use super::{title_matches, InputDevice, Platform, WindowHandle};

const WHEEL_DELTA: i32 = 120;

unsafe extern "system" fn enum_windows_cb(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let found = &mut *(lparam.0 as *mut Vec<isize>);
    found.push(hwnd.0 as isize);
    TRUE
}

fn window_title(hwnd: HWND) -> String {
    let mut buf = [0u16; 512];
    let len = unsafe { GetWindowTextW(hwnd, &mut buf) };
    String::from_utf16_lossy(&buf[..len.max(0) as usize])
}

pub struct Win32Platform;

impl Win32Platform {
    pub fn new() -> Self {
        Win32Platform
    }
}

impl Platform for Win32Platform {
    fn get_instances(&self, pattern: &str) -> Vec<(WindowId, String)> {
        let mut raw: Vec<isize> = Vec::new();
        unsafe {
            let _ = EnumWindows(Some(enum_windows_cb), LPARAM(&mut raw as *mut Vec<isize> as isize));
        }
        let mut windows = Vec::new();
        for id in raw {
            let hwnd = HWND(id as *mut _);
            if !unsafe { IsWindowVisible(hwnd) }.as_bool() {
                continue;
            }
            let title = window_title(hwnd);
            if !title.trim().is_empty() && title_matches(pattern, &title) {
                logger::info_p("windows", &format!("found window: \"{}\" (id: {})", title, id));
                windows.push((id as WindowId, title));
            }
        }
        windows
    }

    fn create_window(&self, _pattern: &str, window_id: WindowId) -> Box<dyn WindowHandle> {
        let mut win = Win32Window { hwnd: window_id as isize, title: String::new(), rect: None };
        win.update();
        Box::new(win)
    }

    fn create_input(&self) -> Box<dyn InputDevice> {
        Box::new(Win32Input)
    }
}

struct Win32Window {
    hwnd: isize,
    title: String,
    rect: Option<WindowRect>,
}

// HWND is only ever used as an opaque id from the actor thread.
unsafe impl Send for Win32Window {}

impl Win32Window {
    fn handle(&self) -> HWND {
        HWND(self.hwnd as *mut _)
    }
}

impl WindowHandle for Win32Window {
    fn id(&self) -> WindowId {
        self.hwnd as WindowId
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn region(&self) -> Option<WindowRect> {
        self.rect
    }

    fn update(&mut self) {
        let hwnd = self.handle();
        if !unsafe { IsWindow(hwnd) }.as_bool() {
            self.rect = None;
            return;
        }
        self.title = window_title(hwnd);
        let mut rc = RECT::default();
        self.rect = unsafe { GetWindowRect(hwnd, &mut rc) }
            .ok()
            .map(|_| WindowRect::new(rc.left, rc.top, rc.right - rc.left, rc.bottom - rc.top));
    }

    fn activate(&mut self) {
        unsafe {
            let _ = SetForegroundWindow(self.handle());
        }
    }

    fn capture(&mut self, rect: Option<CaptureRect>) -> Option<Capture> {
        self.update();
        let win = self.rect?;
        let (l, t, w, h) = match rect {
            Some(r) => (win.l + r.l, win.t + r.t, r.w, r.h),
            None => (win.l, win.t, win.w, win.h),
        };
        if w <= 0 || h <= 0 {
            return None;
        }
        unsafe { grab_screen(l, t, w, h) }
    }
}

/// BitBlt a screen rectangle into a top-down 32-bit DIB.
unsafe fn grab_screen(l: i32, t: i32, w: i32, h: i32) -> Option<Capture> {
    let screen = GetDC(HWND::default());
    let mem_dc = CreateCompatibleDC(screen);
    let bitmap = CreateCompatibleBitmap(screen, w, h);
    let old = SelectObject(mem_dc, bitmap);

    let copied = BitBlt(mem_dc, 0, 0, w, h, screen, l, t, SRCCOPY).is_ok();

    let mut bmi = BITMAPINFO::default();
    bmi.bmiHeader = BITMAPINFOHEADER {
        biSize: mem::size_of::<BITMAPINFOHEADER>() as u32,
        biWidth: w,
        biHeight: -h,
        biPlanes: 1,
        biBitCount: 32,
        biCompression: BI_RGB.0,
        ..Default::default()
    };
    let mut data = vec![0u8; (w * h * 4) as usize];
    let lines = if copied {
        GetDIBits(mem_dc, bitmap, 0, h as u32, Some(data.as_mut_ptr() as *mut _), &mut bmi, DIB_RGB_COLORS)
    } else {
        0
    };

    SelectObject(mem_dc, old);
    let _ = DeleteObject(bitmap);
    let _ = DeleteDC(mem_dc);
    ReleaseDC(HWND::default(), screen);

    if lines == 0 {
        logger::warn_p("windows", "screen capture failed");
        return None;
    }
    // GDI leaves alpha at zero
    for px in data.chunks_exact_mut(4) {
        px[3] = 255;
    }
    Some(Capture { data, width: w as u32, height: h as u32, bytes_per_row: (w * 4) as u32 })
}

fn named_key(key: &str) -> Option<VIRTUAL_KEY> {
    Some(match key {
        "enter" | "return" => VK_RETURN,
        "escape" | "esc" => VK_ESCAPE,
        "delete" | "backspace" => VK_BACK,
        "tab" => VK_TAB,
        "space" => VK_SPACE,
        "up" => VK_UP,
        "down" => VK_DOWN,
        "left" => VK_LEFT,
        "right" => VK_RIGHT,
        "shift" => VK_SHIFT,
        "ctrl" | "control" => VK_CONTROL,
        "alt" => VK_MENU,
        _ => return None,
    })
}

fn key_input(vk: VIRTUAL_KEY, scan: u16, flags: KEYBD_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT { wVk: vk, wScan: scan, dwFlags: flags, time: 0, dwExtraInfo: 0 },
        },
    }
}

fn mouse_input(flags: MOUSE_EVENT_FLAGS, data: i32) -> INPUT {
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT { dx: 0, dy: 0, mouseData: data as u32, dwFlags: flags, time: 0, dwExtraInfo: 0 },
        },
    }
}

fn send(inputs: &[INPUT]) {
    unsafe {
        SendInput(inputs, mem::size_of::<INPUT>() as i32);
    }
}

/// Keys and modifiers of a combo like `ctrl+shift+a`.
fn combo_keys(combo: &str) -> Option<Vec<VIRTUAL_KEY>> {
    combo
        .split('+')
        .map(|part| {
            let part = part.trim().to_lowercase();
            named_key(&part).or_else(|| {
                let mut chars = part.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => {
                        let scan = unsafe { VkKeyScanW(c as u16) };
                        (scan != -1).then(|| VIRTUAL_KEY((scan & 0xff) as u16))
                    }
                    _ => None,
                }
            })
        })
        .collect()
}

/// `SetCursorPos` for moves, `SendInput` for buttons, wheel and keys.
struct Win32Input;

impl InputDevice for Win32Input {
    fn cursor(&self) -> Point {
        let mut p = POINT::default();
        match unsafe { GetCursorPos(&mut p) } {
            Ok(()) => Point::new(p.x, p.y),
            Err(_) => Point::default(),
        }
    }

    fn move_cursor(&mut self, to: Point) {
        unsafe {
            let _ = SetCursorPos(to.x, to.y);
        }
    }

    fn button(&mut self, button: MouseButton, down: bool) {
        let flags = match (button, down) {
            (MouseButton::Left, true) => MOUSEEVENTF_LEFTDOWN,
            (MouseButton::Left, false) => MOUSEEVENTF_LEFTUP,
            (MouseButton::Right, true) => MOUSEEVENTF_RIGHTDOWN,
            (MouseButton::Right, false) => MOUSEEVENTF_RIGHTUP,
            (MouseButton::Middle, true) => MOUSEEVENTF_MIDDLEDOWN,
            (MouseButton::Middle, false) => MOUSEEVENTF_MIDDLEUP,
        };
        send(&[mouse_input(flags, 0)]);
    }

    fn scroll(&mut self, clicks: i32) {
        send(&[mouse_input(MOUSEEVENTF_WHEEL, clicks * WHEEL_DELTA)]);
    }

    fn tap(&mut self, key: &str) {
        let Some(keys) = combo_keys(key) else {
            logger::warn_p("windows", &format!("unknown key: {}", key));
            return;
        };
        let none = KEYBD_EVENT_FLAGS(0);
        let mut inputs: Vec<INPUT> = keys.iter().map(|&vk| key_input(vk, 0, none)).collect();
        inputs.extend(keys.iter().rev().map(|&vk| key_input(vk, 0, KEYEVENTF_KEYUP)));
        send(&inputs);
    }

    fn type_text(&mut self, text: &str) {
        for unit in text.encode_utf16() {
            send(&[
                key_input(VIRTUAL_KEY(0), unit, KEYEVENTF_UNICODE),
                key_input(VIRTUAL_KEY(0), unit, KEYEVENTF_UNICODE | KEYEVENTF_KEYUP),
            ]);
        }
    }

    fn block_input(&mut self, block: bool) {
        // needs elevation; without it the call fails and input stays live
        if unsafe { BlockInput(block) }.is_err() {
            logger::debug_p("windows", &format!("BlockInput({}) refused", block));
        }
    }

    fn screen_size(&self) -> (i32, i32) {
        unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) }
    }
}
