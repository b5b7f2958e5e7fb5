use crate::control::ControlHandle;

/// What a global hotkey asks the control handle to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyAction {
    TogglePause,
    Terminate,
}

/// Map a letter pressed with the platform modifier (Cmd on macOS, Ctrl
/// elsewhere) plus Shift to an action.
pub fn action_for(key: char, modifier: bool, shift: bool, other_modifiers: bool) -> Option<HotkeyAction> {
    if !modifier || !shift || other_modifiers {
        return None;
    }
    match key.to_ascii_lowercase() {
        'p' => Some(HotkeyAction::TogglePause),
        'k' => Some(HotkeyAction::Terminate),
        _ => None,
    }
}

/// Hotkey ids registered by the Windows listener and the letter each stands for.
const HOTKEY_IDS: [(i32, char); 2] = [(1, 'p'), (2, 'k')];

/// Action for a `WM_HOTKEY` id.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn action_for_hotkey_id(id: usize) -> Option<HotkeyAction> {
    let (_, key) = HOTKEY_IDS.iter().find(|(i, _)| *i as usize == id)?;
    action_for(*key, true, true, false)
}

pub fn apply(control: &ControlHandle, action: HotkeyAction) {
    match action {
        HotkeyAction::TogglePause => {
            control.toggle_pause();
        }
        HotkeyAction::Terminate => control.request_terminate(),
    }
}

/// Start a background thread that listens for Cmd+Shift+P (pause) and
/// Cmd+Shift+K (terminate) and forwards them to `control`.
#[cfg(target_os = "macos")]
pub fn start_hotkey_listener(control: ControlHandle) {
    use std::ffi::c_void;

    type CGEventTapProxy = *mut c_void;
    type CGEventRef = *mut c_void;
    type CFMachPortRef = *mut c_void;
    type CFRunLoopSourceRef = *mut c_void;
    type CFRunLoopRef = *mut c_void;
    type CFStringRef = *const c_void;
    type CGEventMask = u64;
    type CGEventType = u32;
    type CGEventFlags = u64;

    type CGEventTapCallBack = unsafe extern "C" fn(
        CGEventTapProxy,
        CGEventType,
        CGEventRef,
        *mut c_void,
    ) -> CGEventRef;

    const K_CG_HID_EVENT_TAP: u32 = 0;
    const K_CG_HEAD_INSERT_EVENT_TAP: u32 = 0;
    const K_CG_EVENT_TAP_OPTION_LISTEN_ONLY: u32 = 1;
    const CG_EVENT_KEY_DOWN: u32 = 10;

    const K_CG_EVENT_FLAG_MASK_ALTERNATE: u64 = 0x00080000;
    const K_CG_EVENT_FLAG_MASK_SHIFT: u64 = 0x00020000;
    const K_CG_EVENT_FLAG_MASK_COMMAND: u64 = 0x00100000;
    const K_CG_EVENT_FLAG_MASK_CONTROL: u64 = 0x00040000;
    const K_CG_KEYBOARD_EVENT_KEYCODE: u32 = 9;

    const KEYCODE_P: i64 = 35;
    const KEYCODE_K: i64 = 40;

    extern "C" {
        fn CGEventTapCreate(
            tap: u32,
            place: u32,
            options: u32,
            events_of_interest: CGEventMask,
            callback: CGEventTapCallBack,
            user_info: *mut c_void,
        ) -> CFMachPortRef;
        fn CFMachPortCreateRunLoopSource(allocator: *const c_void, port: CFMachPortRef, order: i64) -> CFRunLoopSourceRef;
        fn CFRunLoopGetCurrent() -> CFRunLoopRef;
        fn CFRunLoopAddSource(rl: CFRunLoopRef, source: CFRunLoopSourceRef, mode: CFStringRef);
        fn CFRunLoopRun();
        fn CGEventGetFlags(event: CGEventRef) -> CGEventFlags;
        fn CGEventGetIntegerValueField(event: CGEventRef, field: u32) -> i64;
        fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);

        static kCFRunLoopCommonModes: CFStringRef;
    }

    unsafe extern "C" fn hotkey_callback(
        _proxy: CGEventTapProxy,
        event_type: CGEventType,
        event: CGEventRef,
        user_info: *mut c_void,
    ) -> CGEventRef {
        unsafe {
            if event_type != CG_EVENT_KEY_DOWN {
                return event;
            }
            let flags = CGEventGetFlags(event);
            let key = match CGEventGetIntegerValueField(event, K_CG_KEYBOARD_EVENT_KEYCODE) {
                KEYCODE_P => 'p',
                KEYCODE_K => 'k',
                _ => return event,
            };
            let others = flags & (K_CG_EVENT_FLAG_MASK_ALTERNATE | K_CG_EVENT_FLAG_MASK_CONTROL) != 0;
            if let Some(action) = action_for(
                key,
                flags & K_CG_EVENT_FLAG_MASK_COMMAND != 0,
                flags & K_CG_EVENT_FLAG_MASK_SHIFT != 0,
                others,
            ) {
                let control = &*(user_info as *const ControlHandle);
                apply(control, action);
            }
            event
        }
    }

    std::thread::spawn(move || {
        unsafe {
            let mask: CGEventMask = 1 << CG_EVENT_KEY_DOWN;
            let control_ptr = Box::into_raw(Box::new(control)) as *mut c_void;

            let tap = CGEventTapCreate(
                K_CG_HID_EVENT_TAP,
                K_CG_HEAD_INSERT_EVENT_TAP,
                K_CG_EVENT_TAP_OPTION_LISTEN_ONLY,
                mask,
                hotkey_callback,
                control_ptr,
            );

            if tap.is_null() {
                crate::logger::error(
                    "failed to create event tap for global hotkeys, \
                     grant Accessibility permission to your terminal",
                );
                drop(Box::from_raw(control_ptr as *mut ControlHandle));
                return;
            }

            let source = CFMachPortCreateRunLoopSource(std::ptr::null(), tap, 0);
            let run_loop = CFRunLoopGetCurrent();
            CFRunLoopAddSource(run_loop, source, kCFRunLoopCommonModes);
            CGEventTapEnable(tap, true);
            crate::logger::info("global hotkeys Cmd+Shift+P / Cmd+Shift+K active");

            CFRunLoopRun(); // blocks forever
        }
    });
}

/// Ctrl+Shift+P / Ctrl+Shift+K via `RegisterHotKey` on a message-loop thread.
#[cfg(target_os = "windows")]
pub fn start_hotkey_listener(control: ControlHandle) {
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::Input::KeyboardAndMouse::{RegisterHotKey, MOD_CONTROL, MOD_NOREPEAT, MOD_SHIFT};
    use windows::Win32::UI::WindowsAndMessaging::{GetMessageW, MSG, WM_HOTKEY};

    std::thread::spawn(move || {
        for (id, key) in HOTKEY_IDS {
            // letter virtual-key codes are their upper-case ASCII
            let vk = key.to_ascii_uppercase() as u32;
            let registered = unsafe { RegisterHotKey(HWND::default(), id, MOD_CONTROL | MOD_SHIFT | MOD_NOREPEAT, vk) };
            if let Err(e) = registered {
                crate::logger::error(&format!(
                    "failed to register global hotkey Ctrl+Shift+{}: {}",
                    key.to_ascii_uppercase(),
                    e
                ));
            }
        }
        crate::logger::info("global hotkeys Ctrl+Shift+P / Ctrl+Shift+K registered");

        // hotkeys registered without a window post to this thread's queue
        let mut msg = MSG::default();
        while unsafe { GetMessageW(&mut msg, HWND::default(), 0, 0) }.0 > 0 {
            if msg.message != WM_HOTKEY {
                continue;
            }
            if let Some(action) = action_for_hotkey_id(msg.wParam.0) {
                apply(&control, action);
            }
        }
    });
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub fn start_hotkey_listener(_control: ControlHandle) {
    // Global hotkeys not supported on this platform
}
