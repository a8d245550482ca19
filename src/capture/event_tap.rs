//! Quartz Event Tap Handler
//!
//! Adapts macOS `CGEventTap` deliveries into [`CaptureSource::on_raw_event`]
//! calls. The tap is listen-only and runs its own CFRunLoop on a dedicated
//! `event-tap` thread, which therefore owns the capture source and the
//! buffer's producer half.
//!
//! # Permissions
//!
//! Requires Accessibility permissions in System Settings > Privacy & Security.

use super::source::{CaptureOutcome, CaptureSource};
use super::types::{CaptureContext, RawEvent};
use crate::time::{HostAnchor, SessionClock};
use core_foundation::base::{CFRelease, CFTypeRef, TCFType};
use core_foundation::runloop::kCFRunLoopCommonModes;
use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

type CGEventRef = CFTypeRef;
type CGEventTapProxy = *const c_void;
type CGEventMask = u64;

#[repr(u32)]
#[derive(Copy, Clone)]
#[allow(dead_code)]
enum CGEventTapLocation {
    HidEventTap = 0,
    SessionEventTap = 1,
}

#[repr(u32)]
#[derive(Copy, Clone)]
#[allow(dead_code)]
enum CGEventTapPlacement {
    HeadInsertEventTap = 0,
    TailAppendEventTap = 1,
}

#[repr(u32)]
#[derive(Copy, Clone)]
#[allow(dead_code)]
enum CGEventTapOptions {
    DefaultTap = 0,
    ListenOnly = 1,
}

mod cg_constants {
    pub const CG_EVENT_LEFT_MOUSE_DOWN: u32 = 1;
    pub const CG_EVENT_LEFT_MOUSE_UP: u32 = 2;
    pub const CG_EVENT_RIGHT_MOUSE_DOWN: u32 = 3;
    pub const CG_EVENT_RIGHT_MOUSE_UP: u32 = 4;
    pub const CG_EVENT_MOUSE_MOVED: u32 = 5;
    pub const CG_EVENT_LEFT_MOUSE_DRAGGED: u32 = 6;
    pub const CG_EVENT_RIGHT_MOUSE_DRAGGED: u32 = 7;
    pub const CG_EVENT_KEY_DOWN: u32 = 10;
    pub const CG_EVENT_KEY_UP: u32 = 11;
    pub const CG_EVENT_SCROLL_WHEEL: u32 = 22;
    pub const CG_EVENT_OTHER_MOUSE_DOWN: u32 = 25;
    pub const CG_EVENT_OTHER_MOUSE_UP: u32 = 26;
    pub const CG_EVENT_OTHER_MOUSE_DRAGGED: u32 = 27;
    pub const CG_EVENT_TAP_DISABLED_BY_TIMEOUT: u32 = 0xFFFF_FFFE;
    pub const CG_EVENT_TAP_DISABLED_BY_USER_INPUT: u32 = 0xFFFF_FFFF;

    pub const CG_MOUSE_EVENT_CLICK_STATE: u32 = 1;
    pub const CG_MOUSE_EVENT_PRESSURE: u32 = 2;
    pub const CG_MOUSE_EVENT_BUTTON_NUMBER: u32 = 3;
    pub const CG_MOUSE_EVENT_SUBTYPE: u32 = 7;
    pub const CG_KEYBOARD_EVENT_AUTOREPEAT: u32 = 8;
    pub const CG_KEYBOARD_EVENT_KEYCODE: u32 = 9;
    pub const CG_KEYBOARD_EVENT_KEYBOARD_TYPE: u32 = 10;
    pub const CG_SCROLL_WHEEL_EVENT_DELTA_AXIS_1: u32 = 11;
    pub const CG_SCROLL_WHEEL_EVENT_DELTA_AXIS_2: u32 = 12;
    pub const CG_EVENT_TARGET_UNIX_PROCESS_ID: u32 = 41;
}
use cg_constants::*;

fn create_event_mask() -> CGEventMask {
    [
        CG_EVENT_LEFT_MOUSE_DOWN,
        CG_EVENT_LEFT_MOUSE_UP,
        CG_EVENT_RIGHT_MOUSE_DOWN,
        CG_EVENT_RIGHT_MOUSE_UP,
        CG_EVENT_MOUSE_MOVED,
        CG_EVENT_LEFT_MOUSE_DRAGGED,
        CG_EVENT_RIGHT_MOUSE_DRAGGED,
        CG_EVENT_KEY_DOWN,
        CG_EVENT_KEY_UP,
        CG_EVENT_SCROLL_WHEEL,
        CG_EVENT_OTHER_MOUSE_DOWN,
        CG_EVENT_OTHER_MOUSE_UP,
        CG_EVENT_OTHER_MOUSE_DRAGGED,
    ]
    .iter()
    .fold(0, |mask, t| mask | (1u64 << t))
}

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGEventTapCreate(
        tap: CGEventTapLocation,
        place: CGEventTapPlacement,
        options: CGEventTapOptions,
        events_of_interest: CGEventMask,
        callback: extern "C" fn(CGEventTapProxy, u32, CGEventRef, *mut c_void) -> CGEventRef,
        user_info: *mut c_void,
    ) -> CFTypeRef;

    fn CGEventTapEnable(tap: CFTypeRef, enable: bool);

    fn CGEventGetLocation(event: CGEventRef) -> CGPoint;
    fn CGEventGetIntegerValueField(event: CGEventRef, field: u32) -> i64;
    fn CGEventGetDoubleValueField(event: CGEventRef, field: u32) -> f64;
    fn CGEventGetTimestamp(event: CGEventRef) -> u64;
    fn CGEventKeyboardGetUnicodeString(
        event: CGEventRef,
        max_len: usize,
        actual_len: *mut usize,
        buffer: *mut u16,
    );
}

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    fn CFMachPortCreateRunLoopSource(allocator: CFTypeRef, port: CFTypeRef, order: i64) -> CFTypeRef;
    fn CFRunLoopGetCurrent() -> CFTypeRef;
    fn CFRunLoopAddSource(rl: CFTypeRef, source: CFTypeRef, mode: CFTypeRef);
    fn CFRunLoopRun();
    fn CFRunLoopStop(rl: CFTypeRef);
}

extern "C" {
    fn AXIsProcessTrusted() -> bool;
    fn AXIsProcessTrustedWithOptions(options: CFTypeRef) -> bool;
    fn proc_name(pid: i32, buffer: *mut c_void, buffersize: u32) -> i32;
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
struct CGPoint {
    x: f64,
    y: f64,
}

/// How a Quartz event type maps onto a record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TapClass {
    Mouse { down: bool, moving: bool },
    Key { down: bool },
    Wheel,
}

fn classify(cg_type: u32) -> Option<TapClass> {
    let class = match cg_type {
        CG_EVENT_MOUSE_MOVED => TapClass::Mouse { down: false, moving: true },
        CG_EVENT_LEFT_MOUSE_DOWN | CG_EVENT_RIGHT_MOUSE_DOWN | CG_EVENT_OTHER_MOUSE_DOWN => {
            TapClass::Mouse { down: true, moving: false }
        }
        CG_EVENT_LEFT_MOUSE_UP | CG_EVENT_RIGHT_MOUSE_UP | CG_EVENT_OTHER_MOUSE_UP => {
            TapClass::Mouse { down: false, moving: false }
        }
        CG_EVENT_LEFT_MOUSE_DRAGGED | CG_EVENT_RIGHT_MOUSE_DRAGGED | CG_EVENT_OTHER_MOUSE_DRAGGED => {
            TapClass::Mouse { down: true, moving: true }
        }
        CG_EVENT_KEY_DOWN => TapClass::Key { down: true },
        CG_EVENT_KEY_UP => TapClass::Key { down: false },
        CG_EVENT_SCROLL_WHEEL => TapClass::Wheel,
        _ => return None,
    };
    Some(class)
}

/// State touched only from the run loop thread
struct TapState {
    source: CaptureSource,
    clock: SessionClock,
    anchor: Option<HostAnchor>,
    last_pid: Option<i32>,
    last_name: String,
}

impl TapState {
    fn session_time(&mut self, host_nanos: u64) -> f64 {
        let clock = &self.clock;
        self.anchor
            .get_or_insert_with(|| HostAnchor::new(clock, host_nanos))
            .to_session_secs(host_nanos)
    }

    /// Resolve `pid` into `last_name`, cached across consecutive events
    fn refresh_process_name(&mut self, pid: i32) {
        if self.last_pid != Some(pid) {
            let mut buf = [0u8; 256];
            // Safety: buf outlives the call and its length is passed
            let len = unsafe { proc_name(pid, buf.as_mut_ptr() as *mut c_void, buf.len() as u32) };
            self.last_name.clear();
            if len > 0 {
                self.last_name
                    .push_str(&String::from_utf8_lossy(&buf[..len as usize]));
            }
            self.last_pid = Some(pid);
        }
    }
}

/// Context for the event tap callback.
///
/// Safety: `state` is only dereferenced inside the callback, which runs
/// exclusively on the tap's CFRunLoop thread.
struct EventTapContext {
    state: UnsafeCell<TapState>,
    running: Arc<AtomicBool>,
    event_count: AtomicU64,
}

unsafe impl Sync for EventTapContext {}

// CGEventTapCreate's callback cannot capture, so the context is global
static CONTEXT_PTR: AtomicPtr<EventTapContext> = AtomicPtr::new(ptr::null_mut());
static RUN_LOOP_PTR: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());
static TAP_PTR: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

/// Quartz event tap feeding a [`CaptureSource`]
pub struct EventTap {
    thread_handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl EventTap {
    pub fn new() -> Self {
        Self {
            thread_handle: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start delivering events to `source`
    ///
    /// Spawns the `event-tap` thread, which owns `source` until [`stop`](Self::stop).
    pub fn start(&mut self, source: CaptureSource, clock: SessionClock) -> crate::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(crate::Error::Capture("Event tap already running".into()));
        }

        if !check_accessibility_permissions() {
            self.running.store(false, Ordering::SeqCst);
            return Err(crate::Error::Capture(
                "Accessibility permissions not granted. Enable them in System Settings > Privacy & Security > Accessibility".into(),
            ));
        }

        let context = Box::new(EventTapContext {
            state: UnsafeCell::new(TapState {
                source,
                clock,
                anchor: None,
                last_pid: None,
                last_name: String::new(),
            }),
            running: Arc::clone(&self.running),
            event_count: AtomicU64::new(0),
        });
        let context_ptr = Box::into_raw(context);
        CONTEXT_PTR.store(context_ptr, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("event-tap".into())
            .spawn(|| {
                if let Err(e) = run_event_tap_loop() {
                    error!("Event tap error: {}", e);
                }
            })
            .map_err(|e| {
                CONTEXT_PTR.store(ptr::null_mut(), Ordering::SeqCst);
                // Safety: the pointer came from Box::into_raw above and no thread saw it
                unsafe {
                    drop(Box::from_raw(context_ptr));
                }
                self.running.store(false, Ordering::SeqCst);
                crate::Error::Capture(format!("Failed to spawn event tap thread: {}", e))
            })?;

        self.thread_handle = Some(handle);
        info!("Event tap started");
        Ok(())
    }

    /// Stop the run loop and release the capture source
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let run_loop = RUN_LOOP_PTR.swap(ptr::null_mut(), Ordering::SeqCst);
        if !run_loop.is_null() {
            unsafe {
                CFRunLoopStop(run_loop as CFTypeRef);
            }
        }

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }

        // The run loop thread has exited, so nothing else holds the context
        let context_ptr = CONTEXT_PTR.swap(ptr::null_mut(), Ordering::SeqCst);
        if !context_ptr.is_null() {
            let ctx = unsafe { Box::from_raw(context_ptr) };
            info!(
                "Event tap stopped after {} events",
                ctx.event_count.load(Ordering::Relaxed)
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Events delivered to the source so far
    pub fn event_count(&self) -> u64 {
        let ctx = CONTEXT_PTR.load(Ordering::SeqCst);
        if ctx.is_null() {
            0
        } else {
            unsafe { (*ctx).event_count.load(Ordering::Relaxed) }
        }
    }
}

impl Default for EventTap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventTap {
    fn drop(&mut self) {
        self.stop();
    }
}

extern "C" fn event_tap_callback(
    _proxy: CGEventTapProxy,
    event_type: u32,
    event: CGEventRef,
    _user_info: *mut c_void,
) -> CGEventRef {
    if event_type == CG_EVENT_TAP_DISABLED_BY_TIMEOUT || event_type == CG_EVENT_TAP_DISABLED_BY_USER_INPUT {
        let tap = TAP_PTR.load(Ordering::SeqCst);
        if !tap.is_null() {
            warn!("Event tap disabled by the system (type {:#x}), re-enabling", event_type);
            unsafe { CGEventTapEnable(tap as CFTypeRef, true) };
        }
        return event;
    }

    let ctx = CONTEXT_PTR.load(Ordering::SeqCst);
    if ctx.is_null() {
        return event;
    }
    let context = unsafe { &*ctx };
    if !context.running.load(Ordering::Relaxed) {
        return event;
    }

    let Some(class) = classify(event_type) else {
        return event;
    };

    // Safety: only the run loop thread reaches this point
    let state = unsafe { &mut *context.state.get() };
    let time = state.session_time(unsafe { CGEventGetTimestamp(event) });

    let raw = match class {
        TapClass::Mouse { down, moving } => {
            let location = unsafe { CGEventGetLocation(event) };
            RawEvent::Mouse {
                time,
                x: location.x,
                y: location.y,
                pressure: unsafe { CGEventGetDoubleValueField(event, CG_MOUSE_EVENT_PRESSURE) },
                button: unsafe { CGEventGetIntegerValueField(event, CG_MOUSE_EVENT_BUTTON_NUMBER) },
                clicks: unsafe { CGEventGetIntegerValueField(event, CG_MOUSE_EVENT_CLICK_STATE) },
                subtype: unsafe { CGEventGetIntegerValueField(event, CG_MOUSE_EVENT_SUBTYPE) },
                down,
                moving,
            }
        }
        TapClass::Key { down } => {
            let mut unit = 0u16;
            let mut len = 0usize;
            unsafe { CGEventKeyboardGetUnicodeString(event, 1, &mut len, &mut unit) };
            RawEvent::Key {
                time,
                keycode: unsafe { CGEventGetIntegerValueField(event, CG_KEYBOARD_EVENT_KEYCODE) },
                character: if len > 0 { unit } else { 0 },
                keyboard: unsafe { CGEventGetIntegerValueField(event, CG_KEYBOARD_EVENT_KEYBOARD_TYPE) },
                autorepeat: unsafe { CGEventGetIntegerValueField(event, CG_KEYBOARD_EVENT_AUTOREPEAT) } != 0,
                down,
            }
        }
        TapClass::Wheel => RawEvent::Wheel {
            time,
            dx: unsafe { CGEventGetIntegerValueField(event, CG_SCROLL_WHEEL_EVENT_DELTA_AXIS_2) },
            dy: unsafe { CGEventGetIntegerValueField(event, CG_SCROLL_WHEEL_EVENT_DELTA_AXIS_1) },
        },
    };

    let pid = unsafe { CGEventGetIntegerValueField(event, CG_EVENT_TARGET_UNIX_PROCESS_ID) } as i32;
    let outcome = if pid > 0 {
        state.refresh_process_name(pid);
        let TapState { source, last_name, .. } = state;
        source.on_raw_event(&raw, &CaptureContext::for_process(Some(pid), last_name))
    } else {
        state.source.on_raw_event(&raw, &CaptureContext::default())
    };

    if matches!(outcome, CaptureOutcome::Enqueued { .. } | CaptureOutcome::Dropped { .. }) {
        context.event_count.fetch_add(1, Ordering::Relaxed);
    }

    event
}

/// Disables and releases the tap on drop
struct EventTapGuard(CFTypeRef);

impl Drop for EventTapGuard {
    fn drop(&mut self) {
        TAP_PTR.store(ptr::null_mut(), Ordering::SeqCst);
        unsafe {
            CGEventTapEnable(self.0, false);
            CFRelease(self.0);
        }
    }
}

struct RunLoopSourceGuard(CFTypeRef);

impl Drop for RunLoopSourceGuard {
    fn drop(&mut self) {
        unsafe { CFRelease(self.0) }
    }
}

struct RunLoopPtrGuard;

impl Drop for RunLoopPtrGuard {
    fn drop(&mut self) {
        RUN_LOOP_PTR.store(ptr::null_mut(), Ordering::SeqCst);
    }
}

fn run_event_tap_loop() -> crate::Result<()> {
    let tap = unsafe {
        CGEventTapCreate(
            CGEventTapLocation::SessionEventTap,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::ListenOnly,
            create_event_mask(),
            event_tap_callback,
            ptr::null_mut(),
        )
    };
    if tap.is_null() {
        return Err(crate::Error::Capture(
            "Failed to create event tap. Ensure accessibility permissions are granted.".into(),
        ));
    }
    let _tap_guard = EventTapGuard(tap);
    TAP_PTR.store(tap as *mut c_void, Ordering::SeqCst);

    let run_loop_source = unsafe { CFMachPortCreateRunLoopSource(ptr::null(), tap, 0) };
    if run_loop_source.is_null() {
        return Err(crate::Error::Capture("Failed to create run loop source".into()));
    }
    let _source_guard = RunLoopSourceGuard(run_loop_source);

    let run_loop = unsafe { CFRunLoopGetCurrent() };
    RUN_LOOP_PTR.store(run_loop as *mut c_void, Ordering::SeqCst);
    let _ptr_guard = RunLoopPtrGuard;

    unsafe {
        CFRunLoopAddSource(run_loop, run_loop_source, kCFRunLoopCommonModes as CFTypeRef);
        CGEventTapEnable(tap, true);
    }

    info!("Event tap loop running");
    // Returns once CFRunLoopStop is called
    unsafe { CFRunLoopRun() };
    info!("Event tap loop stopped");
    Ok(())
}

/// Check if accessibility permissions are granted
pub fn check_accessibility_permissions() -> bool {
    unsafe { AXIsProcessTrusted() }
}

/// Request accessibility permissions (shows the system dialog)
pub fn request_accessibility_permissions() -> bool {
    use core_foundation::boolean::CFBoolean;
    use core_foundation::dictionary::CFDictionary;
    use core_foundation::string::CFString;

    let key = CFString::new("AXTrustedCheckOptionPrompt");
    let value = CFBoolean::true_value();
    let options = CFDictionary::from_CFType_pairs(&[(key.as_CFType(), value.as_CFType())]);

    unsafe { AXIsProcessTrustedWithOptions(options.as_concrete_TypeRef() as CFTypeRef) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessibility_check() {
        // False in CI, but must not panic
        let _has_access = check_accessibility_permissions();
    }

    #[test]
    fn test_classify_mouse_types() {
        assert_eq!(
            classify(CG_EVENT_MOUSE_MOVED),
            Some(TapClass::Mouse { down: false, moving: true })
        );
        assert_eq!(
            classify(CG_EVENT_RIGHT_MOUSE_DOWN),
            Some(TapClass::Mouse { down: true, moving: false })
        );
        assert_eq!(
            classify(CG_EVENT_OTHER_MOUSE_DRAGGED),
            Some(TapClass::Mouse { down: true, moving: true })
        );
        assert_eq!(
            classify(CG_EVENT_LEFT_MOUSE_UP),
            Some(TapClass::Mouse { down: false, moving: false })
        );
    }

    #[test]
    fn test_classify_key_and_wheel() {
        assert_eq!(classify(CG_EVENT_KEY_DOWN), Some(TapClass::Key { down: true }));
        assert_eq!(classify(CG_EVENT_KEY_UP), Some(TapClass::Key { down: false }));
        assert_eq!(classify(CG_EVENT_SCROLL_WHEEL), Some(TapClass::Wheel));
        // Modifier-only changes are not recorded
        assert_eq!(classify(12), None);
        assert_eq!(classify(999), None);
    }

    #[test]
    fn test_event_mask_covers_classified_types() {
        let mask = create_event_mask();
        for t in 0..32u32 {
            assert_eq!(mask & (1 << t) != 0, classify(t).is_some(), "type {}", t);
        }
    }

    #[test]
    fn test_event_tap_initial_state() {
        let mut tap = EventTap::new();
        assert!(!tap.is_running());
        assert_eq!(tap.event_count(), 0);
        // Stopping a tap that never started is a no-op
        tap.stop();
        assert!(!tap.is_running());
    }
}
