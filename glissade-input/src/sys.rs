//! Low-level system bindings for macOS input APIs
//!
//! This module provides FFI bindings to:
//! - CGEventTap (interception at the session and HID tap locations)
//! - CGEvent (event creation, field access, and posting)
//! - IOHIDManager (device enumeration and hot-plug callbacks)
//! - CVDisplayLink (vsynced frame callbacks for the scroll animator)
//! - SkyLight (managed display spaces and symbolic hot keys)
#![allow(dead_code)]

use std::ffi::c_void;

// Core Foundation types
pub type CFTypeRef = *const c_void;
pub type CFAllocatorRef = *const c_void;
pub type CFStringRef = *const c_void;
pub type CFArrayRef = *const c_void;
pub type CFSetRef = *const c_void;
pub type CFNumberRef = *const c_void;
pub type CFDictionaryRef = *const c_void;
pub type CFMutableDictionaryRef = *mut c_void;
pub type CFRunLoopRef = *const c_void;
pub type CFRunLoopSourceRef = *mut c_void;
pub type CFMachPortRef = *mut c_void;
pub type CFIndex = isize;
pub type CFTypeID = usize;

// Core Graphics types
pub type CGEventRef = *mut c_void;
pub type CGEventSourceRef = *mut c_void;
pub type CGEventTapProxy = *mut c_void;
pub type CGFloat = f64;

// Core Video types
pub type CVDisplayLinkRef = *mut c_void;
pub type CVReturn = i32;

// IOKit/HID types
pub type IOHIDManagerRef = *mut c_void;
pub type IOHIDDeviceRef = *mut c_void;
pub type IOReturn = i32;

/// CGEventType enum values
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CGEventType {
    Null = 0,
    LeftMouseDown = 1,
    LeftMouseUp = 2,
    RightMouseDown = 3,
    RightMouseUp = 4,
    MouseMoved = 5,
    LeftMouseDragged = 6,
    RightMouseDragged = 7,
    KeyDown = 10,
    KeyUp = 11,
    FlagsChanged = 12,
    ScrollWheel = 22,
    TabletPointer = 23,
    TabletProximity = 24,
    OtherMouseDown = 25,
    OtherMouseUp = 26,
    OtherMouseDragged = 27,
    TapDisabledByTimeout = 0xFFFFFFFE,
    TapDisabledByUserInput = 0xFFFFFFFF,
}

/// CGEventTapLocation enum values
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CGEventTapLocation {
    HIDEventTap = 0,
    SessionEventTap = 1,
    AnnotatedSessionEventTap = 2,
}

/// CGEventTapPlacement enum values
#[repr(u32)]
#[derive(Debug, Clone, Copy)]
pub enum CGEventTapPlacement {
    HeadInsertEventTap = 0,
    TailAppendEventTap = 1,
}

/// CGEventTapOptions enum values
#[repr(u32)]
#[derive(Debug, Clone, Copy)]
pub enum CGEventTapOptions {
    Default = 0,
    ListenOnly = 1,
}

/// CGEventSourceStateID enum values
#[repr(i32)]
#[derive(Debug, Clone, Copy)]
pub enum CGEventSourceStateID {
    Private = -1,
    CombinedSessionState = 0,
    HIDSystemState = 1,
}

/// CGMouseButton enum values
#[repr(u32)]
#[derive(Debug, Clone, Copy)]
pub enum CGMouseButton {
    Left = 0,
    Right = 1,
    Center = 2,
}

/// CGScrollEventUnit enum values
#[repr(u32)]
#[derive(Debug, Clone, Copy)]
pub enum CGScrollEventUnit {
    Pixel = 0,
    Line = 1,
}

/// Documented CGEventField values
pub mod fields {
    pub const MOUSE_EVENT_CLICK_STATE: u32 = 1;
    pub const MOUSE_EVENT_BUTTON_NUMBER: u32 = 3;
    pub const MOUSE_EVENT_DELTA_X: u32 = 4;
    pub const MOUSE_EVENT_DELTA_Y: u32 = 5;
    pub const KEYBOARD_EVENT_AUTOREPEAT: u32 = 8;
    pub const KEYBOARD_EVENT_KEYCODE: u32 = 9;
    pub const SCROLL_WHEEL_EVENT_DELTA_AXIS_1: u32 = 11;
    pub const SCROLL_WHEEL_EVENT_DELTA_AXIS_2: u32 = 12;
    pub const EVENT_SOURCE_UNIX_PROCESS_ID: u32 = 41;
    /// Per-event user data; carries the synthetic-origin tag.
    pub const EVENT_SOURCE_USER_DATA: u32 = 42;
    pub const SCROLL_WHEEL_EVENT_IS_CONTINUOUS: u32 = 88;
    pub const SCROLL_WHEEL_EVENT_FIXED_PT_DELTA_AXIS_1: u32 = 93;
    pub const SCROLL_WHEEL_EVENT_FIXED_PT_DELTA_AXIS_2: u32 = 94;
    pub const SCROLL_WHEEL_EVENT_POINT_DELTA_AXIS_1: u32 = 96;
    pub const SCROLL_WHEEL_EVENT_POINT_DELTA_AXIS_2: u32 = 97;
    pub const SCROLL_WHEEL_EVENT_SCROLL_PHASE: u32 = 99;
    pub const SCROLL_WHEEL_EVENT_MOMENTUM_PHASE: u32 = 123;
}

/// CGScrollPhase values carried in SCROLL_WHEEL_EVENT_SCROLL_PHASE
pub mod scroll_phase {
    pub const NONE: i64 = 0;
    pub const BEGAN: i64 = 1;
    pub const CHANGED: i64 = 2;
    pub const ENDED: i64 = 4;
    pub const CANCELLED: i64 = 8;
    pub const MAY_BEGIN: i64 = 128;
}

/// CGMomentumScrollPhase values carried in SCROLL_WHEEL_EVENT_MOMENTUM_PHASE
pub mod momentum_phase {
    pub const NONE: i64 = 0;
    pub const BEGIN: i64 = 1;
    pub const CONTINUE: i64 = 2;
    pub const END: i64 = 3;
}

/// IOHIDEventPhase bits used by gesture events
pub mod gesture_phase {
    pub const BEGAN: i64 = 1;
    pub const CHANGED: i64 = 2;
    pub const ENDED: i64 = 4;
    pub const CANCELLED: i64 = 8;
}

/// Private gesture-event field ids and magic values.
///
/// These are reverse-engineered and undocumented; the window server
/// rejects gesture events that do not carry them exactly as written.
/// Carried forward bit-exact, never regenerated.
pub mod gesture {
    /// Settable event-type field (a created event starts as Null).
    pub const FIELD_EVENT_TYPE: u32 = 55;
    /// IOHID event type of the gesture payload.
    pub const FIELD_HID_TYPE: u32 = 110;
    pub const FIELD_ZOOM_VALUE: u32 = 113;
    pub const FIELD_SWIPE_TYPE_CONSTANT: u32 = 122;
    pub const FIELD_SWIPE_MOTION: u32 = 123;
    pub const FIELD_SWIPE_PROGRESS: u32 = 124;
    pub const FIELD_SWIPE_EXIT_SPEED: u32 = 129;
    pub const FIELD_PHASE: u32 = 132;
    pub const FIELD_SWIPE_PROGRESS_FLOAT_BITS: u32 = 135;
    pub const FIELD_SWIPE_INVERTED: u32 = 136;
    pub const FIELD_SWIPE_MOTION_ALT: u32 = 165;

    /// Companion event type (NSEventTypeGesture).
    pub const EVENT_TYPE_GESTURE: i64 = 29;
    /// Data-bearing gesture event type.
    pub const EVENT_TYPE_GESTURE_DATA: i64 = 30;

    pub const HID_TYPE_COMPANION: i64 = 33231;
    pub const HID_TYPE_DOCK_SWIPE: i64 = 1041;
    pub const HID_TYPE_ZOOM: i64 = 8;
}

/// Dock-swipe motion kinds carried in FIELD_SWIPE_MOTION
#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockSwipeType {
    Horizontal = 1,
    Vertical = 2,
    Pinch = 3,
}

impl DockSwipeType {
    /// The per-type "constant" the data event must carry: the f64 widening
    /// of the type's value reinterpreted as f32 bits (a denormal).
    pub fn type_constant(self) -> f64 {
        f32::from_bits(self as i64 as u32) as f64
    }
}

// CGPoint structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CGPoint {
    pub x: CGFloat,
    pub y: CGFloat,
}

impl CGPoint {
    pub fn new(x: CGFloat, y: CGFloat) -> Self {
        Self { x, y }
    }
}

// Event callback type
pub type CGEventTapCallBack = extern "C" fn(
    proxy: CGEventTapProxy,
    event_type: CGEventType,
    event: CGEventRef,
    user_info: *mut c_void,
) -> CGEventRef;

// HID hot-plug callback type
pub type IOHIDDeviceCallback = extern "C" fn(
    context: *mut c_void,
    result: IOReturn,
    sender: *mut c_void,
    device: IOHIDDeviceRef,
);

// Display link frame callback type. The timestamp arguments are opaque;
// callers use wall-clock microseconds instead.
pub type CVDisplayLinkOutputCallback = extern "C" fn(
    link: CVDisplayLinkRef,
    in_now: *const c_void,
    in_output_time: *const c_void,
    flags_in: u64,
    flags_out: *mut u64,
    user_info: *mut c_void,
) -> CVReturn;

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    pub static kCFAllocatorDefault: CFAllocatorRef;
    pub static kCFRunLoopDefaultMode: CFStringRef;
    pub static kCFRunLoopCommonModes: CFStringRef;
    pub static kCFTypeDictionaryKeyCallBacks: c_void;
    pub static kCFTypeDictionaryValueCallBacks: c_void;
    pub static kCFTypeArrayCallBacks: c_void;

    pub fn CFRunLoopGetCurrent() -> CFRunLoopRef;
    pub fn CFRunLoopGetMain() -> CFRunLoopRef;
    pub fn CFRunLoopRun();
    pub fn CFRunLoopStop(rl: CFRunLoopRef);
    pub fn CFRunLoopRunInMode(
        mode: CFStringRef,
        seconds: f64,
        return_after_source_handled: bool,
    ) -> i32;
    pub fn CFRunLoopAddSource(rl: CFRunLoopRef, source: CFRunLoopSourceRef, mode: CFStringRef);
    pub fn CFRunLoopRemoveSource(rl: CFRunLoopRef, source: CFRunLoopSourceRef, mode: CFStringRef);

    pub fn CFMachPortCreateRunLoopSource(
        allocator: CFAllocatorRef,
        port: CFMachPortRef,
        order: isize,
    ) -> CFRunLoopSourceRef;

    pub fn CFMachPortInvalidate(port: CFMachPortRef);
    pub fn CFRelease(cf: CFTypeRef);
    pub fn CFRetain(cf: CFTypeRef) -> CFTypeRef;

    pub fn CFStringCreateWithCString(
        allocator: CFAllocatorRef,
        c_str: *const i8,
        encoding: u32,
    ) -> CFStringRef;
    pub fn CFStringGetCString(
        string: CFStringRef,
        buffer: *mut i8,
        buffer_size: CFIndex,
        encoding: u32,
    ) -> bool;
    pub fn CFStringGetLength(string: CFStringRef) -> CFIndex;

    pub fn CFNumberCreate(
        allocator: CFAllocatorRef,
        number_type: CFIndex,
        value_ptr: *const c_void,
    ) -> CFNumberRef;
    pub fn CFNumberGetValue(
        number: CFNumberRef,
        number_type: CFIndex,
        value_ptr: *mut c_void,
    ) -> bool;

    pub fn CFDictionaryCreateMutable(
        allocator: CFAllocatorRef,
        capacity: CFIndex,
        key_callbacks: *const c_void,
        value_callbacks: *const c_void,
    ) -> CFMutableDictionaryRef;
    pub fn CFDictionarySetValue(
        dict: CFMutableDictionaryRef,
        key: *const c_void,
        value: *const c_void,
    );
    pub fn CFDictionaryGetValue(dict: CFDictionaryRef, key: *const c_void) -> *const c_void;

    pub fn CFArrayCreate(
        allocator: CFAllocatorRef,
        values: *const *const c_void,
        count: CFIndex,
        callbacks: *const c_void,
    ) -> CFArrayRef;
    pub fn CFArrayGetCount(array: CFArrayRef) -> CFIndex;
    pub fn CFArrayGetValueAtIndex(array: CFArrayRef, index: CFIndex) -> *const c_void;

    pub fn CFSetGetCount(set: CFSetRef) -> CFIndex;
    pub fn CFSetGetValues(set: CFSetRef, values: *mut *const c_void);

    pub static kCFPreferencesAnyApplication: CFStringRef;
    pub fn CFPreferencesGetAppBooleanValue(
        key: CFStringRef,
        application_id: CFStringRef,
        key_exists_and_valid: *mut bool,
    ) -> bool;
}

/// Global preference key for natural ("content tracks finger") scrolling.
pub const K_SWIPE_SCROLL_DIRECTION_KEY: &str = "com.apple.swipescrolldirection";

pub const K_CF_STRING_ENCODING_UTF8: u32 = 0x0800_0100;
pub const K_CF_NUMBER_SINT32_TYPE: CFIndex = 3;

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    // Event tap functions
    pub fn CGEventTapCreate(
        tap: CGEventTapLocation,
        place: CGEventTapPlacement,
        options: CGEventTapOptions,
        events_of_interest: u64,
        callback: CGEventTapCallBack,
        user_info: *mut c_void,
    ) -> CFMachPortRef;

    pub fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);
    pub fn CGEventTapIsEnabled(tap: CFMachPortRef) -> bool;

    // Event source functions
    pub fn CGEventSourceCreate(state_id: CGEventSourceStateID) -> CGEventSourceRef;

    // Event creation functions
    pub fn CGEventCreate(source: CGEventSourceRef) -> CGEventRef;

    pub fn CGEventCreateKeyboardEvent(
        source: CGEventSourceRef,
        virtual_key: u16,
        key_down: bool,
    ) -> CGEventRef;

    pub fn CGEventCreateMouseEvent(
        source: CGEventSourceRef,
        mouse_type: CGEventType,
        mouse_cursor_position: CGPoint,
        mouse_button: CGMouseButton,
    ) -> CGEventRef;

    pub fn CGEventCreateScrollWheelEvent(
        source: CGEventSourceRef,
        units: CGScrollEventUnit,
        wheel_count: u32,
        wheel1: i32,
        ...
    ) -> CGEventRef;

    // Event posting
    pub fn CGEventPost(tap: CGEventTapLocation, event: CGEventRef);

    // Event properties
    pub fn CGEventGetLocation(event: CGEventRef) -> CGPoint;
    pub fn CGEventSetLocation(event: CGEventRef, location: CGPoint);
    pub fn CGEventGetIntegerValueField(event: CGEventRef, field: u32) -> i64;
    pub fn CGEventSetIntegerValueField(event: CGEventRef, field: u32, value: i64);
    pub fn CGEventGetDoubleValueField(event: CGEventRef, field: u32) -> f64;
    pub fn CGEventSetDoubleValueField(event: CGEventRef, field: u32, value: f64);
    pub fn CGEventGetFlags(event: CGEventRef) -> u64;
    pub fn CGEventSetFlags(event: CGEventRef, flags: u64);
    pub fn CGEventGetType(event: CGEventRef) -> CGEventType;

    // Display functions
    pub fn CGMainDisplayID() -> u32;
    pub fn CGDisplayPixelsWide(display: u32) -> usize;
    pub fn CGDisplayPixelsHigh(display: u32) -> usize;

    // Pointer association. Dissociating freezes the cursor while drag
    // deltas keep flowing; used for the lifetime of continuous gestures.
    pub fn CGWarpMouseCursorPosition(new_cursor_position: CGPoint) -> i32;
    pub fn CGAssociateMouseAndMouseCursorPosition(connected: bool) -> i32;
}

#[link(name = "CoreVideo", kind = "framework")]
extern "C" {
    pub fn CVDisplayLinkCreateWithActiveCGDisplays(link_out: *mut CVDisplayLinkRef) -> CVReturn;
    pub fn CVDisplayLinkSetOutputCallback(
        link: CVDisplayLinkRef,
        callback: CVDisplayLinkOutputCallback,
        user_info: *mut c_void,
    ) -> CVReturn;
    pub fn CVDisplayLinkStart(link: CVDisplayLinkRef) -> CVReturn;
    pub fn CVDisplayLinkStop(link: CVDisplayLinkRef) -> CVReturn;
    pub fn CVDisplayLinkIsRunning(link: CVDisplayLinkRef) -> bool;
    pub fn CVDisplayLinkRelease(link: CVDisplayLinkRef);
}

pub const K_CV_RETURN_SUCCESS: CVReturn = 0;

#[link(name = "IOKit", kind = "framework")]
extern "C" {
    pub fn IOHIDManagerCreate(allocator: CFAllocatorRef, options: u32) -> IOHIDManagerRef;

    pub fn IOHIDManagerSetDeviceMatchingMultiple(
        manager: IOHIDManagerRef,
        multiple: CFArrayRef,
    );

    pub fn IOHIDManagerRegisterDeviceMatchingCallback(
        manager: IOHIDManagerRef,
        callback: IOHIDDeviceCallback,
        context: *mut c_void,
    );

    pub fn IOHIDManagerRegisterDeviceRemovalCallback(
        manager: IOHIDManagerRef,
        callback: IOHIDDeviceCallback,
        context: *mut c_void,
    );

    pub fn IOHIDManagerScheduleWithRunLoop(
        manager: IOHIDManagerRef,
        run_loop: CFRunLoopRef,
        run_loop_mode: CFStringRef,
    );

    pub fn IOHIDManagerUnscheduleFromRunLoop(
        manager: IOHIDManagerRef,
        run_loop: CFRunLoopRef,
        run_loop_mode: CFStringRef,
    );

    pub fn IOHIDManagerOpen(manager: IOHIDManagerRef, options: u32) -> IOReturn;
    pub fn IOHIDManagerClose(manager: IOHIDManagerRef, options: u32) -> IOReturn;
    pub fn IOHIDManagerCopyDevices(manager: IOHIDManagerRef) -> CFSetRef;

    pub fn IOHIDDeviceGetProperty(device: IOHIDDeviceRef, key: CFStringRef) -> CFTypeRef;
}

// SkyLight private API: managed display spaces and symbolic hot keys.
// The space count feeds dock-swipe unit conversion; symbolic hot keys
// drive the system actions that have no public key equivalent.
#[link(name = "SkyLight", kind = "framework")]
extern "C" {
    pub fn CGSMainConnectionID() -> i32;
    pub fn CGSCopyManagedDisplaySpaces(cid: i32) -> CFArrayRef;

    pub fn CGSGetSymbolicHotKeyValue(
        hotkey: i32,
        key_equivalent: *mut u16,
        virtual_key: *mut i32,
        modifiers: *mut i32,
    ) -> i32;
    pub fn CGSIsSymbolicHotKeyEnabled(hotkey: i32) -> bool;
    pub fn CGSSetSymbolicHotKeyEnabled(hotkey: i32, enabled: bool) -> i32;
}

/// Symbolic hot key ids for the system actions we fire through SkyLight.
pub mod symbolic_hotkeys {
    pub const APP_EXPOSE: i32 = 33;
    pub const SPACE_LEFT: i32 = 79;
    pub const SPACE_RIGHT: i32 = 81;
}

// HID usage pages and usages
pub const K_HID_PAGE_GENERIC_DESKTOP: u32 = 0x01;

pub const K_HID_USAGE_GD_POINTER: u32 = 0x01;
pub const K_HID_USAGE_GD_MOUSE: u32 = 0x02;
pub const K_HID_USAGE_GD_KEYBOARD: u32 = 0x06;
pub const K_HID_USAGE_GD_KEYPAD: u32 = 0x07;

// IOHIDDevice property keys (CFString contents)
pub const K_IOHID_VENDOR_ID_KEY: &str = "VendorID";
pub const K_IOHID_PRODUCT_ID_KEY: &str = "ProductID";
pub const K_IOHID_MANUFACTURER_KEY: &str = "Manufacturer";
pub const K_IOHID_PRODUCT_KEY: &str = "Product";
pub const K_IOHID_DEVICE_USAGE_PAGE_KEY: &str = "DeviceUsagePage";
pub const K_IOHID_DEVICE_USAGE_KEY: &str = "DeviceUsage";
pub const K_IOHID_PRIMARY_USAGE_PAGE_KEY: &str = "PrimaryUsagePage";
pub const K_IOHID_PRIMARY_USAGE_KEY: &str = "PrimaryUsage";

// IOReturn codes
pub const K_IO_RETURN_SUCCESS: IOReturn = 0;

/// CGEventFlags bit values
pub mod event_flags {
    pub const ALPHA_SHIFT: u64 = 0x00010000; // Caps Lock
    pub const SHIFT: u64 = 0x00020000;
    pub const CONTROL: u64 = 0x00040000;
    pub const ALTERNATE: u64 = 0x00080000; // Option
    pub const COMMAND: u64 = 0x00100000;
    pub const NUMERIC_PAD: u64 = 0x00200000;
    pub const HELP: u64 = 0x00400000;
    pub const SECONDARY_FN: u64 = 0x00800000; // Fn key
}

/// Create event mask bit for an event type
pub fn cg_event_mask_bit(event_type: CGEventType) -> u64 {
    1 << (event_type as u64)
}

/// Safe wrapper for CFRelease
pub fn cf_release(cf: CFTypeRef) {
    if !cf.is_null() {
        unsafe { CFRelease(cf) };
    }
}

/// Build a CFString from a Rust str. Caller releases.
pub fn cf_string(s: &str) -> CFStringRef {
    let c = std::ffi::CString::new(s).unwrap_or_default();
    unsafe { CFStringCreateWithCString(kCFAllocatorDefault, c.as_ptr(), K_CF_STRING_ENCODING_UTF8) }
}

/// Read a CFString into a Rust String.
pub fn cf_string_to_string(s: CFStringRef) -> Option<String> {
    if s.is_null() {
        return None;
    }
    unsafe {
        // UTF-8 worst case is 4 bytes per UTF-16 unit.
        let len = CFStringGetLength(s) * 4 + 1;
        let mut buf = vec![0i8; len.max(1) as usize];
        if CFStringGetCString(s, buf.as_mut_ptr(), len, K_CF_STRING_ENCODING_UTF8) {
            let cstr = std::ffi::CStr::from_ptr(buf.as_ptr());
            Some(cstr.to_string_lossy().into_owned())
        } else {
            None
        }
    }
}

/// Read a CFNumber property as i32.
pub fn cf_number_to_i32(n: CFTypeRef) -> Option<i32> {
    if n.is_null() {
        return None;
    }
    let mut value: i32 = 0;
    let ok = unsafe {
        CFNumberGetValue(
            n,
            K_CF_NUMBER_SINT32_TYPE,
            &mut value as *mut i32 as *mut c_void,
        )
    };
    ok.then_some(value)
}
