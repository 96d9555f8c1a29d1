//! Synthetic event construction and posting
//!
//! Every event built here carries the origin tag in the per-event user
//! data field. The tap callbacks test that field first and wave tagged
//! events through, which is the only thing preventing infinite re-entry.

use glissade_common::{KeyCombo, Modifiers};
use tracing::{trace, warn};

use crate::sys::*;

/// Origin tag stamped on every synthetic event ("GLISSADE" in ASCII).
pub const ORIGIN_TAG: i64 = 0x474C_4953_5341_4445;

/// Seam between the engines and the OS. Engines call these; the FFI
/// implementation posts real events, tests substitute a recorder.
pub trait EventPoster: Send + Sync {
    /// Continuous pixel scroll with explicit gesture/momentum phases.
    fn post_scroll(&self, delta_y: f64, delta_x: f64, scroll_phase: i64, momentum_phase: i64);

    /// Dock-swipe pair (companion + data event) at the session tap.
    fn post_dock_swipe(
        &self,
        swipe: DockSwipeType,
        phase: i64,
        origin_offset: f64,
        inverted: bool,
        exit_speed: f64,
    );

    /// Single magnification gesture event at the HID tap.
    fn post_magnify(&self, phase: i64, magnification: f64);

    /// Key down + key up with the combo's modifier flags.
    fn post_key_combo(&self, combo: KeyCombo);

    /// Middle-button click at the current pointer position.
    fn post_middle_click(&self);

    /// Fire a system action through its symbolic hot key.
    fn post_symbolic_hotkey(&self, hotkey: i32);
}

/// FFI event poster backed by a private HID-state event source.
pub struct EventSource {
    source: CGEventSourceRef,
}

unsafe impl Send for EventSource {}
unsafe impl Sync for EventSource {}

impl EventSource {
    pub fn new() -> Option<Self> {
        let source = unsafe { CGEventSourceCreate(CGEventSourceStateID::HIDSystemState) };
        if source.is_null() {
            return None;
        }
        Some(Self { source })
    }

    fn tag(event: CGEventRef) {
        unsafe {
            CGEventSetIntegerValueField(event, fields::EVENT_SOURCE_USER_DATA, ORIGIN_TAG);
        }
    }

    fn current_pointer_position(&self) -> CGPoint {
        unsafe {
            let probe = CGEventCreate(self.source);
            if probe.is_null() {
                return CGPoint::default();
            }
            let loc = CGEventGetLocation(probe);
            CFRelease(probe as CFTypeRef);
            loc
        }
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        if !self.source.is_null() {
            unsafe { CFRelease(self.source as CFTypeRef) };
        }
    }
}

impl EventPoster for EventSource {
    fn post_scroll(&self, delta_y: f64, delta_x: f64, scroll_phase: i64, momentum_phase: i64) {
        unsafe {
            let event = CGEventCreateScrollWheelEvent(
                self.source,
                CGScrollEventUnit::Pixel,
                2,
                0i32,
                0i32,
            );
            if event.is_null() {
                warn!("scroll event construction failed; dropping frame");
                return;
            }

            CGEventSetIntegerValueField(event, fields::SCROLL_WHEEL_EVENT_IS_CONTINUOUS, 1);
            CGEventSetIntegerValueField(
                event,
                fields::SCROLL_WHEEL_EVENT_POINT_DELTA_AXIS_1,
                delta_y.round() as i64,
            );
            CGEventSetIntegerValueField(
                event,
                fields::SCROLL_WHEEL_EVENT_POINT_DELTA_AXIS_2,
                delta_x.round() as i64,
            );
            CGEventSetDoubleValueField(
                event,
                fields::SCROLL_WHEEL_EVENT_FIXED_PT_DELTA_AXIS_1,
                delta_y,
            );
            CGEventSetDoubleValueField(
                event,
                fields::SCROLL_WHEEL_EVENT_FIXED_PT_DELTA_AXIS_2,
                delta_x,
            );
            CGEventSetIntegerValueField(
                event,
                fields::SCROLL_WHEEL_EVENT_SCROLL_PHASE,
                scroll_phase,
            );
            CGEventSetIntegerValueField(
                event,
                fields::SCROLL_WHEEL_EVENT_MOMENTUM_PHASE,
                momentum_phase,
            );
            Self::tag(event);

            CGEventPost(CGEventTapLocation::HIDEventTap, event);
            CFRelease(event as CFTypeRef);
        }

        trace!(
            delta_y,
            delta_x,
            scroll_phase,
            momentum_phase,
            "posted scroll"
        );
    }

    fn post_dock_swipe(
        &self,
        swipe: DockSwipeType,
        phase: i64,
        origin_offset: f64,
        inverted: bool,
        exit_speed: f64,
    ) {
        unsafe {
            let companion = CGEventCreate(self.source);
            let data = CGEventCreate(self.source);
            if companion.is_null() || data.is_null() {
                warn!("dock swipe event construction failed; dropping emission");
                cf_release(companion as CFTypeRef);
                cf_release(data as CFTypeRef);
                return;
            }

            CGEventSetIntegerValueField(
                companion,
                gesture::FIELD_EVENT_TYPE,
                gesture::EVENT_TYPE_GESTURE,
            );
            CGEventSetIntegerValueField(
                companion,
                gesture::FIELD_HID_TYPE,
                gesture::HID_TYPE_COMPANION,
            );
            CGEventSetIntegerValueField(companion, gesture::FIELD_PHASE, phase);
            Self::tag(companion);

            CGEventSetIntegerValueField(
                data,
                gesture::FIELD_EVENT_TYPE,
                gesture::EVENT_TYPE_GESTURE_DATA,
            );
            CGEventSetIntegerValueField(data, gesture::FIELD_HID_TYPE, gesture::HID_TYPE_DOCK_SWIPE);
            CGEventSetIntegerValueField(data, gesture::FIELD_PHASE, phase);
            CGEventSetIntegerValueField(data, gesture::FIELD_SWIPE_MOTION, swipe as i64);
            CGEventSetIntegerValueField(data, gesture::FIELD_SWIPE_MOTION_ALT, swipe as i64);
            CGEventSetDoubleValueField(
                data,
                gesture::FIELD_SWIPE_TYPE_CONSTANT,
                swipe.type_constant(),
            );
            CGEventSetDoubleValueField(data, gesture::FIELD_SWIPE_PROGRESS, origin_offset);
            CGEventSetIntegerValueField(
                data,
                gesture::FIELD_SWIPE_PROGRESS_FLOAT_BITS,
                (origin_offset as f32).to_bits() as i64,
            );
            CGEventSetIntegerValueField(data, gesture::FIELD_SWIPE_INVERTED, inverted as i64);
            if phase == gesture_phase::ENDED || phase == gesture_phase::CANCELLED {
                CGEventSetDoubleValueField(data, gesture::FIELD_SWIPE_EXIT_SPEED, exit_speed);
            }
            Self::tag(data);

            // Companion first; the window server expects the pair in order.
            CGEventPost(CGEventTapLocation::SessionEventTap, companion);
            CGEventPost(CGEventTapLocation::SessionEventTap, data);
            CFRelease(companion as CFTypeRef);
            CFRelease(data as CFTypeRef);
        }

        trace!(?swipe, phase, origin_offset, exit_speed, "posted dock swipe pair");
    }

    fn post_magnify(&self, phase: i64, magnification: f64) {
        unsafe {
            let event = CGEventCreate(self.source);
            if event.is_null() {
                warn!("magnify event construction failed; dropping emission");
                return;
            }
            CGEventSetIntegerValueField(
                event,
                gesture::FIELD_EVENT_TYPE,
                gesture::EVENT_TYPE_GESTURE,
            );
            CGEventSetIntegerValueField(event, gesture::FIELD_HID_TYPE, gesture::HID_TYPE_ZOOM);
            CGEventSetIntegerValueField(event, gesture::FIELD_PHASE, phase);
            CGEventSetDoubleValueField(event, gesture::FIELD_ZOOM_VALUE, magnification);
            Self::tag(event);

            CGEventPost(CGEventTapLocation::HIDEventTap, event);
            CFRelease(event as CFTypeRef);
        }

        trace!(phase, magnification, "posted magnification");
    }

    fn post_key_combo(&self, combo: KeyCombo) {
        unsafe {
            for key_down in [true, false] {
                let event = CGEventCreateKeyboardEvent(self.source, combo.key_code, key_down);
                if event.is_null() {
                    warn!("keyboard event construction failed; dropping emission");
                    return;
                }
                CGEventSetFlags(event, combo.modifiers.bits());
                Self::tag(event);
                CGEventPost(CGEventTapLocation::HIDEventTap, event);
                CFRelease(event as CFTypeRef);
            }
        }

        trace!(key_code = combo.key_code, "posted key combo");
    }

    fn post_middle_click(&self) {
        let position = self.current_pointer_position();
        unsafe {
            for event_type in [CGEventType::OtherMouseDown, CGEventType::OtherMouseUp] {
                let event = CGEventCreateMouseEvent(
                    self.source,
                    event_type,
                    position,
                    CGMouseButton::Center,
                );
                if event.is_null() {
                    warn!("middle click construction failed; dropping emission");
                    return;
                }
                CGEventSetIntegerValueField(event, fields::MOUSE_EVENT_CLICK_STATE, 1);
                Self::tag(event);
                CGEventPost(CGEventTapLocation::HIDEventTap, event);
                CFRelease(event as CFTypeRef);
            }
        }

        trace!("posted middle click");
    }

    fn post_symbolic_hotkey(&self, hotkey: i32) {
        let mut key_equivalent: u16 = 0;
        let mut virtual_key: i32 = 0;
        let mut carbon_modifiers: i32 = 0;
        let status = unsafe {
            CGSGetSymbolicHotKeyValue(
                hotkey,
                &mut key_equivalent,
                &mut virtual_key,
                &mut carbon_modifiers,
            )
        };
        if status != 0 {
            warn!(hotkey, status, "symbolic hot key value unavailable");
            return;
        }

        let was_enabled = unsafe { CGSIsSymbolicHotKeyEnabled(hotkey) };
        if !was_enabled {
            unsafe { CGSSetSymbolicHotKeyEnabled(hotkey, true) };
        }

        let combo = KeyCombo::new(
            virtual_key as u16,
            carbon_to_modifiers(carbon_modifiers as u32),
        );
        self.post_key_combo(combo);

        if !was_enabled {
            unsafe { CGSSetSymbolicHotKeyEnabled(hotkey, false) };
        }

        trace!(hotkey, virtual_key, "fired symbolic hot key");
    }
}

/// Carbon modifier bits (as returned by CGSGetSymbolicHotKeyValue) to
/// CGEventFlags-layout modifiers.
pub fn carbon_to_modifiers(carbon: u32) -> Modifiers {
    const CMD_KEY: u32 = 0x0100;
    const SHIFT_KEY: u32 = 0x0200;
    const OPTION_KEY: u32 = 0x0800;
    const CONTROL_KEY: u32 = 0x1000;

    let mut mods = Modifiers::NONE;
    if carbon & CMD_KEY != 0 {
        mods = mods.union(Modifiers::COMMAND);
    }
    if carbon & SHIFT_KEY != 0 {
        mods = mods.union(Modifiers::SHIFT);
    }
    if carbon & OPTION_KEY != 0 {
        mods = mods.union(Modifiers::OPTION);
    }
    if carbon & CONTROL_KEY != 0 {
        mods = mods.union(Modifiers::CONTROL);
    }
    mods
}
