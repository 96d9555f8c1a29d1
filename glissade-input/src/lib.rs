//! Glissade Input Subsystem
//!
//! Intercepts wheel, auxiliary-button, and key events from external
//! mice and keyboards through a pair of event taps, transforms them
//! under user policy, and re-injects synthetic keystrokes, smooth
//! scrolls, or continuous trackpad-style gestures.

pub mod animator;
pub mod devices;
pub mod dispatch;
pub mod display_link;
pub mod frontmost;
pub mod gesture;
pub mod scroll;
mod sys;
pub mod synth;
pub mod tap;
pub mod timer;

pub use animator::{Animator, FrameOutcome, Phase, Preset, ScrollEmission, SMOOTH, VERY_SMOOTH};
pub use devices::{DeviceInfo, DeviceKind, DeviceRegistry};
pub use gesture::{Decision, GestureEngine, GestureHost};
pub use scroll::{MutatedDeltas, ScrollEngine, WheelInput, WheelOutcome};
pub use sys::{event_flags, gesture_phase, momentum_phase, scroll_phase, DockSwipeType};
pub use synth::{EventPoster, EventSource, ORIGIN_TAG};
pub use tap::{Interceptor, PipelineStats};

/// Check if accessibility permission is granted (required for event taps)
pub fn has_accessibility_permission() -> bool {
    unsafe {
        extern "C" {
            fn AXIsProcessTrusted() -> bool;
        }
        AXIsProcessTrusted()
    }
}

/// Request accessibility permission (surfaces the system prompt)
pub fn request_accessibility_permission() {
    unsafe {
        extern "C" {
            fn AXIsProcessTrustedWithOptions(options: *const std::ffi::c_void) -> bool;
        }
        AXIsProcessTrustedWithOptions(std::ptr::null());
    }
}
