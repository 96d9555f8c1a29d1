//! Interceptor core
//!
//! Owns the two event taps. The session tap does the primary work and
//! is enabled whenever the interceptor runs; the HID tap subscribes to
//! auxiliary-button drags only and is enabled solely while a continuous
//! gesture holds the window server in capture mode (session-tap drag
//! callbacks stop arriving there).
//!
//! Callback contract, both taps: self-tagged events pass verbatim,
//! tap-disabled events re-enable the tap and pass verbatim, everything
//! else routes to an engine which keeps, mutates, or suppresses it. No
//! error ever propagates past the callback; every failure path returns
//! the event unchanged.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use glissade_common::{GlissadeResult, InputError, Modifiers, SettingsStore};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::animator::Animator;
use crate::devices::DeviceRegistry;
use crate::dispatch::Dispatcher;
use crate::display_link::{DisplayLink, LinkRequest};
use crate::frontmost::{is_bundle_excluded, FrontmostApp};
use crate::gesture::{Decision, GestureEngine, GestureHost};
use crate::scroll::{MutatedDeltas, ScrollEngine, WheelInput, WheelOutcome};
use crate::sys::*;
use crate::synth::{EventPoster, EventSource, ORIGIN_TAG};

const RUN_LOOP_SLICE_SECS: f64 = 0.1;
const START_TIMEOUT: Duration = Duration::from_secs(5);

/// Cheap hot-path counters, read by the daemon on shutdown.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    seen: AtomicU64,
    suppressed: AtomicU64,
    transformed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    pub seen: u64,
    pub suppressed: u64,
    pub transformed: u64,
}

impl PipelineCounters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            seen: self.seen.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            transformed: self.transformed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TapKind {
    Session,
    Hid,
}

/// Mach ports for the two taps, shared with the gesture host.
#[derive(Default)]
struct TapPorts {
    session: AtomicPtr<c_void>,
    hid: AtomicPtr<c_void>,
}

impl TapPorts {
    fn set(&self, kind: TapKind, port: CFMachPortRef) {
        match kind {
            TapKind::Session => self.session.store(port, Ordering::SeqCst),
            TapKind::Hid => self.hid.store(port, Ordering::SeqCst),
        }
    }

    fn get(&self, kind: TapKind) -> CFMachPortRef {
        match kind {
            TapKind::Session => self.session.load(Ordering::SeqCst),
            TapKind::Hid => self.hid.load(Ordering::SeqCst),
        }
    }

    fn enable(&self, kind: TapKind, enabled: bool) {
        let port = self.get(kind);
        if !port.is_null() {
            unsafe { CGEventTapEnable(port, enabled) };
        }
    }
}

/// GestureHost backed by the real taps, pointer association, and the
/// window server.
struct HostBridge {
    ports: Arc<TapPorts>,
}

impl GestureHost for HostBridge {
    fn set_hid_tap_enabled(&self, enabled: bool) {
        trace!(enabled, "hid drag tap");
        self.ports.enable(TapKind::Hid, enabled);
    }

    fn set_pointer_associated(&self, associated: bool) {
        trace!(associated, "pointer association");
        unsafe { CGAssociateMouseAndMouseCursorPosition(associated) };
    }

    fn space_count(&self) -> u32 {
        managed_space_count().unwrap_or(1)
    }

    fn screen_size(&self) -> (f64, f64) {
        unsafe {
            let display = CGMainDisplayID();
            (
                CGDisplayPixelsWide(display) as f64,
                CGDisplayPixelsHigh(display) as f64,
            )
        }
    }

    fn natural_scroll_inverted(&self) -> bool {
        unsafe {
            let key = cf_string(K_SWIPE_SCROLL_DIRECTION_KEY);
            let mut exists = false;
            let value =
                CFPreferencesGetAppBooleanValue(key, kCFPreferencesAnyApplication, &mut exists);
            cf_release(key);
            // Natural scrolling is the system default when the key is unset.
            if exists {
                value
            } else {
                true
            }
        }
    }
}

/// Spaces of the first managed display, queried once per gesture.
fn managed_space_count() -> Option<u32> {
    unsafe {
        let displays = CGSCopyManagedDisplaySpaces(CGSMainConnectionID());
        if displays.is_null() {
            return None;
        }
        let mut count = None;
        if CFArrayGetCount(displays) > 0 {
            let display = CFArrayGetValueAtIndex(displays, 0);
            if !display.is_null() {
                let key = cf_string("Spaces");
                let spaces = CFDictionaryGetValue(display, key);
                cf_release(key);
                if !spaces.is_null() {
                    count = Some(CFArrayGetCount(spaces).max(1) as u32);
                }
            }
        }
        cf_release(displays);
        count
    }
}

struct InterceptorShared {
    settings: Arc<SettingsStore>,
    devices: Arc<DeviceRegistry>,
    poster: Arc<dyn EventPoster>,
    scroll: ScrollEngine,
    gesture: GestureEngine,
    dispatcher: Dispatcher,
    ports: Arc<TapPorts>,
    link: Mutex<Option<DisplayLink>>,
    frontmost: Mutex<Option<FrontmostApp>>,
    counters: PipelineCounters,
}

impl InterceptorShared {
    fn external_mouse(&self) -> bool {
        self.devices.external_mouse_present() || self.settings.assume_external_mouse()
    }

    fn ensure_link_running(&self) {
        if let Some(link) = self.link.lock().as_ref() {
            link.start();
        }
    }

    /// Route one event. Returns Keep to hand the (possibly mutated)
    /// event back to the OS, Drop to suppress it.
    unsafe fn handle(&self, kind: TapKind, event_type: CGEventType, event: CGEventRef) -> Decision {
        match kind {
            TapKind::Hid => self.handle_hid(event_type, event),
            TapKind::Session => self.handle_session(event_type, event),
        }
    }

    unsafe fn handle_hid(&self, event_type: CGEventType, event: CGEventRef) -> Decision {
        if event_type != CGEventType::OtherMouseDragged {
            return Decision::Pass;
        }
        if !self.gesture.continuous_active() {
            return Decision::Pass;
        }
        let delta_x = CGEventGetIntegerValueField(event, fields::MOUSE_EVENT_DELTA_X) as f64;
        let delta_y = CGEventGetIntegerValueField(event, fields::MOUSE_EVENT_DELTA_Y) as f64;
        let policy = self.settings.drag_policy();
        self.gesture.on_middle_drag(delta_x, delta_y, &policy)
    }

    unsafe fn handle_session(&self, event_type: CGEventType, event: CGEventRef) -> Decision {
        match event_type {
            CGEventType::ScrollWheel => self.handle_wheel(event),
            CGEventType::FlagsChanged => {
                self.scroll.on_flags_changed(CGEventGetFlags(event));
                Decision::Pass
            }
            CGEventType::OtherMouseDown | CGEventType::OtherMouseUp => {
                if !self.settings.mouse_enabled() || !self.external_mouse() {
                    return Decision::Pass;
                }
                let button =
                    CGEventGetIntegerValueField(event, fields::MOUSE_EVENT_BUTTON_NUMBER) as u32;
                let down = event_type == CGEventType::OtherMouseDown;
                if button == 2 {
                    let policy = self.settings.drag_policy();
                    if down {
                        self.gesture.on_middle_down(&policy)
                    } else {
                        self.gesture.on_middle_up(&policy)
                    }
                } else {
                    self.dispatcher
                        .on_button(button, down, self.settings.button_action(button))
                }
            }
            CGEventType::OtherMouseDragged => {
                if !self.settings.mouse_enabled() {
                    return Decision::Pass;
                }
                let delta_x =
                    CGEventGetIntegerValueField(event, fields::MOUSE_EVENT_DELTA_X) as f64;
                let delta_y =
                    CGEventGetIntegerValueField(event, fields::MOUSE_EVENT_DELTA_Y) as f64;
                let policy = self.settings.drag_policy();
                self.gesture.on_middle_drag(delta_x, delta_y, &policy)
            }
            CGEventType::KeyDown | CGEventType::KeyUp => self.handle_key(event_type, event),
            _ => Decision::Pass,
        }
    }

    unsafe fn handle_wheel(&self, event: CGEventRef) -> Decision {
        if !self.settings.mouse_enabled() {
            return Decision::Pass;
        }

        let input = WheelInput {
            is_continuous: CGEventGetIntegerValueField(
                event,
                fields::SCROLL_WHEEL_EVENT_IS_CONTINUOUS,
            ) != 0,
            scroll_phase: CGEventGetIntegerValueField(
                event,
                fields::SCROLL_WHEEL_EVENT_SCROLL_PHASE,
            ),
            momentum_phase: CGEventGetIntegerValueField(
                event,
                fields::SCROLL_WHEEL_EVENT_MOMENTUM_PHASE,
            ),
            delta_y: CGEventGetIntegerValueField(event, fields::SCROLL_WHEEL_EVENT_DELTA_AXIS_1),
            delta_x: CGEventGetIntegerValueField(event, fields::SCROLL_WHEEL_EVENT_DELTA_AXIS_2),
            fixed_delta_y: CGEventGetDoubleValueField(
                event,
                fields::SCROLL_WHEEL_EVENT_FIXED_PT_DELTA_AXIS_1,
            ),
            fixed_delta_x: CGEventGetDoubleValueField(
                event,
                fields::SCROLL_WHEEL_EVENT_FIXED_PT_DELTA_AXIS_2,
            ),
            point_delta_y: CGEventGetIntegerValueField(
                event,
                fields::SCROLL_WHEEL_EVENT_POINT_DELTA_AXIS_1,
            ),
            point_delta_x: CGEventGetIntegerValueField(
                event,
                fields::SCROLL_WHEEL_EVENT_POINT_DELTA_AXIS_2,
            ),
            flags: CGEventGetFlags(event),
        };

        let policy = self.settings.scroll_policy();
        let outcome =
            self.scroll
                .process_wheel(input, policy, self.external_mouse(), glissade_common::now_us());
        match outcome {
            WheelOutcome::PassThrough => Decision::Pass,
            WheelOutcome::Mutate(deltas) => {
                apply_wheel_mutation(event, &deltas);
                self.counters.transformed.fetch_add(1, Ordering::Relaxed);
                Decision::Pass
            }
            WheelOutcome::Smooth => {
                self.ensure_link_running();
                self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                Decision::Suppress
            }
            WheelOutcome::Suppress => {
                self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                Decision::Suppress
            }
        }
    }

    unsafe fn handle_key(&self, event_type: CGEventType, event: CGEventRef) -> Decision {
        let (enabled, assume_external) = self.settings.keyboard_policy();
        if !enabled {
            return Decision::Pass;
        }
        if !(self.devices.external_keyboard_present() || assume_external) {
            return Decision::Pass;
        }

        let bundle = self.frontmost.lock().as_ref().and_then(FrontmostApp::bundle_id);
        if is_bundle_excluded(bundle.as_deref(), |id| self.settings.is_excluded(id)) {
            trace!(?bundle, "frontmost app excluded; key passed through");
            return Decision::Pass;
        }

        let key_code =
            CGEventGetIntegerValueField(event, fields::KEYBOARD_EVENT_KEYCODE) as u16;
        let flags = Modifiers(CGEventGetFlags(event));
        let Some(target) = self.settings.remap_lookup(key_code, flags) else {
            return Decision::Pass;
        };

        let down = event_type == CGEventType::KeyDown;
        self.dispatcher.on_key(down, target)
    }
}

/// Writes replacement deltas into a wheel event.
unsafe fn apply_wheel_mutation(event: CGEventRef, deltas: &MutatedDeltas) {
    // Integer deltas first: writing them recomputes the fixed-point and
    // point fields, clobbering anything written there earlier.
    CGEventSetIntegerValueField(event, fields::SCROLL_WHEEL_EVENT_DELTA_AXIS_1, deltas.delta_y);
    CGEventSetIntegerValueField(event, fields::SCROLL_WHEEL_EVENT_DELTA_AXIS_2, deltas.delta_x);
    CGEventSetDoubleValueField(
        event,
        fields::SCROLL_WHEEL_EVENT_FIXED_PT_DELTA_AXIS_1,
        deltas.fixed_delta_y,
    );
    CGEventSetDoubleValueField(
        event,
        fields::SCROLL_WHEEL_EVENT_FIXED_PT_DELTA_AXIS_2,
        deltas.fixed_delta_x,
    );
    CGEventSetIntegerValueField(
        event,
        fields::SCROLL_WHEEL_EVENT_POINT_DELTA_AXIS_1,
        deltas.point_delta_y,
    );
    CGEventSetIntegerValueField(
        event,
        fields::SCROLL_WHEEL_EVENT_POINT_DELTA_AXIS_2,
        deltas.point_delta_x,
    );
}

struct CallbackCtx {
    shared: Arc<InterceptorShared>,
    kind: TapKind,
}

extern "C" fn tap_callback(
    _proxy: CGEventTapProxy,
    event_type: CGEventType,
    event: CGEventRef,
    user_info: *mut c_void,
) -> CGEventRef {
    if user_info.is_null() || event.is_null() {
        return event;
    }
    let ctx = unsafe { &*(user_info as *const CallbackCtx) };
    let shared = &ctx.shared;

    // Transient disables: re-enable and wave the event through with no
    // engine involvement at all.
    if matches!(
        event_type,
        CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput
    ) {
        debug!(kind = ?ctx.kind, ?event_type, "tap disabled; re-enabling");
        shared.ports.enable(ctx.kind, true);
        return event;
    }

    // Self-synthetic events must never be re-processed.
    let tag = unsafe { CGEventGetIntegerValueField(event, fields::EVENT_SOURCE_USER_DATA) };
    if tag == ORIGIN_TAG {
        return event;
    }

    shared.counters.seen.fetch_add(1, Ordering::Relaxed);

    match unsafe { shared.handle(ctx.kind, event_type, event) } {
        Decision::Pass => event,
        Decision::Suppress => std::ptr::null_mut(),
    }
}

pub struct Interceptor {
    shared: Arc<InterceptorShared>,
    animator: Arc<Mutex<Animator>>,
    control_tx: Sender<LinkRequest>,
    control_rx: Receiver<LinkRequest>,
    is_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Interceptor {
    pub fn new(
        settings: Arc<SettingsStore>,
        devices: Arc<DeviceRegistry>,
    ) -> GlissadeResult<Self> {
        let source = EventSource::new()
            .ok_or_else(|| InputError::EventTap("failed to create event source".into()))?;
        let poster: Arc<dyn EventPoster> = Arc::new(source);

        let animator = Arc::new(Mutex::new(Animator::new()));
        let ports = Arc::new(TapPorts::default());
        let host = Arc::new(HostBridge { ports: ports.clone() });

        let scroll = ScrollEngine::new(poster.clone(), animator.clone());
        let gesture = GestureEngine::new(poster.clone(), host);
        let dispatcher = Dispatcher::new(poster.clone());

        let (control_tx, control_rx) = bounded(16);

        let shared = Arc::new(InterceptorShared {
            settings,
            devices,
            poster,
            scroll,
            gesture,
            dispatcher,
            ports,
            link: Mutex::new(None),
            frontmost: Mutex::new(None),
            counters: PipelineCounters::default(),
        });

        Ok(Self {
            shared,
            animator,
            control_tx,
            control_rx,
            is_running: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    /// Create the taps and begin processing. Idempotent.
    pub fn start(&mut self) -> GlissadeResult<()> {
        if self.is_running.load(Ordering::SeqCst) {
            return Ok(());
        }

        if !crate::has_accessibility_permission() {
            return Err(InputError::AccessibilityRequired.into());
        }

        info!("Starting interceptor");
        self.is_running.store(true, Ordering::SeqCst);

        *self.shared.frontmost.lock() = Some(FrontmostApp::new());

        let shared = self.shared.clone();
        let animator = self.animator.clone();
        let control_tx = self.control_tx.clone();
        let control_rx = self.control_rx.clone();
        let is_running = self.is_running.clone();
        let (ready_tx, ready_rx) = bounded::<GlissadeResult<()>>(1);

        let handle = thread::spawn(move || {
            run_taps(shared, animator, control_tx, control_rx, is_running, ready_tx);
        });
        self.thread = Some(handle);

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.is_running.store(false, Ordering::SeqCst);
                if let Some(handle) = self.thread.take() {
                    let _ = handle.join();
                }
                Err(e)
            }
            Err(_) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(InputError::EventTap("tap thread did not come up".into()).into())
            }
        }
    }

    /// Tear everything down so a subsequent `start` begins cleanly.
    pub fn stop(&mut self) {
        if !self.is_running.load(Ordering::SeqCst) {
            return;
        }
        info!("Stopping interceptor");

        // Terminate in-flight gestures while the taps are still alive so
        // the window server sees a terminal phase and the pointer thaws.
        self.shared.gesture.force_cancel();
        self.shared.scroll.cancel();

        self.is_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }

        if let Some(frontmost) = self.shared.frontmost.lock().take() {
            frontmost.stop();
        }

        let stats = self.stats();
        debug!(?stats, "interceptor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.counters.snapshot()
    }
}

impl Drop for Interceptor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn session_event_mask() -> u64 {
    let mut mask = 0u64;
    for ty in [
        CGEventType::ScrollWheel,
        CGEventType::OtherMouseDown,
        CGEventType::OtherMouseUp,
        CGEventType::OtherMouseDragged,
        CGEventType::KeyDown,
        CGEventType::KeyUp,
        CGEventType::FlagsChanged,
    ] {
        mask |= cg_event_mask_bit(ty);
    }
    mask
}

fn run_taps(
    shared: Arc<InterceptorShared>,
    animator: Arc<Mutex<Animator>>,
    control_tx: Sender<LinkRequest>,
    control_rx: Receiver<LinkRequest>,
    is_running: Arc<AtomicBool>,
    ready_tx: Sender<GlissadeResult<()>>,
) {
    let session_ctx = Box::into_raw(Box::new(CallbackCtx {
        shared: shared.clone(),
        kind: TapKind::Session,
    }));
    let hid_ctx = Box::into_raw(Box::new(CallbackCtx {
        shared: shared.clone(),
        kind: TapKind::Hid,
    }));

    unsafe {
        let session_tap = CGEventTapCreate(
            CGEventTapLocation::SessionEventTap,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::Default,
            session_event_mask(),
            tap_callback,
            session_ctx as *mut c_void,
        );
        if session_tap.is_null() {
            error!("Failed to create session event tap. Check accessibility permissions.");
            let _ = ready_tx.send(Err(glissade_common::GlissadeError::PermissionDenied(
                "session event tap creation failed".into(),
            )));
            drop(Box::from_raw(session_ctx));
            drop(Box::from_raw(hid_ctx));
            is_running.store(false, Ordering::SeqCst);
            return;
        }
        shared.ports.set(TapKind::Session, session_tap);

        // The HID tap exists only for drags during gesture capture; it is
        // created disabled and toggled by the gesture engine.
        let hid_tap = CGEventTapCreate(
            CGEventTapLocation::HIDEventTap,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::Default,
            cg_event_mask_bit(CGEventType::OtherMouseDragged),
            tap_callback,
            hid_ctx as *mut c_void,
        );
        if hid_tap.is_null() {
            // Continuous gestures may misbehave during capture, but the
            // rest of the pipeline works.
            warn!("Failed to create HID drag tap; continuous gestures degraded");
        } else {
            CGEventTapEnable(hid_tap, false);
            shared.ports.set(TapKind::Hid, hid_tap);
        }

        let run_loop = CFRunLoopGetCurrent();
        let session_source =
            CFMachPortCreateRunLoopSource(kCFAllocatorDefault, session_tap, 0);
        if session_source.is_null() {
            error!("Failed to create run loop source for session tap");
            let _ = ready_tx.send(Err(
                InputError::EventTap("run loop source creation failed".into()).into(),
            ));
            cleanup_tap(&shared, TapKind::Session, std::ptr::null_mut(), run_loop);
            cleanup_tap(&shared, TapKind::Hid, std::ptr::null_mut(), run_loop);
            drop(Box::from_raw(session_ctx));
            drop(Box::from_raw(hid_ctx));
            is_running.store(false, Ordering::SeqCst);
            return;
        }
        CFRunLoopAddSource(run_loop, session_source, kCFRunLoopCommonModes);

        let hid_source = if !hid_tap.is_null() {
            let source = CFMachPortCreateRunLoopSource(kCFAllocatorDefault, hid_tap, 0);
            if !source.is_null() {
                CFRunLoopAddSource(run_loop, source, kCFRunLoopCommonModes);
            }
            source
        } else {
            std::ptr::null_mut()
        };

        CGEventTapEnable(session_tap, true);

        // The display link is created (not started) here so creation and
        // release happen on the same thread.
        match DisplayLink::new(animator, shared.poster.clone(), control_tx) {
            Ok(link) => *shared.link.lock() = Some(link),
            Err(e) => warn!("Display link unavailable; smooth scrolling disabled: {e}"),
        }

        let _ = ready_tx.send(Ok(()));
        debug!("Event taps running");

        while is_running.load(Ordering::SeqCst) {
            CFRunLoopRunInMode(kCFRunLoopDefaultMode, RUN_LOOP_SLICE_SECS, false);
            while let Ok(request) = control_rx.try_recv() {
                match request {
                    LinkRequest::Stop => {
                        if let Some(link) = shared.link.lock().as_ref() {
                            link.stop();
                        }
                    }
                }
            }
        }

        // Teardown, in dependency order: link, taps, sources, contexts.
        *shared.link.lock() = None;

        cleanup_tap(&shared, TapKind::Session, session_source, run_loop);
        cleanup_tap(&shared, TapKind::Hid, hid_source, run_loop);
        drop(Box::from_raw(session_ctx));
        drop(Box::from_raw(hid_ctx));
    }

    debug!("Event taps stopped");
}

unsafe fn cleanup_tap(
    shared: &Arc<InterceptorShared>,
    kind: TapKind,
    source: CFRunLoopSourceRef,
    run_loop: CFRunLoopRef,
) {
    let port = shared.ports.get(kind);
    shared.ports.set(kind, std::ptr::null_mut());
    if port.is_null() {
        return;
    }
    CGEventTapEnable(port, false);
    if !source.is_null() {
        CFRunLoopRemoveSource(run_loop, source, kCFRunLoopCommonModes);
        CFRelease(source as CFTypeRef);
    }
    CFMachPortInvalidate(port);
    CFRelease(port as CFTypeRef);
}
