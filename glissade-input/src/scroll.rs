//! Scroll engine
//!
//! Consumes wheel events from the session tap. Trackpad-origin events
//! pass through untouched. Mouse-origin events run the modifier
//! pipeline (Command-zoom, Shift-horizontal, Option-precision,
//! Control-fast, reversal) and then either mutate the event in place,
//! suppress it in favor of the smooth-scroll animator, or pass it
//! through.

use std::sync::Arc;
use std::time::Duration;

use glissade_common::{ScrollPolicy, SmoothLevel};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::animator::{Animator, Preset};
use crate::sys::{event_flags, gesture_phase};
use crate::synth::EventPoster;
use crate::timer::WorkItem;

/// Trailing quiet period after which a Command-zoom gesture ends.
const ZOOM_END_DELAY: Duration = Duration::from_millis(300);
/// One wheel detent maps to this much magnification.
const ZOOM_UNITS_PER_TICK: f64 = 1.0 / 50.0;

/// Plain extraction of the wheel fields the pipeline needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct WheelInput {
    pub is_continuous: bool,
    pub scroll_phase: i64,
    pub momentum_phase: i64,
    /// Integer detent deltas (axis 1 = Y, axis 2 = X).
    pub delta_y: i64,
    pub delta_x: i64,
    pub fixed_delta_y: f64,
    pub fixed_delta_x: f64,
    pub point_delta_y: i64,
    pub point_delta_x: i64,
    pub flags: u64,
}

impl WheelInput {
    /// Wheel clicks from a mouse carry no gesture phases.
    pub fn is_mouse_origin(&self) -> bool {
        self.momentum_phase == 0 && self.scroll_phase == 0
    }
}

/// Replacement deltas for the in-place mutation path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MutatedDeltas {
    pub delta_y: i64,
    pub delta_x: i64,
    pub fixed_delta_y: f64,
    pub fixed_delta_x: f64,
    pub point_delta_y: i64,
    pub point_delta_x: i64,
}

/// What the tap callback should do with the original event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WheelOutcome {
    /// Return the event untouched.
    PassThrough,
    /// Write the replacement deltas and return the mutated event.
    Mutate(MutatedDeltas),
    /// Suppress; the animator took over and the display link must run.
    Smooth,
    /// Suppress; the event was consumed (zoom gesture).
    Suppress,
}

#[derive(Default)]
struct ZoomState {
    active: bool,
    generation: u64,
    end_timer: Option<WorkItem>,
}

pub struct ScrollEngine {
    poster: Arc<dyn EventPoster>,
    animator: Arc<Mutex<Animator>>,
    zoom: Arc<Mutex<ZoomState>>,
}

impl ScrollEngine {
    pub fn new(poster: Arc<dyn EventPoster>, animator: Arc<Mutex<Animator>>) -> Self {
        Self {
            poster,
            animator,
            zoom: Arc::new(Mutex::new(ZoomState::default())),
        }
    }

    /// Run the pipeline for one wheel event.
    pub fn process_wheel(
        &self,
        input: WheelInput,
        policy: ScrollPolicy,
        external_mouse: bool,
        now_us: u64,
    ) -> WheelOutcome {
        if !input.is_mouse_origin() {
            trace!("trackpad-origin wheel event passed through");
            return WheelOutcome::PassThrough;
        }

        let command = input.flags & event_flags::COMMAND != 0;
        let shift = input.flags & event_flags::SHIFT != 0;
        let option = input.flags & event_flags::ALTERNATE != 0;
        let control = input.flags & event_flags::CONTROL != 0;

        // 1. Command + wheel = zoom.
        if policy.command_zoom && command {
            self.feed_zoom(&input);
            return WheelOutcome::Suppress;
        }

        let mut delta_y = input.delta_y as f64;
        let mut delta_x = input.delta_x as f64;
        let mut fixed_y = input.fixed_delta_y;
        let mut fixed_x = input.fixed_delta_x;
        let mut point_y = input.point_delta_y as f64;
        let mut point_x = input.point_delta_x as f64;
        let mut changed = false;

        // 2. Shift moves Y onto X.
        let swapped = policy.shift_horizontal && shift;
        if swapped {
            delta_x = delta_y;
            fixed_x = fixed_y;
            point_x = point_y;
            delta_y = 0.0;
            fixed_y = 0.0;
            point_y = 0.0;
            changed = true;
        }

        // 3. Option scales down for precision.
        let precision = policy.option_precision && option;
        if precision {
            delta_y *= policy.precision_multiplier;
            delta_x *= policy.precision_multiplier;
            fixed_y *= policy.precision_multiplier;
            fixed_x *= policy.precision_multiplier;
            point_y *= policy.precision_multiplier;
            point_x *= policy.precision_multiplier;
            changed = true;
        }

        // 4. Control scales up.
        let fast = policy.control_fast && control;
        if fast {
            delta_y *= policy.fast_multiplier;
            delta_x *= policy.fast_multiplier;
            fixed_y *= policy.fast_multiplier;
            fixed_x *= policy.fast_multiplier;
            point_y *= policy.fast_multiplier;
            point_x *= policy.fast_multiplier;
            changed = true;
        }

        // 5. Reversal, for external mice only.
        if policy.reverse && external_mouse {
            delta_y = -delta_y;
            delta_x = -delta_x;
            fixed_y = -fixed_y;
            fixed_x = -fixed_x;
            point_y = -point_y;
            point_x = -point_x;
            changed = true;
        }

        // Smooth mode: precision and fast both bypass it, as does the
        // horizontal swap.
        let smooth = policy.smooth != SmoothLevel::Off && !swapped && !precision && !fast;
        if smooth {
            if let Some(preset) = Preset::for_level(policy.smooth) {
                self.animator.lock().on_input(preset, delta_y, delta_x, now_us);
                return WheelOutcome::Smooth;
            }
        }

        if changed {
            WheelOutcome::Mutate(MutatedDeltas {
                delta_y: delta_y.round() as i64,
                delta_x: delta_x.round() as i64,
                fixed_delta_y: fixed_y,
                fixed_delta_x: fixed_x,
                point_delta_y: point_y.round() as i64,
                point_delta_x: point_x.round() as i64,
            })
        } else {
            WheelOutcome::PassThrough
        }
    }

    /// Modifier transitions; ends the zoom gesture as soon as Command
    /// goes up, without waiting for the trailing timer.
    pub fn on_flags_changed(&self, flags: u64) {
        if flags & event_flags::COMMAND != 0 {
            return;
        }
        let mut zoom = self.zoom.lock();
        if zoom.active {
            debug!("command released; ending zoom gesture");
            end_zoom(&mut zoom, &self.poster);
        }
    }

    pub fn zoom_active(&self) -> bool {
        self.zoom.lock().active
    }

    /// Forced cancel on interceptor stop.
    pub fn cancel(&self) {
        {
            let mut zoom = self.zoom.lock();
            if zoom.active {
                end_zoom(&mut zoom, &self.poster);
            }
        }
        self.animator.lock().cancel();
    }

    fn feed_zoom(&self, input: &WheelInput) {
        // Dominant axis drives the magnification.
        let tick = if input.delta_y.abs() >= input.delta_x.abs() {
            input.delta_y
        } else {
            input.delta_x
        };
        let magnification = tick as f64 * ZOOM_UNITS_PER_TICK;

        let mut zoom = self.zoom.lock();
        if !zoom.active {
            zoom.active = true;
            self.poster.post_magnify(gesture_phase::BEGAN, 0.0);
        }
        self.poster.post_magnify(gesture_phase::CHANGED, magnification);

        // Restart the trailing end timer.
        if let Some(timer) = zoom.end_timer.take() {
            timer.cancel();
        }
        zoom.generation = zoom.generation.wrapping_add(1);
        let generation = zoom.generation;
        let state = self.zoom.clone();
        let poster = self.poster.clone();
        zoom.end_timer = Some(WorkItem::schedule(ZOOM_END_DELAY, move || {
            let mut zoom = state.lock();
            if zoom.active && zoom.generation == generation {
                trace!("zoom trailing timer fired");
                end_zoom_with(&mut zoom, poster.as_ref());
            }
        }));
    }
}

fn end_zoom(zoom: &mut ZoomState, poster: &Arc<dyn EventPoster>) {
    end_zoom_with(zoom, poster.as_ref());
}

fn end_zoom_with(zoom: &mut ZoomState, poster: &dyn EventPoster) {
    if let Some(timer) = zoom.end_timer.take() {
        timer.cancel();
    }
    zoom.active = false;
    zoom.generation = zoom.generation.wrapping_add(1);
    poster.post_magnify(gesture_phase::ENDED, 0.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::DockSwipeType;
    use glissade_common::KeyCombo;
    use parking_lot::Mutex as PlMutex;

    #[derive(Default)]
    pub struct RecordingPoster {
        pub magnify: PlMutex<Vec<(i64, f64)>>,
    }

    impl EventPoster for RecordingPoster {
        fn post_scroll(&self, _: f64, _: f64, _: i64, _: i64) {}
        fn post_dock_swipe(&self, _: DockSwipeType, _: i64, _: f64, _: bool, _: f64) {}
        fn post_magnify(&self, phase: i64, magnification: f64) {
            self.magnify.lock().push((phase, magnification));
        }
        fn post_key_combo(&self, _: KeyCombo) {}
        fn post_middle_click(&self) {}
        fn post_symbolic_hotkey(&self, _: i32) {}
    }

    fn policy() -> ScrollPolicy {
        ScrollPolicy {
            reverse: false,
            smooth: SmoothLevel::Off,
            shift_horizontal: true,
            option_precision: true,
            precision_multiplier: 0.25,
            control_fast: true,
            fast_multiplier: 4.0,
            command_zoom: true,
        }
    }

    fn engine() -> (ScrollEngine, Arc<RecordingPoster>) {
        let poster = Arc::new(RecordingPoster::default());
        let engine = ScrollEngine::new(poster.clone(), Arc::new(Mutex::new(Animator::new())));
        (engine, poster)
    }

    fn click(delta_y: i64) -> WheelInput {
        WheelInput {
            delta_y,
            fixed_delta_y: delta_y as f64,
            point_delta_y: delta_y,
            ..Default::default()
        }
    }

    #[test]
    fn trackpad_events_pass_through() {
        let (engine, _) = engine();
        let input = WheelInput {
            is_continuous: true,
            scroll_phase: 2,
            delta_y: 5,
            ..Default::default()
        };
        let mut p = policy();
        p.reverse = true;
        assert_eq!(
            engine.process_wheel(input, p, true, 0),
            WheelOutcome::PassThrough
        );
    }

    #[test]
    fn reversal_negates_all_delta_fields() {
        let (engine, _) = engine();
        let mut p = policy();
        p.reverse = true;
        let outcome = engine.process_wheel(click(3), p, true, 0);
        let WheelOutcome::Mutate(deltas) = outcome else {
            panic!("expected mutation, got {outcome:?}");
        };
        assert_eq!(deltas.delta_y, -3);
        assert_eq!(deltas.fixed_delta_y, -3.0);
        assert_eq!(deltas.point_delta_y, -3);
    }

    #[test]
    fn reversal_twice_is_identity() {
        let (engine, _) = engine();
        let mut p = policy();
        p.reverse = true;
        let first = engine.process_wheel(click(3), p, true, 0);
        let WheelOutcome::Mutate(d1) = first else { panic!() };
        let back = WheelInput {
            delta_y: d1.delta_y,
            fixed_delta_y: d1.fixed_delta_y,
            point_delta_y: d1.point_delta_y,
            ..Default::default()
        };
        let WheelOutcome::Mutate(d2) = engine.process_wheel(back, p, true, 0) else {
            panic!()
        };
        assert_eq!(d2.delta_y, 3);
        assert_eq!(d2.fixed_delta_y, 3.0);
    }

    #[test]
    fn reversal_requires_external_mouse() {
        let (engine, _) = engine();
        let mut p = policy();
        p.reverse = true;
        assert_eq!(
            engine.process_wheel(click(3), p, false, 0),
            WheelOutcome::PassThrough
        );
    }

    #[test]
    fn shift_swaps_axes() {
        let (engine, _) = engine();
        let input = WheelInput {
            flags: event_flags::SHIFT,
            ..click(4)
        };
        let WheelOutcome::Mutate(d) = engine.process_wheel(input, policy(), true, 0) else {
            panic!()
        };
        assert_eq!(d.delta_y, 0);
        assert_eq!(d.delta_x, 4);
        assert_eq!(d.fixed_delta_x, 4.0);
    }

    #[test]
    fn option_scales_down_control_scales_up() {
        let (engine, _) = engine();
        let precise = WheelInput {
            flags: event_flags::ALTERNATE,
            ..click(4)
        };
        let WheelOutcome::Mutate(d) = engine.process_wheel(precise, policy(), true, 0) else {
            panic!()
        };
        assert_eq!(d.delta_y, 1);
        assert_eq!(d.fixed_delta_y, 1.0);

        let fast = WheelInput {
            flags: event_flags::CONTROL,
            ..click(2)
        };
        let WheelOutcome::Mutate(d) = engine.process_wheel(fast, policy(), true, 0) else {
            panic!()
        };
        assert_eq!(d.delta_y, 8);
    }

    #[test]
    fn smooth_mode_suppresses_and_feeds_animator() {
        let animator = Arc::new(Mutex::new(Animator::new()));
        let poster = Arc::new(RecordingPoster::default());
        let engine = ScrollEngine::new(poster, animator.clone());
        let mut p = policy();
        p.smooth = SmoothLevel::Smooth;
        assert_eq!(
            engine.process_wheel(click(3), p, true, 1_000_000),
            WheelOutcome::Smooth
        );
        assert!(animator.lock().is_active());
    }

    #[test]
    fn option_bypasses_smooth() {
        let (engine, _) = engine();
        let mut p = policy();
        p.smooth = SmoothLevel::Smooth;
        let input = WheelInput {
            flags: event_flags::ALTERNATE,
            ..click(4)
        };
        let outcome = engine.process_wheel(input, p, true, 0);
        assert!(matches!(outcome, WheelOutcome::Mutate(_)), "{outcome:?}");
    }

    #[test]
    fn smooth_applies_reversal_to_ticks() {
        let animator = Arc::new(Mutex::new(Animator::new()));
        let poster = Arc::new(RecordingPoster::default());
        let engine = ScrollEngine::new(poster, animator.clone());
        let mut p = policy();
        p.smooth = SmoothLevel::Smooth;
        p.reverse = true;
        engine.process_wheel(click(3), p, true, 1_000_000);
        // First frame pays out a negative delta.
        let (emissions, _) = animator.lock().advance(1_016_667);
        let changed = emissions
            .iter()
            .find(|e| e.scroll_phase == crate::sys::scroll_phase::CHANGED)
            .unwrap();
        assert!(changed.delta_y < 0.0);
    }

    #[test]
    fn command_wheel_drives_zoom_gesture() {
        let (engine, poster) = engine();
        let input = WheelInput {
            flags: event_flags::COMMAND,
            ..click(-1)
        };
        assert_eq!(
            engine.process_wheel(input, policy(), true, 0),
            WheelOutcome::Suppress
        );
        assert_eq!(
            engine.process_wheel(input, policy(), true, 0),
            WheelOutcome::Suppress
        );
        let events = poster.magnify.lock().clone();
        assert_eq!(events[0], (gesture_phase::BEGAN, 0.0));
        assert_eq!(events[1], (gesture_phase::CHANGED, -0.02));
        assert_eq!(events[2], (gesture_phase::CHANGED, -0.02));
        assert!(engine.zoom_active());
    }

    #[test]
    fn command_release_ends_zoom_immediately() {
        let (engine, poster) = engine();
        let input = WheelInput {
            flags: event_flags::COMMAND,
            ..click(-1)
        };
        engine.process_wheel(input, policy(), true, 0);
        engine.on_flags_changed(0);
        assert!(!engine.zoom_active());
        let events = poster.magnify.lock().clone();
        assert_eq!(events.last().unwrap().0, gesture_phase::ENDED);
    }

    #[test]
    fn zoom_trailing_timer_ends_gesture() {
        let (engine, poster) = engine();
        let input = WheelInput {
            flags: event_flags::COMMAND,
            ..click(-1)
        };
        engine.process_wheel(input, policy(), true, 0);
        std::thread::sleep(Duration::from_millis(450));
        assert!(!engine.zoom_active());
        let events = poster.magnify.lock().clone();
        assert_eq!(events.last().unwrap().0, gesture_phase::ENDED);
    }
}
