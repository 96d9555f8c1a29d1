//! Gesture engine
//!
//! Tracks middle-button drags. Small drags resolve to discrete actions
//! once they cross the threshold; when the locked axis maps to a
//! continuous-capable action, the drag instead drives a dock swipe that
//! follows the pointer 1:1. During a continuous gesture the window
//! server stops delivering drags to the session tap, so the interceptor
//! enables the HID-level tap and routes its drags here; the pointer is
//! dissociated for exactly that long.
//!
//! Drag distances accumulate from the per-event delta fields rather
//! than the pointer location: the location freezes while dissociated,
//! the deltas keep flowing.

use std::sync::Arc;
use std::time::Duration;

use glissade_common::{Action, DragDirection, DragPolicy, EditAction};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::dispatch::execute_action;
use crate::sys::{gesture_phase, DockSwipeType};
use crate::synth::EventPoster;
use crate::timer::{cancel_all, WorkItem};

/// Exit speed scale applied to the final drag delta.
const EXIT_SPEED_SCALE: f64 = 100.0;
/// The window server sometimes drops the terminal dock-swipe event;
/// retransmit the end at these offsets, bounded at two retries.
const END_RETRANSMIT_DELAYS: [Duration; 2] =
    [Duration::from_millis(300), Duration::from_millis(500)];
/// Horizontal dock-swipe progress denominator padding.
const HORIZONTAL_PADDING_PX: f64 = 63.0;

/// Callbacks into the interceptor: tap enablement, pointer association,
/// and screen metrics. Tests substitute a recorder.
pub trait GestureHost: Send + Sync {
    fn set_hid_tap_enabled(&self, enabled: bool);
    fn set_pointer_associated(&self, associated: bool);
    /// Managed-space count, queried once per gesture.
    fn space_count(&self) -> u32;
    /// Main display size in pixels.
    fn screen_size(&self) -> (f64, f64);
    /// Natural-scroll state of the initiating device context, carried on
    /// every dock-swipe emission. Queried once per gesture.
    fn natural_scroll_inverted(&self) -> bool;
}

/// What the tap callback should do with the raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Pass,
    Suppress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LockedAxis {
    #[default]
    Unset,
    Horizontal,
    Vertical,
}

#[derive(Debug)]
struct ContinuousState {
    swipe: DockSwipeType,
    origin_offset: f64,
    last_delta: f64,
    inverted: bool,
    n_spaces: u32,
}

#[derive(Default)]
struct DragState {
    pressed: bool,
    /// Accumulated drag distance since button down.
    acc_x: f64,
    acc_y: f64,
    committed: bool,
    axis: LockedAxis,
    continuous: Option<ContinuousState>,
    end_retransmits: Vec<WorkItem>,
}

pub struct GestureEngine {
    poster: Arc<dyn EventPoster>,
    host: Arc<dyn GestureHost>,
    state: Mutex<DragState>,
}

impl GestureEngine {
    pub fn new(poster: Arc<dyn EventPoster>, host: Arc<dyn GestureHost>) -> Self {
        Self {
            poster,
            host,
            state: Mutex::new(DragState::default()),
        }
    }

    pub fn continuous_active(&self) -> bool {
        self.state.lock().continuous.is_some()
    }

    pub fn on_middle_down(&self, policy: &DragPolicy) -> Decision {
        let mut state = self.state.lock();
        cancel_all(&mut state.end_retransmits);

        let has_drag_mapping = DragDirection::ALL
            .iter()
            .any(|d| policy.action(*d).is_some());
        let passthrough_click = matches!(
            policy.click_action,
            None | Some(Action::Inert) | Some(Action::Edit(EditAction::MiddleClick))
        );

        if !has_drag_mapping && passthrough_click {
            // Nothing configured; stay out of the way entirely.
            state.pressed = false;
            return Decision::Pass;
        }

        state.pressed = true;
        state.acc_x = 0.0;
        state.acc_y = 0.0;
        state.committed = false;
        state.axis = LockedAxis::Unset;
        state.continuous = None;
        Decision::Suppress
    }

    /// Drag from either tap; `delta_x`/`delta_y` are the event's relative
    /// motion fields.
    pub fn on_middle_drag(&self, delta_x: f64, delta_y: f64, policy: &DragPolicy) -> Decision {
        let mut state = self.state.lock();
        if !state.pressed {
            return Decision::Pass;
        }

        state.acc_x += delta_x;
        state.acc_y += delta_y;

        if let Some(continuous) = state.continuous.as_mut() {
            let pixels = match continuous.swipe {
                DockSwipeType::Horizontal => delta_x,
                DockSwipeType::Vertical | DockSwipeType::Pinch => delta_y,
            };
            let (screen_w, screen_h) = self.host.screen_size();
            let delta = -swipe_units(continuous.swipe, pixels, continuous.n_spaces, screen_w, screen_h);
            continuous.origin_offset += delta;
            continuous.last_delta = delta;
            let (swipe, offset, inverted) =
                (continuous.swipe, continuous.origin_offset, continuous.inverted);
            drop(state);
            self.poster
                .post_dock_swipe(swipe, gesture_phase::CHANGED, offset, inverted, 0.0);
            return Decision::Suppress;
        }

        if state.committed {
            return Decision::Suppress;
        }

        let (ax, ay) = (state.acc_x.abs(), state.acc_y.abs());

        // Axis lock at half threshold keeps continuous gestures responsive.
        if policy.continuous && state.axis == LockedAxis::Unset {
            let half = policy.threshold_px / 2.0;
            if ax >= half || ay >= half {
                let horizontal = ax >= ay;
                state.axis = if horizontal {
                    LockedAxis::Horizontal
                } else {
                    LockedAxis::Vertical
                };
                if policy.axis_continuous_capable(horizontal) {
                    self.begin_continuous(&mut state, policy, horizontal);
                    return Decision::Suppress;
                }
            }
        }

        if ax >= policy.threshold_px || ay >= policy.threshold_px {
            let direction = dominant_direction(state.acc_x, state.acc_y);
            if let Some(action) = policy.action(direction) {
                debug!(?direction, ?action, "drag threshold crossed");
                execute_action(action, self.poster.as_ref());
            }
            state.committed = true;
        }

        Decision::Suppress
    }

    pub fn on_middle_up(&self, policy: &DragPolicy) -> Decision {
        let mut state = self.state.lock();
        if !state.pressed {
            return Decision::Pass;
        }
        state.pressed = false;

        if let Some(continuous) = state.continuous.take() {
            self.host.set_hid_tap_enabled(false);
            self.host.set_pointer_associated(true);

            let exit_speed = continuous.last_delta * EXIT_SPEED_SCALE;
            let (swipe, offset, inverted) =
                (continuous.swipe, continuous.origin_offset, continuous.inverted);
            self.poster
                .post_dock_swipe(swipe, gesture_phase::ENDED, offset, inverted, exit_speed);

            for delay in END_RETRANSMIT_DELAYS {
                let poster = self.poster.clone();
                state.end_retransmits.push(WorkItem::schedule(delay, move || {
                    trace!("retransmitting dock swipe end");
                    poster.post_dock_swipe(
                        swipe,
                        gesture_phase::ENDED,
                        offset,
                        inverted,
                        exit_speed,
                    );
                }));
            }

            state.committed = false;
            state.axis = LockedAxis::Unset;
            return Decision::Suppress;
        }

        if state.committed {
            state.committed = false;
            state.axis = LockedAxis::Unset;
            return Decision::Suppress;
        }

        // No drag committed: resolve the click.
        state.axis = LockedAxis::Unset;
        match policy.click_action {
            None | Some(Action::Inert) | Some(Action::Edit(EditAction::MiddleClick)) => {
                // The original down was swallowed; emit a whole click.
                self.poster.post_middle_click();
            }
            Some(action) => execute_action(action, self.poster.as_ref()),
        }
        Decision::Suppress
    }

    /// Forced stop: terminate any in-flight gesture with a cancel so the
    /// window server sees a terminal phase and the pointer thaws.
    pub fn force_cancel(&self) {
        let mut state = self.state.lock();
        cancel_all(&mut state.end_retransmits);
        if let Some(continuous) = state.continuous.take() {
            debug!("force-cancelling continuous gesture");
            self.host.set_hid_tap_enabled(false);
            self.host.set_pointer_associated(true);
            self.poster.post_dock_swipe(
                continuous.swipe,
                gesture_phase::CANCELLED,
                continuous.origin_offset,
                continuous.inverted,
                continuous.last_delta * EXIT_SPEED_SCALE,
            );
        }
        *state = DragState::default();
    }

    fn begin_continuous(&self, state: &mut DragState, policy: &DragPolicy, horizontal: bool) {
        let direction = dominant_direction(state.acc_x, state.acc_y);
        let action = policy
            .action(direction)
            .filter(|a| a.is_continuous_capable())
            .or_else(|| {
                policy
                    .action(opposite(direction))
                    .filter(|a| a.is_continuous_capable())
            });
        let Some(action) = action else {
            return;
        };

        let swipe = swipe_type_for(action, horizontal);
        let n_spaces = self.host.space_count();
        let (screen_w, screen_h) = self.host.screen_size();
        let inverted = self.host.natural_scroll_inverted();

        let pixels = if horizontal { state.acc_x } else { state.acc_y };
        let offset = -swipe_units(swipe, pixels, n_spaces, screen_w, screen_h);

        debug!(?swipe, n_spaces, offset, inverted, "continuous gesture began");

        self.host.set_hid_tap_enabled(true);
        self.host.set_pointer_associated(false);
        self.poster
            .post_dock_swipe(swipe, gesture_phase::BEGAN, offset, inverted, 0.0);

        state.continuous = Some(ContinuousState {
            swipe,
            origin_offset: offset,
            last_delta: offset,
            inverted,
            n_spaces,
        });
        state.committed = true;
    }
}

fn opposite(direction: DragDirection) -> DragDirection {
    match direction {
        DragDirection::Up => DragDirection::Down,
        DragDirection::Down => DragDirection::Up,
        DragDirection::Left => DragDirection::Right,
        DragDirection::Right => DragDirection::Left,
    }
}

fn dominant_direction(dx: f64, dy: f64) -> DragDirection {
    if dx.abs() >= dy.abs() {
        if dx >= 0.0 {
            DragDirection::Right
        } else {
            DragDirection::Left
        }
    } else if dy >= 0.0 {
        DragDirection::Down
    } else {
        DragDirection::Up
    }
}

/// Swipe kind for a continuous-capable action on the locked axis.
fn swipe_type_for(action: Action, horizontal: bool) -> DockSwipeType {
    use glissade_common::SystemAction::*;
    match action {
        Action::System(SpaceLeft) | Action::System(SpaceRight) => DockSwipeType::Horizontal,
        Action::System(MissionControl) | Action::System(AppExpose) => DockSwipeType::Vertical,
        Action::System(ShowDesktop) | Action::System(Launchpad) => DockSwipeType::Pinch,
        // Unreachable for non-system actions; fall back by axis.
        _ => {
            if horizontal {
                DockSwipeType::Horizontal
            } else {
                DockSwipeType::Vertical
            }
        }
    }
}

/// Pixel distance to dock-swipe progress units.
pub fn swipe_units(
    swipe: DockSwipeType,
    pixels: f64,
    n_spaces: u32,
    screen_w: f64,
    screen_h: f64,
) -> f64 {
    match swipe {
        DockSwipeType::Horizontal => {
            let per_space = if n_spaces >= 2 {
                1.0 + 1.0 / (n_spaces as f64 - 1.0)
            } else {
                2.0
            };
            (pixels * per_space) / (screen_w + HORIZONTAL_PADDING_PX)
        }
        DockSwipeType::Vertical | DockSwipeType::Pinch => pixels / screen_h,
    }
}
