//! Smooth-scroll animator
//!
//! A base-curve-plus-momentum controller: wheel ticks feed a pixel
//! target that an ease-out curve pays out at display refresh; when input
//! stops (or the curve completes) the remaining motion hands off to a
//! momentum phase governed by a power-curve drag. The display-link
//! callback drives [`Animator::advance`] and posts whatever it returns.
//!
//! State machine: Idle -> Animating (on input) -> Momentum (on input
//! timeout or curve completion) -> Idle (below stop speed). Input during
//! Momentum begins a fresh gesture. The only direct Animating -> Idle
//! transition is a forced cancel.

use glissade_common::SmoothLevel;

use crate::sys::{momentum_phase, scroll_phase};

/// Curve parameters for one smooth level.
#[derive(Debug, Clone, Copy)]
pub struct Preset {
    pub duration_us: u64,
    pub drag_coefficient: f64,
    pub drag_exponent: f64,
    pub px_per_tick: f64,
    pub max_velocity: f64,
    pub stop_speed: f64,
    pub input_timeout_us: u64,
}

pub const SMOOTH: Preset = Preset {
    duration_us: 140_000,
    drag_coefficient: 18.0,
    drag_exponent: 0.85,
    px_per_tick: 60.0,
    max_velocity: 2500.0,
    stop_speed: 8.0,
    input_timeout_us: 80_000,
};

pub const VERY_SMOOTH: Preset = Preset {
    duration_us: 220_000,
    drag_coefficient: 25.0,
    drag_exponent: 0.65,
    px_per_tick: 60.0 * 1.3,
    max_velocity: 2500.0,
    stop_speed: 8.0,
    input_timeout_us: 80_000,
};

impl Preset {
    pub fn for_level(level: SmoothLevel) -> Option<Preset> {
        match level {
            SmoothLevel::Off => None,
            SmoothLevel::Smooth => Some(SMOOTH),
            SmoothLevel::VerySmooth => Some(VERY_SMOOTH),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Animating,
    Momentum,
}

/// One scroll event to post, already carrying its phase pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollEmission {
    pub delta_y: f64,
    pub delta_x: f64,
    pub scroll_phase: i64,
    pub momentum_phase: i64,
}

/// Whether the display link should keep running after this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    Stop,
}

#[derive(Debug, Default, Clone, Copy)]
struct AxisState {
    target: f64,
    scrolled: f64,
    velocity: f64,
}

impl AxisState {
    fn reset(&mut self) {
        *self = AxisState::default();
    }
}

#[derive(Debug, Default)]
pub struct Animator {
    preset: Option<Preset>,
    phase: Phase,
    y: AxisState,
    x: AxisState,
    anim_start_us: u64,
    duration_us: u64,
    needs_began: bool,
    momentum_began: bool,
    last_input_us: u64,
    last_frame_us: u64,
}

impl Animator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Feed one wheel tick pair. Tick deltas are signed detent counts.
    pub fn on_input(&mut self, preset: Preset, tick_y: f64, tick_x: f64, now_us: u64) {
        let px_y = tick_y * preset.px_per_tick;
        let px_x = tick_x * preset.px_per_tick;

        match self.phase {
            Phase::Idle | Phase::Momentum => {
                self.y = AxisState { target: px_y, ..Default::default() };
                self.x = AxisState { target: px_x, ..Default::default() };
                self.needs_began = true;
                self.momentum_began = false;
                self.last_frame_us = now_us;
            }
            Phase::Animating => {
                // Accumulate the unscrolled remainder and restart the curve.
                self.y.target = (self.y.target - self.y.scrolled) + px_y;
                self.x.target = (self.x.target - self.x.scrolled) + px_x;
                self.y.scrolled = 0.0;
                self.x.scrolled = 0.0;
            }
        }

        self.preset = Some(preset);
        self.anim_start_us = now_us;
        self.duration_us = preset.duration_us;
        self.last_input_us = now_us;
        self.phase = Phase::Animating;
    }

    /// Advance one display-link frame. Returns the events to post, in
    /// order, and whether the link should keep running.
    pub fn advance(&mut self, now_us: u64) -> (Vec<ScrollEmission>, FrameOutcome) {
        let Some(preset) = self.preset else {
            return (Vec::new(), FrameOutcome::Stop);
        };
        if self.phase == Phase::Idle {
            return (Vec::new(), FrameOutcome::Stop);
        }

        let dt = now_us.saturating_sub(self.last_frame_us) as f64 / 1e6;
        self.last_frame_us = now_us;

        let mut out = Vec::with_capacity(3);
        let mut send_gesture_ended = false;

        if self.phase == Phase::Animating {
            let elapsed = now_us.saturating_sub(self.anim_start_us);
            let duration_s = self.duration_us as f64 / 1e6;

            if now_us.saturating_sub(self.last_input_us) > preset.input_timeout_us {
                // Input stopped mid-curve: exit with the curve's current
                // derivative as momentum velocity. A stalled first frame
                // can land here with the began still unsent; flush it so
                // the gesture never opens with an ended.
                if self.needs_began {
                    out.push(began());
                    self.needs_began = false;
                }
                let t = (elapsed as f64 / self.duration_us as f64).min(1.0);
                for axis in [&mut self.y, &mut self.x] {
                    let v = 2.0 * (1.0 - t) * (axis.target / duration_s);
                    axis.velocity = clamp_speed(v, 0.7 * preset.max_velocity);
                }
                self.phase = Phase::Momentum;
                send_gesture_ended = true;
                self.momentum_began = false;
            } else if elapsed >= self.duration_us {
                // Curve complete: pay out the remainder exactly, then coast.
                let delta_y = self.y.target - self.y.scrolled;
                let delta_x = self.x.target - self.x.scrolled;
                self.y.scrolled = self.y.target;
                self.x.scrolled = self.x.target;

                let frame_s = dt.max(1e-4);
                self.y.velocity = clamp_speed(delta_y / frame_s, 0.5 * preset.max_velocity);
                self.x.velocity = clamp_speed(delta_x / frame_s, 0.5 * preset.max_velocity);

                self.phase = Phase::Momentum;
                self.momentum_began = false;

                if self.needs_began {
                    out.push(began());
                    self.needs_began = false;
                }
                out.push(gesture_ended());
                out.push(ScrollEmission {
                    delta_y,
                    delta_x,
                    scroll_phase: scroll_phase::CHANGED,
                    momentum_phase: momentum_phase::NONE,
                });
                return (out, FrameOutcome::Continue);
            } else {
                let t = elapsed as f64 / self.duration_us as f64;
                let eased = 1.0 - (1.0 - t) * (1.0 - t);
                let delta_y = self.y.target * eased - self.y.scrolled;
                let delta_x = self.x.target * eased - self.x.scrolled;
                self.y.scrolled += delta_y;
                self.x.scrolled += delta_x;

                if self.needs_began {
                    out.push(began());
                    self.needs_began = false;
                }
                out.push(ScrollEmission {
                    delta_y,
                    delta_x,
                    scroll_phase: scroll_phase::CHANGED,
                    momentum_phase: momentum_phase::NONE,
                });
                return (out, FrameOutcome::Continue);
            }
        }

        // Momentum, possibly entered this very frame.
        debug_assert_eq!(self.phase, Phase::Momentum);

        if send_gesture_ended {
            out.push(gesture_ended());
        }

        let delta_y = self.y.velocity * dt;
        let delta_x = self.x.velocity * dt;
        for axis in [&mut self.y, &mut self.x] {
            axis.velocity = apply_drag(
                axis.velocity,
                preset.drag_coefficient,
                preset.drag_exponent,
                dt,
            );
        }

        out.push(ScrollEmission {
            delta_y,
            delta_x,
            scroll_phase: scroll_phase::NONE,
            momentum_phase: if self.momentum_began {
                momentum_phase::CONTINUE
            } else {
                momentum_phase::BEGIN
            },
        });
        self.momentum_began = true;

        if self.y.velocity.abs() < preset.stop_speed && self.x.velocity.abs() < preset.stop_speed {
            out.push(ScrollEmission {
                delta_y: 0.0,
                delta_x: 0.0,
                scroll_phase: scroll_phase::NONE,
                momentum_phase: momentum_phase::END,
            });
            out.push(gesture_ended());
            self.reset();
            return (out, FrameOutcome::Stop);
        }

        (out, FrameOutcome::Continue)
    }

    /// Forced cancel: drop all state without terminal emissions. The
    /// caller decides whether anything else needs to be told.
    pub fn cancel(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.y.reset();
        self.x.reset();
        self.anim_start_us = 0;
        self.duration_us = 0;
        self.needs_began = false;
        self.momentum_began = false;
        self.last_input_us = 0;
        self.last_frame_us = 0;
    }
}

fn began() -> ScrollEmission {
    ScrollEmission {
        delta_y: 0.0,
        delta_x: 0.0,
        scroll_phase: scroll_phase::BEGAN,
        momentum_phase: momentum_phase::NONE,
    }
}

fn gesture_ended() -> ScrollEmission {
    ScrollEmission {
        delta_y: 0.0,
        delta_x: 0.0,
        scroll_phase: scroll_phase::ENDED,
        momentum_phase: momentum_phase::NONE,
    }
}

fn clamp_speed(v: f64, limit: f64) -> f64 {
    v.clamp(-limit, limit)
}

/// Power-curve drag, clamped at the zero crossing.
fn apply_drag(velocity: f64, coefficient: f64, exponent: f64, dt: f64) -> f64 {
    if velocity == 0.0 {
        return 0.0;
    }
    let decel = velocity.abs().powf(exponent) * coefficient * dt;
    let next = velocity - velocity.signum() * decel;
    if next.signum() != velocity.signum() {
        0.0
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_US: u64 = 16_667; // ~60 Hz

    fn drive_to_idle(animator: &mut Animator, mut now: u64) -> (Vec<ScrollEmission>, u64) {
        let mut all = Vec::new();
        for _ in 0..2000 {
            now += FRAME_US;
            let (emissions, outcome) = animator.advance(now);
            all.extend(emissions);
            if outcome == FrameOutcome::Stop {
                break;
            }
        }
        (all, now)
    }

    #[test]
    fn single_tick_emits_well_formed_sequence() {
        let mut animator = Animator::new();
        let start = 1_000_000;
        animator.on_input(SMOOTH, 3.0, 0.0, start);
        let (emissions, _) = drive_to_idle(&mut animator, start);

        assert_eq!(animator.phase(), Phase::Idle);

        // began first.
        assert_eq!(emissions[0].scroll_phase, scroll_phase::BEGAN);
        // Exactly one momentum begin, before any momentum continue.
        let begin_idx = emissions
            .iter()
            .position(|e| e.momentum_phase == momentum_phase::BEGIN)
            .expect("momentum began");
        assert!(emissions[begin_idx + 1..]
            .iter()
            .all(|e| e.momentum_phase != momentum_phase::BEGIN));
        // Gesture-ended precedes the first momentum event.
        let ended_idx = emissions
            .iter()
            .position(|e| e.scroll_phase == scroll_phase::ENDED)
            .expect("gesture ended");
        assert!(ended_idx < begin_idx);
        // Terminal pair: momentum end then gesture end.
        let n = emissions.len();
        assert_eq!(emissions[n - 2].momentum_phase, momentum_phase::END);
        assert_eq!(emissions[n - 1].scroll_phase, scroll_phase::ENDED);
    }

    #[test]
    fn base_curve_pays_out_full_target() {
        let mut animator = Animator::new();
        let start = 1_000_000;
        animator.on_input(SMOOTH, 3.0, 0.0, start);
        let (emissions, _) = drive_to_idle(&mut animator, start);

        // The active (changed-phase) deltas sum to tick * px_per_tick.
        let changed_sum: f64 = emissions
            .iter()
            .filter(|e| e.scroll_phase == scroll_phase::CHANGED)
            .map(|e| e.delta_y)
            .sum();
        assert!(
            (changed_sum - 180.0).abs() < 1.0,
            "changed deltas sum to {changed_sum}, want ~180"
        );
    }

    #[test]
    fn accumulation_carries_remainder_forward() {
        let mut animator = Animator::new();
        let mut now = 1_000_000;
        let mut all = Vec::new();

        animator.on_input(SMOOTH, 1.0, 0.0, now);
        // Run two frames, then feed another tick mid-curve.
        for _ in 0..2 {
            now += FRAME_US;
            let (emissions, _) = animator.advance(now);
            all.extend(emissions);
        }
        animator.on_input(SMOOTH, 1.0, 0.0, now);
        let (emissions, _) = drive_to_idle(&mut animator, now);
        all.extend(emissions);

        // Both ticks land within a pixel in total.
        let changed_sum: f64 = all
            .iter()
            .filter(|e| e.scroll_phase == scroll_phase::CHANGED)
            .map(|e| e.delta_y)
            .sum();
        assert!(
            (changed_sum - 120.0).abs() < 1.0,
            "total payout {changed_sum}, want ~120"
        );
    }

    #[test]
    fn momentum_deltas_decay_to_stop() {
        let mut animator = Animator::new();
        let start = 1_000_000;
        animator.on_input(SMOOTH, 5.0, 0.0, start);
        let (emissions, _) = drive_to_idle(&mut animator, start);

        let momentum: Vec<f64> = emissions
            .iter()
            .filter(|e| {
                e.momentum_phase == momentum_phase::BEGIN
                    || e.momentum_phase == momentum_phase::CONTINUE
            })
            .map(|e| e.delta_y.abs())
            .collect();
        assert!(momentum.len() >= 2, "expected a momentum tail");
        assert!(
            momentum.last().unwrap() < momentum.first().unwrap(),
            "momentum should decay"
        );
    }

    #[test]
    fn input_during_momentum_begins_fresh_gesture() {
        let mut animator = Animator::new();
        let mut now = 1_000_000;
        animator.on_input(SMOOTH, 3.0, 0.0, now);
        // Run until momentum starts.
        for _ in 0..2000 {
            now += FRAME_US;
            animator.advance(now);
            if animator.phase() == Phase::Momentum {
                break;
            }
        }
        assert_eq!(animator.phase(), Phase::Momentum);

        animator.on_input(SMOOTH, 2.0, 0.0, now);
        assert_eq!(animator.phase(), Phase::Animating);
        now += FRAME_US;
        let (emissions, _) = animator.advance(now);
        assert_eq!(emissions[0].scroll_phase, scroll_phase::BEGAN);
    }

    #[test]
    fn input_timeout_exits_with_clamped_velocity() {
        let mut animator = Animator::new();
        let mut now = 1_000_000;
        // A huge tick makes the curve derivative exceed the clamp.
        animator.on_input(SMOOTH, 100.0, 0.0, now);
        now += FRAME_US;
        animator.advance(now);
        // Let input time out mid-curve.
        now += SMOOTH.input_timeout_us + 10_000;
        let (emissions, _) = animator.advance(now);
        assert_eq!(animator.phase(), Phase::Momentum);

        // Gesture-ended precedes momentum-began within the frame.
        assert_eq!(emissions[0].scroll_phase, scroll_phase::ENDED);
        assert_eq!(emissions[1].momentum_phase, momentum_phase::BEGIN);
        // delta = v * dt with |v| <= 0.7 * max.
        let dt = (SMOOTH.input_timeout_us + 10_000) as f64 / 1e6;
        assert!(emissions[1].delta_y.abs() <= 0.7 * SMOOTH.max_velocity * dt + 1e-9);
    }

    #[test]
    fn stalled_first_frame_still_opens_with_began() {
        let mut animator = Animator::new();
        let now = 1_000_000;
        animator.on_input(SMOOTH, 3.0, 0.0, now);
        // The display link's first callback arrives after the input
        // timeout has already elapsed.
        let late = now + SMOOTH.input_timeout_us + 20_000;
        let (emissions, _) = animator.advance(late);
        assert_eq!(animator.phase(), Phase::Momentum);
        assert_eq!(emissions[0].scroll_phase, scroll_phase::BEGAN);
        assert_eq!(emissions[1].scroll_phase, scroll_phase::ENDED);
        assert_eq!(emissions[2].momentum_phase, momentum_phase::BEGIN);
    }

    #[test]
    fn cancel_is_the_only_animating_to_idle_shortcut() {
        let mut animator = Animator::new();
        animator.on_input(SMOOTH, 1.0, 0.0, 1_000_000);
        assert_eq!(animator.phase(), Phase::Animating);
        animator.cancel();
        assert_eq!(animator.phase(), Phase::Idle);
        let (emissions, outcome) = animator.advance(1_100_000);
        assert!(emissions.is_empty());
        assert_eq!(outcome, FrameOutcome::Stop);
    }

    #[test]
    fn very_smooth_scales_tick_distance() {
        let mut animator = Animator::new();
        let start = 1_000_000;
        animator.on_input(VERY_SMOOTH, 1.0, 0.0, start);
        let (emissions, _) = drive_to_idle(&mut animator, start);
        let changed_sum: f64 = emissions
            .iter()
            .filter(|e| e.scroll_phase == scroll_phase::CHANGED)
            .map(|e| e.delta_y)
            .sum();
        assert!((changed_sum - 78.0).abs() < 1.0);
    }

    #[test]
    fn drag_clamps_at_zero_crossing() {
        let v = apply_drag(1.0, 1000.0, 0.85, 1.0);
        assert_eq!(v, 0.0);
        let v = apply_drag(-1.0, 1000.0, 0.85, 1.0);
        assert_eq!(v, 0.0);
    }
}
