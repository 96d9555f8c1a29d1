//! Display link driver for the smooth-scroll animator
//!
//! The CVDisplayLink fires at display refresh on its own thread. Each
//! frame drains the animator under its lock, then posts the emissions
//! after the lock is released. The frame callback never stops the link
//! itself; it asks the interceptor's control loop to do it, and the
//! link is created and released on that loop's thread.

use std::ffi::c_void;
use std::sync::Arc;

use crossbeam_channel::Sender;
use glissade_common::{now_us, GlissadeResult, InputError};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::animator::{Animator, FrameOutcome};
use crate::sys::*;
use crate::synth::EventPoster;

/// Control messages the frame callback sends back to the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRequest {
    Stop,
}

struct FrameCtx {
    animator: Arc<Mutex<Animator>>,
    poster: Arc<dyn EventPoster>,
    control_tx: Sender<LinkRequest>,
}

pub struct DisplayLink {
    link: CVDisplayLinkRef,
    ctx_ptr: *mut FrameCtx,
}

unsafe impl Send for DisplayLink {}
unsafe impl Sync for DisplayLink {}

impl DisplayLink {
    pub fn new(
        animator: Arc<Mutex<Animator>>,
        poster: Arc<dyn EventPoster>,
        control_tx: Sender<LinkRequest>,
    ) -> GlissadeResult<Self> {
        let ctx = Box::new(FrameCtx {
            animator,
            poster,
            control_tx,
        });
        let ctx_ptr = Box::into_raw(ctx);

        let mut link: CVDisplayLinkRef = std::ptr::null_mut();
        unsafe {
            let status = CVDisplayLinkCreateWithActiveCGDisplays(&mut link);
            if status != K_CV_RETURN_SUCCESS || link.is_null() {
                let _ = Box::from_raw(ctx_ptr);
                return Err(InputError::DisplayLink(status).into());
            }
            let status = CVDisplayLinkSetOutputCallback(link, frame_callback, ctx_ptr as *mut c_void);
            if status != K_CV_RETURN_SUCCESS {
                CVDisplayLinkRelease(link);
                let _ = Box::from_raw(ctx_ptr);
                return Err(InputError::DisplayLink(status).into());
            }
        }

        debug!("display link created");
        Ok(Self { link, ctx_ptr })
    }

    pub fn start(&self) {
        unsafe {
            if !CVDisplayLinkIsRunning(self.link) {
                let status = CVDisplayLinkStart(self.link);
                if status != K_CV_RETURN_SUCCESS {
                    warn!(status, "failed to start display link");
                } else {
                    trace!("display link started");
                }
            }
        }
    }

    pub fn stop(&self) {
        unsafe {
            if CVDisplayLinkIsRunning(self.link) {
                CVDisplayLinkStop(self.link);
                trace!("display link stopped");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        unsafe { CVDisplayLinkIsRunning(self.link) }
    }
}

impl Drop for DisplayLink {
    fn drop(&mut self) {
        unsafe {
            // Stop blocks until an in-flight frame callback returns, so
            // the context cannot be in use afterwards.
            CVDisplayLinkStop(self.link);
            CVDisplayLinkRelease(self.link);
            drop(Box::from_raw(self.ctx_ptr));
        }
    }
}

extern "C" fn frame_callback(
    _link: CVDisplayLinkRef,
    _in_now: *const c_void,
    _in_output_time: *const c_void,
    _flags_in: u64,
    _flags_out: *mut u64,
    user_info: *mut c_void,
) -> CVReturn {
    if user_info.is_null() {
        return K_CV_RETURN_SUCCESS;
    }
    let ctx = unsafe { &*(user_info as *const FrameCtx) };

    // Advance under the lock, emit outside it.
    let (emissions, outcome) = ctx.animator.lock().advance(now_us());

    for emission in &emissions {
        ctx.poster.post_scroll(
            emission.delta_y,
            emission.delta_x,
            emission.scroll_phase,
            emission.momentum_phase,
        );
    }

    if outcome == FrameOutcome::Stop {
        let _ = ctx.control_tx.try_send(LinkRequest::Stop);
    }

    K_CV_RETURN_SUCCESS
}
