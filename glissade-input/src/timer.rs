//! Cancellable delayed work items
//!
//! Used for the zoom trailing-end timer and the dock-swipe end
//! retransmits. Each item runs on its own short-lived thread; cancelling
//! wakes the thread immediately instead of letting it fire.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{after, bounded, select, Sender};

/// Handle to a scheduled closure. Dropping the handle does NOT cancel;
/// call [`WorkItem::cancel`] explicitly.
pub struct WorkItem {
    cancel_tx: Sender<()>,
}

impl WorkItem {
    /// Run `f` after `delay` unless cancelled first.
    pub fn schedule(delay: Duration, f: impl FnOnce() + Send + 'static) -> Self {
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        thread::spawn(move || {
            let deadline = after(delay);
            select! {
                recv(deadline) -> _ => f(),
                recv(cancel_rx) -> _ => {}
            }
        });
        Self { cancel_tx }
    }

    /// Cancel the pending closure. Harmless if it already fired.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.try_send(());
    }
}

/// Cancel and drop a set of pending work items.
pub fn cancel_all(items: &mut Vec<WorkItem>) {
    for item in items.iter() {
        item.cancel();
    }
    items.clear();
}
