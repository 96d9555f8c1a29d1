//! Frontmost-application cache
//!
//! The keyboard pipeline needs the frontmost bundle id on every key
//! event. Querying the workspace per event is far too slow, so the id
//! is cached and refreshed from the NSWorkspace activation
//! notification.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use block2::RcBlock;
use objc2::rc::Retained;
use objc2::runtime::AnyObject;
use objc2::{class, msg_send, msg_send_id};
use objc2_foundation::{NSNotification, NSString};
use parking_lot::Mutex;
use tracing::{debug, trace};

pub struct FrontmostApp {
    bundle_id: Arc<Mutex<Option<String>>>,
    observer: AtomicPtr<AnyObject>,
}

unsafe impl Send for FrontmostApp {}
unsafe impl Sync for FrontmostApp {}

impl FrontmostApp {
    /// Seed from the current frontmost application and register for
    /// activation notifications.
    pub fn new() -> Self {
        let bundle_id = Arc::new(Mutex::new(current_frontmost_bundle_id()));

        let cache = bundle_id.clone();
        let block = RcBlock::new(move |notification: NonNull<NSNotification>| {
            let id = unsafe { bundle_id_from_notification(notification.as_ref()) };
            trace!(?id, "frontmost application changed");
            *cache.lock() = id;
        });

        let observer: *mut AnyObject = unsafe {
            let workspace: Retained<AnyObject> =
                msg_send_id![class!(NSWorkspace), sharedWorkspace];
            let center: Retained<AnyObject> = msg_send_id![&workspace, notificationCenter];
            let name = NSString::from_str("NSWorkspaceDidActivateApplicationNotification");
            let token: Retained<AnyObject> = msg_send_id![
                &center,
                addObserverForName: &*name,
                object: std::ptr::null::<AnyObject>(),
                queue: std::ptr::null::<AnyObject>(),
                usingBlock: &*block,
            ];
            Retained::into_raw(token)
        };

        debug!("frontmost-application observer registered");
        Self {
            bundle_id,
            observer: AtomicPtr::new(observer),
        }
    }

    /// Cached bundle id; never queries the workspace.
    pub fn bundle_id(&self) -> Option<String> {
        self.bundle_id.lock().clone()
    }

    /// Drop the cache and unregister the activation observer.
    pub fn stop(&self) {
        let token = self.observer.swap(std::ptr::null_mut(), Ordering::SeqCst);
        if !token.is_null() {
            unsafe {
                let workspace: Retained<AnyObject> =
                    msg_send_id![class!(NSWorkspace), sharedWorkspace];
                let center: Retained<AnyObject> = msg_send_id![&workspace, notificationCenter];
                if let Some(token) = Retained::from_raw(token) {
                    let _: () = msg_send![&center, removeObserver: &*token];
                }
            }
        }
        *self.bundle_id.lock() = None;
    }
}

impl Default for FrontmostApp {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FrontmostApp {
    fn drop(&mut self) {
        self.stop();
    }
}

fn current_frontmost_bundle_id() -> Option<String> {
    unsafe {
        let workspace: Retained<AnyObject> = msg_send_id![class!(NSWorkspace), sharedWorkspace];
        let app: *mut AnyObject = msg_send![&workspace, frontmostApplication];
        bundle_id_of_app(app)
    }
}

unsafe fn bundle_id_from_notification(notification: &NSNotification) -> Option<String> {
    let user_info: *mut AnyObject = msg_send![notification, userInfo];
    if user_info.is_null() {
        return None;
    }
    let key = NSString::from_str("NSWorkspaceApplicationKey");
    let app: *mut AnyObject = msg_send![user_info, objectForKey: &*key];
    bundle_id_of_app(app)
}

unsafe fn bundle_id_of_app(app: *mut AnyObject) -> Option<String> {
    if app.is_null() {
        return None;
    }
    let bundle: *mut NSString = msg_send![app, bundleIdentifier];
    if bundle.is_null() {
        return None;
    }
    Some((*bundle).to_string())
}

/// Shim used by unit tests and by the keyboard pipeline's exclusion
/// check; kept free of AppKit so it is testable anywhere.
pub fn is_bundle_excluded(bundle_id: Option<&str>, is_excluded: impl Fn(&str) -> bool) -> bool {
    match bundle_id {
        Some(id) => is_excluded(id),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_bundle_id_is_never_excluded() {
        assert!(!is_bundle_excluded(None, |_| true));
    }

    #[test]
    fn exclusion_consults_the_predicate() {
        assert!(is_bundle_excluded(Some("com.example.app"), |id| {
            id == "com.example.app"
        }));
        assert!(!is_bundle_excluded(Some("com.other.app"), |id| {
            id == "com.example.app"
        }));
    }
}
