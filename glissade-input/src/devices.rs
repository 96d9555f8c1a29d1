//! HID device registry
//!
//! Enumerates attached mice and keyboards through IOHIDManager,
//! classifies each as external or first-party, and notifies subscribers
//! when the connected set changes. Hot-plug callbacks are backed by a
//! coarse refresh timer because some Bluetooth stacks drop removal
//! callbacks.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use glissade_common::GlissadeResult;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::sys::*;

/// Apple's USB vendor id; devices carrying it get default system behavior
/// and are never transformed.
pub const FIRST_PARTY_VENDOR_ID: i32 = 0x05AC;
const FIRST_PARTY_BRAND: &str = "apple";

/// Coarse safety-net refresh period.
const REFRESH_INTERVAL_US: u64 = 30_000_000;
const RUN_LOOP_SLICE_SECS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceKind {
    Mouse,
    Keyboard,
}

/// Connected-device descriptor. Equality is by value over these fields;
/// per-instance identity is deliberately excluded so the refresh timer
/// cannot cause notification storms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor_id: i32,
    pub product_id: i32,
    pub vendor_name: String,
    pub product_name: String,
    pub kind: DeviceKind,
    pub first_party: bool,
}

/// Classify by vendor id or brand substring, case-insensitive.
pub fn is_first_party(vendor_id: i32, vendor_name: &str, product_name: &str) -> bool {
    vendor_id == FIRST_PARTY_VENDOR_ID
        || vendor_name.to_lowercase().contains(FIRST_PARTY_BRAND)
        || product_name.to_lowercase().contains(FIRST_PARTY_BRAND)
}

struct RegistryCtx {
    dirty: Arc<AtomicBool>,
}

pub struct DeviceRegistry {
    devices: Arc<Mutex<Vec<DeviceInfo>>>,
    external_mouse: Arc<AtomicBool>,
    external_keyboard: Arc<AtomicBool>,
    is_running: Arc<AtomicBool>,
    change_rx: Receiver<Vec<DeviceInfo>>,
    change_tx: Sender<Vec<DeviceInfo>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (change_tx, change_rx) = unbounded();
        Self {
            devices: Arc::new(Mutex::new(Vec::new())),
            external_mouse: Arc::new(AtomicBool::new(false)),
            external_keyboard: Arc::new(AtomicBool::new(false)),
            is_running: Arc::new(AtomicBool::new(false)),
            change_rx,
            change_tx,
            thread: None,
        }
    }

    /// Start the enumeration thread. Idempotent.
    pub fn start(&mut self) -> GlissadeResult<()> {
        if self.is_running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.is_running.store(true, Ordering::SeqCst);

        info!("Starting device registry");

        let devices = self.devices.clone();
        let external_mouse = self.external_mouse.clone();
        let external_keyboard = self.external_keyboard.clone();
        let is_running = self.is_running.clone();
        let change_tx = self.change_tx.clone();

        let handle = thread::spawn(move || {
            run_registry(devices, external_mouse, external_keyboard, is_running, change_tx);
        });
        self.thread = Some(handle);

        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.is_running.load(Ordering::SeqCst) {
            return;
        }
        info!("Stopping device registry");
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    /// True iff any connected mouse/pointer is not first-party.
    pub fn external_mouse_present(&self) -> bool {
        self.external_mouse.load(Ordering::Relaxed)
    }

    /// True iff any connected keyboard is not first-party.
    pub fn external_keyboard_present(&self) -> bool {
        self.external_keyboard.load(Ordering::Relaxed)
    }

    /// Snapshot of the connected set, for display only.
    pub fn connected_devices(&self) -> Vec<DeviceInfo> {
        self.devices.lock().clone()
    }

    /// Receives a snapshot whenever the connected set changes by value.
    pub fn change_receiver(&self) -> Receiver<Vec<DeviceInfo>> {
        self.change_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.stop();
    }
}

extern "C" fn device_attached(
    context: *mut c_void,
    _result: IOReturn,
    _sender: *mut c_void,
    _device: IOHIDDeviceRef,
) {
    if context.is_null() {
        return;
    }
    let ctx = unsafe { &*(context as *const RegistryCtx) };
    ctx.dirty.store(true, Ordering::SeqCst);
}

extern "C" fn device_removed(
    context: *mut c_void,
    _result: IOReturn,
    _sender: *mut c_void,
    _device: IOHIDDeviceRef,
) {
    if context.is_null() {
        return;
    }
    let ctx = unsafe { &*(context as *const RegistryCtx) };
    ctx.dirty.store(true, Ordering::SeqCst);
}

fn run_registry(
    devices: Arc<Mutex<Vec<DeviceInfo>>>,
    external_mouse: Arc<AtomicBool>,
    external_keyboard: Arc<AtomicBool>,
    is_running: Arc<AtomicBool>,
    change_tx: Sender<Vec<DeviceInfo>>,
) {
    let dirty = Arc::new(AtomicBool::new(true));
    let ctx = Box::new(RegistryCtx { dirty: dirty.clone() });
    let ctx_ptr = Box::into_raw(ctx);

    unsafe {
        let manager = IOHIDManagerCreate(kCFAllocatorDefault, 0);
        if manager.is_null() {
            warn!("Failed to create IOHIDManager");
            let _ = Box::from_raw(ctx_ptr);
            is_running.store(false, Ordering::SeqCst);
            return;
        }

        let matching = build_matching_array();
        IOHIDManagerSetDeviceMatchingMultiple(manager, matching);
        cf_release(matching);

        IOHIDManagerRegisterDeviceMatchingCallback(manager, device_attached, ctx_ptr as *mut c_void);
        IOHIDManagerRegisterDeviceRemovalCallback(manager, device_removed, ctx_ptr as *mut c_void);

        let run_loop = CFRunLoopGetCurrent();
        IOHIDManagerScheduleWithRunLoop(manager, run_loop, kCFRunLoopDefaultMode);

        let open_status = IOHIDManagerOpen(manager, 0);
        if open_status != K_IO_RETURN_SUCCESS {
            // Enumeration generally still works; input reports would not,
            // and we never request those.
            debug!(status = open_status, "IOHIDManagerOpen returned non-success");
        }

        debug!("Device registry run loop started");

        let mut last_refresh_us: u64 = 0;
        while is_running.load(Ordering::SeqCst) {
            CFRunLoopRunInMode(kCFRunLoopDefaultMode, RUN_LOOP_SLICE_SECS, false);

            let now = glissade_common::now_us();
            let needs_scan = dirty.swap(false, Ordering::SeqCst)
                || now.saturating_sub(last_refresh_us) >= REFRESH_INTERVAL_US;
            if !needs_scan {
                continue;
            }
            last_refresh_us = now;

            let mut scanned = scan_devices(manager);
            scanned.sort_by(|a, b| {
                (a.vendor_id, a.product_id, &a.product_name, a.kind).cmp(&(
                    b.vendor_id,
                    b.product_id,
                    &b.product_name,
                    b.kind,
                ))
            });

            let changed = {
                let mut current = devices.lock();
                if *current != scanned {
                    *current = scanned.clone();
                    true
                } else {
                    false
                }
            };

            if changed {
                let mouse = scanned
                    .iter()
                    .any(|d| d.kind == DeviceKind::Mouse && !d.first_party);
                let keyboard = scanned
                    .iter()
                    .any(|d| d.kind == DeviceKind::Keyboard && !d.first_party);
                external_mouse.store(mouse, Ordering::Relaxed);
                external_keyboard.store(keyboard, Ordering::Relaxed);

                info!(
                    devices = scanned.len(),
                    external_mouse = mouse,
                    external_keyboard = keyboard,
                    "Connected device set changed"
                );
                let _ = change_tx.send(scanned);
            }
        }

        IOHIDManagerUnscheduleFromRunLoop(manager, run_loop, kCFRunLoopDefaultMode);
        IOHIDManagerClose(manager, 0);
        cf_release(manager as CFTypeRef);
        let _ = Box::from_raw(ctx_ptr);
    }

    debug!("Device registry stopped");
}

/// Matching dictionaries for generic-desktop mice, pointers, keyboards,
/// and keypads.
unsafe fn build_matching_array() -> CFArrayRef {
    let usages = [
        K_HID_USAGE_GD_MOUSE,
        K_HID_USAGE_GD_POINTER,
        K_HID_USAGE_GD_KEYBOARD,
        K_HID_USAGE_GD_KEYPAD,
    ];

    let mut dicts: Vec<*const c_void> = Vec::with_capacity(usages.len());
    for usage in usages {
        let dict = CFDictionaryCreateMutable(
            kCFAllocatorDefault,
            2,
            &kCFTypeDictionaryKeyCallBacks as *const c_void,
            &kCFTypeDictionaryValueCallBacks as *const c_void,
        );

        let page_key = cf_string(K_IOHID_DEVICE_USAGE_PAGE_KEY);
        let usage_key = cf_string(K_IOHID_DEVICE_USAGE_KEY);
        let page_value: i32 = K_HID_PAGE_GENERIC_DESKTOP as i32;
        let usage_value: i32 = usage as i32;
        let page_num = CFNumberCreate(
            kCFAllocatorDefault,
            K_CF_NUMBER_SINT32_TYPE,
            &page_value as *const i32 as *const c_void,
        );
        let usage_num = CFNumberCreate(
            kCFAllocatorDefault,
            K_CF_NUMBER_SINT32_TYPE,
            &usage_value as *const i32 as *const c_void,
        );

        CFDictionarySetValue(dict, page_key, page_num);
        CFDictionarySetValue(dict, usage_key, usage_num);
        cf_release(page_key);
        cf_release(usage_key);
        cf_release(page_num);
        cf_release(usage_num);

        dicts.push(dict as *const c_void);
    }

    let array = CFArrayCreate(
        kCFAllocatorDefault,
        dicts.as_ptr(),
        dicts.len() as CFIndex,
        &kCFTypeArrayCallBacks as *const c_void,
    );
    // The array retains the dictionaries; drop our references.
    for dict in dicts {
        cf_release(dict);
    }
    array
}

unsafe fn scan_devices(manager: IOHIDManagerRef) -> Vec<DeviceInfo> {
    let set = IOHIDManagerCopyDevices(manager);
    if set.is_null() {
        return Vec::new();
    }

    let count = CFSetGetCount(set) as usize;
    let mut refs: Vec<*const c_void> = vec![std::ptr::null(); count];
    CFSetGetValues(set, refs.as_mut_ptr());

    let mut out = Vec::with_capacity(count);
    for device in refs {
        let device = device as IOHIDDeviceRef;
        if device.is_null() {
            continue;
        }
        if let Some(info) = read_device_info(device) {
            out.push(info);
        }
    }

    cf_release(set);
    out
}

unsafe fn read_device_info(device: IOHIDDeviceRef) -> Option<DeviceInfo> {
    let usage_page = read_i32_property(device, K_IOHID_PRIMARY_USAGE_PAGE_KEY)?;
    let usage = read_i32_property(device, K_IOHID_PRIMARY_USAGE_KEY)?;
    if usage_page != K_HID_PAGE_GENERIC_DESKTOP as i32 {
        return None;
    }

    let kind = match usage as u32 {
        K_HID_USAGE_GD_MOUSE | K_HID_USAGE_GD_POINTER => DeviceKind::Mouse,
        K_HID_USAGE_GD_KEYBOARD | K_HID_USAGE_GD_KEYPAD => DeviceKind::Keyboard,
        _ => return None,
    };

    let vendor_id = read_i32_property(device, K_IOHID_VENDOR_ID_KEY).unwrap_or(0);
    let product_id = read_i32_property(device, K_IOHID_PRODUCT_ID_KEY).unwrap_or(0);
    let vendor_name = read_string_property(device, K_IOHID_MANUFACTURER_KEY).unwrap_or_default();
    let product_name = read_string_property(device, K_IOHID_PRODUCT_KEY).unwrap_or_default();
    let first_party = is_first_party(vendor_id, &vendor_name, &product_name);

    Some(DeviceInfo {
        vendor_id,
        product_id,
        vendor_name,
        product_name,
        kind,
        first_party,
    })
}

unsafe fn read_i32_property(device: IOHIDDeviceRef, key: &str) -> Option<i32> {
    let key_ref = cf_string(key);
    let value = IOHIDDeviceGetProperty(device, key_ref);
    cf_release(key_ref);
    cf_number_to_i32(value)
}

unsafe fn read_string_property(device: IOHIDDeviceRef, key: &str) -> Option<String> {
    let key_ref = cf_string(key);
    let value = IOHIDDeviceGetProperty(device, key_ref);
    cf_release(key_ref);
    cf_string_to_string(value)
}
