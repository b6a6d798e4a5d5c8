//! FFI bindings for the beacon engine
//!
//! This module provides C-compatible functions for driving a
//! [`BeaconManager`] from a mobile bridge. Structured arguments and results
//! are JSON strings. Returned strings are allocated here and must be freed
//! by the caller using `beacons_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::EngineConfig;
use crate::error::{BeaconError, Result};
use crate::events::BeaconEvent;
use crate::manager::BeaconManager;
use crate::scan::{constants, ForegroundServiceConfig};
use crate::types::{RawFrame, Region, RegionInfo};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
    static LAST_ERROR_CODE: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn set_last_beacon_error(err: &BeaconError) {
    set_last_error(&err.to_string());
    LAST_ERROR_CODE.with(|c| {
        *c.borrow_mut() = CString::new(err.error_code()).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
    LAST_ERROR_CODE.with(|c| {
        *c.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn to_json_cstr<T: Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_beacon_error(&e.into());
            ptr::null_mut()
        }
    }
}

/// 0 on success, -1 with the last error set otherwise
fn status(result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            set_last_beacon_error(&e);
            -1
        }
    }
}

/// Region as sent by the bridge; empty uuid and negative numbers are wildcards
#[derive(Debug, Deserialize)]
struct RegionRequest {
    identifier: String,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    major: Option<i32>,
    #[serde(default)]
    minor: Option<i32>,
}

impl RegionRequest {
    fn parse(json: &str) -> Result<Region> {
        let request: Self = serde_json::from_str(json)?;
        Region::from_parts(
            &request.identifier,
            request.uuid.as_deref(),
            request.major,
            request.minor,
        )
    }
}

fn observed_at(timestamp_ms: i64) -> Result<DateTime<Utc>> {
    if timestamp_ms <= 0 {
        return Ok(Utc::now());
    }
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .ok_or_else(|| BeaconError::InvalidConfig(format!("timestamp {timestamp_ms} out of range")))
}

// ============================================================================
// Manager lifecycle
// ============================================================================

/// Opaque handle to a BeaconManager and its event queue
pub struct BeaconManagerHandle {
    manager: BeaconManager,
    events: Mutex<UnboundedReceiver<BeaconEvent>>,
}

macro_rules! handle_or {
    ($handle:expr, $fail:expr) => {{
        if $handle.is_null() {
            set_last_error("Null manager pointer");
            return $fail;
        }
        &*$handle
    }};
}

macro_rules! string_or {
    ($ptr:expr, $what:literal, $fail:expr) => {{
        match cstr_to_string($ptr) {
            Some(s) => s,
            None => {
                set_last_error(concat!("Invalid ", $what, " string pointer"));
                return $fail;
            }
        }
    }};
}

/// Create a manager.
///
/// # Safety
/// - `config_json` must be NULL (defaults) or a valid null-terminated C string.
/// - Returns a pointer that must be freed with `beacons_manager_free`.
/// - Returns NULL on error; call `beacons_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn beacons_manager_new(config_json: *const c_char) -> *mut BeaconManagerHandle {
    clear_last_error();

    let config = match cstr_to_string(config_json) {
        None => Ok(EngineConfig::default()),
        Some(json) => EngineConfig::from_json(&json),
    };

    match config.and_then(BeaconManager::with_config) {
        Ok((manager, events)) => Box::into_raw(Box::new(BeaconManagerHandle {
            manager,
            events: Mutex::new(events),
        })),
        Err(e) => {
            set_last_beacon_error(&e);
            ptr::null_mut()
        }
    }
}

/// Free a manager.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn beacons_manager_free(handle: *mut BeaconManagerHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

// ============================================================================
// Scan cycles and events
// ============================================================================

/// Process one scan cycle.
///
/// `frames_json` is an array of `{"data": "<hex>", "rssi": int, "address": str?}`.
/// `timestamp_ms` is the cycle time in Unix milliseconds; `<= 0` means now.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - `frames_json` must be a valid null-terminated C string.
/// - Returns a newly allocated cycle report that must be freed with `beacons_free_string`.
/// - Returns NULL on error; call `beacons_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn beacons_process_cycle(
    handle: *const BeaconManagerHandle,
    frames_json: *const c_char,
    timestamp_ms: i64,
) -> *mut c_char {
    clear_last_error();
    let handle = handle_or!(handle, ptr::null_mut());
    let json = string_or!(frames_json, "frames JSON", ptr::null_mut());

    let parsed = serde_json::from_str::<Vec<RawFrame>>(&json)
        .map_err(BeaconError::from)
        .and_then(|frames| Ok((frames, observed_at(timestamp_ms)?)));
    match parsed {
        Ok((frames, at)) => to_json_cstr(&handle.manager.process_cycle(&frames, at)),
        Err(e) => {
            set_last_beacon_error(&e);
            ptr::null_mut()
        }
    }
}

/// Drain pending events as a JSON array of `{"event": name, "payload": {...}}`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - Returns a newly allocated string that must be freed with `beacons_free_string`.
#[no_mangle]
pub unsafe extern "C" fn beacons_poll_events(handle: *const BeaconManagerHandle) -> *mut c_char {
    clear_last_error();
    let handle = handle_or!(handle, ptr::null_mut());

    let mut events = Vec::new();
    let mut rx = handle.events.lock();
    while let Ok(event) = rx.try_recv() {
        events.push(event.to_envelope());
    }
    to_json_cstr(&events)
}

// ============================================================================
// Layouts
// ============================================================================

/// Register a layout. Returns 1 if added, 0 if already present, -1 on error.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - `spec` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn beacons_add_layout(
    handle: *const BeaconManagerHandle,
    spec: *const c_char,
) -> i32 {
    clear_last_error();
    let handle = handle_or!(handle, -1);
    let spec = string_or!(spec, "layout", -1);
    match handle.manager.add_layout(&spec) {
        Ok(added) => i32::from(added),
        Err(e) => {
            set_last_beacon_error(&e);
            -1
        }
    }
}

/// Remove a layout. Returns 1 if removed, 0 if absent, -1 on error.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - `spec` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn beacons_remove_layout(
    handle: *const BeaconManagerHandle,
    spec: *const c_char,
) -> i32 {
    clear_last_error();
    let handle = handle_or!(handle, -1);
    let spec = string_or!(spec, "layout", -1);
    match handle.manager.remove_layout(&spec) {
        Ok(removed) => i32::from(removed),
        Err(e) => {
            set_last_beacon_error(&e);
            -1
        }
    }
}

/// Register a JSON array of layouts atomically. Returns how many were new, or -1.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - `specs_json` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn beacons_add_layouts(
    handle: *const BeaconManagerHandle,
    specs_json: *const c_char,
) -> i32 {
    clear_last_error();
    let handle = handle_or!(handle, -1);
    let json = string_or!(specs_json, "layouts JSON", -1);
    let result = serde_json::from_str::<Vec<String>>(&json)
        .map_err(BeaconError::from)
        .and_then(|specs| handle.manager.add_layouts(&specs));
    match result {
        Ok(n) => i32::try_from(n).unwrap_or(i32::MAX),
        Err(e) => {
            set_last_beacon_error(&e);
            -1
        }
    }
}

/// Remove a JSON array of layouts atomically. Returns how many were removed, or -1.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - `specs_json` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn beacons_remove_layouts(
    handle: *const BeaconManagerHandle,
    specs_json: *const c_char,
) -> i32 {
    clear_last_error();
    let handle = handle_or!(handle, -1);
    let json = string_or!(specs_json, "layouts JSON", -1);
    let result = serde_json::from_str::<Vec<String>>(&json)
        .map_err(BeaconError::from)
        .and_then(|specs| handle.manager.remove_layouts(&specs));
    match result {
        Ok(n) => i32::try_from(n).unwrap_or(i32::MAX),
        Err(e) => {
            set_last_beacon_error(&e);
            -1
        }
    }
}

// ============================================================================
// Filtering and identity
// ============================================================================

/// Select the RSSI filter by code (0 running average, 1 ARMA).
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn beacons_set_rssi_filter(
    handle: *const BeaconManagerHandle,
    filter_code: i32,
    tuning_param: f64,
) -> i32 {
    clear_last_error();
    let handle = handle_or!(handle, -1);
    status(handle.manager.set_rssi_filter_code(filter_code, tuning_param))
}

/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
#[no_mangle]
pub unsafe extern "C" fn beacons_set_hardware_equality_enforced(
    handle: *const BeaconManagerHandle,
    enforced: bool,
) -> i32 {
    clear_last_error();
    let handle = handle_or!(handle, -1);
    handle.manager.set_hardware_equality_enforced(enforced);
    0
}

/// Save filter state to JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - Returns a newly allocated string that must be freed with `beacons_free_string`.
/// - Returns NULL on error; call `beacons_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn beacons_save_filter_state(handle: *const BeaconManagerHandle) -> *mut c_char {
    clear_last_error();
    let handle = handle_or!(handle, ptr::null_mut());
    match handle.manager.save_filter_state() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_beacon_error(&e);
            ptr::null_mut()
        }
    }
}

/// Load filter state from JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn beacons_load_filter_state(
    handle: *const BeaconManagerHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();
    let handle = handle_or!(handle, -1);
    let json = string_or!(json, "JSON", -1);
    status(handle.manager.load_filter_state(&json))
}

// ============================================================================
// Monitoring and ranging
// ============================================================================

/// Start monitoring `{"identifier", "uuid"?, "major"?, "minor"?}`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - `region_json` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn beacons_start_monitoring(
    handle: *const BeaconManagerHandle,
    region_json: *const c_char,
) -> i32 {
    clear_last_error();
    let handle = handle_or!(handle, -1);
    let json = string_or!(region_json, "region JSON", -1);
    status(RegionRequest::parse(&json).map(|r| handle.manager.start_monitoring(r)))
}

/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - `region_id` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn beacons_stop_monitoring(
    handle: *const BeaconManagerHandle,
    region_id: *const c_char,
) -> i32 {
    clear_last_error();
    let handle = handle_or!(handle, -1);
    let id = string_or!(region_id, "region id", -1);
    handle.manager.stop_monitoring(&id);
    0
}

/// Queue a `didDetermineState` event for a region.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - `region_id` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn beacons_request_state(
    handle: *const BeaconManagerHandle,
    region_id: *const c_char,
) -> i32 {
    clear_last_error();
    let handle = handle_or!(handle, -1);
    let id = string_or!(region_id, "region id", -1);
    handle.manager.request_state_for_region(&id);
    0
}

/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - `region_json` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn beacons_start_ranging(
    handle: *const BeaconManagerHandle,
    region_json: *const c_char,
) -> i32 {
    clear_last_error();
    let handle = handle_or!(handle, -1);
    let json = string_or!(region_json, "region JSON", -1);
    status(RegionRequest::parse(&json).map(|r| handle.manager.start_ranging(r)))
}

/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - `region_id` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn beacons_stop_ranging(
    handle: *const BeaconManagerHandle,
    region_id: *const c_char,
) -> i32 {
    clear_last_error();
    let handle = handle_or!(handle, -1);
    let id = string_or!(region_id, "region id", -1);
    handle.manager.stop_ranging(&id);
    0
}

/// Monitored regions as a JSON array of `{identifier, uuid, major, minor}`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - Returns a newly allocated string that must be freed with `beacons_free_string`.
#[no_mangle]
pub unsafe extern "C" fn beacons_monitored_regions(handle: *const BeaconManagerHandle) -> *mut c_char {
    clear_last_error();
    let handle = handle_or!(handle, ptr::null_mut());
    let regions: Vec<RegionInfo> = handle
        .manager
        .monitored_regions()
        .iter()
        .map(Region::info)
        .collect();
    to_json_cstr(&regions)
}

/// Ranged regions as a JSON array of `{identifier, uuid, major, minor}`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - Returns a newly allocated string that must be freed with `beacons_free_string`.
#[no_mangle]
pub unsafe extern "C" fn beacons_ranged_regions(handle: *const BeaconManagerHandle) -> *mut c_char {
    clear_last_error();
    let handle = handle_or!(handle, ptr::null_mut());
    let regions: Vec<RegionInfo> = handle
        .manager
        .ranged_regions()
        .iter()
        .map(Region::info)
        .collect();
    to_json_cstr(&regions)
}

// ============================================================================
// Scan provider
// ============================================================================

/// Which scan period `beacons_set_scan_period` updates
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPeriodKind {
    Foreground = 0,
    ForegroundBetween = 1,
    Background = 2,
    BackgroundBetween = 3,
}

/// Set one scan period (milliseconds), selected by `ScanPeriodKind`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn beacons_set_scan_period(
    handle: *const BeaconManagerHandle,
    kind: i32,
    period_ms: i64,
) -> i32 {
    clear_last_error();
    let handle = handle_or!(handle, -1);
    let manager = &handle.manager;
    let result = match kind {
        k if k == ScanPeriodKind::Foreground as i32 => manager.set_foreground_scan_period(period_ms),
        k if k == ScanPeriodKind::ForegroundBetween as i32 => {
            manager.set_foreground_between_scan_period(period_ms)
        }
        k if k == ScanPeriodKind::Background as i32 => manager.set_background_scan_period(period_ms),
        k if k == ScanPeriodKind::BackgroundBetween as i32 => {
            manager.set_background_between_scan_period(period_ms)
        }
        other => Err(BeaconError::InvalidConfig(format!("unknown scan period kind {other}"))),
    };
    status(result)
}

/// Transmission support status code (0 means supported).
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
#[no_mangle]
pub unsafe extern "C" fn beacons_check_transmission_supported(
    handle: *const BeaconManagerHandle,
) -> i32 {
    clear_last_error();
    let handle = handle_or!(handle, -1);
    handle.manager.check_transmission_supported().code()
}

/// Enable foreground-service scanning; returns the token as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
/// - `config_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `beacons_free_string`.
/// - Returns NULL on error; call `beacons_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn beacons_enable_foreground_service(
    handle: *const BeaconManagerHandle,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();
    let handle = handle_or!(handle, ptr::null_mut());
    let json = string_or!(config_json, "notification config", ptr::null_mut());
    let result = serde_json::from_str::<ForegroundServiceConfig>(&json)
        .map_err(BeaconError::from)
        .and_then(|config| handle.manager.enable_foreground_service_scanning(&config));
    match result {
        Ok(token) => to_json_cstr(&token),
        Err(e) => {
            set_last_beacon_error(&e);
            ptr::null_mut()
        }
    }
}

/// Returns 1 if a keep-alive was released, 0 if none was active, -1 on error.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `beacons_manager_new`.
#[no_mangle]
pub unsafe extern "C" fn beacons_disable_foreground_service(
    handle: *const BeaconManagerHandle,
) -> i32 {
    clear_last_error();
    let handle = handle_or!(handle, -1);
    match handle.manager.disable_foreground_service_scanning() {
        Ok(released) => i32::from(released),
        Err(e) => {
            set_last_beacon_error(&e);
            -1
        }
    }
}

/// Bridge constants as a JSON object.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `beacons_free_string`.
#[no_mangle]
pub unsafe extern "C" fn beacons_constants() -> *mut c_char {
    clear_last_error();
    to_json_cstr(&constants())
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by engine functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an engine function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn beacons_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next engine call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn beacons_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the machine-readable code of the last error (e.g. `ERROR_INVALID_CONFIG`).
///
/// # Safety
/// Same lifetime rules as `beacons_last_error`. Returns NULL when the last
/// failure was a bad pointer rather than an engine error.
#[no_mangle]
pub unsafe extern "C" fn beacons_last_error_code() -> *const c_char {
    LAST_ERROR_CODE.with(|c| match &*c.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn beacons_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
