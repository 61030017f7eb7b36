//! C ABI shim the simulator host's native plugin loader links against.
//! Every exported function is `extern "C"`, takes only FFI-safe types, and
//! wraps its body in `catch_unwind` — a panic crossing this boundary would
//! be undefined behavior in the host process, so it is converted to an
//! error code instead.
//!
//! Call sequence the host is expected to follow: `bridge_on_load` once at
//! plugin startup, `bridge_on_update` once per simulation tick, and
//! `bridge_on_unload` once at shutdown. `bridge_on_update` allocates its
//! output buffer on this side; the host must pass it back to
//! `bridge_free_buffer` exactly once.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, OnceLock};

use bridge_orchestrator::{BridgeConfig, Orchestrator};
use bridge_protocol::VariableGroup;
use tracing::error;

pub const BRIDGE_OK: i32 = 0;
pub const BRIDGE_ERR_ALREADY_LOADED: i32 = -1;
pub const BRIDGE_ERR_NOT_LOADED: i32 = -2;
pub const BRIDGE_ERR_INVALID_UTF8: i32 = -3;
pub const BRIDGE_ERR_CONFIG: i32 = -4;
pub const BRIDGE_ERR_CATALOG: i32 = -5;
pub const BRIDGE_ERR_RUNTIME: i32 = -6;
pub const BRIDGE_ERR_PANIC: i32 = -7;

fn state() -> &'static Mutex<Option<Orchestrator>> {
    static STATE: OnceLock<Mutex<Option<Orchestrator>>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(None))
}

/// Parses the plugin's catalog spec text: one `name,group[,min,max]` entry
/// per line. Blank lines and lines starting with `#` are skipped.
fn parse_catalog_spec(text: &str) -> Result<Vec<(String, VariableGroup, Option<(f64, f64)>)>, String> {
    let mut specs = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 2 && fields.len() != 4 {
            return Err(format!("catalog spec line {}: expected 2 or 4 fields, got {}", lineno + 1, fields.len()));
        }
        let name = fields[0].trim().to_owned();
        let group = parse_group(fields[1].trim())
            .ok_or_else(|| format!("catalog spec line {}: unknown group '{}'", lineno + 1, fields[1]))?;
        let range = if fields.len() == 4 {
            let min: f64 = fields[2].trim().parse().map_err(|_| format!("catalog spec line {}: bad min", lineno + 1))?;
            let max: f64 = fields[3].trim().parse().map_err(|_| format!("catalog spec line {}: bad max", lineno + 1))?;
            Some((min, max))
        } else {
            None
        };
        specs.push((name, group, range));
    }
    Ok(specs)
}

fn parse_group(s: &str) -> Option<VariableGroup> {
    match s {
        "aircraft" => Some(VariableGroup::Aircraft),
        "controls" => Some(VariableGroup::Controls),
        "engine" => Some(VariableGroup::Engine),
        "navigation" => Some(VariableGroup::Navigation),
        "autopilot" => Some(VariableGroup::Autopilot),
        "environment" => Some(VariableGroup::Environment),
        "communication" => Some(VariableGroup::Communication),
        "warnings" => Some(VariableGroup::Warnings),
        "command" => Some(VariableGroup::Command),
        "misc" => Some(VariableGroup::Misc),
        _ => None,
    }
}

/// # Safety
/// `config_ptr`/`catalog_ptr` must point to valid, readable buffers of at
/// least `config_len`/`catalog_len` bytes, each containing UTF-8 text, for
/// the duration of this call.
#[no_mangle]
pub unsafe extern "C" fn bridge_on_load(
    config_ptr: *const u8,
    config_len: usize,
    catalog_ptr: *const u8,
    catalog_len: usize,
) -> i32 {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let config_bytes = unsafe { std::slice::from_raw_parts(config_ptr, config_len) };
        let catalog_bytes = unsafe { std::slice::from_raw_parts(catalog_ptr, catalog_len) };

        let config_str = match std::str::from_utf8(config_bytes) {
            Ok(s) => s,
            Err(_) => return BRIDGE_ERR_INVALID_UTF8,
        };
        let catalog_str = match std::str::from_utf8(catalog_bytes) {
            Ok(s) => s,
            Err(_) => return BRIDGE_ERR_INVALID_UTF8,
        };

        let config: BridgeConfig = match bridge_orchestrator::config::load_config_from_str(config_str) {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "bridge_on_load: config rejected");
                return BRIDGE_ERR_CONFIG;
            }
        };
        let specs = match parse_catalog_spec(catalog_str) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "bridge_on_load: catalog spec rejected");
                return BRIDGE_ERR_CATALOG;
            }
        };
        let spec_refs: Vec<(&str, VariableGroup, Option<(f64, f64)>)> =
            specs.iter().map(|(n, g, r)| (n.as_str(), *g, *r)).collect();

        let mut guard = state().lock().expect("bridge state mutex poisoned");
        if guard.is_some() {
            return BRIDGE_ERR_ALREADY_LOADED;
        }
        match Orchestrator::on_load(config, &spec_refs) {
            Ok(orchestrator) => {
                *guard = Some(orchestrator);
                BRIDGE_OK
            }
            Err(e) => {
                error!(error = %e, "bridge_on_load: orchestrator failed to start");
                BRIDGE_ERR_RUNTIME
            }
        }
    }));
    result.unwrap_or(BRIDGE_ERR_PANIC)
}

/// # Safety
/// `telemetry_ptr` must point to a valid buffer of `telemetry_len` bytes.
/// `out_ptr`/`out_len` must point to writable locations; on success they
/// receive an allocation that must be passed to `bridge_free_buffer`
/// exactly once. `out_cap` is the host's own output buffer capacity in
/// bytes — the allocation handed back through `out_ptr`/`out_len` never
/// exceeds it; commands beyond that budget are dropped and counted in
/// diagnostics rather than growing the allocation past what the host can
/// hold.
#[no_mangle]
pub unsafe extern "C" fn bridge_on_update(
    telemetry_ptr: *const u8,
    telemetry_len: usize,
    now_us: u64,
    out_cap: usize,
    out_ptr: *mut *mut u8,
    out_len: *mut usize,
) -> i32 {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let telemetry = unsafe { std::slice::from_raw_parts(telemetry_ptr, telemetry_len) };
        let mut guard = state().lock().expect("bridge state mutex poisoned");
        let Some(orchestrator) = guard.as_mut() else {
            return BRIDGE_ERR_NOT_LOADED;
        };
        let command_frame = orchestrator.on_update(telemetry, now_us, out_cap);
        write_out_buffer(command_frame, out_ptr, out_len);
        BRIDGE_OK
    }));
    result.unwrap_or(BRIDGE_ERR_PANIC)
}

fn write_out_buffer(mut data: Vec<u8>, out_ptr: *mut *mut u8, out_len: *mut usize) {
    data.shrink_to_fit();
    let len = data.len();
    let ptr = if len == 0 { std::ptr::null_mut() } else { data.as_mut_ptr() };
    std::mem::forget(data);
    // SAFETY: caller contract guarantees these are valid writable locations.
    unsafe {
        *out_ptr = ptr;
        *out_len = len;
    }
}

/// Releases a buffer previously returned through `bridge_on_update`'s
/// `out_ptr`/`out_len` pair.
///
/// # Safety
/// `ptr` must be exactly a value previously written to `*out_ptr` by
/// `bridge_on_update`, with the matching `len`, and must not have been
/// freed already.
#[no_mangle]
pub unsafe extern "C" fn bridge_free_buffer(ptr: *mut u8, len: usize) {
    if ptr.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| unsafe {
        drop(Vec::from_raw_parts(ptr, len, len));
    }));
}

#[no_mangle]
pub extern "C" fn bridge_on_unload() -> i32 {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut guard = state().lock().expect("bridge state mutex poisoned");
        match guard.take() {
            Some(orchestrator) => {
                orchestrator.on_unload();
                BRIDGE_OK
            }
            None => BRIDGE_ERR_NOT_LOADED,
        }
    }));
    result.unwrap_or(BRIDGE_ERR_PANIC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_field_catalog_lines() {
        let specs = parse_catalog_spec("Aircraft.Altitude,aircraft\nControls.Throttle,controls\n").unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].0, "Aircraft.Altitude");
        assert_eq!(specs[0].1, VariableGroup::Aircraft);
        assert_eq!(specs[0].2, None);
    }

    #[test]
    fn parses_four_field_catalog_lines_with_range() {
        let specs = parse_catalog_spec("Controls.Throttle,controls,0.0,1.0\n").unwrap();
        assert_eq!(specs[0].2, Some((0.0, 1.0)));
    }

    #[test]
    fn skips_blank_lines_and_comments() {
        let specs = parse_catalog_spec("# comment\n\nAircraft.Pitch,aircraft\n").unwrap();
        assert_eq!(specs.len(), 1);
    }

    #[test]
    fn rejects_unknown_group() {
        assert!(parse_catalog_spec("Aircraft.X,not_a_group\n").is_err());
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(parse_catalog_spec("Aircraft.X,aircraft,0.0\n").is_err());
    }

    #[test]
    fn full_lifecycle_round_trips_through_the_c_abi() {
        let config = b"schema_version = 1\n[tcp]\ndata_bind = \"127.0.0.1:0\"\ncommand_bind = \"127.0.0.1:0\"\n[websocket]\nbind = \"127.0.0.1:0\"\n";
        let catalog = b"Aircraft.Altitude,aircraft\n";

        let rc = unsafe {
            bridge_on_load(config.as_ptr(), config.len(), catalog.as_ptr(), catalog.len())
        };
        assert_eq!(rc, BRIDGE_OK);

        let mut out_ptr: *mut u8 = std::ptr::null_mut();
        let mut out_len: usize = 0;
        let empty = [0u8; 0];
        let rc = unsafe { bridge_on_update(empty.as_ptr(), 0, 1, 64 * 1024, &mut out_ptr, &mut out_len) };
        assert_eq!(rc, BRIDGE_OK);
        unsafe { bridge_free_buffer(out_ptr, out_len) };

        assert_eq!(bridge_on_unload(), BRIDGE_OK);
        // A second unload with nothing loaded reports NOT_LOADED rather
        // than panicking.
        assert_eq!(bridge_on_unload(), BRIDGE_ERR_NOT_LOADED);
    }
}
