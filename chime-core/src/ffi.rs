//! C FFI layer for Swift and other native hosts.
//!
//! Every function here works on the process-wide registry. All functions
//! are `extern "C"` and take raw pointers; null or non-UTF-8 arguments make
//! the call a no-op that returns null, `false` or zero.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::controller::{PlayMode, SoundController};
use crate::registry::PlaybackRegistry;

/// Opaque handle for SoundController.
pub struct FfiSoundController(SoundController);

/// Borrows a C string argument, or `None` if it is null or not UTF-8.
unsafe fn str_arg<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}

// ============================================================================
// Fire-and-forget playback
// ============================================================================

/// Plays a sound once at `volume` (0.0 - 1.0, clamped).
///
/// Returns true if playback was requested. Loading and playback failures
/// happen in the background and are only logged.
///
/// # Safety
/// - `sound` must be a valid null-terminated UTF-8 string
#[no_mangle]
pub unsafe extern "C" fn chime_play(sound: *const c_char, volume: f64) -> bool {
    let Some(sound) = str_arg(sound) else {
        return false;
    };
    PlaybackRegistry::global().play_with_volume(sound, volume);
    true
}

/// Pauses every fire-and-forget instance of a sound, matched by file name.
/// Returns how many were paused.
///
/// # Safety
/// - `sound` must be a valid null-terminated UTF-8 string
#[no_mangle]
pub unsafe extern "C" fn chime_stop(sound: *const c_char) -> u32 {
    let Some(sound) = str_arg(sound) else {
        return 0;
    };
    PlaybackRegistry::global().stop(sound) as u32
}

/// Pauses every fire-and-forget instance. Returns how many were paused.
#[no_mangle]
pub extern "C" fn chime_stop_all() -> u32 {
    PlaybackRegistry::global().stop_all_managed_sounds() as u32
}

/// Returns the names of the managed fire-and-forget sounds as a JSON array.
///
/// # Safety
/// - The returned string must be freed with `chime_free_string`
#[no_mangle]
pub extern "C" fn chime_active_sounds_json() -> *mut c_char {
    let sounds = PlaybackRegistry::global().active_sounds();
    match serde_json::to_string(&sounds) {
        Ok(json) => match CString::new(json) {
            Ok(cstr) => cstr.into_raw(),
            Err(_) => ptr::null_mut(),
        },
        Err(_) => ptr::null_mut(),
    }
}

// ============================================================================
// Sound Controller
// ============================================================================

/// Creates a controller for `sound`.
///
/// `continue_mode` selects resume-from-position playback; otherwise every
/// play starts from the beginning. A sound that cannot be loaded still
/// yields a controller whose flag works but which plays nothing.
///
/// # Safety
/// - `sound` must be a valid null-terminated UTF-8 string
/// - The returned pointer must be freed with `chime_controller_free`
#[no_mangle]
pub unsafe extern "C" fn chime_controller_new(
    sound: *const c_char,
    volume: f64,
    continue_mode: bool,
) -> *mut FfiSoundController {
    let Some(sound) = str_arg(sound) else {
        return ptr::null_mut();
    };

    let play_mode = if continue_mode {
        PlayMode::Continue
    } else {
        PlayMode::Reset
    };
    let controller = SoundController::new(sound, volume, play_mode);
    Box::into_raw(Box::new(FfiSoundController(controller)))
}

/// Frees a controller, stopping its sound.
///
/// # Safety
/// - `controller` must be a valid pointer returned by `chime_controller_new`
/// - `controller` must not be used after this call
#[no_mangle]
pub unsafe extern "C" fn chime_controller_free(controller: *mut FfiSoundController) {
    if !controller.is_null() {
        drop(Box::from_raw(controller));
    }
}

/// Starts the controller's sound.
///
/// # Safety
/// - `controller` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn chime_controller_play(controller: *mut FfiSoundController) {
    if let Some(controller) = controller.as_mut() {
        controller.0.play();
    }
}

/// Pauses the controller's sound.
///
/// # Safety
/// - `controller` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn chime_controller_stop(controller: *mut FfiSoundController) {
    if let Some(controller) = controller.as_mut() {
        controller.0.stop();
    }
}

/// Returns the controller's playing flag. False once the sound completes.
///
/// # Safety
/// - `controller` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn chime_controller_is_playing(controller: *const FfiSoundController) -> bool {
    match controller.as_ref() {
        Some(controller) => controller.0.is_playing(),
        None => false,
    }
}

/// Sets the controller's volume (0.0 - 1.0, clamped).
///
/// # Safety
/// - `controller` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn chime_controller_set_volume(controller: *mut FfiSoundController, volume: f64) {
    if let Some(controller) = controller.as_mut() {
        controller.0.set_volume(volume);
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Frees a string returned by an FFI function.
///
/// # Safety
/// - `s` must be a valid pointer returned by a chime FFI function, or null
#[no_mangle]
pub unsafe extern "C" fn chime_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Returns the library version as a string.
///
/// # Safety
/// - The returned string must be freed with `chime_free_string`
#[no_mangle]
pub extern "C" fn chime_version() -> *mut c_char {
    let version = env!("CARGO_PKG_VERSION");
    match CString::new(version) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

// ============================================================================
// Tests
// ============================================================================
