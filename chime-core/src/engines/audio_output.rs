//! Shared kira audio manager singleton.
//!
//! One `AudioManager` (one cpal stream) serves every kira-backed player in the
//! process. It is created on first use; if no output device is available the
//! slot stays empty and every caller sees `None`.

use std::sync::{Mutex, OnceLock};

use kira::{AudioManager, AudioManagerSettings, Decibels, DefaultBackend};

static AUDIO_MANAGER: OnceLock<Option<Mutex<AudioManager<DefaultBackend>>>> = OnceLock::new();

/// Amplitudes at or below this are treated as silence.
const SILENCE_DB: f32 = -60.0;

fn audio_manager() -> Option<&'static Mutex<AudioManager<DefaultBackend>>> {
    AUDIO_MANAGER
        .get_or_init(|| match AudioManager::<DefaultBackend>::new(AudioManagerSettings::default()) {
            Ok(manager) => {
                tracing::info!("Initialized kira audio manager");
                Some(Mutex::new(manager))
            }
            Err(e) => {
                tracing::error!("Failed to initialize audio output: {}", e);
                None
            }
        })
        .as_ref()
}

/// Runs `f` with the shared manager, or returns `None` if there is no audio
/// device (or the manager's lock is poisoned).
pub fn with_audio_manager<R>(f: impl FnOnce(&mut AudioManager<DefaultBackend>) -> R) -> Option<R> {
    let manager = audio_manager()?;
    let mut guard = manager.lock().ok()?;
    Some(f(&mut guard))
}

/// Returns whether an audio output device could be opened.
pub fn is_audio_available() -> bool {
    audio_manager().is_some()
}

/// Converts a normalized amplitude (0.0 - 1.0) to kira decibels.
pub fn amplitude_to_db(volume: f32) -> Decibels {
    if volume <= 0.0 {
        return Decibels::SILENCE;
    }
    let db = 20.0 * volume.min(1.0).log10();
    if db <= SILENCE_DB {
        Decibels::SILENCE
    } else {
        Decibels(db)
    }
}
