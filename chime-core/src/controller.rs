//! Single-sound controller with an observable playing flag.

use std::time::Duration;

use crate::engines::normalize_volume;
use crate::notify::Subscription;
use crate::registry::{PlaybackRegistry, PlayerInstance};
use crate::state::Binding;

/// Whether a player rewinds before each `play()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayMode {
    /// Seek to the start before every play.
    #[default]
    Reset,
    /// Resume from the current position.
    Continue,
}

/// Owns one player for one sound and publishes whether it is playing.
///
/// The flag turns false on `stop()` and, without any caller action, when the
/// sound plays to its end. If the sound could not be prepared, `play` and
/// `stop` still drive the flag but have nothing to play.
pub struct SoundController {
    sound: String,
    play_mode: PlayMode,
    volume: f64,
    player: Option<PlayerInstance>,
    is_playing: Binding<bool>,
    _completion: Option<Subscription>,
}

impl SoundController {
    /// Creates a controller on the process-wide registry.
    pub fn new(sound: &str, volume: f64, play_mode: PlayMode) -> Self {
        Self::with_registry(PlaybackRegistry::global(), sound, volume, play_mode)
    }

    /// Creates a controller on `registry`.
    pub fn with_registry(registry: &PlaybackRegistry, sound: &str, volume: f64, play_mode: PlayMode) -> Self {
        let is_playing = Binding::new(false);
        let mut player = registry.prepare(sound);

        let completion = player.as_mut().map(|instance| {
            instance.set_volume(volume);
            let flag = is_playing.clone();
            let coordinator = registry.coordinator();
            registry.engine().notifications().observe_finished(instance.item(), move |item| {
                let flag = flag.clone();
                coordinator.dispatch(Box::new(move || {
                    tracing::debug!("Controller sound {} finished", item);
                    flag.set(false);
                }));
            })
        });

        Self {
            sound: sound.to_string(),
            play_mode,
            volume: f64::from(normalize_volume(volume)),
            player,
            is_playing,
            _completion: completion,
        }
    }

    /// Starts playback; rewinds first in [`PlayMode::Reset`].
    pub fn play(&mut self) {
        self.is_playing.set(true);
        if let Some(player) = self.player.as_mut() {
            if self.play_mode == PlayMode::Reset {
                player.seek(Duration::ZERO);
            }
            player.play();
        }
    }

    /// Pauses playback. Calling it while stopped changes nothing.
    pub fn stop(&mut self) {
        self.is_playing.set(false);
        if let Some(player) = self.player.as_mut() {
            player.pause();
        }
    }

    /// Writes the volume through to the player immediately.
    pub fn set_volume(&mut self, volume: f64) {
        self.volume = f64::from(normalize_volume(volume));
        if let Some(player) = self.player.as_mut() {
            player.set_volume(volume);
        }
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing.get()
    }

    /// The published flag, for watching.
    pub fn is_playing_state(&self) -> Binding<bool> {
        self.is_playing.clone()
    }

    pub fn play_mode(&self) -> PlayMode {
        self.play_mode
    }

    pub fn sound(&self) -> &str {
        &self.sound
    }

    /// False if the sound could not be prepared.
    pub fn is_loaded(&self) -> bool {
        self.player.is_some()
    }

    pub fn player(&self) -> Option<&PlayerInstance> {
        self.player.as_ref()
    }
}

impl std::fmt::Debug for SoundController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundController")
            .field("sound", &self.sound)
            .field("play_mode", &self.play_mode)
            .field("is_playing", &self.is_playing())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChimeConfig;
    use crate::dispatch::Immediate;
    use crate::engines::{MediaEngine, VirtualEngine};
    use std::sync::{Arc, Mutex};

    fn registry(engine: &VirtualEngine) -> PlaybackRegistry {
        PlaybackRegistry::with_dispatchers(
            Arc::new(engine.clone()),
            ChimeConfig::default(),
            Arc::new(Immediate),
            Arc::new(Immediate),
        )
    }

    fn snapshot(engine: &VirtualEngine, controller: &SoundController) -> crate::engines::PlayerSnapshot {
        let item = controller.player().unwrap().item();
        engine.snapshot(item).unwrap()
    }

    #[test]
    fn test_flag_follows_play_and_stop() {
        let engine = VirtualEngine::new();
        let registry = registry(&engine);
        let mut controller = SoundController::with_registry(&registry, "beep.mp3", 1.0, PlayMode::Reset);

        assert!(!controller.is_playing());
        controller.play();
        assert!(controller.is_playing());
        assert!(snapshot(&engine, &controller).playing);

        controller.stop();
        assert!(!controller.is_playing());
        assert!(!snapshot(&engine, &controller).playing);

        controller.stop();
        assert!(!controller.is_playing());
    }

    #[test]
    fn test_completion_clears_flag_without_pause() {
        let engine = VirtualEngine::new().with_duration("beep.mp3", Duration::from_secs(2));
        let registry = registry(&engine);
        let mut controller = SoundController::with_registry(&registry, "beep.mp3", 1.0, PlayMode::Reset);

        controller.play();
        engine.advance(Duration::from_secs(2));

        assert!(!controller.is_playing());
        let snap = snapshot(&engine, &controller);
        assert!(snap.finished);
        assert_eq!(snap.pauses, 0);
    }

    #[test]
    fn test_reset_mode_seeks_every_play() {
        let engine = VirtualEngine::new().with_duration("beep.mp3", Duration::from_secs(5));
        let registry = registry(&engine);
        let mut controller = SoundController::with_registry(&registry, "beep.mp3", 1.0, PlayMode::Reset);

        controller.play();
        engine.advance(Duration::from_secs(1));
        controller.play();

        let snap = snapshot(&engine, &controller);
        assert_eq!(snap.seeks, 2);
        assert_eq!(snap.plays, 2);
        assert_eq!(snap.position, Duration::ZERO);
    }

    #[test]
    fn test_continue_mode_never_seeks() {
        let engine = VirtualEngine::new().with_duration("song.mp3", Duration::from_secs(5));
        let registry = registry(&engine);
        let mut controller = SoundController::with_registry(&registry, "song.mp3", 1.0, PlayMode::Continue);

        controller.play();
        engine.advance(Duration::from_secs(1));
        controller.stop();
        controller.play();

        let snap = snapshot(&engine, &controller);
        assert_eq!(snap.seeks, 0);
        assert_eq!(snap.position, Duration::from_secs(1));
    }

    #[test]
    fn test_volume_written_through() {
        let engine = VirtualEngine::new();
        let registry = registry(&engine);
        let mut controller = SoundController::with_registry(&registry, "beep.mp3", 0.3, PlayMode::Reset);
        assert_eq!(snapshot(&engine, &controller).volume, 0.3);

        controller.set_volume(0.8);
        assert_eq!(snapshot(&engine, &controller).volume, 0.8);
        controller.set_volume(-2.0);
        assert_eq!(controller.volume(), 0.0);
        assert_eq!(snapshot(&engine, &controller).volume, 0.0);
    }

    #[test]
    fn test_unpreparable_sound_is_safe() {
        let engine = VirtualEngine::new();
        let registry = registry(&engine);
        let mut controller = SoundController::with_registry(&registry, "", 1.0, PlayMode::Reset);

        assert!(!controller.is_loaded());
        controller.play();
        controller.set_volume(0.5);
        controller.stop();
        assert!(!controller.is_playing());
        assert_eq!(engine.live_count(), 0);
    }

    #[test]
    fn test_watchers_see_transitions() {
        let engine = VirtualEngine::new().with_duration("beep.mp3", Duration::from_millis(500));
        let registry = registry(&engine);
        let mut controller = SoundController::with_registry(&registry, "beep.mp3", 1.0, PlayMode::Reset);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _guard = controller.is_playing_state().watch(move |v| sink.lock().unwrap().push(*v));

        controller.play();
        engine.advance(Duration::from_secs(1));
        controller.play();
        controller.stop();

        assert_eq!(*seen.lock().unwrap(), vec![true, false, true, false]);
    }

    #[test]
    fn test_drop_detaches_observer() {
        let engine = VirtualEngine::new();
        let registry = registry(&engine);
        let controller = SoundController::with_registry(&registry, "beep.mp3", 1.0, PlayMode::Reset);
        let item = controller.player().unwrap().item();
        // Registry observer plus the controller's own.
        assert_eq!(engine.notifications().observer_count(item), 2);

        drop(controller);
        assert_eq!(engine.notifications().observer_count(item), 0);
    }
}
