//! Declarative sound binding.
//!
//! A view describes the sound it wants with a [`SoundBinding`] every time it
//! renders. The first description is attached to produce an
//! [`AttachedSound`], which owns the player and keeps it in step with the
//! view's bindings: the view's `is_playing` flag drives play and pause,
//! `volume` and `sound` changes are pushed through on [`AttachedSound::update`],
//! and the player's position and duration are published back through
//! `current_time` and `duration_time`.
//!
//! ```no_run
//! use chime_core::{Binding, SoundBinding};
//!
//! let is_playing = Binding::new(false);
//! let current_time = Binding::new(0.0);
//! let duration_time = Binding::new(0.0);
//!
//! let sound = SoundBinding::new("beep.mp3", is_playing.clone(), current_time, duration_time)
//!     .volume(0.8)
//!     .attach();
//! sound.on_appear();
//! is_playing.set(true);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crate::controller::PlayMode;
use crate::notify::{ItemId, PlaybackTime, Subscription};
use crate::registry::{PlaybackRegistry, PlayerInstance};
use crate::state::{Binding, WatchGuard};

/// What a view wants played, rebuilt on every render.
#[derive(Debug, Clone)]
pub struct SoundBinding {
    sound: String,
    volume: f64,
    play_mode: PlayMode,
    is_playing: Binding<bool>,
    current_time: Binding<f64>,
    duration_time: Binding<f64>,
}

impl SoundBinding {
    /// Describes `sound` at full volume in [`PlayMode::Reset`].
    pub fn new(
        sound: &str,
        is_playing: Binding<bool>,
        current_time: Binding<f64>,
        duration_time: Binding<f64>,
    ) -> Self {
        Self {
            sound: sound.to_string(),
            volume: 1.0,
            play_mode: PlayMode::default(),
            is_playing,
            current_time,
            duration_time,
        }
    }

    pub fn volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    pub fn play_mode(mut self, play_mode: PlayMode) -> Self {
        self.play_mode = play_mode;
        self
    }

    pub fn sound(&self) -> &str {
        &self.sound
    }

    pub fn volume_value(&self) -> f64 {
        self.volume
    }

    pub fn play_mode_value(&self) -> PlayMode {
        self.play_mode
    }

    pub fn is_playing(&self) -> &Binding<bool> {
        &self.is_playing
    }

    pub fn current_time(&self) -> &Binding<f64> {
        &self.current_time
    }

    pub fn duration_time(&self) -> &Binding<f64> {
        &self.duration_time
    }

    /// Attaches to the process-wide registry.
    pub fn attach(self) -> AttachedSound {
        self.attach_to(PlaybackRegistry::global())
    }

    /// Attaches to `registry`. Nothing is loaded until
    /// [`AttachedSound::on_appear`].
    pub fn attach_to(self, registry: &PlaybackRegistry) -> AttachedSound {
        AttachedSound::new(registry.clone(), self)
    }
}

/// Engine subscriptions for one prepared player. Callbacks carry the
/// generation they were created for and are ignored once it is stale.
struct PlayerShim {
    _finished: Subscription,
    _ticks: Subscription,
}

impl PlayerShim {
    fn new(owner: &Arc<AttachedInner>, player: &mut PlayerInstance, generation: u64) -> Self {
        let coordinator = owner.registry.coordinator();

        let weak = Arc::downgrade(owner);
        let dispatcher = Arc::clone(&coordinator);
        let finished = owner
            .registry
            .engine()
            .notifications()
            .observe_finished(player.item(), move |_| {
                let weak = Weak::clone(&weak);
                dispatcher.dispatch(Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_finished(generation);
                    }
                }));
            });

        let weak = Arc::downgrade(owner);
        let interval = owner.registry.config().tick_interval();
        let ticks = player.add_periodic_observer(
            interval,
            Arc::new(move |time: PlaybackTime| {
                let weak = Weak::clone(&weak);
                coordinator.dispatch(Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_tick(generation, time);
                    }
                }));
            }),
        );

        Self {
            _finished: finished,
            _ticks: ticks,
        }
    }
}

struct AttachedState {
    props: SoundBinding,
    last_is_playing: bool,
    appeared: bool,
    generation: u64,
    player: Option<PlayerInstance>,
    shim: Option<PlayerShim>,
    watch: Option<WatchGuard>,
}

struct AttachedInner {
    registry: PlaybackRegistry,
    state: Mutex<AttachedState>,
}

fn seconds(duration: Option<Duration>) -> f64 {
    duration.map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

impl AttachedInner {
    fn lock(&self) -> MutexGuard<'_, AttachedState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn watch_is_playing(self: &Arc<Self>, flag: &Binding<bool>) -> WatchGuard {
        let weak = Arc::downgrade(self);
        let coordinator = self.registry.coordinator();
        flag.watch(move |_| {
            let weak = Weak::clone(&weak);
            coordinator.dispatch(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.sync();
                }
            }));
        })
    }

    /// Replaces the player with a freshly prepared one for the current sound.
    fn prepare_audio(self: &Arc<Self>) {
        let (sound, volume, generation, duration_time, old_player, old_shim) = {
            let mut state = self.lock();
            state.generation += 1;
            (
                state.props.sound.clone(),
                state.props.volume,
                state.generation,
                state.props.duration_time.clone(),
                state.player.take(),
                state.shim.take(),
            )
        };
        drop(old_shim);
        if let Some(old) = old_player {
            tracing::debug!("Releasing {} ({})", old.item(), old.name());
        }

        let mut player = self.registry.prepare(&sound);
        let shim = player
            .as_mut()
            .map(|instance| PlayerShim::new(self, instance, generation));
        let duration = seconds(player.as_ref().and_then(PlayerInstance::duration));
        if let Some(instance) = player.as_mut() {
            instance.set_volume(volume);
            tracing::debug!("Bound {} to {}", sound, instance.item());
        }

        let stale = {
            let mut state = self.lock();
            if state.generation == generation {
                state.player = player;
                state.shim = shim;
                None
            } else {
                Some((player, shim))
            }
        };
        drop(stale);
        duration_time.set(duration);
    }

    fn push_volume(&self) {
        let mut state = self.lock();
        let volume = state.props.volume;
        if let Some(player) = state.player.as_mut() {
            player.set_volume(volume);
        }
    }

    /// Plays or pauses on an edge of the `is_playing` flag.
    fn sync(&self) {
        let mut state = self.lock();
        let now = state.props.is_playing.get();
        if now == state.last_is_playing {
            return;
        }
        state.last_is_playing = now;
        if !state.appeared {
            return;
        }

        let play_mode = state.props.play_mode;
        let Some(player) = state.player.as_mut() else { return };
        if now {
            if play_mode == PlayMode::Reset {
                player.seek(Duration::ZERO);
            }
            player.play();
            tracing::debug!("Playing bound {}", player.item());
        } else {
            player.pause();
            tracing::debug!("Paused bound {}", player.item());
        }
    }

    fn handle_finished(&self, generation: u64) {
        let flag = {
            let state = self.lock();
            if state.generation != generation {
                return;
            }
            state.props.is_playing.clone()
        };
        // The watcher turns this into a pause.
        flag.set(false);
    }

    fn handle_tick(&self, generation: u64, time: PlaybackTime) {
        let (current_time, duration_time) = {
            let state = self.lock();
            if state.generation != generation {
                return;
            }
            (state.props.current_time.clone(), state.props.duration_time.clone())
        };
        current_time.set(time.position.as_secs_f64());
        duration_time.set(seconds(time.duration));
    }
}

/// The persistent side of a [`SoundBinding`].
///
/// Dropping it stops the sound and detaches every observer.
pub struct AttachedSound {
    inner: Arc<AttachedInner>,
}

impl AttachedSound {
    fn new(registry: PlaybackRegistry, props: SoundBinding) -> Self {
        let flag = props.is_playing.clone();
        let inner = Arc::new(AttachedInner {
            registry,
            state: Mutex::new(AttachedState {
                last_is_playing: flag.get(),
                props,
                appeared: false,
                generation: 0,
                player: None,
                shim: None,
                watch: None,
            }),
        });

        let watch = inner.watch_is_playing(&flag);
        inner.lock().watch = Some(watch);
        Self { inner }
    }

    /// Loads the sound the first time the view appears. A flag that is
    /// already set at that point does not start playback.
    pub fn on_appear(&self) {
        let first = {
            let mut state = self.inner.lock();
            if state.appeared {
                false
            } else {
                state.appeared = true;
                state.last_is_playing = state.props.is_playing.get();
                true
            }
        };
        if first {
            self.inner.prepare_audio();
        }
    }

    /// Releases the player. A later `on_appear` prepares the sound again.
    pub fn on_disappear(&self) {
        let released = {
            let mut state = self.inner.lock();
            state.appeared = false;
            state.generation += 1;
            (state.player.take(), state.shim.take())
        };
        if let (Some(player), _) = &released {
            tracing::debug!("View gone, releasing {}", player.item());
        }
    }

    /// Applies a re-rendered description.
    ///
    /// A new sound is prepared from scratch and left idle. A new volume is
    /// pushed to the player. A new play mode only affects later plays.
    pub fn update(&self, props: SoundBinding) {
        let flag = props.is_playing.clone();
        let (appeared, sound_changed, volume_changed, rewatch) = {
            let mut state = self.inner.lock();
            let sound_changed = state.props.sound != props.sound;
            let volume_changed = state.props.volume != props.volume;
            let rewatch = !state.props.is_playing.ptr_eq(&props.is_playing);
            state.props = props;
            (state.appeared, sound_changed, volume_changed, rewatch)
        };

        if rewatch {
            let watch = self.inner.watch_is_playing(&flag);
            let old = self.inner.lock().watch.replace(watch);
            drop(old);
        }

        if appeared {
            if sound_changed {
                self.inner.prepare_audio();
            } else if volume_changed {
                self.inner.push_volume();
            }
        }
        self.inner.sync();
    }

    pub fn sound(&self) -> String {
        self.inner.lock().props.sound.clone()
    }

    pub fn play_mode(&self) -> PlayMode {
        self.inner.lock().props.play_mode
    }

    pub fn has_appeared(&self) -> bool {
        self.inner.lock().appeared
    }

    /// Item of the current player, if one is prepared.
    pub fn item(&self) -> Option<ItemId> {
        self.inner.lock().player.as_ref().map(PlayerInstance::item)
    }
}

impl std::fmt::Debug for AttachedSound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("AttachedSound")
            .field("sound", &state.props.sound)
            .field("appeared", &state.appeared)
            .field("player", &state.player)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChimeConfig;
    use crate::dispatch::{Dispatcher, Immediate, ManualQueue, SerialQueue};
    use crate::engines::{MediaEngine, PlayerSnapshot, VirtualEngine};

    fn registry_with(engine: &VirtualEngine, config: ChimeConfig) -> PlaybackRegistry {
        PlaybackRegistry::with_dispatchers(Arc::new(engine.clone()), config, Arc::new(Immediate), Arc::new(Immediate))
    }

    fn registry(engine: &VirtualEngine) -> PlaybackRegistry {
        registry_with(engine, ChimeConfig::default())
    }

    struct View {
        is_playing: Binding<bool>,
        current_time: Binding<f64>,
        duration_time: Binding<f64>,
    }

    impl View {
        fn new() -> Self {
            Self {
                is_playing: Binding::new(false),
                current_time: Binding::new(0.0),
                duration_time: Binding::new(0.0),
            }
        }

        fn render(&self, sound: &str) -> SoundBinding {
            SoundBinding::new(
                sound,
                self.is_playing.clone(),
                self.current_time.clone(),
                self.duration_time.clone(),
            )
        }
    }

    fn snapshot(engine: &VirtualEngine, attached: &AttachedSound) -> PlayerSnapshot {
        engine.snapshot(attached.item().unwrap()).unwrap()
    }

    #[test]
    fn test_beep_plays_to_completion() {
        let engine = VirtualEngine::new().with_duration("beep.mp3", Duration::from_secs(2));
        let registry = registry(&engine);
        let view = View::new();

        let attached = view.render("beep.mp3").attach_to(&registry);
        attached.on_appear();
        assert_eq!(view.duration_time.get(), 2.0);

        view.is_playing.set(true);
        let snap = snapshot(&engine, &attached);
        assert!(snap.playing);
        assert_eq!(snap.seeks, 1);

        engine.advance(Duration::from_millis(500));
        assert_eq!(view.current_time.get(), 0.5);

        engine.advance(Duration::from_millis(1500));
        assert_eq!(view.current_time.get(), 1.5);
        assert!(!view.is_playing.get());
        let snap = snapshot(&engine, &attached);
        assert!(snap.finished);
        assert_eq!(snap.pauses, 1);

        view.is_playing.set(true);
        let snap = snapshot(&engine, &attached);
        assert!(snap.playing);
        assert_eq!(snap.seeks, 2);
        assert_eq!(snap.position, Duration::ZERO);
    }

    #[test]
    fn test_nothing_loads_before_appear() {
        let engine = VirtualEngine::new();
        let registry = registry(&engine);
        let view = View::new();

        let attached = view.render("beep.mp3").attach_to(&registry);
        view.is_playing.set(true);
        attached.update(view.render("other.mp3").volume(0.2));
        assert_eq!(engine.live_count(), 0);
        assert!(attached.item().is_none());

        attached.on_appear();
        assert_eq!(engine.live_count(), 1);
        let snap = snapshot(&engine, &attached);
        assert_eq!(snap.sound, "other.mp3");
        assert_eq!(snap.volume, 0.2);
        assert!(!snap.playing, "a flag set before appearing does not start playback");
    }

    #[test]
    fn test_appear_is_idempotent() {
        let engine = VirtualEngine::new();
        let registry = registry(&engine);
        let view = View::new();

        let attached = view.render("beep.mp3").attach_to(&registry);
        attached.on_appear();
        let item = attached.item();
        attached.on_appear();
        assert_eq!(attached.item(), item);
        assert_eq!(engine.live_count(), 1);
    }

    #[test]
    fn test_sound_change_while_playing() {
        let engine = VirtualEngine::new()
            .with_duration("a.mp3", Duration::from_secs(2))
            .with_duration("b.mp3", Duration::from_secs(3));
        let registry = registry(&engine);
        let view = View::new();

        let attached = view.render("a.mp3").attach_to(&registry);
        attached.on_appear();
        view.is_playing.set(true);
        engine.advance(Duration::from_millis(500));
        assert_eq!(view.duration_time.get(), 2.0);

        engine.defer_metadata(true);
        attached.update(view.render("b.mp3"));

        assert!(engine.snapshots_for("a.mp3").is_empty(), "old player is released");
        let snap = snapshot(&engine, &attached);
        assert_eq!(snap.sound, "b.mp3");
        assert!(!snap.playing, "new sound waits for the next play edge");
        assert!(view.is_playing.get());
        assert_eq!(view.duration_time.get(), 0.0);

        assert_eq!(engine.resolve_metadata(), 1);
        view.is_playing.set(false);
        view.is_playing.set(true);
        engine.advance(Duration::from_millis(500));
        assert_eq!(view.duration_time.get(), 3.0);
        assert_eq!(view.current_time.get(), 0.5);
    }

    #[test]
    fn test_volume_change_is_pushed() {
        let engine = VirtualEngine::new();
        let registry = registry(&engine);
        let view = View::new();

        let attached = view.render("beep.mp3").volume(0.5).attach_to(&registry);
        attached.on_appear();
        let item = attached.item();
        assert_eq!(snapshot(&engine, &attached).volume, 0.5);

        attached.update(view.render("beep.mp3").volume(0.25));
        assert_eq!(attached.item(), item, "volume changes keep the player");
        assert_eq!(snapshot(&engine, &attached).volume, 0.25);
    }

    #[test]
    fn test_play_mode_change_alone_does_nothing() {
        let engine = VirtualEngine::new().with_duration("song.mp3", Duration::from_secs(10));
        let registry = registry(&engine);
        let view = View::new();

        let attached = view.render("song.mp3").attach_to(&registry);
        attached.on_appear();
        view.is_playing.set(true);

        attached.update(view.render("song.mp3").play_mode(PlayMode::Continue));
        assert_eq!(attached.play_mode(), PlayMode::Continue);
        let snap = snapshot(&engine, &attached);
        assert_eq!((snap.seeks, snap.plays, snap.pauses), (1, 1, 0));

        engine.advance(Duration::from_secs(1));
        view.is_playing.set(false);
        view.is_playing.set(true);
        let snap = snapshot(&engine, &attached);
        assert_eq!((snap.seeks, snap.plays), (1, 2));
        assert_eq!(snap.position, Duration::from_secs(1));
    }

    #[test]
    fn test_tick_interval_follows_config() {
        let engine = VirtualEngine::new().with_duration("song.mp3", Duration::from_secs(10));
        let config = ChimeConfig {
            tick_interval_ms: 250,
            ..ChimeConfig::default()
        };
        let registry = registry_with(&engine, config);
        let view = View::new();

        let attached = view.render("song.mp3").attach_to(&registry);
        attached.on_appear();
        view.is_playing.set(true);

        engine.advance(Duration::from_millis(240));
        assert_eq!(view.current_time.get(), 0.0);
        engine.advance(Duration::from_millis(10));
        assert_eq!(view.current_time.get(), 0.25);
        assert_eq!(view.duration_time.get(), 10.0);
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let engine = VirtualEngine::new();
        let coordinator = Arc::new(ManualQueue::default());
        let registry = PlaybackRegistry::with_dispatchers(
            Arc::new(engine.clone()),
            ChimeConfig::default(),
            Arc::clone(&coordinator) as Arc<dyn Dispatcher>,
            Arc::new(Immediate),
        );
        let view = View::new();

        let attached = view.render("a.mp3").attach_to(&registry);
        attached.on_appear();
        view.is_playing.set(true);
        coordinator.run_all();
        let old = attached.item().unwrap();
        assert!(engine.snapshot(old).unwrap().playing);

        engine.finish(old);
        attached.update(view.render("b.mp3"));
        coordinator.run_all();

        assert!(view.is_playing.get(), "completion of the replaced player is dropped");
        assert_ne!(attached.item(), Some(old));
    }

    #[test]
    fn test_new_flag_binding_is_watched() {
        let engine = VirtualEngine::new();
        let registry = registry(&engine);
        let view = View::new();

        let attached = view.render("beep.mp3").attach_to(&registry);
        attached.on_appear();

        let replacement = View::new();
        attached.update(replacement.render("beep.mp3"));

        view.is_playing.set(true);
        assert!(!snapshot(&engine, &attached).playing);
        replacement.is_playing.set(true);
        assert!(snapshot(&engine, &attached).playing);
    }

    #[test]
    fn test_disappear_releases_player() {
        let engine = VirtualEngine::new();
        let registry = registry(&engine);
        let view = View::new();

        let attached = view.render("beep.mp3").attach_to(&registry);
        attached.on_appear();
        view.is_playing.set(true);
        let first = attached.item().unwrap();

        attached.on_disappear();
        assert!(!attached.has_appeared());
        assert_eq!(engine.live_count(), 0);
        assert_eq!(engine.notifications().observer_count(first), 0);

        attached.on_appear();
        assert_eq!(engine.live_count(), 1);
        assert_ne!(attached.item(), Some(first));
    }

    #[test]
    fn test_unpreparable_sound_still_tracks_flag() {
        let engine = VirtualEngine::new().with_unloadable("broken.mp3");
        let registry = registry(&engine);
        let view = View::new();

        let attached = view.render("broken.mp3").attach_to(&registry);
        attached.on_appear();
        assert!(attached.item().is_none());
        view.is_playing.set(true);
        view.is_playing.set(false);
        assert_eq!(view.duration_time.get(), 0.0);
        assert_eq!(engine.live_count(), 0);
    }

    #[test]
    fn test_serial_coordinator() {
        let engine = VirtualEngine::new().with_duration("beep.mp3", Duration::from_millis(100));
        let coordinator = Arc::new(SerialQueue::new("test-binding-coordinator"));
        let registry = PlaybackRegistry::with_dispatchers(
            Arc::new(engine.clone()),
            ChimeConfig::default(),
            Arc::clone(&coordinator) as Arc<dyn Dispatcher>,
            Arc::new(Immediate),
        );
        let view = View::new();

        let attached = view.render("beep.mp3").attach_to(&registry);
        attached.on_appear();
        view.is_playing.set(true);
        coordinator.flush();
        assert!(snapshot(&engine, &attached).playing);

        engine.advance(Duration::from_millis(100));
        coordinator.flush();
        // The watcher's sync was queued behind the completion.
        coordinator.flush();
        assert!(!view.is_playing.get());
        assert_eq!(snapshot(&engine, &attached).pauses, 1);
    }

    #[test]
    fn test_drop_stops_sound() {
        let engine = VirtualEngine::new();
        let registry = registry(&engine);
        let view = View::new();

        let attached = view.render("beep.mp3").attach_to(&registry);
        attached.on_appear();
        view.is_playing.set(true);
        let item = attached.item().unwrap();

        drop(attached);
        assert!(engine.snapshot(item).is_none());
        assert_eq!(engine.notifications().observer_count(item), 0);
        view.is_playing.set(false);
    }
}
