//! Process-wide playback registry.
//!
//! The registry is the one place that turns a sound reference into a player
//! ([`PlaybackRegistry::prepare`]) and the owner of every fire-and-forget
//! player still in flight (the *active set*). Active players are removed only
//! when their completion notification is handled; stopping them by name just
//! pauses them, so a paused sound stays managed and can be stopped again.
//!
//! Membership of the active set changes only on the coordination dispatcher.
//! Fire-and-forget preparation runs on the background dispatcher and hands
//! the started player back to the coordinator for insertion.

use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use crate::config::ChimeConfig;
use crate::dispatch::{Dispatcher, SerialQueue};
use crate::engines::{normalize_volume, KiraEngine, MediaEngine, MediaPlayer, PREPARE_METADATA_KEYS};
use crate::error::{Error, Result};
use crate::notify::{ItemId, Subscription, TickCallback};
use crate::resolve::{last_path_component, SoundResolver, SoundUrl};

/// One prepared, independently playable instance of a sound.
///
/// Dropping it stops playback and detaches the registry's completion
/// observer for its item.
pub struct PlayerInstance {
    player: Box<dyn MediaPlayer>,
    _registry_observer: Subscription,
}

impl PlayerInstance {
    pub fn item(&self) -> ItemId {
        self.player.item()
    }

    pub fn url(&self) -> &SoundUrl {
        self.player.url()
    }

    /// The sound's name: the final path component of its URL.
    pub fn name(&self) -> String {
        self.player.url().last_path_component()
    }

    pub fn play(&mut self) {
        self.player.play();
    }

    pub fn pause(&mut self) {
        self.player.pause();
    }

    pub fn seek(&mut self, position: Duration) {
        self.player.seek(position);
    }

    /// Sets the volume from a normalized value, clamped to 0.0 - 1.0.
    pub fn set_volume(&mut self, volume: f64) {
        self.player.set_volume(normalize_volume(volume));
    }

    pub fn current_time(&self) -> Duration {
        self.player.current_time()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.player.duration()
    }

    pub fn is_playing(&self) -> bool {
        self.player.is_playing()
    }

    pub fn has_finished(&self) -> bool {
        self.player.has_finished()
    }

    pub fn add_periodic_observer(&mut self, interval: Duration, callback: TickCallback) -> Subscription {
        self.player.add_periodic_observer(interval, callback)
    }
}

impl std::fmt::Debug for PlayerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerInstance")
            .field("item", &self.item())
            .field("url", &self.url().to_string())
            .finish()
    }
}

struct RegistryInner {
    engine: Arc<dyn MediaEngine>,
    resolver: SoundResolver,
    config: ChimeConfig,
    coordinator: Arc<dyn Dispatcher>,
    background: Arc<dyn Dispatcher>,
    active: Mutex<Vec<PlayerInstance>>,
}

impl RegistryInner {
    fn try_prepare(self: &Arc<Self>, sound: &str) -> Result<PlayerInstance> {
        let url = self.resolver.resolve(sound)?;
        let asset = self.engine.load(&url)?;

        let described = url.clone();
        asset.load_metadata(
            PREPARE_METADATA_KEYS,
            Box::new(move |result| match result {
                Ok(meta) => tracing::debug!(
                    "Metadata for {}: playable={} protected={} duration={:?}",
                    described,
                    meta.playable,
                    meta.protected,
                    meta.duration
                ),
                Err(e) => tracing::warn!("Metadata for {} failed to load: {}", described, e),
            }),
        );

        let player = self.engine.player(asset)?;
        let item = player.item();

        let weak = Arc::downgrade(self);
        let observer = self.engine.notifications().observe_finished(item, move |item| {
            let Some(inner) = weak.upgrade() else { return };
            let weak = Arc::downgrade(&inner);
            inner.coordinator.dispatch(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.prune(item);
                }
            }));
        });

        tracing::debug!("Prepared {} as {}", url, item);
        Ok(PlayerInstance {
            player,
            _registry_observer: observer,
        })
    }

    fn prepare(self: &Arc<Self>, sound: &str) -> Option<PlayerInstance> {
        match self.try_prepare(sound) {
            Ok(instance) => Some(instance),
            Err(e) => {
                tracing::warn!("Cannot prepare sound {:?}: {}", sound, e);
                None
            }
        }
    }

    /// Runs on the coordinator.
    fn insert(&self, instance: PlayerInstance) {
        if instance.has_finished() {
            tracing::debug!("{} finished before it was registered", instance.item());
            return;
        }
        if let Ok(mut active) = self.active.lock() {
            tracing::debug!("Managing {} ({})", instance.item(), instance.name());
            active.push(instance);
        }
    }

    /// Runs on the coordinator.
    fn prune(&self, item: ItemId) {
        let removed: Vec<PlayerInstance> = match self.active.lock() {
            Ok(mut active) => {
                let (done, keep): (Vec<_>, Vec<_>) = active.drain(..).partition(|p| p.item() == item);
                *active = keep;
                done
            }
            Err(_) => return,
        };
        if !removed.is_empty() {
            tracing::debug!("Released {} managed instance(s) for {}", removed.len(), item);
        }
    }
}

/// Loads sounds into players and manages fire-and-forget playback.
///
/// Clones share the same registry.
#[derive(Clone)]
pub struct PlaybackRegistry {
    inner: Arc<RegistryInner>,
}

static GLOBAL: OnceLock<PlaybackRegistry> = OnceLock::new();

impl PlaybackRegistry {
    /// Creates a registry with its own coordination and background threads.
    pub fn new(engine: Arc<dyn MediaEngine>, config: ChimeConfig) -> Self {
        let coordinator = Arc::new(SerialQueue::new(&config.coordinator_thread));
        let background = Arc::new(SerialQueue::new(&config.background_thread));
        Self::with_dispatchers(engine, config, coordinator, background)
    }

    /// Creates a registry on caller-supplied dispatchers.
    pub fn with_dispatchers(
        engine: Arc<dyn MediaEngine>,
        config: ChimeConfig,
        coordinator: Arc<dyn Dispatcher>,
        background: Arc<dyn Dispatcher>,
    ) -> Self {
        tracing::info!("Creating playback registry on the {} engine", engine.name());
        Self {
            inner: Arc::new(RegistryInner {
                resolver: SoundResolver::new(config.sound_dirs.clone()),
                engine,
                config,
                coordinator,
                background,
                active: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The process-wide registry, created on first use with the kira engine
    /// and the configuration named by `CHIME_CONFIG` (or defaults).
    pub fn global() -> &'static PlaybackRegistry {
        GLOBAL.get_or_init(|| PlaybackRegistry::new(Arc::new(KiraEngine::new()), ChimeConfig::from_env()))
    }

    /// Installs `registry` as the process-wide registry. Fails if one was
    /// already installed or created by [`PlaybackRegistry::global`].
    pub fn install_global(registry: PlaybackRegistry) -> Result<()> {
        GLOBAL.set(registry).map_err(|_| Error::RegistryAlreadyInitialized)
    }

    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.inner.engine
    }

    pub fn config(&self) -> &ChimeConfig {
        &self.inner.config
    }

    /// The dispatcher that owns observable state.
    pub fn coordinator(&self) -> Arc<dyn Dispatcher> {
        Arc::clone(&self.inner.coordinator)
    }

    /// Resolves `sound`, starts loading its metadata, and builds a player.
    /// Returns `None` if the reference cannot be resolved or loaded.
    pub fn prepare(&self, sound: &str) -> Option<PlayerInstance> {
        self.inner.prepare(sound)
    }

    /// Plays `sound` once at the configured default volume.
    pub fn play(&self, sound: &str) {
        self.play_with_volume(sound, self.inner.config.default_volume);
    }

    /// Plays `sound` once at `volume`, without blocking. Failures are
    /// logged and otherwise ignored.
    pub fn play_with_volume(&self, sound: &str, volume: f64) {
        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let sound = sound.to_string();
        let volume = normalize_volume(volume);

        self.inner.background.dispatch(Box::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            let Some(mut instance) = inner.prepare(&sound) else { return };

            instance.set_volume(f64::from(volume));
            instance.play();
            tracing::info!("Playing {} as {} at volume {:.2}", sound, instance.item(), volume);

            let weak = Arc::downgrade(&inner);
            inner.coordinator.dispatch(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.insert(instance);
                }
            }));
        }));
    }

    /// Pauses every managed instance whose name matches `sound`'s final path
    /// component. Instances stay managed until they complete. Returns how many
    /// were paused.
    pub fn stop(&self, sound: &str) -> usize {
        let name = last_path_component(sound);
        let mut count = 0;
        if let Ok(mut active) = self.inner.active.lock() {
            for instance in active.iter_mut().filter(|i| i.name() == name) {
                instance.pause();
                count += 1;
            }
        }
        tracing::info!("Stopped {} managed instance(s) of {}", count, name);
        count
    }

    /// Pauses every managed instance. Returns how many were paused.
    pub fn stop_all_managed_sounds(&self) -> usize {
        let mut count = 0;
        if let Ok(mut active) = self.inner.active.lock() {
            for instance in active.iter_mut() {
                instance.pause();
                count += 1;
            }
        }
        tracing::info!("Stopped all {} managed instance(s)", count);
        count
    }

    /// Number of managed instances.
    pub fn active_count(&self) -> usize {
        self.inner.active.lock().map(|a| a.len()).unwrap_or(0)
    }

    /// Names of the managed instances, oldest first.
    pub fn active_sounds(&self) -> Vec<String> {
        self.inner
            .active
            .lock()
            .map(|a| a.iter().map(PlayerInstance::name).collect())
            .unwrap_or_default()
    }

    /// Items of the managed instances, oldest first.
    pub fn active_items(&self) -> Vec<ItemId> {
        self.inner
            .active
            .lock()
            .map(|a| a.iter().map(PlayerInstance::item).collect())
            .unwrap_or_default()
    }

    pub fn is_active(&self, item: ItemId) -> bool {
        self.active_items().contains(&item)
    }
}

/// Plays `sound` once through the process-wide registry.
pub fn play_fire_and_forget(sound: &str) {
    PlaybackRegistry::global().play(sound);
}

/// Plays `sound` once at `volume` through the process-wide registry.
pub fn play_fire_and_forget_with_volume(sound: &str, volume: f64) {
    PlaybackRegistry::global().play_with_volume(sound, volume);
}

/// Pauses the process-wide registry's instances of `sound`.
pub fn stop_fire_and_forget(sound: &str) -> usize {
    PlaybackRegistry::global().stop(sound)
}

/// Pauses every instance managed by the process-wide registry.
pub fn stop_all_fire_and_forget() -> usize {
    PlaybackRegistry::global().stop_all_managed_sounds()
}

/// Installs a process-wide registry on a [`crate::engines::VirtualEngine`]
/// with inline dispatchers, once per test process, and returns its engine.
#[cfg(test)]
pub(crate) fn install_virtual_global() -> crate::engines::VirtualEngine {
    use crate::dispatch::Immediate;
    use crate::engines::VirtualEngine;

    static ENGINE: OnceLock<VirtualEngine> = OnceLock::new();
    ENGINE
        .get_or_init(|| {
            let engine = VirtualEngine::new();
            let registry = PlaybackRegistry::with_dispatchers(
                Arc::new(engine.clone()),
                ChimeConfig::default(),
                Arc::new(Immediate),
                Arc::new(Immediate),
            );
            PlaybackRegistry::install_global(registry).unwrap();
            engine
        })
        .clone()
}
