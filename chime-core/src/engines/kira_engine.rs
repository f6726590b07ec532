//! Engine backed by kira.
//!
//! All players share the process-wide kira `AudioManager`. Assets are decoded
//! on a background thread, and a monitor thread polls live players to post
//! completion and drive periodic observers, since kira itself has no
//! completion callback.

use std::any::Any;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use kira::sound::static_sound::{StaticSoundData, StaticSoundHandle};
use kira::sound::PlaybackState;
use kira::Tween;

use crate::engines::audio_output::{amplitude_to_db, is_audio_available, with_audio_manager};
use crate::engines::{AssetMetadata, MediaAsset, MediaEngine, MediaPlayer, MetadataCallback, MetadataKey};
use crate::error::{Error, Result};
use crate::notify::{ItemId, NotificationCenter, PeriodicObservers, PlaybackTime, Subscription, TickCallback};
use crate::resolve::SoundUrl;

/// How often the monitor thread polls player state.
const MONITOR_INTERVAL: Duration = Duration::from_millis(50);

struct KiraInner {
    notifications: NotificationCenter,
    started: Instant,
    items: Mutex<Vec<Weak<KiraItem>>>,
}

impl KiraInner {
    fn now(&self) -> Duration {
        self.started.elapsed()
    }

    fn live_items(&self) -> Vec<Arc<KiraItem>> {
        match self.items.lock() {
            Ok(mut items) => {
                items.retain(|w| w.strong_count() > 0);
                items.iter().filter_map(Weak::upgrade).collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// One monitor pass: fire due ticks and post completion for players
    /// whose sound ran out.
    fn poll(&self) {
        let now = self.now();
        let mut ticks = Vec::new();
        let mut finished = Vec::new();

        for item in self.live_items() {
            let Ok(mut state) = item.state.lock() else { continue };
            let Some((playback, position)) = state.handle.as_ref().map(|h| (h.state(), h.position())) else {
                continue;
            };
            match playback {
                PlaybackState::Stopped if state.wants_play && !state.finished => {
                    state.wants_play = false;
                    state.finished = true;
                    finished.push(item.id);
                }
                PlaybackState::Playing => {
                    let position = Duration::from_secs_f64(position.max(0.0));
                    let duration = item.asset.duration();
                    ticks.push((Arc::clone(&item), PlaybackTime { position, duration }));
                }
                _ => {}
            }
        }

        for (item, time) in ticks {
            item.ticks.fire_due(now, time);
        }
        for id in finished {
            tracing::debug!("kira {} finished playing", id);
            self.notifications.post_finished(id);
        }
    }
}

fn monitor_loop(engine: Weak<KiraInner>) {
    loop {
        std::thread::sleep(MONITOR_INTERVAL);
        match engine.upgrade() {
            Some(inner) => inner.poll(),
            None => {
                tracing::debug!("kira monitor exiting: engine dropped");
                return;
            }
        }
    }
}

/// Engine that plays local audio files through kira.
#[derive(Clone)]
pub struct KiraEngine {
    inner: Arc<KiraInner>,
}

impl KiraEngine {
    /// Creates the engine and starts its monitor thread. The audio device is
    /// opened lazily, on first playback.
    pub fn new() -> Self {
        let inner = Arc::new(KiraInner {
            notifications: NotificationCenter::new(),
            started: Instant::now(),
            items: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&inner);
        if let Err(e) = std::thread::Builder::new()
            .name("chime-kira-monitor".into())
            .spawn(move || monitor_loop(weak))
        {
            tracing::error!("Failed to spawn kira monitor thread: {}", e);
        }

        Self { inner }
    }

    /// Returns whether an audio output device is available.
    pub fn is_available(&self) -> bool {
        is_audio_available()
    }

    fn find_asset(&self, asset: Arc<dyn MediaAsset>) -> Result<Arc<KiraAsset>> {
        let url = asset.url().to_string();
        asset
            .into_any()
            .downcast::<KiraAsset>()
            .map_err(|_| Error::AssetLoad(url, "asset belongs to another engine".to_string()))
    }
}

impl Default for KiraEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaEngine for KiraEngine {
    fn load(&self, url: &SoundUrl) -> Result<Arc<dyn MediaAsset>> {
        let path = url
            .to_file_path()
            .ok_or_else(|| Error::UnsupportedScheme(url.to_string()))?;
        if !path.exists() {
            return Err(Error::SoundFileNotFound(path.display().to_string()));
        }

        let asset = Arc::new(KiraAsset {
            url: url.clone(),
            state: Mutex::new(AssetState {
                load: LoadState::Loading,
                waiters: Vec::new(),
            }),
        });

        let loader = Arc::clone(&asset);
        std::thread::Builder::new()
            .name("chime-asset-load".into())
            .spawn(move || loader.decode(path))?;

        Ok(asset)
    }

    fn player(&self, asset: Arc<dyn MediaAsset>) -> Result<Box<dyn MediaPlayer>> {
        let asset = self.find_asset(asset)?;
        let item = Arc::new(KiraItem {
            id: ItemId::next(),
            url: asset.url.clone(),
            asset: Arc::clone(&asset),
            notifications: self.inner.notifications.clone(),
            state: Mutex::new(ItemState {
                handle: None,
                volume: 1.0,
                wants_play: false,
                pending_seek: None,
                finished: false,
            }),
            ticks: PeriodicObservers::new(),
        });
        if let Ok(mut items) = self.inner.items.lock() {
            items.push(Arc::downgrade(&item));
        }

        // Playback requested before decoding finishes starts once it does.
        let weak = Arc::downgrade(&item);
        asset.load_metadata(
            &[MetadataKey::Playable],
            Box::new(move |result| {
                if let Some(item) = weak.upgrade() {
                    item.on_asset_loaded(result);
                }
            }),
        );

        Ok(Box::new(KiraPlayer {
            item,
            engine: Arc::downgrade(&self.inner),
        }))
    }

    fn notifications(&self) -> &NotificationCenter {
        &self.inner.notifications
    }

    fn name(&self) -> &str {
        "kira"
    }
}

enum LoadState {
    Loading,
    Ready(StaticSoundData),
    Failed(String),
}

struct AssetState {
    load: LoadState,
    waiters: Vec<MetadataCallback>,
}

struct KiraAsset {
    url: SoundUrl,
    state: Mutex<AssetState>,
}

impl KiraAsset {
    fn decode(&self, path: PathBuf) {
        let load = match StaticSoundData::from_file(&path) {
            Ok(data) => {
                tracing::debug!("Decoded {} ({:.2}s)", path.display(), data.duration().as_secs_f64());
                LoadState::Ready(data)
            }
            Err(e) => {
                tracing::warn!("Failed to decode {}: {}", path.display(), e);
                LoadState::Failed(e.to_string())
            }
        };

        let waiters = match self.state.lock() {
            Ok(mut state) => {
                state.load = load;
                std::mem::take(&mut state.waiters)
            }
            Err(_) => return,
        };
        for waiter in waiters {
            waiter(self.metadata());
        }
    }

    fn metadata(&self) -> Result<AssetMetadata> {
        let state = self
            .state
            .lock()
            .map_err(|_| Error::AssetLoad(self.url.to_string(), "asset state poisoned".to_string()))?;
        match &state.load {
            LoadState::Ready(data) => Ok(AssetMetadata {
                playable: true,
                protected: false,
                duration: Some(data.duration()),
            }),
            LoadState::Failed(e) => Err(Error::AssetLoad(self.url.to_string(), e.clone())),
            LoadState::Loading => Ok(AssetMetadata::default()),
        }
    }

    /// `Ok(None)` while the asset is still decoding.
    fn data(&self) -> Result<Option<StaticSoundData>> {
        let state = self
            .state
            .lock()
            .map_err(|_| Error::AssetLoad(self.url.to_string(), "asset state poisoned".to_string()))?;
        match &state.load {
            LoadState::Ready(data) => Ok(Some(data.clone())),
            LoadState::Loading => Ok(None),
            LoadState::Failed(e) => Err(Error::AssetLoad(self.url.to_string(), e.clone())),
        }
    }

    fn duration(&self) -> Option<Duration> {
        match self.state.lock().ok()?.load {
            LoadState::Ready(ref data) => Some(data.duration()),
            _ => None,
        }
    }
}

impl MediaAsset for KiraAsset {
    fn url(&self) -> &SoundUrl {
        &self.url
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn load_metadata(&self, _keys: &[MetadataKey], done: MetadataCallback) {
        if let Ok(mut state) = self.state.lock() {
            if matches!(state.load, LoadState::Loading) {
                state.waiters.push(done);
                return;
            }
        }
        done(self.metadata());
    }
}

struct ItemState {
    handle: Option<StaticSoundHandle>,
    volume: f32,
    wants_play: bool,
    pending_seek: Option<Duration>,
    finished: bool,
}

impl ItemState {
    fn live_handle(&mut self) -> Option<&mut StaticSoundHandle> {
        self.handle
            .as_mut()
            .filter(|h| !matches!(h.state(), PlaybackState::Stopped))
    }
}

struct KiraItem {
    id: ItemId,
    url: SoundUrl,
    asset: Arc<KiraAsset>,
    notifications: NotificationCenter,
    state: Mutex<ItemState>,
    ticks: PeriodicObservers,
}

impl KiraItem {
    /// Starts or resumes playback. While the asset is still decoding this
    /// only records the request; `on_asset_loaded` starts it later.
    fn start(&self, state: &mut ItemState) -> Result<()> {
        let seek = state.pending_seek.take();
        if let Some(handle) = state.live_handle() {
            if let Some(position) = seek {
                handle.seek_to(position.as_secs_f64());
            }
            handle.resume(Tween::default());
            return Ok(());
        }

        let Some(data) = self.asset.data()? else {
            state.pending_seek = seek;
            return Ok(());
        };
        let data = data.volume(amplitude_to_db(state.volume));
        let mut handle = with_audio_manager(|mgr| mgr.play(data))
            .ok_or(Error::NoAudioDevice)?
            .map_err(|e| Error::SoundPlayback(format!("{}: {}", self.url, e)))?;

        if let Some(position) = seek.filter(|p| !p.is_zero()) {
            handle.seek_to(position.as_secs_f64());
        }
        state.handle = Some(handle);
        tracing::debug!("kira {} started {}", self.id, self.url);
        Ok(())
    }

    /// Gives up on playback. Returns whether a requested play was dropped,
    /// in which case the caller posts completion once the lock is released.
    fn abandon(&self, state: &mut ItemState, error: &Error) -> bool {
        tracing::warn!("{} cannot play: {}", self.url, error);
        let was_requested = state.wants_play;
        state.wants_play = false;
        state.finished = was_requested;
        was_requested
    }

    fn on_asset_loaded(&self, result: Result<AssetMetadata>) {
        let failed = match self.state.lock() {
            Ok(mut state) => match result {
                Ok(_) if state.wants_play && state.handle.is_none() => match self.start(&mut state) {
                    Ok(()) => false,
                    Err(e) => self.abandon(&mut state, &e),
                },
                Ok(_) => false,
                Err(e) => self.abandon(&mut state, &e),
            },
            Err(_) => false,
        };

        // A requested playback that can never start still completes.
        if failed {
            self.notifications.post_finished(self.id);
        }
    }
}

/// Player handed out by [`KiraEngine`].
struct KiraPlayer {
    item: Arc<KiraItem>,
    engine: Weak<KiraInner>,
}

impl KiraPlayer {
    fn now(&self) -> Duration {
        self.engine.upgrade().map(|e| e.now()).unwrap_or_default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ItemState) -> R) -> Option<R> {
        self.item.state.lock().ok().map(|mut state| f(&mut state))
    }
}

impl MediaPlayer for KiraPlayer {
    fn item(&self) -> ItemId {
        self.item.id
    }

    fn url(&self) -> &SoundUrl {
        &self.item.url
    }

    fn play(&mut self) {
        let now = self.now();
        let item = Arc::clone(&self.item);
        let failed = self
            .with_state(|state| {
                state.wants_play = true;
                state.finished = false;
                match item.start(state) {
                    Ok(()) => false,
                    Err(e) => item.abandon(state, &e),
                }
            })
            .unwrap_or(false);
        self.item.ticks.rebase(now);

        if failed {
            self.item.notifications.post_finished(self.item.id);
        }
    }

    fn pause(&mut self) {
        self.with_state(|state| {
            state.wants_play = false;
            if let Some(handle) = state.live_handle() {
                handle.pause(Tween::default());
            }
        });
    }

    fn seek(&mut self, position: Duration) {
        self.with_state(|state| match state.live_handle() {
            Some(handle) => handle.seek_to(position.as_secs_f64()),
            None => state.pending_seek = Some(position),
        });
    }

    fn volume(&self) -> f32 {
        self.with_state(|state| state.volume).unwrap_or(0.0)
    }

    fn set_volume(&mut self, volume: f32) {
        self.with_state(|state| {
            state.volume = volume.clamp(0.0, 1.0);
            let db = amplitude_to_db(state.volume);
            if let Some(handle) = state.live_handle() {
                handle.set_volume(db, Tween::default());
            }
        });
    }

    fn current_time(&self) -> Duration {
        self.with_state(|state| match state.handle.as_ref() {
            Some(handle) => Duration::from_secs_f64(handle.position().max(0.0)),
            None => state.pending_seek.unwrap_or_default(),
        })
        .unwrap_or_default()
    }

    fn duration(&self) -> Option<Duration> {
        self.item.asset.duration()
    }

    fn is_playing(&self) -> bool {
        self.with_state(|state| match state.handle.as_ref() {
            Some(handle) => matches!(
                handle.state(),
                PlaybackState::Playing | PlaybackState::Resuming | PlaybackState::WaitingToResume
            ),
            None => state.wants_play,
        })
        .unwrap_or(false)
    }

    fn has_finished(&self) -> bool {
        self.with_state(|state| state.finished).unwrap_or(false)
    }

    fn add_periodic_observer(&mut self, interval: Duration, callback: TickCallback) -> Subscription {
        self.item.ticks.add(self.now(), interval, callback)
    }
}

impl Drop for KiraPlayer {
    fn drop(&mut self) {
        self.with_state(|state| {
            state.wants_play = false;
            if let Some(handle) = state.handle.as_mut() {
                handle.stop(Tween::default());
            }
        });
    }
}
