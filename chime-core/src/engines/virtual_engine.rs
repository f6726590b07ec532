//! Deterministic engine driven by a virtual clock.
//!
//! Nothing is audible: players only track position, volume and state, and
//! time moves when [`VirtualEngine::advance`] is called. Completion and
//! periodic ticks are delivered from inside `advance` on the caller's thread.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::engines::{AssetMetadata, MediaAsset, MediaEngine, MediaPlayer, MetadataCallback, MetadataKey};
use crate::error::{Error, Result};
use crate::notify::{ItemId, NotificationCenter, PeriodicObservers, PlaybackTime, Subscription, TickCallback};
use crate::resolve::SoundUrl;

/// Granularity of the virtual clock.
const STEP: Duration = Duration::from_millis(10);

/// Duration given to sounds without an explicit one.
const DEFAULT_DURATION: Duration = Duration::from_secs(1);

/// Observable state of one virtual player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub item: ItemId,
    /// Final path component of the player's URL.
    pub sound: String,
    pub playing: bool,
    pub finished: bool,
    pub position: Duration,
    pub volume: f32,
    /// Number of `seek` calls.
    pub seeks: usize,
    /// Number of `play` calls.
    pub plays: usize,
    /// Number of `pause` calls.
    pub pauses: usize,
}

#[derive(Default)]
struct Settings {
    durations: HashMap<String, Duration>,
    unloadable: HashSet<String>,
    defer_metadata: bool,
}

struct VirtualInner {
    notifications: NotificationCenter,
    clock: Mutex<Duration>,
    settings: Mutex<Settings>,
    pending_assets: Mutex<Vec<Arc<VirtualAsset>>>,
    items: Mutex<Vec<Weak<VirtualItem>>>,
}

impl VirtualInner {
    fn now(&self) -> Duration {
        self.clock.lock().map(|c| *c).unwrap_or_default()
    }
}

/// Audio-free engine for tests and headless hosts.
#[derive(Clone)]
pub struct VirtualEngine {
    inner: Arc<VirtualInner>,
}

impl VirtualEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(VirtualInner {
                notifications: NotificationCenter::new(),
                clock: Mutex::new(Duration::ZERO),
                settings: Mutex::new(Settings::default()),
                pending_assets: Mutex::new(Vec::new()),
                items: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Sets the duration of sounds whose final path component is `name`.
    pub fn with_duration(self, name: &str, duration: Duration) -> Self {
        if let Ok(mut settings) = self.inner.settings.lock() {
            settings.durations.insert(name.to_string(), duration);
        }
        self
    }

    /// Makes `load` fail for sounds named `name`.
    pub fn with_unloadable(self, name: &str) -> Self {
        if let Ok(mut settings) = self.inner.settings.lock() {
            settings.unloadable.insert(name.to_string());
        }
        self
    }

    /// Keeps asset metadata unloaded until [`VirtualEngine::resolve_metadata`].
    pub fn defer_metadata(&self, defer: bool) {
        if let Ok(mut settings) = self.inner.settings.lock() {
            settings.defer_metadata = defer;
        }
    }

    /// Finishes loading every deferred asset. Returns how many were loaded.
    pub fn resolve_metadata(&self) -> usize {
        let assets: Vec<Arc<VirtualAsset>> = match self.inner.pending_assets.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for asset in &assets {
            asset.finish_loading();
        }
        assets.len()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.inner.now()
    }

    /// Moves the clock forward, advancing playing players and delivering
    /// ticks and completions as they come due.
    pub fn advance(&self, by: Duration) {
        let mut remaining = by;
        while !remaining.is_zero() {
            let step = remaining.min(STEP);
            remaining -= step;
            self.step(step);
        }
    }

    fn step(&self, step: Duration) {
        let now = match self.inner.clock.lock() {
            Ok(mut clock) => {
                *clock += step;
                *clock
            }
            Err(_) => return,
        };

        let mut ticks = Vec::new();
        let mut finished = Vec::new();
        for item in self.live_items() {
            let Ok(mut state) = item.state.lock() else { continue };
            if !state.playing {
                continue;
            }
            state.position += step;
            match item.asset.duration() {
                Some(duration) if state.position >= duration => {
                    state.position = duration;
                    state.playing = false;
                    state.finished = true;
                    finished.push(item.id);
                }
                duration => ticks.push((
                    Arc::clone(&item),
                    PlaybackTime {
                        position: state.position,
                        duration,
                    },
                )),
            }
        }

        for (item, time) in ticks {
            item.ticks.fire_due(now, time);
        }
        for id in finished {
            tracing::debug!("Virtual {} reached its end", id);
            self.inner.notifications.post_finished(id);
        }
    }

    /// Forces `item` to complete now. Returns false if it is not live.
    pub fn finish(&self, item: ItemId) -> bool {
        let Some(target) = self.live_items().into_iter().find(|i| i.id == item) else {
            return false;
        };
        if let Ok(mut state) = target.state.lock() {
            if let Some(duration) = target.asset.duration() {
                state.position = duration;
            }
            state.playing = false;
            state.finished = true;
        }
        self.inner.notifications.post_finished(item);
        true
    }

    /// Snapshot of a live player.
    pub fn snapshot(&self, item: ItemId) -> Option<PlayerSnapshot> {
        self.live_items()
            .into_iter()
            .find(|i| i.id == item)
            .and_then(|i| i.snapshot())
    }

    /// Snapshots of all live players, oldest first.
    pub fn snapshots(&self) -> Vec<PlayerSnapshot> {
        self.live_items().into_iter().filter_map(|i| i.snapshot()).collect()
    }

    /// Snapshots of the live players of sounds named `name`.
    pub fn snapshots_for(&self, name: &str) -> Vec<PlayerSnapshot> {
        self.snapshots().into_iter().filter(|s| s.sound == name).collect()
    }

    /// Number of players that have not been dropped.
    pub fn live_count(&self) -> usize {
        self.live_items().len()
    }

    fn live_items(&self) -> Vec<Arc<VirtualItem>> {
        match self.inner.items.lock() {
            Ok(mut items) => {
                items.retain(|w| w.strong_count() > 0);
                items.iter().filter_map(Weak::upgrade).collect()
            }
            Err(_) => Vec::new(),
        }
    }
}

impl Default for VirtualEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaEngine for VirtualEngine {
    fn load(&self, url: &SoundUrl) -> Result<Arc<dyn MediaAsset>> {
        let name = url.last_path_component();
        let (duration, defer) = {
            let settings = self
                .inner
                .settings
                .lock()
                .map_err(|_| Error::Other("virtual engine settings poisoned".to_string()))?;
            if settings.unloadable.contains(&name) {
                return Err(Error::AssetLoad(url.to_string(), "asset is unloadable".to_string()));
            }
            (
                settings.durations.get(&name).copied().unwrap_or(DEFAULT_DURATION),
                settings.defer_metadata,
            )
        };

        let asset = Arc::new(VirtualAsset {
            url: url.clone(),
            duration,
            state: Mutex::new(AssetState {
                loaded: !defer,
                waiters: Vec::new(),
            }),
        });
        if defer {
            if let Ok(mut pending) = self.inner.pending_assets.lock() {
                pending.push(Arc::clone(&asset));
            }
        }
        Ok(asset)
    }

    fn player(&self, asset: Arc<dyn MediaAsset>) -> Result<Box<dyn MediaPlayer>> {
        let asset = self.find_asset(asset)?;
        let item = Arc::new(VirtualItem {
            id: ItemId::next(),
            url: asset.url.clone(),
            asset,
            state: Mutex::new(ItemState {
                volume: 1.0,
                ..Default::default()
            }),
            ticks: PeriodicObservers::new(),
        });
        if let Ok(mut items) = self.inner.items.lock() {
            items.push(Arc::downgrade(&item));
        }
        Ok(Box::new(VirtualPlayer {
            item,
            engine: Arc::downgrade(&self.inner),
        }))
    }

    fn notifications(&self) -> &NotificationCenter {
        &self.inner.notifications
    }

    fn name(&self) -> &str {
        "virtual"
    }
}

impl VirtualEngine {
    /// Recovers the concrete asset; assets from other engines are rejected.
    fn find_asset(&self, asset: Arc<dyn MediaAsset>) -> Result<Arc<VirtualAsset>> {
        let url = asset.url().to_string();
        asset
            .into_any()
            .downcast::<VirtualAsset>()
            .map_err(|_| Error::AssetLoad(url, "asset belongs to another engine".to_string()))
    }
}

struct AssetState {
    loaded: bool,
    waiters: Vec<MetadataCallback>,
}

struct VirtualAsset {
    url: SoundUrl,
    duration: Duration,
    state: Mutex<AssetState>,
}

impl VirtualAsset {
    fn metadata(&self) -> AssetMetadata {
        AssetMetadata {
            playable: true,
            protected: false,
            duration: Some(self.duration),
        }
    }

    fn duration(&self) -> Option<Duration> {
        match self.state.lock() {
            Ok(state) if state.loaded => Some(self.duration),
            _ => None,
        }
    }

    fn finish_loading(&self) {
        let waiters = match self.state.lock() {
            Ok(mut state) => {
                state.loaded = true;
                std::mem::take(&mut state.waiters)
            }
            Err(_) => Vec::new(),
        };
        for waiter in waiters {
            waiter(Ok(self.metadata()));
        }
    }
}

impl MediaAsset for VirtualAsset {
    fn url(&self) -> &SoundUrl {
        &self.url
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn load_metadata(&self, _keys: &[MetadataKey], done: MetadataCallback) {
        let ready = match self.state.lock() {
            Ok(mut state) if !state.loaded => {
                state.waiters.push(done);
                return;
            }
            Ok(_) => true,
            Err(_) => false,
        };
        if ready {
            done(Ok(self.metadata()));
        } else {
            done(Err(Error::AssetLoad(self.url.to_string(), "asset state poisoned".to_string())));
        }
    }
}

#[derive(Default)]
struct ItemState {
    playing: bool,
    finished: bool,
    position: Duration,
    volume: f32,
    seeks: usize,
    plays: usize,
    pauses: usize,
}

struct VirtualItem {
    id: ItemId,
    url: SoundUrl,
    asset: Arc<VirtualAsset>,
    state: Mutex<ItemState>,
    ticks: PeriodicObservers,
}

impl VirtualItem {
    fn snapshot(&self) -> Option<PlayerSnapshot> {
        let state = self.state.lock().ok()?;
        Some(PlayerSnapshot {
            item: self.id,
            sound: self.url.last_path_component(),
            playing: state.playing,
            finished: state.finished,
            position: state.position,
            volume: state.volume,
            seeks: state.seeks,
            plays: state.plays,
            pauses: state.pauses,
        })
    }
}

/// Player handed out by [`VirtualEngine`].
struct VirtualPlayer {
    item: Arc<VirtualItem>,
    engine: Weak<VirtualInner>,
}

impl VirtualPlayer {
    fn now(&self) -> Duration {
        self.engine.upgrade().map(|e| e.now()).unwrap_or_default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ItemState) -> R) -> Option<R> {
        self.item.state.lock().ok().map(|mut state| f(&mut state))
    }
}

impl MediaPlayer for VirtualPlayer {
    fn item(&self) -> ItemId {
        self.item.id
    }

    fn url(&self) -> &SoundUrl {
        &self.item.url
    }

    fn play(&mut self) {
        let now = self.now();
        self.with_state(|state| {
            state.plays += 1;
            state.playing = true;
            state.finished = false;
        });
        self.item.ticks.rebase(now);
    }

    fn pause(&mut self) {
        self.with_state(|state| {
            state.pauses += 1;
            state.playing = false;
        });
    }

    fn seek(&mut self, position: Duration) {
        let limit = self.item.asset.duration();
        self.with_state(|state| {
            state.seeks += 1;
            state.position = limit.map_or(position, |d| position.min(d));
        });
    }

    fn volume(&self) -> f32 {
        self.with_state(|state| state.volume).unwrap_or(0.0)
    }

    fn set_volume(&mut self, volume: f32) {
        self.with_state(|state| state.volume = volume.clamp(0.0, 1.0));
    }

    fn current_time(&self) -> Duration {
        self.with_state(|state| state.position).unwrap_or_default()
    }

    fn duration(&self) -> Option<Duration> {
        self.item.asset.duration()
    }

    fn is_playing(&self) -> bool {
        self.with_state(|state| state.playing).unwrap_or(false)
    }

    fn has_finished(&self) -> bool {
        self.with_state(|state| state.finished).unwrap_or(false)
    }

    fn add_periodic_observer(&mut self, interval: Duration, callback: TickCallback) -> Subscription {
        self.item.ticks.add(self.now(), interval, callback)
    }
}

impl Drop for VirtualPlayer {
    fn drop(&mut self) {
        self.with_state(|state| state.playing = false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn url(name: &str) -> SoundUrl {
        SoundUrl::from_path(std::path::Path::new(name))
    }

    fn player_for(engine: &VirtualEngine, name: &str) -> Box<dyn MediaPlayer> {
        let asset = engine.load(&url(name)).unwrap();
        engine.player(asset).unwrap()
    }

    #[test]
    fn test_playback_reaches_end_and_posts_finished() {
        let engine = VirtualEngine::new().with_duration("beep.mp3", Duration::from_secs(2));
        let mut player = player_for(&engine, "beep.mp3");
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        let _sub = engine.notifications().observe_finished(player.item(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        player.play();
        engine.advance(Duration::from_millis(1990));
        assert!(player.is_playing());
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        engine.advance(Duration::from_millis(10));
        assert!(!player.is_playing());
        assert!(player.has_finished());
        assert_eq!(player.current_time(), Duration::from_secs(2));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_paused_player_does_not_advance() {
        let engine = VirtualEngine::new();
        let mut player = player_for(&engine, "a.wav");
        player.play();
        engine.advance(Duration::from_millis(300));
        player.pause();
        engine.advance(Duration::from_millis(300));
        assert_eq!(player.current_time(), Duration::from_millis(300));
    }

    #[test]
    fn test_ticks_only_while_playing() {
        let engine = VirtualEngine::new().with_duration("a.wav", Duration::from_secs(10));
        let mut player = player_for(&engine, "a.wav");
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        let _sub = player.add_periodic_observer(
            Duration::from_millis(500),
            Arc::new(move |time| sink.lock().unwrap().push(time.position)),
        );

        engine.advance(Duration::from_secs(1));
        assert!(ticks.lock().unwrap().is_empty());

        player.play();
        engine.advance(Duration::from_millis(1000));
        assert_eq!(
            *ticks.lock().unwrap(),
            vec![Duration::from_millis(500), Duration::from_millis(1000)]
        );
    }

    #[test]
    fn test_no_ticks_after_finish() {
        let engine = VirtualEngine::new().with_duration("a.wav", Duration::from_millis(600));
        let mut player = player_for(&engine, "a.wav");
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let _sub = player.add_periodic_observer(
            Duration::from_millis(200),
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        player.play();
        engine.advance(Duration::from_secs(2));
        assert!(player.has_finished());
        // Due at 200 and 400; the 600 tick coincides with completion.
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_deferred_metadata() {
        let engine = VirtualEngine::new().with_duration("slow.mp3", Duration::from_secs(3));
        engine.defer_metadata(true);
        let asset = engine.load(&url("slow.mp3")).unwrap();

        let loaded = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&loaded);
        asset.load_metadata(
            &[MetadataKey::Duration],
            Box::new(move |result| *slot.lock().unwrap() = Some(result.unwrap().duration)),
        );
        let player = engine.player(asset).unwrap();

        assert!(loaded.lock().unwrap().is_none());
        assert_eq!(player.duration(), None);

        assert_eq!(engine.resolve_metadata(), 1);
        assert_eq!(*loaded.lock().unwrap(), Some(Some(Duration::from_secs(3))));
        assert_eq!(player.duration(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_unloadable_sound() {
        let engine = VirtualEngine::new().with_unloadable("broken.mp3");
        assert!(matches!(engine.load(&url("broken.mp3")), Err(Error::AssetLoad(_, _))));
    }

    #[test]
    fn test_dropped_player_is_not_live() {
        let engine = VirtualEngine::new();
        let mut player = player_for(&engine, "a.wav");
        player.play();
        let item = player.item();
        assert!(engine.snapshot(item).unwrap().playing);

        drop(player);
        assert!(engine.snapshot(item).is_none());
        assert_eq!(engine.live_count(), 0);
    }

    #[test]
    fn test_snapshot_counts() {
        let engine = VirtualEngine::new();
        let mut player = player_for(&engine, "sfx/click.mp3");
        player.set_volume(0.25);
        player.seek(Duration::ZERO);
        player.play();
        player.pause();

        let snap = engine.snapshots_for("click.mp3").pop().unwrap();
        assert_eq!(snap.volume, 0.25);
        assert_eq!((snap.seeks, snap.plays, snap.pauses), (1, 1, 1));
    }
}
