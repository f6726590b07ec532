//! The media engine contract and its implementations.
//!
//! The engine is the external collaborator that actually loads and plays
//! audio. Everything above this module only talks to these traits.

pub mod audio_output;
mod kira_engine;
mod virtual_engine;

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

pub use kira_engine::KiraEngine;
pub use virtual_engine::{PlayerSnapshot, VirtualEngine};

use crate::error::Result;
use crate::notify::{ItemId, NotificationCenter, Subscription, TickCallback};
use crate::resolve::SoundUrl;

/// Asset properties that can be loaded asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKey {
    Playable,
    Protected,
    Duration,
}

/// Keys requested whenever a player is prepared.
pub const PREPARE_METADATA_KEYS: &[MetadataKey] =
    &[MetadataKey::Playable, MetadataKey::Protected, MetadataKey::Duration];

/// Loaded asset properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssetMetadata {
    pub playable: bool,
    pub protected: bool,
    pub duration: Option<Duration>,
}

/// Callback for an asynchronous metadata load.
pub type MetadataCallback = Box<dyn FnOnce(Result<AssetMetadata>) + Send + 'static>;

/// A loadable audio asset.
pub trait MediaAsset: Send + Sync {
    fn url(&self) -> &SoundUrl;

    /// Lets an engine recover its own concrete asset type.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Starts loading `keys` and calls `done` when they are available. May
    /// call `done` before returning if the metadata is already loaded.
    fn load_metadata(&self, keys: &[MetadataKey], done: MetadataCallback);
}

/// One independently controllable playback session of an asset.
///
/// Dropping a player stops its playback.
pub trait MediaPlayer: Send {
    /// Identity of the item this player is playing.
    fn item(&self) -> ItemId;

    /// URL of the originating asset.
    fn url(&self) -> &SoundUrl;

    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, position: Duration);

    fn volume(&self) -> f32;
    fn set_volume(&mut self, volume: f32);

    fn current_time(&self) -> Duration;

    /// `None` until the asset's metadata has loaded.
    fn duration(&self) -> Option<Duration>;

    fn is_playing(&self) -> bool;

    /// True once playback reached the end and completion was posted, until
    /// the player is played again.
    fn has_finished(&self) -> bool;

    /// Calls `callback` every `interval` while the player is playing. Ticks
    /// stop once completion is posted for this item.
    fn add_periodic_observer(&mut self, interval: Duration, callback: TickCallback) -> Subscription;
}

/// Loads assets and builds players for them.
pub trait MediaEngine: Send + Sync {
    fn load(&self, url: &SoundUrl) -> Result<Arc<dyn MediaAsset>>;

    fn player(&self, asset: Arc<dyn MediaAsset>) -> Result<Box<dyn MediaPlayer>>;

    /// Where "did finish" notifications for this engine's items are posted.
    fn notifications(&self) -> &NotificationCenter;

    /// Human-readable backend name, for logs.
    fn name(&self) -> &str;
}

/// Clamps a normalized volume and truncates it to the engine's precision.
pub fn normalize_volume(volume: f64) -> f32 {
    if volume.is_nan() {
        return 0.0;
    }
    volume.clamp(0.0, 1.0) as f32
}
