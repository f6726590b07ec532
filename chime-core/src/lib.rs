//! Chime Core - sound playback that keeps UI state in sync with the player.
//!
//! This library provides:
//! - A process-wide registry for fire-and-forget sounds, with stop by name
//!   and stop all
//! - A single-sound controller whose playing flag clears itself when the
//!   sound ends
//! - A declarative binding that drives a player from view-owned state and
//!   publishes position and duration back
//! - Kira-backed playback plus a virtual engine for tests and headless hosts
//! - FFI layer for Swift/iOS interop
//!
//! # Example
//!
//! ```rust,no_run
//! use chime_core::{play_fire_and_forget, PlayMode, SoundController};
//!
//! // Fire and forget
//! play_fire_and_forget("sounds/click.wav");
//!
//! // A controller that knows when its sound has finished
//! let mut beep = SoundController::new("sounds/beep.wav", 0.8, PlayMode::Reset);
//! beep.play();
//! assert!(beep.is_playing());
//! ```

pub mod binding;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod engines;
pub mod error;
pub mod ffi;
pub mod notify;
pub mod registry;
pub mod resolve;
pub mod state;

pub use binding::{AttachedSound, SoundBinding};
pub use config::ChimeConfig;
pub use controller::{PlayMode, SoundController};
pub use error::{Error, Result};
pub use registry::{
    play_fire_and_forget, play_fire_and_forget_with_volume, stop_all_fire_and_forget, stop_fire_and_forget,
    PlaybackRegistry, PlayerInstance,
};
pub use state::Binding;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::binding::{AttachedSound, SoundBinding};
    pub use crate::config::{ChimeConfig, ConfigValidator};
    pub use crate::controller::{PlayMode, SoundController};
    pub use crate::dispatch::{Dispatcher, Immediate, SerialQueue};
    pub use crate::engines::{KiraEngine, MediaEngine, MediaPlayer, VirtualEngine};
    pub use crate::error::{Error, Result};
    pub use crate::notify::{ItemId, PlaybackTime};
    pub use crate::registry::{PlaybackRegistry, PlayerInstance};
    pub use crate::resolve::{SoundResolver, SoundUrl};
    pub use crate::state::{Binding, WatchGuard};
}
