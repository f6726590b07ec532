//! Command-line host for chime-core.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use chime_core::dispatch::{Dispatcher, SerialQueue};
use chime_core::engines::audio_output::is_audio_available;
use chime_core::engines::KiraEngine;
use chime_core::resolve::SoundResolver;
use chime_core::{
    play_fire_and_forget_with_volume, stop_all_fire_and_forget, Binding, ChimeConfig, PlayMode, PlaybackRegistry,
    SoundBinding, SoundController,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(name = "chime", version, about = "Play sounds and watch their playback state")]
struct Cli {
    /// YAML config file (defaults to $CHIME_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fire and forget one or more sounds, then wait for them to finish
    Play {
        #[arg(required = true)]
        sounds: Vec<String>,
        /// Playback volume, 0.0 - 1.0 (defaults to the configured volume)
        #[arg(long)]
        volume: Option<f64>,
        /// Stop everything after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Play a sound through a controller, repeating after each completion
    Control {
        sound: String,
        #[arg(long, default_value_t = 1.0)]
        volume: f64,
        /// Resume from the current position instead of rewinding
        #[arg(long = "continue")]
        continue_mode: bool,
        #[arg(long, default_value_t = 1)]
        times: u32,
    },
    /// Drive a sound through a declarative binding and print its progress
    Bind {
        sound: String,
        #[arg(long, default_value_t = 1.0)]
        volume: f64,
        /// Pause after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Show how sound references resolve under the current config
    Resolve {
        #[arg(required = true)]
        sounds: Vec<String>,
    },
    /// Print the effective config and audio device status
    Config,
}

enum Wait {
    Done,
    TimedOut,
    Interrupted,
}

/// Owns the global registry's dispatchers so the host can wait on them.
struct Host {
    coordinator: Arc<SerialQueue>,
    background: Arc<SerialQueue>,
}

impl Host {
    fn start(config: ChimeConfig) -> Result<Self> {
        let engine = KiraEngine::new();
        if !engine.is_available() {
            bail!("No audio output device available");
        }

        let coordinator = Arc::new(SerialQueue::new(&config.coordinator_thread));
        let background = Arc::new(SerialQueue::new(&config.background_thread));
        let registry = PlaybackRegistry::with_dispatchers(
            Arc::new(engine),
            config,
            Arc::clone(&coordinator) as Arc<dyn Dispatcher>,
            Arc::clone(&background) as Arc<dyn Dispatcher>,
        );
        PlaybackRegistry::install_global(registry)?;

        Ok(Self { coordinator, background })
    }

    /// Waits until every request handed to the registry so far has landed.
    async fn settle(&self) -> Result<()> {
        let background = Arc::clone(&self.background);
        let coordinator = Arc::clone(&self.coordinator);
        tokio::task::spawn_blocking(move || {
            background.flush();
            coordinator.flush();
        })
        .await
        .context("Dispatcher flush task failed")
    }
}

fn init_logging() {
    let fmt_layer = tracing_subscriber::fmt::layer().with_filter(
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
    );

    tracing_subscriber::registry().with(fmt_layer).init();
}

fn load_config(path: Option<PathBuf>) -> Result<ChimeConfig> {
    match path {
        Some(path) => {
            ChimeConfig::load(&path).with_context(|| format!("Failed to load config {}", path.display()))
        }
        None => Ok(ChimeConfig::from_env()),
    }
}

async fn wait_until(mut done: impl FnMut() -> bool, timeout: Option<Duration>) -> Wait {
    let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
    let mut poll = tokio::time::interval(POLL_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => return Wait::Interrupted,
            _ = poll.tick() => {
                if done() {
                    return Wait::Done;
                }
                if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                    return Wait::TimedOut;
                }
            }
        }
    }
}

async fn run_play(config: ChimeConfig, sounds: Vec<String>, volume: Option<f64>, timeout: Option<u64>) -> Result<()> {
    let volume = volume.unwrap_or(config.default_volume);
    let host = Host::start(config)?;

    for sound in &sounds {
        play_fire_and_forget_with_volume(sound, volume);
    }
    host.settle().await?;

    let registry = PlaybackRegistry::global();
    let playing = registry.active_sounds();
    if playing.is_empty() {
        bail!("None of the requested sounds could be played");
    }
    println!("Playing: {}", playing.join(", "));

    match wait_until(|| registry.active_count() == 0, timeout.map(Duration::from_secs)).await {
        Wait::Done => println!("All sounds finished"),
        Wait::TimedOut => println!("Timed out, stopped {} sound(s)", stop_all_fire_and_forget()),
        Wait::Interrupted => println!("Interrupted, stopped {} sound(s)", stop_all_fire_and_forget()),
    }
    Ok(())
}

async fn run_control(config: ChimeConfig, sound: String, volume: f64, continue_mode: bool, times: u32) -> Result<()> {
    Host::start(config)?;

    let play_mode = if continue_mode {
        PlayMode::Continue
    } else {
        PlayMode::Reset
    };
    let mut controller = SoundController::new(&sound, volume, play_mode);
    if !controller.is_loaded() {
        bail!("Could not load {}", sound);
    }

    let flag = controller.is_playing_state();
    for round in 1..=times {
        controller.play();
        println!("[{}/{}] playing {}", round, times, controller.sound());

        if let Wait::Interrupted = wait_until(|| !flag.get(), None).await {
            controller.stop();
            println!("Interrupted");
            return Ok(());
        }
    }
    println!("Done");
    Ok(())
}

async fn run_bind(config: ChimeConfig, sound: String, volume: f64, timeout: Option<u64>) -> Result<()> {
    Host::start(config)?;

    let is_playing = Binding::new(false);
    let current_time = Binding::new(0.0_f64);
    let duration_time = Binding::new(0.0_f64);

    let total = duration_time.clone();
    let _progress = current_time.watch(move |position| {
        println!("  {:6.2}s / {:6.2}s", position, total.get());
    });

    let attached = SoundBinding::new(&sound, is_playing.clone(), current_time, duration_time.clone())
        .volume(volume)
        .attach();
    attached.on_appear();
    if attached.item().is_none() {
        bail!("Could not load {}", sound);
    }
    println!("{} ({:.2}s)", attached.sound(), duration_time.get());

    is_playing.set(true);
    match wait_until(|| !is_playing.get(), timeout.map(Duration::from_secs)).await {
        Wait::Done => println!("Finished"),
        Wait::TimedOut | Wait::Interrupted => {
            is_playing.set(false);
            println!("Paused");
        }
    }
    attached.on_disappear();
    Ok(())
}

fn run_resolve(config: ChimeConfig, sounds: Vec<String>) -> Result<()> {
    let resolver = SoundResolver::new(config.sound_dirs);
    for sound in sounds {
        match resolver.resolve(&sound) {
            Ok(url) => println!("{} -> {}", sound, url),
            Err(e) => println!("{} -> error: {}", sound, e),
        }
    }
    Ok(())
}

fn run_config(config: ChimeConfig) -> Result<()> {
    println!("{:#?}", config);
    println!("audio output available: {}", is_audio_available());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Play { sounds, volume, timeout } => run_play(config, sounds, volume, timeout).await,
        Commands::Control {
            sound,
            volume,
            continue_mode,
            times,
        } => run_control(config, sound, volume, continue_mode, times).await,
        Commands::Bind { sound, volume, timeout } => run_bind(config, sound, volume, timeout).await,
        Commands::Resolve { sounds } => run_resolve(config, sounds),
        Commands::Config => run_config(config),
    }
}
