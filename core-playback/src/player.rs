//! # Audio Player
//!
//! Thread-safe handle around a [`PlaybackEngine`].
//!
//! The engine and its [`AudioOutput`] live on a dedicated `audio-player`
//! thread. Every public call becomes a command on an unbounded channel,
//! so callers never block on the audio device and realtime completion
//! callbacks never wait for a lock.
//!
//! ## Example
//!
//! ```ignore
//! let player = AudioPlayer::spawn(|| Box::new(CpalAudioOutput::new()), PlayerConfig::default(), events)?;
//! if player.prepare_to_play().await {
//!     player.play(vec![track], true);
//! }
//! ```

use bridge_traits::playback::{AudioOutput, RouteChangeReason};
use core_runtime::events::{CoreEvent, EventBus};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::PlayerConfig;
use crate::engine::{
    EngineSignal, EngineSnapshot, Interruption, NowPlaying, PlaybackEngine, SignalSender,
};
use crate::error::{PlaybackError, Result};
use crate::traits::AudioTrack;

enum Command {
    PrepareToPlay(oneshot::Sender<bool>),
    Play {
        tracks: Vec<Arc<dyn AudioTrack>>,
        reset: bool,
    },
    Stop,
    Pause,
    Resume,
    TogglePlayback,
    NextTrack,
    PreviousTrack,
    SeekTo(Duration),
    ResetQueue { stop_current: bool },
    Append(Arc<dyn AudioTrack>),
    PlayNext(Arc<dyn AudioTrack>),
    Interruption(Interruption),
    RouteChange(RouteChangeReason),
    MediaServicesReset,
    SessionActivation { granted: bool },
    Signal(EngineSignal),
    Snapshot(oneshot::Sender<EngineSnapshot>),
    Shutdown,
}

/// Handle to the playback thread.
///
/// Dropping the handle stops playback and joins the thread.
pub struct AudioPlayer {
    commands: mpsc::UnboundedSender<Command>,
    now_playing: watch::Receiver<NowPlaying>,
    events: EventBus,
    thread: Option<JoinHandle<()>>,
}

impl AudioPlayer {
    /// Start the playback thread.
    ///
    /// `output` runs on the new thread and builds the device there, so
    /// outputs that are not `Send` are fine.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::Config`] for an invalid `config`, [`PlaybackError::Io`]
    /// if the thread cannot be spawned.
    pub fn spawn<F>(output: F, config: PlayerConfig, events: EventBus) -> Result<Self>
    where
        F: FnOnce() -> Box<dyn AudioOutput> + Send + 'static,
    {
        config.validate().map_err(PlaybackError::Config)?;

        let (commands, receiver) = mpsc::unbounded_channel();
        let (now_playing_tx, now_playing) = watch::channel(NowPlaying::default());

        let loopback = commands.clone();
        let engine_events = events.clone();
        let thread = std::thread::Builder::new()
            .name("audio-player".to_string())
            .spawn(move || {
                let signals: SignalSender = Arc::new(move |signal: EngineSignal| {
                    loopback.send(Command::Signal(signal)).ok();
                });
                let engine =
                    PlaybackEngine::new(output(), config, signals, engine_events, now_playing_tx);
                run(engine, receiver);
            })?;

        info!("Audio player started");
        Ok(Self {
            commands,
            now_playing,
            events,
            thread: Some(thread),
        })
    }

    /// Reset the player and acquire the audio session.
    ///
    /// Returns `false` if the session was denied.
    pub async fn prepare_to_play(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        self.send(Command::PrepareToPlay(tx));
        rx.await.unwrap_or(false)
    }

    /// Queue `tracks`; with `reset` they replace the queue and the first one
    /// starts.
    pub fn play(&self, tracks: Vec<Arc<dyn AudioTrack>>, reset: bool) {
        self.send(Command::Play { tracks, reset });
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    pub fn toggle_playback(&self) {
        self.send(Command::TogglePlayback);
    }

    pub fn next_track(&self) {
        self.send(Command::NextTrack);
    }

    pub fn previous_track(&self) {
        self.send(Command::PreviousTrack);
    }

    pub fn seek_to(&self, time: Duration) {
        self.send(Command::SeekTo(time));
    }

    pub fn reset_queue(&self, stop_current: bool) {
        self.send(Command::ResetQueue { stop_current });
    }

    pub fn append(&self, track: Arc<dyn AudioTrack>) {
        self.send(Command::Append(track));
    }

    pub fn play_next(&self, track: Arc<dyn AudioTrack>) {
        self.send(Command::PlayNext(track));
    }

    pub fn handle_interruption(&self, interruption: Interruption) {
        self.send(Command::Interruption(interruption));
    }

    pub fn handle_route_change(&self, reason: RouteChangeReason) {
        self.send(Command::RouteChange(reason));
    }

    pub fn handle_media_services_reset(&self) {
        self.send(Command::MediaServicesReset);
    }

    /// Report the result of a session activation the output left pending.
    pub fn session_activation_result(&self, granted: bool) {
        self.send(Command::SessionActivation { granted });
    }

    /// Current engine state, after every previously sent command ran.
    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx));
        rx.await
            .map_err(|_| PlaybackError::Internal("audio player thread has exited".to_string()))
    }

    pub fn now_playing(&self) -> watch::Receiver<NowPlaying> {
        self.now_playing.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Audio player thread has exited, dropping command");
        }
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.commands.send(Command::Shutdown).ok();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Audio player thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for AudioPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPlayer")
            .field("running", &self.thread.is_some())
            .finish_non_exhaustive()
    }
}

fn run(mut engine: PlaybackEngine, mut commands: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.blocking_recv() {
        match command {
            Command::PrepareToPlay(reply) => engine.prepare_to_play(Box::new(move |granted| {
                reply.send(granted).ok();
            })),
            Command::Play { tracks, reset } => engine.play(tracks, reset),
            Command::Stop => engine.stop(),
            Command::Pause => engine.pause(),
            Command::Resume => engine.resume(),
            Command::TogglePlayback => engine.toggle_playback(),
            Command::NextTrack => engine.next_track(),
            Command::PreviousTrack => engine.previous_track(),
            Command::SeekTo(time) => engine.seek_to(time),
            Command::ResetQueue { stop_current } => engine.reset_queue(stop_current),
            Command::Append(track) => engine.append(track),
            Command::PlayNext(track) => engine.play_next(track),
            Command::Interruption(interruption) => engine.handle_interruption(interruption),
            Command::RouteChange(reason) => engine.handle_route_change(reason),
            Command::MediaServicesReset => engine.handle_media_services_reset(),
            Command::SessionActivation { granted } => engine.handle_session_activation(granted),
            Command::Signal(signal) => engine.handle_signal(signal),
            Command::Snapshot(reply) => {
                reply.send(engine.snapshot()).ok();
            }
            Command::Shutdown => break,
        }
    }
    debug!("Audio player thread exiting");
}
