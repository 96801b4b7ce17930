//! # Playback Engine
//!
//! Queue, transport and buffer scheduling on top of an [`AudioOutput`].
//!
//! ## State Machine
//!
//! ```text
//!            prepare_to_play()         start_playing()
//! Stopped ─────────────────▶ Loading ─────────────▶ Buffering ⇄ Playing
//!    ▲                                                  │          │
//!    │ stop() / end of queue                    pause() ▼          ▼ pause()
//!    └──────────────────────────────────────────────── Paused ◀──── Interrupted
//! ```
//!
//! ## Buffer Loop
//!
//! Up to [`PlayerConfig::max_buffers_in_flight`] buffers are scheduled on the
//! output at any time. Every buffer carries a [`BufferTicket`]; its completion
//! frees a slot and pulls the next buffer. Switching tracks or stopping bumps
//! the ticket generation, so completions of discarded buffers are ignored.
//!
//! ## Threading
//!
//! The engine is single-threaded. Output completions and track events arrive
//! on other threads and are posted back as [`EngineSignal`]s through the
//! sender given to [`PlaybackEngine::new`]; the owner feeds them to
//! [`PlaybackEngine::handle_signal`].

use bridge_traits::playback::{
    AudioOutput, BufferTicket, PcmBuffer, PcmFormat, PlaybackState, RouteChangeReason,
    SessionActivation,
};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::PlayerConfig;
use crate::error::{PlaybackError, Result};
use crate::traits::{AudioTrack, ReadStatus, TrackEvent, TrackEventKind, TrackEventSink, TrackMetadata, TrackReadError};

/// Work posted to the engine from other threads.
#[derive(Debug, Clone)]
pub enum EngineSignal {
    BufferCompleted(BufferTicket),
    Track(TrackEvent),
}

/// Posts an [`EngineSignal`] to the thread that owns the engine.
pub type SignalSender = Arc<dyn Fn(EngineSignal) + Send + Sync>;

/// Audio session interruption reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    Began,
    Ended { should_resume: bool },
}

/// Called once session activation for `prepare_to_play` is decided.
pub type PrepareCallback = Box<dyn FnOnce(bool) + Send>;

/// What to do once a pending session activation is decided.
enum PendingActivation {
    PrepareToPlay(PrepareCallback),
    StartPlayback { generation: u64 },
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Inactive,
    Activating,
    Active,
}

/// Now-playing information for system media surfaces.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub track_id: Option<String>,
    pub metadata: Option<TrackMetadata>,
    pub elapsed: Duration,
    /// 1.0 while rendering, 0.0 otherwise.
    pub rate: f32,
    pub state: PlaybackState,
}

impl Default for NowPlaying {
    fn default() -> Self {
        Self {
            track_id: None,
            metadata: None,
            elapsed: Duration::ZERO,
            rate: 0.0,
            state: PlaybackState::Stopped,
        }
    }
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub state: PlaybackState,
    pub current_track_id: Option<String>,
    pub queue_index: Option<usize>,
    pub queue_len: usize,
    pub buffers_in_flight: usize,
    pub generation: u64,
    pub session_active: bool,
    pub awaiting_prepare: bool,
}

/// Single-threaded playback engine.
pub struct PlaybackEngine {
    output: Box<dyn AudioOutput>,
    config: PlayerConfig,
    signals: SignalSender,
    events: EventBus,
    now_playing: watch::Sender<NowPlaying>,

    state: PlaybackState,
    session: SessionState,
    pending_activations: Vec<PendingActivation>,
    /// Set by a media-services reset; cleared by `prepare_to_play`.
    awaiting_prepare: bool,

    queue: Vec<Arc<dyn AudioTrack>>,
    current_index: usize,
    current: Option<Arc<dyn AudioTrack>>,

    generation: u64,
    next_sequence: u64,
    in_flight: usize,
    reached_end: bool,
    output_format: Option<PcmFormat>,
    cached_elapsed: Option<Duration>,
}

impl PlaybackEngine {
    pub fn new(
        mut output: Box<dyn AudioOutput>,
        config: PlayerConfig,
        signals: SignalSender,
        events: EventBus,
        now_playing: watch::Sender<NowPlaying>,
    ) -> Self {
        let completions = signals.clone();
        output.set_completion_handler(Arc::new(move |ticket: BufferTicket| {
            completions(EngineSignal::BufferCompleted(ticket))
        }));

        Self {
            output,
            config,
            signals,
            events,
            now_playing,
            state: PlaybackState::Stopped,
            session: SessionState::Inactive,
            pending_activations: Vec::new(),
            awaiting_prepare: false,
            queue: Vec::new(),
            current_index: 0,
            current: None,
            generation: 0,
            next_sequence: 0,
            in_flight: 0,
            reached_end: false,
            output_format: None,
            cached_elapsed: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn current_track(&self) -> Option<Arc<dyn AudioTrack>> {
        self.current.clone()
    }

    pub fn queue(&self) -> &[Arc<dyn AudioTrack>] {
        &self.queue
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.state,
            current_track_id: self.current.as_ref().map(|t| t.identifier().to_string()),
            queue_index: self.current.as_ref().map(|_| self.current_index),
            queue_len: self.queue.len(),
            buffers_in_flight: self.in_flight,
            generation: self.generation,
            session_active: self.session == SessionState::Active,
            awaiting_prepare: self.awaiting_prepare,
        }
    }

    /// Playback position: the render clock, else the position cached when
    /// pausing, else zero.
    pub fn elapsed(&self) -> Duration {
        if self.current.is_none() {
            return Duration::ZERO;
        }
        self.output
            .elapsed()
            .or(self.cached_elapsed)
            .unwrap_or_default()
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Reset the engine and acquire the audio session.
    pub fn prepare_to_play(&mut self, callback: PrepareCallback) {
        self.output.stop();
        self.invalidate_buffers();
        if let Some(current) = self.current.take() {
            current.did_finish_playback();
        }
        self.queue.clear();
        self.current_index = 0;
        self.awaiting_prepare = false;
        self.publish(PlaybackEvent::TrackChanged {
            track_id: None,
            queue_index: None,
        });

        self.set_state(PlaybackState::Loading);
        self.activate_session(PendingActivation::PrepareToPlay(callback));
    }

    /// Queue `tracks`, replacing the queue and starting the first one when
    /// `reset` is set.
    pub fn play(&mut self, tracks: Vec<Arc<dyn AudioTrack>>, reset: bool) {
        if self.awaiting_prepare {
            warn!("Ignoring play request until the engine is prepared again");
            return;
        }

        for track in &tracks {
            track.configure(self.track_sink());
        }

        if reset {
            self.queue = tracks;
            self.current_index = 0;
        } else {
            self.queue.extend(tracks);
        }
        self.publish(PlaybackEvent::QueueChanged {
            length: self.queue.len(),
        });

        if reset {
            match self.queue.first().cloned() {
                Some(first) => self.start_playing(first),
                None => self.stop(),
            }
        }
    }

    pub fn stop(&mut self) {
        self.output.stop();
        self.invalidate_buffers();
        self.cached_elapsed = None;
        self.pending_activations.clear();

        if let Some(current) = self.current.take() {
            current.did_stop_playback();
            current.did_finish_playback();
            self.publish(PlaybackEvent::TrackChanged {
                track_id: None,
                queue_index: None,
            });
        }
        if !self.queue.is_empty() {
            self.queue.clear();
            self.publish(PlaybackEvent::QueueChanged { length: 0 });
        }
        self.current_index = 0;

        self.set_state(PlaybackState::Stopped);
        self.deactivate_session();
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Stopped {
            return;
        }
        if let Some(elapsed) = self.output.elapsed() {
            self.cached_elapsed = Some(elapsed);
        }
        self.output.pause();
        self.set_state(PlaybackState::Paused);
        if let Some(current) = &self.current {
            current.did_pause_playback();
        }
    }

    pub fn resume(&mut self) {
        let resumable = matches!(
            self.state,
            PlaybackState::Paused | PlaybackState::Interrupted
        );
        if !resumable || self.current.is_none() || self.output.is_rendering() {
            debug!(state = %self.state, "Nothing to resume");
            return;
        }
        self.activate_session(PendingActivation::Resume);
    }

    pub fn toggle_playback(&mut self) {
        match self.state {
            PlaybackState::Loading | PlaybackState::Buffering | PlaybackState::Playing => {
                self.pause()
            }
            PlaybackState::Paused => self.resume(),
            PlaybackState::Interrupted | PlaybackState::Stopped => {}
        }
    }

    /// Advance to the next queued track, stopping at the end of the queue.
    pub fn next_track(&mut self) {
        let next_index = self.current_index + 1;
        if self.current.is_none() || next_index >= self.queue.len() {
            self.stop();
            return;
        }

        self.current_index = next_index;
        self.start_playing(self.queue[next_index].clone());
        if let Some(following) = self.queue.get(next_index + 1) {
            following.prepare();
        }
    }

    /// Go back one track early in playback, restart the current one otherwise.
    pub fn previous_track(&mut self) {
        let Some(current) = self.current.clone() else {
            return;
        };

        let elapsed = self.elapsed();
        if elapsed < self.config.previous_track_threshold && self.current_index > 0 {
            self.current_index -= 1;
            self.start_playing(self.queue[self.current_index].clone());
        } else {
            self.start_playing(current);
        }
    }

    /// Only a seek to the start is supported; it restarts the current track.
    pub fn seek_to(&mut self, time: Duration) {
        if !time.is_zero() {
            debug!(?time, "Seeking to a non-zero offset is not supported");
            return;
        }
        if let Some(current) = self.current.clone() {
            self.start_playing(current);
        }
    }

    // ========================================================================
    // Queue
    // ========================================================================

    pub fn reset_queue(&mut self, stop_current: bool) {
        match self.current.clone() {
            Some(current) if !stop_current => {
                self.queue = vec![current];
                self.current_index = 0;
                self.publish(PlaybackEvent::QueueChanged { length: 1 });
            }
            _ => self.stop(),
        }
    }

    pub fn append(&mut self, track: Arc<dyn AudioTrack>) {
        track.configure(self.track_sink());
        self.queue.push(track);
        self.publish(PlaybackEvent::QueueChanged {
            length: self.queue.len(),
        });
    }

    /// Insert `track` right after the current one and start preparing it.
    pub fn play_next(&mut self, track: Arc<dyn AudioTrack>) {
        track.configure(self.track_sink());

        let position = self.current.as_ref().and_then(|current| {
            self.queue
                .iter()
                .position(|queued| Arc::ptr_eq(queued, current))
        });
        match position {
            Some(index) => self.queue.insert(index + 1, track.clone()),
            None => self.queue.push(track.clone()),
        }
        self.publish(PlaybackEvent::QueueChanged {
            length: self.queue.len(),
        });
        track.prepare();
    }

    // ========================================================================
    // Host Signals
    // ========================================================================

    pub fn handle_signal(&mut self, signal: EngineSignal) {
        match signal {
            EngineSignal::BufferCompleted(ticket) => self.on_buffer_completed(ticket),
            EngineSignal::Track(event) => self.on_track_event(event),
        }
    }

    pub fn handle_interruption(&mut self, interruption: Interruption) {
        match interruption {
            Interruption::Began => {
                info!("Audio session interrupted");
                self.pause();
                self.session = SessionState::Inactive;
                if self.state != PlaybackState::Stopped {
                    self.set_state(PlaybackState::Interrupted);
                }
            }
            Interruption::Ended { should_resume } => {
                info!(should_resume, "Audio session interruption ended");
                self.session = SessionState::Inactive;
                if self.state != PlaybackState::Interrupted {
                    return;
                }
                if should_resume {
                    self.resume();
                } else {
                    self.set_state(PlaybackState::Paused);
                }
            }
        }
    }

    pub fn handle_route_change(&mut self, reason: RouteChangeReason) {
        match reason {
            RouteChangeReason::OldDeviceUnavailable => {
                info!("Output device went away, pausing");
                if matches!(
                    self.state,
                    PlaybackState::Playing | PlaybackState::Buffering
                ) {
                    self.pause();
                }
            }
            other => debug!(reason = ?other, "Audio route changed"),
        }
    }

    /// The platform's media services restarted; every device handle is gone.
    pub fn handle_media_services_reset(&mut self) {
        warn!("Media services were reset");
        self.session = SessionState::Inactive;
        self.stop();
        self.output.reset();
        self.awaiting_prepare = true;
    }

    /// The host decided a pending session activation.
    pub fn handle_session_activation(&mut self, granted: bool) {
        self.session = if granted {
            SessionState::Active
        } else {
            SessionState::Inactive
        };
        for pending in std::mem::take(&mut self.pending_activations) {
            self.complete_activation(pending, granted);
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn track_sink(&self) -> TrackEventSink {
        let signals = self.signals.clone();
        TrackEventSink::new(move |event| signals(EngineSignal::Track(event)))
    }

    fn is_current(&self, track_id: &str) -> bool {
        self.current
            .as_ref()
            .map_or(false, |current| current.identifier() == track_id)
    }

    fn can_schedule(&self) -> bool {
        self.current.is_some()
            && self.session == SessionState::Active
            && matches!(
                self.state,
                PlaybackState::Buffering | PlaybackState::Playing
            )
    }

    /// Call after `output.stop()`, which releases the device.
    fn invalidate_buffers(&mut self) {
        self.generation += 1;
        self.in_flight = 0;
        self.reached_end = false;
        self.output_format = None;
    }

    fn start_playing(&mut self, track: Arc<dyn AudioTrack>) {
        self.output.stop();
        self.invalidate_buffers();
        if let Some(previous) = self.current.take() {
            previous.did_finish_playback();
        }
        self.cached_elapsed = None;

        info!(track_id = %track.identifier(), index = self.current_index, "Starting track");
        self.current = Some(track.clone());
        self.publish(PlaybackEvent::TrackChanged {
            track_id: Some(track.identifier().to_string()),
            queue_index: Some(self.current_index),
        });
        self.set_state(PlaybackState::Buffering);
        self.update_now_playing();

        track.prepare();
        track.will_start_playback();

        let generation = self.generation;
        self.activate_session(PendingActivation::StartPlayback { generation });
    }

    fn activate_session(&mut self, pending: PendingActivation) {
        match self.session {
            SessionState::Active => self.complete_activation(pending, true),
            SessionState::Activating => self.pending_activations.push(pending),
            SessionState::Inactive => {
                self.session = SessionState::Activating;
                match self.output.activate_session() {
                    SessionActivation::Granted => {
                        self.session = SessionState::Active;
                        self.complete_activation(pending, true);
                    }
                    SessionActivation::Denied => {
                        self.session = SessionState::Inactive;
                        self.complete_activation(pending, false);
                    }
                    SessionActivation::Pending => {
                        debug!("Session activation pending");
                        self.pending_activations.push(pending);
                    }
                }
            }
        }
    }

    fn complete_activation(&mut self, pending: PendingActivation, granted: bool) {
        match pending {
            PendingActivation::PrepareToPlay(callback) => {
                if !granted {
                    warn!("Audio session denied");
                    self.set_state(PlaybackState::Stopped);
                }
                callback(granted);
            }
            PendingActivation::StartPlayback { generation } => {
                if generation != self.generation {
                    return;
                }
                if granted {
                    self.schedule_buffers();
                } else {
                    warn!("Audio session denied, pausing");
                    self.pause();
                }
            }
            PendingActivation::Resume => {
                if !granted || self.current.is_none() {
                    return;
                }
                if self.in_flight > 0 {
                    if let Err(e) = self.output.play() {
                        self.on_output_failure(PlaybackError::AudioDevice(e.to_string()));
                        return;
                    }
                }
                self.set_state(PlaybackState::Playing);
                self.schedule_buffers();
            }
        }
    }

    fn deactivate_session(&mut self) {
        if self.session != SessionState::Inactive {
            self.output.deactivate_session();
            self.session = SessionState::Inactive;
        }
    }

    fn schedule_buffers(&mut self) {
        while self.in_flight < self.config.max_buffers_in_flight && self.can_schedule() {
            if !self.read_buffer() {
                break;
            }
        }
    }

    /// Read one buffer from the current track and schedule it.
    ///
    /// Returns `true` when a buffer was scheduled.
    fn read_buffer(&mut self) -> bool {
        let Some(track) = self.current.clone() else {
            return false;
        };
        if self.reached_end {
            self.did_reach_end();
            return false;
        }

        match track.read() {
            Ok(read) => {
                if read.status == ReadStatus::Eof {
                    self.reached_end = true;
                }
                match read.buffer {
                    Some(buffer) => self.schedule(buffer),
                    None if self.reached_end => {
                        self.did_reach_end();
                        false
                    }
                    None => {
                        self.did_starve();
                        false
                    }
                }
            }
            Err(TrackReadError::Buffering) => {
                self.did_starve();
                false
            }
            Err(TrackReadError::EndOfTrack) => {
                self.reached_end = true;
                self.did_reach_end();
                false
            }
            Err(TrackReadError::Internal(message)) => {
                warn!(track_id = %track.identifier(), %message, "Track read failed, skipping");
                self.publish(PlaybackEvent::TrackFailed {
                    track_id: track.identifier().to_string(),
                    message,
                });
                self.next_track();
                false
            }
        }
    }

    /// Nothing to read right now; only buffering once the output runs dry.
    fn did_starve(&mut self) {
        if self.in_flight == 0 {
            self.set_state(PlaybackState::Buffering);
        }
    }

    fn schedule(&mut self, buffer: PcmBuffer) -> bool {
        if let Err(e) = self.submit(buffer) {
            self.on_output_failure(e);
            return false;
        }
        self.set_state(PlaybackState::Playing);
        true
    }

    fn submit(&mut self, buffer: PcmBuffer) -> Result<()> {
        let format = buffer.format();
        if self.output_format != Some(format) {
            self.output.configure(format)?;
            self.output_format = Some(format);
        }

        let ticket = BufferTicket {
            generation: self.generation,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.output.schedule(buffer, ticket)?;
        self.in_flight += 1;

        if !self.output.is_rendering() {
            self.output.play()?;
        }
        Ok(())
    }

    fn on_output_failure(&mut self, error: PlaybackError) {
        error!(error = %error, "Audio output failed, stopping");
        self.stop();
    }

    fn on_buffer_completed(&mut self, ticket: BufferTicket) {
        if ticket.generation != self.generation {
            debug!(?ticket, generation = self.generation, "Ignoring stale buffer completion");
            return;
        }
        self.in_flight = self.in_flight.saturating_sub(1);

        if let Some(current) = &self.current {
            let elapsed = self.elapsed();
            self.publish(PlaybackEvent::Progress {
                track_id: current.identifier().to_string(),
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }

        if self.reached_end {
            self.did_reach_end();
        } else if self.can_schedule() {
            self.read_buffer();
        }
    }

    fn did_reach_end(&mut self) {
        if self.in_flight == 0 {
            debug!("Track drained");
            self.next_track();
        }
    }

    fn on_track_event(&mut self, event: TrackEvent) {
        match event.kind {
            TrackEventKind::HaveAdditionalContent => {
                if self.is_current(&event.track_id) {
                    self.schedule_buffers();
                }
            }
            TrackEventKind::DidFinishBuffering => self.prepare_lookahead(&event.track_id),
            TrackEventKind::EncounteredUnrecoverableError { message } => {
                if !self.is_current(&event.track_id) {
                    return;
                }
                warn!(track_id = %event.track_id, %message, "Current track failed, skipping");
                self.publish(PlaybackEvent::TrackFailed {
                    track_id: event.track_id,
                    message,
                });
                self.next_track();
            }
            TrackEventKind::MetadataUpdated => {
                if self.is_current(&event.track_id) {
                    self.update_now_playing();
                }
            }
        }
    }

    /// Once a track is fully buffered, start on the next one within reach.
    fn prepare_lookahead(&mut self, track_id: &str) {
        let Some(index) = self
            .queue
            .iter()
            .position(|track| track.identifier() == track_id)
        else {
            return;
        };

        let next = (self.current_index + 1).max(index + 1);
        if next - self.current_index <= self.config.lookahead && next < self.queue.len() {
            debug!(next, "Preparing lookahead track");
            self.queue[next].prepare();
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "Playback state changed");
        self.state = state;
        self.publish(PlaybackEvent::StateChanged { state });
        self.update_now_playing();
    }

    fn update_now_playing(&self) {
        let rendering = self.current.is_some() && self.output.is_rendering();
        let info = NowPlaying {
            track_id: self.current.as_ref().map(|t| t.identifier().to_string()),
            metadata: self.current.as_ref().map(|t| t.metadata()),
            elapsed: self.elapsed(),
            rate: if rendering { 1.0 } else { 0.0 },
            state: self.state,
        };
        self.now_playing.send_replace(info);
    }

    fn publish(&self, event: PlaybackEvent) {
        self.events.emit(CoreEvent::Playback(event)).ok();
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
