//! # Streaming Track
//!
//! [`AudioTrack`] implementation backed by an encrypted file that is fetched
//! over the network while it plays.
//!
//! ## Lifecycle
//!
//! ```text
//! New ─prepare()─▶ PreparingMetadata ─▶ Opening ─┬─ file complete ─▶ Ready
//!                        │                       └─▶ Loading ─finalize─▶ Ready
//!                        └──── retries exhausted ─────┴──────▶ Failed
//!
//! any ─did_finish_playback()─▶ Finished   (prepare() starts over)
//! ```
//!
//! Background work runs on the tokio runtime handed to the track. Each piece
//! of work captures the generation it was started in; `did_finish_playback`
//! bumps the generation and cancels the running load, so late completions are
//! dropped instead of touching released state.

use bridge_traits::catalog::TrackFileInfo;
use core_runtime::events::{CoreEvent, EventBus, StreamingEvent};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::StreamingConfig;
use crate::decoder::StreamingDecoder;
use crate::error::{PlaybackError, Result};
use crate::loader::TrackLoader;
use crate::storage::IncrementalEncryptedFile;
use crate::traits::{
    AudioTrack, TrackEvent, TrackEventKind, TrackEventSink, TrackMetadata, TrackRead,
    TrackReadError,
};

/// Catalog entry a streaming track is created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub album_artists: Vec<String>,
    pub duration_ms: u64,
    /// Files imported from the user's device; they have no remote copy.
    #[serde(default)]
    pub is_local: bool,
}

impl TrackDescriptor {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    fn initial_metadata(&self) -> TrackMetadata {
        let join = |names: &[String]| (!names.is_empty()).then(|| names.join(", "));
        TrackMetadata {
            title: Some(self.name.clone()),
            artist: join(&self.artists),
            album_title: self.album.clone(),
            album_artist: join(&self.album_artists),
            duration: Some(self.duration()),
            ..TrackMetadata::default()
        }
    }
}

/// Where a track is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackPhase {
    New,
    PreparingMetadata,
    Opening,
    Loading,
    Ready,
    Failed,
    Finished,
}

struct TrackState {
    phase: TrackPhase,
    generation: u64,
    /// Retries spent since the last `did_finish_playback`.
    retries: u32,
    preparing: bool,
    file_info: Option<TrackFileInfo>,
    file: Option<Arc<IncrementalEncryptedFile>>,
    decoder: Option<Arc<StreamingDecoder>>,
    load_token: Option<CancellationToken>,
}

/// A catalog track streamed into an encrypted local file.
pub struct StreamingTrack {
    descriptor: TrackDescriptor,
    loader: Arc<TrackLoader>,
    config: StreamingConfig,
    runtime: Handle,
    events: Option<EventBus>,
    this: Weak<StreamingTrack>,
    sink: RwLock<Option<TrackEventSink>>,
    metadata: RwLock<TrackMetadata>,
    state: Mutex<TrackState>,
}

impl StreamingTrack {
    pub fn new(
        descriptor: TrackDescriptor,
        loader: Arc<TrackLoader>,
        config: StreamingConfig,
        runtime: Handle,
        events: Option<EventBus>,
    ) -> Arc<Self> {
        let metadata = descriptor.initial_metadata();
        Arc::new_cyclic(|this| Self {
            descriptor,
            loader,
            config,
            runtime,
            events,
            this: this.clone(),
            sink: RwLock::new(None),
            metadata: RwLock::new(metadata),
            state: Mutex::new(TrackState {
                phase: TrackPhase::New,
                generation: 0,
                retries: 0,
                preparing: false,
                file_info: None,
                file: None,
                decoder: None,
                load_token: None,
            }),
        })
    }

    pub fn descriptor(&self) -> &TrackDescriptor {
        &self.descriptor
    }

    pub fn phase(&self) -> TrackPhase {
        self.state.lock().phase
    }

    /// Retries spent since the track was last released.
    pub fn retries(&self) -> u32 {
        self.state.lock().retries
    }

    /// The track's file, once opened.
    pub fn file(&self) -> Option<Arc<IncrementalEncryptedFile>> {
        self.state.lock().file.clone()
    }

    fn emit(&self, kind: TrackEventKind) {
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink.emit(TrackEvent::new(self.descriptor.id.clone(), kind));
        }
    }

    fn publish(&self, event: StreamingEvent) {
        if let Some(events) = &self.events {
            events.emit(CoreEvent::Streaming(event)).ok();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    fn fail(&self, what: &str, error: &PlaybackError) {
        let message = format!(
            "An error has occurred while trying to play \"{}\". {}: {}",
            self.descriptor.name, what, error
        );
        error!(track_id = %self.descriptor.id, %message, "Track failed");
        self.emit(TrackEventKind::EncounteredUnrecoverableError { message });
    }

    /// Spend one retry if any is left.
    fn take_retry(state: &mut TrackState, max_retries: u32) -> bool {
        if state.retries < max_retries {
            state.retries += 1;
            true
        } else {
            false
        }
    }

    // ------------------------------------------------------------------------
    // Prepare
    // ------------------------------------------------------------------------

    fn spawn_prepare(&self, generation: u64) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        self.runtime.spawn(async move {
            let result = this.open(generation).await;
            match result {
                Ok((info, file)) => this.did_finish_prepare(generation, info, file),
                Err(e) => this.did_fail_prepare(generation, e),
            }
        });
    }

    #[instrument(skip(self, generation), fields(track_id = %self.descriptor.id))]
    async fn open(&self, generation: u64) -> Result<(TrackFileInfo, IncrementalEncryptedFile)> {
        let info = self.loader.resolve_file_info(&self.descriptor.id).await?;
        {
            let mut state = self.state.lock();
            if state.generation == generation {
                state.phase = TrackPhase::Opening;
            }
        }
        let key = self.loader.unwrap_key(&info).await?;
        let file = self
            .loader
            .open_file(&info, key, self.config.header_length)?;
        Ok((info, file))
    }

    fn did_finish_prepare(&self, generation: u64, info: TrackFileInfo, file: IncrementalEncryptedFile) {
        let file = Arc::new(file);
        let decoder = Arc::new(StreamingDecoder::new(file.clone(), &self.config));

        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(track_id = %self.descriptor.id, "Dropping stale prepare result");
            return;
        }
        state.preparing = false;
        state.file_info = Some(info);
        state.file = Some(file.clone());
        state.decoder = Some(decoder.clone());

        if file.is_complete() {
            state.phase = TrackPhase::Ready;
            drop(state);
            info!(track_id = %self.descriptor.id, "Track file already complete");
            decoder.mark_source_finished();
            self.emit(TrackEventKind::HaveAdditionalContent);
            self.emit(TrackEventKind::DidFinishBuffering);
        } else {
            state.phase = TrackPhase::Loading;
            drop(state);
            self.start_load(generation, file.available_length());
        }
    }

    fn did_fail_prepare(&self, generation: u64, error: PlaybackError) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }

        if !error.is_key_error() && Self::take_retry(&mut state, self.config.max_retries) {
            drop(state);
            warn!(track_id = %self.descriptor.id, error = %error, "Prepare failed, retrying");
            self.spawn_prepare(generation);
        } else {
            state.preparing = false;
            state.phase = TrackPhase::Failed;
            drop(state);
            self.fail("Unable to prepare audio file", &error);
        }
    }

    fn request_artwork(&self) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let width = self.config.artwork_width;
        self.runtime.spawn(async move {
            match this.loader.artwork(&this.descriptor.id, width).await {
                Ok(Some(artwork)) => {
                    this.metadata.write().artwork = Some(artwork);
                    this.emit(TrackEventKind::MetadataUpdated);
                }
                Ok(None) => {}
                Err(e) => debug!(track_id = %this.descriptor.id, error = %e, "No artwork"),
            }
        });
    }

    // ------------------------------------------------------------------------
    // Load
    // ------------------------------------------------------------------------

    fn start_load(&self, generation: u64, offset: u64) {
        let Some(this) = self.this.upgrade() else {
            return;
        };

        let token = CancellationToken::new();
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            if let Some(previous) = state.load_token.replace(token.clone()) {
                previous.cancel();
            }
        }

        self.publish(StreamingEvent::LoadStarted {
            track_id: self.descriptor.id.clone(),
            offset,
        });

        self.runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(track_id = %this.descriptor.id, "Load cancelled");
                }
                result = this.load(generation, offset) => {
                    this.did_complete_load(generation, result);
                }
            }
        });
    }

    #[instrument(skip(self, generation), fields(track_id = %self.descriptor.id))]
    async fn load(&self, generation: u64, offset: u64) -> Result<u64> {
        let (info, file, decoder) = {
            let state = self.state.lock();
            match (&state.file_info, &state.file, &state.decoder) {
                (Some(info), Some(file), Some(decoder)) if state.generation == generation => {
                    (info.clone(), file.clone(), decoder.clone())
                }
                _ => return Err(PlaybackError::Internal("Track was released".to_string())),
            }
        };

        let mut response = self.loader.open_stream(&info.file_id, offset).await?;
        if let Some(length) = response.content_length.filter(|length| *length > 0) {
            file.update_expected_length(length, response.is_partial());
        }

        let mut received = 0u64;
        while let Some(chunk) = response.body.next().await {
            let chunk = chunk.map_err(|e| PlaybackError::NetworkLoad(e.to_string()))?;
            file.write(&chunk)?;
            decoder.notify_source_updated();
            received += chunk.len() as u64;

            if !self.is_current(generation) {
                return Err(PlaybackError::Internal("Track was released".to_string()));
            }
            self.emit(TrackEventKind::HaveAdditionalContent);
        }

        debug!(received, "Stream drained");
        Ok(received)
    }

    fn did_complete_load(&self, generation: u64, result: Result<u64>) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        state.load_token = None;
        let (Some(file), Some(decoder), Some(info)) =
            (state.file.clone(), state.decoder.clone(), state.file_info.clone())
        else {
            return;
        };

        match result {
            Ok(bytes) => {
                drop(state);
                let finalized = file.finalize();

                // Finalizing syncs to disk; the track may be released meanwhile.
                let mut state = self.state.lock();
                if state.generation != generation {
                    debug!(track_id = %self.descriptor.id, "Dropping stale load completion");
                    return;
                }
                if let Err(e) = finalized {
                    state.phase = TrackPhase::Failed;
                    drop(state);
                    self.fail("Unable to store audio file", &e);
                    return;
                }
                state.phase = TrackPhase::Ready;
                drop(state);

                decoder.mark_source_finished();
                info!(track_id = %self.descriptor.id, bytes, "Finished loading");
                self.publish(StreamingEvent::LoadFinished {
                    track_id: self.descriptor.id.clone(),
                    bytes,
                });
                self.publish(StreamingEvent::FileFinalized {
                    track_id: self.descriptor.id.clone(),
                    file_id: info.file_id,
                    length: file.expected_length(),
                });
                self.emit(TrackEventKind::DidFinishBuffering);
            }
            Err(error) => {
                let will_retry =
                    !file.is_complete() && Self::take_retry(&mut state, self.config.max_retries);
                if !will_retry {
                    state.phase = TrackPhase::Failed;
                }
                drop(state);

                self.publish(StreamingEvent::LoadFailed {
                    track_id: self.descriptor.id.clone(),
                    message: error.to_string(),
                    will_retry,
                });

                if will_retry {
                    let offset = file.available_length();
                    warn!(track_id = %self.descriptor.id, error = %error, offset, "Load failed, resuming");
                    self.start_load(generation, offset);
                } else if self.is_current(generation) {
                    self.fail("Unable to stream audio file", &error);
                }
            }
        }
    }
}

impl AudioTrack for StreamingTrack {
    fn identifier(&self) -> &str {
        &self.descriptor.id
    }

    fn is_live(&self) -> bool {
        false
    }

    fn duration(&self) -> Duration {
        self.descriptor.duration()
    }

    fn metadata(&self) -> TrackMetadata {
        self.metadata.read().clone()
    }

    fn configure(&self, sink: TrackEventSink) {
        *self.sink.write() = Some(sink);
    }

    fn read(&self) -> std::result::Result<TrackRead, TrackReadError> {
        let decoder = self.state.lock().decoder.clone();
        let Some(decoder) = decoder else {
            return Err(TrackReadError::Buffering);
        };

        match decoder.read() {
            Ok(read) => Ok(read),
            Err(PlaybackError::NotEnoughData) => Err(TrackReadError::Buffering),
            Err(e) => Err(TrackReadError::Internal(e.to_string())),
        }
    }

    fn seek_to(&self, time: Duration) {
        if !time.is_zero() {
            debug!(track_id = %self.descriptor.id, ?time, "Ignoring seek to non-zero offset");
            return;
        }
        self.will_start_playback();
    }

    fn prepare(&self) {
        let generation = {
            let mut state = self.state.lock();
            if state.file_info.is_some() || state.preparing {
                return;
            }
            state.preparing = true;
            state.phase = TrackPhase::PreparingMetadata;
            state.generation
        };

        debug!(track_id = %self.descriptor.id, "Preparing track");
        self.spawn_prepare(generation);
        self.request_artwork();
    }

    fn will_start_playback(&self) {
        let decoder = self.state.lock().decoder.clone();
        if let Some(decoder) = decoder {
            if let Err(e) = decoder.rewind() {
                warn!(track_id = %self.descriptor.id, error = %e, "Rewind failed");
            }
        }
    }

    fn did_pause_playback(&self) {
        debug!(track_id = %self.descriptor.id, "Playback paused");
    }

    fn did_stop_playback(&self) {
        debug!(track_id = %self.descriptor.id, "Playback stopped");
    }

    fn did_finish_playback(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        if let Some(token) = state.load_token.take() {
            token.cancel();
        }
        state.file_info = None;
        state.file = None;
        state.decoder = None;
        state.retries = 0;
        state.preparing = false;
        state.phase = TrackPhase::Finished;
        debug!(track_id = %self.descriptor.id, "Track released");
    }
}

impl std::fmt::Debug for StreamingTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingTrack")
            .field("id", &self.descriptor.id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
