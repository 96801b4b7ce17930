//! # Playback Service
//!
//! Creates [`StreamingTrack`]s and keeps them alive between plays.
//!
//! The same track id always maps to the same instance while it is cached, so
//! a track prepared for lookahead is the one the engine later plays.

use core_runtime::config::CoreConfig;
use core_runtime::events::EventBus;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument};

use crate::config::StreamingConfig;
use crate::error::{PlaybackError, Result};
use crate::loader::TrackLoader;
use crate::track::{StreamingTrack, TrackDescriptor};

/// Factory and cache for streaming tracks.
pub struct PlaybackService {
    loader: Arc<TrackLoader>,
    config: StreamingConfig,
    runtime: Handle,
    events: Option<EventBus>,
    tracks: Mutex<LruCache<String, Arc<StreamingTrack>>>,
}

impl PlaybackService {
    /// Create a service from injected collaborators.
    ///
    /// Background loads are spawned on `runtime`.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::Config`] if `config` is invalid.
    pub fn new(core: &CoreConfig, config: StreamingConfig, runtime: Handle) -> Result<Self> {
        Self::with_loader(Arc::new(TrackLoader::from_config(core)), config, runtime)
    }

    pub fn with_loader(
        loader: Arc<TrackLoader>,
        config: StreamingConfig,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate().map_err(PlaybackError::Config)?;
        let capacity = NonZeroUsize::new(config.track_cache_capacity)
            .ok_or_else(|| PlaybackError::Config("track_cache_capacity must be > 0".to_string()))?;

        info!(capacity = capacity.get(), "Playback service ready");
        Ok(Self {
            loader,
            config,
            runtime,
            events: None,
            tracks: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Publish streaming events of every track created from now on.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn loader(&self) -> &Arc<TrackLoader> {
        &self.loader
    }

    /// The playable track for `descriptor`.
    ///
    /// Returns `None` for local tracks, and with `offline_only` for tracks
    /// whose downloaded file is not stored on this device.
    #[instrument(skip(self, descriptor), fields(track_id = %descriptor.id))]
    pub async fn audio_track(
        &self,
        descriptor: TrackDescriptor,
        offline_only: bool,
    ) -> Result<Option<Arc<StreamingTrack>>> {
        if descriptor.is_local {
            debug!("Local tracks cannot be streamed");
            return Ok(None);
        }

        if offline_only {
            let downloaded = self.loader.downloaded_info(&descriptor.id).await?;
            let available = downloaded
                .map(|info| self.loader.storage().is_locally_available(&info.file_id))
                .unwrap_or(false);
            if !available {
                debug!("Track is not available offline");
                return Ok(None);
            }
        }

        let mut tracks = self.tracks.lock();
        if let Some(track) = tracks.get(&descriptor.id) {
            return Ok(Some(track.clone()));
        }

        let id = descriptor.id.clone();
        let track = StreamingTrack::new(
            descriptor,
            self.loader.clone(),
            self.config.clone(),
            self.runtime.clone(),
            self.events.clone(),
        );
        tracks.put(id, track.clone());
        Ok(Some(track))
    }

    /// Number of cached tracks.
    pub fn cached_tracks(&self) -> usize {
        self.tracks.lock().len()
    }
}

impl std::fmt::Debug for PlaybackService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackService")
            .field("loader", &self.loader)
            .field("cached_tracks", &self.cached_tracks())
            .finish_non_exhaustive()
    }
}
