//! # Track Loader
//!
//! Collaborator calls a streaming track needs while it prepares and loads:
//! descriptor lookup, key unwrap, file open, storage resolution and the
//! ranged download itself.
//!
//! The loader is shared by the [`PlaybackService`](crate::service::PlaybackService)
//! and every track it creates; it holds no per-track state.

use bridge_traits::catalog::{ArtworkImage, TrackCatalog, TrackFileInfo};
use bridge_traits::http::{HttpClient, HttpRequest, HttpStreamResponse};
use bridge_traits::storage::{KeyUnwrapper, StorageClass, TrackInfoStore};
use core_runtime::config::CoreConfig;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::cipher::TrackKey;
use crate::error::{PlaybackError, Result};
use crate::storage::{IncrementalEncryptedFile, StorageDirs};

/// Resolves, opens and downloads track files.
pub struct TrackLoader {
    catalog: Arc<dyn TrackCatalog>,
    http_client: Arc<dyn HttpClient>,
    key_unwrapper: Arc<dyn KeyUnwrapper>,
    info_store: Arc<dyn TrackInfoStore>,
    storage: StorageDirs,
}

impl TrackLoader {
    pub fn new(
        catalog: Arc<dyn TrackCatalog>,
        http_client: Arc<dyn HttpClient>,
        key_unwrapper: Arc<dyn KeyUnwrapper>,
        info_store: Arc<dyn TrackInfoStore>,
        storage: StorageDirs,
    ) -> Self {
        Self {
            catalog,
            http_client,
            key_unwrapper,
            info_store,
            storage,
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(
            config.catalog.clone(),
            config.http_client.clone(),
            config.key_unwrapper.clone(),
            config.track_info_store.clone(),
            StorageDirs::from_config(config),
        )
    }

    pub fn storage(&self) -> &StorageDirs {
        &self.storage
    }

    /// Descriptor of a track's encrypted file.
    ///
    /// Looks in the download store, then the temporary store, then asks the
    /// catalog and caches its answer in the temporary store.
    #[instrument(skip(self))]
    pub async fn resolve_file_info(&self, track_id: &str) -> Result<TrackFileInfo> {
        for class in [StorageClass::Download, StorageClass::Temporary] {
            if let Some(info) = self.info_store.track_info(class, track_id).await? {
                debug!(?class, file_id = %info.file_id, "Found stored track info");
                return Ok(info);
            }
        }

        let info = self.catalog.track_file_info(track_id).await?;
        if let Err(e) = self
            .info_store
            .save_track_info(StorageClass::Temporary, info.clone())
            .await
        {
            warn!(error = %e, "Failed to cache track info");
        }
        Ok(info)
    }

    /// Stored download descriptor, if the track was saved for offline use.
    pub async fn downloaded_info(&self, track_id: &str) -> Result<Option<TrackFileInfo>> {
        Ok(self
            .info_store
            .track_info(StorageClass::Download, track_id)
            .await?)
    }

    /// Unwrap the track key carried by `info`.
    pub async fn unwrap_key(&self, info: &TrackFileInfo) -> Result<TrackKey> {
        let wrapped = info.wrapped_key()?;
        let raw = self
            .key_unwrapper
            .unwrap_track_key(&wrapped)
            .await
            .map_err(|e| PlaybackError::KeyDerivation(format!("Cannot unwrap track key: {}", e)))?;
        TrackKey::from_bytes(raw)
    }

    /// Open the encrypted file for `info` wherever it is stored.
    pub fn open_file(
        &self,
        info: &TrackFileInfo,
        key: TrackKey,
        header_length: u64,
    ) -> Result<IncrementalEncryptedFile> {
        let dir = self.storage.location_dir(&info.file_id);
        IncrementalEncryptedFile::open(dir, &info.file_id, key, header_length)
    }

    /// Start downloading `file_id` from byte `offset`.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::NetworkLoad`] on a non-success status, or when a
    /// resumed request is answered with the whole file.
    #[instrument(skip(self))]
    pub async fn open_stream(&self, file_id: &str, offset: u64) -> Result<HttpStreamResponse> {
        let resolution = self.catalog.resolve_storage(file_id).await?;
        let url = resolution.primary_url()?;

        let response = self
            .http_client
            .execute_stream(HttpRequest::get(url).range_from(offset))
            .await?;

        if !response.is_success() {
            return Err(PlaybackError::NetworkLoad(format!(
                "Storage returned status {}",
                response.status
            )));
        }
        if offset > 0 && !response.is_partial() {
            return Err(PlaybackError::NetworkLoad(format!(
                "Range request from {} answered with status {}",
                offset, response.status
            )));
        }

        debug!(status = response.status, content_length = ?response.content_length, "Stream opened");
        Ok(response)
    }

    pub async fn artwork(&self, track_id: &str, preferred_width: u32) -> Result<Option<ArtworkImage>> {
        Ok(self.catalog.artwork(track_id, preferred_width).await?)
    }
}

impl std::fmt::Debug for TrackLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackLoader")
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}
