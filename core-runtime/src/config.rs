//! # Core Configuration Module
//!
//! Dependency injection for the playback core.
//!
//! ## Overview
//!
//! [`CoreConfig`] carries the storage directories and every host bridge the
//! streaming pipeline talks to. It is assembled with [`CoreConfigBuilder`],
//! which fails fast with actionable messages when a capability is missing.
//!
//! ## Required Dependencies
//!
//! - `TrackCatalog` - Track file descriptors, storage URLs and artwork
//! - `KeyUnwrapper` - Device-bound unwrap of track keys
//! - `HttpClient` - Streaming range downloads (desktop default: reqwest)
//!
//! ## Optional Dependencies
//!
//! - `TrackInfoStore` - Descriptor cache (desktop default: JSON files next to
//!   the audio, otherwise in memory)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .download_dir("/data/music/downloads")
//!     .temporary_dir("/tmp/music/streaming")
//!     .catalog(Arc::new(MyCatalog))
//!     .key_unwrapper(Arc::new(MyKeychain))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{HttpClient, KeyUnwrapper, TrackCatalog, TrackInfoStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the descriptor directory kept inside each storage directory.
pub const TRACK_INFO_DIR: &str = "track-info";

/// Core configuration for the playback core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Directory holding tracks saved for offline playback
    pub download_dir: PathBuf,

    /// Directory holding streamed tracks; the host may purge it
    pub temporary_dir: PathBuf,

    /// Remote catalog (required)
    pub catalog: Arc<dyn TrackCatalog>,

    /// HTTP client used for audio downloads (required, desktop default)
    pub http_client: Arc<dyn HttpClient>,

    /// Device-bound key unwrap (required)
    pub key_unwrapper: Arc<dyn KeyUnwrapper>,

    /// Track descriptor cache
    pub track_info_store: Arc<dyn TrackInfoStore>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("download_dir", &self.download_dir)
            .field("temporary_dir", &self.temporary_dir)
            .field("catalog", &"TrackCatalog { ... }")
            .field("http_client", &"HttpClient { ... }")
            .field("key_unwrapper", &"KeyUnwrapper { ... }")
            .field("track_info_store", &"TrackInfoStore { ... }")
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Both storage directories are set
    /// - The directories are distinct (finalized files are looked up in the
    ///   download directory first)
    pub fn validate(&self) -> Result<()> {
        if self.download_dir.as_os_str().is_empty() {
            return Err(Error::Config("Download directory cannot be empty".to_string()));
        }

        if self.temporary_dir.as_os_str().is_empty() {
            return Err(Error::Config("Temporary directory cannot be empty".to_string()));
        }

        if self.download_dir == self.temporary_dir {
            return Err(Error::Config(
                "Download and temporary directories must differ".to_string(),
            ));
        }

        Ok(())
    }

    /// Create both storage directories if they do not exist yet.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.download_dir, &self.temporary_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::Config(format!(
                    "Failed to create storage directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

fn capability_missing(capability: &str, message: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: message.to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::new()
        .map_err(|e| Error::Internal(format!("Failed to create default HttpClient: {}", e)))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(capability_missing(
        "HttpClient",
        "HttpClient implementation is required to stream audio. \
         Desktop: enable the 'desktop-shims' feature to use the default ReqwestHttpClient. \
         Mobile: inject the platform URL session.",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_track_info_store(
    download_dir: &Path,
    temporary_dir: &Path,
) -> Arc<dyn TrackInfoStore> {
    use bridge_desktop::JsonTrackInfoStore;

    Arc::new(JsonTrackInfoStore::new(
        download_dir.join(TRACK_INFO_DIR),
        temporary_dir.join(TRACK_INFO_DIR),
    ))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_track_info_store(
    _download_dir: &Path,
    _temporary_dir: &Path,
) -> Arc<dyn TrackInfoStore> {
    use bridge_traits::MemoryTrackInfoStore;

    Arc::new(MemoryTrackInfoStore::new())
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    download_dir: Option<PathBuf>,
    temporary_dir: Option<PathBuf>,
    catalog: Option<Arc<dyn TrackCatalog>>,
    http_client: Option<Arc<dyn HttpClient>>,
    key_unwrapper: Option<Arc<dyn KeyUnwrapper>>,
    track_info_store: Option<Arc<dyn TrackInfoStore>>,
}

impl CoreConfigBuilder {
    /// Sets the offline download directory.
    pub fn download_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.download_dir = Some(path.into());
        self
    }

    /// Sets the streaming (purgeable) directory.
    pub fn temporary_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.temporary_dir = Some(path.into());
        self
    }

    /// Sets the catalog implementation (required).
    pub fn catalog(mut self, catalog: Arc<dyn TrackCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the reqwest-based client is used when the
    /// `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the key unwrapper implementation (required).
    pub fn key_unwrapper(mut self, unwrapper: Arc<dyn KeyUnwrapper>) -> Self {
        self.key_unwrapper = Some(unwrapper);
        self
    }

    /// Sets the track descriptor cache.
    pub fn track_info_store(mut self, store: Arc<dyn TrackInfoStore>) -> Self {
        self.track_info_store = Some(store);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a directory is missing or invalid
    /// - [`Error::CapabilityMissing`] if a required bridge was not injected
    pub fn build(self) -> Result<CoreConfig> {
        let download_dir = self.download_dir.ok_or_else(|| {
            Error::Config("Download directory is required. Use .download_dir() to set it.".to_string())
        })?;

        let temporary_dir = self.temporary_dir.ok_or_else(|| {
            Error::Config(
                "Temporary directory is required. Use .temporary_dir() to set it.".to_string(),
            )
        })?;

        let catalog = self.catalog.ok_or_else(|| {
            capability_missing(
                "TrackCatalog",
                "TrackCatalog implementation is required to resolve track files. \
                 Inject the host's music service client.",
            )
        })?;

        let key_unwrapper = self.key_unwrapper.ok_or_else(|| {
            capability_missing(
                "KeyUnwrapper",
                "KeyUnwrapper implementation is required to decrypt tracks. \
                 Inject the platform key store (Keychain/Keystore).",
            )
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let track_info_store = self
            .track_info_store
            .unwrap_or_else(|| provide_default_track_info_store(&download_dir, &temporary_dir));

        let config = CoreConfig {
            download_dir,
            temporary_dir,
            catalog,
            http_client,
            key_unwrapper,
            track_info_store,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{
        ArtworkImage, BridgeError, HttpRequest, HttpResponse, HttpStreamResponse,
        StorageResolution, TrackFileInfo,
    };

    struct StubCatalog;

    #[async_trait]
    impl TrackCatalog for StubCatalog {
        async fn track_file_info(&self, track_id: &str) -> std::result::Result<TrackFileInfo, BridgeError> {
            Ok(TrackFileInfo::new(track_id, "file", "AAAA"))
        }

        async fn resolve_storage(&self, _file_id: &str) -> std::result::Result<StorageResolution, BridgeError> {
            Ok(StorageResolution { urls: vec![] })
        }

        async fn artwork(
            &self,
            _track_id: &str,
            _preferred_width: u32,
        ) -> std::result::Result<Option<ArtworkImage>, BridgeError> {
            Ok(None)
        }
    }

    struct StubKeys;

    #[async_trait]
    impl KeyUnwrapper for StubKeys {
        async fn unwrap_track_key(&self, wrapped: &[u8]) -> std::result::Result<Vec<u8>, BridgeError> {
            Ok(wrapped.to_vec())
        }
    }

    struct StubHttp;

    #[async_trait]
    impl HttpClient for StubHttp {
        async fn execute(&self, _request: HttpRequest) -> std::result::Result<HttpResponse, BridgeError> {
            Err(BridgeError::NotAvailable("offline".to_string()))
        }

        async fn execute_stream(
            &self,
            _request: HttpRequest,
        ) -> std::result::Result<HttpStreamResponse, BridgeError> {
            Err(BridgeError::NotAvailable("offline".to_string()))
        }
    }

    fn complete_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .download_dir("/data/downloads")
            .temporary_dir("/data/streaming")
            .catalog(Arc::new(StubCatalog))
            .key_unwrapper(Arc::new(StubKeys))
            .http_client(Arc::new(StubHttp))
    }

    #[test]
    fn test_build_with_all_bridges() {
        let config = complete_builder().build().unwrap();
        assert_eq!(config.download_dir, PathBuf::from("/data/downloads"));
        assert_eq!(config.temporary_dir, PathBuf::from("/data/streaming"));
    }

    #[test]
    fn test_missing_download_dir() {
        let result = CoreConfig::builder()
            .temporary_dir("/data/streaming")
            .catalog(Arc::new(StubCatalog))
            .key_unwrapper(Arc::new(StubKeys))
            .build();

        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("download_dir")));
    }

    #[test]
    fn test_missing_catalog_reports_capability() {
        let result = CoreConfig::builder()
            .download_dir("/data/downloads")
            .temporary_dir("/data/streaming")
            .key_unwrapper(Arc::new(StubKeys))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => assert_eq!(capability, "TrackCatalog"),
            other => panic!("expected CapabilityMissing, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_missing_key_unwrapper_reports_capability() {
        let result = CoreConfig::builder()
            .download_dir("/data/downloads")
            .temporary_dir("/data/streaming")
            .catalog(Arc::new(StubCatalog))
            .build();

        assert!(matches!(
            result,
            Err(Error::CapabilityMissing { ref capability, .. }) if capability == "KeyUnwrapper"
        ));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_http_client_without_shims() {
        let result = CoreConfig::builder()
            .download_dir("/data/downloads")
            .temporary_dir("/data/streaming")
            .catalog(Arc::new(StubCatalog))
            .key_unwrapper(Arc::new(StubKeys))
            .build();

        assert!(matches!(
            result,
            Err(Error::CapabilityMissing { ref capability, .. }) if capability == "HttpClient"
        ));
    }

    #[test]
    fn test_same_directories_rejected() {
        let result = complete_builder()
            .download_dir("/data/music")
            .temporary_dir("/data/music")
            .build();

        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("must differ")));
    }

    #[test]
    fn test_ensure_directories_creates_both() {
        let root = tempfile::tempdir().unwrap();
        let config = complete_builder()
            .download_dir(root.path().join("downloads"))
            .temporary_dir(root.path().join("streaming"))
            .build()
            .unwrap();

        config.ensure_directories().unwrap();
        assert!(config.download_dir.is_dir());
        assert!(config.temporary_dir.is_dir());
    }

    #[test]
    fn test_debug_hides_bridges() {
        let config = complete_builder().build().unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("TrackCatalog { ... }"));
        assert!(debug.contains("/data/downloads"));
    }
}
