//! Catalog Service Abstraction
//!
//! The remote music service is consumed through a small request/response
//! interface: per-track file descriptors, CDN storage resolution and artwork.
//! Authentication and token refresh stay inside the host implementation.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Descriptor tying a catalog track to its encrypted audio file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackFileInfo {
    /// Catalog track identifier
    pub track_id: String,
    /// Identifier of the encrypted audio file (also its on-disk name)
    pub file_id: String,
    /// Base64 of the device-wrapped track key
    pub track_key: String,
}

impl TrackFileInfo {
    pub fn new(
        track_id: impl Into<String>,
        file_id: impl Into<String>,
        track_key: impl Into<String>,
    ) -> Self {
        Self {
            track_id: track_id.into(),
            file_id: file_id.into(),
            track_key: track_key.into(),
        }
    }

    /// Decode the wrapped key blob.
    pub fn wrapped_key(&self) -> Result<Vec<u8>> {
        STANDARD.decode(self.track_key.as_bytes()).map_err(|e| {
            BridgeError::OperationFailed(format!(
                "Track key for {} is not valid base64: {}",
                self.track_id, e
            ))
        })
    }
}

/// CDN locations for one audio file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageResolution {
    pub urls: Vec<String>,
}

impl StorageResolution {
    /// First URL offered by the service.
    pub fn primary_url(&self) -> Result<&str> {
        self.urls
            .first()
            .map(String::as_str)
            .ok_or_else(|| BridgeError::OperationFailed("Storage resolution returned no URL".to_string()))
    }
}

/// Encoded artwork image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtworkImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
}

/// Remote catalog trait
#[async_trait]
pub trait TrackCatalog: Send + Sync {
    /// Fetch the file descriptor (file id + wrapped key) for a track.
    async fn track_file_info(&self, track_id: &str) -> Result<TrackFileInfo>;

    /// Resolve the download location of an audio file.
    async fn resolve_storage(&self, file_id: &str) -> Result<StorageResolution>;

    /// Fetch album artwork closest to `preferred_width`.
    ///
    /// `Ok(None)` means the track has no artwork.
    async fn artwork(&self, track_id: &str, preferred_width: u32) -> Result<Option<ArtworkImage>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_key_decodes_base64() {
        let info = TrackFileInfo::new("track", "a1b2c3", "AAECAw==");
        assert_eq!(info.wrapped_key().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_wrapped_key_rejects_garbage() {
        let info = TrackFileInfo::new("track", "a1b2c3", "not base64!");
        assert!(info.wrapped_key().is_err());
    }

    #[test]
    fn test_track_file_info_serializes_camel_case() {
        let info = TrackFileInfo::new("t1", "f1", "k1");
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"trackId\":\"t1\""));
        assert!(json.contains("\"fileId\":\"f1\""));
        assert!(json.contains("\"trackKey\":\"k1\""));
    }

    #[test]
    fn test_primary_url() {
        let empty = StorageResolution { urls: vec![] };
        assert!(empty.primary_url().is_err());

        let resolved = StorageResolution {
            urls: vec!["https://cdn/a".into(), "https://cdn/b".into()],
        };
        assert_eq!(resolved.primary_url().unwrap(), "https://cdn/a");
    }
}
