//! Storage and Key Abstractions
//!
//! Track descriptors are cached per storage class, and wrapped track keys are
//! turned into raw cipher keys by a device-bound unwrap operation that only
//! the host can perform (Keychain, Keystore, TPM).

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::catalog::TrackFileInfo;
use crate::error::Result;

/// Where a piece of track data lives.
///
/// `Download` holds files the user saved for offline playback; `Temporary`
/// holds streaming leftovers that the host may purge at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageClass {
    Download,
    Temporary,
}

/// Cache of [`TrackFileInfo`] descriptors.
#[async_trait]
pub trait TrackInfoStore: Send + Sync {
    /// Look up the descriptor of a track in one storage class.
    async fn track_info(&self, class: StorageClass, track_id: &str) -> Result<Option<TrackFileInfo>>;

    /// Persist a descriptor in one storage class.
    async fn save_track_info(&self, class: StorageClass, info: TrackFileInfo) -> Result<()>;
}

/// In-memory descriptor cache.
///
/// Used when the host does not persist descriptors; everything is lost when
/// the process exits.
#[derive(Debug, Default)]
pub struct MemoryTrackInfoStore {
    entries: RwLock<HashMap<(StorageClass, String), TrackFileInfo>>,
}

impl MemoryTrackInfoStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackInfoStore for MemoryTrackInfoStore {
    async fn track_info(&self, class: StorageClass, track_id: &str) -> Result<Option<TrackFileInfo>> {
        Ok(self
            .entries
            .read()
            .get(&(class, track_id.to_string()))
            .cloned())
    }

    async fn save_track_info(&self, class: StorageClass, info: TrackFileInfo) -> Result<()> {
        self.entries
            .write()
            .insert((class, info.track_id.clone()), info);
        Ok(())
    }
}

/// Device-bound key unwrap.
///
/// # Security
///
/// Implementations must never log or persist the returned key.
#[async_trait]
pub trait KeyUnwrapper: Send + Sync {
    /// Turn a wrapped track key blob into the raw symmetric key.
    async fn unwrap_track_key(&self, wrapped: &[u8]) -> Result<Vec<u8>>;
}
