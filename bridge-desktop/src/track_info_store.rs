//! Track Info Store backed by JSON files

use async_trait::async_trait;
use bridge_traits::{
    catalog::TrackFileInfo,
    error::{BridgeError, Result},
    storage::{StorageClass, TrackInfoStore},
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Stores each descriptor as `<dir>/<trackId>.json`, one directory per
/// storage class.
///
/// Descriptors of downloaded tracks live next to the downloaded audio, so
/// they disappear together when the host clears a storage class.
pub struct JsonTrackInfoStore {
    download_dir: PathBuf,
    temporary_dir: PathBuf,
}

impl JsonTrackInfoStore {
    pub fn new(download_dir: impl Into<PathBuf>, temporary_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            temporary_dir: temporary_dir.into(),
        }
    }

    fn dir(&self, class: StorageClass) -> &Path {
        match class {
            StorageClass::Download => &self.download_dir,
            StorageClass::Temporary => &self.temporary_dir,
        }
    }

    fn path(&self, class: StorageClass, track_id: &str) -> PathBuf {
        let name: String = track_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir(class).join(format!("{}.json", name))
    }
}

#[async_trait]
impl TrackInfoStore for JsonTrackInfoStore {
    async fn track_info(&self, class: StorageClass, track_id: &str) -> Result<Option<TrackFileInfo>> {
        let path = self.path(class, track_id);
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BridgeError::Io(e)),
        };

        let info = serde_json::from_slice(&contents).map_err(|e| {
            BridgeError::OperationFailed(format!("Corrupt track info {}: {}", path.display(), e))
        })?;
        Ok(Some(info))
    }

    async fn save_track_info(&self, class: StorageClass, info: TrackFileInfo) -> Result<()> {
        let path = self.path(class, &info.track_id);
        fs::create_dir_all(self.dir(class)).await?;

        let contents = serde_json::to_vec(&info)
            .map_err(|e| BridgeError::OperationFailed(format!("Cannot encode track info: {}", e)))?;

        // Write then rename so readers never see a torn file
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, contents).await?;
        fs::rename(&staging, &path).await?;

        debug!(?class, track_id = %info.track_id, "Saved track info");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(root: &tempfile::TempDir) -> JsonTrackInfoStore {
        JsonTrackInfoStore::new(root.path().join("downloads"), root.path().join("streaming"))
    }

    #[tokio::test]
    async fn test_round_trip_per_class() {
        let root = tempfile::tempdir().unwrap();
        let store = store(&root);
        let info = TrackFileInfo::new("track:1", "a1b2", "AAECAw==");

        assert_eq!(store.track_info(StorageClass::Temporary, "track:1").await.unwrap(), None);

        store
            .save_track_info(StorageClass::Temporary, info.clone())
            .await
            .unwrap();
        assert_eq!(
            store.track_info(StorageClass::Temporary, "track:1").await.unwrap(),
            Some(info)
        );
        assert_eq!(store.track_info(StorageClass::Download, "track:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let store = store(&root);
        std::fs::create_dir_all(root.path().join("streaming")).unwrap();
        std::fs::write(root.path().join("streaming").join("t1.json"), b"{not json").unwrap();

        assert!(store.track_info(StorageClass::Temporary, "t1").await.is_err());
    }

    #[test]
    fn test_track_ids_are_sanitized() {
        let root = tempfile::tempdir().unwrap();
        let path = store(&root).path(StorageClass::Download, "../etc/passwd");
        assert_eq!(path.file_name().unwrap(), "___etc_passwd.json");
        assert!(path.starts_with(root.path().join("downloads")));
    }
}
