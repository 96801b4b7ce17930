//! # Track Storage
//!
//! On-disk layout of encrypted track files.
//!
//! Every file lives in one of two directories, see [`StorageClass`]:
//!
//! ```text
//! <download_dir>/<fileId>            finalized, saved for offline playback
//! <temporary_dir>/<fileId>           finalized, streamed
//! <temporary_dir>/<fileId>.partial   download in progress
//! ```
//!
//! A partial file is promoted by an atomic rename once its download
//! completes, so a `.partial` file left behind by a previous process is
//! resumed rather than refetched.

mod encrypted_file;

pub use encrypted_file::IncrementalEncryptedFile;

use bridge_traits::storage::StorageClass;
use core_runtime::config::CoreConfig;
use std::path::{Path, PathBuf};

/// Suffix of files whose download has not completed.
pub const PARTIAL_SUFFIX: &str = "partial";

/// Name of a finalized file.
pub fn final_file_name(file_id: &str) -> String {
    file_id.to_string()
}

/// Name of a file that is still downloading.
pub fn partial_file_name(file_id: &str) -> String {
    format!("{}.{}", file_id, PARTIAL_SUFFIX)
}

/// The two storage directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDirs {
    download_dir: PathBuf,
    temporary_dir: PathBuf,
}

impl StorageDirs {
    pub fn new(download_dir: impl Into<PathBuf>, temporary_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            temporary_dir: temporary_dir.into(),
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(&config.download_dir, &config.temporary_dir)
    }

    /// Directory of a storage class.
    pub fn dir(&self, class: StorageClass) -> &Path {
        match class {
            StorageClass::Download => &self.download_dir,
            StorageClass::Temporary => &self.temporary_dir,
        }
    }

    /// Where a file lives: the download directory if it was finalized there,
    /// the temporary directory otherwise.
    pub fn storage_location(&self, file_id: &str) -> StorageClass {
        if self.download_dir.join(final_file_name(file_id)).is_file() {
            StorageClass::Download
        } else {
            StorageClass::Temporary
        }
    }

    /// Directory a file should be opened from.
    pub fn location_dir(&self, file_id: &str) -> &Path {
        self.dir(self.storage_location(file_id))
    }

    /// Whether a finalized copy exists in either directory.
    pub fn is_locally_available(&self, file_id: &str) -> bool {
        [&self.download_dir, &self.temporary_dir]
            .iter()
            .any(|dir| dir.join(final_file_name(file_id)).is_file())
    }

    /// Whether a finalized copy exists in one storage class.
    pub fn is_stored_in(&self, class: StorageClass, file_id: &str) -> bool {
        self.dir(class).join(final_file_name(file_id)).is_file()
    }
}
