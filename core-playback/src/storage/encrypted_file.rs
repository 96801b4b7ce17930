//! Encrypted track file that is read while it is still being written.
//!
//! ## Byte accounting
//!
//! Offsets are raw file offsets: the opaque header at the start of the file
//! counts towards every length, but is never returned by [`read`].
//!
//! ```text
//! 0          header_length                 read_offset        available_length
//! |--header--|------------ container bytes ---|-------------------|
//!                                             ^ next read         ^ write frontier
//! ```
//!
//! The cipher is a counter-mode keystream, so every byte between 0 and the
//! read cursor must have passed through it exactly once, header included.
//!
//! [`read`]: IncrementalEncryptedFile::read

use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use super::{final_file_name, partial_file_name};
use crate::cipher::{BlockCipherStream, TrackKey};
use crate::error::{PlaybackError, Result};

struct FileState {
    final_path: PathBuf,
    partial_path: PathBuf,
    reader: File,
    /// Present until the file is finalized.
    writer: Option<File>,
    key: TrackKey,
    cipher: BlockCipherStream,
    read_offset: u64,
    write_offset: u64,
    /// 0 while unknown.
    expected_length: u64,
    finalized: bool,
}

impl FileState {
    fn current_available_length(&self) -> u64 {
        if self.writer.is_some() {
            self.write_offset
        } else {
            self.expected_length
        }
    }
}

/// A track's encrypted audio file, shared by its download task (writer) and
/// its decoder (reader).
///
/// All operations take the same lock, so reads and writes interleave at chunk
/// granularity and [`finalize`](Self::finalize) is a barrier for both.
pub struct IncrementalEncryptedFile {
    file_id: String,
    header_length: u64,
    state: Mutex<FileState>,
}

impl IncrementalEncryptedFile {
    /// Open the file for `file_id` inside `dir`.
    ///
    /// - a finalized file is opened read-only;
    /// - an existing `.partial` file is resumed, the write cursor at its end;
    /// - otherwise an empty `.partial` file is created.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::KeyDerivation`] if `key` cannot drive the cipher,
    /// [`PlaybackError::Io`] if the file cannot be opened or created.
    #[instrument(skip(dir, key), fields(file_id = %file_id))]
    pub fn open(dir: &Path, file_id: &str, key: TrackKey, header_length: u64) -> Result<Self> {
        let cipher = BlockCipherStream::new(&key)?;

        let final_path = dir.join(final_file_name(file_id));
        let partial_path = dir.join(partial_file_name(file_id));

        let (reader, writer, write_offset, expected_length, finalized) = if final_path.is_file() {
            let reader = File::open(&final_path)?;
            let length = reader.metadata()?.len();
            debug!(length, "Opened finalized file");
            (reader, None, length, length, true)
        } else {
            fs::create_dir_all(dir)?;
            let resumed = partial_path.is_file();
            let writer = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&partial_path)?;
            let write_offset = writer.metadata()?.len();
            let reader = File::open(&partial_path)?;
            if resumed {
                debug!(write_offset, "Resuming partial file");
            } else {
                debug!("Created partial file");
            }
            (reader, Some(writer), write_offset, 0, false)
        };

        Ok(Self {
            file_id: file_id.to_string(),
            header_length,
            state: Mutex::new(FileState {
                final_path,
                partial_path,
                reader,
                writer,
                key,
                cipher,
                read_offset: 0,
                write_offset,
                expected_length,
                finalized,
            }),
        })
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn header_length(&self) -> u64 {
        self.header_length
    }

    /// Append a chunk of ciphertext.
    pub fn write(&self, chunk: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let writer = state.writer.as_mut().ok_or_else(|| {
            PlaybackError::Internal(format!("File {} is finalized", self.file_id))
        })?;
        writer.write_all(chunk)?;
        state.write_offset += chunk.len() as u64;
        Ok(())
    }

    /// Record the length announced by the server.
    ///
    /// `incremental` lengths come from range responses and count from the
    /// current write cursor; absolute lengths are the whole file.
    pub fn update_expected_length(&self, length: u64, incremental: bool) {
        let mut state = self.state.lock();
        state.expected_length = if incremental {
            state.write_offset + length
        } else {
            length
        };
    }

    /// Decrypt the next bytes after the read cursor into `buf`.
    ///
    /// Returns 0 when nothing past the header is available yet. While the
    /// cursor is inside the header, the header bytes are read and decrypted
    /// along with up to `buf.len()` container bytes, then dropped.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock();
        let total = state.current_available_length();
        if total <= self.header_length {
            return Ok(0);
        }

        let available = total.saturating_sub(state.read_offset);
        if available == 0 {
            return Ok(0);
        }

        let header_remaining = self.header_length.saturating_sub(state.read_offset);
        let window = (buf.len() as u64 + header_remaining).min(available) as usize;

        let mut raw = vec![0u8; window];
        let offset = state.read_offset;
        state.reader.seek(SeekFrom::Start(offset))?;
        state.reader.read_exact(&mut raw)?;
        state.cipher.decrypt_in_place(&mut raw)?;
        state.read_offset += window as u64;

        let skip = (header_remaining as usize).min(window);
        let returned = window - skip;
        buf[..returned].copy_from_slice(&raw[skip..]);
        Ok(returned)
    }

    /// Move the read cursor back to byte 0 with a fresh cipher.
    pub fn reset_read_cursor(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.cipher = BlockCipherStream::new(&state.key)?;
        state.read_offset = 0;
        Ok(())
    }

    /// Promote the partial file to its final name.
    ///
    /// The read cursor survives; a finalized file is left untouched.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::StorageFatal`] if the file cannot be flushed, renamed
    /// or reopened. The file is unusable afterwards.
    #[instrument(skip(self), fields(file_id = %self.file_id))]
    pub fn finalize(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.finalized {
            return Ok(());
        }

        let fatal = |message: String| {
            warn!(%message, "Failed to finalize file");
            PlaybackError::StorageFatal {
                file_id: self.file_id.clone(),
                message,
            }
        };

        if let Some(mut writer) = state.writer.take() {
            writer
                .flush()
                .and_then(|_| writer.sync_all())
                .map_err(|e| fatal(format!("flush failed: {}", e)))?;
        }

        fs::rename(&state.partial_path, &state.final_path)
            .map_err(|e| fatal(format!("rename failed: {}", e)))?;

        let reader =
            File::open(&state.final_path).map_err(|e| fatal(format!("reopen failed: {}", e)))?;
        let length = reader
            .metadata()
            .map_err(|e| fatal(format!("stat failed: {}", e)))?
            .len();

        state.reader = reader;
        state.expected_length = length;
        state.finalized = true;

        info!(length, read_offset = state.read_offset, "File finalized");
        Ok(())
    }

    /// Bytes readable right now, header included.
    pub fn available_length(&self) -> u64 {
        self.state.lock().current_available_length()
    }

    /// Raw offset of the read cursor, header included.
    pub fn read_offset(&self) -> u64 {
        self.state.lock().read_offset
    }

    /// Bytes written so far.
    pub fn write_offset(&self) -> u64 {
        self.state.lock().write_offset
    }

    /// Announced total length, 0 while unknown.
    pub fn expected_length(&self) -> u64 {
        self.state.lock().expected_length
    }

    /// Bytes available past the read cursor.
    pub fn unread_length(&self) -> u64 {
        let state = self.state.lock();
        state
            .current_available_length()
            .saturating_sub(state.read_offset)
    }

    /// Whether the file has been finalized.
    pub fn is_complete(&self) -> bool {
        self.state.lock().finalized
    }

    /// Current on-disk path.
    pub fn path(&self) -> PathBuf {
        let state = self.state.lock();
        if state.finalized {
            state.final_path.clone()
        } else {
            state.partial_path.clone()
        }
    }
}

impl std::fmt::Debug for IncrementalEncryptedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("IncrementalEncryptedFile")
            .field("file_id", &self.file_id)
            .field("read_offset", &state.read_offset)
            .field("write_offset", &state.write_offset)
            .field("expected_length", &state.expected_length)
            .field("finalized", &state.finalized)
            .finish()
    }
}
