//! Symphonia media source over an encrypted track file.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use symphonia::core::io::MediaSource;

use crate::storage::IncrementalEncryptedFile;

/// Plaintext view of an [`IncrementalEncryptedFile`], header excluded.
///
/// The source is forward-only: the length is unknown while downloading and
/// the keystream cannot be repositioned, so the only supported seeks are a
/// rewind to the start and a position query.
pub struct FileMediaSource {
    file: Arc<IncrementalEncryptedFile>,
}

impl FileMediaSource {
    pub fn new(file: Arc<IncrementalEncryptedFile>) -> Self {
        Self { file }
    }

    fn position(&self) -> u64 {
        self.file
            .read_offset()
            .saturating_sub(self.file.header_length())
    }
}

impl Read for FileMediaSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file
            .read(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

impl Seek for FileMediaSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Start(0) => {
                self.file
                    .reset_read_cursor()
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                Ok(0)
            }
            SeekFrom::Current(0) => Ok(self.position()),
            other => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("encrypted stream cannot seek to {:?}", other),
            )),
        }
    }
}

impl MediaSource for FileMediaSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{BlockCipherStream, TrackKey};

    const HEADER: u64 = 16;

    fn key() -> TrackKey {
        TrackKey::from_bytes(vec![7u8; 16]).unwrap()
    }

    fn encrypted_source(plaintext: &[u8]) -> (tempfile::TempDir, FileMediaSource) {
        let dir = tempfile::tempdir().unwrap();
        let file = IncrementalEncryptedFile::open(dir.path(), "f1", key(), HEADER).unwrap();

        let mut clear = vec![0u8; HEADER as usize];
        clear.extend_from_slice(plaintext);
        let ciphertext = BlockCipherStream::new(&key()).unwrap().decrypt(&clear).unwrap();
        file.write(&ciphertext).unwrap();

        (dir, FileMediaSource::new(Arc::new(file)))
    }

    #[test]
    fn test_reads_plaintext_and_reports_position() {
        let (_dir, mut source) = encrypted_source(b"RIFF0000WAVE");

        let mut buf = [0u8; 4];
        source.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"RIFF");
        assert_eq!(source.seek(SeekFrom::Current(0)).unwrap(), 4);
    }

    #[test]
    fn test_rewind_restarts_stream() {
        let (_dir, mut source) = encrypted_source(b"RIFF0000WAVE");

        let mut first = Vec::new();
        source.read_to_end(&mut first).unwrap();
        assert_eq!(first, b"RIFF0000WAVE");

        assert_eq!(source.seek(SeekFrom::Start(0)).unwrap(), 0);
        let mut again = Vec::new();
        source.read_to_end(&mut again).unwrap();
        assert_eq!(again, first);
    }

    #[test]
    fn test_random_seek_is_unsupported() {
        let (_dir, mut source) = encrypted_source(b"RIFF0000WAVE");

        let err = source.seek(SeekFrom::Start(4)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        assert!(source.seek(SeekFrom::End(0)).is_err());
        assert!(!source.is_seekable());
        assert_eq!(source.byte_len(), None);
    }
}
