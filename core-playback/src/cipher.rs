//! # Track Cipher
//!
//! AES in counter mode with a big-endian 128-bit counter and a fixed IV.
//!
//! The keystream position is a pure function of the number of bytes processed
//! since construction. There is no random access: restarting from byte 0
//! requires a fresh [`BlockCipherStream`].

use aes::{Aes128, Aes192, Aes256};
use cipher::{KeyIvInit, StreamCipher};
use std::fmt;

use crate::error::{PlaybackError, Result};

/// Initialization vector shared by every track file.
pub const TRACK_IV: [u8; 16] = [
    0x72, 0xe0, 0x67, 0xfb, 0xdd, 0xcb, 0xcf, 0x77, 0xeb, 0xe8, 0xbc, 0x64, 0x3f, 0x63, 0x0d, 0x93,
];

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Raw symmetric key of a track, as returned by the key unwrapper.
#[derive(Clone, PartialEq, Eq)]
pub struct TrackKey {
    bytes: Vec<u8>,
}

impl TrackKey {
    /// Wrap raw key bytes, rejecting lengths AES cannot use.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        match bytes.len() {
            16 | 24 | 32 => Ok(Self { bytes }),
            len => Err(PlaybackError::KeyDerivation(format!(
                "Invalid key length {} (expected 16, 24 or 32 bytes)",
                len
            ))),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackKey")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

enum CtrCipher {
    Aes128(Box<Aes128Ctr>),
    Aes192(Box<Aes192Ctr>),
    Aes256(Box<Aes256Ctr>),
}

/// Stateful counter-mode decryptor.
pub struct BlockCipherStream {
    cipher: CtrCipher,
    processed: u64,
}

impl BlockCipherStream {
    /// Build a cipher positioned at byte 0.
    pub fn new(key: &TrackKey) -> Result<Self> {
        let key = key.as_bytes();
        let derivation = |e: cipher::InvalidLength| {
            PlaybackError::KeyDerivation(format!("Cannot initialize AES-CTR: {}", e))
        };

        let cipher = match key.len() {
            16 => CtrCipher::Aes128(Box::new(
                Aes128Ctr::new_from_slices(key, &TRACK_IV).map_err(derivation)?,
            )),
            24 => CtrCipher::Aes192(Box::new(
                Aes192Ctr::new_from_slices(key, &TRACK_IV).map_err(derivation)?,
            )),
            32 => CtrCipher::Aes256(Box::new(
                Aes256Ctr::new_from_slices(key, &TRACK_IV).map_err(derivation)?,
            )),
            len => {
                return Err(PlaybackError::KeyDerivation(format!(
                    "Invalid key length {}",
                    len
                )))
            }
        };

        Ok(Self {
            cipher,
            processed: 0,
        })
    }

    /// Decrypt `chunk`, returning plaintext of the same length.
    pub fn decrypt(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let mut output = chunk.to_vec();
        self.decrypt_in_place(&mut output)?;
        Ok(output)
    }

    /// Decrypt `buffer` in place and advance the keystream by its length.
    pub fn decrypt_in_place(&mut self, buffer: &mut [u8]) -> Result<()> {
        let applied = match &mut self.cipher {
            CtrCipher::Aes128(c) => c.try_apply_keystream(buffer),
            CtrCipher::Aes192(c) => c.try_apply_keystream(buffer),
            CtrCipher::Aes256(c) => c.try_apply_keystream(buffer),
        };
        applied.map_err(|e| PlaybackError::Cipher(format!("Keystream exhausted: {}", e)))?;
        self.processed += buffer.len() as u64;
        Ok(())
    }

    /// Bytes consumed since construction.
    pub fn bytes_processed(&self) -> u64 {
        self.processed
    }
}

impl fmt::Debug for BlockCipherStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCipherStream")
            .field("processed", &self.processed)
            .finish()
    }
}
