//! # Playback Error Types
//!
//! Errors raised along the streaming pipeline: cipher, encrypted file,
//! decoder, network load and output device.

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Errors that can occur during playback operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Cipher Errors
    // ========================================================================
    /// The track key cannot be used to build the cipher.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// The cipher context failed while processing data.
    #[error("Cipher error: {0}")]
    Cipher(String),

    // ========================================================================
    // Stream Errors
    // ========================================================================
    /// Not enough bytes have arrived to decode anything yet.
    #[error("Not enough data buffered")]
    NotEnoughData,

    /// The track has no more frames.
    #[error("End of track")]
    EndOfTrack,

    /// Fetching the encrypted file failed.
    #[error("Network load failed: {0}")]
    NetworkLoad(String),

    /// A track failed past its retry budget.
    #[error("Track {track} cannot be played: {message}")]
    UnrecoverableTrack { track: String, message: String },

    /// Promoting a finished download failed; the file is unusable.
    #[error("Storage failure for {file_id}: {message}")]
    StorageFatal { file_id: String, message: String },

    // ========================================================================
    // Format/Codec Errors
    // ========================================================================
    /// Audio format is not recognized or cannot be parsed.
    #[error("Unsupported or invalid audio format: {0}")]
    InvalidFormat(String),

    /// Decoder encountered an internal error.
    #[error("Decoder error: {0}")]
    Decoder(String),

    // ========================================================================
    // Platform Errors
    // ========================================================================
    /// The audio output failed.
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// A host bridge call failed.
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::NetworkLoad(_) | PlaybackError::NotEnoughData => true,
            PlaybackError::Bridge(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Returns `true` if this error is due to network issues.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::NetworkLoad(_)
                | PlaybackError::Bridge(BridgeError::HttpStatus { .. })
        )
    }

    /// Returns `true` if the track key was rejected. Such tracks never play.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::KeyDerivation(_) | PlaybackError::Cipher(_)
        )
    }

    /// Returns `true` if this error is related to audio format/codec issues.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::InvalidFormat(_) | PlaybackError::Decoder(_)
        )
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
