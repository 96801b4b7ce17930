//! # Playback & Streaming Module
//!
//! Plays encrypted tracks while they download.
//!
//! ## Overview
//!
//! This module handles:
//! - AES-CTR decryption of track files ([`cipher`])
//! - Incremental encrypted files that are read while being written ([`storage`])
//! - Decoding of partially downloaded audio with Symphonia ([`decoder`])
//! - Per-track download, retry and decode orchestration ([`track`], [`loader`])
//! - Track creation and caching ([`service`])
//! - Queue, transport and buffer scheduling on a host audio output
//!   ([`engine`], [`player`])
//!
//! ## Data Flow
//!
//! ```text
//! HttpClient ──bytes──▶ IncrementalEncryptedFile ──plaintext──▶ StreamingDecoder
//!                                                                      │ PcmBuffer
//!                       AudioOutput ◀──schedule── PlaybackEngine ◀─────┘
//! ```

pub mod cipher;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod loader;
pub mod player;
pub mod service;
pub mod storage;
pub mod track;
pub mod traits;

pub use cipher::{BlockCipherStream, TrackKey};
pub use config::{PlayerConfig, StreamingConfig};
pub use decoder::StreamingDecoder;
pub use engine::{EngineSignal, EngineSnapshot, Interruption, NowPlaying, PlaybackEngine};
pub use error::{PlaybackError, Result};
pub use loader::TrackLoader;
pub use player::AudioPlayer;
pub use service::PlaybackService;
pub use storage::{IncrementalEncryptedFile, StorageDirs};
pub use track::{StreamingTrack, TrackDescriptor, TrackPhase};
pub use traits::{
    AudioTrack, ReadStatus, TrackEvent, TrackEventKind, TrackEventSink, TrackMetadata, TrackRead,
    TrackReadError,
};
