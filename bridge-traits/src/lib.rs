//! # Host Bridge Traits
//!
//! Contracts between the playback core and the world around it.
//!
//! ## Overview
//!
//! The core streams, decrypts and decodes audio itself, but it relies on the
//! host for everything platform- or service-specific. Each trait here is one
//! such capability; hosts inject implementations through
//! `core_runtime::config::CoreConfig`.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Buffered and streamed HTTP, including range requests
//! - [`TrackCatalog`](catalog::TrackCatalog) - Track file descriptors, storage URLs, artwork
//!
//! ### Keys & Storage
//! - [`KeyUnwrapper`](storage::KeyUnwrapper) - Device-bound unwrap of track keys
//! - [`TrackInfoStore`](storage::TrackInfoStore) - Cached track descriptors per storage class
//!
//! ### Audio
//! - [`AudioOutput`](playback::AudioOutput) - Output device, session and buffer scheduling
//!
//! ### Utilities
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should convert platform errors into it with actionable messages and never
//! include key material or tokens in them.
//!
//! ## Thread Safety
//!
//! Service traits require `Send + Sync` because they are shared between the
//! tokio runtime and the player thread. [`AudioOutput`](playback::AudioOutput)
//! is the exception: it lives on the player thread only.

pub mod catalog;
pub mod error;
pub mod http;
pub mod logging;
pub mod platform;
pub mod playback;
pub mod storage;

pub use error::BridgeError;

// Re-export commonly used types
pub use catalog::{ArtworkImage, StorageResolution, TrackCatalog, TrackFileInfo};
pub use http::{ByteStream, HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse};
pub use logging::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
pub use playback::{
    AudioOutput, BufferTicket, CompletionHandler, PcmBuffer, PcmFormat, PlaybackState,
    RouteChangeReason, SessionActivation,
};
pub use storage::{KeyUnwrapper, MemoryTrackInfoStore, StorageClass, TrackInfoStore};
