//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`, with chunked body streaming
//! - `TrackInfoStore` as JSON files next to the audio
//! - `AudioOutput` on the default device using `cpal` (feature `cpal-output`)
//!
//! Track catalogs and key unwrapping are always host-specific and have no
//! desktop default.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{CpalAudioOutput, ReqwestHttpClient};
//! use core_playback::{AudioPlayer, PlayerConfig};
//!
//! let http_client = ReqwestHttpClient::new()?;
//! let player = AudioPlayer::spawn(|| Box::new(CpalAudioOutput::new()), PlayerConfig::default(), events)?;
//! ```

mod http;
mod track_info_store;

#[cfg(feature = "cpal-output")]
mod output;

pub use http::ReqwestHttpClient;
pub use track_info_store::JsonTrackInfoStore;

#[cfg(feature = "cpal-output")]
pub use output::CpalAudioOutput;
