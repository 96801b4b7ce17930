//! # Audio Decoder Module
//!
//! Turns the plaintext of an encrypted track file into PCM buffers using the
//! Symphonia library.
//!
//! ## Architecture
//!
//! ```text
//! IncrementalEncryptedFile → FileMediaSource → MediaSourceStream
//!     → FormatReader → Decoder → SampleConverter → PcmBuffer
//! ```
//!
//! Production files are Ogg Vorbis; any container registered with Symphonia's
//! default probe decodes the same way.

mod sample_converter;
mod source;
mod streaming;

pub use sample_converter::SampleConverter;
pub use source::FileMediaSource;
pub use streaming::StreamingDecoder;
