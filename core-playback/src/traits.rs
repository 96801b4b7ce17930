//! # Audio Track Contract
//!
//! Everything the playback engine knows about a track goes through
//! [`AudioTrack`]. The engine never looks inside a track: it asks for PCM
//! buffers, drives lifecycle hooks, and listens to [`TrackEvent`]s delivered
//! through the [`TrackEventSink`] it installed with
//! [`configure`](AudioTrack::configure).
//!
//! ## Threading Model
//!
//! Tracks are shared between the player thread (reads and hooks) and the
//! tokio runtime (loading), so implementations must be `Send + Sync`. Every
//! method is synchronous and must return quickly: long-running work such as
//! network fetches is spawned by [`prepare`](AudioTrack::prepare) and reported
//! back through events.
//!
//! ## Read Protocol
//!
//! ```text
//! read() -> Ok(Normal, Some(buffer))          schedule it
//!        -> Ok(NoFrameAvailable, None)        wait for HaveAdditionalContent
//!        -> Ok(Eof, Some(buffer) | None)      last data; track is over once drained
//!        -> Err(Buffering)                    nothing decodable yet
//!        -> Err(Internal(_))                  skip the track
//! ```

use bridge_traits::catalog::ArtworkImage;
use bridge_traits::playback::PcmBuffer;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Outcome of a successful [`AudioTrack::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// A buffer was produced and more data follows.
    Normal,
    /// Nothing could be decoded right now, but the track is not over.
    NoFrameAvailable,
    /// The track has no more data after the returned buffer, if any.
    Eof,
}

/// Status plus the buffer produced by one read.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRead {
    pub status: ReadStatus,
    pub buffer: Option<PcmBuffer>,
}

impl TrackRead {
    pub fn normal(buffer: PcmBuffer) -> Self {
        Self {
            status: ReadStatus::Normal,
            buffer: Some(buffer),
        }
    }

    pub fn no_frame_available() -> Self {
        Self {
            status: ReadStatus::NoFrameAvailable,
            buffer: None,
        }
    }

    /// End of track, optionally carrying its final buffer.
    pub fn eof(buffer: Option<PcmBuffer>) -> Self {
        Self {
            status: ReadStatus::Eof,
            buffer,
        }
    }
}

/// Reasons a track cannot produce data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackReadError {
    #[error("Track is buffering")]
    Buffering,

    #[error("Track has ended")]
    EndOfTrack,

    #[error("Track failed: {0}")]
    Internal(String),
}

/// What happened to a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackEventKind {
    /// New data was written; reads may now succeed.
    HaveAdditionalContent,
    /// The whole file is stored locally.
    DidFinishBuffering,
    /// Loading failed and retries are exhausted.
    EncounteredUnrecoverableError { message: String },
    /// Metadata (usually artwork) changed.
    MetadataUpdated,
}

/// Event emitted by a track towards whoever configured it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEvent {
    pub track_id: String,
    pub kind: TrackEventKind,
}

impl TrackEvent {
    pub fn new(track_id: impl Into<String>, kind: TrackEventKind) -> Self {
        Self {
            track_id: track_id.into(),
            kind,
        }
    }
}

/// Callback installed on tracks by the engine.
///
/// Called from tokio worker threads; implementations only post the event to
/// their owner and return.
#[derive(Clone)]
pub struct TrackEventSink {
    handler: Arc<dyn Fn(TrackEvent) + Send + Sync>,
}

impl TrackEventSink {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(TrackEvent) + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// A sink that drops every event.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn emit(&self, event: TrackEvent) {
        (self.handler)(event);
    }
}

impl fmt::Debug for TrackEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackEventSink").finish_non_exhaustive()
    }
}

/// Descriptive metadata shown by now-playing surfaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub composer: Option<String>,
    pub genre: Option<String>,
    pub album_title: Option<String>,
    pub album_artist: Option<String>,
    pub duration: Option<Duration>,
    pub artwork: Option<ArtworkImage>,
}

/// A playable track, as seen by the playback engine.
pub trait AudioTrack: Send + Sync {
    /// Stable identifier, also used to find the track in the queue.
    fn identifier(&self) -> &str;

    /// `true` for live streams without a known end.
    fn is_live(&self) -> bool;

    /// Track length, zero when unknown.
    fn duration(&self) -> Duration;

    fn metadata(&self) -> TrackMetadata;

    /// Install the sink that receives this track's events.
    fn configure(&self, sink: TrackEventSink);

    /// Produce the next PCM buffer.
    fn read(&self) -> Result<TrackRead, TrackReadError>;

    /// Seek within the track. Only `Duration::ZERO` is supported.
    fn seek_to(&self, time: Duration);

    /// Start resolving and loading content.
    ///
    /// May be called ahead of playback to preload, and may be called many
    /// times; calls while preparing or prepared are no-ops.
    fn prepare(&self);

    /// The engine is about to read from the start of the track.
    fn will_start_playback(&self);

    fn did_pause_playback(&self);

    fn did_stop_playback(&self);

    /// The engine is done with the track; release file handles and tasks.
    fn did_finish_playback(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::playback::PcmFormat;
    use parking_lot::Mutex;

    #[test]
    fn test_read_constructors() {
        let buffer = PcmBuffer::with_capacity(PcmFormat::new(44_100, 2), 16);

        let normal = TrackRead::normal(buffer.clone());
        assert_eq!(normal.status, ReadStatus::Normal);
        assert!(normal.buffer.is_some());

        assert_eq!(TrackRead::no_frame_available().buffer, None);
        assert_eq!(TrackRead::eof(Some(buffer)).status, ReadStatus::Eof);
    }

    #[test]
    fn test_event_sink_forwards_events() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let received = received.clone();
            TrackEventSink::new(move |event| received.lock().push(event))
        };

        sink.clone()
            .emit(TrackEvent::new("t1", TrackEventKind::HaveAdditionalContent));
        sink.emit(TrackEvent::new("t1", TrackEventKind::DidFinishBuffering));

        let received = received.lock();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1].kind, TrackEventKind::DidFinishBuffering);
    }

    #[test]
    fn test_read_error_messages() {
        assert_eq!(TrackReadError::Buffering.to_string(), "Track is buffering");
        assert!(TrackReadError::Internal("boom".into())
            .to_string()
            .contains("boom"));
    }
}
