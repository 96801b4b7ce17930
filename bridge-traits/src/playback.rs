//! Playback bridge traits and supporting audio types.
//!
//! The playback engine hands fixed-size PCM buffers to a host audio output and
//! learns about their consumption through completion callbacks. Audio session
//! management (activation, interruptions, route changes) is owned by the host
//! and reported to the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Playback state of the engine.
///
/// `Stopped` is the only state in which no track is loaded and no output
/// resources are held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackState {
    Loading,
    Buffering,
    Playing,
    Paused,
    Stopped,
    Interrupted,
}

impl PlaybackState {
    /// Returns `true` if the engine holds a track and output resources.
    pub fn is_active(&self) -> bool {
        !matches!(self, PlaybackState::Stopped)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Loading => "loading",
            PlaybackState::Buffering => "buffering",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// Decoded PCM layout: interleaved `f32` samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

/// Fixed-capacity block of interleaved PCM samples.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    format: PcmFormat,
    frame_capacity: usize,
    samples: Vec<f32>,
}

impl PcmBuffer {
    pub fn with_capacity(format: PcmFormat, frame_capacity: usize) -> Self {
        Self {
            format,
            frame_capacity,
            samples: Vec::with_capacity(frame_capacity * format.channels as usize),
        }
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn frame_capacity(&self) -> usize {
        self.frame_capacity
    }

    /// Number of complete frames held.
    pub fn frames(&self) -> usize {
        match self.format.channels {
            0 => 0,
            channels => self.samples.len() / channels as usize,
        }
    }

    /// Free space, in frames.
    pub fn remaining_frames(&self) -> usize {
        self.frame_capacity.saturating_sub(self.frames())
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.remaining_frames() == 0
    }

    /// Append interleaved samples, returning how many samples were taken.
    ///
    /// Only whole frames are copied; the rest of `samples` is left to the
    /// caller.
    pub fn push_interleaved(&mut self, samples: &[f32]) -> usize {
        let channels = self.format.channels.max(1) as usize;
        let frames = (samples.len() / channels).min(self.remaining_frames());
        let taken = frames * channels;
        self.samples.extend_from_slice(&samples[..taken]);
        taken
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Playback length of the buffered frames.
    pub fn duration(&self) -> Duration {
        if self.format.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.format.sample_rate as f64)
    }
}

/// Identifies one scheduled buffer.
///
/// `generation` changes every time the engine switches tracks or stops, so
/// completions of buffers that belonged to an earlier track can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferTicket {
    pub generation: u64,
    pub sequence: u64,
}

/// Called by the output once a scheduled buffer has been fully rendered.
///
/// Invoked from the realtime render thread: it must not block.
pub type CompletionHandler = Arc<dyn Fn(BufferTicket) + Send + Sync>;

/// Outcome of an audio session activation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionActivation {
    /// Session is active; playback can start now.
    Granted,
    /// The platform refused the session.
    Denied,
    /// Activation continues asynchronously; the host reports the result
    /// through the player once the platform answers.
    Pending,
}

/// Reason reported with an audio route change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteChangeReason {
    NewDeviceAvailable,
    OldDeviceUnavailable,
    CategoryChange,
    Override,
    Unknown,
}

/// Host audio output (device + session).
///
/// Output implementations are constructed on the player thread and only used
/// from there, so the trait carries no `Send` bound; realtime callbacks talk
/// back through the [`CompletionHandler`].
pub trait AudioOutput {
    /// Install the callback used to report rendered buffers.
    fn set_completion_handler(&mut self, handler: CompletionHandler);

    /// Request the platform audio session for playback.
    fn activate_session(&mut self) -> SessionActivation;

    /// Give the audio session back to the platform.
    fn deactivate_session(&mut self);

    /// Prepare the device for `format`, reusing it when already configured
    /// for the same format.
    fn configure(&mut self, format: PcmFormat) -> Result<()>;

    /// Start or resume rendering.
    fn play(&mut self) -> Result<()>;

    /// Halt rendering, keeping scheduled buffers and the clock.
    fn pause(&mut self);

    /// Halt rendering, discard scheduled buffers without completions, reset
    /// the clock and release the device.
    fn stop(&mut self);

    /// Drop every device handle after a media-services reset.
    fn reset(&mut self);

    /// Queue a buffer for rendering.
    fn schedule(&mut self, buffer: PcmBuffer, ticket: BufferTicket) -> Result<()>;

    /// Time rendered since the device was last configured, while rendering.
    fn elapsed(&self) -> Option<Duration>;

    /// Whether the device is currently rendering.
    fn is_rendering(&self) -> bool;
}
