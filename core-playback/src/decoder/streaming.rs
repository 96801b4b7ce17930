//! # Streaming Decoder
//!
//! Decodes a track file that is still being downloaded.
//!
//! ## Readiness
//!
//! The container is not probed until [`StreamingConfig::ready_threshold_bytes`]
//! are available, or until the download finished. A probe that fails while the
//! download is running rewinds the file and is retried on the next update.
//!
//! ## Starvation
//!
//! Demuxers treat a short read as end of stream and do not recover from it.
//! While the download is running, packets are only pulled when at least
//! [`StreamingConfig::decode_margin_bytes`] lie past the file's read cursor;
//! otherwise [`read`](StreamingDecoder::read) reports
//! [`ReadStatus::NoFrameAvailable`](crate::traits::ReadStatus::NoFrameAvailable)
//! and the caller waits for more data.

use bridge_traits::playback::{PcmBuffer, PcmFormat};
use parking_lot::Mutex;
use std::sync::Arc;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, error, info, instrument, warn};

use super::sample_converter::SampleConverter;
use super::source::FileMediaSource;
use crate::config::StreamingConfig;
use crate::error::{PlaybackError, Result};
use crate::storage::IncrementalEncryptedFile;
use crate::traits::TrackRead;

const MAX_CONSECUTIVE_ERRORS: usize = 10;

/// Result of pulling one packet.
enum Pull {
    Decoded,
    End,
}

/// An opened container and codec.
struct DecodeSession {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    /// Known once the codec parameters or the first decoded packet tell.
    format: Option<PcmFormat>,
}

impl DecodeSession {
    fn open(file: &Arc<IncrementalEncryptedFile>) -> Result<Self> {
        let stream = MediaSourceStream::new(
            Box::new(FileMediaSource::new(file.clone())),
            Default::default(),
        );

        let probed = symphonia::default::get_probe()
            .format(
                &Hint::new(),
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| PlaybackError::InvalidFormat(format!("Failed to probe format: {}", e)))?;

        let format_reader = probed.format;
        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| PlaybackError::InvalidFormat("No supported audio tracks".to_string()))?;

        let track_id = track.id;
        let format = match (track.codec_params.sample_rate, track.codec_params.channels) {
            (Some(rate), Some(channels)) => Some(PcmFormat::new(rate, channels.count() as u16)),
            _ => None,
        };

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| PlaybackError::Decoder(format!("Failed to create codec decoder: {}", e)))?;

        Ok(Self {
            format_reader,
            decoder,
            track_id,
            format,
        })
    }

    /// Decode the next packet of the selected track into `pending`.
    fn pull(&mut self, pending: &mut Vec<f32>) -> Result<Pull> {
        let mut consecutive_errors = 0;

        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(Pull::End);
                }
                Err(SymphoniaError::ResetRequired) => {
                    return Err(PlaybackError::Decoder(
                        "Track list changed, reset required".to_string(),
                    ));
                }
                Err(SymphoniaError::IoError(e)) => {
                    consecutive_errors += 1;
                    warn!(
                        "I/O error reading packet (attempt {}/{}): {}",
                        consecutive_errors, MAX_CONSECUTIVE_ERRORS, e
                    );
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(PlaybackError::Decoder(format!(
                            "Stream I/O failure after {} attempts: {}",
                            MAX_CONSECUTIVE_ERRORS, e
                        )));
                    }
                    continue;
                }
                Err(e) => {
                    return Err(PlaybackError::Decoder(format!("Failed to read packet: {}", e)));
                }
            };

            while !self.format_reader.metadata().is_latest() {
                self.format_reader.metadata().pop();
            }

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = decoded.spec();
                    let decoded_format = PcmFormat::new(spec.rate, spec.channels.count() as u16);
                    match self.format {
                        None => {
                            debug!(?decoded_format, "Resolved PCM format from first packet");
                            self.format = Some(decoded_format);
                        }
                        Some(format) if format != decoded_format => {
                            warn!(?format, ?decoded_format, "PCM format changed mid-stream");
                        }
                        Some(_) => {}
                    }
                    SampleConverter::append_interleaved(&decoded, pending);
                    return Ok(Pull::Decoded);
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    skip_packet(&mut consecutive_errors, e)?;
                    continue;
                }
                Err(SymphoniaError::IoError(e)) => {
                    skip_packet(&mut consecutive_errors, &e.to_string())?;
                    continue;
                }
                Err(e) => {
                    return Err(PlaybackError::Decoder(format!("Failed to decode packet: {}", e)));
                }
            }
        }
    }
}

/// Count a packet the codec rejected, failing once too many in a row were.
fn skip_packet(consecutive_errors: &mut usize, reason: &str) -> Result<()> {
    *consecutive_errors += 1;
    warn!(
        "Skipping undecodable packet (attempt {}/{}): {}",
        consecutive_errors, MAX_CONSECUTIVE_ERRORS, reason
    );
    if *consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
        return Err(PlaybackError::Decoder(format!(
            "Decoder failure after {} failed packets: {}",
            MAX_CONSECUTIVE_ERRORS, reason
        )));
    }
    Ok(())
}

struct DecoderState {
    session: Option<DecodeSession>,
    /// Decoded samples that did not fit the previous buffer.
    pending: Vec<f32>,
    source_finished: bool,
    has_ended: bool,
    /// Set when the container cannot be opened even though the whole file is
    /// available.
    open_error: Option<String>,
}

/// Pull-based decoder over one [`IncrementalEncryptedFile`].
///
/// Every entry point takes the same lock, so notifications from the download
/// task and reads from the player thread never overlap.
pub struct StreamingDecoder {
    file: Arc<IncrementalEncryptedFile>,
    ready_threshold_bytes: u64,
    frames_per_buffer: usize,
    decode_margin_bytes: u64,
    state: Mutex<DecoderState>,
}

impl StreamingDecoder {
    /// Create a decoder, opening the container right away when enough data
    /// is already stored.
    pub fn new(file: Arc<IncrementalEncryptedFile>, config: &StreamingConfig) -> Self {
        let decoder = Self {
            file,
            ready_threshold_bytes: config.ready_threshold_bytes,
            frames_per_buffer: config.frames_per_buffer,
            decode_margin_bytes: config.decode_margin_bytes,
            state: Mutex::new(DecoderState {
                session: None,
                pending: Vec::new(),
                source_finished: false,
                has_ended: false,
                open_error: None,
            }),
        };
        decoder.notify_source_updated();
        decoder
    }

    /// New bytes were written to the file.
    pub fn notify_source_updated(&self) {
        let mut state = self.state.lock();
        if state.session.is_none() && self.file.available_length() >= self.ready_threshold_bytes {
            self.try_open(&mut state);
        }
    }

    /// The download completed; the file will not grow any more.
    pub fn mark_source_finished(&self) {
        let mut state = self.state.lock();
        state.source_finished = true;
        if state.session.is_none() {
            self.try_open(&mut state);
        }
    }

    /// Whether the container has been opened.
    pub fn is_ready(&self) -> bool {
        self.state.lock().session.is_some()
    }

    pub fn has_ended(&self) -> bool {
        self.state.lock().has_ended
    }

    /// PCM layout of decoded buffers, once known.
    pub fn format(&self) -> Option<PcmFormat> {
        self.state
            .lock()
            .session
            .as_ref()
            .and_then(|session| session.format)
    }

    /// Restart decoding from the beginning of the file.
    #[instrument(skip(self), fields(file_id = %self.file.file_id()))]
    pub fn rewind(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.session = None;
        state.pending.clear();
        state.has_ended = false;
        state.open_error = None;
        self.file.reset_read_cursor()?;

        if state.source_finished || self.file.available_length() >= self.ready_threshold_bytes {
            self.try_open(&mut state);
        }
        Ok(())
    }

    /// Decode up to one buffer of PCM frames.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::NotEnoughData`] before the container is open, or
    ///   while the PCM format cannot be resolved yet.
    /// - [`PlaybackError::Decoder`] / [`PlaybackError::InvalidFormat`] when
    ///   the stream cannot be decoded.
    pub fn read(&self) -> Result<TrackRead> {
        let mut state = self.state.lock();

        if let Some(message) = &state.open_error {
            return Err(PlaybackError::InvalidFormat(message.clone()));
        }
        if state.session.is_none() {
            return Err(PlaybackError::NotEnoughData);
        }
        if state.has_ended {
            return Ok(TrackRead::eof(None));
        }

        let source_finished = state.source_finished;
        let DecoderState {
            session, pending, ..
        } = &mut *state;
        let Some(session) = session.as_mut() else {
            return Err(PlaybackError::NotEnoughData);
        };

        let mut buffer: Option<PcmBuffer> = None;
        let mut codec_ended = false;

        loop {
            if let Some(format) = session.format {
                let out = buffer
                    .get_or_insert_with(|| PcmBuffer::with_capacity(format, self.frames_per_buffer));
                let taken = out.push_interleaved(pending.as_slice());
                pending.drain(..taken);
                if out.is_full() {
                    break;
                }
            }

            if !source_finished && self.file.unread_length() < self.decode_margin_bytes {
                break;
            }

            match session.pull(pending) {
                Ok(Pull::Decoded) => {}
                Ok(Pull::End) => {
                    codec_ended = true;
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Decoding failed");
                    return Err(e);
                }
            }
        }

        let buffer = buffer.filter(|b| !b.is_empty());
        // A codec end is only final once the download finished. Until then the
        // buffer is reported as normal and the track stays open.
        let ended = codec_ended && source_finished;
        if codec_ended && !source_finished {
            debug!("Codec reached end before the download finished");
        }

        match buffer {
            Some(buffer) if ended => {
                state.has_ended = true;
                Ok(TrackRead::eof(Some(buffer)))
            }
            Some(buffer) => Ok(TrackRead::normal(buffer)),
            None if source_finished => {
                state.has_ended = true;
                Ok(TrackRead::eof(None))
            }
            None if session_format_unknown(&state) => Err(PlaybackError::NotEnoughData),
            None => Ok(TrackRead::no_frame_available()),
        }
    }

    fn try_open(&self, state: &mut DecoderState) {
        if let Err(e) = self.file.reset_read_cursor() {
            warn!(error = %e, "Cannot rewind file before probing");
            return;
        }

        match DecodeSession::open(&self.file) {
            Ok(session) => {
                info!(
                    file_id = %self.file.file_id(),
                    format = ?session.format,
                    "Decoder opened"
                );
                state.session = Some(session);
                state.open_error = None;
            }
            Err(e) if state.source_finished => {
                error!(file_id = %self.file.file_id(), error = %e, "Cannot open complete file");
                state.open_error = Some(e.to_string());
            }
            Err(e) => {
                debug!(
                    file_id = %self.file.file_id(),
                    error = %e,
                    "Probe failed on partial data, waiting for more"
                );
                if let Err(e) = self.file.reset_read_cursor() {
                    warn!(error = %e, "Cannot rewind file after failed probe");
                }
            }
        }
    }
}

fn session_format_unknown(state: &DecoderState) -> bool {
    state
        .session
        .as_ref()
        .map_or(true, |session| session.format.is_none())
}

impl std::fmt::Debug for StreamingDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StreamingDecoder")
            .field("file_id", &self.file.file_id())
            .field("ready", &state.session.is_some())
            .field("source_finished", &state.source_finished)
            .field("has_ended", &state.has_ended)
            .field("pending_samples", &state.pending.len())
            .finish()
    }
}
