//! Audio Output Implementation using CPAL
//!
//! Scheduled buffers are rendered in order by the device callback. When the
//! last frame of a buffer has been copied to the device, its ticket is handed
//! to the completion handler from the realtime thread.

use bridge_traits::{
    error::{BridgeError, Result},
    playback::{
        AudioOutput, BufferTicket, CompletionHandler, PcmBuffer, PcmFormat, SessionActivation,
    },
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

struct Scheduled {
    samples: Vec<f32>,
    position: usize,
    ticket: BufferTicket,
}

#[derive(Default)]
struct RenderState {
    queue: VecDeque<Scheduled>,
    /// Frames copied to the device since the stream was built.
    rendered_frames: u64,
    handler: Option<CompletionHandler>,
}

/// Default output device through CPAL.
///
/// Desktop platforms have no audio session to negotiate, so activation is
/// always granted.
pub struct CpalAudioOutput {
    state: Arc<Mutex<RenderState>>,
    stream: Option<Stream>,
    format: Option<PcmFormat>,
    rendering: bool,
}

impl CpalAudioOutput {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RenderState::default())),
            stream: None,
            format: None,
            rendering: false,
        }
    }

    fn build_stream(&self, format: PcmFormat) -> Result<Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| BridgeError::Output("No output device available".to_string()))?;

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: BufferSize::Default,
        };

        let state = Arc::clone(&self.state);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    Self::render(data, &state, format.channels as usize);
                },
                |err| error!(error = %err, "Audio stream error"),
                None,
            )
            .map_err(|e| BridgeError::Output(format!("Failed to build stream: {}", e)))?;

        info!(
            device = %device.name().unwrap_or_default(),
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Output stream ready"
        );
        Ok(stream)
    }

    fn render(output: &mut [f32], state: &Mutex<RenderState>, channels: usize) {
        let mut completed = Vec::new();
        let handler = {
            let mut state = state.lock();
            let mut written = 0;

            while written < output.len() {
                let Some(front) = state.queue.front_mut() else {
                    break;
                };
                let available = front.samples.len() - front.position;
                let count = available.min(output.len() - written);
                output[written..written + count]
                    .copy_from_slice(&front.samples[front.position..front.position + count]);
                front.position += count;
                written += count;

                if front.position == front.samples.len() {
                    if let Some(done) = state.queue.pop_front() {
                        completed.push(done.ticket);
                    }
                }
            }

            output[written..].fill(0.0);
            state.rendered_frames += (written / channels.max(1)) as u64;
            state.handler.clone()
        };

        if let Some(handler) = handler {
            for ticket in completed {
                handler(ticket);
            }
        }
    }

    fn release(&mut self) {
        self.stream = None;
        self.format = None;
        self.rendering = false;
        let mut state = self.state.lock();
        state.queue.clear();
        state.rendered_frames = 0;
    }
}

impl Default for CpalAudioOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for CpalAudioOutput {
    fn set_completion_handler(&mut self, handler: CompletionHandler) {
        self.state.lock().handler = Some(handler);
    }

    fn activate_session(&mut self) -> SessionActivation {
        SessionActivation::Granted
    }

    fn deactivate_session(&mut self) {}

    fn configure(&mut self, format: PcmFormat) -> Result<()> {
        if self.stream.is_some() && self.format == Some(format) {
            return Ok(());
        }
        self.release();
        self.stream = Some(self.build_stream(format)?);
        self.format = Some(format);
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| BridgeError::Output("Output is not configured".to_string()))?;
        stream
            .play()
            .map_err(|e| BridgeError::Output(format!("Failed to start stream: {}", e)))?;
        self.rendering = true;
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                error!(error = %e, "Failed to pause stream");
            }
        }
        self.rendering = false;
    }

    fn stop(&mut self) {
        debug!("Stopping output");
        self.release();
    }

    fn reset(&mut self) {
        self.release();
    }

    fn schedule(&mut self, buffer: PcmBuffer, ticket: BufferTicket) -> Result<()> {
        if self.format != Some(buffer.format()) {
            return Err(BridgeError::Output(format!(
                "Buffer format {:?} does not match the configured output",
                buffer.format()
            )));
        }
        self.state.lock().queue.push_back(Scheduled {
            samples: buffer.into_samples(),
            position: 0,
            ticket,
        });
        Ok(())
    }

    fn elapsed(&self) -> Option<Duration> {
        if !self.rendering {
            return None;
        }
        let format = self.format?;
        let frames = self.state.lock().rendered_frames;
        Some(Duration::from_secs_f64(
            frames as f64 / format.sample_rate as f64,
        ))
    }

    fn is_rendering(&self) -> bool {
        self.rendering
    }
}
