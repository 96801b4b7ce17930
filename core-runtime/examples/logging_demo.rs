//! Logging demo
//!
//! Shows the log output of a typical streaming session, including the
//! streaming events a UI would see on the event bus.
//!
//! Run with: cargo run --example logging_demo -p core-runtime

use bridge_traits::logging::{ConsoleLogger, LogLevel};
use core_runtime::events::{CoreEvent, EventBus, EventSeverity, EventStream, StreamingEvent};
use core_runtime::logging::{init_logging, strip_path, LogFormat, LoggingConfig};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn};

fn main() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Pretty)
        .with_level(LogLevel::Debug)
        .with_spans(true)
        .with_logger_sink(Arc::new(ConsoleLogger {
            min_level: LogLevel::Warn,
        }));

    if let Err(e) = init_logging(config) {
        eprintln!("Failed to initialize logging: {}", e);
        return;
    }

    let bus = EventBus::default();
    let mut streaming = EventStream::new(bus.subscribe())
        .filter(|event| matches!(event, CoreEvent::Streaming(_)));

    let partial = "/home/jane/.cache/player/streaming/file-t1.partial";

    let span = info_span!(target: "core_playback::track", "load", track_id = "t1");
    let _entered = span.enter();

    info!(target: "core_playback::track", file = %strip_path(partial), "Starting download");
    bus.emit(CoreEvent::Streaming(StreamingEvent::LoadStarted {
        track_id: "t1".to_string(),
        offset: 0,
    }))
    .ok();
    debug!(target: "core_playback::decoder", sample_rate = 44_100, channels = 2, "Decoder opened");

    warn!(
        target: "core_playback::track",
        offset = 30_000u64,
        retries = 1,
        "Connection reset, resuming with range request"
    );
    bus.emit(CoreEvent::Streaming(StreamingEvent::LoadFailed {
        track_id: "t1".to_string(),
        message: "connection reset".to_string(),
        will_retry: true,
    }))
    .ok();

    info!(target: "core_playback::storage", file = %strip_path(partial), length = 5_046_167u64, "Finalized");
    bus.emit(CoreEvent::Streaming(StreamingEvent::FileFinalized {
        track_id: "t1".to_string(),
        file_id: "file-t1".to_string(),
        length: 5_046_167,
    }))
    .ok();
    error!(target: "core_playback::engine", track_id = "t2", "Skipping unplayable track");

    // What a UI subscriber sees
    while let Some(Ok(event)) = streaming.try_recv() {
        match event.severity() {
            EventSeverity::Error => error!(target: "core_runtime::events", ?event, "{}", event.description()),
            EventSeverity::Warning => warn!(target: "core_runtime::events", ?event, "{}", event.description()),
            EventSeverity::Info => info!(target: "core_runtime::events", ?event, "{}", event.description()),
            EventSeverity::Debug => debug!(target: "core_runtime::events", ?event, "{}", event.description()),
        }
    }
}
