//! Integration tests for logging initialization
//!
//! A global subscriber can only be installed once per process, so the
//! successful initialization path lives in a single test.

use bridge_traits::error::Result as SinkResult;
use bridge_traits::logging::{LogEntry, LogLevel, LoggerSink};
use core_runtime::logging::{init_logging, strip_path, LogFormat, LoggingConfig};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CollectingSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl LoggerSink for CollectingSink {
    fn log(&self, entry: LogEntry) -> SinkResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        LogLevel::Debug
    }
}

#[test]
fn test_init_forwards_workspace_events_to_sink() {
    let sink = Arc::new(CollectingSink::default());
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_logger_sink(sink.clone());

    init_logging(config).unwrap();

    let span = tracing::info_span!(target: "core_playback::track", "prepare_track", track_id = "t1");
    let _entered = span.enter();
    tracing::debug!(target: "core_playback::track", offset = 30_000u64, "Resuming download");
    tracing::trace!(target: "core_playback::track", "Below the configured level");
    tracing::info!(target: "symphonia_core::probe", "Quiet dependency");

    {
        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.level, LogLevel::Debug);
        assert_eq!(entry.target, "core_playback::track");
        assert_eq!(entry.message, "Resuming download");
        assert_eq!(entry.fields.get("offset"), Some(&"30000".to_string()));
        assert_eq!(entry.span.as_deref(), Some("prepare_track"));
    }

    // Second installation is refused
    assert!(init_logging(LoggingConfig::default()).is_err());
}

#[test]
fn test_invalid_filter_is_rejected() {
    let config = LoggingConfig::default().with_filter("core_playback=loudest");
    assert!(init_logging(config).is_err());
}

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Json)
        .with_level(LogLevel::Warn)
        .with_filter("core_playback::engine=trace")
        .with_spans(true)
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, LogLevel::Warn);
    assert_eq!(config.filter.as_deref(), Some("core_playback::engine=trace"));
    assert!(config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
    assert!(config.logger_sink.is_none());
}

#[test]
fn test_storage_paths_are_reduced_to_file_names() {
    assert_eq!(
        strip_path("/home/jane/.cache/player/streaming/file-t1.partial"),
        "file-t1.partial"
    );
    assert_eq!(
        strip_path("C:\\Users\\Jane\\AppData\\Local\\player\\downloads\\file-t1"),
        "file-t1"
    );
    assert_eq!(strip_path("file-t1"), "file-t1");
    assert_eq!(strip_path(""), "");
}
