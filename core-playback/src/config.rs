//! # Playback Configuration
//!
//! Tunables for the streaming pipeline ([`StreamingConfig`]) and the playback
//! engine ([`PlayerConfig`]).

use core_runtime::events::DEFAULT_EVENT_BUFFER_SIZE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Streaming pipeline configuration.
///
/// Controls when the decoder may open, how large decoded buffers are and how
/// tracks are fetched and retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Bytes that must be available before the container is probed.
    ///
    /// Probing earlier fails on an incomplete container header.
    ///
    /// Default: 8192.
    #[serde(default = "default_ready_threshold_bytes")]
    pub ready_threshold_bytes: u64,

    /// Length of the opaque header that precedes the audio container in every
    /// encrypted file.
    ///
    /// Default: 167.
    #[serde(default = "default_header_length")]
    pub header_length: u64,

    /// Capacity of each decoded PCM buffer, in frames.
    ///
    /// Default: 32768 (~0.74s at 44.1kHz).
    #[serde(default = "default_frames_per_buffer")]
    pub frames_per_buffer: usize,

    /// Undecoded bytes that must lie past the read cursor before the decoder
    /// pulls another packet from a file that is still downloading.
    ///
    /// Must cover the largest container page (65307 bytes for Ogg).
    ///
    /// Default: 96 KiB.
    #[serde(default = "default_decode_margin_bytes")]
    pub decode_margin_bytes: u64,

    /// Preferred artwork width requested from the catalog, in pixels.
    ///
    /// Default: 300.
    #[serde(default = "default_artwork_width")]
    pub artwork_width: u32,

    /// Automatic retries per track before it is reported unrecoverable.
    ///
    /// Default: 1.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Number of track instances kept by the playback service.
    ///
    /// Default: 64.
    #[serde(default = "default_track_cache_capacity")]
    pub track_cache_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            ready_threshold_bytes: default_ready_threshold_bytes(),
            header_length: default_header_length(),
            frames_per_buffer: default_frames_per_buffer(),
            decode_margin_bytes: default_decode_margin_bytes(),
            artwork_width: default_artwork_width(),
            max_retries: default_max_retries(),
            track_cache_capacity: default_track_cache_capacity(),
        }
    }
}

impl StreamingConfig {
    /// Create a configuration for memory-constrained devices (watches).
    ///
    /// - Quarter-size PCM buffers
    /// - Small track cache
    pub fn low_memory() -> Self {
        Self {
            frames_per_buffer: 8192,
            track_cache_capacity: 8,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.ready_threshold_bytes <= self.header_length {
            return Err("ready_threshold_bytes must exceed header_length".to_string());
        }

        if self.frames_per_buffer == 0 {
            return Err("frames_per_buffer must be > 0".to_string());
        }

        if self.decode_margin_bytes == 0 {
            return Err("decode_margin_bytes must be > 0".to_string());
        }

        if self.artwork_width == 0 {
            return Err("artwork_width must be > 0".to_string());
        }

        if self.track_cache_capacity == 0 {
            return Err("track_cache_capacity must be > 0".to_string());
        }

        Ok(())
    }
}

/// Playback engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Maximum buffers scheduled on the output and not yet rendered.
    ///
    /// Default: 16.
    #[serde(default = "default_max_buffers_in_flight")]
    pub max_buffers_in_flight: usize,

    /// How many tracks past the current one are prepared ahead of time.
    ///
    /// Default: 2.
    #[serde(default = "default_lookahead")]
    pub lookahead: usize,

    /// Below this elapsed time, "previous" goes to the previous track instead
    /// of restarting the current one.
    ///
    /// Default: 5 seconds.
    #[serde(default = "default_previous_track_threshold")]
    pub previous_track_threshold: Duration,

    /// Capacity of the event bus channel.
    ///
    /// Default: 100.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            max_buffers_in_flight: default_max_buffers_in_flight(),
            lookahead: default_lookahead(),
            previous_track_threshold: default_previous_track_threshold(),
            event_buffer_size: default_event_buffer_size(),
        }
    }
}

impl PlayerConfig {
    /// Create a configuration for memory-constrained devices.
    ///
    /// - Half the buffers in flight
    /// - Only the next track is prepared ahead
    pub fn low_memory() -> Self {
        Self {
            max_buffers_in_flight: 8,
            lookahead: 1,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_buffers_in_flight == 0 {
            return Err("max_buffers_in_flight must be > 0".to_string());
        }

        if self.event_buffer_size == 0 {
            return Err("event_buffer_size must be > 0".to_string());
        }

        Ok(())
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_ready_threshold_bytes() -> u64 {
    8192
}

fn default_header_length() -> u64 {
    167
}

fn default_frames_per_buffer() -> usize {
    32768
}

fn default_decode_margin_bytes() -> u64 {
    96 * 1024
}

fn default_artwork_width() -> u32 {
    300
}

fn default_max_retries() -> u32 {
    1
}

fn default_track_cache_capacity() -> usize {
    64
}

fn default_max_buffers_in_flight() -> usize {
    16
}

fn default_lookahead() -> usize {
    2
}

fn default_previous_track_threshold() -> Duration {
    Duration::from_secs(5)
}

fn default_event_buffer_size() -> usize {
    DEFAULT_EVENT_BUFFER_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_streaming_config() {
        let config = StreamingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ready_threshold_bytes, 8192);
        assert_eq!(config.header_length, 167);
        assert_eq!(config.frames_per_buffer, 32768);
        assert_eq!(config.max_retries, 1);
    }

    #[test]
    fn test_low_memory_presets() {
        let streaming = StreamingConfig::low_memory();
        assert!(streaming.validate().is_ok());
        assert!(streaming.frames_per_buffer < StreamingConfig::default().frames_per_buffer);

        let player = PlayerConfig::low_memory();
        assert!(player.validate().is_ok());
        assert!(player.max_buffers_in_flight < PlayerConfig::default().max_buffers_in_flight);
    }

    #[test]
    fn test_streaming_config_validation() {
        let mut config = StreamingConfig::default();

        config.ready_threshold_bytes = 100;
        assert!(config.validate().is_err());
        config.ready_threshold_bytes = 8192;

        config.frames_per_buffer = 0;
        assert!(config.validate().is_err());
        config.frames_per_buffer = 32768;

        config.track_cache_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_player_config_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.max_buffers_in_flight, 16);
        assert_eq!(config.lookahead, 2);
        assert_eq!(config.previous_track_threshold, Duration::from_secs(5));

        let mut invalid = config.clone();
        invalid.max_buffers_in_flight = 0;
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: StreamingConfig = serde_json::from_str(r#"{"frames_per_buffer": 4096}"#).unwrap();
        assert_eq!(config.frames_per_buffer, 4096);
        assert_eq!(config.header_length, 167);

        let player: PlayerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(player, PlayerConfig::default());
    }
}
