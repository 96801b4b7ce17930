//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the playback core:
//! - Logging and tracing bootstrap
//! - Configuration and dependency injection
//! - Event bus
//!
//! ## Overview
//!
//! Every other crate in the workspace depends on this one for its logging
//! conventions and for the typed events it broadcasts to hosts.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
