//! Workspace facade crate.
//!
//! Host applications can depend on `streaming-player-workspace` and pick the
//! documented features instead of wiring each crate individually:
//!
//! - `desktop-shims` (default): reqwest HTTP client and JSON descriptor cache
//!   are injected when the host does not provide its own
//! - `cpal-output`: the cpal-backed audio output

pub use bridge_desktop as desktop;
pub use core_playback as playback;
pub use core_runtime as runtime;
