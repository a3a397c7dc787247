//! Per-session pipelines between the frame exchange and the network or disk.
//!
//! ```text
//! FrameExchange ─► EncodePipeline ─► nv12 ─► encoder ─┬─► Muxer (file)
//!                                                     └─► Connection (wire)
//!
//! Connection ─► DecodePipeline ─► decoder ─► nv12 → packed ─► FrameSink
//! ```

pub mod decode;
pub mod encode;
pub mod timestamp_log;

pub use decode::{DecodePipeline, DecodeStats, FrameSink, RawFileSink};
pub use encode::{EncodeOutput, EncodePipeline, EncodeStats};
pub use timestamp_log::TimestampLog;

use std::path::{Path, PathBuf};

/// `<base>_<session>.<extension>`
pub fn session_path(base: &Path, session: usize, extension: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!("_{}.{}", session, extension));
    PathBuf::from(name)
}
