//! Camera frames to compressed video, on disk or over TCP.
//!
//! Data flow:
//! ```text
//! Camera ─► CaptureLoop ─► FrameExchange ─► EncodePipeline ─► {file | Connection}
//!                                                                     │
//!                                    FrameSink ◄─ DecodePipeline ◄────┘
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod exchange;
pub mod media;
pub mod net;
pub mod orchestrator;
pub mod running;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use error::{ConfigurationError, ExchangeError, PipelineError, TransportError, WireError};
pub use exchange::{FrameExchange, SlotValue};
pub use orchestrator::{Orchestrator, RunSummary, ShutdownHandle};
pub use running::RunningFlag;
