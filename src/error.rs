use std::io;

use thiserror::Error;

/// Invalid or unusable configuration. Fatal: reported at construction time.
#[derive(Debug, Error)]
#[error("configuration error: {0}")]
pub struct ConfigurationError(pub String);

impl ConfigurationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// Fewer bytes than requested could be moved. `code` is the OS error code
    /// when the failure came from the socket, `None` when the peer closed.
    #[error("incomplete transfer: {transferred} of {expected} bytes (os error {code:?})")]
    Incomplete {
        transferred: usize,
        expected: usize,
        code: Option<i32>,
        #[source]
        source: Option<io::Error>,
    },

    #[error("interrupted by shutdown")]
    Interrupted,

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("bind on port {port} failed: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
}

impl TransportError {
    pub(crate) fn incomplete(transferred: usize, expected: usize, source: Option<io::Error>) -> Self {
        TransportError::Incomplete {
            transferred,
            expected,
            code: source.as_ref().and_then(|e| e.raw_os_error()),
            source,
        }
    }

    /// The peer closed the connection cleanly before any byte of the transfer.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            TransportError::Incomplete {
                transferred: 0,
                source: None,
                ..
            }
        )
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The length prefix cannot belong to a valid packet; the byte stream is
    /// no longer aligned on message boundaries.
    #[error("stream desynchronized: packet length {length}")]
    Desync { length: i64 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("slot {slot} out of range (exchange has {len} slots)")]
    SlotOutOfRange { slot: usize, len: usize },
}

/// Failure while pushing one frame or packet through a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Codec(#[from] media_bus::CodecError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("frame sink failed: {0:#}")]
    Sink(anyhow::Error),
}
