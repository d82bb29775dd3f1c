use serialcheck_io::TransportError;
use thiserror::Error;

use crate::probe::BlockMismatch;
use crate::runtime::markers::{CapturedMarker, MarkerKind};

/// How the log stream ran dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Timeout,
    Closed,
}

impl std::fmt::Display for StreamEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamEnd::Timeout => f.write_str("timed out"),
            StreamEnd::Closed => f.write_str("channel closed"),
        }
    }
}

/// Everything that can end a probe or a test run early.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("device unreachable: {0}")]
    Connection(#[source] TransportError),

    #[error("incorrect block received, {bytes_remaining} bytes left")]
    TransferIntegrity {
        bytes_remaining: usize,
        mismatch: Box<BlockMismatch>,
    },

    #[error("failed to parse output ({cause}): missing {}", join_kinds(.missing))]
    Parse {
        found: Vec<CapturedMarker>,
        missing: Vec<MarkerKind>,
        cause: StreamEnd,
    },

    #[error("malformed {kind} marker: {text:?}")]
    MalformedMarker { kind: MarkerKind, text: String },

    #[error("command not found: {line}")]
    Protocol { line: String },

    #[error("timed out waiting for {waiting_for:?}")]
    Timeout { waiting_for: String },

    #[error(transparent)]
    Transport(TransportError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { delimiter, .. } => SessionError::Timeout {
                waiting_for: delimiter,
            },
            err @ TransportError::Connection { .. } => SessionError::Connection(err),
            other => SessionError::Transport(other),
        }
    }
}

fn join_kinds(kinds: &[MarkerKind]) -> String {
    kinds
        .iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
