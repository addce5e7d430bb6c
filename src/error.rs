use std::time::Duration;
use thiserror::Error;

use crate::constants::{MAX_CHUNKS, MAX_PAYLOAD};

/// Failures that end a transfer. Corrupt, duplicate, and foreign frames are
/// handled locally by the receive paths and never surface here.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD}-byte maximum")]
    PayloadTooLarge(usize),

    #[error("file needs {0} chunks, more than the {MAX_CHUNKS} allowed")]
    TooManyChunks(u64),

    #[error("handshake failed: no SYN-ACK after {0} attempts")]
    HandshakeFailed(u32),

    #[error("chunk {seq} still unacknowledged after {retries} retransmissions")]
    RetryExhausted { seq: u32, retries: u32 },

    #[error("peer went silent: nothing received for {0:?}")]
    Inactive(Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
