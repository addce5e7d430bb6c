//! Protocol constants. Every module pulls from here; nothing hardcodes
//! these values at a use site.

use std::time::Duration;

/// UDP destination port the server listens on.
pub const SERVER_PORT: u16 = 5005;
/// UDP destination port the client listens on.
pub const CLIENT_PORT: u16 = 5006;

/// Application header size on the wire.
pub const HEADER_SIZE: usize = 15;
/// Largest payload a single frame may carry.
pub const MAX_PAYLOAD: usize = 1400;
/// Upper bound on chunk indices; caps receive-buffer memory.
pub const MAX_CHUNKS: u32 = 1_000_000;

/// Sender window: contiguous in-flight chunk indices.
pub const WINDOW_SIZE: u32 = 10;
/// Retransmission timeout per un-acknowledged chunk.
pub const RTO: Duration = Duration::from_millis(500);
/// Retransmissions allowed per chunk before the transfer fails.
pub const MAX_RETRIES: u32 = 10;

/// Receiver's per-receive timeout.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(2);
/// Consecutive receive timeouts before the receiver gives up.
pub const MAX_CONSECUTIVE_TIMEOUTS: u32 = 10;
/// How long the sender lingers for the final acknowledgement.
pub const FIN_WAIT: Duration = Duration::from_secs(2);

/// SYN attempts before the handshake is abandoned.
pub const HANDSHAKE_RETRIES: u32 = 5;
/// Ceiling on waiting for SYN-ACK within one attempt.
pub const HANDSHAKE_WAIT: Duration = Duration::from_secs(2);

/// IPv4 header fields fixed by the protocol.
pub const IP_HEADER_SIZE: usize = 20;
pub const IP_IDENTIFICATION: u16 = 54321;
pub const IP_TTL: u8 = 64;
pub const IPPROTO_UDP: u8 = 17;
/// UDP header size; checksum field is left zero (permitted on IPv4).
pub const UDP_HEADER_SIZE: usize = 8;

/// Receive buffer large enough for any IP datagram we care about.
pub const RECV_BUFFER_SIZE: usize = 65535;
