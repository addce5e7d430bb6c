//! Request handshake: the client announces the file it wants under a fresh
//! connection identifier; the server accepts by echoing it back.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::constants::{HANDSHAKE_RETRIES, HANDSHAKE_WAIT, SERVER_PORT};
use crate::error::TransferError;
use crate::packet::{Packet, PacketKind};
use crate::raw::Transport;
use crate::stats::TransferStats;

/// Inner poll granularity while waiting for SYN-ACK.
const SYN_ACK_POLL: Duration = Duration::from_millis(500);

/// Client side: send SYN carrying the UTF-8 filename, wait for a SYN-ACK
/// bearing our conn_id. Retries the SYN up to [`HANDSHAKE_RETRIES`] times
/// with a [`HANDSHAKE_WAIT`] ceiling per attempt.
pub fn request_file<T: Transport>(
    link: &mut T,
    server_ip: Ipv4Addr,
    filename: &str,
    conn_id: u16,
    stats: &TransferStats,
) -> Result<(), TransferError> {
    let syn = Packet::syn(filename, conn_id).encode()?;

    for attempt in 1..=HANDSHAKE_RETRIES {
        debug!(attempt, conn_id, "sending SYN");
        link.send_frame(&syn, server_ip, SERVER_PORT)?;
        stats.record_send(syn.len());

        let deadline = Instant::now() + HANDSHAKE_WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let Some((frame, sender_ip, _)) = link.recv_frame(remaining.min(SYN_ACK_POLL))?
            else {
                continue;
            };
            let Ok(packet) = Packet::decode(&frame) else {
                continue;
            };
            if sender_ip != server_ip || packet.conn_id != conn_id {
                continue;
            }

            if packet.kind() == PacketKind::SynAck {
                stats.record_receive(frame.len());
                info!(conn_id, "handshake complete");
                return Ok(());
            }
        }

        warn!(attempt, "no SYN-ACK, retrying");
    }

    Err(TransferError::HandshakeFailed(HANDSHAKE_RETRIES))
}

/// An accepted transfer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub filename: String,
    pub peer_ip: Ipv4Addr,
    pub peer_port: u16,
    pub conn_id: u16,
}

/// Server side: one bounded poll for a SYN. A well-formed request is
/// answered with SYN-ACK (same conn_id) and returned; everything else is
/// dropped. Returns `None` when the poll times out, so the accept loop
/// stays responsive.
pub fn await_request<T: Transport>(
    link: &mut T,
    poll: Duration,
    stats: &TransferStats,
) -> Result<Option<Request>, TransferError> {
    let deadline = Instant::now() + poll;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }

        let Some((frame, peer_ip, peer_port)) = link.recv_frame(remaining)? else {
            return Ok(None);
        };
        let Ok(packet) = Packet::decode(&frame) else {
            continue;
        };
        if packet.kind() != PacketKind::Syn {
            continue;
        }
        // conn_id zero is reserved as "unbound".
        if packet.conn_id == 0 {
            continue;
        }
        let Ok(filename) = String::from_utf8(packet.payload.clone()) else {
            warn!(peer = %peer_ip, "SYN with non-UTF-8 filename dropped");
            continue;
        };

        stats.record_receive(frame.len());
        let reply = Packet::syn_ack(packet.conn_id).encode()?;
        link.send_frame(&reply, peer_ip, peer_port)?;
        stats.record_send(reply.len());
        info!(%peer_ip, conn_id = packet.conn_id, %filename, "accepted transfer request");

        return Ok(Some(Request { filename, peer_ip, peer_port, conn_id: packet.conn_id }));
    }
}
