//! Server-side transfer loop: chunk the file, stream it under a sliding
//! window, service cumulative ACKs, and retransmit on timer.

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::constants::{FIN_WAIT, MAX_CHUNKS, MAX_RETRIES, RTO, SERVER_PORT, WINDOW_SIZE};
use crate::error::TransferError;
use crate::packet::{Packet, PacketKind};
use crate::raw::Transport;
use crate::stats::TransferStats;
use crate::window::SendWindow;

/// Server runtime knobs, filled from the command line.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
    /// Directory the served files are looked up in.
    pub root: PathBuf,
    pub chunk_size: usize,
    pub window: u32,
    pub rto: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::UNSPECIFIED,
            port: SERVER_PORT,
            root: PathBuf::from("."),
            chunk_size: crate::constants::MAX_PAYLOAD,
            window: WINDOW_SIZE,
            rto: RTO,
        }
    }
}

/// Split a byte string into payload-sized chunks. An empty input still
/// produces one empty chunk so the terminal FIN|DATA frame exists.
pub fn chunk_bytes(data: &[u8], chunk_size: usize) -> Result<Vec<Vec<u8>>, TransferError> {
    if data.is_empty() {
        return Ok(vec![Vec::new()]);
    }

    let count = data.len().div_ceil(chunk_size) as u64;
    // Highest index must stay within the receiver's chunk cap.
    if count > MAX_CHUNKS as u64 + 1 {
        return Err(TransferError::TooManyChunks(count));
    }

    Ok(data.chunks(chunk_size).map(<[u8]>::to_vec).collect())
}

/// Read and chunk one file for transfer.
pub fn chunk_file(path: &Path, chunk_size: usize) -> Result<Vec<Vec<u8>>, TransferError> {
    let data = fs::read(path)?;
    chunk_bytes(&data, chunk_size)
}

/// Stream `chunks` to the peer established by the handshake. Returns once
/// every chunk through the terminal one is acknowledged; fails when any
/// single chunk exhausts its retransmissions.
#[allow(clippy::too_many_arguments)]
pub fn send_file<T: Transport>(
    link: &mut T,
    peer_ip: Ipv4Addr,
    peer_port: u16,
    conn_id: u16,
    chunks: &[Vec<u8>],
    window_size: u32,
    rto: Duration,
    stats: &TransferStats,
) -> Result<(), TransferError> {
    // `chunk_bytes` always yields at least one chunk, so the terminal
    // index is well-defined.
    let Some(last) = chunks.len().checked_sub(1) else {
        return Ok(());
    };
    let fin_index = last as u32;
    let mut window = SendWindow::new(fin_index, window_size, rto, MAX_RETRIES);
    info!(chunks = chunks.len(), fin_index, conn_id, "starting stream");

    loop {
        let now = Instant::now();
        for seq in window.fill(now) {
            transmit(link, peer_ip, peer_port, conn_id, chunks, fin_index, seq, stats)?;
        }

        if window.is_complete() {
            break;
        }

        // Poll for ACKs, bounded by half the RTO and by the next timer.
        let mut wait = rto / 2;
        if let Some(deadline) = window.next_deadline() {
            wait = wait.min(deadline.saturating_duration_since(Instant::now()));
        }
        if !wait.is_zero() {
            if let Some((frame, sender_ip, sender_port)) = link.recv_frame(wait)? {
                handle_frame(
                    link, &frame, sender_ip, sender_port, peer_ip, conn_id, &mut window, stats,
                )?;
                if window.is_complete() {
                    // The FIN|ACK already arrived; no need to linger.
                    info!(conn_id, "stream acknowledged through FIN");
                    return Ok(());
                }
            }
        }

        for seq in window.expired(Instant::now())? {
            debug!(seq, retries = window.retries_of(seq), "retransmitting");
            transmit(link, peer_ip, peer_port, conn_id, chunks, fin_index, seq, stats)?;
            stats.record_retransmit();
        }
    }

    // All data acknowledged; linger briefly for the final acknowledgement.
    // A single FIN|ACK is terminal, and its loss is tolerable.
    let deadline = Instant::now() + FIN_WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(conn_id, "no FIN-ACK within the wait window; terminating anyway");
            break;
        }
        let Some((frame, sender_ip, _)) = link.recv_frame(remaining)? else {
            continue;
        };
        let Ok(packet) = Packet::decode(&frame) else {
            continue;
        };
        if packet.conn_id == conn_id
            && sender_ip == peer_ip
            && packet.kind() == PacketKind::FinAck
        {
            stats.record_ack_received();
            break;
        }
    }

    info!(conn_id, "stream complete");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn transmit<T: Transport>(
    link: &mut T,
    peer_ip: Ipv4Addr,
    peer_port: u16,
    conn_id: u16,
    chunks: &[Vec<u8>],
    fin_index: u32,
    seq: u32,
    stats: &TransferStats,
) -> Result<(), TransferError> {
    // The terminal chunk carries FIN|DATA on every (re)transmission.
    let fin = seq == fin_index;
    let frame = Packet::data(seq, chunks[seq as usize].clone(), fin, conn_id).encode()?;
    link.send_frame(&frame, peer_ip, peer_port)?;
    stats.record_send(frame.len());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_frame<T: Transport>(
    link: &mut T,
    frame: &[u8],
    sender_ip: Ipv4Addr,
    sender_port: u16,
    peer_ip: Ipv4Addr,
    conn_id: u16,
    window: &mut SendWindow,
    stats: &TransferStats,
) -> Result<(), TransferError> {
    let Ok(packet) = Packet::decode(frame) else {
        return Ok(()); // corrupt: drop silently
    };
    // Single peer per conn_id; anything else is foreign traffic.
    if packet.conn_id != conn_id || sender_ip != peer_ip {
        return Ok(());
    }

    match packet.kind() {
        PacketKind::Ack | PacketKind::FinAck => {
            stats.record_ack_received();
            window.on_ack(packet.ack);
            debug!(ack = packet.ack, base = window.base(), "ack applied");
        }
        // Our SYN-ACK was lost and the client is still asking; repeat it.
        PacketKind::Syn => {
            let reply = Packet::syn_ack(conn_id).encode()?;
            link.send_frame(&reply, sender_ip, sender_port)?;
            stats.record_send(reply.len());
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_chunking_splits_on_payload_boundary() {
        let data = vec![0xAB; 3000];
        let chunks = chunk_bytes(&data, 1400).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1400);
        assert_eq!(chunks[1].len(), 1400);
        assert_eq!(chunks[2].len(), 200);
    }

    #[test]
    fn test_chunking_exact_multiple() {
        let data = vec![0xCD; 2800];
        let chunks = chunk_bytes(&data, 1400).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].len(), 1400);
    }

    #[test]
    fn test_empty_file_yields_single_empty_chunk() {
        let chunks = chunk_bytes(&[], 1400).unwrap();
        assert_eq!(chunks, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_single_chunk_file() {
        let chunks = chunk_bytes(b"hello", 1400).unwrap();
        assert_eq!(chunks, vec![b"hello".to_vec()]);
    }

    #[test]
    fn test_chunk_concatenation_is_identity() {
        let data: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let chunks = chunk_bytes(&data, 1400).unwrap();
        let rebuilt: Vec<u8> = chunks.concat();
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn test_chunk_cap_enforced() {
        // One-byte chunks make the cap easy to trip without real gigabytes.
        let data = vec![0u8; MAX_CHUNKS as usize + 2];
        assert!(matches!(
            chunk_bytes(&data, 1),
            Err(TransferError::TooManyChunks(_))
        ));
        let data = vec![0u8; MAX_CHUNKS as usize + 1];
        assert!(chunk_bytes(&data, 1).is_ok());
    }
}
