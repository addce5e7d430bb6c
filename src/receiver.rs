//! Client-side transfer loop: receive, reorder, persist, acknowledge.
//!
//! Single cooperative loop; the only blocking call is the bounded raw
//! receive. Every in-order byte goes to the sink before its ACK leaves.

use std::io::Write;
use std::net::Ipv4Addr;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::constants::{ACK_TIMEOUT, MAX_CONSECUTIVE_TIMEOUTS};
use crate::error::TransferError;
use crate::packet::{Packet, PacketKind};
use crate::raw::Transport;
use crate::reorder::{Accepted, ReorderBuffer};
use crate::stats::TransferStats;

/// Gap between the repeated final acknowledgements.
const FIN_ACK_INTERVAL: Duration = Duration::from_millis(100);
/// The final acknowledgement is repeated to tolerate its loss.
const FIN_ACK_REPEATS: u32 = 3;

/// Receive-side tallies for the end-of-transfer report.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiveOutcome {
    pub packets_total: u64,
    pub packets_valid: u64,
    pub packets_invalid: u64,
    pub duplicates: u64,
    pub chunks_written: u64,
    pub fin_seq: Option<u32>,
}

/// Run the data phase against an established connection, writing in-order
/// bytes to `sink`. Returns once the terminal chunk and everything before
/// it are persisted, or fails after ten silent receive windows.
pub fn receive_file<T: Transport, W: Write>(
    link: &mut T,
    server_ip: Ipv4Addr,
    conn_id: u16,
    sink: &mut W,
    stats: &TransferStats,
) -> Result<ReceiveOutcome, TransferError> {
    let mut buffer = ReorderBuffer::new();
    let mut outcome = ReceiveOutcome::default();
    let mut consecutive_timeouts = 0u32;

    loop {
        let Some((frame, sender_ip, sender_port)) = link.recv_frame(ACK_TIMEOUT)? else {
            consecutive_timeouts += 1;
            warn!(consecutive_timeouts, "receive window passed with no traffic");
            if consecutive_timeouts >= MAX_CONSECUTIVE_TIMEOUTS {
                sink.flush()?;
                return Err(TransferError::Inactive(
                    ACK_TIMEOUT * MAX_CONSECUTIVE_TIMEOUTS,
                ));
            }
            continue;
        };
        consecutive_timeouts = 0;
        outcome.packets_total += 1;

        let packet = match Packet::decode(&frame) {
            Ok(packet) => packet,
            Err(reason) => {
                debug!(%reason, "dropping corrupt frame");
                outcome.packets_invalid += 1;
                continue;
            }
        };
        // Foreign traffic: wrong connection or not the handshake peer.
        if packet.conn_id != conn_id || sender_ip != server_ip {
            outcome.packets_invalid += 1;
            continue;
        }

        outcome.packets_valid += 1;
        stats.record_receive(frame.len());

        let PacketKind::Data { fin } = packet.kind() else {
            // SYN-ACK stragglers from the handshake land here; nothing to do.
            continue;
        };

        let seq = packet.seq;
        let accepted = buffer.accept(seq, packet.payload);
        if fin && accepted != Accepted::Dropped {
            buffer.record_fin(seq);
        }
        buffer.drain(sink)?;
        outcome.duplicates = buffer.duplicates();
        outcome.chunks_written = buffer.chunks_written();

        // Cumulative ACK: everything strictly below expected_seq arrived.
        // Re-sent unchanged for duplicates; ACKs are idempotent.
        let ack = Packet::ack(buffer.expected_seq(), conn_id).encode()?;
        link.send_frame(&ack, server_ip, sender_port)?;
        stats.record_send(ack.len());
        stats.record_ack_sent();
        debug!(seq, ack = buffer.expected_seq(), "chunk handled");

        if buffer.is_complete() {
            sink.flush()?;
            outcome.fin_seq = buffer.fin_seq();

            let fin_ack = Packet::fin_ack(buffer.expected_seq(), conn_id).encode()?;
            for _ in 0..FIN_ACK_REPEATS {
                link.send_frame(&fin_ack, server_ip, sender_port)?;
                stats.record_send(fin_ack.len());
                thread::sleep(FIN_ACK_INTERVAL);
            }

            info!(
                chunks = outcome.chunks_written,
                duplicates = outcome.duplicates,
                "transfer complete"
            );
            return Ok(outcome);
        }
    }
}
