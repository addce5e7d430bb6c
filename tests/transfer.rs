//! End-to-end transfers over an in-memory transport pair: two loops, a
//! faulty channel between them, and a byte-equal file at the end.

use srft::constants::{CLIENT_PORT, SERVER_PORT};
use srft::error::TransferError;
use srft::handshake;
use srft::packet::{Packet, PacketKind};
use srft::raw::Transport;
use srft::receiver;
use srft::sender;
use srft::stats::TransferStats;
use std::collections::HashSet;
use std::io;
use std::net::Ipv4Addr;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const CLIENT_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const CONN_ID: u16 = 7;
/// Short RTO keeps the loss/retransmit tests quick.
const TEST_RTO: Duration = Duration::from_millis(50);

type Datagram = (Vec<u8>, Ipv4Addr, u16);

/// One endpoint of an in-memory link; frames sent here land in the peer's
/// inbox stamped with our address.
struct MockLink {
    addr: Ipv4Addr,
    port: u16,
    inbox: Receiver<Datagram>,
    outbox: Sender<Datagram>,
}

impl Transport for MockLink {
    fn send_frame(&mut self, frame: &[u8], _dst_ip: Ipv4Addr, _dst_port: u16) -> io::Result<()> {
        // A dropped peer is just a silent network.
        let _ = self.outbox.send((frame.to_vec(), self.addr, self.port));
        Ok(())
    }

    fn recv_frame(&mut self, timeout: Duration) -> io::Result<Option<Datagram>> {
        match self.inbox.recv_timeout(timeout) {
            Ok(datagram) => Ok(Some(datagram)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}

fn duplex() -> (MockLink, MockLink) {
    let (to_client, client_inbox) = channel();
    let (to_server, server_inbox) = channel();
    let server = MockLink {
        addr: SERVER_IP,
        port: SERVER_PORT,
        inbox: server_inbox,
        outbox: to_client,
    };
    let client = MockLink {
        addr: CLIENT_IP,
        port: CLIENT_PORT,
        inbox: client_inbox,
        outbox: to_server,
    };
    (server, client)
}

fn data_seq(frame: &[u8]) -> Option<u32> {
    let packet = Packet::decode(frame).ok()?;
    matches!(packet.kind(), PacketKind::Data { .. }).then_some(packet.seq)
}

/// Swallows the first transmission of every data chunk.
struct DropFirst<T> {
    inner: T,
    seen: HashSet<u32>,
}

impl<T: Transport> Transport for DropFirst<T> {
    fn send_frame(&mut self, frame: &[u8], dst_ip: Ipv4Addr, dst_port: u16) -> io::Result<()> {
        if let Some(seq) = data_seq(frame) {
            if self.seen.insert(seq) {
                return Ok(()); // lost in the network
            }
        }
        self.inner.send_frame(frame, dst_ip, dst_port)
    }

    fn recv_frame(&mut self, timeout: Duration) -> io::Result<Option<Datagram>> {
        self.inner.recv_frame(timeout)
    }
}

/// Delivers every data chunk twice.
struct Duplicating<T> {
    inner: T,
}

impl<T: Transport> Transport for Duplicating<T> {
    fn send_frame(&mut self, frame: &[u8], dst_ip: Ipv4Addr, dst_port: u16) -> io::Result<()> {
        self.inner.send_frame(frame, dst_ip, dst_port)?;
        if data_seq(frame).is_some() {
            self.inner.send_frame(frame, dst_ip, dst_port)?;
        }
        Ok(())
    }

    fn recv_frame(&mut self, timeout: Duration) -> io::Result<Option<Datagram>> {
        self.inner.recv_frame(timeout)
    }
}

/// Flips one payload bit in the first copy of the given chunk.
struct CorruptFirst<T> {
    inner: T,
    target: u32,
    done: bool,
}

impl<T: Transport> Transport for CorruptFirst<T> {
    fn send_frame(&mut self, frame: &[u8], dst_ip: Ipv4Addr, dst_port: u16) -> io::Result<()> {
        if !self.done && data_seq(frame) == Some(self.target) {
            self.done = true;
            let mut mangled = frame.to_vec();
            *mangled.last_mut().unwrap() ^= 0x01;
            return self.inner.send_frame(&mangled, dst_ip, dst_port);
        }
        self.inner.send_frame(frame, dst_ip, dst_port)
    }

    fn recv_frame(&mut self, timeout: Duration) -> io::Result<Option<Datagram>> {
        self.inner.recv_frame(timeout)
    }
}

/// Holds the first `n` data frames and releases them in reverse order.
struct Reordering<T> {
    inner: T,
    hold: Vec<(Vec<u8>, Ipv4Addr, u16)>,
    n: usize,
}

impl<T: Transport> Transport for Reordering<T> {
    fn send_frame(&mut self, frame: &[u8], dst_ip: Ipv4Addr, dst_port: u16) -> io::Result<()> {
        if self.hold.len() < self.n && data_seq(frame).is_some() {
            self.hold.push((frame.to_vec(), dst_ip, dst_port));
            if self.hold.len() == self.n {
                for (frame, ip, port) in std::mem::take(&mut self.hold).into_iter().rev() {
                    self.inner.send_frame(&frame, ip, port)?;
                }
            }
            return Ok(());
        }
        self.inner.send_frame(frame, dst_ip, dst_port)
    }

    fn recv_frame(&mut self, timeout: Duration) -> io::Result<Option<Datagram>> {
        self.inner.recv_frame(timeout)
    }
}

/// Sends vanish, receives always time out.
struct BlackHole;

impl Transport for BlackHole {
    fn send_frame(&mut self, _frame: &[u8], _dst_ip: Ipv4Addr, _dst_port: u16) -> io::Result<()> {
        Ok(())
    }

    fn recv_frame(&mut self, timeout: Duration) -> io::Result<Option<Datagram>> {
        thread::sleep(timeout);
        Ok(None)
    }
}

/// Run a full data phase: server streams `data`, client persists it.
/// Returns (received bytes, server result, client outcome, stats pair).
fn run_transfer<S>(
    mut server_link: S,
    mut client_link: MockLink,
    data: &[u8],
) -> (
    Vec<u8>,
    Result<(), TransferError>,
    Result<receiver::ReceiveOutcome, TransferError>,
    TransferStats,
    TransferStats,
)
where
    S: Transport + Send + 'static,
{
    let chunks = sender::chunk_bytes(data, 1400).unwrap();
    let server = thread::spawn(move || {
        let stats = TransferStats::new();
        let result = sender::send_file(
            &mut server_link,
            CLIENT_IP,
            CLIENT_PORT,
            CONN_ID,
            &chunks,
            10,
            TEST_RTO,
            &stats,
        );
        (result, stats)
    });

    let stats = TransferStats::new();
    let mut sink = Vec::new();
    let outcome = receiver::receive_file(&mut client_link, SERVER_IP, CONN_ID, &mut sink, &stats);
    let (server_result, server_stats) = server.join().unwrap();

    (sink, server_result, outcome, server_stats, stats)
}

#[test]
fn test_perfect_channel() {
    let (server_link, client_link) = duplex();
    let data: Vec<u8> = (0..3000u32).map(|i| i as u8).collect();

    let (sink, server_result, outcome, server_stats, _) =
        run_transfer(server_link, client_link, &data);

    server_result.unwrap();
    let outcome = outcome.unwrap();
    assert_eq!(sink, data);
    assert_eq!(outcome.chunks_written, 3);
    assert_eq!(outcome.fin_seq, Some(2));
    assert_eq!(outcome.duplicates, 0);
    // Nothing was lost, so nothing should have been retransmitted.
    assert_eq!(server_stats.snapshot().packets_retransmitted, 0);
}

#[test]
fn test_empty_file() {
    let (server_link, client_link) = duplex();

    let (sink, server_result, outcome, _, _) = run_transfer(server_link, client_link, &[]);

    server_result.unwrap();
    let outcome = outcome.unwrap();
    assert!(sink.is_empty());
    assert_eq!(outcome.fin_seq, Some(0));
    assert_eq!(outcome.chunks_written, 1);
}

#[test]
fn test_single_chunk_file() {
    let (server_link, client_link) = duplex();
    let data = b"one small file".to_vec();

    let (sink, server_result, outcome, _, _) = run_transfer(server_link, client_link, &data);

    server_result.unwrap();
    assert_eq!(sink, data);
    assert_eq!(outcome.unwrap().fin_seq, Some(0));
}

#[test]
fn test_reordered_delivery() {
    let (server_link, client_link) = duplex();
    let data: Vec<u8> = (0..3000u32).map(|i| (i * 7) as u8).collect();
    let link = Reordering { inner: server_link, hold: Vec::new(), n: 3 };

    let (sink, server_result, outcome, _, _) = run_transfer(link, client_link, &data);

    server_result.unwrap();
    assert_eq!(sink, data);
    assert_eq!(outcome.unwrap().chunks_written, 3);
}

#[test]
fn test_duplicated_delivery() {
    let (server_link, client_link) = duplex();
    let data: Vec<u8> = (0..3000u32).map(|i| (i * 3) as u8).collect();
    let link = Duplicating { inner: server_link };

    let (sink, server_result, outcome, _, _) = run_transfer(link, client_link, &data);

    server_result.unwrap();
    let outcome = outcome.unwrap();
    assert_eq!(sink, data);
    assert!(outcome.duplicates > 0);
    assert_eq!(outcome.chunks_written, 3);
}

#[test]
fn test_lossy_channel_recovers_by_retransmit() {
    let (server_link, client_link) = duplex();
    let data: Vec<u8> = (0..5000u32).map(|i| (i ^ 0x5A) as u8).collect();
    let link = DropFirst { inner: server_link, seen: HashSet::new() };

    let (sink, server_result, outcome, server_stats, _) =
        run_transfer(link, client_link, &data);

    server_result.unwrap();
    assert_eq!(sink, data);
    assert_eq!(outcome.unwrap().chunks_written, 4);
    assert!(server_stats.snapshot().packets_retransmitted >= 4);
}

#[test]
fn test_corrupted_chunk_is_dropped_then_repaired() {
    let (server_link, client_link) = duplex();
    let data: Vec<u8> = (0..3000u32).map(|i| (i + 13) as u8).collect();
    let link = CorruptFirst { inner: server_link, target: 1, done: false };

    let (sink, server_result, outcome, server_stats, _) =
        run_transfer(link, client_link, &data);

    server_result.unwrap();
    let outcome = outcome.unwrap();
    assert_eq!(sink, data);
    // The mangled copy never counts as valid and is never acknowledged.
    assert!(outcome.packets_invalid >= 1);
    assert!(server_stats.snapshot().packets_retransmitted >= 1);
}

#[test]
fn test_sender_fails_after_retry_exhaustion() {
    let stats = TransferStats::new();
    let chunks = sender::chunk_bytes(b"into the void", 1400).unwrap();

    let err = sender::send_file(
        &mut BlackHole,
        CLIENT_IP,
        CLIENT_PORT,
        CONN_ID,
        &chunks,
        10,
        Duration::from_millis(10),
        &stats,
    )
    .unwrap_err();

    assert!(matches!(err, TransferError::RetryExhausted { seq: 0, retries: 10 }));
    assert_eq!(stats.snapshot().packets_retransmitted, 10);
}

#[test]
fn test_full_lifecycle_with_handshake() {
    let (mut server_link, mut client_link) = duplex();
    let data: Vec<u8> = (0..4242u32).map(|i| (i * 31) as u8).collect();
    let chunks = sender::chunk_bytes(&data, 1400).unwrap();

    let server = thread::spawn(move || {
        let stats = TransferStats::new();
        let request = handshake::await_request(&mut server_link, Duration::from_secs(5), &stats)
            .unwrap()
            .expect("a SYN should arrive");
        assert_eq!(request.filename, "testfile.bin");
        sender::send_file(
            &mut server_link,
            request.peer_ip,
            request.peer_port,
            request.conn_id,
            &chunks,
            10,
            TEST_RTO,
            &stats,
        )
        .unwrap();
        request.conn_id
    });

    let stats = TransferStats::new();
    let conn_id = 4242;
    handshake::request_file(&mut client_link, SERVER_IP, "testfile.bin", conn_id, &stats)
        .unwrap();
    let mut sink = Vec::new();
    let outcome =
        receiver::receive_file(&mut client_link, SERVER_IP, conn_id, &mut sink, &stats).unwrap();

    assert_eq!(server.join().unwrap(), conn_id);
    assert_eq!(sink, data);
    assert_eq!(outcome.chunks_written, 4);
    assert!(stats.snapshot().acks_sent >= 4);
}

#[test]
fn test_foreign_conn_id_is_ignored() {
    let (mut server_link, client_link) = duplex();
    let data = b"bound to another conversation".to_vec();

    // A stray frame under the wrong conn_id arrives first.
    let stray = Packet::data(0, b"intruder".to_vec(), true, CONN_ID + 1).encode().unwrap();
    server_link.send_frame(&stray, CLIENT_IP, CLIENT_PORT).unwrap();

    let (sink, server_result, outcome, _, _) = run_transfer(server_link, client_link, &data);

    server_result.unwrap();
    let outcome = outcome.unwrap();
    assert_eq!(sink, data);
    assert!(outcome.packets_invalid >= 1);
}
