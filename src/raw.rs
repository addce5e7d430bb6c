//! Raw datagram transport: manually built IPv4 + UDP headers over
//! `SOCK_RAW`, so the protocol works on any POSIX host without kernel UDP
//! cooperation. Requires CAP_NET_RAW / root.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::checksum;
use crate::constants::{
    IPPROTO_UDP, IP_HEADER_SIZE, IP_IDENTIFICATION, IP_TTL, RECV_BUFFER_SIZE, UDP_HEADER_SIZE,
};

/// Linux IPPROTO_RAW; sends get our IP header verbatim.
const PROTO_RAW: i32 = 255;

/// The seam the transfer loops run on. The production impl is [`RawLink`];
/// tests substitute an in-memory pair.
pub trait Transport {
    /// Transmit one application frame to `dst_ip:dst_port`.
    fn send_frame(&mut self, frame: &[u8], dst_ip: Ipv4Addr, dst_port: u16) -> io::Result<()>;

    /// Wait up to `timeout` for a frame addressed to our port. Returns the
    /// application bytes with the sender's address, or `None` on timeout.
    fn recv_frame(&mut self, timeout: Duration)
        -> io::Result<Option<(Vec<u8>, Ipv4Addr, u16)>>;
}

/// Build the fixed-shape 20-byte IPv4 header: version 4, IHL 5, TTL 64,
/// protocol 17, identification 54321, no fragmentation, checksum computed
/// over the header itself.
pub fn build_ipv4_header(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, udp_length: usize) -> [u8; IP_HEADER_SIZE] {
    let mut header = [0u8; IP_HEADER_SIZE];
    header[0] = (4 << 4) | 5; // version 4, IHL 5 words
    header[1] = 0; // TOS
    let total_length = (IP_HEADER_SIZE + udp_length) as u16;
    header[2..4].copy_from_slice(&total_length.to_be_bytes());
    header[4..6].copy_from_slice(&IP_IDENTIFICATION.to_be_bytes());
    header[6..8].copy_from_slice(&0u16.to_be_bytes()); // flags + fragment offset
    header[8] = IP_TTL;
    header[9] = IPPROTO_UDP;
    // checksum at 10..12 stays zero while summing
    header[12..16].copy_from_slice(&src_ip.octets());
    header[16..20].copy_from_slice(&dst_ip.octets());

    let sum = checksum::compute(&header);
    header[10..12].copy_from_slice(&sum.to_be_bytes());
    header
}

/// 8-byte UDP header; the checksum field is zero, which IPv4 permits.
pub fn build_udp_header(src_port: u16, dst_port: u16, payload_length: usize) -> [u8; UDP_HEADER_SIZE] {
    let mut header = [0u8; UDP_HEADER_SIZE];
    header[0..2].copy_from_slice(&src_port.to_be_bytes());
    header[2..4].copy_from_slice(&dst_port.to_be_bytes());
    let udp_length = (UDP_HEADER_SIZE + payload_length) as u16;
    header[4..6].copy_from_slice(&udp_length.to_be_bytes());
    // checksum left zero
    header
}

/// Slice an inbound IP datagram down to the application frame. Reads the
/// IHL nibble, steps over the UDP header, and filters by destination port.
/// Returns (frame, sender ip, source port).
pub fn parse_datagram(data: &[u8], expected_port: u16) -> Option<(&[u8], Ipv4Addr, u16)> {
    if data.len() < IP_HEADER_SIZE {
        return None;
    }

    let ihl = ((data[0] & 0x0F) as usize) * 4;
    if ihl < IP_HEADER_SIZE || data.len() < ihl + UDP_HEADER_SIZE {
        return None;
    }
    let sender = Ipv4Addr::new(data[12], data[13], data[14], data[15]);

    let udp = &data[ihl..ihl + UDP_HEADER_SIZE];
    let src_port = u16::from_be_bytes([udp[0], udp[1]]);
    let dst_port = u16::from_be_bytes([udp[2], udp[3]]);
    let udp_length = u16::from_be_bytes([udp[4], udp[5]]) as usize;

    if dst_port != expected_port {
        return None;
    }
    if udp_length < UDP_HEADER_SIZE || data.len() < ihl + udp_length {
        return None;
    }

    Some((&data[ihl + UDP_HEADER_SIZE..ihl + udp_length], sender, src_port))
}

/// Raw-socket link: one `IPPROTO_RAW` socket for sending datagrams we
/// assembled ourselves, one `IPPROTO_UDP` raw socket delivering whole
/// IP+UDP datagrams for receiving.
pub struct RawLink {
    send_sock: Socket,
    recv_sock: Socket,
    src_ip: Ipv4Addr,
    src_port: u16,
}

impl RawLink {
    pub fn open(src_ip: Ipv4Addr, src_port: u16) -> io::Result<Self> {
        let send_sock = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::from(PROTO_RAW)))?;
        // The kernel must not prepend its own IP header.
        send_sock.set_header_included_v4(true)?;

        let recv_sock = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::UDP))?;
        recv_sock.bind(&SockAddr::from(SocketAddrV4::new(src_ip, src_port)))?;

        Ok(Self { send_sock, recv_sock, src_ip, src_port })
    }

    pub fn src_ip(&self) -> Ipv4Addr {
        self.src_ip
    }
}

impl Transport for RawLink {
    fn send_frame(&mut self, frame: &[u8], dst_ip: Ipv4Addr, dst_port: u16) -> io::Result<()> {
        // Bound to the wildcard address: resolve the route's source per
        // destination, since 0.0.0.0 is not a usable IP-header source.
        let src_ip = if self.src_ip.is_unspecified() {
            local_ip_for(dst_ip)?
        } else {
            self.src_ip
        };

        let udp_header = build_udp_header(self.src_port, dst_port, frame.len());
        let udp_length = UDP_HEADER_SIZE + frame.len();
        let ip_header = build_ipv4_header(src_ip, dst_ip, udp_length);

        let mut datagram = Vec::with_capacity(IP_HEADER_SIZE + udp_length);
        datagram.extend_from_slice(&ip_header);
        datagram.extend_from_slice(&udp_header);
        datagram.extend_from_slice(frame);

        let dst = SockAddr::from(SocketAddr::new(dst_ip.into(), 0));
        self.send_sock.send_to(&datagram, &dst)?;
        debug!(bytes = datagram.len(), dst = %dst_ip, dst_port, "datagram out");
        Ok(())
    }

    fn recv_frame(
        &mut self,
        timeout: Duration,
    ) -> io::Result<Option<(Vec<u8>, Ipv4Addr, u16)>> {
        let deadline = Instant::now() + timeout;
        let mut buffer = [MaybeUninit::<u8>::uninit(); RECV_BUFFER_SIZE];

        // The raw socket sees every inbound UDP datagram on the host, so
        // keep reading until one is ours or the deadline passes.
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.recv_sock.set_read_timeout(Some(remaining))?;

            let bytes_read = match self.recv_sock.recv_from(&mut buffer) {
                Ok((n, _)) => n,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };

            let data =
                unsafe { std::slice::from_raw_parts(buffer.as_ptr() as *const u8, bytes_read) };

            if let Some((frame, sender_ip, src_port)) = parse_datagram(data, self.src_port) {
                return Ok(Some((frame.to_vec(), sender_ip, src_port)));
            }
        }
    }
}

/// Discover the local address that routes toward `peer`. A throwaway UDP
/// socket is connected (no traffic) and asked for its local half.
pub fn local_ip_for(peer: Ipv4Addr) -> io::Result<Ipv4Addr> {
    let probe = UdpSocket::bind("0.0.0.0:0")?;
    probe.connect((peer, 80))?;
    match probe.local_addr()? {
        SocketAddr::V4(addr) => Ok(*addr.ip()),
        SocketAddr::V6(addr) => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("expected an IPv4 local address, got {addr}"),
        )),
    }
}
