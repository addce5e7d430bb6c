//! srft: reliable one-file transfer over raw IPv4 sockets.
//!
//! A client requests a named file; the server streams it in fixed-size
//! chunks; the client reorders, verifies, persists, and cumulatively
//! acknowledges. Frames ride a custom 15-byte header inside manually built
//! IP + UDP datagrams, so both binaries need raw-socket privileges.

pub mod checksum;
pub mod constants;
pub mod error;
pub mod flags;
pub mod handshake;
pub mod packet;
pub mod raw;
pub mod receiver;
pub mod reorder;
pub mod sender;
pub mod stats;
pub mod window;
