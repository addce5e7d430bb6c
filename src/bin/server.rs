use clap::Parser;
use srft::constants::{ACK_TIMEOUT, MAX_PAYLOAD, SERVER_PORT, WINDOW_SIZE};
use srft::error::TransferError;
use srft::handshake::{self, Request};
use srft::raw::{RawLink, Transport};
use srft::sender::{self, ServerConfig};
use srft::stats::TransferStats;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

/// Serve files to srft clients over raw sockets.
#[derive(Parser, Debug)]
#[command(name = "server")]
struct Args {
    /// Address to receive on
    #[arg(long, default_value = "0.0.0.0")]
    host: Ipv4Addr,

    /// UDP port clients address
    #[arg(long, default_value_t = SERVER_PORT)]
    port: u16,

    /// Directory served files are looked up in
    #[arg(long, default_value = ".")]
    out: PathBuf,

    /// Payload bytes per chunk
    #[arg(long, default_value_t = MAX_PAYLOAD)]
    chunk: usize,

    /// Sliding-window size in chunks
    #[arg(long, default_value_t = WINDOW_SIZE)]
    window: u32,

    /// Retransmission timeout in milliseconds
    #[arg(long, default_value_t = 500)]
    rto: u64,
}

fn setup_logging() {
    tracing_subscriber::fmt::init();
}

fn main() -> ExitCode {
    setup_logging();
    let args = Args::parse();

    if args.chunk == 0 || args.chunk > MAX_PAYLOAD {
        error!(chunk = args.chunk, "chunk size must be in 1..={MAX_PAYLOAD}");
        return ExitCode::FAILURE;
    }
    if args.window == 0 {
        error!("window must be at least 1");
        return ExitCode::FAILURE;
    }

    let cfg = ServerConfig {
        host: args.host,
        port: args.port,
        root: args.out,
        chunk_size: args.chunk,
        window: args.window,
        rto: Duration::from_millis(args.rto),
    };

    match run(&cfg) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server stopped");
            ExitCode::FAILURE
        }
    }
}

fn run(cfg: &ServerConfig) -> Result<(), TransferError> {
    let mut link = RawLink::open(cfg.host, cfg.port)?;
    info!(host = %cfg.host, port = cfg.port, root = %cfg.root.display(), "listening");

    // One client at a time; each accepted handshake is served to
    // completion (or failure) before the next SYN is considered.
    loop {
        let stats = TransferStats::new();
        let Some(request) = handshake::await_request(&mut link, ACK_TIMEOUT, &stats)? else {
            continue;
        };

        stats.start_transfer();
        match serve(&mut link, cfg, &request, &stats) {
            Ok(()) => {
                stats.end_transfer();
                println!("{}", stats.snapshot());
            }
            Err(e) => {
                error!(
                    error = %e,
                    peer = %request.peer_ip,
                    conn_id = request.conn_id,
                    "transfer abandoned"
                );
            }
        }
    }
}

fn serve<T: Transport>(
    link: &mut T,
    cfg: &ServerConfig,
    request: &Request,
    stats: &TransferStats,
) -> Result<(), TransferError> {
    // Serve by basename only; a requested path never escapes the root.
    let Some(name) = Path::new(&request.filename).file_name() else {
        warn!(filename = %request.filename, "request without a usable filename");
        return Ok(());
    };
    let path = cfg.root.join(name);

    let chunks = sender::chunk_file(&path, cfg.chunk_size)?;
    sender::send_file(
        link,
        request.peer_ip,
        request.peer_port,
        request.conn_id,
        &chunks,
        cfg.window,
        cfg.rto,
        stats,
    )
}
