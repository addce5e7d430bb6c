use clap::Parser;
use rand::Rng;
use srft::constants::CLIENT_PORT;
use srft::error::TransferError;
use srft::handshake;
use srft::raw::{local_ip_for, RawLink};
use srft::receiver;
use srft::stats::TransferStats;
use std::fs::File;
use std::io::BufWriter;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

/// Request one file from an srft server over raw sockets.
#[derive(Parser, Debug)]
#[command(name = "client")]
struct Args {
    /// Server IPv4 address
    server_ip: Ipv4Addr,

    /// Name of the file to request
    filename: String,

    /// Output file path (defaults to the requested name's basename)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn setup_logging() {
    tracing_subscriber::fmt::init();
}

fn main() -> ExitCode {
    setup_logging();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "transfer failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), TransferError> {
    let output = args.output.clone().unwrap_or_else(|| {
        Path::new(&args.filename)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("output.bin"))
    });

    // Nonzero identifier binding every frame of this transfer.
    let conn_id: u16 = rand::thread_rng().gen_range(1..=u16::MAX);
    let client_ip = local_ip_for(args.server_ip)?;
    info!(%client_ip, server_ip = %args.server_ip, conn_id, "requesting {}", args.filename);

    let mut link = RawLink::open(client_ip, CLIENT_PORT)?;
    let stats = TransferStats::new();
    stats.start_transfer();

    handshake::request_file(&mut link, args.server_ip, &args.filename, conn_id, &stats)?;

    let file = File::create(&output)?;
    let mut sink = BufWriter::new(file);
    let outcome =
        receiver::receive_file(&mut link, args.server_ip, conn_id, &mut sink, &stats)?;
    stats.end_transfer();

    info!(
        total = outcome.packets_total,
        valid = outcome.packets_valid,
        invalid = outcome.packets_invalid,
        duplicates = outcome.duplicates,
        chunks = outcome.chunks_written,
        "file saved to {}",
        output.display()
    );
    println!("{}", stats.snapshot());

    Ok(())
}
