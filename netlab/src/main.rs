//! The netlab file transfer endpoint.
//!
//! ```text
//! netlab send -p <local port> -s <remote host> -a <remote port> -f <file> -m <mtu> -c <window>
//! netlab receive -p <local port> -f <file> -m <mtu> -c <window>
//! ```

use clap::{Args, Parser, Subcommand};
use netlab::applications::UdpChannel;
use netlab_core::protocols::rdt::{receive_file, send_file, sender::SenderConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error};

#[derive(Parser)]
#[command(name = "netlab", about = "Reliable file transfer over UDP")]
struct Cli {
    /// Emit the per-packet event log on stderr
    #[arg(long)]
    log: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transfer a file to a receiving endpoint
    Send(SendArgs),
    /// Wait for one transfer and write it to a file
    Receive(ReceiveArgs),
}

#[derive(Args)]
struct SendArgs {
    /// Local UDP port
    #[arg(short = 'p')]
    port: u16,
    /// Remote host
    #[arg(short = 's')]
    remote_host: String,
    /// Remote UDP port
    #[arg(short = 'a')]
    remote_port: u16,
    /// File to transfer
    #[arg(short = 'f')]
    file: PathBuf,
    /// Maximum payload bytes per segment
    #[arg(short = 'm')]
    mtu: usize,
    /// Window size in segments
    #[arg(short = 'c')]
    window: usize,
}

#[derive(Args)]
struct ReceiveArgs {
    /// Local UDP port
    #[arg(short = 'p')]
    port: u16,
    /// Where to write the received file
    #[arg(short = 'f')]
    file: PathBuf,
    /// Maximum payload bytes per segment
    #[arg(short = 'm')]
    mtu: usize,
    /// Window size in segments; accepted for symmetry with the sender
    #[arg(short = 'c')]
    window: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.log {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_max_level(level)
        .init();

    match cli.command {
        Command::Send(args) => send(args).await,
        Command::Receive(args) => receive(args).await,
    }
}

async fn send(args: SendArgs) -> ExitCode {
    let file = match tokio::fs::read(&args.file).await {
        Ok(file) => file,
        Err(io_error) => {
            error!("could not read {}: {io_error}", args.file.display());
            return ExitCode::FAILURE;
        }
    };

    let remote = match tokio::net::lookup_host((args.remote_host.as_str(), args.remote_port))
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
    {
        Some(remote) => remote,
        None => {
            error!("could not resolve {}:{}", args.remote_host, args.remote_port);
            return ExitCode::FAILURE;
        }
    };

    let channel = match UdpChannel::bind(args.port).await {
        Ok(channel) => channel.connect(remote),
        Err(io_error) => {
            error!("could not bind port {}: {io_error}", args.port);
            return ExitCode::FAILURE;
        }
    };

    let config = SenderConfig {
        mtu: args.mtu,
        window: args.window,
    };
    match send_file(channel, &file, config).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(transfer_error) => {
            error!("transfer failed: {transfer_error}");
            ExitCode::FAILURE
        }
    }
}

async fn receive(args: ReceiveArgs) -> ExitCode {
    debug!("mtu={} window={} accepted", args.mtu, args.window);

    let channel = match UdpChannel::bind(args.port).await {
        Ok(channel) => channel,
        Err(io_error) => {
            error!("could not bind port {}: {io_error}", args.port);
            return ExitCode::FAILURE;
        }
    };

    match receive_file(channel).await {
        Ok((delivered, _)) => {
            if let Err(io_error) = tokio::fs::write(&args.file, delivered).await {
                error!("could not write {}: {io_error}", args.file.display());
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(transfer_error) => {
            error!("transfer failed: {transfer_error}");
            ExitCode::FAILURE
        }
    }
}
