//! Reliable data transfer over an unreliable datagram service.
//!
//! A point-to-point file transfer protocol with TCP-like reliability:
//! byte-indexed sequence numbers, cumulative acknowledgments, a sliding
//! window of in-flight segments, adaptive retransmission timeouts, fast
//! retransmit on triple duplicate ACKs, a one's complement checksum over
//! every packet, a three-way handshake, and FIN teardown.
//!
//! The [`sender`] and [`receiver`] state machines are async functions that
//! own all of their state and drive it from two event sources: datagrams
//! arriving on a [`Channel`](crate::network::Channel) and retransmission
//! timers. Timers are spawned tasks that post the sequence number back into
//! the state machine's event queue, so a timer that races an ACK is handled
//! idempotently by the still-outstanding check rather than by locking.

pub mod packet;
pub use packet::Packet;

pub mod rtt;
pub use rtt::RttEstimator;

pub mod window;
pub use window::SendWindow;

pub mod sender;
pub use sender::send_file;

pub mod receiver;
pub use receiver::receive_file;

use std::fmt::{self, Display};
use std::time::Instant;
use tracing::{event, Level};

/// A transmission attempt past this count fails the transfer.
pub const MAX_RETRANSMISSIONS: u32 = 16;

/// How long the sender waits for a SYN-ACK before giving up.
pub const HANDSHAKE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Bounded receive poll so the sender's loop never blocks indefinitely.
pub const POLL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

/// Which way a packet moved, for the per-segment log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Snd,
    Rcv,
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Snd => write!(f, "snd"),
            Direction::Rcv => write!(f, "rcv"),
        }
    }
}

/// Per-endpoint monotonic clock. Wire timestamps are nanoseconds since the
/// endpoint started; only the stamping endpoint ever interprets them, so no
/// cross-process base is needed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Clock {
    start: Instant,
}

impl Clock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_nanos(&self) -> i64 {
        self.start.elapsed().as_nanos() as i64
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Emits the per-packet event line:
/// `<snd|rcv> <t.mmm> <S|-> <A|-> <F|-> <D|-> <seq> <bytes> <ack>`.
pub(crate) fn log_packet(direction: Direction, clock: &Clock, packet: &Packet, is_data: bool) {
    event!(
        target: "transfer",
        Level::INFO,
        "{} {:.3} {} {} {} {} {} {} {}",
        direction,
        clock.elapsed_secs(),
        if packet.is_syn() { "S" } else { "-" },
        if packet.is_ack() { "A" } else { "-" },
        if packet.is_fin() { "F" } else { "-" },
        if is_data { "D" } else { "-" },
        packet.seq,
        packet.length(),
        packet.ack,
    );
}

/// Counters both endpoints report when a transfer ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    pub data_bytes: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub out_of_sequence_discards: u64,
    pub checksum_discards: u64,
    pub retransmissions: u64,
    /// The subset of `retransmissions` triggered by the third duplicate
    /// ACK rather than by a timer
    pub fast_retransmits: u64,
    pub duplicate_acks: u64,
}

impl Display for TransferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Amount of data transferred: {} bytes", self.data_bytes)?;
        writeln!(f, "Number of packets sent: {}", self.packets_sent)?;
        writeln!(f, "Number of packets received: {}", self.packets_received)?;
        writeln!(
            f,
            "Number of out-of-sequence packets discarded: {}",
            self.out_of_sequence_discards
        )?;
        writeln!(
            f,
            "Number of packets discarded due to incorrect checksum: {}",
            self.checksum_discards
        )?;
        writeln!(f, "Number of retransmissions: {}", self.retransmissions)?;
        write!(
            f,
            "Number of duplicate acknowledgements: {}",
            self.duplicate_acks
        )
    }
}

/// Why a transfer ended without delivering the file.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("no valid SYN-ACK arrived within the handshake window")]
    HandshakeTimeout,
    #[error("segment at seq {seq} exceeded {MAX_RETRANSMISSIONS} retransmissions")]
    MaxRetransmissions { seq: u32 },
    #[error("datagram channel failed: {0}")]
    Channel(#[from] crate::network::ChannelError),
}
