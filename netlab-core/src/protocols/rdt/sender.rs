//! The sending endpoint: handshake, windowed transmission, ACK processing,
//! fast retransmit, and teardown.

use super::{
    log_packet,
    packet::{Packet, FLAG_ACK, FLAG_FIN, FLAG_SYN},
    window::{SendWindow, DUPLICATE_ACK_THRESHOLD},
    Clock, Direction, RttEstimator, TransferError, TransferStats, HANDSHAKE_TIMEOUT,
    MAX_RETRANSMISSIONS, POLL_TIMEOUT,
};
use crate::network::Channel;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{sleep, timeout, Duration, Instant},
};
use tracing::info;

/// Scheduled timers never undershoot one millisecond.
const TIMER_FLOOR_NANOS: i64 = 1_000_000;

/// What woke the sender's event loop.
enum Event {
    TimerFired(u32),
    Datagram(Vec<u8>),
    PollExpired,
}

#[derive(Debug, Clone, Copy)]
pub struct SenderConfig {
    /// Maximum payload bytes per segment
    pub mtu: usize,
    /// Maximum outstanding segments
    pub window: usize,
}

/// Transfers `file` to the peer on `channel`. Returns the final counters, or
/// the failure that ended the transfer after logging the counters gathered
/// so far.
pub async fn send_file<C: Channel>(
    mut channel: C,
    file: &[u8],
    config: SenderConfig,
) -> Result<TransferStats, TransferError> {
    let clock = Clock::start();
    let mut stats = TransferStats::default();
    let mut rtt = RttEstimator::new();
    let mut window = SendWindow::new(config.window);
    let file_len = file.len() as u32;

    // --- handshake: SYN, await SYN-ACK, unawaited final ACK ---

    let mut syn = Packet::new(0, 0, clock.now_nanos()).flag(FLAG_SYN);
    syn.compute_checksum();
    transmit(&mut channel, &clock, &mut stats, &syn, false).await?;

    let syn_ack = match await_syn_ack(&mut channel).await? {
        Some(packet) => packet,
        None => {
            info!(target: "transfer", "sender statistics:\n{stats}");
            return Err(TransferError::HandshakeTimeout);
        }
    };
    stats.packets_received += 1;
    log_packet(Direction::Rcv, &clock, &syn_ack, false);
    rtt.sample(syn_ack.seq, clock.now_nanos() - syn_ack.timestamp);

    let mut handshake_ack = Packet::new(1, 1, clock.now_nanos()).flag(FLAG_ACK);
    handshake_ack.compute_checksum();
    transmit(&mut channel, &clock, &mut stats, &handshake_ack, false).await?;

    // --- data phase ---

    // MTU-sized slices with byte-indexed sequence numbers starting at 1
    let segments: Vec<(u32, std::ops::Range<usize>)> = (0..file.len())
        .step_by(config.mtu.max(1))
        .map(|offset| {
            let end = (offset + config.mtu).min(file.len());
            (offset as u32 + 1, offset..end)
        })
        .collect();

    // Timers post their sequence number here; the loop checks whether the
    // segment is still outstanding before acting, which makes a timer that
    // raced an acknowledgment harmless.
    let (timer_tx, mut timer_rx) = mpsc::channel::<u32>(config.window.max(1) * 4 + 4);

    let mut base: u32 = 1;
    let mut next_segment = 0;

    while base <= file_len {
        while next_segment < segments.len() && window.has_space() {
            let (seq, range) = segments[next_segment].clone();
            let payload = file[range].to_vec();
            let mut packet = Packet::new(seq, 1, clock.now_nanos())
                .flag(FLAG_ACK)
                .payload(payload.clone());
            packet.compute_checksum();
            transmit(&mut channel, &clock, &mut stats, &packet, true).await?;
            stats.data_bytes += packet.length() as u64;

            let timer = schedule_timer(timer_tx.clone(), seq, rtt.timeout_nanos());
            window.admit(seq, payload, timer);
            next_segment += 1;
        }

        // Select produces a value and releases its borrow of the channel
        // before the event is acted on
        let event = tokio::select! {
            fired = timer_rx.recv() => {
                // The loop owns a sender clone, so the channel never closes
                Event::TimerFired(fired.expect("timer channel closed"))
            }
            received = timeout(POLL_TIMEOUT, channel.recv()) => match received {
                // Poll timeout: go around again
                Err(_) => Event::PollExpired,
                Ok(datagram) => Event::Datagram(datagram?),
            },
        };

        let datagram = match event {
            Event::PollExpired => continue,
            Event::TimerFired(seq) => {
                if window.contains(seq) {
                    retransmit(&mut channel, &clock, &mut stats, &mut window, &rtt, &timer_tx, seq)
                        .await?;
                }
                continue;
            }
            Event::Datagram(datagram) => datagram,
        };

        let Ok(packet) = Packet::from_bytes(datagram.into_iter()) else {
            continue;
        };
        stats.packets_received += 1;
        if !packet.verify_checksum() {
            stats.checksum_discards += 1;
            continue;
        }
        log_packet(Direction::Rcv, &clock, &packet, false);
        if !packet.is_ack() {
            continue;
        }

        let ack_num = packet.ack;
        let observed = window.observe_ack(ack_num);
        if observed > 1 {
            stats.duplicate_acks += 1;
        }

        rtt.sample(packet.seq, clock.now_nanos() - packet.timestamp);

        window.ack(ack_num);
        base = ack_num;

        if observed == DUPLICATE_ACK_THRESHOLD {
            if let Some(lowest) = window.lowest_outstanding() {
                info!(target: "transfer", "fast retransmit seq={lowest}");
                stats.fast_retransmits += 1;
                retransmit(
                    &mut channel, &clock, &mut stats, &mut window, &rtt, &timer_tx, lowest,
                )
                .await?;
            }
        }
    }
    window.cancel_all();

    // --- teardown ---

    let mut fin = Packet::new(file_len + 1, 1, clock.now_nanos())
        .flag(FLAG_FIN)
        .flag(FLAG_ACK);
    fin.compute_checksum();
    transmit(&mut channel, &clock, &mut stats, &fin, false).await?;

    // Wait briefly for the peer's FIN-ACK, but termination does not depend
    // on its arrival
    if let Ok(Ok(datagram)) = timeout(POLL_TIMEOUT, channel.recv()).await {
        if let Ok(packet) = Packet::from_bytes(datagram.into_iter()) {
            stats.packets_received += 1;
            if packet.verify_checksum() {
                log_packet(Direction::Rcv, &clock, &packet, false);
            } else {
                stats.checksum_discards += 1;
            }
        }
    }

    info!(target: "transfer", "sender statistics:\n{stats}");
    Ok(stats)
}

/// Waits up to the handshake deadline for a checksum-valid unit carrying
/// both S and A. Returns `None` on deadline.
async fn await_syn_ack<C: Channel>(channel: &mut C) -> Result<Option<Packet>, TransferError> {
    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        let datagram = match timeout(remaining, channel.recv()).await {
            Err(_) => return Ok(None),
            Ok(datagram) => datagram?,
        };
        if let Ok(packet) = Packet::from_bytes(datagram.into_iter()) {
            if packet.verify_checksum() && packet.has_flags(FLAG_SYN | FLAG_ACK) {
                return Ok(Some(packet));
            }
        }
    }
}

async fn transmit<C: Channel>(
    channel: &mut C,
    clock: &Clock,
    stats: &mut TransferStats,
    packet: &Packet,
    is_data: bool,
) -> Result<(), TransferError> {
    channel.send(packet.build()).await?;
    stats.packets_sent += 1;
    log_packet(Direction::Snd, clock, packet, is_data);
    Ok(())
}

/// Resends one outstanding segment with a fresh timestamp, checksum, and
/// timer. Shared by the timeout and fast-retransmit paths. Fails the
/// transfer when the segment's attempt count passes the limit.
#[allow(clippy::too_many_arguments)]
async fn retransmit<C: Channel>(
    channel: &mut C,
    clock: &Clock,
    stats: &mut TransferStats,
    window: &mut SendWindow,
    rtt: &RttEstimator,
    timer_tx: &mpsc::Sender<u32>,
    seq: u32,
) -> Result<(), TransferError> {
    let timer = schedule_timer(timer_tx.clone(), seq, rtt.timeout_nanos());
    let Some((payload, attempt)) = window.begin_retransmit(seq, timer) else {
        return Ok(());
    };
    if attempt > MAX_RETRANSMISSIONS {
        window.cancel_all();
        info!(target: "transfer", "sender statistics:\n{stats}");
        return Err(TransferError::MaxRetransmissions { seq });
    }
    stats.retransmissions += 1;

    let mut packet = Packet::new(seq, 1, clock.now_nanos())
        .flag(FLAG_ACK)
        .payload(payload);
    packet.compute_checksum();
    transmit(channel, clock, stats, &packet, true).await
}

fn schedule_timer(events: mpsc::Sender<u32>, seq: u32, timeout_nanos: i64) -> JoinHandle<()> {
    let delay = Duration::from_nanos(timeout_nanos.max(TIMER_FLOOR_NANOS) as u64);
    tokio::spawn(async move {
        sleep(delay).await;
        // The receiving side being gone just means the transfer ended
        let _ = events.send(seq).await;
    })
}
