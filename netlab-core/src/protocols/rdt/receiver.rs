//! The receiving endpoint: handshake reply, in-order delivery with
//! out-of-order buffering, cumulative ACK emission, and teardown.

use super::{
    log_packet,
    packet::{Packet, FLAG_ACK, FLAG_FIN, FLAG_SYN},
    Clock, Direction, TransferError, TransferStats,
};
use crate::network::Channel;
use std::collections::BTreeMap;
use tracing::info;

/// Receives one file over `channel`, blocking until the sender's FIN.
/// Returns the delivered bytes and the final counters.
pub async fn receive_file<C: Channel>(
    mut channel: C,
) -> Result<(Vec<u8>, TransferStats), TransferError> {
    let clock = Clock::start();
    let mut stats = TransferStats::default();

    // Next expected byte; becomes 1 once the SYN arrives
    let mut expected: u32 = 0;
    // Out-of-order segments, keyed by sequence number
    let mut buffer: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
    let mut delivered: Vec<u8> = Vec::new();

    loop {
        let datagram = channel.recv().await?;
        stats.packets_received += 1;
        let Ok(packet) = Packet::from_bytes(datagram.into_iter()) else {
            continue;
        };
        if !packet.verify_checksum() {
            stats.checksum_discards += 1;
            continue;
        }
        let is_data = packet.length() > 0;
        log_packet(Direction::Rcv, &clock, &packet, is_data);

        // Connection init on SYN with seq 0: reply S|A echoing the SYN's
        // timestamp so the sender can take its base RTT sample
        if packet.is_syn() && packet.seq == 0 {
            expected = 1;
            let mut syn_ack = Packet::new(0, expected, packet.timestamp)
                .flag(FLAG_SYN)
                .flag(FLAG_ACK);
            syn_ack.compute_checksum();
            reply(&mut channel, &clock, &mut stats, &syn_ack).await?;
            continue;
        }

        if packet.is_fin() {
            let mut fin_ack = Packet::new(0, packet.seq + 1, packet.timestamp)
                .flag(FLAG_ACK)
                .flag(FLAG_FIN);
            fin_ack.compute_checksum();
            reply(&mut channel, &clock, &mut stats, &fin_ack).await?;

            info!(target: "transfer", "receiver statistics:\n{stats}");
            return Ok((delivered, stats));
        }

        if !is_data {
            // The sender's handshake-completion ACK; not a data segment
            continue;
        }

        let seq = packet.seq;
        let len = packet.length() as u32;
        if seq == expected {
            delivered.extend_from_slice(&packet.payload);
            stats.data_bytes += len as u64;
            expected += len;
            // Drain buffered segments that are now contiguous
            while let Some(payload) = buffer.remove(&expected) {
                stats.data_bytes += payload.len() as u64;
                expected += payload.len() as u32;
                delivered.extend_from_slice(&payload);
            }
        } else if seq > expected {
            // Out of order: hold it, idempotently for duplicates
            buffer.entry(seq).or_insert(packet.payload);
        } else {
            // Already delivered: a duplicate
            stats.out_of_sequence_discards += 1;
        }

        // Cumulative ACK, echoing the timestamp of the unit that caused it
        let mut ack = Packet::new(0, expected, packet.timestamp).flag(FLAG_ACK);
        ack.compute_checksum();
        reply(&mut channel, &clock, &mut stats, &ack).await?;
    }
}

async fn reply<C: Channel>(
    channel: &mut C,
    clock: &Clock,
    stats: &mut TransferStats,
    packet: &Packet,
) -> Result<(), TransferError> {
    channel.send(packet.build()).await?;
    stats.packets_sent += 1;
    log_packet(Direction::Snd, clock, packet, false);
    Ok(())
}
