use netlab_core::network::{Fault, Network};
use netlab_core::protocols::rdt::{receive_file, send_file, sender::SenderConfig, Packet};

/// Recovery via the duplicate-ACK path: the first data segment is dropped
/// on its first transmission while the following three get through, so the
/// receiver emits three acknowledgments for byte 1 and the sender fast
/// retransmits without waiting for the timer.
pub async fn fast_retransmit() {
    let mut dropped_once = false;
    let network = Network::builder()
        .fault_hook(move |datagram| {
            let Ok(packet) = Packet::from_bytes(datagram.iter().cloned()) else {
                return Fault::Deliver;
            };
            if !dropped_once && packet.length() > 0 && packet.seq == 1 {
                dropped_once = true;
                return Fault::Drop;
            }
            Fault::Deliver
        })
        .build();
    let receiver_tap = network.tap();
    let sender_tap = network.tap();

    let receiver = tokio::spawn(receive_file(receiver_tap));

    let file: Vec<u8> = (0..2000).map(|i| (i / 3) as u8).collect();
    let sender_stats = send_file(sender_tap, &file, SenderConfig { mtu: 500, window: 4 })
        .await
        .expect("transfer should recover");

    let (delivered, receiver_stats) = receiver
        .await
        .expect("receiver should not panic")
        .expect("receiver should complete");

    assert_eq!(delivered, file);
    // Segments 2 through 4 each produced a repeat acknowledgment of byte 1
    assert!(
        sender_stats.duplicate_acks >= 2,
        "expected repeat acks for byte 1, saw {}",
        sender_stats.duplicate_acks
    );
    assert_eq!(sender_stats.retransmissions, 1);
    // The one retransmission came from the duplicate-ACK path, not a timer
    assert_eq!(sender_stats.fast_retransmits, 1);
    assert_eq!(receiver_stats.data_bytes, 2000);
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    async fn fast_retransmit() {
        super::fast_retransmit().await
    }
}
