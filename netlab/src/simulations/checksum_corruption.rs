use netlab_core::network::{Fault, Network};
use netlab_core::protocols::rdt::{receive_file, send_file, sender::SenderConfig, Packet};

/// One inbound data segment arrives with a flipped payload byte. The
/// receiver counts it under checksum discards and never acknowledges it;
/// the sender's timer brings a clean copy and the transfer completes.
pub async fn checksum_corruption() {
    let mut corrupted_once = false;
    let network = Network::builder()
        .fault_hook(move |datagram| {
            let Ok(packet) = Packet::from_bytes(datagram.iter().cloned()) else {
                return Fault::Deliver;
            };
            if !corrupted_once && packet.length() > 0 && packet.seq == 1 {
                corrupted_once = true;
                return Fault::Corrupt;
            }
            Fault::Deliver
        })
        .build();
    let receiver_tap = network.tap();
    let sender_tap = network.tap();

    let receiver = tokio::spawn(receive_file(receiver_tap));

    let file: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
    let sender_stats = send_file(sender_tap, &file, SenderConfig { mtu: 500, window: 2 })
        .await
        .expect("transfer should complete despite corruption");

    let (delivered, receiver_stats) = receiver
        .await
        .expect("receiver should not panic")
        .expect("receiver should complete");

    assert_eq!(delivered, file);
    assert_eq!(receiver_stats.checksum_discards, 1);
    assert_eq!(sender_stats.retransmissions, 1);
    assert_eq!(sender_stats.fast_retransmits, 0);
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    async fn checksum_corruption() {
        super::checksum_corruption().await
    }
}
