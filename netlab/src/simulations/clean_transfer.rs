use netlab_core::network::Network;
use netlab_core::protocols::rdt::{receive_file, send_file, sender::SenderConfig};

/// A lossless transfer: 3,000 bytes of 0x41 at MTU 1,000 with a window of
/// four segments. Three data segments deliver in order and nothing needs
/// retransmitting.
pub async fn clean_transfer() {
    let network = Network::basic();
    let receiver_tap = network.tap();
    let sender_tap = network.tap();

    let receiver = tokio::spawn(receive_file(receiver_tap));

    let file = vec![0x41u8; 3000];
    let sender_stats = send_file(sender_tap, &file, SenderConfig { mtu: 1000, window: 4 })
        .await
        .expect("transfer should succeed");

    let (delivered, receiver_stats) = receiver
        .await
        .expect("receiver should not panic")
        .expect("receiver should complete");

    assert_eq!(delivered, file);
    assert_eq!(sender_stats.data_bytes, 3000);
    assert_eq!(sender_stats.retransmissions, 0);
    assert_eq!(sender_stats.duplicate_acks, 0);
    assert_eq!(sender_stats.checksum_discards, 0);
    assert_eq!(receiver_stats.data_bytes, 3000);
    assert_eq!(receiver_stats.out_of_sequence_discards, 0);
}
