use netlab_core::network::{Fault, Network};
use netlab_core::protocols::rdt::{receive_file, send_file, sender::SenderConfig, Packet};

/// Recovery from a single loss via the retransmission timer: the first data
/// segment is dropped once, comes back on timeout, and the file arrives
/// intact with exactly one retransmission.
pub async fn loss_recovery() {
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

    let file: Vec<u8> = (0..1500).map(|i| i as u8).collect();
    let sender_stats = send_file(sender_tap, &file, SenderConfig { mtu: 500, window: 2 })
        .await
        .expect("transfer should survive a single loss");

    let (delivered, _) = receiver
        .await
        .expect("receiver should not panic")
        .expect("receiver should complete");

    assert_eq!(delivered, file);
    assert_eq!(sender_stats.retransmissions, 1);
    // With a window of two there are never three repeat acks, so the
    // recovery had to come from the timer
    assert_eq!(sender_stats.fast_retransmits, 0);
}
