use crate::applications::Router;
use netlab_core::network::{Network, Tap};
use netlab_core::protocols::forwarding::{ArpCache, Interface};
use netlab_core::protocols::ipv4::Ipv4Mask;
use netlab_core::Shutdown;
use tokio::time::{sleep, Duration};

const MASK_24: Ipv4Mask = Ipv4Mask::from_bitcount(24);

fn attach(network: &Network, name: &str, ip: [u8; 4], mac: u64) -> (Interface, Tap) {
    (
        Interface::new(name, ip.into(), MASK_24, mac),
        network.tap(),
    )
}

/// A silenced neighbor's routes age out. r1 learns r2's stub prefix, r2
/// shuts down, and thirty seconds later the learned route is gone while
/// r1's directly connected prefixes are untouched.
pub async fn rip_expiry() {
    let link = Network::basic();
    let stub1 = Network::basic();
    let stub2 = Network::basic();

    let shutdown1 = Shutdown::new();
    let shutdown2 = Shutdown::new();

    let r1 = Router::new(
        vec![
            attach(&link, "r1-eth0", [10, 0, 12, 1], 0x02_00_00_00_12_01),
            attach(&stub1, "r1-eth1", [192, 168, 1, 1], 0x02_00_00_00_01_01),
        ],
        ArpCache::new(),
        None,
    );
    let r2 = Router::new(
        vec![
            attach(&link, "r2-eth0", [10, 0, 12, 2], 0x02_00_00_00_12_02),
            attach(&stub2, "r2-eth1", [192, 168, 2, 1], 0x02_00_00_00_02_01),
        ],
        ArpCache::new(),
        None,
    );
    let r1 = r1.start(&shutdown1);
    let _r2 = r2.start(&shutdown2);

    sleep(Duration::from_secs(15)).await;
    let learned = r1
        .lookup_exact([192, 168, 2, 0].into(), MASK_24)
        .expect("stub prefix should be learned");
    assert_eq!(learned.metric(), 1);

    // Silence r2 entirely
    shutdown2.shut_down();
    sleep(Duration::from_secs(45)).await;

    assert!(
        r1.lookup_exact([192, 168, 2, 0].into(), MASK_24).is_none(),
        "stale route should have been retired"
    );
    // Direct prefixes never expire
    assert!(r1
        .lookup_exact([192, 168, 1, 0].into(), MASK_24)
        .expect("direct stub must remain")
        .is_direct());
    assert!(r1
        .lookup_exact([10, 0, 12, 0].into(), MASK_24)
        .expect("direct link must remain")
        .is_direct());

    shutdown1.shut_down();
}
