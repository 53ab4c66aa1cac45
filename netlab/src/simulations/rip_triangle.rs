use crate::applications::Router;
use netlab_core::network::{Fault, Network, Tap};
use netlab_core::protocols::forwarding::{ArpCache, Interface};
use netlab_core::protocols::ipv4::{Ipv4Address, Ipv4Mask};
use netlab_core::{RouteTable, Shutdown};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

const MASK_24: Ipv4Mask = Ipv4Mask::from_bitcount(24);

fn attach(network: &Network, name: &str, ip: [u8; 4], mac: u64) -> (Interface, Tap) {
    (
        Interface::new(name, ip.into(), MASK_24, mac),
        network.tap(),
    )
}

/// Three routers in a triangle, each with a stub prefix behind it. The
/// tables converge to metric ≤ 2 routes for every stub; when the r1–r2
/// link breaks, r1 reroutes to r2's stub through r3.
///
/// Runs under paused time, so the minutes of protocol activity finish in
/// milliseconds of wall clock.
pub async fn rip_triangle() {
    let broken = Arc::new(AtomicBool::new(false));
    let weak_link = broken.clone();
    let net12 = Network::builder()
        .fault_hook(move |_| {
            if weak_link.load(Ordering::Relaxed) {
                Fault::Drop
            } else {
                Fault::Deliver
            }
        })
        .build();
    let net23 = Network::basic();
    let net13 = Network::basic();
    let stub1 = Network::basic();
    let stub2 = Network::basic();
    let stub3 = Network::basic();

    let shutdown = Shutdown::new();

    // Attach every router to its networks before any of them starts
    // talking, so nobody's startup burst lands on a missing tap
    let r1 = Router::new(
        vec![
            attach(&net12, "r1-eth0", [10, 0, 12, 1], 0x02_00_00_00_12_01),
            attach(&net13, "r1-eth1", [10, 0, 13, 1], 0x02_00_00_00_13_01),
            attach(&stub1, "r1-eth2", [192, 168, 1, 1], 0x02_00_00_00_01_01),
        ],
        ArpCache::new(),
        None,
    );
    let r2 = Router::new(
        vec![
            attach(&net12, "r2-eth0", [10, 0, 12, 2], 0x02_00_00_00_12_02),
            attach(&net23, "r2-eth1", [10, 0, 23, 2], 0x02_00_00_00_23_02),
            attach(&stub2, "r2-eth2", [192, 168, 2, 1], 0x02_00_00_00_02_01),
        ],
        ArpCache::new(),
        None,
    );
    let r3 = Router::new(
        vec![
            attach(&net23, "r3-eth0", [10, 0, 23, 3], 0x02_00_00_00_23_03),
            attach(&net13, "r3-eth1", [10, 0, 13, 3], 0x02_00_00_00_13_03),
            attach(&stub3, "r3-eth2", [192, 168, 3, 1], 0x02_00_00_00_03_01),
        ],
        ArpCache::new(),
        None,
    );

    let r1 = r1.start(&shutdown);
    let r2 = r2.start(&shutdown);
    let r3 = r3.start(&shutdown);

    // Startup requests and triggered updates converge well before the
    // second periodic advertisement
    sleep(Duration::from_secs(20)).await;

    let stub_route = |table: &RouteTable, stub: [u8; 4]| table.lookup_exact(stub.into(), MASK_24);
    for (table, stubs) in [
        (&r1, [[192, 168, 2, 0], [192, 168, 3, 0]]),
        (&r2, [[192, 168, 1, 0], [192, 168, 3, 0]]),
        (&r3, [[192, 168, 1, 0], [192, 168, 2, 0]]),
    ] {
        for stub in stubs {
            let route = stub_route(table, stub).expect("stub prefix should be learned");
            assert!(
                route.metric() <= 2,
                "route to {stub:?} has metric {}",
                route.metric()
            );
        }
    }

    // Sever the r1-r2 link: the direct metric-1 route ages out and the
    // detour through r3 takes over
    broken.store(true, Ordering::Relaxed);
    sleep(Duration::from_secs(45)).await;

    let detour = stub_route(&r1, [192, 168, 2, 0]).expect("stub should be relearned via r3");
    assert_eq!(detour.gateway(), Ipv4Address::new([10, 0, 13, 3]));
    assert_eq!(detour.metric(), 2);

    shutdown.shut_down();
}

#[cfg(test)]
mod tests {
    #[tokio::test(start_paused = true)]
    async fn rip_triangle() {
        super::rip_triangle().await
    }
}
