use crate::applications::{Router, StaticRoute};
use netlab_core::network::{Network, Tap};
use netlab_core::protocols::ethernet::{EthernetHeader, ETHERTYPE_IPV4};
use netlab_core::protocols::forwarding::{ArpCache, Interface};
use netlab_core::protocols::ipv4::{Ipv4Address, Ipv4Header, Ipv4HeaderBuilder, Ipv4Mask};
use netlab_core::Shutdown;

const MASK_24: Ipv4Mask = Ipv4Mask::from_bitcount(24);
const ROUTER_A_MAC: u64 = 0x02_00_00_00_0a_01;
const ROUTER_B_MAC: u64 = 0x02_00_00_00_0b_01;
const HOST_A_MAC: u64 = 0x0a_00_00_00_00_09;
const HOST_B_MAC: u64 = 0x0b_00_00_00_00_09;

fn attach(network: &Network, name: &str, ip: [u8; 4], mac: u64) -> (Interface, Tap) {
    (
        Interface::new(name, ip.into(), MASK_24, mac),
        network.tap(),
    )
}

/// A statically configured router moves a datagram between two hosts on
/// different subnets, rewriting the L2 addresses and burning one TTL hop.
/// No RIP runs in this configuration.
pub async fn static_forwarding() {
    let net_a = Network::basic();
    let net_b = Network::basic();
    let host_a = net_a.tap();
    let mut host_b = net_b.tap();

    let arp: ArpCache = [
        (Ipv4Address::new([10, 0, 1, 9]), HOST_A_MAC),
        (Ipv4Address::new([10, 0, 2, 9]), HOST_B_MAC),
    ]
    .into_iter()
    .collect();

    let shutdown = Shutdown::new();
    Router::new(
        vec![
            attach(&net_a, "eth0", [10, 0, 1, 1], ROUTER_A_MAC),
            attach(&net_b, "eth1", [10, 0, 2, 1], ROUTER_B_MAC),
        ],
        arp,
        Some(vec![
            StaticRoute {
                destination: [10, 0, 1, 0].into(),
                mask: MASK_24,
                gateway: Ipv4Address::CURRENT_NETWORK,
                slot: 0,
            },
            StaticRoute {
                destination: [10, 0, 2, 0].into(),
                mask: MASK_24,
                gateway: Ipv4Address::CURRENT_NETWORK,
                slot: 1,
            },
        ]),
    )
    .start(&shutdown);

    let payload = b"across the router";
    let mut frame = EthernetHeader::new(ROUTER_A_MAC, HOST_A_MAC, ETHERTYPE_IPV4).build();
    frame.extend(
        Ipv4HeaderBuilder::new(
            [10, 0, 1, 9].into(),
            [10, 0, 2, 9].into(),
            17,
            payload.len() as u16,
        )
        .build()
        .expect("header should build"),
    );
    frame.extend_from_slice(payload);
    host_a.send(frame);

    let delivery = host_b.recv().await.expect("frame should be forwarded");
    let mut bytes = delivery.payload.iter().cloned();
    let ethernet = EthernetHeader::from_bytes(&mut bytes).expect("ethernet should parse");
    assert_eq!(ethernet.source, ROUTER_B_MAC);
    assert_eq!(ethernet.destination, HOST_B_MAC);
    let ip = Ipv4Header::from_bytes(&mut bytes).expect("rewritten checksum must verify");
    assert_eq!(ip.time_to_live, 63);
    assert_eq!(bytes.collect::<Vec<u8>>(), payload);

    shutdown.shut_down();
}
