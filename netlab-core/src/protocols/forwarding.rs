//! The packet forwarding plane.
//!
//! For each ingress frame: reject non-IPv4 ethertypes, verify the IPv4
//! header checksum, decrement the TTL, drop traffic addressed to the router
//! itself, look the destination up in the route table, resolve the next hop
//! through the ARP cache, rewrite the L2 addresses, and emit on the egress
//! interface. Every failure is a silent drop; reasons are traced at debug
//! level only.

use crate::network::{Mac, TapSender};
use crate::protocols::ethernet::{EthernetHeader, ETHERTYPE_IPV4};
use crate::protocols::ipv4::{ipv4_parsing, Ipv4Address, Ipv4Header, Ipv4Mask};
use crate::route_table::RouteTable;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// A router-attached network interface. Interfaces are injected by the
/// application; the cores never create them.
#[derive(Debug, Clone)]
pub struct Interface {
    pub name: String,
    pub ip: Ipv4Address,
    pub mask: Ipv4Mask,
    pub mac: Mac,
}

impl Interface {
    pub fn new(name: impl Into<String>, ip: Ipv4Address, mask: Ipv4Mask, mac: Mac) -> Self {
        Self {
            name: name.into(),
            ip,
            mask,
            mac,
        }
    }
}

/// One attachment of a router to a network: the interface descriptor plus
/// the transmit handle for that segment. A port's position in the router's
/// port list is its slot number, which is what route entries record.
pub struct Port {
    pub interface: Interface,
    pub tx: TapSender,
}

/// The IP-to-MAC mapping the forwarder resolves next hops against. Loaded
/// up front and read-only to the cores.
#[derive(Default)]
pub struct ArpCache {
    entries: DashMap<Ipv4Address, Mac>,
}

impl ArpCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ip: Ipv4Address, mac: Mac) {
        self.entries.insert(ip, mac);
    }

    pub fn lookup(&self, ip: Ipv4Address) -> Option<Mac> {
        self.entries.get(&ip).map(|entry| *entry)
    }
}

impl FromIterator<(Ipv4Address, Mac)> for ArpCache {
    fn from_iter<T: IntoIterator<Item = (Ipv4Address, Mac)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

pub struct Forwarder {
    table: Arc<RouteTable>,
    ports: Arc<Vec<Port>>,
    arp: Arc<ArpCache>,
}

impl Forwarder {
    pub fn new(table: Arc<RouteTable>, ports: Arc<Vec<Port>>, arp: Arc<ArpCache>) -> Self {
        Self { table, ports, arp }
    }

    /// Runs one frame through the forwarding pipeline.
    pub fn handle(&self, ingress: usize, frame: &[u8]) {
        let mut bytes = frame.iter().cloned();
        let Ok(ethernet) = EthernetHeader::from_bytes(&mut bytes) else {
            return;
        };
        if ethernet.ethertype != ETHERTYPE_IPV4 {
            debug!("dropping non-IPv4 frame with ethertype {:#06x}", ethernet.ethertype);
            return;
        }

        // Parsing re-accumulates the header checksum; corrupted headers
        // fail here
        let mut ip = match Ipv4Header::from_bytes(&mut bytes) {
            Ok(ip) => ip,
            Err(ipv4_parsing::ParseError::Checksum { .. }) => {
                debug!("dropping datagram with bad header checksum");
                return;
            }
            Err(_) => return,
        };

        ip.time_to_live = ip.time_to_live.saturating_sub(1);
        if ip.time_to_live == 0 {
            debug!("dropping datagram with expired TTL for {}", ip.destination);
            return;
        }

        // Traffic addressed to the router terminates here
        if self
            .ports
            .iter()
            .any(|port| port.interface.ip == ip.destination)
        {
            return;
        }

        let Some(route) = self.table.lookup(ip.destination) else {
            debug!("no route to {}", ip.destination);
            return;
        };
        if route.slot() == ingress {
            debug!("route to {} points back out the ingress interface", ip.destination);
            return;
        }
        let Some(egress) = self.ports.get(route.slot()) else {
            return;
        };

        let next_hop = if route.gateway() == Ipv4Address::CURRENT_NETWORK {
            ip.destination
        } else {
            route.gateway()
        };
        let Some(next_hop_mac) = self.arp.lookup(next_hop) else {
            debug!("no ARP entry for next hop {next_hop}");
            return;
        };

        let payload_len = (ip.total_length as usize).saturating_sub(20);
        let mut out =
            EthernetHeader::new(next_hop_mac, egress.interface.mac, ETHERTYPE_IPV4).build();
        out.extend(ip.serialize());
        out.extend(bytes.take(payload_len));
        egress.tx.send(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Network, Tap};
    use crate::protocols::ipv4::Ipv4HeaderBuilder;

    const HOST_MAC: Mac = 0x0a_00_00_00_00_77;

    struct Fixture {
        forwarder: Forwarder,
        left: Tap,
        right: Tap,
    }

    /// A router with ports on two networks: 10.0.1.1/24 and 10.0.2.1/24.
    fn fixture() -> Fixture {
        let left_net = Network::basic();
        let right_net = Network::basic();
        let router_left = left_net.tap();
        let router_right = right_net.tap();
        let left = left_net.tap();
        let right = right_net.tap();

        let ports = Arc::new(vec![
            Port {
                interface: Interface::new(
                    "eth0",
                    [10, 0, 1, 1].into(),
                    Ipv4Mask::from_bitcount(24),
                    0x02_00_00_00_00_01,
                ),
                tx: router_left.sender(),
            },
            Port {
                interface: Interface::new(
                    "eth1",
                    [10, 0, 2, 1].into(),
                    Ipv4Mask::from_bitcount(24),
                    0x02_00_00_00_00_02,
                ),
                tx: router_right.sender(),
            },
        ]);

        let table = Arc::new(RouteTable::new());
        table.insert(
            [10, 0, 1, 0].into(),
            Ipv4Mask::from_bitcount(24),
            Ipv4Address::CURRENT_NETWORK,
            0,
            0,
            true,
        );
        table.insert(
            [10, 0, 2, 0].into(),
            Ipv4Mask::from_bitcount(24),
            Ipv4Address::CURRENT_NETWORK,
            1,
            0,
            true,
        );

        let arp: ArpCache = [(Ipv4Address::new([10, 0, 2, 9]), HOST_MAC)]
            .into_iter()
            .collect();

        Fixture {
            forwarder: Forwarder::new(table, ports, Arc::new(arp)),
            left,
            right,
        }
    }

    fn frame(destination: Ipv4Address, ttl: u8) -> Vec<u8> {
        let payload = b"ping";
        let mut frame =
            EthernetHeader::new(0x02_00_00_00_00_01, HOST_MAC, ETHERTYPE_IPV4).build();
        frame.extend(
            Ipv4HeaderBuilder::new([10, 0, 1, 9].into(), destination, 6, payload.len() as u16)
                .time_to_live(ttl)
                .build()
                .unwrap(),
        );
        frame.extend_from_slice(payload);
        frame
    }

    #[tokio::test]
    async fn forwards_with_rewritten_l2_and_decremented_ttl() {
        let mut fx = fixture();
        fx.forwarder.handle(0, &frame([10, 0, 2, 9].into(), 64));

        let delivery = fx.right.recv().await.expect("frame should be forwarded");
        let mut bytes = delivery.payload.iter().cloned();
        let ethernet = EthernetHeader::from_bytes(&mut bytes).unwrap();
        assert_eq!(ethernet.source, 0x02_00_00_00_00_02);
        assert_eq!(ethernet.destination, HOST_MAC);

        let ip = Ipv4Header::from_bytes(&mut bytes).expect("forwarded checksum must verify");
        assert_eq!(ip.time_to_live, 63);
        assert_eq!(bytes.collect::<Vec<u8>>(), b"ping");
    }

    #[tokio::test]
    async fn drops_when_ttl_reaches_zero() {
        let mut fx = fixture();
        fx.forwarder.handle(0, &frame([10, 0, 2, 9].into(), 1));
        assert!(tokio::time::timeout(
            std::time::Duration::from_millis(20),
            fx.right.recv()
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn drops_traffic_for_the_router_itself() {
        let mut fx = fixture();
        fx.forwarder.handle(0, &frame([10, 0, 2, 1].into(), 64));
        assert!(tokio::time::timeout(
            std::time::Duration::from_millis(20),
            fx.right.recv()
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn drops_without_route_or_arp_entry() {
        let mut fx = fixture();
        // No route
        fx.forwarder.handle(0, &frame([172, 16, 0, 1].into(), 64));
        // Route exists, but no ARP entry for the destination host
        fx.forwarder.handle(0, &frame([10, 0, 2, 200].into(), 64));
        assert!(tokio::time::timeout(
            std::time::Duration::from_millis(20),
            fx.right.recv()
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn drops_when_route_points_back_out_the_ingress() {
        let mut fx = fixture();
        let mut frame = frame([10, 0, 1, 9].into(), 64);
        // Reachable destination, but on the same side it came from
        fx.forwarder.handle(0, &frame);
        assert!(tokio::time::timeout(
            std::time::Duration::from_millis(20),
            fx.left.recv()
        )
        .await
        .is_err());

        // And a corrupted header never makes it to the lookup
        frame[20] ^= 0xff;
        fx.forwarder.handle(1, &frame);
        assert!(tokio::time::timeout(
            std::time::Duration::from_millis(20),
            fx.left.recv()
        )
        .await
        .is_err());
    }
}
