//! The RIP v2 distance-vector control plane.
//!
//! Runs only when no static route table was supplied. On startup the engine
//! seeds a direct route per interface and asks every neighbor for its table;
//! from then on it advertises the full table every ten seconds, applies the
//! metric-plus-one update rule to responses, emits triggered updates when
//! the table changes, and retires learned routes that go thirty seconds
//! without a refresh.

pub mod rip_parsing;
pub use rip_parsing::{Operation, RipEntry, RipPacket};

use crate::network::{Mac, BROADCAST_MAC};
use crate::protocols::ethernet::{EthernetHeader, ETHERTYPE_IPV4};
use crate::protocols::forwarding::Port;
use crate::protocols::ipv4::{
    network_id, Ipv4Address, Ipv4Header, Ipv4HeaderBuilder, Ipv4Mask, PROTOCOL_UDP,
};
use crate::protocols::udp::{build_udp_header, UdpHeader, HEADER_OCTETS, RIP_PORT};
use crate::route_table::{RouteTable, INFINITY};
use crate::shutdown::Shutdown;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::debug;

/// Unsolicited RESPONSE interval.
pub const ADVERTISEMENT_PERIOD: Duration = Duration::from_secs(10);

/// Learned routes unrefreshed for this long are retired.
pub const ROUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the expiry sweep runs.
pub const EXPIRY_SWEEP_PERIOD: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct RipEngine {
    table: Arc<RouteTable>,
    ports: Arc<Vec<Port>>,
}

impl RipEngine {
    pub fn new(table: Arc<RouteTable>, ports: Arc<Vec<Port>>) -> Self {
        Self { table, ports }
    }

    /// Seeds the direct routes, broadcasts the startup REQUEST, and spawns
    /// the periodic advertisement and expiry sweep tasks.
    pub fn start(&self, shutdown: &Shutdown) {
        self.seed_direct_routes();
        self.request_all();

        let engine = self.clone();
        let mut shutdown_rx = shutdown.receiver();
        tokio::spawn(async move {
            let mut period = interval(ADVERTISEMENT_PERIOD);
            loop {
                tokio::select! {
                    _ = period.tick() => engine.advertise_all(),
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        let engine = self.clone();
        let mut shutdown_rx = shutdown.receiver();
        tokio::spawn(async move {
            let mut sweep = interval(EXPIRY_SWEEP_PERIOD);
            loop {
                tokio::select! {
                    _ = sweep.tick() => engine.table.expire(ROUTE_TIMEOUT),
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    /// One direct route per interface: the attached subnet at metric 0 with
    /// no gateway. Direct routes never expire.
    pub fn seed_direct_routes(&self) {
        for (slot, port) in self.ports.iter().enumerate() {
            let interface = &port.interface;
            self.table.insert(
                network_id(interface.ip, interface.mask),
                interface.mask,
                Ipv4Address::CURRENT_NETWORK,
                slot,
                0,
                true,
            );
        }
    }

    /// Asks every neighbor for its full table.
    pub fn request_all(&self) {
        let request = RipPacket::whole_table_request();
        for slot in 0..self.ports.len() {
            self.send_rip(slot, &request, Ipv4Address::RIP_GROUP, BROADCAST_MAC);
        }
    }

    /// The unsolicited periodic advertisement: the whole table, multicast on
    /// every interface.
    pub fn advertise_all(&self) {
        for slot in 0..self.ports.len() {
            self.send_table(slot, Ipv4Address::RIP_GROUP, BROADCAST_MAC);
        }
    }

    /// Offers an ingress frame to the control plane. Returns true when the
    /// frame was RIP traffic (including self-sourced datagrams, which are
    /// swallowed); false hands it back for forwarding.
    pub fn handle(&self, ingress: usize, frame: &[u8]) -> bool {
        let mut bytes = frame.iter().cloned();
        let Ok(ethernet) = EthernetHeader::from_bytes(&mut bytes) else {
            return false;
        };
        if ethernet.ethertype != ETHERTYPE_IPV4 {
            return false;
        }
        let Ok(ip) = Ipv4Header::from_bytes(&mut bytes) else {
            return false;
        };
        if ip.protocol != PROTOCOL_UDP {
            return false;
        }
        let Ok(udp) = UdpHeader::from_bytes(&mut bytes) else {
            return false;
        };
        if udp.destination != RIP_PORT && udp.source != RIP_PORT {
            return false;
        }

        // Suppress self-reception of our own multicasts
        if self
            .ports
            .iter()
            .any(|port| port.interface.ip == ip.source)
        {
            return true;
        }

        let rip_len = (udp.length - HEADER_OCTETS) as usize;
        let packet = match RipPacket::from_bytes(bytes.take(rip_len)) {
            Ok(packet) => packet,
            Err(error) => {
                debug!("dropping unparseable RIP datagram: {error}");
                return true;
            }
        };

        match packet.command {
            Operation::Request => self.handle_request(ingress, ip.source, ethernet.source),
            Operation::Response => self.handle_response(ingress, ip.source, packet),
        }
        true
    }

    /// Any request gets the full table, unicast back to the requester.
    fn handle_request(&self, ingress: usize, requester: Ipv4Address, requester_mac: Mac) {
        self.send_table(ingress, requester, requester_mac);
    }

    fn handle_response(&self, ingress: usize, neighbor: Ipv4Address, packet: RipPacket) {
        let mut changed = false;
        for entry in packet.entries {
            // One hop to reach the neighbor, clamped at unreachable
            let metric = entry.metric.saturating_add(1).min(INFINITY);
            let destination = network_id(entry.prefix, entry.mask);
            if metric < INFINITY {
                changed |= self.apply_update(ingress, neighbor, destination, entry.mask, metric);
            } else {
                changed |= self
                    .table
                    .mark_unreachable(destination, entry.mask, neighbor, ingress);
            }
        }
        if changed {
            // Triggered update to accelerate convergence
            debug!("table changed, sending triggered update");
            self.send_table(ingress, Ipv4Address::RIP_GROUP, BROADCAST_MAC);
        }
    }

    /// The distance-vector comparison: install unknown prefixes, replace on
    /// a strictly lower metric, refresh the timestamp when the current
    /// route is re-advertised, and otherwise leave the table alone.
    fn apply_update(
        &self,
        ingress: usize,
        neighbor: Ipv4Address,
        destination: Ipv4Address,
        mask: Ipv4Mask,
        metric: u32,
    ) -> bool {
        match self.table.lookup_exact(destination, mask) {
            None => self
                .table
                .insert(destination, mask, neighbor, ingress, metric, false),
            Some(existing) => {
                let same_route = existing.gateway() == neighbor && existing.slot() == ingress;
                if metric < existing.metric() {
                    self.table
                        .insert(destination, mask, neighbor, ingress, metric, false)
                } else if metric == existing.metric() && same_route && !existing.is_direct() {
                    // The current route re-advertised: timestamp refresh only
                    self.table
                        .insert(destination, mask, neighbor, ingress, metric, false);
                    false
                } else {
                    false
                }
            }
        }
    }

    /// Sends the full table as one or more RESPONSE datagrams.
    fn send_table(&self, slot: usize, destination: Ipv4Address, destination_mac: Mac) {
        let entries = self.table.export_rip();

        if entries.is_empty() {
            self.send_rip(
                slot,
                &RipPacket::response(Vec::new()),
                destination,
                destination_mac,
            );
            return;
        }
        for chunk in entries.chunks(rip_parsing::MAX_ENTRIES) {
            self.send_rip(
                slot,
                &RipPacket::response(chunk.to_vec()),
                destination,
                destination_mac,
            );
        }
    }

    /// Wraps a RIP packet in UDP, IPv4, and Ethernet and transmits it.
    fn send_rip(
        &self,
        slot: usize,
        packet: &RipPacket,
        destination: Ipv4Address,
        destination_mac: Mac,
    ) {
        let Some(port) = self.ports.get(slot) else {
            return;
        };
        let rip_bytes = packet.build();
        let Ok(mut datagram) = build_udp_header(RIP_PORT, RIP_PORT, rip_bytes.len()) else {
            return;
        };
        datagram.extend(rip_bytes);

        let Ok(ip) = Ipv4HeaderBuilder::new(
            port.interface.ip,
            destination,
            PROTOCOL_UDP,
            datagram.len() as u16,
        )
        .build() else {
            return;
        };

        let mut frame =
            EthernetHeader::new(destination_mac, port.interface.mac, ETHERTYPE_IPV4).build();
        frame.extend(ip);
        frame.extend(datagram);
        port.tx.send(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Network, Tap};
    use crate::protocols::forwarding::Interface;

    const NEIGHBOR_IP: Ipv4Address = Ipv4Address::new([10, 0, 1, 2]);
    const NEIGHBOR_MAC: Mac = 0x02_00_00_00_01_02;

    /// An engine with one port on 10.0.1.1/24, plus the neighbor's tap.
    fn fixture() -> (RipEngine, Tap) {
        let network = Network::basic();
        let router_tap = network.tap();
        let neighbor_tap = network.tap();

        let ports = Arc::new(vec![Port {
            interface: Interface::new(
                "eth0",
                [10, 0, 1, 1].into(),
                Ipv4Mask::from_bitcount(24),
                0x02_00_00_00_01_01,
            ),
            tx: router_tap.sender(),
        }]);
        let engine = RipEngine::new(Arc::new(RouteTable::new()), ports);
        (engine, neighbor_tap)
    }

    /// Builds the frame a neighbor would emit for `packet`.
    fn neighbor_frame(packet: &RipPacket, destination: Ipv4Address, source: Ipv4Address) -> Vec<u8> {
        let rip_bytes = packet.build();
        let mut datagram = build_udp_header(RIP_PORT, RIP_PORT, rip_bytes.len()).unwrap();
        datagram.extend(rip_bytes);
        let ip = Ipv4HeaderBuilder::new(source, destination, PROTOCOL_UDP, datagram.len() as u16)
            .build()
            .unwrap();
        let mut frame = EthernetHeader::new(BROADCAST_MAC, NEIGHBOR_MAC, ETHERTYPE_IPV4).build();
        frame.extend(ip);
        frame.extend(datagram);
        frame
    }

    /// Parses a frame the engine transmitted back into a RIP packet.
    fn parse_rip(frame: &[u8]) -> (EthernetHeader, Ipv4Header, RipPacket) {
        let mut bytes = frame.iter().cloned();
        let ethernet = EthernetHeader::from_bytes(&mut bytes).unwrap();
        let ip = Ipv4Header::from_bytes(&mut bytes).unwrap();
        let udp = UdpHeader::from_bytes(&mut bytes).unwrap();
        let rip =
            RipPacket::from_bytes(bytes.take((udp.length - HEADER_OCTETS) as usize)).unwrap();
        (ethernet, ip, rip)
    }

    #[tokio::test]
    async fn seeds_direct_routes_and_requests_tables() {
        let (engine, mut neighbor) = fixture();
        engine.seed_direct_routes();
        engine.request_all();

        let entry = engine
            .table
            .lookup_exact([10, 0, 1, 0].into(), Ipv4Mask::from_bitcount(24))
            .expect("direct route should be seeded");
        assert!(entry.is_direct());
        assert_eq!(entry.metric(), 0);

        let (ethernet, ip, rip) = parse_rip(&neighbor.recv().await.unwrap().payload);
        assert_eq!(ethernet.destination, BROADCAST_MAC);
        assert_eq!(ip.destination, Ipv4Address::RIP_GROUP);
        assert!(rip.asks_for_whole_table());
    }

    #[tokio::test]
    async fn learns_routes_and_sends_a_triggered_update() {
        let (engine, mut neighbor) = fixture();
        engine.seed_direct_routes();

        let response = RipPacket::response(vec![RipEntry::advertised(
            [10, 0, 9, 0].into(),
            Ipv4Mask::from_bitcount(24),
            1,
        )]);
        let consumed = engine.handle(
            0,
            &neighbor_frame(&response, Ipv4Address::RIP_GROUP, NEIGHBOR_IP),
        );
        assert!(consumed);

        let learned = engine
            .table
            .lookup_exact([10, 0, 9, 0].into(), Ipv4Mask::from_bitcount(24))
            .expect("route should be learned");
        assert_eq!(learned.metric(), 2);
        assert_eq!(learned.gateway(), NEIGHBOR_IP);
        assert!(!learned.is_direct());

        let (_, _, rip) = parse_rip(&neighbor.recv().await.unwrap().payload);
        assert_eq!(rip.command, Operation::Response);
        assert_eq!(rip.entries.len(), 2);
    }

    #[tokio::test]
    async fn worse_or_equal_routes_do_not_replace_better_ones() {
        let (engine, _neighbor) = fixture();
        let mask = Ipv4Mask::from_bitcount(24);
        let prefix = Ipv4Address::new([10, 0, 9, 0]);
        engine.table.insert(prefix, mask, NEIGHBOR_IP, 0, 2, false);

        // A different gateway at the same metric is not a change
        assert!(!engine.apply_update(0, [10, 0, 1, 3].into(), prefix, mask, 2));
        assert_eq!(engine.table.lookup_exact(prefix, mask).unwrap().gateway(), NEIGHBOR_IP);

        // A strictly better metric is
        assert!(engine.apply_update(0, [10, 0, 1, 3].into(), prefix, mask, 1));
        assert_eq!(
            engine.table.lookup_exact(prefix, mask).unwrap().gateway(),
            Ipv4Address::new([10, 0, 1, 3])
        );
    }

    #[tokio::test]
    async fn unreachable_advertisement_marks_the_route() {
        let (engine, _neighbor) = fixture();
        let mask = Ipv4Mask::from_bitcount(24);
        let prefix = Ipv4Address::new([10, 0, 9, 0]);
        engine.table.insert(prefix, mask, NEIGHBOR_IP, 0, 2, false);

        let response = RipPacket::response(vec![RipEntry::advertised(prefix, mask, INFINITY)]);
        engine.handle(
            0,
            &neighbor_frame(&response, Ipv4Address::RIP_GROUP, NEIGHBOR_IP),
        );
        assert_eq!(engine.table.lookup_exact(prefix, mask).unwrap().metric(), INFINITY);
    }

    #[tokio::test]
    async fn self_sourced_datagrams_are_swallowed() {
        let (engine, _neighbor) = fixture();
        engine.seed_direct_routes();
        let before = engine.table.len();

        let response = RipPacket::response(vec![RipEntry::advertised(
            [10, 0, 9, 0].into(),
            Ipv4Mask::from_bitcount(24),
            1,
        )]);
        // Sourced from the router's own interface address
        let consumed = engine.handle(
            0,
            &neighbor_frame(&response, Ipv4Address::RIP_GROUP, [10, 0, 1, 1].into()),
        );
        assert!(consumed);
        assert_eq!(engine.table.len(), before);
    }

    #[tokio::test]
    async fn requests_get_a_unicast_reply() {
        let (engine, mut neighbor) = fixture();
        engine.seed_direct_routes();

        let request = RipPacket::whole_table_request();
        engine.handle(
            0,
            &neighbor_frame(&request, Ipv4Address::RIP_GROUP, NEIGHBOR_IP),
        );

        let (ethernet, ip, rip) = parse_rip(&neighbor.recv().await.unwrap().payload);
        assert_eq!(ethernet.destination, NEIGHBOR_MAC);
        assert_eq!(ip.destination, NEIGHBOR_IP);
        assert_eq!(rip.command, Operation::Response);
        assert_eq!(rip.entries.len(), 1);
    }

    #[tokio::test]
    async fn non_rip_traffic_is_handed_back() {
        let (engine, _neighbor) = fixture();
        let mut frame = EthernetHeader::new(BROADCAST_MAC, NEIGHBOR_MAC, ETHERTYPE_IPV4).build();
        frame.extend(
            Ipv4HeaderBuilder::new(NEIGHBOR_IP, [10, 0, 9, 9].into(), 6, 4)
                .build()
                .unwrap(),
        );
        frame.extend_from_slice(b"data");
        assert!(!engine.handle(0, &frame));
    }
}
