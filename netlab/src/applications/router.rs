//! The router machine: a forwarding plane over a shared route table, with
//! either a static route configuration or the RIP engine keeping the table
//! current.

use netlab_core::network::Tap;
use netlab_core::protocols::forwarding::{ArpCache, Forwarder, Interface, Port};
use netlab_core::protocols::ipv4::{Ipv4Address, Ipv4Mask};
use netlab_core::protocols::rip::RipEngine;
use netlab_core::{RouteTable, Shutdown};
use std::sync::Arc;

/// One line of a static route configuration.
#[derive(Debug, Clone)]
pub struct StaticRoute {
    pub destination: Ipv4Address,
    pub mask: Ipv4Mask,
    /// `0.0.0.0` for directly attached subnets
    pub gateway: Ipv4Address,
    pub slot: usize,
}

pub struct Router {
    table: Arc<RouteTable>,
    forwarder: Arc<Forwarder>,
    rip: Option<RipEngine>,
    taps: Vec<Tap>,
}

impl Router {
    /// Assembles a router from its attachments. RIP runs only when no
    /// static route table is provided.
    pub fn new(
        attachments: Vec<(Interface, Tap)>,
        arp: ArpCache,
        static_routes: Option<Vec<StaticRoute>>,
    ) -> Self {
        let mut ports = Vec::with_capacity(attachments.len());
        let mut taps = Vec::with_capacity(attachments.len());
        for (interface, tap) in attachments {
            ports.push(Port {
                interface,
                tx: tap.sender(),
            });
            taps.push(tap);
        }
        let ports = Arc::new(ports);
        let table = Arc::new(RouteTable::new());

        let rip = match static_routes {
            Some(routes) => {
                for route in routes {
                    let direct = route.gateway == Ipv4Address::CURRENT_NETWORK;
                    table.insert(
                        route.destination,
                        route.mask,
                        route.gateway,
                        route.slot,
                        u32::from(!direct),
                        direct,
                    );
                }
                None
            }
            None => Some(RipEngine::new(table.clone(), ports.clone())),
        };

        let forwarder = Arc::new(Forwarder::new(table.clone(), ports, Arc::new(arp)));
        Self {
            table,
            forwarder,
            rip,
            taps,
        }
    }

    pub fn table(&self) -> Arc<RouteTable> {
        self.table.clone()
    }

    /// Starts the control plane and one receive loop per port, then returns
    /// a handle to the live route table. Every RIP datagram is consumed by
    /// the engine; everything else goes through the forwarder.
    pub fn start(mut self, shutdown: &Shutdown) -> Arc<RouteTable> {
        if let Some(rip) = &self.rip {
            rip.start(shutdown);
        }
        for (slot, mut tap) in self.taps.drain(..).enumerate() {
            let forwarder = self.forwarder.clone();
            let rip = self.rip.clone();
            let mut shutdown_rx = shutdown.receiver();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        delivery = tap.recv() => {
                            let Some(delivery) = delivery else { break };
                            let consumed = rip
                                .as_ref()
                                .map_or(false, |rip| rip.handle(slot, &delivery.payload));
                            if !consumed {
                                forwarder.handle(slot, &delivery.payload);
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            });
        }
        self.table
    }
}
