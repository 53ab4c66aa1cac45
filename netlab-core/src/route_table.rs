//! The routing table shared by the forwarding plane and the RIP engine.
//!
//! A flat list of entries behind a read-write lock: the RIP engine is the
//! single writer, the forwarder takes brief read sections. Destinations are
//! stored pre-masked, so `(ip & mask) == destination` is the match test and
//! longest-prefix selection maximizes the mask's popcount.

use crate::protocols::ipv4::{network_id, Ipv4Address, Ipv4Mask};
use crate::protocols::rip::rip_parsing::RipEntry;
use std::fmt::{self, Display};
use std::sync::RwLock;
use tokio::time::{Duration, Instant};

/// The RIP metric meaning "unreachable".
pub const INFINITY: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    destination: Ipv4Address,
    mask: Ipv4Mask,
    gateway: Ipv4Address,
    /// Index of the egress interface
    slot: usize,
    metric: u32,
    last_updated: Instant,
    direct: bool,
}

impl RouteEntry {
    pub fn destination(&self) -> Ipv4Address {
        self.destination
    }

    pub fn mask(&self) -> Ipv4Mask {
        self.mask
    }

    /// The next-hop address; `0.0.0.0` for directly connected subnets.
    pub fn gateway(&self) -> Ipv4Address {
        self.gateway
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn metric(&self) -> u32 {
        self.metric
    }

    pub fn is_direct(&self) -> bool {
        self.direct
    }

    fn matches(&self, ip: Ipv4Address) -> bool {
        network_id(ip, self.mask) == self.destination
    }
}

impl Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} via {} dev {} metric {}{}",
            self.destination,
            self.mask.count_ones(),
            if self.gateway == Ipv4Address::CURRENT_NETWORK {
                "direct".to_string()
            } else {
                self.gateway.to_string()
            },
            self.slot,
            self.metric,
            if self.direct { " (direct)" } else { "" },
        )
    }
}

#[derive(Debug, Default)]
pub struct RouteTable {
    entries: RwLock<Vec<RouteEntry>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Longest-prefix match: among entries matching `ip`, the one whose mask
    /// has the most leading ones.
    pub fn lookup(&self, ip: Ipv4Address) -> Option<RouteEntry> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|entry| entry.matches(ip))
            .max_by_key(|entry| entry.mask.count_ones())
            .copied()
    }

    /// The entry stored under exactly `(destination & mask, mask)`.
    pub fn lookup_exact(&self, destination: Ipv4Address, mask: Ipv4Mask) -> Option<RouteEntry> {
        let destination = network_id(destination, mask);
        self.entries
            .read()
            .unwrap()
            .iter()
            .find(|entry| entry.destination == destination && entry.mask == mask)
            .copied()
    }

    /// Inserts or updates the entry keyed by `(destination & mask, mask)`.
    ///
    /// An update that changes the gateway, egress, metric, or direct flag
    /// reports a change; one that matches the existing entry only refreshes
    /// its timestamp and reports no change. The metric is clamped to
    /// [`INFINITY`].
    pub fn insert(
        &self,
        destination: Ipv4Address,
        mask: Ipv4Mask,
        gateway: Ipv4Address,
        slot: usize,
        metric: u32,
        direct: bool,
    ) -> bool {
        let destination = network_id(destination, mask);
        let metric = metric.min(INFINITY);
        let mut entries = self.entries.write().unwrap();
        for entry in entries.iter_mut() {
            if entry.destination == destination && entry.mask == mask {
                let changed = entry.gateway != gateway
                    || entry.slot != slot
                    || entry.metric != metric
                    || entry.direct != direct;
                entry.gateway = gateway;
                entry.slot = slot;
                entry.metric = metric;
                entry.direct = direct;
                entry.last_updated = Instant::now();
                return changed;
            }
        }
        entries.push(RouteEntry {
            destination,
            mask,
            gateway,
            slot,
            metric,
            last_updated: Instant::now(),
            direct,
        });
        true
    }

    /// Sets the matching learned entry's metric to [`INFINITY`] and
    /// refreshes its timestamp so the expiry sweep retires it on schedule.
    /// Direct entries are untouched.
    pub fn mark_unreachable(
        &self,
        destination: Ipv4Address,
        mask: Ipv4Mask,
        gateway: Ipv4Address,
        slot: usize,
    ) -> bool {
        let destination = network_id(destination, mask);
        let mut entries = self.entries.write().unwrap();
        for entry in entries.iter_mut() {
            if entry.destination == destination
                && entry.mask == mask
                && entry.gateway == gateway
                && entry.slot == slot
                && !entry.direct
            {
                let changed = entry.metric != INFINITY;
                entry.metric = INFINITY;
                entry.last_updated = Instant::now();
                return changed;
            }
        }
        false
    }

    /// Removes learned entries not refreshed within `timeout`. Direct
    /// entries never expire.
    pub fn expire(&self, timeout: Duration) {
        let now = Instant::now();
        self.entries
            .write()
            .unwrap()
            .retain(|entry| entry.direct || now.duration_since(entry.last_updated) <= timeout);
    }

    /// A snapshot of the entries, for display and tests.
    pub fn snapshot(&self) -> Vec<RouteEntry> {
        self.entries.read().unwrap().clone()
    }

    /// Exports the table as advertisement entries.
    pub fn export_rip(&self) -> Vec<RipEntry> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .map(RipEntry::from)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

impl Display for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in self.snapshot() {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}
