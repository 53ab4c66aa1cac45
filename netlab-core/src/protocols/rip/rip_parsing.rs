//! The RIP v2 advertisement codec.
//!
//! Wire form per RFC 2453: a 4-byte preamble (command, version, pad word)
//! followed by 20-byte route entries, at most [`MAX_ENTRIES`] per datagram.
//! Entries come straight off the route table ([`From<&RouteEntry>`]) with
//! the gateway riding in the next-hop field.

use crate::protocols::ipv4::{Ipv4Address, Ipv4Mask};
use crate::protocols::utility::BytesExt;
use crate::route_table::{RouteEntry, INFINITY};
use thiserror::Error as ThisError;

const VERSION: u8 = 2;
/// Address family identifier for IPv4 routes.
const AFI_IPV4: u16 = 2;
/// The AFI-zero form that asks a peer for everything it has.
const AFI_WHOLE_TABLE: u16 = 0;

/// The most entries one datagram may carry.
pub const MAX_ENTRIES: usize = 25;

const PREAMBLE_OCTETS: usize = 4;
const ENTRY_OCTETS: usize = 20;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Operation {
    Request = 1,
    Response = 2,
}

/// One advertisement datagram.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RipPacket {
    pub command: Operation,
    pub entries: Vec<RipEntry>,
}

/// One advertised route.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RipEntry {
    pub address_family_id: u16,
    pub route_tag: u16,
    pub prefix: Ipv4Address,
    pub mask: Ipv4Mask,
    pub next_hop: Ipv4Address,
    pub metric: u32,
}

impl RipPacket {
    pub fn request(entries: Vec<RipEntry>) -> Self {
        Self {
            command: Operation::Request,
            entries,
        }
    }

    pub fn response(entries: Vec<RipEntry>) -> Self {
        Self {
            command: Operation::Response,
            entries,
        }
    }

    /// The startup request asking a neighbor for its whole table.
    pub fn whole_table_request() -> Self {
        Self::request(vec![RipEntry::whole_table()])
    }

    /// True for the single-entry AFI-zero, metric-infinity request form.
    pub fn asks_for_whole_table(&self) -> bool {
        self.command == Operation::Request
            && matches!(
                &self.entries[..],
                [only] if only.address_family_id == AFI_WHOLE_TABLE && only.metric == INFINITY
            )
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PREAMBLE_OCTETS + self.entries.len() * ENTRY_OCTETS);
        out.push(self.command as u8);
        out.push(VERSION);
        out.extend_from_slice(&0u16.to_be_bytes());
        for entry in &self.entries {
            entry.write(&mut out);
        }
        out
    }

    pub fn from_bytes(mut bytes: impl Iterator<Item = u8>) -> Result<Self, ParseError> {
        const HTS: ParseError = ParseError::HeaderTooShort;

        let command = match bytes.next_u8().ok_or(HTS)? {
            1 => Operation::Request,
            2 => Operation::Response,
            _ => return Err(ParseError::InvalidOperation),
        };
        let version = bytes.next_u8().ok_or(HTS)?;
        if version != VERSION {
            return Err(ParseError::UnsupportedVersion(version));
        }
        // The unused pad word
        bytes.next_u16_be().ok_or(HTS)?;

        let mut entries = Vec::new();
        while let Some(address_family_id) = bytes.next_u16_be() {
            if entries.len() == MAX_ENTRIES {
                return Err(ParseError::TooManyEntries);
            }
            entries.push(RipEntry::read(address_family_id, &mut bytes)?);
        }

        Ok(Self { command, entries })
    }
}

impl RipEntry {
    /// A route as a neighbor advertises it: the cost as seen from the
    /// advertiser, no explicit next hop.
    pub fn advertised(prefix: Ipv4Address, mask: Ipv4Mask, metric: u32) -> Self {
        Self {
            address_family_id: AFI_IPV4,
            route_tag: 0,
            prefix,
            mask,
            next_hop: Ipv4Address::CURRENT_NETWORK,
            metric,
        }
    }

    pub fn whole_table() -> Self {
        Self {
            address_family_id: AFI_WHOLE_TABLE,
            route_tag: 0,
            prefix: Ipv4Address::CURRENT_NETWORK,
            mask: Ipv4Mask::from_bitcount(0),
            next_hop: Ipv4Address::CURRENT_NETWORK,
            metric: INFINITY,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.address_family_id.to_be_bytes());
        out.extend_from_slice(&self.route_tag.to_be_bytes());
        out.extend_from_slice(&self.prefix.to_bytes());
        out.extend_from_slice(&self.mask.to_u32().to_be_bytes());
        out.extend_from_slice(&self.next_hop.to_bytes());
        out.extend_from_slice(&self.metric.to_be_bytes());
    }

    fn read(
        address_family_id: u16,
        bytes: &mut impl Iterator<Item = u8>,
    ) -> Result<Self, ParseError> {
        const HTS: ParseError = ParseError::HeaderTooShort;

        let route_tag = bytes.next_u16_be().ok_or(HTS)?;
        let prefix = bytes.next_u32_be().ok_or(HTS)?.into();
        let mask = Ipv4Mask::try_from(bytes.next_u32_be().ok_or(HTS)?)
            .map_err(|_| ParseError::InvalidMask)?;
        let next_hop = bytes.next_u32_be().ok_or(HTS)?.into();
        let metric = bytes.next_u32_be().ok_or(HTS)?;
        Ok(Self {
            address_family_id,
            route_tag,
            prefix,
            mask,
            next_hop,
            metric,
        })
    }
}

impl From<&RouteEntry> for RipEntry {
    fn from(route: &RouteEntry) -> Self {
        Self {
            address_family_id: AFI_IPV4,
            route_tag: 0,
            prefix: route.destination(),
            mask: route.mask(),
            next_hop: route.gateway(),
            metric: route.metric(),
        }
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("The RIP preamble is incomplete")]
    HeaderTooShort,
    #[error("Invalid operation: should be 1 for request, 2 for response")]
    InvalidOperation,
    #[error("Unsupported RIP version {0}")]
    UnsupportedVersion(u8),
    #[error("The RIP packet has too many entries")]
    TooManyEntries,
    #[error("An advertised subnet mask had noncontiguous bits")]
    InvalidMask,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rip_parsing_build_unbuild() {
        let entries: Vec<RipEntry> = (1..16)
            .map(|i| {
                RipEntry::advertised(
                    Ipv4Address::from([192, 168, i, 0]),
                    Ipv4Mask::from_bitcount(24),
                    i as u32,
                )
            })
            .collect();

        let packet = RipPacket::response(entries);

        let serialized = packet.build();
        assert_eq!(serialized.len(), PREAMBLE_OCTETS + 15 * ENTRY_OCTETS);
        let unserialized = RipPacket::from_bytes(serialized.iter().cloned()).unwrap();

        assert_eq!(unserialized, packet);
    }

    #[test]
    fn rip_parsing_too_many_entries() {
        let entries: Vec<RipEntry> = (1..27)
            .map(|i| {
                RipEntry::advertised(
                    Ipv4Address::from([192, 168, 1, i]),
                    Ipv4Mask::from_bitcount(32),
                    i as u32,
                )
            })
            .collect();

        let packet = RipPacket::request(entries);

        let error = RipPacket::from_bytes(packet.build().iter().cloned())
            .expect_err("packet has too many entries");
        assert_eq!(error, ParseError::TooManyEntries);
    }

    #[test]
    fn whole_table_request_round_trips() {
        let request = RipPacket::whole_table_request();
        assert!(request.asks_for_whole_table());
        let parsed = RipPacket::from_bytes(request.build().iter().cloned()).unwrap();
        assert!(parsed.asks_for_whole_table());

        // An ordinary request is not the whole-table form
        let specific = RipPacket::request(vec![RipEntry::advertised(
            Ipv4Address::from([10, 0, 0, 0]),
            Ipv4Mask::from_bitcount(8),
            1,
        )]);
        assert!(!specific.asks_for_whole_table());
    }

    #[test]
    fn truncated_entry_is_rejected() {
        let packet = RipPacket::response(vec![RipEntry::advertised(
            Ipv4Address::from([10, 0, 0, 0]),
            Ipv4Mask::from_bitcount(8),
            1,
        )]);
        let bytes = packet.build();
        let error = RipPacket::from_bytes(bytes[..bytes.len() - 3].iter().cloned())
            .expect_err("truncated entry should not parse");
        assert_eq!(error, ParseError::HeaderTooShort);
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut bytes = RipPacket::whole_table_request().build();
        bytes[1] = 1;
        let error = RipPacket::from_bytes(bytes.iter().cloned())
            .expect_err("RIP v1 datagrams are not understood");
        assert_eq!(error, ParseError::UnsupportedVersion(1));
    }
}
