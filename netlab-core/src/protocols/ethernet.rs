//! The 14-byte Ethernet II header framing every datagram a router handles.

use crate::network::Mac;
use thiserror::Error as ThisError;

/// EtherType for IPv4 payloads.
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// The length of a serialized header.
pub const HEADER_OCTETS: usize = 14;

/// An Ethernet II header. MAC addresses live in the low 48 bits of a `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EthernetHeader {
    pub destination: Mac,
    pub source: Mac,
    pub ethertype: u16,
}

impl EthernetHeader {
    pub fn new(destination: Mac, source: Mac, ethertype: u16) -> Self {
        Self {
            destination,
            source,
            ethertype,
        }
    }

    /// Creates a serialized header.
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_OCTETS);
        // MAC addresses are 6 bytes long
        out.extend_from_slice(&self.destination.to_be_bytes()[2..8]);
        out.extend_from_slice(&self.source.to_be_bytes()[2..8]);
        out.extend_from_slice(&self.ethertype.to_be_bytes());
        out
    }

    /// Parses a header from a byte iterator.
    pub fn from_bytes(mut bytes: impl Iterator<Item = u8>) -> Result<Self, ParseError> {
        const HTS: ParseError = ParseError::HeaderTooShort;

        let mut next = || bytes.next().ok_or(HTS);
        let destination =
            u64::from_be_bytes([0, 0, next()?, next()?, next()?, next()?, next()?, next()?]);
        let source =
            u64::from_be_bytes([0, 0, next()?, next()?, next()?, next()?, next()?, next()?]);
        let ethertype = u16::from_be_bytes([next()?, next()?]);
        Ok(Self {
            destination,
            source,
            ethertype,
        })
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("The Ethernet header is incomplete")]
    HeaderTooShort,
}
