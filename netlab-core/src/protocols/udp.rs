//! The 8-byte UDP header. The control plane is the only UDP user in netlab
//! and leaves the optional-over-IPv4 checksum unused, so the codec carries
//! the field without verifying it.

use crate::protocols::utility::BytesExt;
use thiserror::Error as ThisError;

/// The number of bytes in a UDP header
pub const HEADER_OCTETS: u16 = 8;

/// The well-known RIP port.
pub const RIP_PORT: u16 = 520;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub source: u16,
    pub destination: u16,
    /// The length of the UDP packet in bytes, including the header
    pub length: u16,
    pub checksum: u16,
}

impl UdpHeader {
    /// Parses a UDP header from an iterator of bytes.
    pub fn from_bytes(mut packet: impl Iterator<Item = u8>) -> Result<Self, ParseError> {
        const HTS: ParseError = ParseError::HeaderTooShort;

        let source = packet.next_u16_be().ok_or(HTS)?;
        let destination = packet.next_u16_be().ok_or(HTS)?;
        let length = packet.next_u16_be().ok_or(HTS)?;
        if length < HEADER_OCTETS {
            Err(ParseError::LengthMismatch)?
        }
        let checksum = packet.next_u16_be().ok_or(HTS)?;
        Ok(Self {
            source,
            destination,
            length,
            checksum,
        })
    }
}

/// Creates a serialized UDP header for the payload length provided.
pub fn build_udp_header(
    source_port: u16,
    destination_port: u16,
    text_len: usize,
) -> Result<Vec<u8>, BuildHeaderError> {
    let length: u16 = (text_len + HEADER_OCTETS as usize)
        .try_into()
        .map_err(|_| BuildHeaderError::OverlyLongPayload)?;
    let mut out = Vec::with_capacity(HEADER_OCTETS as usize);
    out.extend_from_slice(&source_port.to_be_bytes());
    out.extend_from_slice(&destination_port.to_be_bytes());
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    Ok(out)
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("Too few bytes to constitute a UDP header")]
    HeaderTooShort,
    #[error("The length field is shorter than the header itself")]
    LengthMismatch,
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum BuildHeaderError {
    #[error("The payload is longer than is allowed")]
    OverlyLongPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_build_unbuild() -> anyhow::Result<()> {
        let bytes = build_udp_header(RIP_PORT, RIP_PORT, 24)?;
        let header = UdpHeader::from_bytes(bytes.iter().cloned())?;
        assert_eq!(header.source, RIP_PORT);
        assert_eq!(header.destination, RIP_PORT);
        assert_eq!(header.length, 24 + HEADER_OCTETS);
        assert_eq!(header.checksum, 0);
        Ok(())
    }

    #[test]
    fn udp_rejects_undersized_length() {
        let mut bytes = build_udp_header(1, 2, 0).unwrap();
        bytes[4] = 0;
        bytes[5] = 4;
        UdpHeader::from_bytes(bytes.iter().cloned())
            .expect_err("length below the header size should not parse");
    }
}
