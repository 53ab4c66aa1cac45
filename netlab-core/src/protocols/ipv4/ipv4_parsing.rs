use super::Ipv4Address;
use crate::protocols::utility::{BytesExt, Checksum};
use thiserror::Error as ThisError;

/// The number of `u32` words in a basic IPv4 header
const BASE_WORDS: u8 = 5;
/// The number of `u8` bytes in a basic IPv4 header
const BASE_OCTETS: u16 = BASE_WORDS as u16 * 4;

/// An IPv4 header, as described in RFC 791 p11 s3.1.
///
/// Only the 20-byte base header is supported; type of service and the
/// flags-and-fragment-offset word are carried as raw integers since the
/// router never acts on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Header {
    /// Internet Header Length, the number of `u32` words in the header
    pub ihl: u8,
    pub type_of_service: u8,
    /// The length of the datagram in bytes, header included
    pub total_length: u16,
    pub identification: u16,
    pub flags_and_fragment_offset: u16,
    pub time_to_live: u8,
    /// The next level protocol in the data portion of the datagram
    pub protocol: u8,
    /// The header checksum as it appeared on the wire
    pub checksum: u16,
    pub source: Ipv4Address,
    pub destination: Ipv4Address,
}

impl Ipv4Header {
    /// Parses a header from a byte iterator, verifying the checksum by
    /// re-accumulating the words as they stream past.
    pub fn from_bytes(mut bytes: impl Iterator<Item = u8>) -> Result<Self, ParseError> {
        const HTS: ParseError = ParseError::HeaderTooShort;

        let mut checksum = Checksum::new();

        let version_and_ihl = bytes.next_u8().ok_or(HTS)?;
        let version = version_and_ihl >> 4;
        if version != 4 {
            Err(ParseError::IncorrectIpv4Version)?
        }
        let ihl = version_and_ihl & 0b1111;
        if ihl != BASE_WORDS {
            Err(ParseError::InvalidHeaderLength)?
        }
        let type_of_service = bytes.next_u8().ok_or(HTS)?;
        checksum.add_u8(version_and_ihl, type_of_service);

        let total_length = bytes.next_u16_be().ok_or(HTS)?;
        checksum.add_u16(total_length);

        let identification = bytes.next_u16_be().ok_or(HTS)?;
        checksum.add_u16(identification);

        let flags_and_fragment_offset = bytes.next_u16_be().ok_or(HTS)?;
        checksum.add_u16(flags_and_fragment_offset);

        let time_to_live = bytes.next_u8().ok_or(HTS)?;
        let protocol = bytes.next_u8().ok_or(HTS)?;
        checksum.add_u8(time_to_live, protocol);

        let expected_checksum = bytes.next_u16_be().ok_or(HTS)?;

        let source_bytes = [
            bytes.next_u8().ok_or(HTS)?,
            bytes.next_u8().ok_or(HTS)?,
            bytes.next_u8().ok_or(HTS)?,
            bytes.next_u8().ok_or(HTS)?,
        ];
        let source = Ipv4Address::from(source_bytes);
        checksum.add_u32(source_bytes);

        let destination_bytes = [
            bytes.next_u8().ok_or(HTS)?,
            bytes.next_u8().ok_or(HTS)?,
            bytes.next_u8().ok_or(HTS)?,
            bytes.next_u8().ok_or(HTS)?,
        ];
        let destination = Ipv4Address::from(destination_bytes);
        checksum.add_u32(destination_bytes);

        let actual_checksum = checksum.as_u16();
        if actual_checksum != expected_checksum {
            Err(ParseError::Checksum {
                expected: expected_checksum,
                actual: actual_checksum,
            })?
        }

        Ok(Self {
            ihl,
            type_of_service,
            total_length,
            identification,
            flags_and_fragment_offset,
            time_to_live,
            protocol,
            checksum: expected_checksum,
            source,
            destination,
        })
    }

    /// Serializes the header, recomputing the checksum from the current
    /// field values. The forwarder uses this after decrementing the TTL.
    pub fn serialize(&self) -> Vec<u8> {
        let mut checksum = Checksum::new();

        let version_and_ihl = (4u8 << 4) | BASE_WORDS;
        checksum.add_u8(version_and_ihl, self.type_of_service);
        checksum.add_u16(self.total_length);
        checksum.add_u16(self.identification);
        checksum.add_u16(self.flags_and_fragment_offset);
        checksum.add_u8(self.time_to_live, self.protocol);
        checksum.add_u32(self.source.into());
        checksum.add_u32(self.destination.into());

        let mut out = Vec::with_capacity(BASE_OCTETS as usize);
        out.push(version_and_ihl);
        out.push(self.type_of_service);
        out.extend_from_slice(&self.total_length.to_be_bytes());
        out.extend_from_slice(&self.identification.to_be_bytes());
        out.extend_from_slice(&self.flags_and_fragment_offset.to_be_bytes());
        out.push(self.time_to_live);
        out.push(self.protocol);
        out.extend_from_slice(&checksum.as_u16().to_be_bytes());
        out.extend_from_slice(&self.source.to_bytes());
        out.extend_from_slice(&self.destination.to_bytes());
        out
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("The IPv4 header is incomplete")]
    HeaderTooShort,
    #[error("Expected version 4 in IPv4 header")]
    IncorrectIpv4Version,
    #[error("Expected 5 words for IPv4 header")]
    InvalidHeaderLength,
    #[error(
        "The header checksum {expected:#06x} does not match the calculated checksum {actual:#06x}"
    )]
    Checksum { expected: u16, actual: u16 },
}

/// A builder for IPv4 headers on locally originated datagrams.
pub struct Ipv4HeaderBuilder {
    payload_length: u16,
    time_to_live: u8,
    protocol: u8,
    source: Ipv4Address,
    destination: Ipv4Address,
}

impl Ipv4HeaderBuilder {
    pub fn new(
        source: Ipv4Address,
        destination: Ipv4Address,
        protocol: u8,
        payload_length: u16,
    ) -> Self {
        Self {
            payload_length,
            time_to_live: 64,
            protocol,
            source,
            destination,
        }
    }

    pub fn time_to_live(mut self, time_to_live: u8) -> Self {
        self.time_to_live = time_to_live;
        self
    }

    /// Creates a serialized header from the configuration provided.
    pub fn build(self) -> Result<Vec<u8>, HeaderBuildError> {
        let total_length = self
            .payload_length
            .checked_add(BASE_OCTETS)
            .ok_or(HeaderBuildError::OverlyLongPayload)?;
        let header = Ipv4Header {
            ihl: BASE_WORDS,
            type_of_service: 0,
            total_length,
            identification: 0,
            flags_and_fragment_offset: 0,
            time_to_live: self.time_to_live,
            protocol: self.protocol,
            checksum: 0,
            source: self.source,
            destination: self.destination,
        };
        Ok(header.serialize())
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum HeaderBuildError {
    #[error("The payload is longer than is allowed")]
    OverlyLongPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header() -> (etherparse::Ipv4Header, Vec<u8>) {
        let payload = "Hello, world!";
        let mut header = etherparse::Ipv4Header::new(
            payload.len().try_into().unwrap(),
            64,
            etherparse::IpNumber::Udp as u8,
            [127, 0, 0, 1],
            [123, 45, 67, 89],
        );
        // Our headers carry a zeroed flags word
        header.dont_fragment = false;
        let mut serial_header = vec![];
        header.write(&mut serial_header).unwrap();
        (header, serial_header)
    }

    #[test]
    fn parses_basic_header() -> anyhow::Result<()> {
        let (valid_header, serial_header) = make_header();
        let parsed = Ipv4Header::from_bytes(serial_header.iter().cloned())?;
        assert_eq!(parsed.ihl, valid_header.ihl());
        assert_eq!(parsed.total_length, valid_header.total_len());
        assert_eq!(parsed.time_to_live, valid_header.time_to_live);
        assert_eq!(parsed.protocol, valid_header.protocol);
        assert_eq!(parsed.checksum, valid_header.calc_header_checksum()?);
        assert_eq!(parsed.source.to_bytes(), valid_header.source);
        assert_eq!(parsed.destination.to_bytes(), valid_header.destination);
        Ok(())
    }

    #[test]
    fn builder_agrees_with_etherparse() -> anyhow::Result<()> {
        let (_, expected) = make_header();
        let actual = Ipv4HeaderBuilder::new(
            Ipv4Address::new([127, 0, 0, 1]),
            Ipv4Address::new([123, 45, 67, 89]),
            17,
            13,
        )
        .build()?;
        assert_eq!(actual, expected);
        Ok(())
    }

    #[test]
    fn rejects_corrupted_header() {
        let (_, mut serial_header) = make_header();
        serial_header[8] ^= 0x40;
        let result = Ipv4Header::from_bytes(serial_header.iter().cloned());
        assert!(matches!(result, Err(ParseError::Checksum { .. })));
    }

    #[test]
    fn serialize_round_trips_after_ttl_change() -> anyhow::Result<()> {
        let (_, serial_header) = make_header();
        let mut parsed = Ipv4Header::from_bytes(serial_header.iter().cloned())?;
        parsed.time_to_live -= 1;
        let reserialized = parsed.serialize();
        let reparsed = Ipv4Header::from_bytes(reserialized.iter().cloned())?;
        assert_eq!(reparsed.time_to_live, parsed.time_to_live);
        Ok(())
    }
}
