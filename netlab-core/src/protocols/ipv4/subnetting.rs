//! CIDR subnetting support: masks, network IDs, and `a.b.c.d/len` parsing.

use super::Ipv4Address;
use std::{net::Ipv4Addr, str::FromStr};

/// An IPv4 subnet mask: a thin wrapper around a `u32` whose set bits are
/// contiguous from the top.
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Ipv4Mask(u32);

const fn clamp(num: u32, min: u32, max: u32) -> u32 {
    assert!(min <= max);
    if num < min {
        min
    } else if num > max {
        max
    } else {
        num
    }
}

impl Ipv4Mask {
    /// Returns a mask of `size` leading ones. Sizes above 32 are clamped.
    pub const fn from_bitcount(size: u32) -> Ipv4Mask {
        let size = clamp(size, 0, 32);
        if size == 0 {
            Ipv4Mask(0)
        } else if size == 32 {
            Ipv4Mask(0xFF_FF_FF_FF)
        } else {
            Ipv4Mask(((1 << size) - 1) << (32 - size))
        }
    }

    /// The prefix length, e.g. 24 for 255.255.255.0.
    pub const fn count_ones(&self) -> u32 {
        self.0.count_ones()
    }

    pub const fn to_u32(self) -> u32 {
        self.0
    }

    pub const fn to_ipv4_address(self) -> Ipv4Address {
        Ipv4Address::new(self.to_u32().to_be_bytes())
    }
}

impl std::fmt::Debug for Ipv4Mask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.count_ones())
    }
}

impl std::fmt::Display for Ipv4Mask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

impl From<Ipv4Mask> for u32 {
    fn from(mask: Ipv4Mask) -> u32 {
        mask.0
    }
}

impl TryFrom<u32> for Ipv4Mask {
    type Error = u32;

    /// Fails, returning the number back, if the bits are not contiguous.
    fn try_from(mask: u32) -> Result<Ipv4Mask, u32> {
        let count = mask.count_ones();
        let result = Ipv4Mask::from_bitcount(count);
        if u32::from(result) == mask {
            Ok(result)
        } else {
            Err(mask)
        }
    }
}

impl TryFrom<Ipv4Address> for Ipv4Mask {
    type Error = Ipv4Address;

    fn try_from(mask: Ipv4Address) -> Result<Ipv4Mask, Ipv4Address> {
        Ipv4Mask::try_from(mask.to_u32()).or(Err(mask))
    }
}

/// Masks an address down to the ID of the network containing it.
pub fn network_id(address: Ipv4Address, mask: Ipv4Mask) -> Ipv4Address {
    Ipv4Address::from(address.to_u32() & mask.to_u32())
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("failed to parse CIDR string")]
pub enum CidrParseError {
    Ipv4,
    Mask(#[from] std::num::ParseIntError),
}

/// Turns a string in CIDR notation into an address and a subnet mask.
///
/// # Examples
///
/// ```
/// # use netlab_core::protocols::ipv4::{cidr_to_ip, Ipv4Address, Ipv4Mask};
/// let (ip, mask) = cidr_to_ip("123.45.67.8/14").unwrap();
/// assert_eq!(ip, Ipv4Address::new([123, 45, 67, 8]));
/// assert_eq!(mask, Ipv4Mask::from_bitcount(14));
/// ```
pub fn cidr_to_ip(cidr: &str) -> Result<(Ipv4Address, Ipv4Mask), CidrParseError> {
    let mut parts = cidr.split('/');
    let mut next = || parts.next().ok_or(CidrParseError::Ipv4);
    let ip_str = next()?;
    let mask_str = next()?;

    let ip = Ipv4Addr::from_str(ip_str)
        .or(Err(CidrParseError::Ipv4))?
        .octets()
        .into();
    let mask = Ipv4Mask::from_bitcount(u32::from_str(mask_str)?);
    Ok((ip, mask))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_from_bitcount() {
        assert_eq!(Ipv4Mask::from_bitcount(0).to_u32(), 0);
        assert_eq!(Ipv4Mask::from_bitcount(16).to_u32(), 0xFF_FF_00_00);
        assert_eq!(Ipv4Mask::from_bitcount(32).to_u32(), 0xFF_FF_FF_FF);
        assert_eq!(Ipv4Mask::from_bitcount(99).to_u32(), 0xFF_FF_FF_FF);
    }

    #[test]
    fn mask_rejects_gappy_bits() {
        assert!(Ipv4Mask::try_from(0xFF_00_FF_00u32).is_err());
        assert_eq!(
            Ipv4Mask::try_from(0xFF_FF_FE_00u32),
            Ok(Ipv4Mask::from_bitcount(23))
        );
    }

    #[test]
    fn network_id_masks_host_bits() {
        let ip = Ipv4Address::new([10, 0, 5, 77]);
        let mask = Ipv4Mask::from_bitcount(24);
        assert_eq!(network_id(ip, mask), Ipv4Address::new([10, 0, 5, 0]));
    }
}
