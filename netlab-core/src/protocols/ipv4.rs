//! Internet Protocol v4 types shared by the router and the RIP engine: the
//! address and mask types, and the base header codec.

pub mod ipv4_address;
pub use ipv4_address::Ipv4Address;

pub mod ipv4_parsing;
pub use ipv4_parsing::{Ipv4Header, Ipv4HeaderBuilder};

pub mod subnetting;
pub use subnetting::{cidr_to_ip, network_id, Ipv4Mask};

/// The IPv4 protocol number for UDP.
pub const PROTOCOL_UDP: u8 = 17;
