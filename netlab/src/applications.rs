//! Application-level compositions of the protocol cores.

pub mod router;
pub use router::{Router, StaticRoute};

pub mod udp_channel;
pub use udp_channel::UdpChannel;
