//! Protocol cores for the netlab virtual network.
//!
//! Netlab models a small internet for networking coursework: endpoints that
//! move files over an unreliable datagram service with TCP-like reliability,
//! and routers that learn paths with a RIP v2 distance-vector control plane
//! and forward packets with longest-prefix matching.
//!
//! # Organization
//!
//! - [`network`] provides the datagram facility everything else runs on: an
//!   in-memory broadcast [`Network`](network::Network) with per-send loss and
//!   corruption injection, and the [`Channel`](network::Channel) trait that
//!   lets the transfer endpoints run over any datagram transport.
//! - [`protocols::rdt`] is the reliable data transfer core: wire codec, RTT
//!   estimation, sliding window, and the sender/receiver state machines.
//! - [`protocols::rip`], [`route_table`], and [`protocols::forwarding`] make
//!   up the router: advertisement exchange, the shared route table, and the
//!   per-packet forwarding pipeline.
//!
//! Protocol state machines are driven by timed events and inbound wire units;
//! both arrive as messages on tokio channels so each machine owns its state
//! without fine-grained locking.

pub mod network;
pub use network::Network;

pub mod protocols;

pub mod route_table;
pub use route_table::RouteTable;

pub mod shutdown;
pub use shutdown::Shutdown;
