//! End-to-end scenarios run over in-memory networks. Each is an async
//! function with a test wrapper so the suite doubles as a demo catalog.

pub mod checksum_corruption;
pub mod clean_transfer;
pub mod fast_retransmit;
pub mod loss_recovery;
pub mod rip_expiry;
pub mod rip_triangle;
pub mod static_forwarding;
