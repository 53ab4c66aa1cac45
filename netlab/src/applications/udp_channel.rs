//! Bridges the transfer endpoints onto a real UDP socket.

use async_trait::async_trait;
use netlab_core::network::{Channel, ChannelError};
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// The largest datagram we will accept off the wire.
const RECV_BUFFER: usize = 65536;

/// A [`Channel`] over a bound UDP socket.
///
/// The sending endpoint connects to its peer up front; the receiving
/// endpoint learns its peer from the first datagram that arrives, the same
/// way the receiver state machine replies to whoever contacted it.
pub struct UdpChannel {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
}

impl UdpChannel {
    pub async fn bind(local_port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port)).await?;
        Ok(Self { socket, peer: None })
    }

    pub fn connect(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }
}

#[async_trait]
impl Channel for UdpChannel {
    async fn send(&mut self, datagram: Vec<u8>) -> Result<(), ChannelError> {
        let Some(peer) = self.peer else {
            return Err(ChannelError::Closed);
        };
        self.socket.send_to(&datagram, peer).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, ChannelError> {
        let mut buffer = vec![0u8; RECV_BUFFER];
        let (length, from) = self.socket.recv_from(&mut buffer).await?;
        if self.peer.is_none() {
            self.peer = Some(from);
        }
        buffer.truncate(length);
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_and_peer_learning() -> anyhow::Result<()> {
        let mut listener = UdpChannel::bind(0).await?;
        let listener_addr = listener.socket.local_addr()?;

        let mut caller = UdpChannel::bind(0).await?.connect(listener_addr);
        caller.send(b"hello".to_vec()).await?;

        assert_eq!(listener.recv().await?, b"hello");
        // The listener can now answer without ever being configured
        listener.send(b"hi back".to_vec()).await?;
        assert_eq!(caller.recv().await?, b"hi back");
        Ok(())
    }
}
