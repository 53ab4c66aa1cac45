//! The datagram facility that both protocol cores run on.
//!
//! A [`Network`] is a broadcast segment connecting any number of taps. It
//! delivers whole datagrams or loses them; there is no reliability, no
//! ordering guarantee across taps, and optionally random or scripted faults.
//! The transfer endpoints only need point-to-point datagram service, so they
//! consume the narrower [`Channel`] trait, which a [`Tap`] implements and
//! which the application crate also implements over a UDP socket.

use async_trait::async_trait;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

/// A MAC address. Stored in the low 48 bits.
pub type Mac = u64;

/// The L2 broadcast address, FF:FF:FF:FF:FF:FF.
pub const BROADCAST_MAC: Mac = 0xFF_FF_FF_FF_FF_FF;

/// Per-tap receive queue depth. A full queue drops, as a real NIC would.
const TAP_QUEUE: usize = 128;

/// A datagram in flight: the raw bytes plus which tap sent them.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub payload: Vec<u8>,
    pub sender: usize,
}

/// What a fault hook decided to do with a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Deliver,
    Drop,
    /// Deliver with one payload byte flipped.
    Corrupt,
}

type FaultHook = Box<dyn FnMut(&[u8]) -> Fault + Send>;

struct NetworkInner {
    attachments: RwLock<Vec<mpsc::Sender<Delivery>>>,
    loss_rate: f64,
    rng: Mutex<SmallRng>,
    hook: Mutex<Option<FaultHook>>,
}

/// An in-memory broadcast network segment.
///
/// Cloning yields another handle to the same segment. Datagrams sent through
/// a tap are delivered to every other tap, subject to the configured loss
/// rate and fault hook.
#[derive(Clone)]
pub struct Network {
    inner: Arc<NetworkInner>,
}

impl Network {
    /// A lossless network.
    pub fn basic() -> Self {
        NetworkBuilder::new().build()
    }

    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::new()
    }

    /// Attaches a new tap to this network.
    pub fn tap(&self) -> Tap {
        let (sender, receiver) = mpsc::channel(TAP_QUEUE);
        let mut attachments = self.inner.attachments.write().unwrap();
        attachments.push(sender);
        Tap {
            index: attachments.len() - 1,
            network: self.clone(),
            receiver,
        }
    }

    fn broadcast(&self, mut payload: Vec<u8>, sender: usize) {
        match self.judge(&payload) {
            Fault::Deliver => {}
            Fault::Drop => return,
            Fault::Corrupt => {
                let middle = payload.len() / 2;
                if let Some(byte) = payload.get_mut(middle) {
                    *byte ^= 0x01;
                }
            }
        }
        let attachments = self.inner.attachments.read().unwrap();
        for attachment in attachments
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != sender)
            .map(|(_, attachment)| attachment)
        {
            // A full or closed queue is a lost datagram, not an error
            let _ = attachment.try_send(Delivery {
                payload: payload.clone(),
                sender,
            });
        }
    }

    fn judge(&self, payload: &[u8]) -> Fault {
        if let Some(hook) = self.inner.hook.lock().unwrap().as_mut() {
            let verdict = hook(payload);
            if verdict != Fault::Deliver {
                return verdict;
            }
        }
        if self.inner.loss_rate > 0.0
            && self.inner.rng.lock().unwrap().gen_bool(self.inner.loss_rate)
        {
            return Fault::Drop;
        }
        Fault::Deliver
    }
}

/// Configures a [`Network`] before any taps attach.
pub struct NetworkBuilder {
    loss_rate: f64,
    seed: u64,
    hook: Option<FaultHook>,
}

impl NetworkBuilder {
    pub fn new() -> Self {
        Self {
            loss_rate: 0.0,
            seed: 0xBAD5EED,
            hook: None,
        }
    }

    /// The probability in [0, 1] that any given datagram is lost.
    pub fn loss_rate(mut self, loss_rate: f64) -> Self {
        self.loss_rate = loss_rate;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Installs a scripted fault hook, called once per datagram before the
    /// random loss check. Simulations use this to drop or corrupt specific
    /// segments deterministically.
    pub fn fault_hook(mut self, hook: impl FnMut(&[u8]) -> Fault + Send + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> Network {
        Network {
            inner: Arc::new(NetworkInner {
                attachments: RwLock::new(Vec::new()),
                loss_rate: self.loss_rate,
                rng: Mutex::new(SmallRng::seed_from_u64(self.seed)),
                hook: Mutex::new(self.hook),
            }),
        }
    }
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One attachment point on a [`Network`]: the receive queue plus the ability
/// to broadcast onto the segment.
pub struct Tap {
    index: usize,
    network: Network,
    receiver: mpsc::Receiver<Delivery>,
}

impl Tap {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn send(&self, payload: Vec<u8>) {
        self.network.broadcast(payload, self.index);
    }

    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// A cloneable handle that can transmit through this tap. Receiving
    /// stays with the tap itself.
    pub fn sender(&self) -> TapSender {
        TapSender {
            network: self.network.clone(),
            index: self.index,
        }
    }
}

/// The transmit half of a [`Tap`], cloneable so routers can hand one to the
/// forwarder and another to the control plane.
#[derive(Clone)]
pub struct TapSender {
    network: Network,
    index: usize,
}

impl TapSender {
    pub fn send(&self, payload: Vec<u8>) {
        self.network.broadcast(payload, self.index);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("the peer end of the channel is gone")]
    Closed,
    #[error("datagram I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Point-to-point datagram service, as consumed by the transfer endpoints.
///
/// Implemented by [`Tap`] for simulations and by the application crate's UDP
/// socket adapter for real traffic. Datagrams may be lost, reordered, or
/// corrupted; `recv` blocks until one arrives.
#[async_trait]
pub trait Channel: Send {
    async fn send(&mut self, datagram: Vec<u8>) -> Result<(), ChannelError>;

    async fn recv(&mut self) -> Result<Vec<u8>, ChannelError>;
}

#[async_trait]
impl Channel for Tap {
    async fn send(&mut self, datagram: Vec<u8>) -> Result<(), ChannelError> {
        Tap::send(self, datagram);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, ChannelError> {
        match self.receiver.recv().await {
            Some(delivery) => Ok(delivery.payload),
            None => Err(ChannelError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_other_taps_only() {
        let network = Network::basic();
        let mut a = network.tap();
        let mut b = network.tap();
        let c = network.tap();

        c.send(b"hello".to_vec());
        let at_a = a.recv().await.unwrap();
        let at_b = b.recv().await.unwrap();
        assert_eq!(at_a.payload, b"hello");
        assert_eq!(at_b.payload, b"hello");
        assert_eq!(at_a.sender, c.index());
    }

    #[tokio::test]
    async fn scripted_drop() {
        let mut first = true;
        let network = Network::builder()
            .fault_hook(move |_| {
                if first {
                    first = false;
                    Fault::Drop
                } else {
                    Fault::Deliver
                }
            })
            .build();
        let a = network.tap();
        let mut b = network.tap();

        a.send(b"lost".to_vec());
        a.send(b"kept".to_vec());
        assert_eq!(b.recv().await.unwrap().payload, b"kept");
    }

    #[tokio::test]
    async fn corruption_flips_one_byte() {
        let network = Network::builder().fault_hook(|_| Fault::Corrupt).build();
        let a = network.tap();
        let mut b = network.tap();

        a.send(vec![0u8; 8]);
        let got = b.recv().await.unwrap().payload;
        assert_eq!(got.iter().filter(|&&byte| byte != 0).count(), 1);
    }
}
