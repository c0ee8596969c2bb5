//! Ports: where packets enter and leave the dataplane.
//!
//! A port is anything with the capability set {open, close, send, recv}
//! plus observable link/admin state and counters. Concrete transports are
//! UDP datagrams and TCP streams; the two synthetic ports (drop, flood) are
//! owned by the [`table::PortTable`].
//!
//! Egress never writes to the wire directly: frames are enqueued on the
//! port's bounded transmit ring and drained by the port's transmit worker,
//! so a slow peer cannot stall the ingress worker. A full ring drops the
//! frame and counts it.

pub mod table;

mod synthetic;
mod tcp;
mod udp;

pub use synthetic::{DropPort, FloodPort};
pub use tcp::TcpPort;
pub use udp::UdpPort;

use crate::error::Result;
use crate::pool::Buffer;
use crate::telemetry::Counter;
use crossbeam::channel::{Sender, TrySendError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub type PortId = u32;

/// Reserved id of the synthetic drop port.
pub const DROP_PORT_ID: PortId = u32::MAX;

/// Reserved id of the synthetic flood port.
pub const FLOOD_PORT_ID: PortId = u32::MAX - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Udp,
    Tcp,
    Drop,
    Flood,
}

impl std::str::FromStr for PortKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "udp" => Ok(PortKind::Udp),
            "tcp" => Ok(PortKind::Tcp),
            _ => Err(format!("unknown port kind: {}", s)),
        }
    }
}

/// Per-port packet counters.
#[derive(Debug, Default)]
pub struct PortStats {
    pub rx_pkts: Counter,
    pub rx_bytes: Counter,
    pub tx_pkts: Counter,
    pub tx_bytes: Counter,
    pub rx_drops: Counter,
    pub tx_drops: Counter,
}

impl PortStats {
    pub fn record_rx(&self, bytes: usize) {
        self.rx_pkts.inc();
        self.rx_bytes.add(bytes as u64);
    }

    pub fn record_tx(&self, bytes: usize) {
        self.tx_pkts.inc();
        self.tx_bytes.add(bytes as u64);
    }

    pub fn record_rx_drop(&self) {
        self.rx_drops.inc();
    }

    pub fn record_tx_drop(&self) {
        self.tx_drops.inc();
    }
}

/// An outbound frame. Unicast egress moves the pool buffer itself; flood
/// shares one immutable copy of the payload across all targets.
pub enum Frame {
    Pooled(Buffer),
    Shared(Arc<[u8]>),
}

impl Frame {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Frame::Pooled(buffer) => buffer.ctx.bytes(),
            Frame::Shared(bytes) => bytes,
        }
    }
}

/// State every port carries: identity, admin/link flags, counters, and the
/// transmit ring installed while workers are running.
pub struct PortCore {
    id: PortId,
    name: String,
    admin_up: AtomicBool,
    link_up: AtomicBool,
    stats: PortStats,
    ring: Mutex<Option<Sender<Frame>>>,
}

impl PortCore {
    pub fn new(id: PortId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            admin_up: AtomicBool::new(true),
            link_up: AtomicBool::new(false),
            stats: PortStats::default(),
            ring: Mutex::new(None),
        }
    }

    pub fn set_link_up(&self, up: bool) {
        self.link_up.store(up, Ordering::Release);
    }

    pub fn stats(&self) -> &PortStats {
        &self.stats
    }
}

/// The port capability set. Concrete ports implement the transport edges;
/// identity, state, and ring handling are provided.
pub trait Port: Send + Sync {
    fn core(&self) -> &PortCore;

    fn kind(&self) -> PortKind;

    /// Allocates OS resources and brings the link up per the transport's
    /// probe.
    fn open(&self) -> Result<()>;

    /// Releases OS resources and takes the link down.
    fn close(&self);

    /// Writes one frame to the wire. Called from the transmit worker.
    fn send(&self, frame: &[u8]) -> Result<usize>;

    /// Reads one frame, filling `buf`. `Ok(None)` means nothing arrived
    /// within the receive timeout. Called from the receive worker.
    fn recv(&self, buf: &mut [u8]) -> Result<Option<usize>>;

    /// The transport's bound address, when it has one.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn id(&self) -> PortId {
        self.core().id
    }

    fn name(&self) -> &str {
        &self.core().name
    }

    fn stats(&self) -> &PortStats {
        &self.core().stats
    }

    fn admin_up(&self) -> bool {
        self.core().admin_up.load(Ordering::Acquire)
    }

    fn set_admin_up(&self, up: bool) {
        self.core().admin_up.store(up, Ordering::Release);
    }

    fn link_up(&self) -> bool {
        self.core().link_up.load(Ordering::Acquire)
    }

    fn is_up(&self) -> bool {
        self.admin_up() && self.link_up()
    }

    /// Installs the bounded transmit ring drained by this port's transmit
    /// worker.
    fn attach_ring(&self, ring: Sender<Frame>) {
        *self.core().ring.lock().unwrap() = Some(ring);
    }

    fn detach_ring(&self) {
        *self.core().ring.lock().unwrap() = None;
    }

    /// Queues a frame for transmission without blocking. A full ring (or a
    /// port with no running worker) counts a tx drop and hands the frame
    /// back so the caller can release pooled storage.
    fn enqueue(&self, frame: Frame) -> std::result::Result<(), Frame> {
        let ring = self.core().ring.lock().unwrap();
        match ring.as_ref() {
            Some(tx) => match tx.try_send(frame) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(frame)) | Err(TrySendError::Disconnected(frame)) => {
                    self.stats().record_tx_drop();
                    Err(frame)
                }
            },
            None => {
                self.stats().record_tx_drop();
                Err(frame)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;

    struct FakePort {
        core: PortCore,
    }

    impl Port for FakePort {
        fn core(&self) -> &PortCore {
            &self.core
        }
        fn kind(&self) -> PortKind {
            PortKind::Udp
        }
        fn open(&self) -> Result<()> {
            self.core.set_link_up(true);
            Ok(())
        }
        fn close(&self) {
            self.core.set_link_up(false);
        }
        fn send(&self, frame: &[u8]) -> Result<usize> {
            Ok(frame.len())
        }
        fn recv(&self, _buf: &mut [u8]) -> Result<Option<usize>> {
            Ok(None)
        }
    }

    fn fake(id: PortId) -> FakePort {
        FakePort {
            core: PortCore::new(id, "fake"),
        }
    }

    #[test]
    fn test_up_needs_admin_and_link() {
        let port = fake(1);
        assert!(!port.is_up());
        port.open().unwrap();
        assert!(port.is_up());
        port.set_admin_up(false);
        assert!(!port.is_up());
        port.set_admin_up(true);
        port.close();
        assert!(!port.is_up());
    }

    #[test]
    fn test_enqueue_without_ring_drops() {
        let port = fake(1);
        let frame = Frame::Shared(Arc::from(&[1u8, 2][..]));
        assert!(port.enqueue(frame).is_err());
        assert_eq!(port.stats().tx_drops.get(), 1);
    }

    #[test]
    fn test_enqueue_full_ring_drops_tail() {
        let port = fake(1);
        let (tx, _rx) = channel::bounded(1);
        port.attach_ring(tx);
        let payload: Arc<[u8]> = Arc::from(&[0u8][..]);
        assert!(port.enqueue(Frame::Shared(payload.clone())).is_ok());
        assert!(port.enqueue(Frame::Shared(payload)).is_err());
        assert_eq!(port.stats().tx_drops.get(), 1);
    }

    #[test]
    fn test_frame_bytes() {
        let shared = Frame::Shared(Arc::from(&[9u8, 8, 7][..]));
        assert_eq!(shared.bytes(), &[9, 8, 7]);
    }
}
