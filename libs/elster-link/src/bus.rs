//! CAN bus abstraction
//!
//! A [`Bus`] owns one [`FrameTransport`] and fans every inbound frame out to
//! the registered subscribers. Subscriptions are RAII handles: dropping a
//! [`Subscription`] removes the handler from the registry.
//!
//! Transports:
//! - [`VirtualTransport`]: in-memory link, driven through a [`VirtualPeer`]
//! - `SocketCanTransport`: Linux SocketCAN (feature `socketcan`)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{ElsterError, Result};
use crate::frame::CanFrame;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use self::socketcan_transport::SocketCanTransport;

/// Inbound frame callback
pub type FrameHandler = Arc<dyn Fn(&CanFrame) + Send + Sync>;

/// Frame-level link to the physical (or virtual) bus
#[async_trait]
pub trait FrameTransport: Send + Sync {
    /// Transport name for logging
    fn name(&self) -> &str;

    /// Send one frame
    async fn send(&self, frame: &CanFrame) -> Result<()>;

    /// Receive the next frame, `None` once the link is closed
    ///
    /// Must be cancel safe: the dispatch loop races it against disconnect.
    async fn recv(&self) -> Result<Option<CanFrame>>;

    /// Release the link
    async fn close(&self) -> Result<()>;
}

// ============================================================================
// Bus
// ============================================================================

/// Shared bus with a subscriber registry
pub struct Bus {
    transport: Arc<dyn FrameTransport>,
    subscribers: Arc<DashMap<u64, FrameHandler>>,
    next_subscription: AtomicU64,
    shutdown: CancellationToken,
}

impl Bus {
    pub fn new(transport: Arc<dyn FrameTransport>) -> Self {
        Self {
            transport,
            subscribers: Arc::new(DashMap::new()),
            next_subscription: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Dispatch inbound frames until the transport closes or the bus is disconnected
    pub async fn connect_and_publish(&self) -> Result<()> {
        info!("Bus dispatch started on {}", self.transport.name());

        let result = loop {
            let received = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Ok(()),
                received = self.transport.recv() => received,
            };

            match received {
                Ok(Some(frame)) => self.dispatch(&frame),
                Ok(None) => {
                    debug!("Transport {} closed", self.transport.name());
                    break Ok(());
                },
                Err(e) => {
                    warn!("Bus receive failed on {}: {}", self.transport.name(), e);
                    break Err(e);
                },
            }
        };

        // Wake anything still waiting on this bus
        self.shutdown.cancel();
        self.transport.close().await?;
        info!("Bus dispatch stopped on {}", self.transport.name());
        result
    }

    /// Run [`Bus::connect_and_publish`] on a background task
    ///
    /// Dropping the returned guard disconnects the bus.
    pub fn spawn_dispatch(self: &Arc<Self>) -> DispatchGuard {
        let bus = Arc::clone(self);
        let handle = tokio::spawn(async move { bus.connect_and_publish().await });
        DispatchGuard {
            bus: Arc::clone(self),
            handle: Some(handle),
        }
    }

    /// Send a frame
    pub async fn publish(&self, frame: &CanFrame) -> Result<()> {
        if self.is_disconnected() {
            return Err(ElsterError::Disconnected);
        }
        trace!("TX {:03X} {:02X?}", frame.id, frame.data);
        self.transport.send(frame).await
    }

    /// Register an inbound frame handler
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&CanFrame) + Send + Sync + 'static,
    {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, Arc::new(handler));
        trace!("Subscriber {} registered", id);
        Subscription {
            id,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Remove a handler by subscription id
    pub fn unsubscribe(&self, id: u64) {
        if self.subscribers.remove(&id).is_some() {
            trace!("Subscriber {} removed", id);
        }
    }

    /// Number of registered handlers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Terminate the connection; idempotent
    pub fn disconnect(&self) {
        if !self.shutdown.is_cancelled() {
            debug!("Disconnecting bus {}", self.transport.name());
            self.shutdown.cancel();
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once the bus is disconnected
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    fn dispatch(&self, frame: &CanFrame) {
        trace!("RX {:03X} {:02X?}", frame.id, frame.data);
        // Snapshot so handlers run without holding registry shard locks
        let handlers: Vec<FrameHandler> = self
            .subscribers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for handler in handlers {
            handler(frame);
        }
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("transport", &self.transport.name())
            .field("subscribers", &self.subscribers.len())
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

/// Registered inbound handler, removed on drop
pub struct Subscription {
    id: u64,
    subscribers: Arc<DashMap<u64, FrameHandler>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.subscribers.remove(&self.id).is_some() {
            trace!("Subscriber {} removed", self.id);
        }
    }
}

/// Background dispatch task; disconnects the bus when dropped
#[derive(Debug)]
pub struct DispatchGuard {
    bus: Arc<Bus>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl DispatchGuard {
    /// Disconnect and wait for the dispatch loop to finish
    pub async fn shutdown(mut self) -> Result<()> {
        self.bus.disconnect();
        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| ElsterError::Io(format!("Bus dispatch task failed: {e}")))?,
            None => Ok(()),
        }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        self.bus.disconnect();
    }
}

// ============================================================================
// Virtual transport
// ============================================================================

/// In-memory transport
///
/// Frames injected through the paired [`VirtualPeer`] are received by the
/// bus, frames sent by the bus show up at the peer.
#[derive(Debug)]
pub struct VirtualTransport {
    name: String,
    inbound: Mutex<mpsc::UnboundedReceiver<CanFrame>>,
    outbound: mpsc::UnboundedSender<CanFrame>,
}

impl VirtualTransport {
    pub fn pair(name: impl Into<String>) -> (Self, VirtualPeer) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let transport = Self {
            name: name.into(),
            inbound: Mutex::new(inbound_rx),
            outbound: outbound_tx,
        };
        let peer = VirtualPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
        };
        (transport, peer)
    }
}

#[async_trait]
impl FrameTransport for VirtualTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, frame: &CanFrame) -> Result<()> {
        // A departed peer behaves like an empty bus
        if self.outbound.send(*frame).is_err() {
            trace!("Virtual peer gone, frame {:03X} dropped", frame.id);
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Option<CanFrame>> {
        Ok(self.inbound.lock().await.recv().await)
    }

    async fn close(&self) -> Result<()> {
        self.inbound.lock().await.close();
        Ok(())
    }
}

/// Far end of a [`VirtualTransport`]
#[derive(Debug)]
pub struct VirtualPeer {
    inbound: mpsc::UnboundedSender<CanFrame>,
    outbound: mpsc::UnboundedReceiver<CanFrame>,
}

impl VirtualPeer {
    /// Deliver a frame to the bus
    pub fn inject(&self, frame: CanFrame) -> Result<()> {
        self.inbound
            .send(frame)
            .map_err(|_| ElsterError::Disconnected)
    }

    /// Next frame published by the bus, `None` once the transport is gone
    pub async fn next_published(&mut self) -> Option<CanFrame> {
        self.outbound.recv().await
    }

    /// Published frame if one is already queued
    pub fn try_published(&mut self) -> Option<CanFrame> {
        self.outbound.try_recv().ok()
    }
}

// ============================================================================
// SocketCAN transport
// ============================================================================

#[cfg(all(target_os = "linux", feature = "socketcan"))]
mod socketcan_transport {
    use async_trait::async_trait;
    use socketcan::tokio::CanSocket;
    use socketcan::{CanFrame as SocketFrame, EmbeddedFrame, Id, StandardId};
    use tracing::{debug, trace};

    use super::FrameTransport;
    use crate::error::{ElsterError, Result};
    use crate::frame::CanFrame;

    /// Linux SocketCAN transport
    pub struct SocketCanTransport {
        interface: String,
        socket: CanSocket,
    }

    impl SocketCanTransport {
        /// Open a CAN interface such as `can0` or `slcan0`
        pub fn open(interface: &str) -> Result<Self> {
            debug!("Opening CAN interface: {}", interface);
            let socket = CanSocket::open(interface)
                .map_err(|e| ElsterError::connection_failed(interface, e.to_string()))?;
            Ok(Self {
                interface: interface.to_string(),
                socket,
            })
        }
    }

    #[async_trait]
    impl FrameTransport for SocketCanTransport {
        fn name(&self) -> &str {
            &self.interface
        }

        async fn send(&self, frame: &CanFrame) -> Result<()> {
            let id = StandardId::new(frame.id).ok_or_else(|| {
                ElsterError::invalid_frame(format!("0x{:X} is not a standard id", frame.id))
            })?;
            let out = SocketFrame::new(id, &frame.data)
                .ok_or_else(|| ElsterError::invalid_frame("payload exceeds 8 bytes"))?;
            self.socket.write_frame(out).await?;
            Ok(())
        }

        async fn recv(&self) -> Result<Option<CanFrame>> {
            loop {
                let frame = self.socket.read_frame().await?;
                if !matches!(frame, SocketFrame::Data(_)) {
                    trace!("Skipping non-data frame on {}", self.interface);
                    continue;
                }
                match frame.id() {
                    Id::Standard(id) => {
                        return Ok(Some(CanFrame::from_slice(id.as_raw(), frame.data())?))
                    },
                    Id::Extended(_) => continue,
                }
            }
        }

        async fn close(&self) -> Result<()> {
            debug!("CAN interface {} closed", self.interface);
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn virtual_bus() -> (Arc<Bus>, VirtualPeer) {
        let (transport, peer) = VirtualTransport::pair("vcan-test");
        (Arc::new(Bus::new(Arc::new(transport))), peer)
    }

    fn frame(id: u16) -> CanFrame {
        CanFrame::new(id, [0xD2, 0x00, 0x0C, 0x00, 0x64, 0, 0, 0]).unwrap()
    }

    #[tokio::test]
    async fn test_subscription_dropped_unsubscribes() {
        let (bus, _peer) = virtual_bus();

        let first = bus.subscribe(|_| {});
        let second = bus.subscribe(|_| {});
        assert_ne!(first.id(), second.id());
        assert_eq!(bus.subscriber_count(), 2);

        drop(first);
        assert_eq!(bus.subscriber_count(), 1);

        bus.unsubscribe(second.id());
        assert_eq!(bus.subscriber_count(), 0);
        // Dropping an already removed subscription is harmless
        drop(second);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_reaches_every_subscriber() {
        let (bus, peer) = virtual_bus();
        let seen = Arc::new(AtomicUsize::new(0));

        let _subs: Vec<Subscription> = (0..3)
            .map(|_| {
                let seen = seen.clone();
                bus.subscribe(move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        let guard = bus.spawn_dispatch();
        peer.inject(frame(0x180)).unwrap();
        peer.inject(frame(0x180)).unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while seen.load(Ordering::SeqCst) < 6 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        guard.shutdown().await.unwrap();
        assert!(bus.is_disconnected());
    }

    #[tokio::test]
    async fn test_publish_reaches_peer() {
        let (bus, mut peer) = virtual_bus();
        bus.publish(&frame(0x680)).await.unwrap();
        assert_eq!(peer.next_published().await, Some(frame(0x680)));
        assert!(peer.try_published().is_none());
    }

    #[tokio::test]
    async fn test_publish_after_disconnect_fails() {
        let (bus, _peer) = virtual_bus();
        bus.disconnect();
        bus.disconnect();
        assert_eq!(
            bus.publish(&frame(0x680)).await,
            Err(ElsterError::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_dispatch_ends_when_peer_hangs_up() {
        let (bus, peer) = virtual_bus();
        drop(peer);
        bus.connect_and_publish().await.unwrap();
        assert!(bus.is_disconnected());
    }

    #[tokio::test]
    async fn test_disconnect_stops_dispatch() {
        let (bus, _peer) = virtual_bus();
        let runner = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.connect_and_publish().await })
        };
        tokio::task::yield_now().await;

        bus.disconnect();
        let result = tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        tokio::time::timeout(Duration::from_millis(10), bus.closed())
            .await
            .unwrap();
    }
}
