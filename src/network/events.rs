use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

/// Lifecycle and message hooks a peer owner implements.
///
/// All hooks are invoked from worker tasks, potentially concurrently across
/// peers (never concurrently for the same peer). Owners that need a
/// single-threaded context must marshal themselves, or use [`ChannelEvents`].
pub trait PeerEvents: Send + Sync + 'static {
    fn on_opened(&self, peer_id: u64);
    fn on_closed(&self, peer_id: u64);
    fn on_message(&self, peer_id: u64, payload: Bytes);
}

/// One peer event, as carried by [`ChannelEvents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Opened(u64),
    Closed(u64),
    Message(u64, Bytes),
}

/// A [`PeerEvents`] impl that funnels every event into a channel.
///
/// This is the inbound-FIFO consumption pattern: all worker-task callbacks
/// become sends on one channel, drained by a single consumer task.
pub struct ChannelEvents {
    event_tx: async_channel::Sender<PeerEvent>,
}

impl ChannelEvents {
    pub fn unbounded() -> (Arc<Self>, async_channel::Receiver<PeerEvent>) {
        let (event_tx, event_rx) = async_channel::unbounded();
        (Arc::new(ChannelEvents { event_tx }), event_rx)
    }

    fn forward(&self, event: PeerEvent) {
        // try_send on an unbounded channel only fails once the receiver is gone
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("peer event dropped, consumer is gone: {:?}", e.into_inner());
        }
    }
}

impl PeerEvents for ChannelEvents {
    fn on_opened(&self, peer_id: u64) {
        self.forward(PeerEvent::Opened(peer_id));
    }

    fn on_closed(&self, peer_id: u64) {
        self.forward(PeerEvent::Closed(peer_id));
    }

    fn on_message(&self, peer_id: u64, payload: Bytes) {
        self.forward(PeerEvent::Message(peer_id, payload));
    }
}
