use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::network::{Frame, PeerEvents};
use crate::{AppError, AppResult};

/// Connection state of a peer. Monotonic per socket instance:
/// `Unconnected → Connected → Disconnected`. A pooled peer goes back to
/// `Unconnected` when the pool resets it on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Unconnected,
    Connected,
    Disconnected,
}

/// Callback run exactly once when a peer closes, carrying the peer id.
/// The server role uses it to recycle the peer and release its admission
/// permit; the client role uses it to clear its slot.
pub type RecycleFn = Box<dyn FnOnce(u64) + Send + 'static>;

/// Everything tied to one socket binding. Taken out of the peer exactly once
/// on close, which is what makes teardown single-shot.
struct Binding {
    frame_tx: mpsc::UnboundedSender<Bytes>,
    cancel: CancellationToken,
    recycle: Option<RecycleFn>,
}

struct PeerInner {
    state: PeerState,
    binding: Option<Binding>,
    /// Bumped on every bind. I/O tasks carry the epoch they were spawned
    /// under, so a stale task observing a late socket error cannot tear down
    /// a binding it does not belong to (pooled peers are rebound).
    epoch: u64,
}

/// Owns one live socket: runs the receive loop, reassembles inbound frames,
/// and drains outbound frames through a single writer task so at most one
/// write is in flight and `send` order is preserved.
pub struct Peer {
    id: u64,
    events: Arc<dyn PeerEvents>,
    read_buffer_size: usize,
    max_frame_size: Option<usize>,
    inner: Mutex<PeerInner>,
}

impl Peer {
    pub fn new(
        id: u64,
        events: Arc<dyn PeerEvents>,
        read_buffer_size: usize,
        max_frame_size: Option<usize>,
    ) -> Self {
        Peer {
            id,
            events,
            read_buffer_size,
            max_frame_size,
            inner: Mutex::new(PeerInner {
                state: PeerState::Unconnected,
                binding: None,
                epoch: 0,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> PeerState {
        self.inner.lock().state
    }

    /// Takes exclusive ownership of the socket, fires `on_opened`, and starts
    /// the receive and write-drain tasks. Rejected unless the peer is
    /// `Unconnected`.
    pub fn bind(self: &Arc<Self>, socket: TcpStream, recycle: Option<RecycleFn>) -> AppResult<()> {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let epoch = {
            let mut inner = self.inner.lock();
            if inner.state != PeerState::Unconnected {
                error!("bind rejected, peer {} is {:?}", self.id, inner.state);
                return Err(AppError::AlreadyConnected(self.id));
            }
            inner.state = PeerState::Connected;
            inner.epoch += 1;
            inner.binding = Some(Binding {
                frame_tx,
                cancel: cancel.clone(),
                recycle,
            });
            inner.epoch
        };

        debug!("peer {} connected", self.id);
        self.events.on_opened(self.id);

        let (reader, writer) = socket.into_split();
        tokio::spawn(self.clone().read_loop(reader, cancel.clone(), epoch));
        tokio::spawn(self.clone().write_loop(writer, frame_rx, cancel, epoch));
        Ok(())
    }

    /// Packs the payload and enqueues it for transmission, returning `true`
    /// immediately. Frames are written strictly in `send` order. Returns
    /// `false` with an error log when the peer is not connected.
    pub fn send(&self, payload: &[u8]) -> bool {
        let frame = Frame::pack(payload);
        let inner = self.inner.lock();
        match (&inner.state, &inner.binding) {
            (PeerState::Connected, Some(binding)) => binding.frame_tx.send(frame).is_ok(),
            _ => {
                error!("send rejected, peer {} is {:?}", self.id, inner.state);
                false
            }
        }
    }

    /// Tears the connection down. Idempotent and safe from any thread: the
    /// first caller takes the binding and wins; later calls are no-ops.
    /// Fires `on_closed` exactly once, then runs the recycle callback.
    pub fn close(&self) {
        self.teardown(None);
    }

    /// Teardown entry for the I/O tasks: only closes if the task's binding is
    /// still the current one.
    fn close_binding(&self, epoch: u64) {
        self.teardown(Some(epoch));
    }

    fn teardown(&self, epoch: Option<u64>) {
        let binding = {
            let mut inner = self.inner.lock();
            if epoch.is_some_and(|epoch| epoch != inner.epoch) {
                return;
            }
            if inner.state != PeerState::Connected {
                return;
            }
            inner.state = PeerState::Disconnected;
            inner.binding.take()
        };
        let Some(mut binding) = binding else { return };

        // stops both I/O tasks; the socket halves drop when they exit
        binding.cancel.cancel();
        debug!("peer {} disconnected", self.id);
        self.events.on_closed(self.id);
        if let Some(recycle) = binding.recycle.take() {
            recycle(self.id);
        }
    }

    /// Returns a disconnected peer to `Unconnected` so it can be bound again.
    /// Only the pool calls this, after teardown has finished.
    pub(crate) fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.state == PeerState::Disconnected {
            inner.state = PeerState::Unconnected;
            inner.binding = None;
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        mut reader: OwnedReadHalf,
        cancel: CancellationToken,
        epoch: u64,
    ) {
        let mut buffer = BytesMut::with_capacity(self.read_buffer_size);
        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                res = reader.read_buf(&mut buffer) => res,
            };
            match read {
                // remote closed the connection
                Ok(0) => {
                    self.close_binding(epoch);
                    break;
                }
                Ok(_) => {
                    if let Err(e) = self.drain_frames(&mut buffer) {
                        error!("peer {} inbound frame error: {}", self.id, e);
                        self.close_binding(epoch);
                        break;
                    }
                }
                Err(e) => {
                    error!("peer {} read error: {}", self.id, e);
                    self.close_binding(epoch);
                    break;
                }
            }
        }
        debug!("peer {} read loop exited", self.id);
    }

    /// Extracts every complete frame from the accumulation buffer, firing
    /// `on_message` once per frame in arrival order. At most one partial
    /// frame stays buffered for the next read.
    fn drain_frames(&self, buffer: &mut BytesMut) -> AppResult<()> {
        loop {
            if let (Some(max), Some(declared)) = (self.max_frame_size, Frame::declared_len(buffer))
            {
                if declared > max {
                    return Err(AppError::FrameTooLarge(declared));
                }
            }
            match Frame::unpack(buffer) {
                Some(payload) => self.events.on_message(self.id, payload),
                None => return Ok(()),
            }
        }
    }

    async fn write_loop(
        self: Arc<Self>,
        mut writer: OwnedWriteHalf,
        mut frame_rx: mpsc::UnboundedReceiver<Bytes>,
        cancel: CancellationToken,
        epoch: u64,
    ) {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                maybe_frame = frame_rx.recv() => match maybe_frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            if let Err(e) = writer.write_all(&frame).await {
                error!("peer {} write error: {}", self.id, e);
                self.close_binding(epoch);
                break;
            }
        }
        debug!("peer {} write loop exited", self.id);
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ChannelEvents;

    #[test]
    fn test_send_rejected_when_unconnected() {
        let (events, _event_rx) = ChannelEvents::unbounded();
        let peer = Peer::new(7, events, 4 * 1024, None);
        assert_eq!(peer.state(), PeerState::Unconnected);
        assert!(!peer.send(b"nope"));
    }

    #[test]
    fn test_close_before_bind_is_a_noop() {
        let (events, event_rx) = ChannelEvents::unbounded();
        let peer = Peer::new(7, events, 4 * 1024, None);
        peer.close();
        peer.close();
        assert_eq!(peer.state(), PeerState::Unconnected);
        assert!(event_rx.is_empty());
    }
}
