use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::network::{Peer, PeerEvents, PeerState};
use crate::{AppError, AppResult};

/// A bounded, pre-allocated set of reusable peers (server role only).
///
/// All peers are built at construction with ids `0..capacity`. A peer is
/// either free (in the pool) or active (bound to exactly one socket), never
/// both; free count + active count = capacity at all times. Acquire and
/// release are safe under concurrent callers.
pub struct PeerPool {
    capacity: usize,
    free: Mutex<Vec<Arc<Peer>>>,
}

impl PeerPool {
    pub fn new(
        capacity: usize,
        events: Arc<dyn PeerEvents>,
        read_buffer_size: usize,
        max_frame_size: Option<usize>,
    ) -> Self {
        let free = (0..capacity as u64)
            .map(|id| {
                Arc::new(Peer::new(
                    id,
                    events.clone(),
                    read_buffer_size,
                    max_frame_size,
                ))
            })
            .collect();
        PeerPool {
            capacity,
            free: Mutex::new(free),
        }
    }

    /// Removes and returns one free peer.
    ///
    /// The admission semaphore gates the accept path before the pool, so an
    /// empty pool here means the semaphore was bypassed — a contract
    /// violation, logged and answered with `None` rather than a panic.
    pub fn acquire(&self) -> Option<Arc<Peer>> {
        let peer = self.free.lock().pop();
        if peer.is_none() {
            error!("peer pool exhausted, admission semaphore was bypassed");
        }
        peer
    }

    /// Returns a peer to the free set, resetting it for the next binding.
    /// Rejects peers that are still connected or already free.
    pub fn release(&self, peer: Arc<Peer>) -> AppResult<()> {
        if peer.state() == PeerState::Connected {
            error!("release rejected, peer {} is still connected", peer.id());
            return Err(AppError::IllegalState(format!(
                "cannot release connected peer {}",
                peer.id()
            )));
        }
        let mut free = self.free.lock();
        if free.iter().any(|p| p.id() == peer.id()) {
            error!("release rejected, peer {} is already free", peer.id());
            return Err(AppError::AlreadyPooled(peer.id()));
        }
        peer.reset();
        free.push(peer);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ChannelEvents;

    fn pool_of(capacity: usize) -> PeerPool {
        let (events, _event_rx) = ChannelEvents::unbounded();
        PeerPool::new(capacity, events, 4 * 1024, None)
    }

    #[test]
    fn test_pool_conservation() {
        let pool = pool_of(3);
        assert_eq!(pool.free_count(), 3);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.free_count(), 1);

        pool.release(a).unwrap();
        assert_eq!(pool.free_count(), 2);
        pool.release(b).unwrap();
        assert_eq!(pool.free_count(), 3);
    }

    #[test]
    fn test_acquire_on_empty_pool_returns_none() {
        let pool = pool_of(1);
        let peer = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        pool.release(peer).unwrap();
    }

    #[test]
    fn test_double_release_rejected() {
        let pool = pool_of(2);
        let peer = pool.acquire().unwrap();
        let same = peer.clone();
        pool.release(peer).unwrap();
        assert!(matches!(
            pool.release(same),
            Err(AppError::AlreadyPooled(_))
        ));
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_ids_are_preassigned_and_unique() {
        let pool = pool_of(4);
        let mut ids: Vec<u64> = (0..4).filter_map(|_| pool.acquire()).map(|p| p.id()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }
}
