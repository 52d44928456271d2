// Copyright 2025 The framelink authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tracing::error;

use crate::network::{Peer, PeerEvents, PeerState, RecycleFn};
use crate::{AppError, AppResult, NetworkConfig};

/// The single client-side peer has no pool behind it; its id is fixed.
const CLIENT_PEER_ID: u64 = 0;

/// Client-role connection manager: owns zero or one outbound peer.
///
/// `connect` does not retry; reconnect policy belongs to the caller. When
/// the peer closes (locally or because the remote went away) the slot clears
/// itself and `connect` may be called again.
pub struct PeerClient {
    events: Arc<dyn PeerEvents>,
    read_buffer_size: usize,
    max_frame_size: Option<usize>,
    peer: Arc<Mutex<Option<Arc<Peer>>>>,
}

impl PeerClient {
    pub fn new(events: Arc<dyn PeerEvents>) -> Self {
        let defaults = NetworkConfig::default();
        Self::with_limits(events, defaults.read_buffer_size, defaults.max_frame_size)
    }

    pub fn with_limits(
        events: Arc<dyn PeerEvents>,
        read_buffer_size: usize,
        max_frame_size: Option<usize>,
    ) -> Self {
        PeerClient {
            events,
            read_buffer_size,
            max_frame_size,
            peer: Arc::new(Mutex::new(None)),
        }
    }

    /// Opens one outbound connection and binds it to a fresh peer.
    /// Rejected while a peer is already held.
    pub async fn connect(&self, addr: &str) -> AppResult<Arc<Peer>> {
        let peer = Arc::new(Peer::new(
            CLIENT_PEER_ID,
            self.events.clone(),
            self.read_buffer_size,
            self.max_frame_size,
        ));
        {
            // reserve the slot before awaiting, so a concurrent connect on
            // the same client is rejected instead of racing past the guard
            let mut slot = self.peer.lock();
            if slot.is_some() {
                error!("connect rejected, client already holds a peer");
                return Err(AppError::AlreadyConnected(CLIENT_PEER_ID));
            }
            *slot = Some(peer.clone());
        }

        let socket = match TcpStream::connect(addr).await {
            Ok(socket) => socket,
            Err(e) => {
                self.clear_slot(&peer);
                return Err(AppError::Connect(format!("{}: {}", addr, e)));
            }
        };

        let slot = self.peer.clone();
        let bound = Arc::downgrade(&peer);
        // only clear the slot if it still holds the peer this binding made;
        // a reconnect may have replaced it by the time a late close lands
        let recycle: RecycleFn = Box::new(move |_| {
            let mut slot = slot.lock();
            if let (Some(held), Some(bound)) = (slot.as_ref(), bound.upgrade()) {
                if Arc::ptr_eq(held, &bound) {
                    slot.take();
                }
            }
        });
        if let Err(e) = peer.bind(socket, Some(recycle)) {
            self.clear_slot(&peer);
            return Err(e);
        }
        if !self.holds(&peer) {
            // a disconnect raced the connect and emptied the slot while the
            // socket was still being opened; tear the fresh binding down
            peer.close();
            return Err(AppError::Connect(format!(
                "{}: cancelled by disconnect",
                addr
            )));
        }
        Ok(peer)
    }

    /// Closes the held peer, if any. Idempotent.
    pub fn disconnect(&self) {
        let peer = self.peer.lock().clone();
        if let Some(peer) = peer {
            peer.close();
            // a peer still mid-connect has no binding for close() to clear,
            // so empty the slot here as well
            self.clear_slot(&peer);
        }
    }

    fn holds(&self, expected: &Arc<Peer>) -> bool {
        self.peer
            .lock()
            .as_ref()
            .is_some_and(|held| Arc::ptr_eq(held, expected))
    }

    fn clear_slot(&self, expected: &Arc<Peer>) {
        let mut slot = self.peer.lock();
        if slot.as_ref().is_some_and(|held| Arc::ptr_eq(held, expected)) {
            slot.take();
        }
    }

    pub fn send(&self, payload: &[u8]) -> bool {
        let peer = self.peer.lock().clone();
        match peer {
            Some(peer) => peer.send(payload),
            None => {
                error!("send rejected, client is not connected");
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.peer
            .lock()
            .as_ref()
            .is_some_and(|peer| peer.state() == PeerState::Connected)
    }
}
