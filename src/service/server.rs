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

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, error, info};

use crate::network::{Peer, PeerEvents, PeerPool, RecycleFn};
use crate::service::Shutdown;
use crate::{AppError, AppResult, NetworkConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Listening,
    ShuttingDown,
}

/// Server-role connection manager: a bounded-concurrency accept loop that
/// binds inbound sockets to pooled peers and recycles them on close.
///
/// The admission semaphore is the backpressure point. It is sized identically
/// to the peer pool, so the accept loop parks before `accept` when every slot
/// is taken and pending connections wait in the OS backlog until a peer
/// closes and its permit is released.
pub struct PeerServer {
    config: NetworkConfig,
    pool: Arc<PeerPool>,
    active: Arc<DashMap<u64, Arc<Peer>>>,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    state: Mutex<ServerState>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl PeerServer {
    pub fn new(config: NetworkConfig, events: Arc<dyn PeerEvents>) -> Self {
        let pool = Arc::new(PeerPool::new(
            config.max_connections,
            events,
            config.read_buffer_size,
            config.max_frame_size,
        ));
        let (notify_shutdown, _) = broadcast::channel(1);
        PeerServer {
            limit_connections: Arc::new(Semaphore::new(config.max_connections)),
            config,
            pool,
            active: Arc::new(DashMap::new()),
            notify_shutdown,
            state: Mutex::new(ServerState::Idle),
            local_addr: Mutex::new(None),
        }
    }

    /// Binds the listening socket and starts the accept loop. Returns once
    /// the loop is running; connections are admitted asynchronously from
    /// then on.
    pub async fn listen(self: &Arc<Self>) -> AppResult<()> {
        {
            let mut state = self.state.lock();
            if *state != ServerState::Idle {
                return Err(AppError::IllegalState(format!(
                    "cannot listen while {:?}",
                    *state
                )));
            }
            *state = ServerState::Listening;
        }

        let listen_address = format!("{}:{}", self.config.ip, self.config.port);
        let listener = match TcpListener::bind(&listen_address).await {
            Ok(listener) => listener,
            Err(e) => {
                *self.state.lock() = ServerState::Idle;
                return Err(AppError::DetailedIoError(format!(
                    "failed to bind {}: {}",
                    listen_address, e
                )));
            }
        };
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(local_addr);
        info!(
            "listening on {} with at most {} connections",
            local_addr, self.config.max_connections
        );

        let shutdown = Shutdown::new(self.notify_shutdown.subscribe());
        tokio::spawn(self.clone().accept_loop(listener, shutdown));
        Ok(())
    }

    /// Sends a payload to one active peer. `false` when the peer id is not
    /// bound (already closed, or never admitted).
    pub fn send(&self, peer_id: u64, payload: &[u8]) -> bool {
        match self.active.get(&peer_id) {
            Some(peer) => peer.send(payload),
            None => {
                error!("send rejected, peer {} is not active", peer_id);
                false
            }
        }
    }

    /// Stops accepting, releases the listening socket, and closes every
    /// active peer. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if *state == ServerState::ShuttingDown {
                return;
            }
            *state = ServerState::ShuttingDown;
        }
        info!("server shutting down");
        let _ = self.notify_shutdown.send(());

        // collect first: close() recycles through the active map
        let peers: Vec<Arc<Peer>> = self.active.iter().map(|e| e.value().clone()).collect();
        for peer in peers {
            peer.close();
        }
        self.active.clear();
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn free_count(&self) -> usize {
        self.pool.free_count()
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut shutdown: Shutdown) {
        loop {
            // backpressure: no accept is issued until a connection slot frees up
            let permit = tokio::select! {
                _ = shutdown.recv() => break,
                permit = self.limit_connections.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let socket = tokio::select! {
                _ = shutdown.recv() => break,
                res = Self::accept(&listener) => match res {
                    Ok(socket) => socket,
                    Err(e) => {
                        error!("{}", e);
                        break;
                    }
                },
            };

            debug!("admitting new connection");
            self.admit(socket, permit);
        }
        debug!("accept loop exited");
        // the listener drops here, releasing the listening socket
    }

    async fn accept(listener: &TcpListener) -> AppResult<TcpStream> {
        let mut backoff = 1;

        loop {
            match listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(AppError::Accept(format!("accept failed: {}", err)));
                    }
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }

    fn admit(&self, socket: TcpStream, permit: tokio::sync::OwnedSemaphorePermit) {
        if *self.state.lock() == ServerState::ShuttingDown {
            // dropping the socket rejects a connection that raced shutdown
            return;
        }
        let Some(peer) = self.pool.acquire() else {
            // the semaphore makes this unreachable unless it was bypassed;
            // dropping socket and permit rejects the connection
            return;
        };
        let peer_id = peer.id();
        self.active.insert(peer_id, peer.clone());

        let active = self.active.clone();
        let pool = self.pool.clone();
        let recycled = peer.clone();
        // release must not depend on the map entry still being present: a
        // shutdown may have cleared the active set while this close was in
        // flight, and a peer skipped here would be lost to the pool
        let recycle: RecycleFn = Box::new(move |id| {
            active.remove(&id);
            if let Err(e) = pool.release(recycled) {
                error!("failed to recycle peer {}: {}", id, e);
            }
            drop(permit);
        });

        if let Err(e) = peer.bind(socket, Some(recycle)) {
            error!("failed to bind accepted socket to peer {}: {}", peer_id, e);
            self.active.remove(&peer_id);
            if let Err(e) = self.pool.release(peer) {
                error!("failed to return peer {} to the pool: {}", peer_id, e);
            }
        }
    }
}

impl Drop for PeerServer {
    fn drop(&mut self) {
        debug!("peer server dropped");
    }
}
