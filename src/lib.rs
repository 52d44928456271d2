//! An asynchronous, length-framed TCP peer framework.
//!
//! The wire unit is a frame: a 4-byte little-endian length prefix followed by
//! an opaque body. A [`Peer`] owns one live socket, reassembles the inbound
//! byte stream into frames, and serializes outbound writes. The server role
//! ([`PeerServer`]) runs a bounded-concurrency accept loop over a
//! pre-allocated [`PeerPool`]; the client role ([`PeerClient`]) owns a single
//! outbound peer. Owners observe connections through [`PeerEvents`] hooks,
//! or drain them as a FIFO via [`ChannelEvents`].

pub use network::{ChannelEvents, Frame, Peer, PeerEvent, PeerEvents, PeerPool, PeerState, RecycleFn};
pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, FrameworkConfig, NetworkConfig,
    PeerClient, PeerServer, ServerState, Shutdown,
};

mod network;
mod service;
