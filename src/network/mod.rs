//! The wire-facing half of the framework: length-prefixed framing, the peer
//! owning one live socket, the bounded peer pool, and the event hooks a peer
//! owner consumes.
//!
//! Everything here deals in opaque byte payloads; interpreting a frame body
//! belongs to the layer above.

pub use events::{ChannelEvents, PeerEvent, PeerEvents};
pub use frame::Frame;
pub use peer::{Peer, PeerState, RecycleFn};
pub use pool::PeerPool;

mod events;
mod frame;
mod peer;
mod pool;
