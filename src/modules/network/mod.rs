//! Peer subsystem: capability traits, the block peer, the read-protocol
//! codec, and the libp2p node that backs them.

mod error;
pub mod peer;
pub mod protocol;
pub mod swarm;

pub use error::PeerError;
pub use peer::{BlockPeer, ContentRouter, NetworkPeer, NetworkPeerBuilder, TransportHost};
pub use protocol::{BLOCK_READ_PROTOCOL, BlockReadCodec};
pub use swarm::{P2pConfig, P2pNode};
