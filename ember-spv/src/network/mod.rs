//! Networking: framing, peers, handshake and the peer manager.

pub mod framing;
pub mod handshake;
pub mod manager;
pub mod peer;

use std::net::SocketAddr;

use async_trait::async_trait;

use embercore::network::message::NetworkMessage;

use crate::error::NetworkResult;

pub use framing::MessageFramer;
pub use manager::PeerNetworkManager;
pub use peer::{Peer, PeerState};

/// What a peer is being selected for; each purpose has its own policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPurpose {
    /// Header requests: any handshake-complete peer.
    Headers,
    /// Filter requests: requires `NODE_COMPACT_FILTERS`.
    Filters,
    /// Block and transaction requests.
    Data,
}

impl PeerPurpose {
    /// Short name for errors and logs.
    pub fn name(self) -> &'static str {
        match self {
            PeerPurpose::Headers => "headers",
            PeerPurpose::Filters => "filters",
            PeerPurpose::Data => "data",
        }
    }
}

/// An event emitted by the peer layer toward the client facade.
#[derive(Debug)]
pub enum NetworkEvent {
    /// A message arrived from a peer.
    Message(SocketAddr, NetworkMessage),
    /// A peer's socket closed or errored.
    Disconnected(SocketAddr),
}

/// The seam between the sync managers and the peer layer.
///
/// The production implementation is [`PeerNetworkManager`]; tests drive
/// the sync managers with a recording stub.
#[async_trait]
pub trait NetworkManager: Send {
    /// Pick a peer for the given purpose, or `None` if no suitable peer
    /// is connected.
    fn select_peer(&mut self, purpose: PeerPurpose) -> Option<SocketAddr>;

    /// Send a message to a specific peer.
    async fn send(&mut self, peer: SocketAddr, message: NetworkMessage) -> NetworkResult<()>;

    /// Send a message to every handshake-complete peer; returns the
    /// peers it actually went to.
    async fn broadcast(&mut self, message: NetworkMessage) -> NetworkResult<Vec<SocketAddr>>;

    /// Number of handshake-complete peers.
    fn peer_count(&self) -> usize;

    /// The best start height any peer announced.
    fn best_peer_height(&self) -> Option<u32>;
}
