//! Shared test doubles.

use std::net::SocketAddr;

use async_trait::async_trait;

use embercore::network::message::NetworkMessage;

use crate::error::{NetworkError, NetworkResult};
use crate::network::{NetworkManager, PeerPurpose};

/// A network manager that records outgoing messages instead of sending
/// them, with a single imaginary peer.
pub struct MockNetworkManager {
    /// Every message handed to `send`/`broadcast`, in order.
    pub sent: Vec<(SocketAddr, NetworkMessage)>,
    /// The one peer this mock pretends to have.
    pub peer: SocketAddr,
    /// Height the peer "announced".
    pub peer_height: u32,
    /// Whether the peer advertises compact filters.
    pub peer_has_filters: bool,
    /// When false, every selection and send fails.
    pub connected: bool,
}

impl MockNetworkManager {
    /// A connected mock with one filter-capable peer.
    pub fn new(peer_height: u32) -> Self {
        MockNetworkManager {
            sent: Vec::new(),
            peer: "127.0.0.1:18767".parse().expect("static address parses"),
            peer_height,
            peer_has_filters: true,
            connected: true,
        }
    }

    /// Commands of everything sent so far.
    pub fn sent_commands(&self) -> Vec<&'static str> {
        self.sent.iter().map(|(_, m)| m.cmd()).collect()
    }

    /// The most recent message, if any.
    pub fn last_sent(&self) -> Option<&NetworkMessage> {
        self.sent.last().map(|(_, m)| m)
    }
}

#[async_trait]
impl NetworkManager for MockNetworkManager {
    fn select_peer(&mut self, purpose: PeerPurpose) -> Option<SocketAddr> {
        if !self.connected {
            return None;
        }
        if purpose == PeerPurpose::Filters && !self.peer_has_filters {
            return None;
        }
        Some(self.peer)
    }

    async fn send(&mut self, peer: SocketAddr, message: NetworkMessage) -> NetworkResult<()> {
        if !self.connected {
            return Err(NetworkError::PeerDisconnected);
        }
        self.sent.push((peer, message));
        Ok(())
    }

    async fn broadcast(&mut self, message: NetworkMessage) -> NetworkResult<Vec<SocketAddr>> {
        if !self.connected {
            return Ok(Vec::new());
        }
        self.sent.push((self.peer, message));
        Ok(vec![self.peer])
    }

    fn peer_count(&self) -> usize {
        usize::from(self.connected)
    }

    fn best_peer_height(&self) -> Option<u32> {
        self.connected.then_some(self.peer_height)
    }
}
