//! The peer manager.
//!
//! Owns every peer connection, performs the handshake, selects peers per
//! purpose, keeps connections alive with pings, reconnects with backoff,
//! and (when discovery is enabled) grows the connection set from
//! `addr`/`addrv2` gossip. Messages flow one way: each peer's read task
//! pushes `(peer, message)` events into a channel owned by the client
//! facade; the facade routes peer-control messages back into
//! [`PeerNetworkManager::handle_message`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use embercore::network::message::NetworkMessage;
use embercore::network::message_blockdata::SendCmpct;
use embercore::params::ChainParams;

use crate::client::config::ClientConfig;
use crate::clock::Clock;
use crate::error::{NetworkError, NetworkResult};
use crate::network::handshake::{apply_verack, apply_version, build_version_message};
use crate::network::peer::Peer;
use crate::network::{NetworkEvent, NetworkManager, PeerPurpose};
use crate::types::PeerInfo;

/// Keep-alive ping interval.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Reconnect backoff base delay.
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(30);

/// Reconnect backoff cap.
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct ReconnectState {
    is_seed: bool,
    attempts: u32,
    next_attempt_at: Instant,
}

/// The production peer manager.
pub struct PeerNetworkManager {
    config: ClientConfig,
    params: ChainParams,
    clock: Arc<dyn Clock>,
    events_tx: UnboundedSender<NetworkEvent>,
    peers: HashMap<SocketAddr, Peer>,
    reconnect: HashMap<SocketAddr, ReconnectState>,
    /// Discovered addresses waiting for a free connection slot.
    address_queue: VecDeque<SocketAddr>,
    known_addresses: HashSet<SocketAddr>,
    banned: HashSet<IpAddr>,
    next_ping_nonce: u64,
    headers_cursor: usize,
    filters_cursor: usize,
    data_cursor: usize,
}

impl PeerNetworkManager {
    /// Create a manager and the event stream its peers will feed.
    pub fn new(
        config: &ClientConfig,
        clock: Arc<dyn Clock>,
    ) -> (Self, UnboundedReceiver<NetworkEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let params = config.network.params();
        let manager = PeerNetworkManager {
            config: config.clone(),
            params,
            clock,
            events_tx,
            peers: HashMap::new(),
            reconnect: HashMap::new(),
            address_queue: VecDeque::new(),
            known_addresses: HashSet::new(),
            banned: HashSet::new(),
            next_ping_nonce: 1,
            headers_cursor: 0,
            filters_cursor: 0,
            data_cursor: 0,
        };
        (manager, events_rx)
    }

    /// Queue the configured seed peers for immediate connection.
    pub fn start(&mut self) {
        let now = self.clock.now();
        for seed in self.config.seed_peers.clone() {
            self.known_addresses.insert(seed);
            self.reconnect.insert(
                seed,
                ReconnectState {
                    is_seed: true,
                    attempts: 0,
                    next_attempt_at: now,
                },
            );
        }
    }

    /// Connect to one peer and send our `version`.
    pub async fn connect_peer(&mut self, address: SocketAddr, is_seed: bool) -> NetworkResult<()> {
        if self.peers.contains_key(&address) {
            return Ok(());
        }
        if self.banned.contains(&address.ip()) {
            return Err(NetworkError::ConnectionFailed(format!("{} is banned", address)));
        }

        let mut peer = Peer::connect(
            address,
            self.params.clone(),
            is_seed,
            self.config.connect_timeout,
            self.events_tx.clone(),
            self.clock.now(),
        )
        .await?;

        let version = build_version_message(&address, self.clock.unix_time());
        peer.send_message(&self.params, NetworkMessage::Version(version)).await?;
        peer.state.version_sent = true;

        self.peers.insert(address, peer);
        Ok(())
    }

    /// Route a peer-control message. Returns true when the message was
    /// consumed here; anything else belongs to the client's dispatcher.
    pub async fn handle_message(
        &mut self,
        address: SocketAddr,
        message: &NetworkMessage,
    ) -> NetworkResult<bool> {
        let now = self.clock.now();
        if let Some(peer) = self.peers.get_mut(&address) {
            peer.state.last_message_at = now;
        }

        match message {
            NetworkMessage::Version(version) => {
                let completed = match self.peers.get_mut(&address) {
                    Some(peer) => {
                        let completed = apply_version(&mut peer.state, version);
                        peer.send_message(&self.params, NetworkMessage::Verack).await?;
                        completed
                    }
                    None => return Ok(true),
                };
                if completed {
                    self.on_handshake_complete(address).await?;
                }
                Ok(true)
            }
            NetworkMessage::Verack => {
                let completed = match self.peers.get_mut(&address) {
                    Some(peer) => apply_verack(&mut peer.state),
                    None => return Ok(true),
                };
                if completed {
                    self.on_handshake_complete(address).await?;
                }
                Ok(true)
            }
            NetworkMessage::Ping(nonce) => {
                if let Some(peer) = self.peers.get_mut(&address) {
                    peer.send_message(&self.params, NetworkMessage::Pong(*nonce)).await?;
                }
                Ok(true)
            }
            NetworkMessage::Pong(nonce) => {
                if let Some(peer) = self.peers.get_mut(&address) {
                    match (peer.state.last_ping_nonce, peer.state.last_ping_sent_at) {
                        (Some(expected), Some(sent_at)) if expected == *nonce => {
                            peer.state.ping_rtt = Some(now.saturating_duration_since(sent_at));
                            peer.state.last_ping_nonce = None;
                            peer.state.last_ping_sent_at = None;
                        }
                        _ => {
                            tracing::debug!("Ignoring pong with unexpected nonce from {}", address);
                        }
                    }
                }
                Ok(true)
            }
            NetworkMessage::Addr(entries) => {
                if self.config.enable_discovery {
                    let addresses: Vec<SocketAddr> =
                        entries.iter().map(|(_, a)| a.socket_addr()).collect();
                    self.enqueue_addresses(&addresses);
                }
                Ok(true)
            }
            NetworkMessage::AddrV2(entries) => {
                if self.config.enable_discovery {
                    let addresses: Vec<SocketAddr> =
                        entries.iter().filter_map(|e| e.socket_addr()).collect();
                    self.enqueue_addresses(&addresses);
                }
                Ok(true)
            }
            NetworkMessage::SendAddrV2 | NetworkMessage::SendHeaders => Ok(true),
            NetworkMessage::FeeFilter(rate) => {
                if let Some(peer) = self.peers.get_mut(&address) {
                    peer.state.fee_filter = Some(*rate);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn on_handshake_complete(&mut self, address: SocketAddr) -> NetworkResult<()> {
        tracing::info!("Handshake complete with {}", address);

        // A successful handshake resets this address's backoff.
        self.reconnect.remove(&address);

        let discovery = self.config.enable_discovery;
        if let Some(peer) = self.peers.get_mut(&address) {
            peer.send_message(&self.params, NetworkMessage::SendHeaders).await?;
            peer.send_message(
                &self.params,
                NetworkMessage::SendCmpct(SendCmpct {
                    announce: false,
                    version: 1,
                }),
            )
            .await?;
            if discovery {
                peer.send_message(&self.params, NetworkMessage::SendAddrV2).await?;
                peer.send_message(&self.params, NetworkMessage::GetAddr).await?;
                peer.state.last_addr_request_at = Some(self.clock.now());
            }
        }
        Ok(())
    }

    /// Record a closed socket and schedule a reconnect.
    pub fn handle_disconnect(&mut self, address: SocketAddr) {
        if let Some(peer) = self.peers.remove(&address) {
            let is_seed = peer.state.is_seed;
            peer.disconnect();
            self.schedule_reconnect(address, is_seed);
        }
    }

    fn schedule_reconnect(&mut self, address: SocketAddr, is_seed: bool) {
        let attempts = self.reconnect.get(&address).map(|r| r.attempts).unwrap_or(0) + 1;
        let delay = RECONNECT_BASE_DELAY
            .saturating_mul(1u32 << (attempts - 1).min(10))
            .min(RECONNECT_MAX_DELAY);
        tracing::debug!(
            "Scheduling reconnect to {} in {:?} (attempt {})",
            address,
            delay,
            attempts
        );
        self.reconnect.insert(
            address,
            ReconnectState {
                is_seed,
                attempts,
                next_attempt_at: self.clock.now() + delay,
            },
        );
    }

    /// Periodic upkeep: handshake timeouts, keep-alive pings, due
    /// reconnects, and dialing discovered addresses into free slots.
    pub async fn maintenance(&mut self) {
        let now = self.clock.now();

        // Handshake timeouts.
        let stuck: Vec<SocketAddr> = self
            .peers
            .values()
            .filter(|p| {
                !p.state.handshake_complete
                    && now.saturating_duration_since(p.state.connected_at)
                        > self.config.handshake_timeout
            })
            .map(|p| p.address())
            .collect();
        for address in stuck {
            tracing::warn!("Handshake with {} timed out", address);
            self.handle_disconnect(address);
        }

        // Keep-alive pings.
        let due_pings: Vec<SocketAddr> = self
            .peers
            .values()
            .filter(|p| {
                p.state.handshake_complete
                    && p.state.last_ping_nonce.is_none()
                    && now.saturating_duration_since(
                        p.state.last_ping_sent_at.unwrap_or(p.state.connected_at),
                    ) >= PING_INTERVAL
            })
            .map(|p| p.address())
            .collect();
        for address in due_pings {
            let nonce = self.next_ping_nonce;
            self.next_ping_nonce += 1;
            let mut failed = false;
            if let Some(peer) = self.peers.get_mut(&address) {
                if peer.send_message(&self.params, NetworkMessage::Ping(nonce)).await.is_ok() {
                    peer.state.last_ping_nonce = Some(nonce);
                    peer.state.last_ping_sent_at = Some(now);
                } else {
                    failed = true;
                }
            }
            if failed {
                self.handle_disconnect(address);
            }
        }

        // Due reconnects.
        let due: Vec<(SocketAddr, bool)> = self
            .reconnect
            .iter()
            .filter(|(address, state)| {
                state.next_attempt_at <= now && !self.peers.contains_key(*address)
            })
            .map(|(address, state)| (*address, state.is_seed))
            .collect();
        for (address, is_seed) in due {
            match self.connect_peer(address, is_seed).await {
                Ok(()) => {}
                Err(e) => {
                    tracing::debug!("Reconnect to {} failed: {}", address, e);
                    self.schedule_reconnect(address, is_seed);
                }
            }
        }

        // Fill free slots from the discovery queue.
        while self.peers.len() < self.config.max_connections {
            let Some(address) = self.address_queue.pop_front() else {
                break;
            };
            if let Err(e) = self.connect_peer(address, false).await {
                tracing::debug!("Dial of discovered peer {} failed: {}", address, e);
            }
        }
    }

    fn enqueue_addresses(&mut self, addresses: &[SocketAddr]) {
        let seeds: HashSet<SocketAddr> = self.config.seed_peers.iter().copied().collect();
        for address in addresses {
            if address.port() == 0
                || self.banned.contains(&address.ip())
                || seeds.contains(address)
                || self.known_addresses.contains(address)
            {
                continue;
            }
            self.known_addresses.insert(*address);
            self.address_queue.push_back(*address);
        }
    }

    /// Ban an address; it is dropped if connected and never redialed.
    pub fn ban(&mut self, ip: IpAddr) {
        self.banned.insert(ip);
        let to_drop: Vec<SocketAddr> =
            self.peers.keys().filter(|a| a.ip() == ip).copied().collect();
        for address in to_drop {
            if let Some(peer) = self.peers.remove(&address) {
                peer.disconnect();
            }
            self.reconnect.remove(&address);
        }
    }

    /// Whether a handshake-complete peer exists.
    pub fn has_active_peer(&self) -> bool {
        self.peers.values().any(|p| p.state.handshake_complete)
    }

    /// The fee floor the given peer announced, if any.
    pub fn peer_fee_floor(&self, address: &SocketAddr) -> Option<i64> {
        self.peers.get(address).and_then(|p| p.state.fee_filter)
    }

    /// Snapshot of all connected peers.
    pub fn peer_infos(&self) -> Vec<PeerInfo> {
        let mut infos: Vec<PeerInfo> = self
            .peers
            .values()
            .map(|p| PeerInfo {
                address: p.address(),
                handshake_complete: p.state.handshake_complete,
                is_seed: p.state.is_seed,
                services: p.state.services,
                supports_filters: p.state.supports_filters,
                start_height: p.state.start_height,
                ping_rtt: p.state.ping_rtt,
            })
            .collect();
        infos.sort_by_key(|i| i.address);
        infos
    }

    fn candidates(&self, purpose: PeerPurpose) -> Vec<SocketAddr> {
        let mut candidates: Vec<SocketAddr> = self
            .peers
            .values()
            .filter(|p| p.state.handshake_complete)
            .filter(|p| match purpose {
                PeerPurpose::Headers => true,
                PeerPurpose::Filters => p.state.supports_filters,
                PeerPurpose::Data => {
                    !self.config.require_filter_peers || p.state.supports_filters
                }
            })
            .map(|p| p.address())
            .collect();
        candidates.sort();
        candidates
    }
}

#[async_trait]
impl NetworkManager for PeerNetworkManager {
    fn select_peer(&mut self, purpose: PeerPurpose) -> Option<SocketAddr> {
        let candidates = self.candidates(purpose);
        if candidates.is_empty() {
            return None;
        }

        // Preferred peer wins whenever it qualifies.
        if let Some(preferred) = self.config.preferred_peer {
            if candidates.contains(&preferred) {
                return Some(preferred);
            }
        }

        let cursor = match purpose {
            PeerPurpose::Headers => &mut self.headers_cursor,
            PeerPurpose::Filters => &mut self.filters_cursor,
            PeerPurpose::Data => &mut self.data_cursor,
        };
        let selected = candidates[*cursor % candidates.len()];
        *cursor = cursor.wrapping_add(1);
        Some(selected)
    }

    async fn send(&mut self, address: SocketAddr, message: NetworkMessage) -> NetworkResult<()> {
        let result = match self.peers.get_mut(&address) {
            Some(peer) => peer.send_message(&self.params, message).await,
            None => return Err(NetworkError::PeerDisconnected),
        };
        if let Err(e) = result {
            tracing::warn!("Send to {} failed: {}", address, e);
            self.handle_disconnect(address);
            return Err(e);
        }
        Ok(())
    }

    async fn broadcast(&mut self, message: NetworkMessage) -> NetworkResult<Vec<SocketAddr>> {
        let targets: Vec<SocketAddr> = self
            .peers
            .values()
            .filter(|p| p.state.handshake_complete)
            .map(|p| p.address())
            .collect();
        let mut reached = Vec::new();
        for address in targets {
            if self.send(address, message.clone()).await.is_ok() {
                reached.push(address);
            }
        }
        Ok(reached)
    }

    fn peer_count(&self) -> usize {
        self.peers.values().filter(|p| p.state.handshake_complete).count()
    }

    fn best_peer_height(&self) -> Option<u32> {
        self.peers
            .values()
            .filter(|p| p.state.handshake_complete)
            .map(|p| p.state.start_height)
            .max()
    }
}
