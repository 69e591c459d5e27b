//! A single peer connection.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;

use embercore::consensus::encode::serialize;
use embercore::network::message::{NetworkMessage, RawNetworkMessage};
use embercore::network::ServiceFlags;
use embercore::params::ChainParams;

use crate::error::{NetworkError, NetworkResult};
use crate::network::framing::MessageFramer;
use crate::network::NetworkEvent;

/// Per-peer protocol state.
#[derive(Debug, Clone)]
pub struct PeerState {
    /// Whether this peer came from the configured seed list.
    pub is_seed: bool,
    /// Services the peer advertised in its `version`.
    pub services: ServiceFlags,
    /// Whether the peer advertises `NODE_COMPACT_FILTERS`.
    pub supports_filters: bool,
    /// Whether we have sent our `version`.
    pub version_sent: bool,
    /// Whether the peer's `version` arrived.
    pub version_received: bool,
    /// Whether the peer's `verack` arrived.
    pub verack_received: bool,
    /// Both our `version` went out and the peer's `verack` came back.
    pub handshake_complete: bool,
    /// Best height the peer announced.
    pub start_height: u32,
    /// When any message last arrived from this peer.
    pub last_message_at: Instant,
    /// Nonce of the ping awaiting a pong.
    pub last_ping_nonce: Option<u64>,
    /// When that ping was sent.
    pub last_ping_sent_at: Option<Instant>,
    /// Smoothed round-trip time from matched pongs.
    pub ping_rtt: Option<Duration>,
    /// When we last asked this peer for addresses.
    pub last_addr_request_at: Option<Instant>,
    /// The peer's announced fee floor from `feefilter`, sats/kvB.
    pub fee_filter: Option<i64>,
    /// When the connection was established.
    pub connected_at: Instant,
}

impl PeerState {
    fn new(is_seed: bool, now: Instant) -> Self {
        PeerState {
            is_seed,
            services: ServiceFlags::NONE,
            supports_filters: false,
            version_sent: false,
            version_received: false,
            verack_received: false,
            handshake_complete: false,
            start_height: 0,
            last_message_at: now,
            last_ping_nonce: None,
            last_ping_sent_at: None,
            ping_rtt: None,
            last_addr_request_at: None,
            fee_filter: None,
            connected_at: now,
        }
    }
}

/// A connected peer: the write half of the socket plus protocol state.
/// The read half lives in a background task that feeds the shared event
/// channel, preserving per-peer message order.
pub struct Peer {
    address: SocketAddr,
    writer: OwnedWriteHalf,
    reader_task: tokio::task::JoinHandle<()>,
    /// Protocol state, mutated by the peer manager.
    pub state: PeerState,
}

impl Peer {
    /// Open a connection and start its read loop.
    pub async fn connect(
        address: SocketAddr,
        params: ChainParams,
        is_seed: bool,
        connect_timeout: Duration,
        events: UnboundedSender<NetworkEvent>,
        now: Instant,
    ) -> NetworkResult<Peer> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| NetworkError::Timeout)?
            .map_err(|e| {
                NetworkError::ConnectionFailed(format!("Failed to connect to {}: {}", address, e))
            })?;
        stream.set_nodelay(true).ok();

        let (mut read_half, writer) = stream.into_split();
        let reader_task = tokio::spawn(async move {
            let mut framer = MessageFramer::new(params);
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) => {
                        tracing::debug!("Peer {} closed the connection", address);
                        let _ = events.send(NetworkEvent::Disconnected(address));
                        break;
                    }
                    Ok(n) => {
                        framer.push_bytes(&buf[..n]);
                        while let Some(message) = framer.next_message() {
                            if events.send(NetworkEvent::Message(address, message)).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Read error from {}: {}", address, e);
                        let _ = events.send(NetworkEvent::Disconnected(address));
                        break;
                    }
                }
            }
        });

        tracing::info!("Connected to peer {}", address);

        Ok(Peer {
            address,
            writer,
            reader_task,
            state: PeerState::new(is_seed, now),
        })
    }

    /// The peer's socket address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Send one message.
    pub async fn send_message(
        &mut self,
        params: &ChainParams,
        message: NetworkMessage,
    ) -> NetworkResult<()> {
        use tokio::io::AsyncWriteExt;

        tracing::trace!("Sending '{}' to {}", message.cmd(), self.address);
        let bytes = serialize(&RawNetworkMessage::new(params, message));
        self.writer.write_all(&bytes).await?;
        Ok(())
    }

    /// Close the connection and stop the read loop.
    pub fn disconnect(self) {
        self.reader_task.abort();
        tracing::info!("Disconnected from peer {}", self.address);
    }
}
