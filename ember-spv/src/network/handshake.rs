//! Handshake message construction and progression.
//!
//! The handshake itself is event-driven: the peer manager feeds incoming
//! `version`/`verack` messages through [`apply_version`] and
//! [`apply_verack`] and completes the handshake once both our `version`
//! went out and the peer's `verack` came back.

use std::net::SocketAddr;

use embercore::network::address::NetAddress;
use embercore::network::message_network::VersionMessage;
use embercore::network::{ServiceFlags, PROTOCOL_VERSION};

use crate::network::peer::PeerState;

/// Build our `version` message for a peer.
///
/// The client advertises no services, an empty user agent and a zero
/// start height, and opts out of unsolicited tx relay.
pub fn build_version_message(peer_address: &SocketAddr, timestamp: u64) -> VersionMessage {
    let local: SocketAddr = "0.0.0.0:0".parse().expect("static address parses");
    VersionMessage {
        version: PROTOCOL_VERSION,
        services: ServiceFlags::NONE,
        timestamp: timestamp as i64,
        receiver: NetAddress::new(peer_address, ServiceFlags::NONE),
        sender: NetAddress::new(&local, ServiceFlags::NONE),
        nonce: rand::random(),
        user_agent: String::new(),
        start_height: 0,
        relay: false,
    }
}

/// Record the peer's `version`. Returns whether the handshake completed
/// with this message.
pub fn apply_version(state: &mut PeerState, version: &VersionMessage) -> bool {
    state.version_received = true;
    state.services = version.services;
    state.supports_filters = version.services.has(ServiceFlags::COMPACT_FILTERS);
    state.start_height = version.start_height.max(0) as u32;
    update_completion(state)
}

/// Record the peer's `verack`. Returns whether the handshake completed
/// with this message.
pub fn apply_verack(state: &mut PeerState) -> bool {
    state.verack_received = true;
    update_completion(state)
}

fn update_completion(state: &mut PeerState) -> bool {
    let was_complete = state.handshake_complete;
    state.handshake_complete = state.version_sent && state.verack_received;
    state.handshake_complete && !was_complete
}
