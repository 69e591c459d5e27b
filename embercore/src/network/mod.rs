// SPDX-License-Identifier: CC0-1.0

//! P2P network messages.

pub mod address;
pub mod constants;
pub mod message;
pub mod message_blockdata;
pub mod message_filter;
pub mod message_network;

pub use constants::{ServiceFlags, PROTOCOL_VERSION};
pub use message::{CommandString, NetworkMessage, RawNetworkMessage};
