//! Wire framing against a raw byte stream.
//!
//! The framer accumulates bytes and yields complete messages. It is
//! deliberately tolerant of garbage: a magic mismatch or checksum failure
//! discards a single byte and rescans, so a corrupted stream costs data
//! but never the connection.

use embercore::consensus::encode::{CheckedData, MAX_VEC_SIZE};
use embercore::network::message::{CommandString, NetworkMessage};
use embercore::params::ChainParams;

/// Length of the fixed message header: magic, command, length, checksum.
const MESSAGE_HEADER_LEN: usize = 24;

/// Accumulates stream bytes and extracts framed messages in order.
pub struct MessageFramer {
    params: ChainParams,
    buffer: Vec<u8>,
}

impl MessageFramer {
    /// A framer for one connection.
    pub fn new(params: ChainParams) -> Self {
        MessageFramer {
            params,
            buffer: Vec::new(),
        }
    }

    /// Feed newly received bytes.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Extract the next complete message, if one is buffered.
    ///
    /// Returns `None` when more bytes are needed. Garbage is skipped one
    /// byte at a time; messages are returned in wire order.
    pub fn next_message(&mut self) -> Option<NetworkMessage> {
        loop {
            if self.buffer.len() < MESSAGE_HEADER_LEN {
                return None;
            }

            let magic = u32::from_le_bytes(self.buffer[0..4].try_into().expect("4 bytes"));
            if magic != self.params.magic {
                // Resync: drop one byte and rescan for the magic.
                self.buffer.remove(0);
                continue;
            }

            let payload_len =
                u32::from_le_bytes(self.buffer[16..20].try_into().expect("4 bytes")) as usize;
            if payload_len > MAX_VEC_SIZE {
                tracing::warn!(
                    "Oversized frame announced ({} bytes), resyncing",
                    payload_len
                );
                self.buffer.remove(0);
                continue;
            }

            let frame_len = MESSAGE_HEADER_LEN + payload_len;
            if self.buffer.len() < frame_len {
                // Wait for the rest of the payload.
                return None;
            }

            let checksum: [u8; 4] = self.buffer[20..24].try_into().expect("4 bytes");
            let payload = &self.buffer[MESSAGE_HEADER_LEN..frame_len];
            if CheckedData::checksum(payload) != checksum {
                tracing::warn!("Checksum mismatch on incoming frame, resyncing");
                self.buffer.remove(0);
                continue;
            }

            let command_bytes: [u8; 12] = self.buffer[4..16].try_into().expect("12 bytes");
            let command = CommandString::from_bytes(&command_bytes);

            match NetworkMessage::decode_payload(&command, payload, &self.params) {
                Ok(message) => {
                    self.buffer.drain(..frame_len);
                    return Some(message);
                }
                Err(e) => {
                    // The frame itself was well-formed (checksum passed),
                    // so skip the whole frame rather than one byte.
                    tracing::warn!("Failed to decode '{}' payload: {}", command, e);
                    self.buffer.drain(..frame_len);
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embercore::consensus::encode::serialize;
    use embercore::network::message::RawNetworkMessage;
    use embercore::params::Network;

    fn frame(params: &ChainParams, payload: NetworkMessage) -> Vec<u8> {
        serialize(&RawNetworkMessage::new(params, payload))
    }

    #[test]
    fn whole_message_in_one_push() {
        let params = Network::Mainnet.params();
        let mut framer = MessageFramer::new(params.clone());
        framer.push_bytes(&frame(&params, NetworkMessage::Ping(99)));
        assert_eq!(framer.next_message(), Some(NetworkMessage::Ping(99)));
        assert_eq!(framer.next_message(), None);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn message_split_across_pushes() {
        let params = Network::Mainnet.params();
        let mut framer = MessageFramer::new(params.clone());
        let bytes = frame(&params, NetworkMessage::Ping(7));

        framer.push_bytes(&bytes[..10]);
        assert_eq!(framer.next_message(), None);
        framer.push_bytes(&bytes[10..20]);
        assert_eq!(framer.next_message(), None);
        framer.push_bytes(&bytes[20..]);
        assert_eq!(framer.next_message(), Some(NetworkMessage::Ping(7)));
    }

    #[test]
    fn garbage_before_magic_is_skipped() {
        let params = Network::Mainnet.params();
        let mut framer = MessageFramer::new(params.clone());
        let mut bytes = vec![0xDE, 0xAD, 0xBE, 0xEF, 0x00];
        bytes.extend_from_slice(&frame(&params, NetworkMessage::Verack));
        framer.push_bytes(&bytes);
        assert_eq!(framer.next_message(), Some(NetworkMessage::Verack));
    }

    #[test]
    fn corrupted_checksum_resyncs_to_next_message(){
        let params = Network::Mainnet.params();
        let mut framer = MessageFramer::new(params.clone());

        let mut corrupt = frame(&params, NetworkMessage::Ping(1));
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        framer.push_bytes(&corrupt);
        framer.push_bytes(&frame(&params, NetworkMessage::Pong(2)));

        assert_eq!(framer.next_message(), Some(NetworkMessage::Pong(2)));
    }

    #[test]
    fn messages_are_delivered_in_order() {
        let params = Network::Mainnet.params();
        let mut framer = MessageFramer::new(params.clone());
        for nonce in 0..5u64 {
            framer.push_bytes(&frame(&params, NetworkMessage::Ping(nonce)));
        }
        for nonce in 0..5u64 {
            assert_eq!(framer.next_message(), Some(NetworkMessage::Ping(nonce)));
        }
    }
}
