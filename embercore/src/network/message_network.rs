// SPDX-License-Identifier: CC0-1.0

//! Messages about the network itself: `version` and `reject`.

use std::io::{self, Read, Write};

use crate::consensus::encode::{Decodable, Encodable, Error};
use crate::network::address::NetAddress;
use crate::network::constants::ServiceFlags;

/// The `version` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    /// Protocol version of the sender.
    pub version: u32,
    /// Services offered by the sender.
    pub services: ServiceFlags,
    /// Unix timestamp at the sender.
    pub timestamp: i64,
    /// The address of the receiver as seen by the sender.
    pub receiver: NetAddress,
    /// The sender's own address.
    pub sender: NetAddress,
    /// Random nonce for self-connection detection.
    pub nonce: u64,
    /// The sender's user agent.
    pub user_agent: String,
    /// Height of the sender's best chain.
    pub start_height: i32,
    /// Whether the sender wants unsolicited transaction relay.
    pub relay: bool,
}

impl Encodable for VersionMessage {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.version.consensus_encode(writer)?;
        len += self.services.consensus_encode(writer)?;
        len += self.timestamp.consensus_encode(writer)?;
        len += self.receiver.consensus_encode(writer)?;
        len += self.sender.consensus_encode(writer)?;
        len += self.nonce.consensus_encode(writer)?;
        len += self.user_agent.consensus_encode(writer)?;
        len += self.start_height.consensus_encode(writer)?;
        len += self.relay.consensus_encode(writer)?;
        Ok(len)
    }
}

impl Decodable for VersionMessage {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let version = u32::consensus_decode(reader)?;
        let services = ServiceFlags::consensus_decode(reader)?;
        let timestamp = i64::consensus_decode(reader)?;
        let receiver = NetAddress::consensus_decode(reader)?;
        let sender = NetAddress::consensus_decode(reader)?;
        let nonce = u64::consensus_decode(reader)?;

        // Some peers truncate the tail of the version payload. Everything
        // after the nonce is optional and defaults when absent.
        let user_agent = match tolerate_eof(String::consensus_decode(reader))? {
            Some(ua) => ua,
            None => {
                return Ok(VersionMessage {
                    version,
                    services,
                    timestamp,
                    receiver,
                    sender,
                    nonce,
                    user_agent: String::new(),
                    start_height: 0,
                    relay: false,
                })
            }
        };
        let start_height = tolerate_eof(i32::consensus_decode(reader))?.unwrap_or(0);
        let relay = tolerate_eof(bool::consensus_decode(reader))?.unwrap_or(false);

        Ok(VersionMessage {
            version,
            services,
            timestamp,
            receiver,
            sender,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }
}

fn tolerate_eof<T>(result: Result<T, Error>) -> Result<Option<T>, Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Reasons a peer may reject one of our messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// 0x01: message could not be decoded.
    Malformed,
    /// 0x10: message was invalid.
    Invalid,
    /// 0x11: client is obsolete.
    Obsolete,
    /// 0x12: a duplicate of something already known.
    Duplicate,
    /// 0x40: transaction is non-standard.
    NonStandard,
    /// 0x41: output below the dust threshold.
    Dust,
    /// 0x42: fee below the peer's floor.
    InsufficientFee,
    /// 0x43: block conflicts with a checkpoint.
    Checkpoint,
    /// Any other code.
    Unknown(u8),
}

impl RejectReason {
    /// Map a wire code onto the symbolic reason.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => RejectReason::Malformed,
            0x10 => RejectReason::Invalid,
            0x11 => RejectReason::Obsolete,
            0x12 => RejectReason::Duplicate,
            0x40 => RejectReason::NonStandard,
            0x41 => RejectReason::Dust,
            0x42 => RejectReason::InsufficientFee,
            0x43 => RejectReason::Checkpoint,
            other => RejectReason::Unknown(other),
        }
    }

    /// The wire code.
    pub fn to_code(self) -> u8 {
        match self {
            RejectReason::Malformed => 0x01,
            RejectReason::Invalid => 0x10,
            RejectReason::Obsolete => 0x11,
            RejectReason::Duplicate => 0x12,
            RejectReason::NonStandard => 0x40,
            RejectReason::Dust => 0x41,
            RejectReason::InsufficientFee => 0x42,
            RejectReason::Checkpoint => 0x43,
            RejectReason::Unknown(code) => code,
        }
    }

    /// Symbolic name for logs.
    pub fn name(self) -> &'static str {
        match self {
            RejectReason::Malformed => "MALFORMED",
            RejectReason::Invalid => "INVALID",
            RejectReason::Obsolete => "OBSOLETE",
            RejectReason::Duplicate => "DUPLICATE",
            RejectReason::NonStandard => "NONSTANDARD",
            RejectReason::Dust => "DUST",
            RejectReason::InsufficientFee => "INSUFFICIENT_FEE",
            RejectReason::Checkpoint => "CHECKPOINT",
            RejectReason::Unknown(_) => "UNKNOWN",
        }
    }
}

/// The `reject` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
    /// The command being rejected.
    pub message: String,
    /// The rejection reason.
    pub reason: RejectReason,
    /// Free-text detail from the peer.
    pub detail: String,
    /// Hash of the rejected object, when one applies.
    pub hash: Option<[u8; 32]>,
}

impl Encodable for Reject {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.message.consensus_encode(writer)?;
        len += self.reason.to_code().consensus_encode(writer)?;
        len += self.detail.consensus_encode(writer)?;
        if let Some(hash) = &self.hash {
            len += hash.consensus_encode(writer)?;
        }
        Ok(len)
    }
}

impl Decodable for Reject {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let message = String::consensus_decode(reader)?;
        let reason = RejectReason::from_code(u8::consensus_decode(reader)?);
        let detail = String::consensus_decode(reader)?;
        let hash = tolerate_eof(<[u8; 32]>::consensus_decode(reader))?;
        Ok(Reject {
            message,
            reason,
            detail,
            hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::encode::{deserialize, serialize};
    use std::net::SocketAddr;

    fn test_version() -> VersionMessage {
        let socket: SocketAddr = "127.0.0.1:8757".parse().unwrap();
        VersionMessage {
            version: 70015,
            services: ServiceFlags::NONE,
            timestamp: 1_700_000_000,
            receiver: NetAddress::new(&socket, ServiceFlags::NETWORK),
            sender: NetAddress::new(&socket, ServiceFlags::NONE),
            nonce: 0xDEAD_BEEF,
            user_agent: "/rust-ember-spv:0.1.0/".to_string(),
            start_height: 123_456,
            relay: false,
        }
    }

    #[test]
    fn version_roundtrip() {
        let msg = test_version();
        let decoded: VersionMessage = deserialize(&serialize(&msg)).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn version_tolerates_truncation_after_nonce() {
        let msg = test_version();
        let encoded = serialize(&msg);
        // Chop everything after the nonce: 4+8+8+26+26+8 = 80 bytes.
        let (decoded, _) =
            crate::consensus::encode::deserialize_partial::<VersionMessage>(&encoded[..80])
                .unwrap();
        assert_eq!(decoded.version, msg.version);
        assert_eq!(decoded.start_height, 0);
        assert!(decoded.user_agent.is_empty());
    }

    #[test]
    fn reject_codes_are_symbolic() {
        assert_eq!(RejectReason::from_code(0x12).name(), "DUPLICATE");
        assert_eq!(RejectReason::from_code(0x42).name(), "INSUFFICIENT_FEE");
        assert!(matches!(RejectReason::from_code(0x7F), RejectReason::Unknown(0x7F)));
    }

    #[test]
    fn reject_roundtrip_with_hash() {
        let reject = Reject {
            message: "tx".to_string(),
            reason: RejectReason::InsufficientFee,
            detail: "min relay fee not met".to_string(),
            hash: Some([0xAB; 32]),
        };
        let decoded: Reject = deserialize(&serialize(&reject)).unwrap();
        assert_eq!(decoded, reject);
    }
}
