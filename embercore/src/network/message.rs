// SPDX-License-Identifier: CC0-1.0

//! The network message envelope.
//!
//! Every message travels as a 24-byte header (magic, zero-padded command,
//! payload length, dSHA-256 checksum) followed by the payload. The
//! [`RawNetworkMessage`] type pairs the magic with a typed payload;
//! framing against a byte stream lives in the SPV client.

use std::fmt;
use std::io::{self, Cursor, Read, Write};

use crate::block::{Block, BlockHeader, WireHeaders};
use crate::consensus::encode::{
    decode_vec, serialize, CheckedData, Decodable, DecodableWithParams, Encodable, Error, VarInt,
};
use crate::network::address::{AddrV2Message, NetAddress};
use crate::network::message_blockdata::{GetHeadersMessage, Inventory, SendCmpct};
use crate::network::message_filter::{
    CFCheckpt, CFHeaders, CFilter, GetCFCheckpt, GetCFHeaders, GetCFilters,
};
use crate::network::message_network::{Reject, VersionMessage};
use crate::params::ChainParams;
use crate::transaction::Transaction;

/// A zero-padded 12-byte command string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandString(String);

impl CommandString {
    /// Wrap a command, which must be at most 12 bytes of ASCII.
    pub fn new(command: &str) -> Result<Self, Error> {
        if command.len() > 12 || !command.is_ascii() {
            return Err(Error::ParseFailed("command string invalid"));
        }
        Ok(CommandString(command.to_string()))
    }

    /// The zero-padded wire form.
    pub fn to_bytes(&self) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        bytes[..self.0.len()].copy_from_slice(self.0.as_bytes());
        bytes
    }

    /// Parse the wire form, stripping trailing zero padding.
    pub fn from_bytes(bytes: &[u8; 12]) -> Self {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(12);
        CommandString(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// The command as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A typed network message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum NetworkMessage {
    /// `version`
    Version(VersionMessage),
    /// `verack`
    Verack,
    /// `ping`
    Ping(u64),
    /// `pong`
    Pong(u64),
    /// `addr`
    Addr(Vec<(u32, NetAddress)>),
    /// `addrv2`
    AddrV2(Vec<AddrV2Message>),
    /// `sendaddrv2`
    SendAddrV2,
    /// `getaddr`
    GetAddr,
    /// `sendheaders`
    SendHeaders,
    /// `sendcmpct`
    SendCmpct(SendCmpct),
    /// `getheaders`
    GetHeaders(GetHeadersMessage),
    /// `headers`
    Headers(Vec<BlockHeader>),
    /// `inv`
    Inv(Vec<Inventory>),
    /// `getdata`
    GetData(Vec<Inventory>),
    /// `notfound`
    NotFound(Vec<Inventory>),
    /// `reject`
    Reject(Reject),
    /// `tx`
    Tx(Transaction),
    /// `block`
    Block(Block),
    /// `cmpctblock`; carried opaquely, the client never reassembles one.
    CmpctBlock(Vec<u8>),
    /// `mempool`
    MemPool,
    /// `feefilter`
    FeeFilter(i64),
    /// `getcfcheckpt`
    GetCFCheckpt(GetCFCheckpt),
    /// `cfcheckpt`
    CFCheckpt(CFCheckpt),
    /// `getcfheaders`
    GetCFHeaders(GetCFHeaders),
    /// `cfheaders`
    CFHeaders(CFHeaders),
    /// `getcfilters`
    GetCFilters(GetCFilters),
    /// `cfilter`
    CFilter(CFilter),
    /// Any other message.
    Unknown {
        /// The command of this message.
        command: CommandString,
        /// The raw payload.
        payload: Vec<u8>,
    },
}

impl NetworkMessage {
    /// Return the message command as a static string reference.
    pub fn cmd(&self) -> &'static str {
        match self {
            NetworkMessage::Version(_) => "version",
            NetworkMessage::Verack => "verack",
            NetworkMessage::Ping(_) => "ping",
            NetworkMessage::Pong(_) => "pong",
            NetworkMessage::Addr(_) => "addr",
            NetworkMessage::AddrV2(_) => "addrv2",
            NetworkMessage::SendAddrV2 => "sendaddrv2",
            NetworkMessage::GetAddr => "getaddr",
            NetworkMessage::SendHeaders => "sendheaders",
            NetworkMessage::SendCmpct(_) => "sendcmpct",
            NetworkMessage::GetHeaders(_) => "getheaders",
            NetworkMessage::Headers(_) => "headers",
            NetworkMessage::Inv(_) => "inv",
            NetworkMessage::GetData(_) => "getdata",
            NetworkMessage::NotFound(_) => "notfound",
            NetworkMessage::Reject(_) => "reject",
            NetworkMessage::Tx(_) => "tx",
            NetworkMessage::Block(_) => "block",
            NetworkMessage::CmpctBlock(_) => "cmpctblock",
            NetworkMessage::MemPool => "mempool",
            NetworkMessage::FeeFilter(_) => "feefilter",
            NetworkMessage::GetCFCheckpt(_) => "getcfcheckpt",
            NetworkMessage::CFCheckpt(_) => "cfcheckpt",
            NetworkMessage::GetCFHeaders(_) => "getcfheaders",
            NetworkMessage::CFHeaders(_) => "cfheaders",
            NetworkMessage::GetCFilters(_) => "getcfilters",
            NetworkMessage::CFilter(_) => "cfilter",
            NetworkMessage::Unknown { .. } => "unknown",
        }
    }

    /// The wire command, preserving it for unknown messages.
    pub fn command(&self) -> CommandString {
        match self {
            NetworkMessage::Unknown { command, .. } => command.clone(),
            _ => CommandString::new(self.cmd()).expect("cmd returns valid commands"),
        }
    }

    /// Serialize just the payload body.
    pub fn payload_bytes(&self) -> Vec<u8> {
        match self {
            NetworkMessage::Version(msg) => serialize(msg),
            NetworkMessage::Ping(nonce) | NetworkMessage::Pong(nonce) => serialize(nonce),
            NetworkMessage::Addr(entries) => {
                let mut enc = Vec::new();
                VarInt(entries.len() as u64)
                    .consensus_encode(&mut enc)
                    .expect("in-memory writers don't error");
                for (time, address) in entries {
                    time.consensus_encode(&mut enc).expect("in-memory writers don't error");
                    address.consensus_encode(&mut enc).expect("in-memory writers don't error");
                }
                enc
            }
            NetworkMessage::AddrV2(entries) => {
                let mut enc = Vec::new();
                VarInt(entries.len() as u64)
                    .consensus_encode(&mut enc)
                    .expect("in-memory writers don't error");
                for entry in entries {
                    entry.consensus_encode(&mut enc).expect("in-memory writers don't error");
                }
                enc
            }
            NetworkMessage::SendCmpct(msg) => serialize(msg),
            NetworkMessage::GetHeaders(msg) => serialize(msg),
            NetworkMessage::Headers(headers) => serialize(&WireHeaders(headers.clone())),
            NetworkMessage::Inv(items)
            | NetworkMessage::GetData(items)
            | NetworkMessage::NotFound(items) => {
                let mut enc = Vec::new();
                VarInt(items.len() as u64)
                    .consensus_encode(&mut enc)
                    .expect("in-memory writers don't error");
                for item in items {
                    item.consensus_encode(&mut enc).expect("in-memory writers don't error");
                }
                enc
            }
            NetworkMessage::Reject(msg) => serialize(msg),
            NetworkMessage::Tx(tx) => serialize(tx),
            NetworkMessage::Block(block) => serialize(block),
            NetworkMessage::CmpctBlock(raw) => raw.clone(),
            NetworkMessage::FeeFilter(rate) => serialize(rate),
            NetworkMessage::GetCFCheckpt(msg) => serialize(msg),
            NetworkMessage::CFCheckpt(msg) => serialize(msg),
            NetworkMessage::GetCFHeaders(msg) => serialize(msg),
            NetworkMessage::CFHeaders(msg) => serialize(msg),
            NetworkMessage::GetCFilters(msg) => serialize(msg),
            NetworkMessage::CFilter(msg) => serialize(msg),
            NetworkMessage::Verack
            | NetworkMessage::SendAddrV2
            | NetworkMessage::GetAddr
            | NetworkMessage::SendHeaders
            | NetworkMessage::MemPool => Vec::new(),
            NetworkMessage::Unknown { payload, .. } => payload.clone(),
        }
    }

    /// Decode a payload for a known command. Unrecognized commands come
    /// back as [`NetworkMessage::Unknown`].
    pub fn decode_payload(
        command: &CommandString,
        payload: &[u8],
        params: &ChainParams,
    ) -> Result<NetworkMessage, Error> {
        let mut cursor = Cursor::new(payload);
        let reader = &mut cursor;
        let message = match command.as_str() {
            "version" => NetworkMessage::Version(VersionMessage::consensus_decode(reader)?),
            "verack" => NetworkMessage::Verack,
            "ping" => NetworkMessage::Ping(u64::consensus_decode(reader)?),
            "pong" => NetworkMessage::Pong(u64::consensus_decode(reader)?),
            "addr" => {
                let count = VarInt::consensus_decode(reader)?.0 as usize;
                let mut entries = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let time = u32::consensus_decode(reader)?;
                    let address = NetAddress::consensus_decode(reader)?;
                    entries.push((time, address));
                }
                NetworkMessage::Addr(entries)
            }
            "addrv2" => {
                let count = VarInt::consensus_decode(reader)?.0 as usize;
                let mut entries = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    entries.push(AddrV2Message::consensus_decode(reader)?);
                }
                NetworkMessage::AddrV2(entries)
            }
            "sendaddrv2" => NetworkMessage::SendAddrV2,
            "getaddr" => NetworkMessage::GetAddr,
            "sendheaders" => NetworkMessage::SendHeaders,
            "sendcmpct" => NetworkMessage::SendCmpct(SendCmpct::consensus_decode(reader)?),
            "getheaders" => {
                NetworkMessage::GetHeaders(GetHeadersMessage::consensus_decode(reader)?)
            }
            "headers" => NetworkMessage::Headers(
                WireHeaders::consensus_decode_with_params(reader, params)?.0,
            ),
            "inv" => NetworkMessage::Inv(decode_vec(reader, 36)?),
            "getdata" => NetworkMessage::GetData(decode_vec(reader, 36)?),
            "notfound" => NetworkMessage::NotFound(decode_vec(reader, 36)?),
            "reject" => NetworkMessage::Reject(Reject::consensus_decode(reader)?),
            "tx" => NetworkMessage::Tx(Transaction::consensus_decode(reader)?),
            "block" => {
                NetworkMessage::Block(Block::consensus_decode_with_params(reader, params)?)
            }
            "cmpctblock" => NetworkMessage::CmpctBlock(payload.to_vec()),
            "mempool" => NetworkMessage::MemPool,
            "feefilter" => NetworkMessage::FeeFilter(i64::consensus_decode(reader)?),
            "getcfcheckpt" => {
                NetworkMessage::GetCFCheckpt(GetCFCheckpt::consensus_decode(reader)?)
            }
            "cfcheckpt" => NetworkMessage::CFCheckpt(CFCheckpt::consensus_decode(reader)?),
            "getcfheaders" => {
                NetworkMessage::GetCFHeaders(GetCFHeaders::consensus_decode(reader)?)
            }
            "cfheaders" => NetworkMessage::CFHeaders(CFHeaders::consensus_decode(reader)?),
            "getcfilters" => NetworkMessage::GetCFilters(GetCFilters::consensus_decode(reader)?),
            "cfilter" => NetworkMessage::CFilter(CFilter::consensus_decode(reader)?),
            _ => NetworkMessage::Unknown {
                command: command.clone(),
                payload: payload.to_vec(),
            },
        };
        Ok(message)
    }
}

/// A complete network message: magic plus typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNetworkMessage {
    /// Magic bytes identifying the network.
    pub magic: u32,
    /// The message payload.
    pub payload: NetworkMessage,
}

impl RawNetworkMessage {
    /// Wrap a payload for the given chain.
    pub fn new(params: &ChainParams, payload: NetworkMessage) -> Self {
        RawNetworkMessage {
            magic: params.magic,
            payload,
        }
    }
}

impl Encodable for RawNetworkMessage {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.magic.consensus_encode(writer)?;
        len += self.payload.command().to_bytes().consensus_encode(writer)?;
        len += CheckedData(self.payload.payload_bytes()).consensus_encode(writer)?;
        Ok(len)
    }
}

impl DecodableWithParams for RawNetworkMessage {
    fn consensus_decode_with_params<R: Read + ?Sized>(
        reader: &mut R,
        params: &ChainParams,
    ) -> Result<Self, Error> {
        let magic = u32::consensus_decode(reader)?;
        if magic != params.magic {
            return Err(Error::UnexpectedNetworkMagic {
                expected: params.magic,
                actual: magic,
            });
        }
        let command = CommandString::from_bytes(&<[u8; 12]>::consensus_decode(reader)?);
        let CheckedData(payload) = CheckedData::consensus_decode(reader)?;
        let payload = NetworkMessage::decode_payload(&command, &payload, params)?;
        Ok(RawNetworkMessage { magic, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::encode::deserialize_partial;
    use crate::hashes::BlockHash;
    use crate::params::Network;

    fn roundtrip(params: &ChainParams, payload: NetworkMessage) -> NetworkMessage {
        let raw = RawNetworkMessage::new(params, payload);
        let encoded = serialize(&raw);
        let mut cursor = Cursor::new(encoded.as_slice());
        let decoded = RawNetworkMessage::consensus_decode_with_params(&mut cursor, params).unwrap();
        assert_eq!(cursor.position() as usize, encoded.len());
        decoded.payload
    }

    #[test]
    fn empty_payload_messages_roundtrip() {
        let params = Network::Mainnet.params();
        for payload in [
            NetworkMessage::Verack,
            NetworkMessage::SendHeaders,
            NetworkMessage::SendAddrV2,
            NetworkMessage::GetAddr,
            NetworkMessage::MemPool,
        ] {
            assert_eq!(roundtrip(&params, payload.clone()), payload);
        }
    }

    #[test]
    fn ping_pong_roundtrip() {
        let params = Network::Mainnet.params();
        assert_eq!(
            roundtrip(&params, NetworkMessage::Ping(0x0123_4567_89AB_CDEF)),
            NetworkMessage::Ping(0x0123_4567_89AB_CDEF)
        );
    }

    #[test]
    fn getheaders_command_padding() {
        let params = Network::Mainnet.params();
        let payload = NetworkMessage::GetHeaders(GetHeadersMessage::new(
            vec![BlockHash::from_byte_array([1u8; 32])],
            BlockHash::all_zeros(),
        ));
        let raw = RawNetworkMessage::new(&params, payload);
        let encoded = serialize(&raw);
        assert_eq!(&encoded[4..14], b"getheaders");
        assert_eq!(&encoded[14..16], &[0, 0]);
    }

    #[test]
    fn wrong_magic_rejected() {
        let mainnet = Network::Mainnet.params();
        let testnet = Network::Testnet.params();
        let raw = RawNetworkMessage::new(&mainnet, NetworkMessage::Verack);
        let encoded = serialize(&raw);
        let mut cursor = Cursor::new(encoded.as_slice());
        assert!(matches!(
            RawNetworkMessage::consensus_decode_with_params(&mut cursor, &testnet),
            Err(Error::UnexpectedNetworkMagic { .. })
        ));
    }

    #[test]
    fn unknown_command_is_preserved() {
        let params = Network::Mainnet.params();
        let payload = NetworkMessage::Unknown {
            command: CommandString::new("frobnicate").unwrap(),
            payload: vec![1, 2, 3],
        };
        let decoded = roundtrip(&params, payload.clone());
        assert_eq!(decoded, payload);
    }

    #[test]
    fn headers_payload_carries_trailing_tx_count() {
        let params = Network::Mainnet.params();
        let header = crate::block::BlockHeader {
            version: 4,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: [0u8; 32],
            time: params.t2 + 1,
            bits: 0,
            nonce: 0,
            proof: vec![0u8; params.proof_length()],
        };
        let payload = NetworkMessage::Headers(vec![header.clone()]);
        let bytes = payload.payload_bytes();
        // varint(1) + header + trailing varint tx_count 0.
        assert_eq!(bytes.len(), 1 + params.header_length + 1);
        assert_eq!(*bytes.last().unwrap(), 0);

        let decoded =
            NetworkMessage::decode_payload(&CommandString::new("headers").unwrap(), &bytes, &params)
                .unwrap();
        assert_eq!(decoded, NetworkMessage::Headers(vec![header]));
    }

    #[test]
    fn version_message_over_the_wire() {
        let params = Network::Mainnet.params();
        let socket: std::net::SocketAddr = "127.0.0.1:8757".parse().unwrap();
        let version = VersionMessage {
            version: crate::network::constants::PROTOCOL_VERSION,
            services: crate::network::constants::ServiceFlags::NONE,
            timestamp: 1_700_000_000,
            receiver: NetAddress::new(&socket, crate::network::constants::ServiceFlags::NONE),
            sender: NetAddress::new(&socket, crate::network::constants::ServiceFlags::NONE),
            nonce: 7,
            user_agent: String::new(),
            start_height: 0,
            relay: false,
        };
        let decoded = roundtrip(&params, NetworkMessage::Version(version.clone()));
        assert_eq!(decoded, NetworkMessage::Version(version));
    }

    #[test]
    fn deserialize_partial_leaves_trailing_bytes() {
        let params = Network::Mainnet.params();
        let raw = RawNetworkMessage::new(&params, NetworkMessage::Ping(1));
        let mut encoded = serialize(&raw);
        encoded.extend_from_slice(&[0xFF; 3]);
        let (value, consumed) = deserialize_partial::<u32>(&encoded).unwrap();
        assert_eq!(value, params.magic);
        assert_eq!(consumed, 4);
    }
}
