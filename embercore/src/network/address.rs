// SPDX-License-Identifier: CC0-1.0

//! Network address records for `addr`/`addrv2` and the `version` message.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::consensus::encode::{Decodable, Encodable, Error, VarInt};
use crate::network::constants::ServiceFlags;

/// A 26-byte legacy network address record.
///
/// IPv4 addresses travel as IPv4-mapped IPv6; the port is big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetAddress {
    /// Services advertised for this address.
    pub services: ServiceFlags,
    /// The IPv6 (or v4-mapped) address bytes.
    pub address: [u8; 16],
    /// The TCP port.
    pub port: u16,
}

impl NetAddress {
    /// Build a record for a socket address.
    pub fn new(socket: &SocketAddr, services: ServiceFlags) -> Self {
        let address = match socket.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        };
        NetAddress {
            services,
            address,
            port: socket.port(),
        }
    }

    /// The socket address, unmapping v4-in-v6.
    pub fn socket_addr(&self) -> SocketAddr {
        let v6 = Ipv6Addr::from(self.address);
        match v6.to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), self.port),
            None => SocketAddr::new(IpAddr::V6(v6), self.port),
        }
    }
}

impl Encodable for NetAddress {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.services.consensus_encode(writer)?;
        len += self.address.consensus_encode(writer)?;
        writer.write_all(&self.port.to_be_bytes())?;
        Ok(len + 2)
    }
}

impl Decodable for NetAddress {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let services = ServiceFlags::consensus_decode(reader)?;
        let address = <[u8; 16]>::consensus_decode(reader)?;
        let mut port_bytes = [0u8; 2];
        reader.read_exact(&mut port_bytes)?;
        Ok(NetAddress {
            services,
            address,
            port: u16::from_be_bytes(port_bytes),
        })
    }
}

/// BIP155 network identifiers.
pub const ADDRV2_NETWORK_IPV4: u8 = 0x01;
/// BIP155 IPv6 network identifier.
pub const ADDRV2_NETWORK_IPV6: u8 = 0x02;

/// One entry of an `addrv2` message (BIP155).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrV2Message {
    /// Last-seen time.
    pub time: u32,
    /// Advertised services (varint-encoded on the wire).
    pub services: ServiceFlags,
    /// BIP155 network id.
    pub network_id: u8,
    /// Raw address bytes; length depends on the network id.
    pub addr: Vec<u8>,
    /// The TCP port, big-endian on the wire.
    pub port: u16,
}

impl AddrV2Message {
    /// The socket address, if this entry is IPv4 or IPv6.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match (self.network_id, self.addr.len()) {
            (ADDRV2_NETWORK_IPV4, 4) => {
                let octets: [u8; 4] = self.addr.as_slice().try_into().ok()?;
                Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), self.port))
            }
            (ADDRV2_NETWORK_IPV6, 16) => {
                let octets: [u8; 16] = self.addr.as_slice().try_into().ok()?;
                Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), self.port))
            }
            _ => None,
        }
    }
}

impl Encodable for AddrV2Message {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.time.consensus_encode(writer)?;
        len += VarInt(self.services.to_u64()).consensus_encode(writer)?;
        len += self.network_id.consensus_encode(writer)?;
        len += self.addr.consensus_encode(writer)?;
        writer.write_all(&self.port.to_be_bytes())?;
        Ok(len + 2)
    }
}

impl Decodable for AddrV2Message {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let time = u32::consensus_decode(reader)?;
        let services = ServiceFlags::from_u64(VarInt::consensus_decode(reader)?.0);
        let network_id = u8::consensus_decode(reader)?;
        let addr = Vec::<u8>::consensus_decode(reader)?;
        let mut port_bytes = [0u8; 2];
        reader.read_exact(&mut port_bytes)?;
        Ok(AddrV2Message {
            time,
            services,
            network_id,
            addr,
            port: u16::from_be_bytes(port_bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::encode::{deserialize, serialize};

    #[test]
    fn netaddress_roundtrip_v4() {
        let socket: SocketAddr = "203.0.113.7:8757".parse().unwrap();
        let record = NetAddress::new(&socket, ServiceFlags::NETWORK);
        let encoded = serialize(&record);
        assert_eq!(encoded.len(), 26);
        let decoded: NetAddress = deserialize(&encoded).unwrap();
        assert_eq!(decoded.socket_addr(), socket);
    }

    #[test]
    fn addrv2_ipv4_roundtrip() {
        let entry = AddrV2Message {
            time: 1_700_000_000,
            services: ServiceFlags::NETWORK | ServiceFlags::COMPACT_FILTERS,
            network_id: ADDRV2_NETWORK_IPV4,
            addr: vec![198, 51, 100, 4],
            port: 8757,
        };
        let decoded: AddrV2Message = deserialize(&serialize(&entry)).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.socket_addr().unwrap().to_string(), "198.51.100.4:8757");
    }

    #[test]
    fn addrv2_unknown_network_has_no_socket() {
        let entry = AddrV2Message {
            time: 0,
            services: ServiceFlags::NONE,
            network_id: 0x04, // torv3
            addr: vec![0u8; 32],
            port: 8757,
        };
        assert!(entry.socket_addr().is_none());
    }
}
