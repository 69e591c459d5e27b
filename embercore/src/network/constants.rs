// SPDX-License-Identifier: CC0-1.0

//! Network constants.

use std::fmt;
use std::io::{self, Read, Write};
use std::ops::BitOr;

use crate::consensus::encode::{Decodable, Encodable, Error};

/// The P2P protocol version this client speaks.
pub const PROTOCOL_VERSION: u32 = 70015;

/// Flags advertising the services a node offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ServiceFlags(u64);

impl ServiceFlags {
    /// No services.
    pub const NONE: ServiceFlags = ServiceFlags(0);

    /// Can serve the full block chain (bit 0).
    pub const NETWORK: ServiceFlags = ServiceFlags(1 << 0);

    /// Can serve witness data (bit 3).
    pub const WITNESS: ServiceFlags = ServiceFlags(1 << 3);

    /// Can serve BIP157 compact filters (bit 6).
    pub const COMPACT_FILTERS: ServiceFlags = ServiceFlags(1 << 6);

    /// Construct from the raw wire value.
    pub fn from_u64(value: u64) -> Self {
        ServiceFlags(value)
    }

    /// The raw wire value.
    pub fn to_u64(self) -> u64 {
        self.0
    }

    /// Whether all of `flags` are set.
    pub fn has(self, flags: ServiceFlags) -> bool {
        self.0 & flags.0 == flags.0
    }
}

impl BitOr for ServiceFlags {
    type Output = ServiceFlags;

    fn bitor(self, rhs: ServiceFlags) -> ServiceFlags {
        ServiceFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for ServiceFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ServiceFlags({:#x})", self.0)
    }
}

impl Encodable for ServiceFlags {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(writer)
    }
}

impl Decodable for ServiceFlags {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(ServiceFlags(u64::consensus_decode(reader)?))
    }
}
