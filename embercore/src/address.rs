// SPDX-License-Identifier: CC0-1.0

//! Address encoding and decoding.
//!
//! Four address types are supported: legacy P2PKH and nested-segwit P2SH
//! (Base58Check), native segwit P2WPKH (bech32) and taproot P2TR
//! (bech32m). The checksum variant on decode is chosen by the witness
//! version, per BIP350.

use std::fmt;

use bech32::{Fe32, Hrp};
use secp256k1::{PublicKey, Scalar, Secp256k1, XOnlyPublicKey};
use thiserror::Error;

use crate::hashes::{hash160, sha256};
use crate::params::ChainParams;
use crate::script::ScriptBuf;

/// The address types the wallet can derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressType {
    /// Legacy base58 P2PKH.
    Legacy,
    /// P2WPKH nested in P2SH.
    NestedSegwit,
    /// Native segwit v0 P2WPKH.
    Segwit,
    /// Taproot (segwit v1, key-path only).
    Taproot,
}

impl AddressType {
    /// All supported types, in derivation-account order.
    pub const ALL: [AddressType; 4] = [
        AddressType::Legacy,
        AddressType::NestedSegwit,
        AddressType::Segwit,
        AddressType::Taproot,
    ];

    /// Stable ordinal used in persisted address-cursor keys.
    pub fn ordinal(self) -> u32 {
        match self {
            AddressType::Legacy => 0,
            AddressType::NestedSegwit => 1,
            AddressType::Segwit => 2,
            AddressType::Taproot => 3,
        }
    }
}

/// Address decode/encode errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("base58 error: {0}")]
    Base58(#[from] bs58::decode::Error),

    #[error("bech32 error: {0}")]
    Bech32(String),

    #[error("unknown address version prefix 0x{0:02x}")]
    UnknownPrefix(u8),

    #[error("human-readable part '{0}' does not match this network")]
    WrongHrp(String),

    #[error("invalid payload length {0}")]
    InvalidLength(usize),

    #[error("witness version {version} with program length {program_len} is invalid")]
    InvalidWitnessProgram {
        version: u8,
        program_len: usize,
    },

    #[error("script has no address form")]
    UnrecognizedScript,

    #[error("secp256k1 error: {0}")]
    Secp256k1(#[from] secp256k1::Error),
}

/// The decoded payload of an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Payload {
    /// P2PKH hash.
    PubkeyHash([u8; 20]),
    /// P2SH hash.
    ScriptHash([u8; 20]),
    /// A segwit witness program.
    WitnessProgram {
        /// Witness version, 0..=16.
        version: u8,
        /// The program bytes.
        program: Vec<u8>,
    },
}

/// A parsed or derived address, bound to one network's encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// The decoded payload.
    pub payload: Payload,
    encoded: String,
}

impl Address {
    /// Derive an address of the given type from a compressed public key.
    pub fn from_pubkey(
        pubkey: &PublicKey,
        address_type: AddressType,
        params: &ChainParams,
    ) -> Result<Address, Error> {
        let payload = match address_type {
            AddressType::Legacy => Payload::PubkeyHash(hash160(&pubkey.serialize())),
            AddressType::NestedSegwit => {
                let redeem =
                    ScriptBuf::new_witness_program(0, &hash160(&pubkey.serialize()));
                Payload::ScriptHash(hash160(redeem.as_bytes()))
            }
            AddressType::Segwit => Payload::WitnessProgram {
                version: 0,
                program: hash160(&pubkey.serialize()).to_vec(),
            },
            AddressType::Taproot => Payload::WitnessProgram {
                version: 1,
                program: tweaked_taproot_key(pubkey)?.serialize().to_vec(),
            },
        };
        Self::from_payload(payload, params)
    }

    /// Recognize an output script as an address.
    pub fn from_script(script: &ScriptBuf, params: &ChainParams) -> Result<Address, Error> {
        let bytes = script.as_bytes();
        if script.is_p2pkh() {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&bytes[3..23]);
            return Self::from_payload(Payload::PubkeyHash(hash), params);
        }
        if script.is_p2sh() {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&bytes[2..22]);
            return Self::from_payload(Payload::ScriptHash(hash), params);
        }
        if let Some((version, program)) = script.witness_program() {
            return Self::from_payload(
                Payload::WitnessProgram {
                    version,
                    program: program.to_vec(),
                },
                params,
            );
        }
        Err(Error::UnrecognizedScript)
    }

    /// Parse an address string, detecting the encoding from its shape.
    pub fn parse(s: &str, params: &ChainParams) -> Result<Address, Error> {
        // Bech32 first: the separator plus a known HRP is unambiguous.
        let lowered = s.to_lowercase();
        if lowered.starts_with(&format!("{}1", params.bech32_hrp)) {
            let (hrp, version, program) =
                bech32::segwit::decode(s).map_err(|e| Error::Bech32(e.to_string()))?;
            if hrp.to_string().to_lowercase() != params.bech32_hrp {
                return Err(Error::WrongHrp(hrp.to_string()));
            }
            let version = version.to_u8();
            check_witness_program(version, program.len())?;
            return Self::from_payload(
                Payload::WitnessProgram { version, program },
                params,
            );
        }

        let decoded = bs58::decode(s).with_check(None).into_vec()?;
        if decoded.len() != 21 {
            return Err(Error::InvalidLength(decoded.len()));
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&decoded[1..]);
        let payload = if decoded[0] == params.pubkey_address_prefix {
            Payload::PubkeyHash(hash)
        } else if decoded[0] == params.script_address_prefix {
            Payload::ScriptHash(hash)
        } else {
            return Err(Error::UnknownPrefix(decoded[0]));
        };
        Self::from_payload(payload, params)
    }

    /// The output script this address locks to.
    pub fn to_script_pubkey(&self) -> ScriptBuf {
        match &self.payload {
            Payload::PubkeyHash(hash) => ScriptBuf::new_p2pkh(hash),
            Payload::ScriptHash(hash) => ScriptBuf::new_p2sh(hash),
            Payload::WitnessProgram { version, program } => {
                ScriptBuf::new_witness_program(*version, program)
            }
        }
    }

    /// The encoded address string.
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    fn from_payload(payload: Payload, params: &ChainParams) -> Result<Address, Error> {
        let encoded = match &payload {
            Payload::PubkeyHash(hash) => bs58::encode(hash)
                .with_check_version(params.pubkey_address_prefix)
                .into_string(),
            Payload::ScriptHash(hash) => bs58::encode(hash)
                .with_check_version(params.script_address_prefix)
                .into_string(),
            Payload::WitnessProgram { version, program } => {
                check_witness_program(*version, program.len())?;
                let hrp = Hrp::parse(params.bech32_hrp)
                    .map_err(|e| Error::Bech32(e.to_string()))?;
                let fe_version = Fe32::try_from(*version)
                    .map_err(|e| Error::Bech32(e.to_string()))?;
                bech32::segwit::encode(hrp, fe_version, program)
                    .map_err(|e| Error::Bech32(e.to_string()))?
            }
        };
        Ok(Address { payload, encoded })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

fn check_witness_program(version: u8, program_len: usize) -> Result<(), Error> {
    let valid = match version {
        0 => program_len == 20 || program_len == 32,
        1..=16 => (2..=40).contains(&program_len),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidWitnessProgram {
            version,
            program_len,
        })
    }
}

/// BIP341 key-path tweak: `Q = lift_x(P) + H_taptweak(x(P))·G`.
fn tweaked_taproot_key(pubkey: &PublicKey) -> Result<XOnlyPublicKey, Error> {
    let secp = Secp256k1::verification_only();
    let (xonly, _parity) = pubkey.x_only_public_key();

    let tag = sha256(b"TapTweak");
    let mut preimage = Vec::with_capacity(96);
    preimage.extend_from_slice(&tag);
    preimage.extend_from_slice(&tag);
    preimage.extend_from_slice(&xonly.serialize());
    let tweak = Scalar::from_be_bytes(sha256(&preimage))
        .map_err(|_| Error::Bech32("taproot tweak out of range".to_string()))?;

    let (tweaked, _parity) = xonly.add_tweak(&secp, &tweak)?;
    Ok(tweaked)
}
