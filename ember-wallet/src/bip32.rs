//! BIP32 hierarchical deterministic keys.

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey, Signing};
use sha2::Sha512;

use crate::error::{Error, Result};

type HmacSha512 = Hmac<Sha512>;

/// Index threshold above which a child is hardened.
const HARDENED_BIT: u32 = 1 << 31;

/// One step in a derivation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildNumber {
    /// A non-hardened child.
    Normal {
        /// The child index, below 2^31.
        index: u32,
    },
    /// A hardened child.
    Hardened {
        /// The child index, below 2^31.
        index: u32,
    },
}

impl ChildNumber {
    /// A non-hardened child number.
    pub fn from_normal_idx(index: u32) -> Result<Self> {
        if index & HARDENED_BIT == 0 {
            Ok(ChildNumber::Normal { index })
        } else {
            Err(Error::InvalidChildNumber(index))
        }
    }

    /// A hardened child number.
    pub fn from_hardened_idx(index: u32) -> Result<Self> {
        if index & HARDENED_BIT == 0 {
            Ok(ChildNumber::Hardened { index })
        } else {
            Err(Error::InvalidChildNumber(index))
        }
    }

    /// Whether this child is hardened.
    pub fn is_hardened(&self) -> bool {
        matches!(self, ChildNumber::Hardened { .. })
    }

    /// The raw wire index (hardened bit applied).
    pub fn to_u32(self) -> u32 {
        match self {
            ChildNumber::Normal { index } => index,
            ChildNumber::Hardened { index } => index | HARDENED_BIT,
        }
    }
}

impl fmt::Display for ChildNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChildNumber::Normal { index } => write!(f, "{}", index),
            ChildNumber::Hardened { index } => write!(f, "{}'", index),
        }
    }
}

impl FromStr for ChildNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (digits, hardened) = match s.strip_suffix('\'').or_else(|| s.strip_suffix('h')) {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        let index: u32 = digits
            .parse()
            .map_err(|_| Error::InvalidDerivationPath(s.to_string()))?;
        if hardened {
            ChildNumber::from_hardened_idx(index)
        } else {
            ChildNumber::from_normal_idx(index)
        }
    }
}

/// A full derivation path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DerivationPath(Vec<ChildNumber>);

impl DerivationPath {
    /// The path's steps.
    pub fn as_slice(&self) -> &[ChildNumber] {
        &self.0
    }

    /// Extend the path with one more step.
    pub fn child(&self, child: ChildNumber) -> Self {
        let mut path = self.0.clone();
        path.push(child);
        DerivationPath(path)
    }
}

impl From<Vec<ChildNumber>> for DerivationPath {
    fn from(path: Vec<ChildNumber>) -> Self {
        DerivationPath(path)
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("m")?;
        for child in &self.0 {
            write!(f, "/{}", child)?;
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('/');
        if parts.next() != Some("m") {
            return Err(Error::InvalidDerivationPath(s.to_string()));
        }
        let mut path = Vec::new();
        for part in parts {
            path.push(ChildNumber::from_str(part)?);
        }
        Ok(DerivationPath(path))
    }
}

/// An extended private key.
#[derive(Clone, PartialEq, Eq)]
pub struct ExtendedPrivKey {
    /// Depth in the tree; 0 for the master key.
    pub depth: u8,
    /// The child number this key was derived with.
    pub child_number: ChildNumber,
    /// The private key.
    pub private_key: SecretKey,
    /// The chain code.
    pub chain_code: [u8; 32],
}

impl fmt::Debug for ExtendedPrivKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ExtendedPrivKey")
            .field("depth", &self.depth)
            .field("child_number", &self.child_number)
            .field("private_key", &"<hidden>")
            .finish()
    }
}

impl ExtendedPrivKey {
    /// Build the master key from a seed: HMAC-SHA512 keyed with
    /// "Bitcoin seed", split into key and chain code.
    pub fn new_master(seed: &[u8]) -> Result<Self> {
        let mut mac =
            HmacSha512::new_from_slice(b"Bitcoin seed").expect("HMAC accepts any key length");
        mac.update(seed);
        let output = mac.finalize().into_bytes();

        let private_key =
            SecretKey::from_slice(&output[..32]).map_err(|_| Error::InvalidSeed)?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&output[32..]);

        Ok(ExtendedPrivKey {
            depth: 0,
            child_number: ChildNumber::Normal { index: 0 },
            private_key,
            chain_code,
        })
    }

    /// Derive one child key.
    pub fn ckd_priv<C: Signing>(
        &self,
        secp: &Secp256k1<C>,
        child: ChildNumber,
    ) -> Result<ExtendedPrivKey> {
        let mut mac =
            HmacSha512::new_from_slice(&self.chain_code).expect("HMAC accepts any key length");
        match child {
            ChildNumber::Normal { .. } => {
                let pubkey = PublicKey::from_secret_key(secp, &self.private_key);
                mac.update(&pubkey.serialize());
            }
            ChildNumber::Hardened { .. } => {
                mac.update(&[0u8]);
                mac.update(&self.private_key.secret_bytes());
            }
        }
        mac.update(&child.to_u32().to_be_bytes());
        let output = mac.finalize().into_bytes();

        let tweak = Scalar::from_be_bytes(output[..32].try_into().expect("32 bytes"))
            .map_err(|_| Error::InvalidChildNumber(child.to_u32()))?;
        let private_key = self.private_key.add_tweak(&tweak)?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&output[32..]);

        Ok(ExtendedPrivKey {
            depth: self.depth + 1,
            child_number: child,
            private_key,
            chain_code,
        })
    }

    /// Derive the key at a full path.
    pub fn derive_priv<C: Signing>(
        &self,
        secp: &Secp256k1<C>,
        path: &DerivationPath,
    ) -> Result<ExtendedPrivKey> {
        let mut key = self.clone();
        for &child in path.as_slice() {
            key = key.ckd_priv(secp, child)?;
        }
        Ok(key)
    }

    /// The compressed public key for this node.
    pub fn public_key<C: Signing>(&self, secp: &Secp256k1<C>) -> PublicKey {
        PublicKey::from_secret_key(secp, &self.private_key)
    }
}

/// An extended public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedPubKey {
    /// Depth in the tree.
    pub depth: u8,
    /// The child number this key was derived with.
    pub child_number: ChildNumber,
    /// The public key.
    pub public_key: PublicKey,
    /// The chain code.
    pub chain_code: [u8; 32],
}

impl ExtendedPubKey {
    /// The public half of an extended private key.
    pub fn from_priv<C: Signing>(secp: &Secp256k1<C>, xpriv: &ExtendedPrivKey) -> Self {
        ExtendedPubKey {
            depth: xpriv.depth,
            child_number: xpriv.child_number,
            public_key: xpriv.public_key(secp),
            chain_code: xpriv.chain_code,
        }
    }
}
