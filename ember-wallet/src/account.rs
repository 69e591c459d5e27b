//! BIP44 accounts.
//!
//! The account tree is `m/44'/coin_type'/account'/chain/index`, with
//! chain 0 for receive addresses and chain 1 for change. The wallet
//! hard-caps the index space per chain; the bounds are constants rather
//! than configuration.

use secp256k1::{All, PublicKey, Secp256k1, SecretKey};

use embercore::address::{Address, AddressType};
use embercore::params::ChainParams;

use crate::bip32::{ChildNumber, DerivationPath, ExtendedPrivKey};
use crate::error::{Error, Result};

/// Highest number of receive addresses the wallet will issue.
pub const MAX_RECEIVE_ADDRESSES: u32 = 42;

/// Highest number of change addresses the wallet will issue.
pub const MAX_CHANGE_ADDRESSES: u32 = 10;

/// The BIP44 chain component: external (receive) or internal (change).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyChain {
    /// Chain 0: addresses handed out to senders.
    Receive,
    /// Chain 1: change back to ourselves.
    Change,
}

impl KeyChain {
    /// The BIP44 chain index.
    pub fn index(self) -> u32 {
        match self {
            KeyChain::Receive => 0,
            KeyChain::Change => 1,
        }
    }

    /// The exclusive cap on address indexes for this chain.
    pub fn max_addresses(self) -> u32 {
        match self {
            KeyChain::Receive => MAX_RECEIVE_ADDRESSES,
            KeyChain::Change => MAX_CHANGE_ADDRESSES,
        }
    }
}

/// A derived BIP44 account bound to one network.
pub struct Account {
    account_key: ExtendedPrivKey,
    params: ChainParams,
    secp: Secp256k1<All>,
}

impl Account {
    /// Derive account `account_index` from the master key:
    /// `m/44'/coin_type'/account_index'`.
    pub fn new(
        master: &ExtendedPrivKey,
        account_index: u32,
        params: &ChainParams,
    ) -> Result<Self> {
        let secp = Secp256k1::new();
        let path: DerivationPath = vec![
            ChildNumber::from_hardened_idx(44)?,
            ChildNumber::from_hardened_idx(params.coin_type)?,
            ChildNumber::from_hardened_idx(account_index)?,
        ]
        .into();
        let account_key = master.derive_priv(&secp, &path)?;
        Ok(Account {
            account_key,
            params: params.clone(),
            secp,
        })
    }

    /// The chain parameters this account derives addresses for.
    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// The key pair at `chain/index`.
    pub fn derive_keypair(&self, chain: KeyChain, index: u32) -> Result<(SecretKey, PublicKey)> {
        if index >= chain.max_addresses() {
            return Err(Error::AddressIndexOutOfRange {
                index,
                max: chain.max_addresses(),
            });
        }
        let child = self
            .account_key
            .ckd_priv(&self.secp, ChildNumber::from_normal_idx(chain.index())?)?
            .ckd_priv(&self.secp, ChildNumber::from_normal_idx(index)?)?;
        let public_key = child.public_key(&self.secp);
        Ok((child.private_key, public_key))
    }

    /// The address of the given type at `chain/index`.
    pub fn derive_address(
        &self,
        address_type: AddressType,
        chain: KeyChain,
        index: u32,
    ) -> Result<Address> {
        let (_, public_key) = self.derive_keypair(chain, index)?;
        Ok(Address::from_pubkey(&public_key, address_type, &self.params)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embercore::params::Network;

    fn test_account() -> Account {
        let master = ExtendedPrivKey::new_master(&[0x55; 32]).unwrap();
        Account::new(&master, 0, &Network::Mainnet.params()).unwrap()
    }

    #[test]
    fn receive_and_change_chains_diverge() {
        let account = test_account();
        let (_, receive) = account.derive_keypair(KeyChain::Receive, 0).unwrap();
        let (_, change) = account.derive_keypair(KeyChain::Change, 0).unwrap();
        assert_ne!(receive, change);
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = test_account();
        let b = test_account();
        for index in [0, 1, 41] {
            let (sk_a, pk_a) = a.derive_keypair(KeyChain::Receive, index).unwrap();
            let (sk_b, pk_b) = b.derive_keypair(KeyChain::Receive, index).unwrap();
            assert_eq!(sk_a, sk_b);
            assert_eq!(pk_a, pk_b);
        }
    }

    #[test]
    fn index_caps_enforced() {
        let account = test_account();
        assert!(account.derive_keypair(KeyChain::Receive, MAX_RECEIVE_ADDRESSES - 1).is_ok());
        assert!(matches!(
            account.derive_keypair(KeyChain::Receive, MAX_RECEIVE_ADDRESSES),
            Err(Error::AddressIndexOutOfRange { .. })
        ));
        assert!(matches!(
            account.derive_keypair(KeyChain::Change, MAX_CHANGE_ADDRESSES),
            Err(Error::AddressIndexOutOfRange { .. })
        ));
    }

    #[test]
    fn addresses_differ_per_type() {
        let account = test_account();
        let segwit = account
            .derive_address(AddressType::Segwit, KeyChain::Receive, 0)
            .unwrap();
        let legacy = account
            .derive_address(AddressType::Legacy, KeyChain::Receive, 0)
            .unwrap();
        assert_ne!(segwit.as_str(), legacy.as_str());
    }
}
