//! The HD wallet: a seed and the account derived from it.
//!
//! Operations before a seed is loaded fail with a typed
//! [`Error::NotInitialized`] instead of panicking on an absent value.

use embercore::params::ChainParams;

use crate::account::Account;
use crate::bip32::ExtendedPrivKey;
use crate::error::{Error, Result};

enum WalletState {
    Uninitialized,
    Ready {
        account: Account,
    },
}

/// A hierarchical deterministic wallet for one network.
pub struct HdWallet {
    params: ChainParams,
    state: WalletState,
}

impl HdWallet {
    /// A wallet with no key material yet.
    pub fn new(params: ChainParams) -> Self {
        HdWallet {
            params,
            state: WalletState::Uninitialized,
        }
    }

    /// A wallet initialized from a seed.
    pub fn from_seed(params: ChainParams, seed: &[u8]) -> Result<Self> {
        let mut wallet = HdWallet::new(params);
        wallet.load_seed(seed)?;
        Ok(wallet)
    }

    /// Load (or replace) the seed, deriving account 0.
    pub fn load_seed(&mut self, seed: &[u8]) -> Result<()> {
        let master = ExtendedPrivKey::new_master(seed)?;
        let account = Account::new(&master, 0, &self.params)?;
        self.state = WalletState::Ready { account };
        Ok(())
    }

    /// Whether a seed has been loaded.
    pub fn is_initialized(&self) -> bool {
        matches!(self.state, WalletState::Ready { .. })
    }

    /// The default account, if the wallet is initialized.
    pub fn account(&self) -> Result<&Account> {
        match &self.state {
            WalletState::Ready { account } => Ok(account),
            WalletState::Uninitialized => Err(Error::NotInitialized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::KeyChain;
    use embercore::address::AddressType;
    use embercore::params::Network;

    #[test]
    fn uninitialized_wallet_refuses_operations() {
        let wallet = HdWallet::new(Network::Mainnet.params());
        assert!(!wallet.is_initialized());
        assert!(matches!(wallet.account(), Err(Error::NotInitialized)));
    }

    #[test]
    fn loading_a_seed_initializes() {
        let wallet = HdWallet::from_seed(Network::Mainnet.params(), &[0x01; 32]).unwrap();
        assert!(wallet.is_initialized());
        let address = wallet
            .account()
            .unwrap()
            .derive_address(AddressType::Segwit, KeyChain::Receive, 0)
            .unwrap();
        assert!(address.as_str().starts_with("em1q"));
    }

    #[test]
    fn same_seed_same_addresses() {
        let a = HdWallet::from_seed(Network::Mainnet.params(), &[0x02; 32]).unwrap();
        let b = HdWallet::from_seed(Network::Mainnet.params(), &[0x02; 32]).unwrap();
        let addr_a = a
            .account()
            .unwrap()
            .derive_address(AddressType::Segwit, KeyChain::Receive, 3)
            .unwrap();
        let addr_b = b
            .account()
            .unwrap()
            .derive_address(AddressType::Segwit, KeyChain::Receive, 3)
            .unwrap();
        assert_eq!(addr_a, addr_b);
    }
}
