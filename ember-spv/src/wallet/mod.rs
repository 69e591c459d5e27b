//! The wallet repository.
//!
//! Owns the UTXO set, the address cursor and the persisted scan state,
//! and orchestrates filter-driven UTXO discovery through a
//! [`ScanSource`] (implemented by the SPV client). Key material comes
//! from `ember-wallet`; the repository never stores raw keys.

pub mod address_pool;
pub mod builder;
pub mod extract;
pub mod signer;
pub mod utxo;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use embercore::address::AddressType;
use embercore::block::Block;
use embercore::params::ChainParams;
use embercore::script::ScriptBuf;
use embercore::transaction::OutPoint;
use ember_wallet::{HdWallet, KeyChain};

use crate::clock::Clock;
use crate::error::{SyncResult, WalletError, WalletResult};
use crate::events::{ScanObserver, StateObserver};
use crate::storage::{
    address_book_key, last_scanned_height_key, utxos_key, WalletStorage,
};
use crate::wallet::address_pool::AddressCursor;
use crate::wallet::extract::{scan_block, WatchedScript};
use crate::wallet::signer::SigningKeys;
use crate::wallet::utxo::{Utxo, UtxoSet};

/// Heights per filter prefetch batch during a scan.
const SCAN_PREFETCH_BATCH: u32 = 100;

/// Minimum interval between scan progress emissions.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// The chain surface the scanner needs; the SPV client implements it.
#[async_trait]
pub trait ScanSource: Send {
    /// Current header tip height.
    fn tip_height(&self) -> u32;

    /// Kick off filter requests for a height range.
    async fn prefetch_filters(&mut self, start: u32, end: u32) -> SyncResult<()>;

    /// Whether the filter at `height` matches any of the scripts.
    async fn filter_matches_scripts(
        &mut self,
        height: u32,
        scripts: &[Vec<u8>],
    ) -> SyncResult<bool>;

    /// Fetch a full block, `None` on timeout or `notfound`.
    async fn fetch_block(&mut self, height: u32) -> SyncResult<Option<Block>>;
}

/// The wallet repository.
pub struct WalletManager {
    params: ChainParams,
    wallet_id: String,
    hd: HdWallet,
    utxos: UtxoSet,
    cursor: AddressCursor,
    storage: Box<dyn WalletStorage>,
    last_scanned_height: Option<u32>,
    clock: Arc<dyn Clock>,
    scan_observer: Option<Arc<dyn ScanObserver>>,
    state_observer: Option<Arc<dyn StateObserver>>,
}

impl WalletManager {
    /// A wallet with no seed loaded yet.
    pub fn new(
        params: ChainParams,
        wallet_id: impl Into<String>,
        storage: Box<dyn WalletStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        WalletManager {
            hd: HdWallet::new(params.clone()),
            params,
            wallet_id: wallet_id.into(),
            utxos: UtxoSet::new(),
            cursor: AddressCursor::new(),
            storage,
            last_scanned_height: None,
            clock,
            scan_observer: None,
            state_observer: None,
        }
    }

    /// Load the HD seed.
    pub fn load_seed(&mut self, seed: &[u8]) -> WalletResult<()> {
        self.hd.load_seed(seed)?;
        Ok(())
    }

    /// Register a scan progress observer.
    pub fn set_scan_observer(&mut self, observer: Arc<dyn ScanObserver>) {
        self.scan_observer = Some(observer);
    }

    /// Register a state-change observer.
    pub fn set_state_observer(&mut self, observer: Arc<dyn StateObserver>) {
        self.state_observer = Some(observer);
    }

    /// Restore persisted state (UTXOs, cursor, scan height).
    pub async fn load_state(&mut self) -> WalletResult<()> {
        let storage = &self.storage;
        if let Ok(Some(json)) = storage.get(&utxos_key(&self.wallet_id)).await {
            match UtxoSet::from_json(&json) {
                Ok(set) => self.utxos = set,
                Err(e) => tracing::warn!("Discarding unreadable UTXO state: {}", e),
            }
        }
        if let Ok(Some(json)) = storage.get(&address_book_key(&self.wallet_id)).await {
            match AddressCursor::from_json(&json) {
                Ok(cursor) => self.cursor = cursor,
                Err(e) => tracing::warn!("Discarding unreadable address cursor: {}", e),
            }
        }
        if let Ok(Some(value)) = storage.get(&last_scanned_height_key(&self.wallet_id)).await {
            self.last_scanned_height = value.parse().ok();
        }
        Ok(())
    }

    /// Persist UTXOs, cursor and scan height.
    pub async fn persist_state(&mut self) -> WalletResult<()> {
        let utxos_json = self
            .utxos
            .to_json()
            .map_err(|e| WalletError::Storage(e.to_string()))?;
        let cursor_json = self
            .cursor
            .to_json()
            .map_err(|e| WalletError::Storage(e.to_string()))?;

        let wallet_id = self.wallet_id.clone();
        self.storage
            .set(&utxos_key(&wallet_id), &utxos_json)
            .await
            .map_err(|e| WalletError::Storage(e.to_string()))?;
        self.storage
            .set(&address_book_key(&wallet_id), &cursor_json)
            .await
            .map_err(|e| WalletError::Storage(e.to_string()))?;
        if let Some(height) = self.last_scanned_height {
            self.storage
                .set(&last_scanned_height_key(&wallet_id), &height.to_string())
                .await
                .map_err(|e| WalletError::Storage(e.to_string()))?;
        }

        if let Some(observer) = &self.state_observer {
            observer.on_state_changed();
        }
        Ok(())
    }

    /// The UTXO set.
    pub fn utxos(&self) -> &UtxoSet {
        &self.utxos
    }

    /// Spendable balance in sats.
    pub fn balance(&self) -> u64 {
        self.utxos.spendable_balance()
    }

    /// Height the last scan completed at.
    pub fn last_scanned_height(&self) -> Option<u32> {
        self.last_scanned_height
    }

    /// The next unused receive address of the given type.
    pub fn next_receive_address(
        &mut self,
        address_type: AddressType,
    ) -> WalletResult<embercore::address::Address> {
        let index = self.cursor.next_receive_index(address_type)?;
        let address = self
            .hd
            .account()?
            .derive_address(address_type, KeyChain::Receive, index)?;
        self.cursor.mark_used(address_type, index);
        Ok(address)
    }

    /// The change script: change chain, index 0, native segwit.
    pub fn change_script(&self) -> WalletResult<ScriptBuf> {
        let address =
            self.hd.account()?.derive_address(AddressType::Segwit, KeyChain::Change, 0)?;
        Ok(address.to_script_pubkey())
    }

    /// The scan script set: the first 42 receive and 10 change native
    /// segwit addresses, derivation-based with no persistence
    /// dependency.
    pub fn watched_scripts(&self) -> WalletResult<Vec<WatchedScript>> {
        let account = self.hd.account()?;
        let mut watched = Vec::with_capacity(
            (KeyChain::Receive.max_addresses() + KeyChain::Change.max_addresses()) as usize,
        );
        for chain in [KeyChain::Receive, KeyChain::Change] {
            for index in 0..chain.max_addresses() {
                let address = account.derive_address(AddressType::Segwit, chain, index)?;
                watched.push(WatchedScript {
                    script: address.to_script_pubkey(),
                    address: address.as_str().to_string(),
                });
            }
        }
        Ok(watched)
    }

    /// Key material for every watched address, for signing.
    pub fn signing_keys(&self) -> WalletResult<SigningKeys> {
        let account = self.hd.account()?;
        let mut keys = SigningKeys::new();
        for chain in [KeyChain::Receive, KeyChain::Change] {
            for index in 0..chain.max_addresses() {
                let (secret_key, public_key) = account.derive_keypair(chain, index)?;
                keys.insert(
                    embercore::hashes::hash160(&public_key.serialize()),
                    (secret_key, public_key),
                );
            }
        }
        Ok(keys)
    }

    /// Build and sign a payment to `to_address`.
    ///
    /// Coin selection, fees, change and RBF follow the build options;
    /// the result is fully signed and ready for broadcast.
    pub fn create_transaction(
        &self,
        to_address: &str,
        amount: u64,
        options: &builder::BuildOptions,
    ) -> WalletResult<builder::BuiltTransaction> {
        let recipient = embercore::address::Address::parse(to_address, &self.params)?
            .to_script_pubkey();
        let change = self.change_script()?;
        let spendable = self.utxos.spendable();

        let mut built =
            builder::build_transaction(&spendable, recipient, amount, change, options)?;
        let keys = self.signing_keys()?;
        signer::sign_transaction(&mut built.tx, &built.selected, &keys)?;
        Ok(built)
    }

    /// Filter-driven UTXO discovery.
    ///
    /// Probes each block's filter against the wallet's script set,
    /// downloads matching blocks, extracts new UTXOs and reconciles
    /// spent outpoints, then persists the scan state.
    pub async fn discover_utxos(
        &mut self,
        source: &mut dyn ScanSource,
        full_rescan: bool,
        start_height: u32,
    ) -> WalletResult<u32> {
        let watched = self.watched_scripts()?;
        let scripts: Vec<Vec<u8>> =
            watched.iter().map(|w| w.script.as_bytes().to_vec()).collect();

        let tip = source.tip_height();
        if tip == 0 {
            return Ok(0);
        }

        let effective_start = if full_rescan {
            start_height.min(tip)
        } else {
            match self.last_scanned_height {
                Some(last) if last >= start_height => last,
                _ => start_height,
            }
        };

        tracing::info!(
            "Scanning for wallet transactions: heights {}..{} ({} scripts)",
            effective_start,
            tip,
            scripts.len()
        );

        let total = tip.saturating_sub(effective_start);
        let mut matched_heights = Vec::new();
        let mut last_progress = self.clock.now();

        for (scanned, height) in (effective_start..tip).enumerate() {
            if (height - effective_start) % SCAN_PREFETCH_BATCH == 0 {
                let batch_end = (height + SCAN_PREFETCH_BATCH - 1).min(tip);
                source
                    .prefetch_filters(height, batch_end)
                    .await
                    .map_err(|e| WalletError::ScanFailed(e.to_string()))?;
            }

            match source.filter_matches_scripts(height, &scripts).await {
                Ok(true) => matched_heights.push(height),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Filter probe failed at height {}: {}", height, e);
                }
            }

            let now = self.clock.now();
            if now.saturating_duration_since(last_progress) >= PROGRESS_INTERVAL {
                last_progress = now;
                if let Some(observer) = &self.scan_observer {
                    observer.scan_progress(scanned as u32 + 1, total, "scanning");
                }
            }
        }

        matched_heights.sort_unstable();
        tracing::info!("{} block(s) matched the wallet filters", matched_heights.len());

        for height in matched_heights {
            let Some(block) = source
                .fetch_block(height)
                .await
                .map_err(|e| WalletError::ScanFailed(e.to_string()))?
            else {
                tracing::warn!("Matched block at height {} could not be fetched", height);
                continue;
            };
            self.apply_block(&block, &watched, height);
        }

        self.last_scanned_height = Some(tip);
        self.persist_state().await?;

        if let Some(observer) = &self.scan_observer {
            observer.scan_progress(total, total, "complete");
        }
        Ok(total)
    }

    /// Scan a single freshly announced block.
    pub async fn check_block_for_transactions(
        &mut self,
        source: &mut dyn ScanSource,
        height: u32,
    ) -> WalletResult<()> {
        let watched = self.watched_scripts()?;
        let Some(block) = source
            .fetch_block(height)
            .await
            .map_err(|e| WalletError::ScanFailed(e.to_string()))?
        else {
            tracing::warn!("New block at height {} could not be fetched", height);
            return Ok(());
        };
        self.apply_block(&block, &watched, height);
        if self.last_scanned_height.is_some_and(|last| height > last) {
            self.last_scanned_height = Some(height);
        }
        self.persist_state().await
    }

    fn apply_block(&mut self, block: &Block, watched: &[WatchedScript], height: u32) {
        let result = scan_block(block, watched, height);

        for utxo in result.utxos {
            self.note_address_use(&utxo.address, watched);
            let outpoint = utxo.outpoint();
            match self.utxos.get(&outpoint) {
                Some(existing) if !existing.confirmed => {
                    // Seen before (pending change, or flipped by a
                    // reorg); this block reconfirms it.
                    self.utxos.remove(&outpoint);
                    self.utxos.add(utxo);
                    tracing::info!("UTXO {} reconfirmed at height {}", outpoint, height);
                }
                Some(_) => {}
                None => {
                    tracing::info!(
                        "Found UTXO {} worth {} sats at height {}",
                        outpoint,
                        utxo.value,
                        height
                    );
                    self.utxos.add(utxo);
                }
            }
        }

        let spent: HashSet<OutPoint> = result.spent_outpoints;
        for outpoint in spent {
            if self.utxos.remove(&outpoint).is_some() {
                tracing::info!("UTXO {} was spent at height {}", outpoint, height);
            }
        }
    }

    /// Raise the cursor's high-water mark when a watched receive
    /// address shows up on-chain.
    fn note_address_use(&mut self, address: &str, watched: &[WatchedScript]) {
        if let Some(position) = watched.iter().position(|w| w.address == address) {
            let receive_count = KeyChain::Receive.max_addresses() as usize;
            if position < receive_count {
                self.cursor.mark_used(AddressType::Segwit, position as u32);
            }
        }
    }

    /// After a reorg, flip affected UTXOs to unconfirmed. Nothing is
    /// deleted; the next scan reconfirms or discards them.
    pub async fn handle_reorg(&mut self, from_height: u32) -> WalletResult<()> {
        let flipped = self.utxos.mark_unconfirmed_from(from_height);
        if flipped > 0 {
            tracing::warn!(
                "Reorg from height {}: {} UTXO(s) marked unconfirmed",
                from_height,
                flipped
            );
        }
        if self.last_scanned_height.is_some_and(|last| last >= from_height) {
            self.last_scanned_height = Some(from_height.saturating_sub(1));
        }
        self.persist_state().await
    }

    /// Apply a broadcast transaction: drop the inputs it spends and add
    /// pending (unconfirmed) UTXOs for outputs paying our addresses.
    pub async fn apply_outgoing_transaction(
        &mut self,
        tx: &embercore::transaction::Transaction,
    ) -> WalletResult<()> {
        let watched = self.watched_scripts()?;
        for input in &tx.input {
            self.utxos.remove(&input.previous_output);
        }
        let txid = tx.txid();
        for (vout, output) in tx.output.iter().enumerate() {
            if let Some(watch) = watched.iter().find(|w| w.script == output.script_pubkey) {
                self.utxos.add(Utxo {
                    txid,
                    vout: vout as u32,
                    value: output.value,
                    script_pub_key: output.script_pubkey.clone(),
                    address: watch.address.clone(),
                    block_height: None,
                    confirmed: false,
                    frozen: false,
                });
            }
        }
        self.persist_state().await
    }

    /// The chain parameters this wallet is bound to.
    pub fn params(&self) -> &ChainParams {
        &self.params
    }
}
