//! The broadcast cache and INV/GETDATA bookkeeping.
//!
//! Broadcast transactions are cached (keyed by the non-witness txid) so
//! peers can pull them with `getdata`, and expire after five minutes.
//! During mempool verification, incoming tx `inv` items are recorded so
//! the client can tell whether a peer accepted the transaction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use embercore::hashes::Txid;
use embercore::network::message_blockdata::Inventory;
use embercore::transaction::Transaction;

use crate::clock::Clock;

/// How long a broadcast transaction stays retrievable.
const BROADCAST_CACHE_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    tx: Transaction,
    inserted_at: Instant,
    getdata_count: usize,
}

/// Tracks recently broadcast transactions and mempool sightings.
pub struct BroadcastManager {
    clock: Arc<dyn Clock>,
    cache: HashMap<Txid, CacheEntry>,
    /// Raw hashes from tx `inv` items seen since the last reset.
    seen_inv_hashes: HashSet<[u8; 32]>,
}

impl BroadcastManager {
    /// An empty cache.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        BroadcastManager {
            clock,
            cache: HashMap::new(),
            seen_inv_hashes: HashSet::new(),
        }
    }

    /// Cache a transaction for serving. Returns its txid.
    pub fn insert(&mut self, tx: Transaction) -> Txid {
        let txid = tx.txid();
        self.cache.insert(
            txid,
            CacheEntry {
                tx,
                inserted_at: self.clock.now(),
                getdata_count: 0,
            },
        );
        txid
    }

    /// Number of cached transactions.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// How many `getdata` requests have named this transaction.
    pub fn getdata_count(&self, txid: &Txid) -> usize {
        self.cache.get(txid).map(|e| e.getdata_count).unwrap_or(0)
    }

    /// Resolve a `getdata` inventory item against the cache. Counts the
    /// hit and returns the transaction to send back.
    pub fn lookup_getdata(&mut self, item: &Inventory) -> Option<Transaction> {
        let txid = item.txid()?;
        let entry = self.cache.get_mut(&txid)?;
        entry.getdata_count += 1;
        Some(entry.tx.clone())
    }

    /// Record the hashes of tx `inv` items for mempool verification.
    pub fn note_tx_invs<'a>(&mut self, items: impl Iterator<Item = &'a Inventory>) {
        for item in items {
            if let Some(txid) = item.txid() {
                self.seen_inv_hashes.insert(txid.to_byte_array());
            }
        }
    }

    /// Forget recorded `inv` sightings before a verification window.
    pub fn reset_inv_sightings(&mut self) {
        self.seen_inv_hashes.clear();
    }

    /// Whether a tx `inv` for this txid has been seen, matching either
    /// byte orientation (peers disagree on display vs wire order).
    pub fn seen_in_mempool(&self, txid: &Txid) -> bool {
        let forward = txid.to_byte_array();
        let mut reversed = forward;
        reversed.reverse();
        self.seen_inv_hashes.contains(&forward) || self.seen_inv_hashes.contains(&reversed)
    }

    /// Drop cache entries older than the TTL.
    pub fn purge_expired(&mut self) {
        let now = self.clock.now();
        self.cache.retain(|txid, entry| {
            let keep = now.saturating_duration_since(entry.inserted_at) < BROADCAST_CACHE_TTL;
            if !keep {
                tracing::debug!("Broadcast cache entry {} expired", txid);
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use embercore::script::ScriptBuf;
    use embercore::transaction::{OutPoint, TxIn, TxOut, SEQUENCE_FINAL};

    fn test_tx(salt: u8) -> Transaction {
        Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::from_byte_array([salt; 32]), 0),
                script_sig: ScriptBuf::new(),
                sequence: SEQUENCE_FINAL,
                witness: vec![vec![salt], vec![salt, salt]],
            }],
            output: vec![TxOut {
                value: 1000,
                script_pubkey: ScriptBuf::new_witness_program(0, &[salt; 20]),
            }],
        }
    }

    #[test]
    fn cache_is_keyed_by_non_witness_txid() {
        let clock = Arc::new(MockClock::new());
        let mut manager = BroadcastManager::new(clock);
        let tx = test_tx(1);
        let txid = manager.insert(tx.clone());
        assert_eq!(txid, tx.txid());
        assert_ne!(txid, tx.wtxid());
    }

    #[test]
    fn getdata_lookup_serves_and_counts() {
        let clock = Arc::new(MockClock::new());
        let mut manager = BroadcastManager::new(clock);
        let tx = test_tx(1);
        let txid = manager.insert(tx.clone());

        let plain = Inventory::Transaction(txid);
        let witness = Inventory::WitnessTransaction(txid);
        assert_eq!(manager.lookup_getdata(&plain), Some(tx.clone()));
        assert_eq!(manager.lookup_getdata(&witness), Some(tx));
        assert_eq!(manager.getdata_count(&txid), 2);

        let unknown = Inventory::Transaction(Txid::from_byte_array([9; 32]));
        assert_eq!(manager.lookup_getdata(&unknown), None);
    }

    #[test]
    fn entries_expire_after_five_minutes() {
        let clock = Arc::new(MockClock::new());
        let mut manager = BroadcastManager::new(clock.clone());
        let txid = manager.insert(test_tx(1));

        clock.advance(Duration::from_secs(299));
        manager.purge_expired();
        assert_eq!(manager.len(), 1);

        clock.advance(Duration::from_secs(2));
        manager.purge_expired();
        assert!(manager.is_empty());
        assert_eq!(manager.getdata_count(&txid), 0);
    }

    #[test]
    fn mempool_sighting_matches_either_orientation() {
        let clock = Arc::new(MockClock::new());
        let mut manager = BroadcastManager::new(clock);
        let txid = manager.insert(test_tx(1));

        assert!(!manager.seen_in_mempool(&txid));

        // A peer announcing the reversed orientation still counts.
        let mut reversed = txid.to_byte_array();
        reversed.reverse();
        let items = [Inventory::Transaction(Txid::from_byte_array(reversed))];
        manager.note_tx_invs(items.iter());
        assert!(manager.seen_in_mempool(&txid));

        manager.reset_inv_sightings();
        assert!(!manager.seen_in_mempool(&txid));
    }
}
