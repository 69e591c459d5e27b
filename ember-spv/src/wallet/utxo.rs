//! UTXO tracking for the wallet.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use embercore::hashes::Txid;
use embercore::script::ScriptBuf;
use embercore::transaction::OutPoint;

/// An unspent transaction output tracked by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// The funding transaction id.
    pub txid: Txid,
    /// The output index within that transaction.
    pub vout: u32,
    /// Value in satoshis.
    pub value: u64,
    /// The locking script.
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptBuf,
    /// The wallet address this output pays.
    pub address: String,
    /// Height of the containing block; absent for unconfirmed outputs.
    #[serde(rename = "blockHeight")]
    pub block_height: Option<u32>,
    /// Whether the output is in a block on the active chain.
    pub confirmed: bool,
    /// Whether the user excluded this output from coin selection.
    pub frozen: bool,
}

impl Utxo {
    /// The outpoint identifying this output.
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }

    /// An output is spendable iff confirmed and not frozen.
    pub fn is_spendable(&self) -> bool {
        self.confirmed && !self.frozen
    }
}

/// The wallet's UTXO set, free of duplicate outpoints.
#[derive(Debug, Clone, Default)]
pub struct UtxoSet {
    utxos: HashMap<OutPoint, Utxo>,
}

impl UtxoSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a UTXO. A duplicate outpoint leaves the set unchanged and
    /// returns false.
    pub fn add(&mut self, utxo: Utxo) -> bool {
        let outpoint = utxo.outpoint();
        if self.utxos.contains_key(&outpoint) {
            return false;
        }
        self.utxos.insert(outpoint, utxo);
        true
    }

    /// Remove by outpoint.
    pub fn remove(&mut self, outpoint: &OutPoint) -> Option<Utxo> {
        self.utxos.remove(outpoint)
    }

    /// Look up by outpoint.
    pub fn get(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.utxos.get(outpoint)
    }

    /// Number of tracked outputs.
    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    /// All outputs, unordered.
    pub fn iter(&self) -> impl Iterator<Item = &Utxo> {
        self.utxos.values()
    }

    /// The spendable outputs.
    pub fn spendable(&self) -> Vec<Utxo> {
        self.utxos.values().filter(|u| u.is_spendable()).cloned().collect()
    }

    /// Sum of spendable values.
    pub fn spendable_balance(&self) -> u64 {
        self.utxos.values().filter(|u| u.is_spendable()).map(|u| u.value).sum()
    }

    /// Sum of all values, confirmed or not.
    pub fn total_balance(&self) -> u64 {
        self.utxos.values().map(|u| u.value).sum()
    }

    /// Flip outputs at or above `height` to unconfirmed after a reorg.
    /// Nothing is deleted; a rescan reconfirms or drops them.
    pub fn mark_unconfirmed_from(&mut self, height: u32) -> usize {
        let mut flipped = 0;
        for utxo in self.utxos.values_mut() {
            if utxo.block_height.is_some_and(|h| h >= height) {
                utxo.confirmed = false;
                utxo.block_height = None;
                flipped += 1;
            }
        }
        flipped
    }

    /// Serialize the set as the persisted JSON array.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut utxos: Vec<&Utxo> = self.utxos.values().collect();
        utxos.sort_by_key(|u| (u.block_height, u.txid, u.vout));
        serde_json::to_string(&utxos)
    }

    /// Rebuild a set from the persisted JSON array.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let utxos: Vec<Utxo> = serde_json::from_str(json)?;
        let mut set = UtxoSet::new();
        for utxo in utxos {
            set.add(utxo);
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utxo(salt: u8, value: u64, height: Option<u32>) -> Utxo {
        Utxo {
            txid: Txid::from_byte_array([salt; 32]),
            vout: 0,
            value,
            script_pub_key: ScriptBuf::new_witness_program(0, &[salt; 20]),
            address: format!("em1q-test-{}", salt),
            block_height: height,
            confirmed: height.is_some(),
            frozen: false,
        }
    }

    #[test]
    fn spendable_iff_confirmed_and_not_frozen() {
        let confirmed = utxo(1, 1000, Some(10));
        assert!(confirmed.is_spendable());

        let unconfirmed = utxo(2, 1000, None);
        assert!(!unconfirmed.is_spendable());

        let mut frozen = utxo(3, 1000, Some(10));
        frozen.frozen = true;
        assert!(!frozen.is_spendable());
    }

    #[test]
    fn duplicate_outpoints_rejected() {
        let mut set = UtxoSet::new();
        assert!(set.add(utxo(1, 1000, Some(5))));
        assert!(!set.add(utxo(1, 2000, Some(6))));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(&utxo(1, 0, None).outpoint()).unwrap().value, 1000);
    }

    #[test]
    fn reorg_flips_to_unconfirmed_without_deleting() {
        let mut set = UtxoSet::new();
        set.add(utxo(1, 1000, Some(97)));
        set.add(utxo(2, 2000, Some(98)));

        let flipped = set.mark_unconfirmed_from(98);
        assert_eq!(flipped, 1);
        assert_eq!(set.len(), 2);

        let h97 = set.get(&utxo(1, 0, None).outpoint()).unwrap();
        assert!(h97.confirmed);
        let h98 = set.get(&utxo(2, 0, None).outpoint()).unwrap();
        assert!(!h98.confirmed);
        assert_eq!(h98.block_height, None);
    }

    #[test]
    fn json_roundtrip_preserves_fields() {
        let mut set = UtxoSet::new();
        set.add(utxo(1, 50_000, Some(7)));
        set.add(utxo(2, 30_000, None));

        let json = set.to_json().unwrap();
        assert!(json.contains("\"scriptPubKey\""));
        assert!(json.contains("\"blockHeight\""));

        let restored = UtxoSet::from_json(&json).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.spendable_balance(), 50_000);
        assert_eq!(restored.total_balance(), 80_000);
    }
}
