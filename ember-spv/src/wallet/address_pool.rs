//! The address cursor: highest-used index per address type.

use std::collections::HashMap;

use embercore::address::AddressType;
use ember_wallet::KeyChain;

use crate::error::{WalletError, WalletResult};

/// Tracks the highest receive index handed out per address type.
///
/// `-1` means no address of that type has been issued yet. The next
/// index is `highest + 1`, bounded by the per-chain caps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressCursor {
    highest_used: HashMap<u32, i64>,
}

impl AddressCursor {
    /// A cursor with nothing issued.
    pub fn new() -> Self {
        Self::default()
    }

    /// The highest index issued for a type, or -1.
    pub fn highest_used(&self, address_type: AddressType) -> i64 {
        self.highest_used.get(&address_type.ordinal()).copied().unwrap_or(-1)
    }

    /// The next receive index for a type, bounded by the receive cap.
    pub fn next_receive_index(&self, address_type: AddressType) -> WalletResult<u32> {
        let next = self.highest_used(address_type) + 1;
        if next >= KeyChain::Receive.max_addresses() as i64 {
            return Err(WalletError::AddressLimitReached(KeyChain::Receive));
        }
        Ok(next as u32)
    }

    /// Record an index as used, raising the high-water mark only.
    pub fn mark_used(&mut self, address_type: AddressType, index: u32) {
        let entry = self.highest_used.entry(address_type.ordinal()).or_insert(-1);
        if index as i64 > *entry {
            *entry = index as i64;
        }
    }

    /// Serialize as the persisted JSON map of ordinal to highest index.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let map: HashMap<String, i64> =
            self.highest_used.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        serde_json::to_string(&map)
    }

    /// Restore from the persisted JSON map. Unknown keys are ignored.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let map: HashMap<String, i64> = serde_json::from_str(json)?;
        let mut cursor = AddressCursor::new();
        for (key, value) in map {
            if let Ok(ordinal) = key.parse::<u32>() {
                cursor.highest_used.insert(ordinal, value);
            }
        }
        Ok(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_wallet::MAX_RECEIVE_ADDRESSES;

    #[test]
    fn starts_at_minus_one() {
        let cursor = AddressCursor::new();
        assert_eq!(cursor.highest_used(AddressType::Segwit), -1);
        assert_eq!(cursor.next_receive_index(AddressType::Segwit).unwrap(), 0);
    }

    #[test]
    fn mark_used_only_raises() {
        let mut cursor = AddressCursor::new();
        cursor.mark_used(AddressType::Segwit, 5);
        cursor.mark_used(AddressType::Segwit, 2);
        assert_eq!(cursor.highest_used(AddressType::Segwit), 5);
        assert_eq!(cursor.next_receive_index(AddressType::Segwit).unwrap(), 6);
        // Other types are independent.
        assert_eq!(cursor.highest_used(AddressType::Legacy), -1);
    }

    #[test]
    fn receive_cap_is_enforced() {
        let mut cursor = AddressCursor::new();
        cursor.mark_used(AddressType::Segwit, MAX_RECEIVE_ADDRESSES - 1);
        assert!(matches!(
            cursor.next_receive_index(AddressType::Segwit),
            Err(WalletError::AddressLimitReached(_))
        ));
    }

    #[test]
    fn json_roundtrip() {
        let mut cursor = AddressCursor::new();
        cursor.mark_used(AddressType::Segwit, 7);
        cursor.mark_used(AddressType::Taproot, 0);

        let json = cursor.to_json().unwrap();
        let restored = AddressCursor::from_json(&json).unwrap();
        assert_eq!(restored, cursor);
    }
}
