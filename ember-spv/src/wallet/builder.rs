//! Transaction construction: coin selection, fees, change.
//!
//! The fee model is the standard P2WPKH vsize heuristic; the wallet only
//! ever spends native-segwit outputs, so no other input shapes matter.

use embercore::script::ScriptBuf;
use embercore::transaction::{
    OutPoint, Transaction, TxIn, TxOut, SEQUENCE_FINAL, SEQUENCE_RBF,
};

use crate::error::{WalletError, WalletResult};
use crate::wallet::utxo::Utxo;

/// Outputs below this value are not relayed by most nodes.
pub const DUST_THRESHOLD: u64 = 546;

/// Fee above which a build is assumed to be a mistake.
const ABSURD_FEE: u64 = 1_000_000;

const FEE_BASE_VBYTES: u64 = 10;
const FEE_INPUT_VBYTES: u64 = 68;
const FEE_OUTPUT_VBYTES: u64 = 31;
const FEE_WITNESS_WEIGHT_PER_INPUT: u64 = 107;

/// Options for building a transaction.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Fee rate in sats per virtual byte.
    pub fee_rate: u64,
    /// Opt the inputs into replace-by-fee.
    pub rbf: bool,
    /// Spend exactly these outpoints instead of auto-selecting.
    pub explicit_outpoints: Option<Vec<OutPoint>>,
    /// Sweep mode: spend everything, deducting the fee from the amount.
    pub subtract_fee_from_amount: bool,
}

/// A built, unsigned transaction with its selection metadata.
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    /// The unsigned transaction.
    pub tx: Transaction,
    /// The UTXOs funding it, in input order.
    pub selected: Vec<Utxo>,
    /// The fee the transaction pays.
    pub fee: u64,
    /// Value of the change output, when one exists.
    pub change_value: Option<u64>,
}

/// Estimated fee for a P2WPKH transaction shape.
///
/// `non_witness = 10 + 68*inputs + 31*outputs`, witness weight 107 per
/// input, `vsize = ceil((non_witness*4 + witness)/4)`.
pub fn estimate_fee(inputs: usize, outputs: usize, fee_rate: u64) -> u64 {
    let non_witness =
        FEE_BASE_VBYTES + FEE_INPUT_VBYTES * inputs as u64 + FEE_OUTPUT_VBYTES * outputs as u64;
    let weight = non_witness * 4 + FEE_WITNESS_WEIGHT_PER_INPUT * inputs as u64;
    let vsize = weight.div_ceil(4);
    vsize * fee_rate
}

/// Build an unsigned payment.
///
/// `available` is the wallet's spendable set. `change_script` receives
/// any remainder above dust; a sub-dust remainder is folded into the fee.
pub fn build_transaction(
    available: &[Utxo],
    recipient_script: ScriptBuf,
    amount: u64,
    change_script: ScriptBuf,
    options: &BuildOptions,
) -> WalletResult<BuiltTransaction> {
    if options.subtract_fee_from_amount {
        return build_sweep(available, recipient_script, options);
    }
    if amount <= DUST_THRESHOLD {
        return Err(WalletError::DustOutput(amount));
    }

    let selected = select_coins(available, amount, options)?;
    let total_input: u64 = selected.iter().map(|u| u.value).sum();

    // Try the two-output shape first; drop the change output when the
    // remainder is dust.
    let fee_two_out = estimate_fee(selected.len(), 2, options.fee_rate);
    let needed = amount
        .checked_add(fee_two_out)
        .ok_or(WalletError::DustOutput(amount))?;
    if total_input < needed {
        return Err(WalletError::InsufficientFunds {
            needed,
            available: total_input,
        });
    }

    let change = total_input - amount - fee_two_out;
    let (outputs, fee, change_value) = if change > DUST_THRESHOLD {
        (
            vec![
                TxOut {
                    value: amount,
                    script_pubkey: recipient_script,
                },
                TxOut {
                    value: change,
                    script_pubkey: change_script,
                },
            ],
            fee_two_out,
            Some(change),
        )
    } else {
        // Single output; the would-be change is burned into the fee.
        (
            vec![TxOut {
                value: amount,
                script_pubkey: recipient_script,
            }],
            total_input - amount,
            None,
        )
    };

    sanity_check_fee(fee)?;
    Ok(BuiltTransaction {
        tx: assemble(&selected, outputs, options.rbf),
        selected,
        fee,
        change_value,
    })
}

/// Sweep: spend every available UTXO into a single output, fee deducted
/// from the amount.
fn build_sweep(
    available: &[Utxo],
    recipient_script: ScriptBuf,
    options: &BuildOptions,
) -> WalletResult<BuiltTransaction> {
    let mut selected: Vec<Utxo> = available.iter().filter(|u| u.is_spendable()).cloned().collect();
    selected.sort_by(|a, b| b.value.cmp(&a.value));
    if selected.is_empty() {
        return Err(WalletError::InsufficientFunds {
            needed: 1,
            available: 0,
        });
    }

    let total_input: u64 = selected.iter().map(|u| u.value).sum();
    let fee = estimate_fee(selected.len(), 1, options.fee_rate);
    let value = total_input
        .checked_sub(fee)
        .ok_or(WalletError::InsufficientFunds {
            needed: fee,
            available: total_input,
        })?;
    if value <= DUST_THRESHOLD {
        return Err(WalletError::DustOutput(value));
    }

    sanity_check_fee(fee)?;
    Ok(BuiltTransaction {
        tx: assemble(
            &selected,
            vec![TxOut {
                value,
                script_pubkey: recipient_script,
            }],
            options.rbf,
        ),
        selected,
        fee,
        change_value: None,
    })
}

fn select_coins(
    available: &[Utxo],
    amount: u64,
    options: &BuildOptions,
) -> WalletResult<Vec<Utxo>> {
    if let Some(outpoints) = &options.explicit_outpoints {
        // Explicit mode: exactly the named outpoints, nothing else.
        let mut selected = Vec::with_capacity(outpoints.len());
        for outpoint in outpoints {
            let utxo = available
                .iter()
                .find(|u| u.is_spendable() && u.outpoint() == *outpoint)
                .ok_or(WalletError::UnspendableOutpoint(*outpoint))?;
            selected.push(utxo.clone());
        }
        return Ok(selected);
    }

    // Auto mode: greedily add the largest outputs until the target plus
    // the running two-output fee estimate is covered.
    let mut candidates: Vec<Utxo> =
        available.iter().filter(|u| u.is_spendable()).cloned().collect();
    candidates.sort_by(|a, b| b.value.cmp(&a.value));

    let mut selected = Vec::new();
    let mut total = 0u64;
    for utxo in candidates {
        total += utxo.value;
        selected.push(utxo);
        if total >= amount + estimate_fee(selected.len(), 2, options.fee_rate) {
            return Ok(selected);
        }
    }

    Err(WalletError::InsufficientFunds {
        needed: amount + estimate_fee(selected.len().max(1), 2, options.fee_rate),
        available: total,
    })
}

fn assemble(selected: &[Utxo], outputs: Vec<TxOut>, rbf: bool) -> Transaction {
    let sequence = if rbf { SEQUENCE_RBF } else { SEQUENCE_FINAL };
    Transaction {
        version: 2,
        lock_time: 0,
        input: selected
            .iter()
            .map(|u| TxIn {
                previous_output: u.outpoint(),
                script_sig: ScriptBuf::new(),
                sequence,
                witness: Vec::new(),
            })
            .collect(),
        output: outputs,
    }
}

fn sanity_check_fee(fee: u64) -> WalletResult<()> {
    if fee > ABSURD_FEE {
        tracing::warn!("Transaction fee {} sats looks absurdly high", fee);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use embercore::hashes::Txid;

    fn utxo(salt: u8, value: u64) -> Utxo {
        Utxo {
            txid: Txid::from_byte_array([salt; 32]),
            vout: 0,
            value,
            script_pub_key: ScriptBuf::new_witness_program(0, &[salt; 20]),
            address: format!("em1q-test-{}", salt),
            block_height: Some(10),
            confirmed: true,
            frozen: false,
        }
    }

    fn recipient() -> ScriptBuf {
        ScriptBuf::new_witness_program(0, &[0xAA; 20])
    }

    fn change() -> ScriptBuf {
        ScriptBuf::new_witness_program(0, &[0xBB; 20])
    }

    #[test]
    fn fee_formula_matches_the_heuristic() {
        // 1 input, 1 output: non_witness = 10 + 68 + 31 = 109;
        // vsize = ceil((436 + 107)/4) = 136.
        assert_eq!(estimate_fee(1, 1, 1), 136);
        // 2 inputs, 2 outputs: non_witness = 10 + 136 + 62 = 208;
        // vsize = ceil((832 + 214)/4) = 262.
        assert_eq!(estimate_fee(2, 2, 1), 262);
        assert_eq!(estimate_fee(2, 2, 3), 262 * 3);
    }

    #[test]
    fn spend_with_change_selects_largest_first() {
        let available = vec![utxo(1, 100_000), utxo(2, 50_000)];
        let options = BuildOptions {
            fee_rate: 2,
            ..Default::default()
        };
        let built =
            build_transaction(&available, recipient(), 120_000, change(), &options).unwrap();

        // Both inputs needed, largest first.
        assert_eq!(built.selected.len(), 2);
        assert_eq!(built.selected[0].value, 100_000);
        assert_eq!(built.tx.output.len(), 2);
        assert_eq!(built.tx.output[0].value, 120_000);

        let fee = estimate_fee(2, 2, 2);
        assert_eq!(built.fee, fee);
        assert_eq!(built.change_value, Some(150_000 - 120_000 - fee));

        // Conservation: inputs = outputs + fee.
        let out_total: u64 = built.tx.output.iter().map(|o| o.value).sum();
        assert_eq!(150_000, out_total + built.fee);
    }

    #[test]
    fn small_utxo_skipped_when_one_suffices() {
        let available = vec![utxo(1, 100_000), utxo(2, 50_000)];
        let options = BuildOptions {
            fee_rate: 1,
            ..Default::default()
        };
        let built =
            build_transaction(&available, recipient(), 30_000, change(), &options).unwrap();
        assert_eq!(built.selected.len(), 1);
        assert_eq!(built.selected[0].value, 100_000);
    }

    #[test]
    fn insufficient_funds_reports_deficit() {
        let available = vec![utxo(1, 10_000)];
        let options = BuildOptions {
            fee_rate: 1,
            ..Default::default()
        };
        let err = build_transaction(&available, recipient(), 50_000, change(), &options)
            .unwrap_err();
        match err {
            WalletError::InsufficientFunds { needed, available } => {
                assert!(needed > 50_000);
                assert_eq!(available, 10_000);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn dust_change_is_folded_into_fee() {
        // Input barely above amount + fee: change would be sub-dust.
        let fee = estimate_fee(1, 2, 1);
        let available = vec![utxo(1, 20_000 + fee + 100)];
        let options = BuildOptions {
            fee_rate: 1,
            ..Default::default()
        };
        let built = build_transaction(&available, recipient(), 20_000, change(), &options).unwrap();
        assert_eq!(built.tx.output.len(), 1);
        assert_eq!(built.change_value, None);
        assert_eq!(built.fee, fee + 100);
    }

    #[test]
    fn explicit_outpoints_are_honored() {
        let available = vec![utxo(1, 100_000), utxo(2, 60_000)];
        let options = BuildOptions {
            fee_rate: 1,
            explicit_outpoints: Some(vec![available[1].outpoint()]),
            ..Default::default()
        };
        let built = build_transaction(&available, recipient(), 50_000, change(), &options).unwrap();
        assert_eq!(built.selected.len(), 1);
        assert_eq!(built.selected[0].value, 60_000);

        // Explicit selection that cannot cover the payment fails.
        let options = BuildOptions {
            fee_rate: 1,
            explicit_outpoints: Some(vec![available[1].outpoint()]),
            ..Default::default()
        };
        assert!(build_transaction(&available, recipient(), 70_000, change(), &options).is_err());
    }

    #[test]
    fn sweep_spends_everything_minus_fee() {
        let available = vec![utxo(1, 50_000), utxo(2, 50_000)];
        let options = BuildOptions {
            fee_rate: 1,
            subtract_fee_from_amount: true,
            ..Default::default()
        };
        let built = build_transaction(&available, recipient(), 0, change(), &options).unwrap();

        let fee = estimate_fee(2, 1, 1);
        assert_eq!(built.tx.input.len(), 2);
        assert_eq!(built.tx.output.len(), 1);
        assert_eq!(built.tx.output[0].value, 100_000 - fee);
        assert_eq!(built.fee, fee);
        assert!(built.fee > 0);
        assert!(built.tx.output[0].value > DUST_THRESHOLD);
    }

    #[test]
    fn rbf_flag_sets_the_sequence() {
        let available = vec![utxo(1, 100_000)];
        let rbf = BuildOptions {
            fee_rate: 1,
            rbf: true,
            ..Default::default()
        };
        let built = build_transaction(&available, recipient(), 30_000, change(), &rbf).unwrap();
        assert_eq!(built.tx.input[0].sequence, SEQUENCE_RBF);

        let no_rbf = BuildOptions {
            fee_rate: 1,
            ..Default::default()
        };
        let built = build_transaction(&available, recipient(), 30_000, change(), &no_rbf).unwrap();
        assert_eq!(built.tx.input[0].sequence, SEQUENCE_FINAL);
    }

    #[test]
    fn frozen_and_unconfirmed_are_never_selected() {
        let mut frozen = utxo(1, 100_000);
        frozen.frozen = true;
        let mut unconfirmed = utxo(2, 100_000);
        unconfirmed.confirmed = false;
        let available = vec![frozen, unconfirmed, utxo(3, 40_000)];

        let options = BuildOptions {
            fee_rate: 1,
            ..Default::default()
        };
        let built = build_transaction(&available, recipient(), 30_000, change(), &options).unwrap();
        assert_eq!(built.selected.len(), 1);
        assert_eq!(built.selected[0].value, 40_000);
    }
}
