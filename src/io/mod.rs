//! I/O module
//!
//! CSV handling for the replay binary: an operations CSV is driven
//! through the engine and the final wallet states are written as CSV.
//!
//! Malformed or rejected rows are logged and skipped; processing
//! continues with the next row. Only I/O-level faults (unreadable file,
//! broken output) are fatal.

use crate::core::engine::WalletEngine;
use crate::types::{Amount, Direction, GatewayEvent, Wallet, WalletClass};
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use tracing::warn;

/// One row of the operations CSV
///
/// Columns: `op,wallet,class,party,amount,pin,gateway,external_ref,outcome`.
/// Most columns are optional; which ones are required depends on `op`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OpRecord {
    /// Operation name: create, setpin, topup, transfer, withdraw
    pub op: String,

    /// Wallet the operation acts on (the payer, for transfers)
    pub wallet: String,

    /// Wallet class for `create` (USER, BUSINESS, PLATFORM)
    #[serde(default)]
    pub class: Option<String>,

    /// Counterparty wallet for `transfer`
    #[serde(default)]
    pub party: Option<String>,

    /// Amount in minor units
    #[serde(default)]
    pub amount: Option<String>,

    /// Wallet PIN for `setpin`, `transfer`, `withdraw`
    #[serde(default)]
    pub pin: Option<String>,

    /// Gateway name for `topup`
    #[serde(default)]
    pub gateway: Option<String>,

    /// Gateway transaction id for `topup`
    #[serde(default)]
    pub external_ref: Option<String>,

    /// For `withdraw`: apply a payout outcome immediately
    /// ("success" or "failure"); empty leaves the withdrawal queued
    #[serde(default)]
    pub outcome: Option<String>,
}

/// A validated replay operation
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Create a wallet with an explicit class
    Create {
        /// Wallet id
        wallet: String,
        /// Wallet class
        class: WalletClass,
    },

    /// Set the wallet PIN
    SetPin {
        /// Wallet id
        wallet: String,
        /// New PIN
        pin: String,
    },

    /// Inbound collection credit
    Topup {
        /// Wallet id
        wallet: String,
        /// Gateway name
        gateway: String,
        /// Gateway transaction id
        external_ref: String,
        /// Amount in minor units
        amount: Amount,
    },

    /// Internal transfer
    Transfer {
        /// Payer wallet id
        payer: String,
        /// Payee wallet id
        payee: String,
        /// Amount in minor units
        amount: Amount,
        /// Payer PIN
        pin: String,
    },

    /// OTP withdrawal (request + confirm), optionally settled in-row
    Withdraw {
        /// Wallet id
        wallet: String,
        /// Amount in minor units
        amount: Amount,
        /// Wallet PIN
        pin: String,
        /// `Some(true)`/`Some(false)` applies the payout outcome
        outcome: Option<bool>,
    },
}

/// A non-empty, trimmed field, or an error naming what is missing
fn required(field: &Option<String>, what: &str, op: &str, wallet: &str) -> Result<String, String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| format!("{} for {} requires a {}", op, wallet, what))
}

/// Parse the amount column as integer minor units
fn parse_amount(field: &Option<String>, op: &str, wallet: &str) -> Result<Amount, String> {
    let raw = required(field, "amount", op, wallet)?;
    raw.parse::<Amount>()
        .map_err(|_| format!("invalid amount '{}' for {}", raw, wallet))
}

/// Convert a CSV row to a validated operation
///
/// # Errors
///
/// Returns a message describing the first missing or malformed field;
/// the caller logs it and skips the row.
pub fn convert_op_record(record: OpRecord) -> Result<Operation, String> {
    if record.wallet.trim().is_empty() {
        return Err(format!("{} row without a wallet id", record.op));
    }
    let op = record.op.trim().to_lowercase();
    let wallet = record.wallet.trim().to_string();

    match op.as_str() {
        "create" => {
            let class = match record.class.as_deref().map(str::trim) {
                Some("USER") | None => WalletClass::User,
                Some("BUSINESS") => WalletClass::Business,
                Some("PLATFORM") => WalletClass::Platform,
                Some(other) => return Err(format!("invalid wallet class '{}'", other)),
            };
            Ok(Operation::Create { wallet, class })
        }
        "setpin" => {
            let pin = required(&record.pin, "pin", &op, &wallet)?;
            Ok(Operation::SetPin { wallet, pin })
        }
        "topup" => {
            let gateway = required(&record.gateway, "gateway", &op, &wallet)?;
            let external_ref = required(&record.external_ref, "external_ref", &op, &wallet)?;
            let amount = parse_amount(&record.amount, &op, &wallet)?;
            Ok(Operation::Topup {
                wallet,
                gateway,
                external_ref,
                amount,
            })
        }
        "transfer" => {
            let payee = required(&record.party, "party", &op, &wallet)?;
            let amount = parse_amount(&record.amount, &op, &wallet)?;
            let pin = required(&record.pin, "pin", &op, &wallet)?;
            Ok(Operation::Transfer {
                payer: wallet,
                payee,
                amount,
                pin,
            })
        }
        "withdraw" => {
            let outcome = match record.outcome.as_deref().map(str::trim) {
                None | Some("") => None,
                Some("success") => Some(true),
                Some("failure") => Some(false),
                Some(other) => return Err(format!("invalid outcome '{}'", other)),
            };
            let amount = parse_amount(&record.amount, &op, &wallet)?;
            let pin = required(&record.pin, "pin", &op, &wallet)?;
            Ok(Operation::Withdraw {
                wallet,
                amount,
                pin,
                outcome,
            })
        }
        other => Err(format!("invalid operation '{}'", other)),
    }
}

/// Apply one operation to the engine
///
/// # Errors
///
/// Propagates the engine's rejection message; the caller logs it and
/// continues.
pub fn apply_operation(engine: &WalletEngine, operation: Operation) -> Result<(), String> {
    match operation {
        Operation::Create { wallet, class } => {
            engine
                .create_wallet(&wallet, class)
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        Operation::SetPin { wallet, pin } => {
            engine.set_pin(&wallet, &pin).map_err(|e| e.to_string())
        }
        Operation::Topup {
            wallet,
            gateway,
            external_ref,
            amount,
        } => engine
            .on_collection_event(&GatewayEvent {
                gateway,
                external_ref,
                wallet_id: wallet,
                amount,
                direction: Direction::Credit,
            })
            .map(|_| ())
            .map_err(|e| e.to_string()),
        Operation::Transfer {
            payer,
            payee,
            amount,
            pin,
        } => engine
            .transfer(&payer, &payee, amount, &pin)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        Operation::Withdraw {
            wallet,
            amount,
            pin,
            outcome,
        } => {
            let issued = engine
                .request_withdraw_otp(&wallet, amount, &pin)
                .map_err(|e| e.to_string())?;
            let receipt = engine
                .confirm_withdraw(&wallet, &issued.code)
                .map_err(|e| e.to_string())?;
            if let Some(success) = outcome {
                engine
                    .on_payout_outcome(&crate::types::PayoutOutcome {
                        reference: receipt.reference,
                        success,
                        amount: Some(amount),
                        reason: None,
                    })
                    .map_err(|e| e.to_string())?;
            }
            Ok(())
        }
    }
}

/// Replay an operations CSV through the engine and write wallet states
///
/// Rejected rows are logged and skipped, matching the recoverable-error
/// policy of the engine: a bad row must not abort the replay.
///
/// # Errors
///
/// Only I/O-level faults are fatal: unreadable input, broken output.
pub fn run_replay(
    input_path: &Path,
    engine: &WalletEngine,
    output: &mut dyn Write,
) -> Result<(), String> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(input_path)
        .map_err(|e| format!("cannot open {}: {}", input_path.display(), e))?;

    for (index, row) in reader.deserialize::<OpRecord>().enumerate() {
        let line = index + 2; // header is line 1
        let record = match row {
            Ok(record) => record,
            Err(e) => {
                warn!(line, error = %e, "skipping malformed row");
                continue;
            }
        };
        match convert_op_record(record).and_then(|op| apply_operation(engine, op)) {
            Ok(()) => {}
            Err(reason) => warn!(line, reason = reason.as_str(), "row rejected"),
        }
    }

    write_wallets_csv(&engine.wallets_snapshot(), output)
}

/// Write wallet states as CSV: `wallet,class,balance,frozen`
///
/// Wallets are already sorted by id for deterministic output.
///
/// # Errors
///
/// Returns a message on write failure.
pub fn write_wallets_csv(wallets: &[Wallet], output: &mut dyn Write) -> Result<(), String> {
    let mut writer = csv::Writer::from_writer(output);
    writer
        .write_record(["wallet", "class", "balance", "frozen"])
        .map_err(|e| format!("write error: {}", e))?;

    for wallet in wallets {
        let class = match wallet.class {
            WalletClass::User => "USER",
            WalletClass::Business => "BUSINESS",
            WalletClass::Platform => "PLATFORM",
        };
        writer
            .write_record([
                wallet.id.as_str(),
                class,
                &wallet.balance.to_string(),
                &wallet.frozen.to_string(),
            ])
            .map_err(|e| format!("write error: {}", e))?;
    }
    writer.flush().map_err(|e| format!("write error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn record(op: &str, wallet: &str) -> OpRecord {
        OpRecord {
            op: op.to_string(),
            wallet: wallet.to_string(),
            class: None,
            party: None,
            amount: None,
            pin: None,
            gateway: None,
            external_ref: None,
            outcome: None,
        }
    }

    #[test]
    fn test_convert_create_defaults_to_user() {
        let op = convert_op_record(record("create", "alice")).unwrap();
        assert_eq!(
            op,
            Operation::Create {
                wallet: "alice".to_string(),
                class: WalletClass::User
            }
        );
    }

    #[test]
    fn test_convert_topup() {
        let mut row = record("topup", "alice");
        row.gateway = Some("MPESA".to_string());
        row.external_ref = Some("X1".to_string());
        row.amount = Some("500".to_string());

        let op = convert_op_record(row).unwrap();
        assert_eq!(
            op,
            Operation::Topup {
                wallet: "alice".to_string(),
                gateway: "MPESA".to_string(),
                external_ref: "X1".to_string(),
                amount: 500,
            }
        );
    }

    #[rstest]
    #[case::unknown_op("teleport", "alice")]
    #[case::empty_wallet("topup", "")]
    fn test_convert_rejects_bad_rows(#[case] op: &str, #[case] wallet: &str) {
        assert!(convert_op_record(record(op, wallet)).is_err());
    }

    #[test]
    fn test_convert_transfer_requires_party_amount_pin() {
        let mut row = record("transfer", "alice");
        assert!(convert_op_record(row.clone()).is_err());

        row.party = Some("bob".to_string());
        row.amount = Some("200".to_string());
        row.pin = Some("1234".to_string());
        let op = convert_op_record(row).unwrap();
        assert_eq!(
            op,
            Operation::Transfer {
                payer: "alice".to_string(),
                payee: "bob".to_string(),
                amount: 200,
                pin: "1234".to_string(),
            }
        );
    }

    #[test]
    fn test_convert_withdraw_outcomes() {
        let mut row = record("withdraw", "alice");
        row.amount = Some("300".to_string());
        row.pin = Some("1234".to_string());

        row.outcome = Some("success".to_string());
        assert!(matches!(
            convert_op_record(row.clone()).unwrap(),
            Operation::Withdraw {
                outcome: Some(true),
                ..
            }
        ));

        row.outcome = Some("failure".to_string());
        assert!(matches!(
            convert_op_record(row.clone()).unwrap(),
            Operation::Withdraw {
                outcome: Some(false),
                ..
            }
        ));

        row.outcome = Some("maybe".to_string());
        assert!(convert_op_record(row).is_err());
    }

    #[test]
    fn test_convert_rejects_malformed_amount() {
        let mut row = record("topup", "alice");
        row.gateway = Some("MPESA".to_string());
        row.external_ref = Some("X1".to_string());
        row.amount = Some("12.5".to_string());
        assert!(convert_op_record(row).is_err());
    }

    #[test]
    fn test_write_wallets_csv_format() {
        use crate::core::clock::SystemClock;
        use crate::core::Clock;

        let now = SystemClock.now();
        let wallets = vec![
            Wallet::new("alice", WalletClass::User, now),
            Wallet::new("platform", WalletClass::Platform, now),
        ];

        let mut buffer = Vec::new();
        write_wallets_csv(&wallets, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert_eq!(
            text,
            "wallet,class,balance,frozen\nalice,USER,0,false\nplatform,PLATFORM,0,false\n"
        );
    }
}
