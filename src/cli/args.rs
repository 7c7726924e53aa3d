use crate::config::EngineConfig;
use crate::policy::FeeSchedule;
use clap::Parser;
use std::path::PathBuf;

/// Replay wallet operations through the accounting engine
#[derive(Parser, Debug)]
#[command(name = "wallet-ledger-engine")]
#[command(about = "Replay wallet operations through the accounting engine", long_about = None)]
pub struct CliArgs {
    /// Input CSV file path containing operation records
    #[arg(value_name = "INPUT", help = "Path to the input CSV file")]
    pub input_file: PathBuf,

    /// Id of the platform wallet that collects fees
    #[arg(
        long = "platform-wallet",
        value_name = "ID",
        help = "Platform fee wallet id (default: platform)"
    )]
    pub platform_wallet: Option<String>,

    /// Replace the tiered fee schedule with one flat fee
    #[arg(
        long = "flat-fee",
        value_name = "AMOUNT",
        help = "Charge one flat fee in minor units for every operation"
    )]
    pub flat_fee: Option<u64>,

    /// Cap on a single transfer or withdrawal
    #[arg(
        long = "per-tx-cap",
        value_name = "AMOUNT",
        help = "Per-transaction cap in minor units (default: 50000)"
    )]
    pub per_tx_cap: Option<u64>,

    /// Rolling daily cap on outbound spend
    #[arg(
        long = "daily-cap",
        value_name = "AMOUNT",
        help = "Daily spending cap in minor units (default: 50000)"
    )]
    pub daily_cap: Option<u64>,
}

impl CliArgs {
    /// Build the engine configuration from CLI arguments
    ///
    /// Starts from the default policy configuration and applies any
    /// overrides provided on the command line.
    pub fn to_engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(platform_wallet) = &self.platform_wallet {
            config.platform_wallet = platform_wallet.clone();
        }
        if let Some(flat_fee) = self.flat_fee {
            config.fees = FeeSchedule::flat(flat_fee);
        }
        if let Some(per_tx_cap) = self.per_tx_cap {
            config.limits.per_tx_cap = per_tx_cap;
        }
        if let Some(daily_cap) = self.daily_cap {
            config.limits.daily_cap = daily_cap;
        }
        config
    }
}
