//! Wallet Ledger Engine CLI
//!
//! Replays a CSV of wallet operations through the accounting engine and
//! writes the final wallet states to stdout.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- operations.csv > wallets.csv
//! cargo run -- --flat-fee 10 --daily-cap 50000 operations.csv > wallets.csv
//! ```
//!
//! Input columns: `op,wallet,class,party,amount,pin,gateway,external_ref,outcome`.
//! Supported operations: `create`, `setpin`, `topup`, `transfer`,
//! `withdraw`. Rejected rows are logged to stderr and skipped.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Fatal error (invalid configuration, file not found, write failure)

use std::process;
use wallet_ledger_engine::core::WalletEngine;
use wallet_ledger_engine::{cli, io, observability};

fn main() {
    observability::init();

    let args = cli::parse_args();

    let engine = match WalletEngine::new(args.to_engine_config()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    // Replay the operations; final wallet states go to stdout.
    let mut output = std::io::stdout();
    if let Err(e) = io::run_replay(&args.input_file, &engine, &mut output) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
