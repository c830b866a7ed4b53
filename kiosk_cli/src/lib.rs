use clap::{Parser, Subcommand, ValueEnum};

pub mod transaction;

/// Thin operator exerciser for the kiosk control core: stands in for the
/// out-of-scope HTTP surface during development and bring-up against the
/// in-process simulators.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML config file (falls back to defaults, then
    /// `KIOSK_*` environment overrides)
    #[arg(short, long)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum TxKind {
    BillToBill,
    BillToCoin,
    CoinToBill,
}

impl From<TxKind> for kiosk_core::transaction::TransactionType {
    fn from(kind: TxKind) -> Self {
        match kind {
            TxKind::BillToBill => kiosk_core::transaction::TransactionType::BillToBill,
            TxKind::BillToCoin => kiosk_core::transaction::TransactionType::BillToCoin,
            TxKind::CoinToBill => kiosk_core::transaction::TransactionType::CoinToBill,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a new transaction
    Start {
        #[arg(long, value_enum)]
        kind: TxKind,

        /// Target amount to change, in the smallest currency unit
        #[arg(long)]
        amount: u32,

        #[arg(long, default_value_t = 0)]
        fee: u32,

        /// Denomination values the customer is willing to receive
        #[arg(long, value_delimiter = ',')]
        selected: Vec<u32>,
    },

    /// Run one bill-acceptance cycle against the session's active transaction
    AcceptBill,

    /// Insert a coin into the session's active transaction
    InsertCoin {
        denom: u32,

        #[arg(default_value_t = 1)]
        count: u32,
    },

    /// Confirm the active transaction and dispense
    Confirm,

    /// Cancel the active transaction
    Cancel,

    /// Print the active transaction's current state
    Status,
}
