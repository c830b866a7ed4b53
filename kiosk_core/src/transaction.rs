//! Transaction records, dispense plans, and the state taxonomy they carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The kind of money-changing operation a transaction performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionType {
    BillToBill,
    BillToCoin,
    CoinToBill,
}

/// Transaction lifecycle state. See `kiosk_runtime::state_machine` for the
/// transition table and timeout policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxState {
    Idle,
    WaitingForBill,
    Authenticating,
    Sorting,
    WaitingForConfirmation,
    Dispensing,
    Complete,
    Cancelled,
    Error,
}

impl TxState {
    /// States from which `cancel()` transitions directly to `Cancelled`.
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        matches!(self, TxState::Idle | TxState::WaitingForBill | TxState::WaitingForConfirmation)
    }

    /// States from which no further transition is possible except the
    /// cleanup hop back to `Idle`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, TxState::Complete | TxState::Cancelled | TxState::Error)
    }
}

impl std::fmt::Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxState::Idle => "IDLE",
            TxState::WaitingForBill => "WAITING_FOR_BILL",
            TxState::Authenticating => "AUTHENTICATING",
            TxState::Sorting => "SORTING",
            TxState::WaitingForConfirmation => "WAITING_FOR_CONFIRMATION",
            TxState::Dispensing => "DISPENSING",
            TxState::Complete => "COMPLETE",
            TxState::Cancelled => "CANCELLED",
            TxState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// A unit of currency the dispense orchestrator moves: a bill denomination or
/// the local coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispenseKind {
    Bill,
    Coin,
}

/// One line of a dispense plan: dispense `count` units of `value`-denominated
/// currency of the given kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensePlanItem {
    pub denom: String,
    pub kind: DispenseKind,
    pub count: u32,
    pub value: u32,
}

impl DispensePlanItem {
    #[must_use]
    pub fn amount(&self) -> u32 {
        self.count * self.value
    }
}

/// An ordered payout plan computed by the change calculator. Bill items
/// precede coin items; order within a group is calculator-defined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensePlan {
    pub items: Vec<DispensePlanItem>,
    pub total_amount: u32,
    pub is_exact: bool,
}

impl DispensePlan {
    #[must_use]
    pub fn bill_items(&self) -> impl Iterator<Item = &DispensePlanItem> {
        self.items.iter().filter(|i| i.kind == DispenseKind::Bill)
    }

    #[must_use]
    pub fn coin_items(&self) -> impl Iterator<Item = &DispensePlanItem> {
        self.items.iter().filter(|i| i.kind == DispenseKind::Coin)
    }
}

/// Outcome of executing a dispense plan against the actuators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispenseResult {
    pub success: bool,
    pub dispensed_bills: BTreeMap<String, u32>,
    pub dispensed_coins: BTreeMap<String, u32>,
    pub total_dispensed: u32,
    pub shortfall: u32,
    pub claim_ticket_code: Option<String>,
}

/// A persisted transaction. Mirrors the `transactions` table (see
/// `kiosk_runtime::persistence`); never deleted, only ever transitioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub state: TxState,
    pub target_amount: u32,
    pub fee: u32,
    pub total_due: u32,
    pub inserted_amount: u32,
    pub dispensed_amount: u32,
    pub inserted_denominations: BTreeMap<String, u32>,
    pub selected_dispense_denoms: Vec<u32>,
    pub dispense_plan: Option<DispensePlan>,
    pub dispense_result: Option<DispenseResult>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    #[must_use]
    pub fn new(
        id: String,
        tx_type: TransactionType,
        target_amount: u32,
        fee: u32,
        selected_dispense_denoms: Vec<u32>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tx_type,
            state: TxState::Idle,
            target_amount,
            fee,
            total_due: target_amount + fee,
            inserted_amount: 0,
            dispensed_amount: 0,
            inserted_denominations: BTreeMap::new(),
            selected_dispense_denoms,
            dispense_plan: None,
            dispense_result: None,
            error_code: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}
