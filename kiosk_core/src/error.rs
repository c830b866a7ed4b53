//! Error taxonomy shared by every layer of the kiosk control core.
//!
//! Each kind from the design is its own `thiserror` enum, mirroring the split
//! the teacher crate uses between transport, command, and pool errors rather
//! than a single crate-wide catch-all.

use crate::denom::BillDenom;
use crate::transaction::TxState;
use std::time::Duration;
use thiserror::Error;

/// A wire-level error code reported by a peripheral controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ParseError,
    UnknownCmd,
    InvalidDenom,
    InvalidCount,
    NotHomed,
    Jam,
    Empty,
    Timeout,
    MotorFault,
    LockedOut,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::UnknownCmd => "UNKNOWN_CMD",
            ErrorCode::InvalidDenom => "INVALID_DENOM",
            ErrorCode::InvalidCount => "INVALID_COUNT",
            ErrorCode::NotHomed => "NOT_HOMED",
            ErrorCode::Jam => "JAM",
            ErrorCode::Empty => "EMPTY",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::MotorFault => "MOTOR_FAULT",
            ErrorCode::LockedOut => "LOCKED_OUT",
        };
        f.write_str(s)
    }
}

/// I/O failure opening or writing to a serial link.
#[derive(Debug, Clone, Error)]
#[error("serial error on {port}: {message}")]
pub struct SerialError {
    pub port: String,
    pub message: String,
}

/// No response arrived within the command's time budget.
#[derive(Debug, Clone, Error)]
#[error("timeout waiting for {command} after {elapsed:?}")]
pub struct TimeoutError {
    pub command: String,
    pub elapsed: Duration,
}

/// A structured error reported by firmware in an `{status:"ERROR", ...}` frame.
#[derive(Debug, Clone, Error)]
#[error("hardware error {code}{}", dispensed.map(|d| format!(" (dispensed {d})")).unwrap_or_default())]
pub struct HardwareError {
    pub code: ErrorCode,
    pub dispensed: Option<u32>,
}

impl HardwareError {
    #[must_use]
    pub fn new(code: ErrorCode, dispensed: Option<u32>) -> Self {
        Self { code, dispensed }
    }
}

/// Attempted state-machine transition is not in the valid transition table.
#[derive(Debug, Clone, Error)]
#[error("invalid transition from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: TxState,
    pub to: TxState,
}

/// An orchestrator precondition was violated (active-transaction conflict,
/// tamper lockout, wrong state for the requested operation).
#[derive(Debug, Clone, Error)]
#[error("transaction {tx_id}: {message}")]
pub struct TransactionError {
    pub tx_id: String,
    pub message: String,
}

/// The change calculator could not make exact change from available inventory.
#[derive(Debug, Clone, Error)]
#[error("insufficient inventory: requested {requested}, available {available}, shortfall {shortfall}")]
pub struct InsufficientInventory {
    pub requested: u32,
    pub available: u32,
    pub shortfall: u32,
}

/// A bill denomination's storage slot has reached capacity.
#[derive(Debug, Clone, Error)]
#[error("storage full for {denom}")]
pub struct StorageFull {
    pub denom: BillDenom,
}

/// Unified error type for operations that can fail for more than one reason.
/// Prefer the specific structs above at call sites that only produce one kind;
/// use `KioskError` at the seams where multiple kinds are actually possible
/// (orchestrator entry points, the bill-acceptance pipeline).
#[derive(Debug, Clone, Error)]
pub enum KioskError {
    #[error(transparent)]
    Serial(#[from] SerialError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    InsufficientInventory(#[from] InsufficientInventory),
    #[error(transparent)]
    StorageFull(#[from] StorageFull),
    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type KioskResult<T> = Result<T, KioskError>;
