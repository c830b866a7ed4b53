//! Domain types, wire protocol, and pure algorithms for the money-changer
//! kiosk control core: the denomination catalog, transaction/WAL/machine
//! state data model, the serial wire protocol, and the change calculator.
//!
//! This crate has no I/O and no async runtime dependency; everything here is
//! data plus pure functions, consumed by `kiosk_host` and `kiosk_runtime`.

pub mod change;
pub mod denom;
pub mod error;
pub mod machine;
pub mod transaction;
pub mod wal;
pub mod wire;
