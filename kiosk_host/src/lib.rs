//! Capability traits (`Gpio`, `Camera`, `Authenticator`, `SerialLink`) and the
//! typed command wrappers built over them. Hardware-backed and simulator
//! implementations of the capability traits live in `kiosk_runtime`; this
//! crate only defines the contracts and the thin typed layer over the link.

pub mod bill_controller;
pub mod capability;
pub mod coin_controller;
pub mod error;

pub use bill_controller::BillController;
pub use coin_controller::CoinSecurityController;
