//! Tokio-native orchestration engine for the money-changer kiosk control
//! core: transport, state, persistence, the transaction state machine, the
//! bill-acceptance pipeline, the dispense orchestrator, and the `Kiosk`
//! lifecycle object that wires them together.

pub mod bill_pipeline;
pub mod config;
pub mod dispatcher;
pub mod dispense;
pub mod kiosk;
pub mod orchestrator;
pub mod persistence;
pub mod sim;
pub mod state_machine;
pub mod state_store;
pub mod transport;

pub use config::KioskConfig;
pub use kiosk::Kiosk;
pub use orchestrator::TransactionOrchestrator;
pub use persistence::PersistenceStore;
pub use state_store::MachineStateStore;
