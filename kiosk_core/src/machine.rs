//! Machine state snapshot types: the read-mostly value the state store hands
//! out to callers and broadcasts on change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceConnectionState {
    Connected,
    Disconnected,
    Connecting,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub connection: Option<DeviceConnectionState>,
    pub firmware: Option<String>,
    pub last_ping: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl DeviceStatus {
    #[must_use]
    pub fn disconnected() -> Self {
        Self {
            connection: Some(DeviceConnectionState::Disconnected),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SorterState {
    pub homed: bool,
    pub position: u32,
    pub slot: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityState {
    pub locked: bool,
    pub tamper_active: bool,
    pub last_tamper_sensor: Option<String>,
    pub last_tamper_time: Option<DateTime<Utc>>,
}

/// Consumable inventory and the alert set derived from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumablesState {
    pub bill_storage_counts: BTreeMap<String, u32>,
    pub bill_dispenser_counts: BTreeMap<String, u32>,
    pub coin_counts: BTreeMap<String, u32>,
    pub alerts: BTreeSet<String>,
}

/// Immutable, deep-copied view of the whole machine, as returned by
/// `MachineStateStore::snapshot`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineStateSnapshot {
    pub bill_device: DeviceStatus,
    pub coin_device: DeviceStatus,
    pub sorter: SorterState,
    pub security: SecurityState,
    pub consumables: ConsumablesState,
}

/// Alert prefixes. An alert string is always `<PREFIX>:<key>`.
pub mod alert_prefix {
    pub const LOW_BILL: &str = "LOW_BILL:";
    pub const EMPTY_BILL: &str = "EMPTY_BILL:";
    pub const LOW_COIN: &str = "LOW_COIN:";
    pub const EMPTY_COIN: &str = "EMPTY_COIN:";
    pub const STORAGE_FULL: &str = "STORAGE_FULL:";
}
