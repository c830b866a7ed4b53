//! Machine State Store (§4.1): thread-safe ownership of device connection,
//! sorter, security, and consumables state, with alert derivation.

use crate::config::KioskConfig;
use kiosk_core::denom::BillDenom;
use kiosk_core::machine::{
    alert_prefix, ConsumablesState, DeviceConnectionState, DeviceStatus, MachineStateSnapshot,
    SecurityState, SorterState,
};
use chrono::Utc;
use std::sync::{Arc, Mutex};

/// Callback invoked after a mutation releases the writer lock, used by the
/// event dispatcher to coalesce status broadcasts. Mirrors the source's
/// `MachineStatus.set_on_change`.
pub type OnChange = Box<dyn Fn(&MachineStateSnapshot) + Send + Sync>;

struct Inner {
    bill_device: DeviceStatus,
    coin_device: DeviceStatus,
    sorter: SorterState,
    security: SecurityState,
    consumables: ConsumablesState,
}

/// Thread-safe machine state. A single `Mutex` serializes mutations;
/// `snapshot()` takes the lock only long enough to clone. Registered
/// `on_change` callbacks run *after* the lock is released.
pub struct MachineStateStore {
    inner: Mutex<Inner>,
    storage_slot_capacity: u32,
    low_bill_threshold: u32,
    low_coin_threshold: u32,
    on_change: Mutex<Vec<OnChange>>,
}

impl MachineStateStore {
    #[must_use]
    pub fn new(config: &KioskConfig) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                bill_device: DeviceStatus::disconnected(),
                coin_device: DeviceStatus::disconnected(),
                sorter: SorterState::default(),
                security: SecurityState::default(),
                consumables: ConsumablesState::default(),
            }),
            storage_slot_capacity: config.storage_slot_capacity,
            low_bill_threshold: config.low_bill_threshold,
            low_coin_threshold: config.low_coin_threshold,
            on_change: Mutex::new(Vec::new()),
        })
    }

    /// Register a callback fired (outside the writer lock) after every mutation.
    pub fn on_change(&self, callback: OnChange) {
        self.on_change.lock().expect("state store lock poisoned").push(callback);
    }

    #[must_use]
    pub fn snapshot(&self) -> MachineStateSnapshot {
        let inner = self.inner.lock().expect("state store lock poisoned");
        MachineStateSnapshot {
            bill_device: inner.bill_device.clone(),
            coin_device: inner.coin_device.clone(),
            sorter: inner.sorter.clone(),
            security: inner.security.clone(),
            consumables: inner.consumables.clone(),
        }
    }

    fn notify(&self) {
        let snapshot = self.snapshot();
        let callbacks = self.on_change.lock().expect("state store lock poisoned");
        for callback in callbacks.iter() {
            callback(&snapshot);
        }
    }

    pub fn update_bill_device(
        &self,
        connection: Option<DeviceConnectionState>,
        firmware: Option<String>,
        last_error: Option<String>,
    ) {
        {
            let mut inner = self.inner.lock().expect("state store lock poisoned");
            apply_device_update(&mut inner.bill_device, connection, firmware, last_error);
        }
        self.notify();
    }

    pub fn update_coin_device(
        &self,
        connection: Option<DeviceConnectionState>,
        firmware: Option<String>,
        last_error: Option<String>,
    ) {
        {
            let mut inner = self.inner.lock().expect("state store lock poisoned");
            apply_device_update(&mut inner.coin_device, connection, firmware, last_error);
        }
        self.notify();
    }

    pub fn update_sorter(&self, homed: Option<bool>, position: Option<u32>, slot: Option<u8>) {
        {
            let mut inner = self.inner.lock().expect("state store lock poisoned");
            if let Some(homed) = homed {
                inner.sorter.homed = homed;
            }
            if let Some(position) = position {
                inner.sorter.position = position;
            }
            if let Some(slot) = slot {
                inner.sorter.slot = Some(slot);
            }
        }
        self.notify();
    }

    pub fn update_security(
        &self,
        locked: Option<bool>,
        tamper_active: Option<bool>,
        tamper_sensor: Option<String>,
    ) {
        {
            let mut inner = self.inner.lock().expect("state store lock poisoned");
            if let Some(locked) = locked {
                inner.security.locked = locked;
            }
            if let Some(tamper_active) = tamper_active {
                inner.security.tamper_active = tamper_active;
                if tamper_active {
                    inner.security.last_tamper_time = Some(Utc::now());
                }
            }
            if let Some(sensor) = tamper_sensor {
                inner.security.last_tamper_sensor = Some(sensor);
            }
        }
        self.notify();
    }

    /// `storage_key` is PHP's own denom string for PHP bills, `"USD"`/`"EUR"` otherwise.
    pub fn increment_bill_storage(&self, denom: BillDenom, count: u32) {
        {
            let mut inner = self.inner.lock().expect("state store lock poisoned");
            let key = denom.storage_key();
            let entry = inner.consumables.bill_storage_counts.entry(key.clone()).or_insert(0);
            *entry += count;
            recompute_storage_alerts(&mut inner.consumables, &key, self.storage_slot_capacity);
        }
        self.notify();
    }

    /// Restores `count` units into the per-unit dispenser inventory, signed
    /// so dispense-orchestrator reconciliation can add back unused reservations
    /// with a single call instead of a read-then-replace round trip.
    pub fn increment_bill_dispenser(&self, denom: BillDenom, count: u32) {
        {
            let mut inner = self.inner.lock().expect("state store lock poisoned");
            let key = denom.wire_value_string();
            let entry = inner.consumables.bill_dispenser_counts.entry(key.clone()).or_insert(0);
            *entry += count;
            recompute_dispenser_alerts(&mut inner.consumables, &key, self.low_bill_threshold);
        }
        self.notify();
    }

    pub fn decrement_bill_dispenser(&self, denom: BillDenom, count: u32) {
        {
            let mut inner = self.inner.lock().expect("state store lock poisoned");
            let key = denom.wire_value_string();
            let entry = inner.consumables.bill_dispenser_counts.entry(key.clone()).or_insert(0);
            *entry = entry.saturating_sub(count);
            recompute_dispenser_alerts(&mut inner.consumables, &key, self.low_bill_threshold);
        }
        self.notify();
    }

    pub fn increment_coin(&self, denom_value: u32, count: u32) {
        {
            let mut inner = self.inner.lock().expect("state store lock poisoned");
            let key = denom_value.to_string();
            let entry = inner.consumables.coin_counts.entry(key.clone()).or_insert(0);
            *entry += count;
            recompute_coin_alerts(&mut inner.consumables, &key, self.low_coin_threshold);
        }
        self.notify();
    }

    pub fn decrement_coin(&self, denom_value: u32, count: u32) {
        {
            let mut inner = self.inner.lock().expect("state store lock poisoned");
            let key = denom_value.to_string();
            let entry = inner.consumables.coin_counts.entry(key.clone()).or_insert(0);
            *entry = entry.saturating_sub(count);
            recompute_coin_alerts(&mut inner.consumables, &key, self.low_coin_threshold);
        }
        self.notify();
    }

    pub fn set_dispenser_counts(&self, counts: std::collections::BTreeMap<String, u32>) {
        {
            let mut inner = self.inner.lock().expect("state store lock poisoned");
            let threshold = self.low_bill_threshold;
            inner.consumables.bill_dispenser_counts = counts;
            let keys: Vec<String> = inner.consumables.bill_dispenser_counts.keys().cloned().collect();
            for key in keys {
                recompute_dispenser_alerts(&mut inner.consumables, &key, threshold);
            }
        }
        self.notify();
    }

    pub fn set_coin_counts(&self, counts: std::collections::BTreeMap<String, u32>) {
        {
            let mut inner = self.inner.lock().expect("state store lock poisoned");
            let threshold = self.low_coin_threshold;
            inner.consumables.coin_counts = counts;
            let keys: Vec<String> = inner.consumables.coin_counts.keys().cloned().collect();
            for key in keys {
                recompute_coin_alerts(&mut inner.consumables, &key, threshold);
            }
        }
        self.notify();
    }

    #[must_use]
    pub fn is_storage_full(&self, denom: BillDenom) -> bool {
        let inner = self.inner.lock().expect("state store lock poisoned");
        let key = denom.storage_key();
        inner.consumables.bill_storage_counts.get(&key).copied().unwrap_or(0) >= self.storage_slot_capacity
    }

    /// Bill denominations whose storage group still has room.
    #[must_use]
    pub fn get_acceptable_denominations(&self) -> Vec<BillDenom> {
        let inner = self.inner.lock().expect("state store lock poisoned");
        BillDenom::ALL
            .into_iter()
            .filter(|d| {
                let key = d.storage_key();
                inner.consumables.bill_storage_counts.get(&key).copied().unwrap_or(0)
                    < self.storage_slot_capacity
            })
            .collect()
    }
}

fn apply_device_update(
    status: &mut DeviceStatus,
    connection: Option<DeviceConnectionState>,
    firmware: Option<String>,
    last_error: Option<String>,
) {
    if let Some(connection) = connection {
        status.connection = Some(connection);
        if connection == DeviceConnectionState::Connected {
            status.last_ping = Some(Utc::now());
        }
    }
    if let Some(firmware) = firmware {
        status.firmware = Some(firmware);
    }
    if let Some(last_error) = last_error {
        status.last_error = Some(last_error);
    }
}

fn recompute_storage_alerts(consumables: &mut ConsumablesState, key: &str, capacity: u32) {
    let count = consumables.bill_storage_counts.get(key).copied().unwrap_or(0);
    let alert = (count >= capacity).then(|| format!("{}{key}", alert_prefix::STORAGE_FULL));
    let prefix = format!("{}{key}", alert_prefix::STORAGE_FULL);
    consumables.alerts.retain(|a| a != &prefix);
    if let Some(alert) = alert {
        consumables.alerts.insert(alert);
    }
}

fn recompute_dispenser_alerts(consumables: &mut ConsumablesState, key: &str, low_threshold: u32) {
    let count = consumables.bill_dispenser_counts.get(key).copied().unwrap_or(0);
    let low_key = format!("{}{key}", alert_prefix::LOW_BILL);
    let empty_key = format!("{}{key}", alert_prefix::EMPTY_BILL);
    consumables.alerts.retain(|a| a != &low_key && a != &empty_key);
    if count == 0 {
        consumables.alerts.insert(empty_key);
    } else if count < low_threshold {
        consumables.alerts.insert(low_key);
    }
}

fn recompute_coin_alerts(consumables: &mut ConsumablesState, key: &str, low_threshold: u32) {
    let count = consumables.coin_counts.get(key).copied().unwrap_or(0);
    let low_key = format!("{}{key}", alert_prefix::LOW_COIN);
    let empty_key = format!("{}{key}", alert_prefix::EMPTY_COIN);
    consumables.alerts.retain(|a| a != &low_key && a != &empty_key);
    if count == 0 {
        consumables.alerts.insert(empty_key);
    } else if count < low_threshold {
        consumables.alerts.insert(low_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_core::denom::BillDenom;

    fn store() -> Arc<MachineStateStore> {
        MachineStateStore::new(&KioskConfig {
            storage_slot_capacity: 5,
            low_bill_threshold: 2,
            low_coin_threshold: 2,
            ..KioskConfig::default()
        })
    }

    #[test]
    fn storage_full_alert_fires_at_capacity() {
        let store = store();
        for _ in 0..5 {
            store.increment_bill_storage(BillDenom::Php100, 1);
        }
        assert!(store.is_storage_full(BillDenom::Php100));
        let snapshot = store.snapshot();
        assert!(snapshot.consumables.alerts.iter().any(|a| a.starts_with("STORAGE_FULL:")));
    }

    #[test]
    fn dispenser_alerts_escalate_low_then_empty() {
        let store = store();
        store.increment_bill_dispenser(BillDenom::Php100, 3);
        store.decrement_bill_dispenser(BillDenom::Php100, 2);
        let snapshot = store.snapshot();
        assert!(snapshot.consumables.alerts.contains("LOW_BILL:100"));

        store.decrement_bill_dispenser(BillDenom::Php100, 1);
        let snapshot = store.snapshot();
        assert!(snapshot.consumables.alerts.contains("EMPTY_BILL:100"));
        assert!(!snapshot.consumables.alerts.contains("LOW_BILL:100"));
    }

    #[test]
    fn decrement_saturates_at_zero() {
        let store = store();
        store.decrement_bill_dispenser(BillDenom::Php100, 10);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.consumables.bill_dispenser_counts.get("100"), Some(&0));
    }

    #[test]
    fn usd_bills_share_one_storage_key() {
        let store = store();
        store.increment_bill_storage(BillDenom::Usd10, 2);
        store.increment_bill_storage(BillDenom::Usd100, 1);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.consumables.bill_storage_counts.get("USD"), Some(&3));
    }

    #[test]
    fn acceptable_denominations_excludes_full_slots() {
        let store = store();
        for _ in 0..5 {
            store.increment_bill_storage(BillDenom::Php100, 1);
        }
        let acceptable = store.get_acceptable_denominations();
        assert!(!acceptable.contains(&BillDenom::Php100));
        assert!(acceptable.contains(&BillDenom::Php50));
    }

    #[test]
    fn callbacks_fire_outside_the_lock() {
        let store = store();
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired_clone = fired.clone();
        store.on_change(Box::new(move |_snapshot| {
            fired_clone.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        store.increment_coin(5, 1);
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
