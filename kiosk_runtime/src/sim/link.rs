//! In-process `SerialLink` simulator: answers every [`Command`] directly
//! instead of crossing a transport boundary, scriptable via the `set_*`
//! helpers so controller-wrapper and pipeline tests can drive specific
//! firmware behaviors (NOT_HOMED, partial dispense, empty hopper) without a
//! real peripheral or even an in-memory duplex stream.

use async_trait::async_trait;
use kiosk_core::denom::{BillDenom, CoinDenom};
use kiosk_core::error::{ErrorCode, HardwareError};
use kiosk_core::wire::Command;
use kiosk_host::capability::{LinkError, LinkResult, SerialLink};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

struct State {
    homed: bool,
    position: u32,
    slot: Option<u8>,
    locked: bool,
    bill_dispenser: BTreeMap<u32, u32>,
    coin_counts: BTreeMap<u32, u32>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            homed: false,
            position: 0,
            slot: None,
            locked: false,
            bill_dispenser: BTreeMap::new(),
            coin_counts: BTreeMap::new(),
        }
    }
}

pub struct SimSerialLink {
    state: Mutex<State>,
}

impl Default for SimSerialLink {
    fn default() -> Self {
        Self { state: Mutex::new(State::default()) }
    }
}

impl SimSerialLink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_homed(&self, homed: bool) {
        self.state.lock().expect("sim link lock poisoned").homed = homed;
    }

    pub fn set_bill_dispenser_count(&self, denom_value: u32, count: u32) {
        self.state.lock().expect("sim link lock poisoned").bill_dispenser.insert(denom_value, count);
    }

    pub fn set_coin_count(&self, denom_value: u32, count: u32) {
        self.state.lock().expect("sim link lock poisoned").coin_counts.insert(denom_value, count);
    }

    pub fn set_locked(&self, locked: bool) {
        self.state.lock().expect("sim link lock poisoned").locked = locked;
    }
}

#[async_trait]
impl SerialLink for SimSerialLink {
    async fn send(&self, command: Command, _timeout: Duration) -> LinkResult<serde_json::Value> {
        let mut state = self.state.lock().expect("sim link lock poisoned");
        match command {
            Command::Sort { denom } => {
                if !state.homed {
                    return Err(LinkError::Hardware(HardwareError::new(ErrorCode::NotHomed, None)));
                }
                let Some(bill) = BillDenom::ALL.into_iter().find(|d| d.value() == denom) else {
                    return Err(LinkError::Hardware(HardwareError::new(ErrorCode::InvalidDenom, None)));
                };
                state.slot = Some(bill.slot().number());
                Ok(json!({"status": "OK", "slot": bill.slot().number()}))
            }
            Command::Home => {
                state.homed = true;
                state.position = 0;
                Ok(json!({"status": "OK", "position": 0}))
            }
            Command::SortStatus => Ok(json!({
                "status": "OK",
                "position": state.position,
                "slot": state.slot,
                "homed": state.homed,
            })),
            Command::Dispense { denom, count } => {
                let available = state.bill_dispenser.get(&denom).copied().unwrap_or(0);
                if available < count {
                    state.bill_dispenser.insert(denom, 0);
                    return Err(LinkError::Hardware(HardwareError::new(ErrorCode::Empty, Some(available))));
                }
                state.bill_dispenser.insert(denom, available - count);
                Ok(json!({"status": "OK", "dispensed": count}))
            }
            Command::DispenseStatus { .. } => Ok(json!({"status": "OK", "ready": true})),
            Command::CoinDispense { denom, count } => {
                let available = state.coin_counts.get(&denom).copied().unwrap_or(0);
                if available < count {
                    state.coin_counts.insert(denom, 0);
                    return Err(LinkError::Hardware(HardwareError::new(ErrorCode::Empty, Some(available))));
                }
                state.coin_counts.insert(denom, available - count);
                Ok(json!({"status": "OK", "dispensed": count}))
            }
            Command::CoinChange { amount } => {
                let mut remaining = amount;
                let mut breakdown = BTreeMap::new();
                for coin in CoinDenom::descending() {
                    if remaining == 0 {
                        break;
                    }
                    let value = coin.value();
                    let available = state.coin_counts.get(&value).copied().unwrap_or(0);
                    let count = (remaining / value).min(available);
                    if count > 0 {
                        breakdown.insert(coin.wire_value_string(), count);
                        remaining -= count * value;
                    }
                }
                Ok(json!({"status": "OK", "breakdown": breakdown}))
            }
            Command::CoinReset => {
                let previous_total: u32 =
                    state.coin_counts.iter().map(|(value, count)| value * count).sum();
                state.coin_counts.clear();
                Ok(json!({"status": "OK", "previous_total": previous_total}))
            }
            Command::SecurityLock => {
                state.locked = true;
                Ok(json!({"status": "OK"}))
            }
            Command::SecurityUnlock => {
                state.locked = false;
                Ok(json!({"status": "OK"}))
            }
            Command::SecurityStatus => Ok(json!({"status": "OK", "locked": state.locked, "tamper_a": false})),
            Command::Ping => Ok(json!({"status": "OK"})),
            Command::Version => Ok(json!({"status": "OK", "version": "sim-1.0.0"})),
            Command::Reset => {
                *state = State::default();
                Ok(json!({"status": "OK"}))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sort_without_home_reports_not_homed() {
        let link = SimSerialLink::new();
        let err = link.send(Command::Sort { denom: 100 }, Duration::from_secs(1)).await.unwrap_err();
        match err {
            LinkError::Hardware(h) => assert_eq!(h.code, ErrorCode::NotHomed),
            other => panic!("expected hardware error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn home_then_sort_succeeds() {
        let link = SimSerialLink::new();
        link.send(Command::Home, Duration::from_secs(1)).await.unwrap();
        let value = link.send(Command::Sort { denom: 100 }, Duration::from_secs(1)).await.unwrap();
        assert_eq!(value["status"], "OK");
        assert!(value["slot"].is_number());
    }

    #[tokio::test]
    async fn dispense_beyond_available_reports_partial() {
        let link = SimSerialLink::new();
        link.set_bill_dispenser_count(100, 2);
        let err = link
            .send(Command::Dispense { denom: 100, count: 5 }, Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            LinkError::Hardware(h) => {
                assert_eq!(h.code, ErrorCode::Empty);
                assert_eq!(h.dispensed, Some(2));
            }
            other => panic!("expected hardware error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn coin_change_uses_available_inventory() {
        let link = SimSerialLink::new();
        link.set_coin_count(20, 5);
        link.set_coin_count(5, 10);
        let value = link.send(Command::CoinChange { amount: 45 }, Duration::from_secs(1)).await.unwrap();
        assert_eq!(value["breakdown"]["20"], 2);
        assert_eq!(value["breakdown"]["5"], 1);
    }
}
