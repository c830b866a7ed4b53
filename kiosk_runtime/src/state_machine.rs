//! Transaction State Machine (§4.8): the strict transition table, per-state
//! timeouts, and WAL bookkeeping for a single transaction's lifecycle.
//!
//! Timer tasks are spawned per armed state and aborted whenever the state
//! machine leaves that state for any reason, the same teardown-on-exit
//! discipline the teacher's payout pool uses for per-hopper dispense tasks
//! torn down on `emergency_stop`.

use crate::persistence::{PersistenceResult, PersistenceStore};
use kiosk_core::error::{InvalidTransition, KioskError, KioskResult};
use kiosk_core::transaction::{DispensePlan, DispenseResult, TransactionRecord, TxState};
use kiosk_core::wal::{transition_action, WalStatus};
use chrono::Utc;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Internal runtime events a transaction's state machine broadcasts.
/// Deliberately separate from [`crate::dispatcher::RuntimeEvent`]: these
/// describe transaction lifecycle, not peripheral activity.
#[derive(Debug, Clone)]
pub enum TransactionBroadcast {
    StateChanged { id: String, state: TxState },
    Complete { id: String },
    Cancelled { id: String },
    Error { id: String, error_code: Option<String>, error_message: Option<String> },
}

/// Broadcast capability injected at construction, per the design notes'
/// "unidirectional references" rule: the state machine holds this as a
/// trait object rather than a back-reference to whatever owns it.
pub trait BroadcastSink: Send + Sync {
    fn publish(&self, event: TransactionBroadcast);
}

/// A `tokio::sync::broadcast` channel wrapped to satisfy [`BroadcastSink`].
pub struct BroadcastChannel {
    sender: tokio::sync::broadcast::Sender<TransactionBroadcast>,
}

impl BroadcastChannel {
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _rx) = tokio::sync::broadcast::channel(capacity);
        Arc::new(Self { sender })
    }

    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TransactionBroadcast> {
        self.sender.subscribe()
    }
}

impl BroadcastSink for BroadcastChannel {
    fn publish(&self, event: TransactionBroadcast) {
        let _ = self.sender.send(event);
    }
}

/// Returns the duration a state is armed for, or `None` if the state has no
/// timeout.
#[must_use]
pub fn timeout_for(state: TxState) -> Option<Duration> {
    match state {
        TxState::WaitingForBill => Some(Duration::from_secs(60)),
        TxState::Authenticating => Some(Duration::from_secs(10)),
        TxState::Sorting => Some(Duration::from_secs(10)),
        TxState::WaitingForConfirmation => Some(Duration::from_secs(60)),
        TxState::Dispensing => Some(Duration::from_secs(30)),
        _ => None,
    }
}

#[must_use]
fn is_valid_transition(from: TxState, to: TxState) -> bool {
    matches!(
        (from, to),
        (TxState::Idle, TxState::WaitingForBill | TxState::Cancelled)
            | (
                TxState::WaitingForBill,
                TxState::Authenticating
                    | TxState::WaitingForConfirmation
                    | TxState::Cancelled
                    | TxState::Error
            )
            | (TxState::Authenticating, TxState::Sorting | TxState::WaitingForBill | TxState::Error)
            | (TxState::Sorting, TxState::WaitingForBill | TxState::Error)
            | (TxState::WaitingForConfirmation, TxState::Dispensing | TxState::Cancelled)
            | (TxState::Dispensing, TxState::Complete | TxState::Error)
            | (TxState::Complete | TxState::Cancelled | TxState::Error, TxState::Idle)
    )
}

/// Owns one transaction's record and drives it through the transition table.
/// Must be held behind an `Arc` so timer tasks can call back into it.
pub struct TransactionStateMachine {
    record: Mutex<TransactionRecord>,
    persistence: PersistenceStore,
    sink: Arc<dyn BroadcastSink>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionStateMachine {
    #[must_use]
    pub fn new(
        record: TransactionRecord,
        persistence: PersistenceStore,
        sink: Arc<dyn BroadcastSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            record: Mutex::new(record),
            persistence,
            sink,
            timer: Mutex::new(None),
        })
    }

    /// Reconstructs a machine over a transaction fetched from persistence and
    /// re-arms its current state's timer, since no timer survives a process
    /// restart. Used when a standalone invocation of the CLI exerciser picks
    /// back up a transaction a previous invocation left active.
    #[must_use]
    pub fn resume(record: TransactionRecord, persistence: PersistenceStore, sink: Arc<dyn BroadcastSink>) -> Arc<Self> {
        let machine = Self::new(record, persistence, sink);
        machine.arm_timer(machine.current_state());
        machine
    }

    #[must_use]
    pub fn record(&self) -> TransactionRecord {
        self.record.lock().expect("state machine lock poisoned").clone()
    }

    #[must_use]
    pub fn current_state(&self) -> TxState {
        self.record.lock().expect("state machine lock poisoned").state
    }

    fn cancel_timer(&self) {
        if let Some(handle) = self.timer.lock().expect("state machine lock poisoned").take() {
            handle.abort();
        }
    }

    fn arm_timer(self: &Arc<Self>, state: TxState) {
        let Some(duration) = timeout_for(state) else { return };
        let machine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            machine.on_timeout(state).await;
        });
        *self.timer.lock().expect("state machine lock poisoned") = Some(handle);
    }

    async fn on_timeout(self: Arc<Self>, expired_state: TxState) {
        if self.current_state() != expired_state {
            return;
        }
        warn!(state = %expired_state, "transaction timed out");
        let data = serde_json::json!({
            "error_code": "TIMEOUT",
            "error_message": expired_state.to_string(),
        });
        let target = if expired_state.is_cancellable() { TxState::Cancelled } else { TxState::Error };
        if let Err(error) = self.transition_to(target, data).await {
            warn!(%error, "failed to apply timeout transition");
        }
    }

    /// Explicitly restart the current state's timer without changing state.
    pub fn reset_timeout(self: &Arc<Self>) {
        self.cancel_timer();
        self.arm_timer(self.current_state());
    }

    /// `cancel()` per §4.8: cancellable states go to `Cancelled`; other
    /// non-terminal states go to `Error{CANCELLED}`; terminal states are a
    /// no-op (round-trip law from §8).
    pub async fn cancel(self: &Arc<Self>) -> KioskResult<()> {
        let current = self.current_state();
        if current.is_terminal() {
            return Ok(());
        }
        if current.is_cancellable() {
            self.transition_to(TxState::Cancelled, Value::Null).await
        } else {
            let data = serde_json::json!({
                "error_code": "CANCELLED",
                "error_message": "cancelled from a non-cancellable state",
            });
            self.transition_to(TxState::Error, data).await
        }
    }

    /// Drives the nine-step transition procedure in §4.8.
    #[instrument(skip(self, data), fields(tx_id = %self.record().id))]
    pub async fn transition_to(self: &Arc<Self>, to: TxState, data: Value) -> KioskResult<()> {
        let from = self.current_state();

        // Step 1: validate.
        if !is_valid_transition(from, to) {
            return Err(KioskError::InvalidTransition(InvalidTransition { from, to }));
        }

        // Step 2: cancel the old timer.
        self.cancel_timer();

        let tx_id = self.record().id;
        let action = transition_action(from, to);
        let now = Utc::now();

        // Step 3: append WAL, Pending.
        let wal_id = self.append_wal(&tx_id, &action, &data, now).await?;

        // Steps 4-5: update in-memory + persisted record.
        let updated = {
            let mut record = self.record.lock().expect("state machine lock poisoned");
            record.state = to;
            record.updated_at = now;
            if to.is_terminal() {
                record.completed_at = Some(now);
            }
            apply_data(&mut record, &data);
            record.clone()
        };
        self.persistence.update_transaction(&updated).await.map_err(persistence_to_kiosk_error)?;

        // Step 6: commit is implicit per-statement under sqlite's default
        // autocommit mode; no explicit transaction spans steps 3-7 here.

        // Step 7: mark WAL completed.
        self.persistence
            .mark_wal_status(wal_id, WalStatus::Completed)
            .await
            .map_err(persistence_to_kiosk_error)?;

        // Step 8: arm new timer.
        self.arm_timer(to);

        // Step 9: broadcast.
        info!(%from, %to, "transaction state changed");
        self.broadcast_transition(&updated, to);

        Ok(())
    }

    async fn append_wal(
        &self,
        tx_id: &str,
        action: &str,
        data: &Value,
        now: chrono::DateTime<Utc>,
    ) -> KioskResult<i64> {
        self.persistence
            .append_wal(tx_id, action, data, now)
            .await
            .map_err(persistence_to_kiosk_error)
    }

    fn broadcast_transition(&self, record: &TransactionRecord, to: TxState) {
        self.sink.publish(TransactionBroadcast::StateChanged { id: record.id.clone(), state: to });
        match to {
            TxState::Complete => self.sink.publish(TransactionBroadcast::Complete { id: record.id.clone() }),
            TxState::Cancelled => {
                self.sink.publish(TransactionBroadcast::Cancelled { id: record.id.clone() });
            }
            TxState::Error => self.sink.publish(TransactionBroadcast::Error {
                id: record.id.clone(),
                error_code: record.error_code.clone(),
                error_message: record.error_message.clone(),
            }),
            _ => {}
        }
    }
}

fn persistence_to_kiosk_error(error: crate::persistence::PersistenceError) -> KioskError {
    KioskError::Configuration(format!("persistence failure: {error}"))
}

/// Merge whichever known fields `data` carries into `record`, wholesale
/// (not incrementally) per the transition procedure's "optional bulk
/// fields" step.
fn apply_data(record: &mut TransactionRecord, data: &Value) {
    let Some(object) = data.as_object() else { return };
    if let Some(value) = object.get("inserted_amount").and_then(Value::as_u64) {
        record.inserted_amount = value as u32;
    }
    if let Some(value) = object.get("dispensed_amount").and_then(Value::as_u64) {
        record.dispensed_amount = value as u32;
    }
    if let Some(value) = object.get("inserted_denominations") {
        if let Ok(map) = serde_json::from_value(value.clone()) {
            record.inserted_denominations = map;
        }
    }
    if let Some(value) = object.get("dispense_plan") {
        if let Ok(plan) = serde_json::from_value::<DispensePlan>(value.clone()) {
            record.dispense_plan = Some(plan);
        }
    }
    if let Some(value) = object.get("dispense_result") {
        if let Ok(result) = serde_json::from_value::<DispenseResult>(value.clone()) {
            record.dispense_result = Some(result);
        }
    }
    if let Some(value) = object.get("error_code").and_then(Value::as_str) {
        record.error_code = Some(value.to_string());
    }
    if let Some(value) = object.get("error_message").and_then(Value::as_str) {
        record.error_message = Some(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_core::transaction::TransactionType;

    async fn machine() -> (Arc<TransactionStateMachine>, Arc<BroadcastChannel>) {
        let persistence = PersistenceStore::connect("sqlite::memory:").await.unwrap();
        let record = TransactionRecord::new(
            "tx-sm".to_string(),
            TransactionType::BillToBill,
            100,
            0,
            vec![],
            Utc::now(),
        );
        persistence.insert_transaction(&record).await.unwrap();
        let sink = BroadcastChannel::new(16);
        (TransactionStateMachine::new(record, persistence, sink.clone()), sink)
    }

    #[tokio::test]
    async fn valid_transition_updates_state_and_broadcasts() {
        let (machine, sink) = machine().await;
        let mut rx = sink.subscribe();
        machine.transition_to(TxState::WaitingForBill, Value::Null).await.unwrap();
        assert_eq!(machine.current_state(), TxState::WaitingForBill);
        match rx.try_recv() {
            Ok(TransactionBroadcast::StateChanged { state, .. }) => {
                assert_eq!(state, TxState::WaitingForBill);
            }
            other => panic!("expected StateChanged, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let (machine, _sink) = machine().await;
        let error = machine.transition_to(TxState::Dispensing, Value::Null).await.unwrap_err();
        assert!(matches!(error, KioskError::InvalidTransition(_)));
        assert_eq!(machine.current_state(), TxState::Idle);
    }

    #[tokio::test]
    async fn cancel_from_cancellable_state_goes_to_cancelled() {
        let (machine, _sink) = machine().await;
        machine.transition_to(TxState::WaitingForBill, Value::Null).await.unwrap();
        machine.cancel().await.unwrap();
        assert_eq!(machine.current_state(), TxState::Cancelled);
    }

    #[tokio::test]
    async fn cancel_from_non_cancellable_state_goes_to_error() {
        let (machine, _sink) = machine().await;
        machine.transition_to(TxState::WaitingForBill, Value::Null).await.unwrap();
        machine.transition_to(TxState::Authenticating, Value::Null).await.unwrap();
        machine.cancel().await.unwrap();
        assert_eq!(machine.current_state(), TxState::Error);
        assert_eq!(machine.record().error_code.as_deref(), Some("CANCELLED"));
    }

    #[tokio::test]
    async fn cancel_from_terminal_state_is_a_no_op() {
        let (machine, sink) = machine().await;
        machine.transition_to(TxState::WaitingForBill, Value::Null).await.unwrap();
        machine.cancel().await.unwrap();
        assert_eq!(machine.current_state(), TxState::Cancelled);

        let mut rx = sink.subscribe();
        machine.cancel().await.unwrap();
        assert_eq!(machine.current_state(), TxState::Cancelled);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn data_fields_merge_into_the_record() {
        let (machine, _sink) = machine().await;
        machine.transition_to(TxState::WaitingForBill, Value::Null).await.unwrap();
        machine
            .transition_to(TxState::Authenticating, serde_json::json!({"inserted_amount": 50}))
            .await
            .unwrap();
        assert_eq!(machine.record().inserted_amount, 50);
    }
}
