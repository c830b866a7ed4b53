//! Transaction Orchestrator (§4.9): the top coordinator binding the state
//! machine, bill-acceptance pipeline, and dispense orchestrator into the
//! operations a client actually calls, enforcing at most one active
//! transaction and recovering from a crash-interrupted one at startup.

use crate::bill_pipeline::{BillAcceptancePipeline, PipelineOutcome, RejectReason};
use crate::dispense::DispenseOrchestrator;
use crate::persistence::PersistenceStore;
use crate::state_machine::{BroadcastSink, TransactionBroadcast, TransactionStateMachine};
use crate::state_store::MachineStateStore;
use kiosk_core::change::calculate_change;
use kiosk_core::error::{KioskError, KioskResult, TransactionError};
use kiosk_core::transaction::{TransactionRecord, TransactionType, TxState};
use kiosk_core::wal::WalStatus;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Broadcasts raised directly by the orchestrator, distinct from the state
/// machine's own lifecycle broadcasts.
#[derive(Debug, Clone)]
pub enum OrchestratorBroadcast {
    CoinInserted { tx_id: String, denom: u32, inserted_amount: u32 },
}

pub trait OrchestratorSink: Send + Sync {
    fn publish(&self, event: OrchestratorBroadcast);
}

pub struct NullOrchestratorSink;

impl OrchestratorSink for NullOrchestratorSink {
    fn publish(&self, _event: OrchestratorBroadcast) {}
}

struct Active {
    machine: Arc<TransactionStateMachine>,
}

/// Enforces "at most one active transaction" via a single mutex-guarded slot.
pub struct TransactionOrchestrator {
    persistence: PersistenceStore,
    state: Arc<MachineStateStore>,
    pipeline: Arc<BillAcceptancePipeline>,
    dispense: Arc<DispenseOrchestrator>,
    broadcast_sink: Arc<dyn BroadcastSink>,
    orchestrator_sink: Arc<dyn OrchestratorSink>,
    active: Mutex<Option<Active>>,
}

impl TransactionOrchestrator {
    #[must_use]
    pub fn new(
        persistence: PersistenceStore,
        state: Arc<MachineStateStore>,
        pipeline: Arc<BillAcceptancePipeline>,
        dispense: Arc<DispenseOrchestrator>,
        broadcast_sink: Arc<dyn BroadcastSink>,
        orchestrator_sink: Arc<dyn OrchestratorSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            persistence,
            state,
            pipeline,
            dispense,
            broadcast_sink,
            orchestrator_sink,
            active: Mutex::new(None),
        })
    }

    /// Scans for WAL entries left `Pending` by a crash mid-transition,
    /// forces the owning transaction to `Error{CRASH_RECOVERY}`, and marks
    /// the entries `RolledBack`. Run once at startup, before accepting
    /// client calls.
    #[instrument(skip(self))]
    pub async fn recover_from_crash(&self) -> KioskResult<()> {
        let pending = self.persistence.pending_wal_entries().await.map_err(persistence_error)?;
        for entry in pending {
            warn!(tx_id = %entry.transaction_id, action = %entry.action, "rolling back crash-interrupted transition");
            if let Some(mut record) = self.persistence.get_transaction(&entry.transaction_id).await.map_err(persistence_error)? {
                if !record.state.is_terminal() {
                    record.state = TxState::Error;
                    record.error_code = Some("CRASH_RECOVERY".to_string());
                    record.error_message = Some(format!("Recovered from pending action: {}", entry.action));
                    record.updated_at = chrono::Utc::now();
                    record.completed_at = Some(record.updated_at);
                    self.persistence.update_transaction(&record).await.map_err(persistence_error)?;
                }
            }
            self.persistence
                .mark_wal_status(entry.id, WalStatus::RolledBack)
                .await
                .map_err(persistence_error)?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn start_transaction(
        &self,
        tx_type: TransactionType,
        target_amount: u32,
        fee: u32,
        selected_dispense_denoms: Vec<u32>,
    ) -> KioskResult<TransactionRecord> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(conflict("(none)", "a transaction is already active"));
        }

        let snapshot = self.state.snapshot();
        if snapshot.security.tamper_active {
            return Err(conflict("(none)", "tamper lockout is active"));
        }
        calculate_change(
            target_amount,
            &snapshot.consumables.bill_dispenser_counts,
            &snapshot.consumables.coin_counts,
            &selected_dispense_denoms,
        )
        .map_err(KioskError::InsufficientInventory)?;

        let id = Uuid::new_v4().to_string();
        let record = TransactionRecord::new(
            id.clone(),
            tx_type,
            target_amount,
            fee,
            selected_dispense_denoms,
            chrono::Utc::now(),
        );
        self.persistence.insert_transaction(&record).await.map_err(persistence_error)?;

        let machine =
            TransactionStateMachine::new(record, self.persistence.clone(), self.broadcast_sink.clone());
        machine.transition_to(TxState::WaitingForBill, serde_json::Value::Null).await?;
        let result = machine.record();
        *active = Some(Active { machine });
        Ok(result)
    }

    #[instrument(skip(self))]
    pub async fn handle_bill_inserted(&self) -> KioskResult<TransactionRecord> {
        let active = self.active.lock().await;
        let Some(active) = active.as_ref() else {
            return Err(conflict("(none)", "no active transaction"));
        };
        let machine = active.machine.clone();
        drop(active);

        if machine.current_state() != TxState::WaitingForBill {
            return Err(conflict(&machine.record().id, "not waiting for a bill"));
        }

        machine.transition_to(TxState::Authenticating, serde_json::Value::Null).await?;
        let outcome = self.pipeline.run().await.map_err(|e| KioskError::Configuration(e.to_string()))?;

        match outcome {
            PipelineOutcome::NoBillDetected => {
                machine.transition_to(TxState::WaitingForBill, serde_json::Value::Null).await?;
                machine.reset_timeout();
                Ok(machine.record())
            }
            PipelineOutcome::Rejected { reason, .. } => {
                let data = json!({ "last_rejection": reject_reason_text(reason) });
                machine.transition_to(TxState::WaitingForBill, data).await?;
                machine.reset_timeout();
                Ok(machine.record())
            }
            PipelineOutcome::Stored { denom, .. } => {
                let value = denom.value();
                machine
                    .transition_to(TxState::Sorting, json!({ "denom": denom.wire_value_string(), "value": value }))
                    .await?;

                let record = machine.record();
                let mut inserted_denominations = record.inserted_denominations.clone();
                *inserted_denominations.entry(denom.wire_value_string()).or_insert(0) += 1;
                let inserted_amount = record.inserted_amount + value;
                let data = json!({
                    "inserted_amount": inserted_amount,
                    "inserted_denominations": inserted_denominations,
                });
                machine.transition_to(TxState::WaitingForBill, data).await?;

                if inserted_amount >= record.total_due {
                    machine.transition_to(TxState::WaitingForConfirmation, serde_json::Value::Null).await?;
                } else {
                    machine.reset_timeout();
                }
                Ok(machine.record())
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn handle_coin_inserted(&self, denom: u32, count: u32) -> KioskResult<TransactionRecord> {
        let active = self.active.lock().await;
        let Some(active) = active.as_ref() else {
            return Err(conflict("(none)", "no active transaction"));
        };
        let machine = active.machine.clone();
        drop(active);

        if machine.current_state() != TxState::WaitingForBill {
            return Ok(machine.record());
        }

        let record = machine.record();
        let mut inserted_denominations = record.inserted_denominations.clone();
        *inserted_denominations.entry(denom.to_string()).or_insert(0) += count;
        let inserted_amount = record.inserted_amount + denom * count;
        let data = json!({
            "inserted_amount": inserted_amount,
            "inserted_denominations": inserted_denominations,
        });
        machine.transition_to(TxState::WaitingForBill, data).await?;
        self.orchestrator_sink.publish(OrchestratorBroadcast::CoinInserted {
            tx_id: record.id.clone(),
            denom,
            inserted_amount,
        });

        if inserted_amount >= record.total_due {
            machine.transition_to(TxState::WaitingForConfirmation, serde_json::Value::Null).await?;
        } else {
            machine.reset_timeout();
        }
        Ok(machine.record())
    }

    #[instrument(skip(self))]
    pub async fn confirm_transaction(&self) -> KioskResult<TransactionRecord> {
        let mut active = self.active.lock().await;
        let Some(current) = active.as_ref() else {
            return Err(conflict("(none)", "no active transaction"));
        };
        let machine = current.machine.clone();
        if machine.current_state() != TxState::WaitingForConfirmation {
            return Err(conflict(&machine.record().id, "not waiting for confirmation"));
        }

        let record = machine.record();
        let snapshot = self.state.snapshot();
        let plan = calculate_change(
            record.target_amount,
            &snapshot.consumables.bill_dispenser_counts,
            &snapshot.consumables.coin_counts,
            &record.selected_dispense_denoms,
        )
        .map_err(KioskError::InsufficientInventory)?;

        machine
            .transition_to(TxState::Dispensing, json!({ "dispense_plan": plan }))
            .await?;

        let result = self.dispense.execute(&plan).await;
        if result.success {
            machine
                .transition_to(
                    TxState::Complete,
                    json!({ "dispensed_amount": result.total_dispensed, "dispense_result": result }),
                )
                .await?;
        } else {
            machine
                .transition_to(
                    TxState::Error,
                    json!({
                        "dispensed_amount": result.total_dispensed,
                        "dispense_result": result,
                        "error_code": "PARTIAL_DISPENSE",
                        "error_message": format!(
                            "shortfall {}{}",
                            result.shortfall,
                            result.claim_ticket_code.as_deref().map(|t| format!(", claim ticket {t}")).unwrap_or_default()
                        ),
                    }),
                )
                .await?;
        }

        let outcome = machine.record();
        *active = None;
        info!(tx_id = %outcome.id, success = result.success, "transaction finished");
        Ok(outcome)
    }

    #[instrument(skip(self))]
    pub async fn cancel_transaction(&self) -> KioskResult<TransactionRecord> {
        let mut active = self.active.lock().await;
        let Some(current) = active.as_ref() else {
            return Err(conflict("(none)", "no active transaction"));
        };
        let machine = current.machine.clone();
        machine.cancel().await?;
        let record = machine.record();
        *active = None;
        Ok(record)
    }

    #[must_use]
    pub async fn active_record(&self) -> Option<TransactionRecord> {
        let active = self.active.lock().await;
        active.as_ref().map(|a| a.machine.record())
    }

    /// Reattaches to a transaction left active by an earlier invocation of
    /// this same process (the CLI exerciser's session-resumption path): a
    /// no-op if a transaction is already attached, `Ok(None)` if persistence
    /// has nothing non-terminal pending.
    #[instrument(skip(self))]
    pub async fn attach_active(&self) -> KioskResult<Option<TransactionRecord>> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            return Ok(Some(current.machine.record()));
        }
        let mut candidates = self.persistence.active_transactions().await.map_err(persistence_error)?;
        let Some(record) = candidates.pop() else { return Ok(None) };
        let machine =
            crate::state_machine::TransactionStateMachine::resume(record, self.persistence.clone(), self.broadcast_sink.clone());
        let result = machine.record();
        *active = Some(Active { machine });
        Ok(Some(result))
    }
}

fn conflict(tx_id: &str, message: &str) -> KioskError {
    KioskError::Transaction(TransactionError { tx_id: tx_id.to_string(), message: message.to_string() })
}

fn persistence_error(error: crate::persistence::PersistenceError) -> KioskError {
    KioskError::Configuration(format!("persistence failure: {error}"))
}

fn reject_reason_text(reason: RejectReason) -> &'static str {
    match reason {
        RejectReason::TimeoutPosition => "TIMEOUT_POSITION",
        RejectReason::NotGenuine => "NOT_GENUINE",
        RejectReason::UnknownDenomination => "UNKNOWN_DENOMINATION",
        RejectReason::StorageFull => "STORAGE_FULL",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KioskConfig;
    use crate::sim::{SimAuthenticator, SimCamera, SimGpio, SimSerialLink};
    use crate::state_machine::BroadcastChannel;
    use kiosk_host::{BillController, CoinSecurityController};

    async fn orchestrator() -> (Arc<TransactionOrchestrator>, Arc<SimGpio>, Arc<SimSerialLink>, Arc<SimSerialLink>) {
        let config = Arc::new(KioskConfig {
            bill_acceptance_timeout_secs: 0.2,
            bill_position_timeout_secs: 0.2,
            led_stabilization_delay_secs: 0.0,
            bill_store_duration_secs: 0.0,
            bill_eject_duration_secs: 0.0,
            ..KioskConfig::default()
        });
        let state = MachineStateStore::new(&config);
        state.set_dispenser_counts(std::collections::BTreeMap::from([("100".to_string(), 10)]));
        state.set_coin_counts(std::collections::BTreeMap::from([("5".to_string(), 20), ("20".to_string(), 20)]));

        let gpio = Arc::new(SimGpio::new());
        let camera = Arc::new(SimCamera::new());
        camera.initialize().await.unwrap();
        let authenticator = Arc::new(SimAuthenticator::new());
        let bill_link = Arc::new(SimSerialLink::new());
        bill_link.set_homed(true);
        bill_link.set_bill_dispenser_count(100, 10);
        let coin_link = Arc::new(SimSerialLink::new());
        coin_link.set_coin_count(20, 20);
        coin_link.set_coin_count(5, 20);

        let pipeline = Arc::new(crate::bill_pipeline::BillAcceptancePipeline::new(
            gpio.clone(),
            camera,
            authenticator,
            BillController::new(bill_link.clone()),
            state.clone(),
            Arc::new(crate::bill_pipeline::NullPipelineSink),
            config,
        ));
        let dispense = Arc::new(DispenseOrchestrator::new(
            BillController::new(bill_link.clone()),
            CoinSecurityController::new(coin_link.clone()),
            state.clone(),
            Arc::new(crate::dispense::NullDispenseSink),
        ));
        let persistence = PersistenceStore::connect("sqlite::memory:").await.unwrap();
        let orchestrator = TransactionOrchestrator::new(
            persistence,
            state,
            pipeline,
            dispense,
            BroadcastChannel::new(16),
            Arc::new(NullOrchestratorSink),
        );
        (orchestrator, gpio, bill_link, coin_link)
    }

    #[tokio::test]
    async fn starting_a_second_transaction_while_one_is_active_fails() {
        let (orchestrator, ..) = orchestrator().await;
        orchestrator.start_transaction(TransactionType::BillToCoin, 100, 0, vec![]).await.unwrap();
        let error = orchestrator.start_transaction(TransactionType::BillToCoin, 50, 0, vec![]).await.unwrap_err();
        assert!(matches!(error, KioskError::Transaction(_)));
    }

    #[tokio::test]
    async fn full_flow_reaches_confirmation_and_completes() {
        let (orchestrator, gpio, ..) = orchestrator().await;
        orchestrator.start_transaction(TransactionType::BillToCoin, 100, 0, vec![]).await.unwrap();

        gpio.set_bill_at_entry(true);
        gpio.set_bill_in_position(true);
        let record = orchestrator.handle_bill_inserted().await.unwrap();
        assert_eq!(record.state, TxState::WaitingForConfirmation);
        assert_eq!(record.inserted_amount, 100);

        let record = orchestrator.confirm_transaction().await.unwrap();
        assert_eq!(record.state, TxState::Complete);
        assert!(orchestrator.active_record().await.is_none());
    }

    #[tokio::test]
    async fn coin_insertion_reaches_confirmation_without_a_bill() {
        let (orchestrator, ..) = orchestrator().await;
        orchestrator.start_transaction(TransactionType::CoinToBill, 25, 0, vec![]).await.unwrap();
        orchestrator.handle_coin_inserted(20, 1).await.unwrap();
        let record = orchestrator.handle_coin_inserted(5, 1).await.unwrap();
        assert_eq!(record.state, TxState::WaitingForConfirmation);
        assert_eq!(record.inserted_amount, 25);
    }

    #[tokio::test]
    async fn cancel_clears_the_active_slot() {
        let (orchestrator, ..) = orchestrator().await;
        orchestrator.start_transaction(TransactionType::BillToCoin, 100, 0, vec![]).await.unwrap();
        let record = orchestrator.cancel_transaction().await.unwrap();
        assert_eq!(record.state, TxState::Cancelled);
        assert!(orchestrator.active_record().await.is_none());

        orchestrator.start_transaction(TransactionType::BillToCoin, 50, 0, vec![]).await.unwrap();
    }
}
