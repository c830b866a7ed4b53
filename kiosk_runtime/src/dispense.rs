//! Dispense Orchestrator (§4.7): executes a validated [`DispensePlan`]
//! against the bill and coin actuators with optimistic inventory
//! reservation, partial-failure accounting, and claim-ticket issuance.

use crate::state_store::MachineStateStore;
use kiosk_core::denom::{BillDenom, Currency};
use kiosk_core::transaction::{DispenseKind, DispensePlan, DispensePlanItem, DispenseResult};
use kiosk_host::capability::LinkError;
use kiosk_host::error::CommandError;
use kiosk_host::{BillController, CoinSecurityController};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const CLAIM_TICKET_LEN: usize = 8;
const CLAIM_TICKET_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Progress/outcome broadcasts the dispense orchestrator emits. Distinct
/// from [`crate::state_machine::TransactionBroadcast`]: these describe
/// actuator-level progress, not transaction lifecycle.
#[derive(Debug, Clone)]
pub enum DispenseBroadcast {
    Progress { completed: u32, total: u32, denom: String, kind: DispenseKind },
    Complete(DispenseResult),
}

pub trait DispenseSink: Send + Sync {
    fn publish(&self, event: DispenseBroadcast);
}

/// No-op sink for callers (tests, the CLI exerciser) that don't need progress
/// broadcasts.
pub struct NullDispenseSink;

impl DispenseSink for NullDispenseSink {
    fn publish(&self, _event: DispenseBroadcast) {}
}

pub struct DispenseOrchestrator {
    bill: BillController,
    coin: CoinSecurityController,
    state: Arc<MachineStateStore>,
    sink: Arc<dyn DispenseSink>,
}

impl DispenseOrchestrator {
    #[must_use]
    pub fn new(
        bill: BillController,
        coin: CoinSecurityController,
        state: Arc<MachineStateStore>,
        sink: Arc<dyn DispenseSink>,
    ) -> Self {
        Self { bill, coin, state, sink }
    }

    /// Runs the six-step procedure in §4.7 and returns the outcome. Never
    /// fails: hardware and link errors are captured as partial dispense
    /// instead of propagated, per the error-handling design's "partial
    /// dispense becomes an `Error` state, not an exception" policy.
    #[instrument(skip(self, plan))]
    pub async fn execute(&self, plan: &DispensePlan) -> DispenseResult {
        self.reserve(plan);

        let total_items = plan.items.len() as u32;
        let mut completed = 0u32;
        let mut dispensed_bills = BTreeMap::new();
        let mut dispensed_coins = BTreeMap::new();
        let mut total_dispensed = 0u32;
        let mut partial_failure = false;
        let mut actuals: BTreeMap<(DispenseKind, String), u32> = BTreeMap::new();

        for item in plan.bill_items() {
            if partial_failure {
                break;
            }
            let actual = self.dispense_bill_item(item).await;
            total_dispensed += actual * item.value;
            dispensed_bills.insert(item.denom.clone(), actual);
            actuals.insert((DispenseKind::Bill, item.denom.clone()), actual);
            if actual < item.count {
                partial_failure = true;
            }
            completed += 1;
            self.sink.publish(DispenseBroadcast::Progress {
                completed,
                total: total_items,
                denom: item.denom.clone(),
                kind: DispenseKind::Bill,
            });
        }

        if !partial_failure {
            for item in plan.coin_items() {
                if partial_failure {
                    break;
                }
                let actual = self.dispense_coin_item(item).await;
                total_dispensed += actual * item.value;
                dispensed_coins.insert(item.denom.clone(), actual);
                actuals.insert((DispenseKind::Coin, item.denom.clone()), actual);
                if actual < item.count {
                    partial_failure = true;
                }
                completed += 1;
                self.sink.publish(DispenseBroadcast::Progress {
                    completed,
                    total: total_items,
                    denom: item.denom.clone(),
                    kind: DispenseKind::Coin,
                });
            }
        }

        self.reconcile(plan, &actuals);

        let shortfall = plan.total_amount.saturating_sub(total_dispensed);
        let claim_ticket_code = (shortfall > 0).then(generate_claim_ticket);
        if shortfall > 0 {
            warn!(shortfall, "dispense completed with shortfall");
        }

        let result = DispenseResult {
            success: shortfall == 0,
            dispensed_bills,
            dispensed_coins,
            total_dispensed,
            shortfall,
            claim_ticket_code,
        };
        info!(success = result.success, total_dispensed, shortfall, "dispense complete");
        self.sink.publish(DispenseBroadcast::Complete(result.clone()));
        result
    }

    fn reserve(&self, plan: &DispensePlan) {
        for item in &plan.items {
            match item.kind {
                DispenseKind::Bill => {
                    if let Some(denom) = local_bill_denom(item.value) {
                        self.state.decrement_bill_dispenser(denom, item.count);
                    }
                }
                DispenseKind::Coin => self.state.decrement_coin(item.value, item.count),
            }
        }
    }

    /// Restores the reservation on every plan item not fully dispensed,
    /// including items never attempted because an earlier item in the same
    /// run broke the loop (§4.7 step 4): `actual` defaults to 0 for those.
    fn reconcile(&self, plan: &DispensePlan, actuals: &BTreeMap<(DispenseKind, String), u32>) {
        for item in &plan.items {
            let actual = actuals.get(&(item.kind, item.denom.clone())).copied().unwrap_or(0);
            let unfulfilled = item.count - actual;
            if unfulfilled == 0 {
                continue;
            }
            match item.kind {
                DispenseKind::Bill => {
                    if let Some(denom) = local_bill_denom(item.value) {
                        self.state.increment_bill_dispenser(denom, unfulfilled);
                    }
                }
                DispenseKind::Coin => self.state.increment_coin(item.value, unfulfilled),
            }
        }
    }

    async fn dispense_bill_item(&self, item: &DispensePlanItem) -> u32 {
        match self.bill.dispense(item.value, item.count).await {
            Ok(response) => response.dispensed,
            Err(CommandError::Link(LinkError::Hardware(hardware))) => hardware.dispensed.unwrap_or(0),
            Err(error) => {
                warn!(%error, denom = %item.denom, "bill dispense failed");
                0
            }
        }
    }

    async fn dispense_coin_item(&self, item: &DispensePlanItem) -> u32 {
        match self.coin.coin_dispense(item.value, item.count).await {
            Ok(response) => response.dispensed,
            Err(CommandError::Link(LinkError::Hardware(hardware))) => hardware.dispensed.unwrap_or(0),
            Err(error) => {
                warn!(%error, denom = %item.denom, "coin dispense failed");
                0
            }
        }
    }
}

fn local_bill_denom(value: u32) -> Option<BillDenom> {
    BillDenom::from_value(Currency::Php, value)
}

fn generate_claim_ticket() -> String {
    let mut rng = rand::thread_rng();
    (0..CLAIM_TICKET_LEN)
        .map(|_| CLAIM_TICKET_ALPHABET[rng.gen_range(0..CLAIM_TICKET_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KioskConfig;
    use crate::sim::SimSerialLink;
    use kiosk_core::transaction::DispensePlanItem;
    use std::sync::Arc;

    fn plan(items: Vec<DispensePlanItem>) -> DispensePlan {
        let total_amount = items.iter().map(DispensePlanItem::amount).sum();
        DispensePlan { items, total_amount, is_exact: true }
    }

    fn orchestrator(bill_link: Arc<SimSerialLink>, coin_link: Arc<SimSerialLink>) -> DispenseOrchestrator {
        let state = MachineStateStore::new(&KioskConfig::default());
        DispenseOrchestrator::new(
            BillController::new(bill_link),
            CoinSecurityController::new(coin_link),
            state,
            Arc::new(NullDispenseSink),
        )
    }

    #[tokio::test]
    async fn full_dispense_succeeds_with_no_shortfall() {
        let bill_link = Arc::new(SimSerialLink::new());
        bill_link.set_bill_dispenser_count(100, 5);
        let orchestrator = orchestrator(bill_link, Arc::new(SimSerialLink::new()));

        let plan = plan(vec![DispensePlanItem {
            denom: "100".to_string(),
            kind: DispenseKind::Bill,
            count: 2,
            value: 100,
        }]);
        let result = orchestrator.execute(&plan).await;
        assert!(result.success);
        assert_eq!(result.total_dispensed, 200);
        assert_eq!(result.shortfall, 0);
        assert!(result.claim_ticket_code.is_none());
    }

    #[tokio::test]
    async fn hardware_shortfall_issues_claim_ticket_and_restores_unused_reservation() {
        let bill_link = Arc::new(SimSerialLink::new());
        bill_link.set_bill_dispenser_count(100, 1);
        let state = MachineStateStore::new(&KioskConfig::default());
        state.set_dispenser_counts([("100".to_string(), 1)].into_iter().collect());
        let orchestrator = DispenseOrchestrator::new(
            BillController::new(bill_link),
            CoinSecurityController::new(Arc::new(SimSerialLink::new())),
            state.clone(),
            Arc::new(NullDispenseSink),
        );

        let plan = plan(vec![DispensePlanItem {
            denom: "100".to_string(),
            kind: DispenseKind::Bill,
            count: 3,
            value: 100,
        }]);
        let result = orchestrator.execute(&plan).await;
        assert!(!result.success);
        assert_eq!(result.total_dispensed, 100);
        assert_eq!(result.shortfall, 200);
        let ticket = result.claim_ticket_code.expect("claim ticket expected on shortfall");
        assert_eq!(ticket.len(), CLAIM_TICKET_LEN);
        assert!(ticket.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

        // Reservation decremented the starting count of 1 to 0; only 1 bill
        // was ever dispensable, so the unfulfilled 2 units must not linger
        // reserved away from inventory that was never really there.
        let snapshot = state.snapshot();
        assert_eq!(snapshot.consumables.bill_dispenser_counts.get("100"), Some(&0));
    }

    #[tokio::test]
    async fn bill_failure_skips_coin_dispensing() {
        let bill_link = Arc::new(SimSerialLink::new());
        bill_link.set_bill_dispenser_count(100, 0);
        let coin_link = Arc::new(SimSerialLink::new());
        coin_link.set_coin_count(20, 10);
        let state = MachineStateStore::new(&KioskConfig::default());
        state.set_dispenser_counts([("100".to_string(), 1)].into_iter().collect());
        state.set_coin_counts([("20".to_string(), 5)].into_iter().collect());
        let orchestrator = DispenseOrchestrator::new(
            BillController::new(bill_link),
            CoinSecurityController::new(coin_link),
            state.clone(),
            Arc::new(NullDispenseSink),
        );

        let plan = plan(vec![
            DispensePlanItem { denom: "100".to_string(), kind: DispenseKind::Bill, count: 1, value: 100 },
            DispensePlanItem { denom: "20".to_string(), kind: DispenseKind::Coin, count: 1, value: 20 },
        ]);
        let result = orchestrator.execute(&plan).await;
        assert!(result.dispensed_coins.is_empty());
        assert_eq!(result.total_dispensed, 0);

        // The bill item that failed is reconciled by its own dispense path,
        // but the coin item never got attempted at all and must still have
        // its reservation restored.
        let snapshot = state.snapshot();
        assert_eq!(snapshot.consumables.bill_dispenser_counts.get("100"), Some(&1));
        assert_eq!(snapshot.consumables.coin_counts.get("20"), Some(&5));
    }
}
