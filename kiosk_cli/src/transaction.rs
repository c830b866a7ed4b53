use crate::{Commands, TxKind};
use kiosk_runtime::Kiosk;
use tracing::{error, info};

/// Dispatches one [`Commands`] variant against `kiosk`'s transaction
/// orchestrator and prints the resulting record. For every command except
/// `Start`, first reattaches to whatever transaction an earlier invocation
/// of this binary left active, since the orchestrator's active-transaction
/// slot is process-local and does not itself survive a restart.
pub async fn handler(kiosk: &Kiosk, command: &Commands) {
    match command {
        Commands::Start { kind, amount, fee, selected } => start(kiosk, *kind, *amount, *fee, selected).await,
        Commands::AcceptBill => {
            if reattach(kiosk).await {
                accept_bill(kiosk).await;
            }
        }
        Commands::InsertCoin { denom, count } => {
            if reattach(kiosk).await {
                insert_coin(kiosk, *denom, *count).await;
            }
        }
        Commands::Confirm => {
            if reattach(kiosk).await {
                confirm(kiosk).await;
            }
        }
        Commands::Cancel => {
            if reattach(kiosk).await {
                cancel(kiosk).await;
            }
        }
        Commands::Status => {
            if reattach(kiosk).await {
                status(kiosk).await;
            }
        }
    }
}

async fn reattach(kiosk: &Kiosk) -> bool {
    match kiosk.orchestrator.attach_active().await {
        Ok(Some(_)) => true,
        Ok(None) => {
            error!("no active transaction in this session; run `start` first");
            false
        }
        Err(e) => {
            error!("failed to reattach to an active transaction: {e}");
            false
        }
    }
}

async fn start(kiosk: &Kiosk, kind: TxKind, amount: u32, fee: u32, selected: &[u32]) {
    match kiosk.orchestrator.start_transaction(kind.into(), amount, fee, selected.to_vec()).await {
        Ok(record) => print_record(&record),
        Err(e) => error!("failed to start transaction: {e}"),
    }
}

async fn accept_bill(kiosk: &Kiosk) {
    match kiosk.orchestrator.handle_bill_inserted().await {
        Ok(record) => print_record(&record),
        Err(e) => error!("bill-acceptance cycle failed: {e}"),
    }
}

async fn insert_coin(kiosk: &Kiosk, denom: u32, count: u32) {
    match kiosk.orchestrator.handle_coin_inserted(denom, count).await {
        Ok(record) => print_record(&record),
        Err(e) => error!("coin insertion failed: {e}"),
    }
}

async fn confirm(kiosk: &Kiosk) {
    match kiosk.orchestrator.confirm_transaction().await {
        Ok(record) => print_record(&record),
        Err(e) => error!("confirmation failed: {e}"),
    }
}

async fn cancel(kiosk: &Kiosk) {
    match kiosk.orchestrator.cancel_transaction().await {
        Ok(record) => print_record(&record),
        Err(e) => error!("cancel failed: {e}"),
    }
}

async fn status(kiosk: &Kiosk) {
    match kiosk.orchestrator.active_record().await {
        Some(record) => print_record(&record),
        None => info!("no active transaction"),
    }
}

fn print_record(record: &kiosk_core::transaction::TransactionRecord) {
    match serde_json::to_string_pretty(record) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("failed to serialize transaction record: {e}"),
    }
}
