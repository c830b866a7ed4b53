//! The `Kiosk` lifecycle object (§5): brings persistence, state, transport,
//! and the orchestrator stack up in dependency order, and tears them down in
//! reverse on shutdown. Mirrors the shape of the teacher's device pool
//! constructors (`CurrencyAcceptorPool::new`/`PayoutPool::new`), generalized
//! from "one pool over N devices of the same kind" to "one process over the
//! kiosk's two fixed peripherals plus its in-process capability simulators".
//!
//! `Gpio`, `Camera`, and `Authenticator` are always backed by their
//! simulators here: no repo in this corpus carries a GPIO, camera, or ML
//! inference crate, and fabricating one is out of bounds. `use_mock_hardware`
//! is accepted for forward compatibility but currently has no effect besides
//! a startup warning when it's left `false`; only the serial link itself
//! (`use_mock_serial`) has a real, non-simulated implementation.

use crate::bill_pipeline::{BillAcceptancePipeline, NullPipelineSink};
use crate::config::KioskConfig;
use crate::dispatcher::EventDispatcher;
use crate::dispense::{DispenseOrchestrator, NullDispenseSink};
use crate::orchestrator::{NullOrchestratorSink, TransactionOrchestrator};
use crate::persistence::PersistenceStore;
use crate::sim::{SimAuthenticator, SimCamera, SimGpio, SimSerialLink};
use crate::state_machine::BroadcastChannel;
use crate::state_store::MachineStateStore;
use crate::transport::spawn_link;
use kiosk_core::error::{KioskError, KioskResult};
use kiosk_core::wire::ControllerKind;
use kiosk_host::capability::{Authenticator, Camera, Gpio, SerialLink};
use kiosk_host::{BillController, CoinSecurityController};
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Everything spawned or opened while bringing a [`Kiosk`] up, torn down in
/// reverse by [`Kiosk::shutdown`].
struct Handles {
    dispatcher: JoinHandle<()>,
    bill_link: JoinHandle<()>,
    coin_link: JoinHandle<()>,
    shutdown_tx: broadcast::Sender<()>,
}

/// One running kiosk process. Construct with [`Kiosk::start`], tear down with
/// [`Kiosk::shutdown`]; the orchestrator field is the surface callers (the
/// CLI exerciser, eventually a front-end API) actually drive.
pub struct Kiosk {
    pub config: Arc<KioskConfig>,
    pub state: Arc<MachineStateStore>,
    pub orchestrator: Arc<TransactionOrchestrator>,
    persistence: PersistenceStore,
    gpio: Arc<dyn Gpio>,
    camera: Arc<dyn Camera>,
    handles: Handles,
}

impl Kiosk {
    /// Brings up the full stack per §5:
    /// 1. Persistence connects and migrates.
    /// 2. The machine state store and event dispatcher come up.
    /// 3. Both peripheral links connect — real `TokioSerialLink`s over a
    ///    Unix socket when `use_mock_serial` is unset, in-process
    ///    `SimSerialLink`s otherwise.
    /// 4. The bill-acceptance pipeline and dispense orchestrator are built
    ///    over the (always simulated) `Gpio`/`Camera`/`Authenticator`.
    /// 5. Crash recovery runs before the transaction orchestrator is handed
    ///    back to the caller.
    pub async fn start(config: KioskConfig) -> KioskResult<Self> {
        if !config.use_mock_hardware {
            warn!("use_mock_hardware=false has no effect: Gpio/Camera/Authenticator are simulator-only in this build");
        }

        let config = Arc::new(config);
        let persistence = PersistenceStore::connect(&config.db_url)
            .await
            .map_err(|e| KioskError::Configuration(format!("persistence connect failed: {e}")))?;
        let state = MachineStateStore::new(&config);
        let dispatcher = EventDispatcher::new(state.clone());

        let (event_tx, event_rx) = mpsc::channel(128);
        let (shutdown_tx, _) = broadcast::channel(1);

        let (bill_link, bill_join) =
            connect_link(&config, &config.serial_port_bill, ControllerKind::Bill, event_tx.clone()).await?;
        let (coin_link, coin_join) =
            connect_link(&config, &config.serial_port_coin, ControllerKind::CoinSecurity, event_tx.clone())
                .await?;
        drop(event_tx);

        let dispatcher_handle = tokio::spawn(dispatcher.run(event_rx, shutdown_tx.subscribe()));

        let gpio: Arc<dyn Gpio> = Arc::new(SimGpio::new());
        let camera: Arc<dyn Camera> = Arc::new(SimCamera::new());
        camera
            .initialize()
            .await
            .map_err(|e| KioskError::Configuration(format!("camera init failed: {e}")))?;
        let authenticator: Arc<dyn Authenticator> = Arc::new(SimAuthenticator::new());

        let pipeline = Arc::new(BillAcceptancePipeline::new(
            gpio.clone(),
            camera.clone(),
            authenticator,
            BillController::new(bill_link.clone()),
            state.clone(),
            Arc::new(NullPipelineSink),
            config.clone(),
        ));
        let dispense = Arc::new(DispenseOrchestrator::new(
            BillController::new(bill_link.clone()),
            CoinSecurityController::new(coin_link.clone()),
            state.clone(),
            Arc::new(NullDispenseSink),
        ));

        let orchestrator = TransactionOrchestrator::new(
            persistence.clone(),
            state.clone(),
            pipeline,
            dispense,
            BroadcastChannel::new(128),
            Arc::new(NullOrchestratorSink),
        );
        orchestrator.recover_from_crash().await?;

        info!("kiosk started");
        Ok(Self {
            config,
            state,
            orchestrator,
            persistence,
            gpio,
            camera,
            handles: Handles { dispatcher: dispatcher_handle, bill_link: bill_join, coin_link: coin_join, shutdown_tx },
        })
    }

    /// Tears the stack down in the order §5 specifies: stop the dispatcher,
    /// close both links, release the camera, clean up GPIO, then dispose the
    /// database pool.
    pub async fn shutdown(self) -> KioskResult<()> {
        info!("kiosk shutting down");
        let _ = self.handles.shutdown_tx.send(());
        let _ = self.handles.dispatcher.await;

        self.handles.bill_link.abort();
        self.handles.coin_link.abort();

        if let Err(error) = self.camera.release().await {
            warn!(%error, "camera release failed during shutdown");
        }
        if let Err(error) = self.gpio.cleanup().await {
            warn!(%error, "gpio cleanup failed during shutdown");
        }

        self.persistence.pool().close().await;
        Ok(())
    }
}

async fn connect_link(
    config: &KioskConfig,
    port: &str,
    controller: ControllerKind,
    event_tx: mpsc::Sender<(ControllerKind, kiosk_core::wire::Event)>,
) -> KioskResult<(Arc<dyn SerialLink>, JoinHandle<()>)> {
    if config.use_mock_serial {
        let link: Arc<dyn SerialLink> = Arc::new(SimSerialLink::new());
        return Ok((link, tokio::spawn(std::future::ready(()))));
    }

    let stream = UnixStream::connect(port)
        .await
        .map_err(|e| KioskError::Configuration(format!("failed to connect to {port}: {e}")))?;
    let (handle, join) = spawn_link(port.to_string(), stream, controller, event_tx);
    Ok((Arc::new(handle), join))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_core::transaction::TransactionType;

    fn mock_config() -> KioskConfig {
        KioskConfig {
            use_mock_serial: true,
            use_mock_hardware: true,
            db_url: "sqlite::memory:".to_string(),
            bill_acceptance_timeout_secs: 0.2,
            bill_position_timeout_secs: 0.2,
            led_stabilization_delay_secs: 0.0,
            bill_store_duration_secs: 0.0,
            bill_eject_duration_secs: 0.0,
            ..KioskConfig::default()
        }
    }

    #[tokio::test]
    async fn starts_and_shuts_down_cleanly_with_mocked_serial() {
        let kiosk = Kiosk::start(mock_config()).await.unwrap();
        assert!(kiosk.orchestrator.active_record().await.is_none());
        kiosk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn can_drive_a_transaction_through_the_wired_up_stack() {
        let kiosk = Kiosk::start(mock_config()).await.unwrap();
        kiosk.state.set_coin_counts(std::collections::BTreeMap::from([("5".to_string(), 20)]));

        let record = kiosk
            .orchestrator
            .start_transaction(TransactionType::CoinToBill, 5, 0, vec![])
            .await
            .unwrap();
        assert_eq!(record.state.to_string(), "WAITING_FOR_BILL");

        let record = kiosk.orchestrator.handle_coin_inserted(5, 1).await.unwrap();
        assert_eq!(record.inserted_amount, 5);

        kiosk.shutdown().await.unwrap();
    }
}
