//! Bill-Acceptance Pipeline (§4.5): drives the conveyor, UV/white-light
//! authentication, sorting, and storage for one inserted bill.
//!
//! Grounded in the teacher's `DropGuard<T, F>` (`util::DropGuard`, wrapping
//! the sensor-poll receiver in `payout_sensor_pool`/`currency_acceptor_pool`):
//! [`PipelineGuard`] owns the `Gpio` handle for the pipeline call and runs the
//! release sequence unconditionally in `Drop`. Unlike the teacher's generic
//! version, the cleanup here is itself async (`motor_stop`/`uv_led_off`/
//! `white_led_off` are all `Gpio` methods), and `Drop` cannot `.await`; the
//! fallback path spawns the release as a detached task instead of running it
//! inline, which is what makes the guarantee hold across task cancellation.

use crate::config::KioskConfig;
use crate::state_store::MachineStateStore;
use kiosk_core::denom::BillDenom;
use kiosk_core::error::ErrorCode;
use kiosk_host::capability::{
    Authenticator, AuthenticatorError, Camera, CameraError, Gpio, GpioError,
};
use kiosk_host::error::CommandError;
use kiosk_host::{capability::LinkError, BillController};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{info, instrument, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Gpio(#[from] GpioError),
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Authenticator(#[from] AuthenticatorError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TimeoutPosition,
    NotGenuine,
    UnknownDenomination,
    StorageFull,
}

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// No bill arrived at the entry sensor before `bill_acceptance_timeout`.
    NoBillDetected,
    Rejected { reason: RejectReason, confidence: Option<f32> },
    Stored { denom: BillDenom, auth_confidence: f32, denom_confidence: f32 },
}

#[derive(Debug, Clone)]
pub enum PipelineBroadcast {
    BillRejected { reason: RejectReason, confidence: Option<f32> },
    BillSorting { denom: BillDenom },
    BillStored { denom: BillDenom, value: u32 },
}

pub trait PipelineSink: Send + Sync {
    fn publish(&self, event: PipelineBroadcast);
}

pub struct NullPipelineSink;

impl PipelineSink for NullPipelineSink {
    fn publish(&self, _event: PipelineBroadcast) {}
}

/// Scoped ownership of the `Gpio` handle for one pipeline run. `release()`
/// is the happy-path call; `Drop` is the backstop for early returns, panics,
/// and task cancellation, so the motor and both LEDs are never left running.
struct PipelineGuard {
    gpio: Arc<dyn Gpio>,
    released: AtomicBool,
}

impl PipelineGuard {
    fn new(gpio: Arc<dyn Gpio>) -> Self {
        Self { gpio, released: AtomicBool::new(false) }
    }

    async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.gpio.motor_stop().await;
        let _ = self.gpio.uv_led_off().await;
        let _ = self.gpio.white_led_off().await;
    }
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        let gpio = self.gpio.clone();
        tokio::spawn(async move {
            let _ = gpio.motor_stop().await;
            let _ = gpio.uv_led_off().await;
            let _ = gpio.white_led_off().await;
        });
    }
}

pub struct BillAcceptancePipeline {
    gpio: Arc<dyn Gpio>,
    camera: Arc<dyn Camera>,
    authenticator: Arc<dyn Authenticator>,
    bill: BillController,
    state: Arc<MachineStateStore>,
    sink: Arc<dyn PipelineSink>,
    config: Arc<KioskConfig>,
}

impl BillAcceptancePipeline {
    #[must_use]
    pub fn new(
        gpio: Arc<dyn Gpio>,
        camera: Arc<dyn Camera>,
        authenticator: Arc<dyn Authenticator>,
        bill: BillController,
        state: Arc<MachineStateStore>,
        sink: Arc<dyn PipelineSink>,
        config: Arc<KioskConfig>,
    ) -> Self {
        Self { gpio, camera, authenticator, bill, state, sink, config }
    }

    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<PipelineOutcome, PipelineError> {
        let guard = PipelineGuard::new(self.gpio.clone());

        if !self.wait_for(|| self.gpio.is_bill_at_entry(), self.config.bill_acceptance_timeout()).await? {
            guard.release().await;
            return Ok(PipelineOutcome::NoBillDetected);
        }

        self.gpio.motor_forward(self.config.bill_pull_speed).await?;
        let positioned =
            self.wait_for(|| self.gpio.is_bill_in_position(), self.config.bill_position_timeout()).await?;
        self.gpio.motor_stop().await?;
        if !positioned {
            self.eject().await?;
            guard.release().await;
            return Ok(PipelineOutcome::Rejected { reason: RejectReason::TimeoutPosition, confidence: None });
        }

        self.gpio.uv_led_on().await?;
        sleep(self.config.led_stabilization_delay()).await;
        let uv_frame = self.camera.capture_frame().await?;
        let auth = self.authenticator.authenticate(&uv_frame).await?;
        self.gpio.uv_led_off().await?;
        if !auth.is_genuine {
            self.eject().await?;
            self.sink.publish(PipelineBroadcast::BillRejected {
                reason: RejectReason::NotGenuine,
                confidence: Some(auth.confidence),
            });
            guard.release().await;
            return Ok(PipelineOutcome::Rejected {
                reason: RejectReason::NotGenuine,
                confidence: Some(auth.confidence),
            });
        }

        self.gpio.white_led_on().await?;
        sleep(self.config.led_stabilization_delay()).await;
        let white_frame = self.camera.capture_frame().await?;
        let identified = self.authenticator.identify_denomination(&white_frame).await?;
        self.gpio.white_led_off().await?;
        let Some(denom) = identified.denomination else {
            self.eject().await?;
            guard.release().await;
            return Ok(PipelineOutcome::Rejected {
                reason: RejectReason::UnknownDenomination,
                confidence: Some(identified.confidence),
            });
        };

        if self.state.is_storage_full(denom) {
            self.eject().await?;
            self.sink.publish(PipelineBroadcast::BillRejected { reason: RejectReason::StorageFull, confidence: None });
            guard.release().await;
            return Ok(PipelineOutcome::Rejected { reason: RejectReason::StorageFull, confidence: None });
        }

        self.sink.publish(PipelineBroadcast::BillSorting { denom });
        if let Err(error) = self.sort_with_home_retry(denom).await {
            guard.release().await;
            return Err(error);
        }

        self.gpio.motor_forward(self.config.bill_store_speed).await?;
        sleep(self.config.bill_store_duration()).await;
        self.gpio.motor_stop().await?;

        self.state.increment_bill_storage(denom, 1);
        self.sink.publish(PipelineBroadcast::BillStored { denom, value: denom.value() });
        guard.release().await;

        info!(%denom, auth_confidence = auth.confidence, denom_confidence = identified.confidence, "bill stored");
        Ok(PipelineOutcome::Stored {
            denom,
            auth_confidence: auth.confidence,
            denom_confidence: identified.confidence,
        })
    }

    /// One automatic `home()` then one retry on `HardwareError{NOT_HOMED}`;
    /// any other code, or a repeat `NOT_HOMED`, escalates.
    async fn sort_with_home_retry(&self, denom: BillDenom) -> Result<(), PipelineError> {
        match self.bill.sort(denom.value()).await {
            Ok(_) => Ok(()),
            Err(CommandError::Link(LinkError::Hardware(hardware))) if hardware.code == ErrorCode::NotHomed => {
                warn!(%denom, "sorter not homed, homing and retrying once");
                self.bill.home().await?;
                self.bill.sort(denom.value()).await?;
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn eject(&self) -> Result<(), PipelineError> {
        self.gpio.motor_reverse(self.config.bill_eject_speed).await?;
        sleep(self.config.bill_eject_duration()).await;
        self.gpio.motor_stop().await?;
        Ok(())
    }

    /// Polls `probe` every 50ms until it returns `true` or `timeout` elapses.
    async fn wait_for<F, Fut>(&self, probe: F, timeout: Duration) -> Result<bool, PipelineError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<bool, GpioError>>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if probe().await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{MotorState, SimAuthenticator, SimCamera, SimGpio, SimSerialLink};

    fn pipeline(
        gpio: Arc<SimGpio>,
        camera: Arc<SimCamera>,
        authenticator: Arc<SimAuthenticator>,
        link: Arc<SimSerialLink>,
        config: KioskConfig,
    ) -> BillAcceptancePipeline {
        let state = MachineStateStore::new(&config);
        BillAcceptancePipeline::new(
            gpio,
            camera,
            authenticator,
            BillController::new(link),
            state,
            Arc::new(NullPipelineSink),
            Arc::new(config),
        )
    }

    fn fast_config() -> KioskConfig {
        KioskConfig {
            bill_acceptance_timeout_secs: 0.2,
            bill_position_timeout_secs: 0.2,
            led_stabilization_delay_secs: 0.0,
            bill_store_duration_secs: 0.0,
            bill_eject_duration_secs: 0.0,
            ..KioskConfig::default()
        }
    }

    #[tokio::test]
    async fn no_bill_detected_times_out_without_moving_the_motor() {
        let gpio = Arc::new(SimGpio::new());
        let link = Arc::new(SimSerialLink::new());
        let pipeline = pipeline(gpio.clone(), Arc::new(SimCamera::new()), Arc::new(SimAuthenticator::new()), link, fast_config());
        let outcome = pipeline.run().await.unwrap();
        assert!(matches!(outcome, PipelineOutcome::NoBillDetected));
        assert_eq!(gpio.motor_state(), MotorState::Stopped);
    }

    #[tokio::test]
    async fn counterfeit_bill_is_ejected_and_rejected() {
        let gpio = Arc::new(SimGpio::new());
        gpio.set_bill_at_entry(true);
        gpio.set_bill_in_position(true);
        let auth = Arc::new(SimAuthenticator::new());
        auth.set_genuine(false);
        let link = Arc::new(SimSerialLink::new());
        let camera = Arc::new(SimCamera::new());
        camera.initialize().await.unwrap();
        let pipeline = pipeline(gpio, camera, auth, link, fast_config());

        let outcome = pipeline.run().await.unwrap();
        match outcome {
            PipelineOutcome::Rejected { reason, .. } => assert_eq!(reason, RejectReason::NotGenuine),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn genuine_bill_is_sorted_and_stored() {
        let gpio = Arc::new(SimGpio::new());
        gpio.set_bill_at_entry(true);
        gpio.set_bill_in_position(true);
        let link = Arc::new(SimSerialLink::new());
        link.set_homed(true);
        let camera = Arc::new(SimCamera::new());
        camera.initialize().await.unwrap();
        let pipeline = pipeline(gpio, camera, Arc::new(SimAuthenticator::new()), link, fast_config());

        let outcome = pipeline.run().await.unwrap();
        match outcome {
            PipelineOutcome::Stored { denom, .. } => assert_eq!(denom, BillDenom::Php100),
            other => panic!("expected stored, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_homed_sorter_homes_and_retries_once() {
        let gpio = Arc::new(SimGpio::new());
        gpio.set_bill_at_entry(true);
        gpio.set_bill_in_position(true);
        let link = Arc::new(SimSerialLink::new());
        let camera = Arc::new(SimCamera::new());
        camera.initialize().await.unwrap();
        // left unhomed deliberately: first sort() fails NOT_HOMED, retry succeeds after home()
        let pipeline = pipeline(gpio, camera, Arc::new(SimAuthenticator::new()), link, fast_config());

        let outcome = pipeline.run().await.unwrap();
        assert!(matches!(outcome, PipelineOutcome::Stored { .. }));
    }

    #[tokio::test]
    async fn storage_full_denom_is_ejected_and_rejected() {
        let gpio = Arc::new(SimGpio::new());
        gpio.set_bill_at_entry(true);
        gpio.set_bill_in_position(true);
        let link = Arc::new(SimSerialLink::new());
        link.set_homed(true);
        let camera = Arc::new(SimCamera::new());
        camera.initialize().await.unwrap();
        let mut config = fast_config();
        config.storage_slot_capacity = 0;
        let pipeline = pipeline(gpio, camera, Arc::new(SimAuthenticator::new()), link, config);

        let outcome = pipeline.run().await.unwrap();
        match outcome {
            PipelineOutcome::Rejected { reason, .. } => assert_eq!(reason, RejectReason::StorageFull),
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
