//! Event Dispatcher (§4.4): drains the shared event sink the transport links
//! feed into, updates the machine state store, and fans out a broadcast of
//! higher-level runtime events for downstream consumers (the orchestrator,
//! the CLI, any future status API).

use crate::state_store::MachineStateStore;
use kiosk_core::machine::{DeviceConnectionState, MachineStateSnapshot};
use kiosk_core::wire::{ControllerKind, Event};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Runtime-level events broadcast after a raw peripheral event has been
/// applied to the state store. Distinct from [`Event`], which is the wire
/// shape; this is what callers above the transport layer actually want.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    CoinInserted { denom: u32, total: u32 },
    Tamper { sensor: String },
    StateChange { door_locked: bool },
    DeviceConnected { controller: ControllerKind, version: String },
}

/// Owns the receiving end of the transport event channel and the broadcast
/// sender downstream consumers subscribe to.
pub struct EventDispatcher {
    state: Arc<MachineStateStore>,
    broadcast_tx: broadcast::Sender<RuntimeEvent>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(state: Arc<MachineStateStore>) -> Self {
        let (broadcast_tx, _rx) = broadcast::channel(128);
        Self { state, broadcast_tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Drains `events` until the channel closes or `shutdown` fires.
    /// Cancellation-safe: a pending `recv` can be dropped at any `.await`
    /// point without losing an already-applied state mutation, since the
    /// mutation and the broadcast happen only after an event is fully read.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<(ControllerKind, Event)>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("event dispatcher shutting down");
                    break;
                }
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some((controller, event)) => self.handle(controller, event),
                        None => {
                            warn!("event sink closed, dispatcher stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn handle(&self, controller: ControllerKind, event: Event) {
        match event {
            Event::CoinIn { denom, total } => {
                self.state.increment_coin(denom, 1);
                self.publish(RuntimeEvent::CoinInserted { denom, total });
            }
            Event::Tamper { sensor } => {
                self.state.update_security(None, Some(true), Some(sensor.clone()));
                self.publish(RuntimeEvent::Tamper { sensor });
            }
            Event::DoorState { locked } => {
                self.state.update_security(Some(locked), None, None);
                self.publish(RuntimeEvent::StateChange { door_locked: locked });
            }
            Event::Ready { version, controller: reported } => {
                debug!(%reported, %version, "controller reported ready");
                match controller {
                    ControllerKind::Bill => {
                        self.state.update_bill_device(
                            Some(DeviceConnectionState::Connected),
                            Some(version.clone()),
                            None,
                        );
                    }
                    ControllerKind::CoinSecurity => {
                        self.state.update_coin_device(
                            Some(DeviceConnectionState::Connected),
                            Some(version.clone()),
                            None,
                        );
                    }
                }
                self.publish(RuntimeEvent::DeviceConnected { controller, version });
            }
            Event::Keypad { key } => {
                debug!(%key, "keypad event (no state effect)");
            }
        }
    }

    fn publish(&self, event: RuntimeEvent) {
        // No subscribers is not an error: the dispatcher runs even when
        // nothing is currently listening for runtime events.
        let _ = self.broadcast_tx.send(event);
    }

    #[must_use]
    pub fn snapshot(&self) -> MachineStateSnapshot {
        self.state.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KioskConfig;

    fn dispatcher() -> EventDispatcher {
        EventDispatcher::new(MachineStateStore::new(&KioskConfig::default()))
    }

    #[tokio::test]
    async fn coin_in_increments_state_and_broadcasts() {
        let dispatcher = dispatcher();
        let mut rx = dispatcher.subscribe();
        dispatcher.handle(ControllerKind::CoinSecurity, Event::CoinIn { denom: 5, total: 15 });

        let snapshot = dispatcher.snapshot();
        assert_eq!(snapshot.consumables.coin_counts.get("5"), Some(&1));
        match rx.try_recv() {
            Ok(RuntimeEvent::CoinInserted { denom, total }) => {
                assert_eq!(denom, 5);
                assert_eq!(total, 15);
            }
            other => panic!("expected CoinInserted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tamper_sets_security_state() {
        let dispatcher = dispatcher();
        dispatcher.handle(ControllerKind::CoinSecurity, Event::Tamper { sensor: "door".to_string() });
        let snapshot = dispatcher.snapshot();
        assert!(snapshot.security.tamper_active);
        assert_eq!(snapshot.security.last_tamper_sensor.as_deref(), Some("door"));
    }

    #[tokio::test]
    async fn ready_marks_the_reporting_controller_connected() {
        let dispatcher = dispatcher();
        dispatcher.handle(
            ControllerKind::Bill,
            Event::Ready { version: "1.2.0".to_string(), controller: "bill".to_string() },
        );
        let snapshot = dispatcher.snapshot();
        assert_eq!(snapshot.bill_device.connection, Some(DeviceConnectionState::Connected));
        assert_eq!(snapshot.bill_device.firmware.as_deref(), Some("1.2.0"));
        assert_eq!(snapshot.coin_device.connection, Some(DeviceConnectionState::Disconnected));
    }

    #[tokio::test]
    async fn keypad_has_no_state_effect_and_does_not_broadcast() {
        let dispatcher = dispatcher();
        let mut rx = dispatcher.subscribe();
        dispatcher.handle(ControllerKind::Bill, Event::Keypad { key: "5".to_string() });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let dispatcher = dispatcher();
        let (events_tx, events_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(dispatcher.run(events_rx, shutdown_rx));
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        drop(events_tx);
    }
}
