//! In-memory GPIO simulator: tracks motor direction/speed and LED/sensor
//! state instead of driving real pins. Sensor states are settable from tests
//! via the `set_*` helpers to script a pipeline run.

use async_trait::async_trait;
use kiosk_host::capability::{Gpio, GpioError};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorState {
    Stopped,
    Forward(u8),
    Reverse(u8),
}

pub struct SimGpio {
    motor: std::sync::Mutex<MotorState>,
    uv_led: AtomicBool,
    white_led: AtomicBool,
    bill_at_entry: AtomicBool,
    bill_in_position: AtomicBool,
    setup_calls: AtomicU8,
}

impl Default for SimGpio {
    fn default() -> Self {
        Self {
            motor: std::sync::Mutex::new(MotorState::Stopped),
            uv_led: AtomicBool::new(false),
            white_led: AtomicBool::new(false),
            bill_at_entry: AtomicBool::new(false),
            bill_in_position: AtomicBool::new(false),
            setup_calls: AtomicU8::new(0),
        }
    }
}

impl SimGpio {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bill_at_entry(&self, present: bool) {
        self.bill_at_entry.store(present, Ordering::SeqCst);
    }

    pub fn set_bill_in_position(&self, present: bool) {
        self.bill_in_position.store(present, Ordering::SeqCst);
    }

    #[must_use]
    pub fn motor_state(&self) -> MotorState {
        *self.motor.lock().expect("sim gpio lock poisoned")
    }

    #[must_use]
    pub fn uv_led_is_on(&self) -> bool {
        self.uv_led.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn white_led_is_on(&self) -> bool {
        self.white_led.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Gpio for SimGpio {
    async fn setup(&self) -> Result<(), GpioError> {
        self.setup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), GpioError> {
        *self.motor.lock().expect("sim gpio lock poisoned") = MotorState::Stopped;
        self.uv_led.store(false, Ordering::SeqCst);
        self.white_led.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn motor_forward(&self, speed: u8) -> Result<(), GpioError> {
        *self.motor.lock().expect("sim gpio lock poisoned") = MotorState::Forward(speed);
        Ok(())
    }

    async fn motor_reverse(&self, speed: u8) -> Result<(), GpioError> {
        *self.motor.lock().expect("sim gpio lock poisoned") = MotorState::Reverse(speed);
        Ok(())
    }

    async fn motor_stop(&self) -> Result<(), GpioError> {
        *self.motor.lock().expect("sim gpio lock poisoned") = MotorState::Stopped;
        Ok(())
    }

    async fn is_bill_at_entry(&self) -> Result<bool, GpioError> {
        Ok(self.bill_at_entry.load(Ordering::SeqCst))
    }

    async fn is_bill_in_position(&self) -> Result<bool, GpioError> {
        Ok(self.bill_in_position.load(Ordering::SeqCst))
    }

    async fn uv_led_on(&self) -> Result<(), GpioError> {
        self.uv_led.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn uv_led_off(&self) -> Result<(), GpioError> {
        self.uv_led.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn white_led_on(&self) -> Result<(), GpioError> {
        self.white_led.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn white_led_off(&self) -> Result<(), GpioError> {
        self.white_led.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cleanup_stops_motor_and_turns_off_leds() {
        let gpio = SimGpio::new();
        gpio.motor_forward(60).await.unwrap();
        gpio.uv_led_on().await.unwrap();
        gpio.white_led_on().await.unwrap();
        gpio.cleanup().await.unwrap();
        assert_eq!(gpio.motor_state(), MotorState::Stopped);
        assert!(!gpio.uv_led_is_on());
        assert!(!gpio.white_led_is_on());
    }

    #[tokio::test]
    async fn sensors_reflect_scripted_state() {
        let gpio = SimGpio::new();
        assert!(!gpio.is_bill_at_entry().await.unwrap());
        gpio.set_bill_at_entry(true);
        assert!(gpio.is_bill_at_entry().await.unwrap());
    }
}
