//! Capability traits abstracting every hardware dependency of the bill
//! pipeline: GPIO/motor/LED control, camera capture, ML authentication, and
//! the serial link itself. Each has a hardware-backed implementation (in
//! `kiosk_runtime::hw`) and a simulator (in `kiosk_runtime::sim`), injected
//! at construction as `Arc<dyn Trait + Send + Sync>`. No reflection.

use async_trait::async_trait;
use kiosk_core::denom::BillDenom;
use kiosk_core::wire::Command;
use std::time::Duration;
use thiserror::Error;

/// A captured RGB frame. Implementations must not mutate the frame once
/// returned; consumers (the authenticator) treat it as read-only.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// Errors a GPIO implementation can raise. Hardware implementations map
/// driver-specific failures into this; the simulator never produces one.
#[derive(Debug, Clone, Error)]
pub enum GpioError {
    #[error("gpio setup failed: {0}")]
    SetupFailed(String),
    #[error("gpio operation failed: {0}")]
    OperationFailed(String),
}

/// Motor, LED, and IR-sensor control for the bill-acceptance conveyor.
#[async_trait]
pub trait Gpio: Send + Sync {
    async fn setup(&self) -> Result<(), GpioError>;
    async fn cleanup(&self) -> Result<(), GpioError>;
    async fn motor_forward(&self, speed: u8) -> Result<(), GpioError>;
    async fn motor_reverse(&self, speed: u8) -> Result<(), GpioError>;
    async fn motor_stop(&self) -> Result<(), GpioError>;
    async fn is_bill_at_entry(&self) -> Result<bool, GpioError>;
    async fn is_bill_in_position(&self) -> Result<bool, GpioError>;
    async fn uv_led_on(&self) -> Result<(), GpioError>;
    async fn uv_led_off(&self) -> Result<(), GpioError>;
    async fn white_led_on(&self) -> Result<(), GpioError>;
    async fn white_led_off(&self) -> Result<(), GpioError>;
}

#[derive(Debug, Clone, Error)]
pub enum CameraError {
    #[error("camera initialization failed: {0}")]
    InitFailed(String),
    #[error("frame capture failed: {0}")]
    CaptureFailed(String),
}

/// Frame capture over the bill-position camera. `capture_frame` discards the
/// first frame after `initialize` (sensor warm-up) at the implementation
/// level; callers always get a settled frame.
#[async_trait]
pub trait Camera: Send + Sync {
    async fn initialize(&self) -> Result<(), CameraError>;
    async fn capture_frame(&self) -> Result<CameraFrame, CameraError>;
    async fn release(&self) -> Result<(), CameraError>;
}

/// Result of UV authenticity inspection.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub is_genuine: bool,
    pub confidence: f32,
    pub raw_label: Option<String>,
}

/// Result of visible-light denomination identification.
#[derive(Debug, Clone)]
pub struct DenomResult {
    pub confidence: f32,
    pub denomination: Option<BillDenom>,
    pub raw_label: Option<String>,
}

#[derive(Debug, Clone, Error)]
#[error("authenticator inference failed: {0}")]
pub struct AuthenticatorError(pub String);

/// ML inference over captured frames. Implementations must not mutate the
/// input frame.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, frame: &CameraFrame) -> Result<AuthResult, AuthenticatorError>;
    async fn identify_denomination(&self, frame: &CameraFrame) -> Result<DenomResult, AuthenticatorError>;
}

/// Errors from sending a command over a serial link.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error(transparent)]
    Serial(#[from] kiosk_core::error::SerialError),
    #[error(transparent)]
    Timeout(#[from] kiosk_core::error::TimeoutError),
    #[error(transparent)]
    Hardware(#[from] kiosk_core::error::HardwareError),
}

pub type LinkResult<T> = Result<T, LinkError>;

/// A single peripheral connection with at-most-one-pending-request semantics.
/// The real implementation (`kiosk_runtime::transport::TokioSerialLink`)
/// bridges this to a blocking reader task; the simulator answers in-process.
#[async_trait]
pub trait SerialLink: Send + Sync {
    /// Send `command`, waiting up to `timeout` for the next response frame.
    /// Returns the raw JSON body (minus the `status` discriminant) on
    /// success, or maps an `{status:"ERROR",...}` frame into
    /// `LinkError::Hardware`.
    async fn send(&self, command: Command, timeout: Duration) -> LinkResult<serde_json::Value>;
}
