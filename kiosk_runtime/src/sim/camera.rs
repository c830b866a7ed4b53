//! In-memory camera simulator returning a fixed solid-color frame.

use async_trait::async_trait;
use kiosk_host::capability::{Camera, CameraError, CameraFrame};
use std::sync::atomic::{AtomicBool, Ordering};

pub struct SimCamera {
    initialized: AtomicBool,
    width: u32,
    height: u32,
}

impl Default for SimCamera {
    fn default() -> Self {
        Self { initialized: AtomicBool::new(false), width: 64, height: 48 }
    }
}

impl SimCamera {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Camera for SimCamera {
    async fn initialize(&self) -> Result<(), CameraError> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn capture_frame(&self) -> Result<CameraFrame, CameraError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(CameraError::CaptureFailed("camera not initialized".to_string()));
        }
        let pixel_count = (self.width * self.height) as usize;
        Ok(CameraFrame {
            width: self.width,
            height: self.height,
            rgb: vec![128u8; pixel_count * 3],
        })
    }

    async fn release(&self) -> Result<(), CameraError> {
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capture_without_initialize_fails() {
        let camera = SimCamera::new();
        assert!(camera.capture_frame().await.is_err());
    }

    #[tokio::test]
    async fn capture_after_initialize_returns_expected_dimensions() {
        let camera = SimCamera::new();
        camera.initialize().await.unwrap();
        let frame = camera.capture_frame().await.unwrap();
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(frame.rgb.len(), 64 * 48 * 3);
    }
}
