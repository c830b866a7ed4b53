//! In-memory authenticator simulator. Defaults to "everything is a genuine
//! PHP_100 bill"; tests override the scripted outcome to exercise rejection
//! and unknown-denomination paths without a real ML backend.

use async_trait::async_trait;
use kiosk_core::denom::BillDenom;
use kiosk_host::capability::{AuthResult, Authenticator, AuthenticatorError, CameraFrame, DenomResult};
use std::sync::Mutex;

pub struct SimAuthenticator {
    genuine: Mutex<bool>,
    denomination: Mutex<Option<BillDenom>>,
    confidence: Mutex<f32>,
}

impl Default for SimAuthenticator {
    fn default() -> Self {
        Self {
            genuine: Mutex::new(true),
            denomination: Mutex::new(Some(BillDenom::Php100)),
            confidence: Mutex::new(0.95),
        }
    }
}

impl SimAuthenticator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_genuine(&self, genuine: bool) {
        *self.genuine.lock().expect("sim authenticator lock poisoned") = genuine;
    }

    pub fn set_denomination(&self, denomination: Option<BillDenom>) {
        *self.denomination.lock().expect("sim authenticator lock poisoned") = denomination;
    }

    pub fn set_confidence(&self, confidence: f32) {
        *self.confidence.lock().expect("sim authenticator lock poisoned") = confidence;
    }
}

#[async_trait]
impl Authenticator for SimAuthenticator {
    async fn authenticate(&self, _frame: &CameraFrame) -> Result<AuthResult, AuthenticatorError> {
        let is_genuine = *self.genuine.lock().expect("sim authenticator lock poisoned");
        let confidence = *self.confidence.lock().expect("sim authenticator lock poisoned");
        Ok(AuthResult {
            is_genuine,
            confidence,
            raw_label: Some(if is_genuine { "genuine".to_string() } else { "counterfeit".to_string() }),
        })
    }

    async fn identify_denomination(&self, _frame: &CameraFrame) -> Result<DenomResult, AuthenticatorError> {
        let denomination = *self.denomination.lock().expect("sim authenticator lock poisoned");
        let confidence = *self.confidence.lock().expect("sim authenticator lock poisoned");
        Ok(DenomResult {
            confidence,
            denomination,
            raw_label: denomination.map(|d| d.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> CameraFrame {
        CameraFrame { width: 1, height: 1, rgb: vec![0, 0, 0] }
    }

    #[tokio::test]
    async fn defaults_to_genuine_php_100() {
        let auth = SimAuthenticator::new();
        let genuine = auth.authenticate(&frame()).await.unwrap();
        assert!(genuine.is_genuine);
        let denom = auth.identify_denomination(&frame()).await.unwrap();
        assert_eq!(denom.denomination, Some(BillDenom::Php100));
    }

    #[tokio::test]
    async fn scripted_rejection() {
        let auth = SimAuthenticator::new();
        auth.set_genuine(false);
        let result = auth.authenticate(&frame()).await.unwrap();
        assert!(!result.is_genuine);
    }

    #[tokio::test]
    async fn scripted_unknown_denomination() {
        let auth = SimAuthenticator::new();
        auth.set_denomination(None);
        let result = auth.identify_denomination(&frame()).await.unwrap();
        assert!(result.denomination.is_none());
    }
}
