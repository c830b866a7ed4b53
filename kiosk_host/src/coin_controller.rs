//! Typed wrapper over the Coin & Security Controller's serial commands.

use crate::capability::SerialLink;
use crate::error::CommandResult;
use kiosk_core::wire::{Command, CoinChangeResponse, CoinDispenseResponse, CoinResetResponse, IdentityResponse, SecurityStatusResponse};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

pub struct CoinSecurityController {
    link: Arc<dyn SerialLink>,
}

impl CoinSecurityController {
    #[must_use]
    pub fn new(link: Arc<dyn SerialLink>) -> Self {
        Self { link }
    }

    #[instrument(skip(self))]
    pub async fn coin_dispense(&self, denom: u32, count: u32) -> CommandResult<CoinDispenseResponse> {
        let timeout = Duration::from_secs_f64(f64::from(count) * 0.5 + 3.0);
        let value = self
            .link
            .send(Command::CoinDispense { denom, count }, timeout)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    #[instrument(skip(self))]
    pub async fn coin_change(&self, amount: u32) -> CommandResult<CoinChangeResponse> {
        let value = self
            .link
            .send(Command::CoinChange { amount }, Duration::from_secs(10))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    #[instrument(skip(self))]
    pub async fn coin_reset(&self) -> CommandResult<CoinResetResponse> {
        let value = self.link.send(Command::CoinReset, Duration::from_secs(5)).await?;
        Ok(serde_json::from_value(value)?)
    }

    #[instrument(skip(self))]
    pub async fn security_lock(&self) -> CommandResult<()> {
        self.link.send(Command::SecurityLock, Duration::from_secs(5)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn security_unlock(&self) -> CommandResult<()> {
        self.link.send(Command::SecurityUnlock, Duration::from_secs(5)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn security_status(&self) -> CommandResult<SecurityStatusResponse> {
        let value = self
            .link
            .send(Command::SecurityStatus, Duration::from_secs(5))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    #[instrument(skip(self))]
    pub async fn ping(&self) -> CommandResult<()> {
        self.link.send(Command::Ping, Duration::from_secs(5)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn version(&self) -> CommandResult<IdentityResponse> {
        let value = self.link.send(Command::Version, Duration::from_secs(5)).await?;
        Ok(serde_json::from_value(value)?)
    }

    #[instrument(skip(self))]
    pub async fn reset(&self) -> CommandResult<()> {
        self.link.send(Command::Reset, Duration::from_secs(5)).await?;
        Ok(())
    }
}
