//! Typed wrapper over the Bill Controller's serial commands.
//!
//! Grounded in the teacher's `BillValidator`/`DeviceCommon` pattern: a thin
//! struct holding the link handle, one method per command, each method
//! picking the timeout the physical operation needs rather than a single
//! blanket timeout.

use crate::capability::SerialLink;
use crate::error::CommandResult;
use kiosk_core::wire::{
    Command, DispenseResponse, DispenseStatusResponse, HomeResponse, IdentityResponse,
    SortResponse, SortStatusResponse,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

pub struct BillController {
    link: Arc<dyn SerialLink>,
}

impl BillController {
    #[must_use]
    pub fn new(link: Arc<dyn SerialLink>) -> Self {
        Self { link }
    }

    #[instrument(skip(self), fields(denom))]
    pub async fn sort(&self, denom: u32) -> CommandResult<SortResponse> {
        let value = self
            .link
            .send(Command::Sort { denom }, Duration::from_secs(8))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    #[instrument(skip(self))]
    pub async fn home(&self) -> CommandResult<HomeResponse> {
        let value = self.link.send(Command::Home, Duration::from_secs(12)).await?;
        Ok(serde_json::from_value(value)?)
    }

    #[instrument(skip(self))]
    pub async fn sort_status(&self) -> CommandResult<SortStatusResponse> {
        let value = self
            .link
            .send(Command::SortStatus, Duration::from_secs(5))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    #[instrument(skip(self))]
    pub async fn dispense(&self, denom: u32, count: u32) -> CommandResult<DispenseResponse> {
        let timeout = Duration::from_secs_f64(f64::from(count) * 2.0 + 5.0);
        let value = self.link.send(Command::Dispense { denom, count }, timeout).await?;
        Ok(serde_json::from_value(value)?)
    }

    #[instrument(skip(self))]
    pub async fn dispense_status(&self, denom: u32) -> CommandResult<DispenseStatusResponse> {
        let value = self
            .link
            .send(Command::DispenseStatus { denom }, Duration::from_secs(5))
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
