//! Application configuration. Loaded once by the process entry point and
//! owned by the [`crate::kiosk::Kiosk`] lifecycle object — never a global
//! singleton, passed down by reference instead (see Design Notes).

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    pub serial_port_bill: String,
    pub serial_port_coin: String,
    pub baud_rate: u32,
    pub serial_timeout_secs: f64,
    pub use_mock_serial: bool,
    pub use_mock_hardware: bool,
    pub mock_delay_secs: f64,

    pub bill_acceptance_timeout_secs: f64,
    pub bill_position_timeout_secs: f64,
    pub led_stabilization_delay_secs: f64,
    pub bill_pull_speed: u8,
    pub bill_eject_speed: u8,
    pub bill_store_speed: u8,
    pub bill_store_duration_secs: f64,
    pub bill_eject_duration_secs: f64,

    pub storage_slot_capacity: u32,
    pub low_bill_threshold: u32,
    pub low_coin_threshold: u32,

    pub db_url: String,
    pub log_level: String,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            serial_port_bill: "/dev/ttyUSB0".to_string(),
            serial_port_coin: "/dev/ttyUSB1".to_string(),
            baud_rate: 115_200,
            serial_timeout_secs: 5.0,
            use_mock_serial: false,
            use_mock_hardware: false,
            mock_delay_secs: 1.0,

            bill_acceptance_timeout_secs: 10.0,
            bill_position_timeout_secs: 5.0,
            led_stabilization_delay_secs: 0.2,
            bill_pull_speed: 60,
            bill_eject_speed: 80,
            bill_store_speed: 70,
            bill_store_duration_secs: 2.0,
            bill_eject_duration_secs: 1.5,

            storage_slot_capacity: 100,
            low_bill_threshold: 10,
            low_coin_threshold: 50,

            db_url: "sqlite://kiosk.db".to_string(),
            log_level: "INFO".to_string(),
        }
    }
}

impl KioskConfig {
    /// Load from a TOML file, falling back to defaults for any field the
    /// file omits, then apply `KIOSK_*`-prefixed environment overrides.
    ///
    /// # Errors
    /// Returns an error if the file exists but is not valid TOML.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p).map_err(|e| ConfigError::Io(e.to_string()))?;
                toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            _ => KioskConfig::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KIOSK_SERIAL_PORT_BILL") {
            self.serial_port_bill = v;
        }
        if let Ok(v) = std::env::var("KIOSK_SERIAL_PORT_COIN") {
            self.serial_port_coin = v;
        }
        if let Ok(v) = std::env::var("KIOSK_USE_MOCK_HARDWARE") {
            self.use_mock_hardware = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("KIOSK_DB_URL") {
            self.db_url = v;
        }
        if let Ok(v) = std::env::var("KIOSK_LOG_LEVEL") {
            self.log_level = v;
        }
    }

    #[must_use]
    pub fn bill_acceptance_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.bill_acceptance_timeout_secs)
    }

    #[must_use]
    pub fn bill_position_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.bill_position_timeout_secs)
    }

    #[must_use]
    pub fn led_stabilization_delay(&self) -> Duration {
        Duration::from_secs_f64(self.led_stabilization_delay_secs)
    }

    #[must_use]
    pub fn bill_store_duration(&self) -> Duration {
        Duration::from_secs_f64(self.bill_store_duration_secs)
    }

    #[must_use]
    pub fn bill_eject_duration(&self) -> Duration {
        Duration::from_secs_f64(self.bill_eject_duration_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(String),
    #[error("failed to parse config file: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = KioskConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.storage_slot_capacity, 100);
        assert_eq!(config.low_bill_threshold, 10);
        assert_eq!(config.low_coin_threshold, 50);
    }

    #[test]
    fn parses_flat_key_value_file() {
        let text = "db_url = \"sqlite://test.db\"\nlow_bill_threshold = 3\n";
        let config: KioskConfig = toml::from_str(text).unwrap();
        assert_eq!(config.db_url, "sqlite://test.db");
        assert_eq!(config.low_bill_threshold, 3);
    }
}
