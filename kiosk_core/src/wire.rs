//! Line-delimited JSON wire protocol spoken with the two microcontroller
//! peripherals: outbound commands, their typed success responses, the
//! generic error frame, and unsolicited events.

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};

/// A command frame sent RPi → controller. Serializes to `{"cmd": "SORT", ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    #[serde(rename = "SORT")]
    Sort { denom: u32 },
    #[serde(rename = "HOME")]
    Home,
    #[serde(rename = "SORT_STATUS")]
    SortStatus,
    #[serde(rename = "DISPENSE")]
    Dispense { denom: u32, count: u32 },
    #[serde(rename = "DISPENSE_STATUS")]
    DispenseStatus { denom: u32 },
    #[serde(rename = "COIN_DISPENSE")]
    CoinDispense { denom: u32, count: u32 },
    #[serde(rename = "COIN_CHANGE")]
    CoinChange { amount: u32 },
    #[serde(rename = "COIN_RESET")]
    CoinReset,
    #[serde(rename = "SECURITY_LOCK")]
    SecurityLock,
    #[serde(rename = "SECURITY_UNLOCK")]
    SecurityUnlock,
    #[serde(rename = "SECURITY_STATUS")]
    SecurityStatus,
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "VERSION")]
    Version,
    #[serde(rename = "RESET")]
    Reset,
}

impl Command {
    /// Name used in error/log messages and as the `TimeoutError::command` field.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Command::Sort { .. } => "SORT",
            Command::Home => "HOME",
            Command::SortStatus => "SORT_STATUS",
            Command::Dispense { .. } => "DISPENSE",
            Command::DispenseStatus { .. } => "DISPENSE_STATUS",
            Command::CoinDispense { .. } => "COIN_DISPENSE",
            Command::CoinChange { .. } => "COIN_CHANGE",
            Command::CoinReset => "COIN_RESET",
            Command::SecurityLock => "SECURITY_LOCK",
            Command::SecurityUnlock => "SECURITY_UNLOCK",
            Command::SecurityStatus => "SECURITY_STATUS",
            Command::Ping => "PING",
            Command::Version => "VERSION",
            Command::Reset => "RESET",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SortResponse {
    pub slot: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HomeResponse {
    pub position: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SortStatusResponse {
    pub position: u32,
    pub slot: Option<u8>,
    pub homed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispenseResponse {
    pub dispensed: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispenseStatusResponse {
    pub ready: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinDispenseResponse {
    pub dispensed: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinChangeResponse {
    pub breakdown: std::collections::BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinResetResponse {
    pub previous_total: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityStatusResponse {
    pub locked: bool,
    #[serde(default)]
    pub tamper_a: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityResponse {
    #[serde(default)]
    pub version: Option<String>,
}

/// The success-path envelope: `{"status": "OK" | "READY", ...fields}`. The
/// caller knows which typed response to parse the remaining fields into
/// because it knows which command it sent.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    pub status: String,
    #[serde(flatten)]
    pub fields: serde_json::Value,
}

/// `{"status": "ERROR", "code": ..., "dispensed"?: ...}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorFrame {
    pub code: ErrorCode,
    #[serde(default)]
    pub dispensed: Option<u32>,
}

/// Which controller an event or device-status update originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerKind {
    Bill,
    CoinSecurity,
}

/// An unsolicited event frame: `{"event": "COIN_IN", ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Event {
    #[serde(rename = "COIN_IN")]
    CoinIn { denom: u32, total: u32 },
    #[serde(rename = "TAMPER")]
    Tamper { sensor: String },
    #[serde(rename = "DOOR_STATE")]
    DoorState { locked: bool },
    #[serde(rename = "READY")]
    Ready { version: String, controller: String },
    #[serde(rename = "KEYPAD")]
    Keypad { key: String },
}

/// A raw line decoded into either a response or an event, per the wire rule:
/// a frame with a `status` key is a response, one with an `event` key is an
/// event. Anything else is logged and discarded by the caller.
#[derive(Debug, Clone)]
pub enum Frame {
    Response(serde_json::Value),
    Event(Event),
}

impl Frame {
    /// Classify a raw decoded JSON value per the wire rule.
    #[must_use]
    pub fn classify(value: serde_json::Value) -> Option<Frame> {
        if value.get("status").is_some() {
            Some(Frame::Response(value))
        } else if value.get("event").is_some() {
            serde_json::from_value(value).ok().map(Frame::Event)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_serializes_with_cmd_tag() {
        let cmd = Command::Dispense { denom: 100, count: 2 };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["cmd"], "DISPENSE");
        assert_eq!(json["denom"], 100);
        assert_eq!(json["count"], 2);
    }

    #[test]
    fn frame_classifies_response_vs_event() {
        let response = serde_json::json!({"status": "OK", "dispensed": 2});
        assert!(matches!(Frame::classify(response), Some(Frame::Response(_))));

        let event = serde_json::json!({"event": "COIN_IN", "denom": 5, "total": 15});
        match Frame::classify(event) {
            Some(Frame::Event(Event::CoinIn { denom, total })) => {
                assert_eq!(denom, 5);
                assert_eq!(total, 15);
            }
            other => panic!("expected CoinIn event, got {other:?}"),
        }
    }

    #[test]
    fn frame_classifies_neither_as_none() {
        let junk = serde_json::json!({"foo": "bar"});
        assert!(Frame::classify(junk).is_none());
    }

    #[test]
    fn error_frame_parses_code_and_dispensed() {
        let value = serde_json::json!({"status": "ERROR", "code": "JAM", "dispensed": 1});
        let err: ErrorFrame = serde_json::from_value(value).unwrap();
        assert_eq!(err.code, ErrorCode::Jam);
        assert_eq!(err.dispensed, Some(1));
    }
}
