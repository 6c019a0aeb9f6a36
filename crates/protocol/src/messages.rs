//! HTTP request and response bodies

use crate::token::ConsoleToken;
use serde::{Deserialize, Serialize};

/// Response to `POST /node/{id}/console-endpoints`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: ConsoleToken,
}

/// Body of `POST /node/{id}/power_cycle`
///
/// `force` requests a hard reset instead of a graceful power cycle. An empty
/// body is treated as `{"force": false}`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PowerCycleRequest {
    #[serde(default)]
    pub force: bool,
}

/// Chassis power state as reported by the management controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerStatus {
    On,
    Off,
    Unknown,
}

impl PowerStatus {
    /// Parse `ipmitool chassis power status` output ("Chassis Power is on")
    pub fn from_ipmitool_output(output: &str) -> Self {
        let lower = output.trim().to_lowercase();
        if lower.ends_with("is on") {
            Self::On
        } else if lower.ends_with("is off") {
            Self::Off
        } else {
            Self::Unknown
        }
    }
}

/// Response to `GET /node/{id}/power_status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerStatusResponse {
    pub power_status: PowerStatus,
}
