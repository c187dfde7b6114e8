//! Minimal runtime configuration helpers.
//! Defaults match a Touch on the local network with write access enabled.

use crate::boiler::DEFAULT_ROOM_T_SET_MAX;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Base URL of the Touch JSON interface, e.g. `http://192.168.1.20:4321`.
    pub url: String,
    /// JSON interface password, configured on the Touch.
    pub password: String,
    /// Never send writes to the device.
    pub read_only: bool,
    /// Ceiling for the forced room temperature setpoint.
    pub room_t_set_max: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (`TOUCH_URL`, `TOUCH_PASSWORD`, `TOUCH_READONLY`,
    /// `TOUCH_ROOM_T_SET_MAX`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let url = non_empty("TOUCH_URL").ok_or_else(|| "Missing TOUCH_URL".to_string())?;
        let password = non_empty("TOUCH_PASSWORD").ok_or_else(|| "Missing TOUCH_PASSWORD".to_string())?;

        let read_only = match non_empty("TOUCH_READONLY") {
            Some(v) => parse_bool(&v).ok_or_else(|| format!("TOUCH_READONLY must be a boolean, got '{}'", v))?,
            None => false,
        };

        let room_t_set_max = match non_empty("TOUCH_ROOM_T_SET_MAX") {
            Some(v) => v
                .parse::<f64>()
                .ok()
                .filter(|t| t.is_finite())
                .ok_or_else(|| format!("TOUCH_ROOM_T_SET_MAX must be a temperature, got '{}'", v))?,
            None => DEFAULT_ROOM_T_SET_MAX,
        };

        Ok(Config {
            url,
            password,
            read_only,
            room_t_set_max,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}
