//! Models for the Pelletronic Touch JSON interface (v4).
//!
//! Notes
//! - The device groups attributes by "device" (`hk1` heating circuit, `pe1` pellet boiler, ...).
//! - Metadata (`all?`) maps each attribute to a descriptor; only `factor` and `unit` are used.
//! - Data (`all`, `dev.attr`) maps each attribute to a raw, unscaled value. Values are kept as
//!   `serde_json::Value` because the firmware mixes integers, numeric strings and text.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// =====================
// Operation mode
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OperationMode {
    // 0=OFF, 1=AUTO, 2=HEATING, 3=SET_BACK
    Off,
    Auto,
    Heating,
    SetBack,
}

impl OperationMode {
    pub const ALL: [OperationMode; 4] = [
        OperationMode::Off,
        OperationMode::Auto,
        OperationMode::Heating,
        OperationMode::SetBack,
    ];

    /// Integer used on the wire (`hk1.mode_auto`).
    pub fn raw(self) -> i64 {
        match self {
            OperationMode::Off => 0,
            OperationMode::Auto => 1,
            OperationMode::Heating => 2,
            OperationMode::SetBack => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OperationMode::Off => "OFF",
            OperationMode::Auto => "AUTO",
            OperationMode::Heating => "HEATING",
            OperationMode::SetBack => "SET_BACK",
        }
    }
}

impl core::fmt::Display for OperationMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<i64> for OperationMode {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        OperationMode::ALL.into_iter().find(|m| m.raw() == value).ok_or(value)
    }
}

impl serde::Serialize for OperationMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.raw())
    }
}

impl<'de> serde::Deserialize<'de> for OperationMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;
        impl<'de> serde::de::Visitor<'de> for V {
            type Value = OperationMode;

            fn expecting(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                write!(f, "an integer 0, 1, 2 or 3 for OperationMode")
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                OperationMode::try_from(value)
                    .map_err(|other| E::invalid_value(serde::de::Unexpected::Signed(other), &self))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                i64::try_from(value)
                    .ok()
                    .and_then(|v| OperationMode::try_from(v).ok())
                    .ok_or_else(|| E::invalid_value(serde::de::Unexpected::Unsigned(value), &self))
            }
        }

        deserializer.deserialize_any(V)
    }
}

// =====================
// Metadata model
// =====================

/// Descriptor of one attribute as returned by the metadata query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeMeta {
    /// Scaling coefficient: scaled = raw * factor.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub factor: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl AttributeMeta {
    /// The factor, if it can actually be used for scaling.
    pub fn scale(&self) -> Option<f64> {
        self.factor.filter(|f| f.is_finite() && *f > 0.0)
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(raw_as_f64))
}

/// `device -> attribute -> descriptor`, loaded once from the device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaData {
    devices: BTreeMap<String, BTreeMap<String, AttributeMeta>>,
}

impl MetaData {
    /// Build from the decoded metadata response. Entries that are not descriptor objects are
    /// skipped; the number of skipped entries is returned alongside.
    pub fn from_response(response: Map<String, Value>) -> (Self, usize) {
        let mut devices = BTreeMap::new();
        let mut skipped = 0;
        for (device, attributes) in response {
            let Value::Object(attributes) = attributes else {
                skipped += 1;
                continue;
            };
            let mut descriptors = BTreeMap::new();
            for (attribute, descriptor) in attributes {
                match serde_json::from_value::<AttributeMeta>(descriptor) {
                    Ok(meta) => {
                        descriptors.insert(attribute, meta);
                    }
                    Err(_) => skipped += 1,
                }
            }
            devices.insert(device, descriptors);
        }
        (MetaData { devices }, skipped)
    }

    pub fn get(&self, device: &str, attribute: &str) -> Option<&AttributeMeta> {
        self.devices.get(device).and_then(|attrs| attrs.get(attribute))
    }

    /// Total number of attribute descriptors.
    pub fn descriptor_count(&self) -> usize {
        self.devices.values().map(BTreeMap::len).sum()
    }
}

// =====================
// Value cache
// =====================

/// `device -> attribute -> raw value`, refreshed on demand and never evicted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueCache {
    devices: BTreeMap<String, BTreeMap<String, Value>>,
}

impl ValueCache {
    /// Merge a data response into the cache. Attributes absent from the response keep their
    /// previous value. Returns the number of attribute values stored.
    pub fn merge(&mut self, response: Map<String, Value>) -> usize {
        let mut stored = 0;
        for (device, attributes) in response {
            let Value::Object(attributes) = attributes else {
                continue;
            };
            let entry = self.devices.entry(device).or_default();
            stored += attributes.len();
            entry.extend(attributes);
        }
        stored
    }

    pub fn get(&self, device: &str, attribute: &str) -> Option<&Value> {
        self.devices.get(device).and_then(|attrs| attrs.get(attribute))
    }

    pub fn insert(&mut self, device: &str, attribute: &str, raw: Value) {
        self.devices
            .entry(device.to_string())
            .or_default()
            .insert(attribute.to_string(), raw);
    }
}

/// Interpret a device-native value as a number. The firmware reports most values as JSON
/// numbers but echoes written values back as numeric strings.
pub fn raw_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
