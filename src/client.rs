//! Client for the Pelletronic Touch v4 JSON interface (Oekofen JSON Interface V4.00b).
//!
//! - Blocking, single-threaded; every call is at most one HTTP round trip plus one retry.
//! - Metadata is loaded once at construction and drives scaling of every value.
//! - Values are cached; reads never hit the network, `refresh` does.
//! - Writes are verified against the echo the device sends back.
//!
//! Throttling
//! - The Touch rejects requests that come too fast with `401 Wait at least <N>ms during requests`.
//!   The client waits as asked (or a fixed fallback for other 401 bodies) and retries once.

use http::StatusCode;
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::thread;
use std::time::Duration;

use crate::attributes::Attribute;
use crate::models::touch::{AttributeMeta, MetaData, OperationMode, ValueCache, raw_as_f64};
use crate::transport::{self, Transport, UreqTransport};
use crate::utils::{decimal_places, decode_latin1, round_to_places};

const META_QUERY: &str = "all?";
const DATA_QUERY: &str = "all";

/// Wait applied after a 401 whose body does not say how long to wait.
pub const THROTTLE_FALLBACK: Duration = Duration::from_secs(4);

#[derive(Debug)]
pub enum TouchError {
    Transport(String),
    Http {
        status: u16,
        message: String,
    },
    Json {
        query: String,
        source: serde_path_to_error::Error<serde_json::Error>,
    },
    WriteVerificationFailed {
        request: String,
        response: String,
    },
    UnknownAttribute {
        device: String,
        attribute: String,
    },
    InvalidAttribute(String),
    NotCached {
        device: String,
        attribute: String,
    },
    NotNumeric {
        device: String,
        attribute: String,
        value: Value,
    },
    InvalidOperationMode(f64),
}

impl TouchError {
    /// Connection, HTTP status or body decoding failure.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            TouchError::Transport(_) | TouchError::Http { .. } | TouchError::Json { .. }
        )
    }
}

impl core::fmt::Display for TouchError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TouchError::Transport(s) => write!(f, "transport error: {}", s),
            TouchError::Http { status, message } => write!(f, "http {}: {}", status, message),
            TouchError::Json { query, source } => write!(
                f,
                "not a JSON response to '{}' (wrong password or attribute name?): {}",
                query, source
            ),
            TouchError::WriteVerificationFailed { request, response } => {
                write!(f, "unexpected response to write '{}': '{}'", request, response)
            }
            TouchError::UnknownAttribute { device, attribute } => {
                write!(f, "\"{}.{}\" not found in metadata", device, attribute)
            }
            TouchError::InvalidAttribute(name) => write!(f, "invalid attribute '{}'", name),
            TouchError::NotCached { device, attribute } => {
                write!(f, "\"{}.{}\" not loaded yet; refresh first", device, attribute)
            }
            TouchError::NotNumeric {
                device,
                attribute,
                value,
            } => write!(f, "\"{}.{}\" is not numeric: {}", device, attribute, value),
            TouchError::InvalidOperationMode(v) => write!(f, "invalid operation mode value {}", v),
        }
    }
}

impl std::error::Error for TouchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TouchError::Json { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// What a [`TouchClient::refresh`] call loads.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Selector<'a> {
    All,
    /// One logical attribute by registry name, e.g. `room_temperature`.
    Named(&'a str),
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Skip network writes; only update the cache.
    pub read_only: bool,
    pub throttle_fallback: Duration,
    /// `log` target for every record emitted by the client.
    pub log_target: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            read_only: false,
            throttle_fallback: THROTTLE_FALLBACK,
            log_target: module_path!().to_string(),
        }
    }
}

pub struct TouchClient<T: Transport = UreqTransport> {
    transport: T,
    base: String,
    options: ClientOptions,
    meta: MetaData,
    data: ValueCache,
}

impl TouchClient<UreqTransport> {
    /// Connect over HTTP and load metadata.
    pub fn connect(url: &str, password: &str, read_only: bool) -> Result<Self, TouchError> {
        let options = ClientOptions {
            read_only,
            ..ClientOptions::default()
        };
        TouchClient::new(UreqTransport::new(), url, password, options)
    }
}

impl<T: Transport> TouchClient<T> {
    /// Build a client over any transport. Fails if the metadata query fails.
    pub fn new(transport: T, url: &str, password: &str, options: ClientOptions) -> Result<Self, TouchError> {
        let mut client = TouchClient {
            transport,
            base: transport::api_base(url, password),
            options,
            meta: MetaData::default(),
            data: ValueCache::default(),
        };
        client.load_meta()?;
        Ok(client)
    }

    pub fn is_read_only(&self) -> bool {
        self.options.read_only
    }

    pub fn log_target(&self) -> &str {
        &self.options.log_target
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Send one query, retrying exactly once if the device throttles us.
    fn request(&mut self, query: &str) -> Result<String, TouchError> {
        let url = transport::request_url(&self.base, query);
        let mut retried = false;
        loop {
            let reply = self.transport.get(&url).map_err(TouchError::Transport)?;
            let text = decode_latin1(&reply.body);
            if reply.status == StatusCode::UNAUTHORIZED && !retried {
                retried = true;
                let delay = match transport::throttle_delay(&text) {
                    Some(delay) => {
                        debug!(target: self.log_target(), "Touch wants us to wait {}ms", delay.as_millis());
                        delay
                    }
                    None => {
                        warn!(
                            target: self.log_target(),
                            "Touch rejected us. Wait {}s and retry",
                            self.options.throttle_fallback.as_secs_f64()
                        );
                        self.options.throttle_fallback
                    }
                };
                thread::sleep(delay);
                continue;
            }
            if !reply.status.is_success() {
                return Err(TouchError::Http {
                    status: reply.status.as_u16(),
                    message: text,
                });
            }
            return Ok(text);
        }
    }

    fn request_json(&mut self, query: &str) -> Result<Map<String, Value>, TouchError> {
        let text = self.request(query)?;
        let de = &mut serde_json::Deserializer::from_str(&text);
        serde_path_to_error::deserialize(de).map_err(|source| TouchError::Json {
            query: query.to_string(),
            source,
        })
    }

    fn load_meta(&mut self) -> Result<(), TouchError> {
        debug!(target: self.log_target(), "Load meta data from Touch");
        let response = self.request_json(META_QUERY)?;
        let (meta, skipped) = MetaData::from_response(response);
        debug!(
            target: self.log_target(),
            "Loaded {} attribute descriptor(s), skipped {}",
            meta.descriptor_count(),
            skipped
        );
        self.meta = meta;
        Ok(())
    }

    /// Query all values or one logical attribute and merge them into the cache.
    pub fn refresh(&mut self, selector: Selector<'_>) -> Result<(), TouchError> {
        let query = match selector {
            Selector::All => DATA_QUERY.to_string(),
            Selector::Named(name) => Attribute::from_name(name)
                .ok_or_else(|| TouchError::InvalidAttribute(name.to_string()))?
                .query(),
        };
        debug!(target: self.log_target(), "Load {} data from Touch", query);
        let response = self.request_json(&query)?;
        let stored = self.data.merge(response);
        debug!(target: self.log_target(), "Cached {} value(s) from '{}'", stored, query);
        Ok(())
    }

    pub fn meta(&self, device: &str, attribute: &str) -> Option<&AttributeMeta> {
        self.meta.get(device, attribute)
    }

    fn descriptor(&self, device: &str, attribute: &str) -> Result<&AttributeMeta, TouchError> {
        self.meta.get(device, attribute).ok_or_else(|| TouchError::UnknownAttribute {
            device: device.to_string(),
            attribute: attribute.to_string(),
        })
    }

    /// Cached device-native value, unscaled.
    pub fn raw(&self, device: &str, attribute: &str) -> Result<&Value, TouchError> {
        self.data.get(device, attribute).ok_or_else(|| TouchError::NotCached {
            device: device.to_string(),
            attribute: attribute.to_string(),
        })
    }

    /// Cached value scaled by the attribute factor.
    pub fn get(&self, device: &str, attribute: &str) -> Result<f64, TouchError> {
        let meta = self.descriptor(device, attribute)?;
        let raw = self.raw(device, attribute)?;
        let value = raw_as_f64(raw).ok_or_else(|| TouchError::NotNumeric {
            device: device.to_string(),
            attribute: attribute.to_string(),
            value: raw.clone(),
        })?;
        Ok(match meta.scale() {
            Some(factor) => value * factor,
            None => value,
        })
    }

    /// Write a scaled value. In read-only mode nothing is sent but the cache still changes.
    pub fn set(&mut self, device: &str, attribute: &str, value: f64) -> Result<(), TouchError> {
        let raw = match self.descriptor(device, attribute)?.scale() {
            Some(factor) => (value / factor).round_ties_even() as i64,
            None => value.trunc() as i64,
        };
        let request = format!("{}.{}={}", device, attribute, raw);
        info!(target: self.log_target(), "Set {}", request);
        if self.options.read_only {
            warn!(target: self.log_target(), "Can't set {}: read only mode", request);
        } else {
            let response = self.request(&request)?;
            if response != request {
                return Err(TouchError::WriteVerificationFailed { request, response });
            }
        }
        self.data.insert(device, attribute, Value::from(raw));
        Ok(())
    }

    /// Round `value` to the precision the attribute factor allows.
    pub fn round_to_precision(&self, device: &str, attribute: &str, value: f64) -> f64 {
        let places = self
            .meta
            .get(device, attribute)
            .and_then(|m| m.factor)
            .and_then(decimal_places);
        match places {
            Some(places) => round_to_places(value, places),
            None => {
                warn!(
                    target: self.log_target(),
                    "Rounding is irrelevant for {}.{}",
                    device,
                    attribute
                );
                value
            }
        }
    }

    // Registry-driven accessors

    /// Scaled value of a logical attribute.
    pub fn value(&self, attribute: Attribute) -> Result<f64, TouchError> {
        self.get(attribute.device(), attribute.attribute())
    }

    /// Write a logical attribute; read-only registry entries are rejected.
    pub fn set_value(&mut self, attribute: Attribute, value: f64) -> Result<(), TouchError> {
        if !attribute.is_writable() {
            return Err(TouchError::InvalidAttribute(attribute.name().to_string()));
        }
        self.set(attribute.device(), attribute.attribute(), value)
    }

    pub fn round(&self, attribute: Attribute, value: f64) -> f64 {
        self.round_to_precision(attribute.device(), attribute.attribute(), value)
    }

    /// State check for the boolean-like registry entries.
    pub fn is_on(&self, attribute: Attribute) -> Result<bool, TouchError> {
        let states = attribute
            .on_states()
            .ok_or_else(|| TouchError::InvalidAttribute(attribute.name().to_string()))?;
        let value = self.value(attribute)?;
        Ok(states.iter().any(|s| *s as f64 == value))
    }

    /// Whether the boiler fire is on.
    pub fn boiler_fired(&self) -> Result<bool, TouchError> {
        self.is_on(Attribute::BoilerFired)
    }

    /// Whether the heating circuit circulator is running.
    pub fn heating_circuit_pumping(&self) -> Result<bool, TouchError> {
        self.is_on(Attribute::HeatingCircuitPumping)
    }

    pub fn operation_mode(&self) -> Result<OperationMode, TouchError> {
        let value = self.value(Attribute::HeatingCircuitOperationMode)?;
        if value.fract() != 0.0 {
            return Err(TouchError::InvalidOperationMode(value));
        }
        OperationMode::try_from(value as i64).map_err(|_| TouchError::InvalidOperationMode(value))
    }

    pub fn set_operation_mode(&mut self, mode: OperationMode) -> Result<(), TouchError> {
        self.set_value(Attribute::HeatingCircuitOperationMode, mode.raw() as f64)
    }
}
