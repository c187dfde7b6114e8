//! In-process fake of a Pelletronic Touch, speaking the device's wire dialect.
//!
//! Path syntax understood: `/PASSWD/( "all" [ "?" ] | DEV.ATTR [ "=" VALUE ] )`.
//! Bodies are ISO-8859-1 encoded JSON; writes are echoed as plain text. Scripted replies and
//! connection failures can be queued ahead of the emulated behaviour.

use http::StatusCode;
use serde_json::{Map, Value, json};
use std::collections::VecDeque;

use crate::transport::{self, HttpReply, Transport};
use crate::utils::encode_latin1;

pub struct FakeTouch {
    meta: Map<String, Value>,
    data: Map<String, Value>,
    requests: Vec<String>,
    scripted: VecDeque<Result<HttpReply, String>>,
}

impl FakeTouch {
    pub const URL: &'static str = "http://touch.local:3938";
    pub const PASSWORD: &'static str = "mypass123";

    pub fn empty() -> Self {
        FakeTouch {
            meta: Map::new(),
            data: Map::new(),
            requests: Vec::new(),
            scripted: VecDeque::new(),
        }
    }

    /// A heating circuit at 17.0°C with an 18.0°C setpoint in AUTO mode, pump running and
    /// the boiler idle.
    pub fn sample() -> Self {
        let mut fake = FakeTouch::empty();
        fake.meta = object(json!({
            "hk1": {
                "L_roomtemp_act": {"val": 170, "factor": 0.1, "unit": "°C"},
                "L_flowtemp_act": {"val": 240, "factor": 0.1, "unit": "°C"},
                "L_flowtemp_set": {"val": 250, "factor": 0.1, "unit": "°C"},
                "temp_heat": {"val": 180, "factor": 0.1, "unit": "°C", "min": 100, "max": 400},
                "remote_override": {"val": 0, "factor": 0.1, "unit": "K"},
                "mode_auto": {"val": 1, "format": "0:Aus|1:Auto|2:Heizen|3:Absenken"},
                "L_pump": {"val": 1},
                "name": {"val": "Küche"}
            },
            "pe1": {
                "L_temp_act": {"val": 650, "factor": 0.1, "unit": "°C"},
                "L_temp_set": {"val": 700, "factor": 0.1, "unit": "°C"},
                "L_state": {"val": 0},
                "L_modulation": {"val": 0, "factor": 1, "unit": "%"}
            }
        }));
        fake.data = object(json!({
            "hk1": {
                "L_roomtemp_act": 170,
                "L_flowtemp_act": 240,
                "L_flowtemp_set": 250,
                "temp_heat": 180,
                "remote_override": 0,
                "mode_auto": 1,
                "L_pump": 1,
                "name": "Küche"
            },
            "pe1": {
                "L_temp_act": 650,
                "L_temp_set": 700,
                "L_state": 0,
                "L_modulation": 0
            }
        }));
        fake
    }

    pub fn meta_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.meta
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.data
    }

    /// Change one raw value on the device side.
    pub fn set_raw(&mut self, device: &str, attribute: &str, raw: Value) {
        let entry = self
            .data
            .entry(device.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(attributes) = entry {
            attributes.insert(attribute.to_string(), raw);
        }
    }

    /// Query part of every request received, in order.
    pub fn requests(&self) -> &[String] {
        &self.requests
    }

    /// Writes received, e.g. `hk1.temp_heat=185`.
    pub fn writes(&self) -> Vec<&str> {
        self.requests
            .iter()
            .filter(|r| r.contains('='))
            .map(String::as_str)
            .collect()
    }

    /// Answer the next request with `reply` instead of the emulated behaviour.
    pub fn push_reply(&mut self, reply: HttpReply) {
        self.scripted.push_back(Ok(reply));
    }

    /// Fail the next request at the connection level.
    pub fn fail_next(&mut self, message: &str) {
        self.scripted.push_back(Err(message.to_string()));
    }

    fn handle(&mut self, target: &str) -> HttpReply {
        match target {
            "all" => ok(&Value::Object(self.data.clone()).to_string()),
            "all?" => ok(&Value::Object(self.meta.clone()).to_string()),
            _ => match target.split_once('=') {
                Some((path, value)) => self.assign(target, path, value),
                None => self.read(target),
            },
        }
    }

    fn assign(&mut self, target: &str, path: &str, value: &str) -> HttpReply {
        let Some((device, attribute)) = path.split_once('.') else {
            return syntax_error();
        };
        let raw = value.parse::<i64>().map(Value::from).unwrap_or_else(|_| Value::from(value));
        match self.data.get_mut(device).and_then(|d| d.get_mut(attribute)) {
            Some(slot) => {
                *slot = raw;
                ok(target)
            }
            None => key_not_found(path),
        }
    }

    fn read(&self, target: &str) -> HttpReply {
        let Some((device, attribute)) = target.split_once('.') else {
            return syntax_error();
        };
        match self.data.get(device).and_then(|d| d.get(attribute)) {
            Some(value) => ok(&json!({ device: { attribute: value } }).to_string()),
            None => key_not_found(target),
        }
    }
}

impl Transport for FakeTouch {
    fn get(&mut self, url: &str) -> Result<HttpReply, String> {
        let base = transport::api_base(FakeTouch::URL, FakeTouch::PASSWORD);
        let target = url.strip_prefix(base.as_str());
        self.requests.push(target.unwrap_or(url).to_string());
        if let Some(scripted) = self.scripted.pop_front() {
            return scripted;
        }
        match target {
            Some(target) => Ok(self.handle(target)),
            None => Ok(syntax_error()),
        }
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn ok(body: &str) -> HttpReply {
    HttpReply::new(StatusCode::OK, encode_latin1(body))
}

fn syntax_error() -> HttpReply {
    HttpReply::new(
        StatusCode::BAD_REQUEST,
        "Supported path syntax is: \"/\" PASSWD \"/\" ( \"all\" [ \"?\" ] | ATTRIBUTE [ \"=\" VALUE ] )",
    )
}

fn key_not_found(key: &str) -> HttpReply {
    HttpReply::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Key not found: {key}"))
}
