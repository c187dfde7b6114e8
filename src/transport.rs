//! Blocking HTTP transport for the Touch JSON interface.
//!
//! - `ureq` agent with a short connect timeout and a longer read timeout.
//! - Status codes are returned to the caller instead of being turned into errors, since a 401
//!   from the Touch is a throttling signal rather than an authentication failure.
//! - URLs are built verbatim: the metadata query ends with a bare `?` which must reach the
//!   device unchanged.

use http::StatusCode;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const READ_TIMEOUT: Duration = Duration::from_secs(40);

static THROTTLE_MESSAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Wait at least ([0-9]+)ms during requests").expect("valid regex"));

/// Status and undecoded body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        HttpReply {
            status,
            body: body.into(),
        }
    }
}

/// One blocking GET against the device. Implementations report connection-level failures as
/// `Err`; every HTTP status, including errors, comes back as `Ok`.
pub trait Transport {
    fn get(&mut self, url: &str) -> Result<HttpReply, String>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        Self::with_timeouts(CONNECT_TIMEOUT, READ_TIMEOUT)
    }

    pub fn with_timeouts(connect: Duration, read: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_connect(Some(connect))
            .timeout_recv_response(Some(read))
            .timeout_recv_body(Some(read))
            .http_status_as_error(false)
            .build();
        UreqTransport { agent: config.into() }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn get(&mut self, url: &str) -> Result<HttpReply, String> {
        let mut response = self.agent.get(url).call().map_err(|e| e.to_string())?;
        let status = response.status();
        let body = response.body_mut().read_to_vec().map_err(|e| e.to_string())?;
        Ok(HttpReply { status, body })
    }
}

/// Base of every request: `URL/PASSWORD/`.
pub fn api_base(url: &str, password: &str) -> String {
    format!("{}/{}/", url.trim_end_matches('/'), password)
}

/// Full request URL for a query. The query is appended as-is, so `all?` keeps its trailing
/// question mark and `hk1.temp_heat=185` keeps its `=`.
pub fn request_url(base: &str, query: &str) -> String {
    format!("{base}{query}")
}

/// Delay requested by a throttling reply body (`Wait at least 250ms during requests`).
pub fn throttle_delay(body: &str) -> Option<Duration> {
    let captures = THROTTLE_MESSAGE.captures(body)?;
    let millis = captures.get(1)?.as_str().parse::<u64>().ok()?;
    Some(Duration::from_millis(millis))
}
