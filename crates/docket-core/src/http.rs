use crate::error::ModelError;
use std::thread;
use std::time::Duration;
use tracing::warn;
use ureq::http::Response;
use ureq::{Agent, Body, Error as UreqError};

const TIMEOUT_GLOBAL: Duration = Duration::from_secs(30);
const TIMEOUT_RESOLVE: Duration = Duration::from_secs(5);
const TIMEOUT_CONNECT: Duration = Duration::from_secs(5);
const TIMEOUT_SEND_REQUEST: Duration = Duration::from_secs(5);
const TIMEOUT_SEND_BODY: Duration = Duration::from_secs(15);
const TIMEOUT_RECV_RESPONSE: Duration = Duration::from_secs(10);

const RETRY_BASE_MS: u64 = 200;

/// Agent for short request/response calls such as readiness probes.
pub fn default_agent() -> Agent {
    let config = Agent::config_builder()
        .timeout_global(Some(TIMEOUT_GLOBAL))
        .timeout_resolve(Some(TIMEOUT_RESOLVE))
        .timeout_connect(Some(TIMEOUT_CONNECT))
        .timeout_send_request(Some(TIMEOUT_SEND_REQUEST))
        .timeout_send_body(Some(TIMEOUT_SEND_BODY))
        .timeout_recv_response(Some(TIMEOUT_RECV_RESPONSE))
        .build();
    config.into()
}

/// Agent for token streams: bounded connect phase, unbounded response and body.
///
/// A local server may spend minutes loading weights before the first byte and a
/// long report can stream for longer than any fixed budget.
pub fn streaming_agent() -> Agent {
    let config = Agent::config_builder()
        .timeout_resolve(Some(TIMEOUT_RESOLVE))
        .timeout_connect(Some(TIMEOUT_CONNECT))
        .timeout_send_request(Some(TIMEOUT_SEND_REQUEST))
        .timeout_send_body(Some(TIMEOUT_SEND_BODY))
        .build();
    config.into()
}

pub fn should_retry(err: &UreqError) -> bool {
    match err {
        UreqError::StatusCode(code) => *code == 429 || (500..=599).contains(code),
        UreqError::Timeout(_)
        | UreqError::Io(_)
        | UreqError::HostNotFound
        | UreqError::ConnectionFailed
        | UreqError::TooManyRedirects
        | UreqError::RedirectFailed => true,
        _ => false,
    }
}

pub fn retry_delay(attempt: usize) -> Duration {
    let shift = attempt.min(6) as u32;
    let delay = RETRY_BASE_MS.saturating_mul(1_u64 << shift);
    Duration::from_millis(delay)
}

/// Issue a request, retrying transient failures with exponential backoff.
pub fn send_with_retry<F>(
    label: &str,
    max_retries: usize,
    mut send: F,
) -> Result<Response<Body>, ModelError>
where
    F: FnMut() -> Result<Response<Body>, UreqError>,
{
    let mut attempt = 0;
    loop {
        match send() {
            Ok(resp) => return Ok(resp),
            Err(err) if should_retry(&err) && attempt < max_retries => {
                warn!(%label, attempt, error = %err, "request failed, retrying");
                thread::sleep(retry_delay(attempt));
                attempt += 1;
            }
            Err(UreqError::StatusCode(code)) => {
                return Err(ModelError::Failed(format!("{label} returned status {code}")));
            }
            Err(err) => return Err(ModelError::Network(format!("{label}: {err}"))),
        }
    }
}
