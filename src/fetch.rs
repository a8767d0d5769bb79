use std::thread;
use std::time::Duration;

use rand::Rng;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::warn;
use url::Url;

use crate::error::HarvestError;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36";

/// A single outbound GET with no retry. Non-2xx responses are `HttpStatus` errors.
pub trait Transport: Send + Sync {
    fn get(&self, url: &Url) -> Result<Vec<u8>, HarvestError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/csv;q=0.9, */*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &Url) -> Result<Vec<u8>, HarvestError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "request failed".to_string());
            return Err(HarvestError::HttpStatus {
                url: url.to_string(),
                status,
                message,
            });
        }
        let bytes = response
            .bytes()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Upper bound of the wait after the `attempt`-th failure (1-based):
    /// `2^(attempt-1)` seconds clamped to `[min_delay, max_delay]`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let raw = Duration::from_secs(1u64 << exp);
        raw.clamp(self.min_delay, self.max_delay.max(self.min_delay))
    }

    pub fn delay<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let low = self.min_delay.as_millis() as u64;
        let high = self.ceiling(attempt).as_millis() as u64;
        if high <= low {
            return Duration::from_millis(low);
        }
        Duration::from_millis(rng.random_range(low..=high))
    }
}

pub struct RetryingFetcher<T: Transport> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: Transport> RetryingFetcher<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn fetch(&self, url: &Url) -> Result<Vec<u8>, HarvestError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match self.transport.get(url) {
                Ok(body) => return Ok(body),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.policy.delay(attempt, &mut rand::rng());
                    warn!(
                        %url,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "request failed, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
