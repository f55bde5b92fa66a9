//! Provider DNS API: CNAME aliases pointing at the named connector.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::DnsSection;
use crate::error::RelayError;
use crate::Result;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// A CNAME record as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    pub name: String,
    pub content: String,
}

/// Alias record operations used by named tunnels.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn find_cname(&self, name: &str) -> Result<Option<DnsRecord>>;

    async fn create_cname(&self, name: &str, target: &str) -> Result<DnsRecord>;
}

/// Bounds on retrying a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DnsSection) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            initial: Duration::from_millis(config.retry_backoff_ms),
            max: Duration::from_secs(10),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DnsSection::default())
    }
}

/// Doubling delay between attempts, capped at `max`.
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            max,
        }
    }

    /// Get the next delay and advance the backoff.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        delay
    }
}

/// Outcome of one failed attempt.
#[derive(Debug)]
pub enum CallError {
    /// Worth another attempt: network failure, throttling, provider 5xx.
    Transient(String),
    /// Retrying cannot help.
    Fatal(String),
}

/// Run `call` until it succeeds, fails fatally, or the policy is exhausted.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, CallError>>,
{
    let mut backoff = Backoff::new(policy.initial, policy.max);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(CallError::Fatal(reason)) => {
                return Err(RelayError::DnsRecord(format!("{operation}: {reason}")));
            }
            Err(CallError::Transient(reason)) if attempt >= policy.max_attempts => {
                return Err(RelayError::DnsRecord(format!(
                    "{operation} failed after {attempt} attempts: {reason}"
                )));
            }
            Err(CallError::Transient(reason)) => {
                let delay = backoff.next_delay();
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "{} failed, retrying: {}",
                    operation,
                    reason
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

fn describe(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return "request rejected".to_string();
    }
    errors
        .iter()
        .map(|e| format!("{} ({})", e.message, e.code))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Cloudflare v4 DNS records API.
pub struct CloudflareDns {
    client: reqwest::Client,
    api_base: String,
    api_token: String,
    zone_id: String,
    retry: RetryPolicy,
}

impl CloudflareDns {
    pub fn new(
        api_base: impl Into<String>,
        api_token: impl Into<String>,
        zone_id: impl Into<String>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("cloude-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            zone_id: zone_id.into(),
            retry,
        })
    }

    pub fn from_config(config: &DnsSection) -> Result<Self> {
        let token = config
            .api_token
            .clone()
            .ok_or_else(|| RelayError::DnsRecord("api_token is not configured".to_string()))?;
        let zone = config
            .zone_id
            .clone()
            .ok_or_else(|| RelayError::DnsRecord("zone_id is not configured".to_string()))?;
        Self::new(
            config.api_base.clone(),
            token,
            zone,
            RetryPolicy::from_config(config),
        )
    }

    fn records_url(&self) -> String {
        format!("{}/zones/{}/dns_records", self.api_base, self.zone_id)
    }

    async fn call<T, B>(&self, operation: &str, build: B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let build = &build;
        with_retry(&self.retry, operation, move || async move {
            let response = build(&self.client)
                .bearer_auth(&self.api_token)
                .send()
                .await
                .map_err(|e| CallError::Transient(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                return Err(CallError::Transient(format!("HTTP {status}")));
            }

            let envelope: Envelope<T> = response
                .json()
                .await
                .map_err(|e| CallError::Fatal(format!("HTTP {status}: {e}")))?;
            if !status.is_success() || !envelope.success {
                return Err(CallError::Fatal(format!(
                    "HTTP {status}: {}",
                    describe(&envelope.errors)
                )));
            }
            envelope
                .result
                .ok_or_else(|| CallError::Fatal("response has no result".to_string()))
        })
        .await
    }
}

#[async_trait]
impl DnsProvider for CloudflareDns {
    async fn find_cname(&self, name: &str) -> Result<Option<DnsRecord>> {
        let url = self.records_url();
        let records: Vec<DnsRecord> = self
            .call("lookup DNS record", |client| {
                client
                    .get(&url)
                    .query(&[("type", "CNAME"), ("name", name)])
            })
            .await?;
        debug!(name, found = !records.is_empty(), "CNAME lookup");
        Ok(records.into_iter().next())
    }

    async fn create_cname(&self, name: &str, target: &str) -> Result<DnsRecord> {
        let url = self.records_url();
        let body = json!({
            "type": "CNAME",
            "name": name,
            "content": target,
            "ttl": 1,
            "proxied": true,
        });
        self.call("create DNS record", |client| client.post(&url).json(&body))
            .await
    }
}
