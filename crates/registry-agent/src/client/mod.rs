//! APISIX admin API client.
//!
//! ```text
//!   AdminClient ──► retry loop ──► AdminTransport::send ──► APISIX /apisix/admin
//!        │              │
//!        │              └─ sleeps interval × attempt between attempts
//!        └─ PUT/DELETE /services, /routes, /upstreams, /protos, /consumers
//!           GET /routes
//! ```
//!
//! Every call is retried until it succeeds (any status below 300) or the
//! attempt budget runs out. There is no sleep after the final attempt. A
//! `DELETE` answered with 404 counts as done.

pub mod transport;

pub use transport::{AdminRequest, AdminResponse, AdminTransport, ReqwestTransport};

use crate::error::{GatewayError, GatewayResult};
use registry_kernel::{
    ConsumerConfig, HttpMethod, ProtoObject, RouteListing, RouteObject, ServiceObject,
    UpstreamObject,
};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Attempt budget and linear backoff for admin API calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl RetryPolicy {
    /// `max_attempts` below one is raised to one.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.interval.saturating_mul(attempt)
    }

    /// Total sleep when every attempt fails.
    pub fn worst_case_sleep(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.backoff(a)).sum()
    }
}

/// Where the admin API lives and how to authenticate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminEndpoint {
    pub base_url: String,
    #[serde(skip)]
    pub api_key: String,
}

impl AdminEndpoint {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

/// Outcome of a consumer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerOutcome {
    Registered,
    /// No auth plugin enabled; nothing was sent.
    Skipped,
}

/// Retrying admin API client.
pub struct AdminClient<T = ReqwestTransport> {
    transport: T,
    endpoint: AdminEndpoint,
    policy: RetryPolicy,
    log_bodies: bool,
}

impl<T: AdminTransport> AdminClient<T> {
    pub fn new(transport: T, endpoint: AdminEndpoint, policy: RetryPolicy) -> Self {
        Self {
            transport,
            endpoint,
            policy,
            log_bodies: false,
        }
    }

    /// Log request and response bodies of every call.
    pub fn with_body_logging(mut self, enabled: bool) -> Self {
        self.log_bodies = enabled;
        self
    }

    pub fn endpoint(&self) -> &AdminEndpoint {
        &self.endpoint
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    // ─────────────────────────────────────────────────────────────────────
    // Services
    // ─────────────────────────────────────────────────────────────────────

    pub async fn register_service(&self, service: &ServiceObject) -> GatewayResult<()> {
        self.put(&format!("/services/{}", service.id), service).await
    }

    pub async fn delete_service(&self, id: &str) -> GatewayResult<()> {
        self.delete(&format!("/services/{id}")).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Routes
    // ─────────────────────────────────────────────────────────────────────

    pub async fn register_route(&self, route: &RouteObject) -> GatewayResult<()> {
        self.put(&format!("/routes/{}", route.id), route).await
    }

    pub async fn delete_route(&self, id: &str) -> GatewayResult<()> {
        self.delete(&format!("/routes/{id}")).await
    }

    /// Every route stored in the gateway.
    pub async fn list_routes(&self) -> GatewayResult<RouteListing> {
        let path = "/routes";
        let body = self.send(HttpMethod::Get, path, None).await?;
        serde_json::from_slice(&body).map_err(|source| GatewayError::Decode {
            path: path.to_string(),
            source,
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Upstreams, descriptors, consumers
    // ─────────────────────────────────────────────────────────────────────

    pub async fn register_upstream(&self, upstream: &UpstreamObject) -> GatewayResult<()> {
        self.put(&format!("/upstreams/{}", upstream.id), upstream)
            .await
    }

    pub async fn delete_upstream(&self, id: &str) -> GatewayResult<()> {
        self.delete(&format!("/upstreams/{id}")).await
    }

    pub async fn register_proto(&self, id: &str, proto: &ProtoObject) -> GatewayResult<()> {
        self.put(&format!("/protos/{id}"), proto).await
    }

    pub async fn delete_proto(&self, id: &str) -> GatewayResult<()> {
        self.delete(&format!("/protos/{id}")).await
    }

    /// Compose the consumer's auth plugins and register it under its name.
    pub async fn register_consumer(
        &self,
        consumer: &ConsumerConfig,
    ) -> GatewayResult<ConsumerOutcome> {
        let Some(object) = consumer.to_object() else {
            return Ok(ConsumerOutcome::Skipped);
        };
        self.put(&format!("/consumers/{}", object.username), &object)
            .await?;
        Ok(ConsumerOutcome::Registered)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Request plumbing
    // ─────────────────────────────────────────────────────────────────────

    async fn put<B: Serialize>(&self, path: &str, body: &B) -> GatewayResult<()> {
        let payload = serde_json::to_vec(body).map_err(GatewayError::Encode)?;
        self.send(HttpMethod::Put, path, Some(payload)).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> GatewayResult<()> {
        self.send(HttpMethod::Delete, path, None).await?;
        Ok(())
    }

    #[instrument(skip(self, body))]
    async fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> GatewayResult<Vec<u8>> {
        let request = AdminRequest {
            method,
            url: format!("{}{}", self.endpoint.base_url, path),
            api_key: self.endpoint.api_key.clone(),
            body,
        };

        if self.log_bodies {
            let payload = request
                .body
                .as_deref()
                .map(String::from_utf8_lossy)
                .unwrap_or_default();
            info!(url = %request.url, body = %payload, "admin API request");
        }

        let mut attempt = 1;
        loop {
            let error = match self.transport.send(&request).await {
                Ok(response) if response.is_success() => {
                    if self.log_bodies {
                        info!(status = response.status, body = %response.body_text(), "admin API response");
                    }
                    debug!(attempt, status = response.status, "admin API call succeeded");
                    return Ok(response.body);
                }
                Ok(response) if method == HttpMethod::Delete && response.status == 404 => {
                    debug!(attempt, url = %request.url, "object already absent");
                    return Ok(response.body);
                }
                Ok(response) => {
                    if self.log_bodies {
                        info!(status = response.status, body = %response.body_text(), "admin API response");
                    }
                    GatewayError::Status {
                        method,
                        url: request.url.clone(),
                        status: response.status,
                        body: response.body_text(),
                    }
                }
                Err(e) => e,
            };

            warn!(
                attempt,
                max_attempts = self.policy.max_attempts,
                error = %error,
                "admin API call failed"
            );

            if attempt >= self.policy.max_attempts {
                return Err(GatewayError::RetriesExhausted {
                    method,
                    path: path.to_string(),
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            tokio::time::sleep(self.policy.backoff(attempt)).await;
            attempt += 1;
        }
    }
}
