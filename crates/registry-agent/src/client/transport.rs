//! Single-shot HTTP exchange with the APISIX admin API.
//!
//! [`AdminTransport`] performs exactly one request and reports what came
//! back; retries, status interpretation and logging live in
//! [`AdminClient`](super::AdminClient).

use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use registry_kernel::HttpMethod;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, trace};

/// Header carrying the admin key.
pub const API_KEY_HEADER: &str = "X-API-KEY";

/// One admin API request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminRequest {
    pub method: HttpMethod,
    pub url: String,
    pub api_key: String,
    /// JSON payload; `None` sends no body and no content type.
    pub body: Option<Vec<u8>>,
}

/// Raw response to an [`AdminRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl AdminResponse {
    pub fn is_success(&self) -> bool {
        self.status < 300
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
pub trait AdminTransport: Send + Sync {
    /// Send `request` once. Non-2xx statuses are returned, not raised.
    async fn send(&self, request: &AdminRequest) -> GatewayResult<AdminResponse>;
}

#[async_trait]
impl<T: AdminTransport + ?Sized> AdminTransport for Arc<T> {
    async fn send(&self, request: &AdminRequest) -> GatewayResult<AdminResponse> {
        (**self).send(request).await
    }
}

/// [`AdminTransport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a transport whose calls each give up after `timeout`.
    pub fn new(timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AdminTransport for ReqwestTransport {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: &AdminRequest) -> GatewayResult<AdminResponse> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method)?, &request.url);

        builder = builder.header(API_KEY_HEADER, &request.api_key);
        if let Some(body) = &request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let transport_error = |e: reqwest::Error| GatewayError::Transport {
            method: request.method,
            url: request.url.clone(),
            message: e.to_string(),
        };

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(transport_error)?;
        trace!(status, len = body.len(), "admin API responded");

        Ok(AdminResponse {
            status,
            body: body.to_vec(),
        })
    }
}

fn to_reqwest_method(method: HttpMethod) -> GatewayResult<reqwest::Method> {
    Ok(match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Head => reqwest::Method::HEAD,
        HttpMethod::Options => reqwest::Method::OPTIONS,
        HttpMethod::Connect => reqwest::Method::CONNECT,
        HttpMethod::Trace => reqwest::Method::TRACE,
        HttpMethod::Purge => reqwest::Method::from_bytes(b"PURGE")
            .map_err(|e| GatewayError::Client(e.to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_method_maps_to_a_request_method() {
        for (method, expected) in [
            (HttpMethod::Get, "GET"),
            (HttpMethod::Options, "OPTIONS"),
            (HttpMethod::Trace, "TRACE"),
            (HttpMethod::Purge, "PURGE"),
        ] {
            assert_eq!(to_reqwest_method(method).unwrap().as_str(), expected);
        }
    }
}
