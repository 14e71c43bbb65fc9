//! HTTP transport to a relay.
//!
//! The relay session and mailbox façade depend only on [`Transport`], never
//! on `reqwest` directly, so tests can drive the handshake and command
//! protocol against an in-process mock relay.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ZaxError;

/// A single async request/response function toward a relay endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: String,
    ) -> Result<String, ZaxError>;
}

/// Default [`Transport`] backed by `reqwest`.
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is static and always valid");
        ReqwestTransport { http }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: String,
    ) -> Result<String, ZaxError> {
        tracing::debug!(method, url, body_len = body.len(), "relay request");

        let mut builder = match method {
            "POST" => self.http.post(url),
            "GET" => self.http.get(url),
            other => return Err(ZaxError::invariant(format!("unsupported HTTP method: {other}"))),
        };
        for (name, value) in headers {
            builder = builder.header(name, value);
        }

        let response = builder
            .body(body)
            .send()
            .await
            .map_err(|e| ZaxError::network(e.status().map(|s| s.as_u16())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ZaxError::network(Some(status.as_u16())));
        }

        response
            .text()
            .await
            .map_err(|_| ZaxError::network(Some(status.as_u16())))
    }
}
