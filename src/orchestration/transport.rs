//! # Delivery Transport
//!
//! Seam between the dispatch queue and the outside world. The queue only
//! ever sees [`DeliveryTransport`]; production wires in the reqwest-backed
//! [`HttpTransport`], tests substitute scripted transports.
//!
//! The error split matters for retry semantics: `Ok` carries the HTTP
//! status for the queue to classify, while [`TransportError`] marks a
//! transport-level failure (connect, TLS, timeout) where no response was
//! received at all.

use async_trait::async_trait;
use thiserror::Error;

use crate::config::DispatchMethod;

/// One outbound delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub url: String,
    pub method: DispatchMethod,
    pub bearer_token: Option<String>,
    pub body: Vec<u8>,
}

/// Response from a completed attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    pub status: u16,
}

impl DeliveryResponse {
    /// Success is any 2xx response.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
#[error("Transport error: {0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(
        &self,
        request: DeliveryRequest,
    ) -> std::result::Result<DeliveryResponse, TransportError>;
}

/// HTTP(S) transport over a shared reqwest client.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn deliver(
        &self,
        request: DeliveryRequest,
    ) -> std::result::Result<DeliveryResponse, TransportError> {
        let mut builder = match request.method {
            DispatchMethod::Post => self.client.post(&request.url),
            DispatchMethod::Put => self.client.put(&request.url),
        };

        builder = builder
            .header("Content-Type", "application/octet-stream")
            .body(request.body);

        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        Ok(DeliveryResponse {
            status: response.status().as_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_2xx_counts_as_success() {
        assert!(DeliveryResponse { status: 200 }.is_success());
        assert!(DeliveryResponse { status: 204 }.is_success());
        assert!(!DeliveryResponse { status: 301 }.is_success());
        assert!(!DeliveryResponse { status: 500 }.is_success());
    }
}
