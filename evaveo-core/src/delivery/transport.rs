//! HTTP transport for the EVAVEO collector
//!
//! Each record is posted on its own to `{api_url}/sdk/event` as a JSON body.
//! Any 2xx status is a delivery; everything else, including connection
//! errors and timeouts, is an [`Error::Delivery`].

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use crate::error::{Error, Result};
use crate::event::EventRecord;
use crate::identity::Identity;

/// Path appended to the collector base URL
pub const EVENT_PATH: &str = "/sdk/event";

/// Asynchronous single-record POST primitive
///
/// The delivery queue awaits one `send` at a time. Implementations bring
/// their own timeout; the queue imposes none.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, record: &EventRecord) -> impl Future<Output = Result<()>> + Send;
}

/// `reqwest`-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Create a transport for the identity's collector URL
    ///
    /// The API key is also sent as an `X-API-Key` header.
    pub fn new(identity: &Identity, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "X-API-Key",
            HeaderValue::from_str(identity.api_key())
                .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
        );

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: format!("{}{}", identity.api_url(), EVENT_PATH),
        })
    }

    /// Full URL records are posted to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    async fn send(&self, record: &EventRecord) -> Result<()> {
        let body = record.to_json()?;

        let response = self
            .http_client
            .post(&self.endpoint)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Delivery(format!(
                "API error ({}): {}",
                status, error_text
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticDeviceId;

    fn identity(key: &str, url: &str) -> Identity {
        Identity::new(key, url, &StaticDeviceId("device".to_string()))
    }

    #[test]
    fn test_endpoint_appends_event_path() {
        let transport = HttpTransport::new(
            &identity("vr_key", "https://api.vrmanager.evaveo.com/api/tracking/"),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            transport.endpoint(),
            "https://api.vrmanager.evaveo.com/api/tracking/sdk/event"
        );
    }

    #[test]
    fn test_rejects_key_that_cannot_be_a_header() {
        let result = HttpTransport::new(&identity("bad\nkey", "http://x"), Duration::from_secs(5));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_unreachable_collector_is_delivery_error() {
        // Port 9 on localhost is not expected to accept connections
        let transport = HttpTransport::new(
            &identity("vr_key", "http://127.0.0.1:9"),
            Duration::from_secs(2),
        )
        .unwrap();
        let record = crate::event::EventBuilder::new(
            std::sync::Arc::new(identity("vr_key", "http://127.0.0.1:9")),
            std::sync::Arc::new(crate::identity::SystemClock),
        )
        .custom("ping", None);

        let result = transport.send(&record).await;
        assert!(matches!(result, Err(Error::Delivery(_))));
    }
}
