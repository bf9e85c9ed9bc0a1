//! Wire transports: one call in, one raw reply or classified failure out.
//!
//! Transports never interpret reply bodies beyond "is this JSON"; adapters
//! own the domain semantics.

use crate::error::TransportError;
use crate::request::{Payload, RawReply, Route};
use async_trait::async_trait;

/// Sends one released envelope over the wire.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, route: &Route, params: &Payload) -> Result<RawReply, TransportError>;
}

#[cfg(feature = "http")]
pub use self::rest::HttpTransport;

#[cfg(feature = "http")]
mod rest {
    use super::*;
    use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
    use reqwest::{Client, Response, StatusCode};

    /// REST transport over `reqwest`.
    pub struct HttpTransport {
        base_url: String,
        client: Client,
    }

    impl HttpTransport {
        pub fn new(base_url: &str) -> Result<Self, TransportError> {
            let client = Client::builder()
                .pool_max_idle_per_host(4)
                .build()
                .map_err(|e| TransportError::Network(format!("client init: {e}")))?;
            Ok(Self::with_client(base_url, client))
        }

        pub fn with_client(base_url: &str, client: Client) -> Self {
            Self {
                base_url: format!("{}/", base_url.trim_end_matches('/')),
                client,
            }
        }

        pub fn base_url(&self) -> &str {
            &self.base_url
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base_url, path.trim_start_matches('/'))
        }

        async fn read_reply(resp: Response) -> Result<RawReply, TransportError> {
            let status = resp.status();
            if status.is_success() {
                let text = resp.text().await.map_err(classify)?;
                return serde_json::from_str(&text)
                    .map(|body| RawReply {
                        status: status.as_u16(),
                        body,
                    })
                    .map_err(|e| TransportError::Protocol {
                        status: Some(status.as_u16()),
                        message: format!("malformed reply body: {e}"),
                    });
            }

            let retry_after_ms = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs.saturating_mul(1_000));
            let body_text = resp.text().await.unwrap_or_default();

            Err(match status {
                StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited { retry_after_ms },
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    TransportError::Auth(body_text)
                }
                StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT => {
                    TransportError::Network(format!("{status}: {body_text}"))
                }
                _ => TransportError::Protocol {
                    status: Some(status.as_u16()),
                    message: body_text,
                },
            })
        }
    }

    #[async_trait]
    impl Transport for HttpTransport {
        async fn send(
            &self,
            route: &Route,
            params: &Payload,
        ) -> Result<RawReply, TransportError> {
            let req = match route {
                Route::Get(path) => self.client.get(self.url(path)).query(params),
                Route::Post(path) => {
                    let body = serde_urlencoded::to_string(params)
                        .map_err(|e| TransportError::protocol(format!("encode form: {e}")))?;
                    self.client
                        .post(self.url(path))
                        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                        .body(body)
                }
                Route::Ledger(op) => {
                    return Err(TransportError::protocol(format!(
                        "ledger op {op} sent to an HTTP transport"
                    )))
                }
            };
            let resp = req.send().await.map_err(classify)?;
            Self::read_reply(resp).await
        }
    }

    fn classify(e: reqwest::Error) -> TransportError {
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            TransportError::Network(e.to_string())
        } else {
            TransportError::protocol(e.to_string())
        }
    }

}
