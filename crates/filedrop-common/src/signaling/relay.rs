//! Relay HTTP client
//!
//! The relay exposes three JSON endpoints, all POST:
//! - `/api/create`: no body -> `{"secret", "longSlug", "shortSlug"}`
//! - `/api/renew`: `{"slug", "secret"}` -> `{"offers": {offerID: description}}`
//! - `/api/answer`: `{"slug", "offerID", "answer"}` -> ack (ignored)
//!
//! Every response is checked against its schema; anything that does not fit
//! is reported as [`TransportError::Malformed`] instead of being passed on.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::signaling::session::Secret;

const CREATE_PATH: &str = "api/create";
const RENEW_PATH: &str = "api/renew";
const ANSWER_PATH: &str = "api/answer";

/// Longest response body quoted back in a status error
const MAX_ERROR_BODY: usize = 200;

/// Errors from relay calls
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Relay unreachable at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },
    #[error("Relay request to {endpoint} timed out")]
    Timeout { endpoint: String },
    #[error("Relay returned status {status} for {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("Malformed relay response from {endpoint}: {reason}")]
    Malformed { endpoint: String, reason: String },
    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),
}

/// Kind of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description in the browser's `RTCSessionDescriptionInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Body of a successful `/api/create`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponse {
    pub secret: Secret,
    pub long_slug: String,
    pub short_slug: String,
}

impl CreateResponse {
    fn validate(&self) -> Result<(), String> {
        if self.secret.expose().is_empty() {
            return Err("empty secret".to_string());
        }
        if self.long_slug.is_empty() || self.short_slug.is_empty() {
            return Err("empty slug".to_string());
        }
        Ok(())
    }
}

/// Body of a successful `/api/renew`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RenewResponse {
    pub offers: BTreeMap<String, SessionDescription>,
}

impl RenewResponse {
    fn validate(&self) -> Result<(), String> {
        if self.offers.keys().any(|id| id.is_empty()) {
            return Err("empty offer ID".to_string());
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct RenewRequest<'a> {
    slug: &'a str,
    secret: &'a str,
}

#[derive(Serialize)]
struct AnswerRequest<'a> {
    slug: &'a str,
    #[serde(rename = "offerID")]
    offer_id: &'a str,
    answer: &'a SessionDescription,
}

/// The relay's session API
///
/// Implemented over HTTP by [`HttpRelay`]; tests substitute in-memory fakes.
#[async_trait]
pub trait RelayApi: Send + Sync {
    /// Register a new session
    async fn create(&self) -> Result<CreateResponse, TransportError>;

    /// Keep the session alive and collect pending offers
    async fn renew(&self, slug: &str, secret: &Secret) -> Result<RenewResponse, TransportError>;

    /// Submit the answer for one offer
    async fn answer(
        &self,
        slug: &str,
        offer_id: &str,
        answer: &SessionDescription,
    ) -> Result<(), TransportError>;
}

/// JSON-over-HTTP relay client
#[derive(Debug, Clone)]
pub struct HttpRelay {
    client: reqwest::Client,
    base: Url,
}

impl HttpRelay {
    /// Create a client for the relay at `base`. Each request is bounded by
    /// `timeout`.
    pub fn new(base: &str, timeout: Duration) -> Result<Self, TransportError> {
        let mut base = Url::parse(base).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(base.to_string()));
        }
        // Endpoints are joined relative to the base, so it has to look like a directory
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Unreachable {
                endpoint: base.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base
            .join(path)
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))
    }

    /// POST `body` as JSON and return the raw response text of a 2xx reply.
    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<String, TransportError> {
        let url = self.endpoint(path)?;
        let endpoint = format!("/{}", path);

        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    endpoint: endpoint.clone(),
                }
            } else {
                TransportError::Unreachable {
                    endpoint: endpoint.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    endpoint: endpoint.clone(),
                }
            } else {
                TransportError::Unreachable {
                    endpoint: endpoint.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        if !status.is_success() {
            let body: String = text.chars().take(MAX_ERROR_BODY).collect();
            return Err(TransportError::Status {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        Ok(text)
    }

    fn parse<R: DeserializeOwned>(path: &str, text: &str) -> Result<R, TransportError> {
        serde_json::from_str(text).map_err(|e| TransportError::Malformed {
            endpoint: format!("/{}", path),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl RelayApi for HttpRelay {
    async fn create(&self) -> Result<CreateResponse, TransportError> {
        let text = self.post::<()>(CREATE_PATH, None).await?;
        let created: CreateResponse = Self::parse(CREATE_PATH, &text)?;
        created.validate().map_err(|reason| TransportError::Malformed {
            endpoint: format!("/{}", CREATE_PATH),
            reason,
        })?;
        Ok(created)
    }

    async fn renew(&self, slug: &str, secret: &Secret) -> Result<RenewResponse, TransportError> {
        let body = RenewRequest {
            slug,
            secret: secret.expose(),
        };
        let text = self.post(RENEW_PATH, Some(&body)).await?;
        let renewed: RenewResponse = Self::parse(RENEW_PATH, &text)?;
        renewed.validate().map_err(|reason| TransportError::Malformed {
            endpoint: format!("/{}", RENEW_PATH),
            reason,
        })?;
        Ok(renewed)
    }

    async fn answer(
        &self,
        slug: &str,
        offer_id: &str,
        answer: &SessionDescription,
    ) -> Result<(), TransportError> {
        let body = AnswerRequest {
            slug,
            offer_id,
            answer,
        };
        self.post(ANSWER_PATH, Some(&body)).await?;
        Ok(())
    }
}
