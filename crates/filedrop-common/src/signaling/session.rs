//! Session creation against the relay.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::core::slug::{resolve_url, Origin};
use crate::signaling::relay::{RelayApi, TransportError};

/// Capability token that authorizes renewal and answer submission.
///
/// Never formatted: `Debug` prints a placeholder and there is no `Display`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw token, for the relay request body only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// A live session at the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub upload_id: String,
    pub secret: Secret,
    pub long_slug: String,
    pub short_slug: String,
}

impl Session {
    pub fn long_url(&self, origin: &Origin) -> String {
        resolve_url(origin, &self.long_slug)
    }

    pub fn short_url(&self, origin: &Origin) -> String {
        resolve_url(origin, &self.short_slug)
    }
}

/// Creates the session for one upload attempt and caches it.
///
/// Concurrent callers share a single in-flight request. A failed attempt is
/// not cached, so the caller decides whether to try again.
pub struct SessionRegistry {
    relay: Arc<dyn RelayApi>,
    upload_id: String,
    session: OnceCell<Arc<Session>>,
}

impl SessionRegistry {
    pub fn new(relay: Arc<dyn RelayApi>) -> Self {
        Self::with_upload_id(relay, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_upload_id(relay: Arc<dyn RelayApi>, upload_id: impl Into<String>) -> Self {
        Self {
            relay,
            upload_id: upload_id.into(),
            session: OnceCell::new(),
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// The session if one has been created
    pub fn current(&self) -> Option<Arc<Session>> {
        self.session.get().cloned()
    }

    /// Return the cached session, creating it at the relay on first use.
    pub async fn create_session(&self) -> Result<Arc<Session>, TransportError> {
        let session = self
            .session
            .get_or_try_init(|| async {
                log::debug!("Creating relay session for upload {}", self.upload_id);
                let created = self.relay.create().await?;
                log::info!(
                    "Session created: long slug {}, short slug {}",
                    created.long_slug,
                    created.short_slug
                );
                Ok::<_, TransportError>(Arc::new(Session {
                    upload_id: self.upload_id.clone(),
                    secret: created.secret,
                    long_slug: created.long_slug,
                    short_slug: created.short_slug,
                }))
            })
            .await?;
        Ok(session.clone())
    }
}
