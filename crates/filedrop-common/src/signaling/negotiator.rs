//! Offer/answer negotiation
//!
//! Each pending offer gets its own task: build an answer through the
//! [`PeerConnector`], submit it to the relay, record the outcome. A failing
//! offer never affects the others or the renewal loop.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::core::connection::{
    Attempt, ConnectionStatus, ConnectionTracker, PeerId, PeerMetadata, StateError, TrackerState,
    TransferProgress, UploaderConnection,
};
use crate::signaling::relay::{RelayApi, SdpType, SessionDescription, TransportError};
use crate::signaling::session::Session;

/// Failure of the peer-connection primitive while building an answer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("Expected an offer, got {0:?}")]
    NotAnOffer(SdpType),
    #[error("Failed to create answer: {0}")]
    Answer(String),
}

/// Why a single offer could not be answered
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NegotiationFailure {
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error("Failed to submit answer: {0}")]
    Transport(#[from] TransportError),
}

/// Result of one negotiation task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationOutcome {
    pub offer_id: String,
    pub result: Result<(), NegotiationFailure>,
}

impl NegotiationOutcome {
    pub fn is_answered(&self) -> bool {
        self.result.is_ok()
    }
}

/// Data-channel event sink handed to a [`PeerConnector`] for one peer.
///
/// The connector calls these as the channel and the transfer progress; each
/// call is applied to the [`ConnectionTracker`]. Every sink belongs to one
/// negotiation attempt: creating a sink for a peer starts a new attempt, and
/// events from an older or retired sink are ignored.
#[derive(Clone)]
pub struct ChannelEvents {
    peer: PeerId,
    attempt: Attempt,
    tracker: Arc<ConnectionTracker>,
    total_files: usize,
}

impl ChannelEvents {
    pub fn new(
        peer: impl Into<PeerId>,
        tracker: Arc<ConnectionTracker>,
        total_files: usize,
    ) -> Self {
        let peer = peer.into();
        let attempt = tracker.begin_attempt(&peer);
        Self {
            peer,
            attempt,
            tracker,
            total_files,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer
    }

    /// The data channel is usable: register the connection as `Pending`.
    pub fn opened(&self, metadata: Option<PeerMetadata>) {
        let mut conn = UploaderConnection::pending(self.total_files);
        conn.peer_metadata = metadata;
        match self.scoped(|s| s.register(self.peer.clone(), conn)) {
            Ok(()) => log::info!("Data channel opened for peer {}", self.peer),
            Err(e) => log::warn!("Ignoring channel open: {}", e),
        }
    }

    pub fn status(&self, status: ConnectionStatus) -> Result<(), StateError> {
        self.scoped(|s| s.transition(&self.peer, status))
    }

    pub fn progress(&self, progress: TransferProgress) -> Result<(), StateError> {
        self.scoped(|s| s.record_progress(&self.peer, progress))
    }

    /// The channel is gone. A connection that already finished stays `Done`.
    pub fn closed(&self) {
        match self.scoped(|s| s.close_unless_terminal(&self.peer)) {
            Ok(true) => {}
            Ok(false) => log::debug!("Channel closed for finished peer {}", self.peer),
            Err(StateError::UnknownPeer(_)) => {
                log::debug!("Channel closed before opening for peer {}", self.peer)
            }
            Err(StateError::StaleAttempt(_)) => {
                log::debug!("Ignoring close from retired attempt for peer {}", self.peer)
            }
            Err(e) => log::warn!("Failed to close peer {}: {}", self.peer, e),
        }
    }

    /// Detach this sink. Whatever it registered is dropped and its later
    /// events are ignored.
    pub fn retire(&self) {
        self.tracker.retire_attempt(&self.peer, self.attempt);
    }

    fn scoped<T>(
        &self,
        op: impl FnOnce(&mut TrackerState) -> Result<T, StateError>,
    ) -> Result<T, StateError> {
        self.tracker.with_attempt(&self.peer, self.attempt, op)
    }
}

/// The peer-connection primitive
///
/// Any transport that can answer a session-description offer and report
/// when the resulting data channel opens satisfies this.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Build the local answer for `offer`. Channel events for this peer go
    /// to `events`, possibly long after this returns.
    async fn create_answer(
        &self,
        offer: &SessionDescription,
        events: ChannelEvents,
    ) -> Result<SessionDescription, NegotiationError>;

    /// Tear down whatever a failed attempt built for `peer_id`. Called before
    /// the offer becomes eligible for a retry.
    async fn discard(&self, _peer_id: &str) {}
}

/// Answers offers and records the results.
pub struct Negotiator {
    relay: Arc<dyn RelayApi>,
    connector: Arc<dyn PeerConnector>,
    tracker: Arc<ConnectionTracker>,
    total_files: usize,
    /// Offers answered or in flight
    seen: Mutex<HashSet<String>>,
}

impl Negotiator {
    pub fn new(
        relay: Arc<dyn RelayApi>,
        connector: Arc<dyn PeerConnector>,
        tracker: Arc<ConnectionTracker>,
    ) -> Self {
        Self {
            relay,
            connector,
            tracker,
            total_files: 0,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Number of files each new connection will be offered
    pub fn with_total_files(mut self, total_files: usize) -> Self {
        self.total_files = total_files;
        self
    }

    pub fn tracker(&self) -> &Arc<ConnectionTracker> {
        &self.tracker
    }

    /// Negotiate `offer` in its own task.
    ///
    /// The task resolves to `None` when the offer was skipped as a duplicate.
    pub fn dispatch(
        self: &Arc<Self>,
        session: Arc<Session>,
        offer_id: String,
        offer: SessionDescription,
    ) -> JoinHandle<Option<NegotiationOutcome>> {
        let this = self.clone();
        tokio::spawn(async move { this.negotiate(&session, &offer_id, &offer).await })
    }

    /// Answer one offer. Never fails: the outcome is logged, recorded in the
    /// tracker and returned.
    pub async fn negotiate(
        &self,
        session: &Session,
        offer_id: &str,
        offer: &SessionDescription,
    ) -> Option<NegotiationOutcome> {
        if !self.claim(offer_id) {
            log::debug!("Offer {} already handled, skipping", offer_id);
            return None;
        }

        let events = ChannelEvents::new(offer_id, self.tracker.clone(), self.total_files);
        let result = self.answer_offer(session, offer_id, offer, events.clone()).await;
        match &result {
            Ok(()) => log::info!("Answered offer {}", offer_id),
            Err(e) => {
                log::error!("Failed to answer offer {}: {}", offer_id, e);
                events.retire();
                self.connector.discard(offer_id).await;
                // Let a redelivery of this offer try again
                self.release(offer_id);
            }
        }

        let outcome = NegotiationOutcome {
            offer_id: offer_id.to_string(),
            result,
        };
        self.tracker.record_outcome(outcome.clone());
        Some(outcome)
    }

    async fn answer_offer(
        &self,
        session: &Session,
        offer_id: &str,
        offer: &SessionDescription,
        events: ChannelEvents,
    ) -> Result<(), NegotiationFailure> {
        if offer.sdp_type != SdpType::Offer {
            return Err(NegotiationError::NotAnOffer(offer.sdp_type).into());
        }

        let answer = self.connector.create_answer(offer, events).await?;
        log::debug!("Created answer for offer {}", offer_id);

        self.relay
            .answer(&session.short_slug, offer_id, &answer)
            .await?;
        Ok(())
    }

    fn claim(&self, offer_id: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(offer_id.to_string())
    }

    fn release(&self, offer_id: &str) {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(offer_id);
    }
}
