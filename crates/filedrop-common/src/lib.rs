//! filedrop-common: Session signaling coordinator for filedrop senders
//!
//! This crate provides everything a sender needs between "files chosen" and
//! "data channel open": the relay client, session creation, the renewal
//! loop, offer/answer negotiation and the per-peer connection tracker.
//! Transports plug in through [`signaling::negotiator::PeerConnector`].

pub mod config;
pub mod core;
pub mod signaling;

pub use config::UploaderConfig;
pub use core::connection::{
    ConnectionStatus, ConnectionTracker, PeerId, PeerMetadata, StateError, TransferProgress,
    UploaderConnection,
};
pub use core::slug::{resolve_url, Origin};
pub use core::upload::{PendingFile, UploadDraft, UploadError, UploadStage};
pub use signaling::negotiator::{
    ChannelEvents, NegotiationError, NegotiationFailure, NegotiationOutcome, Negotiator,
    PeerConnector,
};
pub use signaling::poller::{every, PollerHandle, SignalingPoller};
pub use signaling::relay::{
    HttpRelay, RelayApi, RenewResponse, SdpType, SessionDescription, TransportError,
};
pub use signaling::session::{Secret, Session, SessionRegistry};
