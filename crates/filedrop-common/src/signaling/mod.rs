//! Relay signaling: session creation, renewal and offer/answer exchange

pub mod negotiator;
pub mod poller;
pub mod relay;
pub mod session;
