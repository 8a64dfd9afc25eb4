//! WebRTC transport for answering browser offers

pub mod common;
pub mod connector;

pub use connector::WebRtcConnector;
