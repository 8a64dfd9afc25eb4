//! WebRTC peer connection wrapper
//!
//! One [`WebRtcPeer`] per receiver. The sender only ever answers, so the
//! wrapper exposes the answering half of the handshake plus the events the
//! connector needs to watch: incoming data channels and connection state.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

// ============================================================================
// Constants
// ============================================================================

/// Google STUN server for NAT traversal
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

// ============================================================================
// WebRTC Peer Connection
// ============================================================================

/// WebRTC peer connection wrapper
pub struct WebRtcPeer {
    peer_connection: Arc<RTCPeerConnection>,
    data_channel_rx: Option<mpsc::Receiver<Arc<RTCDataChannel>>>,
    ice_gathering_rx: Option<watch::Receiver<RTCIceGathererState>>,
    state_rx: Option<watch::Receiver<RTCPeerConnectionState>>,
}

impl WebRtcPeer {
    /// Create a new peer connection using the given STUN/TURN URLs
    pub async fn new(ice_urls: &[String]) -> Result<Self> {
        let ice_servers = if ice_urls.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: ice_urls.to_vec(),
                ..Default::default()
            }]
        };

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .context("Failed to register default codecs")?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .context("Failed to register interceptors")?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer_connection = Arc::new(
            api.new_peer_connection(config)
                .await
                .context("Failed to create peer connection")?,
        );

        let (data_channel_tx, data_channel_rx) = mpsc::channel(4);
        let (ice_gathering_tx, ice_gathering_rx) = watch::channel(RTCIceGathererState::New);
        let (state_tx, state_rx) = watch::channel(RTCPeerConnectionState::New);

        peer_connection.on_ice_gathering_state_change(Box::new(move |state| {
            if ice_gathering_tx.send(state).is_err() {
                log::debug!("ICE gathering state {} dropped - receiver gone", state);
            }
            Box::pin(async {})
        }));

        peer_connection.on_peer_connection_state_change(Box::new(move |state| {
            match state {
                RTCPeerConnectionState::Connected => log::debug!("WebRTC connection established"),
                RTCPeerConnectionState::Failed => log::warn!("WebRTC connection failed"),
                _ => {}
            }
            let _ = state_tx.send(state);
            Box::pin(async {})
        }));

        // Browsers create the channel on their side; we only receive it
        peer_connection.on_data_channel(Box::new(move |dc| {
            let dc_tx = data_channel_tx.clone();
            let label = dc.label().to_string();
            Box::pin(async move {
                if dc_tx.send(dc).await.is_err() {
                    log::warn!(
                        "Failed to forward data channel '{}' - receiver dropped",
                        label
                    );
                }
            })
        }));

        Ok(Self {
            peer_connection,
            data_channel_rx: Some(data_channel_rx),
            ice_gathering_rx: Some(ice_gathering_rx),
            state_rx: Some(state_rx),
        })
    }

    /// Take ownership of the data channel receiver
    pub fn take_data_channel_rx(&mut self) -> Option<mpsc::Receiver<Arc<RTCDataChannel>>> {
        self.data_channel_rx.take()
    }

    /// Take ownership of the connection state receiver
    pub fn take_state_rx(&mut self) -> Option<watch::Receiver<RTCPeerConnectionState>> {
        self.state_rx.take()
    }

    /// Apply the remote offer and produce our answer with every ICE
    /// candidate already embedded.
    ///
    /// The relay carries a single answer per offer, so candidates cannot be
    /// trickled; we wait for gathering to finish (or `gather_timeout`)
    /// before reading back the local description.
    pub async fn answer_offer(
        &mut self,
        offer_sdp: String,
        gather_timeout: Duration,
    ) -> Result<RTCSessionDescription> {
        let offer = RTCSessionDescription::offer(offer_sdp).context("Failed to parse offer SDP")?;
        self.peer_connection
            .set_remote_description(offer)
            .await
            .context("Failed to set remote description")?;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .context("Failed to create answer")?;
        self.peer_connection
            .set_local_description(answer)
            .await
            .context("Failed to set local description")?;

        self.wait_for_ice_gathering(gather_timeout).await?;

        self.peer_connection
            .local_description()
            .await
            .context("Local description missing after ICE gathering")
    }

    async fn wait_for_ice_gathering(&mut self, timeout: Duration) -> Result<()> {
        let mut gathering_rx = self
            .ice_gathering_rx
            .take()
            .context("ICE gathering receiver already taken")?;

        let complete = async {
            loop {
                if *gathering_rx.borrow_and_update() == RTCIceGathererState::Complete {
                    return;
                }
                if gathering_rx.changed().await.is_err() {
                    return;
                }
            }
        };

        if tokio::time::timeout(timeout, complete).await.is_err() {
            log::warn!(
                "ICE gathering did not finish within {:?}, answering with partial candidates",
                timeout
            );
        }
        Ok(())
    }

    /// Close the peer connection
    pub async fn close(&self) -> Result<()> {
        self.peer_connection
            .close()
            .await
            .context("Failed to close peer connection")
    }
}
