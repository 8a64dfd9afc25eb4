//! `PeerConnector` backed by the `webrtc` crate
//!
//! Every offer gets a fresh peer connection. Once answered, a watcher task
//! follows the peer's data channel and connection state and reports them to
//! the tracker through [`ChannelEvents`]. A peer leaves the map when its
//! connection fails or closes, when a retry replaces it, or when the
//! negotiator discards it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use filedrop_common::{ChannelEvents, NegotiationError, PeerConnector, SessionDescription};
use tokio::sync::{mpsc, watch, Mutex};
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use crate::webrtc::common::WebRtcPeer;

/// How long to wait for ICE candidates before answering anyway
pub const ICE_GATHER_TIMEOUT: Duration = Duration::from_secs(10);

/// Live peers by offer ID. `None` once the connector has shut down.
type PeerMap = Arc<Mutex<Option<HashMap<String, Arc<WebRtcPeer>>>>>;

pub struct WebRtcConnector {
    ice_urls: Vec<String>,
    gather_timeout: Duration,
    peers: PeerMap,
}

impl WebRtcConnector {
    pub fn new(ice_urls: Vec<String>) -> Self {
        Self {
            ice_urls,
            gather_timeout: ICE_GATHER_TIMEOUT,
            peers: Arc::new(Mutex::new(Some(HashMap::new()))),
        }
    }

    /// Close every peer connection. Peers answered afterwards are closed
    /// immediately.
    pub async fn close_all(&self) {
        let peers = self.peers.lock().await.take().unwrap_or_default();
        for (peer_id, peer) in peers {
            close_peer(&peer_id, &peer).await;
        }
    }

    async fn answer(
        &self,
        offer: &SessionDescription,
        events: ChannelEvents,
    ) -> anyhow::Result<SessionDescription> {
        let peer_id = events.peer_id().to_string();
        let mut peer = WebRtcPeer::new(&self.ice_urls).await?;
        let data_channel_rx = peer
            .take_data_channel_rx()
            .context("Data channel receiver already taken")?;
        let state_rx = peer
            .take_state_rx()
            .context("Connection state receiver already taken")?;

        let local = match peer
            .answer_offer(offer.sdp.clone(), self.gather_timeout)
            .await
        {
            Ok(local) => local,
            Err(e) => {
                close_peer(&peer_id, &peer).await;
                return Err(e);
            }
        };

        let peer = Arc::new(peer);
        let inserted = self
            .peers
            .lock()
            .await
            .as_mut()
            .map(|peers| peers.insert(peer_id.clone(), peer.clone()));
        match inserted {
            None => {
                close_peer(&peer_id, &peer).await;
                anyhow::bail!("Connector is shut down");
            }
            Some(Some(replaced)) => {
                log::debug!("Replacing earlier peer connection for {}", peer_id);
                close_peer(&peer_id, &replaced).await;
            }
            Some(None) => {}
        }

        tokio::spawn(watch_peer(
            peer,
            self.peers.clone(),
            data_channel_rx,
            state_rx,
            events,
        ));

        Ok(SessionDescription::answer(local.sdp))
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn create_answer(
        &self,
        offer: &SessionDescription,
        events: ChannelEvents,
    ) -> Result<SessionDescription, NegotiationError> {
        self.answer(offer, events)
            .await
            .map_err(|e| NegotiationError::Answer(format!("{:#}", e)))
    }

    async fn discard(&self, peer_id: &str) {
        let removed = self
            .peers
            .lock()
            .await
            .as_mut()
            .and_then(|peers| peers.remove(peer_id));
        if let Some(peer) = removed {
            close_peer(peer_id, &peer).await;
        }
    }
}

async fn close_peer(peer_id: &str, peer: &WebRtcPeer) {
    if let Err(e) = peer.close().await {
        log::warn!("Failed to close peer {}: {:#}", peer_id, e);
    }
}

/// Drop `peer` from the map unless a newer connection already took its slot.
async fn forget(peers: &PeerMap, peer_id: &str, peer: &Arc<WebRtcPeer>) {
    if let Some(peers) = peers.lock().await.as_mut() {
        if peers.get(peer_id).is_some_and(|p| Arc::ptr_eq(p, peer)) {
            peers.remove(peer_id);
        }
    }
}

/// Report data-channel open/close and connection teardown for one peer.
async fn watch_peer(
    peer: Arc<WebRtcPeer>,
    peers: PeerMap,
    mut data_channel_rx: mpsc::Receiver<Arc<RTCDataChannel>>,
    mut state_rx: watch::Receiver<RTCPeerConnectionState>,
    events: ChannelEvents,
) {
    let peer_id = events.peer_id().to_string();
    let mut channels_open = true;

    loop {
        tokio::select! {
            dc = data_channel_rx.recv(), if channels_open => match dc {
                Some(dc) => attach_channel(dc, events.clone()),
                None => channels_open = false,
            },
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    events.closed();
                    break;
                }
            }
        }
    }

    forget(&peers, &peer_id, &peer).await;
    close_peer(&peer_id, &peer).await;
    log::debug!("Stopped watching peer {}", peer_id);
}

fn attach_channel(dc: Arc<RTCDataChannel>, events: ChannelEvents) {
    log::debug!(
        "Peer {} opened data channel '{}'",
        events.peer_id(),
        dc.label()
    );

    let on_open = events.clone();
    dc.on_open(Box::new(move || {
        on_open.opened(None);
        Box::pin(async {})
    }));

    let label = dc.label().to_string();
    dc.on_error(Box::new(move |err| {
        log::error!("Data channel '{}' error: {}", label, err);
        Box::pin(async {})
    }));

    dc.on_close(Box::new(move || {
        events.closed();
        Box::pin(async {})
    }));
}
