//! Per-peer connection lifecycle.
//!
//! Every receiver that opens a data channel gets one [`UploaderConnection`],
//! keyed by the offer ID it connected with. The [`ConnectionTracker`] owns
//! all of them and enforces the status transition table; nothing else in the
//! crate mutates a connection.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

use crate::signaling::negotiator::NegotiationOutcome;

/// Identifier of a connected receiver (the offer ID it connected with)
pub type PeerId = String;

/// Lifecycle status of one receiver connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Pending,
    Paused,
    Uploading,
    Done,
    InvalidPassword,
    Closed,
}

impl ConnectionStatus {
    /// `Done` and `Closed` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionStatus::Done | ConnectionStatus::Closed)
    }

    /// Whether `self -> next` is in the transition table.
    ///
    /// Staying in the same non-terminal status is allowed so that repeated
    /// reports (e.g. `Uploading` for every file) are harmless.
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;

        if self.is_terminal() {
            return false;
        }
        if self == next {
            return true;
        }
        match self {
            Pending => true,
            Uploading => matches!(next, Paused | Done | Closed),
            Paused => matches!(next, Uploading | Closed),
            InvalidPassword => matches!(next, Pending | Closed),
            Done | Closed => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "PENDING",
            ConnectionStatus::Paused => "PAUSED",
            ConnectionStatus::Uploading => "UPLOADING",
            ConnectionStatus::Done => "DONE",
            ConnectionStatus::InvalidPassword => "INVALID_PASSWORD",
            ConnectionStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Informational descriptors the receiver reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerMetadata {
    pub browser_name: Option<String>,
    pub browser_version: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub mobile_vendor: Option<String>,
    pub mobile_model: Option<String>,
}

/// Progress report for an in-flight transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub file_name: String,
    pub offset: u64,
    pub completed_files: usize,
    pub total_files: usize,
    /// Fraction of the current file already sent, 0.0..=1.0
    pub current_file_progress: f64,
}

/// State of one receiver connection
#[derive(Debug, Clone, PartialEq)]
pub struct UploaderConnection {
    pub status: ConnectionStatus,
    pub peer_metadata: Option<PeerMetadata>,
    pub uploading_file_name: Option<String>,
    pub uploading_offset: Option<u64>,
    pub completed_files: usize,
    pub total_files: usize,
    pub current_file_progress: f64,
}

impl UploaderConnection {
    /// A freshly opened connection that has not requested anything yet.
    pub fn pending(total_files: usize) -> Self {
        Self {
            status: ConnectionStatus::Pending,
            peer_metadata: None,
            uploading_file_name: None,
            uploading_offset: None,
            completed_files: 0,
            total_files,
            current_file_progress: 0.0,
        }
    }

    fn clear_in_flight(&mut self) {
        self.uploading_file_name = None;
        self.uploading_offset = None;
        self.current_file_progress = 0.0;
    }
}

/// Errors from connection state operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Illegal transition for peer {peer}: {from} -> {to}")]
    IllegalTransition {
        peer: PeerId,
        from: ConnectionStatus,
        to: ConnectionStatus,
    },
    #[error("Peer {peer} is already {status}")]
    Terminal {
        peer: PeerId,
        status: ConnectionStatus,
    },
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),
    #[error("Peer already registered: {0}")]
    AlreadyRegistered(PeerId),
    #[error("Event from a retired negotiation attempt for peer {0}")]
    StaleAttempt(PeerId),
}

/// One negotiation attempt for a peer. Only the live attempt may touch the
/// peer's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Attempt(u64);

#[derive(Default)]
pub(crate) struct TrackerState {
    connections: HashMap<PeerId, UploaderConnection>,
    outcomes: HashMap<String, NegotiationOutcome>,
    attempts: HashMap<PeerId, Attempt>,
    next_attempt: u64,
}

impl TrackerState {
    pub(crate) fn register(
        &mut self,
        peer: PeerId,
        connection: UploaderConnection,
    ) -> Result<(), StateError> {
        if self.connections.contains_key(&peer) {
            return Err(StateError::AlreadyRegistered(peer));
        }
        log::debug!("Registered peer {} ({})", peer, connection.status);
        self.connections.insert(peer, connection);
        Ok(())
    }

    fn connection_mut(&mut self, peer: &str) -> Result<&mut UploaderConnection, StateError> {
        self.connections
            .get_mut(peer)
            .ok_or_else(|| StateError::UnknownPeer(peer.to_string()))
    }

    pub(crate) fn transition(
        &mut self,
        peer: &str,
        next: ConnectionStatus,
    ) -> Result<(), StateError> {
        let conn = self.connection_mut(peer)?;
        let from = conn.status;
        if !from.can_transition_to(next) {
            return Err(StateError::IllegalTransition {
                peer: peer.to_string(),
                from,
                to: next,
            });
        }

        conn.status = next;
        match next {
            ConnectionStatus::Done => {
                conn.completed_files = conn.total_files;
                conn.clear_in_flight();
            }
            ConnectionStatus::Pending
            | ConnectionStatus::InvalidPassword
            | ConnectionStatus::Closed => conn.clear_in_flight(),
            ConnectionStatus::Uploading | ConnectionStatus::Paused => {}
        }

        if from != next {
            log::info!("Peer {}: {} -> {}", peer, from, next);
        }
        Ok(())
    }

    pub(crate) fn record_progress(
        &mut self,
        peer: &str,
        progress: TransferProgress,
    ) -> Result<(), StateError> {
        let conn = self.connection_mut(peer)?;
        if conn.status.is_terminal() {
            return Err(StateError::Terminal {
                peer: peer.to_string(),
                status: conn.status,
            });
        }

        conn.uploading_file_name = Some(progress.file_name);
        conn.uploading_offset = Some(progress.offset);
        conn.completed_files = progress.completed_files;
        conn.total_files = progress.total_files;
        conn.current_file_progress = progress.current_file_progress.clamp(0.0, 1.0);
        Ok(())
    }

    /// Returns `false` when the connection had already finished.
    pub(crate) fn close_unless_terminal(&mut self, peer: &str) -> Result<bool, StateError> {
        if self.connection_mut(peer)?.status.is_terminal() {
            return Ok(false);
        }
        self.transition(peer, ConnectionStatus::Closed)?;
        Ok(true)
    }
}

/// In-memory registry of receiver connections and negotiation outcomes.
///
/// All operations take a short synchronous lock, so a reader never sees a
/// half-applied update.
#[derive(Default)]
pub struct ConnectionTracker {
    state: Mutex<TrackerState>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new connection. Fails if the peer is already known.
    pub fn register(
        &self,
        peer: impl Into<PeerId>,
        connection: UploaderConnection,
    ) -> Result<(), StateError> {
        self.lock().register(peer.into(), connection)
    }

    /// Move a peer to `next`, rejecting anything outside the transition table.
    pub fn transition(&self, peer: &str, next: ConnectionStatus) -> Result<(), StateError> {
        self.lock().transition(peer, next)
    }

    /// Update transfer counters. Rejected once the connection is terminal.
    pub fn record_progress(
        &self,
        peer: &str,
        progress: TransferProgress,
    ) -> Result<(), StateError> {
        self.lock().record_progress(peer, progress)
    }

    /// Close a peer unless it already reached `Done` or `Closed`, in one step.
    /// Returns whether this call closed it.
    pub fn close_unless_terminal(&self, peer: &str) -> Result<bool, StateError> {
        self.lock().close_unless_terminal(peer)
    }

    /// Start a new negotiation attempt for `peer`. Any earlier attempt loses
    /// access to the peer's connection.
    pub(crate) fn begin_attempt(&self, peer: &str) -> Attempt {
        let mut state = self.lock();
        state.next_attempt += 1;
        let attempt = Attempt(state.next_attempt);
        state.attempts.insert(peer.to_string(), attempt);
        attempt
    }

    /// Give up on `attempt`. If it is still the live one, whatever connection
    /// it registered is forgotten.
    pub(crate) fn retire_attempt(&self, peer: &str, attempt: Attempt) {
        let mut state = self.lock();
        if state.attempts.get(peer) != Some(&attempt) {
            return;
        }
        state.attempts.remove(peer);
        if let Some(conn) = state.connections.remove(peer) {
            log::debug!("Dropped {} connection of failed attempt for peer {}", conn.status, peer);
        }
    }

    /// Apply `op` only if `attempt` is the live attempt for `peer`.
    pub(crate) fn with_attempt<T>(
        &self,
        peer: &str,
        attempt: Attempt,
        op: impl FnOnce(&mut TrackerState) -> Result<T, StateError>,
    ) -> Result<T, StateError> {
        let mut state = self.lock();
        if state.attempts.get(peer) != Some(&attempt) {
            return Err(StateError::StaleAttempt(peer.to_string()));
        }
        op(&mut state)
    }

    /// Snapshot of one connection
    pub fn get(&self, peer: &str) -> Result<UploaderConnection, StateError> {
        self.lock()
            .connections
            .get(peer)
            .cloned()
            .ok_or_else(|| StateError::UnknownPeer(peer.to_string()))
    }

    /// Snapshot of every connection, sorted by peer ID.
    pub fn snapshot(&self) -> Vec<(PeerId, UploaderConnection)> {
        let mut all: Vec<_> = self
            .lock()
            .connections
            .iter()
            .map(|(peer, conn)| (peer.clone(), conn.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Number of connections that have not reached a terminal status
    pub fn active_count(&self) -> usize {
        self.lock()
            .connections
            .values()
            .filter(|c| !c.status.is_terminal())
            .count()
    }

    /// Store the result of a negotiation task, replacing any earlier one for
    /// the same offer.
    pub fn record_outcome(&self, outcome: NegotiationOutcome) {
        self.lock()
            .outcomes
            .insert(outcome.offer_id.clone(), outcome);
    }

    pub fn outcome(&self, offer_id: &str) -> Option<NegotiationOutcome> {
        self.lock().outcomes.get(offer_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionStatus::*;

    const ALL: [ConnectionStatus; 6] = [Pending, Paused, Uploading, Done, InvalidPassword, Closed];

    fn tracker_with(peer: &str, status: ConnectionStatus) -> ConnectionTracker {
        let tracker = ConnectionTracker::new();
        let mut conn = UploaderConnection::pending(3);
        conn.status = status;
        tracker.register(peer, conn).unwrap();
        tracker
    }

    #[test]
    fn test_terminal_states_reject_every_transition() {
        for from in [Done, Closed] {
            for to in ALL {
                let tracker = tracker_with("p", from);
                let err = tracker.transition("p", to).unwrap_err();
                assert_eq!(
                    err,
                    StateError::IllegalTransition {
                        peer: "p".to_string(),
                        from,
                        to
                    }
                );
                assert_eq!(tracker.get("p").unwrap().status, from);
            }
        }
    }

    #[test]
    fn test_pending_reaches_every_status() {
        for to in ALL {
            let tracker = tracker_with("p", Pending);
            tracker.transition("p", to).unwrap();
            assert_eq!(tracker.get("p").unwrap().status, to);
        }
    }

    #[test]
    fn test_pause_resume_cycle() {
        let tracker = tracker_with("p", Pending);
        tracker.transition("p", Uploading).unwrap();
        tracker.transition("p", Paused).unwrap();
        tracker.transition("p", Uploading).unwrap();
        tracker.transition("p", Done).unwrap();
        assert_eq!(tracker.get("p").unwrap().status, Done);
    }

    #[test]
    fn test_invalid_password_retry() {
        let tracker = tracker_with("p", Pending);
        tracker.transition("p", InvalidPassword).unwrap();
        tracker.transition("p", Pending).unwrap();
        assert!(tracker.transition("p", Uploading).is_ok());
    }

    #[test]
    fn test_invalid_password_cannot_start_uploading() {
        let tracker = tracker_with("p", InvalidPassword);
        assert!(matches!(
            tracker.transition("p", Uploading),
            Err(StateError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn test_uploading_cannot_go_back_to_pending() {
        let tracker = tracker_with("p", Uploading);
        assert!(tracker.transition("p", Pending).is_err());
    }

    #[test]
    fn test_unknown_peer() {
        let tracker = ConnectionTracker::new();
        assert_eq!(
            tracker.transition("ghost", Closed),
            Err(StateError::UnknownPeer("ghost".to_string()))
        );
        assert!(tracker.get("ghost").is_err());
    }

    #[test]
    fn test_duplicate_registration() {
        let tracker = tracker_with("p", Pending);
        assert_eq!(
            tracker.register("p", UploaderConnection::pending(1)),
            Err(StateError::AlreadyRegistered("p".to_string()))
        );
    }

    #[test]
    fn test_progress_and_done_clear_in_flight_fields() {
        let tracker = tracker_with("p", Pending);
        tracker.transition("p", Uploading).unwrap();
        tracker
            .record_progress(
                "p",
                TransferProgress {
                    file_name: "b.txt".to_string(),
                    offset: 512,
                    completed_files: 1,
                    total_files: 3,
                    current_file_progress: 0.5,
                },
            )
            .unwrap();

        let conn = tracker.get("p").unwrap();
        assert_eq!(conn.uploading_file_name.as_deref(), Some("b.txt"));
        assert_eq!(conn.uploading_offset, Some(512));
        assert_eq!(conn.completed_files, 1);

        tracker.transition("p", Done).unwrap();
        let conn = tracker.get("p").unwrap();
        assert_eq!(conn.uploading_file_name, None);
        assert_eq!(conn.completed_files, 3);
        let late = TransferProgress {
            file_name: "c.txt".to_string(),
            offset: 0,
            completed_files: 2,
            total_files: 3,
            current_file_progress: 0.0,
        };
        assert_eq!(
            tracker.record_progress("p", late),
            Err(StateError::Terminal {
                peer: "p".to_string(),
                status: Done
            })
        );
    }

    #[test]
    fn test_close_unless_terminal() {
        let tracker = tracker_with("p", Uploading);
        assert_eq!(tracker.close_unless_terminal("p"), Ok(true));
        assert_eq!(tracker.get("p").unwrap().status, Closed);

        let tracker = tracker_with("p", Done);
        assert_eq!(tracker.close_unless_terminal("p"), Ok(false));
        assert_eq!(tracker.get("p").unwrap().status, Done);

        assert_eq!(
            tracker.close_unless_terminal("ghost"),
            Err(StateError::UnknownPeer("ghost".to_string()))
        );
    }

    #[test]
    fn test_retired_attempt_loses_access() {
        let tracker = ConnectionTracker::new();
        let first = tracker.begin_attempt("p");
        tracker
            .with_attempt("p", first, |s| {
                s.register("p".to_string(), UploaderConnection::pending(1))
            })
            .unwrap();

        tracker.retire_attempt("p", first);
        assert!(tracker.get("p").is_err());

        let second = tracker.begin_attempt("p");
        tracker
            .with_attempt("p", second, |s| {
                s.register("p".to_string(), UploaderConnection::pending(1))
            })
            .unwrap();
        tracker.transition("p", Uploading).unwrap();

        assert_eq!(
            tracker.with_attempt("p", first, |s| s.close_unless_terminal("p")),
            Err(StateError::StaleAttempt("p".to_string()))
        );
        // Retiring a superseded attempt leaves the live one alone
        tracker.retire_attempt("p", first);
        assert_eq!(tracker.get("p").unwrap().status, Uploading);
    }

    #[test]
    fn test_active_count_and_snapshot_order() {
        let tracker = ConnectionTracker::new();
        tracker.register("b", UploaderConnection::pending(1)).unwrap();
        tracker.register("a", UploaderConnection::pending(1)).unwrap();
        tracker.transition("b", Closed).unwrap();

        assert_eq!(tracker.active_count(), 1);
        let ids: Vec<_> = tracker.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
