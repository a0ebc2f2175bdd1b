use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::error::RelayError;
use crate::models::Envelope;

pub type SessionKey = String;
pub type ConnId = Uuid;

/// An encoded envelope waiting in a connection's outbound queue
pub type Frame = Arc<str>;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Broadcasts that may be pending in the router before readers are made to wait
    pub inbox_capacity: usize,
}

/// What the hub needs to deliver to one connection.
///
/// The sender is the only producer side of the connection's outbound queue;
/// once the hub drops it the connection's write path sees the queue close.
/// `detached` is dropped at the same moment, so the connection learns it is
/// out of its session even while its writer is stuck on the socket.
#[derive(Debug)]
pub struct ConnHandle {
    pub id: ConnId,
    pub session_key: SessionKey,
    pub user_id: String,
    pub tx: mpsc::Sender<Frame>,
    pub detached: oneshot::Sender<()>,
}

impl ConnHandle {
    /// Build a handle plus the receiver that resolves once the hub lets go of it
    pub fn new(
        id: ConnId,
        session_key: SessionKey,
        user_id: String,
        tx: mpsc::Sender<Frame>,
    ) -> (Self, oneshot::Receiver<()>) {
        let (detached, detached_rx) = oneshot::channel();
        let handle = Self {
            id,
            session_key,
            user_id,
            tx,
            detached,
        };
        (handle, detached_rx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub conn_id: ConnId,
    pub user_id: String,
}

/// Membership as seen by the router at one point of its event stream
#[derive(Debug, Clone, Default)]
pub struct HubSnapshot {
    pub sessions: BTreeMap<SessionKey, Vec<MemberInfo>>,
}

impl HubSnapshot {
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.values().map(Vec::len).sum()
    }

    pub fn contains_session(&self, session_key: &str) -> bool {
        self.sessions.contains_key(session_key)
    }

    /// Session the connection is currently joined to
    pub fn session_of(&self, conn_id: ConnId) -> Option<&str> {
        self.sessions
            .iter()
            .find(|(_, members)| members.iter().any(|m| m.conn_id == conn_id))
            .map(|(key, _)| key.as_str())
    }
}

enum HubEvent {
    Join(ConnHandle, Option<oneshot::Sender<()>>),
    Leave(ConnId),
    /// The permit is released once the router has fanned the envelope out
    Broadcast(Envelope, OwnedSemaphorePermit),
    Snapshot(oneshot::Sender<HubSnapshot>),
}

/// Handle to the session registry.
///
/// Cloning is cheap; every clone talks to the same router task, which is the
/// only owner of the membership map. All events share one FIFO stream, so
/// joins, leaves and broadcasts are applied in the order they were submitted.
#[derive(Clone)]
pub struct Hub {
    events_tx: mpsc::UnboundedSender<HubEvent>,
    broadcast_permits: Arc<Semaphore>,
}

impl Hub {
    /// Create the registry and start its router task on the current runtime
    pub fn spawn(config: HubConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let broadcast_permits = Arc::new(Semaphore::new(config.inbox_capacity.max(1)));
        tokio::spawn(Router::default().run(events_rx));
        info!("Session hub started (inbox capacity {})", config.inbox_capacity);
        Self {
            events_tx,
            broadcast_permits,
        }
    }

    /// Bind a connection to its session. Applied asynchronously by the router.
    pub fn join(&self, conn: ConnHandle) {
        if self.events_tx.send(HubEvent::Join(conn, None)).is_err() {
            warn!("Join dropped, session hub is not running");
        }
    }

    /// Bind a connection to its session and wait until the router has applied it
    pub async fn join_confirmed(&self, conn: ConnHandle) -> Result<(), RelayError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.events_tx
            .send(HubEvent::Join(conn, Some(ack_tx)))
            .map_err(|_| RelayError::HubClosed)?;
        ack_rx.await.map_err(|_| RelayError::HubClosed)
    }

    /// Remove a connection from its session and close its outbound queue.
    /// Leaving a connection that is not joined is a no-op. Never blocks.
    pub fn leave(&self, conn_id: ConnId) {
        if self.events_tx.send(HubEvent::Leave(conn_id)).is_err() {
            debug!("Leave for {} dropped, session hub is not running", conn_id);
        }
    }

    /// Deliver an envelope to every member of `envelope.session_key`, sender included.
    /// Waits while too many broadcasts are pending in the router.
    pub async fn broadcast(&self, envelope: Envelope) -> Result<(), RelayError> {
        let permit = self
            .broadcast_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RelayError::HubClosed)?;
        self.events_tx
            .send(HubEvent::Broadcast(envelope, permit))
            .map_err(|_| RelayError::HubClosed)
    }

    /// Membership after every event submitted before this call has been applied
    pub async fn snapshot(&self) -> Result<HubSnapshot, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.events_tx
            .send(HubEvent::Snapshot(reply_tx))
            .map_err(|_| RelayError::HubClosed)?;
        reply_rx.await.map_err(|_| RelayError::HubClosed)
    }
}

struct Member {
    user_id: String,
    tx: mpsc::Sender<Frame>,
    _detached: oneshot::Sender<()>,
}

#[derive(Default)]
struct Router {
    sessions: HashMap<SessionKey, HashMap<ConnId, Member>>,
    /// Reverse index, a connection is in at most one session
    joined: HashMap<ConnId, SessionKey>,
}

impl Router {
    async fn run(mut self, mut events_rx: mpsc::UnboundedReceiver<HubEvent>) {
        while let Some(event) = events_rx.recv().await {
            match event {
                HubEvent::Join(conn, ack) => {
                    self.join(conn);
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                }
                HubEvent::Leave(conn_id) => self.leave(conn_id),
                HubEvent::Broadcast(envelope, _permit) => self.broadcast(&envelope),
                HubEvent::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
            }
        }
        info!("Session hub stopped");
    }

    fn join(&mut self, conn: ConnHandle) {
        let ConnHandle {
            id,
            session_key,
            user_id,
            tx,
            detached,
        } = conn;

        if let Some(previous) = self.joined.get(&id).cloned() {
            if previous != session_key {
                debug!("Connection {} moves from session {} to {}", id, previous, session_key);
                self.detach(id, &previous);
            }
        }

        debug!("Connection {} (user {}) joined session {}", id, user_id, session_key);
        self.sessions
            .entry(session_key.clone())
            .or_default()
            .insert(
                id,
                Member {
                    user_id,
                    tx,
                    _detached: detached,
                },
            );
        self.joined.insert(id, session_key);
    }

    fn leave(&mut self, conn_id: ConnId) {
        let Some(session_key) = self.joined.remove(&conn_id) else {
            trace!("Leave for unknown connection {}", conn_id);
            return;
        };
        if self.detach(conn_id, &session_key).is_none() {
            error!("Connection {} was indexed under session {} but not a member", conn_id, session_key);
            return;
        }
        debug!("Connection {} left session {}", conn_id, session_key);
    }

    /// Remove a member, dropping its session when it empties. Dropping the
    /// returned member closes its queue and fires its detach signal.
    fn detach(&mut self, conn_id: ConnId, session_key: &str) -> Option<Member> {
        let members = self.sessions.get_mut(session_key)?;
        let member = members.remove(&conn_id);
        if members.is_empty() {
            self.sessions.remove(session_key);
            debug!("Session {} closed", session_key);
        }
        member
    }

    fn broadcast(&mut self, envelope: &Envelope) {
        let Some(members) = self.sessions.get(&envelope.session_key) else {
            trace!("Broadcast to empty session {}", envelope.session_key);
            return;
        };

        let frame: Frame = match envelope.encode() {
            Ok(text) => Arc::from(text),
            Err(e) => {
                warn!("Dropping broadcast for session {}: {}", envelope.session_key, e);
                return;
            }
        };

        let mut evicted = Vec::new();
        for (conn_id, member) in members {
            match member.tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Outbound queue full for connection {} (user {}) in session {}, evicting",
                        conn_id, member.user_id, envelope.session_key
                    );
                    evicted.push(*conn_id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Outbound queue of connection {} already closed, evicting", conn_id);
                    evicted.push(*conn_id);
                }
            }
        }

        for conn_id in evicted {
            self.leave(conn_id);
        }
    }

    fn snapshot(&self) -> HubSnapshot {
        let sessions = self
            .sessions
            .iter()
            .map(|(key, members)| {
                let members = members
                    .iter()
                    .map(|(conn_id, member)| MemberInfo {
                        conn_id: *conn_id,
                        user_id: member.user_id.clone(),
                    })
                    .collect();
                (key.clone(), members)
            })
            .collect();
        HubSnapshot { sessions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn hub() -> Hub {
        Hub::spawn(HubConfig { inbox_capacity: 64 })
    }

    fn conn(session_key: &str, user_id: &str, capacity: usize) -> (ConnHandle, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (handle, _detached) = ConnHandle::new(Uuid::new_v4(), session_key.to_string(), user_id.to_string(), tx);
        (handle, rx)
    }

    fn envelope(session_key: &str, user_id: &str, payload: &str) -> Envelope {
        Envelope {
            kind: "stroke".to_string(),
            session_key: session_key.to_string(),
            user_id: user_id.to_string(),
            payload: Some(serde_json::value::RawValue::from_string(payload.to_string()).unwrap()),
        }
    }

    fn parse(frame: &Frame) -> Value {
        serde_json::from_str(frame).unwrap()
    }

    #[tokio::test]
    async fn session_exists_only_while_it_has_members() {
        let hub = hub();
        let (a, _rx_a) = conn("doc1", "a", 8);
        let (b, _rx_b) = conn("doc1", "b", 8);
        let (a_id, b_id) = (a.id, b.id);

        hub.join(a);
        hub.join(b);
        let snap = hub.snapshot().await.unwrap();
        assert_eq!(snap.session_count(), 1);
        assert_eq!(snap.connection_count(), 2);

        hub.leave(a_id);
        assert!(hub.snapshot().await.unwrap().contains_session("doc1"));

        hub.leave(b_id);
        let snap = hub.snapshot().await.unwrap();
        assert!(!snap.contains_session("doc1"));
        assert_eq!(snap.session_count(), 0);
    }

    #[tokio::test]
    async fn leave_is_idempotent_and_closes_queue() {
        let hub = hub();
        let (a, mut rx_a) = conn("doc1", "a", 8);
        let (b, _rx_b) = conn("doc1", "b", 8);
        let a_id = a.id;
        hub.join(a);
        hub.join(b);

        hub.leave(a_id);
        hub.leave(a_id);
        hub.leave(Uuid::new_v4());

        let snap = hub.snapshot().await.unwrap();
        assert_eq!(snap.connection_count(), 1);
        assert_eq!(rx_a.recv().await, None);
    }

    #[tokio::test]
    async fn rejoin_moves_connection_between_sessions() {
        let hub = hub();
        let (a, mut rx_a) = conn("doc1", "a", 8);
        let a_id = a.id;
        let tx = a.tx.clone();
        hub.join(a);
        let (moved, _detached) = ConnHandle::new(a_id, "doc2".to_string(), "a".to_string(), tx);
        hub.join(moved);

        let snap = hub.snapshot().await.unwrap();
        assert!(!snap.contains_session("doc1"));
        assert_eq!(snap.session_of(a_id), Some("doc2"));
        assert_eq!(snap.connection_count(), 1);

        hub.broadcast(envelope("doc2", "a", "1")).await.unwrap();
        hub.snapshot().await.unwrap();
        assert!(rx_a.try_recv().is_ok());
    }

    #[tokio::test]
    async fn broadcast_reaches_own_session_only_sender_included() {
        let hub = hub();
        let (a, mut rx_a) = conn("doc1", "a", 8);
        let (b, mut rx_b) = conn("doc1", "b", 8);
        let (c, mut rx_c) = conn("doc2", "c", 8);
        hub.join(a);
        hub.join(b);
        hub.join(c);

        hub.broadcast(envelope("doc1", "a", r#"{"x":1}"#)).await.unwrap();
        hub.snapshot().await.unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            let out = parse(&rx.try_recv().unwrap());
            assert_eq!(out["sessionKey"], "doc1");
            assert_eq!(out["userID"], "a");
            assert_eq!(out["payload"]["x"], 1);
        }
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_to_unknown_session_is_dropped() {
        let hub = hub();
        let (a, mut rx_a) = conn("doc1", "a", 8);
        hub.join(a);

        hub.broadcast(envelope("nobody-here", "a", "1")).await.unwrap();
        let snap = hub.snapshot().await.unwrap();
        assert!(!snap.contains_session("nobody-here"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_evicts_only_the_slow_member() {
        let hub = hub();
        let (slow, mut rx_slow) = conn("doc1", "slow", 2);
        let (fast, mut rx_fast) = conn("doc1", "fast", 8);
        let slow_id = slow.id;
        hub.join(slow);
        hub.join(fast);

        for i in 0..3 {
            hub.broadcast(envelope("doc1", "fast", &i.to_string())).await.unwrap();
        }
        let snap = hub.snapshot().await.unwrap();
        assert_eq!(snap.session_of(slow_id), None);
        assert_eq!(snap.connection_count(), 1);

        // Two frames made it in before the queue filled, then the queue is closed once
        assert!(rx_slow.recv().await.is_some());
        assert!(rx_slow.recv().await.is_some());
        assert_eq!(rx_slow.recv().await, None);

        for i in 0..3 {
            assert_eq!(parse(&rx_fast.try_recv().unwrap())["payload"], i);
        }

        hub.broadcast(envelope("doc1", "fast", "99")).await.unwrap();
        hub.snapshot().await.unwrap();
        assert_eq!(parse(&rx_fast.try_recv().unwrap())["payload"], 99);
    }

    #[tokio::test]
    async fn evicting_last_member_removes_session() {
        let hub = hub();
        let (a, rx_a) = conn("doc1", "a", 1);
        hub.join(a);
        drop(rx_a);

        hub.broadcast(envelope("doc1", "a", "1")).await.unwrap();
        let snap = hub.snapshot().await.unwrap();
        assert_eq!(snap.session_count(), 0);
    }

    #[tokio::test]
    async fn connection_is_never_in_two_sessions() {
        let hub = hub();
        let (a, _rx) = conn("doc1", "a", 8);
        let a_id = a.id;
        let tx = a.tx.clone();
        hub.join(a);
        for key in ["doc2", "doc3", "doc1"] {
            let (moved, _detached) = ConnHandle::new(a_id, key.to_string(), "a".to_string(), tx.clone());
            hub.join(moved);
            let snap = hub.snapshot().await.unwrap();
            let memberships = snap
                .sessions
                .values()
                .filter(|members| members.iter().any(|m| m.conn_id == a_id))
                .count();
            assert_eq!(memberships, 1);
            assert_eq!(snap.session_of(a_id), Some(key));
        }
    }

    #[tokio::test]
    async fn join_submitted_after_a_broadcast_does_not_receive_it() {
        let hub = hub();
        let (a, mut rx_a) = conn("doc1", "a", 8);
        let (late, mut rx_late) = conn("doc1", "late", 8);
        let late_id = late.id;
        hub.join(a);

        hub.broadcast(envelope("doc1", "a", "1")).await.unwrap();
        hub.join(late);
        let snap = hub.snapshot().await.unwrap();

        assert_eq!(snap.session_of(late_id), Some("doc1"));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_late.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_submitted_before_a_leave_is_still_delivered() {
        let hub = hub();
        let (a, _rx_a) = conn("doc1", "a", 8);
        let (b, mut rx_b) = conn("doc1", "b", 8);
        let b_id = b.id;
        hub.join(a);
        hub.join(b);

        hub.broadcast(envelope("doc1", "a", "7")).await.unwrap();
        hub.leave(b_id);

        assert_eq!(parse(&rx_b.recv().await.unwrap())["payload"], 7);
        assert_eq!(rx_b.recv().await, None);
    }

    #[tokio::test]
    async fn join_confirmed_is_visible_immediately() {
        let hub = hub();
        let (a, _rx_a) = conn("doc1", "a", 8);
        let a_id = a.id;

        hub.join_confirmed(a).await.unwrap();
        assert_eq!(hub.snapshot().await.unwrap().session_of(a_id), Some("doc1"));
    }

    #[tokio::test]
    async fn detach_signal_fires_on_leave_and_on_eviction() {
        let hub = hub();
        let (tx, _rx_left) = mpsc::channel(8);
        let (left, left_detached) = ConnHandle::new(Uuid::new_v4(), "doc1".to_string(), "a".to_string(), tx);
        let (tx, _rx_slow) = mpsc::channel(1);
        let (slow, slow_detached) = ConnHandle::new(Uuid::new_v4(), "doc1".to_string(), "b".to_string(), tx);
        let left_id = left.id;
        hub.join(left);
        hub.join(slow);

        hub.leave(left_id);
        assert!(left_detached.await.is_err());

        // The second frame does not fit and evicts the member while nobody reads its queue
        hub.broadcast(envelope("doc1", "b", "1")).await.unwrap();
        hub.broadcast(envelope("doc1", "b", "2")).await.unwrap();
        assert!(slow_detached.await.is_err());
        assert_eq!(hub.snapshot().await.unwrap().session_count(), 0);
    }
}
