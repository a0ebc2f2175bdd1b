use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RelayError;
use crate::models::Envelope;
use crate::utils::scope_guard::ScopeGuard;
use crate::ws::hub::{ConnHandle, ConnId, Frame, Hub, SessionKey};
use crate::ws::lifecycle::Lifecycle;

/// How long a detached connection may spend flushing its queue and close frame
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// One client attached to one session.
///
/// The session key and user id are bound at creation and stamped onto every
/// envelope the client sends; whatever the client claims is discarded.
pub struct Connection {
    id: ConnId,
    session_key: SessionKey,
    user_id: String,
    hub: Hub,
    lifecycle: Arc<Lifecycle>,
}

impl Connection {
    pub fn new(hub: Hub, session_key: SessionKey, user_id: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_key,
            user_id,
            hub,
            lifecycle: Arc::new(Lifecycle::new()),
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    #[cfg(test)]
    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        self.lifecycle.clone()
    }

    /// Serve an upgraded socket until the client goes away or is evicted
    pub async fn serve(self, socket: WebSocket, queue_capacity: usize) {
        let (sink, stream) = socket.split();
        self.run(sink, stream, queue_capacity).await;
    }

    /// Join the session, then pump both directions until one of them ends.
    pub async fn run<W, R>(self, mut sink: W, stream: R, queue_capacity: usize)
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display,
        R: Stream<Item = Result<Message, axum::Error>> + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let (handle, mut detached) =
            ConnHandle::new(self.id, self.session_key.clone(), self.user_id.clone(), tx);
        if let Err(e) = self.hub.join_confirmed(handle).await {
            warn!(conn_id = %self.id, session_key = %self.session_key, "Join failed: {}", e);
            self.lifecycle.close();
            return;
        }
        self.lifecycle.activate();
        info!(conn_id = %self.id, session_key = %self.session_key, user_id = %self.user_id, "Connection joined");

        let mut write_task = tokio::spawn({
            let guard = self.leave_guard();
            let conn_id = self.id;
            async move {
                let _guard = guard;
                if let Err(e) = write_path(rx, &mut sink).await {
                    debug!(conn_id = %conn_id, "Write path stopped: {}", e);
                }
            }
        });

        let mut read_task = tokio::spawn({
            let guard = self.leave_guard();
            let hub = self.hub.clone();
            let session_key = self.session_key.clone();
            let user_id = self.user_id.clone();
            let conn_id = self.id;
            async move {
                let _guard = guard;
                if let Err(e) = read_path(stream, &hub, &session_key, &user_id).await {
                    debug!(conn_id = %conn_id, "Read path stopped: {}", e);
                }
            }
        });

        // Whichever side finishes first takes the other one down with it,
        // dropping both socket halves. Once the hub has let go of us (leave,
        // eviction, shutdown) reading stops at once and the writer gets a
        // bounded window to flush, even if the peer stopped reading.
        tokio::select! {
            _ = &mut write_task => {
                read_task.abort();
                let _ = (&mut read_task).await;
            }
            _ = &mut read_task => {
                write_task.abort();
                let _ = (&mut write_task).await;
            }
            _ = &mut detached => {
                debug!(conn_id = %self.id, "Detached from session");
                read_task.abort();
                if timeout(CLOSE_GRACE, &mut write_task).await.is_err() {
                    warn!(conn_id = %self.id, "Write path stalled, dropping socket");
                    write_task.abort();
                    let _ = (&mut write_task).await;
                }
                let _ = (&mut read_task).await;
            }
        }

        self.lifecycle.close();
        info!(conn_id = %self.id, session_key = %self.session_key, user_id = %self.user_id, state = ?self.lifecycle.state(), "Connection closed");
    }

    fn leave_guard(&self) -> ScopeGuard<impl FnOnce() + Send + 'static> {
        let lifecycle = self.lifecycle.clone();
        let hub = self.hub.clone();
        let conn_id = self.id;
        ScopeGuard::new(move || {
            if lifecycle.begin_leave() {
                debug!(conn_id = %conn_id, "Connection leaving");
                hub.leave(conn_id);
            }
        })
    }
}

/// Decode inbound frames, stamp them with the bound identity and hand them to the hub.
async fn read_path<R>(
    mut stream: R,
    hub: &Hub,
    session_key: &str,
    user_id: &str,
) -> Result<(), RelayError>
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        let frame = match message.map_err(|e| RelayError::Transport(e.to_string()))? {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(data) => data,
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
        };

        let envelope = match Envelope::decode(&frame) {
            Ok(envelope) => envelope.stamp(session_key, user_id),
            Err(e) => {
                warn!(session_key = %session_key, user_id = %user_id, "Dropping inbound frame: {}", e);
                continue;
            }
        };

        hub.broadcast(envelope).await?;
    }
    Ok(())
}

/// Drain the outbound queue onto the socket. A closed queue means the
/// connection left or was evicted; say goodbye and stop.
async fn write_path<W>(mut rx: mpsc::Receiver<Frame>, sink: &mut W) -> Result<(), RelayError>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    while let Some(frame) = rx.recv().await {
        sink.send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
    }
    let _ = sink.send(Message::Close(None)).await;
    Ok(())
}
