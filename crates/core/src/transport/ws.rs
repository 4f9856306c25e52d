use super::{AppState, TransportError, LOG_TARGET};
use crate::frame::{AudioFrame, FrameError};
use crate::protocol::{InboundEvent, OutboundEvent, RawAudio, RecordingStatus};
use crate::session::{SessionId, UserId};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Semaphore};

/// Store-bound requests (`save_recording`, `clear_history`) one connection
/// may have in flight.
pub const MAX_PENDING_STORE_REQUESTS: usize = 4;

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub user_id: Option<String>,
}

pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<ConnectParams>,
) -> Result<Response, StatusCode> {
    let session = SessionId::new(session_id).map_err(|_| StatusCode::BAD_REQUEST)?;
    let user = params
        .user_id
        .filter(|u| !u.trim().is_empty())
        .map(UserId::new)
        .transpose()
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let connection = SessionConnection::new(state, session, user);
    Ok(ws.on_upgrade(move |socket| serve_socket(socket, connection)))
}

/// One client's view of a session. Replies returned from [`handle_text`]
/// go to that client only; everything else travels through the room.
///
/// [`handle_text`]: SessionConnection::handle_text
#[derive(Clone)]
pub struct SessionConnection {
    state: AppState,
    session: SessionId,
    user: Option<UserId>,
}

impl SessionConnection {
    pub fn new(state: AppState, session: SessionId, user: Option<UserId>) -> Self {
        Self {
            state,
            session,
            user,
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub async fn handle_text(&self, text: &str) -> Option<OutboundEvent> {
        match self.decode(text) {
            Ok(event) => self.handle_event(event).await,
            Err(reply) => Some(reply),
        }
    }

    /// Parses an inbound message; the error is the reply for the sender.
    pub fn decode(&self, text: &str) -> Result<InboundEvent, OutboundEvent> {
        serde_json::from_str::<InboundEvent>(text).map_err(|e| {
            let err = FrameError::Undecodable(e.to_string());
            tracing::warn!(target: LOG_TARGET, session = %self.session, error = %err, "rejected message");
            OutboundEvent::error(err.to_string())
        })
    }

    pub async fn handle_event(&self, event: InboundEvent) -> Option<OutboundEvent> {
        match event {
            InboundEvent::RawAudio(raw) => self.accept_audio(raw),
            InboundEvent::SaveRecording(request) => {
                let aggregator = self.state.pipeline.aggregator();
                match aggregator.finalize_recording(&self.session, &request).await {
                    Ok(()) => None,
                    Err(e) => {
                        tracing::warn!(
                            target: LOG_TARGET,
                            session = %self.session,
                            timestamp = %request.timestamp,
                            error = %e,
                            "failed to save recording"
                        );
                        Some(OutboundEvent::error(format!("could not save recording: {e}")))
                    }
                }
            }
            InboundEvent::StartRecording => {
                self.state
                    .hub
                    .emit(&self.session, OutboundEvent::RecordingStatus(RecordingStatus::started()));
                None
            }
            InboundEvent::StopRecording => {
                self.state
                    .hub
                    .emit(&self.session, OutboundEvent::RecordingStatus(RecordingStatus::stopped()));
                None
            }
            InboundEvent::ClearHistory => {
                match self.state.pipeline.aggregator().clear_history(&self.session).await {
                    Ok(_) => None,
                    Err(e) => {
                        tracing::warn!(target: LOG_TARGET, session = %self.session, error = %e, "failed to clear history");
                        Some(OutboundEvent::error(format!("could not clear history: {e}")))
                    }
                }
            }
        }
    }

    fn accept_audio(&self, raw: RawAudio) -> Option<OutboundEvent> {
        let frame = match AudioFrame::from_wire(
            self.session.clone(),
            self.user.clone(),
            raw.timestamp,
            raw.audio,
            &self.state.format,
        ) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, session = %self.session, error = %e, "rejected frame");
                return Some(OutboundEvent::error(e.to_string()));
            }
        };

        match self.state.pipeline.submit(frame) {
            Ok(_) => None,
            Err(e) => Some(OutboundEvent::error(e.to_string())),
        }
    }
}

fn is_store_bound(event: &InboundEvent) -> bool {
    matches!(event, InboundEvent::SaveRecording(_) | InboundEvent::ClearHistory)
}

/// Runs a connection's store-bound requests on their own tasks so a slow or
/// retrying store never holds up room events. Replies come back on the
/// receiver handed out by [`StoreRequests::new`].
struct StoreRequests {
    slots: Arc<Semaphore>,
    replies: mpsc::Sender<OutboundEvent>,
}

impl StoreRequests {
    fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundEvent>) {
        let capacity = capacity.max(1);
        let (replies, rx) = mpsc::channel(capacity);
        let requests = Self {
            slots: Arc::new(Semaphore::new(capacity)),
            replies,
        };
        (requests, rx)
    }

    /// Returns an immediate reply only when the connection is saturated.
    fn offload(&self, connection: &SessionConnection, event: InboundEvent) -> Option<OutboundEvent> {
        let Ok(permit) = self.slots.clone().try_acquire_owned() else {
            tracing::warn!(
                target: LOG_TARGET,
                session = %connection.session,
                "too many pending store requests"
            );
            return Some(OutboundEvent::error("too many pending requests, try again later"));
        };

        let connection = connection.clone();
        let replies = self.replies.clone();
        tokio::spawn(async move {
            if let Some(reply) = connection.handle_event(event).await {
                // receiver is gone once the socket closed
                let _ = replies.send(reply).await;
            }
            drop(permit);
        });
        None
    }
}

async fn serve_socket(socket: WebSocket, connection: SessionConnection) {
    let hub = connection.state.hub.clone();
    let session = connection.session.clone();
    let mut room = hub.join(&session);
    let (store_requests, mut store_replies) = StoreRequests::new(MAX_PENDING_STORE_REQUESTS);
    let (mut sender, mut receiver) = socket.split();
    tracing::info!(target: LOG_TARGET, session = %session, user = ?connection.user, "client connected");

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let reply = match incoming {
                    Some(Ok(Message::Text(text))) => match connection.decode(&text) {
                        Ok(event) if is_store_bound(&event) => store_requests.offload(&connection, event),
                        Ok(event) => connection.handle_event(event).await,
                        Err(reply) => Some(reply),
                    },
                    Some(Ok(Message::Binary(_))) => {
                        Some(OutboundEvent::error("binary messages are not supported"))
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => None,
                    Some(Err(e)) => {
                        tracing::debug!(target: LOG_TARGET, session = %session, error = %e, "socket error");
                        break;
                    }
                };
                if let Some(reply) = reply {
                    if let Err(e) = send(&mut sender, &reply).await {
                        tracing::debug!(target: LOG_TARGET, session = %session, error = %e, "send failed");
                        break;
                    }
                }
            }
            Some(reply) = store_replies.recv() => {
                if let Err(e) = send(&mut sender, &reply).await {
                    tracing::debug!(target: LOG_TARGET, session = %session, error = %e, "send failed");
                    break;
                }
            }
            event = room.recv() => match event {
                Ok(event) => {
                    if let Err(e) = send(&mut sender, &event).await {
                        tracing::debug!(target: LOG_TARGET, session = %session, error = %e, "send failed");
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(target: LOG_TARGET, session = %session, missed = n, "client lagging, events skipped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    drop(room);
    hub.leave(&session);
    tracing::info!(target: LOG_TARGET, session = %session, "client disconnected");
}

async fn send(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &OutboundEvent,
) -> Result<(), TransportError> {
    let json = serde_json::to_string(event)?;
    sender
        .send(Message::Text(json))
        .await
        .map_err(|e| TransportError::Send(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_signals;
    use crate::transport::test_support;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    fn connection(session: &str) -> SessionConnection {
        SessionConnection::new(
            test_support::state(),
            SessionId::new(session).expect("valid"),
            Some(UserId::new("u1").expect("valid")),
        )
    }

    fn message(value: serde_json::Value) -> String {
        value.to_string()
    }

    #[tokio::test]
    async fn malformed_json_gets_a_private_error() {
        let conn = connection("s");
        let mut room = conn.state.hub.join(conn.session());

        let reply = conn.handle_text("{not json").await;
        assert!(matches!(reply, Some(OutboundEvent::Error(_))));
        assert!(matches!(room.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn short_frame_is_rejected_without_broadcast() {
        let conn = connection("s");
        let mut room = conn.state.hub.join(conn.session());

        let reply = conn
            .handle_text(&message(json!({
                "event": "raw_audio",
                "data": {"audio": [0.0, 0.1], "timestamp": "t1"}
            })))
            .await;
        let Some(OutboundEvent::Error(err)) = reply else {
            panic!("expected error, got {reply:?}");
        };
        assert!(err.message.contains("expected 2048 samples"), "{}", err.message);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(room.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(conn.state.pipeline.pool().stats().completed, 0);
    }

    #[tokio::test]
    async fn valid_frame_is_broadcast_to_the_room() {
        let conn = connection("s");
        let mut room = conn.state.hub.join(conn.session());

        let audio = test_signals::voiced(220.0, 0.5, test_signals::FRAME);
        let reply = conn
            .handle_text(&message(json!({
                "event": "raw_audio",
                "data": {"audio": audio, "timestamp": "t1"}
            })))
            .await;
        assert_eq!(reply, None);

        let first = tokio::time::timeout(Duration::from_secs(10), room.recv())
            .await
            .expect("in time")
            .expect("event");
        let second = room.recv().await.expect("event");
        assert_eq!(first.name(), "audio_analysis");
        assert_eq!(second.name(), "history_update");
    }

    #[tokio::test]
    async fn recording_status_goes_to_the_room() {
        let conn = connection("s");
        let mut room = conn.state.hub.join(conn.session());

        assert_eq!(conn.handle_text(r#"{"event":"start_recording"}"#).await, None);
        assert_eq!(conn.handle_text(r#"{"event":"stop_recording"}"#).await, None);
        assert_eq!(
            room.try_recv().expect("started"),
            OutboundEvent::RecordingStatus(RecordingStatus::started())
        );
        assert_eq!(
            room.try_recv().expect("stopped"),
            OutboundEvent::RecordingStatus(RecordingStatus::stopped())
        );
    }

    #[tokio::test]
    async fn conflicting_recording_path_is_reported_to_sender() {
        let conn = connection("s");
        let save = |path: &str| {
            message(json!({
                "event": "save_recording",
                "data": {"timestamp": "t1", "recording_path": path}
            }))
        };

        assert_eq!(conn.handle_text(&save("/a.wav")).await, None);
        let reply = conn.handle_text(&save("/b.wav")).await;
        assert!(matches!(reply, Some(OutboundEvent::Error(_))), "{reply:?}");
    }

    #[tokio::test]
    async fn clear_history_broadcasts_cleared() {
        let conn = connection("s");
        let mut room = conn.state.hub.join(conn.session());

        assert_eq!(conn.handle_text(r#"{"event":"clear_history"}"#).await, None);
        assert_eq!(room.try_recv().expect("event"), OutboundEvent::HistoryCleared);
    }

    #[tokio::test]
    async fn sessions_do_not_hear_each_other() {
        let a = connection("a");
        let b = SessionConnection::new(a.state.clone(), SessionId::new("b").expect("valid"), None);
        let mut room_b = b.state.hub.join(b.session());

        assert_eq!(a.handle_text(r#"{"event":"start_recording"}"#).await, None);
        assert!(matches!(room_b.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn store_requests_reply_off_the_socket_loop() {
        let conn = connection("s");
        let (requests, mut replies) = StoreRequests::new(2);
        let save = |path: &str| {
            conn.decode(
                &json!({
                    "event": "save_recording",
                    "data": {"timestamp": "t1", "recording_path": path}
                })
                .to_string(),
            )
            .expect("decodes")
        };

        assert_eq!(requests.offload(&conn, save("/a.wav")), None);
        // let the first attach land before the conflicting one
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(requests.offload(&conn, save("/b.wav")), None);

        let reply = tokio::time::timeout(Duration::from_secs(5), replies.recv())
            .await
            .expect("in time");
        assert!(matches!(reply, Some(OutboundEvent::Error(_))), "{reply:?}");
    }

    #[tokio::test]
    async fn saturated_store_requests_are_refused_immediately() {
        let conn = connection("s");
        let (requests, _replies) = StoreRequests::new(1);
        let _held = requests.slots.clone().try_acquire_owned().expect("free slot");

        let event = conn.decode(r#"{"event":"clear_history"}"#).expect("decodes");
        assert!(is_store_bound(&event));
        let reply = requests.offload(&conn, event);
        assert!(matches!(reply, Some(OutboundEvent::Error(_))), "{reply:?}");
    }
}
