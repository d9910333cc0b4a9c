//! Push-channel gateway: handshake, session lifecycle and inbound relay.
//!
//! A connection moves `Connecting → Authenticating → Active → Closed`. The
//! handshake is decided before the HTTP upgrade, so a rejected client gets a
//! plain 401 and never reaches `Active`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use parley_core::events::{ClientEvent, ServerEvent};
use parley_core::ids::{ConnectionId, UserId};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::heartbeat::{run_heartbeat, HeartbeatResult};
use crate::auth::TokenService;
use crate::error::ApiError;
use crate::router::{DeliveryResult, EventRouter};
use crate::server::AppState;

/// Handshake query string: `/ws?userId=…&token=…`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeQuery {
    pub user_id: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("missing or invalid userId")]
    MissingUserId,
    #[error("invalid session token")]
    InvalidToken,
    #[error("token subject does not match userId")]
    UserMismatch,
    #[error("a session token is required")]
    TokenRequired,
}

/// Lifecycle phase of one push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Authenticating,
    Active,
    Closed,
}

impl ConnectionPhase {
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionPhase::*;
        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Authenticating, Active)
                | (Authenticating, Closed)
                | (Active, Closed)
        )
    }
}

/// Tracks and logs phase changes for one connection.
#[derive(Debug)]
pub struct PhaseTracker {
    phase: ConnectionPhase,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            phase: ConnectionPhase::Connecting,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: ConnectionPhase) -> bool {
        if self.phase.can_transition_to(next) {
            debug!(from = ?self.phase, to = ?next, "connection phase");
            self.phase = next;
            true
        } else {
            warn!(from = ?self.phase, to = ?next, "illegal connection phase transition");
            false
        }
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Decide who is connecting.
///
/// A token, when present, is authoritative and must agree with any `userId`.
/// Without one, the `userId` is taken at its word only if `trust_query_user_id`.
pub fn authenticate(
    query: &HandshakeQuery,
    tokens: &TokenService,
    trust_query_user_id: bool,
) -> Result<UserId, HandshakeError> {
    let Some(claimed) = query.user_id.as_deref().and_then(UserId::from_handshake) else {
        return Err(HandshakeError::MissingUserId);
    };

    match query.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => {
            let subject = tokens.verify(token).map_err(|_| HandshakeError::InvalidToken)?;
            if subject != claimed {
                return Err(HandshakeError::UserMismatch);
            }
            Ok(subject)
        }
        None if trust_query_user_id => Ok(claimed),
        None => Err(HandshakeError::TokenRequired),
    }
}

/// `GET /ws`
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<HandshakeQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        debug!("push handshake refused during shutdown");
        return ApiError::ShuttingDown.into_response();
    }

    let mut phase = PhaseTracker::new();
    phase.advance(ConnectionPhase::Authenticating);

    let user_id = match authenticate(&query, &state.tokens, state.config.auth.trust_query_user_id) {
        Ok(user_id) => user_id,
        Err(e) => {
            phase.advance(ConnectionPhase::Closed);
            warn!(error = %e, "push handshake rejected");
            return ApiError::Unauthorized(format!("Unauthorized - {e}")).into_response();
        }
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    upgrade
        .on_upgrade(move |socket| run_session(socket, user_id, phase, state))
        .into_response()
}

/// Relay one inbound text frame. Returns `None` for frames that were ignored.
pub fn handle_frame(text: &str, sender: &UserId, router: &EventRouter) -> Option<DeliveryResult> {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(user_id = %sender, error = %e, "ignoring malformed frame");
            return None;
        }
    };
    let relay = ServerEvent::UserTyping {
        sender_id: sender.clone(),
        is_typing: event.is_typing(),
    };
    Some(router.deliver(event.receiver_id(), &relay))
}

#[instrument(skip_all, fields(user_id = %user_id, conn_id))]
async fn run_session(socket: WebSocket, user_id: UserId, mut phase: PhaseTracker, state: AppState) {
    let conn_id = ConnectionId::generate();
    let _ = tracing::Span::current().record("conn_id", conn_id.as_str());

    let server = &state.config.server;
    let interval = Duration::from_secs(server.heartbeat_interval_secs);
    let timeout = Duration::from_secs(server.heartbeat_timeout_secs);

    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(server.max_send_queue);
    let connection = Arc::new(ClientConnection::new(conn_id.clone(), user_id.clone(), send_tx));

    state.router.attach(Arc::clone(&connection));
    let _ = state.router.register_session(&user_id, &conn_id);
    phase.advance(ConnectionPhase::Active);
    info!("client connected");

    let cancel = state.shutdown.token().child_token();
    let (ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(write_loop(ws_tx, send_rx, interval, cancel.clone()));

    let heartbeat = {
        let connection = Arc::clone(&connection);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if run_heartbeat(connection, interval, timeout, cancel.clone()).await
                == HeartbeatResult::TimedOut
            {
                warn!("client unresponsive, disconnecting");
                cancel.cancel();
            }
        })
    };

    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    connection.mark_alive();
                    let _ = handle_frame(text.as_str(), &user_id, &state.router);
                }
                Some(Ok(WsMessage::Pong(_) | WsMessage::Ping(_))) => connection.mark_alive(),
                Some(Ok(WsMessage::Binary(data))) => {
                    debug!(len = data.len(), "ignoring binary frame");
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(error = %e, "socket read failed");
                    break;
                }
            },
            () = cancel.cancelled() => break,
        }
    }

    cancel.cancel();
    let _ = writer.await;
    let _ = heartbeat.await;

    let _ = state.router.detach(&conn_id);
    let removed = state.router.unregister_session(&user_id, &conn_id);
    phase.advance(ConnectionPhase::Closed);
    info!(
        removed,
        dropped = connection.drop_count(),
        age_secs = connection.age().as_secs(),
        "client disconnected"
    );
}

async fn write_loop(
    mut ws_tx: futures::stream::SplitSink<WebSocket, WsMessage>,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    ping_every: Duration,
    cancel: CancellationToken,
) {
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_every, ping_every);
    loop {
        tokio::select! {
            frame = send_rx.recv() => match frame {
                Some(text) => {
                    if ws_tx.send(WsMessage::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = ping.tick() => {
                if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            () = cancel.cancelled() => {
                let _ = ws_tx.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn tokens() -> TokenService {
        TokenService::new(&SecretString::from("gateway-test"), 60)
    }

    fn query(user_id: Option<&str>, token: Option<String>) -> HandshakeQuery {
        HandshakeQuery {
            user_id: user_id.map(str::to_string),
            token,
        }
    }

    #[test]
    fn rejects_missing_empty_and_undefined() {
        let t = tokens();
        for q in [query(None, None), query(Some(""), None), query(Some("undefined"), None)] {
            assert_eq!(authenticate(&q, &t, true), Err(HandshakeError::MissingUserId));
        }
    }

    #[test]
    fn trusts_query_user_when_enabled() {
        let t = tokens();
        assert_eq!(
            authenticate(&query(Some("u1"), None), &t, true).unwrap(),
            UserId::from_raw("u1")
        );
        assert_eq!(
            authenticate(&query(Some("u1"), None), &t, false),
            Err(HandshakeError::TokenRequired)
        );
    }

    #[test]
    fn token_must_match_user() {
        let t = tokens();
        let token = t.issue(&UserId::from_raw("u1")).unwrap();
        assert_eq!(
            authenticate(&query(Some("u1"), Some(token.clone())), &t, false).unwrap(),
            UserId::from_raw("u1")
        );
        assert_eq!(
            authenticate(&query(Some("u2"), Some(token)), &t, true),
            Err(HandshakeError::UserMismatch)
        );
        assert_eq!(
            authenticate(&query(Some("u1"), Some("garbage".into())), &t, true),
            Err(HandshakeError::InvalidToken)
        );
    }

    #[test]
    fn phase_transitions() {
        let mut p = PhaseTracker::new();
        assert!(!p.advance(ConnectionPhase::Active));
        assert!(p.advance(ConnectionPhase::Authenticating));
        assert!(p.advance(ConnectionPhase::Active));
        assert!(p.advance(ConnectionPhase::Closed));
        assert!(!p.advance(ConnectionPhase::Active));
        assert_eq!(p.phase(), ConnectionPhase::Closed);
    }

    #[test]
    fn typing_frames_relay_as_user_typing() {
        let router = EventRouter::new();
        let (tx, mut rx) = mpsc::channel(8);
        let u2 = UserId::from_raw("u2");
        let c = ConnectionId::from_raw("c2");
        router.attach(Arc::new(ClientConnection::new(c.clone(), u2.clone(), tx)));
        router.register_session(&u2, &c);
        while rx.try_recv().is_ok() {}

        let u1 = UserId::from_raw("u1");
        let result = handle_frame(r#"{"event":"typing","data":{"receiverId":"u2"}}"#, &u1, &router);
        assert_eq!(result, Some(DeliveryResult::Delivered));
        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["event"], "userTyping");
        assert_eq!(frame["data"]["senderId"], "u1");
        assert_eq!(frame["data"]["isTyping"], true);

        let result = handle_frame(r#"{"event":"stopTyping","data":{"receiverId":"u2"}}"#, &u1, &router);
        assert_eq!(result, Some(DeliveryResult::Delivered));
        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["data"]["isTyping"], false);
    }

    #[test]
    fn malformed_frames_ignored() {
        let router = EventRouter::new();
        let u1 = UserId::from_raw("u1");
        assert_eq!(handle_frame("not json", &u1, &router), None);
        assert_eq!(handle_frame(r#"{"event":"shout","data":{}}"#, &u1, &router), None);
        assert_eq!(
            handle_frame(r#"{"event":"typing","data":{"receiverId":"offline"}}"#, &u1, &router),
            Some(DeliveryResult::Offline)
        );
    }
}
