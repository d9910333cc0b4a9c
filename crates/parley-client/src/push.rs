//! Push-channel client over tokio-tungstenite.

use futures::{SinkExt, StreamExt};
use parley_core::events::{ClientEvent, ServerEvent};
use parley_core::ids::UserId;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::ClientError;

pub struct PushConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

/// Handshake URL for `ws_base` (e.g. `ws://host:port`).
pub fn handshake_url(ws_base: &str, user_id: &UserId, token: Option<&str>) -> String {
    let mut url = format!("{}/ws?userId={user_id}", ws_base.trim_end_matches('/'));
    if let Some(token) = token {
        url.push_str("&token=");
        url.push_str(token);
    }
    url
}

impl PushConnection {
    pub async fn connect(ws_base: &str, user_id: &UserId, token: Option<&str>) -> Result<Self, ClientError> {
        let (ws, _) = connect_async(handshake_url(ws_base, user_id, token)).await?;
        debug!(user_id = %user_id, "push channel open");
        Ok(Self { ws })
    }

    /// Next server event. `None` once the channel is closed; frames that are
    /// not valid events surface as `Decode` errors and the stream continues.
    pub async fn next_event(&mut self) -> Option<Result<ServerEvent, ClientError>> {
        loop {
            match self.ws.next().await? {
                Ok(WsMessage::Text(text)) => {
                    return Some(serde_json::from_str(text.as_str()).map_err(ClientError::from));
                }
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    pub async fn send_typing(&mut self, receiver: &UserId, is_typing: bool) -> Result<(), ClientError> {
        let event = if is_typing {
            ClientEvent::Typing {
                receiver_id: receiver.clone(),
            }
        } else {
            ClientEvent::StopTyping {
                receiver_id: receiver.clone(),
            }
        };
        let frame = serde_json::to_string(&event)?;
        self.ws.send(WsMessage::text(frame)).await?;
        Ok(())
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.ws.close(None).await?;
        Ok(())
    }
}
