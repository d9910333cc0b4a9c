//! Push-channel wire events.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, UserId};
use crate::messages::Message;

/// Events pushed from the server to a connected client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    NewMessage(Message),
    MessageEdited(Message),
    #[serde(rename_all = "camelCase")]
    MessageDeleted { message_id: MessageId },
    #[serde(rename_all = "camelCase")]
    MessagesRead { read_by: UserId, count: u64 },
    #[serde(rename_all = "camelCase")]
    UserTyping { sender_id: UserId, is_typing: bool },
    GetOnlineUsers(Vec<UserId>),
}

impl ServerEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "newMessage",
            Self::MessageEdited(_) => "messageEdited",
            Self::MessageDeleted { .. } => "messageDeleted",
            Self::MessagesRead { .. } => "messagesRead",
            Self::UserTyping { .. } => "userTyping",
            Self::GetOnlineUsers(_) => "getOnlineUsers",
        }
    }
}

/// Events a client may send over the push channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    Typing { receiver_id: UserId },
    #[serde(rename_all = "camelCase")]
    StopTyping { receiver_id: UserId },
}

impl ClientEvent {
    pub fn receiver_id(&self) -> &UserId {
        match self {
            Self::Typing { receiver_id } | Self::StopTyping { receiver_id } => receiver_id,
        }
    }

    pub fn is_typing(&self) -> bool {
        matches!(self, Self::Typing { .. })
    }
}
