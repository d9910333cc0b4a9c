//! # parley-client
//!
//! Client side of Parley: an optimistic-send [`ConversationStore`], a REST
//! client behind the [`MessageApi`] trait, and a push-channel connection.

pub mod api;
pub mod chat;
pub mod error;
pub mod push;
pub mod store;

pub use api::{HttpApi, MessageApi};
pub use chat::ChatClient;
pub use error::ClientError;
pub use push::PushConnection;
pub use store::{ConversationStore, EntryState, MessageView, PendingSend};
