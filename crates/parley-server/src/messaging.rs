//! Direct-message operations: persist first, then push to the other party.

use std::collections::BTreeMap;
use std::sync::Arc;

use parley_core::events::ServerEvent;
use parley_core::ids::{MessageId, UserId};
use parley_core::messages::{Message, MessageDraft, MessagePage};
use parley_store::{Database, MessageRepo, StoreError, UserRepo};
use tracing::{debug, info};

use crate::error::ApiError;
use crate::images::ImageHost;
use crate::router::{DeliveryResult, EventRouter};
use crate::validation::{classify_image, ImageSource};

pub struct MessageService {
    db: Database,
    router: Arc<EventRouter>,
    images: Arc<dyn ImageHost>,
}

impl MessageService {
    pub fn new(db: Database, router: Arc<EventRouter>, images: Arc<dyn ImageHost>) -> Self {
        Self { db, router, images }
    }

    fn messages(&self) -> MessageRepo {
        MessageRepo::new(self.db.clone())
    }

    fn users(&self) -> UserRepo {
        UserRepo::new(self.db.clone())
    }

    /// Turn a client image reference into a hosted URL.
    pub async fn resolve_image(&self, image: &str) -> Result<String, ApiError> {
        match classify_image(image)? {
            ImageSource::Url(url) => Ok(url.to_string()),
            ImageSource::DataUri(data) => Ok(self.images.upload_data_uri(data).await?),
        }
    }

    /// Persist a message and push `newMessage` to the receiver if online.
    pub async fn send(
        &self,
        sender: &UserId,
        receiver: &UserId,
        draft: &MessageDraft,
    ) -> Result<(Message, DeliveryResult), ApiError> {
        draft
            .validate()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        if !self.users().exists(receiver)? {
            return Err(ApiError::NotFound("User not found".into()));
        }

        let image = match draft.image_ref() {
            Some(image) => Some(self.resolve_image(image).await?),
            None => None,
        };
        let message = self.messages().create(
            sender,
            receiver,
            draft.trimmed_text(),
            image.as_deref(),
        )?;

        let delivery = self
            .router
            .deliver(receiver, &ServerEvent::NewMessage(message.clone()));
        info!(
            message_id = %message.id,
            sender_id = %sender,
            receiver_id = %receiver,
            delivered = delivery.is_delivered(),
            "message sent"
        );
        Ok((message, delivery))
    }

    pub fn conversation(
        &self,
        me: &UserId,
        other: &UserId,
        page: u32,
        limit: u32,
    ) -> Result<MessagePage, ApiError> {
        Ok(self.messages().conversation_page(me, other, page, limit)?)
    }

    /// Mark everything `sender` sent to `reader` as read and tell `sender`.
    pub fn mark_read(&self, reader: &UserId, sender: &UserId) -> Result<u64, ApiError> {
        let count = self.messages().mark_read(sender, reader)?;
        let delivery = self.router.deliver(
            sender,
            &ServerEvent::MessagesRead {
                read_by: reader.clone(),
                count,
            },
        );
        debug!(reader = %reader, sender = %sender, count, delivered = delivery.is_delivered(), "messages marked read");
        Ok(count)
    }

    pub fn unread_counts(&self, me: &UserId) -> Result<BTreeMap<UserId, u64>, ApiError> {
        Ok(self.messages().unread_counts(me)?)
    }

    /// Load a message the caller authored and may still change.
    fn owned_live_message(
        &self,
        actor: &UserId,
        message_id: &MessageId,
        verb: &str,
    ) -> Result<Message, ApiError> {
        let message = match self.messages().get(message_id) {
            Ok(m) => m,
            Err(StoreError::NotFound(_)) => {
                return Err(ApiError::NotFound("Message not found".into()))
            }
            Err(e) => return Err(e.into()),
        };
        if &message.sender_id != actor {
            return Err(ApiError::Forbidden(format!(
                "Not authorized to {verb} this message"
            )));
        }
        Ok(message)
    }

    /// Replace the text of one of the caller's messages and push `messageEdited`.
    pub fn edit(&self, editor: &UserId, message_id: &MessageId, text: &str) -> Result<Message, ApiError> {
        let message = self.owned_live_message(editor, message_id, "edit")?;
        if message.is_deleted {
            return Err(ApiError::Conflict("Cannot edit deleted message".into()));
        }
        let edited = self.messages().edit_text(message_id, text)?;
        let _ = self
            .router
            .deliver(&edited.receiver_id, &ServerEvent::MessageEdited(edited.clone()));
        Ok(edited)
    }

    /// Soft-delete one of the caller's messages and push `messageDeleted`.
    pub fn delete(&self, actor: &UserId, message_id: &MessageId) -> Result<Message, ApiError> {
        let message = self.owned_live_message(actor, message_id, "delete")?;
        if message.is_deleted {
            return Err(ApiError::Conflict("Message already deleted".into()));
        }
        let deleted = self.messages().soft_delete(message_id)?;
        let _ = self.router.deliver(
            &deleted.receiver_id,
            &ServerEvent::MessageDeleted {
                message_id: deleted.id.clone(),
            },
        );
        Ok(deleted)
    }
}
