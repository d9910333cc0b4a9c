use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, UserId};

/// A direct message as stored and as sent over the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: Option<String>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    /// True if this message was exchanged between `a` and `b` in either direction.
    pub fn is_between(&self, a: &UserId, b: &UserId) -> bool {
        (&self.sender_id == a && &self.receiver_id == b)
            || (&self.sender_id == b && &self.receiver_id == a)
    }

    /// Clear content and flag as deleted.
    pub fn soft_delete(&mut self, at: DateTime<Utc>) {
        self.text = None;
        self.image = None;
        self.is_deleted = true;
        self.deleted_at = Some(at);
        self.updated_at = at;
    }
}

/// What a client submits when sending.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DraftError {
    #[error("Message must contain text or an image")]
    Empty,
}

impl MessageDraft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
        }
    }

    pub fn image(image: impl Into<String>) -> Self {
        Self {
            text: None,
            image: Some(image.into()),
        }
    }

    /// Trimmed text, or `None` if blank.
    pub fn trimmed_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Image reference, or `None` if blank.
    pub fn image_ref(&self) -> Option<&str> {
        self.image.as_deref().filter(|i| !i.is_empty())
    }

    pub fn validate(&self) -> Result<(), DraftError> {
        if self.trimmed_text().is_none() && self.image_ref().is_none() {
            return Err(DraftError::Empty);
        }
        Ok(())
    }
}

/// Pagination metadata for a conversation page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_messages: u64,
    pub has_more: bool,
}

impl Pagination {
    /// Compute metadata for `page` (1-based) of size `limit` holding `returned` items.
    pub fn compute(page: u32, limit: u32, returned: usize, total: u64) -> Self {
        let limit = u64::from(limit.max(1));
        let skip = u64::from(page.saturating_sub(1)) * limit;
        Self {
            current_page: page,
            total_pages: u32::try_from(total.div_ceil(limit)).unwrap_or(u32::MAX),
            total_messages: total,
            has_more: skip + (returned as u64) < total,
        }
    }
}

/// One page of a conversation, oldest first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub pagination: Pagination,
}
