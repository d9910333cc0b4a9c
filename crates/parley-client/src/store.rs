//! Client-side view of the active conversation.
//!
//! The list is fed from three places that race each other: optimistic sends,
//! REST pages, and push events. Entries are keyed by server message id once
//! confirmed, and by a local [`CorrelationId`] while pending, so every path
//! can check for an existing entry before inserting.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use parley_core::events::ServerEvent;
use parley_core::ids::{CorrelationId, MessageId, UserId};
use parley_core::messages::{Message, MessageDraft, MessagePage};
use tracing::debug;

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    /// Shown locally, awaiting the server's answer.
    Pending { correlation_id: CorrelationId },
    Confirmed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub message: Message,
    pub state: EntryState,
}

impl MessageView {
    pub fn is_pending(&self) -> bool {
        matches!(self.state, EntryState::Pending { .. })
    }

    fn correlation_id(&self) -> Option<&CorrelationId> {
        match &self.state {
            EntryState::Pending { correlation_id } => Some(correlation_id),
            EntryState::Confirmed => None,
        }
    }
}

/// Handle for an optimistic send in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub correlation_id: CorrelationId,
    pub receiver: UserId,
}

#[derive(Debug)]
pub struct ConversationStore {
    me: UserId,
    partner: Option<UserId>,
    entries: Vec<MessageView>,
    typing: HashMap<UserId, bool>,
    online: BTreeSet<UserId>,
    current_page: u32,
    has_more: bool,
}

impl ConversationStore {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            partner: None,
            entries: Vec::new(),
            typing: HashMap::new(),
            online: BTreeSet::new(),
            current_page: 0,
            has_more: false,
        }
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    pub fn partner(&self) -> Option<&UserId> {
        self.partner.as_ref()
    }

    pub fn entries(&self) -> &[MessageView] {
        &self.entries
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|e| &e.message)
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Next page to request when scrolling back.
    pub fn next_page(&self) -> u32 {
        self.current_page + 1
    }

    pub fn is_typing(&self, user_id: &UserId) -> bool {
        self.typing.get(user_id).copied().unwrap_or(false)
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.online.contains(user_id)
    }

    pub fn online_users(&self) -> impl Iterator<Item = &UserId> {
        self.online.iter()
    }

    /// Open a conversation with `partner`. Always clears messages and typing
    /// state, even when re-opening the same partner.
    pub fn switch_conversation(&mut self, partner: UserId) {
        debug!(partner = %partner, "switching conversation");
        self.partner = Some(partner);
        self.entries.clear();
        self.typing.clear();
        self.current_page = 0;
        self.has_more = false;
    }

    fn position_by_id(&self, id: &MessageId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| !e.is_pending() && &e.message.id == id)
    }

    fn position_by_correlation(&self, correlation_id: &CorrelationId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.correlation_id() == Some(correlation_id))
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.position_by_id(id).is_some()
    }

    /// Insert after every entry created at or before `view`.
    fn insert_by_time(&mut self, view: MessageView) {
        let at = self
            .entries
            .partition_point(|e| e.message.created_at <= view.message.created_at);
        self.entries.insert(at, view);
    }

    /// Incoming half of the open conversation: sent by the partner to me.
    fn is_from_partner(&self, message: &Message) -> bool {
        self.partner
            .as_ref()
            .is_some_and(|partner| message.sender_id == *partner && message.receiver_id == self.me)
    }

    fn in_active_conversation(&self, message: &Message) -> bool {
        self.partner
            .as_ref()
            .is_some_and(|partner| message.is_between(&self.me, partner))
    }

    /// Show `draft` immediately as a pending entry.
    pub fn begin_send(&mut self, draft: &MessageDraft) -> Result<PendingSend, ClientError> {
        let receiver = self.partner.clone().ok_or(ClientError::NoConversation)?;
        let correlation_id = CorrelationId::generate();
        let now = Utc::now();
        let placeholder = Message {
            id: MessageId::from_raw(correlation_id.as_str()),
            sender_id: self.me.clone(),
            receiver_id: receiver.clone(),
            text: draft.trimmed_text().map(str::to_string),
            image: draft.image_ref().map(str::to_string),
            created_at: now,
            updated_at: now,
            is_read: false,
            read_at: None,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
        };
        self.entries.push(MessageView {
            message: placeholder,
            state: EntryState::Pending {
                correlation_id: correlation_id.clone(),
            },
        });
        Ok(PendingSend {
            correlation_id,
            receiver,
        })
    }

    /// Replace the pending entry with the server's record. If the record is
    /// already listed (a history fetch got there first) the pending entry is dropped.
    pub fn confirm(&mut self, correlation_id: &CorrelationId, message: Message) {
        let pending = self.position_by_correlation(correlation_id);
        let already_listed = self.contains(&message.id);

        match (pending, already_listed) {
            (Some(idx), false) => {
                self.entries[idx] = MessageView {
                    message,
                    state: EntryState::Confirmed,
                };
            }
            (Some(idx), true) => {
                let _ = self.entries.remove(idx);
            }
            (None, false) if self.in_active_conversation(&message) => {
                self.insert_by_time(MessageView {
                    message,
                    state: EntryState::Confirmed,
                });
            }
            (None, _) => {
                debug!(correlation_id = %correlation_id, "confirmation for a cleared entry");
            }
        }
    }

    /// Drop a pending entry whose send failed. Returns whether it was found.
    pub fn fail(&mut self, correlation_id: &CorrelationId) -> bool {
        match self.position_by_correlation(correlation_id) {
            Some(idx) => {
                let _ = self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Merge a page of history. Page 1 is merged by timestamp; older pages
    /// are prepended. Pages for a conversation that is no longer open are
    /// ignored.
    pub fn apply_page(&mut self, partner: &UserId, page: u32, fetched: MessagePage) {
        if self.partner.as_ref() != Some(partner) {
            debug!(partner = %partner, "dropping page for inactive conversation");
            return;
        }
        self.current_page = self.current_page.max(page);
        self.has_more = fetched.pagination.has_more;

        let fresh: Vec<MessageView> = fetched
            .messages
            .into_iter()
            .filter(|m| !self.contains(&m.id))
            .map(|message| MessageView {
                message,
                state: EntryState::Confirmed,
            })
            .collect();

        if page <= 1 {
            for view in fresh {
                self.insert_by_time(view);
            }
        } else {
            let _ = self.entries.splice(0..0, fresh);
        }
    }

    /// Apply one push event.
    pub fn on_push(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::NewMessage(message) => {
                if !self.is_from_partner(message) {
                    debug!(message_id = %message.id, "message for another conversation");
                    return;
                }
                if self.contains(&message.id) {
                    return;
                }
                self.insert_by_time(MessageView {
                    message: message.clone(),
                    state: EntryState::Confirmed,
                });
            }
            ServerEvent::MessageEdited(message) => {
                if let Some(idx) = self.position_by_id(&message.id) {
                    self.entries[idx].message = message.clone();
                }
            }
            ServerEvent::MessageDeleted { message_id } => {
                if let Some(idx) = self.position_by_id(message_id) {
                    self.entries[idx].message.soft_delete(Utc::now());
                }
            }
            ServerEvent::MessagesRead { read_by, .. } => {
                if self.partner.as_ref() != Some(read_by) {
                    return;
                }
                let now = Utc::now();
                for entry in &mut self.entries {
                    let m = &mut entry.message;
                    if m.sender_id == self.me && &m.receiver_id == read_by && !m.is_read {
                        m.is_read = true;
                        m.read_at = Some(now);
                    }
                }
            }
            ServerEvent::UserTyping {
                sender_id,
                is_typing,
            } => {
                let _ = self.typing.insert(sender_id.clone(), *is_typing);
            }
            ServerEvent::GetOnlineUsers(users) => {
                self.online = users.iter().cloned().collect();
            }
        }
    }
}
