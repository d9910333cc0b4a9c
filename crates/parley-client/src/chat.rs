//! Chat session driving the store from REST calls and push events.

use std::sync::Arc;

use parking_lot::Mutex;
use parley_core::events::ServerEvent;
use parley_core::ids::UserId;
use parley_core::messages::{Message, MessageDraft};
use tracing::{debug, warn};

use crate::api::MessageApi;
use crate::error::ClientError;
use crate::push::PushConnection;
use crate::store::ConversationStore;

pub const PAGE_SIZE: u32 = 20;

/// The store lock is only held for in-memory updates, never across a
/// network call, so pushes keep applying while a request is in flight.
pub struct ChatClient<A> {
    api: A,
    store: Arc<Mutex<ConversationStore>>,
}

impl<A: MessageApi> ChatClient<A> {
    pub fn new(me: UserId, api: A) -> Self {
        Self {
            api,
            store: Arc::new(Mutex::new(ConversationStore::new(me))),
        }
    }

    pub fn store(&self) -> Arc<Mutex<ConversationStore>> {
        Arc::clone(&self.store)
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Optimistically send `draft` to the open conversation.
    pub async fn send(&self, draft: MessageDraft) -> Result<Message, ClientError> {
        let pending = self.store.lock().begin_send(&draft)?;

        match self.api.send_message(&pending.receiver, &draft).await {
            Ok(message) => {
                self.store.lock().confirm(&pending.correlation_id, message.clone());
                Ok(message)
            }
            Err(e) => {
                let _ = self.store.lock().fail(&pending.correlation_id);
                warn!(correlation_id = %pending.correlation_id, error = %e, "send failed");
                Err(e)
            }
        }
    }

    /// Switch to `partner`, load the newest page and mark it read.
    pub async fn open_conversation(&self, partner: UserId) -> Result<(), ClientError> {
        self.store.lock().switch_conversation(partner.clone());

        let page = self.api.conversation(&partner, 1, PAGE_SIZE).await?;
        self.store.lock().apply_page(&partner, 1, page);

        let marked = self.api.mark_read(&partner).await?;
        debug!(partner = %partner, marked, "conversation opened");
        Ok(())
    }

    /// Fetch the next older page. Returns `false` when there is nothing more.
    pub async fn load_older(&self) -> Result<bool, ClientError> {
        let (partner, page) = {
            let store = self.store.lock();
            let Some(partner) = store.partner().cloned() else {
                return Err(ClientError::NoConversation);
            };
            if !store.has_more() {
                return Ok(false);
            }
            (partner, store.next_page())
        };

        let fetched = self.api.conversation(&partner, page, PAGE_SIZE).await?;
        self.store.lock().apply_page(&partner, page, fetched);
        Ok(true)
    }

    pub fn handle_push(&self, event: &ServerEvent) {
        self.store.lock().on_push(event);
    }

    /// Apply events from `push` until the channel closes.
    pub async fn run_push(&self, mut push: PushConnection) {
        while let Some(event) = push.next_event().await {
            match event {
                Ok(event) => self.handle_push(&event),
                Err(ClientError::Decode(e)) => warn!(error = %e, "ignoring malformed push frame"),
                Err(e) => {
                    warn!(error = %e, "push channel failed");
                    break;
                }
            }
        }
        debug!("push channel closed");
    }
}
