use std::collections::BTreeMap;

use chrono::Utc;
use tracing::instrument;

use parley_core::ids::{MessageId, UserId};
use parley_core::messages::{Message, MessagePage, Pagination};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const TABLE: &str = "messages";
const COLUMNS: &str = "id, sender_id, receiver_id, text, image, is_read, read_at, is_edited, edited_at,
                       is_deleted, deleted_at, created_at, updated_at";
const PAIR_FILTER: &str =
    "(sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)";

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a new message. Callers validate that text or image is present.
    #[instrument(skip(self, text, image), fields(sender_id = %sender_id, receiver_id = %receiver_id))]
    pub fn create(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
        text: Option<&str>,
        image: Option<&str>,
    ) -> Result<Message, StoreError> {
        let id = MessageId::generate();
        let now = Utc::now();
        let ts = row_helpers::format_ts(&now);

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, text, image, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id.as_str(),
                    sender_id.as_str(),
                    receiver_id.as_str(),
                    text,
                    image,
                    ts,
                    ts,
                ],
            )?;

            Ok(Message {
                id,
                sender_id: sender_id.clone(),
                receiver_id: receiver_id.clone(),
                text: text.map(str::to_string),
                image: image.map(str::to_string),
                created_at: now,
                updated_at: now,
                is_read: false,
                read_at: None,
                is_edited: false,
                edited_at: None,
                is_deleted: false,
                deleted_at: None,
            })
        })
    }

    /// Get a message by ID.
    #[instrument(skip(self), fields(message_id = %id))]
    pub fn get(&self, id: &MessageId) -> Result<Message, StoreError> {
        self.db.with_conn(|conn| load(conn, id))
    }

    /// One page of the conversation between `a` and `b`.
    ///
    /// Pages are cut newest-first and each page is returned oldest-first.
    #[instrument(skip(self), fields(a = %a, b = %b))]
    pub fn conversation_page(
        &self,
        a: &UserId,
        b: &UserId,
        page: u32,
        limit: u32,
    ) -> Result<MessagePage, StoreError> {
        let page = page.max(1);
        let limit = limit.max(1);
        let offset = i64::from(page - 1) * i64::from(limit);

        self.db.with_conn(|conn| {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM messages WHERE {PAIR_FILTER}"),
                [a.as_str(), b.as_str()],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM messages WHERE {PAIR_FILTER}
                 ORDER BY created_at DESC, id DESC LIMIT ?3 OFFSET ?4"
            ))?;
            let mut rows = stmt.query(rusqlite::params![
                a.as_str(),
                b.as_str(),
                i64::from(limit),
                offset
            ])?;
            let mut messages = Vec::new();
            while let Some(row) = rows.next()? {
                messages.push(row_to_message(row)?);
            }
            messages.reverse();

            let total = u64::try_from(total).unwrap_or_default();
            let pagination = Pagination::compute(page, limit, messages.len(), total);
            Ok(MessagePage {
                messages,
                pagination,
            })
        })
    }

    /// Mark every unread, undeleted message from `sender_id` to `receiver_id`
    /// as read. Returns how many rows changed.
    #[instrument(skip(self), fields(sender_id = %sender_id, receiver_id = %receiver_id))]
    pub fn mark_read(&self, sender_id: &UserId, receiver_id: &UserId) -> Result<u64, StoreError> {
        let ts = row_helpers::format_ts(&Utc::now());
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1, read_at = ?1, updated_at = ?1
                 WHERE sender_id = ?2 AND receiver_id = ?3 AND is_read = 0 AND is_deleted = 0",
                rusqlite::params![ts, sender_id.as_str(), receiver_id.as_str()],
            )?;
            Ok(changed as u64)
        })
    }

    /// Unread message counts addressed to `receiver_id`, keyed by sender.
    #[instrument(skip(self), fields(receiver_id = %receiver_id))]
    pub fn unread_counts(&self, receiver_id: &UserId) -> Result<BTreeMap<UserId, u64>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sender_id, COUNT(*) FROM messages
                 WHERE receiver_id = ?1 AND is_read = 0 AND is_deleted = 0
                 GROUP BY sender_id",
            )?;
            let mut rows = stmt.query([receiver_id.as_str()])?;
            let mut counts = BTreeMap::new();
            while let Some(row) = rows.next()? {
                let sender: String = row_helpers::get(row, 0, TABLE, "sender_id")?;
                let count: i64 = row_helpers::get(row, 1, TABLE, "count")?;
                counts.insert(UserId::from_raw(sender), u64::try_from(count).unwrap_or_default());
            }
            Ok(counts)
        })
    }

    /// Replace the text of a live message and flag it edited.
    #[instrument(skip(self, text), fields(message_id = %id))]
    pub fn edit_text(&self, id: &MessageId, text: &str) -> Result<Message, StoreError> {
        let ts = row_helpers::format_ts(&Utc::now());
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET text = ?1, is_edited = 1, edited_at = ?2, updated_at = ?2
                 WHERE id = ?3 AND is_deleted = 0",
                rusqlite::params![text, ts, id.as_str()],
            )?;
            if changed == 0 {
                return Err(refused(conn, id, "Cannot edit deleted message"));
            }
            load(conn, id)
        })
    }

    /// Soft delete: clear text and image, keep the record.
    #[instrument(skip(self), fields(message_id = %id))]
    pub fn soft_delete(&self, id: &MessageId) -> Result<Message, StoreError> {
        let ts = row_helpers::format_ts(&Utc::now());
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET text = NULL, image = NULL, is_deleted = 1,
                        deleted_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND is_deleted = 0",
                rusqlite::params![ts, id.as_str()],
            )?;
            if changed == 0 {
                return Err(refused(conn, id, "Message already deleted"));
            }
            load(conn, id)
        })
    }
}

fn load(conn: &rusqlite::Connection, id: &MessageId) -> Result<Message, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"))?;
    let mut rows = stmt.query([id.as_str()])?;
    match rows.next()? {
        Some(row) => row_to_message(row),
        None => Err(StoreError::NotFound(format!("message {id}"))),
    }
}

/// Why a guarded update touched no row: the message is missing or already deleted.
fn refused(conn: &rusqlite::Connection, id: &MessageId, conflict: &str) -> StoreError {
    match load(conn, id) {
        Ok(_) => StoreError::Conflict(conflict.to_string()),
        Err(e) => e,
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    Ok(Message {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, TABLE, "id")?),
        sender_id: UserId::from_raw(row_helpers::get::<String>(row, 1, TABLE, "sender_id")?),
        receiver_id: UserId::from_raw(row_helpers::get::<String>(row, 2, TABLE, "receiver_id")?),
        text: row_helpers::get_opt(row, 3, TABLE, "text")?,
        image: row_helpers::get_opt(row, 4, TABLE, "image")?,
        is_read: row_helpers::get(row, 5, TABLE, "is_read")?,
        read_at: row_helpers::get_ts_opt(row, 6, TABLE, "read_at")?,
        is_edited: row_helpers::get(row, 7, TABLE, "is_edited")?,
        edited_at: row_helpers::get_ts_opt(row, 8, TABLE, "edited_at")?,
        is_deleted: row_helpers::get(row, 9, TABLE, "is_deleted")?,
        deleted_at: row_helpers::get_ts_opt(row, 10, TABLE, "deleted_at")?,
        created_at: row_helpers::get_ts(row, 11, TABLE, "created_at")?,
        updated_at: row_helpers::get_ts(row, 12, TABLE, "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (MessageRepo, UserId, UserId) {
        let db = Database::in_memory().unwrap();
        (
            MessageRepo::new(db),
            UserId::from_raw("u1"),
            UserId::from_raw("u2"),
        )
    }

    #[test]
    fn create_and_get() {
        let (repo, u1, u2) = setup();
        let msg = repo.create(&u1, &u2, Some("hi"), None).unwrap();
        assert!(msg.id.as_str().starts_with("msg_"));

        let fetched = repo.get(&msg.id).unwrap();
        assert_eq!(fetched.text.as_deref(), Some("hi"));
        assert!(fetched.image.is_none());
        assert!(!fetched.is_read);
        assert_eq!(fetched.created_at.timestamp_micros(), msg.created_at.timestamp_micros());
    }

    #[test]
    fn get_missing_is_not_found() {
        let (repo, _, _) = setup();
        let err = repo.get(&MessageId::from_raw("nope")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn page_of_25_with_limit_20() {
        let (repo, u1, u2) = setup();
        let mut ids = Vec::new();
        for i in 0..25 {
            let (from, to) = if i % 2 == 0 { (&u1, &u2) } else { (&u2, &u1) };
            ids.push(repo.create(from, to, Some(&format!("m{i}")), None).unwrap().id);
        }

        let first = repo.conversation_page(&u1, &u2, 1, 20).unwrap();
        assert_eq!(first.messages.len(), 20);
        assert!(first.pagination.has_more);
        assert_eq!(first.pagination.total_pages, 2);
        assert_eq!(first.pagination.total_messages, 25);
        // Newest 20, oldest first within the page
        assert_eq!(first.messages[0].id, ids[5]);
        assert_eq!(first.messages[19].id, ids[24]);

        let second = repo.conversation_page(&u2, &u1, 2, 20).unwrap();
        assert_eq!(second.messages.len(), 5);
        assert!(!second.pagination.has_more);
        assert_eq!(second.messages[0].id, ids[0]);
    }

    #[test]
    fn page_excludes_other_conversations() {
        let (repo, u1, u2) = setup();
        let u3 = UserId::from_raw("u3");
        repo.create(&u1, &u2, Some("a"), None).unwrap();
        repo.create(&u1, &u3, Some("b"), None).unwrap();
        let page = repo.conversation_page(&u1, &u2, 1, 20).unwrap();
        assert_eq!(page.messages.len(), 1);
        assert!(page.messages.iter().all(|m| m.is_between(&u1, &u2)));
    }

    #[test]
    fn mark_read_is_idempotent() {
        let (repo, u1, u2) = setup();
        repo.create(&u1, &u2, Some("a"), None).unwrap();
        repo.create(&u1, &u2, Some("b"), None).unwrap();
        repo.create(&u2, &u1, Some("reply"), None).unwrap();

        assert_eq!(repo.mark_read(&u1, &u2).unwrap(), 2);
        assert_eq!(repo.mark_read(&u1, &u2).unwrap(), 0);

        let page = repo.conversation_page(&u1, &u2, 1, 20).unwrap();
        let from_u1: Vec<_> = page.messages.iter().filter(|m| m.sender_id == u1).collect();
        assert!(from_u1.iter().all(|m| m.is_read && m.read_at.is_some()));
    }

    #[test]
    fn mark_read_skips_deleted() {
        let (repo, u1, u2) = setup();
        let m = repo.create(&u1, &u2, Some("a"), None).unwrap();
        repo.soft_delete(&m.id).unwrap();
        assert_eq!(repo.mark_read(&u1, &u2).unwrap(), 0);
    }

    #[test]
    fn unread_counts_grouped_by_sender() {
        let (repo, u1, u2) = setup();
        let u3 = UserId::from_raw("u3");
        repo.create(&u1, &u2, Some("a"), None).unwrap();
        repo.create(&u1, &u2, Some("b"), None).unwrap();
        repo.create(&u3, &u2, Some("c"), None).unwrap();
        repo.create(&u2, &u1, Some("not mine"), None).unwrap();

        let counts = repo.unread_counts(&u2).unwrap();
        assert_eq!(counts.get(&u1), Some(&2));
        assert_eq!(counts.get(&u3), Some(&1));
        assert_eq!(counts.len(), 2);

        repo.mark_read(&u1, &u2).unwrap();
        let counts = repo.unread_counts(&u2).unwrap();
        assert!(counts.get(&u1).is_none());
    }

    #[test]
    fn edit_text_flags_edited() {
        let (repo, u1, u2) = setup();
        let m = repo.create(&u1, &u2, Some("typo"), None).unwrap();
        let edited = repo.edit_text(&m.id, "fixed").unwrap();
        assert_eq!(edited.text.as_deref(), Some("fixed"));
        assert!(edited.is_edited);

        let stored = repo.get(&m.id).unwrap();
        assert_eq!(stored.text.as_deref(), Some("fixed"));
        assert!(stored.is_edited);
        assert!(stored.edited_at.is_some());
    }

    #[test]
    fn soft_delete_clears_and_conflicts_afterwards() {
        let (repo, u1, u2) = setup();
        let m = repo
            .create(&u1, &u2, Some("secret"), Some("https://img/x.png"))
            .unwrap();
        let deleted = repo.soft_delete(&m.id).unwrap();
        assert!(deleted.is_deleted);
        assert!(deleted.text.is_none());
        assert!(deleted.image.is_none());

        let stored = repo.get(&m.id).unwrap();
        assert!(stored.is_deleted);
        assert!(stored.text.is_none());
        assert!(stored.image.is_none());
        assert!(stored.deleted_at.is_some());

        assert!(matches!(repo.soft_delete(&m.id), Err(StoreError::Conflict(_))));
        assert!(matches!(repo.edit_text(&m.id, "x"), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn edit_after_delete_leaves_content_cleared() {
        let (repo, u1, u2) = setup();
        let m = repo.create(&u1, &u2, Some("secret"), None).unwrap();
        repo.soft_delete(&m.id).unwrap();

        match repo.edit_text(&m.id, "back again") {
            Err(StoreError::Conflict(msg)) => assert_eq!(msg, "Cannot edit deleted message"),
            other => panic!("expected conflict, got {other:?}"),
        }
        let stored = repo.get(&m.id).unwrap();
        assert!(stored.text.is_none());
        assert!(!stored.is_edited);
    }

    #[test]
    fn edit_or_delete_missing_is_not_found() {
        let (repo, _, _) = setup();
        let ghost = MessageId::from_raw("msg_ghost");
        assert!(matches!(repo.edit_text(&ghost, "x"), Err(StoreError::NotFound(_))));
        assert!(matches!(repo.soft_delete(&ghost), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn concurrent_deletes_succeed_once() {
        let (repo, u1, u2) = setup();
        for _ in 0..50 {
            let m = repo.create(&u1, &u2, Some("hi"), None).unwrap();
            let barrier = std::sync::Barrier::new(3);
            let outcomes: Vec<bool> = std::thread::scope(|scope| {
                let deletes: Vec<_> = (0..2)
                    .map(|_| {
                        scope.spawn(|| {
                            barrier.wait();
                            repo.soft_delete(&m.id).is_ok()
                        })
                    })
                    .collect();
                let edit = scope.spawn(|| {
                    barrier.wait();
                    let _ = repo.edit_text(&m.id, "late edit");
                });
                edit.join().unwrap();
                deletes.into_iter().map(|h| h.join().unwrap()).collect()
            });
            assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
            let stored = repo.get(&m.id).unwrap();
            assert!(stored.is_deleted);
            assert!(stored.text.is_none());
        }
    }
}
