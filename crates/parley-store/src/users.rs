use chrono::{DateTime, Utc};
use tracing::instrument;

use parley_core::ids::UserId;
use parley_core::users::UserProfile;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const TABLE: &str = "users";
const COLUMNS: &str = "id, full_name, email, password_hash, profile_pic, created_at, updated_at";

/// A stored user, including the password hash. Convert with
/// [`UserRow::profile`] before handing it to a client.
#[derive(Clone, Debug)]
pub struct UserRow {
    pub id: UserId,
    pub full_name: String,
    pub email: String,
    pub password_hash: String,
    pub profile_pic: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            full_name: self.full_name.clone(),
            email: self.email.clone(),
            profile_pic: self.profile_pic.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user. Emails are stored lowercase and must be unique.
    #[instrument(skip(self, password_hash))]
    pub fn create(
        &self,
        full_name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<UserRow, StoreError> {
        let id = UserId::generate();
        let email = email.trim().to_lowercase();
        let now = Utc::now();
        let ts = row_helpers::format_ts(&now);

        self.db.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
                [&email],
                |row| row.get(0),
            )?;
            if exists {
                return Err(StoreError::Conflict("Email already exists".into()));
            }

            conn.execute(
                "INSERT INTO users (id, full_name, email, password_hash, profile_pic, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, '', ?5, ?6)",
                rusqlite::params![id.as_str(), full_name, email, password_hash, ts, ts],
            )?;

            Ok(UserRow {
                id,
                full_name: full_name.to_string(),
                email,
                password_hash: password_hash.to_string(),
                profile_pic: String::new(),
                created_at: now,
                updated_at: now,
            })
        })
    }

    /// Get a user by ID.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: &UserId) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM users WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_user(row),
                None => Err(StoreError::NotFound(format!("user {id}"))),
            }
        })
    }

    /// True if a user with this ID exists.
    pub fn exists(&self, id: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                [id.as_str()],
                |row| row.get(0),
            )
            .map_err(StoreError::from)
        })
    }

    /// Look up a user by email (case-insensitive).
    #[instrument(skip(self))]
    pub fn find_by_email(&self, email: &str) -> Result<Option<UserRow>, StoreError> {
        let email = email.trim().to_lowercase();
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {COLUMNS} FROM users WHERE email = ?1"))?;
            let mut rows = stmt.query([&email])?;
            match rows.next()? {
                Some(row) => row_to_user(row).map(Some),
                None => Ok(None),
            }
        })
    }

    /// Everyone except `me`, ordered by name.
    #[instrument(skip(self), fields(user_id = %me))]
    pub fn list_except(&self, me: &UserId) -> Result<Vec<UserRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM users WHERE id != ?1 ORDER BY full_name, id"
            ))?;
            let mut rows = stmt.query([me.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_user(row)?);
            }
            Ok(results)
        })
    }

    /// Replace the profile picture URL.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn update_profile_pic(&self, id: &UserId, url: &str) -> Result<UserRow, StoreError> {
        let ts = row_helpers::format_ts(&Utc::now());
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET profile_pic = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![url, ts, id.as_str()],
            )
            .map_err(StoreError::from)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("user {id}")));
        }
        self.get(id)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> Result<UserRow, StoreError> {
    Ok(UserRow {
        id: UserId::from_raw(row_helpers::get::<String>(row, 0, TABLE, "id")?),
        full_name: row_helpers::get(row, 1, TABLE, "full_name")?,
        email: row_helpers::get(row, 2, TABLE, "email")?,
        password_hash: row_helpers::get(row, 3, TABLE, "password_hash")?,
        profile_pic: row_helpers::get(row, 4, TABLE, "profile_pic")?,
        created_at: row_helpers::get_ts(row, 5, TABLE, "created_at")?,
        updated_at: row_helpers::get_ts(row, 6, TABLE, "updated_at")?,
    })
}
