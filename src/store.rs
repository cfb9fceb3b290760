//! SQLite Identity Store
//!
//! Users and sessions in a single SQLite database. Timestamps are stored as
//! unix milliseconds; session tokens only as SHA-256 hashes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use crate::identity::{
    IdentityProvider, IssuedSession, ListUsersQuery, NewUser, Session, SessionInfo, SortBy,
    SortOrder, StoreError, User, UserPage,
};
use crate::role::Role;

/// Ban reason recorded when the admin gives none
const DEFAULT_BAN_REASON: &str = "No reason";

const USER_COLUMNS: &str = "u.id, u.name, u.email, u.email_verified, u.image, u.role, \
     u.banned, u.ban_reason, u.ban_expires, u.created_at, u.updated_at";

/// Identity store with SQLite backend
pub struct SqliteIdentityStore {
    conn: Mutex<Connection>,
}

impl SqliteIdentityStore {
    /// Open or create the identity database
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn)?;

        info!("Identity store opened: {}", path.display());
        Ok(store)
    }

    /// Private in-memory database (tests, demos)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        Self::register_functions(&conn)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// SQLite's `lower()` only folds ASCII; search uses `fold_case()` instead
    fn register_functions(conn: &Connection) -> Result<(), StoreError> {
        conn.create_scalar_function(
            "fold_case",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|s| s.to_lowercase())),
        )?;
        Ok(())
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                email_verified INTEGER NOT NULL DEFAULT 0,
                image TEXT,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'visitor'
                    CHECK(role IN ('visitor', 'operator', 'admin')),
                banned INTEGER NOT NULL DEFAULT 0,
                ban_reason TEXT,
                ban_expires INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_users_ban ON users(banned, ban_expires);
            CREATE INDEX IF NOT EXISTS idx_users_created ON users(created_at DESC);

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                token_hash TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                ip_address TEXT,
                user_agent TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            "#,
        )?;
        Ok(())
    }

    /// Hash a session token for storage
    fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn generate_token() -> String {
        format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
    }

    fn fetch_user(conn: &Connection, user_id: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1");
        Ok(conn
            .query_row(&sql, params![user_id], |row| user_from_row(row, 0))
            .optional()?)
    }

    fn require_user(conn: &Connection, user_id: &str) -> Result<User, StoreError> {
        Self::fetch_user(conn, user_id)?.ok_or_else(|| StoreError::UserNotFound(user_id.to_string()))
    }
}

fn to_datetime(millis: i64, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp out of range: {millis}").into(),
        )
    })
}

/// Map the user columns starting at `offset`
fn user_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<User> {
    let role_text: String = row.get(offset + 5)?;
    let role = role_text.parse::<Role>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(offset + 5, Type::Text, Box::new(e))
    })?;

    let ban_expires = match row.get::<_, Option<i64>>(offset + 8)? {
        Some(ms) => Some(to_datetime(ms, offset + 8)?),
        None => None,
    };

    Ok(User {
        id: row.get(offset)?,
        name: row.get(offset + 1)?,
        email: row.get(offset + 2)?,
        email_verified: row.get(offset + 3)?,
        image: row.get(offset + 4)?,
        role,
        banned: row.get(offset + 6)?,
        ban_reason: row.get(offset + 7)?,
        ban_expires,
        created_at: to_datetime(row.get(offset + 9)?, offset + 9)?,
        updated_at: to_datetime(row.get(offset + 10)?, offset + 10)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        expires_at: to_datetime(row.get(2)?, 2)?,
        created_at: to_datetime(row.get(3)?, 3)?,
        ip_address: row.get(4)?,
        user_agent: row.get(5)?,
        user: user_from_row(row, 6)?,
    })
}

fn map_row_error(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::FromSqlConversionFailure(_, _, inner) => StoreError::Corrupt(inner.to_string()),
        other => StoreError::Database(other),
    }
}

#[async_trait]
impl IdentityProvider for SqliteIdentityStore {
    async fn get_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let token_hash = Self::hash_token(token);
        let conn = self.conn.lock();

        let sql = format!(
            "SELECT s.id, s.user_id, s.expires_at, s.created_at, s.ip_address, s.user_agent, {USER_COLUMNS}
             FROM sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token_hash = ?1"
        );
        let session = conn
            .query_row(&sql, params![token_hash], session_from_row)
            .optional()
            .map_err(map_row_error)?;

        Ok(session.filter(|s| s.expires_at > Utc::now()))
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let conn = self.conn.lock();
        Self::fetch_user(&conn, user_id).map_err(|e| match e {
            StoreError::Database(inner) => map_row_error(inner),
            other => other,
        })
    }

    async fn find_credentials(&self, email: &str) -> Result<Option<(User, String)>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {USER_COLUMNS}, u.password_hash FROM users u WHERE u.email = ?1");
        conn.query_row(&sql, params![email.trim().to_lowercase()], |row| {
            Ok((user_from_row(row, 0)?, row.get::<_, String>(11)?))
        })
        .optional()
        .map_err(map_row_error)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.email = ?1");
        conn.query_row(&sql, params![email.trim().to_lowercase()], |row| user_from_row(row, 0))
            .optional()
            .map_err(map_row_error)
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let email = new_user.email.trim().to_lowercase();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();

        let conn = self.conn.lock();

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
            params![email],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StoreError::EmailTaken(email));
        }

        conn.execute(
            "INSERT INTO users (id, name, email, email_verified, password_hash, role, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id,
                new_user.name,
                email,
                new_user.email_verified,
                new_user.password_hash,
                new_user.role.as_str(),
                now,
            ],
        )?;

        debug!("Created user {} ({})", id, new_user.role);
        Self::require_user(&conn, &id)
    }

    async fn update_user_role(&self, user_id: &str, role: Role) -> Result<User, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE users SET role = ?1, updated_at = ?2 WHERE id = ?3",
            params![role.as_str(), Utc::now().timestamp_millis(), user_id],
        )?;
        if changed == 0 {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }
        Self::require_user(&conn, user_id)
    }

    async fn update_user_name(&self, user_id: &str, name: &str) -> Result<User, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE users SET name = ?1, updated_at = ?2 WHERE id = ?3",
            params![name, Utc::now().timestamp_millis(), user_id],
        )?;
        if changed == 0 {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }
        Self::require_user(&conn, user_id)
    }

    async fn update_user_image(&self, user_id: &str, image: Option<&str>) -> Result<User, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE users SET image = ?1, updated_at = ?2 WHERE id = ?3",
            params![image, Utc::now().timestamp_millis(), user_id],
        )?;
        if changed == 0 {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }
        Self::require_user(&conn, user_id)
    }

    async fn set_user_password(&self, user_id: &str, password_hash: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
            params![password_hash, Utc::now().timestamp_millis(), user_id],
        )?;
        if changed == 0 {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }
        Ok(())
    }

    async fn ban_user(
        &self,
        user_id: &str,
        reason: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<User, StoreError> {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_BAN_REASON);

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE users SET banned = 1, ban_reason = ?1, ban_expires = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                reason,
                expires_at.map(|t| t.timestamp_millis()),
                Utc::now().timestamp_millis(),
                user_id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }

        let revoked = tx.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])?;
        tx.commit()?;

        debug!("Banned user {} ({} sessions revoked)", user_id, revoked);
        Self::require_user(&conn, user_id)
    }

    async fn unban_user(&self, user_id: &str) -> Result<User, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE users SET banned = 0, ban_reason = NULL, ban_expires = NULL, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().timestamp_millis(), user_id],
        )?;
        if changed == 0 {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }
        Self::require_user(&conn, user_id)
    }

    async fn revoke_user_sessions(&self, user_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        Self::require_user(&conn, user_id)?;
        Ok(conn.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])?)
    }

    async fn remove_user(&self, user_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])?;
        let changed = tx.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        if changed == 0 {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }
        tx.commit()?;
        Ok(())
    }

    async fn list_users(&self, query: &ListUsersQuery) -> Result<UserPage, StoreError> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut args: Vec<Value> = Vec::new();

        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            conditions.push("(instr(fold_case(u.name), ?) > 0 OR instr(fold_case(u.email), ?) > 0)");
            args.push(Value::Text(needle.clone()));
            args.push(Value::Text(needle));
        }

        if let Some(role) = query.role {
            conditions.push("u.role = ?");
            args.push(Value::Text(role.as_str().to_string()));
        }

        if let Some(banned) = query.banned {
            conditions.push("u.banned = ?");
            args.push(Value::Integer(i64::from(banned)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sort_column = match query.sort_by {
            SortBy::Name => "u.name COLLATE NOCASE",
            SortBy::CreatedAt => "u.created_at",
            SortBy::UpdatedAt => "u.updated_at",
        };
        let direction = match query.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };

        let conn = self.conn.lock();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM users u {where_clause}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users u {where_clause}
             ORDER BY {sort_column} {direction}, u.id ASC
             LIMIT ? OFFSET ?"
        );
        let mut page_args = args;
        page_args.push(Value::Integer(query.limit as i64));
        page_args.push(Value::Integer(query.offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map(params_from_iter(page_args.iter()), |row| user_from_row(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_row_error)?;

        Ok(UserPage {
            users,
            total: total as usize,
        })
    }

    async fn clear_expired_bans(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let now_ms = now.timestamp_millis();
        Ok(conn.execute(
            "UPDATE users
             SET banned = 0, ban_reason = NULL, ban_expires = NULL, updated_at = ?1
             WHERE banned = 1 AND ban_expires IS NOT NULL AND ban_expires < ?1",
            params![now_ms],
        )?)
    }

    async fn create_session(
        &self,
        user_id: &str,
        expires_at: DateTime<Utc>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<IssuedSession, StoreError> {
        let token = Self::generate_token();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let conn = self.conn.lock();
        let user = Self::require_user(&conn, user_id)?;

        conn.execute(
            "INSERT INTO sessions (id, token_hash, user_id, expires_at, created_at, ip_address, user_agent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                Self::hash_token(&token),
                user_id,
                expires_at.timestamp_millis(),
                now.timestamp_millis(),
                ip_address,
                user_agent,
            ],
        )?;

        // Round-trip through millis so the returned value matches what a later lookup yields
        let session = Session {
            id,
            user_id: user_id.to_string(),
            expires_at: to_datetime(expires_at.timestamp_millis(), 0)?,
            created_at: to_datetime(now.timestamp_millis(), 0)?,
            ip_address: ip_address.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            user,
        };

        Ok(IssuedSession { token, session })
    }

    async fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM sessions WHERE token_hash = ?1",
            params![Self::hash_token(token)],
        )?;
        Ok(())
    }

    async fn list_user_sessions(&self, user_id: &str) -> Result<Vec<SessionInfo>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, expires_at, created_at, ip_address, user_agent
             FROM sessions WHERE user_id = ?1 AND expires_at > ?2
             ORDER BY created_at DESC, id ASC",
        )?;
        let sessions = stmt
            .query_map(params![user_id, Utc::now().timestamp_millis()], |row| {
                Ok(SessionInfo {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    expires_at: to_datetime(row.get(2)?, 2)?,
                    created_at: to_datetime(row.get(3)?, 3)?,
                    ip_address: row.get(4)?,
                    user_agent: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_row_error)?;
        Ok(sessions)
    }

    async fn delete_user_session(&self, user_id: &str, session_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM sessions WHERE id = ?1 AND user_id = ?2",
            params![session_id, user_id],
        )?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_user(name: &str, email: &str, role: Role) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            role,
            email_verified: false,
        }
    }

    async fn seeded_store() -> SqliteIdentityStore {
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        store.create_user(new_user("Jane Doe", "jane@example.com", Role::Admin)).await.unwrap();
        store.create_user(new_user("Bob", "bob@janeway.io", Role::Visitor)).await.unwrap();
        store.create_user(new_user("Alice", "alice@example.com", Role::Operator)).await.unwrap();
        store.create_user(new_user("JANET", "janet@example.com", Role::Visitor)).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        let user = store
            .create_user(new_user("Jane", "Jane@Example.com", Role::Operator))
            .await
            .unwrap();

        assert_eq!(user.email, "jane@example.com");
        assert_eq!(user.role, Role::Operator);
        assert!(!user.banned);

        let fetched = store.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(fetched, user);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        store.create_user(new_user("A", "a@example.com", Role::Visitor)).await.unwrap();

        let result = store.create_user(new_user("B", "A@example.com", Role::Visitor)).await;
        assert!(matches!(result, Err(StoreError::EmailTaken(_))));
    }

    #[tokio::test]
    async fn test_session_lookup_and_expiry() {
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        let user = store.create_user(new_user("A", "a@example.com", Role::Admin)).await.unwrap();

        let live = store
            .create_session(&user.id, Utc::now() + Duration::hours(1), Some("127.0.0.1"), None)
            .await
            .unwrap();
        let resolved = store.get_session(&live.token).await.unwrap().unwrap();
        assert_eq!(resolved.user.id, user.id);
        assert_eq!(resolved.ip_address.as_deref(), Some("127.0.0.1"));

        let expired = store
            .create_session(&user.id, Utc::now() - Duration::seconds(1), None, None)
            .await
            .unwrap();
        assert!(store.get_session(&expired.token).await.unwrap().is_none());

        assert!(store.get_session("not-a-token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_reflects_current_role() {
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        let user = store.create_user(new_user("A", "a@example.com", Role::Admin)).await.unwrap();
        let issued = store
            .create_session(&user.id, Utc::now() + Duration::hours(1), None, None)
            .await
            .unwrap();

        store.update_user_role(&user.id, Role::Visitor).await.unwrap();

        let session = store.get_session(&issued.token).await.unwrap().unwrap();
        assert_eq!(session.user.role, Role::Visitor);
    }

    #[tokio::test]
    async fn test_ban_revokes_sessions() {
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        let user = store.create_user(new_user("A", "a@example.com", Role::Visitor)).await.unwrap();
        let issued = store
            .create_session(&user.id, Utc::now() + Duration::hours(1), None, None)
            .await
            .unwrap();

        let banned = store.ban_user(&user.id, None, None).await.unwrap();
        assert!(banned.banned);
        assert_eq!(banned.ban_reason.as_deref(), Some(DEFAULT_BAN_REASON));
        assert!(banned.ban_expires.is_none());

        assert!(store.get_session(&issued.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unban_clears_all_ban_fields() {
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        let user = store.create_user(new_user("A", "a@example.com", Role::Visitor)).await.unwrap();
        store
            .ban_user(&user.id, Some("spamming"), Some(Utc::now() + Duration::days(1)))
            .await
            .unwrap();

        let unbanned = store.unban_user(&user.id).await.unwrap();
        assert!(!unbanned.banned);
        assert!(unbanned.ban_reason.is_none());
        assert!(unbanned.ban_expires.is_none());
    }

    #[tokio::test]
    async fn test_clear_expired_bans_only_touches_expired() {
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        let now = Utc::now();
        let expired = store.create_user(new_user("E", "e@example.com", Role::Visitor)).await.unwrap();
        let active = store.create_user(new_user("F", "f@example.com", Role::Visitor)).await.unwrap();
        let permanent = store.create_user(new_user("P", "p@example.com", Role::Visitor)).await.unwrap();

        store.ban_user(&expired.id, Some("old"), Some(now - Duration::minutes(5))).await.unwrap();
        store.ban_user(&active.id, Some("new"), Some(now + Duration::hours(1))).await.unwrap();
        store.ban_user(&permanent.id, Some("forever"), None).await.unwrap();

        assert_eq!(store.clear_expired_bans(now).await.unwrap(), 1);
        assert_eq!(store.clear_expired_bans(now).await.unwrap(), 0);

        let expired = store.get_user(&expired.id).await.unwrap().unwrap();
        assert!(!expired.banned);
        assert!(expired.ban_reason.is_none());
        assert!(expired.ban_expires.is_none());

        assert!(store.get_user(&active.id).await.unwrap().unwrap().banned);
        assert!(store.get_user(&permanent.id).await.unwrap().unwrap().banned);
    }

    #[tokio::test]
    async fn test_list_users_search_is_case_insensitive() {
        let store = seeded_store().await;
        let page = store
            .list_users(&ListUsersQuery {
                search: Some("jane".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        // "Jane Doe" by name, "bob@janeway.io" by email, "JANET" by name
        assert_eq!(page.total, 3);
        for user in &page.users {
            assert!(
                user.name.to_lowercase().contains("jane") || user.email.contains("jane"),
                "unexpected match: {}",
                user.name
            );
        }
    }

    #[tokio::test]
    async fn test_list_users_search_folds_non_ascii() {
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        store
            .create_user(new_user("ÉLODIE Martin", "elodie@example.com", Role::Visitor))
            .await
            .unwrap();
        store
            .create_user(new_user("Ömer", "omer@example.com", Role::Visitor))
            .await
            .unwrap();

        let page = store
            .list_users(&ListUsersQuery {
                search: Some("élodie".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.users[0].name, "ÉLODIE Martin");

        let page = store
            .list_users(&ListUsersQuery {
                search: Some("ÖMER".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn test_list_users_search_and_role_intersection() {
        let store = seeded_store().await;
        let page = store
            .list_users(&ListUsersQuery {
                search: Some("jane".to_string()),
                role: Some(Role::Admin),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(page.total, 1);
        assert_eq!(page.users[0].name, "Jane Doe");
    }

    #[tokio::test]
    async fn test_list_users_total_ignores_pagination() {
        let store = seeded_store().await;
        let page = store
            .list_users(&ListUsersQuery {
                limit: 2,
                offset: 0,
                sort_by: SortBy::Name,
                sort_order: SortOrder::Asc,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(page.total, 4);
        assert_eq!(page.users.len(), 2);
        assert_eq!(page.users[0].name, "Alice");
        assert_eq!(page.users[1].name, "Bob");

        let next = store
            .list_users(&ListUsersQuery {
                limit: 2,
                offset: 2,
                sort_by: SortBy::Name,
                sort_order: SortOrder::Asc,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(next.users[0].name, "Jane Doe");
        assert_eq!(next.users[1].name, "JANET");
    }

    #[tokio::test]
    async fn test_list_users_banned_filter() {
        let store = seeded_store().await;
        let bob = store.find_user_by_email("bob@janeway.io").await.unwrap().unwrap();
        store.ban_user(&bob.id, Some("spam"), None).await.unwrap();

        let page = store
            .list_users(&ListUsersQuery {
                banned: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.users[0].id, bob.id);

        let page = store
            .list_users(&ListUsersQuery {
                banned: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
    }

    #[tokio::test]
    async fn test_update_user_image() {
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        let user = store.create_user(new_user("A", "a@example.com", Role::Visitor)).await.unwrap();

        let updated = store
            .update_user_image(&user.id, Some("https://cdn.example.com/a.png"))
            .await
            .unwrap();
        assert_eq!(updated.image.as_deref(), Some("https://cdn.example.com/a.png"));

        let cleared = store.update_user_image(&user.id, None).await.unwrap();
        assert!(cleared.image.is_none());

        assert!(matches!(
            store.update_user_image("missing", None).await,
            Err(StoreError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_user_sessions_are_scoped_to_owner() {
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        let a = store.create_user(new_user("A", "a@example.com", Role::Visitor)).await.unwrap();
        let b = store.create_user(new_user("B", "b@example.com", Role::Visitor)).await.unwrap();
        let later = Utc::now() + Duration::hours(1);

        let first = store.create_session(&a.id, later, None, Some("Firefox")).await.unwrap();
        store.create_session(&a.id, later, None, None).await.unwrap();
        store
            .create_session(&a.id, Utc::now() - Duration::seconds(1), None, None)
            .await
            .unwrap();
        let other = store.create_session(&b.id, later, None, None).await.unwrap();

        let sessions = store.list_user_sessions(&a.id).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|s| s.user_id == a.id));

        // Another user's session id is not ours to delete
        assert!(!store.delete_user_session(&a.id, &other.session.id).await.unwrap());
        assert!(store.get_session(&other.token).await.unwrap().is_some());

        assert!(store.delete_user_session(&a.id, &first.session.id).await.unwrap());
        assert!(store.get_session(&first.token).await.unwrap().is_none());
        assert_eq!(store.list_user_sessions(&a.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_user_missing() {
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        let result = store.remove_user("nope").await;
        assert!(matches!(result, Err(StoreError::UserNotFound(_))));
    }

    #[tokio::test]
    async fn test_find_credentials_returns_hash() {
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        store.create_user(new_user("A", "a@example.com", Role::Visitor)).await.unwrap();

        let (user, hash) = store.find_credentials(" A@example.com ").await.unwrap().unwrap();
        assert_eq!(user.email, "a@example.com");
        assert_eq!(hash, "hash");
    }
}
