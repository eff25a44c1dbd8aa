//! Room record store.
//!
//! Persistent metadata for rooms (title, occupancy limit, creation time)
//! in SQLite via SQLx. Records are provisioned lazily by the HTTP
//! collaborator; the WebSocket handshake only ever reads. The coordinator
//! never deletes a room.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// A room metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRecord {
    /// Opaque room identifier.
    pub room_id: String,
    /// Display title.
    pub title: String,
    /// Occupancy limit enforced at admission.
    pub max_users: u32,
    /// Unix seconds of record creation.
    #[allow(dead_code)] // Stored for the record; only tests read it back
    pub created_at: i64,
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a new database connection, ensuring the schema exists.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let options = if path == ":memory:" {
            // In-memory database: shared cache so every pooled connection
            // sees the same schema.
            SqliteConnectOptions::new()
                .filename("file::memory:")
                .shared_cache(true)
                .create_if_missing(true)
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rooms (
                room_id    TEXT PRIMARY KEY,
                title      TEXT NOT NULL,
                max_users  INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        info!(path = %path, "Room database ready");
        Ok(Self { pool })
    }

    /// Find a room by id.
    pub async fn find_room(&self, room_id: &str) -> Result<Option<RoomRecord>, DbError> {
        let row = sqlx::query_as::<_, (String, String, i64, i64)>(
            r#"
            SELECT room_id, title, max_users, created_at
            FROM rooms
            WHERE room_id = ?
            "#,
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(room_id, title, max_users, created_at)| RoomRecord {
            room_id,
            title,
            max_users: max_users.max(0) as u32,
            created_at,
        }))
    }

    /// Fetch a room, provisioning the record on first reference. Returns
    /// the record and whether this call created it.
    pub async fn get_or_create_room(
        &self,
        room_id: &str,
        default_max_users: u32,
    ) -> Result<(RoomRecord, bool), DbError> {
        if let Some(existing) = self.find_room(room_id).await? {
            return Ok((existing, false));
        }

        let record = RoomRecord {
            room_id: room_id.to_string(),
            title: format!("Room {room_id}"),
            max_users: default_max_users,
            created_at: chrono::Utc::now().timestamp(),
        };

        // A concurrent creator may win the insert; treat that as "found".
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO rooms (room_id, title, max_users, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&record.room_id)
        .bind(&record.title)
        .bind(record.max_users as i64)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            if let Some(existing) = self.find_room(room_id).await? {
                return Ok((existing, false));
            }
        }
        Ok((record, inserted > 0))
    }
}
