use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::MessagePayload;
use crate::{ApiError, ApiResult, auth::UserIdentity, db};

/// A durable message. Immutable once appended except for `read_by`, which
/// only grows. `created_at` (unix ms) is the authoritative ordering key;
/// `seq` is the insertion sequence that breaks timestamp ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub seq: i64,
    pub group_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_url: Option<String>,
    #[serde(default)]
    pub read_by: Vec<Uuid>,
    pub created_at: i64,
}

type MessageRow = (
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    Option<String>,
);

const MESSAGE_COLUMNS: &str = "m.seq, m.id, m.group_id, m.sender_id, m.sender_name,
     m.text, m.image_url, m.voice_url, m.created_at,
     (SELECT group_concat(user_id) FROM message_reads r WHERE r.message_id = m.id)";

fn from_row(row: MessageRow) -> ApiResult<Message> {
    let (seq, id, group_id, sender_id, sender_name, text, image_url, voice_url, created_at, reads) =
        row;
    let mut read_by = Vec::new();
    if let Some(reads) = reads {
        for raw in reads.split(',') {
            read_by.push(parse_uuid(raw)?);
        }
    }
    Ok(Message {
        id: parse_uuid(&id)?,
        seq,
        group_id: parse_uuid(&group_id)?,
        sender_id: parse_uuid(&sender_id)?,
        sender_name,
        text,
        image_url,
        voice_url,
        read_by,
        created_at,
    })
}

/// Durable, time-ordered message log, one logical stream per group.
#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends a message, assigning id, timestamp, and sequence. This is
    /// the pipeline's durability point.
    pub async fn append(
        &self,
        group_id: Uuid,
        sender: &UserIdentity,
        payload: &MessagePayload,
    ) -> ApiResult<Message> {
        self.append_at(group_id, sender, payload, db::now_millis())
            .await
    }

    async fn append_at(
        &self,
        group_id: Uuid,
        sender: &UserIdentity,
        payload: &MessagePayload,
        created_at: i64,
    ) -> ApiResult<Message> {
        let id = Uuid::now_v7();
        let result = sqlx::query(
            "INSERT INTO messages
                (id, group_id, sender_id, sender_name, text, image_url, voice_url, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(group_id.to_string())
        .bind(sender.id.to_string())
        .bind(&sender.name)
        .bind(payload.text.as_deref())
        .bind(payload.image_url.as_deref())
        .bind(payload.voice_url.as_deref())
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(Message {
            id,
            seq: result.last_insert_rowid(),
            group_id,
            sender_id: sender.id,
            sender_name: sender.name.clone(),
            text: payload.text.clone(),
            image_url: payload.image_url.clone(),
            voice_url: payload.voice_url.clone(),
            read_by: Vec::new(),
            created_at,
        })
    }

    pub async fn get(&self, id: Uuid) -> ApiResult<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(from_row).transpose()
    }

    /// The most recent `limit` messages by `(created_at, seq)`, returned
    /// oldest→newest.
    pub async fn list_recent(&self, group_id: Uuid, limit: u32) -> ApiResult<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m
             WHERE m.group_id = ?
             ORDER BY m.created_at DESC, m.seq DESC
             LIMIT ?"
        ))
        .bind(group_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows.into_iter().rev() {
            messages.push(from_row(row)?);
        }
        Ok(messages)
    }

    /// Idempotent, monotonic read-set add. `NotFound` if the message does
    /// not exist.
    pub async fn add_reader(&self, id: Uuid, user_id: Uuid) -> ApiResult<()> {
        let exists: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM messages WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(ApiError::NotFound("message"));
        }
        sqlx::query(
            "INSERT INTO message_reads (message_id, user_id) VALUES (?, ?)
             ON CONFLICT (message_id, user_id) DO NOTHING",
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Hard removal of the message and its read-set. The group's
    /// lastMessage pointer is left alone; readers tolerate a dangling
    /// pointer.
    pub async fn delete(&self, id: Uuid) -> ApiResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM message_reads WHERE message_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn parse_uuid(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|err| ApiError::Internal(anyhow::Error::from(err)))
}
