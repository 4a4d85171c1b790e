use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    fn parse(raw: &str) -> ApiResult<Self> {
        match raw {
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            other => Err(ApiError::Internal(anyhow::anyhow!(
                "unknown role in store: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Member {
    pub user_id: Uuid,
    pub role: Role,
}

/// Durable group record. The owner is always a member and always an admin;
/// a group never exists without its owner in the member set.
#[derive(Debug, Clone, Serialize)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub last_message_id: Option<Uuid>,
    pub members: Vec<Member>,
}

impl Group {
    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    pub fn is_admin(&self, user_id: Uuid) -> bool {
        self.members
            .iter()
            .any(|m| m.user_id == user_id && m.role == Role::Admin)
    }
}

/// Durable store of groups, owners, members, and the lastMessage pointer.
#[derive(Clone)]
pub struct GroupStore {
    pool: SqlitePool,
}

impl GroupStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the group with `owner` as its initial admin member, in one
    /// transaction.
    pub async fn create(&self, owner_id: Uuid, name: &str) -> ApiResult<Group> {
        let id = Uuid::now_v7();
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO groups (id, name, owner_id) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(name)
            .bind(owner_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO group_members (group_id, user_id, role) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(owner_id.to_string())
            .bind(Role::Admin.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Group {
            id,
            name: name.to_string(),
            owner_id,
            last_message_id: None,
            members: vec![Member {
                user_id: owner_id,
                role: Role::Admin,
            }],
        })
    }

    pub async fn get(&self, id: Uuid) -> ApiResult<Option<Group>> {
        let Some((name, owner_id, last_message_id)): Option<(String, String, Option<String>)> =
            sqlx::query_as("SELECT name, owner_id, last_message_id FROM groups WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT user_id, role FROM group_members WHERE group_id = ?")
                .bind(id.to_string())
                .fetch_all(&self.pool)
                .await?;
        let mut members = Vec::with_capacity(rows.len());
        for (user_id, role) in rows {
            members.push(Member {
                user_id: parse_uuid(&user_id)?,
                role: Role::parse(&role)?,
            });
        }

        Ok(Some(Group {
            id,
            name,
            owner_id: parse_uuid(&owner_id)?,
            last_message_id: match last_message_id {
                Some(raw) => Some(parse_uuid(&raw)?),
                None => None,
            },
            members,
        }))
    }

    /// Ids and names of every group `user_id` belongs to, with the pointer
    /// for preview resolution.
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
    ) -> ApiResult<Vec<(Uuid, String, Uuid, Option<Uuid>)>> {
        let rows: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
            "SELECT g.id, g.name, g.owner_id, g.last_message_id
             FROM groups g
             JOIN group_members gm ON gm.group_id = g.id
             WHERE gm.user_id = ?
             ORDER BY g.id",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, name, owner_id, last_message_id) in rows {
            out.push((
                parse_uuid(&id)?,
                name,
                parse_uuid(&owner_id)?,
                match last_message_id {
                    Some(raw) => Some(parse_uuid(&raw)?),
                    None => None,
                },
            ));
        }
        Ok(out)
    }

    /// Returns false if the user was already a member.
    pub async fn add_member(&self, group_id: Uuid, user_id: Uuid) -> ApiResult<bool> {
        let result = sqlx::query(
            "INSERT INTO group_members (group_id, user_id, role) VALUES (?, ?, ?)
             ON CONFLICT (group_id, user_id) DO NOTHING",
        )
        .bind(group_id.to_string())
        .bind(user_id.to_string())
        .bind(Role::Member.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns false if the user was not a member.
    pub async fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> ApiResult<bool> {
        let result = sqlx::query("DELETE FROM group_members WHERE group_id = ? AND user_id = ?")
            .bind(group_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns false if the user is not a member of the group.
    pub async fn set_role(&self, group_id: Uuid, user_id: Uuid, role: Role) -> ApiResult<bool> {
        let result = sqlx::query(
            "UPDATE group_members SET role = ? WHERE group_id = ? AND user_id = ?",
        )
        .bind(role.as_str())
        .bind(group_id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, group_id: Uuid) -> ApiResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM group_members WHERE group_id = ?")
            .bind(group_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM groups WHERE id = ?")
            .bind(group_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Conditionally advances the group's lastMessage pointer to the
    /// candidate message.
    ///
    /// One atomic UPDATE, never a read-modify-write of a fetched group row:
    /// the pointer moves only if it is currently unset, dangling (its
    /// message was deleted), or strictly older than the candidate by
    /// `(created_at, seq)`. Two sends racing through the pipeline therefore
    /// converge on the newest message no matter which one's update lands
    /// first. Returns whether the pointer moved; losing means a newer
    /// message already holds it, which is the converged state.
    pub async fn cas_last_message(
        &self,
        group_id: Uuid,
        message_id: Uuid,
        created_at: i64,
        seq: i64,
    ) -> ApiResult<bool> {
        let result = sqlx::query(
            "UPDATE groups SET last_message_id = ?
             WHERE id = ?
               AND (last_message_id IS NULL
                    OR NOT EXISTS (SELECT 1 FROM messages m WHERE m.id = groups.last_message_id)
                    OR EXISTS (SELECT 1 FROM messages m
                               WHERE m.id = groups.last_message_id
                                 AND (m.created_at < ? OR (m.created_at = ? AND m.seq < ?))))",
        )
        .bind(message_id.to_string())
        .bind(group_id.to_string())
        .bind(created_at)
        .bind(created_at)
        .bind(seq)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn parse_uuid(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|err| ApiError::Internal(anyhow::Error::from(err)))
}
