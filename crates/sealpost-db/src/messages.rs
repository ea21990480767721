//! Mail copies and their key bindings.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres};
use tracing::info;
use uuid::Uuid;

use sealpost_core::{
    new_v7, BindingRepository, DeliveryPlan, DeliveryReceipt, Error, MailMessage, MailStore,
    MessageKeyBinding, NewMessage, PlannedBinding, Result, SecurityMode, SnapshotKey,
};

use crate::peer_keys::{find_snapshot, insert_snapshot_if_absent};

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    delivery_id: Uuid,
    owner_id: Uuid,
    sender_id: Uuid,
    sender_email: String,
    recipients: Vec<String>,
    subject: String,
    body: String,
    encrypted: bool,
    signed: bool,
    read: bool,
    archived: bool,
    created_at: DateTime<Utc>,
}

impl From<MessageRow> for MailMessage {
    fn from(row: MessageRow) -> Self {
        MailMessage {
            id: row.id,
            delivery_id: row.delivery_id,
            owner_id: row.owner_id,
            sender_id: row.sender_id,
            sender_email: row.sender_email,
            recipients: row.recipients,
            subject: row.subject,
            body: row.body,
            mode: SecurityMode::from_flags(row.encrypted, row.signed),
            read: row.read,
            archived: row.archived,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BindingRow {
    message_id: Uuid,
    recipient_snapshot_id: Option<Uuid>,
    recipient_key_id: Option<String>,
    sender_snapshot_id: Option<Uuid>,
    sender_key_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<BindingRow> for MessageKeyBinding {
    fn from(row: BindingRow) -> Self {
        MessageKeyBinding {
            message_id: row.message_id,
            recipient_snapshot_id: row.recipient_snapshot_id,
            recipient_key_id: row.recipient_key_id,
            sender_snapshot_id: row.sender_snapshot_id,
            sender_key_id: row.sender_key_id,
            created_at: row.created_at,
        }
    }
}

/// PostgreSQL implementation of MailStore and BindingRepository.
#[derive(Clone)]
pub struct PgMailRepository {
    pool: Pool<Postgres>,
}

impl PgMailRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

async fn insert_message(
    conn: &mut PgConnection,
    id: Uuid,
    delivery_id: Uuid,
    m: &NewMessage,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO mail_message (
            id, delivery_id, owner_id, sender_id, sender_email, recipients,
            subject, body, encrypted, signed, read
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(id)
    .bind(delivery_id)
    .bind(m.owner_id)
    .bind(m.sender_id)
    .bind(&m.sender_email)
    .bind(&m.recipients)
    .bind(&m.subject)
    .bind(&m.body)
    .bind(m.mode.is_encrypted())
    .bind(m.mode.is_signed())
    .bind(m.read)
    .execute(&mut *conn)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

/// Snapshot id for a planned reference, preferring ones written by this
/// delivery. A reference to nothing is a broken plan.
async fn resolve_snapshot(
    conn: &mut PgConnection,
    written: &HashMap<SnapshotKey, Uuid>,
    key: &SnapshotKey,
) -> Result<Uuid> {
    if let Some(id) = written.get(key) {
        return Ok(*id);
    }
    find_snapshot(conn, key)
        .await?
        .map(|s| s.id)
        .ok_or_else(|| {
            Error::Internal(format!(
                "Binding references unknown snapshot {}",
                key.key_id
            ))
        })
}

async fn insert_binding(
    conn: &mut PgConnection,
    written: &HashMap<SnapshotKey, Uuid>,
    message_id: Uuid,
    planned: &PlannedBinding,
) -> Result<MessageKeyBinding> {
    let recipient_snapshot_id = match &planned.recipient_key {
        Some(key) => Some(resolve_snapshot(conn, written, key).await?),
        None => None,
    };
    let sender_snapshot_id = match &planned.sender_key {
        Some(key) => Some(resolve_snapshot(conn, written, key).await?),
        None => None,
    };

    let row = sqlx::query_as::<_, BindingRow>(
        r#"
        INSERT INTO message_key_binding (
            message_id, recipient_snapshot_id, recipient_key_id, sender_snapshot_id, sender_key_id
        )
        VALUES ($1, $2, $3, $4, $5)
        RETURNING message_id, recipient_snapshot_id, recipient_key_id,
                  sender_snapshot_id, sender_key_id, created_at
        "#,
    )
    .bind(message_id)
    .bind(recipient_snapshot_id)
    .bind(planned.recipient_key.as_ref().map(|k| k.key_id.as_str()))
    .bind(sender_snapshot_id)
    .bind(planned.sender_key.as_ref().map(|k| k.key_id.as_str()))
    .fetch_one(&mut *conn)
    .await
    .map_err(Error::Database)?;

    Ok(row.into())
}

#[async_trait]
impl MailStore for PgMailRepository {
    async fn get_message(&self, owner_id: Uuid, id: Uuid) -> Result<Option<MailMessage>> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, delivery_id, owner_id, sender_id, sender_email, recipients,
                   subject, body, encrypted, signed, read, archived, created_at
            FROM mail_message
            WHERE owner_id = $1 AND id = $2
            "#,
        )
        .bind(owner_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Into::into))
    }

    async fn list_messages(&self, owner_id: Uuid) -> Result<Vec<MailMessage>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, delivery_id, owner_id, sender_id, sender_email, recipients,
                   subject, body, encrypted, signed, read, archived, created_at
            FROM mail_message
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_message(&self, owner_id: Uuid, id: Uuid) -> Result<bool> {
        // message_key_binding rows go with it (ON DELETE CASCADE).
        let result = sqlx::query("DELETE FROM mail_message WHERE owner_id = $1 AND id = $2")
            .bind(owner_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit_delivery(&self, plan: DeliveryPlan) -> Result<DeliveryReceipt> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let mut written = HashMap::with_capacity(plan.snapshots.len());
        for snapshot in &plan.snapshots {
            let stored = insert_snapshot_if_absent(&mut tx, snapshot).await?;
            written.insert(stored.key(), stored.id);
        }

        let mut message_ids = Vec::with_capacity(plan.copies.len());
        let mut bindings = Vec::new();
        for copy in &plan.copies {
            let id = new_v7();
            insert_message(&mut tx, id, plan.delivery_id, &copy.message).await?;
            if let Some(planned) = &copy.binding {
                bindings.push(insert_binding(&mut tx, &written, id, planned).await?);
            }
            message_ids.push(id);
        }

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "database",
            component = "messages",
            op = "commit_delivery",
            delivery_id = %plan.delivery_id,
            snapshot_count = plan.snapshots.len(),
            result_count = message_ids.len(),
            binding_count = bindings.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Delivery committed"
        );

        Ok(DeliveryReceipt {
            delivery_id: plan.delivery_id,
            message_ids,
            bindings,
        })
    }
}

#[async_trait]
impl BindingRepository for PgMailRepository {
    async fn get_binding(&self, message_id: Uuid) -> Result<Option<MessageKeyBinding>> {
        let row = sqlx::query_as::<_, BindingRow>(
            r#"
            SELECT message_id, recipient_snapshot_id, recipient_key_id,
                   sender_snapshot_id, sender_key_id, created_at
            FROM message_key_binding
            WHERE message_id = $1
            "#,
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Into::into))
    }
}
