//! Received-key snapshots backed by the `peer_key_snapshot` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres};
use uuid::Uuid;

use sealpost_core::{
    new_v7, Error, NewPeerKeySnapshot, PeerKeyRepository, PeerKeySnapshot, Result, SnapshotKey,
};

#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    id: Uuid,
    holder_id: Uuid,
    peer_id: Uuid,
    peer_email: String,
    key_id: String,
    public_key: String,
    expire_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<SnapshotRow> for PeerKeySnapshot {
    fn from(row: SnapshotRow) -> Self {
        PeerKeySnapshot {
            id: row.id,
            holder_id: row.holder_id,
            peer_id: row.peer_id,
            peer_email: row.peer_email,
            key_id: row.key_id,
            public_key: row.public_key,
            expire_at: row.expire_at,
            created_at: row.created_at,
        }
    }
}

/// Insert-if-absent on an open connection or transaction.
///
/// Snapshots are never updated: on conflict the stored row is returned as is.
pub(crate) async fn insert_snapshot_if_absent(
    conn: &mut PgConnection,
    snapshot: &NewPeerKeySnapshot,
) -> Result<PeerKeySnapshot> {
    let inserted = sqlx::query_as::<_, SnapshotRow>(
        r#"
        INSERT INTO peer_key_snapshot (id, holder_id, peer_id, peer_email, key_id, public_key, expire_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (holder_id, peer_id, key_id) DO NOTHING
        RETURNING id, holder_id, peer_id, peer_email, key_id, public_key, expire_at, created_at
        "#,
    )
    .bind(new_v7())
    .bind(snapshot.holder_id)
    .bind(snapshot.peer_id)
    .bind(&snapshot.peer_email)
    .bind(&snapshot.key_id)
    .bind(&snapshot.public_key)
    .bind(snapshot.expire_at)
    .fetch_optional(&mut *conn)
    .await
    .map_err(Error::Database)?;

    if let Some(row) = inserted {
        return Ok(row.into());
    }

    let existing = find_snapshot(conn, &snapshot.key()).await?;
    existing.ok_or_else(|| {
        Error::Internal(format!(
            "Snapshot {} vanished after insert conflict",
            snapshot.key_id
        ))
    })
}

pub(crate) async fn find_snapshot(
    conn: &mut PgConnection,
    key: &SnapshotKey,
) -> Result<Option<PeerKeySnapshot>> {
    let row = sqlx::query_as::<_, SnapshotRow>(
        r#"
        SELECT id, holder_id, peer_id, peer_email, key_id, public_key, expire_at, created_at
        FROM peer_key_snapshot
        WHERE holder_id = $1 AND peer_id = $2 AND key_id = $3
        "#,
    )
    .bind(key.holder_id)
    .bind(key.peer_id)
    .bind(&key.key_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(Error::Database)?;

    Ok(row.map(Into::into))
}

/// PostgreSQL implementation of PeerKeyRepository.
#[derive(Clone)]
pub struct PgPeerKeyRepository {
    pool: Pool<Postgres>,
}

impl PgPeerKeyRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PeerKeyRepository for PgPeerKeyRepository {
    async fn insert_snapshot_if_absent(
        &self,
        snapshot: NewPeerKeySnapshot,
    ) -> Result<PeerKeySnapshot> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        insert_snapshot_if_absent(&mut conn, &snapshot).await
    }

    async fn get_snapshot(&self, key: &SnapshotKey) -> Result<Option<PeerKeySnapshot>> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        find_snapshot(&mut conn, key).await
    }

    async fn get_snapshot_by_id(&self, id: Uuid) -> Result<Option<PeerKeySnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, holder_id, peer_id, peer_email, key_id, public_key, expire_at, created_at
            FROM peer_key_snapshot
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Into::into))
    }

    async fn find_snapshot_by_key_id(
        &self,
        holder_id: Uuid,
        key_id: &str,
    ) -> Result<Option<PeerKeySnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, holder_id, peer_id, peer_email, key_id, public_key, expire_at, created_at
            FROM peer_key_snapshot
            WHERE holder_id = $1 AND key_id = $2
            ORDER BY created_at, id
            LIMIT 1
            "#,
        )
        .bind(holder_id)
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Into::into))
    }

    async fn list_snapshots(&self, holder_id: Uuid) -> Result<Vec<PeerKeySnapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, holder_id, peer_id, peer_email, key_id, public_key, expire_at, created_at
            FROM peer_key_snapshot
            WHERE holder_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(holder_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_snapshots(&self, holder_id: Uuid, key_id: &str) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM peer_key_snapshot WHERE holder_id = $1 AND key_id = $2")
                .bind(holder_id)
                .bind(key_id)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }
}
