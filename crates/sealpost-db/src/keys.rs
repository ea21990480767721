//! Key repository backed by the `pgp_key` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use tracing::debug;
use uuid::Uuid;

use sealpost_core::{
    new_v7, AsymmetricKey, Capabilities, Error, KeyAlgorithm, KeyRepository, NewKey, Result,
};

/// Partial unique index allowing one default key per user.
const ONE_DEFAULT_INDEX: &str = "pgp_key_one_default_per_user";
const KEY_ID_UNIQUE: &str = "pgp_key_key_id_key";

#[derive(Debug, sqlx::FromRow)]
struct KeyRow {
    id: Uuid,
    user_id: Uuid,
    key_id: String,
    algorithm: String,
    key_size: i32,
    private_key: String,
    public_key: String,
    can_encrypt: bool,
    can_sign: bool,
    passphrase_hash: String,
    comment: Option<String>,
    expire_at: DateTime<Utc>,
    is_default: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<KeyRow> for AsymmetricKey {
    type Error = Error;

    fn try_from(row: KeyRow) -> Result<Self> {
        let algorithm: KeyAlgorithm = row.algorithm.parse().map_err(Error::Internal)?;
        let key_size = u32::try_from(row.key_size)
            .map_err(|_| Error::Internal(format!("Invalid stored key size {}", row.key_size)))?;
        Ok(AsymmetricKey {
            id: row.id,
            user_id: row.user_id,
            key_id: row.key_id,
            algorithm,
            key_size,
            private_key: row.private_key,
            public_key: row.public_key,
            capabilities: Capabilities {
                encrypt: row.can_encrypt,
                sign: row.can_sign,
            },
            passphrase_hash: row.passphrase_hash,
            comment: row.comment,
            expire_at: row.expire_at,
            is_default: row.is_default,
            created_at: row.created_at,
        })
    }
}

fn violates(e: &sqlx::Error, constraint: &str) -> bool {
    if let sqlx::Error::Database(ref db_err) = e {
        return db_err.constraint() == Some(constraint);
    }
    false
}

/// PostgreSQL implementation of KeyRepository.
#[derive(Clone)]
pub struct PgKeyRepository {
    pool: Pool<Postgres>,
}

impl PgKeyRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert, letting the row become default only when `may_be_default` is
    /// set and the user has no other key.
    async fn insert_row(
        &self,
        key: &NewKey,
        may_be_default: bool,
    ) -> std::result::Result<KeyRow, sqlx::Error> {
        sqlx::query_as::<_, KeyRow>(
            r#"
            INSERT INTO pgp_key (
                id, user_id, key_id, algorithm, key_size, private_key, public_key,
                can_encrypt, can_sign, passphrase_hash, comment, expire_at, is_default
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                $13 AND NOT EXISTS (SELECT 1 FROM pgp_key WHERE user_id = $2)
            )
            RETURNING id, user_id, key_id, algorithm, key_size, private_key, public_key,
                      can_encrypt, can_sign, passphrase_hash, comment, expire_at,
                      is_default, created_at
            "#,
        )
        .bind(new_v7())
        .bind(key.user_id)
        .bind(&key.key_id)
        .bind(key.algorithm.to_string())
        .bind(key.key_size as i32)
        .bind(&key.private_key)
        .bind(&key.public_key)
        .bind(key.capabilities.encrypt)
        .bind(key.capabilities.sign)
        .bind(&key.passphrase_hash)
        .bind(&key.comment)
        .bind(key.expire_at)
        .bind(may_be_default)
        .fetch_one(&self.pool)
        .await
    }
}

#[async_trait]
impl KeyRepository for PgKeyRepository {
    async fn insert_key(&self, key: NewKey) -> Result<AsymmetricKey> {
        let row = match self.insert_row(&key, true).await {
            Ok(row) => row,
            // A concurrent first insert won the default slot.
            Err(e) if violates(&e, ONE_DEFAULT_INDEX) => {
                debug!(
                    subsystem = "database",
                    component = "keys",
                    op = "insert",
                    user_id = %key.user_id,
                    "Lost default race, inserting as non-default"
                );
                self.insert_row(&key, false).await.map_err(Error::Database)?
            }
            Err(e) if violates(&e, KEY_ID_UNIQUE) => {
                return Err(Error::InvalidParameter(format!(
                    "Key {} already exists",
                    key.key_id
                )));
            }
            Err(e) => return Err(Error::Database(e)),
        };

        row.try_into()
    }

    async fn get_key(&self, user_id: Uuid, key_id: &str) -> Result<Option<AsymmetricKey>> {
        let row = sqlx::query_as::<_, KeyRow>(
            r#"
            SELECT id, user_id, key_id, algorithm, key_size, private_key, public_key,
                   can_encrypt, can_sign, passphrase_hash, comment, expire_at,
                   is_default, created_at
            FROM pgp_key
            WHERE user_id = $1 AND key_id = $2
            "#,
        )
        .bind(user_id)
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(AsymmetricKey::try_from).transpose()
    }

    async fn get_default_key(&self, user_id: Uuid) -> Result<Option<AsymmetricKey>> {
        let row = sqlx::query_as::<_, KeyRow>(
            r#"
            SELECT id, user_id, key_id, algorithm, key_size, private_key, public_key,
                   can_encrypt, can_sign, passphrase_hash, comment, expire_at,
                   is_default, created_at
            FROM pgp_key
            WHERE user_id = $1 AND is_default
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(AsymmetricKey::try_from).transpose()
    }

    async fn list_keys(&self, user_id: Uuid) -> Result<Vec<AsymmetricKey>> {
        let rows = sqlx::query_as::<_, KeyRow>(
            r#"
            SELECT id, user_id, key_id, algorithm, key_size, private_key, public_key,
                   can_encrypt, can_sign, passphrase_hash, comment, expire_at,
                   is_default, created_at
            FROM pgp_key
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(AsymmetricKey::try_from).collect()
    }

    async fn delete_key(&self, user_id: Uuid, key_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pgp_key WHERE user_id = $1 AND key_id = $2")
            .bind(user_id)
            .bind(key_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_default_key(&self, user_id: Uuid, key_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let exists: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM pgp_key WHERE user_id = $1 AND key_id = $2 FOR UPDATE")
                .bind(user_id)
                .bind(key_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::Database)?;

        if exists.is_none() {
            return Ok(false);
        }

        // Clear first so the partial unique index never sees two defaults.
        sqlx::query("UPDATE pgp_key SET is_default = FALSE WHERE user_id = $1 AND is_default")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        sqlx::query("UPDATE pgp_key SET is_default = TRUE WHERE user_id = $1 AND key_id = $2")
            .bind(user_id)
            .bind(key_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(true)
    }
}
