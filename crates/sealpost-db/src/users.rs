//! Identity lookup backed by the `app_user` table.

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use sealpost_core::{new_v7, Error, Result, UserDirectory, UserIdentity};

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    first_name: String,
    last_name: String,
}

impl From<UserRow> for UserIdentity {
    fn from(row: UserRow) -> Self {
        UserIdentity {
            id: row.id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
        }
    }
}

/// PostgreSQL implementation of UserDirectory.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: Pool<Postgres>,
}

impl PgUserRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Register a user. Fails with `InvalidParameter` if the email is taken.
    pub async fn create_user(
        &self,
        email: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<UserIdentity> {
        let email = email.trim();
        if email.is_empty() {
            return Err(Error::InvalidParameter("Email must not be empty".to_string()));
        }

        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO app_user (id, email, first_name, last_name)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, first_name, last_name
            "#,
        )
        .bind(new_v7())
        .bind(email)
        .bind(first_name)
        .bind(last_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("app_user_email_lower_key") {
                    return Error::InvalidParameter(format!(
                        "User with email {} already exists",
                        email
                    ));
                }
            }
            Error::Database(e)
        })?;

        Ok(row.into())
    }
}

#[async_trait]
impl UserDirectory for PgUserRepository {
    async fn get_user(&self, id: Uuid) -> Result<Option<UserIdentity>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, first_name, last_name FROM app_user WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Into::into))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserIdentity>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, first_name, last_name FROM app_user WHERE lower(email) = lower($1)",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Into::into))
    }
}
