//! # sealpost-db
//!
//! Storage for sealpost.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL repositories for users, keys, peer key snapshots, mail and bindings
//! - A transactional `commit_delivery` so a send is all-or-nothing
//! - [`InMemoryStore`], implementing the same traits without a database
//!
//! ## Example
//!
//! ```rust,ignore
//! use sealpost_db::{Database, KeyRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/sealpost").await?;
//!     db.migrate().await?;
//!
//!     let user = db.users.create_user("alice@example.com", "Alice", "Liddell").await?;
//!     for key in db.list_keys(user.id).await? {
//!         println!("{}", key.key_id);
//!     }
//!     Ok(())
//! }
//! ```
pub mod keys;
pub mod memory;
pub mod messages;
pub mod peer_keys;
pub mod pool;
pub mod users;

// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

use async_trait::async_trait;
use uuid::Uuid;

// Re-export core types
pub use sealpost_core::*;

pub use keys::PgKeyRepository;
pub use memory::InMemoryStore;
pub use messages::PgMailRepository;
pub use peer_keys::PgPeerKeyRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use users::PgUserRepository;

/// Combined database context with all repositories.
///
/// Implements every store trait by delegation, so a `Database` is a
/// [`SecureStore`] and can be handed to the services directly.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Identity lookup.
    pub users: PgUserRepository,
    /// The user's own key pairs.
    pub keys: PgKeyRepository,
    /// Public keys received from correspondents.
    pub peer_keys: PgPeerKeyRepository,
    /// Mail copies and their key bindings.
    pub mail: PgMailRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            users: PgUserRepository::new(pool.clone()),
            keys: PgKeyRepository::new(pool.clone()),
            peer_keys: PgPeerKeyRepository::new(pool.clone()),
            mail: PgMailRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Connect to test database (for integration tests).
    #[cfg(test)]
    pub async fn connect_test() -> Result<Self> {
        Self::connect(&test_fixtures::test_database_url()).await
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

#[async_trait]
impl UserDirectory for Database {
    async fn get_user(&self, id: Uuid) -> Result<Option<UserIdentity>> {
        self.users.get_user(id).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserIdentity>> {
        self.users.find_user_by_email(email).await
    }
}

#[async_trait]
impl KeyRepository for Database {
    async fn insert_key(&self, key: NewKey) -> Result<AsymmetricKey> {
        self.keys.insert_key(key).await
    }

    async fn get_key(&self, user_id: Uuid, key_id: &str) -> Result<Option<AsymmetricKey>> {
        self.keys.get_key(user_id, key_id).await
    }

    async fn get_default_key(&self, user_id: Uuid) -> Result<Option<AsymmetricKey>> {
        self.keys.get_default_key(user_id).await
    }

    async fn list_keys(&self, user_id: Uuid) -> Result<Vec<AsymmetricKey>> {
        self.keys.list_keys(user_id).await
    }

    async fn delete_key(&self, user_id: Uuid, key_id: &str) -> Result<bool> {
        self.keys.delete_key(user_id, key_id).await
    }

    async fn set_default_key(&self, user_id: Uuid, key_id: &str) -> Result<bool> {
        self.keys.set_default_key(user_id, key_id).await
    }
}

#[async_trait]
impl PeerKeyRepository for Database {
    async fn insert_snapshot_if_absent(
        &self,
        snapshot: NewPeerKeySnapshot,
    ) -> Result<PeerKeySnapshot> {
        self.peer_keys.insert_snapshot_if_absent(snapshot).await
    }

    async fn get_snapshot(&self, key: &SnapshotKey) -> Result<Option<PeerKeySnapshot>> {
        self.peer_keys.get_snapshot(key).await
    }

    async fn get_snapshot_by_id(&self, id: Uuid) -> Result<Option<PeerKeySnapshot>> {
        self.peer_keys.get_snapshot_by_id(id).await
    }

    async fn find_snapshot_by_key_id(
        &self,
        holder_id: Uuid,
        key_id: &str,
    ) -> Result<Option<PeerKeySnapshot>> {
        self.peer_keys
            .find_snapshot_by_key_id(holder_id, key_id)
            .await
    }

    async fn list_snapshots(&self, holder_id: Uuid) -> Result<Vec<PeerKeySnapshot>> {
        self.peer_keys.list_snapshots(holder_id).await
    }

    async fn delete_snapshots(&self, holder_id: Uuid, key_id: &str) -> Result<u64> {
        self.peer_keys.delete_snapshots(holder_id, key_id).await
    }
}

#[async_trait]
impl MailStore for Database {
    async fn get_message(&self, owner_id: Uuid, id: Uuid) -> Result<Option<MailMessage>> {
        self.mail.get_message(owner_id, id).await
    }

    async fn list_messages(&self, owner_id: Uuid) -> Result<Vec<MailMessage>> {
        self.mail.list_messages(owner_id).await
    }

    async fn delete_message(&self, owner_id: Uuid, id: Uuid) -> Result<bool> {
        self.mail.delete_message(owner_id, id).await
    }

    async fn commit_delivery(&self, plan: DeliveryPlan) -> Result<DeliveryReceipt> {
        self.mail.commit_delivery(plan).await
    }
}

#[async_trait]
impl BindingRepository for Database {
    async fn get_binding(&self, message_id: Uuid) -> Result<Option<MessageKeyBinding>> {
        self.mail.get_binding(message_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_secure_store<S: SecureStore>() {}

    #[test]
    fn test_database_and_memory_store_are_secure_stores() {
        assert_secure_store::<Database>();
        assert_secure_store::<InMemoryStore>();
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_connect_and_migrate() {
        let db = Database::connect_test().await.unwrap();
        db.migrate().await.unwrap();
        assert!(db.find_user_by_email("nobody@invalid").await.unwrap().is_none());
    }
}
