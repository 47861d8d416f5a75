//! Persistence for accounts, external identity bindings and passkeys.
//!
//! DAOs talk to sea-orm directly; the engine only sees the [`UserStore`] and
//! [`CredentialStore`] traits.

use crate::health::{HealthCheckResult, HealthChecker};
use async_trait::async_trait;
use sea_orm::{ConnectOptions, DatabaseConnection, DbErr, SqlErr};
use thiserror::Error;

pub mod config;
pub mod dao;
pub mod entities;
pub mod migration;
pub mod store;

pub use config::DatabaseConfig;
pub use dao::{ExternalIdentitiesDao, IdentityKey, NewPasskey, PasskeysDao, UsersDao};
pub use store::{CredentialStore, UserStore};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Record not found")]
    NotFound,
    #[error("Constraint violation: {0}")]
    Constraint(String),
    #[error("Migration error: {0}")]
    Migration(String),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

pub(crate) fn map_db_err(err: DbErr) -> DatabaseError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(msg))
        | Some(SqlErr::ForeignKeyConstraintViolation(msg)) => DatabaseError::Constraint(msg),
        _ => DatabaseError::Database(err.to_string()),
    }
}

#[async_trait]
pub trait DatabaseManager: Send + Sync {
    async fn migrate(&self) -> DatabaseResult<()>;

    async fn health_check(&self) -> DatabaseResult<()>;

    fn users(&self) -> UsersDao;

    fn external_identities(&self) -> ExternalIdentitiesDao;

    fn passkeys(&self) -> PasskeysDao;

    fn connection(&self) -> &DatabaseConnection;
}

pub struct DatabaseManagerImpl {
    pub connection: DatabaseConnection,
}

impl DatabaseManagerImpl {
    pub async fn new_from_config(config: &DatabaseConfig) -> DatabaseResult<Self> {
        let mut options = ConnectOptions::new(config.url.clone());
        if config.url.contains(":memory:") {
            // Every pooled connection would otherwise get its own empty database
            options.max_connections(1).min_connections(1);
        } else {
            options.max_connections(config.max_connections);
        }
        options.sqlx_logging(false);

        let connection = sea_orm::Database::connect(options)
            .await
            .map_err(|e| DatabaseError::Database(e.to_string()))?;

        Ok(Self { connection })
    }
}

#[async_trait]
impl DatabaseManager for DatabaseManagerImpl {
    async fn migrate(&self) -> DatabaseResult<()> {
        use crate::database::migration::Migrator;
        use sea_orm_migration::MigratorTrait;

        tracing::info!("Running database migrations");

        Migrator::up(&self.connection, None)
            .await
            .map_err(|e| DatabaseError::Migration(format!("Failed to run migrations: {}", e)))?;

        tracing::info!("Successfully completed all migrations");
        Ok(())
    }

    async fn health_check(&self) -> DatabaseResult<()> {
        self.connection
            .ping()
            .await
            .map_err(|e| DatabaseError::Database(format!("db error: {}", e)))
    }

    fn users(&self) -> UsersDao {
        UsersDao::new(self.connection.clone())
    }

    fn external_identities(&self) -> ExternalIdentitiesDao {
        ExternalIdentitiesDao::new(self.connection.clone())
    }

    fn passkeys(&self) -> PasskeysDao {
        PasskeysDao::new(self.connection.clone())
    }

    fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

#[async_trait]
impl HealthChecker for DatabaseManagerImpl {
    fn name(&self) -> &str {
        "database"
    }

    async fn check(&self) -> HealthCheckResult {
        match self.health_check().await {
            Ok(_) => HealthCheckResult::healthy_with_details(serde_json::json!({
                "connection": "ok"
            })),
            Err(err) => HealthCheckResult::unhealthy_with_details(
                "DB health check failed".to_string(),
                serde_json::json!({
                    "error": err.to_string()
                }),
            ),
        }
    }
}
