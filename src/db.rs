pub mod transaction;

use std::time::{Duration, Instant};

use metrics::gauge;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend};
use sea_orm_migration::MigratorTrait;
use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::migrator::Migrator;

pub use transaction::run_in_transaction;

/// Shared handle to the ledger's connection pool.
pub type DbPool = DatabaseConnection;

/// Pool tuning, usually derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
    /// Applied with `SET statement_timeout` on Postgres only.
    pub statement_timeout: Option<Duration>,
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
            statement_timeout: cfg.db_statement_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Opens the ledger's pool.
///
/// # Errors
/// `ServiceError::DatabaseError` when the store is unreachable or rejects
/// the session settings.
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!(?config, "Opening ledger database pool");

    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    let pool = Database::connect(options).await.map_err(|e| {
        error!(error = %e, "Could not open ledger database");
        ServiceError::DatabaseError(e)
    })?;
    gauge!("drum_ledger_db.max_connections", config.max_connections as f64);

    if let (Some(timeout), DbBackend::Postgres) =
        (config.statement_timeout, pool.get_database_backend())
    {
        // Session setting; only the connection that runs it is affected.
        pool.execute_unprepared(&format!(
            "SET statement_timeout = {}",
            timeout.as_millis()
        ))
        .await
        .map_err(ServiceError::DatabaseError)?;
    }

    info!(
        backend = ?pool.get_database_backend(),
        max_connections = config.max_connections,
        "Ledger database pool ready"
    );
    Ok(pool)
}

/// Opens the pool described by the application config.
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    establish_connection_with_config(&DbConfig::from(cfg)).await
}

/// Brings the ledger schema up to date.
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    let started = Instant::now();
    match Migrator::up(pool, None).await {
        Ok(()) => {
            info!(elapsed = ?started.elapsed(), "Ledger schema is up to date");
            Ok(())
        }
        Err(e) => {
            error!(elapsed = ?started.elapsed(), error = %e, "Ledger migrations failed");
            Err(ServiceError::DatabaseError(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::item;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use sea_orm::{ActiveModelTrait, EntityTrait, Set};
    use uuid::Uuid;

    async fn sqlite_pool() -> DbPool {
        let mut cfg = AppConfig::new("sqlite::memory:", "test");
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        establish_connection_from_app_config(&cfg).await.unwrap()
    }

    #[tokio::test]
    async fn schema_builds_on_sqlite() {
        let pool = sqlite_pool().await;
        run_migrations(&pool).await.unwrap();
        // Running again is a no-op.
        run_migrations(&pool).await.unwrap();

        let now = Utc::now();
        let id = Uuid::new_v4();
        item::ActiveModel {
            id: Set(id),
            name: Set("Drop Wire Cable".into()),
            current_stock: Set(dec!(1234.5)),
            drum_size: Set(Some(dec!(2000))),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&pool)
        .await
        .unwrap();

        let stored = item::Entity::find_by_id(id).one(&pool).await.unwrap().unwrap();
        assert_eq!(stored.current_stock, dec!(1234.5));
        assert_eq!(stored.drum_size, Some(dec!(2000)));
    }

    #[test]
    fn pool_settings_follow_app_config() {
        let mut cfg = AppConfig::new("postgres://localhost/ledger", "production");
        cfg.db_max_connections = 20;
        cfg.db_statement_timeout_secs = Some(5);
        let db = DbConfig::from(&cfg);
        assert_eq!(db.max_connections, 20);
        assert_eq!(db.statement_timeout, Some(Duration::from_secs(5)));
    }
}
