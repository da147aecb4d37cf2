/*!
 * Unit-of-work helper
 *
 * Every mutating ledger operation runs through `run_in_transaction` so that a
 * failure anywhere inside the closure rolls back quantity, ledger, history
 * and rollup writes together.
 */

use metrics::{counter, histogram};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, EntityTrait,
    QuerySelect, Select, TransactionError, TransactionTrait,
};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};
use uuid::Uuid;

/// Type alias for boxed future used in transactions
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Execute `f` inside a database transaction.
///
/// Commits when `f` returns `Ok`, rolls back otherwise. The closure's own
/// error type is preserved; connection-level failures are converted with
/// `E::from(DbErr)`.
///
/// ```rust,ignore
/// let drum = run_in_transaction(&db, "apply_usage", |txn| {
///     Box::pin(async move {
///         let drum = drum_registry::lock_by_number(txn, "DR-001").await?;
///         Ok(drum)
///     })
/// })
/// .await?;
/// ```
pub async fn run_in_transaction<F, T, E>(
    db: &DatabaseConnection,
    label: &'static str,
    f: F,
) -> Result<T, E>
where
    F: for<'a> FnOnce(&'a DatabaseTransaction) -> BoxFuture<'a, Result<T, E>> + Send,
    T: Send,
    E: From<DbErr> + std::error::Error + Send,
{
    let transaction_id = Uuid::new_v4();
    let start = std::time::Instant::now();

    debug!(transaction_id = %transaction_id, operation = label, "Starting database transaction");
    counter!("drum_ledger_db.transaction.started", 1, "operation" => label);

    let result = db.transaction::<F, T, E>(f).await;

    let elapsed = start.elapsed();
    histogram!("drum_ledger_db.transaction.duration", elapsed, "operation" => label);

    match &result {
        Ok(_) => {
            counter!("drum_ledger_db.transaction.committed", 1, "operation" => label);
            debug!(transaction_id = %transaction_id, operation = label, "Transaction committed in {:?}", elapsed);
        }
        Err(e) => {
            counter!("drum_ledger_db.transaction.rolled_back", 1, "operation" => label);
            warn!(transaction_id = %transaction_id, operation = label, error = %e, "Transaction rolled back after {:?}", elapsed);
        }
    }

    result.map_err(|e| match e {
        TransactionError::Connection(db_err) => E::from(db_err),
        TransactionError::Transaction(err) => err,
    })
}

/// Whether `SELECT ... FOR UPDATE` is meaningful on this connection.
///
/// SQLite serialises writers at the database level and has no row locks.
pub fn supports_row_locks<C: ConnectionTrait>(conn: &C) -> bool {
    matches!(
        conn.get_database_backend(),
        DbBackend::Postgres | DbBackend::MySql
    )
}

/// Adds `FOR UPDATE` to `select` where the backend has row locks.
pub fn for_update<C, E>(conn: &C, select: Select<E>) -> Select<E>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    if supports_row_locks(conn) {
        select.lock_exclusive()
    } else {
        select
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ServiceError;
    use sea_orm::{ConnectOptions, Database, Statement};

    async fn memory_db() -> DatabaseConnection {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).min_connections(1);
        Database::connect(opt).await.unwrap()
    }

    #[tokio::test]
    async fn commits_on_success() {
        let db = memory_db().await;
        db.execute_unprepared("CREATE TABLE scratch (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();

        run_in_transaction::<_, _, ServiceError>(&db, "test", |txn| {
            Box::pin(async move {
                txn.execute_unprepared("INSERT INTO scratch (id) VALUES (1)")
                    .await?;
                Ok(())
            })
        })
        .await
        .unwrap();

        let row = db
            .query_one(Statement::from_string(
                DbBackend::Sqlite,
                "SELECT COUNT(*) AS n FROM scratch".to_string(),
            ))
            .await
            .unwrap()
            .unwrap();
        let n: i64 = row.try_get("", "n").unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn rolls_back_and_preserves_domain_error() {
        let db = memory_db().await;
        db.execute_unprepared("CREATE TABLE scratch (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();

        let result = run_in_transaction::<_, (), ServiceError>(&db, "test", |txn| {
            Box::pin(async move {
                txn.execute_unprepared("INSERT INTO scratch (id) VALUES (1)")
                    .await?;
                Err(ServiceError::InvalidQuantity("boom".into()))
            })
        })
        .await;

        assert!(matches!(result, Err(ServiceError::InvalidQuantity(_))));

        let row = db
            .query_one(Statement::from_string(
                DbBackend::Sqlite,
                "SELECT COUNT(*) AS n FROM scratch".to_string(),
            ))
            .await
            .unwrap()
            .unwrap();
        let n: i64 = row.try_get("", "n").unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn sqlite_has_no_row_locks() {
        let db = memory_db().await;
        assert!(!supports_row_locks(&db));
    }
}
