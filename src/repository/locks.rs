//! Advisory locks for maintenance loops.
//!
//! Each loop acquires a TTL lock keyed by its name before running, so a
//! multi-replica deployment executes any given loop at most once per tick.

use chrono::{Duration, Utc};
use diesel_async::RunQueryDsl;

use super::pool::AsyncSqliteConnection;
use super::{format_datetime, Result};

/// Try to take the named lock until now + ttl. Returns false when another
/// holder's lock is still live.
pub async fn try_acquire(
    conn: &mut AsyncSqliteConnection,
    name: &str,
    holder: &str,
    ttl_minutes: i64,
) -> Result<bool> {
    let now = format_datetime(Utc::now());
    let until = format_datetime(Utc::now() + Duration::minutes(ttl_minutes));

    let updated = diesel::sql_query(
        "INSERT INTO maintenance_locks (name, locked_by, locked_until) VALUES (?, ?, ?) \
         ON CONFLICT(name) DO UPDATE SET \
            locked_by = excluded.locked_by, \
            locked_until = excluded.locked_until \
         WHERE maintenance_locks.locked_until < ?",
    )
    .bind::<diesel::sql_types::Text, _>(name)
    .bind::<diesel::sql_types::Text, _>(holder)
    .bind::<diesel::sql_types::Text, _>(until)
    .bind::<diesel::sql_types::Text, _>(now)
    .execute(conn)
    .await?;

    Ok(updated > 0)
}

/// Release the named lock if this holder still owns it.
pub async fn release(
    conn: &mut AsyncSqliteConnection,
    name: &str,
    holder: &str,
) -> Result<()> {
    let expired = format_datetime(Utc::now() - Duration::minutes(1));
    diesel::sql_query(
        "UPDATE maintenance_locks SET locked_until = ? WHERE name = ? AND locked_by = ?",
    )
    .bind::<diesel::sql_types::Text, _>(expired)
    .bind::<diesel::sql_types::Text, _>(name)
    .bind::<diesel::sql_types::Text, _>(holder)
    .execute(conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{run_migrations, AsyncSqlitePool};
    use tempfile::tempdir;

    async fn setup() -> (AsyncSqlitePool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = db_path.display().to_string();
        run_migrations(&url).await.unwrap();
        (AsyncSqlitePool::new(&url), dir)
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let (pool, _dir) = setup().await;
        let mut conn = pool.get().await.unwrap();

        assert!(try_acquire(&mut conn, "reaper", "host-a", 10).await.unwrap());
        assert!(!try_acquire(&mut conn, "reaper", "host-b", 10).await.unwrap());

        release(&mut conn, "reaper", "host-a").await.unwrap();
        assert!(try_acquire(&mut conn, "reaper", "host-b", 10).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_can_be_stolen() {
        let (pool, _dir) = setup().await;
        let mut conn = pool.get().await.unwrap();

        assert!(try_acquire(&mut conn, "reconciler", "host-a", -5)
            .await
            .unwrap());
        assert!(try_acquire(&mut conn, "reconciler", "host-b", 10)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn distinct_names_are_independent() {
        let (pool, _dir) = setup().await;
        let mut conn = pool.get().await.unwrap();

        assert!(try_acquire(&mut conn, "reaper", "host-a", 10).await.unwrap());
        assert!(try_acquire(&mut conn, "watchdog", "host-a", 10)
            .await
            .unwrap());
    }
}
