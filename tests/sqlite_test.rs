//! End-to-end tests against SQLite files through the sqlx backend.

use db_manager::config::PoolOptions;
use db_manager::db::{DbHandle, DbManager, QueryEvent, ResourcePool, TaskScope};
use db_manager::error::{BoxError, DbError};
use db_manager::models::{ConnectionConfig, QueryDescriptor, Select, SortOrder};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

const TIMEOUT: Duration = Duration::from_secs(2);

fn sqlite_manager(temp_file: &NamedTempFile, options: PoolOptions) -> DbManager {
    let db_path = temp_file.path().to_str().unwrap().to_string();
    let config = ConnectionConfig::new("test", format!("sqlite:{}", db_path), options).unwrap();
    let manager = DbManager::sqlx();
    manager.add_connection(config);
    manager
}

async fn seed_users(manager: &DbManager, count: i64) {
    manager
        .with_handle("test", TIMEOUT, |handle| async move {
            handle
                .execute(
                    &QueryDescriptor::raw(
                        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, avatar BLOB)",
                    ),
                    false,
                    TIMEOUT,
                )
                .await?;
            for i in 1..=count {
                handle
                    .execute(
                        &QueryDescriptor::raw("INSERT INTO users (name) VALUES (?)")
                            .bind(format!("user{}", i)),
                        false,
                        TIMEOUT,
                    )
                    .await?;
            }
            Ok::<_, DbError>(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_write_reports_affected_rows_and_insert_id() {
    let temp_file = NamedTempFile::new().unwrap();
    let manager = sqlite_manager(&temp_file, PoolOptions::default());
    seed_users(&manager, 2).await;

    let result = manager
        .fast_query("test")
        .query(&QueryDescriptor::raw("INSERT INTO users (name) VALUES (?)").bind("carol"))
        .await
        .unwrap();
    assert_eq!(result.rows_affected, Some(1));
    assert_eq!(result.last_insert_id, Some(3));

    let result = manager
        .fast_query("test")
        .query_sql("UPDATE users SET name = 'x'")
        .await
        .unwrap();
    assert_eq!(result.rows_affected, Some(3));
    assert_eq!(result.last_insert_id, None);

    manager.reset_all(true).await;
}

#[tokio::test]
async fn test_select_builder_with_total_count() {
    let temp_file = NamedTempFile::new().unwrap();
    let manager = sqlite_manager(&temp_file, PoolOptions::default());
    seed_users(&manager, 5).await;

    let descriptor = QueryDescriptor::from(
        Select::from("users")
            .columns(["id", "name"])
            .order_by("id", SortOrder::Desc)
            .limit(2),
    )
    .with_total_count();

    let result = manager.fast_query("test").query(&descriptor).await.unwrap();
    assert_eq!(result.row_count(), 2);
    assert_eq!(result.total_count, Some(5));
    assert_eq!(result.rows[0]["id"], json!(5));
    assert_eq!(result.rows[1]["name"], json!("user4"));

    manager.reset_all(true).await;
}

#[tokio::test]
async fn test_raw_statement_total_count_with_filter() {
    let temp_file = NamedTempFile::new().unwrap();
    let manager = sqlite_manager(&temp_file, PoolOptions::default());
    seed_users(&manager, 6).await;

    let descriptor = QueryDescriptor::raw("SELECT id FROM users WHERE id > ? ORDER BY id LIMIT 1")
        .bind(2)
        .with_total_count();
    let result = manager.fast_query("test").query(&descriptor).await.unwrap();
    assert_eq!(result.row_count(), 1);
    assert_eq!(result.rows[0]["id"], json!(3));
    // LIMIT stays inside the wrapped statement
    assert_eq!(result.total_count, Some(1));

    let descriptor = QueryDescriptor::from(Select::from("users").where_eq("id", 4).limit(10))
        .with_total_count();
    let result = manager.fast_query("test").query(&descriptor).await.unwrap();
    assert_eq!(result.total_count, Some(1));

    manager.reset_all(true).await;
}

#[tokio::test]
async fn test_raw_mode_skips_metadata_and_keeps_base64() {
    let temp_file = NamedTempFile::new().unwrap();
    let manager = sqlite_manager(&temp_file, PoolOptions::default());
    seed_users(&manager, 1).await;
    manager
        .fast_query("test")
        .query_sql("UPDATE users SET avatar = X'68656C6C6F'")
        .await
        .unwrap();

    let sql = "SELECT id, avatar FROM users";
    let processed = manager.fast_query("test").query_sql(sql).await.unwrap();
    assert_eq!(processed.columns.len(), 2);
    assert_eq!(processed.columns[0].name, "id");
    assert_eq!(processed.rows[0]["avatar"], json!("hello"));

    let raw = manager.fast_query("test").raw(true).query_sql(sql).await.unwrap();
    assert!(raw.columns.is_empty());
    assert_eq!(raw.rows[0]["avatar"], json!("aGVsbG8="));

    manager.reset_all(true).await;
}

#[tokio::test]
async fn test_task_lease_shares_one_connection() {
    let temp_file = NamedTempFile::new().unwrap();
    let manager = sqlite_manager(&temp_file, PoolOptions::default());
    seed_users(&manager, 1).await;

    let task = TaskScope::new();
    let first = manager.lease_handle(&task, "test", TIMEOUT).await.unwrap();
    let second = manager.lease_handle(&task, "test", TIMEOUT).await.unwrap();
    assert_eq!(first.id(), second.id());

    // Temp tables are per connection: visible only through the same handle
    manager
        .execute(&first, &QueryDescriptor::raw("CREATE TEMP TABLE scratch (v INTEGER)"), false, TIMEOUT)
        .await
        .unwrap();
    let result = manager
        .fast_query("test")
        .in_task(&task)
        .query_sql("SELECT COUNT(*) AS n FROM scratch")
        .await
        .unwrap();
    assert_eq!(result.rows[0]["n"], json!(0));

    assert_eq!(manager.pool_stats("test").unwrap().checked_out, 1);
    task.complete().await;
    assert!(first.is_released().await);
    assert_eq!(manager.pool_stats("test").unwrap().checked_out, 0);

    manager.reset_all(true).await;
}

#[tokio::test]
async fn test_single_connection_pool_times_out() {
    let temp_file = NamedTempFile::new().unwrap();
    let options = PoolOptions {
        max_connections: Some(1),
        ..Default::default()
    };
    let manager = sqlite_manager(&temp_file, options);

    let holder = TaskScope::new();
    manager.lease_handle(&holder, "test", TIMEOUT).await.unwrap();

    let err = manager
        .fast_query("test")
        .timeout(Duration::from_millis(100))
        .query_sql("SELECT 1")
        .await
        .unwrap_err();
    assert!(matches!(&err, DbError::PoolTimeout { connection, .. } if connection == "test"));

    holder.complete().await;
    let result = manager.fast_query("test").query_sql("SELECT 1 AS one").await.unwrap();
    assert_eq!(result.rows[0]["one"], json!(1));

    manager.reset_all(true).await;
}

#[tokio::test]
async fn test_checkout_waits_past_driver_acquire_timeout() {
    let temp_file = NamedTempFile::new().unwrap();
    let options = PoolOptions {
        max_connections: Some(1),
        acquire_timeout_secs: Some(1),
        ..Default::default()
    };
    let manager = sqlite_manager(&temp_file, options);

    let holder = Arc::new(TaskScope::new());
    manager.lease_handle(&holder, "test", TIMEOUT).await.unwrap();
    let release_later = {
        let holder = Arc::clone(&holder);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            holder.complete().await;
        })
    };

    let started = std::time::Instant::now();
    let result = manager
        .fast_query("test")
        .timeout(Duration::from_secs(5))
        .query_sql("SELECT 1 AS one")
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(1400));
    assert_eq!(result.rows[0]["one"], json!(1));

    release_later.await.unwrap();
    manager.reset_all(true).await;
}

#[tokio::test]
async fn test_released_handle_rejects_statements() {
    let temp_file = NamedTempFile::new().unwrap();
    let manager = sqlite_manager(&temp_file, PoolOptions::default());

    let pool = manager.pool_for("test").unwrap();
    let handle = pool.checkout(TIMEOUT).await.unwrap();
    pool.release(Arc::clone(&handle)).await;
    // Second release is a no-op
    pool.release(Arc::clone(&handle)).await;
    assert_eq!(pool.stats().checked_out, 0);

    let err = handle
        .execute(&QueryDescriptor::raw("SELECT 1"), false, TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));

    manager.reset_all(true).await;
}

#[tokio::test]
async fn test_hook_sees_statement_and_count() {
    let temp_file = NamedTempFile::new().unwrap();
    let manager = sqlite_manager(&temp_file, PoolOptions::default());
    seed_users(&manager, 3).await;

    let events: Arc<Mutex<Vec<(String, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    manager.set_hook(Arc::new(move |event: &QueryEvent<'_>| -> Result<(), BoxError> {
        sink.lock().push((
            event.handle.connection_name().to_string(),
            event.result.row_count(),
        ));
        Ok(())
    }));

    let descriptor = QueryDescriptor::raw("SELECT * FROM users LIMIT 2").with_total_count();
    let result = manager.fast_query("test").query(&descriptor).await.unwrap();
    assert_eq!(result.total_count, Some(2));

    let events = events.lock().clone();
    assert_eq!(events, vec![("test".to_string(), 2), ("test".to_string(), 1)]);

    manager.reset_all(true).await;
}

#[tokio::test]
async fn test_statement_error_carries_message() {
    let temp_file = NamedTempFile::new().unwrap();
    let manager = sqlite_manager(&temp_file, PoolOptions::default());

    let err = manager
        .fast_query("test")
        .query_sql("SELECT * FROM missing_table")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Execution { .. }));
    assert!(err.to_string().contains("missing_table"));

    manager.reset_all(true).await;
}

#[tokio::test]
async fn test_run_in_main_closes_pools() {
    let temp_file = NamedTempFile::new().unwrap();
    let options = PoolOptions {
        health_check_interval_secs: Some(30),
        ..Default::default()
    };
    let manager = sqlite_manager(&temp_file, options);

    let rows = manager
        .run_in_main(|task| {
            let manager = &manager;
            async move {
                let executor = manager.fast_query("test").in_task(&task);
                executor.query_sql("CREATE TABLE t (v INTEGER)").await?;
                executor.query_sql("INSERT INTO t VALUES (1), (2)").await?;
                let result = executor.query_sql("SELECT v FROM t ORDER BY v").await?;
                Ok::<_, DbError>(result.row_count())
            }
        })
        .await
        .unwrap();

    assert_eq!(rows, 2);
    assert!(manager.pool_stats("test").is_none());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(manager.timers().is_empty());
}
