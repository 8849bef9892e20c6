//! PostgreSQL integration tests.
//!
//! Configuration tests run anywhere. The integration module starts a
//! PostgreSQL container with testcontainers and needs Docker.
//!
//! Run with: `cargo test -p quarry-persistence --features postgres -- postgres`

#![cfg(feature = "postgres")]

use quarry_persistence::config::{PostgresConfig, PostgresSslMode};

// ============================================================================
// Configuration Tests (no PostgreSQL instance required)
// ============================================================================

#[test]
fn test_postgres_config_defaults() {
    let config = PostgresConfig::default();
    assert_eq!(config.host, "localhost");
    assert_eq!(config.port, 5432);
    assert_eq!(config.dbname, "quarry");
    assert_eq!(config.user, "quarry");
    assert!(config.password.is_none());
    assert_eq!(config.max_connections, 10);
    assert_eq!(config.connect_timeout_secs, 5);
    assert_eq!(config.statement_timeout_ms, 30000);
    assert_eq!(config.ssl_mode, PostgresSslMode::Prefer);
}

#[test]
fn test_postgres_config_serialization() {
    let config = PostgresConfig {
        host: "pg-server".to_string(),
        port: 5433,
        dbname: "books".to_string(),
        user: "librarian".to_string(),
        password: Some("secret".to_string()),
        ..Default::default()
    };

    let json = serde_json::to_string(&config).unwrap();
    let parsed: PostgresConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_postgres_connection_string() {
    let config = PostgresConfig::parse_connection_string("postgresql://app@db:6543/library?sslmode=disable")
        .unwrap();
    assert_eq!(config.user, "app");
    assert!(config.password.is_none());
    assert_eq!(config.host, "db");
    assert_eq!(config.port, 6543);
    assert_eq!(config.dbname, "library");

    assert!(PostgresConfig::parse_connection_string("postgres://db:notaport/x").is_err());
}

// ============================================================================
// Integration Tests (Docker required)
// ============================================================================

/// Integration tests against a real PostgreSQL server.
///
/// Every test works in its own tenant schema, so the tests share one
/// container and run in parallel.
///
/// Skip if no Docker:
///   cargo test -p quarry-persistence --features postgres -- --skip postgres_integration
#[cfg(test)]
mod postgres_integration {
    use std::time::Duration;

    use serde_json::{Value, json};

    use quarry_persistence::config::{DatabaseConfig, PostgresConfig, PostgresSslMode};
    use quarry_persistence::error::{StorageError, TransactionError};
    use quarry_persistence::sql::{InsertOptions, RowValues, SelectOptions, Where};
    use quarry_persistence::{Database, EngineKind, StorageResult, TableFilter, run_with_tenant};

    use testcontainers::ImageExt;
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::postgres::Postgres;
    use tokio::sync::OnceCell;

    /// Shared PostgreSQL container reused across all tests in this module.
    struct SharedPg {
        host: String,
        port: u16,
        /// Kept alive for the duration of the test binary; dropped at process exit.
        _container: testcontainers::ContainerAsync<Postgres>,
    }

    static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();

    async fn shared_pg() -> &'static SharedPg {
        SHARED_PG
            .get_or_init(|| async {
                let run_id = std::env::var("GITHUB_RUN_ID").unwrap_or_default();
                let container = Postgres::default()
                    .with_label("github.run_id", &run_id)
                    .start()
                    .await
                    .expect("Failed to start PostgreSQL container");

                let port = container
                    .get_host_port_ipv4(5432)
                    .await
                    .expect("Failed to get host port");

                let host = container
                    .get_host()
                    .await
                    .expect("Failed to get host")
                    .to_string();

                SharedPg {
                    host,
                    port,
                    _container: container,
                }
            })
            .await
    }

    fn pg_config(pg: &SharedPg) -> PostgresConfig {
        PostgresConfig {
            host: pg.host.clone(),
            port: pg.port,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: Some("postgres".to_string()),
            max_connections: 5,
            ssl_mode: PostgresSslMode::Disable,
            ..Default::default()
        }
    }

    /// A multi-tenant database on the shared container.
    async fn create_db() -> Database {
        let pg = shared_pg().await;
        let config = DatabaseConfig {
            postgres: Some(pg_config(pg)),
            ..Default::default()
        }
        .multi_tenant();
        Database::connect(config)
            .await
            .expect("Failed to connect to PostgreSQL")
    }

    /// A fresh tenant whose schema exists and holds a `books` table.
    async fn books_tenant(db: &Database) -> String {
        let tenant = format!("t_{}", uuid::Uuid::new_v4().simple());
        db.create_namespace(tenant.as_str()).await.unwrap();
        run_with_tenant(tenant.as_str(), async {
            let table = db.scope().unwrap().table("books").unwrap();
            db.execute_batch(&format!(
                "CREATE TABLE {table} (id SERIAL PRIMARY KEY, author TEXT, title TEXT, \
                 pages INTEGER, meta JSONB)"
            ))
            .await
            .unwrap();
        })
        .await;
        tenant
    }

    fn filter(value: Value) -> Where {
        Where::from_json(&value).unwrap()
    }

    fn book(author: &str, title: &str, pages: i64) -> RowValues {
        RowValues::new()
            .set("author", author)
            .set("title", title)
            .set("pages", pages)
    }

    #[tokio::test]
    async fn postgres_integration_connect_and_version() {
        let db = create_db().await;
        assert_eq!(db.engine_kind(), EngineKind::Postgres);
        db.health_check().await.unwrap();
        let version = db.version().await.unwrap();
        assert!(version.chars().next().is_some_and(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn postgres_integration_insert_then_select_one() {
        let db = create_db().await;
        let tenant = books_tenant(&db).await;

        run_with_tenant(tenant.as_str(), async {
            let id = db
                .insert("books", &book("Leo Tolstoy", "War and Peace", 728), &InsertOptions::new())
                .await
                .unwrap();
            assert_eq!(id, Some(json!(1)));

            let row = db
                .select_one("books", &filter(json!({"author": "Leo Tolstoy"})))
                .await
                .unwrap();
            assert_eq!(row["pages"], json!(728));
            assert!(!row["id"].is_null());
        })
        .await;
    }

    #[tokio::test]
    async fn postgres_integration_ilike_with_paging() {
        let db = create_db().await;
        let tenant = books_tenant(&db).await;

        run_with_tenant(tenant.as_str(), async {
            let table = db.scope().unwrap().table("patients").unwrap();
            db.execute_batch(&format!("CREATE TABLE {table} (id SERIAL PRIMARY KEY, name TEXT)"))
                .await
                .unwrap();
            for name in ["Kirk Douglas", "Michael Douglas", "Grace Kelly"] {
                db.insert("patients", &RowValues::new().set("name", name), &InsertOptions::new())
                    .await
                    .unwrap();
            }

            let options = SelectOptions::new().order_by("id").limit(1).offset(1);
            let rows = db
                .select("patients", &filter(json!({"name": {"ilike": "Douglas"}})), &options)
                .await
                .unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0]["name"], json!("Michael Douglas"));
        })
        .await;
    }

    #[tokio::test]
    async fn postgres_integration_not_found_and_empty_in() {
        let db = create_db().await;
        let tenant = books_tenant(&db).await;

        run_with_tenant(tenant.as_str(), async {
            db.insert("books", &book("Leo Tolstoy", "War and Peace", 728), &InsertOptions::new())
                .await
                .unwrap();

            let err = db
                .select_one("books", &filter(json!({"author": "Nobody"})))
                .await
                .unwrap_err();
            assert!(err.is_not_found());
            assert!(
                db.select_maybe_one("books", &filter(json!({"author": "Nobody"})))
                    .await
                    .unwrap()
                    .is_none()
            );

            let none = db
                .select("books", &filter(json!({"id": {"in": []}})), &SelectOptions::new())
                .await
                .unwrap();
            assert!(none.is_empty());
        })
        .await;
    }

    #[tokio::test]
    async fn postgres_integration_nested_json_roundtrip_and_path() {
        let db = create_db().await;
        let tenant = books_tenant(&db).await;
        let meta = json!({
            "editions": [{"year": 1869, "lang": "ru"}, {"year": 1886, "lang": "en"}],
            "tags": ["epic", "history"],
            "translator": null
        });

        run_with_tenant(tenant.as_str(), async {
            let id = db
                .insert(
                    "books",
                    &book("Leo Tolstoy", "War and Peace", 728).set("meta", meta.clone()),
                    &InsertOptions::new(),
                )
                .await
                .unwrap()
                .unwrap();
            db.insert("books", &book("Nikolai Gogol", "Dead Souls", 352), &InsertOptions::new())
                .await
                .unwrap();

            let row = db.select_one("books", &filter(json!({"id": id}))).await.unwrap();
            assert_eq!(row["meta"], meta);

            let by_path = db
                .select(
                    "books",
                    &filter(json!({"meta": {"json": [["editions", 1, "lang"], "en"]}})),
                    &SelectOptions::new(),
                )
                .await
                .unwrap();
            assert_eq!(by_path.len(), 1);
            assert_eq!(by_path[0]["author"], json!("Leo Tolstoy"));
        })
        .await;
    }

    #[tokio::test]
    async fn postgres_integration_unique_constraint_violation() {
        let db = create_db().await;
        let tenant = books_tenant(&db).await;

        run_with_tenant(tenant.as_str(), async {
            db.add_unique_constraint("books", &["title"]).await.unwrap();
            db.insert("books", &book("Leo Tolstoy", "War and Peace", 728), &InsertOptions::new())
                .await
                .unwrap();

            let err = db
                .insert("books", &book("Someone Else", "War and Peace", 1), &InsertOptions::new())
                .await
                .unwrap_err();
            assert!(err.is_constraint_violation(), "got {err:?}");

            let skipped = db
                .insert(
                    "books",
                    &book("Someone Else", "War and Peace", 1),
                    &InsertOptions::new().on_conflict_do_nothing(),
                )
                .await
                .unwrap();
            assert!(skipped.is_none());

            db.drop_unique_constraint("books", &["title"]).await.unwrap();
            db.insert("books", &book("Someone Else", "War and Peace", 1), &InsertOptions::new())
                .await
                .unwrap();
            assert_eq!(db.count("books", &Where::new()).await.unwrap(), 2);
        })
        .await;
    }

    #[tokio::test]
    async fn postgres_integration_failed_transaction_rolls_back() {
        let db = create_db().await;
        let tenant = books_tenant(&db).await;

        run_with_tenant(tenant.as_str(), async {
            let before = db.count("books", &Where::new()).await.unwrap();

            let result: StorageResult<()> = db
                .with_transaction(|| async {
                    db.insert("books", &book("Leo Tolstoy", "War and Peace", 728), &InsertOptions::new())
                        .await?;
                    let locked = db
                        .select("books", &Where::new(), &SelectOptions::new().for_update())
                        .await?;
                    assert_eq!(locked.len(), 1);
                    Err(StorageError::Transaction(TransactionError::NoActiveTransaction))
                })
                .await;

            assert!(result.unwrap_err().is_aborted());
            assert_eq!(db.count("books", &Where::new()).await.unwrap(), before);

            let swallowed = db
                .try_catch_in_transaction(|| async {
                    db.insert("books", &book("Leo Tolstoy", "War and Peace", 728), &InsertOptions::new())
                        .await?;
                    db.select_one("books", &filter(json!({"author": "Nobody"}))).await
                })
                .await;
            assert!(swallowed.is_none());
            assert_eq!(db.count("books", &Where::new()).await.unwrap(), before);
        })
        .await;
    }

    #[tokio::test]
    async fn postgres_integration_abandoned_transaction_rolls_back() {
        let db = create_db().await;
        let tenant = books_tenant(&db).await;

        run_with_tenant(tenant.as_str(), async {
            let abandoned = tokio::time::timeout(
                Duration::from_millis(200),
                db.with_transaction(|| async {
                    db.insert("books", &book("Leo Tolstoy", "War and Peace", 728), &InsertOptions::new())
                        .await?;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }),
            )
            .await;
            assert!(abandoned.is_err());

            // The rollback runs on a spawned task.
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_eq!(db.count("books", &Where::new()).await.unwrap(), 0);
        })
        .await;
    }

    #[tokio::test]
    async fn postgres_integration_tenants_are_isolated() {
        let db = create_db().await;
        let t1 = books_tenant(&db).await;
        let t2 = books_tenant(&db).await;

        let db = &db;
        let write = move |tenant: String| {
            run_with_tenant(tenant.clone(), async move {
                for i in 0..5 {
                    db.insert(
                        "books",
                        &book(&tenant, &format!("volume {i}"), i),
                        &InsertOptions::new(),
                    )
                    .await?;
                    tokio::task::yield_now().await;
                }
                db.select("books", &Where::new(), &SelectOptions::new()).await
            })
        };

        let (a, b) = tokio::join!(write(t1.clone()), write(t2.clone()));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.len(), 5);
        assert_eq!(b.len(), 5);
        assert!(a.iter().all(|r| r["author"] == json!(t1)));
        assert!(b.iter().all(|r| r["author"] == json!(t2)));
    }

    #[tokio::test]
    async fn postgres_integration_fts_index_and_search() {
        let db = create_db().await;
        let tenant = books_tenant(&db).await;

        run_with_tenant(tenant.as_str(), async {
            db.add_fts_index("books", &["title", "author"], None).await.unwrap();
            db.insert_many(
                "books",
                &[
                    book("Leo Tolstoy", "War and Peace", 728),
                    book("Nikolai Gogol", "Dead Souls", 352),
                ],
                &InsertOptions::new(),
            )
            .await
            .unwrap();

            let rows = db
                .select(
                    "books",
                    &filter(json!({"_fts": {"searchTerm": "peace", "fields": ["title", "author"]}})),
                    &SelectOptions::new(),
                )
                .await
                .unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0]["title"], json!("War and Peace"));

            db.drop_fts_index("books").await.unwrap();
        })
        .await;
    }

    #[tokio::test]
    async fn postgres_integration_schema_maintenance() {
        let db = create_db().await;
        let tenant = books_tenant(&db).await;

        run_with_tenant(tenant.as_str(), async {
            db.add_index("books", "author").await.unwrap();
            db.drop_index("books", "author").await.unwrap();

            db.insert(
                "books",
                &book("Leo Tolstoy", "War and Peace", 728).set("id", 10),
                &InsertOptions::new(),
            )
            .await
            .unwrap();
            db.reset_sequence("books", None).await.unwrap();
            let next = db
                .insert("books", &book("Nikolai Gogol", "Dead Souls", 352), &InsertOptions::new())
                .await
                .unwrap();
            assert_eq!(next, Some(json!(11)));

            db.truncate("books").await.unwrap();
            assert_eq!(db.count("books", &Where::new()).await.unwrap(), 0);

            let table = db.scope().unwrap().table("_sys_migrations").unwrap();
            db.execute_batch(&format!("CREATE TABLE {table} (id INTEGER)"))
                .await
                .unwrap();
            assert_eq!(
                db.list_tables(TableFilter::UserDefined).await.unwrap(),
                vec!["books".to_string()]
            );
            assert_eq!(
                db.list_tables(TableFilter::System).await.unwrap(),
                vec!["_sys_migrations".to_string()]
            );

            db.drop_reset_schema().await.unwrap();
            assert!(db.list_tables(TableFilter::All).await.unwrap().is_empty());
        })
        .await;
    }

    #[tokio::test]
    async fn postgres_integration_close_and_reconnect() {
        let db = create_db().await;
        db.close().await;
        assert!(db.is_closed());
        assert!(db.health_check().await.unwrap_err().is_connection_error());

        db.reconnect(None).await.unwrap();
        db.health_check().await.unwrap();
    }
}
