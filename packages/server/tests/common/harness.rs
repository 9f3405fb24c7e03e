//! Test harness for integration testing.
//!
//! The HTTP tests run against an in-memory catalog. Tests that need a real
//! database share one PostgreSQL container, started on first use.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::{to_bytes, Body};
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use server_core::kernel::ServerDeps;
use server_core::server::build_app;
use server_core::Config;
use sitemap_export::testing::{seeded_catalog, MemoryCatalog};
use sitemap_export::{EmptyRangeRegistry, RegistrySnapshot};
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use tower::ServiceExt;

/// Shared container that persists across all tests in a binary.
struct SharedPostgres {
    db_url: String,
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_POSTGRES: OnceCell<SharedPostgres> = OnceCell::const_new();

impl SharedPostgres {
    async fn init() -> Result<Self> {
        init_test_tracing();

        let postgres = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for schema setup")?;
        for statement in [
            "CREATE TABLE IF NOT EXISTS part_info (id bigint PRIMARY KEY, fsg text, fsc text, nsn text)",
            "CREATE TABLE IF NOT EXISTS wp_fsgs_new (fsg text, fsc text, fsg_title text, fsc_title text)",
        ] {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_POSTGRES
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared Postgres container")
            })
            .await
    }
}

/// Respects RUST_LOG; run with `RUST_LOG=debug cargo test -- --nocapture`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// URL of the shared test database.
pub async fn shared_database_url() -> String {
    SharedPostgres::get().await.db_url.clone()
}

/// An app wired over an in-memory catalog.
pub struct TestHarness {
    pub catalog: Arc<MemoryCatalog>,
    pub registry: Arc<EmptyRangeRegistry>,
    pub deps: ServerDeps,
    pub app: Router,
}

impl TestHarness {
    /// Harness over a catalog holding one record per ID.
    pub fn with_ids(ids: impl IntoIterator<Item = i64>) -> Result<Self> {
        Self::build(seeded_catalog(ids), RegistrySnapshot::default(), |_| {})
    }

    /// Full control over catalog, registry contents and configuration.
    pub fn build(
        catalog: MemoryCatalog,
        snapshot: RegistrySnapshot,
        configure: impl FnOnce(&mut Config),
    ) -> Result<Self> {
        init_test_tracing();

        let mut config = Config::database_only("postgres://unused");
        configure(&mut config);

        let catalog = Arc::new(catalog);
        let registry = Arc::new(EmptyRangeRegistry::new(snapshot));
        let deps = ServerDeps::new(catalog.clone(), catalog.clone(), registry.clone(), config)?;
        let app = build_app(deps.clone());

        Ok(Self {
            catalog,
            registry,
            deps,
            app,
        })
    }

    /// Send a GET through the router without binding a socket.
    pub async fn get(&self, uri: &str) -> TestResponse {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("valid request");
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        TestResponse::read(response).await
    }
}

/// Response with the body already collected.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    /// Parsed JSON, or `Null` for empty and non-JSON bodies
    pub body: serde_json::Value,
    pub text: String,
}

impl TestResponse {
    async fn read(response: Response<Body>) -> Self {
        let (parts, body) = response.into_parts();
        let bytes = to_bytes(body, usize::MAX).await.expect("body readable");
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        Self {
            status: parts.status,
            headers: parts.headers,
            body,
            text: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Serve a router on an ephemeral local port.
pub async fn spawn_local(router: Router) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(addr)
}
