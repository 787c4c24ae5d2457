//! Application state for the Inkflow API.

use anyhow::Result;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::Arc;

use crate::services::{
    ArtifactGenerator, HttpArtifactGenerator, LocalArtifactGenerator, LogNotifier, Notifier,
    WebhookNotifier,
};

pub struct AppState {
    pub db: SqlitePool,
    pub artifacts: Arc<dyn ArtifactGenerator>,
    pub notifier: Arc<dyn Notifier>,
    /// Base URL used when minting recipient signing links.
    pub public_base_url: String,
}

impl AppState {
    /// Build state from the environment: database, collaborators, base URL.
    pub async fn from_env() -> Result<Self> {
        let db_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:inkflow.db?mode=rwc".into());
        tracing::info!("Connecting to database: {}", db_url);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3001".to_string());

        let artifacts: Arc<dyn ArtifactGenerator> = match std::env::var("PDF_SERVICE_URL") {
            Ok(url) => Arc::new(HttpArtifactGenerator::new(url)),
            Err(_) => {
                tracing::warn!("PDF_SERVICE_URL not set; using local artifact URLs");
                Arc::new(LocalArtifactGenerator::new(public_base_url.clone()))
            }
        };

        let notifier: Arc<dyn Notifier> = match std::env::var("NOTIFY_WEBHOOK_URL") {
            Ok(url) => Arc::new(WebhookNotifier::new(url)),
            Err(_) => {
                tracing::warn!("NOTIFY_WEBHOOK_URL not set; notifications are log-only");
                Arc::new(LogNotifier)
            }
        };

        Self::with(pool, artifacts, notifier, public_base_url).await
    }

    /// Build state over an existing pool and collaborators. Tests use this
    /// with an in-memory database and mock services.
    pub async fn with(
        pool: SqlitePool,
        artifacts: Arc<dyn ArtifactGenerator>,
        notifier: Arc<dyn Notifier>,
        public_base_url: String,
    ) -> Result<Self> {
        Self::run_migrations(&pool).await?;
        Ok(Self {
            db: pool,
            artifacts,
            notifier,
            public_base_url,
        })
    }

    pub fn signing_url(&self, session_id: &str) -> String {
        format!("{}/signature/{}", self.public_base_url, session_id)
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        tracing::info!("Running database migrations...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                envelope_id TEXT,
                batch_id TEXT,
                owner_token TEXT NOT NULL,
                recipient_name TEXT NOT NULL,
                recipient_email TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                signing_order INTEGER NOT NULL DEFAULT 0,
                due_date TEXT,
                access_code_hash TEXT,
                access_code_type TEXT,
                access_code_hint TEXT,
                failed_attempts INTEGER NOT NULL DEFAULT 0,
                lockout_until TEXT,
                verified_at TEXT,
                draft_values_json TEXT NOT NULL DEFAULT '{}',
                signed_pdf_url TEXT,
                view_count INTEGER NOT NULL DEFAULT 0,
                cancel_reason TEXT,
                archived INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_documents (
                session_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                document_name TEXT NOT NULL,
                fields_json TEXT NOT NULL DEFAULT '[]',
                signed INTEGER NOT NULL DEFAULT 0,
                field_values_json TEXT,
                signed_at TEXT,
                PRIMARY KEY (session_id, document_id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS envelopes (
                id TEXT PRIMARY KEY,
                owner_token TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'sent',
                sequential INTEGER NOT NULL DEFAULT 0,
                due_date TEXT,
                completed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS envelope_documents (
                envelope_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                name TEXT NOT NULL,
                position INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (envelope_id, document_id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batches (
                id TEXT PRIMARY KEY,
                owner_token TEXT NOT NULL,
                document_id TEXT NOT NULL,
                document_name TEXT NOT NULL,
                fields_json TEXT NOT NULL DEFAULT '[]',
                due_date TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batch_recipients (
                batch_id TEXT NOT NULL,
                email TEXT NOT NULL,
                name TEXT NOT NULL,
                session_id TEXT,
                state TEXT NOT NULL DEFAULT 'failed',
                error TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (batch_id, email)
            )
            "#,
        )
        .execute(pool)
        .await?;

        // Indexes for the aggregation and retry scans
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_envelope ON sessions(envelope_id)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_batch ON sessions(batch_id)")
            .execute(pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_batch_recipients_state ON batch_recipients(batch_id, state)",
        )
        .execute(pool)
        .await?;

        tracing::info!("Migrations complete");
        Ok(())
    }
}
