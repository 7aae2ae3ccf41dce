use crate::cli::Command;
use crate::config::Config;
use crate::data::models::RecordSource;
use crate::resolver::RawRecord;
use anyhow::Context;
use chrono::Utc;
use figment::{Figment, providers::Env};
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Main application struct containing the shared resources
pub struct App {
    config: Config,
    db_pool: sqlx::PgPool,
}

impl App {
    /// Load configuration from the environment (call before logging setup so
    /// the log level is available).
    pub fn load_config() -> Result<Config, anyhow::Error> {
        Figment::new()
            .merge(Env::raw())
            .extract()
            .context("Failed to load config")
    }

    /// Create a new App instance: database pool plus migrations.
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect(&config.database_url)
            .await
            .context("Failed to create database pool")?;

        info!("database pool established");

        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        info!("database migrations up to date");

        Ok(App { config, db_pool })
    }

    /// Execute one CLI command to completion.
    pub async fn run(&self, command: Command) -> ExitCode {
        // Cycle runs cancel at the next stage boundary on ctrl+c
        let cancel = CancellationToken::new();
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("received ctrl+c, cancelling at next stage boundary");
                signal_cancel.cancel();
            }
        });

        let result = match command {
            Command::RunCycle { name } => self.run_cycle(&name, &cancel).await,
            Command::RunProfile { profile_id } => self.run_profile(profile_id).await,
            Command::Ingest { file, source } => self.ingest(&file, source.into()).await,
            Command::RecordActivity { profile_id } => self.record_activity(profile_id).await,
            Command::ExpireSuggestions => self.expire_suggestions().await,
        };

        match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = ?e, "command failed");
                ExitCode::FAILURE
            }
        }
    }

    async fn run_cycle(&self, name: &str, cancel: &CancellationToken) -> Result<(), anyhow::Error> {
        let report = crate::matching::run_cycle(
            &self.db_pool,
            None,
            &self.config.matching,
            name,
            Utc::now(),
            cancel,
        )
        .await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }

    async fn run_profile(&self, profile_id: i64) -> Result<(), anyhow::Error> {
        let suggestions = crate::matching::run_for_profile(
            &self.db_pool,
            None,
            &self.config.matching,
            profile_id,
            Utc::now(),
        )
        .await?;
        info!(
            profile_id,
            count = suggestions.len(),
            "suggestions refreshed"
        );
        println!("{}", serde_json::to_string_pretty(&suggestions)?);
        Ok(())
    }

    async fn ingest(
        &self,
        file: &std::path::Path,
        source: RecordSource,
    ) -> Result<(), anyhow::Error> {
        let raw = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let records: Vec<RawRecord> =
            serde_json::from_str(&raw).context("Failed to parse records file")?;
        let batch: Vec<(RecordSource, RawRecord)> =
            records.into_iter().map(|r| (source, r)).collect();

        let stats = crate::resolver::resolve_batch(&self.db_pool, &batch, Utc::now()).await?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        Ok(())
    }

    async fn record_activity(&self, profile_id: i64) -> Result<(), anyhow::Error> {
        crate::data::profiles::bump_last_active(&self.db_pool, profile_id, Utc::now()).await?;
        info!(profile_id, "activity recorded");
        Ok(())
    }

    async fn expire_suggestions(&self) -> Result<(), anyhow::Error> {
        let deleted =
            crate::data::suggestions::delete_expired(&self.db_pool, Utc::now()).await?;
        info!(deleted, "expired pending suggestions removed");
        Ok(())
    }
}
