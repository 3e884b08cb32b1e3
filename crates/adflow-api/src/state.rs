//! Application state wiring the engine to its concrete backends.
//!
//! The engine is generic over the ad platform and both repositories;
//! AppState pins it to the Graph client and the SQLite stores.

use std::path::PathBuf;
use std::sync::Arc;

use adflow_core::workflow::engine::WorkflowEngine;
use adflow_infra::config::{load_config, resolve_data_dir};
use adflow_infra::graph::{ACCESS_TOKEN_ENV, GraphClient, TokenSource};
use adflow_infra::sqlite::checkpoint::SqliteCheckpointRepository;
use adflow_infra::sqlite::idempotency::SqliteIdempotencyRepository;
use adflow_infra::sqlite::pool::{DatabasePool, database_url};
use anyhow::{Context, bail};
use secrecy::SecretString;

/// Environment variable overriding `platform.ad_account_id`.
pub const AD_ACCOUNT_ENV: &str = "ADFLOW_AD_ACCOUNT_ID";

/// Concrete engine type pinned to infra implementations.
pub type ConcreteEngine =
    WorkflowEngine<GraphClient, SqliteCheckpointRepository, SqliteIdempotencyRepository>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConcreteEngine>,
    /// The engine's platform, for account checks outside any workflow.
    pub platform: Arc<GraphClient>,
    pub data_dir: PathBuf,
    credentials: Credentials,
}

/// Which platform credentials were found at startup.
#[derive(Debug, Clone, Copy)]
struct Credentials {
    token: bool,
    account: bool,
}

impl AppState {
    /// Initialize the application state: load config, connect to the
    /// database, build the Graph client and the engine.
    ///
    /// Missing credentials are not an error here; local commands such as
    /// `status` and `purge` never reach the platform. Commands that do call
    /// [`AppState::require_credentials`] first.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let config = load_config(&data_dir).await;

        let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;

        let token = std::env::var(ACCESS_TOKEN_ENV).ok().filter(|t| !t.is_empty());
        let account = std::env::var(AD_ACCOUNT_ENV)
            .ok()
            .filter(|a| !a.is_empty())
            .or_else(|| config.platform.ad_account_id.clone());
        let credentials = Credentials {
            token: token.is_some(),
            account: account.is_some(),
        };

        let platform = Arc::new(
            GraphClient::new(
                &config.platform,
                account.unwrap_or_default(),
                SecretString::from(token.unwrap_or_default()),
                TokenSource::Env(ACCESS_TOKEN_ENV.to_string()),
            )
            .context("failed to build HTTP client")?,
        );

        let engine = WorkflowEngine::new(
            platform.clone(),
            SqliteCheckpointRepository::new(db_pool.clone()),
            SqliteIdempotencyRepository::new(db_pool.clone()),
            &config,
        );

        tracing::debug!(
            data_dir = %data_dir.display(),
            has_token = credentials.token,
            has_account = credentials.account,
            "application state initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            platform,
            data_dir,
            credentials,
        })
    }

    /// Fail early when a command needs the platform but credentials are
    /// missing.
    pub fn require_credentials(&self) -> anyhow::Result<()> {
        self.require_token()?;
        if !self.credentials.account {
            bail!("no ad account: set {AD_ACCOUNT_ENV} or platform.ad_account_id in config.toml");
        }
        Ok(())
    }

    pub fn require_token(&self) -> anyhow::Result<()> {
        if !self.credentials.token {
            bail!("{ACCESS_TOKEN_ENV} is not set");
        }
        Ok(())
    }

    pub fn has_account(&self) -> bool {
        self.credentials.account
    }
}
