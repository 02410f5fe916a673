//! Backend wiring for the HTTP layer.
//!
//! With `DATABASE_URL` set, ledger and trip directory live in Postgres and
//! payments go to the processor REST API named by `PROCESSOR_API_BASE`;
//! startup fails without one. Otherwise everything is in memory (dev + tests)
//! and the in-process simulator stands in for the processor unless an API is
//! configured.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use tripvault_infra::{
    HttpProcessor, InMemoryTripDirectory, InMemoryVaultRepository, PaymentProcessor, PostgresTripDirectory,
    PostgresVaultRepository, SimulatedProcessor, VaultConfig, VaultRepository, VaultService, VaultSettings,
};

pub struct AppServices {
    pub vault: VaultService,
    /// Present when payments run against the simulator, so dev tooling and
    /// tests can drive payment outcomes.
    pub simulator: Option<Arc<SimulatedProcessor>>,
    /// Present only for the in-memory backend, so dev tooling and tests can
    /// register trips.
    pub directory: Option<Arc<InMemoryTripDirectory>>,
}

impl AppServices {
    pub fn in_memory(config: &VaultConfig) -> Self {
        Self::with_repository(config, Arc::new(InMemoryVaultRepository::new()))
    }

    /// In-memory directory and simulated processor over `repo`.
    pub fn with_repository(config: &VaultConfig, repo: Arc<dyn VaultRepository>) -> Self {
        let simulator = Arc::new(SimulatedProcessor::new(
            config.webhook_secret.clone(),
            config.webhook_tolerance_secs,
        ));
        let mut services = Self::in_memory_with(config, repo, simulator.clone());
        services.simulator = Some(simulator);
        services
    }

    /// In-memory ledger and directory with a caller-supplied processor.
    pub fn in_memory_with_processor(config: &VaultConfig, processor: Arc<dyn PaymentProcessor>) -> Self {
        Self::in_memory_with(config, Arc::new(InMemoryVaultRepository::new()), processor)
    }

    fn in_memory_with(
        config: &VaultConfig,
        repo: Arc<dyn VaultRepository>,
        processor: Arc<dyn PaymentProcessor>,
    ) -> Self {
        let directory = Arc::new(InMemoryTripDirectory::new());
        let vault = VaultService::new(repo, directory.clone(), processor, VaultSettings::from(config));
        Self {
            vault,
            simulator: None,
            directory: Some(directory),
        }
    }

    pub async fn postgres(config: &VaultConfig, database_url: &str) -> anyhow::Result<Self> {
        let processor = HttpProcessor::from_config(config)
            .context("failed to build processor client")?
            .context("PROCESSOR_API_BASE and PROCESSOR_SECRET_KEY are required with DATABASE_URL")?;
        tracing::info!(api_base = processor.api_base(), "using processor REST API");

        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect(database_url)
            .await?;

        let repo = PostgresVaultRepository::new(pool.clone());
        repo.ensure_schema().await?;

        let directory = PostgresTripDirectory::new(pool);
        directory.ensure_dev_schema().await?;

        let vault = VaultService::new(
            Arc::new(repo),
            Arc::new(directory),
            Arc::new(processor),
            VaultSettings::from(config),
        );
        Ok(Self {
            vault,
            simulator: None,
            directory: None,
        })
    }

    pub async fn from_config(config: &VaultConfig) -> anyhow::Result<Self> {
        if let Some(url) = &config.database_url {
            tracing::info!(database = ?config.database_url_masked(), "using postgres backend");
            return Self::postgres(config, url).await;
        }

        tracing::warn!("DATABASE_URL not set; using in-memory backend");
        match HttpProcessor::from_config(config).context("failed to build processor client")? {
            Some(processor) => {
                tracing::info!(api_base = processor.api_base(), "using processor REST API");
                Ok(Self::in_memory_with_processor(config, Arc::new(processor)))
            }
            None => {
                tracing::warn!("PROCESSOR_API_BASE not set; payments go to the simulator");
                Ok(Self::in_memory(config))
            }
        }
    }
}
