//! Infrastructure layer: ledger storage, trip directory, payment processor
//! adapters, configuration and the vault service that composes them.

pub mod config;
pub mod directory;
pub mod processor;
pub mod repository;
pub mod services;

mod integration_tests;

pub use config::{ConfigError, VaultConfig};
pub use directory::{InMemoryTripDirectory, PostgresTripDirectory, TripDirectory};
pub use processor::{HttpProcessor, PaymentProcessor, ProcessorError, SimulatedProcessor};
#[cfg(any(test, feature = "test-utils"))]
pub use repository::FaultyVaultRepository;
pub use repository::{DeleteOutcome, InMemoryVaultRepository, PostgresVaultRepository, RepositoryError, VaultRepository};
pub use services::{CreateEntryRequest, VaultService, VaultSettings};
