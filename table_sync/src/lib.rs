//! table_sync: row-level synchronization between schema-sibling tables
//!
//! table_sync compares tables that share a name and a primary key across two
//! databases of the same engine, even when their columns have drifted, and
//! copies the rows missing from the destination. Updates and deletes can be
//! applied too when enabled in the configuration.

pub mod config;
pub mod db;
pub mod error;
pub mod schema;
pub mod sync;
pub mod utils;

#[cfg(test)]
mod test;

// Re-export main types for easier access
pub use config::Config;
pub use db::connection::DatabaseConnection;
pub use error::{Error, Result};
pub use schema::analyzer::SchemaAnalyzer;
pub use sync::orchestrator::{SyncReport, Synchronizer};

/// Initialize table_sync with the specified configuration file
pub async fn init(config_path: &str) -> Result<SyncClient> {
    let config = config::load_from_file(config_path)?;
    SyncClient::new(config).await
}

/// The main client for interacting with table_sync
pub struct SyncClient {
    config: Config,
    source: DatabaseConnection,
    destination: DatabaseConnection,
}

impl SyncClient {
    /// Connect to both databases described by the configuration
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let source = DatabaseConnection::connect(&config.source).await?;
        let destination = DatabaseConnection::connect(&config.destination).await?;

        Ok(Self {
            config,
            source,
            destination,
        })
    }

    /// Build a client over already open connections
    pub fn from_connections(
        config: Config,
        source: DatabaseConnection,
        destination: DatabaseConnection,
    ) -> Result<Self> {
        config.validate()?;
        if source.dialect() != destination.dialect() {
            return Err(Error::ConfigError(format!(
                "Source and destination must use the same driver (got {} and {})",
                source.dialect().name(),
                destination.dialect().name()
            )));
        }

        Ok(Self {
            config,
            source,
            destination,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Analyze the source database schema
    pub async fn analyze_source(&self) -> Result<schema::types::DatabaseSchema> {
        SchemaAnalyzer::new(self.source.clone()).analyze().await
    }

    /// Analyze the destination database schema
    pub async fn analyze_destination(&self) -> Result<schema::types::DatabaseSchema> {
        SchemaAnalyzer::new(self.destination.clone()).analyze().await
    }

    /// Compare every shared table and apply the differences
    pub async fn run(&self, filter_value: Option<&str>) -> Result<SyncReport> {
        Synchronizer::new(&self.source, &self.destination, &self.config.sync)
            .run(filter_value)
            .await
    }
}
