//! Error types for table_sync

use thiserror::Error;

/// Result type for table_sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for table_sync
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Error loading {side} schema: {source}")]
    SchemaLoad {
        side: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("Type mapping error: {0}")]
    TypeMappingError(String),

    /// Both cursors were empty at a position the merge loop believed to hold a row.
    #[error("Classifier defect: {0}")]
    ClassifierDefect(String),

    /// A row stream produced a key that is not strictly greater than the previous one.
    #[error("Row stream for {side} is not ordered by primary key: {detail}")]
    UnorderedStream { side: &'static str, detail: String },

    /// The source returned fewer rows than keys were requested from it.
    #[error("Source returned {found} of {expected} requested rows")]
    MissingSourceRows { expected: usize, found: usize },

    #[error("Error inserting rows into {table}: {source}")]
    InsertError {
        table: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Error updating rows in {table}: {source}")]
    UpdateError {
        table: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Error deleting rows from {table}: {source}")]
    DeleteError {
        table: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Error synchronizing table {table}: {source}")]
    TableSync {
        table: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Error comparing databases: {0}")]
    ComparisonError(#[source] Box<Error>),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl Error {
    /// Wrap an error with the name of the table whose reconciliation failed
    pub fn in_table(self, table: &str) -> Self {
        Error::TableSync {
            table: table.to_string(),
            source: Box::new(self),
        }
    }
}

/// Convert TOML deserialization errors to table_sync errors
impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::ConfigError(error.to_string())
    }
}

/// Convert YAML deserialization errors to table_sync errors
impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Error::ConfigError(error.to_string())
    }
}
