//! Database connection handling
//!
//! This module provides functionality to establish and manage database connections.

use futures::stream::{BoxStream, StreamExt};
use sqlx::{
    mysql::MySqlPoolOptions, postgres::PgPoolOptions, sqlite::SqlitePoolOptions, MySql, Pool,
    Postgres, Sqlite,
};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::db::dialect::{Dialect, SqlQuery};
use crate::db::executor::SqlExecutor;
use crate::db::value::{bind_values, DecodeRow, Value};
use crate::error::{Error, Result};

/// Enumeration of supported database pools
#[derive(Debug, Clone)]
pub enum DatabasePool {
    Postgres(Pool<Postgres>),
    MySql(Pool<MySql>),
    Sqlite(Pool<Sqlite>),
}

/// A pool plus the schema its tables live in
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: DatabasePool,
    schema: Option<String>,
}

impl DatabaseConnection {
    /// Create a new database connection from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool_size = config.pool_size.unwrap_or(10);
        let timeout = Duration::from_secs(config.timeout_seconds.unwrap_or(30));

        let pool = match config.driver.as_str() {
            "postgres" => {
                let pool = PgPoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect(&config.url)
                    .await?;

                DatabasePool::Postgres(pool)
            }
            "mysql" => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect(&config.url)
                    .await?;

                DatabasePool::MySql(pool)
            }
            "sqlite" => {
                let pool = SqlitePoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect(&config.url)
                    .await?;

                DatabasePool::Sqlite(pool)
            }
            _ => {
                return Err(Error::DatabaseError(format!(
                    "Unsupported database driver: {}",
                    config.driver
                )))
            }
        };

        Ok(Self::from_pool(pool, config.schema.clone()))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: DatabasePool, schema: Option<String>) -> Self {
        let schema = match &pool {
            DatabasePool::Postgres(_) => schema.or_else(|| Some("public".to_string())),
            DatabasePool::MySql(_) => schema,
            // SQLite has no schemas beyond attached databases
            DatabasePool::Sqlite(_) => None,
        };
        Self { pool, schema }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Schema that qualifies table names, if any
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn dialect(&self) -> Dialect {
        match self.pool {
            DatabasePool::Postgres(_) => Dialect::Postgres,
            DatabasePool::MySql(_) => Dialect::MySql,
            DatabasePool::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// Execute a SQL statement
    pub async fn execute(&self, sql: &str) -> Result<()> {
        match &self.pool {
            DatabasePool::Postgres(pool) => {
                sqlx::query(sql).execute(pool).await?;
            }
            DatabasePool::MySql(pool) => {
                sqlx::query(sql).execute(pool).await?;
            }
            DatabasePool::Sqlite(pool) => {
                sqlx::query(sql).execute(pool).await?;
            }
        }
        Ok(())
    }

    /// Stream the rows of a query, decoding each one as it arrives
    pub fn fetch<'a, T, F>(&'a self, query: &'a SqlQuery, decode: F) -> BoxStream<'a, Result<T>>
    where
        T: Send + 'a,
        F: Fn(&dyn DecodeRow) -> Result<T> + Send + 'a,
    {
        match &self.pool {
            DatabasePool::Postgres(pool) => {
                bind_values(sqlx::query::<Postgres>(&query.sql), &query.params)
                    .fetch(pool)
                    .map(move |row| decode(&row?))
                    .boxed()
            }
            DatabasePool::MySql(pool) => {
                bind_values(sqlx::query::<MySql>(&query.sql), &query.params)
                    .fetch(pool)
                    .map(move |row| decode(&row?))
                    .boxed()
            }
            DatabasePool::Sqlite(pool) => {
                bind_values(sqlx::query::<Sqlite>(&query.sql), &query.params)
                    .fetch(pool)
                    .map(move |row| decode(&row?))
                    .boxed()
            }
        }
    }

    /// Run a query and decode every row into values in projection order
    pub async fn fetch_all(&self, query: &SqlQuery) -> Result<Vec<Vec<Value>>> {
        match &self.pool {
            DatabasePool::Postgres(pool) => {
                let rows = bind_values(sqlx::query::<Postgres>(&query.sql), &query.params)
                    .fetch_all(pool)
                    .await?;
                rows.iter().map(|row| row.values()).collect()
            }
            DatabasePool::MySql(pool) => {
                let rows = bind_values(sqlx::query::<MySql>(&query.sql), &query.params)
                    .fetch_all(pool)
                    .await?;
                rows.iter().map(|row| row.values()).collect()
            }
            DatabasePool::Sqlite(pool) => {
                let rows = bind_values(sqlx::query::<Sqlite>(&query.sql), &query.params)
                    .fetch_all(pool)
                    .await?;
                rows.iter().map(|row| row.values()).collect()
            }
        }
    }

    /// Check out a dedicated connection. Session-level settings such as
    /// disabled constraints only hold on the connection they were issued on.
    pub async fn executor(&self) -> Result<SqlExecutor> {
        let executor = match &self.pool {
            DatabasePool::Postgres(pool) => SqlExecutor::Postgres(pool.acquire().await?),
            DatabasePool::MySql(pool) => SqlExecutor::MySql(pool.acquire().await?),
            DatabasePool::Sqlite(pool) => SqlExecutor::Sqlite(pool.acquire().await?),
        };
        Ok(executor)
    }
}
