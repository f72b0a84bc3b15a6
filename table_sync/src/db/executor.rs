//! SQL executor
//!
//! A dedicated connection checked out of a pool. Writes to the destination
//! go through one executor so that session settings (disabled constraints,
//! identity insert) apply to every statement of a run.

use futures::stream::{BoxStream, StreamExt};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, MySql, Postgres, Sqlite};

use crate::db::dialect::{Dialect, SqlQuery};
use crate::db::value::{bind_values, DecodeRow, Value};
use crate::error::Result;

/// SQL executor bound to a single connection
#[derive(Debug)]
pub enum SqlExecutor {
    Postgres(PoolConnection<Postgres>),
    MySql(PoolConnection<MySql>),
    Sqlite(PoolConnection<Sqlite>),
}

impl SqlExecutor {
    pub fn dialect(&self) -> Dialect {
        match self {
            SqlExecutor::Postgres(_) => Dialect::Postgres,
            SqlExecutor::MySql(_) => Dialect::MySql,
            SqlExecutor::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// Execute a single SQL statement without parameters
    pub async fn execute(&mut self, sql: &str) -> Result<()> {
        match self {
            SqlExecutor::Postgres(conn) => {
                sqlx::query::<Postgres>(sql).execute(&mut **conn).await?;
            }
            SqlExecutor::MySql(conn) => {
                sqlx::query::<MySql>(sql).execute(&mut **conn).await?;
            }
            SqlExecutor::Sqlite(conn) => {
                sqlx::query::<Sqlite>(sql).execute(&mut **conn).await?;
            }
        }
        Ok(())
    }

    /// Stream the rows of a query on this session. The session stays
    /// borrowed until the stream is dropped.
    pub fn fetch<'a, T, F>(&'a mut self, query: &'a SqlQuery, decode: F) -> BoxStream<'a, Result<T>>
    where
        T: Send + 'a,
        F: Fn(&dyn DecodeRow) -> Result<T> + Send + 'a,
    {
        match self {
            SqlExecutor::Postgres(conn) => {
                bind_values(sqlx::query::<Postgres>(&query.sql), &query.params)
                    .fetch(&mut **conn)
                    .map(move |row| decode(&row?))
                    .boxed()
            }
            SqlExecutor::MySql(conn) => {
                bind_values(sqlx::query::<MySql>(&query.sql), &query.params)
                    .fetch(&mut **conn)
                    .map(move |row| decode(&row?))
                    .boxed()
            }
            SqlExecutor::Sqlite(conn) => {
                bind_values(sqlx::query::<Sqlite>(&query.sql), &query.params)
                    .fetch(&mut **conn)
                    .map(move |row| decode(&row?))
                    .boxed()
            }
        }
    }

    /// Execute a parameterized statement, returning the affected row count
    pub async fn execute_query(&mut self, query: &SqlQuery) -> Result<u64> {
        let affected = match self {
            SqlExecutor::Postgres(conn) => {
                bind_values(sqlx::query::<Postgres>(&query.sql), &query.params)
                    .execute(&mut **conn)
                    .await?
                    .rows_affected()
            }
            SqlExecutor::MySql(conn) => {
                bind_values(sqlx::query::<MySql>(&query.sql), &query.params)
                    .execute(&mut **conn)
                    .await?
                    .rows_affected()
            }
            SqlExecutor::Sqlite(conn) => {
                bind_values(sqlx::query::<Sqlite>(&query.sql), &query.params)
                    .execute(&mut **conn)
                    .await?
                    .rows_affected()
            }
        };
        Ok(affected)
    }

    /// Execute one statement template once per parameter row, as a single
    /// transaction. Either every row is applied or none is.
    pub async fn execute_batch(&mut self, sql: &str, rows: &[Vec<Value>]) -> Result<u64> {
        let mut affected = 0;

        match self {
            SqlExecutor::Postgres(conn) => {
                let mut tx = Connection::begin(&mut **conn).await?;
                for row in rows {
                    affected += bind_values(sqlx::query::<Postgres>(sql), row)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                }
                tx.commit().await?;
            }
            SqlExecutor::MySql(conn) => {
                let mut tx = Connection::begin(&mut **conn).await?;
                for row in rows {
                    affected += bind_values(sqlx::query::<MySql>(sql), row)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                }
                tx.commit().await?;
            }
            SqlExecutor::Sqlite(conn) => {
                let mut tx = Connection::begin(&mut **conn).await?;
                for row in rows {
                    affected += bind_values(sqlx::query::<Sqlite>(sql), row)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                }
                tx.commit().await?;
            }
        }

        Ok(affected)
    }

    /// Turn referential integrity checks off or on for this session
    pub async fn set_constraints(&mut self, enabled: bool) -> Result<()> {
        let sql = self.dialect().constraints_sql(enabled);
        tracing::debug!(enabled, sql, "Setting destination constraints");
        self.execute(sql).await
    }

    /// Allow or disallow explicit values in identity columns for this session
    pub async fn set_identity_insert(&mut self, enabled: bool) -> Result<()> {
        match self.dialect().identity_insert_sql(enabled) {
            Some(sql) => {
                tracing::debug!(enabled, sql, "Setting identity insert");
                self.execute(sql).await
            }
            None => Ok(()),
        }
    }

    /// Take the connection out of its pool and close it instead of handing
    /// it back with altered session state
    pub fn detach(self) {
        match self {
            SqlExecutor::Postgres(conn) => drop(conn.detach()),
            SqlExecutor::MySql(conn) => drop(conn.detach()),
            SqlExecutor::Sqlite(conn) => drop(conn.detach()),
        }
    }
}
