//! Run-level coordination of a synchronization
//!
//! Loads both schemas, decides which tables can be compared, and then diffs
//! and applies each table in turn on one destination session whose
//! referential integrity checks stay disabled for the whole run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::db::connection::DatabaseConnection;
use crate::db::executor::SqlExecutor;
use crate::error::{Error, Result};
use crate::schema::analyzer::SchemaAnalyzer;
use crate::schema::lcd::{lcd, retains_primary_key};
use crate::schema::types::{DatabaseSchema, Table};
use crate::sync::applier::BatchApplier;
use crate::sync::cursor::{RowLayout, StreamCursor};
use crate::sync::differ::{diff, ChangeCounts, Changeset};
use crate::sync::query::hashed_query;

/// Why a table was left out of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoPrimaryKey,
    Excluded,
    MissingInDestination,
    MissingInSource,
    /// The destination lacks part of the source's primary key
    PrimaryKeyNotShared,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::NoPrimaryKey => "table has no primary key",
            SkipReason::Excluded => "excluded by configuration",
            SkipReason::MissingInDestination => "table does not exist in destination",
            SkipReason::MissingInSource => "table does not exist in source",
            SkipReason::PrimaryKeyNotShared => "primary key columns missing in destination",
        };
        write!(f, "{}", reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTable {
    pub table: String,
    pub reason: SkipReason,
}

/// Outcome for one compared table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: String,
    pub columns: usize,
    pub steps: u64,
    pub changes: ChangeCounts,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl TableReport {
    fn new(table: &Table, changeset: &Changeset) -> Self {
        Self {
            table: table.name.clone(),
            columns: table.columns.len(),
            steps: changeset.steps(),
            changes: changeset.counts(),
            inserted: 0,
            updated: 0,
            deleted: 0,
        }
    }
}

/// Summary of one synchronization run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub filter_value: Option<String>,
    pub tables: Vec<TableReport>,
    pub skipped: Vec<SkippedTable>,
}

impl SyncReport {
    pub fn new(dry_run: bool, filter_value: Option<&str>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            filter_value: filter_value.map(str::to_string),
            tables: Vec::new(),
            skipped: Vec::new(),
        }
    }

    fn skip(&mut self, table: &str, reason: SkipReason) {
        tracing::warn!(table, %reason, "Skipping table");
        self.skipped.push(SkippedTable {
            table: table.to_string(),
            reason,
        });
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    /// Rows written across all tables
    pub fn rows_written(&self) -> u64 {
        self.tables
            .iter()
            .map(|t| t.inserted + t.updated + t.deleted)
            .sum()
    }
}

/// Pair up the tables of both schemas and reduce each pair to its LCD.
///
/// Tables that cannot be compared are recorded in the report.
pub fn plan_tables(
    source: &DatabaseSchema,
    destination: &DatabaseSchema,
    config: &SyncConfig,
    report: &mut SyncReport,
) -> Vec<Table> {
    let mut planned = Vec::new();

    for table in source.tables.values() {
        if !table.has_primary_key() {
            report.skip(&table.name, SkipReason::NoPrimaryKey);
            continue;
        }
        if !config.includes_table(&table.name) {
            report.skip(&table.name, SkipReason::Excluded);
            continue;
        }
        let Some(other) = destination.tables.get(&table.name) else {
            report.skip(&table.name, SkipReason::MissingInDestination);
            continue;
        };

        let shared = lcd(table, other);
        if !retains_primary_key(table, &shared) {
            report.skip(&table.name, SkipReason::PrimaryKeyNotShared);
            continue;
        }
        let narrowed = shared.columns.len() < table.columns.len()
            || shared.columns.len() < other.columns.len();
        if narrowed {
            tracing::info!(
                table = %table.name,
                source_columns = table.columns.len(),
                destination_columns = other.columns.len(),
                shared_columns = shared.columns.len(),
                "Comparing on shared columns only"
            );
        }
        planned.push(shared);
    }

    for name in destination.tables.keys() {
        if !source.tables.contains_key(name) && config.includes_table(name) {
            report.skip(name, SkipReason::MissingInSource);
        }
    }

    planned
}

/// Holds the destination session with referential integrity disabled.
///
/// Call [`release`](ConstraintGuard::release) to re-enable the checks and
/// hand the connection back. A guard dropped without release closes its
/// connection instead of returning it to the pool with checks disabled.
pub struct ConstraintGuard {
    session: Option<SqlExecutor>,
}

impl ConstraintGuard {
    pub async fn acquire(destination: &DatabaseConnection) -> Result<Self> {
        let mut session = destination.executor().await?;
        session.set_constraints(false).await?;
        tracing::info!("Disabled destination constraints");
        Ok(Self {
            session: Some(session),
        })
    }

    /// The guarded session, until released
    pub fn session(&mut self) -> Option<&mut SqlExecutor> {
        self.session.as_mut()
    }

    pub async fn release(mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        match session.set_constraints(true).await {
            Ok(()) => {
                tracing::info!("Re-enabled destination constraints");
                Ok(())
            }
            Err(e) => {
                session.detach();
                Err(e)
            }
        }
    }
}

impl Drop for ConstraintGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::warn!("Constraint guard dropped without release; closing destination session");
            session.detach();
        }
    }
}

/// Synchronizes every comparable table from source to destination
pub struct Synchronizer<'a> {
    source: &'a DatabaseConnection,
    destination: &'a DatabaseConnection,
    config: &'a SyncConfig,
}

impl<'a> Synchronizer<'a> {
    pub fn new(
        source: &'a DatabaseConnection,
        destination: &'a DatabaseConnection,
        config: &'a SyncConfig,
    ) -> Self {
        Self {
            source,
            destination,
            config,
        }
    }

    /// Run one synchronization, restricted to rows whose filter column equals
    /// `filter_value` where the table has that column
    pub async fn run(&self, filter_value: Option<&str>) -> Result<SyncReport> {
        self.compare(filter_value)
            .await
            .map_err(|e| Error::ComparisonError(Box::new(e)))
    }

    async fn compare(&self, filter_value: Option<&str>) -> Result<SyncReport> {
        let source_schema = load_schema(self.source, "source").await?;
        let destination_schema = load_schema(self.destination, "destination").await?;

        let mut report = SyncReport::new(self.config.dry_run, filter_value);
        let tables = plan_tables(&source_schema, &destination_schema, self.config, &mut report);
        tracing::info!(
            run_id = %report.run_id,
            tables = tables.len(),
            skipped = report.skipped.len(),
            dry_run = self.config.dry_run,
            "Starting synchronization"
        );

        if self.config.dry_run {
            self.sync_tables(&tables, filter_value, None, &mut report).await?;
        } else {
            let mut guard = ConstraintGuard::acquire(self.destination).await?;
            let synced = self
                .sync_tables(&tables, filter_value, guard.session(), &mut report)
                .await;
            let released = guard.release().await;

            match (synced, released) {
                (Err(e), released) => {
                    if let Err(release_error) = released {
                        tracing::error!(
                            error = %release_error,
                            "Failed to re-enable destination constraints"
                        );
                    }
                    return Err(e);
                }
                (Ok(()), released) => released?,
            }
        }

        report.finished_at = Some(Utc::now());
        tracing::info!(
            run_id = %report.run_id,
            rows_written = report.rows_written(),
            "Synchronization finished"
        );
        Ok(report)
    }

    async fn sync_tables(
        &self,
        tables: &[Table],
        filter_value: Option<&str>,
        mut session: Option<&mut SqlExecutor>,
        report: &mut SyncReport,
    ) -> Result<()> {
        for table in tables {
            let table_report = self
                .sync_table(table, filter_value, session.as_deref_mut())
                .await
                .map_err(|e| e.in_table(&table.name))?;
            report.tables.push(table_report);
        }
        Ok(())
    }

    /// Diff one LCD table and, given a session, apply the differences
    pub async fn sync_table(
        &self,
        table: &Table,
        filter_value: Option<&str>,
        mut session: Option<&mut SqlExecutor>,
    ) -> Result<TableReport> {
        let changeset = self
            .diff_table(table, filter_value, session.as_deref_mut())
            .await?;
        let mut report = TableReport::new(table, &changeset);

        tracing::info!(
            table = %table.name,
            inserts = report.changes.inserts,
            updates = report.changes.updates,
            deletes = report.changes.deletes,
            steps = report.steps,
            "Compared table"
        );

        let Some(session) = session else {
            return Ok(report);
        };

        let applier = BatchApplier::new(
            self.source,
            table,
            self.destination.schema(),
            self.config.max_parameters,
        );

        report.inserted = applier.insert_rows(session, changeset.inserts()).await?;
        if self.config.apply_updates {
            report.updated = applier.update_rows(session, changeset.updates()).await?;
        }
        if self.config.apply_deletes {
            report.deleted = applier.delete_rows(session, changeset.deletes()).await?;
        }

        if report.inserted + report.updated + report.deleted > 0 {
            tracing::info!(
                table = %table.name,
                inserted = report.inserted,
                updated = report.updated,
                deleted = report.deleted,
                "Applied changes"
            );
        }
        Ok(report)
    }

    /// Merge-join the two sides of one table.
    ///
    /// Given a session, the destination side is read through it, so a run
    /// needs no second destination connection while the session is held.
    pub async fn diff_table(
        &self,
        table: &Table,
        filter_value: Option<&str>,
        session: Option<&mut SqlExecutor>,
    ) -> Result<Changeset> {
        let dialect = self.source.dialect();
        let filter = filter_value.and_then(|value| {
            table
                .column(&self.config.filter_column)
                .map(|column| (column, value))
        });
        if filter.is_some() {
            tracing::debug!(
                table = %table.name,
                column = %self.config.filter_column,
                "Filtering rows"
            );
        }

        let layout = RowLayout::new(dialect, table);
        let source_query = hashed_query(dialect, self.source.schema(), table, filter);
        let destination_query = hashed_query(dialect, self.destination.schema(), table, filter);
        tracing::trace!(sql = %source_query.sql, "Diff query");

        let source_rows = self.source.fetch(&source_query, |row| layout.decode(row));
        let destination_rows = match session {
            Some(session) => session.fetch(&destination_query, |row| layout.decode(row)),
            None => self
                .destination
                .fetch(&destination_query, |row| layout.decode(row)),
        };

        let mut source = StreamCursor::new(source_rows);
        let mut destination = StreamCursor::new(destination_rows);
        diff(&mut source, &mut destination).await
    }
}

async fn load_schema(
    connection: &DatabaseConnection,
    side: &'static str,
) -> Result<DatabaseSchema> {
    SchemaAnalyzer::new(connection.clone())
        .analyze()
        .await
        .map_err(|e| Error::SchemaLoad {
            side,
            source: Box::new(e),
        })
}
