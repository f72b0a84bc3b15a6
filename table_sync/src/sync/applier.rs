//! Batched application of a changeset to the destination
//!
//! Rows to insert or update are read back from the source by key, a batch
//! at a time, and written through the destination session. Each batch is
//! its own transaction; a failed batch stops the operation and leaves the
//! batches before it applied.

use std::collections::BTreeSet;

use crate::db::connection::DatabaseConnection;
use crate::db::executor::SqlExecutor;
use crate::db::value::Value;
use crate::error::{Error, Result};
use crate::schema::types::{Key, Table};
use crate::sync::query::{
    batch_size, delete_query, insert_template, selection_query, update_params, update_template,
};

/// Applies the key sets of one table's changeset
pub struct BatchApplier<'a> {
    source: &'a DatabaseConnection,
    table: &'a Table,
    destination_schema: Option<&'a str>,
    batch_size: usize,
}

impl<'a> BatchApplier<'a> {
    /// `table` is the LCD table; `max_parameters` bounds the parameters of
    /// every key predicate
    pub fn new(
        source: &'a DatabaseConnection,
        table: &'a Table,
        destination_schema: Option<&'a str>,
        max_parameters: usize,
    ) -> Self {
        Self {
            source,
            table,
            destination_schema,
            batch_size: batch_size(table.primary_key().len(), max_parameters),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn batches(&self, keys: &BTreeSet<Key>) -> Vec<Vec<Key>> {
        let keys: Vec<Key> = keys.iter().cloned().collect();
        keys.chunks(self.batch_size).map(|chunk| chunk.to_vec()).collect()
    }

    /// Read one batch of full rows from the source; every key must match
    /// exactly one row
    async fn source_rows(&self, batch: &[Key]) -> Result<Vec<Vec<Value>>> {
        let query = selection_query(
            self.source.dialect(),
            self.source.schema(),
            self.table,
            batch,
        );
        let rows = self.source.fetch_all(&query).await?;

        if rows.len() != batch.len() {
            tracing::warn!(
                table = %self.table.name,
                expected = batch.len(),
                found = rows.len(),
                "Source rows do not match the requested keys"
            );
            return Err(Error::MissingSourceRows {
                expected: batch.len(),
                found: rows.len(),
            });
        }
        Ok(rows)
    }

    /// Copy the source rows with the given keys into the destination.
    ///
    /// Identity insert is enabled on the session for the duration of the
    /// call and restored whether or not the batches succeed.
    pub async fn insert_rows(
        &self,
        session: &mut SqlExecutor,
        keys: &BTreeSet<Key>,
    ) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let wrap = |e: Error| Error::InsertError {
            table: self.table.name.clone(),
            source: Box::new(e),
        };

        session.set_identity_insert(true).await.map_err(wrap)?;
        let inserted = self.insert_batches(session, keys).await;
        let restored = session.set_identity_insert(false).await;

        match (inserted, restored) {
            (Err(e), restored) => {
                if let Err(restore_error) = restored {
                    tracing::warn!(
                        table = %self.table.name,
                        error = %restore_error,
                        "Failed to restore identity insert after insert failure"
                    );
                }
                Err(wrap(e))
            }
            (Ok(_), Err(e)) => Err(wrap(e)),
            (Ok(count), Ok(())) => Ok(count),
        }
    }

    async fn insert_batches(
        &self,
        session: &mut SqlExecutor,
        keys: &BTreeSet<Key>,
    ) -> Result<u64> {
        let template = insert_template(session.dialect(), self.destination_schema, self.table);
        let mut inserted = 0;

        for (index, batch) in self.batches(keys).iter().enumerate() {
            let rows = self.source_rows(batch).await?;
            inserted += session.execute_batch(&template, &rows).await?;

            tracing::debug!(
                table = %self.table.name,
                batch = index + 1,
                keys = batch.len(),
                rows = rows.len(),
                "Inserted batch"
            );
        }

        Ok(inserted)
    }

    /// Overwrite the non-key columns of the destination rows with the given
    /// keys using the source's values
    pub async fn update_rows(
        &self,
        session: &mut SqlExecutor,
        keys: &BTreeSet<Key>,
    ) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let template = update_template(session.dialect(), self.destination_schema, self.table);
        let Some(template) = template else {
            tracing::debug!(table = %self.table.name, "No non-key columns to update");
            return Ok(0);
        };

        self.update_batches(session, &template, keys)
            .await
            .map_err(|e| Error::UpdateError {
                table: self.table.name.clone(),
                source: Box::new(e),
            })
    }

    async fn update_batches(
        &self,
        session: &mut SqlExecutor,
        template: &str,
        keys: &BTreeSet<Key>,
    ) -> Result<u64> {
        let mut updated = 0;

        for (index, batch) in self.batches(keys).iter().enumerate() {
            let params: Vec<_> = self
                .source_rows(batch)
                .await?
                .iter()
                .map(|row| update_params(self.table, row))
                .collect();
            updated += session.execute_batch(template, &params).await?;

            tracing::debug!(
                table = %self.table.name,
                batch = index + 1,
                keys = batch.len(),
                "Updated batch"
            );
        }

        Ok(updated)
    }

    /// Remove the destination rows with the given keys
    pub async fn delete_rows(
        &self,
        session: &mut SqlExecutor,
        keys: &BTreeSet<Key>,
    ) -> Result<u64> {
        let mut deleted = 0;

        for (index, batch) in self.batches(keys).iter().enumerate() {
            let query = delete_query(session.dialect(), self.destination_schema, self.table, batch);
            deleted += session
                .execute_query(&query)
                .await
                .map_err(|e| Error::DeleteError {
                    table: self.table.name.clone(),
                    source: Box::new(e),
                })?;

            tracing::debug!(
                table = %self.table.name,
                batch = index + 1,
                keys = batch.len(),
                "Deleted batch"
            );
        }

        Ok(deleted)
    }
}
