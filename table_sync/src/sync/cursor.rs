//! Ordered row sources for the merge join

use async_trait::async_trait;
use futures::stream::{BoxStream, TryStreamExt};

use crate::db::dialect::Dialect;
use crate::db::value::{digest, DecodeRow, Value};
use crate::error::{Error, Result};
use crate::schema::types::{Key, Table};

/// Key and content digest of one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedRow {
    pub key: Key,
    pub hash: Vec<u8>,
}

impl HashedRow {
    pub fn new(key: Key, hash: Vec<u8>) -> Self {
        Self { key, hash }
    }
}

/// A forward-only cursor over rows in strictly increasing key order.
///
/// A new cursor is positioned before its first row; call
/// [`advance`](RowCursor::advance) once to load it.
#[async_trait]
pub trait RowCursor: Send {
    /// Row under the cursor, `None` once exhausted
    fn current(&self) -> Option<&HashedRow>;

    /// Move to the next row
    async fn advance(&mut self) -> Result<()>;
}

/// Cursor over rows held in memory
#[derive(Debug)]
pub struct MemoryCursor {
    rows: std::vec::IntoIter<HashedRow>,
    current: Option<HashedRow>,
}

impl MemoryCursor {
    pub fn new(rows: Vec<HashedRow>) -> Self {
        Self {
            rows: rows.into_iter(),
            current: None,
        }
    }
}

#[async_trait]
impl RowCursor for MemoryCursor {
    fn current(&self) -> Option<&HashedRow> {
        self.current.as_ref()
    }

    async fn advance(&mut self) -> Result<()> {
        self.current = self.rows.next();
        Ok(())
    }
}

/// Cursor over a live query result
pub struct StreamCursor<'a> {
    stream: BoxStream<'a, Result<HashedRow>>,
    current: Option<HashedRow>,
}

impl<'a> StreamCursor<'a> {
    pub fn new(stream: BoxStream<'a, Result<HashedRow>>) -> Self {
        Self {
            stream,
            current: None,
        }
    }
}

#[async_trait]
impl<'a> RowCursor for StreamCursor<'a> {
    fn current(&self) -> Option<&HashedRow> {
        self.current.as_ref()
    }

    async fn advance(&mut self) -> Result<()> {
        self.current = self.stream.try_next().await?;
        Ok(())
    }
}

/// Where a row's digest comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HashSource {
    /// The column at this position holds a server-side digest
    Column(usize),
    /// Digest the first `n` decoded values
    Computed(usize),
}

/// How to turn a diff query row into a [`HashedRow`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLayout {
    key_positions: Vec<usize>,
    hash: HashSource,
}

impl RowLayout {
    /// Layout of rows produced by `hashed_query` for `table`
    pub fn new(dialect: Dialect, table: &Table) -> Self {
        let width = table.columns.len();
        let all: Vec<_> = table.columns.values().collect();
        let hash = match dialect.row_hash_expr(&all) {
            Some(_) => HashSource::Column(width),
            None => HashSource::Computed(width),
        };

        Self {
            key_positions: table.primary_key_positions(),
            hash,
        }
    }

    pub fn decode(&self, row: &dyn DecodeRow) -> Result<HashedRow> {
        let key = self
            .key_positions
            .iter()
            .map(|&i| row.value_at(i))
            .collect::<Result<Vec<_>>>()?;

        let hash = match self.hash {
            HashSource::Column(i) => match row.value_at(i)? {
                Value::Bytes(bytes) => bytes,
                other => {
                    return Err(Error::TypeMappingError(format!(
                        "Row hash column holds {} instead of bytes",
                        other
                    )))
                }
            },
            HashSource::Computed(n) => {
                let values = (0..n).map(|i| row.value_at(i)).collect::<Result<Vec<_>>>()?;
                digest(&values)
            }
        };

        Ok(HashedRow::new(Key::new(key), hash))
    }
}
