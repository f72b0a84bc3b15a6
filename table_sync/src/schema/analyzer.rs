//! Database schema analyzer
//!
//! Loads the table definitions of one side of a synchronization from the
//! engine's catalog. Every backend answers the same question, one row per
//! column: `(table_name, column_name, data_type, primary_key)`, ordered by
//! table name and column position.

use async_trait::async_trait;
use sqlx::{FromRow, MySql, Pool, Postgres, Sqlite};

use crate::db::connection::{DatabaseConnection, DatabasePool};
use crate::error::Result;
use crate::schema::types::{Column, DatabaseSchema, Table};

/// Schema analyzer trait
#[async_trait]
pub trait Analyzer {
    /// One row per column of every base table in the schema
    async fn catalog(&self, schema_name: Option<&str>) -> Result<Vec<CatalogRow>>;

    /// Analyze the database schema
    async fn analyze_schema(&self, schema_name: Option<&str>) -> Result<DatabaseSchema> {
        let rows = self.catalog(schema_name).await?;
        Ok(group_catalog(schema_name, rows))
    }
}

/// Schema analyzer for database schema introspection
pub struct SchemaAnalyzer {
    connection: DatabaseConnection,
}

impl SchemaAnalyzer {
    /// Create a new schema analyzer
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Analyze the current database schema
    pub async fn analyze(&self) -> Result<DatabaseSchema> {
        let schema = self.connection.schema();
        let db_schema = match self.connection.pool() {
            DatabasePool::Postgres(pool) => PostgresAnalyzer { pool }.analyze_schema(schema).await?,
            DatabasePool::MySql(pool) => MySqlAnalyzer { pool }.analyze_schema(schema).await?,
            DatabasePool::Sqlite(pool) => SqliteAnalyzer { pool }.analyze_schema(schema).await?,
        };

        tracing::debug!(
            schema = ?schema,
            tables = db_schema.tables.len(),
            "Loaded schema"
        );
        Ok(db_schema)
    }
}

/// One column as reported by the catalog query
#[derive(Debug, Clone, FromRow)]
pub struct CatalogRow {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub primary_key: i64,
}

/// Fold catalog rows into tables, keeping the order the rows arrived in
pub fn group_catalog(schema_name: Option<&str>, rows: Vec<CatalogRow>) -> DatabaseSchema {
    let mut db_schema = DatabaseSchema::new(schema_name.map(str::to_string));

    for row in rows {
        let column =
            Column::new(&row.column_name, &row.data_type).primary_key(row.primary_key != 0);
        db_schema
            .tables
            .entry(row.table_name.clone())
            .or_insert_with(|| Table::new(&row.table_name))
            .add_column(column);
    }

    db_schema
}

/// PostgreSQL schema analyzer
struct PostgresAnalyzer<'a> {
    pool: &'a Pool<Postgres>,
}

#[async_trait]
impl<'a> Analyzer for PostgresAnalyzer<'a> {
    async fn catalog(&self, schema_name: Option<&str>) -> Result<Vec<CatalogRow>> {
        let schema = schema_name.unwrap_or("public");

        // format_type gives the full declared type, modifiers included, which
        // is what typed placeholders cast to when writing.
        let sql = r#"
            SELECT
                c.relname::text AS table_name,
                a.attname::text AS column_name,
                format_type(a.atttypid, a.atttypmod) AS data_type,
                (CASE WHEN EXISTS (
                    SELECT 1 FROM pg_index i
                    WHERE i.indrelid = c.oid
                      AND i.indisprimary
                      AND a.attnum = ANY(i.indkey)
                ) THEN 1 ELSE 0 END)::bigint AS primary_key
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_attribute a ON a.attrelid = c.oid
            WHERE n.nspname = $1
              AND c.relkind = 'r'
              AND a.attnum > 0
              AND NOT a.attisdropped
            ORDER BY c.relname, a.attnum
        "#;

        let rows = sqlx::query_as::<_, CatalogRow>(sql)
            .bind(schema)
            .fetch_all(self.pool)
            .await?;

        Ok(rows)
    }
}

/// MySQL schema analyzer
struct MySqlAnalyzer<'a> {
    pool: &'a Pool<MySql>,
}

#[async_trait]
impl<'a> Analyzer for MySqlAnalyzer<'a> {
    async fn catalog(&self, schema_name: Option<&str>) -> Result<Vec<CatalogRow>> {
        // information_schema reports its strings with a binary collation on
        // some server versions, hence the casts.
        let sql = r#"
            SELECT
                CAST(c.TABLE_NAME AS CHAR) AS table_name,
                CAST(c.COLUMN_NAME AS CHAR) AS column_name,
                CAST(c.COLUMN_TYPE AS CHAR) AS data_type,
                CAST(c.COLUMN_KEY = 'PRI' AS SIGNED) AS primary_key
            FROM information_schema.COLUMNS c
            JOIN information_schema.TABLES t
              ON t.TABLE_SCHEMA = c.TABLE_SCHEMA AND t.TABLE_NAME = c.TABLE_NAME
            WHERE c.TABLE_SCHEMA = COALESCE(?, DATABASE())
              AND t.TABLE_TYPE = 'BASE TABLE'
            ORDER BY c.TABLE_NAME, c.ORDINAL_POSITION
        "#;

        let rows = sqlx::query_as::<_, CatalogRow>(sql)
            .bind(schema_name)
            .fetch_all(self.pool)
            .await?;

        Ok(rows)
    }
}

/// SQLite schema analyzer
struct SqliteAnalyzer<'a> {
    pool: &'a Pool<Sqlite>,
}

#[async_trait]
impl<'a> Analyzer for SqliteAnalyzer<'a> {
    async fn catalog(&self, _schema_name: Option<&str>) -> Result<Vec<CatalogRow>> {
        let sql = r#"
            SELECT
                m.name AS table_name,
                p.name AS column_name,
                p.type AS data_type,
                CASE WHEN p.pk > 0 THEN 1 ELSE 0 END AS primary_key
            FROM sqlite_master m
            JOIN pragma_table_info(m.name) p
            WHERE m.type = 'table'
              AND m.name NOT LIKE 'sqlite_%'
            ORDER BY m.name, p.cid
        "#;

        let rows = sqlx::query_as::<_, CatalogRow>(sql)
            .fetch_all(self.pool)
            .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(table: &str, column: &str, data_type: &str, pk: bool) -> CatalogRow {
        CatalogRow {
            table_name: table.to_string(),
            column_name: column.to_string(),
            data_type: data_type.to_string(),
            primary_key: pk as i64,
        }
    }

    #[test]
    fn groups_rows_into_tables_in_catalog_order() {
        let rows = vec![
            row("accounts", "id", "integer", true),
            row("accounts", "name", "text", false),
            row("orders", "tenant", "integer", true),
            row("orders", "id", "bigint", true),
            row("orders", "total", "numeric(10,2)", false),
        ];

        let schema = group_catalog(Some("public"), rows);

        assert_eq!(schema.schema_name.as_deref(), Some("public"));
        let tables: Vec<&str> = schema.tables.keys().map(|k| k.as_str()).collect();
        assert_eq!(tables, vec!["accounts", "orders"]);

        let orders = &schema.tables["orders"];
        let columns: Vec<&str> = orders.columns.keys().map(|k| k.as_str()).collect();
        assert_eq!(columns, vec!["tenant", "id", "total"]);
        assert_eq!(orders.primary_key_positions(), vec![0, 1]);
        assert_eq!(orders.column("total").unwrap().data_type, "numeric(10,2)");
    }

    #[test]
    fn empty_catalog_gives_empty_schema() {
        let schema = group_catalog(None, Vec::new());
        assert!(schema.tables.is_empty());
        assert!(schema.schema_name.is_none());
    }
}
