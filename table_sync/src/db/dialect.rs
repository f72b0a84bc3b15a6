//! SQL dialect differences between the supported backends
//!
//! Everything here is pure string building. The merge join only works if the
//! `ORDER BY` a dialect emits sorts rows exactly the way [`Value`] orders
//! them, so each dialect:
//!
//! * sorts NULLs first,
//! * sorts text with a binary collation,
//! * projects types that have no [`Value`] mapping as text, and sorts and
//!   compares on that text projection rather than on the raw column.

use serde::Serialize;

use crate::db::value::Value;
use crate::schema::types::Column;

/// Name of the per-row digest column appended to diff queries
pub const ROW_HASH_COLUMN: &str = "row_hash";

/// A parameterized statement plus its parameters in binding order
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlQuery {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// SQL flavour of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

const POSTGRES_NATIVE: &[&str] = &[
    "smallint",
    "integer",
    "bigint",
    "boolean",
    "real",
    "double precision",
    "text",
    "character varying",
    "character",
    "name",
    "bytea",
];

const POSTGRES_TEXT: &[&str] = &["text", "character varying", "character", "name"];

const MYSQL_NATIVE: &[&str] = &[
    "tinyint",
    "smallint",
    "mediumint",
    "int",
    "integer",
    "bigint",
    "float",
    "double",
    "real",
    "char",
    "varchar",
    "tinytext",
    "text",
    "mediumtext",
    "longtext",
    "binary",
    "varbinary",
    "tinyblob",
    "blob",
    "mediumblob",
    "longblob",
];

const MYSQL_TEXT: &[&str] = &["char", "varchar", "tinytext", "text", "mediumtext", "longtext"];

impl Dialect {
    /// Driver name as used in configuration
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Quote an identifier
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Quoted, optionally schema-qualified table name
    pub fn qualify(&self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(schema) => format!("{}.{}", self.quote(schema), self.quote(table)),
            None => self.quote(table),
        }
    }

    /// Placeholder for the `n`th (1-based) parameter
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", n),
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        }
    }

    /// Placeholder for a value written into a column of `data_type`.
    ///
    /// PostgreSQL does not coerce bound parameters to the column type, so
    /// values are cast explicitly; text-projected values rely on this too.
    pub fn typed_placeholder(&self, n: usize, data_type: &str) -> String {
        match self {
            Dialect::Postgres if !data_type.trim().is_empty() => {
                format!("CAST(${} AS {})", n, data_type)
            }
            _ => self.placeholder(n),
        }
    }

    /// Lower-cased type name without length, precision or sign modifiers
    fn base_type(&self, data_type: &str) -> String {
        let lowered = data_type.trim().to_lowercase();
        let base = match self {
            Dialect::Postgres => lowered.split('(').next().unwrap_or(""),
            Dialect::MySql | Dialect::Sqlite => lowered
                .split(|c: char| c == '(' || c.is_whitespace())
                .next()
                .unwrap_or(""),
        };
        base.trim().to_string()
    }

    /// Whether values of the column decode directly into a [`Value`]
    pub fn is_native(&self, column: &Column) -> bool {
        let base = self.base_type(&column.data_type);
        match self {
            Dialect::Postgres => POSTGRES_NATIVE.contains(&base.as_str()),
            Dialect::MySql => MYSQL_NATIVE.contains(&base.as_str()),
            Dialect::Sqlite => true,
        }
    }

    fn is_text(&self, column: &Column) -> bool {
        let base = self.base_type(&column.data_type);
        match self {
            Dialect::Postgres => POSTGRES_TEXT.contains(&base.as_str()),
            Dialect::MySql => MYSQL_TEXT.contains(&base.as_str()),
            Dialect::Sqlite => false,
        }
    }

    /// Expression producing the column's value as it is read and compared
    pub fn value_expr(&self, column: &Column) -> String {
        let quoted = self.quote(&column.name);
        if self.is_native(column) {
            return quoted;
        }
        match self {
            Dialect::Postgres => format!("{}::text", quoted),
            Dialect::MySql => format!("CAST({} AS CHAR)", quoted),
            Dialect::Sqlite => quoted,
        }
    }

    /// Select-list entry for the column
    pub fn projection(&self, column: &Column) -> String {
        if self.is_native(column) {
            self.quote(&column.name)
        } else {
            format!("{} AS {}", self.value_expr(column), self.quote(&column.name))
        }
    }

    /// `ORDER BY` entry for a key column
    pub fn order_expr(&self, column: &Column) -> String {
        let value = self.value_expr(column);
        let textual = !self.is_native(column) || self.is_text(column);
        match self {
            Dialect::Postgres if textual => format!("{} COLLATE \"C\" NULLS FIRST", value),
            Dialect::Postgres => format!("{} NULLS FIRST", value),
            // MySQL sorts NULLs first by default
            Dialect::MySql if textual => format!("CAST({} AS BINARY)", value),
            Dialect::MySql => value,
            Dialect::Sqlite => format!("{} COLLATE BINARY", value),
        }
    }

    /// Server-side digest over the given columns, or `None` when the engine
    /// has no digest function and the hash is computed after decoding
    pub fn row_hash_expr(&self, columns: &[&Column]) -> Option<String> {
        let quoted: Vec<String> = columns.iter().map(|c| self.quote(&c.name)).collect();
        match self {
            Dialect::Postgres => Some(format!(
                "decode(md5(ROW({})::text), 'hex')",
                quoted.join(", ")
            )),
            Dialect::MySql => Some(format!(
                "UNHEX(MD5(CAST(JSON_ARRAY({}) AS CHAR)))",
                quoted.join(", ")
            )),
            Dialect::Sqlite => None,
        }
    }

    /// Statement that turns referential integrity checks off or back on for
    /// the current session
    pub fn constraints_sql(&self, enabled: bool) -> &'static str {
        match (self, enabled) {
            (Dialect::Postgres, false) => "SET session_replication_role = replica",
            (Dialect::Postgres, true) => "SET session_replication_role = DEFAULT",
            (Dialect::MySql, false) => "SET FOREIGN_KEY_CHECKS = 0",
            (Dialect::MySql, true) => "SET FOREIGN_KEY_CHECKS = 1",
            (Dialect::Sqlite, false) => "PRAGMA foreign_keys = OFF",
            (Dialect::Sqlite, true) => "PRAGMA foreign_keys = ON",
        }
    }

    /// Session statement allowing explicit values in auto-generated key
    /// columns, for engines that need one
    pub fn identity_insert_sql(&self, enabled: bool) -> Option<&'static str> {
        match (self, enabled) {
            (Dialect::MySql, true) => Some(
                "SET @table_sync_sql_mode = @@SESSION.sql_mode, \
                 SESSION sql_mode = \
                 CONCAT_WS(',', NULLIF(@@SESSION.sql_mode, ''), 'NO_AUTO_VALUE_ON_ZERO')",
            ),
            (Dialect::MySql, false) => Some("SET SESSION sql_mode = @table_sync_sql_mode"),
            _ => None,
        }
    }

    /// Clause placed before `VALUES` so explicit identity values are kept
    pub fn insert_override(&self) -> Option<&'static str> {
        match self {
            Dialect::Postgres => Some("OVERRIDING SYSTEM VALUE"),
            _ => None,
        }
    }
}
