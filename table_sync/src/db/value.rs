//! Scalar cell values
//!
//! Rows read from either side are decoded into [`Value`]s so keys can be
//! compared in Rust with the same ordering the generated `ORDER BY` produces,
//! and so rows read from the source can be re-bound into destination
//! statements regardless of the backend.

use sqlx::database::HasArguments;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::query::Query;
use sqlx::sqlite::SqliteRow;
use sqlx::{Database, Encode, Row, Type, TypeInfo, ValueRef};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};

/// A single decoded cell
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Position of the variant in the cross-type ordering.
    /// NULL sorts first, matching `NULLS FIRST` in the generated queries.
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::Bytes(_) => 4,
        }
    }

    /// Feed an unambiguous encoding of the value into a digest
    fn digest_into(&self, ctx: &mut md5::Context) {
        ctx.consume([self.rank()]);
        match self {
            Value::Null => {}
            Value::Bool(b) => ctx.consume([*b as u8]),
            Value::Int(i) => ctx.consume(i.to_be_bytes()),
            Value::Float(f) => ctx.consume(f.to_bits().to_be_bytes()),
            Value::Text(s) => {
                ctx.consume((s.len() as u64).to_be_bytes());
                ctx.consume(s.as_bytes());
            }
            Value::Bytes(b) => {
                ctx.consume((b.len() as u64).to_be_bytes());
                ctx.consume(b);
            }
        }
    }
}

/// MD5 over a row's values, for engines without a server-side digest function
pub fn digest(values: &[Value]) -> Vec<u8> {
    let mut ctx = md5::Context::new();
    for value in values {
        value.digest_into(&mut ctx);
    }
    ctx.compute().0.to_vec()
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => cmp_floats(*a, *b),
            (Value::Int(a), Value::Float(b)) => cmp_int_float(*a, *b),
            (Value::Float(a), Value::Int(b)) => cmp_int_float(*b, *a).reverse(),
            (Value::Text(a), Value::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Numeric order, with `-0.0 == 0.0` and NaNs outside every number
fn cmp_floats(a: f64, b: f64) -> Ordering {
    if a == b {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

/// Exact comparison of an integer with a float; going through `i as f64`
/// rounds above 2^53 and breaks transitivity
fn cmp_int_float(i: i64, f: f64) -> Ordering {
    // 2^63 is exactly representable, i64::MAX is not
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;

    if f.is_nan() {
        return if f.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if f >= LIMIT {
        return Ordering::Less;
    }
    if f < -LIMIT {
        return Ordering::Greater;
    }

    let whole = f.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal if f > whole => Ordering::Less,
        Ordering::Equal if f < whole => Ordering::Greater,
        ordering => ordering,
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            // Int and Float compare numerically, so they must hash alike
            Value::Int(i) => (*i as f64).to_bits().hash(state),
            Value::Float(f) if *f == 0.0 => 0f64.to_bits().hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Bytes(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Bind values, in order, to a query for any of the supported backends
pub fn bind_values<'q, DB>(
    mut query: Query<'q, DB, <DB as HasArguments<'q>>::Arguments>,
    values: &[Value],
) -> Query<'q, DB, <DB as HasArguments<'q>>::Arguments>
where
    DB: Database,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    String: Encode<'q, DB> + Type<DB>,
    Vec<u8>: Encode<'q, DB> + Type<DB>,
    Option<String>: Encode<'q, DB> + Type<DB>,
{
    for value in values {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
            Value::Bytes(v) => query.bind(v.clone()),
        };
    }
    query
}

/// Decoding of backend rows into [`Value`]s
pub trait DecodeRow {
    /// Number of columns in the row
    fn width(&self) -> usize;

    /// Decode the column at `index`
    fn value_at(&self, index: usize) -> Result<Value>;

    /// Decode every column, in projection order
    fn values(&self) -> Result<Vec<Value>> {
        (0..self.width()).map(|i| self.value_at(i)).collect()
    }
}

fn unsupported(type_name: &str, index: usize) -> Error {
    Error::TypeMappingError(format!(
        "Column {} has type {} which has no value mapping",
        index, type_name
    ))
}

impl DecodeRow for PgRow {
    fn width(&self) -> usize {
        self.len()
    }

    fn value_at(&self, index: usize) -> Result<Value> {
        let raw = self.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let type_name = raw.type_info().name().to_string();

        let value = match type_name.as_str() {
            "BOOL" => Value::Bool(self.try_get(index)?),
            "INT2" => Value::Int(self.try_get::<i16, _>(index)?.into()),
            "INT4" => Value::Int(self.try_get::<i32, _>(index)?.into()),
            "INT8" => Value::Int(self.try_get(index)?),
            "FLOAT4" => Value::Float(self.try_get::<f32, _>(index)?.into()),
            "FLOAT8" => Value::Float(self.try_get(index)?),
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => Value::Text(self.try_get(index)?),
            "BYTEA" => Value::Bytes(self.try_get(index)?),
            other => return Err(unsupported(other, index)),
        };
        Ok(value)
    }
}

impl DecodeRow for MySqlRow {
    fn width(&self) -> usize {
        self.len()
    }

    fn value_at(&self, index: usize) -> Result<Value> {
        let raw = self.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let type_name = raw.type_info().name().to_string();

        let value = match type_name.as_str() {
            "BOOLEAN" => Value::Bool(self.try_get(index)?),
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
                Value::Int(self.try_get(index)?)
            }
            name if name.ends_with("UNSIGNED") => {
                let unsigned: u64 = self.try_get(index)?;
                let signed = i64::try_from(unsigned).map_err(|_| {
                    Error::TypeMappingError(format!(
                        "Column {} holds unsigned value {} beyond the signed range",
                        index, unsigned
                    ))
                })?;
                Value::Int(signed)
            }
            "FLOAT" => Value::Float(self.try_get::<f32, _>(index)?.into()),
            "DOUBLE" => Value::Float(self.try_get(index)?),
            "VARCHAR" | "CHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM"
            | "SET" => Value::Text(self.try_get(index)?),
            "VARBINARY" | "BINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
                Value::Bytes(self.try_get(index)?)
            }
            other => return Err(unsupported(other, index)),
        };
        Ok(value)
    }
}

impl DecodeRow for SqliteRow {
    fn width(&self) -> usize {
        self.len()
    }

    // SQLite reports the storage class of each value, and its accessors
    // coerce, so the unchecked getters are used throughout.
    fn value_at(&self, index: usize) -> Result<Value> {
        let raw = self.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let type_name = raw.type_info().name().to_string();

        let value = match type_name.as_str() {
            "INTEGER" | "BOOLEAN" => Value::Int(self.try_get_unchecked(index)?),
            "REAL" => Value::Float(self.try_get_unchecked(index)?),
            "BLOB" => Value::Bytes(self.try_get_unchecked(index)?),
            _ => Value::Text(self.try_get_unchecked(index)?),
        };
        Ok(value)
    }
}
