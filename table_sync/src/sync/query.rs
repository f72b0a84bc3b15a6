//! Statement builders for the diff and apply phases
//!
//! Pure functions from a dialect and an LCD table to [`SqlQuery`] values.
//! Nothing here touches a connection.

use crate::db::dialect::{Dialect, SqlQuery, ROW_HASH_COLUMN};
use crate::db::value::Value;
use crate::schema::types::{Column, Key, Table};

/// Keys per batch so that one key predicate stays within the parameter limit
pub fn batch_size(pk_width: usize, max_parameters: usize) -> usize {
    (max_parameters / pk_width.max(1)).max(1)
}

/// The diff query: every LCD column in order, the row hash when the engine
/// computes one, ordered by primary key. The filter column, when given, must
/// be part of `table`.
pub fn hashed_query(
    dialect: Dialect,
    schema: Option<&str>,
    table: &Table,
    filter: Option<(&Column, &str)>,
) -> SqlQuery {
    let mut select: Vec<String> = table
        .columns
        .values()
        .map(|c| dialect.projection(c))
        .collect();

    let all: Vec<&Column> = table.columns.values().collect();
    if let Some(hash) = dialect.row_hash_expr(&all) {
        select.push(format!("{} AS {}", hash, dialect.quote(ROW_HASH_COLUMN)));
    }

    let mut sql = format!(
        "SELECT {} FROM {}",
        select.join(", "),
        dialect.qualify(schema, &table.name)
    );

    let mut params = Vec::new();
    if let Some((column, value)) = filter {
        sql.push_str(&format!(
            " WHERE {} = {}",
            dialect.quote(&column.name),
            dialect.typed_placeholder(1, &column.data_type)
        ));
        params.push(Value::Text(value.to_string()));
    }

    let order: Vec<String> = table
        .primary_key()
        .into_iter()
        .map(|c| dialect.order_expr(c))
        .collect();
    sql.push_str(&format!(" ORDER BY {}", order.join(", ")));

    SqlQuery::new(sql, params)
}

/// `pk = ?` for one key column. Columns read in their own type get a typed
/// parameter, so that e.g. a padded `character(n)` value is compared as
/// `bpchar` rather than as text.
fn key_term(dialect: Dialect, column: &Column, n: usize) -> String {
    let placeholder = if dialect.is_native(column) {
        dialect.typed_placeholder(n, &column.data_type)
    } else {
        dialect.placeholder(n)
    };
    format!("{} = {}", dialect.value_expr(column), placeholder)
}

/// `(pk1 = ? AND pk2 = ?) OR (...)` over the given keys, numbering
/// placeholders from `first`
fn key_predicate(
    dialect: Dialect,
    table: &Table,
    keys: &[Key],
    first: usize,
) -> (String, Vec<Value>) {
    let pk = table.primary_key();
    let mut n = first;
    let mut params = Vec::with_capacity(keys.len() * pk.len());

    let groups: Vec<String> = keys
        .iter()
        .map(|key| {
            let terms: Vec<String> = pk
                .iter()
                .zip(key.values())
                .map(|(column, value)| {
                    let term = key_term(dialect, column, n);
                    n += 1;
                    params.push(value.clone());
                    term
                })
                .collect();
            format!("({})", terms.join(" AND "))
        })
        .collect();

    (groups.join(" OR "), params)
}

/// Fetch the full LCD rows for a set of keys
pub fn selection_query(
    dialect: Dialect,
    schema: Option<&str>,
    table: &Table,
    keys: &[Key],
) -> SqlQuery {
    let select: Vec<String> = table.columns.values().map(|c| dialect.projection(c)).collect();
    let (predicate, params) = key_predicate(dialect, table, keys, 1);

    SqlQuery::new(
        format!(
            "SELECT {} FROM {} WHERE {}",
            select.join(", "),
            dialect.qualify(schema, &table.name),
            predicate
        ),
        params,
    )
}

/// Insert statement taking one row's values in LCD column order
pub fn insert_template(dialect: Dialect, schema: Option<&str>, table: &Table) -> String {
    let columns: Vec<String> = table.columns.values().map(|c| dialect.quote(&c.name)).collect();
    let values: Vec<String> = table
        .columns
        .values()
        .enumerate()
        .map(|(i, c)| dialect.typed_placeholder(i + 1, &c.data_type))
        .collect();

    let mut sql = format!(
        "INSERT INTO {} ({})",
        dialect.qualify(schema, &table.name),
        columns.join(", ")
    );
    if let Some(clause) = dialect.insert_override() {
        sql.push(' ');
        sql.push_str(clause);
    }
    sql.push_str(&format!(" VALUES ({})", values.join(", ")));
    sql
}

/// Update statement setting every non-key column of one row, or `None` when
/// the table has nothing but key columns. Parameters are bound as arranged
/// by [`update_params`].
pub fn update_template(dialect: Dialect, schema: Option<&str>, table: &Table) -> Option<String> {
    let (keys, values): (Vec<&Column>, Vec<&Column>) =
        table.columns.values().partition(|c| c.primary_key);
    if values.is_empty() {
        return None;
    }

    let mut n = 0;
    let mut next = || {
        n += 1;
        n
    };

    let assignments: Vec<String> = values
        .iter()
        .map(|c| {
            let placeholder = dialect.typed_placeholder(next(), &c.data_type);
            format!("{} = {}", dialect.quote(&c.name), placeholder)
        })
        .collect();
    let conditions: Vec<String> = keys.iter().map(|c| key_term(dialect, c, next())).collect();

    Some(format!(
        "UPDATE {} SET {} WHERE {}",
        dialect.qualify(schema, &table.name),
        assignments.join(", "),
        conditions.join(" AND ")
    ))
}

/// Reorder a row in LCD column order into update parameters: non-key values
/// first, then key values
pub fn update_params(table: &Table, row: &[Value]) -> Vec<Value> {
    let (keys, values): (Vec<_>, Vec<_>) = table
        .columns
        .values()
        .zip(row)
        .partition(|(column, _)| column.primary_key);

    values
        .into_iter()
        .chain(keys)
        .map(|(_, value)| value.clone())
        .collect()
}

/// Delete the rows with the given keys
pub fn delete_query(
    dialect: Dialect,
    schema: Option<&str>,
    table: &Table,
    keys: &[Key],
) -> SqlQuery {
    let (predicate, params) = key_predicate(dialect, table, keys, 1);
    SqlQuery::new(
        format!(
            "DELETE FROM {} WHERE {}",
            dialect.qualify(schema, &table.name),
            predicate
        ),
        params,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn members() -> Table {
        let mut table = Table::new("members");
        table.add_column(Column::new("tenant", "integer").primary_key(true));
        table.add_column(Column::new("id", "integer").primary_key(true));
        table.add_column(Column::new("email", "text"));
        table.add_column(Column::new("partitionId", "integer"));
        table
    }

    fn key(a: i64, b: i64) -> Key {
        Key::new(vec![Value::Int(a), Value::Int(b)])
    }

    #[rstest]
    #[case(1, 2000, 2000)]
    #[case(2, 2000, 1000)]
    #[case(3, 2000, 666)]
    #[case(3, 2, 1)]
    #[case(0, 10, 10)]
    fn batch_size_respects_parameter_limit(
        #[case] pk_width: usize,
        #[case] max_parameters: usize,
        #[case] expected: usize,
    ) {
        let size = batch_size(pk_width, max_parameters);
        assert_eq!(size, expected);
        assert!(size >= 1);
    }

    #[test]
    fn postgres_hashed_query() {
        let query = hashed_query(Dialect::Postgres, Some("public"), &members(), None);
        assert_eq!(
            query.sql,
            "SELECT \"tenant\", \"id\", \"email\", \"partitionId\", \
             decode(md5(ROW(\"tenant\", \"id\", \"email\", \"partitionId\")::text), 'hex') \
             AS \"row_hash\" \
             FROM \"public\".\"members\" ORDER BY \"tenant\" NULLS FIRST, \"id\" NULLS FIRST"
        );
        assert!(query.params.is_empty());
    }

    #[test]
    fn filtered_hashed_query_binds_filter_value() {
        let table = members();
        let filter = table.column("partitionId").map(|c| (c, "7"));
        let query = hashed_query(Dialect::Sqlite, None, &table, filter);
        assert_eq!(
            query.sql,
            "SELECT \"tenant\", \"id\", \"email\", \"partitionId\" FROM \"members\" \
             WHERE \"partitionId\" = ? ORDER BY \"tenant\" COLLATE BINARY, \"id\" COLLATE BINARY"
        );
        assert_eq!(query.params, vec![Value::from("7")]);

        let query = hashed_query(Dialect::Postgres, None, &table, filter);
        assert!(query.sql.contains("WHERE \"partitionId\" = CAST($1 AS integer)"));
    }

    #[test]
    fn mysql_hashed_query_uses_json_digest() {
        let mut table = Table::new("t");
        table.add_column(Column::new("id", "bigint").primary_key(true));
        table.add_column(Column::new("price", "decimal(10,2)"));
        let query = hashed_query(Dialect::MySql, None, &table, None);
        assert_eq!(
            query.sql,
            "SELECT `id`, CAST(`price` AS CHAR) AS `price`, \
             UNHEX(MD5(CAST(JSON_ARRAY(`id`, `price`) AS CHAR))) AS `row_hash` \
             FROM `t` ORDER BY `id`"
        );
    }

    #[test]
    fn selection_query_numbers_placeholders_across_keys() {
        let query = selection_query(Dialect::Postgres, None, &members(), &[key(1, 2), key(1, 3)]);
        assert_eq!(
            query.sql,
            "SELECT \"tenant\", \"id\", \"email\", \"partitionId\" FROM \"members\" \
             WHERE (\"tenant\" = CAST($1 AS integer) AND \"id\" = CAST($2 AS integer)) \
             OR (\"tenant\" = CAST($3 AS integer) AND \"id\" = CAST($4 AS integer))"
        );
        assert_eq!(
            query.params,
            vec![Value::Int(1), Value::Int(2), Value::Int(1), Value::Int(3)]
        );
    }

    #[test]
    fn padded_character_keys_are_matched_in_their_own_type() {
        let mut table = Table::new("codes");
        table.add_column(Column::new("code", "character(4)").primary_key(true));
        table.add_column(Column::new("label", "text"));
        let keys = [Key::new(vec![Value::from("ab  ")])];

        let query = selection_query(Dialect::Postgres, None, &table, &keys);
        assert_eq!(
            query.sql,
            "SELECT \"code\", \"label\" FROM \"codes\" WHERE (\"code\" = CAST($1 AS character(4)))"
        );
        assert_eq!(query.params, vec![Value::from("ab  ")]);

        let query = delete_query(Dialect::Postgres, None, &table, &keys);
        assert!(query.sql.ends_with("WHERE (\"code\" = CAST($1 AS character(4)))"));

        assert_eq!(
            update_template(Dialect::Postgres, None, &table).unwrap(),
            "UPDATE \"codes\" SET \"label\" = CAST($1 AS text) \
             WHERE \"code\" = CAST($2 AS character(4))"
        );
    }

    #[test]
    fn text_projected_keys_compare_as_text() {
        let mut table = Table::new("events");
        table.add_column(Column::new("id", "uuid").primary_key(true));
        let keys = [Key::new(vec![Value::from("0b0e7c1c-0000-4000-8000-000000000000")])];

        let query = selection_query(Dialect::Postgres, None, &table, &keys);
        assert!(query.sql.ends_with("WHERE (\"id\"::text = $1)"));

        let query = selection_query(Dialect::MySql, None, &table, &keys);
        assert!(query.sql.ends_with("WHERE (CAST(`id` AS CHAR) = ?)"));
    }

    #[test]
    fn insert_template_per_dialect() {
        assert_eq!(
            insert_template(Dialect::Postgres, Some("public"), &members()),
            "INSERT INTO \"public\".\"members\" (\"tenant\", \"id\", \"email\", \"partitionId\") \
             OVERRIDING SYSTEM VALUE \
             VALUES (CAST($1 AS integer), CAST($2 AS integer), \
             CAST($3 AS text), CAST($4 AS integer))"
        );
        assert_eq!(
            insert_template(Dialect::MySql, None, &members()),
            "INSERT INTO `members` (`tenant`, `id`, `email`, `partitionId`) VALUES (?, ?, ?, ?)"
        );
    }

    #[test]
    fn update_sets_values_then_matches_keys() {
        let table = members();
        assert_eq!(
            update_template(Dialect::Postgres, None, &table).unwrap(),
            "UPDATE \"members\" \
             SET \"email\" = CAST($1 AS text), \"partitionId\" = CAST($2 AS integer) \
             WHERE \"tenant\" = CAST($3 AS integer) AND \"id\" = CAST($4 AS integer)"
        );

        let row = vec![Value::Int(1), Value::Int(2), Value::from("a@b"), Value::Int(9)];
        assert_eq!(
            update_params(&table, &row),
            vec![Value::from("a@b"), Value::Int(9), Value::Int(1), Value::Int(2)]
        );
    }

    #[test]
    fn key_only_tables_have_nothing_to_update() {
        let mut table = Table::new("links");
        table.add_column(Column::new("a", "integer").primary_key(true));
        table.add_column(Column::new("b", "integer").primary_key(true));
        assert!(update_template(Dialect::Sqlite, None, &table).is_none());
    }

    #[test]
    fn delete_query_matches_keys() {
        let query = delete_query(Dialect::MySql, Some("shop"), &members(), &[key(4, 5)]);
        assert_eq!(
            query.sql,
            "DELETE FROM `shop`.`members` WHERE (`tenant` = ? AND `id` = ?)"
        );
        assert_eq!(query.params, vec![Value::Int(4), Value::Int(5)]);
    }
}
