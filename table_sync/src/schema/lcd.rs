//! Lowest common denominator of two table definitions
//!
//! Tables drift: columns get added on one side or dropped on the other. Rows
//! can only be compared over the columns both sides still share.

use crate::schema::types::Table;

/// Build a virtual table holding the columns present, by name, in both
/// `source` and `destination`.
///
/// Column definitions and order come from the source. An empty intersection
/// is returned as-is.
pub fn lcd(source: &Table, destination: &Table) -> Table {
    let mut table = Table::new(&source.name);

    for column in source.columns.values() {
        if destination.has_column(&column.name) {
            table.add_column(column.clone());
        }
    }

    table
}

/// Whether the intersection kept every primary key column of the source
pub fn retains_primary_key(source: &Table, lcd: &Table) -> bool {
    source
        .primary_key()
        .iter()
        .all(|col| lcd.has_column(&col.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::Column;
    use pretty_assertions::assert_eq;

    fn source() -> Table {
        let mut table = Table::new("members");
        table.add_column(Column::new("id", "integer").primary_key(true));
        table.add_column(Column::new("email", "character varying(255)"));
        table.add_column(Column::new("nickname", "text"));
        table.add_column(Column::new("partitionId", "integer"));
        table
    }

    fn destination() -> Table {
        let mut table = Table::new("members");
        table.add_column(Column::new("partitionId", "bigint"));
        table.add_column(Column::new("id", "bigint").primary_key(true));
        table.add_column(Column::new("email", "text"));
        table.add_column(Column::new("legacy_flag", "boolean"));
        table
    }

    #[test]
    fn keeps_only_shared_columns_in_source_order() {
        let table = lcd(&source(), &destination());
        let names: Vec<&str> = table.columns.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["id", "email", "partitionId"]);
        assert_eq!(table.name, "members");
    }

    #[test]
    fn takes_column_metadata_from_source() {
        let table = lcd(&source(), &destination());
        assert_eq!(table.column("id").unwrap().data_type, "integer");
        assert_eq!(table.column("email").unwrap().data_type, "character varying(255)");
        assert!(table.column("id").unwrap().primary_key);
        assert!(retains_primary_key(&source(), &table));
    }

    #[test]
    fn disjoint_tables_give_empty_intersection() {
        let mut other = Table::new("members");
        other.add_column(Column::new("something_else", "text"));
        let table = lcd(&source(), &other);
        assert!(table.columns.is_empty());
        assert!(!retains_primary_key(&source(), &table));
    }
}
