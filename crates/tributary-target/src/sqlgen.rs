//! Identifier handling and SQL text generation for the target.
//!
//! This is the single place where target identifiers are lowercased and
//! quoted. Values never appear here; they are bound by the writer.

use tributary_core::{pg_type_for_column, ColumnSpec};

/// Lowercase and double-quote one identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.to_lowercase().replace('"', "\"\""))
}

/// Fully-qualified, lowercased, quoted table name.
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// `CREATE SCHEMA IF NOT EXISTS` for the lowercased schema.
pub fn create_schema_sql(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema))
}

/// `CREATE TABLE IF NOT EXISTS` from the source column specs.
///
/// Every column is nullable (dirty source data must not be rejected by
/// constraints); the PK clause is emitted only when the source reported
/// primary-key members.
pub fn create_table_sql(schema: &str, table: &str, columns: &[ColumnSpec]) -> String {
    let mut definitions: Vec<String> = columns
        .iter()
        .map(|col| format!("{} {}", quote_ident(&col.name), pg_type_for_column(col)))
        .collect();

    let pk: Vec<String> = columns
        .iter()
        .filter(|c| c.is_primary())
        .map(|c| quote_ident(&c.name))
        .collect();
    if !pk.is_empty() {
        definitions.push(format!("PRIMARY KEY ({})", pk.join(", ")));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        qualified(schema, table),
        definitions.join(", ")
    )
}

/// `TRUNCATE … CASCADE`.
pub fn truncate_sql(schema: &str, table: &str) -> String {
    format!("TRUNCATE TABLE {} CASCADE", qualified(schema, table))
}

/// `DROP TABLE IF EXISTS` (schema-mismatch reset path).
pub fn drop_table_sql(schema: &str, table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", qualified(schema, table))
}

/// `INSERT INTO "s"."t" ("c1", …) VALUES ` — the head shared by insert and
/// upsert statements; the writer appends bound value tuples.
pub fn insert_head(schema: &str, table: &str, columns: &[String]) -> String {
    let list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {} ({list}) VALUES ", qualified(schema, table))
}

/// ` ON CONFLICT (pk…) DO UPDATE SET c = EXCLUDED.c, …`.
pub fn conflict_clause(columns: &[String], pk_columns: &[String]) -> String {
    let conflict = pk_columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let assignments = columns
        .iter()
        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(" ON CONFLICT ({conflict}) DO UPDATE SET {assignments}")
}

/// Select list that renders every column as text.
pub fn text_select_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("{}::text", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, data_type: &str, key: &str) -> ColumnSpec {
        ColumnSpec {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            key: key.into(),
            extra: String::new(),
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
        }
    }

    #[test]
    fn test_quote_ident_lowercases() {
        assert_eq!(quote_ident("Orders"), "\"orders\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_create_table_with_pk() {
        let columns = vec![col("Id", "int", "PRI"), col("Name", "varchar", "")];
        assert_eq!(
            create_table_sql("Sales", "Orders", &columns),
            "CREATE TABLE IF NOT EXISTS \"sales\".\"orders\" \
             (\"id\" INTEGER, \"name\" VARCHAR, PRIMARY KEY (\"id\"))"
        );
    }

    #[test]
    fn test_create_table_without_pk() {
        let columns = vec![col("name", "varchar", "")];
        let sql = create_table_sql("s", "t", &columns);
        assert!(!sql.contains("PRIMARY KEY"));
    }

    #[test]
    fn test_create_table_idempotent_text() {
        // The statement itself is IF NOT EXISTS; issuing it twice is a no-op.
        let columns = vec![col("id", "int", "PRI")];
        let first = create_table_sql("s", "t", &columns);
        let second = create_table_sql("s", "t", &columns);
        assert_eq!(first, second);
        assert!(first.starts_with("CREATE TABLE IF NOT EXISTS"));
    }

    #[test]
    fn test_insert_head_and_conflict_clause() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let pk = vec!["id".to_string()];
        assert_eq!(
            insert_head("s", "t", &columns),
            "INSERT INTO \"s\".\"t\" (\"id\", \"name\") VALUES "
        );
        assert_eq!(
            conflict_clause(&columns, &pk),
            " ON CONFLICT (\"id\") DO UPDATE SET \
             \"id\" = EXCLUDED.\"id\", \"name\" = EXCLUDED.\"name\""
        );
    }

    #[test]
    fn test_truncate_cascades() {
        assert_eq!(
            truncate_sql("s", "t"),
            "TRUNCATE TABLE \"s\".\"t\" CASCADE"
        );
    }

    #[test]
    fn test_text_select_list() {
        let columns = vec!["id".to_string(), "Name".to_string()];
        assert_eq!(text_select_list(&columns), "\"id\"::text, \"name\"::text");
    }
}
