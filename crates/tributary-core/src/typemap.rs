//! Source data type to PostgreSQL type mapping.
//!
//! One table covers all vendors; the per-engine adapters report lowercase
//! source type names and this module resolves the PostgreSQL column type
//! used both in `CREATE TABLE` DDL and as the bind cast for row values.

use crate::models::ColumnSpec;

/// Map a declared source type to the PostgreSQL column type.
///
/// `max_length` applies to character types (validated into 1..=65535,
/// otherwise the unbounded form is used); `precision`/`scale` apply to
/// decimal types.
pub fn pg_type_for(
    source_type: &str,
    max_length: Option<u32>,
    precision: Option<u32>,
    scale: Option<u32>,
) -> String {
    let ty = source_type.trim().to_ascii_lowercase();
    // Strip any parenthesised suffix the source included, e.g. "decimal(10,2)".
    let base = ty.split('(').next().unwrap_or(&ty).trim().to_string();

    match base.as_str() {
        "int" | "integer" | "int4" | "mediumint" | "serial" => "INTEGER".to_string(),
        "smallint" | "tinyint" | "int2" => "SMALLINT".to_string(),
        "bigint" | "int8" | "bigserial" | "long" => "BIGINT".to_string(),
        "decimal" | "numeric" => match (precision, scale) {
            (Some(p), Some(s)) => format!("NUMERIC({p},{s})"),
            (Some(p), None) => format!("NUMERIC({p})"),
            _ => "NUMERIC".to_string(),
        },
        "money" | "smallmoney" => "NUMERIC(19,4)".to_string(),
        "float" | "real" => "REAL".to_string(),
        "double" | "double precision" => "DOUBLE PRECISION".to_string(),
        "char" | "nchar" | "varchar" | "nvarchar" | "character" | "character varying" => {
            let kind = match base.as_str() {
                "char" | "nchar" | "character" => "CHAR",
                _ => "VARCHAR",
            };
            match max_length {
                Some(n) if (1..=65535).contains(&n) => format!("{kind}({n})"),
                _ => "VARCHAR".to_string(),
            }
        }
        "text" | "longtext" | "mediumtext" | "tinytext" | "ntext" | "clob" | "string" => {
            "TEXT".to_string()
        }
        "date" => "DATE".to_string(),
        "time" => "TIME".to_string(),
        "datetime" | "datetime2" | "smalldatetime" | "timestamp"
        | "timestamp without time zone" => "TIMESTAMP".to_string(),
        "time without time zone" | "time with time zone" => "TIME".to_string(),
        "datetimeoffset" | "timestamptz" | "timestamp with time zone" => {
            "TIMESTAMP WITH TIME ZONE".to_string()
        }
        "bit" | "boolean" | "bool" => "BOOLEAN".to_string(),
        "blob" | "longblob" | "mediumblob" | "tinyblob" | "binary" | "varbinary" | "image"
        | "bytea" => "BYTEA".to_string(),
        "uniqueidentifier" | "uuid" => "UUID".to_string(),
        "xml" | "sql_variant" => "TEXT".to_string(),
        "json" | "jsonb" | "document" | "array" => "JSONB".to_string(),
        _ => "TEXT".to_string(),
    }
}

/// Resolve the PostgreSQL type for one described column.
pub fn pg_type_for_column(col: &ColumnSpec) -> String {
    pg_type_for(
        &col.data_type,
        col.max_length,
        col.numeric_precision,
        col.numeric_scale,
    )
}

/// Resolve the PostgreSQL types for a full column list, in order.
pub fn pg_types_for_columns(columns: &[ColumnSpec]) -> Vec<String> {
    columns.iter().map(pg_type_for_column).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, data_type: &str, max_length: Option<u32>) -> ColumnSpec {
        ColumnSpec {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            key: String::new(),
            extra: String::new(),
            max_length,
            numeric_precision: None,
            numeric_scale: None,
        }
    }

    #[test]
    fn test_integer_family() {
        assert_eq!(pg_type_for("int", None, None, None), "INTEGER");
        assert_eq!(pg_type_for("tinyint", None, None, None), "SMALLINT");
        assert_eq!(pg_type_for("bigint", None, None, None), "BIGINT");
    }

    #[test]
    fn test_decimal_precision() {
        assert_eq!(
            pg_type_for("decimal", None, Some(10), Some(2)),
            "NUMERIC(10,2)"
        );
        assert_eq!(pg_type_for("numeric", None, None, None), "NUMERIC");
        assert_eq!(pg_type_for("money", None, None, None), "NUMERIC(19,4)");
    }

    #[test]
    fn test_float_family() {
        assert_eq!(pg_type_for("float", None, None, None), "REAL");
        assert_eq!(pg_type_for("double", None, None, None), "DOUBLE PRECISION");
    }

    #[test]
    fn test_char_lengths() {
        assert_eq!(pg_type_for("varchar", Some(100), None, None), "VARCHAR(100)");
        assert_eq!(pg_type_for("nvarchar", Some(50), None, None), "VARCHAR(50)");
        assert_eq!(pg_type_for("char", Some(2), None, None), "CHAR(2)");
        // Out-of-range or missing lengths fall back to unbounded VARCHAR.
        assert_eq!(pg_type_for("varchar", Some(100_000), None, None), "VARCHAR");
        assert_eq!(pg_type_for("varchar", None, None, None), "VARCHAR");
        assert_eq!(pg_type_for("nchar", Some(0), None, None), "VARCHAR");
    }

    #[test]
    fn test_text_family() {
        for ty in ["text", "longtext", "mediumtext", "tinytext", "ntext", "clob"] {
            assert_eq!(pg_type_for(ty, None, None, None), "TEXT", "ty={ty}");
        }
    }

    #[test]
    fn test_temporal_family() {
        assert_eq!(pg_type_for("date", None, None, None), "DATE");
        assert_eq!(pg_type_for("time", None, None, None), "TIME");
        for ty in ["datetime", "datetime2", "smalldatetime", "timestamp"] {
            assert_eq!(pg_type_for(ty, None, None, None), "TIMESTAMP", "ty={ty}");
        }
        assert_eq!(
            pg_type_for("datetimeoffset", None, None, None),
            "TIMESTAMP WITH TIME ZONE"
        );
    }

    #[test]
    fn test_misc_types() {
        assert_eq!(pg_type_for("bit", None, None, None), "BOOLEAN");
        assert_eq!(pg_type_for("varbinary", None, None, None), "BYTEA");
        assert_eq!(pg_type_for("image", None, None, None), "BYTEA");
        assert_eq!(pg_type_for("uniqueidentifier", None, None, None), "UUID");
        assert_eq!(pg_type_for("xml", None, None, None), "TEXT");
        assert_eq!(pg_type_for("sql_variant", None, None, None), "TEXT");
        assert_eq!(pg_type_for("document", None, None, None), "JSONB");
        assert_eq!(pg_type_for("array", None, None, None), "JSONB");
    }

    #[test]
    fn test_unknown_type_defaults_to_text() {
        assert_eq!(pg_type_for("geometry", None, None, None), "TEXT");
    }

    #[test]
    fn test_parenthesised_source_type() {
        assert_eq!(pg_type_for("varchar(30)", Some(30), None, None), "VARCHAR(30)");
        assert_eq!(pg_type_for("decimal(8,3)", None, Some(8), Some(3)), "NUMERIC(8,3)");
    }

    #[test]
    fn test_columns_in_order() {
        let cols = vec![col("id", "int", None), col("name", "varchar", Some(10))];
        assert_eq!(pg_types_for_columns(&cols), vec!["INTEGER", "VARCHAR(10)"]);
    }
}
