//! Value normalization: map a raw source cell to a PostgreSQL-safe value.
//!
//! Source cells arrive as text (text-protocol semantics across every
//! adapter) and frequently carry dirt: zero-dates, stray control bytes,
//! mojibake, over-length strings, pseudo-binary garbage. [`normalize`]
//! applies a fixed rule ladder and yields one of three markers: a cleaned
//! text value to bind, an explicit NULL, or DEFAULT (let the target column
//! default apply).
//!
//! The normalizer never fails and is idempotent: feeding its text output
//! back through with the same declared type returns the same text.

use crate::defaults::BINARY_VALUE_CAP;

/// Zero-date markers that mean "no value" in upstream systems.
const ZERO_DATE_MARKERS: [&str; 3] = ["0000-00-00", "1900-01-01", "1970-01-01"];

/// Result of normalizing one cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Cleaned value, ready to bind (unquoted).
    Text(String),
    /// Explicit SQL NULL.
    Null,
    /// Let PostgreSQL apply the column default.
    Default,
}

impl Normalized {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Normalized::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Normalized::Null)
    }
}

fn is_temporal(ty: &str) -> bool {
    ty.contains("TIMESTAMP") || ty.contains("DATETIME") || ty.contains("DATE") || ty.contains("TIME")
}

/// Date-bearing types; plain TIME values legitimately lack `-` and fall
/// under 10 characters, so the plausibility rule must not see them.
fn is_date_bearing(ty: &str) -> bool {
    ty.contains("TIMESTAMP") || ty.contains("DATETIME") || ty.contains("DATE")
}

fn is_binary(ty: &str) -> bool {
    ty.contains("BYTEA") || ty.contains("BLOB") || ty == "BIT"
}

fn is_boolean(ty: &str) -> bool {
    ty.contains("BOOLEAN") || ty == "BOOL"
}

fn is_integer(ty: &str) -> bool {
    ty.contains("INTEGER") || ty.contains("BIGINT") || ty.contains("SMALLINT")
}

fn is_float(ty: &str) -> bool {
    ty.contains("REAL")
        || ty.contains("FLOAT")
        || ty.contains("DOUBLE")
        || ty.contains("NUMERIC")
        || ty.contains("DECIMAL")
}

/// Parse the declared character limit out of `VARCHAR(n)` / `CHAR(n)`.
/// Limits outside 1..=65535 are ignored.
fn char_limit(ty: &str) -> Option<usize> {
    if !ty.contains("VARCHAR") && !ty.contains("CHAR") {
        return None;
    }
    let open = ty.find('(')?;
    let close = ty.find(')')?;
    let n: usize = ty.get(open + 1..close)?.trim().parse().ok()?;
    (1..=65535).contains(&n).then_some(n)
}

/// The replacement emitted when a value is forced to NULL: types with a
/// sensible zero get it, TEXT stays NULL, other textual types defer to the
/// column default.
fn null_replacement(ty: &str) -> Normalized {
    if is_integer(ty) {
        Normalized::Text("0".to_string())
    } else if is_float(ty) {
        Normalized::Text("0.0".to_string())
    } else if ty.contains("TIMESTAMP") || ty.contains("DATETIME") {
        Normalized::Text("1970-01-01 00:00:00".to_string())
    } else if ty.contains("DATE") {
        Normalized::Text("1970-01-01".to_string())
    } else if ty.contains("TIME") {
        Normalized::Text("00:00:00".to_string())
    } else if ty == "TEXT" {
        Normalized::Null
    } else {
        Normalized::Default
    }
}

/// Normalize one cell against its declared (PostgreSQL-mapped) column type.
///
/// Rules are applied in order; the first one that decides NULL wins and is
/// then routed through the per-type replacement table.
pub fn normalize(raw: Option<&str>, declared_type: &str) -> Normalized {
    let ty = declared_type.to_ascii_uppercase();

    let mut value = match raw {
        None => return null_replacement(&ty),
        Some(v) => v.to_string(),
    };

    // 1. Sentinel NULLs.
    let mut is_null = value.is_empty()
        || matches!(value.as_str(), "NULL" | "null" | "\\N" | "\\0")
        || (is_temporal(&ty) && ZERO_DATE_MARKERS.iter().any(|m| value.contains(m)));

    // 2. Bytes the target cannot take: anything non-ASCII, or control
    //    characters other than tab/LF/CR.
    if !is_null
        && value
            .bytes()
            .any(|b| b >= 0x80 || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r'))
    {
        is_null = true;
    }

    // 3. Declared character limit. Values here are ASCII (rule 2), so byte
    //    truncation is character truncation.
    if !is_null {
        if let Some(max) = char_limit(&ty) {
            if value.len() > max {
                tracing::debug!(
                    declared_type = %ty,
                    from = value.len(),
                    to = max,
                    "Truncating over-length value"
                );
                value.truncate(max);
            }
            if value.is_empty() {
                is_null = true;
            }
        }
    }

    // 4. Binary hygiene: hex digits, spaces, backslash and `x` only.
    if !is_null && is_binary(&ty) {
        if value
            .bytes()
            .any(|b| !(b.is_ascii_hexdigit() || b == b' ' || b == b'\\' || b == b'x'))
        {
            is_null = true;
        } else if value.len() > BINARY_VALUE_CAP {
            tracing::debug!(
                declared_type = %ty,
                from = value.len(),
                "Truncating oversized binary value"
            );
            value.truncate(BINARY_VALUE_CAP);
        }
    }

    // 5. Date plausibility: must contain a dash, be at least 10 characters,
    //    not be a bare number, and not start with a zero year.
    if !is_null && is_date_bearing(&ty) {
        let bare_number = !value.is_empty()
            && value.chars().all(|c| c.is_ascii_digit() || c == '.');
        if bare_number
            || value.len() < 10
            || !value.contains('-')
            || value.starts_with("0000")
        {
            is_null = true;
        }
    }

    if is_null {
        return null_replacement(&ty);
    }

    // 6. Boolean folding.
    if is_boolean(&ty) {
        let truthy = matches!(
            value.to_ascii_lowercase().as_str(),
            "y" | "yes" | "1" | "true"
        );
        return Normalized::Text(if truthy { "true" } else { "false" }.to_string());
    }

    // 7. Numeric re-parse.
    if is_integer(&ty) {
        return Normalized::Text(
            value
                .trim()
                .parse::<i64>()
                .map(|n| n.to_string())
                .unwrap_or_else(|_| "0".to_string()),
        );
    }
    if is_float(&ty) {
        return Normalized::Text(
            value
                .trim()
                .parse::<f64>()
                .map(|n| n.to_string())
                .unwrap_or_else(|_| "0.0".to_string()),
        );
    }

    Normalized::Text(value)
}

/// Normalize a whole row against its per-column declared types. Rows whose
/// width disagrees with the type list are returned as-is-length (shorter of
/// the two); callers validate widths upstream.
pub fn normalize_row(row: &[Option<String>], types: &[String]) -> Vec<Normalized> {
    row.iter()
        .zip(types.iter())
        .map(|(cell, ty)| normalize(cell.as_deref(), ty))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_null_strings() {
        for raw in ["", "NULL", "null", "\\N", "\\0"] {
            assert_eq!(normalize(Some(raw), "TEXT"), Normalized::Null, "raw={raw:?}");
        }
    }

    #[test]
    fn test_zero_date_to_null() {
        // Spec scenario: sentinel date normalization.
        assert_eq!(normalize(Some("0000-00-00"), "DATE"), Normalized::Text("1970-01-01".into()));
        // The same sentinel under TEXT is just a string.
        assert_eq!(
            normalize(Some("0000-00-00"), "TEXT"),
            Normalized::Text("0000-00-00".into())
        );
    }

    #[test]
    fn test_timestamp_null_default() {
        // A nulled timestamp cell becomes the epoch literal.
        assert_eq!(
            normalize(Some("0000-00-00"), "TIMESTAMP"),
            Normalized::Text("1970-01-01 00:00:00".into())
        );
        assert_eq!(
            normalize(None, "TIMESTAMP"),
            Normalized::Text("1970-01-01 00:00:00".into())
        );
    }

    #[test]
    fn test_non_ascii_forces_null() {
        assert_eq!(normalize(Some("caf\u{00e9}"), "TEXT"), Normalized::Null);
        assert_eq!(normalize(Some("a\u{0007}b"), "TEXT"), Normalized::Null);
        // Tab, LF and CR survive.
        assert_eq!(
            normalize(Some("a\tb"), "TEXT"),
            Normalized::Text("a\tb".into())
        );
    }

    #[test]
    fn test_varchar_truncation() {
        assert_eq!(
            normalize(Some("abcdef"), "VARCHAR(3)"),
            Normalized::Text("abc".into())
        );
        assert_eq!(
            normalize(Some("ab"), "VARCHAR(3)"),
            Normalized::Text("ab".into())
        );
        // Unparseable or out-of-range limits are ignored.
        assert_eq!(
            normalize(Some("abcdef"), "VARCHAR(0)"),
            Normalized::Text("abcdef".into())
        );
        assert_eq!(
            normalize(Some("abcdef"), "VARCHAR"),
            Normalized::Text("abcdef".into())
        );
    }

    #[test]
    fn test_binary_rules() {
        assert_eq!(
            normalize(Some("deadbeef"), "BYTEA"),
            Normalized::Text("deadbeef".into())
        );
        assert_eq!(
            normalize(Some("\\xdeadbeef"), "BYTEA"),
            Normalized::Text("\\xdeadbeef".into())
        );
        // Non-hex garbage is dropped; BYTEA defers to the column default.
        assert_eq!(normalize(Some("not-binary!"), "BYTEA"), Normalized::Default);
        // Over-long binary is truncated, not dropped.
        let long = "a".repeat(1500);
        match normalize(Some(&long), "BYTEA") {
            Normalized::Text(s) => assert_eq!(s.len(), 1000),
            other => panic!("expected truncated text, got {other:?}"),
        }
    }

    #[test]
    fn test_date_plausibility() {
        assert_eq!(
            normalize(Some("2024-03-01"), "DATE"),
            Normalized::Text("2024-03-01".into())
        );
        // Bare numbers, short values and dashless values are dropped.
        assert_eq!(
            normalize(Some("20240301"), "DATE"),
            Normalized::Text("1970-01-01".into())
        );
        assert_eq!(
            normalize(Some("3-1"), "DATE"),
            Normalized::Text("1970-01-01".into())
        );
        assert_eq!(
            normalize(Some("2024/03/01"), "DATE"),
            Normalized::Text("1970-01-01".into())
        );
    }

    #[test]
    fn test_plain_time_survives() {
        // TIME values have no dash and are short; they must pass untouched.
        assert_eq!(
            normalize(Some("13:45:09"), "TIME"),
            Normalized::Text("13:45:09".into())
        );
        assert_eq!(normalize(None, "TIME"), Normalized::Text("00:00:00".into()));
    }

    #[test]
    fn test_boolean_folding() {
        for raw in ["y", "YES", "1", "true", "True"] {
            assert_eq!(
                normalize(Some(raw), "BOOLEAN"),
                Normalized::Text("true".into()),
                "raw={raw:?}"
            );
        }
        for raw in ["n", "no", "0", "false", "maybe"] {
            assert_eq!(
                normalize(Some(raw), "BOOLEAN"),
                Normalized::Text("false".into()),
                "raw={raw:?}"
            );
        }
    }

    #[test]
    fn test_numeric_reparse() {
        assert_eq!(normalize(Some("007"), "INTEGER"), Normalized::Text("7".into()));
        assert_eq!(
            normalize(Some("twelve"), "INTEGER"),
            Normalized::Text("0".into())
        );
        assert_eq!(
            normalize(Some("1.50"), "DOUBLE PRECISION"),
            Normalized::Text("1.5".into())
        );
        assert_eq!(
            normalize(Some("x"), "NUMERIC(10,2)"),
            Normalized::Text("0.0".into())
        );
    }

    #[test]
    fn test_null_replacement_table() {
        assert_eq!(normalize(None, "INTEGER"), Normalized::Text("0".into()));
        assert_eq!(normalize(None, "REAL"), Normalized::Text("0.0".into()));
        assert_eq!(normalize(None, "DATE"), Normalized::Text("1970-01-01".into()));
        assert_eq!(normalize(None, "TEXT"), Normalized::Null);
        assert_eq!(normalize(None, "VARCHAR(20)"), Normalized::Default);
        assert_eq!(normalize(None, "UUID"), Normalized::Default);
    }

    #[test]
    fn test_idempotence() {
        let cases = [
            ("  42 ", "INTEGER"),
            ("1.50", "REAL"),
            ("YES", "BOOLEAN"),
            ("abcdef", "VARCHAR(4)"),
            ("2024-03-01 10:20:30", "TIMESTAMP"),
            ("0000-00-00", "DATE"),
            ("deadbeef", "BYTEA"),
            ("plain text", "TEXT"),
        ];
        for (raw, ty) in cases {
            let once = normalize(Some(raw), ty);
            if let Normalized::Text(s) = &once {
                let twice = normalize(Some(s), ty);
                assert_eq!(once, twice, "not idempotent for {raw:?} as {ty}");
            }
        }
    }

    #[test]
    fn test_normalize_row() {
        let row = vec![Some("1".to_string()), None, Some("x".to_string())];
        let types = vec![
            "INTEGER".to_string(),
            "TEXT".to_string(),
            "VARCHAR(10)".to_string(),
        ];
        let out = normalize_row(&row, &types);
        assert_eq!(
            out,
            vec![
                Normalized::Text("1".into()),
                Normalized::Null,
                Normalized::Text("x".into()),
            ]
        );
    }
}
