//! Duplicate detection over the key columns of a table.

use std::collections::HashSet;

use arrow::array::ArrayRef;
use arrow::row::{RowConverter, SortField};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ClientError, ClientResult};
use crate::table::Table;

/// A key column declaration that may be nested, e.g. `["SUBJID", ["VISIT"]]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum KeyColumnSpec {
    Name(String),
    List(Vec<KeyColumnSpec>),
}

impl KeyColumnSpec {
    fn flatten_into(self, output: &mut Vec<String>) {
        match self {
            KeyColumnSpec::Name(name) => output.push(name),
            KeyColumnSpec::List(items) => {
                for item in items {
                    item.flatten_into(output);
                }
            }
        }
    }
}

/// The ordered list of key column names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyColumns(Vec<String>);

impl KeyColumns {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(columns.into_iter().map(Into::into).collect())
    }

    pub fn from_nested(specs: Vec<KeyColumnSpec>) -> Self {
        let mut columns = vec![];
        KeyColumnSpec::List(specs).flatten_into(&mut columns);
        Self(columns)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<S: Into<String>> From<Vec<S>> for KeyColumns {
    fn from(columns: Vec<S>) -> Self {
        Self::new(columns)
    }
}

impl Serialize for KeyColumns {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for KeyColumns {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut columns = vec![];
        KeyColumnSpec::deserialize(deserializer)?.flatten_into(&mut columns);
        Ok(Self(columns))
    }
}

/// The row counts attached to a successful publish response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValidation {
    /// The number of distinct rows under the key columns.
    pub valid_rows: usize,
    /// The number of rows that repeat an earlier key.
    pub duplicate_rows_based_on_keys: usize,
}

/// Returns the column indices matching the key columns, ignoring case.
/// All key columns without a match are reported together.
fn resolve_key_columns(table: &Table, key_columns: &KeyColumns) -> ClientResult<Vec<usize>> {
    let names: Vec<String> = table
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().to_lowercase())
        .collect();
    let mut indices = Vec::with_capacity(key_columns.len());
    let mut missing = vec![];
    for key in key_columns.as_slice() {
        let key_lower = key.to_lowercase();
        match names.iter().position(|name| *name == key_lower) {
            Some(index) => indices.push(index),
            None => missing.push(key.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(ClientError::KeyColumnsNotFound(missing));
    }
    Ok(indices)
}

/// Counts the distinct tuples of the key columns. Nulls are equal to each other.
/// A table with neither rows nor columns has no distinct tuples for any key.
pub fn count_distinct(table: &Table, key_columns: &KeyColumns) -> ClientResult<usize> {
    if table.num_rows() == 0 && table.schema().fields().is_empty() {
        return Ok(0);
    }
    let indices = resolve_key_columns(table, key_columns)?;
    if table.num_rows() == 0 {
        return Ok(0);
    }
    if indices.is_empty() {
        // Every row has the same empty key.
        return Ok(1);
    }
    let sort_fields = indices
        .iter()
        .map(|&i| SortField::new(table.schema().field(i).data_type().clone()))
        .collect();
    let converter = RowConverter::new(sort_fields)?;
    let mut seen = HashSet::new();
    for batch in table.batches() {
        let columns: Vec<ArrayRef> = indices.iter().map(|&i| batch.column(i).clone()).collect();
        let rows = converter.convert_columns(&columns)?;
        seen.extend(rows.iter().map(|row| row.owned()));
    }
    Ok(seen.len())
}

pub fn validate_keys(table: &Table, key_columns: &KeyColumns) -> ClientResult<KeyValidation> {
    let valid_rows = count_distinct(table, key_columns)?;
    Ok(KeyValidation {
        valid_rows,
        duplicate_rows_based_on_keys: table.num_rows() - valid_rows,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Int64Array, RecordBatch, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;

    fn visits(rows: &[(&str, &str)]) -> Table {
        let schema = Schema::new(vec![
            Field::new("SUBJID", DataType::Utf8, false),
            Field::new("VISIT", DataType::Utf8, true),
        ]);
        let subjects: Vec<&str> = rows.iter().map(|r| r.0).collect();
        let visits: Vec<&str> = rows.iter().map(|r| r.1).collect();
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(StringArray::from(subjects)),
                Arc::new(StringArray::from(visits)),
            ],
        )
        .unwrap();
        Table::from(batch)
    }

    #[test]
    fn test_count_distinct_with_duplicates() {
        let table = visits(&[
            ("001", "V1"),
            ("002", "V1"),
            ("003", "V2"),
            ("001", "V1"),
            ("002", "V1"),
        ]);
        let keys = KeyColumns::from(vec!["SUBJID", "VISIT"]);
        let validation = validate_keys(&table, &keys).unwrap();
        assert_eq!(validation.valid_rows, 3);
        assert_eq!(validation.duplicate_rows_based_on_keys, 2);
    }

    #[test]
    fn test_count_distinct_is_case_insensitive() {
        let table = visits(&[("001", "V1"), ("001", "V2"), ("001", "V2")]);
        let lower = count_distinct(&table, &KeyColumns::from(vec!["subjid", "visit"])).unwrap();
        let upper = count_distinct(&table, &KeyColumns::from(vec!["SUBJID", "VISIT"])).unwrap();
        assert_eq!(lower, 2);
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_count_distinct_reports_all_missing_columns() {
        let table = visits(&[("001", "V1")]);
        let keys = KeyColumns::from(vec!["SUBJID", "SITE", "ARM"]);
        match count_distinct(&table, &keys) {
            Err(ClientError::KeyColumnsNotFound(missing)) => {
                assert_eq!(missing, vec!["SITE".to_string(), "ARM".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_count_distinct_edge_cases() {
        let keys = KeyColumns::from(vec!["SUBJID"]);
        let empty = Table::empty(visits(&[]).schema().clone());
        assert_eq!(count_distinct(&empty, &keys).unwrap(), 0);

        let unique = visits(&[("001", "V1"), ("002", "V1"), ("003", "V1")]);
        assert_eq!(count_distinct(&unique, &keys).unwrap(), 3);

        let same = visits(&[("001", "V1"), ("001", "V2"), ("001", "V3"), ("001", "V4")]);
        let validation = validate_keys(&same, &keys).unwrap();
        assert_eq!(validation.valid_rows, 1);
        assert_eq!(validation.duplicate_rows_based_on_keys, 3);
    }

    #[test]
    fn test_validate_keys_on_empty_json_rows() {
        let table = Table::from_json_rows(&serde_json::json!([])).unwrap();
        let validation = validate_keys(&table, &KeyColumns::from(vec!["SUBJID"])).unwrap();
        assert_eq!(validation.valid_rows, 0);
        assert_eq!(validation.duplicate_rows_based_on_keys, 0);

        let table = visits(&[]);
        assert!(matches!(
            count_distinct(&table, &KeyColumns::from(vec!["MISSING"])),
            Err(ClientError::KeyColumnsNotFound(_))
        ));
    }

    #[test]
    fn test_count_distinct_across_batches_and_nulls() {
        let schema = Arc::new(Schema::new(vec![Field::new("ID", DataType::Int64, true)]));
        let first = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(vec![Some(1), None]))],
        )
        .unwrap();
        let second = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(vec![Some(1), None, Some(2)]))],
        )
        .unwrap();
        let table = Table::try_new(schema, vec![first, second]).unwrap();
        let validation = validate_keys(&table, &KeyColumns::from(vec!["id"])).unwrap();
        assert_eq!(validation.valid_rows, 3);
        assert_eq!(validation.duplicate_rows_based_on_keys, 2);
    }

    #[test]
    fn test_key_columns_accept_nested_lists() {
        let keys: KeyColumns = serde_json::from_str(r#"["SUBJID", ["VISIT", ["SITE"]]]"#).unwrap();
        assert_eq!(keys.as_slice(), ["SUBJID", "VISIT", "SITE"]);
        let keys: KeyColumns = serde_json::from_str(r#""SUBJID""#).unwrap();
        assert_eq!(keys.as_slice(), ["SUBJID"]);
        assert_eq!(
            serde_json::to_string(&KeyColumns::from(vec!["A", "B"])).unwrap(),
            r#"["A","B"]"#
        );
        let nested = KeyColumns::from_nested(vec![
            KeyColumnSpec::Name("A".to_string()),
            KeyColumnSpec::List(vec![KeyColumnSpec::Name("B".to_string())]),
        ]);
        assert_eq!(nested.as_slice(), ["A", "B"]);
    }
}
