//! Row extraction for one (source, table).

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use graphloom_core::{BusinessKey, Column, Row, SourceDatabase};

use crate::error::{EtlError, Result};
use crate::source::SourceReader;

/// Rows of one table, restricted to its included columns.
#[derive(Debug, Clone)]
pub struct ExtractedTable {
    pub source_id: i64,
    pub source_name: String,
    pub table: String,
    /// Included columns in ordinal order.
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

pub struct RowExtractor<'a> {
    reader: &'a dyn SourceReader,
    source: &'a SourceDatabase,
}

impl<'a> RowExtractor<'a> {
    pub fn new(reader: &'a dyn SourceReader, source: &'a SourceDatabase) -> Self {
        Self { reader, source }
    }

    /// Read one table: all declared columns minus `excluded`.
    ///
    /// The business key is the primary-key value(s) as extracted. A table
    /// without a usable primary key (none declared, or a key column excluded)
    /// falls back to ordinal keys `<source>.<table>#<n>`, so two sources with
    /// the same keyless table never share a key.
    pub async fn extract(&self, table: &str, excluded: &BTreeSet<String>) -> Result<ExtractedTable> {
        let schema = self.reader.describe_table(table).await?;

        let (columns, dropped): (Vec<Column>, Vec<Column>) = schema
            .columns
            .into_iter()
            .partition(|c| !excluded.contains(&c.name));

        if !dropped.is_empty() {
            let names: Vec<&str> = dropped.iter().map(|c| c.name.as_str()).collect();
            tracing::info!(source = %self.source.source_name, table, excluded = ?names, "Excluded columns");
        }
        if columns.is_empty() {
            return Err(EtlError::extraction(
                table,
                "no columns available after exclusions",
            ));
        }

        let key_usable = !schema.primary_key.is_empty()
            && schema.primary_key.iter().all(|k| !excluded.contains(k));
        if !key_usable {
            tracing::warn!(
                source = %self.source.source_name,
                table,
                primary_key = ?schema.primary_key,
                "No usable primary key, falling back to ordinal keys"
            );
        }

        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let raw_rows = self.reader.fetch_rows(table, &names).await?;

        let rows = raw_rows
            .into_iter()
            .enumerate()
            .map(|(ordinal, raw)| {
                let attributes = restrict(raw, &names);
                let key = if key_usable {
                    BusinessKey::from_values(
                        schema.primary_key.iter().map(|k| attributes.get(k).unwrap_or(&NULL)),
                    )
                } else {
                    None
                };
                Row {
                    source_id: self.source.source_id,
                    table: table.to_string(),
                    key: key.unwrap_or_else(|| ordinal_key(&self.source.source_name, table, ordinal)),
                    attributes,
                }
            })
            .collect::<Vec<_>>();

        tracing::info!(source = %self.source.source_name, table, rows = rows.len(), "Extracted rows");

        Ok(ExtractedTable {
            source_id: self.source.source_id,
            source_name: self.source.source_name.clone(),
            table: table.to_string(),
            columns,
            rows,
        })
    }
}

/// Keep only included columns, even if the reader returned more.
fn restrict(mut raw: Map<String, Value>, columns: &[String]) -> Map<String, Value> {
    let mut attributes = Map::new();
    for column in columns {
        let value = raw.remove(column).unwrap_or(Value::Null);
        attributes.insert(column.clone(), value);
    }
    attributes
}

static NULL: Value = Value::Null;

fn ordinal_key(source: &str, table: &str, ordinal: usize) -> BusinessKey {
    BusinessKey(format!("{source}.{table}#{}", ordinal + 1))
}
