//! In-memory row index consulted by relationship resolution.

use std::collections::{BTreeMap, HashMap};

use graphloom_core::{BusinessKey, Column, ColumnKind, Row};

/// What a set of indexed rows is addressed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    /// Rows of every table mapped to this label.
    Label(String),
    /// Rows of one junction table, mapped or not.
    Table(String),
}

/// Rows for one [`IndexKey`], unique by business key.
#[derive(Debug, Default)]
pub struct IndexedRows {
    columns: BTreeMap<String, ColumnKind>,
    rows: Vec<Row>,
    by_key: HashMap<BusinessKey, usize>,
}

impl IndexedRows {
    /// A later row with an existing key replaces the earlier one in place.
    fn insert(&mut self, row: Row) {
        match self.by_key.get(&row.key) {
            Some(&slot) => self.rows[slot] = row,
            None => {
                self.by_key.insert(row.key.clone(), self.rows.len());
                self.rows.push(row);
            }
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column_kind(&self, name: &str) -> ColumnKind {
        self.columns.get(name).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Rows keyed by (label, business key), built once per run.
#[derive(Debug, Default)]
pub struct RowIndex {
    entries: HashMap<IndexKey, IndexedRows>,
}

impl RowIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one extracted table. Tables sharing a label merge into one entry
    /// and their column sets are unioned.
    pub fn add_table(&mut self, key: IndexKey, columns: &[Column], rows: Vec<Row>) {
        let entry = self.entries.entry(key).or_default();
        for column in columns {
            entry.columns.insert(column.name.clone(), column.kind);
        }
        for row in rows {
            entry.insert(row);
        }
    }

    pub fn get(&self, key: &IndexKey) -> Option<&IndexedRows> {
        self.entries.get(key)
    }

    pub fn label(&self, label: &str) -> Option<&IndexedRows> {
        self.get(&IndexKey::Label(label.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
