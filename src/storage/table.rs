use crate::core::{DaoError, Result, Row, Schema};
use std::collections::BTreeMap;

/// Rows of one entity table, keyed by their `i64` primary key
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    schema: Schema,
    rows: BTreeMap<i64, Row>,
    next_key: i64,
}

impl Table {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            rows: BTreeMap::new(),
            next_key: 1,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: i64) -> Option<&Row> {
        self.rows.get(&key)
    }

    pub fn contains(&self, key: i64) -> bool {
        self.rows.contains_key(&key)
    }

    /// Rows in ascending key order
    pub fn scan(&self) -> impl Iterator<Item = (i64, &Row)> {
        self.rows.iter().map(|(key, row)| (*key, row))
    }

    /// Insert a new row, assigning the next key when none is given
    pub fn insert(&mut self, key: Option<i64>, row: Row) -> Result<i64> {
        self.schema.validate_row(&row)?;

        let key = key.unwrap_or(self.next_key);
        if self.rows.contains_key(&key) {
            return Err(DaoError::ConstraintViolation(format!(
                "UNIQUE constraint failed: {}.key = {}",
                self.name, key
            )));
        }

        self.put(key, row);
        Ok(key)
    }

    /// Insert or overwrite; returns the key and the replaced image, if any
    pub fn upsert(&mut self, key: Option<i64>, row: Row) -> Result<(i64, Option<Row>)> {
        self.schema.validate_row(&row)?;

        let key = key.unwrap_or(self.next_key);
        let old = self.put(key, row);
        Ok((key, old))
    }

    /// Overwrite an existing row; returns the previous image
    pub fn update(&mut self, key: i64, row: Row) -> Result<Row> {
        self.schema.validate_row(&row)?;

        match self.rows.get_mut(&key) {
            Some(existing) => Ok(std::mem::replace(existing, row)),
            None => Err(DaoError::EntityNotFound {
                table: self.name.clone(),
                key,
            }),
        }
    }

    pub fn delete(&mut self, key: i64) -> Option<Row> {
        self.rows.remove(&key)
    }

    /// Remove every row, handing them back for the undo log
    pub fn clear(&mut self) -> BTreeMap<i64, Row> {
        std::mem::take(&mut self.rows)
    }

    /// Put a row back without validation (undo path)
    pub(crate) fn restore(&mut self, key: i64, row: Row) {
        self.put(key, row);
    }

    pub(crate) fn restore_all(&mut self, rows: BTreeMap<i64, Row>) {
        for (key, row) in rows {
            self.put(key, row);
        }
    }

    fn put(&mut self, key: i64, row: Row) -> Option<Row> {
        if key >= self.next_key {
            self.next_key = key.saturating_add(1);
        }
        self.rows.insert(key, row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType, Value};

    fn table() -> Table {
        Table::new(
            "notes",
            Schema::new(vec![Column::new("text", DataType::Text).not_null()]),
        )
    }

    fn row(text: &str) -> Row {
        vec![Value::Text(text.into())]
    }

    #[test]
    fn test_insert_assigns_increasing_keys() {
        let mut table = table();
        assert_eq!(table.insert(None, row("a")).unwrap(), 1);
        assert_eq!(table.insert(Some(10), row("b")).unwrap(), 10);
        assert_eq!(table.insert(None, row("c")).unwrap(), 11);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_insert_rejects_duplicate_key() {
        let mut table = table();
        table.insert(Some(1), row("a")).unwrap();
        let err = table.insert(Some(1), row("b")).unwrap_err();
        assert!(matches!(err, DaoError::ConstraintViolation(_)));
        assert_eq!(table.get(1), Some(&row("a")));
    }

    #[test]
    fn test_invalid_row_is_not_stored() {
        let mut table = table();
        assert!(table.insert(None, vec![Value::Null]).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_update_missing_row() {
        let mut table = table();
        let err = table.update(5, row("x")).unwrap_err();
        assert_eq!(
            err,
            DaoError::EntityNotFound {
                table: "notes".into(),
                key: 5
            }
        );
    }

    #[test]
    fn test_upsert_returns_previous_image() {
        let mut table = table();
        table.insert(Some(3), row("old")).unwrap();
        let (key, old) = table.upsert(Some(3), row("new")).unwrap();
        assert_eq!(key, 3);
        assert_eq!(old, Some(row("old")));
        assert_eq!(table.get(3), Some(&row("new")));
    }

    #[test]
    fn test_clear_and_restore_all() {
        let mut table = table();
        table.insert(None, row("a")).unwrap();
        table.insert(None, row("b")).unwrap();

        let rows = table.clear();
        assert!(table.is_empty());

        table.restore_all(rows);
        assert_eq!(table.scan().map(|(key, _)| key).collect::<Vec<_>>(), vec![1, 2]);
    }
}
