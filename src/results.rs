use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{Connection, ToSql};

use crate::error::SchedulerDbError;

/// Rows returned by [`Database::query`](crate::Database::query).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub rows: Vec<Vec<Value>>,
    column_names: Arc<Vec<String>>,
}

impl ResultSet {
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `row`, if both exist.
    #[must_use]
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_names.iter().position(|name| name == column)?;
        self.rows.get(row)?.get(idx)
    }
}

fn values_as_tosql(values: &[Value]) -> Vec<&dyn ToSql> {
    values.iter().map(|v| v as &dyn ToSql).collect()
}

/// Prepare `query`, bind `params` positionally and collect every row.
pub(crate) fn execute_select(
    conn: &Connection,
    query: &str,
    params: &[Value],
) -> Result<ResultSet, SchedulerDbError> {
    let mut stmt = conn.prepare_cached(query)?;
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let width = column_names.len();

    let param_refs = values_as_tosql(params);
    let mut rows_iter = stmt.query(&param_refs[..])?;
    let mut rows = Vec::new();
    while let Some(row) = rows_iter.next()? {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            values.push(row.get::<_, Value>(idx)?);
        }
        rows.push(values);
    }

    Ok(ResultSet {
        rows,
        column_names: Arc::new(column_names),
    })
}

/// Run a single statement and return the number of changed rows.
pub(crate) fn execute_dml(
    conn: &Connection,
    query: &str,
    params: &[Value],
) -> Result<usize, SchedulerDbError> {
    let mut stmt = conn.prepare_cached(query)?;
    let param_refs = values_as_tosql(params);
    Ok(stmt.execute(&param_refs[..])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_collects_rows_and_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t(id INTEGER, name TEXT)").unwrap();
        let changed = execute_dml(
            &conn,
            "INSERT INTO t VALUES (?1, ?2), (?3, ?4)",
            &[
                Value::Integer(1),
                Value::Text("a".into()),
                Value::Integer(2),
                Value::Null,
            ],
        )
        .unwrap();
        assert_eq!(changed, 2);

        let rs = execute_select(
            &conn,
            "SELECT id, name FROM t WHERE id >= ?1 ORDER BY id",
            &[Value::Integer(1)],
        )
        .unwrap();
        assert_eq!(rs.column_names(), &["id".to_string(), "name".to_string()][..]);
        assert_eq!(rs.len(), 2);
        assert_eq!(rs.get(0, "name"), Some(&Value::Text("a".into())));
        assert_eq!(rs.get(1, "name"), Some(&Value::Null));
        assert_eq!(rs.get(2, "id"), None);
        assert_eq!(rs.get(0, "missing"), None);
    }
}
