//! Read-only tabular reference data.
//!
//! Tables are loaded once at startup and shared by every session behind an
//! `Arc`. Every operation returns a new table (or plain values); nothing here
//! mutates in place, so one session's filtering can never leak into another.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::TableError;
use crate::value::Value;

/// A rectangular table of [`Value`]s with named columns.
///
/// Deserializing goes through [`Table::new`], so a ragged table is rejected
/// before any operation can index past the end of a row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct RawTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl TryFrom<RawTable> for Table {
    type Error = TableError;

    fn try_from(raw: RawTable) -> Result<Self, Self::Error> {
        Table::new(raw.columns, raw.rows)
    }
}

/// Borrowed view of one row, for use in [`Table::filter`].
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Row<'a> {
    /// Cell of `column`, if the table has that column.
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|index| self.values.get(index))
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }
}

impl Table {
    /// Build a table, checking that every row has one cell per column.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, TableError> {
        if let Some(row) = rows.iter().find(|row| row.len() != columns.len()) {
            return Err(TableError::RowWidth {
                expected: columns.len(),
                found: row.len(),
            });
        }
        Ok(Self { columns, rows })
    }

    /// Build a table from JSON-style records.
    ///
    /// Columns appear in first-seen order. A record lacking a column gets
    /// `Value::Null` in that cell.
    pub fn from_records(records: Vec<IndexMap<String, Value>>) -> Self {
        let columns: IndexSet<String> = records
            .iter()
            .flat_map(|record| record.keys().cloned())
            .collect();
        let rows = records
            .into_iter()
            .map(|mut record| {
                columns
                    .iter()
                    .map(|column| record.swap_remove(column).unwrap_or_default())
                    .collect()
            })
            .collect();
        Self {
            columns: columns.into_iter().collect(),
            rows,
        }
    }

    /// Parse a JSON array of records.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let records: Vec<IndexMap<String, Value>> = serde_json::from_str(json)?;
        Ok(Self::from_records(records))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, column: &str) -> Result<usize, TableError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| TableError::UnknownColumn(column.to_owned()))
    }

    /// All cells of one column, top to bottom.
    pub fn column(&self, column: &str) -> Result<Vec<Value>, TableError> {
        let index = self.column_index(column)?;
        Ok(self.rows.iter().map(|row| row[index].clone()).collect())
    }

    /// Rows whose `column` equals `value`.
    pub fn filter_eq(&self, column: &str, value: &Value) -> Result<Table, TableError> {
        let index = self.column_index(column)?;
        Ok(self.retain(|row| &row[index] == value))
    }

    /// Rows for which `predicate` holds.
    pub fn filter<P>(&self, mut predicate: P) -> Table
    where
        P: FnMut(Row<'_>) -> bool,
    {
        let columns = &self.columns;
        self.retain(|values| predicate(Row { columns, values }))
    }

    fn retain(&self, mut keep: impl FnMut(&[Value]) -> bool) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|row| keep(row)).cloned().collect(),
        }
    }

    /// Project onto `columns`, in the order given.
    pub fn select(&self, columns: &[&str]) -> Result<Table, TableError> {
        let indices = columns
            .iter()
            .map(|column| self.column_index(column))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Table {
            columns: columns.iter().map(|c| (*c).to_owned()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        })
    }

    /// Distinct values of `column`, sorted.
    pub fn distinct(&self, column: &str) -> Result<Vec<Value>, TableError> {
        let mut values = self.column(column)?;
        values.sort_by(Value::total_cmp);
        values.dedup();
        Ok(values)
    }

    /// Sum of a numeric column. Null cells are skipped.
    pub fn sum(&self, column: &str) -> Result<f64, TableError> {
        let index = self.column_index(column)?;
        self.rows.iter().try_fold(0.0, |total, row| match &row[index] {
            Value::Null => Ok(total),
            cell => cell
                .as_f64()
                .map(|x| total + x)
                .map_err(|_| TableError::NotNumeric {
                    column: column.to_owned(),
                    value: cell.to_string(),
                }),
        })
    }

    /// The first `n` rows.
    pub fn head(&self, n: usize) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gapminder() -> Table {
        Table::from_json(
            r#"[
                {"country": "Brazil", "continent": "Americas", "year": 2007, "pop": 190.0},
                {"country": "Chile", "continent": "Americas", "year": 2007, "pop": 16.3},
                {"country": "Japan", "continent": "Asia", "year": 2007, "pop": 127.5},
                {"country": "Japan", "continent": "Asia", "year": 2002, "pop": 127.1},
                {"country": "Nauru", "continent": "Oceania", "year": 2007}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn records_fill_missing_cells() {
        let table = gapminder();
        assert_eq!(table.columns(), &["country", "continent", "year", "pop"]);
        assert_eq!(table.len(), 5);
        let nauru = table.rows().last().unwrap();
        assert_eq!(nauru.get("pop"), Some(&Value::Null));
    }

    #[test]
    fn filters_return_new_tables() {
        let table = gapminder();
        let asia = table.filter_eq("continent", &Value::from("Asia")).unwrap();
        assert_eq!(asia.len(), 2);
        assert_eq!(table.len(), 5);

        let recent = table.filter(|row| row.get("year") == Some(&Value::Int(2007)));
        assert_eq!(recent.len(), 4);

        assert_eq!(
            table.filter_eq("region", &Value::Null),
            Err(TableError::UnknownColumn("region".to_string()))
        );
    }

    #[test]
    fn distinct_is_sorted() {
        let table = gapminder();
        assert_eq!(
            table.distinct("continent").unwrap(),
            vec![
                Value::from("Americas"),
                Value::from("Asia"),
                Value::from("Oceania")
            ]
        );
        assert_eq!(
            table.distinct("year").unwrap(),
            vec![Value::Int(2002), Value::Int(2007)]
        );
    }

    #[test]
    fn sum_skips_nulls_and_rejects_text() {
        let table = gapminder();
        let americas = table
            .filter_eq("continent", &Value::from("Americas"))
            .unwrap();
        assert!((americas.sum("pop").unwrap() - 206.3).abs() < 1e-9);
        assert!(table.sum("pop").is_ok());
        assert!(matches!(
            table.sum("country"),
            Err(TableError::NotNumeric { .. })
        ));
    }

    #[test]
    fn select_and_head() {
        let table = gapminder().select(&["year", "country"]).unwrap().head(2);
        assert_eq!(table.columns(), &["year", "country"]);
        assert_eq!(
            table.column("country").unwrap(),
            vec![Value::from("Brazil"), Value::from("Chile")]
        );
    }

    #[test]
    fn deserialized_tables_are_checked() {
        let ragged = serde_json::from_str::<Table>(r#"{"columns": ["a", "b"], "rows": [[1]]}"#);
        let error = ragged.unwrap_err().to_string();
        assert!(error.contains("row has 1 cells, table has 2 columns"), "{error}");

        let table: Table =
            serde_json::from_str(r#"{"columns": ["a", "b"], "rows": [[1, "x"]]}"#).unwrap();
        assert_eq!(table.column("b").unwrap(), vec![Value::from("x")]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        assert_eq!(
            Table::new(vec!["a".into(), "b".into()], vec![vec![Value::Int(1)]]),
            Err(TableError::RowWidth {
                expected: 2,
                found: 1
            })
        );
    }
}
