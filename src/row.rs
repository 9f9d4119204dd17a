use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::Error;

/// A single tabular cell. Metric cells are numeric; naming and status
/// columns stay text.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }

    /// Converts a JSON metric value. Nulls and nested structures have no
    /// tabular representation and yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Value> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number),
            serde_json::Value::String(s) => Some(Value::Text(s.clone())),
            serde_json::Value::Bool(b) => Some(Value::Text(b.to_string())),
            _ => None,
        }
    }

    /// Parses a CSV cell back into a value.
    pub fn parse(cell: &str) -> Value {
        match cell.parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::Text(cell.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// One record of fetched metrics: the identifying dimensions plus whatever
/// metric columns the API returned for it. An absent metric means "not
/// reported", not zero.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricRow {
    pub keys: BTreeMap<String, String>,
    pub values: BTreeMap<String, Value>,
}

impl MetricRow {
    /// The row's identity under the given key columns, in declared order.
    pub fn key_tuple(&self, key_columns: &[String]) -> Result<Vec<String>, Error> {
        key_columns
            .iter()
            .map(|column| {
                self.keys
                    .get(column)
                    .cloned()
                    .ok_or_else(|| Error::MissingKeyColumn {
                        column: column.clone(),
                    })
            })
            .collect()
    }

    /// Looks a column up regardless of whether it is a key or a value.
    pub fn cell(&self, column: &str) -> Option<String> {
        if let Some(key) = self.keys.get(column) {
            return Some(key.clone());
        }
        self.values.get(column).map(|value| value.to_string())
    }
}

pub type Table = Vec<MetricRow>;

/// Every column name appearing anywhere in the table, keys included.
pub fn columns(rows: &[MetricRow]) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for row in rows {
        names.extend(row.keys.keys().cloned());
        names.extend(row.values.keys().cloned());
    }
    names
}

/// Union of value columns across all rows, sorted by name.
pub fn value_columns(rows: &[MetricRow]) -> Vec<String> {
    let mut names = BTreeSet::new();
    for row in rows {
        names.extend(row.values.keys().cloned());
    }
    names.into_iter().collect()
}

/// Renders a table as a rectangular grid: header first, key columns in
/// declared order, value columns sorted by name, absent cells empty.
pub fn to_values(rows: &[MetricRow], key_columns: &[String]) -> Vec<Vec<String>> {
    let metric_columns = value_columns(rows);

    let mut header: Vec<String> = key_columns.to_vec();
    header.extend(metric_columns.iter().cloned());

    let mut grid = Vec::with_capacity(rows.len() + 1);
    grid.push(header);

    for row in rows {
        let mut cells = Vec::with_capacity(key_columns.len() + metric_columns.len());
        for column in key_columns {
            cells.push(row.keys.get(column).cloned().unwrap_or_default());
        }
        for column in &metric_columns {
            cells.push(
                row.values
                    .get(column)
                    .map(|value| value.to_string())
                    .unwrap_or_default(),
            );
        }
        grid.push(cells);
    }

    grid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(keys: &[(&str, &str)], values: &[(&str, Value)]) -> MetricRow {
        MetricRow {
            keys: keys
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn test_value_parse_round_trip() {
        assert_eq!(Value::parse("12.5"), Value::Number(12.5));
        assert_eq!(Value::parse("12"), Value::Number(12.0));
        assert_eq!(Value::parse("READY"), Value::Text("READY".to_string()));
        assert_eq!(Value::Number(12.0).to_string(), "12");
        assert_eq!(Value::Number(12.5).to_string(), "12.5");
    }

    #[test]
    fn test_value_from_json_drops_nulls() {
        assert_eq!(Value::from_json(&serde_json::Value::Null), None);
        assert_eq!(
            Value::from_json(&serde_json::json!(7)),
            Some(Value::Number(7.0))
        );
        assert_eq!(
            Value::from_json(&serde_json::json!("FINAL")),
            Some(Value::Text("FINAL".to_string()))
        );
    }

    #[test]
    fn test_key_tuple_missing_column() {
        let r = row(&[("date", "2025-01-01")], &[]);
        let key_columns = vec!["date".to_string(), "country".to_string()];
        let result = r.key_tuple(&key_columns);
        assert!(matches!(
            result.unwrap_err(),
            Error::MissingKeyColumn { column } if column == "country"
        ));
    }

    #[test]
    fn test_to_values_layout() {
        let rows = vec![
            row(
                &[("date", "2025-01-01")],
                &[("impression", Value::Number(10.0))],
            ),
            row(
                &[("date", "2025-01-02")],
                &[
                    ("impression", Value::Number(20.0)),
                    ("save", Value::Number(3.0)),
                ],
            ),
        ];
        let grid = to_values(&rows, &["date".to_string()]);
        assert_eq!(grid[0], vec!["date", "impression", "save"]);
        // row one never reported "save": the cell stays empty
        assert_eq!(grid[1], vec!["2025-01-01", "10", ""]);
        assert_eq!(grid[2], vec!["2025-01-02", "20", "3"]);
    }
}
