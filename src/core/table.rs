//! Wide-format table: one timestamp column plus named numeric columns.

use chrono::NaiveDateTime;

use super::error::{ProcessingError, Result};
use super::series::{stable_dedup_order, TimeSeries};
use super::time::floor_to_minute;

/// A named numeric column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Tabular measurement data sharing one timestamp column.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Header of the timestamp column, kept so outputs can restore it.
    pub time_column: String,
    /// One timestamp per row.
    pub timestamps: Vec<NaiveDateTime>,
    /// Measurement columns, each with one value per row.
    pub columns: Vec<Column>,
}

impl Table {
    /// Creates an empty table with the given timestamp header.
    pub fn new(time_column: impl Into<String>) -> Self {
        Self {
            time_column: time_column.into(),
            timestamps: Vec::new(),
            columns: Vec::new(),
        }
    }

    /// Builds a table from a timestamp vector and columns.
    ///
    /// Fails with `InvalidInput` when a column length disagrees with the
    /// number of timestamps.
    pub fn from_columns(
        time_column: impl Into<String>,
        timestamps: Vec<NaiveDateTime>,
        columns: Vec<Column>,
    ) -> Result<Self> {
        if let Some(bad) = columns.iter().find(|c| c.values.len() != timestamps.len()) {
            return Err(ProcessingError::InvalidInput(format!(
                "column '{}' has {} values but the table has {} rows",
                bad.name,
                bad.values.len(),
                timestamps.len()
            )));
        }
        Ok(Self {
            time_column: time_column.into(),
            timestamps,
            columns,
        })
    }

    /// Builds a single-column table from a series.
    pub fn from_series(time_column: impl Into<String>, name: impl Into<String>, series: &TimeSeries) -> Self {
        Self {
            time_column: time_column.into(),
            timestamps: series.timestamps.clone(),
            columns: vec![Column::new(name, series.values.clone())],
        }
    }

    #[inline]
    pub fn num_rows(&self) -> usize {
        self.timestamps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Column headers in order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Extracts one column as a series.
    pub fn series(&self, name: &str) -> Result<TimeSeries> {
        let column = self.column(name).ok_or_else(|| self.schema_mismatch(name))?;
        Ok(TimeSeries::from_parts(self.timestamps.clone(), column.values.clone()))
    }

    /// Appends or replaces a column.
    pub fn set_column(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> Result<()> {
        let name = name.into();
        if values.len() != self.num_rows() {
            return Err(ProcessingError::InvalidInput(format!(
                "column '{}' has {} values but the table has {} rows",
                name,
                values.len(),
                self.num_rows()
            )));
        }
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.values = values,
            None => self.columns.push(Column::new(name, values)),
        }
        Ok(())
    }

    /// Keeps only the named columns, in the requested order.
    pub fn select(&self, names: &[String]) -> Result<Self> {
        let columns = names
            .iter()
            .map(|name| {
                self.column(name)
                    .cloned()
                    .ok_or_else(|| self.schema_mismatch(name))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            time_column: self.time_column.clone(),
            timestamps: self.timestamps.clone(),
            columns,
        })
    }

    /// Appends the rows of `other`.
    ///
    /// Both tables must carry the same column headers in the same order.
    pub fn append(&mut self, other: Table) -> Result<()> {
        if self.columns.is_empty() && self.timestamps.is_empty() {
            *self = other;
            return Ok(());
        }
        let ours = self.column_names();
        let theirs = other.column_names();
        if ours != theirs {
            let column = theirs
                .iter()
                .find(|name| !ours.contains(name))
                .or_else(|| ours.iter().find(|name| !theirs.contains(name)))
                .cloned()
                .unwrap_or_default();
            return Err(ProcessingError::SchemaMismatch {
                column,
                available: theirs,
            });
        }
        self.timestamps.extend(other.timestamps);
        for (mine, incoming) in self.columns.iter_mut().zip(other.columns) {
            mine.values.extend(incoming.values);
        }
        Ok(())
    }

    /// Keeps rows whose timestamps fall inside `[start, end]`.
    pub fn between(&self, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        let keep: Vec<usize> = self
            .timestamps
            .iter()
            .enumerate()
            .filter(|(_, ts)| start.map_or(true, |s| **ts >= s) && end.map_or(true, |e| **ts <= e))
            .map(|(i, _)| i)
            .collect();
        self.take_rows(&keep)
    }

    /// Floors timestamps to the minute, sorts rows and drops duplicate
    /// minutes (the first occurrence in input order wins).
    pub fn normalized(&self) -> Self {
        let floored: Vec<NaiveDateTime> = self.timestamps.iter().map(|&ts| floor_to_minute(ts)).collect();
        let order = stable_dedup_order(floored.iter().copied());
        let mut table = self.take_rows(&order);
        table.timestamps = order.iter().map(|&i| floored[i]).collect();
        table
    }

    /// Rows at the given indices, in the given order.
    pub fn take_rows(&self, indices: &[usize]) -> Self {
        Self {
            time_column: self.time_column.clone(),
            timestamps: indices.iter().map(|&i| self.timestamps[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), indices.iter().map(|&i| c.values[i]).collect()))
                .collect(),
        }
    }

    fn schema_mismatch(&self, name: &str) -> ProcessingError {
        ProcessingError::SchemaMismatch {
            column: name.to_string(),
            available: self.column_names(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn sample_table() -> Table {
        Table::from_columns(
            "time",
            vec![ts("2025-01-18 00:01:00"), ts("2025-01-18 00:00:00")],
            vec![
                Column::new("a", vec![Some(1.0), Some(2.0)]),
                Column::new("b", vec![None, Some(4.0)]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_from_columns_length_mismatch() {
        let result = Table::from_columns(
            "time",
            vec![ts("2025-01-18 00:00:00")],
            vec![Column::new("a", vec![Some(1.0), Some(2.0)])],
        );
        assert!(matches!(result, Err(ProcessingError::InvalidInput(_))));
    }

    #[test]
    fn test_series_missing_column() {
        let table = sample_table();
        match table.series("c") {
            Err(ProcessingError::SchemaMismatch { column, available }) => {
                assert_eq!(column, "c");
                assert_eq!(available, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("Expected SchemaMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_select_reorders() {
        let table = sample_table();
        let selected = table.select(&["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(selected.column_names(), vec!["b", "a"]);
    }

    #[test]
    fn test_append_requires_same_columns() {
        let mut table = sample_table();
        let other = table.select(&["a".to_string()]).unwrap();
        assert!(table.append(other).is_err());

        let same = sample_table();
        table.append(same).unwrap();
        assert_eq!(table.num_rows(), 4);
    }

    #[test]
    fn test_append_into_empty_table() {
        let mut table = Table::new("time");
        table.append(sample_table()).unwrap();
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.column_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_normalized_sorts_rows() {
        let table = sample_table().normalized();
        assert_eq!(table.timestamps[0], ts("2025-01-18 00:00:00"));
        assert_eq!(table.column("a").unwrap().values, vec![Some(2.0), Some(1.0)]);
        assert_eq!(table.column("b").unwrap().values, vec![Some(4.0), None]);
    }

    #[test]
    fn test_set_column_replaces() {
        let mut table = sample_table();
        table.set_column("a", vec![Some(9.0), None]).unwrap();
        table.set_column("c", vec![Some(0.0), Some(0.0)]).unwrap();
        assert_eq!(table.column("a").unwrap().values, vec![Some(9.0), None]);
        assert_eq!(table.columns.len(), 3);
        assert!(table.set_column("d", vec![Some(1.0)]).is_err());
    }
}
