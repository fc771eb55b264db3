//! Columnar table: the working copy of the grid's data region.
//!
//! Column names are unique. Each column stores one `Value` per row and all
//! columns have the same length.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::cell::{CellValue, DataType};
use super::grid::Grid;
use super::header::HeaderOffset;

/// Marker left by spreadsheet readers on header cells that had no text.
pub const PLACEHOLDER_MARKER: &str = "Unnamed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn from_cell(cell: &CellValue) -> Self {
        match cell {
            CellValue::Empty => Value::Null,
            CellValue::Text(s) if s.is_empty() => Value::Null,
            CellValue::Text(s) => Value::Text(s.clone()),
            CellValue::Bool(b) => Value::Bool(*b),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => Value::Int(*n as i64),
            CellValue::Number(n) => Value::Float(*n),
        }
    }

    pub fn to_cell(&self) -> CellValue {
        match self {
            Value::Null => CellValue::Empty,
            Value::Bool(b) => CellValue::Bool(*b),
            Value::Int(i) => CellValue::Number(*i as f64),
            Value::Float(f) if f.is_finite() => CellValue::Number(*f),
            Value::Float(_) => CellValue::Empty,
            Value::Text(s) => CellValue::Text(s.clone()),
        }
    }

    /// Parse text through a data type into a table value.
    pub fn parse(text: &str, dtype: DataType) -> Self {
        Self::from_cell(&dtype.parse_cell(text))
    }

    pub fn dtype(&self) -> DataType {
        match self {
            Value::Null | Value::Text(_) => DataType::Text,
            Value::Bool(_) => DataType::Bool,
            Value::Int(_) => DataType::Integer,
            Value::Float(_) => DataType::Float,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self { name: name.into(), values }
    }

    /// pandas-style dtype label of the column.
    pub fn dtype_label(&self) -> &'static str {
        let mut saw_int = false;
        let mut saw_float = false;
        let mut saw_bool = false;
        let mut saw_other = false;
        for v in &self.values {
            match v {
                Value::Null => {}
                Value::Int(_) => saw_int = true,
                Value::Float(_) => saw_float = true,
                Value::Bool(_) => saw_bool = true,
                Value::Text(_) => saw_other = true,
            }
        }
        match (saw_int, saw_float, saw_bool, saw_other) {
            (_, _, _, true) => "object",
            (_, _, true, false) if saw_int || saw_float => "object",
            (false, false, true, false) => "bool",
            (_, true, false, false) => "float64",
            (true, false, false, false) => "int64",
            _ => "object",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableError {
    DuplicateColumn(String),
    UnknownColumn(String),
    RaggedColumn { name: String, len: usize, expected: usize },
    RowOutOfRange { row: usize, nrows: usize },
    ColumnOutOfRange { col: usize, ncols: usize },
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::DuplicateColumn(name) => write!(f, "duplicate column name '{}'", name),
            TableError::UnknownColumn(name) => write!(f, "no column named '{}'", name),
            TableError::RaggedColumn { name, len, expected } => {
                write!(f, "column '{}' has {} values, expected {}", name, len, expected)
            }
            TableError::RowOutOfRange { row, nrows } => {
                write!(f, "row {} out of range (table has {} rows)", row, nrows)
            }
            TableError::ColumnOutOfRange { col, ncols } => {
                write!(f, "column {} out of range (table has {} columns)", col, ncols)
            }
        }
    }
}

impl std::error::Error for TableError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty table with the given column names.
    pub fn with_columns<I, S>(names: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = names.into_iter().map(|n| Column::new(n, Vec::new())).collect();
        Self::from_columns(columns)
    }

    pub fn from_columns(columns: Vec<Column>) -> Result<Self, TableError> {
        let table = Self { columns };
        table.validate()?;
        Ok(table)
    }

    /// Check the unique-name and equal-length invariants. Tables that come
    /// out of deserialization go through this.
    pub fn validate(&self) -> Result<(), TableError> {
        let mut seen = HashSet::new();
        let expected = self.nrows();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(TableError::DuplicateColumn(column.name.clone()));
            }
            if column.values.len() != expected {
                return Err(TableError::RaggedColumn {
                    name: column.name.clone(),
                    len: column.values.len(),
                    expected,
                });
            }
        }
        Ok(())
    }

    /// Build the table from the data region of a grid: names from the header
    /// row, values from every row below it.
    pub fn from_grid(grid: &Grid, header: HeaderOffset) -> Self {
        let ncols = grid.used_cols();
        let first = header.first_data_row();
        let last = grid.used_rows();

        let raw_names: Vec<String> = (0..ncols)
            .map(|c| {
                let text = grid.text(header.header_row(), c);
                if text.trim().is_empty() {
                    format!("{}: {}", PLACEHOLDER_MARKER, c)
                } else {
                    text
                }
            })
            .collect();
        let names = repair_column_names(raw_names);

        let columns = names
            .into_iter()
            .enumerate()
            .map(|(c, name)| {
                let values = (first..last.max(first))
                    .map(|r| Value::from_cell(&grid.value(r, c)))
                    .collect();
                Column::new(name, values)
            })
            .collect();
        Self { columns }
    }

    pub fn nrows(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Value> {
        self.columns.get(col).and_then(|c| c.values.get(row))
    }

    pub fn set(&mut self, row: usize, col: usize, value: Value) -> Result<(), TableError> {
        let (nrows, ncols) = self.shape();
        let column = self
            .columns
            .get_mut(col)
            .ok_or(TableError::ColumnOutOfRange { col, ncols })?;
        let slot = column
            .values
            .get_mut(row)
            .ok_or(TableError::RowOutOfRange { row, nrows })?;
        *slot = value;
        Ok(())
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), TableError> {
        if old == new {
            return Ok(());
        }
        if self.column_index(new).is_some() {
            return Err(TableError::DuplicateColumn(new.to_string()));
        }
        let idx = self
            .column_index(old)
            .ok_or_else(|| TableError::UnknownColumn(old.to_string()))?;
        self.columns[idx].name = new.to_string();
        Ok(())
    }

    /// Insert a row before `at` (clamped to the end). Missing values are null,
    /// extra values are dropped.
    pub fn insert_row(&mut self, at: usize, values: Vec<Value>) {
        let at = at.min(self.nrows());
        let mut values = values.into_iter();
        for column in &mut self.columns {
            column.values.insert(at, values.next().unwrap_or_default());
        }
    }

    pub fn append_row(&mut self, values: Vec<Value>) {
        let end = self.nrows();
        self.insert_row(end, values);
    }

    pub fn delete_row(&mut self, row: usize) -> Result<Vec<Value>, TableError> {
        let nrows = self.nrows();
        if row >= nrows {
            return Err(TableError::RowOutOfRange { row, nrows });
        }
        Ok(self.columns.iter_mut().map(|c| c.values.remove(row)).collect())
    }

    /// Pad every column with nulls until the table has `nrows` rows.
    pub fn grow_rows(&mut self, nrows: usize) {
        for column in &mut self.columns {
            if column.values.len() < nrows {
                column.values.resize(nrows, Value::Null);
            }
        }
    }

    /// Append empty `Unnamed: {i}` columns until the table has `ncols`
    /// columns, so table index `i` matches sheet column `i`.
    pub fn grow_cols(&mut self, ncols: usize) {
        let nrows = self.nrows();
        while self.columns.len() < ncols {
            let idx = self.columns.len();
            let mut name = format!("{}: {}", PLACEHOLDER_MARKER, idx);
            let mut n = 1;
            while self.column_index(&name).is_some() {
                name = format!("{}: {}.{}", PLACEHOLDER_MARKER, idx, n);
                n += 1;
            }
            self.columns.push(Column::new(name, vec![Value::Null; nrows]));
        }
    }

    /// Insert a column before `at` (clamped to the end). Values are padded
    /// with nulls or truncated to the current row count.
    pub fn insert_column(&mut self, at: usize, name: impl Into<String>, mut values: Vec<Value>) -> Result<(), TableError> {
        let name = name.into();
        if self.column_index(&name).is_some() {
            return Err(TableError::DuplicateColumn(name));
        }
        let nrows = if self.columns.is_empty() { values.len() } else { self.nrows() };
        values.resize(nrows, Value::Null);
        let at = at.min(self.columns.len());
        self.columns.insert(at, Column::new(name, values));
        Ok(())
    }

    pub fn delete_column(&mut self, col: usize) -> Result<Column, TableError> {
        let ncols = self.ncols();
        if col >= ncols {
            return Err(TableError::ColumnOutOfRange { col, ncols });
        }
        Ok(self.columns.remove(col))
    }

    pub fn delete_column_named(&mut self, name: &str) -> Result<Column, TableError> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))?;
        self.delete_column(idx)
    }

    /// Drop every column and row.
    pub fn clear(&mut self) {
        self.columns.clear();
    }

    /// `(name, dtype)` for each column.
    pub fn dtypes(&self) -> Vec<(String, &'static str)> {
        self.columns.iter().map(|c| (c.name.clone(), c.dtype_label())).collect()
    }

    /// The first `n` rows.
    pub fn head(&self, n: usize) -> Table {
        Table {
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.values.iter().take(n).cloned().collect()))
                .collect(),
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<&Value>> + '_ {
        (0..self.nrows()).map(move |r| self.columns.iter().map(|c| &c.values[r]).collect())
    }
}

/// Text rendering with a row index column, right-aligned like a dataframe print.
impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.columns.is_empty() {
            return write!(f, "Empty table\nColumns: []\nIndex: []");
        }
        let nrows = self.nrows();
        let index_width = nrows.saturating_sub(1).to_string().len();
        let cells: Vec<Vec<String>> = self
            .columns
            .iter()
            .map(|c| c.values.iter().map(|v| if v.is_null() { "NaN".to_string() } else { v.to_string() }).collect())
            .collect();
        let widths: Vec<usize> = self
            .columns
            .iter()
            .zip(&cells)
            .map(|(c, vals)| vals.iter().map(|s| s.chars().count()).chain([c.name.chars().count()]).max().unwrap_or(0))
            .collect();

        write!(f, "{:width$}", "", width = index_width)?;
        for (c, w) in self.columns.iter().zip(&widths) {
            write!(f, "  {:>width$}", c.name, width = *w)?;
        }
        for r in 0..nrows {
            write!(f, "\n{:<width$}", r, width = index_width)?;
            for (vals, w) in cells.iter().zip(&widths) {
                write!(f, "  {:>width$}", vals[r], width = *w)?;
            }
        }
        Ok(())
    }
}

pub fn is_placeholder_name(name: &str) -> bool {
    name.contains(PLACEHOLDER_MARKER)
}

/// Give placeholder names the name of their left neighbour (merged headers
/// leave the covered cells blank), then make every name unique with `.1`,
/// `.2`, ... suffixes.
pub fn repair_column_names(names: Vec<String>) -> Vec<String> {
    let mut last_valid: Option<String> = None;
    let repaired: Vec<String> = names
        .into_iter()
        .map(|name| {
            if is_placeholder_name(&name) {
                last_valid.clone().unwrap_or(name)
            } else {
                last_valid = Some(name.clone());
                name
            }
        })
        .collect();

    let mut seen: HashSet<String> = HashSet::new();
    repaired
        .into_iter()
        .map(|name| {
            if seen.insert(name.clone()) {
                return name;
            }
            let mut n = 1;
            loop {
                let candidate = format!("{}.{}", name, n);
                if seen.insert(candidate.clone()) {
                    return candidate;
                }
                n += 1;
            }
        })
        .collect()
}
