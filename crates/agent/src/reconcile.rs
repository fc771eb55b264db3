//! Applying a [`ChangeSet`] to each representation of the sheet.
//!
//! The grid is addressed by absolute 0-based rows; the table by rows counted
//! from the first data row. Every translation between the two goes through
//! [`HeaderOffset`], and rows at or above the header never reach the table.

use sheetchat_engine::cell::CellValue;
use sheetchat_engine::grid::Grid;
use sheetchat_engine::header::HeaderOffset;
use sheetchat_engine::table::{is_placeholder_name, Table, TableError, Value};
use thiserror::Error;

use crate::changeset::{ChangeSet, ItemInfo, ItemStyle};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    #[error("{kind} carries no items")]
    NoItems { kind: &'static str },

    #[error(transparent)]
    Table(#[from] TableError),
}

/// A representation of the sheet that follows every change.
pub trait Reconciler {
    fn name(&self) -> &str;

    fn apply(&mut self, change: &ChangeSet, header: HeaderOffset) -> Result<(), ReconcileError>;
}

fn first_item<'a>(items: &'a [ItemInfo], kind: &'static str) -> Result<&'a ItemInfo, ReconcileError> {
    items.first().ok_or(ReconcileError::NoItems { kind })
}

// ============================================================================
// Grid
// ============================================================================

impl Reconciler for Grid {
    fn name(&self) -> &str {
        "grid"
    }

    fn apply(&mut self, change: &ChangeSet, header: HeaderOffset) -> Result<(), ReconcileError> {
        log::debug!("grid: applying {}", change.kind());
        match change {
            ChangeSet::FullReplace { table, items } => {
                replace_grid(self, table, header);
                for item in items.iter().filter(|i| i.row >= header.header_row()) {
                    apply_style(self, item);
                }
            }
            ChangeSet::UpdateInPlace(items) => {
                for item in items {
                    write_item(self, item);
                }
            }
            ChangeSet::InsertScalar(item) => write_item(self, item),
            ChangeSet::DeleteScalar(item) => self.clear_value(item.row, item.col),
            ChangeSet::InsertRow(items) => {
                let row = first_item(items, change.kind())?.row;
                self.insert_rows(row, 1);
                for item in items {
                    write_item(self, item);
                }
            }
            ChangeSet::DeleteRow(items) => {
                let row = first_item(items, change.kind())?.row;
                self.delete_rows(row, 1);
            }
            ChangeSet::InsertColumn(items) => {
                let first = first_item(items, change.kind())?;
                let col = first.col;
                self.insert_cols(col, 1);
                self.set_value(header.header_row(), col, CellValue::Text(first.column.clone()));
                for item in items.iter().filter(|i| i.row != header.header_row()) {
                    write_item(self, item);
                }
            }
            ChangeSet::DeleteColumn(items) => {
                let col = first_item(items, change.kind())?.col;
                self.delete_cols(col, 1);
            }
            ChangeSet::Reset => self.clear(),
        }
        Ok(())
    }
}

fn write_item(grid: &mut Grid, item: &ItemInfo) {
    grid.set_value(item.row, item.col, item.grid_value());
    apply_style(grid, item);
}

fn apply_style(grid: &mut Grid, item: &ItemInfo) {
    if let Some(style) = &item.style {
        let mut format = grid.format(item.row, item.col);
        style.apply_to(&mut format);
        grid.set_format(item.row, item.col, format);
    }
}

/// Rewrite the data region from `table`, leaving everything above the
/// header row as it was.
fn replace_grid(grid: &mut Grid, table: &Table, header: HeaderOffset) {
    let header_row = header.header_row();
    let first_data = header.first_data_row();
    let old_used = grid.used_rows();
    let old_cols = grid.used_cols();
    let (nrows, ncols) = table.shape();

    for (c, column) in table.columns().iter().enumerate() {
        if is_placeholder_name(&column.name) || grid.is_merge_covered(header_row, c) {
            continue;
        }
        grid.set_value(header_row, c, CellValue::Text(column.name.clone()));
    }

    for r in 0..nrows {
        let row = header.to_grid_row(r);
        // New rows take the look of the row above them
        if row >= old_used && row > first_data {
            for c in 0..ncols.max(old_cols) {
                grid.copy_format((row - 1, c), (row, c));
            }
        }
        for (c, column) in table.columns().iter().enumerate() {
            grid.set_value(row, c, column.values[r].to_cell());
        }
    }

    let extent = header.grid_extent(nrows);
    if old_used > extent {
        grid.delete_rows(extent, old_used - extent);
    }

    // Dropped columns lose their header too
    for c in ncols..old_cols {
        for row in header_row..extent {
            grid.clear_value(row, c);
        }
    }

    log::debug!(
        "grid: replaced data region with {}x{} (used rows {} -> {})",
        nrows,
        ncols,
        old_used,
        grid.used_rows()
    );
}

// ============================================================================
// Table
// ============================================================================

impl Reconciler for Table {
    fn name(&self) -> &str {
        "table"
    }

    fn apply(&mut self, change: &ChangeSet, header: HeaderOffset) -> Result<(), ReconcileError> {
        log::debug!("table: applying {}", change.kind());
        match change {
            ChangeSet::FullReplace { table, .. } => *self = table.clone(),
            ChangeSet::UpdateInPlace(items) => {
                for item in items {
                    if let Some(row) = header.to_table_row(item.row) {
                        if row < self.nrows() && item.col < self.ncols() {
                            self.set(row, item.col, item.table_value())?;
                        }
                    }
                }
            }
            ChangeSet::InsertScalar(item) => {
                if let Some(row) = header.to_table_row(item.row) {
                    if item.col < self.ncols() {
                        self.grow_rows(row + 1);
                        self.set(row, item.col, item.table_value())?;
                    }
                }
            }
            ChangeSet::DeleteScalar(item) => {
                if let Some(row) = header.to_table_row(item.row) {
                    if row < self.nrows() && item.col < self.ncols() {
                        self.set(row, item.col, Value::Null)?;
                    }
                }
            }
            ChangeSet::InsertRow(items) => {
                let first = first_item(items, change.kind())?;
                if let Some(row) = header.to_table_row(first.row) {
                    let ncols = self.ncols();
                    let mut values = vec![Value::Null; ncols];
                    for item in items.iter().filter(|i| i.col < ncols) {
                        values[item.col] = item.table_value();
                    }
                    self.insert_row(row, values);
                }
            }
            ChangeSet::DeleteRow(items) => {
                let first = first_item(items, change.kind())?;
                if let Some(row) = header.to_table_row(first.row) {
                    if row < self.nrows() {
                        self.delete_row(row)?;
                    }
                }
            }
            ChangeSet::InsertColumn(items) => {
                let first = first_item(items, change.kind())?;
                let mut values = vec![Value::Null; self.nrows()];
                for item in items {
                    if let Some(row) = header.to_table_row(item.row) {
                        if row < values.len() {
                            values[row] = item.table_value();
                        }
                    }
                }
                // Grid columns past the table (scalars written outside it)
                // get placeholders so the new column keeps its sheet index.
                self.grow_cols(first.col);
                self.insert_column(first.col, first.column.clone(), values)?;
            }
            ChangeSet::DeleteColumn(items) => {
                let first = first_item(items, change.kind())?;
                if self.column_index(&first.column).is_some() {
                    self.delete_column_named(&first.column)?;
                } else if first.col < self.ncols() {
                    self.delete_column(first.col)?;
                }
            }
            ChangeSet::Reset => self.clear(),
        }
        Ok(())
    }
}

// ============================================================================
// Observers
// ============================================================================

/// Observer that logs each change it sees. Useful as a template for
/// external listeners.
#[derive(Debug, Default)]
pub struct LoggingObserver {
    pub applied: usize,
}

impl Reconciler for LoggingObserver {
    fn name(&self) -> &str {
        "log"
    }

    fn apply(&mut self, change: &ChangeSet, header: HeaderOffset) -> Result<(), ReconcileError> {
        self.applied += 1;
        let items = match change {
            ChangeSet::FullReplace { table, .. } => table.nrows() * table.ncols(),
            ChangeSet::UpdateInPlace(items)
            | ChangeSet::InsertRow(items)
            | ChangeSet::DeleteRow(items)
            | ChangeSet::InsertColumn(items)
            | ChangeSet::DeleteColumn(items) => items.len(),
            ChangeSet::InsertScalar(_) | ChangeSet::DeleteScalar(_) => 1,
            ChangeSet::Reset => 0,
        };
        log::info!("{} ({} cells, header row {})", change.kind(), items, header);
        Ok(())
    }
}

/// Style of a grid cell in the form edits carry it.
pub fn style_at(grid: &Grid, row: usize, col: usize) -> ItemStyle {
    ItemStyle::from_format(&grid.format(row, col))
}
