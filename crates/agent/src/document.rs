//! The sheet being edited: styled grid, columnar table, header offset,
//! snapshot, undo log and any extra observers, kept in step.

use sheetchat_engine::cell::{Color, DataType};
use sheetchat_engine::grid::Grid;
use sheetchat_engine::header::HeaderOffset;
use sheetchat_engine::table::{Column, Table};
use thiserror::Error;

use crate::changeset::{ChangeSet, ItemInfo, ItemStyle};
use crate::decoder::ResultValue;
use crate::reconcile::{ReconcileError, Reconciler};
use crate::snapshot::CellSnapshot;
use crate::undo::{UndoLog, DEFAULT_UNDO_DEPTH};

/// Columns of a fresh sheet.
pub const NEW_SHEET_COLUMNS: usize = 5;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditError {
    #[error("row {row} is not below the header (row {header})")]
    NotDataRow { row: usize, header: usize },

    #[error("column {col} is outside the sheet ({ncols} columns)")]
    ColumnOutOfRange { col: usize, ncols: usize },

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// What applying a run's result did to the document.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Replaced { rows: usize, cols: usize },
    /// A single value to show; the sheet is unchanged
    Answer(String),
    Unchanged,
}

pub struct Document {
    grid: Grid,
    table: Table,
    header: HeaderOffset,
    snapshot: CellSnapshot,
    undo: UndoLog,
    observers: Vec<Box<dyn Reconciler>>,
}

impl Document {
    pub fn new(grid: Grid) -> Self {
        Self::with_undo_depth(grid, DEFAULT_UNDO_DEPTH)
    }

    pub fn with_undo_depth(grid: Grid, undo_depth: usize) -> Self {
        let header = HeaderOffset::detect(&grid);
        let table = Table::from_grid(&grid, header);
        let snapshot = CellSnapshot::capture(&grid, header);
        log::info!(
            "loaded '{}': header row {}, {} rows x {} cols",
            grid.name,
            header,
            table.nrows(),
            table.ncols()
        );
        Self {
            grid,
            table,
            header,
            snapshot,
            undo: UndoLog::new(undo_depth),
            observers: Vec::new(),
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn header(&self) -> HeaderOffset {
        self.header
    }

    pub fn snapshot(&self) -> &CellSnapshot {
        &self.snapshot
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    /// Observers see every change after the grid and the table.
    pub fn add_observer(&mut self, observer: Box<dyn Reconciler>) {
        self.observers.push(observer);
    }

    /// Apply a change to every representation. In-place edits are backed up
    /// for undo first; structural changes drop the undo history because
    /// its coordinates no longer hold.
    pub fn apply(&mut self, change: ChangeSet) -> Result<(), EditError> {
        match &change {
            ChangeSet::UpdateInPlace(items) => {
                let prior = items
                    .iter()
                    .map(|i| {
                        self.snapshot
                            .get(i.row, i.col)
                            .cloned()
                            .unwrap_or_else(|| ItemInfo::from_grid(&self.grid, i.row, i.col, self.header))
                    })
                    .collect();
                self.undo.backup(prior);
            }
            ChangeSet::InsertRow(_)
            | ChangeSet::DeleteRow(_)
            | ChangeSet::InsertColumn(_)
            | ChangeSet::DeleteColumn(_)
            | ChangeSet::FullReplace { .. }
            | ChangeSet::Reset => self.undo.clear(),
            _ => {}
        }
        self.dispatch(&change)
    }

    fn dispatch(&mut self, change: &ChangeSet) -> Result<(), EditError> {
        self.grid.apply(change, self.header)?;
        self.table.apply(change, self.header)?;
        for observer in &mut self.observers {
            if let Err(e) = observer.apply(change, self.header) {
                log::warn!("observer '{}' rejected {}: {}", observer.name(), change.kind(), e);
            }
        }
        self.snapshot.refresh(&self.grid, self.header);
        Ok(())
    }

    /// Revert the most recent in-place edit. False when there is none.
    pub fn undo(&mut self) -> Result<bool, EditError> {
        match self.undo.undo() {
            Some(change) => {
                self.dispatch(&change)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Merge the value a run produced into the sheet.
    pub fn apply_result(&mut self, value: ResultValue) -> Result<Outcome, EditError> {
        match value {
            ResultValue::Table(table) => {
                let (rows, cols) = table.shape();
                self.apply(ChangeSet::replace(table))?;
                Ok(Outcome::Replaced { rows, cols })
            }
            ResultValue::Scalar(value) => Ok(Outcome::Answer(value.to_string())),
            ResultValue::Nothing => Ok(Outcome::Unchanged),
        }
    }

    // ========================================================================
    // Cell edits
    // ========================================================================

    /// Type `text` into a cell. Edits to known cells are in-place updates,
    /// anything else is an insert; clearing a known cell deletes it.
    pub fn set_cell(&mut self, row: usize, col: usize, text: &str) -> Result<(), EditError> {
        let column = self.grid.column_name(col, self.header);
        let change = match self.snapshot.get(row, col) {
            Some(prior) if text.trim().is_empty() => ChangeSet::DeleteScalar(prior.clone()),
            Some(prior) => {
                let mut item = ItemInfo::new(row, col, column, text);
                // Typed columns keep their type; text columns take what is typed
                if prior.dtype != DataType::Text {
                    item = item.with_dtype(prior.dtype);
                }
                ChangeSet::UpdateInPlace(vec![item])
            }
            None => ChangeSet::InsertScalar(ItemInfo::new(row, col, column, text)),
        };
        self.apply(change)
    }

    pub fn set_font(&mut self, row: usize, col: usize, family: &str, size: Option<f32>) -> Result<(), EditError> {
        self.restyle(row, col, |style| {
            style.font_family = Some(family.to_string());
            if size.is_some() {
                style.font_size = size;
            }
        })
    }

    pub fn set_font_color(&mut self, row: usize, col: usize, color: Color) -> Result<(), EditError> {
        self.restyle(row, col, |style| style.font_color = Some(color))
    }

    pub fn set_background(&mut self, row: usize, col: usize, color: Color) -> Result<(), EditError> {
        self.restyle(row, col, |style| style.background = Some(color))
    }

    fn restyle(&mut self, row: usize, col: usize, edit: impl FnOnce(&mut ItemStyle)) -> Result<(), EditError> {
        let mut item = ItemInfo::from_grid(&self.grid, row, col, self.header);
        let mut style = item.style.take().unwrap_or_default();
        edit(&mut style);
        self.apply(ChangeSet::UpdateInPlace(vec![item.with_style(style)]))
    }

    // ========================================================================
    // Structural edits
    // ========================================================================

    fn check_data_row(&self, row: usize) -> Result<(), EditError> {
        if row < self.header.first_data_row() {
            return Err(EditError::NotDataRow {
                row,
                header: self.header.header_row(),
            });
        }
        Ok(())
    }

    fn sheet_cols(&self) -> usize {
        self.table.ncols().max(self.grid.used_cols())
    }

    /// Insert an empty row above grid row `row`.
    pub fn insert_row(&mut self, row: usize) -> Result<(), EditError> {
        self.check_data_row(row)?;
        let items = (0..self.sheet_cols().max(1))
            .map(|c| ItemInfo::new(row, c, self.grid.column_name(c, self.header), ""))
            .collect();
        self.apply(ChangeSet::InsertRow(items))
    }

    pub fn delete_row(&mut self, row: usize) -> Result<(), EditError> {
        self.check_data_row(row)?;
        let items = (0..self.sheet_cols().max(1))
            .map(|c| ItemInfo::from_grid(&self.grid, row, c, self.header))
            .collect();
        self.apply(ChangeSet::DeleteRow(items))
    }

    /// Insert an empty column left of `col`, named `NewCol{n}`.
    pub fn insert_column(&mut self, col: usize) -> Result<(), EditError> {
        let ncols = self.sheet_cols();
        if col > ncols {
            return Err(EditError::ColumnOutOfRange { col, ncols });
        }
        let name = (1..)
            .map(|n| format!("NewCol{}", n))
            .find(|name| self.table.column_index(name).is_none())
            .unwrap_or_default();
        let item = ItemInfo::new(self.header.header_row(), col, name, "");
        self.apply(ChangeSet::InsertColumn(vec![item]))
    }

    pub fn delete_column(&mut self, col: usize) -> Result<(), EditError> {
        let ncols = self.sheet_cols();
        if col >= ncols {
            return Err(EditError::ColumnOutOfRange { col, ncols });
        }
        let mut item = ItemInfo::from_grid(&self.grid, self.header.header_row(), col, self.header);
        if let Some(column) = self.table.columns().get(col) {
            item.column = column.name.clone();
        }
        self.apply(ChangeSet::DeleteColumn(vec![item]))
    }

    /// Empty the sheet.
    pub fn reset(&mut self) -> Result<(), EditError> {
        self.apply(ChangeSet::Reset)
    }

    /// Empty the sheet and lay out `Column1..Column5` on the first row.
    pub fn new_sheet(&mut self) -> Result<(), EditError> {
        self.reset()?;
        self.header = HeaderOffset::FIRST_ROW;
        let columns = (1..=NEW_SHEET_COLUMNS)
            .map(|i| Column::new(format!("Column{}", i), Vec::new()))
            .collect();
        let table = Table::from_columns(columns).map_err(ReconcileError::from)?;
        self.apply(ChangeSet::replace(table))
    }

    /// Cell text as the grid shows it.
    pub fn cell_text(&self, row: usize, col: usize) -> String {
        self.grid.text(row, col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetchat_engine::cell::CellFormat;
    use sheetchat_engine::grid::MergedRegion;
    use sheetchat_engine::table::Value;

    /// A title row, header on row 2, three data rows.
    fn titled() -> Document {
        let mut grid = Grid::new("s");
        grid.set_input(0, 0, "Inventory");
        grid.add_merge(MergedRegion::new(0, 0, 0, 1));
        grid.set_input(1, 0, "item");
        grid.set_input(1, 1, "qty");
        for (r, (name, qty)) in [("bolt", "5"), ("nut", "7"), ("gear", "2")].iter().enumerate() {
            grid.set_input(r + 2, 0, name);
            grid.set_input(r + 2, 1, qty);
        }
        Document::new(grid)
    }

    /// Header on row 1, three data rows.
    fn plain() -> Document {
        let mut grid = Grid::new("s");
        grid.set_input(0, 0, "a");
        grid.set_input(0, 1, "b");
        for r in 1..=3 {
            grid.set_input(r, 0, &r.to_string());
            grid.set_input(r, 1, &(r * 10).to_string());
        }
        Document::new(grid)
    }

    #[test]
    fn test_load_detects_header() {
        let doc = titled();
        assert_eq!(doc.header(), HeaderOffset::new(2));
        assert_eq!(doc.table().column_names(), vec!["item", "qty"]);
        assert_eq!(doc.table().nrows(), 3);
    }

    #[test]
    fn test_update_in_place_offset() {
        let mut doc = titled();
        doc.set_cell(3, 1, "70").unwrap();
        assert_eq!(doc.table().get(1, 1), Some(&Value::Int(70)));
        assert_eq!(doc.cell_text(3, 1), "70");
        assert_eq!(doc.undo_depth(), 1);
    }

    #[test]
    fn test_edit_above_header_stays_in_grid() {
        let mut doc = titled();
        let before = doc.table().clone();
        doc.set_cell(0, 0, "Stock").unwrap();
        assert_eq!(doc.cell_text(0, 0), "Stock");
        assert_eq!(doc.table(), &before);
    }

    #[test]
    fn test_replace_three_rows_with_two() {
        let mut doc = plain();
        let replacement = Table::from_columns(vec![
            Column::new("a", vec![Value::Int(100), Value::Int(200)]),
            Column::new("b", vec![Value::Int(1), Value::Int(2)]),
        ])
        .unwrap();
        let outcome = doc.apply_result(ResultValue::Table(replacement.clone())).unwrap();
        assert_eq!(outcome, Outcome::Replaced { rows: 2, cols: 2 });

        // grid row 4 (1-based) is gone, rows 2-3 rewritten, header kept
        assert_eq!(doc.grid().used_rows(), 3);
        assert_eq!(doc.cell_text(0, 0), "a");
        assert_eq!(doc.cell_text(1, 0), "100");
        assert_eq!(doc.cell_text(2, 1), "2");
        assert!(doc.grid().is_empty_at(3, 0));
        assert_eq!(doc.table(), &replacement);
        assert!(doc.snapshot().get(3, 0).is_none());
    }

    #[test]
    fn test_undo_restores_value_and_style() {
        let mut grid = Grid::new("s");
        grid.set_input(0, 0, "x");
        grid.set_input(0, 1, "y");
        grid.set_input(1, 0, "1");
        grid.set_input(1, 1, "2");
        grid.set_input(2, 0, "3");
        grid.set_input(2, 1, "5");
        let fmt = CellFormat {
            font_color: Some(Color::rgb(0, 0, 255)),
            font_family: Some("Arial".into()),
            ..Default::default()
        };
        grid.set_format(2, 1, fmt.clone());
        let mut doc = Document::new(grid);

        doc.set_cell(2, 1, "9").unwrap();
        doc.set_background(2, 1, Color::rgb(255, 255, 0)).unwrap();
        assert_eq!(doc.cell_text(2, 1), "9");

        assert!(doc.undo().unwrap());
        assert!(doc.undo().unwrap());
        assert_eq!(doc.cell_text(2, 1), "5");
        assert_eq!(doc.grid().format(2, 1), fmt);
        assert_eq!(doc.table().get(1, 1), Some(&Value::Int(5)));
        assert_eq!(doc.cell_text(1, 1), "2");
        assert_eq!(doc.cell_text(2, 0), "3");
        assert!(!doc.undo().unwrap());
    }

    #[test]
    fn test_insert_scalar_for_new_cell() {
        let mut doc = plain();
        doc.set_cell(5, 0, "8").unwrap();
        assert_eq!(doc.table().nrows(), 5);
        assert_eq!(doc.table().get(4, 0), Some(&Value::Int(8)));
        assert_eq!(doc.undo_depth(), 0);
    }

    #[test]
    fn test_clearing_known_cell_deletes_value() {
        let mut doc = plain();
        doc.set_cell(1, 1, "").unwrap();
        assert!(doc.grid().is_empty_at(1, 1));
        assert_eq!(doc.table().get(0, 1), Some(&Value::Null));
    }

    #[test]
    fn test_text_column_keeps_text_type() {
        let mut doc = titled();
        doc.set_cell(2, 0, "42").unwrap();
        assert_eq!(doc.table().get(0, 0), Some(&Value::Int(42)));
        doc.set_cell(2, 0, "washer").unwrap();
        assert_eq!(doc.table().get(0, 0), Some(&Value::Text("washer".into())));
    }

    #[test]
    fn test_structural_edits() {
        let mut doc = titled();
        assert!(matches!(doc.insert_row(1), Err(EditError::NotDataRow { .. })));

        doc.insert_row(3).unwrap();
        assert_eq!(doc.table().nrows(), 4);
        assert_eq!(doc.cell_text(4, 0), "nut");
        assert_eq!(doc.table().get(1, 0), Some(&Value::Null));

        doc.delete_row(3).unwrap();
        assert_eq!(doc.table().nrows(), 3);
        assert_eq!(doc.cell_text(3, 0), "nut");

        doc.insert_column(1).unwrap();
        assert_eq!(doc.table().column_names(), vec!["item", "NewCol1", "qty"]);
        assert_eq!(doc.cell_text(1, 1), "NewCol1");
        doc.insert_column(0).unwrap();
        assert_eq!(doc.table().column_names(), vec!["NewCol2", "item", "NewCol1", "qty"]);

        doc.delete_column(2).unwrap();
        assert_eq!(doc.table().column_names(), vec!["NewCol2", "item", "qty"]);
        assert!(matches!(doc.delete_column(9), Err(EditError::ColumnOutOfRange { .. })));
    }

    #[test]
    fn test_structural_edit_clears_undo() {
        let mut doc = plain();
        doc.set_cell(1, 0, "5").unwrap();
        doc.insert_row(1).unwrap();
        assert!(!doc.undo().unwrap());
    }

    #[test]
    fn test_model_replace_clears_undo() {
        let mut doc = plain();
        doc.set_cell(1, 1, "99").unwrap();
        let sorted = Table::from_columns(vec![
            Column::new("a", vec![Value::Int(2), Value::Int(3), Value::Int(1)]),
            Column::new("b", vec![Value::Int(20), Value::Int(30), Value::Int(99)]),
        ])
        .unwrap();
        doc.apply_result(ResultValue::Table(sorted.clone())).unwrap();

        assert_eq!(doc.undo_depth(), 0);
        assert!(!doc.undo().unwrap());
        assert_eq!(doc.table(), &sorted);
        assert_eq!(doc.cell_text(1, 1), "20");
    }

    #[test]
    fn test_insert_column_past_table_keeps_index() {
        let mut doc = plain();
        doc.set_cell(1, 3, "x").unwrap();
        assert_eq!(doc.table().ncols(), 2);

        doc.insert_column(3).unwrap();
        assert_eq!(doc.cell_text(0, 3), "NewCol1");
        assert_eq!(doc.cell_text(1, 4), "x");
        assert_eq!(doc.table().column_names(), vec!["a", "b", "Unnamed: 2", "NewCol1"]);
        assert_eq!(doc.table().column_index("NewCol1"), Some(3));

        doc.set_cell(2, 3, "7").unwrap();
        assert_eq!(doc.table().get(1, 3), Some(&Value::Int(7)));
        assert_eq!(doc.table().get(1, 2), Some(&Value::Null));
    }

    #[test]
    fn test_new_sheet() {
        let mut doc = titled();
        doc.new_sheet().unwrap();
        assert_eq!(doc.header(), HeaderOffset::FIRST_ROW);
        assert!(doc.grid().merges().is_empty());
        assert_eq!(doc.cell_text(0, 4), "Column5");
        assert_eq!(doc.table().shape(), (0, 5));
    }

    #[test]
    fn test_scalar_and_nothing_leave_sheet_alone() {
        let mut doc = plain();
        let before = doc.table().clone();
        assert_eq!(
            doc.apply_result(ResultValue::Scalar(Value::Float(2.5))).unwrap(),
            Outcome::Answer("2.5".into())
        );
        assert_eq!(doc.apply_result(ResultValue::Nothing).unwrap(), Outcome::Unchanged);
        assert_eq!(doc.table(), &before);
    }

    #[test]
    fn test_observers_follow_changes() {
        use std::cell::RefCell;
        use std::rc::Rc;

        struct Recorder(Rc<RefCell<Vec<&'static str>>>);
        impl Reconciler for Recorder {
            fn name(&self) -> &str {
                "recorder"
            }
            fn apply(&mut self, change: &ChangeSet, _: HeaderOffset) -> Result<(), ReconcileError> {
                self.0.borrow_mut().push(change.kind());
                Ok(())
            }
        }

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut doc = plain();
        doc.add_observer(Box::new(Recorder(seen.clone())));
        doc.set_cell(1, 0, "4").unwrap();
        doc.undo().unwrap();
        doc.reset().unwrap();
        assert_eq!(*seen.borrow(), vec!["UPDATE_IN_PLACE", "UPDATE_IN_PLACE", "RESET"]);
    }
}
