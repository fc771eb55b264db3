use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::cell::{Cell, CellFormat, CellValue};
use super::header::HeaderOffset;

/// A rectangular merged region, inclusive on both ends (0-indexed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergedRegion {
    pub first_row: usize,
    pub first_col: usize,
    pub last_row: usize,
    pub last_col: usize,
}

impl MergedRegion {
    pub fn new(first_row: usize, first_col: usize, last_row: usize, last_col: usize) -> Self {
        Self {
            first_row: first_row.min(last_row),
            first_col: first_col.min(last_col),
            last_row: first_row.max(last_row),
            last_col: first_col.max(last_col),
        }
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        row >= self.first_row && row <= self.last_row && col >= self.first_col && col <= self.last_col
    }

    /// The top-left cell holds the value; the rest are covered.
    pub fn is_anchor(&self, row: usize, col: usize) -> bool {
        row == self.first_row && col == self.first_col
    }

    pub fn is_single_cell(&self) -> bool {
        self.first_row == self.last_row && self.first_col == self.last_col
    }
}

/// A styled 2-D cell grid: the document the user sees and the file round-trips.
///
/// Cells are sparse. A cell with no value and default formatting is not stored,
/// so `used_rows`/`used_cols` reflect only cells that carry something.
#[derive(Debug, Clone)]
pub struct Grid {
    pub name: String,
    cells: FxHashMap<(usize, usize), Cell>,
    merges: Vec<MergedRegion>,
}

impl Default for Grid {
    fn default() -> Self {
        Self::new("Sheet1")
    }
}

impl Grid {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: FxHashMap::default(),
            merges: Vec::new(),
        }
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.cells.get(&(row, col))
    }

    pub fn value(&self, row: usize, col: usize) -> CellValue {
        self.cells
            .get(&(row, col))
            .map(|c| c.value.clone())
            .unwrap_or_default()
    }

    /// Raw text of a cell ("" when empty).
    pub fn text(&self, row: usize, col: usize) -> String {
        self.cells
            .get(&(row, col))
            .map(|c| c.value.raw_display())
            .unwrap_or_default()
    }

    pub fn is_empty_at(&self, row: usize, col: usize) -> bool {
        self.cells
            .get(&(row, col))
            .map(|c| c.value.is_empty())
            .unwrap_or(true)
    }

    /// Set a cell's value, keeping its formatting.
    pub fn set_value(&mut self, row: usize, col: usize, value: CellValue) {
        let cell = self.cells.entry((row, col)).or_insert_with(Cell::new);
        cell.value = value;
        if cell.is_blank() {
            self.cells.remove(&(row, col));
        }
    }

    pub fn set_input(&mut self, row: usize, col: usize, input: &str) {
        self.set_value(row, col, CellValue::from_input(input));
    }

    /// Clear the value but keep the formatting.
    pub fn clear_value(&mut self, row: usize, col: usize) {
        self.set_value(row, col, CellValue::Empty);
    }

    pub fn format(&self, row: usize, col: usize) -> CellFormat {
        self.cells
            .get(&(row, col))
            .map(|c| c.format.clone())
            .unwrap_or_default()
    }

    pub fn set_format(&mut self, row: usize, col: usize, format: CellFormat) {
        let cell = self.cells.entry((row, col)).or_insert_with(Cell::new);
        cell.format = format;
        if cell.is_blank() {
            self.cells.remove(&(row, col));
        }
    }

    /// Copy the formatting of one cell onto another, leaving the value alone.
    pub fn copy_format(&mut self, from: (usize, usize), to: (usize, usize)) {
        let format = self.format(from.0, from.1);
        self.set_format(to.0, to.1, format);
    }

    /// Iterate over all stored cells
    pub fn cells_iter(&self) -> impl Iterator<Item = (&(usize, usize), &Cell)> {
        self.cells.iter()
    }

    /// Number of rows in use: one past the last row holding a value, style, or merge.
    pub fn used_rows(&self) -> usize {
        let cells = self.cells.keys().map(|(r, _)| r + 1).max().unwrap_or(0);
        let merges = self.merges.iter().map(|m| m.last_row + 1).max().unwrap_or(0);
        cells.max(merges)
    }

    /// Number of columns in use: one past the last column holding a value, style, or merge.
    pub fn used_cols(&self) -> usize {
        let cells = self.cells.keys().map(|(_, c)| c + 1).max().unwrap_or(0);
        let merges = self.merges.iter().map(|m| m.last_col + 1).max().unwrap_or(0);
        cells.max(merges)
    }

    /// Count of cells with a non-empty value in one row.
    pub fn non_empty_in_row(&self, row: usize) -> usize {
        self.cells
            .iter()
            .filter(|((r, _), cell)| *r == row && !cell.value.is_empty())
            .count()
    }

    /// Name of a grid column: the header cell's text, or `Col{n}` when blank.
    pub fn column_name(&self, col: usize, header: HeaderOffset) -> String {
        let text = self.text(header.header_row(), col);
        if text.trim().is_empty() {
            format!("Col{}", col + 1)
        } else {
            text
        }
    }

    pub fn merges(&self) -> &[MergedRegion] {
        &self.merges
    }

    pub fn add_merge(&mut self, region: MergedRegion) {
        if region.is_single_cell() || self.merges.contains(&region) {
            return;
        }
        self.merges.push(region);
    }

    pub fn merge_at(&self, row: usize, col: usize) -> Option<&MergedRegion> {
        self.merges.iter().find(|m| m.contains(row, col))
    }

    /// True when the cell sits inside a merged region but is not its anchor.
    pub fn is_merge_covered(&self, row: usize, col: usize) -> bool {
        self.merge_at(row, col)
            .map(|m| !m.is_anchor(row, col))
            .unwrap_or(false)
    }

    /// Remove every cell and merge.
    pub fn clear(&mut self) {
        self.cells.clear();
        self.merges.clear();
    }

    /// Insert rows at the specified position, shifting existing rows down
    pub fn insert_rows(&mut self, at_row: usize, count: usize) {
        if count == 0 {
            return;
        }
        let cells_to_shift: Vec<_> = self.cells
            .iter()
            .filter(|((r, _), _)| *r >= at_row)
            .map(|((r, c), cell)| ((*r, *c), cell.clone()))
            .collect();

        for ((r, c), _) in &cells_to_shift {
            self.cells.remove(&(*r, *c));
        }

        for ((r, c), cell) in cells_to_shift {
            self.cells.insert((r + count, c), cell);
        }

        for m in &mut self.merges {
            if m.first_row >= at_row {
                m.first_row += count;
                m.last_row += count;
            } else if m.last_row >= at_row {
                // Insertion inside the region stretches it
                m.last_row += count;
            }
        }
    }

    /// Delete rows at the specified position, shifting remaining rows up
    pub fn delete_rows(&mut self, start_row: usize, count: usize) {
        if count == 0 {
            return;
        }
        let end = start_row + count;
        self.cells.retain(|(r, _), _| *r < start_row || *r >= end);

        let cells_to_shift: Vec<_> = self.cells
            .iter()
            .filter(|((r, _), _)| *r >= end)
            .map(|((r, c), cell)| ((*r, *c), cell.clone()))
            .collect();

        for ((r, c), _) in &cells_to_shift {
            self.cells.remove(&(*r, *c));
        }

        for ((r, c), cell) in cells_to_shift {
            self.cells.insert((r - count, c), cell);
        }

        self.merges = self
            .merges
            .iter()
            .filter_map(|m| shrink_span(m.first_row, m.last_row, start_row, count).map(|(first, last)| {
                MergedRegion { first_row: first, last_row: last, ..*m }
            }))
            .filter(|m| !m.is_single_cell())
            .collect();
    }

    /// Insert columns at the specified position, shifting existing columns right
    pub fn insert_cols(&mut self, at_col: usize, count: usize) {
        if count == 0 {
            return;
        }
        let cells_to_shift: Vec<_> = self.cells
            .iter()
            .filter(|((_, c), _)| *c >= at_col)
            .map(|((r, c), cell)| ((*r, *c), cell.clone()))
            .collect();

        for ((r, c), _) in &cells_to_shift {
            self.cells.remove(&(*r, *c));
        }

        for ((r, c), cell) in cells_to_shift {
            self.cells.insert((r, c + count), cell);
        }

        for m in &mut self.merges {
            if m.first_col >= at_col {
                m.first_col += count;
                m.last_col += count;
            } else if m.last_col >= at_col {
                m.last_col += count;
            }
        }
    }

    /// Delete columns at the specified position, shifting remaining columns left
    pub fn delete_cols(&mut self, start_col: usize, count: usize) {
        if count == 0 {
            return;
        }
        let end = start_col + count;
        self.cells.retain(|(_, c), _| *c < start_col || *c >= end);

        let cells_to_shift: Vec<_> = self.cells
            .iter()
            .filter(|((_, c), _)| *c >= end)
            .map(|((r, c), cell)| ((*r, *c), cell.clone()))
            .collect();

        for ((r, c), _) in &cells_to_shift {
            self.cells.remove(&(*r, *c));
        }

        for ((r, c), cell) in cells_to_shift {
            self.cells.insert((r, c - count), cell);
        }

        self.merges = self
            .merges
            .iter()
            .filter_map(|m| shrink_span(m.first_col, m.last_col, start_col, count).map(|(first, last)| {
                MergedRegion { first_col: first, last_col: last, ..*m }
            }))
            .filter(|m| !m.is_single_cell())
            .collect();
    }
}

/// Adjust an inclusive span `[first, last]` for the removal of `count` lines
/// starting at `start`. Returns None when the whole span was removed.
fn shrink_span(first: usize, last: usize, start: usize, count: usize) -> Option<(usize, usize)> {
    let end = start + count; // exclusive
    if last < start {
        return Some((first, last));
    }
    if first >= end {
        return Some((first - count, last - count));
    }
    // Overlap: count the surviving lines before and after the hole
    let before = start.saturating_sub(first);
    let after = (last + 1).saturating_sub(end);
    let kept = before + after;
    if kept == 0 {
        return None;
    }
    let new_first = first.min(start);
    Some((new_first, new_first + kept - 1))
}
