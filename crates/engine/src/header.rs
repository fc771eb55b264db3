//! Header-row offset between the grid document and the columnar table.
//!
//! Grid rows are 0-indexed. The header offset `h` is 1-based (the spreadsheet
//! row number of the header), so the header cell sits at grid row `h - 1` and
//! table row `i` lives at grid row `i + h`. Every conversion between the two
//! coordinate spaces goes through this type.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::grid::Grid;

/// How many leading rows are considered when looking for the header.
pub const HEADER_SCAN_ROWS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeaderOffset(usize);

impl Default for HeaderOffset {
    fn default() -> Self {
        Self::FIRST_ROW
    }
}

impl fmt::Display for HeaderOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}", self.0)
    }
}

impl HeaderOffset {
    pub const FIRST_ROW: HeaderOffset = HeaderOffset(1);

    /// Build from a 1-based row number. Zero is treated as 1.
    pub fn new(one_based: usize) -> Self {
        Self(one_based.max(1))
    }

    /// The 1-based row number.
    pub fn get(self) -> usize {
        self.0
    }

    /// Grid row (0-indexed) holding the column names.
    pub fn header_row(self) -> usize {
        self.0 - 1
    }

    /// Grid row (0-indexed) of table row 0.
    pub fn first_data_row(self) -> usize {
        self.0
    }

    pub fn to_grid_row(self, table_row: usize) -> usize {
        table_row + self.0
    }

    /// None for the header row and anything above it.
    pub fn to_table_row(self, grid_row: usize) -> Option<usize> {
        grid_row.checked_sub(self.0)
    }

    /// Number of grid rows a table of `nrows` rows occupies, counting from row 0.
    pub fn grid_extent(self, nrows: usize) -> usize {
        nrows + self.0
    }

    /// Pick the row with the most non-empty cells among the first
    /// `HEADER_SCAN_ROWS` rows. Ties go to the earlier row; an empty grid
    /// gives row 1.
    pub fn detect(grid: &Grid) -> Self {
        let scan = grid.used_rows().min(HEADER_SCAN_ROWS);
        let mut best_row = 0;
        let mut best_count = 0;
        for row in 0..scan {
            let count = grid.non_empty_in_row(row);
            if count > best_count {
                best_count = count;
                best_row = row;
            }
        }
        Self(best_row + 1)
    }
}
