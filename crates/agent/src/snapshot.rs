use std::collections::BTreeMap;

use sheetchat_engine::grid::Grid;
use sheetchat_engine::header::HeaderOffset;

use crate::changeset::ItemInfo;

/// Last observed state of every non-empty cell at or below the header row.
#[derive(Debug, Clone, Default)]
pub struct CellSnapshot {
    items: BTreeMap<(usize, usize), ItemInfo>,
}

impl CellSnapshot {
    pub fn capture(grid: &Grid, header: HeaderOffset) -> Self {
        let mut snapshot = Self::default();
        snapshot.refresh(grid, header);
        snapshot
    }

    pub fn refresh(&mut self, grid: &Grid, header: HeaderOffset) {
        self.items.clear();
        let first = header.header_row();
        for (&(row, col), cell) in grid.cells_iter() {
            if row >= first && !cell.value.is_empty() {
                self.items.insert((row, col), ItemInfo::from_grid(grid, row, col, header));
            }
        }
        log::trace!("snapshot refreshed: {} items", self.items.len());
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&ItemInfo> {
        self.items.get(&(row, col))
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.items.contains_key(&(row, col))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_skips_rows_above_header_and_empties() {
        let mut grid = Grid::new("s");
        grid.set_input(0, 0, "Quarterly report");
        grid.set_input(1, 0, "name");
        grid.set_input(1, 1, "qty");
        grid.set_input(2, 0, "bolt");
        let header = HeaderOffset::new(2);

        let snap = CellSnapshot::capture(&grid, header);
        assert_eq!(snap.len(), 3);
        assert!(!snap.contains(0, 0));
        assert!(!snap.contains(2, 1));
        assert_eq!(snap.get(2, 0).unwrap().column, "name");
    }
}
