// File I/O operations

pub mod csv;
pub mod xlsx;
pub mod xlsx_styles;

use std::path::Path;

use sheetchat_engine::grid::Grid;

/// Spreadsheet formats the loader understands, by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Tsv,
    Xlsx,
    /// Read-only formats handled by calamine (xls, xlsb, ods)
    Excel,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        match ext.as_str() {
            "csv" | "txt" => Some(FileFormat::Csv),
            "tsv" | "tab" => Some(FileFormat::Tsv),
            "xlsx" | "xlsm" => Some(FileFormat::Xlsx),
            "xls" | "xlsb" | "ods" => Some(FileFormat::Excel),
            _ => None,
        }
    }
}

/// Load a grid from any supported file, picking the reader by extension.
pub fn load(path: &Path) -> Result<Grid, String> {
    match FileFormat::from_path(path) {
        Some(FileFormat::Csv) => csv::import(path),
        Some(FileFormat::Tsv) => csv::import_tsv(path),
        Some(FileFormat::Xlsx) | Some(FileFormat::Excel) => xlsx::import(path),
        None => Err(format!("Unsupported file type: {}", path.display())),
    }
}

/// Save a grid, picking the writer by extension. Only csv, tsv and xlsx are writable.
pub fn save(grid: &Grid, path: &Path) -> Result<(), String> {
    match FileFormat::from_path(path) {
        Some(FileFormat::Csv) => csv::export(grid, path),
        Some(FileFormat::Tsv) => csv::export_tsv(grid, path),
        Some(FileFormat::Xlsx) => xlsx::export(grid, path),
        Some(FileFormat::Excel) => Err(format!(
            "Cannot write {}; save as .xlsx instead",
            path.display()
        )),
        None => Err(format!("Unsupported file type: {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(FileFormat::from_path(Path::new("a.CSV")), Some(FileFormat::Csv));
        assert_eq!(FileFormat::from_path(Path::new("a.xlsx")), Some(FileFormat::Xlsx));
        assert_eq!(FileFormat::from_path(Path::new("a.ods")), Some(FileFormat::Excel));
        assert_eq!(FileFormat::from_path(Path::new("a.sheet")), None);
        assert_eq!(FileFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_save_and_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let mut grid = Grid::default();
        grid.set_input(0, 0, "a");
        grid.set_input(1, 0, "1");

        for name in ["t.csv", "t.tsv", "t.xlsx"] {
            let path = dir.path().join(name);
            save(&grid, &path).unwrap();
            let loaded = load(&path).unwrap();
            assert_eq!(loaded.text(0, 0), "a", "{name}");
            assert_eq!(loaded.text(1, 0), "1", "{name}");
        }

        assert!(save(&grid, &dir.path().join("t.ods")).is_err());
        assert!(load(&dir.path().join("t.bin")).is_err());
    }
}
