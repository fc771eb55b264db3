// Excel file import (xlsx, xls, xlsb, ods) and export (xlsx only)
//
// Import: values through calamine, fonts/fills/merges from the raw xlsx parts.
// Export: one worksheet per grid, values and cell styles, merges preserved.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, FormatUnderline, Workbook as XlsxWorkbook};
use sheetchat_engine::cell::{Alignment, CellFormat, CellValue, NumberFormat, VerticalAlignment};
use sheetchat_engine::grid::{Grid, MergedRegion};

use crate::xlsx_styles;

/// Maximum dimensions read from a sheet
const MAX_ROWS: usize = 65536;
const MAX_COLS: usize = 256;

/// Import the first sheet of an Excel file
pub fn import(path: &Path) -> Result<Grid, String> {
    import_sheet(path, None)
}

/// Import a sheet by name, or the first sheet when `sheet` is None
pub fn import_sheet(path: &Path, sheet: Option<&str>) -> Result<Grid, String> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| format!("Failed to open Excel file: {}", e))?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let sheet_name = match sheet {
        Some(name) => sheet_names
            .iter()
            .find(|n| n.as_str() == name)
            .cloned()
            .ok_or_else(|| format!("Sheet '{}' not found (available: {})", name, sheet_names.join(", ")))?,
        None => sheet_names
            .first()
            .cloned()
            .ok_or_else(|| "Excel file contains no sheets".to_string())?,
    };

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| format!("Failed to read sheet '{}': {}", sheet_name, e))?;

    let mut grid = Grid::new(sheet_name.clone());
    let (height, width) = range.get_size();
    if height > MAX_ROWS || width > MAX_COLS {
        log::warn!(
            "Sheet '{}' truncated from {}x{} to at most {}x{}",
            sheet_name, height, width, MAX_ROWS, MAX_COLS
        );
    }

    // Data may not begin at A1
    let (start_row, start_col) = range.start().unwrap_or((0, 0));

    for (row_idx, row) in range.rows().enumerate() {
        let target_row = start_row as usize + row_idx;
        if target_row >= MAX_ROWS {
            break;
        }
        for (col_idx, cell) in row.iter().enumerate() {
            let target_col = start_col as usize + col_idx;
            if target_col >= MAX_COLS {
                break;
            }
            let value = match cell {
                Data::Empty => continue,
                Data::String(s) if s.is_empty() => continue,
                Data::String(s) => CellValue::Text(s.clone()),
                Data::Float(n) => CellValue::Number(*n),
                Data::Int(n) => CellValue::Number(*n as f64),
                Data::Bool(b) => CellValue::Bool(*b),
                Data::Error(e) => CellValue::Text(format!("#{:?}", e)),
                // Serial number, the way the cell stores it
                Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
                other => CellValue::Text(other.to_string()),
            };
            grid.set_value(target_row, target_col, value);
        }
    }

    if is_xlsx(path) {
        import_formatting(path, &sheet_name, &mut grid);
    }

    log::debug!(
        "xlsx import '{}': {} rows x {} cols, {} merges",
        grid.name,
        grid.used_rows(),
        grid.used_cols(),
        grid.merges().len()
    );
    Ok(grid)
}

fn is_xlsx(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case("xlsx") || e.to_string_lossy().eq_ignore_ascii_case("xlsm"))
        .unwrap_or(false)
}

/// Apply cell formats and merged regions parsed from the raw parts.
/// Missing or malformed style parts leave the grid unstyled.
fn import_formatting(path: &Path, sheet_name: &str, grid: &mut Grid) {
    let (style_table, sheet_fmt) = match xlsx_styles::parse_xlsx_formatting(path, sheet_name) {
        Ok(data) => data,
        Err(e) => {
            log::warn!("Skipping xlsx formatting: {}", e);
            return;
        }
    };

    for &(row, col, style_id) in &sheet_fmt.cell_styles {
        if row >= MAX_ROWS || col >= MAX_COLS {
            continue;
        }
        let Some(format) = style_table.get(style_id) else {
            continue;
        };
        if format.is_default() {
            continue;
        }
        // Styled-empty cells only matter when they are visible
        if grid.is_empty_at(row, col) && format.background.is_none() && !format.bordered {
            continue;
        }
        grid.set_format(row, col, format.clone());
    }

    for &(sr, sc, er, ec) in &sheet_fmt.merged_regions {
        grid.add_merge(MergedRegion::new(sr, sc, er, ec));
    }
}

// =============================================================================
// XLSX Export
// =============================================================================

/// Export a grid as a single-sheet xlsx file
pub fn export(grid: &Grid, path: &Path) -> Result<(), String> {
    let mut workbook = XlsxWorkbook::new();
    let worksheet = workbook
        .add_worksheet()
        .set_name(&grid.name)
        .map_err(|e| format!("Failed to create sheet '{}': {}", grid.name, e))?;

    // Merges first: merge_range() blanks the whole range, then the anchor
    // cell is overwritten with its typed value below.
    for merge in grid.merges() {
        let format = build_excel_format(&grid.format(merge.first_row, merge.first_col));
        worksheet
            .merge_range(
                merge.first_row as u32,
                merge.first_col as u16,
                merge.last_row as u32,
                merge.last_col as u16,
                "",
                &format,
            )
            .map_err(|e| format!("Failed to write merge: {}", e))?;
    }

    for ((row, col), cell) in grid.cells_iter() {
        if grid.is_merge_covered(*row, *col) {
            continue;
        }
        let (row32, col16) = (*row as u32, *col as u16);
        let format = build_excel_format(&cell.format);
        let written = match &cell.value {
            CellValue::Empty => worksheet.write_blank(row32, col16, &format).map(|_| ()),
            CellValue::Text(s) => worksheet.write_string_with_format(row32, col16, s, &format).map(|_| ()),
            CellValue::Number(n) => worksheet.write_number_with_format(row32, col16, *n, &format).map(|_| ()),
            CellValue::Bool(b) => worksheet.write_boolean_with_format(row32, col16, *b, &format).map(|_| ()),
        };
        written.map_err(|e| format!("Failed to write cell ({}, {}): {}", row, col, e))?;
    }

    workbook
        .save(path)
        .map_err(|e| format!("Failed to save XLSX file: {}", e))
}

/// Build an Excel Format from a CellFormat
fn build_excel_format(cell_format: &CellFormat) -> Format {
    let mut format = Format::new();

    if cell_format.bold {
        format = format.set_bold();
    }
    if cell_format.italic {
        format = format.set_italic();
    }
    if cell_format.underline {
        format = format.set_underline(FormatUnderline::Single);
    }
    if let Some(size) = cell_format.font_size {
        format = format.set_font_size(size as f64);
    }
    if let Some(color) = cell_format.font_color {
        format = format.set_font_color(rust_xlsxwriter::Color::RGB(color.to_u32()));
    }
    if let Some(ref family) = cell_format.font_family {
        format = format.set_font_name(family);
    }
    if let Some(color) = cell_format.background {
        format = format.set_background_color(rust_xlsxwriter::Color::RGB(color.to_u32()));
    }
    if cell_format.bordered {
        format = format.set_border(FormatBorder::Thin);
    }

    format = match cell_format.alignment {
        Alignment::General => format,
        Alignment::Left => format.set_align(FormatAlign::Left),
        Alignment::Center => format.set_align(FormatAlign::Center),
        Alignment::Right => format.set_align(FormatAlign::Right),
    };

    format = match cell_format.vertical_alignment {
        VerticalAlignment::Top => format.set_align(FormatAlign::Top),
        VerticalAlignment::Middle => format,
        VerticalAlignment::Bottom => format.set_align(FormatAlign::Bottom),
    };

    apply_number_format(format, &cell_format.number_format)
}

fn apply_number_format(format: Format, number_format: &NumberFormat) -> Format {
    let zeros = |d: u8| if d == 0 { String::new() } else { format!(".{}", "0".repeat(d as usize)) };
    match number_format {
        NumberFormat::General => format,
        NumberFormat::Number { decimals } => format.set_num_format(format!("#,##0{}", zeros(*decimals))),
        NumberFormat::Currency { decimals } => format.set_num_format(format!("$#,##0{}", zeros(*decimals))),
        NumberFormat::Percent { decimals } => format.set_num_format(format!("0{}%", zeros(*decimals))),
    }
}
