// CSV/TSV import/export

use std::io::Read;
use std::path::Path;

use sheetchat_engine::grid::Grid;

pub fn import(path: &Path) -> Result<Grid, String> {
    let content = read_file_as_utf8(path)?;
    let delimiter = sniff_delimiter(&content);
    import_from_string(&content, delimiter, &sheet_name(path))
}

pub fn import_tsv(path: &Path) -> Result<Grid, String> {
    let content = read_file_as_utf8(path)?;
    import_from_string(&content, b'\t', &sheet_name(path))
}

fn sheet_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Sheet1".to_string())
}

/// Detect the most likely field delimiter by checking consistency across the first few lines.
///
/// For each candidate (tab, semicolon, comma, pipe), count fields per line. The delimiter
/// that produces the most consistent field count (>1 field) wins.
fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    if sample_lines.is_empty() {
        return b',';
    }

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        if counts.first().copied().unwrap_or(0) <= 1 {
            continue;
        }

        // Lines agreeing with line 1, weighted by field count
        let target = counts[0];
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;

        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

/// Read file and convert to UTF-8 if needed (handles Windows-1252, Latin-1, etc.)
pub fn read_file_as_utf8(path: &Path) -> Result<String, String> {
    let mut file = std::fs::File::open(path).map_err(|e| e.to_string())?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|e| e.to_string())?;

    match String::from_utf8(bytes) {
        Ok(s) => Ok(s.trim_start_matches('\u{feff}').to_string()),
        Err(e) => {
            let bytes = e.into_bytes();
            // Excel on Windows writes cp1252
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            Ok(decoded.into_owned())
        }
    }
}

fn import_from_string(content: &str, delimiter: u8, name: &str) -> Result<Grid, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut grid = Grid::new(name);
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| e.to_string())?;
        for (col_idx, field) in record.iter().enumerate() {
            if !field.is_empty() {
                grid.set_input(row_idx, col_idx, field);
            }
        }
    }

    log::debug!("csv import: {} rows x {} cols", grid.used_rows(), grid.used_cols());
    Ok(grid)
}

pub fn export(grid: &Grid, path: &Path) -> Result<(), String> {
    export_with_delimiter(grid, path, b',')
}

pub fn export_tsv(grid: &Grid, path: &Path) -> Result<(), String> {
    export_with_delimiter(grid, path, b'\t')
}

fn export_with_delimiter(grid: &Grid, path: &Path, delimiter: u8) -> Result<(), String> {
    // Merge-covered cells are written empty and trailing empties are dropped,
    // so rows can differ in width.
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)
        .map_err(|e| e.to_string())?;

    let cols = grid.used_cols();
    for row in 0..grid.used_rows() {
        let mut record: Vec<String> = Vec::with_capacity(cols);
        let mut last_non_empty = 0;

        for col in 0..cols {
            let value = if grid.is_merge_covered(row, col) {
                String::new()
            } else {
                grid.text(row, col)
            };
            if !value.is_empty() {
                last_non_empty = col + 1;
            }
            record.push(value);
        }

        // Blank rows inside the data are kept so row numbers survive a round trip
        record.truncate(last_non_empty.max(1));
        writer.write_record(&record).map_err(|e| e.to_string())?;
    }

    writer.flush().map_err(|e| e.to_string())?;
    Ok(())
}
