//! XLSX style parser: extracts fonts, fills and merges from styles.xml and
//! the worksheet XML inside an XLSX (ZIP) archive.
//!
//! calamine gives us values only; the chat pipeline copies fonts and colours
//! between cells, so they have to come from the raw parts.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Read, Seek};
use std::path::Path;
use sheetchat_engine::cell::{Alignment, CellFormat, Color, NumberFormat, VerticalAlignment};
use zip::ZipArchive;

// =============================================================================
// Public types
// =============================================================================

/// Parsed style table from styles.xml: cellXfs index → CellFormat.
#[derive(Debug, Default)]
pub struct StyleTable {
    pub styles: Vec<CellFormat>,
}

impl StyleTable {
    pub fn get(&self, id: usize) -> Option<&CellFormat> {
        self.styles.get(id)
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }
}

/// Per-cell style references extracted from a worksheet XML.
#[derive(Debug, Default)]
pub struct SheetFormatting {
    /// (row, col, style_id) triples
    pub cell_styles: Vec<(usize, usize, usize)>,
    /// Merged cell regions: (start_row, start_col, end_row, end_col)
    pub merged_regions: Vec<(usize, usize, usize, usize)>,
}

// =============================================================================
// Built-in number formats
// =============================================================================

fn builtin_number_format(id: u16) -> NumberFormat {
    match id {
        1 | 3 | 37 | 38 => NumberFormat::Number { decimals: 0 },
        2 | 4 | 11 | 39 | 40 | 48 => NumberFormat::Number { decimals: 2 },
        9 => NumberFormat::Percent { decimals: 0 },
        10 => NumberFormat::Percent { decimals: 2 },
        5 | 6 => NumberFormat::Currency { decimals: 0 },
        7 | 8 | 44 => NumberFormat::Currency { decimals: 2 },
        _ => NumberFormat::General,
    }
}

// =============================================================================
// Colors
// =============================================================================

/// The first 24 entries of the legacy indexed palette; later entries are rare.
fn indexed_color(idx: u8) -> Option<Color> {
    let (r, g, b) = match idx {
        0 | 8 | 64 => (0, 0, 0),
        1 | 9 | 65 => (255, 255, 255),
        2 | 10 => (255, 0, 0),
        3 | 11 => (0, 255, 0),
        4 | 12 => (0, 0, 255),
        5 | 13 => (255, 255, 0),
        6 | 14 => (255, 0, 255),
        7 | 15 => (0, 255, 255),
        16 => (128, 0, 0),
        17 => (0, 128, 0),
        18 => (0, 0, 128),
        19 => (128, 128, 0),
        20 => (128, 0, 128),
        21 => (0, 128, 128),
        22 => (192, 192, 192),
        23 => (128, 128, 128),
        _ => return None,
    };
    Some(Color::rgb(r, g, b))
}

/// Flat theme colour defaults (no tint math).
fn theme_color_default(idx: u8) -> Option<Color> {
    let (r, g, b) = match idx {
        0 => (255, 255, 255),
        1 => (0, 0, 0),
        2 => (238, 236, 225),
        3 => (31, 73, 125),
        4 => (79, 129, 189),
        5 => (192, 80, 77),
        6 => (155, 187, 89),
        7 => (128, 100, 162),
        8 => (75, 172, 198),
        9 => (247, 150, 70),
        _ => return None,
    };
    Some(Color::rgb(r, g, b))
}

/// Parse a `<color>`/`<fgColor>` element. rgb wins over indexed over theme.
fn parse_color(e: &BytesStart) -> Option<Color> {
    let mut rgb = None;
    let mut indexed = None;
    let mut theme = None;
    for attr in e.attributes().flatten() {
        let value = String::from_utf8_lossy(&attr.value).to_string();
        match attr.key.as_ref() {
            b"rgb" => rgb = Color::from_hex(&value),
            b"indexed" => indexed = value.parse().ok().and_then(indexed_color),
            b"theme" => theme = value.parse().ok().and_then(theme_color_default),
            _ => {}
        }
    }
    rgb.or(indexed).or(theme)
}

fn attr_value(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

fn attr_parse<T: std::str::FromStr>(e: &BytesStart, key: &[u8]) -> Option<T> {
    attr_value(e, key).and_then(|v| v.parse().ok())
}

// =============================================================================
// styles.xml
// =============================================================================

#[derive(Debug, Clone, Default)]
struct ParsedFont {
    bold: bool,
    italic: bool,
    underline: bool,
    size: Option<f32>,
    color: Option<Color>,
    family: Option<String>,
}

#[derive(Debug, Default)]
struct XfEntry {
    num_fmt_id: Option<u16>,
    font_id: Option<usize>,
    fill_id: Option<usize>,
    border_id: Option<usize>,
    h_align: Option<String>,
    v_align: Option<String>,
}

impl XfEntry {
    fn from_element(e: &BytesStart) -> Self {
        Self {
            num_fmt_id: attr_parse(e, b"numFmtId"),
            font_id: attr_parse(e, b"fontId"),
            fill_id: attr_parse(e, b"fillId"),
            border_id: attr_parse(e, b"borderId"),
            h_align: None,
            v_align: None,
        }
    }

    fn read_alignment(&mut self, e: &BytesStart) {
        self.h_align = attr_value(e, b"horizontal");
        self.v_align = attr_value(e, b"vertical");
    }
}

/// Parse styles.xml content into a StyleTable.
pub fn parse_styles_xml(xml: &str) -> StyleTable {
    let fonts = parse_fonts(xml);
    let fills = parse_fills(xml);
    let borders = parse_border_presence(xml);
    let styles = parse_cell_xfs(xml, &fonts, &fills, &borders);
    StyleTable { styles }
}

fn parse_fonts(xml: &str) -> Vec<ParsedFont> {
    let mut fonts = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut depth = 0; // 1 = inside <fonts>, 2 = inside <font>
    let mut current = ParsedFont::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"fonts" if depth == 0 => depth = 1,
                b"font" if depth == 1 => {
                    depth = 2;
                    current = ParsedFont::default();
                }
                b"color" if depth == 2 => current.color = parse_color(e),
                _ => {}
            },
            Ok(Event::Empty(ref e)) if depth == 2 => match e.name().as_ref() {
                b"b" => current.bold = attr_value(e, b"val").map_or(true, |v| v != "0"),
                b"i" => current.italic = attr_value(e, b"val").map_or(true, |v| v != "0"),
                b"u" => current.underline = attr_value(e, b"val").map_or(true, |v| v != "none"),
                b"sz" => current.size = attr_parse(e, b"val"),
                b"color" => current.color = parse_color(e),
                b"name" | b"rFont" => current.family = attr_value(e, b"val"),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"font" if depth == 2 => {
                    fonts.push(current.clone());
                    depth = 1;
                }
                b"fonts" if depth == 1 => break,
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    fonts
}

/// Solid fill colour per `<fill>`, None for pattern "none" and gradients.
fn parse_fills(xml: &str) -> Vec<Option<Color>> {
    let mut fills = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut depth = 0;
    let mut in_pattern = false;
    let mut current: Option<Color> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"fills" if depth == 0 => depth = 1,
                b"fill" if depth == 1 => {
                    depth = 2;
                    current = None;
                }
                b"patternFill" if depth == 2 => {
                    in_pattern = attr_value(e, b"patternType").as_deref() != Some("none");
                }
                b"fgColor" if in_pattern => current = parse_color(e),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"fill" if depth == 1 => fills.push(None),
                b"fgColor" if in_pattern => current = parse_color(e),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"patternFill" => in_pattern = false,
                b"fill" if depth == 2 => {
                    fills.push(current.take());
                    depth = 1;
                    in_pattern = false;
                }
                b"fills" if depth == 1 => break,
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    fills
}

/// For each `<border>`: whether any edge has a style.
fn parse_border_presence(xml: &str) -> Vec<bool> {
    let mut borders = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut depth = 0;
    let mut current = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if depth == 2 && matches!(e.name().as_ref(), b"left" | b"right" | b"top" | b"bottom") =>
            {
                if attr_value(e, b"style").is_some_and(|s| s != "none") {
                    current = true;
                }
            }
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"borders" if depth == 0 => depth = 1,
                b"border" if depth == 1 => {
                    depth = 2;
                    current = false;
                }
                _ => {}
            },
            Ok(Event::Empty(ref e)) if depth == 1 && e.name().as_ref() == b"border" => {
                borders.push(false);
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"border" if depth == 2 => {
                    borders.push(current);
                    depth = 1;
                }
                b"borders" if depth == 1 => break,
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    borders
}

fn parse_cell_xfs(
    xml: &str,
    fonts: &[ParsedFont],
    fills: &[Option<Color>],
    borders: &[bool],
) -> Vec<CellFormat> {
    let mut styles = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_cell_xfs = false;
    let mut current: Option<XfEntry> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"cellXfs" => in_cell_xfs = true,
                b"xf" if in_cell_xfs => current = Some(XfEntry::from_element(e)),
                b"alignment" => {
                    if let Some(xf) = current.as_mut() {
                        xf.read_alignment(e);
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"xf" if in_cell_xfs => {
                    styles.push(resolve_xf(&XfEntry::from_element(e), fonts, fills, borders));
                }
                b"alignment" => {
                    if let Some(xf) = current.as_mut() {
                        xf.read_alignment(e);
                    }
                }
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"xf" => {
                    if let Some(xf) = current.take() {
                        styles.push(resolve_xf(&xf, fonts, fills, borders));
                    }
                }
                b"cellXfs" => break,
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    styles
}

fn resolve_xf(
    xf: &XfEntry,
    fonts: &[ParsedFont],
    fills: &[Option<Color>],
    borders: &[bool],
) -> CellFormat {
    let mut format = CellFormat::default();

    if let Some(font) = xf.font_id.and_then(|id| fonts.get(id)) {
        format.bold = font.bold;
        format.italic = font.italic;
        format.underline = font.underline;
        format.font_size = font.size;
        format.font_color = font.color;
        format.font_family = font.family.clone();
    }

    if let Some(Some(color)) = xf.fill_id.and_then(|id| fills.get(id)) {
        format.background = Some(*color);
    }

    format.bordered = xf
        .border_id
        .and_then(|id| borders.get(id))
        .copied()
        .unwrap_or(false);

    if let Some(id) = xf.num_fmt_id {
        format.number_format = builtin_number_format(id);
    }

    format.alignment = match xf.h_align.as_deref() {
        Some("left") => Alignment::Left,
        Some("center") | Some("centerContinuous") => Alignment::Center,
        Some("right") => Alignment::Right,
        _ => Alignment::General,
    };

    format.vertical_alignment = match xf.v_align.as_deref() {
        Some("top") => VerticalAlignment::Top,
        Some("bottom") => VerticalAlignment::Bottom,
        _ => VerticalAlignment::Middle,
    };

    format
}

// =============================================================================
// Worksheet XML
// =============================================================================

/// Parse a worksheet XML for per-cell style IDs and merged regions.
pub fn parse_sheet_formatting(xml: &str) -> SheetFormatting {
    let mut formatting = SheetFormatting::default();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"c" => {
                    let style_id: Option<usize> = attr_parse(e, b"s");
                    let cell_ref = attr_value(e, b"r");
                    // style 0 is the workbook default
                    if let (Some(style_id), Some(cell_ref)) = (style_id, cell_ref) {
                        if style_id > 0 {
                            if let Some((row, col)) = parse_cell_ref(&cell_ref) {
                                formatting.cell_styles.push((row, col, style_id));
                            }
                        }
                    }
                }
                b"mergeCell" => {
                    if let Some(region) = attr_value(e, b"ref").as_deref().and_then(parse_merge_ref) {
                        formatting.merged_regions.push(region);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    formatting
}

/// Parse a merge range reference like "A1:C3" into (start_row, start_col, end_row, end_col).
pub fn parse_merge_ref(r: &str) -> Option<(usize, usize, usize, usize)> {
    let (start, end) = r.split_once(':')?;
    let (sr, sc) = parse_cell_ref(start)?;
    let (er, ec) = parse_cell_ref(end)?;
    Some((sr, sc, er, ec))
}

/// Parse a cell reference like "B5" into (row, col) = (4, 1).
pub fn parse_cell_ref(r: &str) -> Option<(usize, usize)> {
    let r = r.trim().replace('$', "");
    let split = r.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = r.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let mut col: usize = 0;
    for ch in letters.chars() {
        col = col * 26 + (ch.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }

    let row: usize = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row - 1, col - 1))
}

// =============================================================================
// Top-level entry point
// =============================================================================

/// Parse the style table and one sheet's formatting from an XLSX file.
pub fn parse_xlsx_formatting(
    path: &Path,
    sheet_name: &str,
) -> Result<(StyleTable, SheetFormatting), String> {
    let file = std::fs::File::open(path)
        .map_err(|e| format!("Failed to open XLSX file for styles: {}", e))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| format!("Failed to read XLSX as ZIP for styles: {}", e))?;

    let style_table = match read_zip_file(&mut archive, "xl/styles.xml") {
        Ok(xml) => parse_styles_xml(&xml),
        Err(_) => StyleTable::default(),
    };

    let workbook_xml = read_zip_file(&mut archive, "xl/workbook.xml").unwrap_or_default();
    let rels_xml = read_zip_file(&mut archive, "xl/_rels/workbook.xml.rels").unwrap_or_default();

    let formatting = match resolve_worksheet_path(&workbook_xml, &rels_xml, sheet_name) {
        Some(ws_path) => read_zip_file(&mut archive, &ws_path)
            .map(|xml| parse_sheet_formatting(&xml))
            .unwrap_or_default(),
        None => SheetFormatting::default(),
    };

    Ok((style_table, formatting))
}

fn read_zip_file<R: Read + Seek>(archive: &mut ZipArchive<R>, path: &str) -> Result<String, String> {
    let mut file = archive
        .by_name(path)
        .map_err(|e| format!("File '{}' not found in XLSX: {}", path, e))?;
    let mut content = String::new();
    file.read_to_string(&mut content)
        .map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    Ok(content)
}

/// Map a sheet name to its worksheet part via workbook.xml and its rels.
fn resolve_worksheet_path(workbook_xml: &str, rels_xml: &str, sheet_name: &str) -> Option<String> {
    let mut rid = None;
    let mut reader = Reader::from_str(workbook_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) if e.name().as_ref() == b"sheet" => {
                if attr_value(e, b"name").as_deref() == Some(sheet_name) {
                    rid = attr_value(e, b"r:id");
                    break;
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    let rid = rid?;

    let mut reader = Reader::from_str(rels_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if e.name().as_ref() == b"Relationship" =>
            {
                if attr_value(e, b"Id").as_deref() == Some(rid.as_str()) {
                    let target = attr_value(e, b"Target")?;
                    let target = target.trim_start_matches('/');
                    return Some(if target.starts_with("xl/") {
                        target.to_string()
                    } else {
                        format!("xl/{}", target)
                    });
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    None
}
