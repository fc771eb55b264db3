use serde::{Deserialize, Serialize};

/// Horizontal text alignment
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub enum Alignment {
    #[default]
    General,
    Left,
    Center,
    Right,
}

/// Vertical text alignment
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub enum VerticalAlignment {
    Top,
    #[default]
    Middle,
    Bottom,
}

/// Number format type
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub enum NumberFormat {
    #[default]
    General,
    Number { decimals: u8 },
    Currency { decimals: u8 },
    Percent { decimals: u8 },
}

/// 24-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const WHITE: Color = Color { r: 0xFF, g: 0xFF, b: 0xFF };

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB`, `RRGGBB` or Excel-style `AARRGGBB` (alpha ignored).
    pub fn from_hex(s: &str) -> Option<Self> {
        let hex = s.trim().trim_start_matches('#');
        if !hex.is_ascii() {
            return None;
        }
        let hex = match hex.len() {
            6 => hex,
            8 => &hex[2..],
            _ => return None,
        };
        let value = u32::from_str_radix(hex, 16).ok()?;
        Some(Self {
            r: (value >> 16) as u8,
            g: (value >> 8) as u8,
            b: value as u8,
        })
    }

    /// `#rrggbb`
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// `FFRRGGBB`, the form xlsx style parts use.
    pub fn to_argb(&self) -> String {
        format!("FF{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    pub fn to_u32(&self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | self.b as u32
    }
}

/// Cell formatting options
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CellFormat {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub bordered: bool,
    pub alignment: Alignment,
    pub vertical_alignment: VerticalAlignment,
    pub number_format: NumberFormat,
    pub font_family: Option<String>,  // None = workbook default
    pub font_size: Option<f32>,
    pub font_color: Option<Color>,
    pub background: Option<Color>,
}

impl CellFormat {
    pub fn is_default(&self) -> bool {
        *self == CellFormat::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    pub fn from_input(input: &str) -> Self {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return CellValue::Empty;
        }

        if let Ok(num) = trimmed.parse::<f64>() {
            if num.is_finite() {
                return CellValue::Number(num);
            }
        }

        CellValue::Text(trimmed.to_string())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn raw_display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            CellValue::Bool(true) => "TRUE".to_string(),
            CellValue::Bool(false) => "FALSE".to_string(),
        }
    }

    /// Format a number according to the specified format
    pub fn format_number(n: f64, format: &NumberFormat) -> String {
        match format {
            NumberFormat::General => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", n as i64)
                } else {
                    format!("{:.2}", n)
                }
            }
            NumberFormat::Number { decimals } => {
                format!("{:.*}", *decimals as usize, n)
            }
            NumberFormat::Currency { decimals } => {
                if n < 0.0 {
                    format!("-${:.*}", *decimals as usize, n.abs())
                } else {
                    format!("${:.*}", *decimals as usize, n)
                }
            }
            NumberFormat::Percent { decimals } => {
                format!("{:.*}%", *decimals as usize, n * 100.0)
            }
        }
    }

    /// Display value with formatting applied
    pub fn formatted_display(&self, format: &CellFormat) -> String {
        match self {
            CellValue::Number(n) => Self::format_number(*n, &format.number_format),
            other => other.raw_display(),
        }
    }

    pub fn as_number(&self) -> f64 {
        match self {
            CellValue::Number(n) => *n,
            CellValue::Text(s) => s.parse().unwrap_or(0.0),
            CellValue::Bool(b) => if *b { 1.0 } else { 0.0 },
            CellValue::Empty => 0.0,
        }
    }
}

/// The parser a cell's text goes through before it lands in a typed store.
///
/// An edit carries its text plus one of these; the grid and the table each
/// run the text through it to get their own representation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Text,
    Integer,
    Float,
    Bool,
}

impl DataType {
    /// Guess the type of freshly typed text.
    pub fn infer(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            DataType::Text
        } else if trimmed.parse::<i64>().is_ok() {
            DataType::Integer
        } else if trimmed.parse::<f64>().map(|f| f.is_finite()).unwrap_or(false) {
            DataType::Float
        } else if parse_bool(trimmed).is_some() {
            DataType::Bool
        } else {
            DataType::Text
        }
    }

    pub fn of_cell(value: &CellValue) -> Self {
        match value {
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => DataType::Integer,
            CellValue::Number(_) => DataType::Float,
            CellValue::Bool(_) => DataType::Bool,
            CellValue::Empty | CellValue::Text(_) => DataType::Text,
        }
    }

    /// Parse text into a cell value. Text that doesn't fit the type falls back
    /// to a number if it is one, otherwise stays text.
    pub fn parse_cell(&self, text: &str) -> CellValue {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return CellValue::Empty;
        }
        match self {
            DataType::Text => CellValue::Text(text.to_string()),
            DataType::Bool => match parse_bool(trimmed) {
                Some(b) => CellValue::Bool(b),
                None => CellValue::from_input(trimmed),
            },
            DataType::Integer | DataType::Float => CellValue::from_input(trimmed),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Text => "str",
            DataType::Integer => "int64",
            DataType::Float => "float64",
            DataType::Bool => "bool",
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub value: CellValue,
    pub format: CellFormat,
}

impl Cell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, input: &str) {
        self.value = CellValue::from_input(input);
    }

    /// True when the cell carries neither a value nor formatting.
    pub fn is_blank(&self) -> bool {
        self.value.is_empty() && self.format.is_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertical_alignment_default_is_middle() {
        let format = CellFormat::default();
        assert_eq!(format.vertical_alignment, VerticalAlignment::Middle);
    }

    #[test]
    fn test_cell_format_defaults() {
        let format = CellFormat::default();
        assert!(!format.bold);
        assert!(!format.italic);
        assert!(!format.underline);
        assert!(!format.bordered);
        assert_eq!(format.alignment, Alignment::General);
        assert_eq!(format.number_format, NumberFormat::General);
        assert!(format.font_color.is_none());
        assert!(format.background.is_none());
        assert!(format.is_default());
    }

    #[test]
    fn test_color_hex_forms() {
        let c = Color::from_hex("#1a2B3c").unwrap();
        assert_eq!(c, Color::rgb(0x1a, 0x2b, 0x3c));
        assert_eq!(c.to_hex(), "#1a2b3c");
        assert_eq!(c.to_argb(), "FF1A2B3C");

        // ARGB from xlsx: alpha is dropped
        assert_eq!(Color::from_hex("FFFF0000"), Some(Color::rgb(255, 0, 0)));
        assert_eq!(Color::from_hex("abc"), None);
        assert_eq!(Color::from_hex("zzzzzz"), None);
    }

    #[test]
    fn test_from_input() {
        assert_eq!(CellValue::from_input("  "), CellValue::Empty);
        assert_eq!(CellValue::from_input("42"), CellValue::Number(42.0));
        assert_eq!(CellValue::from_input(" hi "), CellValue::Text("hi".into()));
        assert_eq!(CellValue::from_input("inf"), CellValue::Text("inf".into()));
    }

    #[test]
    fn test_raw_display() {
        assert_eq!(CellValue::Number(5.0).raw_display(), "5");
        assert_eq!(CellValue::Number(2.5).raw_display(), "2.5");
        assert_eq!(CellValue::Bool(true).raw_display(), "TRUE");
        assert_eq!(CellValue::Empty.raw_display(), "");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(CellValue::format_number(1234.5, &NumberFormat::Number { decimals: 1 }), "1234.5");
        assert_eq!(CellValue::format_number(-3.0, &NumberFormat::Currency { decimals: 2 }), "-$3.00");
        assert_eq!(CellValue::format_number(0.25, &NumberFormat::Percent { decimals: 0 }), "25%");
    }

    #[test]
    fn test_data_type_infer() {
        assert_eq!(DataType::infer("9"), DataType::Integer);
        assert_eq!(DataType::infer("9.5"), DataType::Float);
        assert_eq!(DataType::infer("TRUE"), DataType::Bool);
        assert_eq!(DataType::infer("nine"), DataType::Text);
        assert_eq!(DataType::infer(""), DataType::Text);
    }

    #[test]
    fn test_data_type_parse_falls_back() {
        assert_eq!(DataType::Integer.parse_cell("7"), CellValue::Number(7.0));
        // Integer parser on a fractional number still yields a number
        assert_eq!(DataType::Integer.parse_cell("7.5"), CellValue::Number(7.5));
        assert_eq!(DataType::Integer.parse_cell("seven"), CellValue::Text("seven".into()));
        assert_eq!(DataType::Bool.parse_cell("false"), CellValue::Bool(false));
        assert_eq!(DataType::Text.parse_cell("007"), CellValue::Text("007".into()));
        assert_eq!(DataType::Float.parse_cell(""), CellValue::Empty);
    }

    #[test]
    fn test_of_cell() {
        assert_eq!(DataType::of_cell(&CellValue::Number(3.0)), DataType::Integer);
        assert_eq!(DataType::of_cell(&CellValue::Number(3.1)), DataType::Float);
        assert_eq!(DataType::of_cell(&CellValue::Text("x".into())), DataType::Text);
    }
}
