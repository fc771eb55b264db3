//! Typed descriptions of pending edits.

use sheetchat_engine::cell::{CellFormat, CellValue, Color, DataType};
use sheetchat_engine::grid::Grid;
use sheetchat_engine::header::HeaderOffset;
use sheetchat_engine::table::{Table, Value};

/// The per-cell styling an edit carries. Applying it replaces exactly these
/// four attributes and leaves the rest of the cell format alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemStyle {
    pub font_family: Option<String>,
    pub font_size: Option<f32>,
    pub font_color: Option<Color>,
    pub background: Option<Color>,
}

impl ItemStyle {
    pub fn from_format(format: &CellFormat) -> Self {
        Self {
            font_family: format.font_family.clone(),
            font_size: format.font_size,
            font_color: format.font_color,
            background: format.background,
        }
    }

    pub fn apply_to(&self, format: &mut CellFormat) {
        format.font_family = self.font_family.clone();
        format.font_size = self.font_size;
        format.font_color = self.font_color;
        format.background = self.background;
    }
}

/// One cell's proposed value and style.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemInfo {
    pub text: String,
    pub dtype: DataType,
    /// Grid row, 0-based and absolute
    pub row: usize,
    pub col: usize,
    pub column: String,
    /// None leaves the cell's current style in place
    pub style: Option<ItemStyle>,
}

impl ItemInfo {
    /// Data type is inferred from the text.
    pub fn new(row: usize, col: usize, column: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            dtype: DataType::infer(&text),
            text,
            row,
            col,
            column: column.into(),
            style: None,
        }
    }

    /// The cell as it currently stands, style included.
    pub fn from_grid(grid: &Grid, row: usize, col: usize, header: HeaderOffset) -> Self {
        let value = grid.value(row, col);
        Self {
            text: value.raw_display(),
            dtype: DataType::of_cell(&value),
            row,
            col,
            column: grid.column_name(col, header),
            style: Some(ItemStyle::from_format(&grid.format(row, col))),
        }
    }

    pub fn with_dtype(mut self, dtype: DataType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn with_style(mut self, style: ItemStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn grid_value(&self) -> CellValue {
        self.dtype.parse_cell(&self.text)
    }

    pub fn table_value(&self) -> Value {
        Value::parse(&self.text, self.dtype)
    }
}

/// One pending mutation, handed to every reconciler in turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeSet {
    /// Replace the data region with `table`, then apply the item styles
    FullReplace { table: Table, items: Vec<ItemInfo> },
    UpdateInPlace(Vec<ItemInfo>),
    InsertScalar(ItemInfo),
    DeleteScalar(ItemInfo),
    /// Items describe the new row; all share its grid row
    InsertRow(Vec<ItemInfo>),
    DeleteRow(Vec<ItemInfo>),
    /// Items describe the new column; all share its grid column
    InsertColumn(Vec<ItemInfo>),
    DeleteColumn(Vec<ItemInfo>),
    Reset,
}

impl ChangeSet {
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeSet::FullReplace { .. } => "FULL_REPLACE",
            ChangeSet::UpdateInPlace(_) => "UPDATE_IN_PLACE",
            ChangeSet::InsertScalar(_) => "INSERT_SCALAR",
            ChangeSet::DeleteScalar(_) => "DELETE_SCALAR",
            ChangeSet::InsertRow(_) => "INSERT_ROW",
            ChangeSet::DeleteRow(_) => "DELETE_ROW",
            ChangeSet::InsertColumn(_) => "INSERT_COLUMN",
            ChangeSet::DeleteColumn(_) => "DELETE_COLUMN",
            ChangeSet::Reset => "RESET",
        }
    }

    /// A full replace with no per-item styling.
    pub fn replace(table: Table) -> Self {
        ChangeSet::FullReplace { table, items: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_from_grid_captures_style() {
        let mut grid = Grid::new("s");
        grid.set_input(0, 0, "qty");
        grid.set_input(1, 0, "5");
        let mut fmt = CellFormat::default();
        fmt.background = Some(Color::rgb(1, 2, 3));
        fmt.bold = true;
        grid.set_format(1, 0, fmt);

        let item = ItemInfo::from_grid(&grid, 1, 0, HeaderOffset::FIRST_ROW);
        assert_eq!(item.text, "5");
        assert_eq!(item.dtype, DataType::Integer);
        assert_eq!(item.column, "qty");
        assert_eq!(item.style.as_ref().unwrap().background, Some(Color::rgb(1, 2, 3)));
        assert_eq!(item.table_value(), Value::Int(5));
    }

    #[test]
    fn test_style_apply_only_touches_item_attributes() {
        let mut fmt = CellFormat::default();
        fmt.bold = true;
        fmt.background = Some(Color::WHITE);
        ItemStyle {
            font_color: Some(Color::BLACK),
            ..ItemStyle::default()
        }
        .apply_to(&mut fmt);
        assert!(fmt.bold);
        assert_eq!(fmt.background, None);
        assert_eq!(fmt.font_color, Some(Color::BLACK));
    }

    #[test]
    fn test_dtype_drives_both_representations() {
        let item = ItemInfo::new(3, 1, "flag", "TRUE");
        assert_eq!(item.dtype, DataType::Bool);
        assert_eq!(item.grid_value(), CellValue::Bool(true));
        assert_eq!(item.table_value(), Value::Bool(true));

        let item = ItemInfo::new(3, 1, "code", "007").with_dtype(DataType::Text);
        assert_eq!(item.grid_value(), CellValue::Text("007".into()));
        assert_eq!(item.table_value(), Value::Text("007".into()));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ChangeSet::Reset.kind(), "RESET");
        assert_eq!(ChangeSet::replace(Table::new()).kind(), "FULL_REPLACE");
        assert_eq!(ChangeSet::UpdateInPlace(vec![]).kind(), "UPDATE_IN_PLACE");
    }
}
