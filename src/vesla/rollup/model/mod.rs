use std::fmt;

use rust_xlsxwriter::utility::row_col_to_cell;
use serde::{Deserialize, Serialize};

use crate::vesla::rollup::formula::Expr;

pub mod registry;
pub mod sheet;

pub use registry::{CellRegistry, RowCursor};
pub use sheet::{Sheet, SheetHandle, SheetId};

/// Number of rows available in a worksheet.
pub const MAX_ROWS: u32 = 1_048_576;
/// Number of columns available in a worksheet.
pub const MAX_COLUMNS: u16 = 16_384;
/// Longest text a single cell or note can hold.
pub const MAX_TEXT_LEN: usize = 32_767;

/// Zero-based (row, column) coordinate of a cell within its sheet.
///
/// Displayed in A1 notation, so `Position::new(4, 1)` prints as `B5`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Position {
    pub row: u32,
    pub col: u16,
}

impl Position {
    pub const fn new(row: u32, col: u16) -> Self {
        Self { row, col }
    }

    /// Renders the position in relative A1 notation.
    pub fn to_a1(&self) -> String {
        row_col_to_cell(self.row, self.col)
    }

    /// Parses a relative or absolute A1 cell (`B5`, `$B$5`, `b5`).
    pub fn from_a1(text: &str) -> Option<Self> {
        let text = text.trim();
        let bytes = text.as_bytes();
        let mut idx = 0;
        if bytes.get(idx) == Some(&b'$') {
            idx += 1;
        }
        let letters_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_alphabetic() {
            idx += 1;
        }
        let col = column_from_letters(&text[letters_start..idx])?;
        if bytes.get(idx) == Some(&b'$') {
            idx += 1;
        }
        let digits = &text[idx..];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let row: u32 = digits.parse().ok()?;
        if row == 0 || row > MAX_ROWS {
            return None;
        }
        Some(Self::new(row - 1, col))
    }

    pub(crate) fn in_grid(&self) -> bool {
        self.row < MAX_ROWS && self.col < MAX_COLUMNS
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// Rectangular block of cells rendered as one, anchored at `first`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergedRange {
    pub first: Position,
    pub last: Position,
}

impl MergedRange {
    pub const fn new(first: Position, last: Position) -> Self {
        Self { first, last }
    }

    /// Parses `A1:F1`.
    pub fn parse(text: &str) -> Option<Self> {
        let (first, last) = text.split_once(':')?;
        Some(Self::new(Position::from_a1(first)?, Position::from_a1(last)?))
    }

    pub fn contains(&self, position: Position) -> bool {
        (self.first.row..=self.last.row).contains(&position.row)
            && (self.first.col..=self.last.col).contains(&position.col)
    }

    pub fn overlaps(&self, other: &MergedRange) -> bool {
        self.first.row <= other.last.row
            && other.first.row <= self.last.row
            && self.first.col <= other.last.col
            && other.first.col <= self.last.col
    }
}

impl fmt::Display for MergedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.first, self.last)
    }
}

/// Converts column letters (`A`, `AB`) into a zero-based column index.
pub fn column_from_letters(letters: &str) -> Option<u16> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut col: u32 = 0;
    for b in letters.bytes() {
        if !b.is_ascii_alphabetic() {
            return None;
        }
        col = col * 26 + u32::from(b.to_ascii_uppercase() - b'A') + 1;
    }
    let col = col - 1;
    if col >= u32::from(MAX_COLUMNS) {
        return None;
    }
    u16::try_from(col).ok()
}

/// Literal carried by an input cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Literal {
    Number(f64),
    Text(String),
}

impl Literal {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Literal::Number(value) => Some(*value),
            Literal::Text(_) => None,
        }
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Number(value)
    }
}

impl From<i32> for Literal {
    fn from(value: i32) -> Self {
        Literal::Number(f64::from(value))
    }
}

impl From<u32> for Literal {
    fn from(value: u32) -> Self {
        Literal::Number(f64::from(value))
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Text(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::Text(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    /// Literal, externally editable model parameter.
    Input,
    /// Formula over other cells.
    Computed,
    /// Display-only text.
    Label,
    Section,
    Header,
}

/// Semantic number format. Only consulted by the rendering backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberFormat {
    #[default]
    General,
    Integer,
    Decimal1,
    Decimal3,
    Money,
    Currency,
    /// Three-decimal unit price, e.g. `$0.106`.
    Rate3,
    Percentage,
    /// Share with one decimal, e.g. `12.5%`.
    Percentage1,
}

impl NumberFormat {
    /// Spreadsheet number-format pattern, `None` for the application default.
    pub fn pattern(self) -> Option<&'static str> {
        match self {
            NumberFormat::General => None,
            NumberFormat::Integer => Some("#,##0"),
            NumberFormat::Decimal1 => Some("#,##0.0"),
            NumberFormat::Decimal3 => Some("#,##0.000"),
            NumberFormat::Money => Some("#,##0.00"),
            NumberFormat::Currency => Some("$#,##0.00"),
            NumberFormat::Rate3 => Some("$#,##0.000"),
            NumberFormat::Percentage => Some("0%"),
            NumberFormat::Percentage1 => Some("0.0%"),
        }
    }
}

/// Presentation tag; the backend maps each tag to a fixed format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleTag {
    Input,
    Calculated,
    Total,
    Header,
    Section,
    Plain,
    Note,
}

/// What a cell holds before assembly.
#[derive(Debug, Clone, PartialEq)]
pub enum CellContent {
    Input(Literal),
    Computed(Expr),
    Label(String),
    Section(String),
    Header(String),
}

impl CellContent {
    pub fn kind(&self) -> CellKind {
        match self {
            CellContent::Input(_) => CellKind::Input,
            CellContent::Computed(_) => CellKind::Computed,
            CellContent::Label(_) => CellKind::Label,
            CellContent::Section(_) => CellKind::Section,
            CellContent::Header(_) => CellKind::Header,
        }
    }
}

/// A cell declaration: content plus its presentation and audit metadata.
///
/// Constructors pick the style that matches the content (`input` cells are
/// yellow, formulas green, and so on); the builder methods override it.
///
/// ```
/// use vesla_rollup::model::{CellDecl, NumberFormat};
///
/// let rate = CellDecl::number("Compute (per CU-hour)", 0.106)
///     .format(NumberFormat::Rate3)
///     .unit_price("neon.com/pricing, Aug 2025");
/// assert!(rate.is_unit_price());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CellDecl {
    pub(crate) content: CellContent,
    pub(crate) format: NumberFormat,
    pub(crate) style: StyleTag,
    pub(crate) label: Option<String>,
    pub(crate) provenance: Option<String>,
    pub(crate) unit_price: bool,
}

impl CellDecl {
    fn with_content(content: CellContent, style: StyleTag) -> Self {
        Self {
            content,
            format: NumberFormat::General,
            style,
            label: None,
            provenance: None,
            unit_price: false,
        }
    }

    /// Numeric input with its human-readable label.
    pub fn number(label: impl Into<String>, value: impl Into<f64>) -> Self {
        Self::input(label, Literal::Number(value.into()))
    }

    /// Input holding a literal value.
    pub fn input(label: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::with_content(CellContent::Input(value.into()), StyleTag::Input).label(label)
    }

    pub fn computed(expr: Expr) -> Self {
        Self::with_content(CellContent::Computed(expr), StyleTag::Calculated)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::with_content(CellContent::Label(text.into()), StyleTag::Plain)
    }

    pub fn section(text: impl Into<String>) -> Self {
        Self::with_content(CellContent::Section(text.into()), StyleTag::Section)
    }

    pub fn header(text: impl Into<String>) -> Self {
        Self::with_content(CellContent::Header(text.into()), StyleTag::Header)
    }

    pub fn format(mut self, format: NumberFormat) -> Self {
        self.format = format;
        self
    }

    pub fn style(mut self, style: StyleTag) -> Self {
        self.style = style;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Marks the cell as a published unit price with its source citation.
    pub fn unit_price(mut self, provenance: impl Into<String>) -> Self {
        self.unit_price = true;
        self.provenance = Some(provenance.into());
        self
    }

    /// Attaches a source note without marking the cell as a unit price.
    pub fn provenance(mut self, provenance: impl Into<String>) -> Self {
        self.provenance = Some(provenance.into());
        self
    }

    pub fn kind(&self) -> CellKind {
        self.content.kind()
    }

    pub fn content(&self) -> &CellContent {
        &self.content
    }

    pub fn is_unit_price(&self) -> bool {
        self.unit_price
    }
}

/// A declared cell as stored by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub position: Position,
    pub decl: CellDecl,
}

/// Stable handle to a declared cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellHandle {
    pub sheet: SheetId,
    pub position: Position,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a1_notation_roundtrips() {
        let position = Position::new(11, 1);
        assert_eq!(position.to_a1(), "B12");
        assert_eq!(Position::from_a1("B12"), Some(position));
        assert_eq!(Position::from_a1("$B$12"), Some(position));
        assert_eq!(Position::from_a1("b12"), Some(position));
        assert_eq!(Position::new(31, 54).to_a1(), "BC32");
    }

    #[test]
    fn a1_parser_rejects_malformed_cells() {
        assert_eq!(Position::from_a1("12"), None);
        assert_eq!(Position::from_a1("B"), None);
        assert_eq!(Position::from_a1("B0"), None);
        assert_eq!(Position::from_a1("B1x"), None);
        assert_eq!(Position::from_a1("XFE1"), None);
    }

    #[test]
    fn decl_defaults_follow_content() {
        let input = CellDecl::number("Hours", 420.0);
        assert_eq!(input.kind(), CellKind::Input);
        assert_eq!(input.style, StyleTag::Input);
        assert_eq!(input.label.as_deref(), Some("Hours"));

        let header = CellDecl::header("Item");
        assert_eq!(header.style, StyleTag::Header);
        assert_eq!(header.format, NumberFormat::General);
    }

    #[test]
    fn formats_map_to_patterns() {
        assert_eq!(NumberFormat::Rate3.pattern(), Some("$#,##0.000"));
        assert_eq!(NumberFormat::Integer.pattern(), Some("#,##0"));
        assert_eq!(NumberFormat::Percentage1.pattern(), Some("0.0%"));
        assert_eq!(NumberFormat::General.pattern(), None);
    }

    #[test]
    fn merged_ranges_parse_and_intersect() {
        let title = MergedRange::parse("A1:F1").expect("range");
        assert_eq!(title, MergedRange::new(Position::new(0, 0), Position::new(0, 5)));
        assert_eq!(title.to_string(), "A1:F1");
        assert!(title.contains(Position::new(0, 3)));
        assert!(!title.contains(Position::new(1, 0)));

        let column = MergedRange::parse("C1:C4").expect("range");
        assert!(title.overlaps(&column));
        assert!(!title.overlaps(&MergedRange::parse("A2:F2").expect("range")));
        assert_eq!(MergedRange::parse("A1"), None);
    }
}
