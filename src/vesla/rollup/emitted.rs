use serde::{Deserialize, Serialize};

use crate::vesla::rollup::model::{CellKind, MergedRange, NumberFormat, Position, StyleTag};
use crate::vesla::rollup::resolve::sheet_key;

/// The assembled workbook handed to a rendering backend.
///
/// Sheets are in declaration order and cells in the order they were
/// declared. Nothing in here is mutable once assembly returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedModel {
    pub sheets: Vec<EmittedSheet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedSheet {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column_widths: Vec<ColumnWidth>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_ranges: Vec<MergedRange>,
    pub cells: Vec<EmittedCell>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnWidth {
    pub column: u16,
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedCell {
    pub position: Position,
    /// A1 address of `position`, kept for readers of the JSON export.
    pub address: String,
    pub kind: CellKind,
    pub content: EmittedContent,
    pub number_format: NumberFormat,
    pub style: StyleTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmittedContent {
    Number { value: f64 },
    Text { value: String },
    /// Formula in the spreadsheet A1 dialect with its evaluated result.
    Formula { formula: String, value: f64 },
}

impl EmittedContent {
    pub fn formula(&self) -> Option<&str> {
        match self {
            EmittedContent::Formula { formula, .. } => Some(formula),
            _ => None,
        }
    }

    /// Literal number, or the evaluated result of a formula.
    pub fn number(&self) -> Option<f64> {
        match self {
            EmittedContent::Number { value } | EmittedContent::Formula { value, .. } => {
                Some(*value)
            }
            EmittedContent::Text { .. } => None,
        }
    }
}

impl EmittedModel {
    pub fn sheet(&self, name: &str) -> Option<&EmittedSheet> {
        let key = sheet_key(name);
        self.sheets.iter().find(|sheet| sheet_key(&sheet.name) == key)
    }

    pub fn cell(&self, sheet: &str, position: Position) -> Option<&EmittedCell> {
        self.sheet(sheet)?.cell(position)
    }

    pub fn cell_count(&self) -> usize {
        self.sheets.iter().map(|sheet| sheet.cells.len()).sum()
    }

    pub fn formula_count(&self) -> usize {
        self.sheets
            .iter()
            .flat_map(|sheet| &sheet.cells)
            .filter(|cell| cell.kind == CellKind::Computed)
            .count()
    }
}

impl EmittedSheet {
    pub fn cell(&self, position: Position) -> Option<&EmittedCell> {
        self.cells.iter().find(|cell| cell.position == position)
    }
}
