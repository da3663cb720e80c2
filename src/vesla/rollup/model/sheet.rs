use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::vesla::rollup::error::ModelError;
use crate::vesla::rollup::model::registry::CellRegistry;
use crate::vesla::rollup::model::{MergedRange, Position};

/// Longest sheet name a spreadsheet application accepts.
pub const MAX_SHEET_NAME_LEN: usize = 31;

/// Index of a sheet in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SheetId(pub(crate) usize);

impl SheetId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Returned by `begin_sheet`; identifies the sheet being built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetHandle {
    pub id: SheetId,
    pub name: String,
}

/// An ordered, named collection of cells plus its column layout.
#[derive(Debug, Clone)]
pub struct Sheet {
    id: SheetId,
    name: String,
    registry: CellRegistry,
    column_widths: BTreeMap<u16, f64>,
    merged: Vec<MergedRange>,
}

impl Sheet {
    pub(crate) fn new(id: SheetId, name: String) -> Self {
        Self {
            id,
            name,
            registry: CellRegistry::new(),
            column_widths: BTreeMap::new(),
            merged: Vec::new(),
        }
    }

    pub fn id(&self) -> SheetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &CellRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut CellRegistry {
        &mut self.registry
    }

    pub fn column_widths(&self) -> &BTreeMap<u16, f64> {
        &self.column_widths
    }

    pub(crate) fn set_column_width(&mut self, col: u16, width: f64) {
        self.column_widths.insert(col, width);
    }

    /// Merged ranges in the order they were added.
    pub fn merged_ranges(&self) -> &[MergedRange] {
        &self.merged
    }

    /// The merged range hiding `position`, if any. Anchors are not hidden.
    pub fn merge_covering(&self, position: Position) -> Option<&MergedRange> {
        self.merged
            .iter()
            .find(|range| range.contains(position) && range.first != position)
    }

    pub(crate) fn add_merged_range(&mut self, range: MergedRange) -> Result<(), ModelError> {
        let invalid = |reason: &'static str| ModelError::InvalidMergeRange {
            sheet: self.name.clone(),
            range: range.to_string(),
            reason,
        };
        if range.first.row > range.last.row || range.first.col > range.last.col {
            return Err(invalid("first cell is below or right of the last"));
        }
        if range.first == range.last {
            return Err(invalid("range covers a single cell"));
        }
        if !range.last.in_grid() {
            return Err(ModelError::PositionOutOfRange {
                sheet: self.name.clone(),
                row: range.last.row,
                col: range.last.col,
            });
        }
        if let Some(existing) = self.merged.iter().find(|other| other.overlaps(&range)) {
            return Err(ModelError::OverlappingMerge {
                sheet: self.name.clone(),
                range: range.to_string(),
                existing: existing.to_string(),
            });
        }
        if let Some(cell) = self
            .registry
            .cells()
            .iter()
            .find(|cell| range.contains(cell.position) && cell.position != range.first)
        {
            return Err(ModelError::CoveredByMerge {
                sheet: self.name.clone(),
                position: cell.position,
                range: range.to_string(),
            });
        }
        self.merged.push(range);
        Ok(())
    }
}

/// Checks a sheet name against the rules spreadsheet applications enforce.
pub fn validate_sheet_name(name: &str) -> Result<(), ModelError> {
    let invalid = |reason: &'static str| ModelError::InvalidSheetName {
        name: name.to_string(),
        reason,
    };

    if name.trim().is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.chars().count() > MAX_SHEET_NAME_LEN {
        return Err(invalid("name is longer than 31 characters"));
    }
    if name
        .chars()
        .any(|ch| matches!(ch, ':' | '\\' | '/' | '?' | '*' | '[' | ']') || ch.is_control())
    {
        return Err(invalid("name contains one of : \\ / ? * [ ]"));
    }
    if name.starts_with('\'') || name.ends_with('\'') {
        return Err(invalid("name starts or ends with an apostrophe"));
    }
    Ok(())
}

/// Renders a sheet name as a formula prefix, quoting only when needed.
pub fn quote_sheet_name(name: &str) -> String {
    let plain = name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.')
        && name.chars().next().is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_')
        && !looks_like_cell(name);
    if plain {
        return name.to_string();
    }
    let escaped = name.replace('\'', "''");
    format!("'{escaped}'")
}

// Names such as `A1` or `R2C3` would be read back as cell references.
fn looks_like_cell(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    let letters = upper.trim_end_matches(|ch: char| ch.is_ascii_digit());
    let r1c1 = upper.starts_with('R') && upper.contains('C');
    (letters.len() < upper.len() && letters.chars().all(|ch| ch.is_ascii_alphabetic())) || r1c1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vesla::rollup::model::CellDecl;

    #[test]
    fn sheet_names_follow_spreadsheet_rules() {
        assert!(validate_sheet_name("Unit Prices").is_ok());
        assert!(validate_sheet_name("Option A - Starter").is_ok());
        assert!(validate_sheet_name("").is_err());
        assert!(validate_sheet_name("Costs/2025").is_err());
        assert!(validate_sheet_name("'quoted").is_err());
        assert!(validate_sheet_name(&"x".repeat(32)).is_err());
    }

    fn range(text: &str) -> MergedRange {
        MergedRange::parse(text).expect("valid range")
    }

    #[test]
    fn merged_ranges_must_not_overlap() {
        let mut sheet = Sheet::new(SheetId(0), "Usage".to_string());
        sheet.add_merged_range(range("A1:F1")).expect("title row");
        sheet.add_merged_range(range("A3:F3")).expect("section row");

        let err = sheet.add_merged_range(range("F1:G2")).unwrap_err();
        assert_eq!(
            err,
            ModelError::OverlappingMerge {
                sheet: "Usage".to_string(),
                range: "F1:G2".to_string(),
                existing: "A1:F1".to_string(),
            }
        );
        assert_eq!(sheet.merged_ranges().len(), 2);
        assert_eq!(sheet.merge_covering(Position::new(0, 2)), Some(&range("A1:F1")));
        assert_eq!(sheet.merge_covering(Position::new(0, 0)), None);
    }

    #[test]
    fn degenerate_merges_are_rejected() {
        let mut sheet = Sheet::new(SheetId(0), "Usage".to_string());
        assert!(matches!(
            sheet.add_merged_range(range("B2:B2")),
            Err(ModelError::InvalidMergeRange { .. })
        ));
        assert!(matches!(
            sheet.add_merged_range(range("C1:A1")),
            Err(ModelError::InvalidMergeRange { .. })
        ));
    }

    #[test]
    fn merges_cannot_hide_declared_cells() {
        let mut sheet = Sheet::new(SheetId(0), "Usage".to_string());
        sheet
            .registry_mut()
            .declare("Usage", Position::new(0, 0), CellDecl::header("Title"))
            .expect("anchor");
        sheet
            .registry_mut()
            .declare("Usage", Position::new(0, 2), CellDecl::text("note"))
            .expect("hidden cell");

        let err = sheet.add_merged_range(range("A1:F1")).unwrap_err();
        assert_eq!(
            err,
            ModelError::CoveredByMerge {
                sheet: "Usage".to_string(),
                position: Position::new(0, 2),
                range: "A1:F1".to_string(),
            }
        );
    }

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(quote_sheet_name("Usage"), "Usage");
        assert_eq!(quote_sheet_name("Unit Prices"), "'Unit Prices'");
        assert_eq!(quote_sheet_name("Bob's"), "'Bob''s'");
        assert_eq!(quote_sheet_name("2025"), "'2025'");
        assert_eq!(quote_sheet_name("Q1"), "'Q1'");
    }
}
