use std::collections::HashMap;

use crate::vesla::rollup::error::ModelError;
use crate::vesla::rollup::formula::{Expr, Operand};
use crate::vesla::rollup::model::{
    Cell, CellContent, CellDecl, Literal, MAX_TEXT_LEN, Position,
};

/// Append-only store of the cells declared on one sheet.
///
/// Cells keep their declaration order; the position index only guards
/// against collisions and answers lookups.
#[derive(Debug, Clone, Default)]
pub struct CellRegistry {
    cells: Vec<Cell>,
    index: HashMap<Position, usize>,
}

impl CellRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and appends a declaration, returning its slot.
    pub fn declare(
        &mut self,
        sheet: &str,
        position: Position,
        decl: CellDecl,
    ) -> Result<usize, ModelError> {
        if !position.in_grid() {
            return Err(ModelError::PositionOutOfRange {
                sheet: sheet.to_string(),
                row: position.row,
                col: position.col,
            });
        }
        if self.index.contains_key(&position) {
            return Err(ModelError::DuplicatePosition {
                sheet: sheet.to_string(),
                position,
            });
        }
        validate_decl(sheet, position, &decl)?;

        let slot = self.cells.len();
        self.cells.push(Cell { position, decl });
        self.index.insert(position, slot);
        Ok(slot)
    }

    pub fn slot_of(&self, position: Position) -> Option<usize> {
        self.index.get(&position).copied()
    }

    pub fn get(&self, slot: usize) -> Option<&Cell> {
        self.cells.get(slot)
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

fn validate_decl(sheet: &str, position: Position, decl: &CellDecl) -> Result<(), ModelError> {
    let body = match &decl.content {
        CellContent::Input(Literal::Text(text))
        | CellContent::Label(text)
        | CellContent::Section(text)
        | CellContent::Header(text) => Some(text.as_str()),
        CellContent::Input(Literal::Number(_)) | CellContent::Computed(_) => None,
    };
    for text in [body, decl.label.as_deref(), decl.provenance.as_deref()]
        .into_iter()
        .flatten()
    {
        let length = text.chars().count();
        if length > MAX_TEXT_LEN {
            return Err(ModelError::TextTooLong {
                sheet: sheet.to_string(),
                position,
                length,
            });
        }
    }

    match &decl.content {
        CellContent::Input(literal) => {
            let labelled = decl
                .label
                .as_deref()
                .is_some_and(|label| !label.trim().is_empty());
            if !labelled {
                return Err(ModelError::MissingLabel {
                    sheet: sheet.to_string(),
                    position,
                });
            }
            if decl.unit_price
                && !decl
                    .provenance
                    .as_deref()
                    .is_some_and(|note| !note.trim().is_empty())
            {
                return Err(ModelError::MissingProvenance {
                    sheet: sheet.to_string(),
                    position,
                });
            }
            if let Literal::Number(value) = literal {
                if !value.is_finite() {
                    return Err(ModelError::NonFiniteConstant {
                        sheet: sheet.to_string(),
                        position,
                    });
                }
            }
            Ok(())
        }
        CellContent::Computed(expr) => validate_expr(sheet, position, expr),
        CellContent::Label(_) | CellContent::Section(_) | CellContent::Header(_) => Ok(()),
    }
}

fn validate_expr(sheet: &str, position: Position, expr: &Expr) -> Result<(), ModelError> {
    if let Expr::Sum(operands) = expr {
        if operands.is_empty() {
            return Err(ModelError::EmptySum {
                sheet: sheet.to_string(),
                position,
            });
        }
    }
    if let Expr::Scale(_, factor) = expr {
        if !factor.is_finite() {
            return Err(ModelError::NonFiniteConstant {
                sheet: sheet.to_string(),
                position,
            });
        }
    }
    for operand in expr.operands() {
        match operand {
            Operand::Const(value) if !value.is_finite() => {
                return Err(ModelError::NonFiniteConstant {
                    sheet: sheet.to_string(),
                    position,
                });
            }
            Operand::Nested(inner) => validate_expr(sheet, position, inner)?,
            _ => {}
        }
    }
    Ok(())
}

/// Hands out successive rows while a sheet is laid out top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowCursor {
    next: u32,
}

impl RowCursor {
    pub fn starting_at(row: u32) -> Self {
        Self { next: row }
    }

    /// Returns the current row and advances past it.
    pub fn next_row(&mut self) -> u32 {
        let row = self.next;
        self.next += 1;
        row
    }

    /// Leaves `rows` blank rows.
    pub fn skip(&mut self, rows: u32) {
        self.next += rows;
    }

    pub fn peek(&self) -> u32 {
        self.next
    }

    pub fn at(&mut self, col: u16) -> Position {
        Position::new(self.next_row(), col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vesla::rollup::formula::sum;
    use crate::vesla::rollup::model::{MAX_COLUMNS, MAX_ROWS};

    #[test]
    fn rejects_duplicate_positions() {
        let mut registry = CellRegistry::new();
        let position = Position::new(3, 1);
        registry
            .declare("Usage", position, CellDecl::number("Hours", 420.0))
            .expect("first declaration");

        let err = registry
            .declare("Usage", position, CellDecl::text("again"))
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::DuplicatePosition {
                sheet: "Usage".to_string(),
                position
            }
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn inputs_need_labels_and_unit_prices_need_sources() {
        let mut registry = CellRegistry::new();
        let err = registry
            .declare("Usage", Position::new(0, 0), CellDecl::number("  ", 1.0))
            .unwrap_err();
        assert!(matches!(err, ModelError::MissingLabel { .. }));

        let err = registry
            .declare(
                "Usage",
                Position::new(1, 0),
                CellDecl::number("Rate", 0.106).unit_price(""),
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::MissingProvenance { .. }));
    }

    #[test]
    fn rejects_empty_sums_and_non_finite_constants() {
        let mut registry = CellRegistry::new();
        let err = registry
            .declare(
                "Totals",
                Position::new(0, 0),
                CellDecl::computed(sum(Vec::<Operand>::new())),
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::EmptySum { .. }));

        let err = registry
            .declare("Totals", Position::new(1, 0), CellDecl::number("Bad", f64::NAN))
            .unwrap_err();
        assert!(matches!(err, ModelError::NonFiniteConstant { .. }));
    }

    #[test]
    fn rejects_text_longer_than_a_cell_holds() {
        let mut registry = CellRegistry::new();
        let position = Position::new(0, 0);
        let err = registry
            .declare("Notes", position, CellDecl::text("x".repeat(40_000)))
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::TextTooLong {
                sheet: "Notes".to_string(),
                position,
                length: 40_000,
            }
        );

        let err = registry
            .declare(
                "Notes",
                position,
                CellDecl::number("Rate", 0.106).unit_price("s".repeat(MAX_TEXT_LEN + 1)),
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::TextTooLong { .. }));

        registry
            .declare("Notes", position, CellDecl::section("y".repeat(MAX_TEXT_LEN)))
            .expect("text at the limit");
    }

    #[test]
    fn rejects_positions_outside_the_grid() {
        let mut registry = CellRegistry::new();
        let err = registry
            .declare(
                "Usage",
                Position::new(MAX_ROWS, 0),
                CellDecl::number("Hours", 1.0),
            )
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::PositionOutOfRange {
                sheet: "Usage".to_string(),
                row: MAX_ROWS,
                col: 0,
            }
        );

        let err = registry
            .declare("Usage", Position::new(0, MAX_COLUMNS), CellDecl::text("wide"))
            .unwrap_err();
        assert!(matches!(err, ModelError::PositionOutOfRange { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn row_cursor_advances() {
        let mut cursor = RowCursor::starting_at(3);
        assert_eq!(cursor.next_row(), 3);
        cursor.skip(1);
        assert_eq!(cursor.at(2), Position::new(5, 2));
        assert_eq!(cursor.peek(), 6);
    }
}
