//! Reference resolution and cycle detection.
//!
//! References are symbolic until assembly. The resolver turns each one into a
//! [`ResolvedAddress`] exactly once; the dependency graph built from those
//! addresses is then checked for cycles before anything is emitted.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::vesla::rollup::error::{ModelError, ModelResult};
use crate::vesla::rollup::model::sheet::quote_sheet_name;
use crate::vesla::rollup::model::{CellHandle, Position, Sheet, SheetId};

/// Pointer from a formula to another cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// Same sheet as the formula that holds it.
    Local(Position),
    /// Qualified by sheet name; the sheet must be declared before the
    /// referencing one.
    Sheet { sheet: String, position: Position },
    /// A handle returned by the builder.
    Cell(CellHandle),
}

impl Reference {
    pub fn local(position: Position) -> Self {
        Reference::Local(position)
    }

    pub fn qualified(sheet: impl Into<String>, position: Position) -> Self {
        Reference::Sheet {
            sheet: sheet.into(),
            position,
        }
    }

    /// Parses `B5`, `Usage!B5`, `'Unit Prices'!$B$6`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let Some((prefix, cell)) = text.rsplit_once('!') else {
            return Position::from_a1(text).map(Reference::Local);
        };
        let position = Position::from_a1(cell)?;
        let sheet = if let Some(quoted) = prefix.strip_prefix('\'') {
            quoted.strip_suffix('\'')?.replace("''", "'")
        } else {
            prefix.to_string()
        };
        if sheet.is_empty() {
            return None;
        }
        Some(Reference::qualified(sheet, position))
    }
}

impl From<CellHandle> for Reference {
    fn from(handle: CellHandle) -> Self {
        Reference::Cell(handle)
    }
}

impl From<Position> for Reference {
    fn from(position: Position) -> Self {
        Reference::Local(position)
    }
}

/// Concrete sheet + position a reference points at. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedAddress {
    pub sheet: String,
    pub sheet_id: SheetId,
    pub position: Position,
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", quote_sheet_name(&self.sheet), self.position)
    }
}

/// Sheet-name lookups compare case-insensitively, as spreadsheets do.
pub(crate) fn sheet_key(name: &str) -> String {
    name.to_lowercase()
}

pub(crate) struct Resolver<'a> {
    sheets: &'a [Sheet],
    by_name: HashMap<String, SheetId>,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(sheets: &'a [Sheet]) -> Self {
        let by_name = sheets
            .iter()
            .map(|sheet| (sheet_key(sheet.name()), sheet.id()))
            .collect();
        Self { sheets, by_name }
    }

    /// Resolves `reference` as written in a formula on sheet `from`.
    pub(crate) fn resolve(&self, from: SheetId, reference: &Reference) -> ModelResult<ResolvedAddress> {
        let from_sheet = &self.sheets[from.index()];
        let (target, position) = match reference {
            Reference::Local(position) => (from, *position),
            Reference::Sheet { sheet, position } => {
                let id = self.by_name.get(&sheet_key(sheet)).copied().ok_or_else(|| {
                    ModelError::UnknownSheet {
                        sheet: sheet.clone(),
                        from_sheet: from_sheet.name().to_string(),
                    }
                })?;
                (id, *position)
            }
            Reference::Cell(handle) => {
                if handle.sheet.index() >= self.sheets.len() {
                    return Err(ModelError::UnknownSheet {
                        sheet: format!("#{}", handle.sheet.index()),
                        from_sheet: from_sheet.name().to_string(),
                    });
                }
                (handle.sheet, handle.position)
            }
        };

        let target_sheet = &self.sheets[target.index()];
        if target > from {
            return Err(ModelError::ForwardReference {
                from_sheet: from_sheet.name().to_string(),
                target_sheet: target_sheet.name().to_string(),
                position,
            });
        }
        if target_sheet.registry().slot_of(position).is_none() {
            return Err(ModelError::UnknownCell {
                sheet: target_sheet.name().to_string(),
                position,
            });
        }

        Ok(ResolvedAddress {
            sheet: target_sheet.name().to_string(),
            sheet_id: target,
            position,
        })
    }
}

/// Identity of a declared cell across the workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct CellKey {
    pub(crate) sheet: SheetId,
    pub(crate) slot: usize,
}

/// Directed graph with an edge `A → B` when A's formula references B.
#[derive(Debug, Default)]
pub(crate) struct DependencyGraph {
    formulas: Vec<CellKey>,
    edges: HashMap<CellKey, Vec<CellKey>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

impl DependencyGraph {
    /// Registers a formula cell and its precedents. Call in declaration order.
    pub(crate) fn add_formula(&mut self, cell: CellKey, precedents: Vec<CellKey>) {
        self.formulas.push(cell);
        self.edges.insert(cell, precedents);
    }

    /// Orders formula cells so that every precedent comes before its
    /// dependents, visiting roots in declaration order.
    ///
    /// On a cycle, returns the edge `(from, to)` that closes it.
    pub(crate) fn topo_order(&self) -> Result<Vec<CellKey>, (CellKey, CellKey)> {
        let mut marks: HashMap<CellKey, Mark> = HashMap::with_capacity(self.formulas.len());
        let mut order = Vec::with_capacity(self.formulas.len());

        for &root in &self.formulas {
            if marks.contains_key(&root) {
                continue;
            }
            marks.insert(root, Mark::InProgress);
            let mut stack: Vec<(CellKey, usize)> = vec![(root, 0)];

            while let Some(frame) = stack.last_mut() {
                let (cell, next_edge) = *frame;
                let precedents = self.edges.get(&cell).map(Vec::as_slice).unwrap_or(&[]);
                if next_edge < precedents.len() {
                    frame.1 += 1;
                    let target = precedents[next_edge];
                    if !self.edges.contains_key(&target) {
                        // Inputs and labels are leaves.
                        continue;
                    }
                    match marks.get(&target) {
                        Some(Mark::InProgress) => return Err((cell, target)),
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(target, Mark::InProgress);
                            stack.push((target, 0));
                        }
                    }
                } else {
                    marks.insert(cell, Mark::Done);
                    order.push(cell);
                    stack.pop();
                }
            }
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(slot: usize) -> CellKey {
        CellKey {
            sheet: SheetId(0),
            slot,
        }
    }

    #[test]
    fn parses_plain_and_qualified_references() {
        assert_eq!(
            Reference::parse("B5"),
            Some(Reference::Local(Position::new(4, 1)))
        );
        assert_eq!(
            Reference::parse("Usage!C3"),
            Some(Reference::qualified("Usage", Position::new(2, 2)))
        );
        assert_eq!(
            Reference::parse("'Unit Prices'!$B$6"),
            Some(Reference::qualified("Unit Prices", Position::new(5, 1)))
        );
        assert_eq!(
            Reference::parse("'Bob''s'!A1"),
            Some(Reference::qualified("Bob's", Position::new(0, 0)))
        );
        assert_eq!(Reference::parse("!A1"), None);
        assert_eq!(Reference::parse("Usage!"), None);
    }

    #[test]
    fn topo_order_puts_precedents_first() {
        let mut graph = DependencyGraph::default();
        graph.add_formula(key(2), vec![key(1), key(0)]);
        graph.add_formula(key(1), vec![key(0)]);

        let order = graph.topo_order().expect("acyclic");
        assert_eq!(order, vec![key(1), key(2)]);
    }

    #[test]
    fn reports_the_edge_closing_a_cycle() {
        let mut graph = DependencyGraph::default();
        graph.add_formula(key(0), vec![key(1)]);
        graph.add_formula(key(1), vec![key(0)]);
        assert_eq!(graph.topo_order(), Err((key(1), key(0))));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut graph = DependencyGraph::default();
        graph.add_formula(key(3), vec![key(3)]);
        assert_eq!(graph.topo_order(), Err((key(3), key(3))));
    }
}
