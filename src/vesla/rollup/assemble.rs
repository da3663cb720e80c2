//! Workbook construction and assembly.
//!
//! A [`WorkbookBuilder`] moves through `Building → Assembling → Emitted |
//! Failed`. Declarations happen while building; the first declaration error
//! fails the builder for good and is reported again by every later call,
//! including [`WorkbookBuilder::assemble`]. Assembly consumes the builder, so an
//! emitted model can never be patched and a failed one can only be rebuilt.

use std::collections::HashMap;

use tracing::{debug, info, instrument, warn};

use crate::vesla::rollup::emitted::{
    ColumnWidth, EmittedCell, EmittedContent, EmittedModel, EmittedSheet,
};
use crate::vesla::rollup::error::{ModelError, ModelResult};
use crate::vesla::rollup::formula::{Expr, Operand, Operator, ResolvedExpr};
use crate::vesla::rollup::model::sheet::validate_sheet_name;
use crate::vesla::rollup::model::{
    CellContent, CellDecl, CellHandle, Literal, MAX_COLUMNS, MergedRange, Position, Sheet,
    SheetHandle, SheetId,
};
use crate::vesla::rollup::resolve::{
    CellKey, DependencyGraph, Reference, ResolvedAddress, Resolver, sheet_key,
};

/// Observable state of a builder.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildState {
    Building,
    Failed(ModelError),
}

/// Declares sheets and cells in dependency order.
///
/// ```
/// use vesla_rollup::assemble::WorkbookBuilder;
/// use vesla_rollup::formula::multiply;
/// use vesla_rollup::model::{CellDecl, NumberFormat, Position};
///
/// let mut builder = WorkbookBuilder::new();
/// builder.begin_sheet("Usage").unwrap();
/// let rate = builder
///     .declare(Position::new(0, 1), CellDecl::number("Rate", 0.106).unit_price("published tier"))
///     .unwrap();
/// let hours = builder
///     .declare(Position::new(1, 1), CellDecl::number("Hours", 420.0).format(NumberFormat::Integer))
///     .unwrap();
/// builder
///     .declare(Position::new(2, 1), CellDecl::computed(multiply(hours, rate)))
///     .unwrap();
///
/// let model = builder.assemble().unwrap();
/// let cost = model.cell("Usage", Position::new(2, 1)).unwrap();
/// assert_eq!(cost.content.formula(), Some("=B2*B1"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct WorkbookBuilder {
    sheets: Vec<Sheet>,
    failure: Option<ModelError>,
}

impl WorkbookBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BuildState {
        match &self.failure {
            Some(err) => BuildState::Failed(err.clone()),
            None => BuildState::Building,
        }
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    /// The sheet currently receiving declarations.
    pub fn active_sheet(&self) -> Option<&Sheet> {
        self.sheets.last()
    }

    /// Starts a new sheet and finishes the previous one.
    pub fn begin_sheet(&mut self, name: impl Into<String>) -> ModelResult<SheetHandle> {
        self.guard()?;
        let result = self.try_begin_sheet(name.into());
        self.record(result)
    }

    fn try_begin_sheet(&mut self, name: String) -> ModelResult<SheetHandle> {
        validate_sheet_name(&name)?;
        let key = sheet_key(&name);
        if self.sheets.iter().any(|sheet| sheet_key(sheet.name()) == key) {
            return Err(ModelError::DuplicateSheetName(name));
        }
        if let Some(previous) = self.sheets.last() {
            debug!(
                sheet = previous.name(),
                cells = previous.registry().len(),
                "sheet finished"
            );
        }
        let id = SheetId(self.sheets.len());
        self.sheets.push(Sheet::new(id, name.clone()));
        Ok(SheetHandle { id, name })
    }

    /// Declares a cell on the active sheet.
    pub fn declare(&mut self, position: Position, decl: CellDecl) -> ModelResult<CellHandle> {
        self.guard()?;
        let result = self.try_declare(position, decl);
        self.record(result)
    }

    fn try_declare(&mut self, position: Position, decl: CellDecl) -> ModelResult<CellHandle> {
        let sheet = self.sheets.last_mut().ok_or(ModelError::NoActiveSheet)?;
        let name = sheet.name().to_string();
        if let Some(range) = sheet.merge_covering(position) {
            return Err(ModelError::CoveredByMerge {
                sheet: name,
                position,
                range: range.to_string(),
            });
        }
        sheet.registry_mut().declare(&name, position, decl)?;
        Ok(CellHandle {
            sheet: sheet.id(),
            position,
        })
    }

    /// Looks up a cell already declared on the active sheet.
    pub fn handle_of(&self, position: Position) -> ModelResult<CellHandle> {
        self.guard()?;
        let sheet = self.active_sheet().ok_or(ModelError::NoActiveSheet)?;
        sheet
            .registry()
            .slot_of(position)
            .map(|_| CellHandle {
                sheet: sheet.id(),
                position,
            })
            .ok_or_else(|| ModelError::UnknownCell {
                sheet: sheet.name().to_string(),
                position,
            })
    }

    /// Produces a qualified reference to `position` on `sheet` for use by
    /// sheets declared later.
    pub fn export_reference(&mut self, sheet: &str, position: Position) -> ModelResult<Reference> {
        self.guard()?;
        let result = self.try_export_reference(sheet, position);
        self.record(result)
    }

    fn try_export_reference(&self, sheet: &str, position: Position) -> ModelResult<Reference> {
        let key = sheet_key(sheet);
        let Some(target) = self.sheets.iter().find(|s| sheet_key(s.name()) == key) else {
            return Err(ModelError::ForwardReference {
                from_sheet: self
                    .active_sheet()
                    .map(|s| s.name().to_string())
                    .unwrap_or_default(),
                target_sheet: sheet.to_string(),
                position,
            });
        };
        let finished = target.id().index() + 1 < self.sheets.len();
        if finished && target.registry().slot_of(position).is_none() {
            return Err(ModelError::UnknownCell {
                sheet: target.name().to_string(),
                position,
            });
        }
        Ok(Reference::qualified(target.name(), position))
    }

    /// Sets the display width of a column on the active sheet.
    pub fn set_column_width(&mut self, col: u16, width: f64) -> ModelResult<()> {
        self.guard()?;
        let result = self.try_set_column_width(col, width);
        self.record(result)
    }

    fn try_set_column_width(&mut self, col: u16, width: f64) -> ModelResult<()> {
        let sheet = self.sheets.last_mut().ok_or(ModelError::NoActiveSheet)?;
        if col >= MAX_COLUMNS {
            return Err(ModelError::PositionOutOfRange {
                sheet: sheet.name().to_string(),
                row: 0,
                col,
            });
        }
        if !width.is_finite() || width < 0.0 {
            return Err(ModelError::InvalidColumnWidth {
                sheet: sheet.name().to_string(),
                col,
                width,
            });
        }
        sheet.set_column_width(col, width);
        Ok(())
    }

    /// Merges `first..=last` on the active sheet into one displayed cell.
    ///
    /// Only `first` may hold a declaration; its format covers the whole range.
    pub fn merge_range(&mut self, first: Position, last: Position) -> ModelResult<()> {
        self.guard()?;
        let result = self
            .sheets
            .last_mut()
            .ok_or(ModelError::NoActiveSheet)
            .and_then(|sheet| sheet.add_merged_range(MergedRange::new(first, last)));
        self.record(result)
    }

    fn guard(&self) -> ModelResult<()> {
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn record<T>(&mut self, result: ModelResult<T>) -> ModelResult<T> {
        if let Err(err) = &result {
            warn!(error = %err, "workbook declaration failed");
            self.failure = Some(err.clone());
        }
        result
    }

    /// Resolves every reference, checks for cycles, evaluates each formula in
    /// dependency order and emits the model. All or nothing.
    #[instrument(level = "debug", skip_all, fields(sheets = self.sheets.len()))]
    pub fn assemble(self) -> ModelResult<EmittedModel> {
        if let Some(err) = self.failure {
            return Err(err);
        }

        let resolver = Resolver::new(&self.sheets);
        let mut resolved: HashMap<CellKey, ResolvedExpr> = HashMap::new();
        let mut graph = DependencyGraph::default();

        for sheet in &self.sheets {
            for (slot, cell) in sheet.registry().cells().iter().enumerate() {
                let CellContent::Computed(expr) = &cell.decl.content else {
                    continue;
                };
                let key = CellKey {
                    sheet: sheet.id(),
                    slot,
                };
                let expr = expr.try_map(&mut |reference| resolver.resolve(sheet.id(), reference))?;
                let precedents = expr
                    .references()
                    .into_iter()
                    .map(|address| self.key_of(address))
                    .collect::<ModelResult<Vec<_>>>()?;
                graph.add_formula(key, precedents);
                resolved.insert(key, expr);
            }
        }
        debug!(formulas = resolved.len(), "references resolved");

        let order = graph.topo_order().map_err(|(from, to)| ModelError::CircularFormula {
            from: self.describe(from),
            to: self.describe(to),
        })?;

        let mut values: HashMap<CellKey, f64> = HashMap::with_capacity(order.len());
        for key in order {
            let Some(expr) = resolved.get(&key) else {
                continue;
            };
            let sheet = &self.sheets[key.sheet.index()];
            let position = self.position_of(key);
            let evaluator = Evaluator {
                builder: &self,
                values: &values,
                home: sheet,
                position,
            };
            let value = evaluator.eval(expr)?;
            if !value.is_finite() {
                return Err(ModelError::NonFiniteResult {
                    sheet: sheet.name().to_string(),
                    position,
                });
            }
            values.insert(key, value);
        }

        let model = self.emit(&resolved, &values)?;
        info!(
            sheets = model.sheets.len(),
            cells = model.cell_count(),
            formulas = model.formula_count(),
            "workbook assembled"
        );
        Ok(model)
    }

    fn emit(
        &self,
        resolved: &HashMap<CellKey, ResolvedExpr>,
        values: &HashMap<CellKey, f64>,
    ) -> ModelResult<EmittedModel> {
        let mut sheets = Vec::with_capacity(self.sheets.len());
        for sheet in &self.sheets {
            let mut cells = Vec::with_capacity(sheet.registry().len());
            for (slot, cell) in sheet.registry().cells().iter().enumerate() {
                let key = CellKey {
                    sheet: sheet.id(),
                    slot,
                };
                let decl = &cell.decl;
                let content = match &decl.content {
                    CellContent::Input(Literal::Number(value)) => {
                        EmittedContent::Number { value: *value }
                    }
                    CellContent::Input(Literal::Text(text))
                    | CellContent::Label(text)
                    | CellContent::Section(text)
                    | CellContent::Header(text) => EmittedContent::Text {
                        value: text.clone(),
                    },
                    CellContent::Computed(_) => {
                        let (Some(expr), Some(value)) = (resolved.get(&key), values.get(&key)) else {
                            return Err(ModelError::UnknownCell {
                                sheet: sheet.name().to_string(),
                                position: cell.position,
                            });
                        };
                        EmittedContent::Formula {
                            formula: expr.to_formula(sheet.id()),
                            value: *value,
                        }
                    }
                };
                cells.push(EmittedCell {
                    position: cell.position,
                    address: cell.position.to_a1(),
                    kind: decl.kind(),
                    content,
                    number_format: decl.format,
                    style: decl.style,
                    label: decl.label.clone(),
                    provenance: decl.provenance.clone(),
                });
            }
            sheets.push(EmittedSheet {
                name: sheet.name().to_string(),
                column_widths: sheet
                    .column_widths()
                    .iter()
                    .map(|(&column, &width)| ColumnWidth { column, width })
                    .collect(),
                merged_ranges: sheet.merged_ranges().to_vec(),
                cells,
            });
        }
        Ok(EmittedModel { sheets })
    }

    fn key_of(&self, address: &ResolvedAddress) -> ModelResult<CellKey> {
        let sheet = &self.sheets[address.sheet_id.index()];
        sheet
            .registry()
            .slot_of(address.position)
            .map(|slot| CellKey {
                sheet: address.sheet_id,
                slot,
            })
            .ok_or_else(|| ModelError::UnknownCell {
                sheet: sheet.name().to_string(),
                position: address.position,
            })
    }

    fn cell_content(&self, key: CellKey) -> Option<&CellContent> {
        self.sheets[key.sheet.index()]
            .registry()
            .get(key.slot)
            .map(|cell| &cell.decl.content)
    }

    fn position_of(&self, key: CellKey) -> Position {
        self.sheets[key.sheet.index()]
            .registry()
            .get(key.slot)
            .map(|cell| cell.position)
            .unwrap_or_default()
    }

    fn describe(&self, key: CellKey) -> String {
        let sheet = &self.sheets[key.sheet.index()];
        ResolvedAddress {
            sheet: sheet.name().to_string(),
            sheet_id: sheet.id(),
            position: self.position_of(key),
        }
        .to_string()
    }
}

/// Statically evaluates one formula cell given the values of its precedents.
struct Evaluator<'a> {
    builder: &'a WorkbookBuilder,
    values: &'a HashMap<CellKey, f64>,
    home: &'a Sheet,
    position: Position,
}

impl Evaluator<'_> {
    fn eval(&self, expr: &ResolvedExpr) -> ModelResult<f64> {
        let operator = expr.operator();
        match expr {
            Expr::Multiply(a, b) => Ok(self.operand(a, operator)? * self.operand(b, operator)?),
            Expr::Sum(items) => {
                let mut total = 0.0;
                for item in items {
                    total += self.operand(item, operator)?;
                }
                Ok(total)
            }
            Expr::Subtract(a, b) => Ok(self.operand(a, operator)? - self.operand(b, operator)?),
            Expr::Divide(a, b) => {
                let numerator = self.operand(a, operator)?;
                let divisor = self.operand(b, operator)?;
                if divisor == 0.0 {
                    return Err(ModelError::DivisionByZero {
                        sheet: self.home.name().to_string(),
                        position: self.position,
                        divisor: self.describe_operand(b),
                    });
                }
                Ok(numerator / divisor)
            }
            Expr::Scale(a, factor) => Ok(self.operand(a, operator)? * factor),
            Expr::Link(address) => self.cell_number(address, operator),
        }
    }

    fn operand(&self, operand: &Operand<ResolvedAddress>, operator: Operator) -> ModelResult<f64> {
        match operand {
            Operand::Ref(address) => self.cell_number(address, operator),
            Operand::Const(value) => Ok(*value),
            Operand::Nested(inner) => self.eval(inner),
        }
    }

    fn cell_number(&self, address: &ResolvedAddress, operator: Operator) -> ModelResult<f64> {
        let key = self.builder.key_of(address)?;
        let mismatch = || ModelError::TypeMismatch {
            sheet: self.home.name().to_string(),
            position: self.position,
            operator,
            operand: address.to_string(),
        };
        match self.builder.cell_content(key) {
            Some(CellContent::Input(Literal::Number(value))) => Ok(*value),
            Some(CellContent::Computed(_)) => self.values.get(&key).copied().ok_or_else(mismatch),
            _ => Err(mismatch()),
        }
    }

    fn describe_operand(&self, operand: &Operand<ResolvedAddress>) -> String {
        match operand {
            Operand::Ref(address) => address.to_string(),
            Operand::Const(value) => value.to_string(),
            Operand::Nested(inner) => inner
                .to_formula(self.home.id())
                .trim_start_matches('=')
                .to_string(),
        }
    }
}
