use std::path::PathBuf;

use thiserror::Error;

use crate::vesla::rollup::formula::Operator;
use crate::vesla::rollup::model::Position;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Alias for results of model construction and assembly.
pub type ModelResult<T> = std::result::Result<T, ModelError>;

/// Structural errors raised while a workbook is declared or assembled.
///
/// All of them indicate a mistake in the code (or manifest) that builds the
/// model, so none is retried. Each carries the sheet and position of the
/// offending declaration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// Raised when a position is declared twice on the same sheet.
    #[error("cell {position} on sheet '{sheet}' is already declared")]
    DuplicatePosition { sheet: String, position: Position },

    /// Raised when a sheet name is reused (names compare case-insensitively).
    #[error("sheet name '{0}' is already used in this workbook")]
    DuplicateSheetName(String),

    #[error("invalid sheet name '{name}': {reason}")]
    InvalidSheetName { name: String, reason: &'static str },

    #[error("row {row}, column {col} on sheet '{sheet}' is outside the worksheet grid")]
    PositionOutOfRange { sheet: String, row: u32, col: u16 },

    #[error("no sheet has been begun; call begin_sheet before declaring cells")]
    NoActiveSheet,

    /// Raised when a reference or lookup targets an undeclared position.
    #[error("no cell is declared at {position} on sheet '{sheet}'")]
    UnknownCell { sheet: String, position: Position },

    #[error("sheet '{sheet}' referenced from '{from_sheet}' does not exist")]
    UnknownSheet { sheet: String, from_sheet: String },

    /// Raised when a reference points at a sheet that is not finished yet.
    #[error(
        "sheet '{from_sheet}' cannot reference {position} on '{target_sheet}', which is declared after it"
    )]
    ForwardReference {
        from_sheet: String,
        target_sheet: String,
        position: Position,
    },

    /// Raised when the reference graph has a cycle; names the closing edge.
    #[error("circular formula: {from} references {to}, which closes a cycle")]
    CircularFormula { from: String, to: String },

    /// Raised when an operator reaches a text, label, or heading cell.
    #[error("{operator} in {sheet}!{position} is applied to non-numeric cell {operand}")]
    TypeMismatch {
        sheet: String,
        position: Position,
        operator: Operator,
        operand: String,
    },

    /// Raised when a divisor is statically known to be zero.
    #[error("division by zero in {sheet}!{position}: divisor {divisor} evaluates to 0")]
    DivisionByZero {
        sheet: String,
        position: Position,
        divisor: String,
    },

    #[error("sum in {sheet}!{position} has no operands")]
    EmptySum { sheet: String, position: Position },

    #[error("non-finite constant in {sheet}!{position}")]
    NonFiniteConstant { sheet: String, position: Position },

    /// Raised when a formula overflows or produces NaN from finite inputs.
    #[error("{sheet}!{position} evaluates to a non-finite number")]
    NonFiniteResult { sheet: String, position: Position },

    #[error("text in {sheet}!{position} is {length} characters long; a cell holds at most 32767")]
    TextTooLong {
        sheet: String,
        position: Position,
        length: usize,
    },

    #[error("column {col} on sheet '{sheet}' cannot be {width} wide")]
    InvalidColumnWidth { sheet: String, col: u16, width: f64 },

    #[error("cannot merge {range} on sheet '{sheet}': {reason}")]
    InvalidMergeRange {
        sheet: String,
        range: String,
        reason: &'static str,
    },

    #[error("merged range {range} on sheet '{sheet}' overlaps {existing}")]
    OverlappingMerge {
        sheet: String,
        range: String,
        existing: String,
    },

    /// Raised when a cell would be hidden under a merged range.
    #[error("cell {position} on sheet '{sheet}' lies inside merged range {range}")]
    CoveredByMerge {
        sheet: String,
        position: Position,
        range: String,
    },

    /// Raised when an input cell has no human-readable label.
    #[error("input {sheet}!{position} has no label")]
    MissingLabel { sheet: String, position: Position },

    /// Raised when a unit-price input has no source citation.
    #[error("unit price {sheet}!{position} has no provenance note")]
    MissingProvenance { sheet: String, position: Position },

    /// Raised when an override targets something other than a numeric input.
    #[error("{sheet}!{position} is not a numeric input cell")]
    NotAnInput { sheet: String, position: Position },

    /// Raised when an emitted formula string cannot be parsed back.
    #[error("cannot parse formula '{formula}': {message}")]
    FormulaSyntax { formula: String, message: String },
}

/// Error type covering the different failure cases that can occur when the
/// tool loads a manifest, assembles the model, or writes it out.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Structural model errors.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON parsing or serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors bubbled up from the Excel writer implementation.
    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    /// Raised when a manifest is well-formed JSON but not a valid workbook description.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Raised when the user provides a path that does not exist.
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}
