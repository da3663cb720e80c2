//! Declarative JSON description of a workbook.
//!
//! A manifest is replayed through [`WorkbookBuilder`] in document order, so
//! every structural rule of the builder applies to it unchanged.
//!
//! ```json
//! { "sheets": [ { "name": "Usage", "column_widths": { "A": 30 },
//!     "cells": [
//!       { "at": "B1", "input": 0.106, "label": "Compute rate", "format": "rate3",
//!         "unit_price": true, "provenance": "neon.com pricing" },
//!       { "at": "B2", "input": 420, "label": "Hours", "format": "integer" },
//!       { "at": "B3", "formula": { "multiply": ["B2", "B1"] }, "style": "total" }
//! ] } ] }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::vesla::rollup::assemble::WorkbookBuilder;
use crate::vesla::rollup::emitted::EmittedModel;
use crate::vesla::rollup::error::{Result, ToolError};
use crate::vesla::rollup::formula::{Expr, Operand};
use crate::vesla::rollup::model::{
    CellDecl, Literal, MergedRange, NumberFormat, Position, StyleTag, column_from_letters,
};
use crate::vesla::rollup::resolve::Reference;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub sheets: Vec<SheetManifest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetManifest {
    pub name: String,
    /// Column letter → width.
    #[serde(default)]
    pub column_widths: BTreeMap<String, f64>,
    /// Ranges such as `"A1:F1"` shown as one cell.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged: Vec<String>,
    #[serde(default)]
    pub cells: Vec<CellManifest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellManifest {
    /// A1 address of the cell.
    pub at: String,
    #[serde(flatten)]
    pub content: ContentManifest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<NumberFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<StyleTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,
    #[serde(default)]
    pub unit_price: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentManifest {
    Input(InputValue),
    Formula(ExprManifest),
    Text(String),
    Section(String),
    Header(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprManifest {
    Multiply(OperandManifest, OperandManifest),
    Sum(Vec<OperandManifest>),
    Subtract(OperandManifest, OperandManifest),
    Divide(OperandManifest, OperandManifest),
    Scale(OperandManifest, f64),
    Link(String),
}

/// A number, an A1 reference (`"B2"`, `"'Unit Prices'!B6"`), or a nested
/// expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperandManifest {
    Number(f64),
    Address(String),
    Nested(Box<ExprManifest>),
}

impl Manifest {
    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)?;
        Self::from_json(&source)
    }

    /// Replays the manifest through a fresh builder.
    pub fn build(&self) -> Result<WorkbookBuilder> {
        let mut builder = WorkbookBuilder::new();
        for sheet in &self.sheets {
            builder.begin_sheet(sheet.name.as_str())?;
            for (letters, width) in &sheet.column_widths {
                let col = column_from_letters(letters).ok_or_else(|| {
                    ToolError::InvalidManifest(format!(
                        "sheet '{}': invalid column '{letters}'",
                        sheet.name
                    ))
                })?;
                builder.set_column_width(col, *width)?;
            }
            for text in &sheet.merged {
                let range = MergedRange::parse(text).ok_or_else(|| {
                    ToolError::InvalidManifest(format!(
                        "sheet '{}': invalid merged range '{text}'",
                        sheet.name
                    ))
                })?;
                builder.merge_range(range.first, range.last)?;
            }
            for cell in &sheet.cells {
                let position = Position::from_a1(&cell.at).ok_or_else(|| {
                    ToolError::InvalidManifest(format!(
                        "sheet '{}': invalid cell address '{}'",
                        sheet.name, cell.at
                    ))
                })?;
                let decl = cell.to_decl(&sheet.name)?;
                builder.declare(position, decl)?;
            }
        }
        Ok(builder)
    }

    pub fn assemble(&self) -> Result<EmittedModel> {
        Ok(self.build()?.assemble()?)
    }
}

impl CellManifest {
    fn to_decl(&self, sheet: &str) -> Result<CellDecl> {
        let label = self.label.clone().unwrap_or_default();
        let mut decl = match &self.content {
            ContentManifest::Input(InputValue::Number(value)) => {
                CellDecl::input(label, Literal::Number(*value))
            }
            ContentManifest::Input(InputValue::Text(value)) => {
                CellDecl::input(label, Literal::Text(value.clone()))
            }
            ContentManifest::Formula(expr) => {
                let mut decl = CellDecl::computed(expr.to_expr(sheet, &self.at)?);
                if let Some(label) = &self.label {
                    decl = decl.label(label.as_str());
                }
                decl
            }
            ContentManifest::Text(text) => CellDecl::text(text.as_str()),
            ContentManifest::Section(text) => CellDecl::section(text.as_str()),
            ContentManifest::Header(text) => CellDecl::header(text.as_str()),
        };

        if let Some(format) = self.format {
            decl = decl.format(format);
        }
        if let Some(style) = self.style {
            decl = decl.style(style);
        }
        if self.unit_price {
            decl = decl.unit_price(self.provenance.clone().unwrap_or_default());
        } else if let Some(provenance) = &self.provenance {
            decl = decl.provenance(provenance.as_str());
        }
        Ok(decl)
    }
}

impl ExprManifest {
    fn to_expr(&self, sheet: &str, at: &str) -> Result<Expr> {
        let operand = |op: &OperandManifest| op.to_operand(sheet, at);
        Ok(match self {
            ExprManifest::Multiply(a, b) => Expr::Multiply(operand(a)?, operand(b)?),
            ExprManifest::Sum(items) => Expr::Sum(
                items
                    .iter()
                    .map(operand)
                    .collect::<Result<Vec<_>>>()?,
            ),
            ExprManifest::Subtract(a, b) => Expr::Subtract(operand(a)?, operand(b)?),
            ExprManifest::Divide(a, b) => Expr::Divide(operand(a)?, operand(b)?),
            ExprManifest::Scale(a, factor) => Expr::Scale(operand(a)?, *factor),
            ExprManifest::Link(text) => Expr::Link(parse_reference(text, sheet, at)?),
        })
    }
}

impl OperandManifest {
    fn to_operand(&self, sheet: &str, at: &str) -> Result<Operand> {
        Ok(match self {
            OperandManifest::Number(value) => Operand::Const(*value),
            OperandManifest::Address(text) => Operand::Ref(parse_reference(text, sheet, at)?),
            OperandManifest::Nested(inner) => Operand::Nested(Box::new(inner.to_expr(sheet, at)?)),
        })
    }
}

fn parse_reference(text: &str, sheet: &str, at: &str) -> Result<Reference> {
    Reference::parse(text).ok_or_else(|| {
        ToolError::InvalidManifest(format!(
            "sheet '{sheet}', cell {at}: invalid reference '{text}'"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vesla::rollup::error::ModelError;

    const USAGE: &str = r#"{
        "sheets": [
            {
                "name": "Usage",
                "column_widths": { "A": 30, "B": 14 },
                "merged": ["A5:C5"],
                "cells": [
                    { "at": "A1", "text": "Compute (per CU-hour)" },
                    { "at": "B1", "input": 0.106, "label": "Compute rate", "format": "rate3",
                      "unit_price": true, "provenance": "neon.com pricing, Aug 2025" },
                    { "at": "B2", "input": 420, "label": "Hours", "format": "integer" },
                    { "at": "B3", "formula": { "multiply": ["B2", "B1"] }, "format": "money" },
                    { "at": "A5", "section": "Storage" },
                    { "at": "B6", "formula": { "divide": ["B3", { "sum": ["B3", 10] }] },
                      "format": "percentage1" }
                ]
            },
            {
                "name": "Totals",
                "cells": [
                    { "at": "B1", "formula": { "scale": [{ "sum": ["Usage!B3", 1.5] }, 12] },
                      "style": "total" }
                ]
            }
        ]
    }"#;

    #[test]
    fn manifest_replays_into_a_model() {
        let manifest = Manifest::from_json(USAGE).expect("manifest parsed");
        let model = manifest.assemble().expect("assembled");

        let cost = model.cell("Usage", Position::new(2, 1)).expect("cost");
        assert_eq!(cost.content.formula(), Some("=B2*B1"));
        assert!((cost.content.number().expect("value") - 44.52).abs() < 1e-9);
        assert_eq!(cost.number_format, NumberFormat::Money);

        let annual = model.cell("Totals", Position::new(0, 1)).expect("annual");
        assert_eq!(annual.content.formula(), Some("=SUM(Usage!B3,1.5)*12"));
        assert_eq!(annual.style, StyleTag::Total);

        let rate = model.cell("Usage", Position::new(0, 1)).expect("rate");
        assert_eq!(rate.provenance.as_deref(), Some("neon.com pricing, Aug 2025"));
        assert_eq!(model.sheets[0].column_widths.len(), 2);
        assert_eq!(
            model.sheets[0].merged_ranges,
            vec![MergedRange::parse("A5:C5").expect("range")]
        );

        let share = model.cell("Usage", Position::new(5, 1)).expect("share");
        assert_eq!(share.number_format, NumberFormat::Percentage1);
        assert_eq!(share.content.formula(), Some("=B3/SUM(B3,10)"));
    }

    #[test]
    fn unit_prices_without_sources_are_rejected() {
        let source = r#"{ "sheets": [ { "name": "Prices", "cells": [
            { "at": "B1", "input": 0.35, "label": "Storage", "unit_price": true }
        ] } ] }"#;
        let manifest = Manifest::from_json(source).expect("manifest parsed");
        let err = manifest.build().unwrap_err();
        assert!(matches!(
            err,
            ToolError::Model(ModelError::MissingProvenance { .. })
        ));
    }

    #[test]
    fn malformed_addresses_are_reported() {
        let source = r#"{ "sheets": [ { "name": "Usage", "cells": [
            { "at": "B1", "formula": { "link": "Usage!" } }
        ] } ] }"#;
        let manifest = Manifest::from_json(source).expect("manifest parsed");
        assert!(matches!(
            manifest.build().unwrap_err(),
            ToolError::InvalidManifest(_)
        ));

        let source = r#"{ "sheets": [ { "name": "Usage", "merged": ["A1-F1"] } ] }"#;
        let manifest = Manifest::from_json(source).expect("manifest parsed");
        assert!(matches!(
            manifest.build().unwrap_err(),
            ToolError::InvalidManifest(_)
        ));

        let source = r#"{ "sheets": [ { "name": "Usage", "cells": [
            { "at": "1B", "text": "oops" }
        ] } ] }"#;
        let manifest = Manifest::from_json(source).expect("manifest parsed");
        assert!(matches!(
            manifest.build().unwrap_err(),
            ToolError::InvalidManifest(_)
        ));
    }
}
