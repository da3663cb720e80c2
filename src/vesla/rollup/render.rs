use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::vesla::rollup::emitted::EmittedModel;
use crate::vesla::rollup::error::Result;
use crate::vesla::rollup::io::manifest::Manifest;
use crate::vesla::rollup::io::{excel_write, json};

/// Output representation produced by [`render_manifest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderFormat {
    #[default]
    Xlsx,
    Json,
}

impl fmt::Display for RenderFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderFormat::Xlsx => write!(f, "xlsx"),
            RenderFormat::Json => write!(f, "json"),
        }
    }
}

/// Loads a manifest, assembles it, and writes the result.
#[instrument(
    level = "info",
    skip_all,
    fields(input = %input.display(), output = %output.display(), %format)
)]
pub fn render_manifest(input: &Path, output: &Path, format: RenderFormat) -> Result<EmittedModel> {
    let manifest = Manifest::load(input)?;
    info!(sheet_count = manifest.sheets.len(), "loaded manifest");
    let model = manifest.assemble()?;
    render_model(&model, output, format)?;
    Ok(model)
}

/// Writes an already assembled model.
#[instrument(level = "debug", skip(model), fields(output = %output.display()))]
pub fn render_model(model: &EmittedModel, output: &Path, format: RenderFormat) -> Result<()> {
    match format {
        RenderFormat::Xlsx => excel_write::write_workbook(output, model)?,
        RenderFormat::Json => json::write_model(output, model)?,
    }
    info!(
        sheet_count = model.sheets.len(),
        cell_count = model.cell_count(),
        formula_count = model.formula_count(),
        "model written"
    );
    Ok(())
}

/// Assembles a manifest without writing anything, surfacing the first
/// structural error.
#[instrument(level = "info", skip_all, fields(input = %input.display()))]
pub fn check_manifest(input: &Path) -> Result<EmittedModel> {
    let manifest = Manifest::load(input)?;
    debug!(sheet_count = manifest.sheets.len(), "loaded manifest");
    let model = manifest.assemble()?;
    info!(
        sheet_count = model.sheets.len(),
        cell_count = model.cell_count(),
        formula_count = model.formula_count(),
        "manifest is consistent"
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vesla::rollup::error::{ModelError, ToolError};
    use tempfile::tempdir;

    const CYCLE: &str = r#"{ "sheets": [ { "name": "Loop", "cells": [
        { "at": "A1", "formula": { "multiply": ["A2", 2] } },
        { "at": "A2", "formula": { "sum": ["A1"] } }
    ] } ] }"#;

    #[test]
    fn check_reports_cycles_without_writing() {
        let dir = tempdir().expect("temporary directory");
        let input = dir.path().join("loop.json");
        std::fs::write(&input, CYCLE).expect("manifest written");

        let err = check_manifest(&input).unwrap_err();
        assert!(matches!(
            err,
            ToolError::Model(ModelError::CircularFormula { .. })
        ));
        assert_eq!(std::fs::read_dir(dir.path()).expect("listing").count(), 1);
    }

    #[test]
    fn failed_render_leaves_no_output() {
        let dir = tempdir().expect("temporary directory");
        let input = dir.path().join("loop.json");
        let output = dir.path().join("loop.xlsx");
        std::fs::write(&input, CYCLE).expect("manifest written");

        assert!(render_manifest(&input, &output, RenderFormat::Xlsx).is_err());
        assert!(!output.exists());
    }

    #[test]
    fn json_render_round_trips() {
        let dir = tempdir().expect("temporary directory");
        let input = dir.path().join("usage.json");
        let output = dir.path().join("model.json");
        std::fs::write(
            &input,
            r#"{ "sheets": [ { "name": "Usage", "cells": [
                { "at": "B1", "input": 2, "label": "Seats" },
                { "at": "B2", "formula": { "scale": ["B1", 10] } }
            ] } ] }"#,
        )
        .expect("manifest written");

        let model = render_manifest(&input, &output, RenderFormat::Json).expect("rendered");
        let reread = json::read_model(&output).expect("model read back");
        assert_eq!(reread, model);
    }
}
