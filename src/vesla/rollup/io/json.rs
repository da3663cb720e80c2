use std::fs;
use std::path::Path;

use crate::vesla::rollup::emitted::EmittedModel;
use crate::vesla::rollup::error::Result;
use crate::vesla::rollup::io::write_atomically;

/// Writes the emitted model as pretty-printed JSON.
pub fn write_model(path: &Path, model: &EmittedModel) -> Result<()> {
    let json = serde_json::to_vec_pretty(model)?;
    write_atomically(path, &json)
}

/// Reads a model previously written by [`write_model`].
pub fn read_model(path: &Path) -> Result<EmittedModel> {
    let source = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&source)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vesla::rollup::assemble::WorkbookBuilder;
    use crate::vesla::rollup::formula::multiply;
    use crate::vesla::rollup::model::{CellDecl, Position};
    use tempfile::tempdir;

    #[test]
    fn cached_values_survive_a_json_round_trip() {
        let mut builder = WorkbookBuilder::new();
        builder.begin_sheet("Usage").expect("sheet");
        let rate = builder
            .declare(Position::new(0, 1), CellDecl::number("Compute rate", 0.106))
            .expect("rate");
        let hours = builder
            .declare(Position::new(1, 1), CellDecl::number("Hours", 420))
            .expect("hours");
        builder
            .declare(Position::new(2, 1), CellDecl::computed(multiply(hours, rate)))
            .expect("cost");
        let model = builder.assemble().expect("assembled");

        let dir = tempdir().expect("temporary directory");
        let path = dir.path().join("model.json");
        write_model(&path, &model).expect("model written");
        let reread = read_model(&path).expect("model read back");

        let cached = |model: &EmittedModel| {
            model
                .cell("Usage", Position::new(2, 1))
                .and_then(|cell| cell.content.number())
                .expect("cached value")
        };
        assert_eq!(cached(&reread).to_bits(), (420.0_f64 * 0.106).to_bits());
        assert_eq!(reread, model);
    }
}
