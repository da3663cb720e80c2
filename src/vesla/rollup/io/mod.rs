use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::vesla::rollup::error::{Result, ToolError};

pub mod excel_write;
pub mod json;
pub mod manifest;

/// Writes `bytes` to `path` through a temporary file in the same directory.
///
/// The target only appears once the data is fully written; on any error the
/// temporary file is dropped (and deleted) and `path` is left untouched.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(directory)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged
        .persist(path)
        .map_err(|err| ToolError::Io(err.error))?;
    Ok(())
}
