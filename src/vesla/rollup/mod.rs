pub mod assemble;
pub mod emitted;
pub mod error;
pub mod formula;
pub mod io;
pub mod model;
pub mod recalc;
pub mod render;
pub mod resolve;

pub use error::{ModelError, ModelResult, Result, ToolError};
