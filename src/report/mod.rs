//! Reporting utilities: text summaries and JSON result files.
//!
//! Formatting lives here so the resampling and fitting code stays free of
//! presentation concerns.

pub mod format;

pub use format::*;

use std::fs::File;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;

/// Pretty JSON of any analysis result.
pub fn to_json<T: Serialize>(result: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(result)?)
}

/// Write any analysis result as pretty JSON.
pub fn write_json<T: Serialize>(path: &Path, result: &T) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, result)?;
    Ok(())
}
