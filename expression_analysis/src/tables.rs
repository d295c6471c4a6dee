//! Shared table helpers: CSV readers/writers and join guards

use std::path::{Path, PathBuf};

use polars::prelude::*;

use crate::error::{AnalysisError, Result};

pub fn read_csv(file_path: &Path) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(PathBuf::from(file_path)))?
        .finish()?;
    Ok(df)
}

pub fn write_csv(df: &DataFrame, file_path: &Path) -> Result<()> {
    if let Some(parent) = file_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(file_path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df.clone())?;
    Ok(())
}

/// Every cross-table merge in the pipeline is keyed, never positional.
/// A join that changes the row count means a silent id mismatch upstream,
/// so it is surfaced as a hard failure here.
pub fn assert_join_preserved(table: &str, expected: usize, df: &DataFrame) -> Result<()> {
    if df.height() != expected {
        return Err(AnalysisError::JoinRowMismatch {
            table: table.to_string(),
            expected,
            got: df.height(),
        });
    }
    Ok(())
}

/// Fetch a required column, reporting the owning table on failure.
pub fn require_column<'a>(df: &'a DataFrame, table: &str, column: &str) -> Result<&'a Column> {
    df.column(column).map_err(|_| AnalysisError::MissingColumn {
        table: table.to_string(),
        column: column.to_string(),
    })
}
