//! SEM2SIR: a strict lowering pass from the Stage-4 AST to SIR.
//!
//! The pipeline is two stages with no implicitness anywhere: a boundary
//! validator that rejects any document outside the closed Stage-4 schema,
//! and a lowerer that emits the `sir-v1.0` JSON-lines stream for accepted
//! documents. Every type is committed upstream; the lowerer performs no
//! inference, no coercions and no name resolution beyond the local,
//! parameter and proc scopes it builds itself.

#![warn(missing_docs)]
#![deny(unused_must_use)]

pub mod check;
pub mod emit;
pub mod json;

use std::fs;
use std::io::Write;
use std::path::Path;

pub use check::{check_text, CheckDiag, CheckedDoc};
pub use emit::{emit_checked, EmitError};

/// Pipeline failure: either a positioned boundary rejection or a lowering
/// error.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The Stage-4 boundary validator rejected the document.
    #[error("{0}")]
    Check(#[from] CheckDiag),
    /// The lowerer rejected the document.
    #[error("{0}")]
    Emit(#[from] EmitError),
    /// File I/O failed.
    #[error("{0}")]
    Io(String),
}

/// Validates and lowers a document, writing the SIR stream to `out`.
pub fn emit_text(text: &str, out: &mut dyn Write) -> Result<(), PipelineError> {
    let checked = check_text(text)?;
    emit_checked(&checked, out)?;
    Ok(())
}

/// Validates and lowers an input file into an output file. On any
/// failure the output file is removed; partial output is never left
/// behind.
pub fn emit_file(in_path: &Path, out_path: &Path) -> Result<(), PipelineError> {
    let text = fs::read_to_string(in_path)
        .map_err(|e| PipelineError::Io(format!("{}: failed to read file: {e}", in_path.display())))?;
    let mut out = fs::File::create(out_path).map_err(|e| {
        PipelineError::Io(format!(
            "{}: failed to open output: {e}",
            out_path.display()
        ))
    })?;
    let result = emit_text(&text, &mut out);
    drop(out);
    if result.is_err() {
        let _ = fs::remove_file(out_path);
    }
    result
}

/// Validates an input file without emitting anything.
pub fn check_file(in_path: &Path) -> Result<(), PipelineError> {
    let text = fs::read_to_string(in_path)
        .map_err(|e| PipelineError::Io(format!("{}: failed to read file: {e}", in_path.display())))?;
    check_text(&text)?;
    Ok(())
}
