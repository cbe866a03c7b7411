//! File-backed inputs: the JSON configuration and the ST program.
//!
//! A missing or broken program is not fatal: callers fall back to the default controller.

use std::path::Path;

use log::{info, warn};
use thiserror::Error;

use crate::plc::core::ast::{Program, VarClass};
use crate::plc::core::config::{ConfigError, PlcConfigV1};
use crate::plc::core::parser::{parse, ParseError};

#[derive(Debug, Error)]
pub enum ProgramLoadError {
    #[error("program file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("program file {path}: {source}")]
    Parse { path: String, source: ParseError },
}

/// `Ok(None)` when the file does not exist.
pub fn load_config(path: &Path) -> Result<Option<PlcConfigV1>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let text = std::fs::read_to_string(path)?;
    Ok(Some(PlcConfigV1::from_json_str(&text)?))
}

pub fn load_program(path: &Path) -> Result<Program, ProgramLoadError> {
    let source = std::fs::read_to_string(path).map_err(|source| ProgramLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let program = parse(&source).map_err(|source| ProgramLoadError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    info!(
        "[plc][program] loaded name={} path={} inputs={} outputs={} internal={} statements={}",
        program.name,
        path.display(),
        program.count_class(VarClass::Input),
        program.count_class(VarClass::Output),
        program.count_class(VarClass::Internal),
        program.statements.len()
    );
    Ok(program)
}

pub fn load_program_or_fallback(path: &Path) -> Option<Program> {
    match load_program(path) {
        Ok(program) => Some(program),
        Err(err) => {
            warn!("[plc][program] {err}; using default controller");
            None
        }
    }
}
