//! JSON transport for graphs and options.
//!
//! Graph files hold the serde form of [`CircuitGraph`]. Writes go through a
//! temporary file in the destination directory that is renamed into place,
//! so a failed write never leaves a truncated graph behind.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use elastic_core::CircuitGraph;

use crate::error::PipelineError;
use crate::options::PipelineOptions;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PipelineError + '_ {
    move |source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn load_graph(path: &Path) -> Result<CircuitGraph, PipelineError> {
    let text = fs::read_to_string(path).map_err(io_error(path))?;
    serde_json::from_str(&text).map_err(|e| PipelineError::GraphFormat {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

pub fn save_graph(graph: &CircuitGraph, path: &Path) -> Result<(), PipelineError> {
    let json = serde_json::to_vec_pretty(graph).map_err(|e| PipelineError::GraphFormat {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir).map_err(io_error(path))?;
    file.write_all(&json).map_err(io_error(path))?;
    file.persist(path).map_err(|e| PipelineError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

pub fn load_options(path: &Path) -> Result<PipelineOptions, PipelineError> {
    let text = fs::read_to_string(path).map_err(io_error(path))?;
    serde_json::from_str(&text).map_err(|e| PipelineError::OptionsFormat {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Reads a whole file as text, for position lists and buffer requests.
pub fn read_text(path: &Path) -> Result<String, PipelineError> {
    fs::read_to_string(path).map_err(io_error(path))
}
