//! Inference engine seam.
//!
//! The server never computes a partition function itself. It hands the model
//! path to an [`InferenceEngine`] and reports whatever comes back.
//! [`CommandEngine`] is the production implementation: it runs an external
//! inference tool on the model file and extracts the value from its output.

use crate::error::EngineError;
use regex::Regex;
use std::path::Path;
use std::process::Command;
use tracing::trace;

/// Evaluates a model description to a single floating-point value.
///
/// Implementations may block for a long time; callers run them off the
/// async worker threads.
pub trait InferenceEngine: Send + Sync {
    fn evaluate(&self, model: &Path) -> Result<f64, EngineError>;
}

/// Runs `<program> <args...> <model path>` and parses the value out of stdout.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    pattern: Regex,
}

impl CommandEngine {
    /// `command` is the program followed by its leading arguments.
    /// `pattern` must contain a capture group around the value.
    pub fn new(command: &[String], pattern: Regex) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(CommandEngine {
            program: program.clone(),
            args: args.to_vec(),
            pattern,
        })
    }

    fn extract(&self, stdout: &str) -> Result<f64, EngineError> {
        let raw = self
            .pattern
            .captures(stdout)
            .and_then(|caps| caps.get(1))
            .ok_or(EngineError::NoValue)?
            .as_str()
            .trim();

        raw.parse::<f64>()
            .map_err(|_| EngineError::BadValue(raw.to_string()))
    }
}

impl InferenceEngine for CommandEngine {
    fn evaluate(&self, model: &Path) -> Result<f64, EngineError> {
        let metadata = std::fs::metadata(model).map_err(|e| EngineError::Io {
            path: model.to_path_buf(),
            source: e,
        })?;
        if !metadata.is_file() {
            return Err(EngineError::NotAFile(model.to_path_buf()));
        }

        trace!(program = %self.program, model = %model.display(), "Running inference tool");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(model)
            .output()
            .map_err(|e| EngineError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(EngineError::ToolFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        self.extract(&String::from_utf8_lossy(&output.stdout))
    }
}
