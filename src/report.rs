//! Structured extraction of script failures for host logging.
//!
//! The engine reports failures as rich error values; the host log wants one
//! line naming the script, the offending source line and its position. An
//! [`ErrorReport`] is built by draining the interpreter's pending-error slot
//! (consuming it, so each failure is reported exactly once) and decoding the
//! error reflectively: position and source fragment are extracted when the
//! error carries them and simply omitted when it does not, never failing the
//! extraction itself.

use rhai::EvalAltResult;
use serde::Serialize;
use std::path::PathBuf;

use crate::runtime::{Interpreter, PendingError};

/// A script failure decoded into loggable parts.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    /// Engine message with the trailing position suffix trimmed.
    pub message: String,
    /// Script file the error originated from, when known.
    pub source_file: Option<PathBuf>,
    /// 1-based line number of the failure, when the error carries one.
    pub line: Option<usize>,
    /// The offending source line, trimmed, when it could be recovered.
    pub source_line: Option<String>,
}

impl ErrorReport {
    /// Drain the interpreter's pending error into a report.
    ///
    /// Returns `None` when no error is pending. Draining clears the slot,
    /// so a report is produced at most once per failure.
    pub fn drain(interpreter: &mut Interpreter) -> Option<Self> {
        interpreter.take_pending().map(Self::from_pending)
    }

    /// Decode a pending error without going through the interpreter.
    pub fn from_pending(pending: PendingError) -> Self {
        let cause = innermost(&pending.error);
        let line = cause.position().line();
        let message = strip_position_suffix(&cause.to_string());
        let source_line = match (line, &pending.source) {
            (Some(line), Some(source)) => source
                .lines()
                .nth(line.saturating_sub(1))
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(ToString::to_string),
            _ => None,
        };

        Self {
            message,
            source_file: pending.source_file,
            line,
            source_line,
        }
    }

    /// Render the report as the log line format used by the plugin.
    ///
    /// With full position information:
    /// `Rhai error: <message> in <source line> at line <n> of supplied script '<script>'`;
    /// degrading to
    /// `Rhai error: <message> in supplied script '<script>'`
    /// when line or source text could not be recovered.
    pub fn render(&self, script: &str) -> String {
        match (self.line, self.source_line.as_deref()) {
            (Some(line), Some(fragment)) => format!(
                "Rhai error: {} in {} at line {} of supplied script '{}'",
                self.message, fragment, line, script
            ),
            _ => format!(
                "Rhai error: {} in supplied script '{}'",
                self.message, script
            ),
        }
    }
}

/// Walk through call-chain wrappers to the error that actually fired.
///
/// A failure inside a script function arrives wrapped in `ErrorInFunctionCall`,
/// whose own position is the call site (none at all when the host made the
/// call). The wrapped error carries the position of the failing statement.
fn innermost(error: &EvalAltResult) -> &EvalAltResult {
    match error {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _)
        | EvalAltResult::ErrorInModule(_, inner, _) => innermost(inner),
        other => other,
    }
}

/// Trim the ` (line X, position Y)` suffix the engine appends to positioned
/// errors; the report carries the position separately.
fn strip_position_suffix(text: &str) -> String {
    match text.rfind(" (line ") {
        Some(index) => text[..index].to_string(),
        None => text.to_string(),
    }
}
