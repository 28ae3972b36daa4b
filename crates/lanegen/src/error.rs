use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumString, IntoStaticStr};

use crate::ast::CodeRange;

/// Result type alias for operations that can fail with a generator error.
pub type GenResult<T> = Result<T, GenError>;

/// Broad classification of a generator failure.
///
/// Uses strum derives so the kind name renders exactly as the variant
/// (e.g. `UnknownOp` -> "UnknownOp") in diagnostics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input source or bad directive syntax.
    ParseError,
    /// A referenced package alias has no built-in mapping.
    UnknownAlias,
    /// An import path is not in-repo and cannot be resolved.
    UnknownImport,
    /// An op used in a body has no op-table entry and no inline materializer.
    UnknownOp,
    /// A construct the selected target cannot realize.
    UnsupportedFeature,
    /// Conflicting or invalid generator configuration.
    InvalidConfiguration,
    /// Filesystem failure while reading sources or writing output units.
    Io,
}

/// A generator failure with enough context for a single-line diagnostic.
///
/// Every constructor captures the offending symbol, target, or function so
/// the `Display` output names it directly. Errors abort the current
/// `(function, target, element type)` triple; the pipeline continues with
/// the remaining triples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenError {
    pub kind: ErrorKind,
    message: String,
    /// Source position, when the failure is tied to a span of input.
    position: Option<CodeRange>,
    /// Function being transformed when the failure occurred.
    function: Option<String>,
    /// Target being generated when the failure occurred.
    target: Option<String>,
}

impl GenError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            position: None,
            function: None,
            target: None,
        }
    }

    /// Attaches the function name the pipeline was processing.
    #[must_use]
    pub fn in_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    /// Attaches the target the pipeline was generating for.
    #[must_use]
    pub fn for_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn syntax(message: impl Into<String>, position: CodeRange) -> Self {
        let mut e = Self::new(ErrorKind::ParseError, message);
        e.position = Some(position);
        e
    }

    pub fn directive(message: impl Into<String>, line: u32) -> Self {
        Self::syntax(message, CodeRange::line(line))
    }

    pub fn unknown_alias(alias: &str) -> Self {
        Self::new(ErrorKind::UnknownAlias, format!("unknown package alias `{alias}`"))
    }

    pub fn unknown_import(path: &str) -> Self {
        Self::new(
            ErrorKind::UnknownImport,
            format!("import `{path}` is not part of the module and has no built-in mapping"),
        )
    }

    pub fn unknown_op(op: &str, target: &str, function: &str) -> Self {
        Self::new(ErrorKind::UnknownOp, format!("op `{op}` has no entry for target `{target}`"))
            .in_function(function)
            .for_target(target)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedFeature, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfiguration, message)
    }

    pub fn io(context: &str, err: &std::io::Error) -> Self {
        Self::new(ErrorKind::Io, format!("{context}: {err}"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn position(&self) -> Option<CodeRange> {
        self.position
    }
}

impl Display for GenError {
    /// Renders a single-line diagnostic naming the offending function,
    /// target, or symbol, e.g.
    /// `UnknownOp: op `Permute` has no entry for target `neon` (function BaseShuffle, target neon)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(pos) = self.position {
            write!(f, " at line {}", pos.start_line)?;
        }
        match (&self.function, &self.target) {
            (Some(func), Some(target)) => write!(f, " (function {func}, target {target})"),
            (Some(func), None) => write!(f, " (function {func})"),
            (None, Some(target)) => write!(f, " (target {target})"),
            (None, None) => Ok(()),
        }
    }
}

impl std::error::Error for GenError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_op_diagnostic_names_function_and_target() {
        let err = GenError::unknown_op("Permute", "neon", "BaseShuffle");
        let line = err.to_string();
        assert!(line.starts_with("UnknownOp:"), "got: {line}");
        assert!(line.contains("BaseShuffle"), "got: {line}");
        assert!(line.contains("neon"), "got: {line}");
        assert!(!line.contains('\n'), "diagnostics must stay single-line");
    }

    #[test]
    fn syntax_error_reports_line() {
        let err = GenError::syntax("unexpected token", CodeRange::line(14));
        assert!(err.to_string().contains("line 14"));
    }
}
