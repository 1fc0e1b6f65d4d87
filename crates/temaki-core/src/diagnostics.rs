//! Diagnostic records emitted during import and export
//!
//! Every diagnostic carries the source span of the construct that caused it.
//! Diagnostics raised while a RuleSet expansion or mixin is being applied
//! additionally carry the span of the application site, so both the rule's
//! origin and the consuming entity show up in reports.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Severity levels for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Location of a construct in a shorthand source file (1-based)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub file: PathBuf,
    pub start_line: usize,
    pub start_col: usize,
    pub end_line: usize,
    pub end_col: usize,
}

impl SourceSpan {
    pub fn new(
        file: impl Into<PathBuf>,
        start_line: usize,
        start_col: usize,
        end_line: usize,
        end_col: usize,
    ) -> Self {
        Self {
            file: file.into(),
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// Span covering a whole line
    pub fn line(file: impl Into<PathBuf>, line: usize, len: usize) -> Self {
        Self::new(file, line, 1, line, len.max(1))
    }
}

impl Default for SourceSpan {
    fn default() -> Self {
        Self {
            file: PathBuf::new(),
            start_line: 1,
            start_col: 1,
            end_line: 1,
            end_col: 1,
        }
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.file.display(),
            self.start_line,
            self.start_col
        )
    }
}

/// A single diagnostic record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable code naming the condition (e.g. "ParentNotDefined")
    pub code: Option<String>,
    pub severity: Severity,
    pub message: String,
    /// Where the offending construct was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<SourceSpan>,
    /// Where the construct was applied, when it differs from where it was
    /// written (RuleSet inserts and mixins)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_span: Option<SourceSpan>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code: None,
            severity,
            message: message.into(),
            span: None,
            applied_span: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_applied_span(mut self, span: SourceSpan) -> Self {
        self.applied_span = Some(span);
        self
    }
}

/// Collector for diagnostics produced during one compilation
///
/// Records are kept in emission order and mirrored to the tracing stream.
#[derive(Debug, Default)]
pub struct Reporter {
    diagnostics: Vec<Diagnostic>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Info => info!("{}", diagnostic.message),
            Severity::Warning => warn!("{}", diagnostic.message),
            Severity::Error => error!("{}", diagnostic.message),
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.report(Diagnostic::new(Severity::Info, message));
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.report(Diagnostic::new(Severity::Warning, message));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.report(Diagnostic::new(Severity::Error, message));
    }

    pub fn warn_at(&mut self, code: &str, message: impl Into<String>, span: SourceSpan) {
        self.report(
            Diagnostic::new(Severity::Warning, message)
                .with_code(code)
                .with_span(span),
        );
    }

    pub fn error_at(&mut self, code: &str, message: impl Into<String>, span: SourceSpan) {
        self.report(
            Diagnostic::new(Severity::Error, message)
                .with_code(code)
                .with_span(span),
        );
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    /// True if any diagnostic with the given code has been reported
    pub fn has_code(&self, code: &str) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.code.as_deref() == Some(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporter_collects_in_order() {
        let mut reporter = Reporter::new();
        reporter.info("first");
        reporter.warn("second");
        reporter.error("third");

        assert_eq!(reporter.diagnostics().len(), 3);
        assert_eq!(reporter.error_count(), 1);
        assert_eq!(reporter.warning_count(), 1);
        assert_eq!(reporter.diagnostics()[0].message, "first");
    }

    #[test]
    fn test_diagnostic_spans() {
        let mut reporter = Reporter::new();
        let origin = SourceSpan::new("rules.fsh", 4, 1, 4, 20);
        let applied = SourceSpan::new("profile.fsh", 10, 1, 10, 18);
        reporter.report(
            Diagnostic::new(Severity::Error, "bad rule")
                .with_code("CannotResolvePath")
                .with_span(origin.clone())
                .with_applied_span(applied.clone()),
        );

        let d = &reporter.diagnostics()[0];
        assert_eq!(d.span.as_ref().unwrap(), &origin);
        assert_eq!(d.applied_span.as_ref().unwrap(), &applied);
        assert!(reporter.has_code("CannotResolvePath"));
    }
}
