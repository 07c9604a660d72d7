//! Diagnostic accumulation.
//!
//! Passes never stop at the first problem: they record a [`Diagnostic`] and
//! continue with the next definition. The caller decides at the end whether
//! recorded errors abort document production ([`Messages::throw_with_any_error`]).

use std::collections::BTreeMap;

use thiserror::Error;

use crate::catalogs::render_message;
use crate::types::{Diagnostic, DiagnosticSeverity, Location};

/// Returned by the final checkpoint when errors were recorded.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("compilation failed with {} error(s): {}", .0.len(), summarize(.0))]
    Failed(Vec<Diagnostic>),
    #[error(transparent)]
    Internal(#[from] InternalError),
}

/// Invariant violations. These are not user-facing diagnostics: the model
/// handed to the compiler broke a contract of an earlier stage.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InternalError {
    #[error("backlink \"{path}\" of association \"{association}\" does not resolve to an association in \"{target}\"")]
    BacklinkNotAssociation {
        association: String,
        target: String,
        path: String,
    },
    #[error("entity set placement of \"{0}\" was decided twice")]
    DuplicatePlacement(String),
    #[error("constraint set of \"{0}\" was finalized twice")]
    DuplicateFinalization(String),
    #[error("definition \"{0}\" vanished during compilation")]
    MissingDefinition(String),
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Default)]
pub struct Messages {
    diagnostics: Vec<Diagnostic>,
}

impl Messages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, id: &str, location: Location, args: &[(&str, &str)]) {
        self.push(DiagnosticSeverity::Error, id, location, args);
    }

    pub fn warning(&mut self, id: &str, location: Location, args: &[(&str, &str)]) {
        self.push(DiagnosticSeverity::Warning, id, location, args);
    }

    pub fn info(&mut self, id: &str, location: Location, args: &[(&str, &str)]) {
        self.push(DiagnosticSeverity::Info, id, location, args);
    }

    pub fn message(&mut self, id: &str, location: Location, args: &[(&str, &str)]) {
        self.push(DiagnosticSeverity::Message, id, location, args);
    }

    fn push(
        &mut self,
        severity: DiagnosticSeverity,
        id: &str,
        location: Location,
        args: &[(&str, &str)],
    ) {
        let args: BTreeMap<String, String> = args
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let message = render_message(id, &args);
        self.diagnostics.push(Diagnostic {
            code: id.to_string(),
            severity,
            location,
            args,
            message,
        });
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.of_severity(DiagnosticSeverity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.of_severity(DiagnosticSeverity::Warning)
    }

    fn of_severity(&self, severity: DiagnosticSeverity) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(move |d| d.severity == severity)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// Number of diagnostics with the given id.
    pub fn count(&self, id: &str) -> usize {
        self.diagnostics.iter().filter(|d| d.code == id).count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.count(id) > 0
    }

    pub fn extend(&mut self, other: Messages) {
        self.diagnostics.extend(other.diagnostics);
    }

    /// Final checkpoint: fail if any error was recorded.
    pub fn throw_with_any_error(&self) -> Result<(), CompileError> {
        let errors: Vec<Diagnostic> = self.errors().cloned().collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CompileError::Failed(errors))
        }
    }
}
