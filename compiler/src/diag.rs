// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all compiler phases.
// Every error the compiler can produce carries a source span and a stable
// code; codes are grouped by the phase that raises them.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::lexer::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0301`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable diagnostic codes, grouped by compiler phase.
///
/// E01xx lexer, E02xx parser, E03xx symbol resolution, E04xx type system,
/// E05xx inliner framework, E06xx code generation.
pub mod codes {
    use super::DiagCode;

    pub const E0100: DiagCode = DiagCode("E0100"); // illegal character
    pub const E0101: DiagCode = DiagCode("E0101"); // malformed literal

    pub const E0200: DiagCode = DiagCode("E0200"); // syntax error

    pub const E0300: DiagCode = DiagCode("E0300"); // unresolved symbol
    pub const E0301: DiagCode = DiagCode("E0301"); // circular template instantiation
    pub const E0302: DiagCode = DiagCode("E0302"); // ambiguous overload
    pub const E0303: DiagCode = DiagCode("E0303"); // template parameter mismatch

    pub const E0400: DiagCode = DiagCode("E0400"); // type mismatch
    pub const E0401: DiagCode = DiagCode("E0401"); // argument not convertible
    pub const E0402: DiagCode = DiagCode("E0402"); // constant expression required

    pub const E0500: DiagCode = DiagCode("E0500"); // required property missing
    pub const E0501: DiagCode = DiagCode("E0501"); // inliner failure

    pub const E0600: DiagCode = DiagCode("E0600"); // unresolved function at codegen
    pub const E0601: DiagCode = DiagCode("E0601"); // register verification failed
}

/// The compiler phase a diagnostic originated from, recovered from its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorPhase {
    Lex,
    Parse,
    SymbolResolution,
    Type,
    Inliner,
    CodeGen,
    Other,
}

impl DiagCode {
    pub fn phase(&self) -> ErrorPhase {
        match &self.0[..3] {
            "E01" => ErrorPhase::Lex,
            "E02" => ErrorPhase::Parse,
            "E03" => ErrorPhase::SymbolResolution,
            "E04" => ErrorPhase::Type,
            "E05" => ErrorPhase::Inliner,
            "E06" => ErrorPhase::CodeGen,
            _ => ErrorPhase::Other,
        }
    }
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or related spans.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    /// Shorthand for an error-level diagnostic with a stable code.
    pub fn error(code: DiagCode, span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, span, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_span() -> Span {
        Span { start: 0, end: 1 }
    }

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, dummy_span(), "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code() {
        let d = Diagnostic::error(codes::E0400, dummy_span(), "type mismatch");
        assert_eq!(format!("{d}"), "error[E0400]: type mismatch");
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::error(codes::E0401, dummy_span(), "argument not convertible")
            .with_hint("insert an explicit cast")
            .with_related(dummy_span(), "parameter declared here");

        assert_eq!(d.code, Some(codes::E0401));
        assert_eq!(d.hint.as_deref(), Some("insert an explicit cast"));
        assert_eq!(d.related_spans.len(), 1);
    }

    #[test]
    fn phase_from_code() {
        assert_eq!(codes::E0100.phase(), ErrorPhase::Lex);
        assert_eq!(codes::E0301.phase(), ErrorPhase::SymbolResolution);
        assert_eq!(codes::E0500.phase(), ErrorPhase::Inliner);
        assert_eq!(codes::E0601.phase(), ErrorPhase::CodeGen);
    }
}
