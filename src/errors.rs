//! Transpiler error handling.
//!
//! A single error type covers every phase, from tokenization through writing.
//! Every error is pinpointed at a source token: the plain `Display` rendering
//! is the classic `file:line:col: error: message` one-liner, and the
//! [`miette::Diagnostic`] impl adds labeled spans into the original file
//! content for rich terminal reports. Related tokens (for example the prior
//! definition in a duplicate-definition error) contribute note spans.

use std::fmt;
use std::sync::Arc;

use miette::{Diagnostic, LabeledSpan, NamedSource, SourceSpan};

use crate::syntax::Token;

/// Hard bound on recursive macro expansion. Exceeding it is fatal to the
/// outermost invocation.
pub const MAX_MACRO_RECURSION_DEPTH: usize = 64;

// ============================================================================
// SOURCE CONTEXT
// ============================================================================

/// File content registered for error reporting. Errors hold a `NamedSource`
/// built from this so reports can label spans inside the original text.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub name: String,
    pub content: String,
}

impl SourceContext {
    pub fn from_file(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Used when a token's file content is no longer available, e.g. for
    /// tokens minted by macro expansions.
    pub fn fallback(context: &str) -> Self {
        Self {
            name: "<generated>".to_string(),
            content: format!("; {context}"),
        }
    }

    pub fn to_named_source(&self) -> Arc<NamedSource<String>> {
        Arc::new(NamedSource::new(self.name.clone(), self.content.clone()))
    }
}

impl Default for SourceContext {
    fn default() -> Self {
        Self::fallback("no source registered")
    }
}

// ============================================================================
// ERROR TYPE
// ============================================================================

#[derive(Debug)]
pub struct TranspileError {
    pub kind: ErrorKind,
    pub source_info: SourceInfo,
    pub diagnostic_info: DiagnosticInfo,
}

/// Everything that can go wrong, one variant per failure class.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    Tokenize {
        message: String,
    },
    ParenBalance {
        message: String,
    },
    ScopeViolation {
        invocation: String,
        message: String,
    },
    ArityMismatch {
        invocation: String,
        expected: String,
        actual: usize,
    },
    /// Wrong token kind in a position, or a value of the wrong shape.
    TypeMismatch {
        expected: String,
        actual: String,
    },
    UnknownInvocation {
        name: String,
    },
    UnresolvedReference {
        name: String,
    },
    DuplicateDefinition {
        name: String,
    },
    MacroExpansion {
        macro_name: String,
        reason: String,
    },
    MacroRecursionLimit {
        depth: usize,
    },
    EvaluationCycle {
        name: String,
    },
    CompileTimeBuild {
        message: String,
    },
    Write {
        message: String,
    },
}

/// Where the error happened: the blamed token's coordinates plus the named
/// source content for span labeling.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub source: Arc<NamedSource<String>>,
    pub primary_span: SourceSpan,
    pub file: String,
    /// 1-based.
    pub line: u32,
    /// 1-based, matching editor conventions when following the error.
    pub column: u32,
}

#[derive(Debug, Clone)]
pub struct DiagnosticInfo {
    pub help: Option<String>,
    /// Note text plus the span it labels, e.g. a conflicting prior definition.
    pub notes: Vec<(String, SourceSpan)>,
    pub error_code: String,
}

impl ErrorKind {
    pub const fn code_suffix(&self) -> &'static str {
        match self {
            Self::Tokenize { .. } => "tokenize",
            Self::ParenBalance { .. } => "paren_balance",
            Self::ScopeViolation { .. } => "scope_violation",
            Self::ArityMismatch { .. } => "arity_mismatch",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::UnknownInvocation { .. } => "unknown_invocation",
            Self::UnresolvedReference { .. } => "unresolved_reference",
            Self::DuplicateDefinition { .. } => "duplicate_definition",
            Self::MacroExpansion { .. } => "macro_expansion",
            Self::MacroRecursionLimit { .. } => "macro_recursion_limit",
            Self::EvaluationCycle { .. } => "evaluation_cycle",
            Self::CompileTimeBuild { .. } => "compile_time_build",
            Self::Write { .. } => "write",
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Tokenize { message } => message.clone(),
            Self::ParenBalance { message } => message.clone(),
            Self::ScopeViolation {
                invocation,
                message,
            } => format!("{invocation}: {message}"),
            Self::ArityMismatch {
                invocation,
                expected,
                actual,
            } => format!("{invocation}: expected {expected} arguments, got {actual}"),
            Self::TypeMismatch { expected, actual } => {
                format!("expected {expected}, got {actual}")
            }
            Self::UnknownInvocation { name } => format!("unknown invocation '{name}'"),
            Self::UnresolvedReference { name } => format!("unresolved reference '{name}'"),
            Self::DuplicateDefinition { name } => format!("duplicate definition of '{name}'"),
            Self::MacroExpansion { macro_name, reason } => {
                format!("in expansion of macro '{macro_name}': {reason}")
            }
            Self::MacroRecursionLimit { depth } => {
                format!("macro recursion limit ({depth}) exceeded")
            }
            Self::EvaluationCycle { name } => {
                format!("definition '{name}' depends on its own evaluation")
            }
            Self::CompileTimeBuild { message } => message.clone(),
            Self::Write { message } => message.clone(),
        }
    }
}

impl TranspileError {
    /// Build an error blamed at `token`, with spans labeling `source`.
    pub fn at_token(kind: ErrorKind, token: &Token, source: &SourceContext) -> Self {
        let error_code = format!("cedilla::{}", kind.code_suffix());
        Self {
            kind,
            source_info: SourceInfo {
                source: source.to_named_source(),
                primary_span: token.span(),
                file: token.source.to_string(),
                line: token.line,
                column: token.column_start + 1,
            },
            diagnostic_info: DiagnosticInfo {
                help: None,
                notes: Vec::new(),
                error_code,
            },
        }
    }

    /// Build an error with file-level blame, for failures that happen outside
    /// any token (I/O, cache, file writing).
    pub fn at_file(kind: ErrorKind, filename: &str) -> Self {
        let error_code = format!("cedilla::{}", kind.code_suffix());
        Self {
            kind,
            source_info: SourceInfo {
                source: SourceContext::from_file(filename, String::new()).to_named_source(),
                primary_span: SourceSpan::from(0..0),
                file: filename.to_string(),
                line: 1,
                column: 1,
            },
            diagnostic_info: DiagnosticInfo {
                help: None,
                notes: Vec::new(),
                error_code,
            },
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.diagnostic_info.help = Some(help.into());
        self
    }

    /// Attach a note labeling another token, e.g. a conflicting prior
    /// definition. The note only renders when it points into the same file as
    /// the primary span.
    pub fn with_note_at(mut self, message: impl Into<String>, token: &Token) -> Self {
        self.diagnostic_info
            .notes
            .push((message.into(), token.span()));
        self
    }
}

impl std::error::Error for TranspileError {}

impl fmt::Display for TranspileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: error: {}",
            self.source_info.file,
            self.source_info.line,
            self.source_info.column,
            self.kind.message()
        )
    }
}

impl Diagnostic for TranspileError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(&self.diagnostic_info.error_code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.diagnostic_info
            .help
            .as_ref()
            .map(|h| Box::new(h) as Box<dyn fmt::Display>)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let mut labels = vec![LabeledSpan::new_with_span(
            Some(self.primary_label()),
            self.source_info.primary_span,
        )];
        for (message, span) in &self.diagnostic_info.notes {
            labels.push(LabeledSpan::new_with_span(Some(message.clone()), *span));
        }
        Some(Box::new(labels.into_iter()))
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        Some(&*self.source_info.source)
    }
}

impl TranspileError {
    fn primary_label(&self) -> String {
        match &self.kind {
            ErrorKind::Tokenize { .. } => "invalid token".into(),
            ErrorKind::ParenBalance { .. } => "unbalanced here".into(),
            ErrorKind::ScopeViolation { .. } => "not legal in this scope".into(),
            ErrorKind::ArityMismatch { .. } => "wrong number of arguments".into(),
            ErrorKind::TypeMismatch { .. } => "wrong kind of token".into(),
            ErrorKind::UnknownInvocation { .. } => "unknown invocation".into(),
            ErrorKind::UnresolvedReference { .. } => "never defined".into(),
            ErrorKind::DuplicateDefinition { .. } => "redefined here".into(),
            ErrorKind::MacroExpansion { .. } => "expansion failed".into(),
            ErrorKind::MacroRecursionLimit { .. } => "outermost invocation".into(),
            ErrorKind::EvaluationCycle { .. } => "cycle detected here".into(),
            ErrorKind::CompileTimeBuild { .. } => "build failed".into(),
            ErrorKind::Write { .. } => "while writing output".into(),
        }
    }
}

/// Render an error as a rich miette report on stderr.
pub fn print_error_report(error: TranspileError) {
    let report = miette::Report::new(error);
    eprintln!("{report:?}");
}
