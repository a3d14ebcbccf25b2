//! Error kinds surfaced by the interpreter, the spanned carrier they travel
//! in, and the `Diagnostic` renderer that turns a byte span back into
//! file/line/column output.

use std::fmt;
use std::sync::Arc;

use crate::collections::Map;
use crate::host::{ClassId, HostError};
use crate::reader::{Source, Span};

//===----------------------------------------------------------------------===//
// Error
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone)]
pub enum Error {
    Syntax(SyntaxError),
    /// Unknown symbol, refer or required library.
    Resolution(String),
    /// Applying a non-callable, setting a non-var, taking a macro's value.
    Type(String),
    /// `case` fell through without a default.
    NoMatchingClause(String),
    /// Host interop blocked by the allow-list.
    NotAllowed(String),
    Arity(String),
    /// A value raised by `throw` or by the host gateway.
    Thrown(Arc<HostError>),
    /// The realize-max guard tripped.
    SizeExceeded(usize),
    /// Malformed special forms and other analyzer complaints.
    Analysis(String),
}

impl Error {
    /// The host class an escaped error presents to `catch` clauses.
    pub fn class(&self) -> ClassId {
        match self {
            Error::Thrown(e) => e.class,
            _ => crate::host::EXCEPTION,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Syntax(e) => write!(f, "{}", e),
            Error::Resolution(msg)
            | Error::Type(msg)
            | Error::NotAllowed(msg)
            | Error::Arity(msg)
            | Error::Analysis(msg) => write!(f, "{}", msg),
            Error::NoMatchingClause(v) => {
                write!(f, "No matching clause: {}", v)
            }
            Error::Thrown(e) => write!(f, "{}", e),
            Error::SizeExceeded(max) => {
                write!(f, "Maximum number of elements realized: {}", max)
            }
        }
    }
}

//===----------------------------------------------------------------------===//
// SyntaxError
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone)]
pub enum SyntaxError {
    UnexpectedEof { expected: Option<String> },
    UnexpectedToken { found: String, expected: String },
    UnbalancedDelimiter { delimiter: char },
    UnterminatedString,
    InvalidNumber { value: String },
    InvalidCharacter { value: String },
    InvalidMeta { reason: String },
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyntaxError::UnexpectedEof { expected } => match expected {
                Some(e) => write!(f, "Unexpected EOF, expected {}", e),
                None => write!(f, "Unexpected EOF"),
            },
            SyntaxError::UnexpectedToken { found, expected } => {
                write!(f, "Unexpected token: {} (expected: {})", found, expected)
            }
            SyntaxError::UnbalancedDelimiter { delimiter } => {
                write!(f, "Unbalanced delimiter: {}", delimiter)
            }
            SyntaxError::UnterminatedString => write!(f, "Unterminated string"),
            SyntaxError::InvalidNumber { value } => {
                write!(f, "Invalid number: {}", value)
            }
            SyntaxError::InvalidCharacter { value } => {
                write!(f, "Invalid character literal: {}", value)
            }
            SyntaxError::InvalidMeta { reason } => write!(f, "{}", reason),
        }
    }
}

//===----------------------------------------------------------------------===//
// SpannedError
//===----------------------------------------------------------------------===//

/// An error plus the byte span it should point at. Re-raising at a call
/// frame chains the prior carrier as `cause`, so the original message and
/// location survive the rewrap.
#[derive(Debug, Clone)]
pub struct SpannedError {
    pub error: Error,
    pub span: Span,
    pub cause: Option<Box<SpannedError>>,
}

impl SpannedError {
    pub fn new(error: Error, span: Span) -> Self {
        Self { error, span, cause: None }
    }

    pub fn has_location(&self) -> bool {
        !(self.span.start == 0 && self.span.end == 0)
    }

    /// Attaches a call node's location to an error that escaped without one,
    /// so diagnostics point at the user's call site.
    pub fn at_call_site(self, span: &Span) -> Self {
        if self.has_location() {
            self
        } else {
            Self { span: span.clone(), ..self }
        }
    }

    /// The host error a `catch` clause matches against and binds. Internal
    /// errors are wrapped into an `Exception`-classed host error on demand.
    pub fn to_host_error(&self) -> Arc<HostError> {
        match &self.error {
            Error::Thrown(e) => e.clone(),
            other => Arc::new(HostError {
                class: other.class(),
                message: Some(other.to_string().into()),
                data: Map::new(),
                cause: None,
            }),
        }
    }
}

impl fmt::Display for SpannedError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.error)?;
        let mut cause = self.cause.as_deref();
        while let Some(c) = cause {
            write!(f, "\ncaused by: {}", c.error)?;
            cause = c.cause.as_deref();
        }
        Ok(())
    }
}

//===----------------------------------------------------------------------===//
// Diagnostic
//===----------------------------------------------------------------------===//

/// A spanned error joined with the source text it came from, rendering
/// rustc-style output: message, location header, source line, caret.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub error: SpannedError,
    pub source: String,
    pub file: Source,
}

impl Diagnostic {
    pub fn new(error: SpannedError, source: &str, file: Source) -> Self {
        Self { error, source: source.to_string(), file }
    }

    /// One-based line and column of the error's span start.
    pub fn location(&self) -> (usize, usize) {
        location_of(&self.source, &self.error.span)
    }

    pub fn message(&self) -> String {
        self.error.error.to_string()
    }

    pub fn format(&self) -> String {
        let (line, column) = self.location();
        let start = self.error.span.start.min(self.source.len());
        let line_start =
            self.source[..start].rfind('\n').map(|p| p + 1).unwrap_or(0);
        let line_end = self.source[start..]
            .find('\n')
            .map(|p| start + p)
            .unwrap_or(self.source.len());
        let line_content = &self.source[line_start..line_end];

        let mut out = String::new();
        out.push_str(&format!("{}\n", self.error.error));
        out.push_str(&format!(
            "  --> {}:{}:{}\n",
            self.file.display(),
            line,
            column
        ));
        out.push_str("   |\n");
        out.push_str(&format!("{:4} | {}\n", line, line_content));
        let caret_len = self.error.span.len().max(1).min(
            line_content.len().saturating_sub(column - 1).max(1),
        );
        out.push_str(&format!(
            "     | {}{}\n",
            " ".repeat(column - 1),
            "^".repeat(caret_len)
        ));

        let mut cause = self.error.cause.as_deref();
        while let Some(c) = cause {
            out.push_str(&format!("   = caused by: {}\n", c.error));
            cause = c.cause.as_deref();
        }
        out
    }
}

fn location_of(source: &str, span: &Span) -> (usize, usize) {
    let start = span.start.min(source.len());
    let line = source[..start].matches('\n').count() + 1;
    let line_start = source[..start].rfind('\n').map(|p| p + 1).unwrap_or(0);
    (line, start - line_start + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::synthetic_span;

    #[test]
    fn call_site_attaches_only_when_missing() {
        let err = SpannedError::new(
            Error::Resolution("Could not resolve symbol: x".into()),
            synthetic_span(),
        );
        let err = err.at_call_site(&(5..9));
        assert_eq!(err.span, 5..9);
        // a real location wins over the outer frame
        let err = err.at_call_site(&(0..2));
        assert_eq!(err.span, 5..9);
    }

    #[test]
    fn diagnostic_points_at_line_and_column() {
        let source = "(+ 1 2)\n(boom)\n";
        let err = SpannedError::new(
            Error::Resolution("Could not resolve symbol: boom".into()),
            9..13,
        );
        let diag = Diagnostic::new(err, source, Source::Repl);
        assert_eq!(diag.location(), (2, 2));
        let rendered = diag.format();
        assert!(rendered.contains("REPL:2:2"));
        assert!(rendered.contains("(boom)"));
    }
}
