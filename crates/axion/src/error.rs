//! Build diagnostics shared by the lexer, parser, semantic analyzer, and
//! code generator.
//!
//! Diagnostics accumulate in [`crate::state::CompilerState`]; phases keep
//! going past warnings and info messages, while any fatal diagnostic stops
//! the pipeline before code generation.

use std::{cmp::Ordering, fmt};

use strum::IntoStaticStr;

use crate::location::SourceLocation;

/// Severity of a build diagnostic.
///
/// Fatal diagnostics from any phase prevent later phases from running;
/// warnings and info messages do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorLevel {
    Info,
    Warning,
    Fatal,
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Fatal => "FATAL",
        };
        f.write_str(tag)
    }
}

/// Closed enumeration of diagnostic kinds.
///
/// The variant decides the message shape; the human-readable text is built
/// at the emission site, where the interpolated values are at hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum ErrorType {
    // Fatal
    InternalError,
    IllegalSyntax,
    IllegalExpression,
    IllegalOperator,
    ConstIdentifier,
    ProhibitedActionAttribute,
    UnbalancedExpression,
    UnexpectedCharacter,
    UnexpectedIdentifier,
    UnexpectedToken,
    UnexpectedEof,
    UnrecognizedEscapeSequence,
    UnterminatedStringLiteral,
    ArgumentAfterVarargs,
    TooManyArgs,
    TooFewArgs,
    RedeclaredIdentifier,
    UndeclaredIdentifier,
    ExpectedIdentifier,
    AmbiguousIdentifier,
    InvalidConstructor,
    UnknownClassType,
    ExpectedToken,
    ExpectedModule,
    ModuleAlreadyDefined,
    ModuleNotImported,
    ImportNotFound,
    IdentifierIsModule,
    ImportOutsideGlobal,
    ImportCurrentFile,
    SelfOutsideClass,
    ElseOutsideIf,
    AliasMissingAssignment,
    AliasMustBeIdentifier,
    UnsupportedFeature,

    // Warnings
    UnreachableCode,
    ExpectedSemicolon,

    // Info
    MissingFinalReturn,
    UnusedIdentifier,
    EmptyFunctionBody,
    EmptyStatementBody,
    ModuleNameBeginsLowercase,
    FunctionNameBeginsUppercase,
    VariableNameBeginsUppercase,
}

/// A single diagnostic produced while building a script.
#[derive(Debug, Clone)]
pub struct BuildMessage {
    pub level: ErrorLevel,
    pub error_type: ErrorType,
    pub location: SourceLocation,
    /// Fully formatted message text, without the level prefix.
    pub text: String,
}

impl BuildMessage {
    #[must_use]
    pub fn new(error_type: ErrorType, level: ErrorLevel, location: SourceLocation, text: String) -> Self {
        Self {
            level,
            error_type,
            location,
            text,
        }
    }

    /// Orders messages by position within a file, then by severity so the
    /// most important message at one spot prints first.
    #[must_use]
    pub fn position_order(&self, other: &Self) -> Ordering {
        (self.location.line, self.location.column)
            .cmp(&(other.location.line, other.location.column))
            .then(other.level.cmp(&self.level))
    }
}

impl fmt::Display for BuildMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  {} {}: {}", self.location, self.level, self.text)
    }
}

/// Formats a batch of diagnostics grouped per file and sorted by position,
/// mirroring how the compiler reports them after analysis.
#[must_use]
pub fn format_messages(messages: &[BuildMessage]) -> String {
    use std::fmt::Write as _;

    let mut by_file: Vec<(&str, Vec<&BuildMessage>)> = Vec::new();
    for msg in messages {
        match by_file.iter_mut().find(|(file, _)| *file == msg.location.file) {
            Some((_, group)) => group.push(msg),
            None => by_file.push((&msg.location.file, vec![msg])),
        }
    }

    let mut out = String::new();
    for (file, mut group) in by_file {
        group.sort_by(|a, b| a.position_order(b));
        let _ = writeln!(out, "{file}");
        for msg in group {
            let _ = writeln!(out, "{msg}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_sorted_by_position() {
        let later = BuildMessage::new(
            ErrorType::UnusedIdentifier,
            ErrorLevel::Info,
            SourceLocation::new(4, 0, "m.ax"),
            "identifier 'x' is unused".to_owned(),
        );
        let earlier = BuildMessage::new(
            ErrorType::UndeclaredIdentifier,
            ErrorLevel::Fatal,
            SourceLocation::new(1, 2, "m.ax"),
            "identifier 'y' has not been declared".to_owned(),
        );

        let report = format_messages(&[later, earlier]);
        let first = report.lines().nth(1).unwrap();
        assert!(first.contains("FATAL"), "fatal at 2:3 should sort first: {report}");
    }

    #[test]
    fn test_grouped_by_file() {
        let a = BuildMessage::new(
            ErrorType::UnreachableCode,
            ErrorLevel::Warning,
            SourceLocation::new(0, 0, "a.ax"),
            "unreachable code".to_owned(),
        );
        let b = BuildMessage::new(
            ErrorType::UnreachableCode,
            ErrorLevel::Warning,
            SourceLocation::new(0, 0, "b.ax"),
            "unreachable code".to_owned(),
        );

        let report = format_messages(&[a, b]);
        assert!(report.contains("a.ax\n"));
        assert!(report.contains("b.ax\n"));
    }
}
