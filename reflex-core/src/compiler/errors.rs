//! Compile diagnostics.
//!
//! Parsing and compilation never fail outright. Every problem becomes a
//! [`CompileError`] handed to the caller's sink, and processing continues
//! with a best-effort recovery.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ast::{Position, SourceLocation};

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Markup.
    AbruptClosingOfEmptyComment,
    CdataInHtmlContent,
    DuplicateAttribute,
    EndTagWithAttributes,
    EndTagWithTrailingSolidus,
    EofBeforeTagName,
    EofInCdata,
    EofInComment,
    EofInScriptHtmlCommentLikeText,
    EofInTag,
    IncorrectlyClosedComment,
    IncorrectlyOpenedComment,
    InvalidFirstCharacterOfTagName,
    MissingAttributeValue,
    MissingEndTagName,
    MissingWhitespaceBetweenAttributes,
    NestedComment,
    UnexpectedCharacterInAttributeName,
    UnexpectedCharacterInUnquotedAttributeValue,
    UnexpectedEqualsSignBeforeAttributeName,
    UnexpectedQuestionMarkInsteadOfTagName,
    UnexpectedSolidusInTag,

    // Template syntax.
    InvalidEndTag,
    MissingEndTag,
    MissingInterpolationEnd,
    MissingDynamicDirectiveArgumentEnd,
    ElseWithoutIf,
    ForMalformedExpression,
    ForInvalidAlias,
    OnceInForWithoutKey,
    UnkeyedComponentLoop,
    TemplateKeyPlacement,
    MultipleRoots,
    ModelWithoutExpression,

    // Expressions.
    InvalidExpression,
    ProhibitedKeyword,
    UnaryOperatorAsProperty,
}

impl ErrorCode {
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::AbruptClosingOfEmptyComment => "Illegal comment.",
            ErrorCode::CdataInHtmlContent => "CDATA section is allowed only in XML context.",
            ErrorCode::DuplicateAttribute => "Duplicate attribute.",
            ErrorCode::EndTagWithAttributes => "End tag cannot have attributes.",
            ErrorCode::EndTagWithTrailingSolidus => "Illegal '/' in tags.",
            ErrorCode::EofBeforeTagName => "Unexpected EOF in tag.",
            ErrorCode::EofInCdata => "Unexpected EOF in CDATA section.",
            ErrorCode::EofInComment => "Unexpected EOF in comment.",
            ErrorCode::EofInScriptHtmlCommentLikeText => "Unexpected EOF in script.",
            ErrorCode::EofInTag => "Unexpected EOF in tag.",
            ErrorCode::IncorrectlyClosedComment => "Incorrectly closed comment.",
            ErrorCode::IncorrectlyOpenedComment => "Incorrectly opened comment.",
            ErrorCode::InvalidFirstCharacterOfTagName => "Illegal tag name. Use '&lt;' to print '<'.",
            ErrorCode::MissingAttributeValue => "Attribute value was expected.",
            ErrorCode::MissingEndTagName => "End tag name was expected.",
            ErrorCode::MissingWhitespaceBetweenAttributes => "Whitespace was expected.",
            ErrorCode::NestedComment => "Unexpected '<!--' in comment.",
            ErrorCode::UnexpectedCharacterInAttributeName => {
                "Attribute name cannot contain U+0022 (\"), U+0027 ('), and U+003C (<)."
            }
            ErrorCode::UnexpectedCharacterInUnquotedAttributeValue => {
                "Unquoted attribute value cannot contain U+0022 (\"), U+0027 ('), U+003C (<), U+003D (=), and U+0060 (`)."
            }
            ErrorCode::UnexpectedEqualsSignBeforeAttributeName => {
                "Attribute name cannot start with '='."
            }
            ErrorCode::UnexpectedQuestionMarkInsteadOfTagName => "'<?' is allowed only in XML context.",
            ErrorCode::UnexpectedSolidusInTag => "Illegal '/' in tags.",
            ErrorCode::InvalidEndTag => "Invalid end tag.",
            ErrorCode::MissingEndTag => "Element is missing end tag.",
            ErrorCode::MissingInterpolationEnd => "Interpolation end sign was not found.",
            ErrorCode::MissingDynamicDirectiveArgumentEnd => {
                "End bracket for dynamic directive argument was not found. Note that dynamic directive argument cannot contain spaces."
            }
            ErrorCode::ElseWithoutIf => "v-else/v-else-if has no adjacent v-if.",
            ErrorCode::ForMalformedExpression => "v-for has invalid expression.",
            ErrorCode::ForInvalidAlias => "v-for alias is not a valid identifier.",
            ErrorCode::OnceInForWithoutKey => "v-once can only be used inside v-for that is keyed.",
            ErrorCode::UnkeyedComponentLoop => {
                "Components rendered in a loop should have explicit keys."
            }
            ErrorCode::TemplateKeyPlacement => "<template> cannot be keyed. Place the key on real elements instead.",
            ErrorCode::MultipleRoots => "Template should contain exactly one root element.",
            ErrorCode::ModelWithoutExpression => "v-model is missing expression.",
            ErrorCode::InvalidExpression => "Invalid expression.",
            ErrorCode::ProhibitedKeyword => "Avoid using reserved keywords as property names.",
            ErrorCode::UnaryOperatorAsProperty => {
                "Avoid using unary operators as property names."
            }
        }
    }

    /// Expression problems and style hints are warnings; everything else is
    /// a syntax error.
    pub fn severity(self) -> Severity {
        match self {
            ErrorCode::InvalidExpression
            | ErrorCode::ProhibitedKeyword
            | ErrorCode::UnaryOperatorAsProperty
            | ErrorCode::UnkeyedComponentLoop
            | ErrorCode::MultipleRoots => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A diagnostic with its location.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message} ({}:{})", .loc.start.line, .loc.start.column)]
pub struct CompileError {
    pub code: ErrorCode,
    pub severity: Severity,
    pub message: String,
    pub loc: SourceLocation,
}

impl CompileError {
    pub fn new(code: ErrorCode, loc: SourceLocation) -> Self {
        Self {
            code,
            severity: code.severity(),
            message: code.message().to_string(),
            loc,
        }
    }

    /// Attach extra context to the standard message.
    pub fn with_detail(mut self, detail: impl fmt::Display) -> Self {
        self.message = format!("{} {}", self.message, detail);
        self
    }

    pub fn at(code: ErrorCode, pos: Position) -> Self {
        Self::new(
            code,
            SourceLocation {
                start: pos,
                end: pos,
                source: String::new(),
            },
        )
    }
}

/// Receives diagnostics as they are produced.
pub type DiagnosticSink = Arc<dyn Fn(&CompileError) + Send + Sync>;

/// Deliver a diagnostic to `sink`, or log it when there is none.
pub fn report(sink: Option<&DiagnosticSink>, err: CompileError) {
    match sink {
        Some(sink) => sink(&err),
        None => match err.severity {
            Severity::Error => tracing::warn!(code = ?err.code, "{err}"),
            Severity::Warning => tracing::debug!(code = ?err.code, "{err}"),
        },
    }
}
