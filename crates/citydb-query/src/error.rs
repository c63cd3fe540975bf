use thiserror::Error;

/// Failure to turn filter text or a JSON filter document into an expression
/// tree.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// The input contains no filter at all.
    #[error("filter is empty")]
    Empty,

    /// A character that starts no token.
    #[error("unexpected character `{ch}` at position {position}")]
    UnexpectedCharacter { ch: char, position: usize },

    /// A string literal or quoted property is never closed.
    #[error("unterminated quote starting at position {position}")]
    UnterminatedQuote { position: usize },

    /// A token that does not fit the grammar at this point.
    #[error("unexpected `{token}` at position {position}, expected {expected}")]
    UnexpectedToken {
        token: String,
        position: usize,
        expected: String,
    },

    /// The input ends in the middle of an expression.
    #[error("unexpected end of filter, expected {expected}")]
    UnexpectedEnd { expected: String },

    /// A literal is syntactically present but its value is invalid.
    #[error("invalid {kind} literal `{value}`: {reason}")]
    InvalidLiteral {
        kind: &'static str,
        value: String,
        reason: String,
    },

    /// Nesting exceeds the configured maximum.
    #[error("filter nesting exceeds maximum depth of {max}")]
    TooDeep { max: usize },

    /// The input parses, but not to a boolean expression.
    #[error("filter at {location} is not a boolean expression")]
    NotBoolean { location: String },

    /// Malformed JSON filter document.
    #[error("invalid filter at {path}: {message}")]
    Json { path: String, message: String },
}

impl ParseError {
    pub(crate) fn json(path: &str, message: impl Into<String>) -> Self {
        Self::Json {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// Failure to translate an expression tree into SQL.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("property `{property}` cannot be resolved")]
    UnresolvedProperty { property: String },

    #[error("property `{property}` is ambiguous, candidates: {}", .candidates.join(", "))]
    AmbiguousProperty {
        property: String,
        candidates: Vec<String>,
    },

    #[error("operator `{operator}` cannot be applied to {left} and {right}")]
    TypeMismatch {
        operator: String,
        left: String,
        right: String,
    },

    #[error("unknown function `{name}`")]
    UnknownFunction { name: String },

    #[error("function `{name}` expects {expected} argument(s), found {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("{expression} is not a boolean expression")]
    NotBoolean { expression: String },

    #[error("unknown feature type `{feature_type}`")]
    UnknownFeatureType { feature_type: String },

    #[error("unsupported expression: {0}")]
    Unsupported(String),
}

pub type ParseResult<T> = Result<T, ParseError>;
pub type CompileResult<T> = Result<T, CompileError>;
