//! Static registry of functions callable from filters.

use citydb_core::{DataType, TypeFamily};

/// Result type of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    Fixed(DataType),
    /// Same data type as the first argument.
    SameAsArgument,
}

/// Signature and SQL rendering of one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: &'static str,
    /// Required family of every argument.
    pub arguments: &'static [TypeFamily],
    pub returns: ReturnType,
    /// SQL function applied to the compiled arguments.
    pub sql: &'static str,
}

impl FunctionSpec {
    #[must_use]
    pub fn arity(&self) -> usize {
        self.arguments.len()
    }

    #[must_use]
    pub fn return_type(&self, first_argument: DataType) -> DataType {
        match self.returns {
            ReturnType::Fixed(data_type) => data_type,
            ReturnType::SameAsArgument => first_argument,
        }
    }
}

static FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec {
        name: "lower",
        arguments: &[TypeFamily::Text],
        returns: ReturnType::Fixed(DataType::String),
        sql: "LOWER",
    },
    FunctionSpec {
        name: "upper",
        arguments: &[TypeFamily::Text],
        returns: ReturnType::Fixed(DataType::String),
        sql: "UPPER",
    },
    // Case-insensitive comparison wraps both operands.
    FunctionSpec {
        name: "casei",
        arguments: &[TypeFamily::Text],
        returns: ReturnType::Fixed(DataType::String),
        sql: "LOWER",
    },
    FunctionSpec {
        name: "trim",
        arguments: &[TypeFamily::Text],
        returns: ReturnType::Fixed(DataType::String),
        sql: "TRIM",
    },
    FunctionSpec {
        name: "length",
        arguments: &[TypeFamily::Text],
        returns: ReturnType::Fixed(DataType::Integer),
        sql: "LENGTH",
    },
    FunctionSpec {
        name: "abs",
        arguments: &[TypeFamily::Numeric],
        returns: ReturnType::SameAsArgument,
        sql: "ABS",
    },
];

/// Looks up a function by its lowercase name.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS.iter().find(|spec| spec.name == name)
}

/// Every registered function.
pub fn functions() -> impl Iterator<Item = &'static FunctionSpec> {
    FUNCTIONS.iter()
}
