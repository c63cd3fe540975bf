pub mod compiler;
pub mod error;
pub mod expr;
pub mod functions;
mod json_syntax;
pub mod lexer;
pub mod parser;
pub mod query;
mod text_syntax;

pub use compiler::{CompiledPredicate, SqlCompiler, SqlParam};
pub use error::{CompileError, CompileResult, ParseError, ParseResult};
pub use expr::{ComparisonOp, Expr, Literal, PropertyRef, SpatialOp};
pub use functions::{FunctionSpec, ReturnType};
pub use parser::{parse_json, parse_json_str, parse_text, FilterParser, DEFAULT_MAX_DEPTH};
pub use query::{CompiledQuery, Query};
