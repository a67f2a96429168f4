//! `vs_filter` - VM filter expressions compiled to parameterized SQL
//!
//! This crate provides:
//! - A lexer and recursive-descent parser for a small filter language
//! - An expression AST with quantity unit handling
//! - Lowering to a parameterized SQL `WHERE` fragment
//!
//! # Grammar
//!
//! ```text
//! expression  : term ( "or" term )* ;
//! term        : factor ( "and" factor )* ;
//! factor      : equality | "(" expression ")" ;
//! equality    : IDENTIFIER ( "=" | "!=" | "<" | "<=" | ">" | ">=" | "~" | "!~" ) value
//!             | IDENTIFIER "in" "[" STRING ( "," STRING )* "]"
//!             | IDENTIFIER "not" "in" "[" STRING ( "," STRING )* "]" ;
//! value       : STRING | QUANTITY | BOOLEAN | REGEX ;
//!
//! IDENTIFIER  : [a-zA-Z_][a-zA-Z0-9_.]* ;
//! REGEX       : '/' ( '\/' | . )*? '/' ;
//! STRING      : "'" (.*?) "'" | '"' (.*?) '"' ;
//! BOOLEAN     : "true" | "false" ;           (case-insensitive)
//! QUANTITY    : [0-9]+(\.[0-9]+)? ( 'KB' | 'MB' | 'GB' | 'TB' )? ;
//! ```
//!
//! `and` binds tighter than `or`; parentheses override grouping.
//! Quantities are normalized to MB before they reach SQL (`8GB` becomes
//! the literal `8192.00`). String and regex values are always emitted as
//! `?` placeholders with bound arguments, never interpolated into the
//! SQL body. `~` and `!~` lower to `regexp_matches(...)`.
//!
//! # Example
//!
//! ```
//! use vs_filter::{compile, FilterError};
//!
//! let mapper = |name: &str| match name {
//!     "memory" => Ok(r#"v."memory""#.to_string()),
//!     "status" => Ok(r#"v."power_state""#.to_string()),
//!     other => Err(FilterError::UnknownField(other.to_string())),
//! };
//!
//! let expr = compile(b"memory > 8GB and status = 'poweredOn'", &mapper).unwrap();
//! assert_eq!(expr.sql, r#"((v."memory" > 8192.00) AND (v."power_state" = ?))"#);
//! assert_eq!(expr.args, vec!["poweredOn".to_string()]);
//! ```

use thiserror::Error;

mod ast;
mod lexer;
mod parser;
mod sql;
mod token;

pub use ast::{Expression, QuantityUnit};
pub use parser::{parse, ParseError};
pub use sql::{to_sql, SqlExpr};
pub use token::{BinaryOp, Token};

/// Errors produced when lowering an expression to SQL.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("unsupported expression: {0}")]
    Unsupported(&'static str),
}

/// Resolves a filter identifier (e.g. `memory`) to a fully qualified SQL
/// column reference (e.g. `v."memory_mb"`). Identifiers are lowercased
/// before resolution; dotted names are passed through unchanged.
pub trait FieldMap {
    fn column(&self, name: &str) -> Result<String, FilterError>;
}

impl<F> FieldMap for F
where
    F: Fn(&str) -> Result<String, FilterError>,
{
    fn column(&self, name: &str) -> Result<String, FilterError> {
        self(name)
    }
}

/// Parse a filter expression and lower it to a parameterized SQL fragment.
pub fn compile(src: &[u8], map: &dyn FieldMap) -> Result<SqlExpr, FilterError> {
    let expr = parse(src)?;
    to_sql(&expr, map)
}
