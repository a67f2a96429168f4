use std::fmt;

/// Lexical token kinds produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// Lexing error; the token value carries the message.
    Illegal,
    /// End of input.
    Eol,

    And,
    Or,
    Not,
    In,

    Equal,
    NotEqual,
    Less,
    Lte,
    Greater,
    Gte,
    Match,
    NotMatch,

    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,

    StringLit,
    RegexLit,
    Quantity,
    Ident,
    Bool,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Token::Illegal => "illegal",
            Token::Eol => "eol",
            Token::And => "and",
            Token::Or => "or",
            Token::Not => "not",
            Token::In => "in",
            Token::Equal => "equal",
            Token::NotEqual => "notEqual",
            Token::Less => "less",
            Token::Lte => "lte",
            Token::Greater => "greater",
            Token::Gte => "gte",
            Token::Match => "match",
            Token::NotMatch => "notMatch",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Comma => ",",
            Token::StringLit => "string",
            Token::RegexLit => "regex",
            Token::Quantity => "quantity",
            Token::Ident => "identifier",
            Token::Bool => "boolean",
        };
        f.write_str(name)
    }
}

/// Binary operators as they appear in the AST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
    NotMatch,
}

impl BinaryOp {
    /// SQL rendering of comparison operators. `Match`/`NotMatch` lower to
    /// `regexp_matches(...)` and have no infix form.
    pub(crate) fn sql(self) -> &'static str {
        match self {
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Match | BinaryOp::NotMatch => "",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Match => "~",
            BinaryOp::NotMatch => "!~",
        };
        f.write_str(name)
    }
}
