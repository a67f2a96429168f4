use thiserror::Error;

use crate::ast::{Expression, QuantityUnit};
use crate::lexer::Lexer;
use crate::token::{BinaryOp, Token};

/// Parse failure with the byte offset of the offending token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("parse error at {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

/// Parse a filter expression. Total over arbitrary byte input: every
/// outcome is either an expression or a positioned `ParseError`.
pub fn parse(src: &[u8]) -> Result<Expression, ParseError> {
    let mut parser = Parser::new(src);
    parser.next()?;
    let expr = parser.expression()?;
    parser.expect(Token::Eol)?;
    Ok(expr)
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    pos: usize,
    tok: Token,
    val: String,
}

impl<'a> Parser<'a> {
    fn new(src: &'a [u8]) -> Self {
        Self {
            lexer: Lexer::new(src),
            pos: 0,
            tok: Token::Eol,
            val: String::new(),
        }
    }

    /// expression : term ( "or" term )*
    fn expression(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.term()?;
        while self.tok == Token::Or {
            self.next()?;
            let right = self.term()?;
            expr = Expression::Binary {
                op: BinaryOp::Or,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    /// term : factor ( "and" factor )*
    fn term(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.factor()?;
        while self.tok == Token::And {
            self.next()?;
            let right = self.factor()?;
            expr = Expression::Binary {
                op: BinaryOp::And,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    /// factor : equality | "(" expression ")"
    fn factor(&mut self) -> Result<Expression, ParseError> {
        if self.tok == Token::LParen {
            self.next()?;
            let expr = self.expression()?;
            self.expect(Token::RParen)?;
            self.next()?;
            return Ok(expr);
        }
        self.equality()
    }

    /// equality : IDENT op value | IDENT ["not"] "in" list
    fn equality(&mut self) -> Result<Expression, ParseError> {
        self.expect(Token::Ident)?;
        let name = std::mem::take(&mut self.val);
        self.next()?;

        if self.tok == Token::In {
            self.next()?;
            let values = self.list()?;
            return Ok(Expression::In {
                field: name,
                values,
                negated: false,
            });
        }
        if self.tok == Token::Not {
            self.next()?;
            self.expect(Token::In)?;
            self.next()?;
            let values = self.list()?;
            return Ok(Expression::In {
                field: name,
                values,
                negated: true,
            });
        }

        let op = match self.tok {
            Token::Equal => BinaryOp::Eq,
            Token::NotEqual => BinaryOp::Ne,
            Token::Less => BinaryOp::Lt,
            Token::Lte => BinaryOp::Le,
            Token::Greater => BinaryOp::Gt,
            Token::Gte => BinaryOp::Ge,
            Token::Match => BinaryOp::Match,
            Token::NotMatch => BinaryOp::NotMatch,
            other => return Err(self.error(format!("expected operator instead of {other}"))),
        };
        self.next()?;

        let right = self.value()?;
        Ok(Expression::Binary {
            op,
            left: Box::new(Expression::Var(name)),
            right: Box::new(right),
        })
    }

    /// list : "[" ( STRING ( "," STRING )* )? "]"
    fn list(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(Token::LBracket)?;
        self.next()?;

        let mut values = Vec::new();
        if self.tok == Token::RBracket {
            self.next()?;
            return Ok(values);
        }

        self.expect(Token::StringLit)?;
        values.push(std::mem::take(&mut self.val));
        self.next()?;

        while self.tok == Token::Comma {
            self.next()?;
            self.expect(Token::StringLit)?;
            values.push(std::mem::take(&mut self.val));
            self.next()?;
        }

        self.expect(Token::RBracket)?;
        self.next()?;
        Ok(values)
    }

    /// value : STRING | QUANTITY | BOOLEAN | REGEX
    fn value(&mut self) -> Result<Expression, ParseError> {
        let expr = match self.tok {
            Token::StringLit => Expression::StringLit(std::mem::take(&mut self.val)),
            Token::Quantity => {
                let (num, unit) = QuantityUnit::split(&self.val);
                let value = num
                    .parse::<f64>()
                    .map_err(|_| self.error(format!("invalid number {:?}", self.val)))?;
                Expression::Quantity { value, unit }
            }
            Token::Bool => Expression::BoolLit(self.val.eq_ignore_ascii_case("true")),
            Token::RegexLit => {
                let pattern = std::mem::take(&mut self.val);
                if let Err(err) = regex::Regex::new(&pattern) {
                    return Err(self.error(format!("invalid regex: {err}")));
                }
                Expression::RegexLit(pattern)
            }
            other => return Err(self.error(format!("expected value instead of {other}"))),
        };
        self.next()?;
        Ok(expr)
    }

    fn next(&mut self) -> Result<(), ParseError> {
        let (pos, tok, val) = self.lexer.scan();
        self.pos = pos;
        self.tok = tok;
        self.val = val;
        if self.tok == Token::Illegal {
            return Err(ParseError {
                position: self.pos,
                message: std::mem::take(&mut self.val),
            });
        }
        Ok(())
    }

    fn expect(&self, tok: Token) -> Result<(), ParseError> {
        if self.tok != tok {
            return Err(self.error(format!("expected {tok} instead of {}", self.tok)));
        }
        Ok(())
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            position: self.pos,
            message,
        }
    }
}
