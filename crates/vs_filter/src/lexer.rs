use crate::token::Token;

/// Hand-written lexer over raw bytes. `scan` returns the byte offset of
/// the token start, the token kind, and the token text (or an error
/// message for `Token::Illegal`).
pub(crate) struct Lexer<'a> {
    src: &'a [u8],
    offset: usize,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(src: &'a [u8]) -> Self {
        Self { src, offset: 0 }
    }

    pub(crate) fn scan(&mut self) -> (usize, Token, String) {
        self.skip_whitespace();
        let start = self.offset;

        let Some(&c) = self.src.get(self.offset) else {
            return (start, Token::Eol, String::new());
        };

        match c {
            b'=' => {
                self.offset += 1;
                (start, Token::Equal, String::new())
            }
            b'!' => {
                self.offset += 1;
                match self.src.get(self.offset) {
                    Some(b'=') => {
                        self.offset += 1;
                        (start, Token::NotEqual, String::new())
                    }
                    Some(b'~') => {
                        self.offset += 1;
                        (start, Token::NotMatch, String::new())
                    }
                    _ => (start, Token::Illegal, "expected '=' or '~' after '!'".into()),
                }
            }
            b'<' => {
                self.offset += 1;
                if self.src.get(self.offset) == Some(&b'=') {
                    self.offset += 1;
                    (start, Token::Lte, String::new())
                } else {
                    (start, Token::Less, String::new())
                }
            }
            b'>' => {
                self.offset += 1;
                if self.src.get(self.offset) == Some(&b'=') {
                    self.offset += 1;
                    (start, Token::Gte, String::new())
                } else {
                    (start, Token::Greater, String::new())
                }
            }
            b'~' => {
                self.offset += 1;
                (start, Token::Match, String::new())
            }
            b'(' => {
                self.offset += 1;
                (start, Token::LParen, String::new())
            }
            b')' => {
                self.offset += 1;
                (start, Token::RParen, String::new())
            }
            b'[' => {
                self.offset += 1;
                (start, Token::LBracket, String::new())
            }
            b']' => {
                self.offset += 1;
                (start, Token::RBracket, String::new())
            }
            b',' => {
                self.offset += 1;
                (start, Token::Comma, String::new())
            }
            b'\'' | b'"' => self.scan_string(start, c),
            b'/' => self.scan_regex(start),
            b'0'..=b'9' => self.scan_quantity(start),
            c if is_ident_start(c) => self.scan_ident(start),
            c => {
                self.offset += 1;
                (
                    start,
                    Token::Illegal,
                    format!("unexpected character {:?}", c as char),
                )
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(&c) = self.src.get(self.offset) {
            if c == b' ' || c == b'\t' || c == b'\r' || c == b'\n' {
                self.offset += 1;
            } else {
                break;
            }
        }
    }

    // Single- or double-quoted, no escape sequences. Empty strings are valid.
    fn scan_string(&mut self, start: usize, quote: u8) -> (usize, Token, String) {
        self.offset += 1;
        let body_start = self.offset;
        while let Some(&c) = self.src.get(self.offset) {
            if c == quote {
                let text = String::from_utf8_lossy(&self.src[body_start..self.offset]).into_owned();
                self.offset += 1;
                return (start, Token::StringLit, text);
            }
            self.offset += 1;
        }
        (start, Token::Illegal, "unterminated string".into())
    }

    // AWK-style /pattern/ with \/ as the only recognized escape.
    fn scan_regex(&mut self, start: usize) -> (usize, Token, String) {
        self.offset += 1;
        let mut text = String::new();
        while let Some(&c) = self.src.get(self.offset) {
            match c {
                b'/' => {
                    self.offset += 1;
                    return (start, Token::RegexLit, text);
                }
                b'\\' if self.src.get(self.offset + 1) == Some(&b'/') => {
                    text.push('/');
                    self.offset += 2;
                }
                _ => {
                    text.push(c as char);
                    self.offset += 1;
                }
            }
        }
        (start, Token::Illegal, "unclosed regex".into())
    }

    // Digits with an optional fraction and an optional case-insensitive
    // KB/MB/GB/TB suffix. The suffix stays in the token text; the AST
    // splits it off again.
    fn scan_quantity(&mut self, start: usize) -> (usize, Token, String) {
        while self.src.get(self.offset).is_some_and(u8::is_ascii_digit) {
            self.offset += 1;
        }
        if self.src.get(self.offset) == Some(&b'.')
            && self.src.get(self.offset + 1).is_some_and(u8::is_ascii_digit)
        {
            self.offset += 1;
            while self.src.get(self.offset).is_some_and(u8::is_ascii_digit) {
                self.offset += 1;
            }
        }

        if let (Some(&a), Some(&b)) = (self.src.get(self.offset), self.src.get(self.offset + 1)) {
            let unit = [a.to_ascii_lowercase(), b.to_ascii_lowercase()];
            let boundary = !self
                .src
                .get(self.offset + 2)
                .is_some_and(|&c| is_ident_continue(c));
            if boundary && matches!(&unit, b"kb" | b"mb" | b"gb" | b"tb") {
                self.offset += 2;
            }
        }

        let text = String::from_utf8_lossy(&self.src[start..self.offset]).into_owned();
        (start, Token::Quantity, text)
    }

    fn scan_ident(&mut self, start: usize) -> (usize, Token, String) {
        self.offset += 1;
        while self.src.get(self.offset).is_some_and(|&c| is_ident_continue(c)) {
            self.offset += 1;
        }
        let text = String::from_utf8_lossy(&self.src[start..self.offset]).into_owned();

        let tok = if text.eq_ignore_ascii_case("and") {
            Token::And
        } else if text.eq_ignore_ascii_case("or") {
            Token::Or
        } else if text.eq_ignore_ascii_case("not") {
            Token::Not
        } else if text.eq_ignore_ascii_case("in") {
            Token::In
        } else if text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("false") {
            Token::Bool
        } else {
            Token::Ident
        };
        (start, tok, text)
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'.'
}
