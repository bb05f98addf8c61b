//! Recursive-descent parser for integrand expressions

use super::{BinaryOp, Expr, Function};

/// Maximum depth of the parsed tree
pub const MAX_DEPTH: usize = 256;

/// Maximum number of tokens in one expression
pub const MAX_TOKENS: usize = 4096;

/// Parse failure with the byte offset where it was detected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Power,
    LParen,
    RParen,
    Comma,
}

/// Split source into (offset, token) pairs
fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let token = match c {
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' if bytes.get(i + 1) == Some(&b'*') => {
                i += 1;
                Token::Power
            }
            b'*' => Token::Star,
            b'^' => Token::Power,
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b',' => Token::Comma,
            b'0'..=b'9' | b'.' => {
                i = scan_number(bytes, i);
                let text = &src[start..i];
                let value: f64 = text
                    .parse()
                    .map_err(|_| ParseError::new(start, format!("invalid number '{}'", text)))?;
                if !value.is_finite() {
                    return Err(ParseError::new(start, format!("number '{}' is out of range", text)));
                }
                tokens.push((start, Token::Number(value)));
                continue;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(src[start..i].to_string())));
                continue;
            }
            _ => {
                let ch = src[start..].chars().next().unwrap_or('?');
                return Err(ParseError::new(start, format!("unexpected character '{}'", ch)));
            }
        };

        tokens.push((start, token));
        i += 1;
    }

    Ok(tokens)
}

/// Advance past a decimal literal with optional fraction and exponent
fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }
    i
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(o, _)| *o).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ParseError> {
        let offset = self.offset();
        match self.next() {
            Some(ref t) if *t == expected => Ok(()),
            _ => Err(ParseError::new(offset, format!("expected {}", what))),
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::new(
                self.offset(),
                format!("expression nested deeper than {} levels", MAX_DEPTH),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                self.enter()?;
                let inner = self.unary()?;
                self.leave();
                Ok(Expr::Neg(Box::new(inner)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.enter()?;
                let inner = self.unary()?;
                self.leave();
                Ok(inner)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.atom()?;
        if self.peek() == Some(&Token::Power) {
            self.pos += 1;
            self.enter()?;
            let exponent = self.unary()?;
            self.leave();
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let offset = self.offset();
        match self.next() {
            Some(Token::Number(value)) => Ok(Expr::Const(value)),
            Some(Token::LParen) => {
                self.enter()?;
                let inner = self.expr()?;
                self.leave();
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => self.identifier(offset, &name),
            Some(_) => Err(ParseError::new(offset, "unexpected token")),
            None => Err(ParseError::new(offset, "unexpected end of expression")),
        }
    }

    fn identifier(&mut self, offset: usize, raw: &str) -> Result<Expr, ParseError> {
        let name = match raw.split_once('.') {
            Some(("math", rest)) if !rest.contains('.') => rest,
            Some(_) => return Err(ParseError::new(offset, format!("unknown name '{}'", raw))),
            None => raw,
        };

        if self.peek() != Some(&Token::LParen) {
            return match name {
                "x" if raw == "x" => Ok(Expr::Var),
                "pi" => Ok(Expr::Const(std::f64::consts::PI)),
                "e" => Ok(Expr::Const(std::f64::consts::E)),
                "tau" => Ok(Expr::Const(std::f64::consts::TAU)),
                _ => Err(ParseError::new(offset, format!("unknown name '{}'", raw))),
            };
        }

        self.pos += 1;
        self.enter()?;
        let first = self.expr()?;
        let second = if self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            Some(self.expr()?)
        } else {
            None
        };
        self.leave();
        self.expect(Token::RParen, "')'")?;

        match (name, second) {
            ("pow", Some(exponent)) => Ok(binary(BinaryOp::Pow, first, exponent)),
            ("atan2", Some(x)) => Ok(binary(BinaryOp::Atan2, first, x)),
            ("pow" | "atan2", None) => Err(ParseError::new(offset, format!("{}() takes 2 arguments", name))),
            (_, Some(_)) if Function::from_name(name).is_some() => {
                Err(ParseError::new(offset, format!("{}() takes 1 argument", name)))
            }
            (_, None) => match Function::from_name(name) {
                Some(func) => Ok(Expr::Call {
                    func,
                    arg: Box::new(first),
                }),
                None => Err(ParseError::new(offset, format!("unknown function '{}'", raw))),
            },
            (_, Some(_)) => Err(ParseError::new(offset, format!("unknown function '{}'", raw))),
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

/// Parse an integrand expression in `x`
pub fn parse(src: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(ParseError::new(0, "empty expression"));
    }
    if tokens.len() > MAX_TOKENS {
        return Err(ParseError::new(
            tokens[MAX_TOKENS].0,
            format!("expression longer than {} tokens", MAX_TOKENS),
        ));
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        end: src.len(),
    };
    let expr = parser.expr()?;

    if parser.pos < parser.tokens.len() {
        return Err(ParseError::new(parser.offset(), "unexpected trailing input"));
    }

    // Operator chains are built iteratively, so check the finished tree too
    if expr.depth() > MAX_DEPTH {
        return Err(ParseError::new(
            0,
            format!("expression nested deeper than {} levels", MAX_DEPTH),
        ));
    }

    Ok(expr)
}
