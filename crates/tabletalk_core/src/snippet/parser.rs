use crate::error::{Error, Result};
use crate::table::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Assign,
    Dot,
    Comma,
    LParen,
    RParen,
    Newline,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "`{s}`"),
            Token::Int(i) => write!(f, "`{i}`"),
            Token::Float(x) => write!(f, "`{x}`"),
            Token::Str(s) => write!(f, "\"{s}\""),
            Token::Assign => write!(f, "`=`"),
            Token::Dot => write!(f, "`.`"),
            Token::Comma => write!(f, "`,`"),
            Token::LParen => write!(f, "`(`"),
            Token::RParen => write!(f, "`)`"),
            Token::Newline => write!(f, "end of line"),
            Token::Eq => write!(f, "`==`"),
            Token::Ne => write!(f, "`!=`"),
            Token::Lt => write!(f, "`<`"),
            Token::Le => write!(f, "`<=`"),
            Token::Gt => write!(f, "`>`"),
            Token::Ge => write!(f, "`>=`"),
            Token::And => write!(f, "`and`"),
            Token::Or => write!(f, "`or`"),
            Token::Not => write!(f, "`not`"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `table`, a prior binding, or (inside a predicate) a column name.
    Ident(String),
    Literal(Value),
    /// `recv.name(args)` when `recv` is set, a bare helper call otherwise.
    Call {
        recv: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
}

/// `target = expr`
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub target: String,
    pub expr: Expr,
}

fn err(msg: impl Into<String>) -> Error {
    Error::Snippet(msg.into())
}

pub fn lex(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' => {
                chars.next();
            }
            '\n' | ';' => {
                chars.next();
                if tokens.last() != Some(&Token::Newline) {
                    tokens.push(Token::Newline);
                }
            }
            '#' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Eq);
                } else {
                    tokens.push(Token::Assign);
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    return Err(err("unexpected `!`; use `!=` or `not`"));
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some('"') => s.push('"'),
                            Some('\\') => s.push('\\'),
                            Some(other) => {
                                s.push('\\');
                                s.push(other);
                            }
                            None => break,
                        },
                        other => s.push(other),
                    }
                }
                if !closed {
                    return Err(err("unterminated string literal"));
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || c == '-' => {
                chars.next();
                let mut s = String::new();
                s.push(c);
                if c == '-' && !chars.peek().map(|n| n.is_ascii_digit()).unwrap_or(false) {
                    return Err(err("unexpected `-`; the language has no arithmetic"));
                }
                let mut is_float = false;
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_digit() {
                        s.push(n);
                        chars.next();
                    } else if n == '.' && !is_float {
                        // Lookahead: `3.head(...)` must stay Int + Dot.
                        let mut ahead = chars.clone();
                        ahead.next();
                        if ahead.peek().map(|d| d.is_ascii_digit()).unwrap_or(false) {
                            is_float = true;
                            s.push(n);
                            chars.next();
                        } else {
                            break;
                        }
                    } else {
                        break;
                    }
                }
                if is_float {
                    let v: f64 = s.parse().map_err(|_| err(format!("bad number `{s}`")))?;
                    tokens.push(Token::Float(v));
                } else {
                    let v: i64 = s.parse().map_err(|_| err(format!("bad number `{s}`")))?;
                    tokens.push(Token::Int(v));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut s = String::new();
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        s.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match s.as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    "not" => tokens.push(Token::Not),
                    "true" => tokens.push(Token::Ident("true".into())),
                    "false" => tokens.push(Token::Ident("false".into())),
                    _ => tokens.push(Token::Ident(s)),
                }
            }
            other => return Err(err(format!("unexpected character `{other}`"))),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, want: Token) -> Result<()> {
        match self.next() {
            Some(ref t) if *t == want => Ok(()),
            Some(t) => Err(err(format!("expected {want}, found {t}"))),
            None => Err(err(format!("expected {want}, found end of snippet"))),
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek() == Some(&Token::Newline) {
            self.pos += 1;
        }
    }

    fn stmt(&mut self) -> Result<Stmt> {
        let target = match self.next() {
            Some(Token::Ident(name)) => name,
            Some(t) => return Err(err(format!("expected an assignment, found {t}"))),
            None => return Err(err("expected an assignment, found end of snippet")),
        };
        self.expect(Token::Assign)
            .map_err(|_| err(format!("expected `=` after `{target}`; every statement is an assignment")))?;
        let expr = self.or_expr()?;
        match self.peek() {
            None | Some(Token::Newline) => Ok(Stmt { target, expr }),
            Some(t) => Err(err(format!("unexpected {t} after expression"))),
        }
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let rhs = self.and_expr()?;
            lhs = Expr::Binary { op: BinOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.not_expr()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let rhs = self.not_expr()?;
            lhs = Expr::Binary { op: BinOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.cmp_expr()
    }

    fn cmp_expr(&mut self) -> Result<Expr> {
        let lhs = self.postfix()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.next();
        let rhs = self.postfix()?;
        Ok(Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        while self.peek() == Some(&Token::Dot) {
            self.next();
            let name = match self.next() {
                Some(Token::Ident(name)) => name,
                Some(t) => return Err(err(format!("expected a method name after `.`, found {t}"))),
                None => return Err(err("expected a method name after `.`")),
            };
            self.expect(Token::LParen)?;
            let args = self.args()?;
            expr = Expr::Call { recv: Some(Box::new(expr)), name, args };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Ident(name)) => {
                if name == "true" {
                    return Ok(Expr::Literal(Value::Bool(true)));
                }
                if name == "false" {
                    return Ok(Expr::Literal(Value::Bool(false)));
                }
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    let args = self.args()?;
                    Ok(Expr::Call { recv: None, name, args })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Some(Token::Int(i)) => Ok(Expr::Literal(Value::Int(i))),
            Some(Token::Float(x)) => Ok(Expr::Literal(Value::Float(x))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(t) => Err(err(format!("unexpected {t}"))),
            None => Err(err("unexpected end of snippet")),
        }
    }

    fn args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.next();
            return Ok(args);
        }
        loop {
            args.push(self.or_expr()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                Some(t) => return Err(err(format!("expected `,` or `)`, found {t}"))),
                None => return Err(err("unterminated argument list")),
            }
        }
        Ok(args)
    }
}

/// Parse a snippet into assignment statements.
pub fn parse(src: &str) -> Result<Vec<Stmt>> {
    let tokens = lex(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut stmts = Vec::new();
    loop {
        parser.skip_newlines();
        if parser.peek().is_none() {
            break;
        }
        stmts.push(parser.stmt()?);
    }
    Ok(stmts)
}
