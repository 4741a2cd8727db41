//! Recursive descent parser for search expressions.
//!
//! Grammar (LL(1), lowest precedence first):
//!
//! ```text
//! searchexpr ::= expr EOF
//! expr       ::= andexpr ("or" andexpr)*
//! andexpr    ::= notexpr ("and" notexpr)*
//! notexpr    ::= "not" term | term
//! term       ::= bareword                   (category, descendants included)
//!              | "exactly" bareword         (category, exact assignment)
//!              | "/" bareword               (album reference)
//!              | "@" bareword OP value      (attribute comparison)
//!              | "(" expr ")"
//! OP         ::= "=" | "!=" | "<" | "<=" | ">" | ">="
//! value      ::= bareword | quoted string
//! ```

use crate::error::{Result, ShelfError};
use crate::search::scanner::{tokenize, Spanned, Token};

/// Attribute comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// The SQL spelling; values are always bound as parameters.
    pub fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// A parsed search expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    /// Category membership. Without `exactly` the category's descendants
    /// count as well.
    Category { tag: String, exactly: bool },
    /// Transitive membership of the album with this tag.
    Album(String),
    /// Case-insensitive attribute comparison.
    Attribute {
        name: String,
        op: CompareOp,
        value: String,
    },
}

/// Parse a search expression into an `Expr` tree.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    let end = parser.next();
    if end.token != Token::Eof {
        return Err(parse_error(
            end,
            "expected end of expression or conjunction",
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Spanned {
        let spanned = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        self.pos += 1;
        spanned
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut terms = vec![self.andexpr()?];
        while *self.peek() == Token::Or {
            self.next();
            terms.push(self.andexpr()?);
        }
        Ok(if terms.len() == 1 {
            terms.pop().unwrap()
        } else {
            Expr::Or(terms)
        })
    }

    fn andexpr(&mut self) -> Result<Expr> {
        let mut terms = vec![self.notexpr()?];
        while *self.peek() == Token::And {
            self.next();
            terms.push(self.notexpr()?);
        }
        Ok(if terms.len() == 1 {
            terms.pop().unwrap()
        } else {
            Expr::And(terms)
        })
    }

    fn notexpr(&mut self) -> Result<Expr> {
        if *self.peek() == Token::Not {
            self.next();
            Ok(Expr::Not(Box::new(self.term()?)))
        } else {
            self.term()
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let spanned = self.next();
        match spanned.token {
            Token::Bareword(tag) => Ok(Expr::Category {
                tag,
                exactly: false,
            }),
            Token::Exactly => {
                let spanned = self.next();
                match spanned.token {
                    Token::Bareword(tag) => Ok(Expr::Category { tag, exactly: true }),
                    _ => Err(parse_error(
                        spanned,
                        "expected category tag after \"exactly\"",
                    )),
                }
            }
            Token::Album(tag) => Ok(Expr::Album(tag)),
            Token::Attribute(name) => {
                let spanned = self.next();
                let op = match spanned.token {
                    Token::Eq => CompareOp::Eq,
                    Token::Ne => CompareOp::Ne,
                    Token::Lt => CompareOp::Lt,
                    Token::Le => CompareOp::Le,
                    Token::Gt => CompareOp::Gt,
                    Token::Ge => CompareOp::Ge,
                    _ => return Err(parse_error(spanned, "expected comparison operator")),
                };
                let spanned = self.next();
                let value = match spanned.token {
                    Token::Bareword(value) | Token::Str(value) => value,
                    _ => {
                        return Err(parse_error(
                            spanned,
                            "expected bareword or quoted string",
                        ))
                    }
                };
                Ok(Expr::Attribute { name, op, value })
            }
            Token::LParen => {
                let expr = self.expr()?;
                let spanned = self.next();
                if spanned.token != Token::RParen {
                    return Err(parse_error(
                        spanned,
                        "expected right parenthesis or conjunction",
                    ));
                }
                Ok(expr)
            }
            _ => Err(parse_error(spanned, "expected expression")),
        }
    }
}

fn parse_error(spanned: Spanned, reason: &str) -> ShelfError {
    ShelfError::Parse {
        offset: spanned.offset,
        reason: reason.to_owned(),
    }
}
