//! The search expression language: a small boolean language over category
//! tags, attribute comparisons and album references.
//!
//! An expression is parsed once into an [`Expr`] tree and evaluated against
//! an open shelf, yielding a set of object ids. See [`parser`] for the
//! grammar.

pub mod parser;
pub mod scanner;

mod eval;

pub use parser::{parse, CompareOp, Expr};
pub use scanner::{tokenize, Spanned, Token};

pub(crate) use eval::evaluate;
