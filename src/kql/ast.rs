//! KQL abstract syntax tree.
//!
//! `Display` renders a fully parenthesized form whose re-parse is structurally
//! equal to the original AST, which is what the saved-search round-trip
//! relies on.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Clause(Clause),
    /// A bare token outside any `field:value` clause; searched against the
    /// full-text index.
    FreeText(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub field: String,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String),
    Phrase(String),
    /// `*` and `?` wildcards.
    Wildcard(String),
    Gt(f64),
    Lt(f64),
    Gte(f64),
    Lte(f64),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::And(a, b) => write!(f, "({} AND {})", a, b),
            Expr::Or(a, b) => write!(f, "({} OR {})", a, b),
            Expr::Not(inner) => write!(f, "NOT {}", inner),
            Expr::Clause(clause) => write!(f, "{}", clause),
            Expr::FreeText(token) => write!(f, "{}", token),
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.predicate)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Eq(v) => write!(f, "{}", v),
            Predicate::Phrase(v) => write!(f, "\"{}\"", v),
            Predicate::Wildcard(v) => write!(f, "{}", v),
            Predicate::Gt(n) => write!(f, ">{}", n),
            Predicate::Lt(n) => write!(f, "<{}", n),
            Predicate::Gte(n) => write!(f, ">={}", n),
            Predicate::Lte(n) => write!(f, "<={}", n),
        }
    }
}
