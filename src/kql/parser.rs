//! Recursive-descent KQL parser.
//!
//! ```text
//! expr      := or
//! or        := and (OR and)*
//! and       := unary ((AND)? unary)*      -- adjacency is implicit AND
//! unary     := NOT unary | '(' expr ')' | clause | token
//! clause    := field ':' predicate
//! predicate := ('>'|'<'|'>='|'<=') num | '"' quoted '"' | wildcard | token
//! ```
//!
//! Precedence: NOT > AND > OR. Errors carry the 1-based column offset of the
//! offending token.

use crate::utils::ApiError;

use super::ast::{Clause, Expr, Predicate};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Quoted(String),
    Atom(String),
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    column: usize,
}

fn lex(input: &str) -> Result<Vec<Spanned>, ApiError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let column = i + 1;
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Spanned { token: Token::LParen, column });
                i += 1;
            }
            ')' => {
                tokens.push(Spanned { token: Token::RParen, column });
                i += 1;
            }
            '"' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != '"' {
                    end += 1;
                }
                if end == chars.len() {
                    return Err(ApiError::parse_error(column, "unterminated quote"));
                }
                tokens.push(Spanned {
                    token: Token::Quoted(chars[start..end].iter().collect()),
                    column,
                });
                i = end + 1;
            }
            _ => {
                let start = i;
                while i < chars.len()
                    && !chars[i].is_whitespace()
                    && chars[i] != '('
                    && chars[i] != ')'
                    && chars[i] != '"'
                {
                    i += 1;
                }
                tokens.push(Spanned {
                    token: Token::Atom(chars[start..i].iter().collect()),
                    column: start + 1,
                });
            }
        }
    }

    Ok(tokens)
}

pub fn parse(input: &str) -> Result<Expr, ApiError> {
    let tokens = lex(input)?;
    if tokens.is_empty() {
        return Err(ApiError::parse_error(1, "empty query"));
    }
    let mut parser = Parser { tokens, pos: 0, input_len: input.chars().count() };
    let expr = parser.parse_or()?;
    if let Some(extra) = parser.peek() {
        return Err(ApiError::parse_error(extra.column, "unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    input_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn end_column(&self) -> usize {
        self.input_len + 1
    }

    fn parse_or(&mut self) -> Result<Expr, ApiError> {
        let mut left = self.parse_and()?;
        while let Some(spanned) = self.peek() {
            if is_keyword(&spanned.token, "OR") {
                self.pos += 1;
                let right = self.parse_and()?;
                left = Expr::Or(Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ApiError> {
        let mut left = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(spanned) if is_keyword(&spanned.token, "AND") => {
                    self.pos += 1;
                    let right = self.parse_unary()?;
                    left = Expr::And(Box::new(left), Box::new(right));
                }
                // Adjacency: anything that can open a term is an implicit AND.
                Some(spanned)
                    if !is_keyword(&spanned.token, "OR")
                        && spanned.token != Token::RParen =>
                {
                    let right = self.parse_unary()?;
                    left = Expr::And(Box::new(left), Box::new(right));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ApiError> {
        let Some(spanned) = self.next() else {
            return Err(ApiError::parse_error(self.end_column(), "expected a term"));
        };

        if is_keyword(&spanned.token, "NOT") {
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }

        match spanned.token {
            Token::LParen => {
                let expr = self.parse_or()?;
                match self.next() {
                    Some(Spanned { token: Token::RParen, .. }) => Ok(expr),
                    Some(other) => {
                        Err(ApiError::parse_error(other.column, "expected closing parenthesis"))
                    }
                    None => Err(ApiError::parse_error(
                        self.end_column(),
                        "expected closing parenthesis",
                    )),
                }
            }
            Token::RParen => {
                Err(ApiError::parse_error(spanned.column, "unexpected closing parenthesis"))
            }
            Token::Quoted(text) => Ok(Expr::FreeText(text)),
            Token::Atom(atom) => self.parse_atom(atom, spanned.column),
        }
    }

    fn parse_atom(&mut self, atom: String, column: usize) -> Result<Expr, ApiError> {
        let Some((field, value)) = atom.split_once(':') else {
            return Ok(Expr::FreeText(atom));
        };

        if field.is_empty() {
            return Err(ApiError::parse_error(column, "missing field name before ':'"));
        }

        // `field:"quoted phrase"` arrives as two tokens.
        if value.is_empty() {
            return match self.next() {
                Some(Spanned { token: Token::Quoted(phrase), .. }) => Ok(Expr::Clause(Clause {
                    field: field.to_string(),
                    predicate: Predicate::Phrase(phrase),
                })),
                _ => Err(ApiError::parse_error(
                    column + field.len() + 1,
                    format!("missing value for field '{}'", field),
                )),
            };
        }

        let predicate = parse_predicate(value, column + field.len() + 1)?;
        Ok(Expr::Clause(Clause { field: field.to_string(), predicate }))
    }
}

fn parse_predicate(value: &str, column: usize) -> Result<Predicate, ApiError> {
    for (prefix, build) in [
        (">=", Predicate::Gte as fn(f64) -> Predicate),
        ("<=", Predicate::Lte as fn(f64) -> Predicate),
        (">", Predicate::Gt as fn(f64) -> Predicate),
        ("<", Predicate::Lt as fn(f64) -> Predicate),
    ] {
        if let Some(num) = value.strip_prefix(prefix) {
            let parsed: f64 = num.parse().map_err(|_| {
                ApiError::parse_error(column, format!("'{}' is not a number", num))
            })?;
            return Ok(build(parsed));
        }
    }

    if value.contains('*') || value.contains('?') {
        return Ok(Predicate::Wildcard(value.to_string()));
    }

    Ok(Predicate::Eq(value.to_string()))
}

fn is_keyword(token: &Token, keyword: &str) -> bool {
    matches!(token, Token::Atom(a) if a.eq_ignore_ascii_case(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_clause() {
        let expr = parse("log_type:API").unwrap();
        assert_eq!(
            expr,
            Expr::Clause(Clause {
                field: "log_type".into(),
                predicate: Predicate::Eq("API".into())
            })
        );
    }

    #[test]
    fn whitespace_is_implicit_and() {
        let expr = parse("log_type:API user:Demo").unwrap();
        assert!(matches!(expr, Expr::And(_, _)));
    }

    #[test]
    fn not_binds_tighter_than_and_than_or() {
        let expr = parse("NOT a:1 AND b:2 OR c:3").unwrap();
        // ((NOT a:1 AND b:2) OR c:3)
        match expr {
            Expr::Or(left, right) => {
                assert!(matches!(*left, Expr::And(_, _)));
                assert!(matches!(*right, Expr::Clause(_)));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn parses_ranges_and_wildcards() {
        let expr = parse("duration_ms:>=1500 form:HPD*").unwrap();
        match expr {
            Expr::And(left, right) => {
                assert_eq!(
                    *left,
                    Expr::Clause(Clause {
                        field: "duration_ms".into(),
                        predicate: Predicate::Gte(1500.0)
                    })
                );
                assert_eq!(
                    *right,
                    Expr::Clause(Clause {
                        field: "form".into(),
                        predicate: Predicate::Wildcard("HPD*".into())
                    })
                );
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn parses_quoted_phrase_clause() {
        let expr = parse("sql_statement:\"SELECT 1\"").unwrap();
        assert_eq!(
            expr,
            Expr::Clause(Clause {
                field: "sql_statement".into(),
                predicate: Predicate::Phrase("SELECT 1".into())
            })
        );
    }

    #[test]
    fn reports_column_offsets() {
        let err = parse("user:Demo AND duration_ms:>abc").unwrap_err();
        match err {
            ApiError::ParseError { column, .. } => assert_eq!(column, 27),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_unbalanced_parens() {
        assert!(matches!(parse("(a:1 OR b:2"), Err(ApiError::ParseError { .. })));
        assert!(matches!(parse("a:1)"), Err(ApiError::ParseError { .. })));
    }

    #[test]
    fn stringify_reparses_to_equal_ast() {
        for query in [
            "log_type:API",
            "log_type:API AND user:Demo",
            "NOT queue:Fast OR duration_ms:>100",
            "(a:1 OR b:2) AND NOT c:3",
            "form:HPD* sql_statement:\"BEGIN TRANSACTION\"",
            "slow timeout user:Demo",
        ] {
            let first = parse(query).unwrap();
            let second = parse(&first.to_string()).unwrap();
            assert_eq!(first, second, "round-trip failed for {query}");
        }
    }
}
