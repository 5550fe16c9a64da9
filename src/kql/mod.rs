//! KQL query engine.
//!
//! Parses a lucene-like `field:value` language and lowers it into two
//! parallel artifacts: a predicate tree rendered as a ClickHouse `WHERE`
//! fragment with bound parameters, and an optional full-text query over the
//! secondary index. The OLAP filter is always produced; the full-text query
//! only when a text-flagged field is referenced or a free token appears
//! outside any clause.

pub mod ast;
pub mod parser;

pub use ast::{Clause, Expr, Predicate};
pub use parser::parse;

use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Numeric,
    /// Large free-text columns served by the secondary index.
    FullText,
}

pub struct FieldSpec {
    pub name: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
    /// Listed by the autocomplete field catalogue.
    pub suggest: bool,
}

/// Searchable fields. The first ten form the autocomplete catalogue.
pub const FIELDS: &[FieldSpec] = &[
    FieldSpec { name: "log_type", column: "log_type", kind: FieldKind::Text, description: "Record type: API, SQL, FLTR or ESCL", suggest: true },
    FieldSpec { name: "user", column: "user", kind: FieldKind::Text, description: "AR user that issued the call", suggest: true },
    FieldSpec { name: "queue", column: "queue", kind: FieldKind::Text, description: "Server queue that handled the call", suggest: true },
    FieldSpec { name: "form", column: "form", kind: FieldKind::Text, description: "Form or schema the operation targeted", suggest: true },
    FieldSpec { name: "sql_table", column: "sql_table", kind: FieldKind::Text, description: "Table referenced by a SQL statement", suggest: true },
    FieldSpec { name: "trace_id", column: "trace_id", kind: FieldKind::Text, description: "Transaction trace identifier", suggest: true },
    FieldSpec { name: "rpc_id", column: "rpc_id", kind: FieldKind::Text, description: "RPC call identifier", suggest: true },
    FieldSpec { name: "thread_id", column: "thread_id", kind: FieldKind::Text, description: "Server thread identifier", suggest: true },
    FieldSpec { name: "duration_ms", column: "duration_ms", kind: FieldKind::Numeric, description: "Call duration in milliseconds", suggest: true },
    FieldSpec { name: "line_number", column: "line_number", kind: FieldKind::Numeric, description: "Line number within the source file", suggest: true },
    FieldSpec { name: "raw_text", column: "raw_text", kind: FieldKind::FullText, description: "Raw log line", suggest: false },
    FieldSpec { name: "sql_statement", column: "sql_statement", kind: FieldKind::FullText, description: "Full SQL statement", suggest: false },
    FieldSpec { name: "error_message", column: "error_message", kind: FieldKind::FullText, description: "Error text attached to the entry", suggest: false },
];

pub fn field_spec(name: &str) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|f| f.name == name)
}

/// Parameter bound into the lowered OLAP filter, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Str(String),
    Num(f64),
}

/// The two lowered artifacts of one parsed query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// `WHERE` fragment with `?` placeholders, never empty.
    pub filter_sql: String,
    pub params: Vec<SqlValue>,
    /// Space-joined terms for the secondary full-text index.
    pub full_text: Option<String>,
}

/// Parse and lower in one step.
pub fn compile(query: &str) -> ApiResult<QueryPlan> {
    let expr = parse(query)?;
    lower(&expr)
}

/// Lower a parsed expression. Fails with `unknown_field` for clauses outside
/// the catalogue and `range_invalid` when a range operator is applied to a
/// non-numeric field.
pub fn lower(expr: &Expr) -> ApiResult<QueryPlan> {
    let mut lowering = Lowering::default();
    let filter_sql = lowering.walk(expr)?;
    let full_text = if lowering.fts_terms.is_empty() {
        None
    } else {
        Some(lowering.fts_terms.join(" "))
    };
    Ok(QueryPlan { filter_sql, params: lowering.params, full_text })
}

#[derive(Default)]
struct Lowering {
    params: Vec<SqlValue>,
    fts_terms: Vec<String>,
}

impl Lowering {
    fn walk(&mut self, expr: &Expr) -> ApiResult<String> {
        match expr {
            Expr::And(a, b) => {
                let (a, b) = (self.walk(a)?, self.walk(b)?);
                Ok(format!("({} AND {})", a, b))
            }
            Expr::Or(a, b) => {
                let (a, b) = (self.walk(a)?, self.walk(b)?);
                Ok(format!("({} OR {})", a, b))
            }
            Expr::Not(inner) => {
                let inner = self.walk(inner)?;
                Ok(format!("(NOT {})", inner))
            }
            Expr::Clause(clause) => self.lower_clause(clause),
            Expr::FreeText(token) => {
                self.fts_terms.push(token.clone());
                self.params.push(SqlValue::Str(token.clone()));
                Ok("(positionCaseInsensitive(raw_text, ?) > 0)".to_string())
            }
        }
    }

    fn lower_clause(&mut self, clause: &Clause) -> ApiResult<String> {
        let spec = field_spec(&clause.field)
            .ok_or_else(|| ApiError::UnknownField(clause.field.clone()))?;

        match (&clause.predicate, spec.kind) {
            (Predicate::Gt(_) | Predicate::Lt(_) | Predicate::Gte(_) | Predicate::Lte(_), kind)
                if kind != FieldKind::Numeric =>
            {
                Err(ApiError::RangeInvalid(clause.field.clone()))
            }
            (Predicate::Gt(n), _) => Ok(self.range(spec, ">", *n)),
            (Predicate::Lt(n), _) => Ok(self.range(spec, "<", *n)),
            (Predicate::Gte(n), _) => Ok(self.range(spec, ">=", *n)),
            (Predicate::Lte(n), _) => Ok(self.range(spec, "<=", *n)),
            (Predicate::Eq(value), FieldKind::Numeric) => {
                let n: f64 = value.parse().map_err(|_| {
                    ApiError::validation(format!(
                        "field '{}' is numeric, got '{}'",
                        clause.field, value
                    ))
                })?;
                Ok(self.range(spec, "=", n))
            }
            (Predicate::Eq(value), FieldKind::Text) => {
                self.params.push(SqlValue::Str(value.clone()));
                Ok(format!("({} = ?)", spec.column))
            }
            (Predicate::Eq(value) | Predicate::Phrase(value), FieldKind::FullText) => {
                self.fts_terms.push(value.clone());
                self.params.push(SqlValue::Str(value.clone()));
                Ok(format!("(positionCaseInsensitive({}, ?) > 0)", spec.column))
            }
            (Predicate::Phrase(value), _) => {
                self.params.push(SqlValue::Str(value.clone()));
                Ok(format!("({} = ?)", spec.column))
            }
            (Predicate::Wildcard(pattern), kind) => {
                if kind == FieldKind::FullText {
                    self.fts_terms.push(pattern.clone());
                }
                self.params.push(SqlValue::Str(wildcard_to_like(pattern)));
                Ok(format!("({} LIKE ?)", spec.column))
            }
        }
    }

    fn range(&mut self, spec: &FieldSpec, op: &str, value: f64) -> String {
        self.params.push(SqlValue::Num(value));
        format!("({} {} ?)", spec.column, op)
    }
}

/// `*`/`?` wildcards to SQL LIKE, escaping LIKE metacharacters in the rest.
fn wildcard_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' => out.push_str("\\%"),
            '_' => out.push_str("\\_"),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out
}

/// Autocomplete: the human-readable field catalogue.
pub fn field_catalogue() -> Vec<(&'static str, &'static str)> {
    FIELDS
        .iter()
        .filter(|f| f.suggest)
        .map(|f| (f.name, f.description))
        .collect()
}

/// When an incomplete query ends in `field:`, the caller should fetch value
/// suggestions for that field.
pub fn trailing_field(input: &str) -> Option<&'static FieldSpec> {
    let tail = input.trim_end();
    let last = tail.rsplit(|c: char| c.is_whitespace() || c == '(').next()?;
    let field = last.strip_suffix(':')?;
    field_spec(field).filter(|f| f.suggest)
}
