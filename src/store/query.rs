//! Query subset understood by the in-memory store:
//!
//! `SELECT * FROM c [WHERE c.p = @x | literal (AND ...)*] [ORDER BY c.p [ASC|DESC]]`
//!
//! Comparisons are `=` and `!=`. A property that is missing never matches.

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::types::{CosmosError, CosmosResult, Document, SqlParameter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Equal,
    NotEqual,
}

#[derive(Debug, Clone)]
enum Operand {
    Parameter(String),
    Literal(Value),
}

#[derive(Debug, Clone)]
struct Condition {
    path: Vec<String>,
    comparison: Comparison,
    operand: Operand,
}

#[derive(Debug, Clone)]
struct OrderBy {
    path: Vec<String>,
    descending: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct ParsedQuery {
    conditions: Vec<Condition>,
    order_by: Option<OrderBy>,
}

fn bad_query(message: impl Into<String>) -> CosmosError {
    CosmosError::bad_request(message)
}

struct Grammar {
    statement: Regex,
    and: Regex,
    comparison: Regex,
}

impl Grammar {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            statement: Regex::new(
                r"(?is)^\s*SELECT\s+\*\s+FROM\s+(\w+)(?:\s+WHERE\s+(.+?))?(?:\s+ORDER\s+BY\s+([\w.]+)(?:\s+(ASC|DESC))?)?\s*$",
            )?,
            and: Regex::new(r"(?i)\s+AND\s+")?,
            comparison: Regex::new(r"^\s*([\w.]+)\s*(!=|=)\s*(.+?)\s*$")?,
        })
    }
}

static GRAMMAR: OnceLock<Result<Grammar, regex::Error>> = OnceLock::new();

fn grammar() -> CosmosResult<&'static Grammar> {
    GRAMMAR
        .get_or_init(Grammar::compile)
        .as_ref()
        .map_err(|e| bad_query(format!("Query grammar error: {}", e)))
}

/// Split `c.a.b` into `["a", "b"]`, checking the alias.
fn property_path(expr: &str, alias: &str) -> CosmosResult<Vec<String>> {
    let mut parts = expr.split('.');
    if parts.next() != Some(alias) {
        return Err(bad_query(format!(
            "Identifier '{}' could not be resolved",
            expr
        )));
    }
    let path: Vec<String> = parts.map(str::to_string).collect();
    if path.is_empty() {
        return Err(bad_query(format!("Expected a property path, got '{}'", expr)));
    }
    Ok(path)
}

fn parse_operand(raw: &str) -> CosmosResult<Operand> {
    if let Some(name) = raw.strip_prefix('@') {
        return Ok(Operand::Parameter(format!("@{}", name)));
    }
    if let Some(inner) = raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return Ok(Operand::Literal(Value::String(inner.to_string())));
    }
    serde_json::from_str(raw)
        .map(Operand::Literal)
        .map_err(|_| bad_query(format!("Syntax error near '{}'", raw)))
}

pub(crate) fn parse(text: &str) -> CosmosResult<ParsedQuery> {
    let grammar = grammar()?;
    let caps = grammar
        .statement
        .captures(text)
        .ok_or_else(|| bad_query(format!("Unsupported query: {}", text.trim())))?;
    let alias = caps.get(1).map(|m| m.as_str()).unwrap_or("c");

    let mut conditions = Vec::new();
    if let Some(clause) = caps.get(2) {
        for part in grammar.and.split(clause.as_str()) {
            let c = grammar
                .comparison
                .captures(part)
                .ok_or_else(|| bad_query(format!("Unsupported predicate: {}", part.trim())))?;
            conditions.push(Condition {
                path: property_path(&c[1], alias)?,
                comparison: if &c[2] == "=" {
                    Comparison::Equal
                } else {
                    Comparison::NotEqual
                },
                operand: parse_operand(&c[3])?,
            });
        }
    }

    let order_by = match caps.get(3) {
        Some(expr) => Some(OrderBy {
            path: property_path(expr.as_str(), alias)?,
            descending: caps
                .get(4)
                .is_some_and(|dir| dir.as_str().eq_ignore_ascii_case("DESC")),
        }),
        None => None,
    };

    Ok(ParsedQuery {
        conditions,
        order_by,
    })
}

fn lookup<'a>(document: &'a Document, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = document.get(first)?;
    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

impl ParsedQuery {
    pub(crate) fn matches(&self, document: &Document, parameters: &[SqlParameter]) -> CosmosResult<bool> {
        for condition in &self.conditions {
            let expected = match &condition.operand {
                Operand::Literal(value) => value,
                Operand::Parameter(name) => parameters
                    .iter()
                    .find(|p| &p.name == name)
                    .map(|p| &p.value)
                    .ok_or_else(|| bad_query(format!("Parameter '{}' is not defined", name)))?,
            };
            let Some(actual) = lookup(document, &condition.path) else {
                return Ok(false);
            };
            let equal = values_equal(actual, expected);
            let keep = match condition.comparison {
                Comparison::Equal => equal,
                Comparison::NotEqual => !equal,
            };
            if !keep {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(crate) fn sort(&self, documents: &mut [Document]) {
        if let Some(order) = &self.order_by {
            documents.sort_by(|a, b| {
                let ordering = compare_values(lookup(a, &order.path), lookup(b, &order.path));
                if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }
    }
}
