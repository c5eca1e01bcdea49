use std::cmp::Ordering;
use regex::Regex;
use serde_json::Value;
use crate::core::error::{Error, Result};
use crate::query::dialect::{CursorFilter, CursorOp};

/// Resolve a dotted path (`address.city`) inside a document.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Compare two values of the same kind. Mixed kinds are unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return Some(x.cmp(&y));
            }
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                match compare_values(left, right)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(x.len().cmp(&y.len()))
        }
        (Value::Object(_), Value::Object(_)) => (a == b).then_some(Ordering::Equal),
        _ => None,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order used for sorting: kinds are ranked first, then compared
/// within the kind. A missing field sorts as null.
pub fn total_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    type_rank(a)
        .cmp(&type_rank(b))
        .then_with(|| compare_values(a, b).unwrap_or_else(|| a.to_string().cmp(&b.to_string())))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Some(Ordering::Equal)
}

/// Stable sort by `(field, ascending)` keys in priority order.
pub fn sort_documents(docs: &mut [Value], sort: &[(String, bool)]) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| compare_by(a, b, sort));
}

pub fn compare_by(a: &Value, b: &Value, sort: &[(String, bool)]) -> Ordering {
    for (field, ascending) in sort {
        let ord = total_order(lookup(a, field), lookup(b, field));
        let ord = if *ascending { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[derive(Debug)]
enum FieldTest {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Exists(bool),
    Regex(Regex),
}

impl FieldTest {
    fn matches(&self, field: Option<&Value>) -> bool {
        match self {
            FieldTest::Exists(expected) => field.is_some() == *expected,
            FieldTest::Ne(value) => field.is_none_or(|f| !values_equal(f, value)),
            FieldTest::Eq(value) => field.is_some_and(|f| values_equal(f, value)),
            FieldTest::Gt(value) => ordered(field, value, |o| o == Ordering::Greater),
            FieldTest::Gte(value) => ordered(field, value, |o| o != Ordering::Less),
            FieldTest::Lt(value) => ordered(field, value, |o| o == Ordering::Less),
            FieldTest::Lte(value) => ordered(field, value, |o| o != Ordering::Greater),
            FieldTest::In(values) => {
                field.is_some_and(|f| values.iter().any(|v| values_equal(f, v)))
            }
            FieldTest::Regex(regex) => matches!(field, Some(Value::String(s)) if regex.is_match(s)),
        }
    }
}

fn ordered(field: Option<&Value>, value: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    field
        .and_then(|f| compare_values(f, value))
        .is_some_and(accept)
}

#[derive(Debug)]
enum Predicate {
    All,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Field { path: String, tests: Vec<FieldTest> },
}

impl Predicate {
    fn matches(&self, doc: &Value) -> bool {
        match self {
            Predicate::All => true,
            Predicate::And(children) => children.iter().all(|p| p.matches(doc)),
            Predicate::Or(children) => children.iter().any(|p| p.matches(doc)),
            Predicate::Field { path, tests } => {
                let field = lookup(doc, path);
                tests.iter().all(|t| t.matches(field))
            }
        }
    }
}

/// Evaluates an operator-language filter document against stored
/// documents. Compiled once, reused for every candidate.
#[derive(Debug)]
pub struct DocumentMatcher {
    predicate: Predicate,
}

impl DocumentMatcher {
    pub fn compile(filter: &Value) -> Result<Self> {
        Ok(DocumentMatcher {
            predicate: parse_filter(filter)?,
        })
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.predicate.matches(doc)
    }
}

fn parse_filter(filter: &Value) -> Result<Predicate> {
    let map = filter
        .as_object()
        .ok_or_else(|| Error::invalid_query(format!("filter must be an object: {}", filter)))?;
    if map.is_empty() {
        return Ok(Predicate::All);
    }

    let mut clauses = Vec::with_capacity(map.len());
    for (key, value) in map {
        let clause = match key.as_str() {
            "$and" => Predicate::And(parse_list(key, value)?),
            "$or" => Predicate::Or(parse_list(key, value)?),
            op if op.starts_with('$') => {
                return Err(Error::invalid_query(format!("unknown top-level operator {}", op)))
            }
            path => Predicate::Field {
                path: path.to_string(),
                tests: parse_tests(value)?,
            },
        };
        clauses.push(clause);
    }

    if clauses.len() == 1 {
        if let Some(only) = clauses.pop() {
            return Ok(only);
        }
    }
    Ok(Predicate::And(clauses))
}

fn parse_list(key: &str, value: &Value) -> Result<Vec<Predicate>> {
    value
        .as_array()
        .ok_or_else(|| Error::invalid_query(format!("{} needs an array", key)))?
        .iter()
        .map(parse_filter)
        .collect()
}

fn parse_tests(value: &Value) -> Result<Vec<FieldTest>> {
    let operators = match value {
        Value::Object(map) if map.keys().all(|k| k.starts_with('$')) && !map.is_empty() => map,
        // a bare value is an equality test
        other => return Ok(vec![FieldTest::Eq(other.clone())]),
    };

    let mut tests = Vec::with_capacity(operators.len());
    for (op, operand) in operators {
        tests.push(match op.as_str() {
            "$eq" => FieldTest::Eq(operand.clone()),
            "$ne" => FieldTest::Ne(operand.clone()),
            "$gt" => FieldTest::Gt(operand.clone()),
            "$gte" => FieldTest::Gte(operand.clone()),
            "$lt" => FieldTest::Lt(operand.clone()),
            "$lte" => FieldTest::Lte(operand.clone()),
            "$in" => match operand {
                Value::Array(items) => FieldTest::In(items.clone()),
                _ => return Err(Error::invalid_query("$in needs an array".to_string())),
            },
            "$exists" => FieldTest::Exists(operand.as_bool().unwrap_or(true)),
            "$regex" => match operand {
                Value::String(pattern) => FieldTest::Regex(Regex::new(pattern)?),
                _ => return Err(Error::invalid_query("$regex needs a string".to_string())),
            },
            other => return Err(Error::invalid_query(format!("unknown operator {}", other))),
        });
    }
    Ok(tests)
}

/// Evaluate a cursor-dialect filter.
pub fn cursor_matches(filter: &CursorFilter, doc: &Value) -> bool {
    match filter {
        CursorFilter::All => true,
        CursorFilter::And(children) => children.iter().all(|f| cursor_matches(f, doc)),
        CursorFilter::Or(children) => children.iter().any(|f| cursor_matches(f, doc)),
        CursorFilter::Field { field, op, value } => {
            let current = lookup(doc, field);
            match op {
                CursorOp::Eq => current.is_some_and(|c| values_equal(c, value)),
                CursorOp::Ne => current.is_some_and(|c| !values_equal(c, value)),
                CursorOp::Gt => ordered(current, value, |o| o == Ordering::Greater),
                CursorOp::Gte => ordered(current, value, |o| o != Ordering::Less),
                CursorOp::Lt => ordered(current, value, |o| o == Ordering::Less),
                CursorOp::Lte => ordered(current, value, |o| o != Ordering::Greater),
                CursorOp::In => match value {
                    Value::Array(items) => {
                        current.is_some_and(|c| items.iter().any(|v| values_equal(c, v)))
                    }
                    _ => false,
                },
            }
        }
    }
}
