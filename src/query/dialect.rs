use regex::Regex;
use serde::{Serialize, Deserialize};
use serde_json::{json, Map, Value};
use crate::core::error::{Error, Result};
use crate::query::ast::{Condition, Operator};
use crate::query::compiler::Dialect;

/// Filter documents in the clustered store's operator language.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentDialect;

impl DocumentDialect {
    fn comparison(field: &str, operator: Operator, value: &Value) -> Result<Value> {
        let op = match operator {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::In => {
                if !value.is_array() {
                    return Err(Error::invalid_query(format!(
                        "`in` on `{}` needs an array, got {}", field, value
                    )));
                }
                "$in"
            }
            Operator::Regex => {
                let pattern = value.as_str().ok_or_else(|| {
                    Error::invalid_query(format!("regex on `{}` needs a string pattern", field))
                })?;
                Regex::new(pattern)?;
                "$regex"
            }
            soft => return Self::comparison(field, soft.hard(), value),
        };
        Ok(single(field, single(op, value.clone())))
    }
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

impl Dialect for DocumentDialect {
    type Filter = Value;

    fn match_all(&self) -> Value {
        Value::Object(Map::new())
    }

    fn all_of(&self, filters: Vec<Value>) -> Value {
        json!({ "$and": filters })
    }

    fn any_of(&self, filters: Vec<Value>) -> Value {
        json!({ "$or": filters })
    }

    fn leaf(&self, condition: &Condition) -> Result<Value> {
        let field = condition.field.as_str();
        let compared = Self::comparison(field, condition.operator, &condition.value)?;
        if condition.operator.is_soft() {
            let missing = single(field, json!({ "$exists": false }));
            return Ok(json!({ "$or": [missing, compared] }));
        }
        Ok(compared)
    }
}

/// Predicates a forward-cursor backend can evaluate natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CursorFilter {
    All,
    Field { field: String, op: CursorOp, value: Value },
    And(Vec<CursorFilter>),
    Or(Vec<CursorFilter>),
}

/// Dialect of the cursor-only store: no missing-field semantics and no
/// pattern matching.
#[derive(Debug, Default, Clone, Copy)]
pub struct CursorDialect;

impl Dialect for CursorDialect {
    type Filter = CursorFilter;

    fn match_all(&self) -> CursorFilter {
        CursorFilter::All
    }

    fn all_of(&self, filters: Vec<CursorFilter>) -> CursorFilter {
        CursorFilter::And(filters)
    }

    fn any_of(&self, filters: Vec<CursorFilter>) -> CursorFilter {
        CursorFilter::Or(filters)
    }

    fn leaf(&self, condition: &Condition) -> Result<CursorFilter> {
        let op = match condition.operator {
            Operator::Eq => CursorOp::Eq,
            Operator::Ne => CursorOp::Ne,
            Operator::Gt => CursorOp::Gt,
            Operator::Gte => CursorOp::Gte,
            Operator::Lt => CursorOp::Lt,
            Operator::Lte => CursorOp::Lte,
            Operator::In if condition.value.is_array() => CursorOp::In,
            Operator::In => {
                return Err(Error::invalid_query(format!(
                    "`in` on `{}` needs an array", condition.field
                )))
            }
            other => {
                return Err(Error::invalid_query(format!(
                    "query not satisfiable: `{}` on `{}`", other, condition.field
                )))
            }
        };
        Ok(CursorFilter::Field {
            field: condition.field.clone(),
            op,
            value: condition.value.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::query::ast::RuleSet;
    use crate::query::compiler::compile;

    #[test]
    fn document_dialect_shapes() {
        let rules = RuleSet::and()
            .with_condition("age", Operator::Gte, 18)
            .with_group(RuleSet::or()
                .with_condition("city", Operator::Eq, "Hanoi")
                .with_condition("tags", Operator::In, json!(["a", "b"])));
        let filter = compile(&DocumentDialect, &rules).unwrap();
        assert_eq!(filter, json!({
            "$and": [
                {"age": {"$gte": 18}},
                {"$or": [{"city": {"$eq": "Hanoi"}}, {"tags": {"$in": ["a", "b"]}}]}
            ]
        }));
    }

    #[test]
    fn soft_operator_allows_missing_field() {
        let rules = RuleSet::and().with_condition("deleted_at", Operator::SoftGt, 5);
        let filter = compile(&DocumentDialect, &rules).unwrap();
        assert_eq!(filter, json!({
            "$or": [{"deleted_at": {"$exists": false}}, {"deleted_at": {"$gt": 5}}]
        }));
    }

    #[test]
    fn regex_is_validated() {
        let ok = RuleSet::and().with_condition("name", Operator::Regex, "^ab+");
        assert_eq!(
            compile(&DocumentDialect, &ok).unwrap(),
            json!({"name": {"$regex": "^ab+"}})
        );
        let bad = RuleSet::and().with_condition("name", Operator::Regex, "(unclosed");
        assert_eq!(compile(&DocumentDialect, &bad).unwrap_err().kind, ErrorKind::InvalidQuery);
        let not_array = RuleSet::and().with_condition("x", Operator::In, 3);
        assert!(compile(&DocumentDialect, &not_array).is_err());
    }

    #[test]
    fn cursor_dialect_rejects_soft_and_regex() {
        for op in [Operator::SoftEq, Operator::SoftLt, Operator::SoftGt, Operator::Regex] {
            let rules = RuleSet::and().with_condition("f", op, "v");
            let err = compile(&CursorDialect, &rules).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidQuery);
        }
        let rules = RuleSet::or()
            .with_condition("a", Operator::Lt, 1)
            .with_condition("b", Operator::Ne, 2);
        assert!(matches!(compile(&CursorDialect, &rules).unwrap(), CursorFilter::Or(v) if v.len() == 2));
    }
}
