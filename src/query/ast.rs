use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use crate::core::error::{Error, Result};

/// Comparison operators a condition leaf can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,      // =
    Ne,      // !=
    Gt,      // >
    Gte,     // >=
    Lt,      // <
    Lte,     // <=
    In,      // in
    SoftEq,  // += (also matches a missing field)
    SoftLt,  // +<
    SoftGt,  // +>
    Regex,   // regex
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::In => "in",
            Operator::SoftEq => "+=",
            Operator::SoftLt => "+<",
            Operator::SoftGt => "+>",
            Operator::Regex => "regex",
        }
    }

    /// Soft operators also match documents that lack the field.
    pub fn is_soft(&self) -> bool {
        matches!(self, Operator::SoftEq | Operator::SoftLt | Operator::SoftGt)
    }

    /// The comparison a soft operator applies when the field is present.
    pub fn hard(&self) -> Operator {
        match self {
            Operator::SoftEq => Operator::Eq,
            Operator::SoftLt => Operator::Lt,
            Operator::SoftGt => Operator::Gt,
            other => *other,
        }
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "=" | "==" => Operator::Eq,
            "!=" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            "in" => Operator::In,
            "+=" => Operator::SoftEq,
            "+<" => Operator::SoftLt,
            "+>" => Operator::SoftGt,
            "regex" => Operator::Regex,
            other => return Err(Error::invalid_query(format!("unknown operator `{}`", other))),
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Combinator {
    And,
    Or,
}

/// Leaf of the condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Condition {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

/// A node is either a leaf condition or a nested group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rule {
    Leaf(Condition),
    Group(RuleSet),
}

/// AND/OR group of rules. An empty group matches every document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub combinator: Combinator,
    pub children: Vec<Rule>,
}

impl RuleSet {
    pub fn new(combinator: Combinator) -> Self {
        RuleSet {
            combinator,
            children: Vec::new(),
        }
    }

    pub fn and() -> Self {
        RuleSet::new(Combinator::And)
    }

    pub fn or() -> Self {
        RuleSet::new(Combinator::Or)
    }

    pub fn with_condition(mut self, field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        self.children.push(Rule::Leaf(Condition::new(field, operator, value)));
        self
    }

    pub fn with_group(mut self, group: RuleSet) -> Self {
        self.children.push(Rule::Group(group));
        self
    }

    pub fn push(&mut self, rule: Rule) {
        self.children.push(rule);
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Visit every leaf, depth first.
    pub fn conditions(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        collect_conditions(self, &mut out);
        out
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::and()
    }
}

fn collect_conditions<'a>(rules: &'a RuleSet, out: &mut Vec<&'a Condition>) {
    for child in &rules.children {
        match child {
            Rule::Leaf(condition) => out.push(condition),
            Rule::Group(group) => collect_conditions(group, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_parse_from_text() {
        for op in ["=", "!=", ">", ">=", "<", "<=", "in", "+=", "+<", "+>", "regex"] {
            let parsed: Operator = op.parse().unwrap();
            assert_eq!(parsed.as_str(), op);
        }
        assert!("~=".parse::<Operator>().is_err());
        assert_eq!(Operator::SoftLt.hard(), Operator::Lt);
        assert!(!Operator::In.is_soft());
    }

    #[test]
    fn nested_conditions_are_visited() {
        let rules = RuleSet::and()
            .with_condition("a", Operator::Eq, 1)
            .with_group(RuleSet::or()
                .with_condition("b", Operator::Gt, 2)
                .with_condition("c", Operator::Lt, 3));
        let fields: Vec<&str> = rules.conditions().iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["a", "b", "c"]);
    }
}
