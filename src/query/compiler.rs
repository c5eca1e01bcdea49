use crate::core::error::Result;
use crate::query::ast::{Combinator, Condition, Rule, RuleSet};
use crate::query::types::{Direction, SortField};

/// Native filter vocabulary of one backend.
///
/// The compiler owns the tree walk; a dialect only knows how to express a
/// leaf and how to join already compiled children.
pub trait Dialect {
    type Filter;

    fn match_all(&self) -> Self::Filter;
    fn all_of(&self, filters: Vec<Self::Filter>) -> Self::Filter;
    fn any_of(&self, filters: Vec<Self::Filter>) -> Self::Filter;
    fn leaf(&self, condition: &Condition) -> Result<Self::Filter>;
}

/// Compile a condition tree into `dialect`'s filter.
///
/// An empty group matches everything and a single child is emitted
/// without a wrapping group. Sibling order is preserved.
pub fn compile<D: Dialect + ?Sized>(dialect: &D, rules: &RuleSet) -> Result<D::Filter> {
    if rules.children.is_empty() {
        return Ok(dialect.match_all());
    }

    let mut compiled = Vec::with_capacity(rules.children.len());
    for child in &rules.children {
        compiled.push(compile_rule(dialect, child)?);
    }

    if compiled.len() == 1 {
        if let Some(only) = compiled.pop() {
            return Ok(only);
        }
    }

    Ok(match rules.combinator {
        Combinator::And => dialect.all_of(compiled),
        Combinator::Or => dialect.any_of(compiled),
    })
}

fn compile_rule<D: Dialect + ?Sized>(dialect: &D, rule: &Rule) -> Result<D::Filter> {
    match rule {
        Rule::Leaf(condition) => dialect.leaf(condition),
        Rule::Group(group) => compile(dialect, group),
    }
}

/// Sort fields as `(field, ascending)` pairs in priority order.
pub fn compile_sort(sort: &[SortField]) -> Vec<(String, bool)> {
    sort.iter()
        .map(|s| (s.field.clone(), s.direction == Direction::Asc))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use crate::query::ast::Operator;

    /// Renders filters as readable strings.
    struct Text;

    impl Dialect for Text {
        type Filter = String;

        fn match_all(&self) -> String {
            "*".to_string()
        }

        fn all_of(&self, filters: Vec<String>) -> String {
            format!("and({})", filters.join(","))
        }

        fn any_of(&self, filters: Vec<String>) -> String {
            format!("or({})", filters.join(","))
        }

        fn leaf(&self, condition: &Condition) -> Result<String> {
            if condition.operator == Operator::Regex {
                return Err(Error::invalid_query("no regex".to_string()));
            }
            Ok(format!("{}{}{}", condition.field, condition.operator, condition.value))
        }
    }

    #[test]
    fn empty_group_matches_all() {
        assert_eq!(compile(&Text, &RuleSet::and()).unwrap(), "*");
        assert_eq!(compile(&Text, &RuleSet::or()).unwrap(), "*");
    }

    #[test]
    fn single_child_is_unwrapped() {
        let rules = RuleSet::or().with_group(RuleSet::and().with_condition("a", Operator::Eq, 1));
        assert_eq!(compile(&Text, &rules).unwrap(), "a=1");
    }

    #[test]
    fn nesting_and_order_preserved() {
        let rules = RuleSet::and()
            .with_condition("a", Operator::Eq, 1)
            .with_group(RuleSet::or()
                .with_condition("b", Operator::Gt, 2)
                .with_condition("c", Operator::Lt, 3));
        assert_eq!(compile(&Text, &rules).unwrap(), "and(a=1,or(b>2,c<3))");
    }

    #[test]
    fn leaf_errors_propagate() {
        let rules = RuleSet::and()
            .with_condition("a", Operator::Eq, 1)
            .with_condition("b", Operator::Regex, "x");
        assert!(compile(&Text, &rules).is_err());
    }
}
