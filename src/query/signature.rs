//! Stable identity of a query's shape.
//!
//! Token layout, in order: the collection, one `[field/op/valueJSON]` per
//! leaf, `(and:` / `(or:` … `)` around nested groups, then one
//! `[field/asc]` or `[field/desc]` per sort field. Paging never takes
//! part, so every page of a query shares cache entries.

use std::fmt::Write;
use crate::query::ast::{Combinator, Rule, RuleSet};
use crate::query::builder::Query;

/// Longer signatures are collapsed to a fixed-length digest.
pub const MAX_SIGNATURE_LEN: usize = 256;

pub fn signature(query: &Query) -> String {
    let mut sig = String::with_capacity(64);
    sig.push_str(&query.collection);

    // The root AND group is implicit so that appending filters one by one
    // only ever appends tokens.
    match query.condition.combinator {
        Combinator::And => write_children(&mut sig, &query.condition),
        Combinator::Or => write_group(&mut sig, &query.condition),
    }

    for sort in &query.sort {
        let _ = write!(sig, "[{}/{}]", sort.field, sort.direction.as_str());
    }

    if sig.len() > MAX_SIGNATURE_LEN {
        return collapse(&sig);
    }
    sig
}

fn write_group(sig: &mut String, rules: &RuleSet) {
    sig.push_str(match rules.combinator {
        Combinator::And => "(and:",
        Combinator::Or => "(or:",
    });
    write_children(sig, rules);
    sig.push(')');
}

fn write_children(sig: &mut String, rules: &RuleSet) {
    for child in &rules.children {
        match child {
            Rule::Leaf(condition) => {
                // serde_json maps keep sorted keys, so equal values render equally
                let value = serde_json::to_string(&condition.value).unwrap_or_default();
                let _ = write!(sig, "[{}/{}/{}]", condition.field, condition.operator, value);
            }
            Rule::Group(group) => write_group(sig, group),
        }
    }
}

/// `#` followed by 20 hex digits: two CRC-32 digests with different seeds
/// and the low 16 bits of the original length.
fn collapse(sig: &str) -> String {
    let mut first = crc32fast::Hasher::new();
    first.update(sig.as_bytes());
    let mut second = crc32fast::Hasher::new_with_initial(0x9e37_79b9);
    second.update(sig.as_bytes());
    format!(
        "#{:08x}{:08x}{:04x}",
        first.finalize(),
        second.finalize(),
        sig.len() & 0xffff
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::Operator;

    #[test]
    fn tokens_follow_insertion_order() {
        let query = Query::new("orders", false)
            .filter("status", Operator::Eq, "open")
            .filter("total", Operator::Gt, 10)
            .sort("created", false);
        assert_eq!(
            query.signature(),
            r#"orders[status/=/"open"][total/>/10][created/desc]"#
        );
    }

    #[test]
    fn paging_does_not_change_signature() {
        let base = Query::new("orders", false).filter("a", Operator::In, vec![1, 2]);
        let paged = base.clone().paging(4, 25);
        assert_eq!(base.signature(), paged.signature());
    }

    #[test]
    fn nested_groups_are_bracketed() {
        let query = Query::new("c", false).group(
            RuleSet::or()
                .with_condition("a", Operator::Eq, 1)
                .with_condition("b", Operator::SoftEq, 2),
        );
        assert_eq!(query.signature(), "c(or:[a/=/1][b/+=/2])");

        let flat = Query::new("c", false)
            .filter("a", Operator::Eq, 1)
            .filter("b", Operator::SoftEq, 2);
        assert_ne!(query.signature(), flat.signature());
    }

    #[test]
    fn long_signatures_collapse_to_fixed_length() {
        let mut query = Query::new("events", false);
        for i in 0..40 {
            query = query.filter(format!("field_{}", i), Operator::Eq, i);
        }
        let sig = query.signature();
        assert_eq!(sig.len(), 21);
        assert!(sig.starts_with('#'));
        assert_eq!(sig, query.clone().paging(3, 10).signature());

        let other = query.clone().filter("extra", Operator::Eq, true);
        assert_ne!(other.signature(), sig);
    }
}
