use serde_json::Value;
use crate::core::error::Result;
use crate::query::ast::{Condition, Operator, Rule, RuleSet};
use crate::query::signature;
use crate::query::types::{Direction, Paging, SortField};

/// Backend-neutral query over one collection.
///
/// Filters added with [`Query::filter`] join the root AND group; use
/// [`Query::group`] or [`Query::with_condition`] for OR and nesting.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub condition: RuleSet,
    pub select_one: bool,
    pub sort: Vec<SortField>,
    paging: Option<Paging>,
}

impl Query {
    pub fn new(collection: impl Into<String>, select_one: bool) -> Self {
        Query {
            collection: collection.into(),
            condition: RuleSet::and(),
            select_one,
            sort: Vec::new(),
            paging: None,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        self.condition.push(Rule::Leaf(Condition::new(field, operator, value)));
        self
    }

    /// Same as [`Query::filter`] with the operator in its textual form.
    pub fn filter_str(self, field: impl Into<String>, operator: &str, value: impl Into<Value>) -> Result<Self> {
        let operator: Operator = operator.parse()?;
        Ok(self.filter(field, operator, value))
    }

    pub fn group(mut self, group: RuleSet) -> Self {
        self.condition.push(Rule::Group(group));
        self
    }

    /// Replace the whole condition tree.
    pub fn with_condition(mut self, condition: RuleSet) -> Self {
        self.condition = condition;
        self
    }

    pub fn sort(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.sort.push(SortField {
            field: field.into(),
            direction: Direction::from_ascending(ascending),
        });
        self
    }

    pub fn paging(mut self, page_num: usize, page_size: usize) -> Self {
        self.set_paging(page_num, page_size);
        self
    }

    pub fn set_paging(&mut self, page_num: usize, page_size: usize) {
        self.paging = Some(Paging::new(page_num, page_size));
    }

    pub fn get_paging(&self) -> Option<Paging> {
        self.paging
    }

    /// Paging applies only to multi-document queries with a page size.
    pub fn page(&self) -> Option<Paging> {
        match self.paging {
            Some(paging) if paging.page_size > 0 && !self.select_one => Some(paging),
            _ => None,
        }
    }

    /// Shape of the query: collection, condition and sort, never paging.
    pub fn signature(&self) -> String {
        signature::signature(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_join_root_and_group() {
        let query = Query::new("orders", false)
            .filter("status", Operator::Eq, "open")
            .filter_str("total", ">=", 10)
            .unwrap();
        assert_eq!(query.condition.len(), 2);
        assert!(Query::new("orders", false).filter_str("total", "=>", 1).is_err());
    }

    #[test]
    fn page_ignored_for_single_result_queries() {
        let query = Query::new("orders", true).paging(2, 10);
        assert_eq!(query.get_paging(), Some(Paging::new(2, 10)));
        assert!(query.page().is_none());
        assert!(Query::new("orders", false).paging(0, 0).page().is_none());
    }
}
