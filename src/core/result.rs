use std::collections::VecDeque;
use serde::de::DeserializeOwned;
use serde_json::Value;
use crate::core::error::{Error, ErrorKind, Result};

/// Uniform cursor over the documents a query produced.
///
/// Multi-document queries are read with [`QueryResult::next`], single
/// document queries with [`QueryResult::get_one`]; mixing the two is an
/// `InvalidState` error.
#[derive(Debug)]
pub struct QueryResult {
    select_one: bool,
    documents: VecDeque<Value>,
    total: i64,
    error: Option<Error>,
    available: bool,
}

impl QueryResult {
    pub(crate) fn many(documents: Vec<Value>, total: i64) -> Self {
        QueryResult {
            select_one: false,
            documents: documents.into(),
            total,
            error: None,
            available: true,
        }
    }

    pub(crate) fn one(document: Option<Value>) -> Self {
        let total = if document.is_some() { 1 } else { 0 };
        let error = match document {
            Some(_) => None,
            None => Some(Error::not_found("query matched no document".to_string())),
        };
        QueryResult {
            select_one: true,
            documents: document.into_iter().collect(),
            total,
            error,
            available: true,
        }
    }

    /// A paged query asked for a page past the end of the data.
    pub(crate) fn exhausted(select_one: bool) -> Self {
        QueryResult {
            select_one,
            documents: VecDeque::new(),
            total: 0,
            error: None,
            available: false,
        }
    }

    pub(crate) fn failed(error: Error) -> Self {
        QueryResult {
            select_one: false,
            documents: VecDeque::new(),
            total: 0,
            error: Some(error),
            available: false,
        }
    }

    pub fn next<T: DeserializeOwned>(&mut self) -> Result<T> {
        let value = self.next_raw()?;
        Ok(serde_json::from_value(value)?)
    }

    /// Advance the cursor; `NotFound` marks the end of the stream.
    pub fn next_raw(&mut self) -> Result<Value> {
        if let Some(err) = self.unavailable_error() {
            return Err(err);
        }
        if self.select_one {
            return Err(Error::new(
                ErrorKind::InvalidState,
                "cursor read on a single-result query".to_string(),
            ));
        }
        self.documents
            .pop_front()
            .ok_or_else(|| Error::not_found("no more documents".to_string()))
    }

    pub fn get_one<T: DeserializeOwned>(&mut self) -> Result<T> {
        let value = self.get_one_raw()?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn get_one_raw(&mut self) -> Result<Value> {
        if let Some(err) = self.unavailable_error() {
            return Err(err);
        }
        if !self.select_one {
            return Err(Error::new(
                ErrorKind::InvalidState,
                "single-result read on a multi-document query".to_string(),
            ));
        }
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        self.documents
            .pop_front()
            .ok_or_else(|| Error::not_found("no document".to_string()))
    }

    /// Total number of documents matching the filter, ignoring paging.
    pub fn count(&self) -> i64 {
        self.total
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn close(&mut self) {
        self.available = false;
        self.documents.clear();
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn remaining(&self) -> usize {
        self.documents.len()
    }

    fn unavailable_error(&self) -> Option<Error> {
        if self.available {
            return None;
        }
        Some(match &self.error {
            Some(err) => err.clone(),
            None => Error::invalid_query("query result is not available".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn next_walks_then_reports_not_found() {
        let mut result = QueryResult::many(vec![json!({"n": 1}), json!({"n": 2})], 7);
        assert_eq!(result.count(), 7);
        assert_eq!(result.next_raw().unwrap(), json!({"n": 1}));
        assert_eq!(result.next_raw().unwrap(), json!({"n": 2}));
        assert!(result.next_raw().unwrap_err().is_not_found());
        assert!(result.get_one_raw().is_err());
    }

    #[test]
    fn single_result_without_match_is_not_found() {
        let mut result = QueryResult::one(None);
        assert!(result.is_available());
        assert!(result.error().unwrap().is_not_found());
        assert!(result.get_one_raw().unwrap_err().is_not_found());
        assert_eq!(result.next_raw().unwrap_err().kind, ErrorKind::InvalidState);
    }

    #[test]
    fn closed_result_is_unavailable() {
        let mut result = QueryResult::many(vec![json!({})], 1);
        result.close();
        assert!(!result.is_available());
        assert_eq!(result.next_raw().unwrap_err().kind, ErrorKind::InvalidQuery);
    }

    #[test]
    fn failed_result_surfaces_its_error() {
        let mut result = QueryResult::failed(Error::not_implemented("query"));
        assert_eq!(result.next_raw().unwrap_err().kind, ErrorKind::NotImplemented);
    }
}
