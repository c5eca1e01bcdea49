pub mod ast;
pub mod types;
pub mod builder;
pub mod signature;
pub mod compiler;
pub mod dialect;
pub mod matcher;
pub mod cache;
pub mod paging;

pub use ast::{Combinator, Condition, Operator, Rule, RuleSet};
pub use builder::Query;
pub use compiler::{compile, Dialect};
pub use dialect::{CursorDialect, CursorFilter, DocumentDialect};
pub use paging::{PageStart, PagingCache};
pub use types::{Direction, Paging, SortField};
