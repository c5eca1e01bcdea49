use serde::{Serialize, Deserialize};

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Asc,   // Ascending: 0 → 9, A → Z
    Desc,  // Descending: 9 → 0, Z → A
}

impl Direction {
    pub fn from_ascending(ascending: bool) -> Self {
        if ascending { Direction::Asc } else { Direction::Desc }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub direction: Direction,
}

/// Page request. Pages are numbered from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Paging {
    pub page_num: usize,
    pub page_size: usize,
}

impl Paging {
    pub fn new(page_num: usize, page_size: usize) -> Self {
        Paging { page_num, page_size }
    }

    /// Offset for backends that can skip.
    pub fn skip(&self) -> usize {
        self.page_num * self.page_size
    }
}
