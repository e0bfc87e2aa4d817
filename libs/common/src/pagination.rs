//! Page requests and paged results shared by every listing query

use serde::{Deserialize, Serialize};

/// Largest page size a caller may request
pub const MAX_PAGE_SIZE: u32 = 100;

/// Page size used when the caller does not pick one
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// A 0-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    /// Build a request, clamping the size into `1..=MAX_PAGE_SIZE`
    pub fn of(page: u32, size: u32) -> Self {
        Self {
            page,
            size: size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Build a request from optional query parameters
    pub fn from_query(page: Option<u32>, size: Option<u32>) -> Self {
        Self::of(page.unwrap_or(0), size.unwrap_or(DEFAULT_PAGE_SIZE))
    }

    /// Number of rows to skip
    pub fn offset(&self) -> i64 {
        self.page as i64 * self.size as i64
    }

    /// Number of rows to return
    pub fn limit(&self) -> i64 {
        self.size as i64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::of(0, DEFAULT_PAGE_SIZE)
    }
}

/// One page of results together with the total number of matching rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, total: i64) -> Self {
        Self {
            content,
            page: request.page,
            size: request.size,
            total,
        }
    }

    /// Slice an already filtered and ordered collection into the requested page
    pub fn from_all(all: Vec<T>, request: &PageRequest) -> Self {
        let total = all.len() as i64;
        let content = all
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.size as usize)
            .collect();
        Self::new(content, request, total)
    }

    pub fn total_pages(&self) -> i64 {
        if self.total == 0 {
            0
        } else {
            (self.total + self.size as i64 - 1) / self.size as i64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_is_clamped() {
        assert_eq!(PageRequest::of(0, 0).size, 1);
        assert_eq!(PageRequest::of(0, 500).size, MAX_PAGE_SIZE);
        assert_eq!(PageRequest::from_query(None, None).size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_offset() {
        assert_eq!(PageRequest::of(3, 10).offset(), 30);
        assert_eq!(PageRequest::of(0, 10).offset(), 0);
    }

    #[test]
    fn test_from_all_slices_and_counts() {
        let page = Page::from_all((1..=25).collect::<Vec<_>>(), &PageRequest::of(2, 10));
        assert_eq!(page.content, vec![21, 22, 23, 24, 25]);
        assert_eq!(page.total, 25);
        assert_eq!(page.total_pages(), 3);

        let past_end = Page::from_all(vec![1, 2], &PageRequest::of(5, 10));
        assert!(past_end.is_empty());
        assert_eq!(past_end.total, 2);
    }

    #[test]
    fn test_map_keeps_paging_metadata() {
        let page = Page::from_all(vec![1, 2, 3], &PageRequest::of(0, 2)).map(|n| n * 10);
        assert_eq!(page.content, vec![10, 20]);
        assert_eq!(page.total, 3);
        assert_eq!(page.size, 2);
    }
}
