//! Offset pagination shared by list and search endpoints.

use thiserror::Error;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaginationError {
    #[error("page must be a positive integer, got {0}")]
    InvalidPage(u32),
    #[error("pageSize must be between 1 and {MAX_PAGE_SIZE}, got {0}")]
    InvalidPageSize(u32),
}

/// A validated 1-based page of `page_size` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageWindow {
    page: u32,
    page_size: u32,
}

impl PageWindow {
    pub fn new(page: u32, page_size: u32) -> Result<Self, PaginationError> {
        if page == 0 {
            return Err(PaginationError::InvalidPage(page));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(PaginationError::InvalidPageSize(page_size));
        }
        Ok(Self { page, page_size })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }
}

impl Default for PageWindow {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}
