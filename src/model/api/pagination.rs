use rocket::{FromForm, UriDisplayQuery};
use serde::{Deserialize, Serialize};

/// Pagination query parameters, with sane defaults.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, FromForm, UriDisplayQuery)]
pub struct PaginationRequest {
    #[field(default = 1)]
    pub page_num: u32,
    #[field(default = 50)]
    pub page_size: u32,
}

impl PaginationRequest {
    /// Number of documents to skip.
    pub fn skip(&self) -> u32 {
        (self.page_num.max(1) - 1).saturating_mul(self.page_size)
    }

    /// Number of documents per page.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Wrap a page of items with its pagination metadata.
    pub fn to_paginated<T>(self, total: u64, items: Vec<T>) -> Paginated<T> {
        Paginated {
            pagination: PaginationResponse {
                page_num: self.page_num,
                page_size: self.page_size,
                total,
            },
            items,
        }
    }
}

/// Pagination metadata echoed back with a page of results.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct PaginationResponse {
    pub page_num: u32,
    pub page_size: u32,
    pub total: u64,
}

/// A page of items.
#[derive(Debug, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub pagination: PaginationResponse,
    pub items: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_is_zero_based() {
        let pagination = PaginationRequest {
            page_num: 3,
            page_size: 20,
        };
        assert_eq!(pagination.skip(), 40);
    }

    #[test]
    fn page_num_zero_is_treated_as_one() {
        let pagination = PaginationRequest {
            page_num: 0,
            page_size: 20,
        };
        assert_eq!(pagination.skip(), 0);
    }
}
