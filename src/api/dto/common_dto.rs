//! Shared DTO types used across multiple endpoints.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Pagination query parameters for list endpoints.
#[derive(Debug, Clone, Copy, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationParams {
    /// Page number (1-indexed). Defaults to 1.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Items per page (max 100). Defaults to 20.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

/// Pagination metadata included in list responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct PaginationMeta {
    /// Current page number.
    pub page: u32,
    /// Items per page.
    pub per_page: u32,
    /// Total number of items.
    pub total: u32,
    /// Total number of pages.
    pub total_pages: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

impl PaginationParams {
    /// Clamps `per_page` to the allowed maximum of 100.
    #[must_use]
    pub fn clamped(&self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: self.per_page.clamp(1, 100),
        }
    }

    /// Number of items skipped before this page.
    #[must_use]
    pub fn offset(&self) -> usize {
        let p = self.clamped();
        (p.page.saturating_sub(1) as usize).saturating_mul(p.per_page as usize)
    }

    /// Page size after clamping.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.clamped().per_page as usize
    }

    /// Builds the response metadata for `total` matching items.
    #[must_use]
    pub fn meta(&self, total: usize) -> PaginationMeta {
        let p = self.clamped();
        let total = u32::try_from(total).unwrap_or(u32::MAX);
        PaginationMeta {
            page: p.page,
            per_page: p.per_page,
            total,
            total_pages: total.div_ceil(p.per_page),
        }
    }
}
