//! Balance and ledger history DTOs.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::common_dto::PaginationMeta;
use crate::ledger::LedgerEntry;

/// Filter for `GET /ledger`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LedgerQuery {
    /// Restrict to one currency.
    pub currency: Option<String>,
}

/// Paginated ledger history.
#[derive(Debug, Serialize, ToSchema)]
pub struct LedgerListResponse {
    /// Entries on this page, newest first.
    pub data: Vec<LedgerEntry>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}
