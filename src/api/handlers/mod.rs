//! REST endpoint handlers organized by resource.

pub mod admin;
pub mod balances;
pub mod bets;
pub mod rounds;
pub mod system;

use axum::Router;

use crate::app_state::AppState;
use crate::domain::Currency;
use crate::error::EngineError;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(rounds::routes())
        .merge(bets::routes())
        .merge(balances::routes())
        .merge(admin::routes())
}

/// Parses a currency code from a request.
fn parse_currency(code: &str) -> Result<Currency, EngineError> {
    Currency::parse(code).map_err(|e| EngineError::UnknownCurrency(e.to_string()))
}
