//! OpenAPI document for the REST surface.

use utoipa::OpenApi;

use super::dto;
use super::handlers::{admin, balances, bets, rounds, system};
use crate::domain::{
    BetStatus, Component, Currency, FailedBetStatus, OperationGroup, OperationType, RoundStatus,
};
use crate::error::{ErrorBody, ErrorResponse};
use crate::ledger::{BalanceAccount, ComponentBalance, EntryStatus, LedgerEntry};

/// Generated OpenAPI document, served at `/api-docs/openapi.json`.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "wager-gateway",
        description = "Round engine, balance ledger and streaming gateway for multiplier games."
    ),
    paths(
        rounds::open_round,
        rounds::list_rounds,
        rounds::current_round,
        rounds::get_round,
        rounds::start_round,
        rounds::advance_round,
        rounds::close_round,
        rounds::cancel_round,
        rounds::place_bet,
        rounds::cancel_bet,
        rounds::cashout,
        bets::list_bets,
        balances::get_balance,
        balances::list_entries,
        admin::list_failed_bets,
        admin::manual_refund,
        admin::adjust_funds,
        admin::set_suspension,
        system::health_handler,
        system::game_config_handler,
    ),
    components(schemas(
        ErrorResponse,
        ErrorBody,
        dto::PaginationMeta,
        dto::RoundDto,
        dto::RoundDetailResponse,
        dto::RoundListResponse,
        dto::CloseRoundRequest,
        dto::CloseRoundResponse,
        dto::CancelRoundRequest,
        dto::CancelRoundResponse,
        dto::PlaceBetBody,
        dto::CashoutBody,
        dto::CashoutResponse,
        dto::BetDto,
        dto::BetListResponse,
        dto::LedgerListResponse,
        dto::FailedBetDto,
        dto::FailedBetListResponse,
        dto::ManualRefundRequest,
        dto::ManualRefundResponse,
        dto::RefundDto,
        dto::AdjustFundsRequest,
        dto::FundDirection,
        dto::SuspensionRequest,
        system::HealthResponse,
        system::GameConfigResponse,
        BalanceAccount,
        ComponentBalance,
        LedgerEntry,
        EntryStatus,
        RoundStatus,
        BetStatus,
        FailedBetStatus,
        Currency,
        Component,
        OperationGroup,
        OperationType,
    )),
    tags(
        (name = "Rounds", description = "Round lifecycle and history"),
        (name = "Bets", description = "Placing, withdrawing and cashing out bets"),
        (name = "Balances", description = "Account balances and ledger history"),
        (name = "Admin", description = "Operator tooling"),
        (name = "System", description = "Health and configuration"),
    )
)]
pub struct ApiDoc;
