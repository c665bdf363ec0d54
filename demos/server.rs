// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! REST binding for the rider ledger.
//!
//! Run with: `cargo run --example server [CONFIG.toml]`
//!
//! ## Endpoints
//!
//! - `POST /deliveries` - Ingest a delivered order
//! - `POST /riders/{id}/settlements` - Settle a rider's cash and earnings
//! - `POST /riders/{id}/block` - Block or unblock a rider
//! - `GET /riders` - List rider summaries
//! - `GET /riders/{id}` - Get a rider summary
//! - `GET /riders/{id}/pending` - Pending transaction breakdown
//! - `GET /riders/{id}/settlements` - Settlement history
//! - `GET /riders/{id}/bonus/{date}` - Bonus progress for a day (YYYY-MM-DD)
//! - `GET /fleet` - Fleet totals
//!
//! ## Example Usage
//!
//! ```bash
//! # Delivered COD order
//! curl -X POST http://localhost:3000/deliveries \
//!   -H "Content-Type: application/json" \
//!   -d '{"order_id": 1, "rider_id": 7, "order_total": 500, "is_cod": true, "delivery_fee": 50}'
//!
//! # Settle, guarded by the version the dashboard last saw
//! curl -X POST http://localhost:3000/riders/7/settlements \
//!   -H "Content-Type: application/json" \
//!   -H "X-Actor: ops@example.com" \
//!   -d '{"amount_collected": 500, "earnings_paid": 0, "expected_version": 2}'
//!
//! # Fleet totals
//! curl http://localhost:3000/fleet
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::NaiveDate;
use rider_ledger::{
    AdminContext, AdminQueryService, BonusProgress, DeliveryCompleted, DeliverySplit, Engine,
    EngineConfig, FleetTotals, LedgerError, Money, OrderCompletionIngestor, OrderId,
    PendingBreakdown, RiderId, RiderSummary, SettlementBatch,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct DeliveryRequest {
    pub order_id: u64,
    pub rider_id: u64,
    pub order_total: Money,
    pub commission_rate: Option<Decimal>,
    pub is_cod: bool,
    pub delivery_fee: Option<Money>,
}

#[derive(Debug, Deserialize)]
pub struct SettleRequest {
    pub amount_collected: Money,
    #[serde(default)]
    pub earnings_paid: Money,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub blocked: bool,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub split: DeliverySplit,
    pub duplicate: bool,
    pub bonus_credited: Option<Money>,
    pub rider: RiderSummary,
}

#[derive(Debug, Serialize)]
pub struct SettleResponse {
    pub settlement: SettlementBatch,
    pub rider: RiderSummary,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub ingestor: Arc<OrderCompletionIngestor>,
    pub query: Arc<AdminQueryService>,
}

// === Error Handling ===

pub struct AppError(LedgerError);

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            LedgerError::InvalidSplit { .. } => (StatusCode::BAD_REQUEST, "INVALID_SPLIT"),
            LedgerError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
            LedgerError::InsufficientBalance { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_BALANCE")
            }
            LedgerError::RiderBlocked => (StatusCode::FORBIDDEN, "RIDER_BLOCKED"),
            LedgerError::DuplicateEvent => (StatusCode::CONFLICT, "DUPLICATE_EVENT"),
            LedgerError::ConcurrentMutationConflict { .. } => {
                (StatusCode::CONFLICT, "CONCURRENT_MODIFICATION")
            }
            LedgerError::RiderNotFound => (StatusCode::NOT_FOUND, "RIDER_NOT_FOUND"),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

fn actor(headers: &HeaderMap) -> String {
    headers
        .get("x-actor")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

// === Handlers ===

async fn post_delivery(
    State(state): State<AppState>,
    Json(request): Json<DeliveryRequest>,
) -> Result<(StatusCode, Json<DeliveryResponse>), AppError> {
    let event = DeliveryCompleted {
        order_id: OrderId(request.order_id),
        rider_id: RiderId(request.rider_id),
        order_total: request.order_total,
        commission_rate: request
            .commission_rate
            .unwrap_or(state.engine.config().fees.default_commission_rate),
        is_cod: request.is_cod,
        delivery_fee: request.delivery_fee,
    };
    let receipt = state.ingestor.on_order_delivered(&event)?;
    let status = if receipt.is_duplicate() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(DeliveryResponse {
            split: receipt.split,
            duplicate: receipt.is_duplicate(),
            bonus_credited: receipt.bonus.credited(),
            rider: RiderSummary::from(&*receipt.snapshot),
        }),
    ))
}

async fn settle(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    Json(request): Json<SettleRequest>,
) -> Result<Json<SettleResponse>, AppError> {
    let mut ctx = AdminContext::new(actor(&headers));
    ctx.expected_version = request.expected_version;
    let committed = state.engine.settle(
        RiderId(id),
        request.amount_collected,
        request.earnings_paid,
        &ctx,
    )?;
    Ok(Json(SettleResponse {
        settlement: committed.outcome,
        rider: RiderSummary::from(&*committed.snapshot),
    }))
}

async fn set_blocked(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    Json(request): Json<BlockRequest>,
) -> Result<Json<RiderSummary>, AppError> {
    let mut ctx = AdminContext::new(actor(&headers));
    ctx.expected_version = request.expected_version;
    let committed = state.engine.set_blocked(RiderId(id), request.blocked, &ctx)?;
    Ok(Json(RiderSummary::from(&*committed.snapshot)))
}

async fn list_riders(State(state): State<AppState>) -> Json<Vec<RiderSummary>> {
    Json(state.query.rider_summaries())
}

async fn get_rider(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<RiderSummary>, AppError> {
    state
        .query
        .rider_summary(&RiderId(id))
        .map(Json)
        .ok_or(AppError(LedgerError::RiderNotFound))
}

async fn get_pending(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<PendingBreakdown>, AppError> {
    state
        .query
        .pending_breakdown(&RiderId(id))
        .map(Json)
        .ok_or(AppError(LedgerError::RiderNotFound))
}

async fn get_settlements(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Vec<SettlementBatch>>, AppError> {
    state
        .query
        .settlement_history(&RiderId(id))
        .map(|history| Json(history.to_vec()))
        .ok_or(AppError(LedgerError::RiderNotFound))
}

async fn get_bonus(
    State(state): State<AppState>,
    Path((id, date)): Path<(u64, NaiveDate)>,
) -> Json<BonusProgress> {
    Json(state.query.bonus_progress(&RiderId(id), date))
}

async fn get_fleet(State(state): State<AppState>) -> Json<FleetTotals> {
    Json(state.query.fleet_totals())
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/deliveries", post(post_delivery))
        .route("/riders", get(list_riders))
        .route("/riders/{id}", get(get_rider))
        .route("/riders/{id}/pending", get(get_pending))
        .route("/riders/{id}/settlements", get(get_settlements).post(settle))
        .route("/riders/{id}/block", post(set_blocked))
        .route("/riders/{id}/bonus/{date}", get(get_bonus))
        .route("/fleet", get(get_fleet))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RIDER_LEDGER_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(&path).unwrap_or_else(|e| {
            eprintln!("Error loading config '{}': {}", path, e);
            std::process::exit(1);
        }),
        None => EngineConfig::default(),
    };

    let engine = Arc::new(Engine::with_config(config));
    let state = AppState {
        engine: Arc::clone(&engine),
        ingestor: Arc::new(OrderCompletionIngestor::new(Arc::clone(&engine))),
        query: Arc::new(AdminQueryService::new(Arc::clone(&engine))),
    };

    // Grace periods lapse without ledger activity; sweep periodically.
    let sweeper = Arc::clone(&engine);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            sweeper.refresh_statuses();
        }
    });

    // Stand-in for a dashboard feed: log every event the ledger emits.
    let events = engine.subscribe();
    tokio::task::spawn_blocking(move || {
        while let Some(event) = events.recv() {
            debug!(event = event.name(), rider_id = %event.rider_id(), version = event.version(), "ledger event");
        }
    });

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    info!("Rider ledger API server running on http://127.0.0.1:3000");

    axum::serve(listener, app).await.unwrap();
}
