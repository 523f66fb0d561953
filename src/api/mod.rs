pub mod admin;
pub mod autopool;
pub mod health;
pub mod members;
pub mod packages;

use crate::domain::{Decimal, MemberId, PackageId, TimeMs};
use crate::error::AppError;
use crate::orchestration::CompensationEngine;
use axum::{
    routing::{get, post},
    Router,
};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CompensationEngine>,
}

impl AppState {
    pub fn new(engine: Arc<CompensationEngine>) -> Self {
        Self { engine }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/members", post(members::register_member))
        .route("/v1/members/:id", get(members::get_member))
        .route("/v1/members/:id/earnings", get(members::get_earnings))
        .route("/v1/packages", post(packages::purchase_package))
        .route("/v1/packages/:id", get(packages::get_package))
        .route(
            "/v1/packages/:id/installments",
            post(packages::record_installment),
        )
        .route("/v1/autopool", get(autopool::get_autopool))
        .route("/v1/autopool/distribute", post(autopool::distribute))
        .route("/v1/admin/recompute", post(admin::recompute_all))
        .route(
            "/v1/admin/members/:id/recompute",
            post(admin::recompute_member),
        )
        .layer(cors)
        .with_state(state)
}

pub(crate) fn member_id(raw: &str) -> Result<MemberId, AppError> {
    MemberId::from_str(raw).map_err(|e| AppError::BadRequest(format!("Invalid member id: {}", e)))
}

pub(crate) fn package_id(raw: &str) -> Result<PackageId, AppError> {
    PackageId::from_str(raw).map_err(|e| AppError::BadRequest(format!("Invalid package id: {}", e)))
}

pub(crate) fn money(field: &str, raw: &str) -> Result<Decimal, AppError> {
    Decimal::from_str_canonical(raw.trim())
        .map_err(|_| AppError::BadRequest(format!("{} must be a decimal string", field)))
}

pub(crate) fn time_or_now(ms: Option<i64>) -> TimeMs {
    ms.map(TimeMs::new).unwrap_or_else(TimeMs::now)
}
