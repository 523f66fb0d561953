use crate::api::members::EarningDto;
use crate::api::{member_id, money, package_id, time_or_now, AppState};
use crate::domain::{InstallmentPaid, Package, TimeMs};
use crate::error::AppError;
use crate::orchestration::EventOutcome;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub member_id: String,
    pub tier: String,
    pub package_id: Option<String>,
    pub purchased_at_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentDto {
    pub seq: u32,
    pub amount: String,
    pub due_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at_ms: Option<i64>,
    pub status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageResponse {
    pub package_id: String,
    pub member_id: String,
    pub tier: String,
    pub monthly_amount: String,
    pub total_months: u32,
    pub paid_months: u32,
    pub status: String,
    pub has_late: bool,
    pub bonus_earned: bool,
    pub purchased_at_ms: i64,
    pub plan_version: String,
    pub installments: Vec<InstallmentDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<EventOutcome>,
}

async fn package_response(
    state: &AppState,
    package: Package,
    outcome: Option<EventOutcome>,
) -> Result<PackageResponse, AppError> {
    let installments = state.engine.repo().get_installments(&package.id).await?;
    Ok(PackageResponse {
        package_id: package.id.to_string(),
        member_id: package.member.to_string(),
        tier: package.tier,
        monthly_amount: package.monthly_amount.to_canonical_string(),
        total_months: package.total_months,
        paid_months: package.paid_months,
        status: package.status.as_str().to_string(),
        has_late: package.has_late,
        bonus_earned: package.bonus_earned,
        purchased_at_ms: package.purchased_at.as_ms(),
        plan_version: package.plan_version,
        installments: installments
            .into_iter()
            .map(|i| InstallmentDto {
                seq: i.seq,
                amount: i.amount.to_canonical_string(),
                due_at_ms: i.due_at.as_ms(),
                paid_at_ms: i.paid_at.map(|t| t.as_ms()),
                status: i.status.as_str().to_string(),
            })
            .collect(),
        outcome,
    })
}

pub async fn purchase_package(
    State(state): State<AppState>,
    Json(body): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<PackageResponse>), AppError> {
    let member = member_id(&body.member_id)?;
    let requested_id = body.package_id.as_deref().map(package_id).transpose()?;
    let (package, outcome) = state
        .engine
        .purchase_package(
            &member,
            &body.tier,
            requested_id,
            time_or_now(body.purchased_at_ms),
        )
        .await?;

    let status = match outcome {
        EventOutcome::Applied => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(package_response(&state, package, Some(outcome)).await?)))
}

pub async fn get_package(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PackageResponse>, AppError> {
    let id = package_id(&id)?;
    let package = state
        .engine
        .repo()
        .get_package(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("package {}", id)))?;
    Ok(Json(package_response(&state, package, None).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentRequest {
    pub amount: String,
    pub paid_at_ms: i64,
    pub payment_ref: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentResponse {
    pub event_key: String,
    pub outcome: EventOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installment_seq: Option<u32>,
    pub package_status: String,
    pub paid_months: u32,
    pub bonus_awarded: bool,
    pub pool_contribution: String,
    pub earnings: Vec<EarningDto>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub autopool_admitted: Vec<String>,
}

pub async fn record_installment(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<InstallmentRequest>,
) -> Result<Json<InstallmentResponse>, AppError> {
    let id = package_id(&id)?;
    let amount = money("amount", &body.amount)?;
    let event = InstallmentPaid::new(id, amount, TimeMs::new(body.paid_at_ms), body.payment_ref);

    let report = state.engine.record_installment(&event).await?;
    Ok(Json(InstallmentResponse {
        event_key: report.event_key,
        outcome: report.outcome,
        installment_seq: report.installment_seq,
        package_status: report.package.status.as_str().to_string(),
        paid_months: report.package.paid_months,
        bonus_awarded: report.bonus_awarded,
        pool_contribution: report.pool_contribution.to_canonical_string(),
        earnings: report.earnings.into_iter().map(EarningDto::from).collect(),
        autopool_admitted: report.admitted.into_iter().map(|m| m.to_string()).collect(),
    }))
}
