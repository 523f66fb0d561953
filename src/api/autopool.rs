use crate::api::members::EarningDto;
use crate::api::{money, time_or_now, AppState};
use crate::error::AppError;
use crate::orchestration::EventOutcome;
use axum::extract::State;
use axum::Json;
use futures::future::try_join;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolPositionDto {
    pub member_id: String,
    pub position: u64,
    pub level: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutopoolResponse {
    pub fund_balance: String,
    pub occupied: usize,
    pub positions: Vec<PoolPositionDto>,
}

pub async fn get_autopool(State(state): State<AppState>) -> Result<Json<AutopoolResponse>, AppError> {
    let repo = state.engine.repo();
    let (positions, balance) = try_join(repo.autopool_positions(), repo.autopool_balance()).await?;

    Ok(Json(AutopoolResponse {
        fund_balance: balance.to_canonical_string(),
        occupied: positions.len(),
        positions: positions
            .into_iter()
            .map(|p| PoolPositionDto {
                member_id: p.member.to_string(),
                position: p.position,
                level: p.level,
            })
            .collect(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributeRequest {
    pub distribution_key: String,
    pub amount: Option<String>,
    pub distributed_at_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributeResponse {
    pub event_key: String,
    pub outcome: EventOutcome,
    pub fund_before: String,
    pub distributed: String,
    pub remainder: String,
    pub earnings: Vec<EarningDto>,
}

pub async fn distribute(
    State(state): State<AppState>,
    Json(body): Json<DistributeRequest>,
) -> Result<Json<DistributeResponse>, AppError> {
    let amount = body.amount.as_deref().map(|a| money("amount", a)).transpose()?;
    let report = state
        .engine
        .distribute_autopool(&body.distribution_key, amount, time_or_now(body.distributed_at_ms))
        .await?;

    Ok(Json(DistributeResponse {
        event_key: report.event_key,
        outcome: report.outcome,
        fund_before: report.fund_before.to_canonical_string(),
        distributed: report.distributed.to_canonical_string(),
        remainder: report.remainder.to_canonical_string(),
        earnings: report.earnings.into_iter().map(EarningDto::from).collect(),
    }))
}
