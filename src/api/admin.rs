use crate::api::{member_id, AppState};
use crate::domain::TimeMs;
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputedMember {
    pub member_id: String,
    pub total_earnings: String,
    pub withdrawable_amount: String,
    pub unlocked_levels: u32,
    pub left_team_count: u64,
    pub right_team_count: u64,
    pub autopool_eligible: bool,
}

pub async fn recompute_member(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RecomputedMember>, AppError> {
    let member = member_id(&id)?;
    let agg = state.engine.recompute_aggregates(&member, TimeMs::now()).await?;
    Ok(Json(RecomputedMember {
        member_id: agg.member.to_string(),
        total_earnings: agg.total_earnings.to_canonical_string(),
        withdrawable_amount: agg.withdrawable_amount.to_canonical_string(),
        unlocked_levels: agg.unlocked_levels,
        left_team_count: agg.left_team_count,
        right_team_count: agg.right_team_count,
        autopool_eligible: agg.autopool_eligible,
    }))
}

pub async fn recompute_all(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.engine.recompute_all(TimeMs::now()).await?;
    Ok(Json(serde_json::json!({ "recomputed": count })))
}
