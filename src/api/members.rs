use crate::api::{member_id, time_or_now, AppState};
use crate::db::repo::EarningFilter;
use crate::domain::{Decimal, Earning, EarningType, MemberAggregate, Placement};
use crate::error::AppError;
use crate::orchestration::EventOutcome;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use futures::future::try_join4;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMemberRequest {
    pub member_id: String,
    pub sponsor_id: Option<String>,
    pub registered_at_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementResponse {
    pub member_id: String,
    pub sponsor_id: Option<String>,
    pub parent_id: Option<String>,
    pub side: Option<String>,
    pub depth: u32,
    pub outcome: EventOutcome,
}

impl PlacementResponse {
    fn new(p: Placement, outcome: EventOutcome) -> Self {
        Self {
            member_id: p.member.to_string(),
            sponsor_id: p.sponsor.map(|s| s.to_string()),
            parent_id: p.parent.map(|s| s.to_string()),
            side: p.side.map(|s| s.as_str().to_string()),
            depth: p.depth,
            outcome,
        }
    }
}

pub async fn register_member(
    State(state): State<AppState>,
    Json(body): Json<RegisterMemberRequest>,
) -> Result<(StatusCode, Json<PlacementResponse>), AppError> {
    let member = member_id(&body.member_id)?;
    let sponsor = body.sponsor_id.as_deref().map(member_id).transpose()?;
    let (placement, outcome) = state
        .engine
        .register_member(&member, sponsor.as_ref(), time_or_now(body.registered_at_ms))
        .await?;

    let status = match outcome {
        EventOutcome::Applied => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(PlacementResponse::new(placement, outcome))))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSummaryDto {
    pub package_id: String,
    pub tier: String,
    pub status: String,
    pub paid_months: u32,
    pub total_months: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummaryResponse {
    pub member_id: String,
    pub direct_referral_count: u32,
    pub unlocked_levels: u32,
    pub left_team_count: u64,
    pub right_team_count: u64,
    pub left_carry_forward: String,
    pub right_carry_forward: String,
    pub total_earnings: String,
    pub withdrawable_amount: String,
    pub autopool_eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autopool_position: Option<u64>,
    pub earnings_by_type: BTreeMap<String, String>,
    pub packages: Vec<PackageSummaryDto>,
}

pub async fn get_member(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<MemberSummaryResponse>, AppError> {
    let member = member_id(&id)?;
    let repo = state.engine.repo();

    let (aggregate, totals, packages, position) = try_join4(
        repo.get_aggregate(&member),
        repo.earning_totals(&member),
        repo.packages_for_member(&member),
        repo.autopool_position_of(&member),
    )
    .await?;
    let agg: MemberAggregate =
        aggregate.ok_or_else(|| AppError::NotFound(format!("member {}", member)))?;

    Ok(Json(MemberSummaryResponse {
        member_id: agg.member.to_string(),
        direct_referral_count: agg.direct_referral_count,
        unlocked_levels: agg.unlocked_levels,
        left_team_count: agg.left_team_count,
        right_team_count: agg.right_team_count,
        left_carry_forward: agg.left_carry_forward.to_canonical_string(),
        right_carry_forward: agg.right_carry_forward.to_canonical_string(),
        total_earnings: agg.total_earnings.to_canonical_string(),
        withdrawable_amount: agg.withdrawable_amount.to_canonical_string(),
        autopool_eligible: agg.autopool_eligible,
        autopool_position: position.map(|p| p.position),
        earnings_by_type: totals
            .into_iter()
            .map(|(t, amount)| (t.as_str().to_string(), amount.to_canonical_string()))
            .collect(),
        packages: packages
            .into_iter()
            .map(|p| PackageSummaryDto {
                package_id: p.id.to_string(),
                tier: p.tier,
                status: p.status.as_str().to_string(),
                paid_months: p.paid_months,
                total_months: p.total_months,
            })
            .collect(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsQuery {
    #[serde(rename = "type")]
    pub earning_type: Option<String>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningDto {
    pub id: i64,
    #[serde(rename = "type")]
    pub earning_type: String,
    pub amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_member_id: Option<String>,
    pub description: String,
    pub event_key: String,
    pub plan_version: String,
    pub created_at_ms: i64,
}

impl From<Earning> for EarningDto {
    fn from(e: Earning) -> Self {
        Self {
            id: e.id,
            earning_type: e.earning_type.as_str().to_string(),
            amount: e.amount.to_canonical_string(),
            related_member_id: e.related_member.map(|m| m.to_string()),
            description: e.description,
            event_key: e.event_key,
            plan_version: e.plan_version,
            created_at_ms: e.created_at.as_ms(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsResponse {
    pub member_id: String,
    pub total: String,
    pub earnings: Vec<EarningDto>,
}

pub async fn get_earnings(
    Path(id): Path<String>,
    Query(params): Query<EarningsQuery>,
    State(state): State<AppState>,
) -> Result<Json<EarningsResponse>, AppError> {
    let member = member_id(&id)?;
    let earning_type = params
        .earning_type
        .as_deref()
        .map(EarningType::from_str)
        .transpose()
        .map_err(AppError::BadRequest)?;
    if let (Some(from_ms), Some(to_ms)) = (params.from_ms, params.to_ms) {
        if from_ms > to_ms {
            return Err(AppError::BadRequest("fromMs must be <= toMs".into()));
        }
    }

    let filter = EarningFilter {
        earning_type,
        from_ms: params.from_ms,
        to_ms: params.to_ms,
    };
    let earnings = state.engine.repo().query_earnings(&member, &filter).await?;
    let total: Decimal = earnings.iter().map(|e| e.amount).sum();

    Ok(Json(EarningsResponse {
        member_id: member.to_string(),
        total: total.to_canonical_string(),
        earnings: earnings.into_iter().map(EarningDto::from).collect(),
    }))
}
