//! Member summaries, binary cycle log, processed events and plan versions.

use super::{parse_decimal, Repository};
use crate::domain::{CompensationPlan, Decimal, MemberAggregate, MemberId, TimeMs};
use crate::engine::{CarryForward, MatchCycle};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

fn aggregate_from_row(row: &SqliteRow) -> MemberAggregate {
    let id: String = row.get("member_id");
    let dec = |column: &str| {
        let raw: String = row.get(column);
        parse_decimal(column, &id, &raw)
    };
    let count = |column: &str| u64::try_from(row.get::<i64, _>(column)).unwrap_or(0);
    MemberAggregate {
        direct_referral_count: u32::try_from(count("direct_referral_count")).unwrap_or(u32::MAX),
        unlocked_levels: u32::try_from(count("unlocked_levels")).unwrap_or(0),
        left_team_count: count("left_team_count"),
        right_team_count: count("right_team_count"),
        left_carry_forward: dec("left_carry_forward"),
        right_carry_forward: dec("right_carry_forward"),
        total_earnings: dec("total_earnings"),
        withdrawable_amount: dec("withdrawable_amount"),
        autopool_eligible: row.get::<i64, _>("autopool_eligible") != 0,
        member: MemberId::new(id.clone()),
    }
}

pub async fn get_aggregate(
    conn: &mut SqliteConnection,
    member: &MemberId,
) -> Result<Option<MemberAggregate>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT member_id, direct_referral_count, unlocked_levels, left_team_count, right_team_count,
               left_carry_forward, right_carry_forward, total_earnings, withdrawable_amount,
               autopool_eligible
        FROM member_aggregates
        WHERE member_id = ?
        "#,
    )
    .bind(member.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(aggregate_from_row))
}

pub async fn upsert_aggregate(
    conn: &mut SqliteConnection,
    agg: &MemberAggregate,
    at: TimeMs,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO member_aggregates (
            member_id, direct_referral_count, unlocked_levels, left_team_count, right_team_count,
            left_carry_forward, right_carry_forward, total_earnings, withdrawable_amount,
            autopool_eligible, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(member_id) DO UPDATE SET
            direct_referral_count = excluded.direct_referral_count,
            unlocked_levels = excluded.unlocked_levels,
            left_team_count = excluded.left_team_count,
            right_team_count = excluded.right_team_count,
            left_carry_forward = excluded.left_carry_forward,
            right_carry_forward = excluded.right_carry_forward,
            total_earnings = excluded.total_earnings,
            withdrawable_amount = excluded.withdrawable_amount,
            autopool_eligible = excluded.autopool_eligible,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(agg.member.as_str())
    .bind(i64::from(agg.direct_referral_count))
    .bind(i64::from(agg.unlocked_levels))
    .bind(i64::try_from(agg.left_team_count).unwrap_or(i64::MAX))
    .bind(i64::try_from(agg.right_team_count).unwrap_or(i64::MAX))
    .bind(agg.left_carry_forward.to_canonical_string())
    .bind(agg.right_carry_forward.to_canonical_string())
    .bind(agg.total_earnings.to_canonical_string())
    .bind(agg.withdrawable_amount.to_canonical_string())
    .bind(agg.autopool_eligible)
    .bind(at.as_ms())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Carry-forward after the member's most recent matching cycle; zero before the first.
pub async fn latest_carry(
    conn: &mut SqliteConnection,
    member: &MemberId,
) -> Result<CarryForward, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT left_carry_after, right_carry_after
        FROM binary_cycles
        WHERE member_id = ?
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(member.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row
        .map(|r| {
            let left: String = r.get("left_carry_after");
            let right: String = r.get("right_carry_after");
            CarryForward::new(
                parse_decimal("left_carry_after", member.as_str(), &left),
                parse_decimal("right_carry_after", member.as_str(), &right),
            )
        })
        .unwrap_or_default())
}

pub async fn insert_binary_cycle(
    conn: &mut SqliteConnection,
    cycle: &MatchCycle,
    event_key: &str,
    at: TimeMs,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO binary_cycles (
            member_id, event_key, incoming_side, incoming_volume, left_count, right_count,
            left_volume, right_volume, matched, payout, left_carry_after, right_carry_after,
            created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(cycle.member.as_str())
    .bind(event_key)
    .bind(cycle.incoming_side.as_str())
    .bind(cycle.incoming_volume.to_canonical_string())
    .bind(i64::try_from(cycle.counts.left).unwrap_or(i64::MAX))
    .bind(i64::try_from(cycle.counts.right).unwrap_or(i64::MAX))
    .bind(cycle.left_volume.to_canonical_string())
    .bind(cycle.right_volume.to_canonical_string())
    .bind(cycle.matched.to_canonical_string())
    .bind(cycle.payout.to_canonical_string())
    .bind(cycle.carry_after.left.to_canonical_string())
    .bind(cycle.carry_after.right.to_canonical_string())
    .bind(at.as_ms())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Record an event key. Returns false when it was already processed.
pub async fn mark_processed(
    conn: &mut SqliteConnection,
    event_key: &str,
    kind: &str,
    plan_version: &str,
    at: TimeMs,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO processed_events (event_key, kind, plan_version, processed_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(event_key) DO NOTHING
        "#,
    )
    .bind(event_key)
    .bind(kind)
    .bind(plan_version)
    .bind(at.as_ms())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn is_processed(conn: &mut SqliteConnection, event_key: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT 1 AS hit FROM processed_events WHERE event_key = ?")
        .bind(event_key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

/// One row of a member's matching history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleRecord {
    pub event_key: String,
    pub matched: Decimal,
    pub payout: Decimal,
    pub carry_after: CarryForward,
    pub created_at: TimeMs,
}

/// Outcome of registering the active plan at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanRegistration {
    Registered,
    AlreadyRegistered,
    /// Same version string, different content.
    Conflict { stored: String },
}

pub async fn register_plan(
    conn: &mut SqliteConnection,
    plan: &CompensationPlan,
    at: TimeMs,
) -> Result<PlanRegistration, sqlx::Error> {
    let json = plan
        .canonical_json()
        .map_err(|e| sqlx::Error::Protocol(format!("plan {} does not serialize: {}", plan.version, e)))?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO plan_versions (version, plan_json, registered_at)
        VALUES (?, ?, ?)
        ON CONFLICT(version) DO NOTHING
        "#,
    )
    .bind(&plan.version)
    .bind(&json)
    .bind(at.as_ms())
    .execute(&mut *conn)
    .await?;
    if inserted.rows_affected() > 0 {
        return Ok(PlanRegistration::Registered);
    }

    let row = sqlx::query("SELECT plan_json FROM plan_versions WHERE version = ?")
        .bind(&plan.version)
        .fetch_one(&mut *conn)
        .await?;
    let stored: String = row.get("plan_json");
    if stored == json {
        Ok(PlanRegistration::AlreadyRegistered)
    } else {
        Ok(PlanRegistration::Conflict { stored })
    }
}

impl Repository {
    pub async fn get_aggregate(
        &self,
        member: &MemberId,
    ) -> Result<Option<MemberAggregate>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        get_aggregate(&mut conn, member).await
    }

    pub async fn register_plan(
        &self,
        plan: &CompensationPlan,
    ) -> Result<PlanRegistration, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        register_plan(&mut conn, plan, TimeMs::now()).await
    }

    /// Matching history for one member, newest first.
    pub async fn binary_cycles(
        &self,
        member: &MemberId,
        limit: i64,
    ) -> Result<Vec<CycleRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT event_key, matched, payout, left_carry_after, right_carry_after, created_at
            FROM binary_cycles
            WHERE member_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(member.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let owner = member.as_str();
                let raw = |c: &str| -> String { r.get(c) };
                CycleRecord {
                    event_key: r.get("event_key"),
                    matched: parse_decimal("matched", owner, &raw("matched")),
                    payout: parse_decimal("payout", owner, &raw("payout")),
                    carry_after: CarryForward::new(
                        parse_decimal("left_carry_after", owner, &raw("left_carry_after")),
                        parse_decimal("right_carry_after", owner, &raw("right_carry_after")),
                    ),
                    created_at: TimeMs::new(r.get("created_at")),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::temp_repo;
    use crate::db::repo::tree::insert_member;
    use crate::domain::{Side, TreeNode};
    use crate::engine::binary::{run_cycle, TeamCounts};

    fn a() -> MemberId {
        MemberId::new("a".to_string())
    }

    async fn seed(conn: &mut SqliteConnection) {
        insert_member(
            conn,
            &TreeNode {
                id: a(),
                sponsor: None,
                parent: None,
                side: None,
                depth: 0,
                placement_seq: 1,
                created_at: TimeMs::new(0),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_carry_follows_latest_cycle() {
        let (_dir, repo) = temp_repo().await;
        let mut conn = repo.pool().acquire().await.unwrap();
        seed(&mut conn).await;
        assert_eq!(latest_carry(&mut conn, &a()).await.unwrap(), CarryForward::default());

        let rate = Decimal::from_str_canonical("0.05").unwrap();
        let first = run_cycle(a(), CarryForward::default(), TeamCounts::new(1, 0), Side::Left, Decimal::from_i64(2000), rate);
        insert_binary_cycle(&mut conn, &first, "e1", TimeMs::new(1)).await.unwrap();
        let second = run_cycle(a(), first.carry_after, TeamCounts::new(1, 1), Side::Right, Decimal::from_i64(3000), rate);
        insert_binary_cycle(&mut conn, &second, "e2", TimeMs::new(2)).await.unwrap();

        let carry = latest_carry(&mut conn, &a()).await.unwrap();
        assert_eq!(carry, CarryForward::new(Decimal::from_i64(2000), Decimal::from_i64(3000)));
        drop(conn);

        let history = repo.binary_cycles(&a(), 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].event_key, "e2");
        assert_eq!(history[1].matched, Decimal::zero());
    }

    #[tokio::test]
    async fn test_aggregate_upsert_replaces_row() {
        let (_dir, repo) = temp_repo().await;
        let mut conn = repo.pool().acquire().await.unwrap();
        seed(&mut conn).await;

        let mut agg = MemberAggregate::empty(a());
        agg.total_earnings = Decimal::from_i64(250);
        agg.withdrawable_amount = Decimal::from_i64(225);
        upsert_aggregate(&mut conn, &agg, TimeMs::new(1)).await.unwrap();
        agg.left_team_count = 2;
        upsert_aggregate(&mut conn, &agg, TimeMs::new(2)).await.unwrap();

        assert_eq!(get_aggregate(&mut conn, &a()).await.unwrap(), Some(agg));
    }

    #[tokio::test]
    async fn test_processed_events_reject_replays() {
        let (_dir, repo) = temp_repo().await;
        let mut conn = repo.pool().acquire().await.unwrap();
        assert!(mark_processed(&mut conn, "pay:1", "installment", "v1", TimeMs::new(1)).await.unwrap());
        assert!(!mark_processed(&mut conn, "pay:1", "installment", "v1", TimeMs::new(2)).await.unwrap());
        assert!(is_processed(&mut conn, "pay:1").await.unwrap());
        assert!(!is_processed(&mut conn, "pay:2").await.unwrap());
    }

    #[tokio::test]
    async fn test_plan_version_cannot_change_content() {
        let (_dir, repo) = temp_repo().await;
        let plan = CompensationPlan::reference();
        assert_eq!(repo.register_plan(&plan).await.unwrap(), PlanRegistration::Registered);
        assert_eq!(repo.register_plan(&plan).await.unwrap(), PlanRegistration::AlreadyRegistered);

        let mut changed = plan.clone();
        changed.direct_rate = Decimal::from_str_canonical("0.06").unwrap();
        assert!(matches!(
            repo.register_plan(&changed).await.unwrap(),
            PlanRegistration::Conflict { .. }
        ));
    }

    #[tokio::test]
    async fn test_registered_plan_stores_canonical_json() {
        let (_dir, repo) = temp_repo().await;
        let mut conn = repo.pool().acquire().await.unwrap();
        let plan = CompensationPlan::reference();
        assert_eq!(
            register_plan(&mut conn, &plan, TimeMs::new(7)).await.unwrap(),
            PlanRegistration::Registered
        );

        let row = sqlx::query("SELECT plan_json, registered_at FROM plan_versions WHERE version = ?")
            .bind(&plan.version)
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        let stored: String = row.get("plan_json");
        assert_eq!(stored, plan.canonical_json().unwrap());
        assert_eq!(row.get::<i64, _>("registered_at"), 7);
    }
}
