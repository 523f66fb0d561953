//! Auto-pool matrix positions and the fund's signed movement log.

use super::{parse_decimal, Repository};
use crate::domain::{Decimal, MemberId, TimeMs};
use crate::engine::{PoolPosition, PoolSlot};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

fn position_from_row(row: &SqliteRow) -> PoolPosition {
    let position: i64 = row.get("position");
    let level: i64 = row.get("level");
    PoolPosition {
        member: MemberId::new(row.get("member_id")),
        position: u64::try_from(position).unwrap_or(0),
        level: u32::try_from(level).unwrap_or(1),
    }
}

pub async fn occupied_count(conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM autopool_nodes")
        .fetch_one(&mut *conn)
        .await?;
    let n: i64 = row.get("n");
    Ok(u64::try_from(n).unwrap_or(0))
}

pub async fn position_of(
    conn: &mut SqliteConnection,
    member: &MemberId,
) -> Result<Option<PoolPosition>, sqlx::Error> {
    let row = sqlx::query("SELECT member_id, position, level FROM autopool_nodes WHERE member_id = ?")
        .bind(member.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(position_from_row))
}

/// Occupy `slot`. A taken position fails with a unique violation; a re-admission is a no-op.
pub async fn insert_position(
    conn: &mut SqliteConnection,
    member: &MemberId,
    slot: &PoolSlot,
    at: TimeMs,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO autopool_nodes (member_id, position, level, parent_position, admitted_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(member_id) DO NOTHING
        "#,
    )
    .bind(member.as_str())
    .bind(i64::try_from(slot.position).unwrap_or(i64::MAX))
    .bind(i64::from(slot.level))
    .bind(slot.parent_position.and_then(|p| i64::try_from(p).ok()))
    .bind(at.as_ms())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn all_positions(conn: &mut SqliteConnection) -> Result<Vec<PoolPosition>, sqlx::Error> {
    let rows = sqlx::query("SELECT member_id, position, level FROM autopool_nodes ORDER BY position ASC")
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.iter().map(position_from_row).collect())
}

/// Current fund balance as the sum of its signed movements.
pub async fn fund_balance(conn: &mut SqliteConnection) -> Result<Decimal, sqlx::Error> {
    let rows = sqlx::query("SELECT movement_key, amount FROM autopool_fund ORDER BY id ASC")
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows
        .iter()
        .map(|r| {
            let key: String = r.get("movement_key");
            let raw: String = r.get("amount");
            parse_decimal("amount", &key, &raw)
        })
        .sum())
}

/// Append a fund movement. Returns false if `movement_key` was already recorded.
pub async fn record_movement(
    conn: &mut SqliteConnection,
    movement_key: &str,
    kind: &str,
    amount: Decimal,
    at: TimeMs,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO autopool_fund (movement_key, kind, amount, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(movement_key) DO NOTHING
        "#,
    )
    .bind(movement_key)
    .bind(kind)
    .bind(amount.to_canonical_string())
    .bind(at.as_ms())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

impl Repository {
    pub async fn autopool_positions(&self) -> Result<Vec<PoolPosition>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        all_positions(&mut conn).await
    }

    pub async fn autopool_balance(&self) -> Result<Decimal, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        fund_balance(&mut conn).await
    }

    pub async fn autopool_position_of(
        &self,
        member: &MemberId,
    ) -> Result<Option<PoolPosition>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        position_of(&mut conn, member).await
    }
}
