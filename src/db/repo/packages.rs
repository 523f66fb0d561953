//! Packages and their installment schedules.

use super::{parse_decimal, parse_or, Repository};
use crate::domain::{
    Installment, InstallmentStatus, MemberId, Package, PackageId, PackageStatus, TimeMs,
};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

fn package_from_row(row: &SqliteRow) -> Package {
    let id: String = row.get("id");
    let monthly: String = row.get("monthly_amount");
    let status: String = row.get("status");
    let total_months: i64 = row.get("total_months");
    let paid_months: i64 = row.get("paid_months");
    Package {
        member: MemberId::new(row.get("member_id")),
        tier: row.get("tier"),
        monthly_amount: parse_decimal("monthly_amount", &id, &monthly),
        total_months: u32::try_from(total_months).unwrap_or(0),
        paid_months: u32::try_from(paid_months).unwrap_or(0),
        status: parse_or("status", &id, &status, PackageStatus::Scheduled),
        has_late: row.get::<i64, _>("has_late") != 0,
        bonus_earned: row.get::<i64, _>("bonus_earned") != 0,
        purchased_at: TimeMs::new(row.get("purchased_at")),
        plan_version: row.get("plan_version"),
        id: PackageId::new(id),
    }
}

fn installment_from_row(row: &SqliteRow) -> Installment {
    let package_id: String = row.get("package_id");
    let amount: String = row.get("amount");
    let status: String = row.get("status");
    let seq: i64 = row.get("seq");
    Installment {
        seq: u32::try_from(seq).unwrap_or(0),
        amount: parse_decimal("amount", &package_id, &amount),
        due_at: TimeMs::new(row.get("due_ms")),
        paid_at: row.get::<Option<i64>, _>("paid_ms").map(TimeMs::new),
        status: parse_or("status", &package_id, &status, InstallmentStatus::Pending),
        event_key: row.get("event_key"),
        package_id: PackageId::new(package_id),
    }
}

const PACKAGE_COLUMNS: &str = "id, member_id, tier, monthly_amount, total_months, paid_months, \
     status, has_late, bonus_earned, purchased_at, plan_version";

/// Insert a package with its pre-built schedule. Returns false if the id already exists.
pub async fn insert_package(
    conn: &mut SqliteConnection,
    package: &Package,
    schedule: &[Installment],
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO packages (
            id, member_id, tier, monthly_amount, total_months, paid_months,
            status, has_late, bonus_earned, purchased_at, plan_version
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO NOTHING
        "#,
    )
    .bind(package.id.as_str())
    .bind(package.member.as_str())
    .bind(&package.tier)
    .bind(package.monthly_amount.to_canonical_string())
    .bind(i64::from(package.total_months))
    .bind(i64::from(package.paid_months))
    .bind(package.status.as_str())
    .bind(package.has_late)
    .bind(package.bonus_earned)
    .bind(package.purchased_at.as_ms())
    .bind(&package.plan_version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }

    for installment in schedule {
        sqlx::query(
            r#"
            INSERT INTO installments (package_id, seq, amount, due_ms, paid_ms, status, event_key)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(installment.package_id.as_str())
        .bind(i64::from(installment.seq))
        .bind(installment.amount.to_canonical_string())
        .bind(installment.due_at.as_ms())
        .bind(installment.paid_at.map(|t| t.as_ms()))
        .bind(installment.status.as_str())
        .bind(installment.event_key.as_deref())
        .execute(&mut *conn)
        .await?;
    }

    Ok(true)
}

pub async fn get_package(
    conn: &mut SqliteConnection,
    id: &PackageId,
) -> Result<Option<Package>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {} FROM packages WHERE id = ?", PACKAGE_COLUMNS))
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(package_from_row))
}

pub async fn installments(
    conn: &mut SqliteConnection,
    package: &PackageId,
) -> Result<Vec<Installment>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT package_id, seq, amount, due_ms, paid_ms, status, event_key
        FROM installments
        WHERE package_id = ?
        ORDER BY seq ASC
        "#,
    )
    .bind(package.as_str())
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.iter().map(installment_from_row).collect())
}

pub async fn next_pending_installment(
    conn: &mut SqliteConnection,
    package: &PackageId,
) -> Result<Option<Installment>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT package_id, seq, amount, due_ms, paid_ms, status, event_key
        FROM installments
        WHERE package_id = ? AND status = 'pending'
        ORDER BY seq ASC
        LIMIT 1
        "#,
    )
    .bind(package.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(installment_from_row))
}

/// Mark a pending installment settled. Returns false if it was no longer pending.
pub async fn settle_installment(
    conn: &mut SqliteConnection,
    package: &PackageId,
    seq: u32,
    status: InstallmentStatus,
    paid_at: TimeMs,
    event_key: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE installments
        SET status = ?, paid_ms = ?, event_key = ?
        WHERE package_id = ? AND seq = ? AND status = 'pending'
        "#,
    )
    .bind(status.as_str())
    .bind(paid_at.as_ms())
    .bind(event_key)
    .bind(package.as_str())
    .bind(i64::from(seq))
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Advance package progress, guarded on the previously read `paid_months`.
pub async fn advance_package(
    conn: &mut SqliteConnection,
    package: &PackageId,
    expected_paid_months: u32,
    paid_months: u32,
    status: PackageStatus,
    has_late: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE packages
        SET paid_months = ?, status = ?, has_late = ?
        WHERE id = ? AND paid_months = ?
        "#,
    )
    .bind(i64::from(paid_months))
    .bind(status.as_str())
    .bind(has_late)
    .bind(package.as_str())
    .bind(i64::from(expected_paid_months))
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Atomic check-and-set of the completion bonus flag. True only for the single winning caller.
pub async fn claim_bonus(
    conn: &mut SqliteConnection,
    package: &PackageId,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE packages
        SET bonus_earned = 1
        WHERE id = ? AND bonus_earned = 0 AND has_late = 0 AND status = 'completed'
        "#,
    )
    .bind(package.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// The installment previously settled by `event_key`, used to answer replays.
pub async fn installment_by_event(
    conn: &mut SqliteConnection,
    event_key: &str,
) -> Result<Option<Installment>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT package_id, seq, amount, due_ms, paid_ms, status, event_key
        FROM installments
        WHERE event_key = ?
        "#,
    )
    .bind(event_key)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(installment_from_row))
}

impl Repository {
    pub async fn get_package(&self, id: &PackageId) -> Result<Option<Package>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        get_package(&mut conn, id).await
    }

    pub async fn get_installments(&self, id: &PackageId) -> Result<Vec<Installment>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        installments(&mut conn, id).await
    }

    pub async fn packages_for_member(&self, member: &MemberId) -> Result<Vec<Package>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM packages WHERE member_id = ? ORDER BY purchased_at ASC, id ASC",
            PACKAGE_COLUMNS
        ))
        .bind(member.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(package_from_row).collect())
    }
}
