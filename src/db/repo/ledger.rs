//! Append-only earnings ledger.

use super::{parse_decimal, parse_or, Repository};
use crate::domain::{Credit, Decimal, Earning, EarningType, MemberId, TimeMs};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use std::collections::BTreeMap;

/// Statement filter for one beneficiary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EarningFilter {
    pub earning_type: Option<EarningType>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
}

fn earning_from_row(row: &SqliteRow) -> Earning {
    let id: i64 = row.get("id");
    let owner = format!("earning:{}", id);
    let earning_type: String = row.get("earning_type");
    let amount: String = row.get("amount");
    Earning {
        id,
        beneficiary: MemberId::new(row.get("beneficiary_id")),
        earning_type: parse_or("earning_type", &owner, &earning_type, EarningType::Direct),
        amount: parse_decimal("amount", &owner, &amount),
        related_member: row
            .get::<Option<String>, _>("related_member_id")
            .map(MemberId::new),
        description: row.get("description"),
        trigger_key: row.get("trigger_key"),
        event_key: row.get("event_key"),
        plan_version: row.get("plan_version"),
        created_at: TimeMs::new(row.get("created_at")),
    }
}

/// Append one credit. Returns false when the (beneficiary, type, trigger) entry already exists.
pub async fn append_credit(
    conn: &mut SqliteConnection,
    credit: &Credit,
    event_key: &str,
    plan_version: &str,
    at: TimeMs,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO earnings (
            beneficiary_id, earning_type, amount, related_member_id, description,
            trigger_key, event_key, plan_version, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(beneficiary_id, earning_type, trigger_key) DO NOTHING
        "#,
    )
    .bind(credit.beneficiary.as_str())
    .bind(credit.earning_type.as_str())
    .bind(credit.amount.to_canonical_string())
    .bind(credit.related_member.as_ref().map(|m| m.as_str()))
    .bind(&credit.description)
    .bind(&credit.trigger_key)
    .bind(event_key)
    .bind(plan_version)
    .bind(at.as_ms())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Sum of every ledger entry for `member`.
///
/// Summed in Rust: SQLite's SUM returns REAL and would drift on money.
pub async fn ledger_total(
    conn: &mut SqliteConnection,
    member: &MemberId,
) -> Result<Decimal, sqlx::Error> {
    let rows = sqlx::query("SELECT amount FROM earnings WHERE beneficiary_id = ? ORDER BY id ASC")
        .bind(member.as_str())
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows
        .iter()
        .map(|r| {
            let raw: String = r.get("amount");
            parse_decimal("amount", member.as_str(), &raw)
        })
        .sum())
}

pub async fn totals_by_type(
    conn: &mut SqliteConnection,
    member: &MemberId,
) -> Result<BTreeMap<EarningType, Decimal>, sqlx::Error> {
    let rows = sqlx::query("SELECT earning_type, amount FROM earnings WHERE beneficiary_id = ?")
        .bind(member.as_str())
        .fetch_all(&mut *conn)
        .await?;

    let mut totals: BTreeMap<EarningType, Decimal> =
        EarningType::ALL.iter().map(|t| (*t, Decimal::zero())).collect();
    for row in rows {
        let raw_type: String = row.get("earning_type");
        let raw_amount: String = row.get("amount");
        let earning_type = parse_or("earning_type", member.as_str(), &raw_type, EarningType::Direct);
        *totals.entry(earning_type).or_default() +=
            parse_decimal("amount", member.as_str(), &raw_amount);
    }
    Ok(totals)
}

pub async fn earnings_for_event(
    conn: &mut SqliteConnection,
    event_key: &str,
) -> Result<Vec<Earning>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, beneficiary_id, earning_type, amount, related_member_id, description,
               trigger_key, event_key, plan_version, created_at
        FROM earnings
        WHERE event_key = ?
        ORDER BY id ASC
        "#,
    )
    .bind(event_key)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.iter().map(earning_from_row).collect())
}

impl Repository {
    /// Statement for one beneficiary, oldest first.
    pub async fn query_earnings(
        &self,
        member: &MemberId,
        filter: &EarningFilter,
    ) -> Result<Vec<Earning>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, beneficiary_id, earning_type, amount, related_member_id, description,
                   trigger_key, event_key, plan_version, created_at
            FROM earnings
            WHERE beneficiary_id = ?
              AND (? IS NULL OR earning_type = ?)
              AND created_at >= ?
              AND created_at <= ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(member.as_str())
        .bind(filter.earning_type.map(|t| t.as_str()))
        .bind(filter.earning_type.map(|t| t.as_str()))
        .bind(filter.from_ms.unwrap_or(i64::MIN))
        .bind(filter.to_ms.unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(earning_from_row).collect())
    }

    pub async fn earnings_for_event(&self, event_key: &str) -> Result<Vec<Earning>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        earnings_for_event(&mut conn, event_key).await
    }

    pub async fn earning_totals(
        &self,
        member: &MemberId,
    ) -> Result<BTreeMap<EarningType, Decimal>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        totals_by_type(&mut conn, member).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::temp_repo;
    use crate::db::repo::tree::insert_member;
    use crate::domain::TreeNode;

    fn credit(beneficiary: &str, t: EarningType, amount: &str, trigger: &str) -> Credit {
        Credit {
            beneficiary: MemberId::new(beneficiary.to_string()),
            earning_type: t,
            amount: Decimal::from_str_canonical(amount).unwrap(),
            related_member: None,
            description: "test".to_string(),
            trigger_key: trigger.to_string(),
        }
    }

    async fn seed_member(conn: &mut SqliteConnection, id: &str) {
        insert_member(
            conn,
            &TreeNode {
                id: MemberId::new(id.to_string()),
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
    async fn test_duplicate_trigger_is_not_appended() {
        let (_dir, repo) = temp_repo().await;
        let mut conn = repo.pool().acquire().await.unwrap();
        seed_member(&mut conn, "a").await;

        let c = credit("a", EarningType::Direct, "100", "pay:1");
        assert!(append_credit(&mut conn, &c, "pay:1", "v1", TimeMs::new(10)).await.unwrap());
        assert!(!append_credit(&mut conn, &c, "pay:1", "v1", TimeMs::new(11)).await.unwrap());

        // Same trigger, different type is a separate entry.
        let b = credit("a", EarningType::Binary, "150", "pay:1");
        assert!(append_credit(&mut conn, &b, "pay:1", "v1", TimeMs::new(12)).await.unwrap());

        let total = ledger_total(&mut conn, &MemberId::new("a".to_string())).await.unwrap();
        assert_eq!(total, Decimal::from_i64(250));
    }

    #[tokio::test]
    async fn test_statement_filters() {
        let (_dir, repo) = temp_repo().await;
        let mut conn = repo.pool().acquire().await.unwrap();
        seed_member(&mut conn, "a").await;
        append_credit(&mut conn, &credit("a", EarningType::Direct, "100", "t1"), "t1", "v1", TimeMs::new(10))
            .await
            .unwrap();
        append_credit(&mut conn, &credit("a", EarningType::Level, "18.6", "t2"), "t2", "v1", TimeMs::new(20))
            .await
            .unwrap();
        drop(conn);

        let a = MemberId::new("a".to_string());
        let all = repo.query_earnings(&a, &EarningFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let levels = repo
            .query_earnings(
                &a,
                &EarningFilter {
                    earning_type: Some(EarningType::Level),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].amount, Decimal::from_str_canonical("18.6").unwrap());

        let early = repo
            .query_earnings(
                &a,
                &EarningFilter {
                    to_ms: Some(15),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(early.len(), 1);

        let totals = repo.earning_totals(&a).await.unwrap();
        assert_eq!(totals[&EarningType::Direct], Decimal::from_i64(100));
        assert_eq!(totals[&EarningType::Autopool], Decimal::zero());
    }
}
