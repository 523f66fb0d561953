//! Placement log and tree queries.

use super::parse_or;
use crate::domain::{MemberId, Side, TimeMs, TreeNode};
use crate::engine::Link;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

fn node_from_row(row: &SqliteRow) -> TreeNode {
    let id: String = row.get("id");
    let side: Option<String> = row.get("side");
    let depth: i64 = row.get("depth");
    TreeNode {
        side: side.map(|s| parse_or("side", &id, &s, Side::Left)),
        sponsor: row.get::<Option<String>, _>("sponsor_id").map(MemberId::new),
        parent: row.get::<Option<String>, _>("parent_id").map(MemberId::new),
        depth: u32::try_from(depth).unwrap_or(0),
        placement_seq: row.get("placement_seq"),
        created_at: TimeMs::new(row.get("created_at")),
        id: MemberId::new(id),
    }
}

/// Append a member to the placement log. A taken `(parent, side)` slot fails with a unique violation.
pub async fn insert_member(conn: &mut SqliteConnection, node: &TreeNode) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO members (id, sponsor_id, parent_id, side, depth, placement_seq, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(node.id.as_str())
    .bind(node.sponsor.as_ref().map(|s| s.as_str()))
    .bind(node.parent.as_ref().map(|p| p.as_str()))
    .bind(node.side.map(|s| s.as_str()))
    .bind(i64::from(node.depth))
    .bind(node.placement_seq)
    .bind(node.created_at.as_ms())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn next_placement_seq(conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COALESCE(MAX(placement_seq), 0) + 1 AS next FROM members")
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.get("next"))
}

pub async fn get_node(
    conn: &mut SqliteConnection,
    id: &MemberId,
) -> Result<Option<TreeNode>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, sponsor_id, parent_id, side, depth, placement_seq, created_at
        FROM members
        WHERE id = ?
        "#,
    )
    .bind(id.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(node_from_row))
}

pub async fn direct_referral_count(
    conn: &mut SqliteConnection,
    sponsor: &MemberId,
) -> Result<u32, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM members WHERE sponsor_id = ?")
        .bind(sponsor.as_str())
        .fetch_one(&mut *conn)
        .await?;
    let n: i64 = row.get("n");
    Ok(u32::try_from(n).unwrap_or(u32::MAX))
}

/// Members on the outermost edge of `side` below `sponsor`, top-down, with their depths.
pub async fn outer_leg(
    conn: &mut SqliteConnection,
    sponsor: &MemberId,
    side: Side,
) -> Result<Vec<(MemberId, u32)>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        WITH RECURSIVE leg(id, depth) AS (
            SELECT id, depth FROM members WHERE parent_id = ?1 AND side = ?2
            UNION
            SELECT m.id, m.depth FROM members m JOIN leg l ON m.parent_id = l.id AND m.side = ?2
        )
        SELECT id, depth FROM leg ORDER BY depth ASC
        "#,
    )
    .bind(sponsor.as_str())
    .bind(side.as_str())
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|r| {
            let depth: i64 = r.get("depth");
            (
                MemberId::new(r.get("id")),
                u32::try_from(depth).unwrap_or(0),
            )
        })
        .collect())
}

/// Full recursive size of one leg. `UNION` stops on revisits, so corrupted cycles terminate.
pub async fn subtree_count(
    conn: &mut SqliteConnection,
    member: &MemberId,
    side: Side,
) -> Result<u64, sqlx::Error> {
    let row = sqlx::query(
        r#"
        WITH RECURSIVE sub(id) AS (
            SELECT id FROM members WHERE parent_id = ?1 AND side = ?2
            UNION
            SELECT m.id FROM members m JOIN sub s ON m.parent_id = s.id
        )
        SELECT COUNT(*) AS n FROM sub
        "#,
    )
    .bind(member.as_str())
    .bind(side.as_str())
    .fetch_one(&mut *conn)
    .await?;
    let n: i64 = row.get("n");
    Ok(u64::try_from(n).unwrap_or(0))
}

/// Links of `member` and everything reachable upward through parent or sponsor pointers.
///
/// Pointers to missing rows simply drop out; the walk over the returned view reports them.
pub async fn upline_links(
    conn: &mut SqliteConnection,
    member: &MemberId,
) -> Result<Vec<Link>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        WITH RECURSIVE up(id) AS (
            SELECT ?1
            UNION
            SELECT x.next_id
            FROM up u
            JOIN (
                SELECT id, parent_id AS next_id FROM members
                UNION ALL
                SELECT id, sponsor_id AS next_id FROM members
            ) x ON x.id = u.id
            WHERE x.next_id IS NOT NULL
        )
        SELECT m.id, m.sponsor_id, m.parent_id, m.side, m.depth, m.placement_seq, m.created_at
        FROM members m
        JOIN up ON up.id = m.id
        "#,
    )
    .bind(member.as_str())
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|r| {
            let node = node_from_row(r);
            Link {
                id: node.id,
                sponsor: node.sponsor,
                parent: node.parent,
                side: node.side,
                depth: node.depth,
            }
        })
        .collect())
}

/// Every member with its depth, deepest first, ties by id.
pub async fn members_deepest_first(
    conn: &mut SqliteConnection,
) -> Result<Vec<(MemberId, u32)>, sqlx::Error> {
    let rows = sqlx::query("SELECT id, depth FROM members ORDER BY depth DESC, id ASC")
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows
        .iter()
        .map(|r| {
            let depth: i64 = r.get("depth");
            (
                MemberId::new(r.get("id")),
                u32::try_from(depth).unwrap_or(0),
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::temp_repo;

    fn node(id: &str, sponsor: Option<&str>, parent: Option<&str>, side: Option<Side>, depth: u32, seq: i64) -> TreeNode {
        TreeNode {
            id: MemberId::new(id.to_string()),
            sponsor: sponsor.map(|s| MemberId::new(s.to_string())),
            parent: parent.map(|p| MemberId::new(p.to_string())),
            side,
            depth,
            placement_seq: seq,
            created_at: TimeMs::new(1_000),
        }
    }

    fn id(s: &str) -> MemberId {
        MemberId::new(s.to_string())
    }

    /// a -> b (left), c (right); d under b (left), e under d (right).
    async fn seed(conn: &mut SqliteConnection) {
        for n in [
            node("a", None, None, None, 0, 1),
            node("b", Some("a"), Some("a"), Some(Side::Left), 1, 2),
            node("c", Some("a"), Some("a"), Some(Side::Right), 1, 3),
            node("d", Some("a"), Some("b"), Some(Side::Left), 2, 4),
            node("e", Some("d"), Some("d"), Some(Side::Right), 3, 5),
        ] {
            insert_member(conn, &n).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_subtree_counts_are_recursive() {
        let (_dir, repo) = temp_repo().await;
        let mut conn = repo.pool().acquire().await.unwrap();
        seed(&mut conn).await;

        assert_eq!(subtree_count(&mut conn, &id("a"), Side::Left).await.unwrap(), 3);
        assert_eq!(subtree_count(&mut conn, &id("a"), Side::Right).await.unwrap(), 1);
        assert_eq!(subtree_count(&mut conn, &id("b"), Side::Right).await.unwrap(), 0);
        assert_eq!(direct_referral_count(&mut conn, &id("a")).await.unwrap(), 3);
        assert_eq!(next_placement_seq(&mut conn).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_outer_leg_follows_one_side_only() {
        let (_dir, repo) = temp_repo().await;
        let mut conn = repo.pool().acquire().await.unwrap();
        seed(&mut conn).await;

        let leg = outer_leg(&mut conn, &id("a"), Side::Left).await.unwrap();
        assert_eq!(leg, vec![(id("b"), 1), (id("d"), 2)]);
        let leg = outer_leg(&mut conn, &id("a"), Side::Right).await.unwrap();
        assert_eq!(leg, vec![(id("c"), 1)]);
    }

    #[tokio::test]
    async fn test_upline_links_cover_parents_and_sponsors() {
        let (_dir, repo) = temp_repo().await;
        let mut conn = repo.pool().acquire().await.unwrap();
        seed(&mut conn).await;

        let mut ids: Vec<String> = upline_links(&mut conn, &id("e"))
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.id.0)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "d", "e"]);
    }

    #[tokio::test]
    async fn test_taken_slot_is_rejected() {
        let (_dir, repo) = temp_repo().await;
        let mut conn = repo.pool().acquire().await.unwrap();
        seed(&mut conn).await;

        let clash = node("x", Some("a"), Some("a"), Some(Side::Left), 1, 6);
        assert!(insert_member(&mut conn, &clash).await.is_err());
        let fetched = get_node(&mut conn, &id("d")).await.unwrap().unwrap();
        assert_eq!(fetched.parent, Some(id("b")));
        assert_eq!(fetched.side, Some(Side::Left));
    }
}
