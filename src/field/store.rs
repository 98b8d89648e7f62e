// Node Store - SQL access for field nodes and the blocker index
//
// Helpers take a bare connection so the coordinator can compose them inside
// one transaction. Conditional UPDATEs (`WHERE state = ...`) are the only
// atomicity primitive the coordinator relies on.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeSet;

use super::types::{FieldNode, FieldSummary, NodeState, NodeType};
use crate::database::{decode_set, encode_set, from_millis, to_millis};
use crate::error::{FieldError, FieldResult};

pub(crate) const NODE_COLUMNS: &str = "id, node_type, title, content, potential, temperature, \
     temperature_updated_at, affinity, parent_id, claimed_by, state, sequence_order, \
     created_by, created_at, updated_at, resolved_at, resolved_by";

/// Row to insert during a deposit
#[derive(Debug, Clone)]
pub(crate) struct NewNode<'a> {
    pub id: &'a str,
    pub node_type: NodeType,
    pub title: &'a str,
    pub content: &'a serde_json::Value,
    pub potential: f64,
    pub affinity: &'a BTreeSet<String>,
    pub parent_id: Option<&'a str>,
    pub state: NodeState,
    pub sequence_order: Option<i64>,
    pub created_by: &'a str,
    pub now: DateTime<Utc>,
}

pub(crate) fn node_from_row(row: &SqliteRow, blocked_by: BTreeSet<String>) -> FieldResult<FieldNode> {
    let node_type: String = row.try_get("node_type")?;
    let state: String = row.try_get("state")?;
    let content: String = row.try_get("content")?;
    let affinity: String = row.try_get("affinity")?;
    let resolved_at: Option<i64> = row.try_get("resolved_at")?;

    Ok(FieldNode {
        id: row.try_get("id")?,
        node_type: node_type.parse()?,
        title: row.try_get("title")?,
        content: serde_json::from_str(&content)?,
        potential: row.try_get("potential")?,
        temperature: row.try_get("temperature")?,
        temperature_updated_at: from_millis(row.try_get("temperature_updated_at")?),
        blocked_by,
        affinity: decode_set(&affinity)?,
        parent_id: row.try_get("parent_id")?,
        claimed_by: row.try_get("claimed_by")?,
        state: state.parse()?,
        sequence_order: row.try_get("sequence_order")?,
        created_by: row.try_get("created_by")?,
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
        resolved_at: resolved_at.map(from_millis),
        resolved_by: row.try_get("resolved_by")?,
    })
}

pub(crate) async fn fetch_blockers(
    conn: &mut SqliteConnection,
    node_id: &str,
) -> FieldResult<BTreeSet<String>> {
    let blockers: Vec<String> =
        sqlx::query_scalar("SELECT blocker_id FROM node_blockers WHERE node_id = ?1")
            .bind(node_id)
            .fetch_all(&mut *conn)
            .await?;
    Ok(blockers.into_iter().collect())
}

pub(crate) async fn fetch_node(
    conn: &mut SqliteConnection,
    node_id: &str,
) -> FieldResult<Option<FieldNode>> {
    let row = sqlx::query(&format!("SELECT {NODE_COLUMNS} FROM field_nodes WHERE id = ?1"))
        .bind(node_id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => {
            let blocked_by = fetch_blockers(conn, node_id).await?;
            Ok(Some(node_from_row(&row, blocked_by)?))
        }
        None => Ok(None),
    }
}

pub(crate) async fn require_node(conn: &mut SqliteConnection, node_id: &str) -> FieldResult<FieldNode> {
    fetch_node(conn, node_id)
        .await?
        .ok_or_else(|| FieldError::node_not_found(node_id))
}

pub(crate) async fn fetch_state(
    conn: &mut SqliteConnection,
    node_id: &str,
) -> FieldResult<Option<NodeState>> {
    let state: Option<String> = sqlx::query_scalar("SELECT state FROM field_nodes WHERE id = ?1")
        .bind(node_id)
        .fetch_optional(&mut *conn)
        .await?;
    state.map(|s| s.parse()).transpose()
}

pub(crate) async fn insert_node(conn: &mut SqliteConnection, node: &NewNode<'_>) -> FieldResult<()> {
    let now = to_millis(node.now);
    sqlx::query(
        r#"
        INSERT INTO field_nodes (
            id, node_type, title, content, potential, temperature, temperature_updated_at,
            affinity, parent_id, claimed_by, state, sequence_order, created_by,
            created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, 0.0, ?6, ?7, ?8, NULL, ?9, ?10, ?11, ?6, ?6)
        "#,
    )
    .bind(node.id)
    .bind(node.node_type.as_str())
    .bind(node.title)
    .bind(serde_json::to_string(node.content)?)
    .bind(node.potential)
    .bind(now)
    .bind(encode_set(node.affinity)?)
    .bind(node.parent_id)
    .bind(node.state.as_str())
    .bind(node.sequence_order)
    .bind(node.created_by)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn insert_blocker(
    conn: &mut SqliteConnection,
    node_id: &str,
    blocker_id: &str,
) -> FieldResult<bool> {
    let result =
        sqlx::query("INSERT OR IGNORE INTO node_blockers (node_id, blocker_id) VALUES (?1, ?2)")
            .bind(node_id)
            .bind(blocker_id)
            .execute(&mut *conn)
            .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove `blocker_id` from every dependent's blocker set and reopen the
/// dependents whose set became empty. Returns the reopened node ids.
pub(crate) async fn release_dependents(
    conn: &mut SqliteConnection,
    blocker_id: &str,
    now: DateTime<Utc>,
) -> FieldResult<Vec<String>> {
    let dependents: Vec<String> =
        sqlx::query_scalar("SELECT node_id FROM node_blockers WHERE blocker_id = ?1")
            .bind(blocker_id)
            .fetch_all(&mut *conn)
            .await?;

    if dependents.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query("DELETE FROM node_blockers WHERE blocker_id = ?1")
        .bind(blocker_id)
        .execute(&mut *conn)
        .await?;

    let mut reopened = Vec::new();
    for dependent in dependents {
        let result = sqlx::query(
            r#"
            UPDATE field_nodes
            SET state = 'open', updated_at = ?2
            WHERE id = ?1
              AND state = 'blocked'
              AND NOT EXISTS (SELECT 1 FROM node_blockers b WHERE b.node_id = field_nodes.id)
            "#,
        )
        .bind(&dependent)
        .bind(to_millis(now))
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() > 0 {
            reopened.push(dependent);
        }
    }

    Ok(reopened)
}

/// Clear a claim held by `holder`, returning the node to open (or blocked if
/// blockers exist) with the given temperature. Zero rows means the holder no
/// longer owns the node.
pub(crate) async fn clear_claim(
    conn: &mut SqliteConnection,
    node_id: &str,
    holder: &str,
    temperature: Option<f64>,
    now: DateTime<Utc>,
) -> FieldResult<bool> {
    let now = to_millis(now);
    let result = sqlx::query(
        r#"
        UPDATE field_nodes
        SET state = CASE
                WHEN EXISTS (SELECT 1 FROM node_blockers b WHERE b.node_id = field_nodes.id)
                THEN 'blocked' ELSE 'open' END,
            claimed_by = NULL,
            temperature = COALESCE(?3, temperature),
            temperature_updated_at = CASE WHEN ?3 IS NULL THEN temperature_updated_at ELSE ?4 END,
            updated_at = ?4
        WHERE id = ?1 AND state = 'claimed' AND claimed_by = ?2
        "#,
    )
    .bind(node_id)
    .bind(holder)
    .bind(temperature)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn write_temperature(
    conn: &mut SqliteConnection,
    node_id: &str,
    temperature: f64,
    now: DateTime<Utc>,
) -> FieldResult<()> {
    sqlx::query(
        "UPDATE field_nodes SET temperature = ?2, temperature_updated_at = ?3, updated_at = ?3 WHERE id = ?1",
    )
    .bind(node_id)
    .bind(temperature)
    .bind(to_millis(now))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Open nodes with an empty blocker set, optionally narrowed by type
pub(crate) async fn fetch_sense_candidates(
    pool: &SqlitePool,
    node_types: Option<&[NodeType]>,
) -> FieldResult<Vec<FieldNode>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {NODE_COLUMNS} FROM field_nodes n
        WHERE n.state = 'open'
          AND NOT EXISTS (SELECT 1 FROM node_blockers b WHERE b.node_id = n.id)
        "#
    ))
    .fetch_all(pool)
    .await?;

    let mut nodes = Vec::with_capacity(rows.len());
    for row in &rows {
        let node = node_from_row(row, BTreeSet::new())?;
        if node_types.map_or(true, |types| types.contains(&node.node_type)) {
            nodes.push(node);
        }
    }
    Ok(nodes)
}

/// Read-only access to stored nodes
#[derive(Clone)]
pub struct NodeStore {
    pool: SqlitePool,
}

impl NodeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, node_id: &str) -> FieldResult<Option<FieldNode>> {
        let mut conn = self.pool.acquire().await?;
        fetch_node(&mut conn, node_id).await
    }

    pub async fn require(&self, node_id: &str) -> FieldResult<FieldNode> {
        let mut conn = self.pool.acquire().await?;
        require_node(&mut conn, node_id).await
    }

    /// Direct children ordered by sequence then creation
    pub async fn children(&self, parent_id: &str) -> FieldResult<Vec<FieldNode>> {
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM field_nodes WHERE parent_id = ?1 \
             ORDER BY sequence_order IS NULL, sequence_order, created_at, id"
        );
        self.load_many(&sql, Some(parent_id)).await
    }

    pub async fn list(&self, state: Option<NodeState>) -> FieldResult<Vec<FieldNode>> {
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM field_nodes WHERE (?1 IS NULL OR state = ?1) \
             ORDER BY created_at, id"
        );
        self.load_many(&sql, state.map(NodeState::as_str)).await
    }

    pub async fn summary(&self) -> FieldResult<FieldSummary> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS total FROM field_nodes GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut summary = FieldSummary::default();
        for row in rows {
            let state: String = row.try_get("state")?;
            let total: i64 = row.try_get("total")?;
            let total = total.max(0) as u64;
            match state.parse::<NodeState>()? {
                NodeState::Open => summary.open = total,
                NodeState::Claimed => summary.claimed = total,
                NodeState::Resolved => summary.resolved = total,
                NodeState::Approved => summary.approved = total,
                NodeState::Blocked => summary.blocked = total,
            }
        }
        Ok(summary)
    }

    async fn load_many(&self, sql: &str, param: Option<&str>) -> FieldResult<Vec<FieldNode>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(sql).bind(param).fetch_all(&mut *conn).await?;

        let mut nodes = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id")?;
            let blocked_by = fetch_blockers(&mut conn, &id).await?;
            nodes.push(node_from_row(row, blocked_by)?);
        }
        Ok(nodes)
    }
}
