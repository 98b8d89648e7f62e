// Context bundles - curated knowledge packages attached to field nodes
//
// Attachment is append-only: re-attaching an existing (node, bundle) pair is
// a no-op and keeps the original score and author.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::{decode_set, encode_set, from_millis, to_millis};
use crate::error::{FieldError, FieldResult};
use crate::events::{EventBus, FieldEvent};
use crate::field::types::validate_tags;

const BUNDLE_COLUMNS: &str = "id, slug, domain, keywords, affinities, content, priority, is_active, \
     created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub id: String,
    pub slug: String,
    pub domain: String,
    pub keywords: BTreeSet<String>,
    pub affinities: BTreeSet<String>,
    pub content: String,
    pub priority: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Authoring input for `BundleStore::upsert`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleDraft {
    pub slug: String,
    pub domain: String,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    #[serde(default)]
    pub affinities: BTreeSet<String>,
    pub content: String,
    #[serde(default)]
    pub priority: i64,
}

/// A bundle as linked to a particular node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedBundle {
    pub bundle: ContextBundle,
    pub match_score: f64,
    pub attached_by: String,
    pub attached_at: DateTime<Utc>,
}

fn bundle_from_row(row: &SqliteRow) -> FieldResult<ContextBundle> {
    let keywords: String = row.try_get("keywords")?;
    let affinities: String = row.try_get("affinities")?;
    Ok(ContextBundle {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        domain: row.try_get("domain")?,
        keywords: decode_set(&keywords)?,
        affinities: decode_set(&affinities)?,
        content: row.try_get("content")?,
        priority: row.try_get("priority")?,
        is_active: row.try_get("is_active")?,
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}

#[derive(Clone)]
pub struct BundleStore {
    pool: SqlitePool,
    events: EventBus,
}

impl BundleStore {
    pub fn new(pool: SqlitePool, events: EventBus) -> Self {
        Self { pool, events }
    }

    /// Create or replace the bundle with this slug. Replacing reactivates it.
    pub async fn upsert(&self, draft: BundleDraft) -> FieldResult<ContextBundle> {
        if draft.slug.trim().is_empty() || draft.domain.trim().is_empty() {
            return Err(FieldError::Validation(
                "bundle slug and domain must not be empty".to_string(),
            ));
        }
        validate_tags(&draft.affinities, false)?;

        let now = to_millis(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO context_bundles (
                id, slug, domain, keywords, affinities, content, priority, is_active,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)
            ON CONFLICT(slug) DO UPDATE SET
                domain = excluded.domain,
                keywords = excluded.keywords,
                affinities = excluded.affinities,
                content = excluded.content,
                priority = excluded.priority,
                is_active = 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&draft.slug)
        .bind(&draft.domain)
        .bind(encode_set(&draft.keywords)?)
        .bind(encode_set(&draft.affinities)?)
        .bind(&draft.content)
        .bind(draft.priority)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(slug = %draft.slug, "Bundle stored");
        self.get_by_slug(&draft.slug)
            .await?
            .ok_or_else(|| FieldError::NotFound {
                entity: "Bundle",
                id: draft.slug.clone(),
            })
    }

    pub async fn get_by_slug(&self, slug: &str) -> FieldResult<Option<ContextBundle>> {
        let row = sqlx::query(&format!(
            "SELECT {BUNDLE_COLUMNS} FROM context_bundles WHERE slug = ?1"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(bundle_from_row).transpose()
    }

    /// Active bundles, optionally for one domain, highest priority first
    pub async fn list_active(&self, domain: Option<&str>) -> FieldResult<Vec<ContextBundle>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {BUNDLE_COLUMNS} FROM context_bundles
            WHERE is_active = 1 AND (?1 IS NULL OR domain = ?1)
            ORDER BY priority DESC, slug
            "#
        ))
        .bind(domain)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(bundle_from_row).collect()
    }

    /// Hide a bundle from listings. Existing attachments are kept.
    pub async fn deactivate(&self, slug: &str) -> FieldResult<()> {
        let result = sqlx::query(
            "UPDATE context_bundles SET is_active = 0, updated_at = ?2 WHERE slug = ?1",
        )
        .bind(slug)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FieldError::NotFound {
                entity: "Bundle",
                id: slug.to_string(),
            });
        }
        info!(slug = %slug, "Bundle deactivated");
        Ok(())
    }

    /// Link a bundle to a node. Returns false when the link already existed.
    pub async fn attach(
        &self,
        node_id: &str,
        bundle_id: &str,
        match_score: f64,
        attached_by: &str,
    ) -> FieldResult<bool> {
        if !match_score.is_finite() || match_score < 0.0 {
            return Err(FieldError::Validation(format!(
                "match score must be a non-negative number, got {match_score}"
            )));
        }

        let node_exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM field_nodes WHERE id = ?1")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?;
        if node_exists.is_none() {
            return Err(FieldError::node_not_found(node_id));
        }
        let bundle_exists: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM context_bundles WHERE id = ?1")
                .bind(bundle_id)
                .fetch_optional(&self.pool)
                .await?;
        if bundle_exists.is_none() {
            return Err(FieldError::NotFound {
                entity: "Bundle",
                id: bundle_id.to_string(),
            });
        }

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO node_bundles (node_id, bundle_id, match_score, attached_by, attached_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(node_id)
        .bind(bundle_id)
        .bind(match_score)
        .bind(attached_by)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        let attached = result.rows_affected() > 0;
        if attached {
            debug!(node_id = %node_id, bundle_id = %bundle_id, match_score, "Bundle attached");
            self.events.publish(FieldEvent::BundleAttached {
                node_id: node_id.to_string(),
                bundle_id: bundle_id.to_string(),
            });
        }
        Ok(attached)
    }

    /// Bundles linked to a node, best match first
    pub async fn bundles_for_node(&self, node_id: &str) -> FieldResult<Vec<AttachedBundle>> {
        let rows = sqlx::query(
            r#"
            SELECT b.id, b.slug, b.domain, b.keywords, b.affinities, b.content, b.priority,
                   b.is_active, b.created_at, b.updated_at,
                   nb.match_score, nb.attached_by, nb.attached_at
            FROM node_bundles nb
            JOIN context_bundles b ON b.id = nb.bundle_id
            WHERE nb.node_id = ?1
            ORDER BY nb.match_score DESC, b.priority DESC, b.slug
            "#,
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> FieldResult<AttachedBundle> {
                Ok(AttachedBundle {
                    bundle: bundle_from_row(row)?,
                    match_score: row.try_get("match_score")?,
                    attached_by: row.try_get("attached_by")?,
                    attached_at: from_millis(row.try_get("attached_at")?),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;

    fn draft(slug: &str, domain: &str, priority: i64) -> BundleDraft {
        BundleDraft {
            slug: slug.to_string(),
            domain: domain.to_string(),
            keywords: ["sqlx".to_string()].into_iter().collect(),
            affinities: ["backend".to_string()].into_iter().collect(),
            content: format!("notes for {slug}"),
            priority,
        }
    }

    #[tokio::test]
    async fn test_upsert_by_slug() {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseManager::in_directory(dir.path()).await.unwrap();
        let store = BundleStore::new(db.pool().clone(), EventBus::default());

        let first = store.upsert(draft("rust-errors", "rust", 1)).await.unwrap();
        let mut changed = draft("rust-errors", "rust", 5);
        changed.content = "updated".to_string();
        let second = store.upsert(changed).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.priority, 5);
        assert_eq!(second.content, "updated");
    }

    #[tokio::test]
    async fn test_list_and_deactivate() {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseManager::in_directory(dir.path()).await.unwrap();
        let store = BundleStore::new(db.pool().clone(), EventBus::default());

        store.upsert(draft("low", "rust", 1)).await.unwrap();
        store.upsert(draft("high", "rust", 9)).await.unwrap();
        store.upsert(draft("css", "web", 3)).await.unwrap();

        let rust: Vec<String> = store
            .list_active(Some("rust"))
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.slug)
            .collect();
        assert_eq!(rust, vec!["high", "low"]);

        store.deactivate("high").await.unwrap();
        assert_eq!(store.list_active(None).await.unwrap().len(), 2);
        assert!(matches!(
            store.deactivate("missing").await,
            Err(FieldError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_upsert_validation() {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseManager::in_directory(dir.path()).await.unwrap();
        let store = BundleStore::new(db.pool().clone(), EventBus::default());

        assert!(store.upsert(draft("", "rust", 0)).await.is_err());
        let mut bad = draft("x", "rust", 0);
        bad.affinities.insert("Bad Tag".to_string());
        assert!(matches!(store.upsert(bad).await, Err(FieldError::Validation(_))));
    }
}
