//! Context bundles attached to field nodes: append-only links, ranking by
//! match score, and links that outlive deactivation.

mod fixtures;

use fixtures::{task, test_field};
use swarm_field::{BundleDraft, FieldError};

fn draft(slug: &str, priority: i64) -> BundleDraft {
    BundleDraft {
        slug: slug.to_string(),
        domain: "backend".to_string(),
        keywords: ["sqlite".to_string(), "migrations".to_string()].into_iter().collect(),
        affinities: ["backend".to_string()].into_iter().collect(),
        content: format!("# {slug}\nHow we do it here."),
        priority,
    }
}

#[tokio::test]
async fn test_attached_bundles_come_back_best_match_first() {
    let field = test_field().await;
    let receipt = field
        .coordinator()
        .deposit(&task("add audit table", "backend", 0.6), "planner")
        .await
        .unwrap();

    let style = field.bundles().upsert(draft("sql-style", 1)).await.unwrap();
    let migrations = field.bundles().upsert(draft("migrations", 5)).await.unwrap();

    assert!(field
        .bundles()
        .attach(&receipt.id, &style.id, 0.3, "curator")
        .await
        .unwrap());
    assert!(field
        .bundles()
        .attach(&receipt.id, &migrations.id, 0.8, "curator")
        .await
        .unwrap());

    let attached = field.bundles().bundles_for_node(&receipt.id).await.unwrap();
    let slugs: Vec<&str> = attached.iter().map(|a| a.bundle.slug.as_str()).collect();
    assert_eq!(slugs, vec!["migrations", "sql-style"]);
    assert_eq!(attached[0].match_score, 0.8);
    assert_eq!(attached[0].attached_by, "curator");
}

#[tokio::test]
async fn test_reattaching_keeps_the_original_link() {
    let field = test_field().await;
    let receipt = field
        .coordinator()
        .deposit(&task("tune pool", "backend", 0.5), "planner")
        .await
        .unwrap();
    let bundle = field.bundles().upsert(draft("pooling", 0)).await.unwrap();

    assert!(field
        .bundles()
        .attach(&receipt.id, &bundle.id, 0.4, "curator")
        .await
        .unwrap());
    assert!(!field
        .bundles()
        .attach(&receipt.id, &bundle.id, 0.99, "someone-else")
        .await
        .unwrap());

    let attached = field.bundles().bundles_for_node(&receipt.id).await.unwrap();
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0].match_score, 0.4);
    assert_eq!(attached[0].attached_by, "curator");

    // Deactivation hides the bundle from listings but not from the node
    field.bundles().deactivate("pooling").await.unwrap();
    assert!(field.bundles().list_active(Some("backend")).await.unwrap().is_empty());
    let attached = field.bundles().bundles_for_node(&receipt.id).await.unwrap();
    assert_eq!(attached.len(), 1);
    assert!(!attached[0].bundle.is_active);
}

#[tokio::test]
async fn test_attach_rejects_unknown_ids_and_bad_scores() {
    let field = test_field().await;
    let receipt = field
        .coordinator()
        .deposit(&task("write docs", "docs", 0.2), "planner")
        .await
        .unwrap();
    let bundle = field.bundles().upsert(draft("docs-style", 0)).await.unwrap();

    let missing_node = field.bundles().attach("nope", &bundle.id, 0.5, "curator").await;
    assert!(matches!(
        missing_node,
        Err(FieldError::NotFound { entity: "Node", .. })
    ));

    let missing_bundle = field.bundles().attach(&receipt.id, "nope", 0.5, "curator").await;
    assert!(matches!(
        missing_bundle,
        Err(FieldError::NotFound { entity: "Bundle", .. })
    ));

    let negative = field.bundles().attach(&receipt.id, &bundle.id, -0.1, "curator").await;
    assert!(matches!(negative, Err(FieldError::Validation(_))));

    let nan = field
        .bundles()
        .attach(&receipt.id, &bundle.id, f64::NAN, "curator")
        .await;
    assert!(matches!(nan, Err(FieldError::Validation(_))));

    assert!(field.bundles().bundles_for_node(&receipt.id).await.unwrap().is_empty());
}
