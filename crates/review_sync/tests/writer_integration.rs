//! Batch writer behaviour against a real (in-memory SQLite) schema.

#![cfg(all(feature = "sqlite", feature = "migrate"))]

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use sea_orm::{EntityTrait, QueryOrder};
use serde_json::json;

use review_sync::entity::{review, review_file_version, review_progress_step};
use review_sync::sync::transform::{
    file_version_models, progress_models, review_model, workflow_model,
};
use review_sync::writer::find_progress;
use review_sync::{
    BatchUpsertWriter, EntityBatch, EntityKind, StepStatus, UpsertCounts, connect_and_migrate,
};

fn at(hour: u32) -> DateTime<FixedOffset> {
    Utc.with_ymd_and_hms(2025, 10, 19, hour, 0, 0)
        .single()
        .unwrap()
        .fixed_offset()
}

async fn writer() -> BatchUpsertWriter {
    let db = connect_and_migrate("sqlite::memory:")
        .await
        .expect("Failed to create test database");
    BatchUpsertWriter::new(db).with_batch_size(2)
}

fn step(status: &str, completed_at: Option<&str>) -> review_progress_step::Model {
    let mut record = json!({"stepId": "s1", "stepOrder": 1, "status": status});
    if let Some(ts) = completed_at {
        record["completedAt"] = json!(ts);
    }
    progress_models("r-1", &[record], &[], at(12))
        .rows
        .remove(0)
}

async fn stored_reviews(writer: &BatchUpsertWriter) -> Vec<review::Model> {
    review::Entity::find()
        .order_by_asc(review::Column::ReviewId)
        .all(writer.connection())
        .await
        .unwrap()
}

async fn stored_versions(writer: &BatchUpsertWriter) -> Vec<review_file_version::Model> {
    review_file_version::Entity::find()
        .order_by_asc(review_file_version::Column::FileVersionUrn)
        .all(writer.connection())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_reupsert_updates_without_inserting() {
    let writer = writer().await;
    let workflows: Vec<_> = (0..5)
        .map(|n| workflow_model(&json!({"id": format!("wf-{n}"), "name": "W"}), at(1)).unwrap())
        .collect();

    let first = writer.upsert_workflows(workflows.clone()).await.unwrap();
    assert_eq!(first, UpsertCounts { inserted: 5, updated: 0 });

    let renamed: Vec<_> = workflows
        .into_iter()
        .map(|mut w| {
            w.name = "Renamed".to_string();
            w.synced_at = at(2);
            w
        })
        .collect();
    let second = writer
        .upsert_batch(EntityBatch::Workflows(renamed))
        .await
        .unwrap();
    assert_eq!(second, UpsertCounts { inserted: 0, updated: 5 });

    assert_eq!(writer.count(EntityKind::Workflows).await.unwrap(), 5);
    let stored = writer.lookup_workflow("wf-3").await.unwrap().unwrap();
    assert_eq!(stored.name, "Renamed");
    assert_eq!(stored.synced_at, at(2));
}

#[tokio::test]
async fn test_duplicate_keys_in_one_batch_keep_last() {
    let writer = writer().await;
    let reviews = vec![
        review_model(&json!({"id": "r-1", "name": "old"}), Some("p"), at(1)).unwrap(),
        review_model(&json!({"id": "r-2", "name": "other"}), Some("p"), at(1)).unwrap(),
        review_model(&json!({"id": "r-1", "name": "new"}), Some("p"), at(1)).unwrap(),
    ];

    let counts = writer.upsert_reviews(reviews).await.unwrap();
    assert_eq!(counts.total(), 2);

    let stored = writer.lookup_review("r-1").await.unwrap().unwrap();
    assert_eq!(stored.name, "new");
}

#[tokio::test]
async fn test_send_back_cycle_keeps_history() {
    let writer = writer().await;

    // Step opened, then sent back: the active row becomes history.
    let counts = writer
        .upsert_progress_steps(vec![step("open", None)])
        .await
        .unwrap();
    assert_eq!(counts.inserted, 1);
    let counts = writer
        .upsert_progress_steps(vec![step("sent_back", Some("2025-10-01T10:00:00Z"))])
        .await
        .unwrap();
    assert_eq!(counts, UpsertCounts { inserted: 0, updated: 1 });

    // Reopened: a new active row next to the history row.
    let counts = writer
        .upsert_progress_steps(vec![step("open", None)])
        .await
        .unwrap();
    assert_eq!(counts.inserted, 1);

    // Completed for good.
    let counts = writer
        .upsert_progress_steps(vec![step("completed", Some("2025-10-02T10:00:00Z"))])
        .await
        .unwrap();
    assert_eq!(counts.updated, 1);

    let rows = find_progress(writer.connection(), "r-1").await.unwrap();
    let statuses: Vec<_> = rows.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![StepStatus::SentBack, StepStatus::Completed]);

    // Replaying the whole history matches each row by its completion time.
    let counts = writer
        .upsert_progress_steps(vec![
            step("sent_back", Some("2025-10-01T10:00:00Z")),
            step("completed", Some("2025-10-02T10:00:00Z")),
        ])
        .await
        .unwrap();
    assert_eq!(counts, UpsertCounts { inserted: 0, updated: 2 });
    assert_eq!(writer.count(EntityKind::ProgressSteps).await.unwrap(), 2);
}

#[tokio::test]
async fn test_untimed_send_backs_keep_separate_history() {
    let writer = writer().await;

    writer
        .upsert_progress_steps(vec![step("open", None)])
        .await
        .unwrap();
    let counts = writer
        .upsert_progress_steps(vec![step("sent_back", None)])
        .await
        .unwrap();
    assert_eq!(counts, UpsertCounts { inserted: 0, updated: 1 });

    // Replayed history plus a reopened step.
    let counts = writer
        .upsert_progress_steps(vec![step("sent_back", None), step("open", None)])
        .await
        .unwrap();
    assert_eq!(counts, UpsertCounts { inserted: 1, updated: 1 });

    // Sent back a second time: the reopened row transitions.
    let counts = writer
        .upsert_progress_steps(vec![step("sent_back", None), step("sent_back", None)])
        .await
        .unwrap();
    assert_eq!(counts, UpsertCounts { inserted: 0, updated: 2 });

    let rows = find_progress(writer.connection(), "r-1").await.unwrap();
    let statuses: Vec<_> = rows.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![StepStatus::SentBack, StepStatus::SentBack]);
}

#[tokio::test]
async fn test_identical_upsert_leaves_rows_unchanged() {
    let writer = writer().await;
    let reviews: Vec<_> = (0..3)
        .map(|n| {
            review_model(
                &json!({"id": format!("r-{n}"), "name": "R", "status": "OPEN",
                        "updatedAt": "2025-10-02T00:00:00Z"}),
                Some("p"),
                at(3),
            )
            .unwrap()
        })
        .collect();
    let versions = file_version_models(
        "r-0",
        &[
            json!({"urn": "urn:a", "name": "a.pdf", "versionNumber": 1}),
            json!({"urn": "urn:b", "name": "b.dwg", "versionNumber": 2}),
        ],
        at(3),
    )
    .rows;

    writer.upsert_reviews(reviews.clone()).await.unwrap();
    writer.upsert_file_versions(versions.clone()).await.unwrap();

    let reviews_before = stored_reviews(&writer).await;
    let versions_before = stored_versions(&writer).await;

    let counts = writer.upsert_reviews(reviews).await.unwrap();
    assert_eq!(counts, UpsertCounts { inserted: 0, updated: 3 });
    let counts = writer.upsert_file_versions(versions).await.unwrap();
    assert_eq!(counts, UpsertCounts { inserted: 0, updated: 2 });

    assert_eq!(stored_reviews(&writer).await, reviews_before);
    assert_eq!(stored_versions(&writer).await, versions_before);
}

#[tokio::test]
async fn test_empty_batch_is_a_no_op() {
    let writer = writer().await;
    let counts = writer
        .upsert_batch(EntityBatch::FileVersions(Vec::new()))
        .await
        .unwrap();
    assert_eq!(counts, UpsertCounts::default());
    assert_eq!(writer.metrics().batches, 0);
}
