//! Store contract tests against the in-memory implementation.
//!
//! Verifies:
//! - Validation failures persist nothing
//! - Sparse updates, re-arming and optimistic-lock conflicts
//! - Archival is idempotent and partitions active/archived listings
//! - Bulk archival honours the snapshot boundary and archives each row once
//! - Due-trigger ordering and the compare-and-set FIRED marker
//! - Idempotent appends and event-time ordering of log queries

use std::sync::Arc;

use assert_matches::assert_matches;
use beacon_core::error::CoreError;
use beacon_db::models::event_log::NewEventLog;
use beacon_db::models::trigger::{CreateTrigger, UpdateTrigger};
use beacon_db::{EventLogStore, InMemoryStore, LogQuery, TriggerFilter, TriggerStore};
use chrono::{Duration, Utc};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn scheduled(name: &str, at: chrono::DateTime<Utc>) -> CreateTrigger {
    CreateTrigger {
        name: name.to_string(),
        trigger_type: "scheduled".to_string(),
        schedule_time: Some(at),
        api_payload: Some(json!({"source": "test"})),
    }
}

fn api(name: &str) -> CreateTrigger {
    CreateTrigger {
        name: name.to_string(),
        trigger_type: "api".to_string(),
        schedule_time: None,
        api_payload: None,
    }
}

// ---------------------------------------------------------------------------
// Create / get / update
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scheduled_without_time_persists_nothing() {
    let store = InMemoryStore::new();
    let input = CreateTrigger {
        schedule_time: None,
        ..scheduled("nightly", Utc::now())
    };
    assert_matches!(store.create(&input).await, Err(CoreError::Validation(_)));
    assert!(store.list(TriggerFilter::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_type_and_scalar_payload_are_rejected() {
    let store = InMemoryStore::new();
    let bad_type = CreateTrigger {
        trigger_type: "cron".into(),
        ..api("a")
    };
    assert_matches!(store.create(&bad_type).await, Err(CoreError::Validation(_)));

    let bad_payload = CreateTrigger {
        api_payload: Some(json!([1, 2])),
        ..api("b")
    };
    assert_matches!(store.create(&bad_payload).await, Err(CoreError::Validation(_)));
    assert!(store.list(TriggerFilter::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn ids_are_assigned_monotonically() {
    let store = InMemoryStore::new();
    let a = store.create(&api("a")).await.unwrap();
    let b = store.create(&api("b")).await.unwrap();
    assert!(b.id > a.id);
    assert_eq!(a.version, 0);
    assert!(!a.archived);
}

#[tokio::test]
async fn get_unknown_is_not_found() {
    let store = InMemoryStore::new();
    assert_matches!(
        store.get(99).await,
        Err(CoreError::NotFound { entity: "Trigger", id: 99 })
    );
}

#[tokio::test]
async fn sparse_update_changes_only_supplied_fields() {
    let store = InMemoryStore::new();
    let at = Utc::now() + Duration::hours(1);
    let created = store.create(&scheduled("nightly", at)).await.unwrap();

    let patch = UpdateTrigger {
        name: Some("renamed".into()),
        ..Default::default()
    };
    let updated = store.update(created.id, &patch).await.unwrap();
    assert_eq!(updated.name, "renamed");
    assert_eq!(updated.schedule_time, Some(at));
    assert_eq!(updated.api_payload, created.api_payload);
    assert_eq!(updated.version, created.version + 1);
}

#[tokio::test]
async fn invalid_update_leaves_row_untouched() {
    let store = InMemoryStore::new();
    let created = store
        .create(&scheduled("nightly", Utc::now()))
        .await
        .unwrap();
    let patch = UpdateTrigger {
        schedule_time: Some(None),
        ..Default::default()
    };
    assert_matches!(
        store.update(created.id, &patch).await,
        Err(CoreError::Validation(_))
    );
    assert_eq!(store.get(created.id).await.unwrap(), created);
}

#[tokio::test]
async fn rescheduling_rearms_fired_trigger() {
    let store = InMemoryStore::new();
    let at = Utc::now() - Duration::seconds(1);
    let created = store.create(&scheduled("once", at)).await.unwrap();
    assert!(store.mark_fired(created.id, at, Utc::now()).await.unwrap());
    assert!(store.next_due_time().await.unwrap().is_none());

    let later = Utc::now() + Duration::minutes(5);
    let patch = UpdateTrigger {
        schedule_time: Some(Some(later)),
        ..Default::default()
    };
    let updated = store.update(created.id, &patch).await.unwrap();
    assert!(updated.fired_at.is_none());
    assert_eq!(store.next_due_time().await.unwrap(), Some(later));
}

#[tokio::test]
async fn injected_conflict_surfaces_concurrent_modification() {
    let store = InMemoryStore::new();
    let created = store.create(&api("a")).await.unwrap();
    store.inject_conflicts(1);
    let patch = UpdateTrigger {
        name: Some("b".into()),
        ..Default::default()
    };
    assert_matches!(
        store.update(created.id, &patch).await,
        Err(CoreError::ConcurrentModification { .. })
    );
    // Only one conflict was injected.
    assert_eq!(store.update(created.id, &patch).await.unwrap().name, "b");
}

#[tokio::test]
async fn unavailable_store_fails_every_operation() {
    let store = InMemoryStore::new();
    store.set_unavailable(true);
    assert_matches!(store.ping().await, Err(CoreError::StoreUnavailable(_)));
    assert_matches!(
        store.list(TriggerFilter::Active).await,
        Err(CoreError::StoreUnavailable(_))
    );
    store.set_unavailable(false);
    assert!(store.ping().await.is_ok());
}

// ---------------------------------------------------------------------------
// Archival
// ---------------------------------------------------------------------------

#[tokio::test]
async fn archive_is_idempotent_and_partitions_listings() {
    let store = InMemoryStore::new();
    let a = store.create(&api("a")).await.unwrap();
    let b = store.create(&api("b")).await.unwrap();

    let first = store.archive(a.id).await.unwrap();
    assert!(first.archived);
    assert!(first.archived_at.is_some());
    let second = store.archive(a.id).await.unwrap();
    assert_eq!(second, first);

    let active = store.list(TriggerFilter::Active).await.unwrap();
    let archived = store.list(TriggerFilter::Archived).await.unwrap();
    assert_eq!(active.iter().map(|t| t.id).collect::<Vec<_>>(), vec![b.id]);
    assert_eq!(archived.iter().map(|t| t.id).collect::<Vec<_>>(), vec![a.id]);
    assert_eq!(store.list(TriggerFilter::All).await.unwrap().len(), 2);
}

#[tokio::test]
async fn archive_unknown_is_not_found() {
    let store = InMemoryStore::new();
    assert_matches!(store.archive(5).await, Err(CoreError::NotFound { .. }));
}

#[tokio::test]
async fn archival_boundary_uses_snapshot() {
    let store = InMemoryStore::new();
    store.create(&api("a")).await.unwrap();
    let now = Utc::now();

    // Created 29 days before the snapshot: kept.
    let kept = TriggerStore::archive_older_than(&store, Duration::days(30), now + Duration::days(29))
        .await
        .unwrap();
    assert_eq!(kept, 0);

    // Created 31 days before the snapshot: archived.
    let archived =
        TriggerStore::archive_older_than(&store, Duration::days(30), now + Duration::days(31))
            .await
            .unwrap();
    assert_eq!(archived, 1);
}

#[tokio::test]
async fn concurrent_bulk_archives_archive_each_row_once() {
    let store = Arc::new(InMemoryStore::new());
    for i in 0..20 {
        store.create(&api(&format!("t{i}"))).await.unwrap();
    }
    let as_of = Utc::now() + Duration::days(31);

    let a = {
        let store = store.clone();
        tokio::spawn(async move {
            TriggerStore::archive_older_than(store.as_ref(), Duration::days(30), as_of).await
        })
    };
    let b = {
        let store = store.clone();
        tokio::spawn(async move {
            TriggerStore::archive_older_than(store.as_ref(), Duration::days(30), as_of).await
        })
    };
    let total = a.await.unwrap().unwrap() + b.await.unwrap().unwrap();
    assert_eq!(total, 20);

    let rerun = TriggerStore::archive_older_than(store.as_ref(), Duration::days(30), as_of)
        .await
        .unwrap();
    assert_eq!(rerun, 0);
}

#[tokio::test]
async fn logs_survive_trigger_archival() {
    let store = InMemoryStore::new();
    let t = store.create(&api("a")).await.unwrap();
    store
        .append(&NewEventLog::new(t.id, "api_fire"))
        .await
        .unwrap();
    store.archive(t.id).await.unwrap();

    let logs = store
        .query(&LogQuery {
            trigger_id: Some(t.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
}

// ---------------------------------------------------------------------------
// Scheduling support
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_due_orders_by_schedule_then_id() {
    let store = InMemoryStore::new();
    let now = Utc::now();
    let late = store
        .create(&scheduled("late", now - Duration::seconds(1)))
        .await
        .unwrap();
    let early_a = store
        .create(&scheduled("early-a", now - Duration::seconds(10)))
        .await
        .unwrap();
    let early_b = store
        .create(&scheduled("early-b", now - Duration::seconds(10)))
        .await
        .unwrap();
    store
        .create(&scheduled("future", now + Duration::hours(1)))
        .await
        .unwrap();
    store.create(&api("not-scheduled")).await.unwrap();

    let due = store.list_due(now, 10).await.unwrap();
    let ids: Vec<_> = due.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![early_a.id, early_b.id, late.id]);

    let limited = store.list_due(now, 2).await.unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn archived_triggers_are_never_due() {
    let store = InMemoryStore::new();
    let t = store
        .create(&scheduled("x", Utc::now() - Duration::seconds(5)))
        .await
        .unwrap();
    store.archive(t.id).await.unwrap();
    assert!(store.list_due(Utc::now(), 10).await.unwrap().is_empty());
    assert!(store.next_due_time().await.unwrap().is_none());
}

#[tokio::test]
async fn mark_fired_is_compare_and_set() {
    let store = InMemoryStore::new();
    let at = Utc::now() - Duration::seconds(1);
    let t = store.create(&scheduled("x", at)).await.unwrap();

    assert!(!store
        .mark_fired(t.id, at + Duration::seconds(1), Utc::now())
        .await
        .unwrap());
    assert!(store.mark_fired(t.id, at, Utc::now()).await.unwrap());
    assert!(!store.mark_fired(t.id, at, Utc::now()).await.unwrap());
    assert!(store.list_due(Utc::now(), 10).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

#[tokio::test]
async fn append_once_dedupes_by_key() {
    let store = InMemoryStore::new();
    let entry = NewEventLog::new(1, "scheduled_fire");
    let first = store.append_once(&entry, "1:scheduled:100").await.unwrap();
    let second = store.append_once(&entry, "1:scheduled:100").await.unwrap();
    assert!(first.is_inserted());
    assert!(!second.is_inserted());
    assert_eq!(first.into_log(), second.into_log());
    assert_eq!(store.log_count().await, 1);
}

#[tokio::test]
async fn concurrent_append_once_writes_one_row() {
    let store = Arc::new(InMemoryStore::new());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .append_once(&NewEventLog::new(1, "api_fire"), "1:api:7")
                    .await
            })
        })
        .collect();
    let mut inserted = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_inserted() {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);
    assert_eq!(store.log_count().await, 1);
}

#[tokio::test]
async fn query_orders_by_event_time_not_insertion() {
    let store = InMemoryStore::new();
    let now = Utc::now();
    let late = store
        .append(&NewEventLog::new(1, "manual_test").at(now))
        .await
        .unwrap();
    let early = store
        .append(&NewEventLog::new(1, "manual_test").at(now - Duration::minutes(5)))
        .await
        .unwrap();

    let logs = store.query(&LogQuery::default()).await.unwrap();
    assert_eq!(
        logs.iter().map(|l| l.id).collect::<Vec<_>>(),
        vec![early.id, late.id]
    );
}

#[tokio::test]
async fn query_filters_since_and_trigger() {
    let store = InMemoryStore::new();
    let now = Utc::now();
    store
        .append(&NewEventLog::new(1, "manual_test").at(now - Duration::hours(3)))
        .await
        .unwrap();
    store
        .append(&NewEventLog::new(1, "manual_test").at(now - Duration::minutes(30)))
        .await
        .unwrap();
    store
        .append(&NewEventLog::new(2, "api_fire").at(now - Duration::minutes(10)))
        .await
        .unwrap();

    let recent = store
        .query(&LogQuery {
            since: Some(now - Duration::hours(2)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(recent.len(), 2);

    let for_one = store
        .query(&LogQuery {
            since: Some(now - Duration::hours(2)),
            trigger_id: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(for_one.len(), 1);
}

#[tokio::test]
async fn log_archival_moves_rows_to_archived_view() {
    let store = InMemoryStore::new();
    let now = Utc::now();
    store
        .append(&NewEventLog::new(1, "manual_test").at(now - Duration::days(8)))
        .await
        .unwrap();
    store
        .append(&NewEventLog::new(1, "manual_test").at(now - Duration::days(6)))
        .await
        .unwrap();

    let count = EventLogStore::archive_older_than(&store, Duration::days(7), now)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let active = store.query(&LogQuery::default()).await.unwrap();
    let archived = store
        .query(&LogQuery {
            archived: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(archived.len(), 1);
}

#[tokio::test]
async fn scalar_log_payload_is_rejected() {
    let store = InMemoryStore::new();
    let entry = NewEventLog::new(1, "manual_test").with_payload(Some(json!("text")));
    assert_matches!(store.append(&entry).await, Err(CoreError::Validation(_)));
    assert_eq!(store.log_count().await, 0);
}
