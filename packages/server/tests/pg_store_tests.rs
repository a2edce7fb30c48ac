//! Postgres queue store contract tests.
//!
//! Ignored by default; point DATABASE_URL at a scratch database and run
//! with `--ignored`. Each test works in its own job types so runs do not
//! interfere.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use harmony_core::kernel::clock::SystemClock;
use harmony_core::kernel::jobs::{
    AckResult, ErrorKind, FailResult, JobError, JobState, NewJob, PostgresQueueStore, QueueStore,
};

async fn store() -> (PgPool, PostgresQueueStore) {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for pg tests");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to scratch database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");

    let queue = PostgresQueueStore::new(pool.clone(), Arc::new(SystemClock));
    (pool, queue)
}

fn unique_type(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn enqueue_lease_complete_roundtrip() {
    let (_pool, store) = store().await;
    let job_type = unique_type("sync");

    let out = store
        .enqueue(NewJob::builder().job_type(job_type.clone()).build())
        .await
        .unwrap();
    assert!(out.inserted);

    let leased = store
        .lease(&job_type, "w1", Duration::from_secs(30), 10)
        .await
        .unwrap();
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].id, out.id);
    assert_eq!(leased[0].state, JobState::Leased);

    assert_eq!(store.complete(out.id, "w1").await.unwrap(), AckResult::Ok);
    let done = store.get(out.id).await.unwrap().unwrap();
    assert_eq!(done.state, JobState::Succeeded);
    assert!(done.lease_owner.is_none());
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn idempotency_key_is_enforced_by_the_partial_index() {
    let (_pool, store) = store().await;
    let job_type = unique_type("artist_sync");

    let first = store
        .enqueue(
            NewJob::builder()
                .job_type(job_type.clone())
                .idempotency_key("artist-42")
                .build(),
        )
        .await
        .unwrap();
    let dup = store
        .enqueue(
            NewJob::builder()
                .job_type(job_type.clone())
                .idempotency_key("artist-42")
                .build(),
        )
        .await
        .unwrap();

    assert!(first.inserted);
    assert!(!dup.inserted);
    assert_eq!(first.id, dup.id);
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn fail_with_delay_schedules_a_retry() {
    let (_pool, store) = store().await;
    let job_type = unique_type("sync");

    let out = store
        .enqueue(NewJob::builder().job_type(job_type.clone()).build())
        .await
        .unwrap();
    store
        .lease(&job_type, "w1", Duration::from_secs(30), 1)
        .await
        .unwrap();

    let result = store
        .fail(
            out.id,
            "w1",
            JobError::new(ErrorKind::Dependency, "boom"),
            Some(Duration::from_secs(60)),
        )
        .await
        .unwrap();
    assert!(matches!(result, FailResult::Retried { .. }));

    let job = store.get(out.id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::FailedRetry);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.last_error.as_ref().unwrap().kind, ErrorKind::Dependency);

    // Not leasable until the delay has passed.
    let leased = store
        .lease(&job_type, "w1", Duration::from_secs(30), 1)
        .await
        .unwrap();
    assert!(leased.is_empty());
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn stale_owner_commits_are_lost() {
    let (_pool, store) = store().await;
    let job_type = unique_type("sync");

    let out = store
        .enqueue(NewJob::builder().job_type(job_type.clone()).build())
        .await
        .unwrap();
    store
        .lease(&job_type, "w1", Duration::from_secs(30), 1)
        .await
        .unwrap();

    assert_eq!(
        store.complete(out.id, "somebody-else").await.unwrap(),
        AckResult::Lost
    );
    assert_eq!(
        store
            .heartbeat(out.id, "somebody-else", Duration::from_secs(30))
            .await
            .unwrap(),
        AckResult::Lost
    );
}
