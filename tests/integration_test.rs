use neighborhood_insight::{
    config::AppConfig,
    db,
    models::job::{AnalysisJob, AnalysisKind, JobStatus},
    services::{
        job_store::{JobStore, PgJobStore, StoreError},
        queue::{state, DistributedBackend, RedisTaskBackend, TaskState},
    },
};
use serde_json::json;

/// Integration test: job persistence in PostgreSQL
///
/// Covers migrations, create/get, checkpoint saves, the terminal-state guard
/// and the recent-completed listing.
///
/// Note: This requires a running PostgreSQL instance configured via DATABASE_URL.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_postgres_job_store() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let database_url = config.database_url.as_deref().expect("DATABASE_URL must be set");

    let db_pool = db::init_pool(database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    let store = PgJobStore::new(db_pool.clone());
    store.health_check().await.expect("Health check failed");

    let mut job = AnalysisJob::new(
        "Koramangala, Bengaluru",
        1000,
        vec!["restaurant".to_string(), "park".to_string()],
        false,
        true,
    );
    store.create(&job).await.expect("Failed to create job");

    let loaded = store.get(job.id).await.unwrap().expect("Job not found");
    assert_eq!(loaded.status, JobStatus::Pending);
    assert_eq!(loaded.amenity_types, job.amenity_types);

    job.start("Geocoding").unwrap();
    job.checkpoint(40, "Amenities fetched").unwrap();
    job.walk_score = Some(72.5);
    store.save(&job).await.expect("Failed to save checkpoint");

    let loaded = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Processing);
    assert_eq!(loaded.progress, 40);
    assert_eq!(loaded.walk_score, Some(72.5));

    job.complete().unwrap();
    store.save(&job).await.expect("Failed to save completion");

    let mut stale = job.clone();
    stale.status = JobStatus::Processing;
    assert!(matches!(
        store.save(&stale).await,
        Err(StoreError::Terminal(_, JobStatus::Completed))
    ));

    let recent = store
        .list_recent_completed(AnalysisKind::Neighborhood, 50)
        .await
        .unwrap();
    assert!(recent.iter().any(|j| j.id == job.id));

    let green = AnalysisJob::green_space("Cubbon Park, Bengaluru", 800);
    store.create(&green).await.expect("Failed to create green-space job");
    let loaded = store.get(green.id).await.unwrap().expect("Job not found");
    assert_eq!(loaded.kind, AnalysisKind::GreenSpace);
    assert!(loaded.amenity_types.is_empty());

    sqlx::query("DELETE FROM analysis_jobs WHERE id = ANY($1)")
        .bind(vec![job.id, green.id])
        .execute(&db_pool)
        .await
        .expect("Failed to clean up");

    db_pool.close().await;
}

/// Integration test: redis queue and task-state round trip
///
/// Note: This requires a running Redis instance configured via REDIS_URL.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_redis_task_backend() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let redis_url = config.redis_url.as_deref().expect("REDIS_URL must be set");

    let backend = RedisTaskBackend::connect(redis_url, 60)
        .await
        .expect("Failed to connect to Redis");

    let job_id = uuid::Uuid::new_v4();
    let task_id = backend.enqueue(job_id).await.expect("Failed to enqueue");

    let pending = backend.task_state(&task_id).await.unwrap().expect("State not written");
    assert_eq!(pending.status(), JobStatus::Pending);
    assert_eq!(pending.job_id, Some(job_id));

    // Drain until our submission comes up; other tests may share the queue.
    let queued = loop {
        let next = backend.dequeue().await.unwrap().expect("Queue drained without our job");
        if next.job_id == job_id {
            break next;
        }
        backend.complete(&next).await.unwrap();
    };
    assert_eq!(queued.task_id, task_id);

    backend
        .set_state(
            &task_id,
            &TaskState::new(state::PROGRESS, job_id, json!({ "progress": 55, "status": "Walk score computed" })),
        )
        .await
        .unwrap();
    let running = backend.task_state(&task_id).await.unwrap().unwrap();
    assert_eq!(running.status(), JobStatus::Processing);
    assert_eq!(running.progress(), 55);
    assert_eq!(running.message(), "Walk score computed");

    backend.complete(&queued).await.expect("Failed to complete");
}
