mod common;

use std::sync::Arc;

use herdcast::jobs::model::JobStatus;
use herdcast::jobs::store::{CreateJob, INITIAL_PROGRESS_PCT, JobStore};
use herdcast::jobs::supervisor::WorkerSupervisor;
use herdcast::storage::artifacts::Bucket;

use common::{harness, ingest_ten_cows, quiet_scenario};

#[tokio::test]
async fn stuck_running_job_is_requeued_and_completes() {
    let h = harness();
    let dataset = ingest_ten_cows(&h).await;

    let job = h
        .pipeline
        .submit(&h.queue, CreateJob::new(quiet_scenario(&dataset.dataset_id)))
        .await
        .unwrap();

    // A worker picked the job up and died mid-flight: the id is gone from
    // the queue and the row is left `running`.
    let job_id = h.queue.dequeue().await.unwrap();
    h.store
        .mark_running(&job_id, INITIAL_PROGRESS_PCT, job.total_runs)
        .await
        .unwrap();
    assert!(h.queue.is_empty());

    // Zero timeout makes the just-started job count as stuck.
    let supervisor = WorkerSupervisor::new(
        h.queue.clone(),
        h.pipeline.clone(),
        h.store.clone() as Arc<dyn JobStore>,
        0,
    );
    let requeued = supervisor.recover_stuck_jobs().await.unwrap();
    assert_eq!(requeued, vec![job_id]);

    let row = h.store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(row.status, JobStatus::Queued);
    assert_eq!((row.progress_pct, row.completed_runs), (0, 0));

    // One successful pass finishes the recovered job.
    let redelivered = h.queue.dequeue().await.unwrap();
    assert_eq!(redelivered, job_id);
    h.pipeline.run_job(redelivered).await;

    let done = h.store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.completed_runs, done.total_runs);
}

#[tokio::test]
async fn recovered_jobs_reproduce_the_clean_run_result() {
    let h = harness();
    let dataset = ingest_ten_cows(&h).await;
    let params = quiet_scenario(&dataset.dataset_id);

    // Clean run.
    let clean = h
        .pipeline
        .submit(&h.queue, CreateJob::new(params.clone()))
        .await
        .unwrap();
    h.queue.dequeue().await.unwrap();
    h.pipeline.run_job(clean.job_id).await;

    // Stuck-then-recovered run of the same scenario.
    let stuck = h
        .pipeline
        .submit(&h.queue, CreateJob::new(params))
        .await
        .unwrap();
    h.queue.dequeue().await.unwrap();
    h.store
        .mark_running(&stuck.job_id, INITIAL_PROGRESS_PCT, stuck.total_runs)
        .await
        .unwrap();
    let supervisor = WorkerSupervisor::new(
        h.queue.clone(),
        h.pipeline.clone(),
        h.store.clone() as Arc<dyn JobStore>,
        0,
    );
    supervisor.recover_stuck_jobs().await.unwrap();
    let redelivered = h.queue.dequeue().await.unwrap();
    h.pipeline.run_job(redelivered).await;

    let key_of = |row: &herdcast::jobs::model::ForecastJob| {
        row.result_object_key.clone().expect("result key")
    };
    let clean_row = h.store.get(&clean.job_id).await.unwrap().unwrap();
    let stuck_row = h.store.get(&stuck.job_id).await.unwrap().unwrap();
    assert_eq!(stuck_row.status, JobStatus::Succeeded);

    let clean_bytes = h
        .artifacts
        .get_bytes(Bucket::Results, &key_of(&clean_row))
        .await
        .unwrap();
    let stuck_bytes = h
        .artifacts
        .get_bytes(Bucket::Results, &key_of(&stuck_row))
        .await
        .unwrap();
    assert_eq!(clean_bytes, stuck_bytes);
}
