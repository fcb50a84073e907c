mod common;

use chrono::NaiveDate;
use herdcast::error::ErrorCode;
use herdcast::jobs::model::JobStatus;
use herdcast::jobs::pipeline::ExportKind;
use herdcast::jobs::store::CreateJob;
use herdcast::jobs::store::JobStore;
use herdcast::storage::artifacts::Bucket;

use common::{harness, ingest_ten_cows, quiet_scenario};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

#[tokio::test]
async fn submitted_job_runs_to_success_with_artifacts() {
    let h = harness();
    let dataset = ingest_ten_cows(&h).await;

    let job = h
        .pipeline
        .submit(&h.queue, CreateJob::new(quiet_scenario(&dataset.dataset_id)))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Queued);

    let dequeued = h.queue.dequeue().await.unwrap();
    assert_eq!(dequeued, job.job_id);
    h.pipeline.run_job(dequeued).await;

    let done = h.store.get(&job.job_id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.progress_pct, 100);
    assert_eq!(done.completed_runs, done.total_runs);
    assert!(done.result_object_key.is_some());
    assert!(done.csv_object_key.is_some());
    assert!(done.xlsx_object_key.is_some());

    // Single run, one month: no bands, two points, one events row.
    let result = h.pipeline.read_job_result(&job.job_id).await.unwrap();
    assert!(result.series_p10.is_none());
    assert!(result.series_p90.is_none());
    assert_eq!(result.series_p50.points.len(), 2);
    assert_eq!(result.series_p50.points[0].date, d(2026, 2, 20));
    assert_eq!(result.series_p50.points[0].milking_count, 10);
    assert_eq!(result.events.len(), 1);
    assert_eq!(result.events[0].month, d(2026, 3, 1));

    let csv = h.pipeline.read_export(&job.job_id, ExportKind::Csv).await.unwrap();
    assert!(csv.starts_with(b"[SERIES]\n"));
    let xlsx = h.pipeline.read_export(&job.job_id, ExportKind::Xlsx).await.unwrap();
    assert!(xlsx.starts_with(b"PK"));
}

#[tokio::test]
async fn terminal_jobs_are_not_re_executed() {
    let h = harness();
    let dataset = ingest_ten_cows(&h).await;
    let job = h
        .pipeline
        .submit(&h.queue, CreateJob::new(quiet_scenario(&dataset.dataset_id)))
        .await
        .unwrap();

    h.pipeline.run_job(job.job_id).await;
    let first = h.store.get(&job.job_id).await.unwrap().unwrap();

    // Redelivery of the same id must be a no-op.
    h.pipeline.run_job(job.job_id).await;
    let second = h.store.get(&job.job_id).await.unwrap().unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn resubmission_gets_a_new_id_but_the_same_payload() {
    let h = harness();
    let dataset = ingest_ten_cows(&h).await;
    let params = quiet_scenario(&dataset.dataset_id);

    let a = h
        .pipeline
        .submit(&h.queue, CreateJob::new(params.clone()))
        .await
        .unwrap();
    let b = h.pipeline.submit(&h.queue, CreateJob::new(params)).await.unwrap();
    assert_ne!(a.job_id, b.job_id);

    h.pipeline.run_job(a.job_id).await;
    h.pipeline.run_job(b.job_id).await;

    let row_a = h.store.get(&a.job_id).await.unwrap().unwrap();
    let row_b = h.store.get(&b.job_id).await.unwrap().unwrap();
    let bytes_a = h
        .artifacts
        .get_bytes(Bucket::Results, row_a.result_object_key.as_deref().unwrap())
        .await
        .unwrap();
    let bytes_b = h
        .artifacts
        .get_bytes(Bucket::Results, row_b.result_object_key.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(bytes_a, bytes_b);
}

#[tokio::test]
async fn invalid_scenarios_never_reach_the_queue() {
    let h = harness();
    let dataset = ingest_ten_cows(&h).await;
    let mut params = quiet_scenario(&dataset.dataset_id);
    params.mc_runs = 0;

    let err = h
        .pipeline
        .submit(&h.queue, CreateJob::new(params))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::RequestValidationError);
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn missing_dataset_row_fails_the_job_with_its_code() {
    let h = harness();
    let job = h
        .pipeline
        .submit(&h.queue, CreateJob::new(quiet_scenario("no-such-dataset")))
        .await
        .unwrap();

    h.pipeline.run_job(job.job_id).await;

    let failed = h.store.get(&job.job_id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    let message = failed.error_message.unwrap();
    assert!(message.starts_with("DATASET_NOT_FOUND"), "{message}");
    assert!(failed.result_object_key.is_none());
}

#[tokio::test]
async fn missing_dataset_object_fails_the_job_with_its_code() {
    let h = harness();
    let dataset = ingest_ten_cows(&h).await;
    h.artifacts
        .delete(Bucket::Datasets, &dataset.object_key)
        .await
        .unwrap();

    let job = h
        .pipeline
        .submit(&h.queue, CreateJob::new(quiet_scenario(&dataset.dataset_id)))
        .await
        .unwrap();
    h.pipeline.run_job(job.job_id).await;

    let failed = h.store.get(&job.job_id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(
        failed
            .error_message
            .unwrap()
            .starts_with("DATASET_OBJECT_MISSING")
    );
}

#[tokio::test]
async fn future_probe_flows_through_to_the_result() {
    let h = harness();
    let dataset = ingest_ten_cows(&h).await;
    let mut params = quiet_scenario(&dataset.dataset_id);
    params.horizon_months = 12;
    params.future_date = Some(d(2026, 6, 1));

    let job = h
        .pipeline
        .submit(&h.queue, CreateJob::new(params))
        .await
        .unwrap();
    h.pipeline.run_job(job.job_id).await;

    let result = h.pipeline.read_job_result(&job.job_id).await.unwrap();
    let future = result.future_point.unwrap();
    assert_eq!(future.date, d(2026, 6, 1));
    assert!(
        result
            .series_p50
            .points
            .iter()
            .any(|p| p.date == d(2026, 6, 1))
    );
}
