use chrono::{TimeDelta, Utc};
use punchcard_core::AppError;
use punchcard_core::job::{JobStatus, RunSummary};
use punchcard_core::models::{EntryType, FailedEntry, NewAttendanceRecord, PunchMode};
use punchcard_core::path::FieldPath;
use punchcard_core::traits::{AttendanceStore, DescriptorStore, JobStore};
use punchcard_db::{AttendanceRepository, BulkJobRepository, DescriptorRepository, EmployeeRepository};

use crate::integration::common::{create_descriptor, job_request, setup_test_db};

#[tokio::test]
async fn create_job_and_verify_fields() {
    let (pool, _container) = setup_test_db().await;
    let descriptor = create_descriptor(&pool).await;
    let repo = BulkJobRepository::new(pool);

    let job = repo.create_job(job_request(&descriptor)).await.unwrap();

    assert_eq!(job.status, JobStatus::New);
    assert_eq!(job.source_file, "uploads/test/punches.csv");
    assert_eq!(job.format_descriptor_id, descriptor.id);
    assert_eq!(job.total_records, 0);
    assert!(job.failed_report.is_empty());
    assert!(job.normalized_file.is_none());
    assert!(job.started_at.is_none());
}

#[tokio::test]
async fn descriptor_paths_survive_storage() {
    let (pool, _container) = setup_test_db().await;
    let repo = DescriptorRepository::new(pool);
    let created = repo
        .create_descriptor(&punchcard_core::NewFormatDescriptor {
            name: "nested".into(),
            entry_point_path: "data.logs".parse().unwrap(),
            employee_number_path: FieldPath::from(vec!["user", "code"]),
            date_path: FieldPath::from(vec!["punch_date"]),
            time_path: FieldPath::from(vec!["punch_times"]),
            mode_path: Some(FieldPath::from(vec!["state"])),
            time_value_type: punchcard_core::TimeValueType::SpaceSeparated,
        })
        .await
        .unwrap();

    let loaded = repo.get_descriptor(created.id).await.unwrap().unwrap();
    assert_eq!(loaded, created);
    assert_eq!(loaded.entry_point_path.to_string(), "data.logs");
    assert_eq!(repo.list(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn mark_processing_only_moves_new_jobs() {
    let (pool, _container) = setup_test_db().await;
    let descriptor = create_descriptor(&pool).await;
    let repo = BulkJobRepository::new(pool);
    let job = repo.create_job(job_request(&descriptor)).await.unwrap();

    assert!(repo.mark_processing(job.id).await.unwrap());
    assert!(!repo.mark_processing(job.id).await.unwrap());

    let updated = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(updated.status, JobStatus::Processing);
    assert!(updated.started_at.is_some());
}

#[tokio::test]
async fn finish_run_persists_counters_and_report() {
    let (pool, _container) = setup_test_db().await;
    let descriptor = create_descriptor(&pool).await;
    let repo = BulkJobRepository::new(pool);
    let job = repo.create_job(job_request(&descriptor)).await.unwrap();
    repo.mark_processing(job.id).await.unwrap();
    repo.set_normalized_file(job.id, "normalized/x.json").await.unwrap();
    repo.set_total_records(job.id, 3).await.unwrap();

    let summary = RunSummary {
        total_records: 3,
        success_count: 2,
        failed_count: 1,
        failed_records: vec![serde_json::json!({"emp": "E9"})],
        failed_report: vec![FailedEntry::record(2, Some("E9".into()), "no employee")],
    };
    repo.finish_run(job.id, JobStatus::Completed, &summary)
        .await
        .unwrap();

    let updated = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(updated.status, JobStatus::Completed);
    assert_eq!(updated.normalized_file.as_deref(), Some("normalized/x.json"));
    assert_eq!(updated.success_count, 2);
    assert_eq!(updated.failed_count, 1);
    assert_eq!(updated.failed_records, summary.failed_records);
    assert_eq!(updated.failed_report, summary.failed_report);
    assert!(updated.completed_at.is_some());

    let again = repo.finish_run(job.id, JobStatus::Failed, &summary).await;
    assert!(matches!(again, Err(AppError::NotEligible { .. })));
}

#[tokio::test]
async fn rollback_removes_job_records_atomically() {
    let (pool, _container) = setup_test_db().await;
    let descriptor = create_descriptor(&pool).await;
    let repo = BulkJobRepository::new(pool.clone());
    let attendance = AttendanceRepository::new(pool.clone());
    let user_id = EmployeeRepository::new(pool.clone())
        .upsert("E1", None)
        .await
        .unwrap();

    let job = repo.create_job(job_request(&descriptor)).await.unwrap();
    repo.mark_processing(job.id).await.unwrap();
    for hour in [8, 17] {
        let check_in = (Utc::now() - TimeDelta::days(1))
            .date_naive()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
            .and_utc();
        attendance
            .upsert(&NewAttendanceRecord {
                user_id,
                check_in,
                mode: PunchMode::alternating(hour as usize),
                entry_type: EntryType::Bulk,
                job_id: Some(job.id),
            })
            .await
            .unwrap();
    }
    let summary = RunSummary {
        total_records: 2,
        success_count: 2,
        ..RunSummary::default()
    };
    repo.finish_run(job.id, JobStatus::Completed, &summary)
        .await
        .unwrap();

    let removed = repo.rollback(job.id, Utc::now()).await.unwrap();

    assert_eq!(removed, 2);
    assert!(attendance.list_for_job(job.id).await.unwrap().is_empty());
    let updated = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(updated.status, JobStatus::Rollback);
}

#[tokio::test]
async fn rollback_refusals_leave_job_untouched() {
    let (pool, _container) = setup_test_db().await;
    let descriptor = create_descriptor(&pool).await;
    let repo = BulkJobRepository::new(pool.clone());

    let fresh = repo.create_job(job_request(&descriptor)).await.unwrap();
    let err = repo.rollback(fresh.id, Utc::now()).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::NotEligible {
            status: JobStatus::New,
            ..
        }
    ));

    let old = repo.create_job(job_request(&descriptor)).await.unwrap();
    repo.mark_processing(old.id).await.unwrap();
    repo.finish_run(old.id, JobStatus::Failed, &RunSummary::aborted(0, "bad file"))
        .await
        .unwrap();
    sqlx::query("UPDATE bulk_attendance_jobs SET added_at = NOW() - INTERVAL '4 days' WHERE id = $1")
        .bind(old.id)
        .execute(&pool)
        .await
        .unwrap();

    let err = repo.rollback(old.id, Utc::now()).await.unwrap_err();
    assert!(matches!(err, AppError::WindowExpired { window_days: 3, .. }));
    let unchanged = repo.get_job(old.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, JobStatus::Failed);
}

#[tokio::test]
async fn soft_delete_hides_job_from_default_listing() {
    let (pool, _container) = setup_test_db().await;
    let descriptor = create_descriptor(&pool).await;
    let repo = BulkJobRepository::new(pool);

    let doomed = repo.create_job(job_request(&descriptor)).await.unwrap();
    let kept = repo.create_job(job_request(&descriptor)).await.unwrap();
    repo.soft_delete(doomed.id).await.unwrap();

    let deleted = repo.get_job(doomed.id).await.unwrap().unwrap();
    assert_eq!(deleted.status, JobStatus::Deleted);
    assert!(deleted.deleted_at.is_some());

    let listed = repo.list_jobs(None, 10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, kept.id);
    assert_eq!(
        repo.list_jobs(Some(JobStatus::Deleted), 10).await.unwrap().len(),
        1
    );
    assert_eq!(repo.count_by_status(JobStatus::New).await.unwrap(), 1);

    repo.mark_processing(kept.id).await.unwrap();
    assert!(matches!(
        repo.soft_delete(kept.id).await,
        Err(AppError::NotEligible { .. })
    ));
    assert!(matches!(
        repo.soft_delete(uuid::Uuid::new_v4()).await,
        Err(AppError::NotFound { .. })
    ));
}
