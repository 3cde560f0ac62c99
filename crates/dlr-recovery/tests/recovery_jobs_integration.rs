use chrono::{DateTime, Duration, TimeZone, Utc};
use dlr_core::{ActivityType, CategoryTag, DeadLetterRecord, EventCategory, StagingArea};
use dlr_recovery::run_lock::JobRunLock;
use dlr_recovery::sources::StagingSource;
use dlr_recovery::{JobParameters, JobRunner, JobStatus, RecoverySettings, RecoverySource};
use dlr_storage::{
    CanonicalStore, JobRunStore, QueueStore, RecoveryStore, RunState, StagingStore,
};
use std::path::Path;
use tempfile::TempDir;

fn ts(offset_minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 23, 14, 0, 0)
        .single()
        .expect("valid timestamp")
        + Duration::minutes(offset_minutes)
}

fn envelope(key: &str, activity_type: &str, post_id: i64) -> String {
    serde_json::json!({
        "key": key,
        "event": {
            "memberId": 7,
            "postId": post_id,
            "commentId": post_id * 10,
            "memberActivityType": activity_type,
            "createdAt": "2026-02-23T13:00:00Z"
        }
    })
    .to_string()
}

fn settings(root: &Path) -> RecoverySettings {
    RecoverySettings::new(root.join("listener-failure-storage"), root.join("locks"))
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| {
            entry
                .expect("dir entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    names.sort();
    names
}

#[test]
fn queue_to_staging_to_canonical_end_to_end() {
    let root = TempDir::new().expect("temp dir");
    let store = RecoveryStore::open_in_memory().expect("open db");
    for (index, key) in ["k1", "k2", "k3"].iter().enumerate() {
        store
            .push_back("POST", &envelope(key, "POST_CREATE", index as i64 + 1))
            .expect("enqueue");
    }
    let runner = JobRunner::new(&store, settings(root.path()));

    let staged = runner
        .run(
            "publisher-queue-to-staging",
            &JobParameters::at(ts(0)).with_chunk_size(30),
        )
        .expect("run staging job");
    assert_eq!(staged.status, JobStatus::Completed);
    assert_eq!(staged.report.written, 3);
    assert_eq!(store.queue_len("POST").expect("queue len"), 0);
    assert_eq!(
        store
            .count_not_completed(StagingArea::QueueSnapshot)
            .expect("count"),
        3
    );
    for key in ["k1", "k2", "k3"] {
        let records = store
            .find_by_key(StagingArea::QueueSnapshot, key)
            .expect("find by key");
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_completed);
    }

    let recovered = runner
        .run(
            "queue-snapshot-to-canonical",
            &JobParameters::at(ts(1)).with_chunk_size(50),
        )
        .expect("run canonical job");
    assert_eq!(recovered.status, JobStatus::Completed);
    assert_eq!(store.activity_count().expect("canonical count"), 3);
    assert_eq!(
        store
            .count_not_completed(StagingArea::QueueSnapshot)
            .expect("count"),
        0
    );
    for key in ["k1", "k2", "k3"] {
        let records = store
            .find_by_key(StagingArea::QueueSnapshot, key)
            .expect("find by key");
        assert!(records[0].is_completed);
        let activity = store
            .find_activity_by_key(key)
            .expect("lookup")
            .expect("canonical row");
        assert_eq!(activity.record.activity_type, ActivityType::PostCreate);
        assert_eq!(activity.record.comment_id, None);
    }

    let rerun = runner
        .run(
            "queue-snapshot-to-canonical",
            &JobParameters::at(ts(2)).with_chunk_size(50),
        )
        .expect("rerun canonical job");
    assert_eq!(rerun.status, JobStatus::Completed);
    assert_eq!(rerun.report.read, 0);
    assert_eq!(rerun.report.written, 0);
    assert_eq!(store.activity_count().expect("canonical count"), 3);
}

#[test]
fn listener_files_flow_through_staging_into_canonical() {
    let root = TempDir::new().expect("temp dir");
    let store = RecoveryStore::open_in_memory().expect("open db");
    let settings = settings(root.path());
    let failures = settings.listener_failure_dir.clone();
    std::fs::create_dir_all(&failures).expect("failure dir");
    std::fs::write(
        failures.join("evt-1.json"),
        envelope("f1", "COMMENT_CREATE", 3),
    )
    .expect("write");
    std::fs::write(failures.join("evt-2.json"), envelope("f2", "POST_LIKE", 4)).expect("write");
    std::fs::write(failures.join("evt-3.json"), "{ not json").expect("write");
    std::fs::write(failures.join("readme.txt"), "ignored").expect("write");
    let runner = JobRunner::new(&store, settings);

    let staged = runner
        .run("listener-file-to-staging", &JobParameters::at(ts(0)))
        .expect("run file job");
    assert_eq!(staged.status, JobStatus::Completed);
    assert_eq!(staged.report.written, 2);
    assert_eq!(staged.report.transform_skips, 1);
    assert_eq!(
        file_names(&failures),
        vec![
            "completed--evt-1.json",
            "completed--evt-2.json",
            "evt-3.json",
            "readme.txt"
        ]
    );

    let recovered = runner
        .run("listener-staging-to-canonical", &JobParameters::at(ts(1)))
        .expect("run staging job");
    assert_eq!(recovered.status, JobStatus::Completed);
    assert_eq!(recovered.report.written, 2);

    let comment = store
        .find_activity_by_key("f1")
        .expect("lookup")
        .expect("comment row");
    assert_eq!(comment.record.post_id, Some(3));
    assert_eq!(comment.record.comment_id, Some(30));
    let like = store
        .find_activity_by_key("f2")
        .expect("lookup")
        .expect("like row");
    assert_eq!(like.record.post_id, Some(4));
    assert_eq!(like.record.comment_id, None);
}

#[test]
fn listener_staging_prefilter_skips_keys_already_recovered() {
    let root = TempDir::new().expect("temp dir");
    let store = RecoveryStore::open_in_memory().expect("open db");
    let records: Vec<DeadLetterRecord> = ["d1", "d2"]
        .iter()
        .map(|key| {
            DeadLetterRecord::new(
                Some(key.to_string()),
                envelope(key, "POST_UPDATE", 9),
                None,
                ts(-10),
            )
        })
        .collect();
    store
        .save_all(StagingArea::ListenerEnvelope, &records)
        .expect("seed staging");
    store
        .upsert(
            &dlr_core::ActivityRecord::post(7, 1, ActivityType::PostCreate, Some("d1".to_string())),
            ts(-20),
        )
        .expect("seed canonical");

    let outcome = JobRunner::new(&store, settings(root.path()))
        .run("listener-staging-to-canonical", &JobParameters::at(ts(0)))
        .expect("run");

    assert_eq!(outcome.report.written, 1);
    assert_eq!(outcome.report.duplicates_skipped, 1);
    assert_eq!(outcome.report.completed, 2);
    assert_eq!(store.activity_count().expect("count"), 2);
    let untouched = store
        .find_activity_by_key("d1")
        .expect("lookup")
        .expect("row");
    assert_eq!(untouched.record.activity_type, ActivityType::PostCreate);
}

#[test]
fn file_guard_trips_before_any_rename_or_write() {
    let root = TempDir::new().expect("temp dir");
    let store = RecoveryStore::open_in_memory().expect("open db");
    let mut settings = settings(root.path());
    settings.thresholds.max_editing_files = 3;
    let failures = settings.listener_failure_dir.clone();
    std::fs::create_dir_all(&failures).expect("failure dir");
    for index in 0..3 {
        std::fs::write(
            failures.join(format!("editing--stuck-{index}.json")),
            envelope("s", "POST_CREATE", 1),
        )
        .expect("write");
    }
    std::fs::write(failures.join("fresh.json"), envelope("n1", "POST_CREATE", 1))
        .expect("write");
    let before = file_names(&failures);

    let outcome = JobRunner::new(&store, settings)
        .run("listener-file-to-staging", &JobParameters::at(ts(0)))
        .expect("run");

    assert_eq!(outcome.status, JobStatus::Failed);
    assert!(outcome
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("backlog exceeded"));
    assert_eq!(file_names(&failures), before);
    assert_eq!(outcome.report.read, 0);
    assert_eq!(
        store
            .count_not_completed(StagingArea::ListenerEnvelope)
            .expect("count"),
        0
    );
}

#[test]
fn store_backlog_guard_fails_the_run_without_writes() {
    let root = TempDir::new().expect("temp dir");
    let store = RecoveryStore::open_in_memory().expect("open db");
    let mut settings = settings(root.path());
    settings.thresholds.max_backlog_records = 2;
    let records: Vec<DeadLetterRecord> = (0..3)
        .map(|index| {
            let key = format!("b{index}");
            DeadLetterRecord::new(Some(key.clone()), envelope(&key, "POST_READ", 2), None, ts(-1))
        })
        .collect();
    store
        .save_all(StagingArea::QueueSnapshot, &records)
        .expect("seed");

    let outcome = JobRunner::new(&store, settings)
        .run("queue-snapshot-to-canonical", &JobParameters::at(ts(0)))
        .expect("run");

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(store.activity_count().expect("count"), 0);
    let run = store
        .find_run("queue-snapshot-to-canonical", &outcome.run_id)
        .expect("find run")
        .expect("run recorded");
    assert_eq!(run.state, RunState::Failed);
}

#[test]
fn unknown_activity_type_is_skipped_and_requeued() {
    let root = TempDir::new().expect("temp dir");
    let store = RecoveryStore::open_in_memory().expect("open db");
    store
        .push_back("listener", &envelope("l1", "POST_CREATE", 1))
        .expect("enqueue");
    store
        .push_back("listener", &envelope("l2", "POST_BOOKMARK", 2))
        .expect("enqueue");
    store
        .push_back("listener", &envelope("l3", "COMMENT_LIKE_CANCEL", 3))
        .expect("enqueue");

    let outcome = JobRunner::new(&store, settings(root.path()))
        .run("listener-queue-to-canonical", &JobParameters::at(ts(0)))
        .expect("run");

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.report.transform_skips, 1);
    assert_eq!(store.activity_count().expect("count"), 2);
    assert!(store.find_activity_by_key("l2").expect("lookup").is_none());
    let requeued = store.pop_top_n("listener", 5).expect("pop");
    assert_eq!(requeued.len(), 1);
    assert!(requeued[0].contains("POST_BOOKMARK"));
}

#[test]
fn declared_category_dead_letters_recover_per_area() {
    let root = TempDir::new().expect("temp dir");
    let store = RecoveryStore::open_in_memory().expect("open db");
    let request = |member: i64, activity_type: &str| {
        format!(r#"{{"memberId":{member},"postId":5,"commentId":6,"activityType":"{activity_type}"}}"#)
    };

    let mut member = DeadLetterRecord::new(
        Some("p-1".to_string()),
        request(1, "MEMBER_FOLLOW"),
        Some(EventCategory::Member.into()),
        ts(-5),
    );
    member.published_at = Some(ts(-6));
    let odd = DeadLetterRecord::new(
        Some("p-2".to_string()),
        request(2, "POST_CREATE"),
        Some(CategoryTag::parse("BOOKMARK")),
        ts(-5),
    );
    store
        .save_all(StagingArea::PublisherDeadLetter, &[member, odd])
        .expect("seed publisher");

    let remote: Vec<DeadLetterRecord> = (0..2)
        .map(|_| {
            DeadLetterRecord::new(
                Some("rc".to_string()),
                request(3, "COMMENT_LIKE"),
                Some(EventCategory::CommentLike.into()),
                ts(-5),
            )
        })
        .collect();
    store
        .save_all(StagingArea::RemoteCallDeadLetter, &remote)
        .expect("seed remote");

    let runner = JobRunner::new(&store, settings(root.path()));
    let publisher = runner
        .run("publisher-deadletter-to-canonical", &JobParameters::at(ts(0)))
        .expect("run publisher");
    assert_eq!(publisher.report.written, 1);
    assert_eq!(publisher.report.transform_skips, 1);
    let followed = store
        .find_activity_by_key("p-1")
        .expect("lookup")
        .expect("member row");
    assert_eq!(followed.record.post_id, None);
    assert_eq!(followed.record.comment_id, None);
    assert_eq!(
        store
            .count_not_completed(StagingArea::PublisherDeadLetter)
            .expect("count"),
        1
    );

    let remote_run = runner
        .run("remote-call-deadletter-to-canonical", &JobParameters::at(ts(1)))
        .expect("run remote");
    assert_eq!(remote_run.report.written, 2);
    assert!(store.find_activity_by_key("rc").expect("lookup").is_none());
    assert_eq!(store.activity_count().expect("count"), 3);
}

#[test]
fn completed_records_stay_excluded_after_reopen() {
    let root = TempDir::new().expect("temp dir");
    let db_path = root.path().join("dlr.sqlite3");
    {
        let store = RecoveryStore::open(&db_path).expect("open db");
        let records: Vec<DeadLetterRecord> = ["r1", "r2"]
            .iter()
            .map(|key| {
                DeadLetterRecord::new(
                    Some(key.to_string()),
                    envelope(key, "POST_DELETE", 8),
                    None,
                    ts(-3),
                )
            })
            .collect();
        store
            .save_all(StagingArea::ListenerDeadLetter, &records)
            .expect("seed");
        let outcome = JobRunner::new(&store, settings(root.path()))
            .run("listener-deadletter-to-canonical", &JobParameters::at(ts(0)))
            .expect("run");
        assert_eq!(outcome.report.completed, 2);
    }

    let store = RecoveryStore::open(&db_path).expect("reopen db");
    let mut source = StagingSource::pending(&store, StagingArea::ListenerDeadLetter);
    assert!(source.next_chunk(50).expect("scan").items.is_empty());
    let rerun = JobRunner::new(&store, settings(root.path()))
        .run("listener-deadletter-to-canonical", &JobParameters::at(ts(1)))
        .expect("rerun");
    assert_eq!(rerun.report.written, 0);
    assert_eq!(store.activity_count().expect("count"), 2);
}

#[test]
fn stale_recovery_only_takes_old_records() {
    let root = TempDir::new().expect("temp dir");
    let store = RecoveryStore::open_in_memory().expect("open db");
    let old = DeadLetterRecord::new(
        Some("old".to_string()),
        envelope("old", "POST_CREATE", 1),
        None,
        ts(-6 * 60),
    );
    let fresh = DeadLetterRecord::new(
        Some("fresh".to_string()),
        envelope("fresh", "POST_CREATE", 2),
        None,
        ts(-10),
    );
    store
        .save_all(StagingArea::QueueSnapshot, &[old, fresh])
        .expect("seed");

    let outcome = JobRunner::new(&store, settings(root.path()))
        .run("queue-snapshot-stale-recovery", &JobParameters::at(ts(0)))
        .expect("run");

    assert_eq!(outcome.report.written, 1);
    assert!(store.find_activity_by_key("old").expect("lookup").is_some());
    assert!(store.find_activity_by_key("fresh").expect("lookup").is_none());
}

#[test]
fn held_run_lock_fails_the_run() {
    let root = TempDir::new().expect("temp dir");
    let store = RecoveryStore::open_in_memory().expect("open db");
    let settings = settings(root.path());
    let lock_path = JobRunLock::path_for(&settings.lock_dir, "listener-queue-to-canonical");
    let _held = JobRunLock::try_acquire(&lock_path, "other", ts(0))
        .expect("acquire")
        .expect("lock free");
    store
        .push_back("listener", &envelope("l1", "POST_CREATE", 1))
        .expect("enqueue");

    let outcome = JobRunner::new(&store, settings)
        .run("listener-queue-to-canonical", &JobParameters::at(ts(0)))
        .expect("run");

    assert_eq!(outcome.status, JobStatus::Failed);
    assert!(outcome
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("already running"));
    assert_eq!(store.queue_len("listener").expect("len"), 1);
}

#[test]
fn completed_run_id_cannot_be_reused() {
    let root = TempDir::new().expect("temp dir");
    let store = RecoveryStore::open_in_memory().expect("open db");
    let runner = JobRunner::new(&store, settings(root.path()));
    let params = JobParameters::at(ts(0)).with_run_id("nightly-1");

    let first = runner
        .run("publisher-queue-to-staging", &params)
        .expect("first run");
    assert!(first.is_completed());
    let second = runner
        .run("publisher-queue-to-staging", &params)
        .expect("second run");
    assert_eq!(second.status, JobStatus::Failed);
    assert!(second
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("already completed"));

    let recent = store.recent_runs(10).expect("recent runs");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].state, RunState::Completed);
}

#[test]
fn unknown_job_is_an_error() {
    let root = TempDir::new().expect("temp dir");
    let store = RecoveryStore::open_in_memory().expect("open db");
    assert!(JobRunner::new(&store, settings(root.path()))
        .run("token-cleanup", &JobParameters::at(ts(0)))
        .is_err());
}

#[test]
fn out_of_range_windows_fail_the_run() {
    let root = TempDir::new().expect("temp dir");
    let store = RecoveryStore::open_in_memory().expect("open db");
    let runner = JobRunner::new(&store, settings(root.path()));

    let mut stale = JobParameters::at(ts(0));
    stale.stale_hours = Some(i64::MAX / 1000);
    let mut retention = JobParameters::at(ts(1));
    retention.retention_days = Some(i64::MAX / 1000);
    let mut sweep = JobParameters::at(ts(2));
    sweep.editing_stale_minutes = Some(i64::MAX / 1000);

    for (job, params) in [
        ("queue-snapshot-stale-recovery", stale),
        ("completed-file-cleanup", retention),
        ("editing-file-sweep", sweep),
    ] {
        let outcome = runner.run(job, &params).expect("run");
        assert_eq!(outcome.status, JobStatus::Failed, "{job}");
        assert!(
            outcome
                .message
                .as_deref()
                .unwrap_or_default()
                .contains("out of range"),
            "{job}"
        );
    }
}
