#![forbid(unsafe_code)]

mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::{resolver, resolver_with, ScriptedRepo, Step, INTERVAL};
use stratus_api::{JobError, MAX_POLL_ATTEMPTS};
use stratus_core::{Identity, JobState, JobStatus, JobType};
use tokio_util::sync::CancellationToken;

fn anon() -> Identity { Identity::user("alice") }

#[tokio::test(start_paused = true)]
async fn undecodable_guids_are_job_not_found() {
    let r = resolver(ScriptedRepo::new(vec![]), ScriptedRepo::new(vec![]));
    for guid in ["", "nope", "org.delete", "org.delete~", "bogus.delete~x", "~x"] {
        let err = r.resolve(&anon(), guid, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, JobError::NotFound { resource_type: "Job", .. }), "{guid}: {err}");
    }
}

#[tokio::test(start_paused = true)]
async fn manifest_and_fire_and_forget_deletes_complete_immediately() {
    let orgs = ScriptedRepo::new(vec![]);
    let spaces = ScriptedRepo::new(vec![]);
    let r = resolver(orgs.clone(), spaces.clone());
    for t in [JobType::SpaceApplyManifest, JobType::AppDelete, JobType::RouteDelete, JobType::DomainDelete, JobType::RoleDelete] {
        let guid = format!("{}~guid-1", t.prefix());
        let (job, status) = r.resolve(&anon(), &guid, &CancellationToken::new()).await.expect("resolves");
        assert_eq!(job.job_type, t);
        assert_eq!(status, JobStatus::Complete);
    }
    assert_eq!(orgs.calls() + spaces.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn unregistered_polled_type_is_job_not_found() {
    let spaces = ScriptedRepo::new(vec![Step::NotFound]);
    let mut repos: HashMap<JobType, std::sync::Arc<dyn stratus_core::DeletionRepository>> = HashMap::new();
    repos.insert(JobType::SpaceDelete, spaces);
    let r = resolver_with(repos);
    match r.resolve(&anon(), "org.delete~o-1", &CancellationToken::new()).await.unwrap_err() {
        JobError::NotFound { resource_type, detail } => {
            assert_eq!(resource_type, "Job");
            assert!(detail.contains("org.delete"), "{detail}");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn gone_or_forbidden_on_first_poll_completes() {
    for step in [Step::NotFound, Step::Forbidden] {
        let orgs = ScriptedRepo::new(vec![step.clone()]);
        let r = resolver(orgs.clone(), ScriptedRepo::new(vec![]));
        let (_, status) = r.resolve(&anon(), "org.delete~o-1", &CancellationToken::new()).await.expect("resolves");
        assert_eq!(status, JobStatus::Complete, "{step:?}");
        assert_eq!(orgs.calls(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn queries_target_guid_with_caller_identity() {
    let spaces = ScriptedRepo::new(vec![Step::MarkedSecsAgo(1)]);
    let r = resolver(ScriptedRepo::new(vec![]), spaces.clone());
    r.resolve(&anon(), "space.delete~s-42", &CancellationToken::new()).await.expect("resolves");
    let seen = spaces.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![(Identity::user("alice"), "s-42".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn recent_deletion_is_processing() {
    let r = resolver(ScriptedRepo::new(vec![Step::MarkedSecsAgo(119)]), ScriptedRepo::new(vec![]));
    let (_, status) = r.resolve(&anon(), "org.delete~o-1", &CancellationToken::new()).await.expect("resolves");
    assert_eq!(status, JobStatus::Processing);
}

#[tokio::test(start_paused = true)]
async fn stale_deletion_fails_with_timeout_error() {
    for age in [120, 600] {
        let r = resolver(ScriptedRepo::new(vec![]), ScriptedRepo::new(vec![Step::MarkedSecsAgo(age)]));
        let (_, status) = r.resolve(&anon(), "space.delete~s-1", &CancellationToken::new()).await.expect("resolves");
        assert_eq!(status.state(), JobState::Failed);
        let errs = status.errors();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].code, 10008);
        assert_eq!(errs[0].title, "CF-UnprocessableEntity");
        assert_eq!(errs[0].detail, "Space deletion timed out, check the remaining \"s-1\" resource");
    }
}

#[tokio::test(start_paused = true)]
async fn keeps_polling_until_timestamp_appears() {
    let orgs = ScriptedRepo::new(vec![Step::NotMarked, Step::NotMarked, Step::NotMarked, Step::MarkedSecsAgo(0)]);
    let r = resolver(orgs.clone(), ScriptedRepo::new(vec![]));
    let started = tokio::time::Instant::now();
    let (_, status) = r.resolve(&anon(), "org.delete~o-1", &CancellationToken::new()).await.expect("resolves");
    assert_eq!(status, JobStatus::Processing);
    assert_eq!(orgs.calls(), 4);
    assert_eq!(started.elapsed(), INTERVAL * 3);
}

#[tokio::test(start_paused = true)]
async fn never_marked_exhausts_budget_and_is_not_found() {
    let orgs = ScriptedRepo::new(vec![Step::NotMarked]);
    let r = resolver(orgs.clone(), ScriptedRepo::new(vec![]));
    let started = tokio::time::Instant::now();
    match r.resolve(&anon(), "org.delete~o-1", &CancellationToken::new()).await.unwrap_err() {
        JobError::NotFound { resource_type, detail } => {
            assert_eq!(resource_type, "Job");
            assert_eq!(detail, "Org not marked for deletion");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(orgs.calls(), MAX_POLL_ATTEMPTS as usize);
    assert!(started.elapsed() <= INTERVAL * MAX_POLL_ATTEMPTS);
}

#[tokio::test(start_paused = true)]
async fn infrastructure_errors_surface_with_resource_context() {
    let spaces = ScriptedRepo::new(vec![Step::NotMarked, Step::Infra]);
    let r = resolver(ScriptedRepo::new(vec![]), spaces.clone());
    match r.resolve(&anon(), "space.delete~s-7", &CancellationToken::new()).await.unwrap_err() {
        JobError::Repository { resource_type, guid, .. } => {
            assert_eq!(resource_type, "Space");
            assert_eq!(guid, "s-7");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(spaces.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_polling() {
    let orgs = ScriptedRepo::new(vec![Step::NotMarked]);
    let r = resolver(orgs.clone(), ScriptedRepo::new(vec![]));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(INTERVAL * 2 + Duration::from_millis(10)).await;
        trigger.cancel();
    });
    let err = r.resolve(&anon(), "org.delete~o-1", &cancel).await.unwrap_err();
    assert!(matches!(err, JobError::Cancelled));
    assert_eq!(orgs.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn already_cancelled_request_never_queries() {
    let orgs = ScriptedRepo::new(vec![Step::MarkedSecsAgo(1)]);
    let r = resolver(orgs.clone(), ScriptedRepo::new(vec![]));
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(r.resolve(&anon(), "org.delete~o-1", &cancel).await, Err(JobError::Cancelled)));
    assert_eq!(orgs.calls(), 0);
}
