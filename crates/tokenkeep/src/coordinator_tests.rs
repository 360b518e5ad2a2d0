// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::*;
use crate::dispatch::REFRESH_PATH;
use crate::events;
use crate::test_support::{credential_expiring_in, credential_with_exp, MockBackend, MockRenewal};

fn coordinator(
    renewal: Arc<MockRenewal>,
) -> (Arc<RefreshCoordinator>, broadcast::Receiver<SessionEvent>) {
    let (tx, rx) = events::channel();
    (RefreshCoordinator::new(renewal, ExpiryTracker::default(), tx, "/login"), rx)
}

fn unauthorized() -> RequestError {
    RequestError::status(401, "token expired")
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn logouts(events: &[SessionEvent]) -> usize {
    events.iter().filter(|e| matches!(e, SessionEvent::LoggedOut { .. })).count()
}

fn recording(log: &Arc<Mutex<Vec<(&'static str, bool)>>>, label: &'static str) -> Continuation {
    let log = Arc::clone(log);
    Box::new(move |outcome| log.lock().push((label, outcome.is_ok())))
}

#[test]
fn parked_continuations_resume_in_fifo_order() {
    let (coord, _rx) = coordinator(MockRenewal::new(None, Duration::ZERO, 3600));
    let log = Arc::new(Mutex::new(Vec::new()));

    assert!(coord.enqueue_or_lead(recording(&log, "leader"), Waiter::Request));
    assert!(coord.is_refreshing());
    assert!(!coord.enqueue_or_lead(recording(&log, "A"), Waiter::Request));
    assert!(!coord.enqueue_or_lead(recording(&log, "B"), Waiter::Request));
    assert!(!coord.enqueue_or_lead(recording(&log, "C"), Waiter::Request));
    assert_eq!(coord.pending(), 3);

    assert_eq!(coord.settle(Ok(())), Released { parked: 3, requests: 3 });
    assert_eq!(*log.lock(), vec![("A", true), ("B", true), ("C", true)]);
    assert!(!coord.is_refreshing());
    assert_eq!(coord.pending(), 0);
}

#[test]
fn failed_settle_rejects_every_continuation() {
    let (coord, _rx) = coordinator(MockRenewal::new(None, Duration::ZERO, 3600));
    let log = Arc::new(Mutex::new(Vec::new()));

    assert!(coord.enqueue_or_lead(recording(&log, "leader"), Waiter::Request));
    coord.enqueue_or_lead(recording(&log, "A"), Waiter::Request);
    coord.enqueue_or_lead(recording(&log, "B"), Waiter::Request);

    assert_eq!(coord.settle(Err(unauthorized())).parked, 2);
    assert_eq!(*log.lock(), vec![("A", false), ("B", false)]);
    assert!(!coord.is_refreshing());

    // The next failure starts a fresh episode.
    assert!(coord.enqueue_or_lead(recording(&log, "next"), Waiter::Request));
}

#[tokio::test(start_paused = true)]
async fn concurrent_failures_share_one_renewal() -> anyhow::Result<()> {
    let backend = MockBackend::new();
    let renewal = MockRenewal::new(Some(Arc::clone(&backend)), Duration::from_millis(50), 3600);
    let (coord, _rx) = coordinator(Arc::clone(&renewal));

    let attempts = (0..5).map(|i| {
        let coord = Arc::clone(&coord);
        let backend = Arc::clone(&backend);
        async move {
            coord.recover(ApiRequest::get(format!("/sessions/{i}")), unauthorized(), &*backend).await
        }
    });
    let results = futures_util::future::join_all(attempts).await;

    assert_eq!(renewal.calls(), 1);
    assert_eq!(coord.renewal_count(), 1);
    for result in results {
        let response = result?;
        assert_eq!(response.status, 200);
    }
    let replays = backend.requests();
    assert_eq!(replays.len(), 5);
    assert!(replays.iter().all(|r| r.retry));
    assert!(!coord.is_refreshing());
    Ok(())
}

#[tokio::test]
async fn retried_request_failing_again_is_terminal() {
    let backend = MockBackend::new();
    let renewal = MockRenewal::new(None, Duration::ZERO, 3600);
    let (coord, mut rx) = coordinator(Arc::clone(&renewal));

    let mut request = ApiRequest::get("/auth/me");
    request.retry = true;
    let result = coord.recover(request, unauthorized(), &*backend).await;

    assert_eq!(result.map_err(|e| e.status), Err(Some(401)));
    assert_eq!(renewal.calls(), 0);
    assert_eq!(backend.request_count(), 0);
    assert_eq!(logouts(&drain(&mut rx)), 0);
}

#[tokio::test]
async fn replay_that_fails_again_does_not_loop() {
    // Renewal "succeeds" but the backend keeps rejecting the credential.
    let backend = MockBackend::new();
    let renewal = MockRenewal::new(None, Duration::ZERO, 3600);
    let (coord, _rx) = coordinator(Arc::clone(&renewal));

    let result = coord.recover(ApiRequest::get("/auth/me"), unauthorized(), &*backend).await;

    assert_eq!(result.map_err(|e| e.status), Err(Some(401)));
    assert_eq!(renewal.calls(), 1);
    assert_eq!(backend.request_count(), 1);
    assert!(backend.requests()[0].retry);
    assert!(!coord.is_refreshing());
    assert_eq!(coord.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn renewal_failure_rejects_parked_requests_and_logs_out_once() {
    let backend = MockBackend::new();
    let renewal = MockRenewal::failing(Duration::from_millis(50));
    let (coord, mut rx) = coordinator(Arc::clone(&renewal));

    let attempts = (0..3).map(|i| {
        let coord = Arc::clone(&coord);
        let backend = Arc::clone(&backend);
        async move {
            let error = RequestError::status(401, format!("request {i} unauthorized"));
            coord.recover(ApiRequest::get(format!("/users/{i}")), error, &*backend).await
        }
    });
    let results = futures_util::future::join_all(attempts).await;

    assert_eq!(renewal.calls(), 1);
    assert_eq!(renewal.discarded(), 1);
    assert_eq!(backend.request_count(), 0);

    let messages: Vec<String> = results
        .into_iter()
        .map(|r| r.err().map(|e| e.message).unwrap_or_default())
        .collect();
    // Leader keeps its own error, parked requests get the renewal failure.
    assert_eq!(messages[0], "request 0 unauthorized");
    assert_eq!(messages[1], "refresh token expired");
    assert_eq!(messages[2], "refresh token expired");

    let events = drain(&mut rx);
    assert_eq!(logouts(&events), 1);
    assert!(events.contains(&SessionEvent::LoggedOut { login_url: "/login".into() }));
    assert!(!coord.is_refreshing());
}

#[tokio::test]
async fn unauthorized_renewal_request_logs_out_without_renewing() {
    let backend = MockBackend::new();
    let renewal = MockRenewal::new(None, Duration::ZERO, 3600);
    let (coord, mut rx) = coordinator(Arc::clone(&renewal));

    let result = coord.recover(ApiRequest::post(REFRESH_PATH), unauthorized(), &*backend).await;

    assert!(result.is_err());
    assert_eq!(renewal.calls(), 0);
    assert_eq!(renewal.discarded(), 1);
    assert_eq!(logouts(&drain(&mut rx)), 1);
}

#[tokio::test]
async fn non_authorization_failures_pass_through() {
    let backend = MockBackend::new();
    let renewal = MockRenewal::new(None, Duration::ZERO, 3600);
    let (coord, _rx) = coordinator(Arc::clone(&renewal));

    let error = RequestError::status(500, "database unavailable");
    let result = coord.recover(ApiRequest::get("/sessions"), error.clone(), &*backend).await;

    assert_eq!(result.err(), Some(error));
    assert_eq!(renewal.calls(), 0);
    assert_eq!(backend.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn reactive_renewal_schedules_proactive_timer() -> anyhow::Result<()> {
    let backend = MockBackend::new();
    let renewal = MockRenewal::new(Some(Arc::clone(&backend)), Duration::ZERO, 3600);
    let (coord, mut rx) = coordinator(Arc::clone(&renewal));

    let response = coord.recover(ApiRequest::get("/auth/me"), unauthorized(), &*backend).await?;
    assert_eq!(response.status, 200);
    assert_eq!(backend.request_count(), 1);

    let delay = coord.tracker().scheduled_delay().map(|d| d.as_millis());
    assert!(matches!(delay, Some(1_799_000..=1_800_000)), "unexpected delay {delay:?}");

    let events = drain(&mut rx);
    assert!(matches!(
        events.first(),
        Some(SessionEvent::Renewed { trigger: RenewalTrigger::Reactive, expires_at: Some(_) })
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn proactive_timer_renews_and_reschedules() {
    let renewal = MockRenewal::new(None, Duration::ZERO, 3600);
    let (coord, mut rx) = coordinator(Arc::clone(&renewal));

    // 100s left is inside the margin: renewal fires after the 10s floor.
    let delay = coord.schedule_proactive_renewal(&credential_expiring_in(100));
    assert_eq!(delay, Some(Duration::from_secs(10)));

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(renewal.calls(), 1);
    let next = coord.tracker().scheduled_delay().map(|d| d.as_secs());
    assert!(matches!(next, Some(1799..=1800)), "unexpected delay {next:?}");

    let events = drain(&mut rx);
    assert!(matches!(
        events.first(),
        Some(SessionEvent::Renewed { trigger: RenewalTrigger::Proactive, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn scheduling_twice_fires_only_once() {
    let renewal = MockRenewal::new(None, Duration::ZERO, 0);
    let (coord, _rx) = coordinator(Arc::clone(&renewal));

    coord.schedule_proactive_renewal(&credential_expiring_in(60));
    coord.schedule_proactive_renewal(&credential_expiring_in(60));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(renewal.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn proactive_failure_does_not_log_out() {
    let renewal = MockRenewal::failing(Duration::ZERO);
    let (coord, mut rx) = coordinator(Arc::clone(&renewal));

    coord.schedule_proactive_renewal(&credential_expiring_in(100));
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(renewal.calls(), 1);
    assert_eq!(renewal.discarded(), 0);
    assert_eq!(coord.tracker().scheduled_delay(), None);
    let events = drain(&mut rx);
    assert_eq!(logouts(&events), 0);
    assert!(matches!(
        events.first(),
        Some(SessionEvent::RenewalFailed { trigger: RenewalTrigger::Proactive, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn proactive_renewal_joins_reactive_episode() -> anyhow::Result<()> {
    let backend = MockBackend::new();
    let renewal = MockRenewal::new(Some(Arc::clone(&backend)), Duration::from_secs(1), 3600);
    let (coord, _rx) = coordinator(Arc::clone(&renewal));

    let reactive = {
        let coord = Arc::clone(&coord);
        let backend = Arc::clone(&backend);
        tokio::spawn(async move {
            coord.recover(ApiRequest::get("/auth/me"), unauthorized(), &*backend).await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(coord.is_refreshing());

    coord.renew(RenewalTrigger::Proactive).await?;
    reactive.await??;

    assert_eq!(renewal.calls(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dropped_leader_releases_parked_requests() -> anyhow::Result<()> {
    let backend = MockBackend::new();
    let renewal = MockRenewal::new(Some(Arc::clone(&backend)), Duration::from_secs(1000), 3600);
    let (coord, _rx) = coordinator(Arc::clone(&renewal));

    let leader = {
        let coord = Arc::clone(&coord);
        let backend = Arc::clone(&backend);
        tokio::spawn(async move {
            coord.recover(ApiRequest::get("/a"), unauthorized(), &*backend).await
        })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;

    let follower = {
        let coord = Arc::clone(&coord);
        let backend = Arc::clone(&backend);
        tokio::spawn(async move {
            coord.recover(ApiRequest::get("/b"), unauthorized(), &*backend).await
        })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(coord.pending(), 1);

    leader.abort();
    assert!(leader.await.is_err());

    let result = follower.await?;
    assert_eq!(result.err().map(|e| e.message), Some("renewal abandoned".to_owned()));
    assert!(!coord.is_refreshing());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn request_parked_on_failed_proactive_renewal_logs_out() -> anyhow::Result<()> {
    let backend = MockBackend::new();
    let renewal = MockRenewal::failing(Duration::from_secs(1));
    let (coord, mut rx) = coordinator(Arc::clone(&renewal));

    let proactive = {
        let coord = Arc::clone(&coord);
        tokio::spawn(async move { coord.renew(RenewalTrigger::Proactive).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(coord.is_refreshing());

    let result = coord.recover(ApiRequest::get("/sessions"), unauthorized(), &*backend).await;
    assert!(proactive.await?.is_err());

    assert_eq!(result.err().map(|e| e.message), Some("refresh token expired".to_owned()));
    assert_eq!(renewal.calls(), 1);
    assert_eq!(renewal.discarded(), 1);
    assert_eq!(backend.request_count(), 0);
    assert_eq!(logouts(&drain(&mut rx)), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn manual_join_on_failed_proactive_renewal_keeps_session() -> anyhow::Result<()> {
    let renewal = MockRenewal::failing(Duration::from_secs(1));
    let (coord, mut rx) = coordinator(Arc::clone(&renewal));

    let proactive = {
        let coord = Arc::clone(&coord);
        tokio::spawn(async move { coord.renew(RenewalTrigger::Proactive).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(coord.renew(RenewalTrigger::Manual).await.is_err());
    assert!(proactive.await?.is_err());

    assert_eq!(renewal.calls(), 1);
    assert_eq!(renewal.discarded(), 0);
    assert_eq!(logouts(&drain(&mut rx)), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn opaque_grant_schedules_from_lifetime_hint() -> anyhow::Result<()> {
    let renewal = MockRenewal::new(None, Duration::ZERO, 3600);
    let (coord, _rx) = coordinator(Arc::clone(&renewal));
    coord.schedule_proactive_renewal(&credential_expiring_in(7200));
    let before = coord.tracker().scheduled_delay().map(|d| d.as_secs());
    assert!(matches!(before, Some(5399..=5400)), "unexpected delay {before:?}");

    renewal.set_grant(RenewalGrant {
        credential: Some(Credential::new("opaque")),
        expires_in: Some(3600),
    });
    coord.renew(RenewalTrigger::Manual).await?;

    let after = coord.tracker().scheduled_delay().map(|d| d.as_secs());
    assert!(matches!(after, Some(1799..=1800)), "unexpected delay {after:?}");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn grant_without_expiry_cancels_stale_timer() -> anyhow::Result<()> {
    let renewal = MockRenewal::new(None, Duration::ZERO, 3600);
    let (coord, _rx) = coordinator(Arc::clone(&renewal));
    coord.schedule_proactive_renewal(&credential_with_exp(epoch_secs() + 7200));
    assert!(coord.tracker().scheduled_delay().is_some());

    renewal.set_grant(RenewalGrant::default());
    coord.renew(RenewalTrigger::Manual).await?;

    assert_eq!(coord.tracker().scheduled_delay(), None);
    assert_eq!(renewal.calls(), 1);
    Ok(())
}
