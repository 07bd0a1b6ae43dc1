
use super::*;

use crate::testutil::{sh_spec, FAKE_CHILD_SCRIPT};

fn test_timeouts() -> ChildTimeouts {
    ChildTimeouts {
        startup: Duration::from_secs(10),
        call: Duration::from_secs(5),
        probe: Duration::from_secs(3),
        stop_grace: Duration::from_millis(300),
    }
}

fn supervisor(alias: Option<&str>) -> Arc<ChildSupervisor> {
    Arc::new(ChildSupervisor::new(
        0,
        alias.map(str::to_string),
        "TEST",
        BrowserConfig::default(),
        test_timeouts(),
    ))
}

async fn started() -> Arc<ChildSupervisor> {
    let child = supervisor(None);
    child.start(sh_spec(FAKE_CHILD_SCRIPT)).await.unwrap();
    child
}

#[tokio::test]
async fn test_start_handshake_reaches_ready() {
    let child = started().await;

    assert_eq!(child.state(), ChildState::Ready);
    assert!(child.pid().is_some());
    assert!(child.last_health_ok().is_some());
    assert!(child.tools().contains(&"browser_navigate".to_string()));

    child.stop(Duration::from_millis(300)).await;
    assert_eq!(child.state(), ChildState::Stopped);
}

#[tokio::test]
async fn test_start_failure_marks_failed() {
    let child = supervisor(None);
    let spec = LaunchSpec {
        program: "/bin/false".into(),
        args: Vec::new(),
        env: Vec::new(),
    };

    let err = child.start(spec).await.unwrap_err();
    assert!(matches!(err, ChildError::Startup(_)));
    assert_eq!(child.state(), ChildState::Failed);

    // A failed child accepts no further calls.
    let err = child.call("anything", json!({}), None).await.unwrap_err();
    assert!(matches!(err, ChildError::ChildGone));
}

#[tokio::test]
async fn test_call_before_start_rejected() {
    let child = supervisor(None);
    assert_eq!(child.state(), ChildState::Starting);

    let err = child.call("browser_navigate", json!({}), None).await.unwrap_err();
    assert!(matches!(err, ChildError::Startup(_)));
}

#[tokio::test]
async fn test_call_round_trip() {
    let child = started().await;

    let result = child
        .call("browser_click", json!({"element": "button"}), None)
        .await
        .unwrap();
    assert_eq!(result["echo"]["method"], "browser_click");
    assert_eq!(result["echo"]["params"]["element"], "button");

    child.stop(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_timeout_removes_waiter_and_keeps_child() {
    let child = started().await;

    let err = child
        .call("defer", json!({}), Some(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert!(matches!(err, ChildError::Timeout { after_ms: 200, .. }));
    assert_eq!(child.state(), ChildState::Ready);

    // flush releases the deferred reply: it targets a removed id and is
    // dropped, while the child keeps serving.
    let result = child.call("flush", json!({}), None).await.unwrap();
    assert_eq!(result["flushed"], true);
    let result = child.call("after", json!({}), None).await.unwrap();
    assert_eq!(result["echo"]["method"], "after");

    child.stop(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_replies_routed_by_id_across_reordering() {
    let child = started().await;

    let deferred = {
        let child = Arc::clone(&child);
        tokio::spawn(async move { child.call("defer", json!({}), None).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // flush answers itself first, then the deferred id.
    let flushed = child.call("flush", json!({}), None).await.unwrap();
    assert_eq!(flushed["flushed"], true);
    let deferred = deferred.await.unwrap().unwrap();
    assert_eq!(deferred["deferred"], true);

    child.stop(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_unknown_reply_id_dropped_by_reader() {
    let child = started().await;

    let result = child.call("phantom", json!({}), None).await.unwrap();
    assert_eq!(result["real"], true);
    assert_eq!(child.state(), ChildState::Ready);

    child.stop(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_remote_error_passed_through() {
    let child = started().await;

    let err = child.call("fail_call", json!({}), None).await.unwrap_err();
    match err {
        ChildError::Remote { code, message } => {
            assert_eq!(code, -32000);
            assert_eq!(message, "boom");
        }
        other => panic!("expected Remote, got {other:?}"),
    }
    assert_eq!(child.state(), ChildState::Ready);

    child.stop(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_reader_fails_child_on_exit() {
    let child = started().await;

    let err = child.call("die_now", json!({}), None).await.unwrap_err();
    assert!(matches!(err, ChildError::ChildGone));
    assert_eq!(child.state(), ChildState::Failed);

    let err = child.call("after", json!({}), None).await.unwrap_err();
    assert!(matches!(err, ChildError::ChildGone));
}

#[tokio::test]
async fn test_reader_fails_child_on_unparseable_frame() {
    let child = started().await;

    let err = child
        .call("garbage", json!({}), Some(Duration::from_secs(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, ChildError::ChildGone));
    assert_eq!(child.state(), ChildState::Failed);
}

#[tokio::test]
async fn test_probe_interleaves_with_slow_call() {
    let child = started().await;

    // The probe rides the same stdio as the in-flight slow call and
    // resolves on its own deadline, not the tool call's.
    let (slow, probe) = tokio::join!(
        child.call("slow_call", json!({}), None),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            child.probe().await
        }
    );
    assert_eq!(slow.unwrap()["slow"], true);
    probe.unwrap();

    child.stop(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_progress_notifications_surfaced() {
    let child = started().await;
    let mut progress = child.subscribe_progress();

    let result = child
        .call("progress_then_reply", json!({}), None)
        .await
        .unwrap();
    assert_eq!(result["done"], true);

    let notification = progress.recv().await.unwrap();
    assert_eq!(notification.params["progress"], 1);
    assert_eq!(notification.params["total"], 2);

    child.stop(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_stop_cancels_inflight_and_is_idempotent() {
    let child = started().await;

    let inflight = {
        let child = Arc::clone(&child);
        tokio::spawn(async move { child.call("slow_call", json!({}), None).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    child.stop(Duration::from_millis(300)).await;
    assert_eq!(child.state(), ChildState::Stopped);

    let err = inflight.await.unwrap().unwrap_err();
    assert!(matches!(err, ChildError::Cancelled | ChildError::ChildGone));

    // Second stop is a no-op.
    child.stop(Duration::from_millis(300)).await;
    assert_eq!(child.state(), ChildState::Stopped);

    let err = child.call("after", json!({}), None).await.unwrap_err();
    assert!(matches!(err, ChildError::ChildGone));
}

#[tokio::test]
async fn test_lease_bookkeeping_transitions() {
    let child = started().await;

    child.mark_leased();
    assert_eq!(child.state(), ChildState::Leased);
    let lease = child.lease_info().unwrap();
    assert_eq!(lease.instance_id, 0);

    child.mark_released();
    assert_eq!(child.state(), ChildState::Ready);
    assert!(child.lease_info().is_none());

    child.stop(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_probe_failure_counter_and_reset() {
    let child = started().await;

    assert_eq!(child.record_probe_failure(&ChildError::ChildGone), 1);
    assert_eq!(child.record_probe_failure(&ChildError::ChildGone), 2);
    assert!(child.last_probe_error().is_some());

    child.record_probe_ok();
    assert!(child.last_probe_error().is_none());
    assert_eq!(child.record_probe_failure(&ChildError::ChildGone), 1);

    child.stop(Duration::from_millis(300)).await;
}
