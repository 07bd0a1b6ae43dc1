
use super::*;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::error::ChildError;
use crate::registry::{InstanceKey, LeaseHint};
use crate::testutil::{
    deaf_launcher, fake_launcher, flaky_launcher, test_pool_config, test_settings,
};

#[tokio::test]
async fn test_init_and_simple_call() {
    let config = test_pool_config("MAIN", true, &[None]);
    let pool = Pool::init_with_launcher(&config, fake_launcher).await.unwrap();

    let lease = pool.lease(&LeaseHint::Any).await.unwrap();
    assert_eq!(lease.child().id(), 0);
    assert_eq!(lease.child().state(), ChildState::Leased);

    let result = lease
        .child()
        .call("browser_navigate", json!({"url": "https://example.com"}), None)
        .await
        .unwrap();
    assert_eq!(result["echo"]["method"], "browser_navigate");
    assert_eq!(result["echo"]["params"]["url"], "https://example.com");

    drop(lease);
    assert_eq!(pool.children()[0].state(), ChildState::Ready);

    pool.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_tools_discovered_during_handshake() {
    let config = test_pool_config("MAIN", true, &[None]);
    let pool = Pool::init_with_launcher(&config, fake_launcher).await.unwrap();

    let tools = pool.children()[0].tools();
    assert!(tools.contains(&"browser_navigate".to_string()));
    assert!(tools.contains(&"browser_take_screenshot".to_string()));

    pool.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_lease_released_on_drop_and_status_reflects_it() {
    let config = test_pool_config("MAIN", true, &[Some("primary")]);
    let pool = Pool::init_with_launcher(&config, fake_launcher).await.unwrap();

    {
        let lease = pool
            .lease(&LeaseHint::Specific(InstanceKey::Alias("primary".to_string())))
            .await
            .unwrap();
        let status = pool.status();
        assert_eq!(status.leased_instances, 1);
        assert_eq!(status.available_instances, 0);
        assert!(status.instances[0].lease_started_at.is_some());
        drop(lease);
    }

    let status = pool.status();
    assert_eq!(status.leased_instances, 0);
    assert_eq!(status.available_instances, 1);
    assert!(status.instances[0].lease_started_at.is_none());

    pool.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_failed_startup_retained_but_never_enqueued() {
    let mut config = test_pool_config("MIXED", true, &[None, None]);
    config.instance_configs[1].browser.browser = Some("broken".to_string());

    let pool = Pool::init_with_launcher(&config, flaky_launcher).await.unwrap();

    assert_eq!(pool.children()[1].state(), ChildState::Failed);
    let status = pool.status();
    assert_eq!(status.total_instances, 2);
    assert_eq!(status.healthy_instances, 1);

    // The healthy instance serves; the failed one fails fast.
    let lease = pool.lease(&LeaseHint::Any).await.unwrap();
    assert_eq!(lease.child().id(), 0);
    drop(lease);

    let err = pool
        .lease(&LeaseHint::Specific(InstanceKey::Id(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::NotFound(_)));

    pool.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_child_crash_mid_call_fails_instance() {
    let mut config = test_pool_config("CRASH", true, &[None]);
    config.settings.lease_timeout = Some(Duration::from_millis(200));
    let pool = Pool::init_with_launcher(&config, fake_launcher).await.unwrap();

    let lease = pool.lease(&LeaseHint::Any).await.unwrap();
    let err = lease
        .child()
        .call("die_now", json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChildError::ChildGone));
    assert_eq!(lease.child().state(), ChildState::Failed);
    drop(lease);

    let status = pool.status();
    assert_eq!(status.healthy_instances, 0);

    // The failed handle is gone from the queue: an any-lease now exhausts.
    let err = pool.lease(&LeaseHint::Any).await.unwrap_err();
    assert!(matches!(err, PoolError::Exhausted { .. }));

    pool.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_call_timeout_keeps_child_usable() {
    let config = test_pool_config("SLOW", true, &[None]);
    let pool = Pool::init_with_launcher(&config, fake_launcher).await.unwrap();

    let lease = pool.lease(&LeaseHint::Any).await.unwrap();
    let err = lease
        .child()
        .call("defer", json!({}), Some(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert!(matches!(err, ChildError::Timeout { .. }));

    // The late reply to the deferred id is dropped; the child still serves.
    let result = lease
        .child()
        .call("flush", json!({}), None)
        .await
        .unwrap();
    assert_eq!(result["flushed"], true);

    let result = lease.child().call("anything", json!({}), None).await.unwrap();
    assert_eq!(result["echo"]["method"], "anything");

    drop(lease);
    pool.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_late_reply_routed_by_id_not_order() {
    let config = test_pool_config("ORDER", true, &[None]);
    let pool = Pool::init_with_launcher(&config, fake_launcher).await.unwrap();
    let lease = pool.lease(&LeaseHint::Any).await.unwrap();
    let child = lease.child().clone();

    let deferred = {
        let child = child.clone();
        tokio::spawn(async move { child.call("defer", json!({}), None).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // flush replies to itself first, then to the deferred call.
    let flushed = child.call("flush", json!({}), None).await.unwrap();
    assert_eq!(flushed["flushed"], true);

    let deferred = deferred.await.unwrap().unwrap();
    assert_eq!(deferred["deferred"], true);

    drop(lease);
    pool.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_unknown_reply_id_is_dropped() {
    let config = test_pool_config("PHANTOM", true, &[None]);
    let pool = Pool::init_with_launcher(&config, fake_launcher).await.unwrap();
    let lease = pool.lease(&LeaseHint::Any).await.unwrap();

    // The child emits a reply for an id nobody sent before the real one.
    let result = lease.child().call("phantom", json!({}), None).await.unwrap();
    assert_eq!(result["real"], true);
    assert_eq!(lease.child().state(), ChildState::Leased);

    drop(lease);
    pool.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_remote_error_keeps_child_usable() {
    let config = test_pool_config("ERR", true, &[None]);
    let pool = Pool::init_with_launcher(&config, fake_launcher).await.unwrap();
    let lease = pool.lease(&LeaseHint::Any).await.unwrap();

    let err = lease
        .child()
        .call("fail_call", json!({}), None)
        .await
        .unwrap_err();
    match err {
        ChildError::Remote { code, message } => {
            assert_eq!(code, -32000);
            assert_eq!(message, "boom");
        }
        other => panic!("expected Remote, got {other:?}"),
    }

    let result = lease.child().call("ok", json!({}), None).await.unwrap();
    assert_eq!(result["echo"]["method"], "ok");

    drop(lease);
    pool.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_unparseable_frame_fails_child() {
    let config = test_pool_config("GARBLED", true, &[None]);
    let pool = Pool::init_with_launcher(&config, fake_launcher).await.unwrap();
    let lease = pool.lease(&LeaseHint::Any).await.unwrap();

    let err = lease
        .child()
        .call("garbage", json!({}), Some(Duration::from_secs(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, ChildError::ChildGone));
    assert_eq!(lease.child().state(), ChildState::Failed);

    drop(lease);
    pool.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_probe_interleaves_with_inflight_call() {
    let config = test_pool_config("BUSY", true, &[None]);
    let pool = Pool::init_with_launcher(&config, fake_launcher).await.unwrap();
    let lease = pool.lease(&LeaseHint::Any).await.unwrap();
    let child = lease.child().clone();

    // probe() shares the stdio with the in-flight slow call and succeeds on
    // its own timeline. The scripted child serializes replies, so allow it
    // the slow call's two seconds but not the tool-call deadline.
    let probing = {
        let child = child.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let started = Instant::now();
            let outcome = child
                .call("ping", json!({}), Some(Duration::from_secs(4)))
                .await;
            (outcome, started.elapsed())
        }
    };

    let (slow, (probe, elapsed)) =
        tokio::join!(child.call("slow_call", json!({}), None), probing);

    assert_eq!(slow.unwrap()["slow"], true);
    probe.unwrap();
    assert!(elapsed < Duration::from_secs(4));

    drop(lease);
    pool.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_health_loop_fails_deaf_child_after_threshold() {
    let config = test_pool_config("DEAF", true, &[None]);
    let pool = Pool::init_with_launcher(&config, deaf_launcher).await.unwrap();
    assert_eq!(pool.children()[0].state(), ChildState::Ready);

    let threshold = test_settings().health_failure_threshold;
    // One failed probe is tolerated.
    pool.check_all_health(threshold).await;
    assert_eq!(pool.children()[0].state(), ChildState::Ready);
    assert!(pool.children()[0].last_probe_error().is_some());

    // The threshold-th consecutive failure marks the child failed.
    pool.check_all_health(threshold).await;
    assert_eq!(pool.children()[0].state(), ChildState::Failed);

    let status = pool.status();
    assert_eq!(status.healthy_instances, 0);

    pool.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_successful_probe_clears_failure_counter() {
    let config = test_pool_config("RECOVER", true, &[None]);
    let pool = Pool::init_with_launcher(&config, fake_launcher).await.unwrap();

    // Probe failures below the threshold are forgotten after one success.
    let child = &pool.children()[0];
    child.record_probe_failure(&ChildError::ChildGone);
    pool.check_all_health(2).await;
    assert_eq!(child.state(), ChildState::Ready);
    assert!(child.last_probe_error().is_none());
    assert!(child.last_health_ok().is_some());

    pool.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_shutdown_cancels_inflight_and_rejects_new_leases() {
    let config = test_pool_config("DRAIN", true, &[None]);
    let pool = Pool::init_with_launcher(&config, fake_launcher).await.unwrap();
    let lease = pool.lease(&LeaseHint::Any).await.unwrap();
    let child = lease.child().clone();

    let inflight = tokio::spawn(async move {
        child.call("slow_call", json!({}), None).await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    pool.shutdown(Duration::from_millis(200)).await;

    let err = inflight.await.unwrap().unwrap_err();
    assert!(matches!(err, ChildError::Cancelled | ChildError::ChildGone));

    let err = pool.lease(&LeaseHint::Any).await.unwrap_err();
    assert!(matches!(err, PoolError::ShuttingDown));
    drop(lease);
}

#[tokio::test]
async fn test_fifo_fairness_two_instances_three_callers() {
    let config = test_pool_config("FAIR", true, &[None, None]);
    let pool = Pool::init_with_launcher(&config, fake_launcher).await.unwrap();

    let lease_a = pool.lease(&LeaseHint::Any).await.unwrap();
    let lease_b = pool.lease(&LeaseHint::Any).await.unwrap();
    let id_a = lease_a.child().id();

    let pool_c = pool.clone();
    let caller_c = tokio::spawn(async move { pool_c.lease(&LeaseHint::Any).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!caller_c.is_finished());

    // A releases: C must get A's former child, not B's.
    drop(lease_a);
    let lease_c = caller_c.await.unwrap().unwrap();
    assert_eq!(lease_c.child().id(), id_a);

    drop(lease_b);
    drop(lease_c);
    pool.shutdown(Duration::from_millis(300)).await;
}
