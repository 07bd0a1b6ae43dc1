
use super::*;

#[test]
fn test_kinds_are_stable() {
    assert_eq!(ProxyError::NotFound("x".into()).kind(), "not_found");
    assert_eq!(ProxyError::AmbiguousAlias("a".into()).kind(), "ambiguous_alias");
    assert_eq!(ProxyError::ShuttingDown.kind(), "shutting_down");
    assert_eq!(
        ProxyError::PoolExhausted { waited_ms: 5 }.kind(),
        "pool_exhausted"
    );
    assert_eq!(
        ProxyError::Timeout { method: "m".into(), after_ms: 1 }.kind(),
        "timeout"
    );
    assert_eq!(ProxyError::ChildGone.kind(), "child_gone");
    assert_eq!(
        ProxyError::RemoteError { code: 1, message: "m".into() }.kind(),
        "remote_error"
    );
    assert_eq!(ProxyError::TooLarge { size: 2, max: 1 }.kind(), "too_large");
    assert_eq!(ProxyError::Cancelled.kind(), "cancelled");
    assert_eq!(ProxyError::InvalidParams("p".into()).kind(), "invalid_params");
}

#[test]
fn test_to_value_shape() {
    let value = ProxyError::ChildGone.to_value();
    assert_eq!(value["error"]["kind"], "child_gone");
    assert!(value["error"]["message"].is_string());
    assert!(value.get("result").is_none());
}

#[test]
fn test_from_pool_error() {
    let err: ProxyError = PoolError::AmbiguousAlias("worker".into()).into();
    assert_eq!(err.kind(), "ambiguous_alias");

    let err: ProxyError = PoolError::Exhausted { waited_ms: 100 }.into();
    assert!(matches!(err, ProxyError::PoolExhausted { waited_ms: 100 }));
}

#[test]
fn test_from_child_error() {
    let err: ProxyError = ChildError::Remote { code: -32000, message: "boom".into() }.into();
    match err {
        ProxyError::RemoteError { code, message } => {
            assert_eq!(code, -32000);
            assert_eq!(message, "boom");
        }
        other => panic!("expected RemoteError, got {other:?}"),
    }

    let err: ProxyError = ChildError::ChildGone.into();
    assert!(matches!(err, ProxyError::ChildGone));
}

#[test]
fn test_from_blob_error() {
    let err: ProxyError = BlobError::TooLarge { size: 10, max: 5 }.into();
    assert!(matches!(err, ProxyError::TooLarge { size: 10, max: 5 }));

    let err: ProxyError = BlobError::NotFound("id".into()).into();
    assert_eq!(err.kind(), "not_found");
}
