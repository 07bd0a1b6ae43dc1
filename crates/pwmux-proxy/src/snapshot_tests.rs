
use super::*;
use std::time::Duration;

fn pages(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("page-{i}")).collect()
}

#[test]
fn test_store_and_lookup_pages() {
    let cache = SnapshotCache::new(DEFAULT_SNAPSHOT_TTL);
    cache.store("snap_abc", "snapshot", pages(3), 120);

    let page = cache.lookup("snap_abc", 0).unwrap();
    assert_eq!(page.page, "page-0");
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.total_items, 120);
    assert!(page.has_more);

    let last = cache.lookup("snap_abc", 2).unwrap();
    assert_eq!(last.page, "page-2");
    assert!(!last.has_more);
}

#[test]
fn test_lookup_miss() {
    let cache = SnapshotCache::new(DEFAULT_SNAPSHOT_TTL);
    assert!(cache.lookup("snap_missing", 0).is_none());
}

#[test]
fn test_out_of_range_page_serves_empty_tail() {
    let cache = SnapshotCache::new(DEFAULT_SNAPSHOT_TTL);
    cache.store("snap_abc", "snapshot", pages(2), 60);

    let page = cache.lookup("snap_abc", 9).unwrap();
    assert_eq!(page.page, "");
    assert!(!page.has_more);
    assert_eq!(page.total_pages, 2);
}

#[test]
fn test_entries_are_immutable_after_insertion() {
    let cache = SnapshotCache::new(DEFAULT_SNAPSHOT_TTL);
    cache.store("snap_abc", "snapshot", pages(2), 60);
    // A second store under the same fingerprint is a no-op.
    cache.store("snap_abc", "snapshot", vec!["other".to_string()], 1);

    let page = cache.lookup("snap_abc", 0).unwrap();
    assert_eq!(page.page, "page-0");
    assert_eq!(page.total_items, 60);
}

#[test]
fn test_expired_entry_misses_and_evicts() {
    let cache = SnapshotCache::new(Duration::from_millis(0));
    cache.store("snap_old", "snapshot", pages(1), 10);

    std::thread::sleep(Duration::from_millis(10));
    assert!(cache.lookup("snap_old", 0).is_none());

    assert_eq!(cache.evict_expired(), 1);
    assert!(cache.is_empty());
}

#[test]
fn test_evict_keeps_live_entries() {
    let cache = SnapshotCache::new(DEFAULT_SNAPSHOT_TTL);
    cache.store("snap_live", "snapshot", pages(1), 10);
    assert_eq!(cache.evict_expired(), 0);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_fingerprint_stability() {
    let a = fingerprint("payload", Some("[?role=='button']"), true, "json");
    let b = fingerprint("payload", Some("[?role=='button']"), true, "json");
    assert_eq!(a, b);
    assert!(a.starts_with("snap_"));
}

#[test]
fn test_fingerprint_sensitivity() {
    let base = fingerprint("payload", None, false, "yaml");
    assert_ne!(base, fingerprint("payload2", None, false, "yaml"));
    assert_ne!(base, fingerprint("payload", Some("q"), false, "yaml"));
    assert_ne!(base, fingerprint("payload", None, true, "yaml"));
    assert_ne!(base, fingerprint("payload", None, false, "json"));
}

#[test]
fn test_fingerprint_no_parameter_smearing() {
    // A query string must not be confusable with payload content.
    let a = fingerprint("ab", Some("c"), false, "yaml");
    let b = fingerprint("abc", None, false, "yaml");
    assert_ne!(a, b);
}
