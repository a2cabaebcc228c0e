//! Concurrent writers against the session-token registry

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tessera_session::{SessionKey, SessionToken, SessionTokenRegistry};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_merges_lose_no_update() {
    let registry = Arc::new(SessionTokenRegistry::new(64));
    let key = SessionKey::new("coll-rid", "0");

    let mut handles = Vec::new();
    for writer in 0..8i64 {
        let registry = Arc::clone(&registry);
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            for step in 0..200i64 {
                let lsn = writer * 1_000 + step;
                let token = SessionToken::vector(1, lsn, [(1, lsn), (2, 7_999 - lsn)]);
                registry.record_token(key.clone(), token);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let token = registry.resolve_token(&key).unwrap();
    assert_eq!(token.global_lsn(), 7_199);
    assert_eq!(token.region_lsn(1), Some(7_199));
    assert_eq!(token.region_lsn(2), Some(7_999));
    assert_eq!(registry.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inserts_respect_capacity() {
    let capacity = 32;
    let registry = Arc::new(SessionTokenRegistry::new(capacity));

    let mut handles = Vec::new();
    for writer in 0..4 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            for range in 0..100 {
                let key = SessionKey::new(format!("coll-{}", writer), range.to_string());
                registry.record_token(key, SessionToken::vector(1, range, []));
                registry.resolve_token(&SessionKey::new("coll-0", "0"));
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(registry.len(), capacity);
}

#[test]
fn test_capacity_plus_one_evicts_oldest() {
    let capacity = 5;
    let registry = SessionTokenRegistry::new(capacity);
    for range in 0..=capacity {
        registry.record_token(
            SessionKey::new("coll-rid", range.to_string()),
            SessionToken::Simple(range as i64),
        );
    }

    assert_eq!(registry.len(), capacity);
    assert!(registry
        .resolve_token(&SessionKey::new("coll-rid", "0"))
        .is_none());
    for range in 1..=capacity {
        assert!(registry
            .resolve_token(&SessionKey::new("coll-rid", range.to_string()))
            .is_some());
    }
}

#[test]
fn test_clear_racing_inserts_keeps_count_consistent() {
    let capacity = 64;
    let registry = SessionTokenRegistry::new(capacity);
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            while !done.load(Ordering::Acquire) {
                registry.clear_collection("c");
            }
        });
        scope.spawn(|| {
            for range in 0..5_000i64 {
                registry.record_token(
                    SessionKey::new("c", range.to_string()),
                    SessionToken::Simple(range),
                );
                // a second collection keeps eviction busy alongside the clears
                registry.record_token(
                    SessionKey::new("d", (range % 100).to_string()),
                    SessionToken::Simple(range),
                );
            }
            done.store(true, Ordering::Release);
        });
    });

    let stored = registry.collection_tokens("c").len() + registry.collection_tokens("d").len();
    assert!(registry.len() <= capacity);
    assert_eq!(registry.len(), stored);

    registry.clear_collection("c");
    registry.clear_collection("d");
    assert!(registry.is_empty());
}
