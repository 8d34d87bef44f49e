//! In-memory store tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use qgate_core::protocol::command::ScoreBound;
use qgate_gateway::store::{KvStore, MemoryStore};

fn b(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

#[tokio::test]
async fn lists_are_fifo() {
    let store = MemoryStore::new();
    store.rpush("q", b("1")).await.unwrap();
    store.rpush("q", b("2")).await.unwrap();
    assert_eq!(store.rpush("q", b("3")).await.unwrap(), 3);

    let (key, first) = store
        .blpop("q", Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(key, "q");
    assert_eq!(first, b("1"));
    assert_eq!(store.lpop("q", 10).await.unwrap(), vec![b("2"), b("3")]);

    // drained lists disappear
    assert_eq!(store.key_count(), 0);
}

#[tokio::test]
async fn blpop_times_out_on_empty_list() {
    let store = MemoryStore::new();
    let started = Instant::now();
    let got = store.blpop("empty", Duration::from_millis(50)).await.unwrap();
    assert!(got.is_none());
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn blpop_wakes_on_push() {
    let store = Arc::new(MemoryStore::new());
    let waiter = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.blpop("reply", Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    store.rpush("reply", b("done")).await.unwrap();

    let got = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter must wake")
        .unwrap()
        .unwrap();
    assert_eq!(got, Some(("reply".to_string(), b("done"))));
}

#[tokio::test]
async fn rpush_expire_sets_ttl_and_key_expires() {
    let store = MemoryStore::new();
    store
        .rpush_expire("q", b("x"), Duration::from_millis(40))
        .await
        .unwrap();
    let ttl = store.ttl("q").unwrap();
    assert!(ttl <= Duration::from_millis(40));
    assert_eq!(store.list_len("q"), 1);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(store.list_len("q"), 0);
    assert!(store.lpop("q", 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn every_push_refreshes_expiry() {
    let store = MemoryStore::new();
    store
        .rpush_expire("q", b("a"), Duration::from_millis(200))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    store
        .rpush_expire("q", b("b"), Duration::from_millis(200))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    // the first expiry has passed, the refreshed one has not
    assert_eq!(store.list_len("q"), 2);
}

#[tokio::test]
async fn sweep_drops_expired_keys() {
    let store = MemoryStore::new();
    store.rpush_expire("a", b("1"), Duration::from_millis(10)).await.unwrap();
    store.rpush("b", b("2")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(store.sweep_expired(), 1);
    assert_eq!(store.key_count(), 1);
}

#[tokio::test]
async fn hash_operations() {
    let store = MemoryStore::new();
    store.hset("User", "b", b("2")).await.unwrap();
    store.hset("User", "a", b("1")).await.unwrap();

    assert_eq!(store.hget("User", "a").await.unwrap(), Some(b("1")));
    assert_eq!(store.hget("User", "zz").await.unwrap(), None);
    assert_eq!(store.hlen("User").await.unwrap(), 2);
    assert_eq!(store.hkeys("User").await.unwrap(), vec!["a", "b"]);
    assert_eq!(store.hvals("User").await.unwrap(), vec![b("1"), b("2")]);
    assert_eq!(
        store.hmget("User", &["b".into(), "x".into()]).await.unwrap(),
        vec![Some(b("2")), None]
    );
    assert!(store.hexists("User", "a").await.unwrap());

    assert!(store.hdel("User", "a").await.unwrap());
    assert!(!store.hdel("User", "a").await.unwrap());
    assert!(store.del("User").await.unwrap());
    assert!(store.hgetall("User").await.unwrap().is_empty());
}

#[tokio::test]
async fn wrong_type_is_a_transport_error() {
    let store = MemoryStore::new();
    store.rpush("q", b("1")).await.unwrap();
    let err = store.hget("q", "f").await.unwrap_err();
    assert_eq!(err.client_code().as_str(), "TRANSPORT");
}

#[tokio::test]
async fn set_membership() {
    let store = MemoryStore::new();
    assert!(store.sadd("tags", b("rust")).await.unwrap());
    assert!(!store.sadd("tags", b("rust")).await.unwrap());
    assert!(store.sismember("tags", b"rust").await.unwrap());
    assert!(!store.sismember("tags", b"go").await.unwrap());
    assert!(!store.sismember("absent", b"rust").await.unwrap());
}

#[tokio::test]
async fn sorted_set_orders_by_score_then_member() {
    let store = MemoryStore::new();
    assert!(store.zadd("z", 2.0, b("b")).await.unwrap());
    assert!(store.zadd("z", 1.0, b("c")).await.unwrap());
    assert!(store.zadd("z", 2.0, b("a")).await.unwrap());
    // re-scoring moves the member instead of duplicating it
    assert!(!store.zadd("z", 0.5, b("b")).await.unwrap());

    let members = |v: Vec<qgate_gateway::store::ScoredMember>| -> Vec<Bytes> {
        v.into_iter().map(|m| m.member).collect()
    };
    let all = store.zrange("z", 0, -1).await.unwrap();
    assert_eq!(all[0].score, 0.5);
    assert_eq!(members(all), vec![b("b"), b("c"), b("a")]);

    assert_eq!(members(store.zrange("z", 1, 1).await.unwrap()), vec![b("c")]);
    assert_eq!(members(store.zrange("z", -1, 10).await.unwrap()), vec![b("a")]);
    assert!(store.zrange("z", 2, 1).await.unwrap().is_empty());
    assert!(store.zrange("absent", 0, -1).await.unwrap().is_empty());

    let mid = store
        .zrange_by_score("z", ScoreBound::Exclusive(0.5), ScoreBound::Inclusive(2.0))
        .await
        .unwrap();
    assert_eq!(members(mid), vec![b("c"), b("a")]);

    assert_eq!(store.zrank("z", b"a").await.unwrap(), Some(2));
    assert_eq!(store.zrank("z", b"x").await.unwrap(), None);
}

#[tokio::test]
async fn set_commands_respect_key_types() {
    let store = MemoryStore::new();
    store.rpush("list", b("1")).await.unwrap();
    assert!(store.zadd("list", 1.0, b("m")).await.is_err());
    assert!(store.sismember("list", b"1").await.is_err());
    assert!(store.zrange("list", 0, -1).await.is_err());
}
