use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::cmd::Cmd;
use crate::driver::Driver;
use crate::error::DriverError;
use crate::script::Script;
use crate::value::{ScoredMember, Value};

const CONFORMANCE_ADD: Script = Script::new(
    "conformance-zadd",
    "return redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])",
);

fn key(name: &str) -> String {
    format!("conformance:{name}")
}

/// Run the full driver conformance test suite.
///
/// Call this from your backend's test module with a freshly connected
/// driver against an empty keyspace. The script check uses a script named
/// `conformance-zadd`, which in-process backends must recognize.
///
/// # Errors
///
/// Returns an error if any command fails unexpectedly.
pub async fn run_driver_conformance_tests(driver: &dyn Driver) -> Result<(), DriverError> {
    test_ping(driver).await?;
    test_get_missing(driver).await?;
    test_set_and_get(driver).await?;
    test_incr_and_del(driver).await?;
    test_cached_reads_see_writes(driver).await?;
    test_sorted_set(driver).await?;
    test_batch_keeps_order(driver).await?;
    test_batch_isolates_errors(driver).await?;
    test_eval(driver).await?;
    test_pubsub(driver).await?;
    Ok(())
}

async fn test_ping(driver: &dyn Driver) -> Result<(), DriverError> {
    let pong: String = driver.exec(Cmd::new("PING")).await?.decode()?;
    assert_eq!(pong, "PONG");
    Ok(())
}

async fn test_get_missing(driver: &dyn Driver) -> Result<(), DriverError> {
    let reply = driver.exec(Cmd::new("GET").arg(key("missing"))).await?;
    assert!(reply.is_nil(), "GET on a missing key should be nil");
    assert!(
        matches!(reply.decode::<String>(), Err(ref e) if e.is_nil()),
        "nil should decode to the nil sentinel"
    );
    Ok(())
}

async fn test_set_and_get(driver: &dyn Driver) -> Result<(), DriverError> {
    let ok: bool = driver
        .exec(Cmd::new("SET").arg(key("greeting")).arg("hello"))
        .await?
        .decode()?;
    assert!(ok, "SET should reply OK");
    let val: String = driver.exec(Cmd::new("GET").arg(key("greeting"))).await?.decode()?;
    assert_eq!(val, "hello");
    Ok(())
}

async fn test_incr_and_del(driver: &dyn Driver) -> Result<(), DriverError> {
    let k = key("counter");
    let n: i64 = driver.exec(Cmd::new("INCRBY").arg(&k).arg(5i64)).await?.decode()?;
    assert_eq!(n, 5);
    let n: i64 = driver.exec(Cmd::new("INCRBY").arg(&k).arg(-2i64)).await?.decode()?;
    assert_eq!(n, 3);
    let removed: i64 = driver.exec(Cmd::new("DEL").arg(&k)).await?.decode()?;
    assert_eq!(removed, 1);
    let exists: i64 = driver.exec(Cmd::new("EXISTS").arg(&k)).await?.decode()?;
    assert_eq!(exists, 0);
    Ok(())
}

async fn test_cached_reads_see_writes(driver: &dyn Driver) -> Result<(), DriverError> {
    let k = key("cached");
    let ttl = Duration::from_secs(60);
    driver.exec(Cmd::new("SET").arg(&k).arg("before")).await?;
    let (v, _) = driver.exec_cached(Cmd::new("GET").arg(&k), ttl).await?;
    assert_eq!(v.decode::<String>()?, "before");

    driver.exec(Cmd::new("SET").arg(&k).arg("after")).await?;
    let (v, hit) = driver.exec_cached(Cmd::new("GET").arg(&k), ttl).await?;
    assert!(!hit, "a write should drop the cached reply");
    assert_eq!(v.decode::<String>()?, "after");

    driver
        .exec_batch(vec![Cmd::new("SET").arg(&k).arg("batched")])
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    let (v, _) = driver.exec_cached(Cmd::new("GET").arg(&k), ttl).await?;
    assert_eq!(v.decode::<String>()?, "batched");

    driver.exec(Cmd::new("DEL").arg(&k)).await?;
    Ok(())
}

async fn test_sorted_set(driver: &dyn Driver) -> Result<(), DriverError> {
    let k = key("zset");
    let added: i64 = driver
        .exec(Cmd::new("ZADD").arg(&k).arg(2i64).arg("b").arg(1i64).arg("a"))
        .await?
        .decode()?;
    assert_eq!(added, 2);
    let card: i64 = driver.exec(Cmd::new("ZCARD").arg(&k)).await?.decode()?;
    assert_eq!(card, 2);

    let reply = driver
        .exec(
            Cmd::new("ZRANGEBYSCORE")
                .arg(&k)
                .arg("-inf")
                .arg("+inf")
                .arg("WITHSCORES"),
        )
        .await?;
    let members = ScoredMember::decode_list(reply)?;
    let names: Vec<&[u8]> = members.iter().map(|m| m.member.as_ref()).collect();
    assert_eq!(names, [&b"a"[..], b"b"], "members should be ordered by score");

    let removed: i64 = driver.exec(Cmd::new("ZREM").arg(&k).arg("a")).await?.decode()?;
    assert_eq!(removed, 1);
    driver.exec(Cmd::new("DEL").arg(&k)).await?;
    Ok(())
}

async fn test_batch_keeps_order(driver: &dyn Driver) -> Result<(), DriverError> {
    let k = key("batch");
    let results = driver
        .exec_batch(vec![
            Cmd::new("SET").arg(&k).arg("1"),
            Cmd::new("INCRBY").arg(&k).arg(10i64),
            Cmd::new("GET").arg(&k),
        ])
        .await;
    assert_eq!(results.len(), 3);
    let mut it = results.into_iter();
    assert!(it.next().is_some_and(|r| r.is_ok()));
    assert_eq!(it.next().map(|r| r.and_then(Value::decode::<i64>)).transpose()?, Some(11));
    assert_eq!(
        it.next().map(|r| r.and_then(Value::decode::<String>)).transpose()?,
        Some("11".to_owned())
    );
    driver.exec(Cmd::new("DEL").arg(&k)).await?;
    Ok(())
}

async fn test_batch_isolates_errors(driver: &dyn Driver) -> Result<(), DriverError> {
    let k = key("batch-wrongtype");
    driver.exec(Cmd::new("SET").arg(&k).arg("text")).await?;
    let results = driver
        .exec_batch(vec![
            Cmd::new("ZCARD").arg(&k),
            Cmd::new("GET").arg(&k),
        ])
        .await;
    assert_eq!(results.len(), 2);
    assert!(results[0].is_err(), "ZCARD on a string should fail");
    assert!(results[1].is_ok(), "a failure must not poison later commands");
    driver.exec(Cmd::new("DEL").arg(&k)).await?;
    Ok(())
}

async fn test_eval(driver: &dyn Driver) -> Result<(), DriverError> {
    let k = key("script");
    let added: i64 = driver
        .eval(
            &CONFORMANCE_ADD,
            std::slice::from_ref(&k),
            &[Bytes::from_static(b"3"), Bytes::from_static(b"member")],
        )
        .await?
        .decode()?;
    assert_eq!(added, 1);
    let score: f64 = driver
        .exec(Cmd::new("ZSCORE").arg(&k).arg("member"))
        .await?
        .decode()?;
    assert!((score - 3.0).abs() < f64::EPSILON);
    driver.exec(Cmd::new("DEL").arg(&k)).await?;
    Ok(())
}

async fn test_pubsub(driver: &dyn Driver) -> Result<(), DriverError> {
    let channel = key("news");
    let (tx, mut rx) = mpsc::channel(16);
    let mut conn = driver.dedicate(tx).await?;
    conn.subscribe(std::slice::from_ref(&channel)).await?;

    // Subscription confirmation may race the first publish on real servers.
    let mut delivered = None;
    for _ in 0..50 {
        driver.exec(Cmd::new("PUBLISH").arg(&channel).arg("hi")).await?;
        if let Ok(Some(msg)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
            delivered = Some(msg);
            break;
        }
    }
    let Some(msg) = delivered else {
        panic!("subscriber should receive a published message");
    };
    assert_eq!(msg.channel, channel);
    assert_eq!(msg.payload, Bytes::from_static(b"hi"));
    assert!(msg.pattern.is_none());

    conn.unsubscribe(std::slice::from_ref(&channel)).await?;
    conn.close().await;
    Ok(())
}
