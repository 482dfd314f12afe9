use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::async_task::task_with_timeout_and_exponential_backoff;
use crate::async_task::Attempt;
use crate::convert::le_to_u64;
use crate::convert::parse_i64;
use crate::convert::safe_kv;
use crate::convert::safe_vk;
use crate::convert::str_to_u64;
use crate::convert::u64_to_le;
use crate::BackoffPolicy;
use crate::ConsensusError;
use crate::Error;
use crate::StorageError;
use crate::SystemError;

#[test]
fn test_safe_kv_round_trip() {
    for i in [0u64, 1, 25, 1 << 40, u64::MAX] {
        assert_eq!(i, safe_vk(safe_kv(i)).unwrap());
    }
}

#[test]
fn test_safe_kv_preserves_numeric_order() {
    assert!(safe_kv(9) < safe_kv(10));
    assert!(safe_kv(255) < safe_kv(256));
}

#[test]
fn test_safe_vk_rejects_wrong_length() {
    let err = safe_vk([1u8, 2, 3]).unwrap_err();
    assert!(matches!(
        err,
        Error::System(SystemError::Storage(StorageError::Convert(_)))
    ));
}

#[test]
fn test_str_to_u64_is_fnv1a() {
    assert_eq!(str_to_u64(""), 0xcbf2_9ce4_8422_2325);
    assert_eq!(str_to_u64("a"), 0xaf63_dc4c_8601_ec8c);
    assert_eq!(str_to_u64("foobar"), 0x8594_4171_f739_67e8);
}

#[test]
fn test_le_conversion() {
    assert_eq!(le_to_u64(u64_to_le(42)).unwrap(), 42);
    assert_eq!(u64_to_le(1), [1, 0, 0, 0, 0, 0, 0, 0]);
}

#[test]
fn test_parse_i64() {
    assert_eq!(parse_i64(b"-17"), Some(-17));
    assert_eq!(parse_i64(b"1x"), None);
    assert_eq!(parse_i64(&[0xff]), None);
}

fn fast_policy(max_retries: usize) -> BackoffPolicy {
    BackoffPolicy {
        max_retries,
        timeout_ms: 100,
        base_delay_ms: 1,
        max_delay_ms: 3,
    }
}

#[tokio::test]
async fn test_task_with_exponential_backoff() {
    let cancel = CancellationToken::new();

    // Case 1: when ok task return ok
    let r = task_with_timeout_and_exponential_backoff(
        || async { Attempt::Done(7u32) },
        fast_policy(3),
        &cancel,
    )
    .await;
    assert_eq!(r.unwrap(), 7);

    // Case 2: transient errors exhaust the retry budget
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let r: crate::Result<()> = task_with_timeout_and_exponential_backoff(
        move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Attempt::Retry(ConsensusError::NotLeader.into())
            }
        },
        fast_policy(3),
        &cancel,
    )
    .await;
    assert!(r.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Case 3: abort stops immediately
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let r: crate::Result<()> = task_with_timeout_and_exponential_backoff(
        move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Attempt::Abort(Error::Fatal("rejected".into()))
            }
        },
        fast_policy(0),
        &cancel,
    )
    .await;
    assert!(r.unwrap_err().is_fatal());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_task_timeout_counts_as_retry() {
    let cancel = CancellationToken::new();
    let policy = BackoffPolicy {
        max_retries: 2,
        timeout_ms: 1,
        base_delay_ms: 1,
        max_delay_ms: 1,
    };
    let r = task_with_timeout_and_exponential_backoff(
        || async {
            sleep(Duration::from_millis(50)).await;
            Attempt::Done(())
        },
        policy,
        &cancel,
    )
    .await;
    assert!(matches!(r, Err(Error::Consensus(ConsensusError::Timeout))));
}

#[tokio::test]
async fn test_unlimited_retries_stop_on_cancel() {
    let cancel = CancellationToken::new();
    let c = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(20)).await;
        c.cancel();
    });
    let r: crate::Result<()> = task_with_timeout_and_exponential_backoff(
        || async { Attempt::Retry(ConsensusError::NotLeader.into()) },
        fast_policy(0),
        &cancel,
    )
    .await;
    assert!(matches!(r, Err(Error::Consensus(ConsensusError::Shutdown))));
}
