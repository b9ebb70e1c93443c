//! End-to-end behaviour of the cascade against fake and real stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use strata_cascade::{Cascade, TierTimeouts};
use strata_core::{
    CacheDescriptor, CacheMode, DispatchError, ErrorCode, FetchOutcome, OriginError, Provenance,
    Ttl, ValueShape,
};
use strata_storage::{DiskStore, InMemoryStore, LmdbDiskStore, MemoryStore};
use strata_test_utils::{arb_cache_mode, arb_descriptor, arb_ttl, OriginCalls, RecordingStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: u64,
}

type FakeCascade = Cascade<RecordingStore, RecordingStore>;

fn fake_cascade() -> (Arc<RecordingStore>, Arc<RecordingStore>, FakeCascade) {
    let memory = Arc::new(RecordingStore::memory());
    let disk = Arc::new(RecordingStore::disk());
    let cascade = Cascade::new(Arc::clone(&memory), Arc::clone(&disk));
    (memory, disk, cascade)
}

fn descriptor(key: &str, mode: CacheMode, ttl: Ttl) -> CacheDescriptor {
    CacheDescriptor::builder()
        .key(key)
        .mode(mode)
        .ttl(ttl)
        .build()
        .unwrap()
}

fn counting_continuation<T: Send + 'static>(
) -> (Arc<AtomicUsize>, impl FnOnce(FetchOutcome<T>) + Send + 'static) {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    (calls, move |_outcome: FetchOutcome<T>| {
        seen.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test]
async fn memory_hit_skips_disk_and_origin() {
    let (memory, disk, cascade) = fake_cascade();
    memory.seed("user:42", &User { id: 42 }, Ttl::Infinite);
    disk.seed("user:42", &User { id: 0 }, Ttl::Infinite);
    let calls = OriginCalls::new();

    let fetched = cascade
        .fetch(
            &descriptor("user:42", CacheMode::MemoryAndDisk, Ttl::secs(60)),
            calls.returning(Ok(Some(User { id: 7 }))),
        )
        .await
        .unwrap();

    assert_eq!(fetched.provenance, Provenance::Memory);
    assert_eq!(fetched.value, Some(User { id: 42 }));
    assert_eq!(disk.gets(), 0);
    assert_eq!(calls.count(), 0);
}

#[tokio::test]
async fn disk_miss_invokes_origin_once() {
    let (memory, disk, cascade) = fake_cascade();
    let calls = OriginCalls::new();

    let fetched = cascade
        .fetch(
            &descriptor("feed", CacheMode::DiskOnly, Ttl::Infinite),
            calls.returning(Ok(Some(User { id: 1 }))),
        )
        .await
        .unwrap();

    assert_eq!(fetched.provenance, Provenance::Origin);
    assert_eq!(calls.count(), 1);
    assert_eq!(disk.gets(), 1);
    assert_eq!(memory.gets(), 0);
}

#[tokio::test]
async fn none_mode_only_queries_origin() {
    let (memory, disk, cascade) = fake_cascade();
    memory.seed("k", &User { id: 1 }, Ttl::Infinite);
    disk.seed("k", &User { id: 2 }, Ttl::Infinite);
    let calls = OriginCalls::new();

    let fetched = cascade
        .fetch(
            &CacheDescriptor::no_cache(),
            calls.returning(Ok(Some(User { id: 3 }))),
        )
        .await
        .unwrap();

    assert_eq!(fetched.provenance, Provenance::Origin);
    assert_eq!(fetched.value, Some(User { id: 3 }));
    assert_eq!(memory.gets() + disk.gets(), 0);
    cascade.wait_idle().await;
    assert_eq!(memory.puts() + disk.puts(), 0);
}

#[tokio::test]
async fn failing_memory_tier_falls_through() {
    let memory = Arc::new(RecordingStore::memory().failing_gets());
    let disk = Arc::new(RecordingStore::disk());
    disk.seed("k", &User { id: 9 }, Ttl::Infinite);
    let cascade = Cascade::new(Arc::clone(&memory), Arc::clone(&disk));

    let fetched = cascade
        .fetch(
            &descriptor("k", CacheMode::MemoryAndDisk, Ttl::Infinite),
            OriginCalls::new().returning(Ok(None::<User>)),
        )
        .await
        .unwrap();

    assert_eq!(fetched.provenance, Provenance::Disk);
    assert_eq!(memory.gets(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_memory_tier_times_out_to_origin() {
    let memory = Arc::new(RecordingStore::memory().with_get_delay(Duration::from_secs(30)));
    let disk = Arc::new(RecordingStore::disk());
    let cascade = Cascade::new(Arc::clone(&memory), Arc::clone(&disk))
        .with_timeouts(TierTimeouts::default().with_memory(Duration::from_millis(20)));
    let calls = OriginCalls::new();

    let started = tokio::time::Instant::now();
    let fetched = cascade
        .fetch(
            &descriptor("slow", CacheMode::MemoryOnly, Ttl::Infinite),
            calls.returning(Ok(Some(User { id: 5 }))),
        )
        .await
        .unwrap();

    assert_eq!(fetched.provenance, Provenance::Origin);
    assert_eq!(calls.count(), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn user_42_is_fetched_and_written_back() {
    let (memory, disk, cascade) = fake_cascade();
    let calls = OriginCalls::new();
    let descriptor = descriptor("user:42", CacheMode::MemoryAndDisk, Ttl::secs(60));

    let fetched = cascade
        .fetch(&descriptor, calls.returning(Ok(Some(User { id: 42 }))))
        .await
        .unwrap();

    assert_eq!(fetched.provenance, Provenance::Origin);
    assert_eq!(fetched.value, Some(User { id: 42 }));

    cascade.wait_idle().await;

    for store in [&memory, &disk] {
        let entry = store.entry("user:42").unwrap();
        assert_eq!(entry.value, serde_json::json!({"id": 42}));
        assert_eq!(entry.ttl, Ttl::secs(60));
    }
    assert_eq!(disk.entry("user:42").unwrap().shape, Some(ValueShape::Json));
}

#[tokio::test]
async fn write_back_is_independent_of_continuation() {
    let (memory, disk, cascade) = fake_cascade();
    let descriptor = descriptor("user:7", CacheMode::MemoryAndDisk, Ttl::secs(30));

    let handle = cascade.spawn(
        descriptor,
        OriginCalls::new().returning(Ok(Some(User { id: 7 }))),
        |_outcome: FetchOutcome<User>| panic!("continuation blew up"),
    );

    let joined = handle.join().await;
    assert!(matches!(joined, Err(DispatchError::Aborted { .. })));

    cascade.wait_idle().await;
    assert_eq!(memory.value::<User>("user:7"), Some(User { id: 7 }));
    assert_eq!(disk.value::<User>("user:7"), Some(User { id: 7 }));
}

#[tokio::test]
async fn cancel_after_origin_keeps_scheduled_write_back() {
    let memory = Arc::new(RecordingStore::memory().with_put_delay(Duration::from_millis(50)));
    let disk = Arc::new(RecordingStore::disk().with_put_delay(Duration::from_millis(50)));
    let cascade = Cascade::new(Arc::clone(&memory), Arc::clone(&disk));
    let (_delivered, continuation) = counting_continuation::<User>();

    let handle = cascade.spawn(
        descriptor("user:9", CacheMode::MemoryAndDisk, Ttl::secs(60)),
        OriginCalls::new().returning(Ok(Some(User { id: 9 }))),
        continuation,
    );

    // The origin has resolved once a write is under way.
    tokio::time::timeout(Duration::from_secs(5), async {
        while memory.puts() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("write-back should start");
    assert!(!memory.contains("user:9"));

    handle.cancel();
    cascade.wait_idle().await;

    assert_eq!(cascade.write_back().pending(), 0);
    assert_eq!(memory.value::<User>("user:9"), Some(User { id: 9 }));
    assert_eq!(disk.value::<User>("user:9"), Some(User { id: 9 }));
    assert_eq!(memory.entry("user:9").map(|e| e.ttl), Some(Ttl::secs(60)));
}

#[tokio::test]
async fn disk_hit_never_writes_memory() {
    let (memory, disk, cascade) = fake_cascade();
    disk.seed("k", &User { id: 3 }, Ttl::Infinite);

    let fetched = cascade
        .fetch(
            &descriptor("k", CacheMode::MemoryAndDisk, Ttl::Infinite),
            OriginCalls::new().returning(Ok(None::<User>)),
        )
        .await
        .unwrap();

    assert_eq!(fetched.provenance, Provenance::Disk);
    cascade.wait_idle().await;
    assert_eq!(memory.puts(), 0);
    assert!(!memory.contains("k"));
}

#[tokio::test]
async fn cancel_before_completion_never_delivers() {
    let memory = Arc::new(RecordingStore::memory().with_get_delay(Duration::from_millis(200)));
    let disk = Arc::new(RecordingStore::disk());
    let cascade = Cascade::new(memory, disk);
    let (delivered, continuation) = counting_continuation::<User>();

    let handle = cascade.spawn(
        descriptor("k", CacheMode::MemoryOnly, Ttl::Infinite),
        OriginCalls::new().returning(Ok(Some(User { id: 1 }))),
        continuation,
    );
    handle.cancel();

    let joined = handle.join().await;
    assert!(matches!(joined, Err(DispatchError::Cancelled { .. })));
    assert_eq!(delivered.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancel_stops_in_flight_origin() {
    let (_memory, _disk, cascade) = fake_cascade();
    let calls = OriginCalls::new();
    let (delivered, continuation) = counting_continuation::<User>();

    let handle = cascade.spawn(CacheDescriptor::no_cache(), calls.pending(), continuation);
    while calls.count() == 0 {
        tokio::task::yield_now().await;
    }
    handle.cancel();

    let joined = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("cancelled fetch must end");
    assert!(matches!(joined, Err(DispatchError::Cancelled { .. })));
    assert_eq!(delivered.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn spawned_fetch_delivers_once() {
    let (_memory, _disk, cascade) = fake_cascade();
    let (delivered, continuation) = counting_continuation::<User>();

    let handle = cascade.spawn(
        descriptor("k", CacheMode::MemoryOnly, Ttl::Infinite),
        OriginCalls::new().returning(Ok(Some(User { id: 1 }))),
        continuation,
    );

    handle.join().await.unwrap();
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dns_failure_is_classified() {
    let (_memory, _disk, cascade) = fake_cascade();
    let (_handle, receiver) = cascade.spawn_channel(
        descriptor("k", CacheMode::MemoryAndDisk, Ttl::Infinite),
        OriginCalls::new().returning::<User>(Err(OriginError::Dns {
            host: "api.example.invalid".to_string(),
            reason: "no such host".to_string(),
        })),
    );

    let err = receiver.await.unwrap().unwrap_err();
    assert_eq!(err.code(), ErrorCode::Dns);
    assert_eq!(err.message(), "domain resolution failed");
}

#[tokio::test]
async fn absent_origin_result_is_a_success() {
    let (memory, disk, cascade) = fake_cascade();
    let fetched = cascade
        .fetch(
            &descriptor("k", CacheMode::MemoryAndDisk, Ttl::Infinite),
            OriginCalls::new().returning(Ok(None::<User>)),
        )
        .await
        .unwrap();

    assert_eq!(fetched.provenance, Provenance::Origin);
    assert_eq!(fetched.value, None);
    cascade.wait_idle().await;
    assert!(memory.is_empty() && disk.is_empty());
}

#[tokio::test]
async fn real_stores_round_trip() {
    let dir = tempfile::TempDir::new().unwrap();
    let memory = Arc::new(InMemoryStore::new(16));
    let disk = Arc::new(LmdbDiskStore::open(dir.path(), 10).unwrap());
    let cascade = Cascade::new(Arc::clone(&memory), Arc::clone(&disk));
    let descriptor = CacheDescriptor::builder()
        .key("user:42")
        .mode(CacheMode::MemoryAndDisk)
        .ttl(Ttl::secs(60))
        .shape(ValueShape::Binary)
        .build()
        .unwrap();

    let first = cascade
        .fetch(
            &descriptor,
            OriginCalls::new().returning(Ok(Some(User { id: 42 }))),
        )
        .await
        .unwrap();
    assert_eq!(first.provenance, Provenance::Origin);
    cascade.wait_idle().await;

    assert_eq!(
        DiskStore::get::<User>(disk.as_ref(), "user:42", ValueShape::Binary)
            .await
            .unwrap(),
        Some(User { id: 42 })
    );

    MemoryStore::clear(memory.as_ref()).await.unwrap();
    let calls = OriginCalls::new();
    let second = cascade
        .fetch(&descriptor, calls.returning(Ok(None::<User>)))
        .await
        .unwrap();
    assert_eq!(second.provenance, Provenance::Disk);
    assert_eq!(second.value, Some(User { id: 42 }));
    assert_eq!(calls.count(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn tiers_follow_mode(mode in arb_cache_mode(), ttl in arb_ttl()) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let (memory, disk, cascade) = fake_cascade();
            let calls = OriginCalls::new();
            let descriptor = descriptor("user:1", mode, ttl);

            let fetched = cascade
                .fetch(&descriptor, calls.returning(Ok(Some(User { id: 1 }))))
                .await
                .unwrap();
            cascade.wait_idle().await;

            prop_assert_eq!(fetched.provenance, Provenance::Origin);
            prop_assert_eq!(calls.count(), 1);
            prop_assert_eq!(memory.gets(), usize::from(mode.uses_memory()));
            prop_assert_eq!(disk.gets(), usize::from(mode.uses_disk()));
            prop_assert_eq!(memory.contains("user:1"), mode.uses_memory());
            prop_assert_eq!(disk.contains("user:1"), mode.uses_disk());

            let again = cascade
                .fetch(&descriptor, calls.returning(Ok(Some(User { id: 2 }))))
                .await
                .unwrap();
            let expected = match mode.cache_tiers().first() {
                Some(tier) => Provenance::from(*tier),
                None => Provenance::Origin,
            };
            prop_assert_eq!(again.provenance, expected);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn first_populated_tier_wins(descriptor in arb_descriptor()) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let (memory, disk, cascade) = fake_cascade();
            memory.seed(descriptor.key(), &User { id: 1 }, Ttl::Infinite);
            disk.seed(descriptor.key(), &User { id: 2 }, Ttl::Infinite);
            let calls = OriginCalls::new();

            let fetched = cascade
                .fetch(&descriptor, calls.returning(Ok(Some(User { id: 3 }))))
                .await
                .unwrap();

            let mode = descriptor.mode();
            let (provenance, id) = if mode.uses_memory() {
                (Provenance::Memory, 1)
            } else if mode.uses_disk() {
                (Provenance::Disk, 2)
            } else {
                (Provenance::Origin, 3)
            };
            prop_assert_eq!(fetched.provenance, provenance);
            prop_assert_eq!(fetched.value, Some(User { id }));
            prop_assert_eq!(calls.count(), usize::from(!mode.is_cached()));
            Ok::<(), TestCaseError>(())
        })?;
    }
}
