use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tasklane::{
    run_all, run_all_void, run_gated, run_gated_contained, BatchOptions, BoxError,
    CancellationToken, PermitPool, ResultTaskGroup, TaskError, TaskGroup,
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_gate_with_one_permit_serializes() {
    let pool = PermitPool::new(1);
    let active = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    let runs = (0..4).map(|_| {
        run_gated(Some(&pool), || async {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, TaskError>(())
        })
    });
    futures::future::join_all(runs).await;

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(pool.available(), 1);
}

#[tokio::test]
async fn test_run_all_caps_concurrency_and_collects() {
    let pool = PermitPool::new(2);
    let active = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    let items = (0..5_u32).map(|i| {
        let (active, peak) = (&active, &peak);
        move || async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, BoxError>(i)
        }
    });

    let mut values = run_all(items, &BatchOptions::new().with_pool(&pool)).await.into_vec();
    values.sort_unstable();

    assert_eq!(values, vec![0, 1, 2, 3, 4]);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(pool.available(), 2);
}

#[tokio::test]
async fn test_run_all_contains_failures() {
    let items = ["f1", "f2", "f3"].into_iter().map(|name| {
        move || async move {
            if name == "f2" {
                Err(format!("{} failed", name))
            } else {
                Ok(name)
            }
        }
    });

    let mut values = run_all(items, &BatchOptions::new()).await.into_vec();
    values.sort_unstable();
    assert_eq!(values, vec!["f1", "f3"]);
}

#[tokio::test]
async fn test_break_on_error_stops_admission() {
    let pool = PermitPool::new(1);
    let token = CancellationToken::new();
    let started = AtomicUsize::new(0);

    let items = (0..4).map(|i| {
        let started = &started;
        move || async move {
            started.fetch_add(1, Ordering::SeqCst);
            if i == 0 {
                Err("first item fails")
            } else {
                Ok(())
            }
        }
    });
    let options = BatchOptions::new()
        .with_pool(&pool)
        .with_cancel(&token)
        .break_on_error(true);
    run_all_void(items, &options).await;

    assert!(token.is_cancelled());
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(pool.available(), 1);
}

#[tokio::test]
async fn test_contained_gate_swallows_panic() {
    let pool = PermitPool::new(1);
    let value: Option<u8> = run_gated_contained(
        Some(&pool),
        || async {
            if true {
                panic!("reader crashed");
            }
            Ok::<_, TaskError>(1)
        },
        "reader",
    )
    .await;

    assert_eq!(value, None);
    assert_eq!(pool.available(), 1);
}

#[tokio::test]
async fn test_groups_propagate_first_error() {
    let mut group = ResultTaskGroup::new();
    group.push(async { Ok::<_, BoxError>("ok") });
    group.push(async { Err::<&str, BoxError>("lookup failed".into()) });
    assert!(matches!(group.run_tasks(None).await, Err(TaskError::Failed(_))));

    let mut group = TaskGroup::new().with_pool(PermitPool::new(1));
    group.push(async { Ok::<_, TaskError>(()) });
    group.push(async { Ok::<_, TaskError>(()) });
    assert!(group.run_tasks(None).await.is_ok());
}

proptest! {
    #[test]
    fn prop_pool_is_restored_after_batch(
        capacity in 1usize..6,
        outcomes in prop::collection::vec(0u8..3, 0..24),
    ) {
        let pool = PermitPool::new(capacity);
        let succeeded = runtime().block_on(async {
            let items = outcomes.iter().map(|&outcome| {
                move || async move {
                    tokio::task::yield_now().await;
                    match outcome {
                        0 => Ok(()),
                        1 => Err("failed"),
                        _ => panic!("panicked"),
                    }
                }
            });
            run_all(items, &BatchOptions::new().with_pool(&pool)).await.len()
        });

        let expected = outcomes.iter().filter(|&&o| o == 0).count();
        prop_assert_eq!(succeeded, expected);
        prop_assert_eq!(pool.available(), capacity);
    }
}
