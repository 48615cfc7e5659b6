// tests/scope_and_group.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use flowdag::engine::{DeadlineScope, ScopeEnd};
use flowdag::exec::TaskGroup;
use flowdag_test_utils::with_timeout;

#[tokio::test]
async fn child_deadline_never_outlives_parent() {
    let root = CancellationToken::new();
    let parent = DeadlineScope::new(&root, Duration::from_millis(100));

    let long_child = parent.child(Duration::from_secs(60));
    assert_eq!(long_child.deadline(), parent.deadline());

    let short_child = parent.child(Duration::from_millis(10));
    assert!(short_child.deadline() < parent.deadline());
    assert!(short_child.remaining() <= Duration::from_millis(10));
}

#[tokio::test]
async fn child_expiry_does_not_end_parent() {
    let root = CancellationToken::new();
    let parent = DeadlineScope::new(&root, Duration::from_secs(10));
    let child = parent.child(Duration::from_millis(30));

    assert_eq!(with_timeout(child.done()).await, ScopeEnd::DeadlineExceeded);
    assert_eq!(child.end_reason(), Some(ScopeEnd::DeadlineExceeded));
    assert_eq!(parent.end_reason(), None);
}

#[tokio::test]
async fn cancelling_parent_ends_children() {
    let root = CancellationToken::new();
    let parent = DeadlineScope::new(&root, Duration::from_secs(10));
    let child = parent.child(Duration::from_secs(10));
    let grandchild = child.child(Duration::from_secs(10));

    root.cancel();

    assert_eq!(with_timeout(grandchild.done()).await, ScopeEnd::Cancelled);
    assert!(child.is_cancelled());
    assert!(parent.is_cancelled());
    assert_eq!(grandchild.end_reason(), Some(ScopeEnd::Cancelled));
}

#[tokio::test]
async fn cancelling_child_leaves_parent_running() {
    let root = CancellationToken::new();
    let parent = DeadlineScope::new(&root, Duration::from_secs(10));
    let child = parent.child(Duration::from_secs(10));

    child.cancel();

    assert!(child.is_cancelled());
    assert!(!parent.is_cancelled());
    assert!(!root.is_cancelled());
}

#[tokio::test]
async fn expired_deadline_wins_over_cancellation() {
    let root = CancellationToken::new();
    let scope = DeadlineScope::new(&root, Duration::from_millis(20));

    tokio::time::sleep(Duration::from_millis(40)).await;
    scope.cancel();

    assert!(scope.is_expired());
    assert_eq!(scope.end_reason(), Some(ScopeEnd::DeadlineExceeded));
}

#[tokio::test]
async fn group_joins_units_spawned_by_other_units() {
    let (group, join) = TaskGroup::new();
    let count = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let inner_group = group.clone();
        let count = Arc::clone(&count);
        group.spawn("outer", async move {
            count.fetch_add(1, Ordering::SeqCst);
            let count = Arc::clone(&count);
            inner_group.spawn("inner", async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                count.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            });
            anyhow::Ok(())
        });
    }
    drop(group);

    let fault = with_timeout(join.join_and_recover()).await;
    assert!(fault.is_none());
    assert_eq!(count.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn group_reports_first_fault_and_keeps_siblings_running() {
    let (group, join) = TaskGroup::new();
    let finished = Arc::new(AtomicUsize::new(0));

    group.spawn("broken", async { Err::<(), _>(anyhow::anyhow!("boom")) });
    for _ in 0..4 {
        let finished = Arc::clone(&finished);
        group.spawn("worker", async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            finished.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(())
        });
    }
    drop(group);

    let fault = with_timeout(join.join_and_recover())
        .await
        .expect("error should be reported");
    assert_eq!(fault.task(), "broken");
    assert!(!fault.is_panic());
    assert!(fault.to_string().contains("boom"));
    assert_eq!(finished.load(Ordering::SeqCst), 4);
}

async fn explode() -> anyhow::Result<()> {
    panic!("kaboom");
}

#[tokio::test]
async fn group_recovers_panics() {
    let (group, join) = TaskGroup::new();

    group.spawn("explodes", explode());
    drop(group);

    let fault = with_timeout(join.join_and_recover())
        .await
        .expect("panic should be reported");
    assert!(fault.is_panic());
    assert_eq!(fault.task(), "explodes");
    assert!(fault.to_string().contains("kaboom"));
}

#[tokio::test]
async fn spawning_after_join_is_refused() {
    let (group, join) = TaskGroup::new();
    let spare = group.clone();
    drop(group);
    drop(join);

    assert!(!spare.spawn("late", async { anyhow::Ok(()) }));
}

#[tokio::test]
async fn overflowing_timeouts_are_capped() {
    let root = CancellationToken::new();
    let unbounded = DeadlineScope::new(&root, Duration::MAX);
    assert!(unbounded.remaining() > Duration::from_secs(86400 * 365));
    assert_eq!(unbounded.end_reason(), None);

    let child = unbounded.child(Duration::MAX);
    assert!(child.deadline() <= unbounded.deadline());

    let bounded = DeadlineScope::new(&root, Duration::from_millis(50));
    assert_eq!(bounded.child(Duration::MAX).deadline(), bounded.deadline());
}
